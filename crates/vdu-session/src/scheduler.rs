//! Background token renewal.
//!
//! The scheduler polls the session and renews the token once the remaining
//! lifetime drops to the refresh threshold:
//!
//! ```text
//! Unauthenticated ──login──▶ Authenticated ──expiry near──▶ RefreshDue
//!        ▲                        ▲                              │
//!        │ rejected               │ renewed                      ▼
//!        └─────────────────── RefreshInFlight ◀──────────────────┘
//!                                  │ connection failure
//!                                  ▼
//!                         RefreshFailedBackoff ──backoff──▶ (poll again)
//! ```
//!
//! The session lock is held only to take a snapshot and, inside the
//! connection task's completion callback, to commit the new grant. At most
//! one renewal is in flight, since the loop awaits each one before polling
//! again.

use crate::api::SessionApi;
use crate::error::SessionError;
use crate::state::{Session, SessionPhase, SessionSnapshot};
use crate::task::ConnectionTask;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Timing of the refresh loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshPolicy {
    /// Renew once the remaining lifetime is at or below this.
    pub threshold: Duration,
    /// Delay between polls of the session.
    pub poll_interval: Duration,
    /// Delay after a transient renewal failure.
    pub backoff: Duration,
    /// Upper bound on one renewal request.
    pub request_timeout: Duration,
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        Self {
            threshold: Duration::from_secs(3),
            poll_interval: Duration::from_secs(1),
            backoff: Duration::from_secs(4),
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl RefreshPolicy {
    #[must_use]
    pub fn threshold(mut self, threshold: Duration) -> Self {
        self.threshold = threshold;
        self
    }

    #[must_use]
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    #[must_use]
    pub fn backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    #[must_use]
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

/// Result of one renewal attempt.
#[derive(Debug)]
pub enum RefreshOutcome {
    /// The server issued a new token valid for `expires_in`.
    Success { expires_in: Duration },
    Failure(SessionError),
}

/// Published scheduler state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Unauthenticated,
    Authenticated,
    RefreshDue,
    RefreshInFlight,
    RefreshFailedBackoff,
    Stopped,
}

impl From<SessionPhase> for SchedulerState {
    fn from(phase: SessionPhase) -> Self {
        match phase {
            SessionPhase::Unauthenticated => Self::Unauthenticated,
            SessionPhase::Authenticated => Self::Authenticated,
            SessionPhase::RefreshDue => Self::RefreshDue,
        }
    }
}

/// Handle to a running scheduler. Dropping it stops the loop.
#[derive(Debug)]
pub struct SchedulerHandle {
    state: watch::Receiver<SchedulerState>,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl SchedulerHandle {
    pub fn state(&self) -> SchedulerState {
        *self.state.borrow()
    }

    /// A receiver notified on every state transition.
    pub fn subscribe(&self) -> watch::Receiver<SchedulerState> {
        self.state.clone()
    }

    /// Stops the loop and waits for it to exit.
    ///
    /// A renewal already in flight is allowed to finish first.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take()
            && let Err(e) = task.await
        {
            warn!(error = %e, "Refresh scheduler task failed");
        }
    }
}

impl Drop for SchedulerHandle {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

/// The refresh loop.
pub struct RefreshScheduler {
    session: Session,
    api: Arc<dyn SessionApi>,
    policy: RefreshPolicy,
    state: watch::Sender<SchedulerState>,
}

impl RefreshScheduler {
    /// Starts the loop on the current Tokio runtime.
    pub fn spawn(
        session: Session,
        api: Arc<dyn SessionApi>,
        policy: RefreshPolicy,
    ) -> SchedulerHandle {
        let (state_tx, state_rx) = watch::channel(SchedulerState::Unauthenticated);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let scheduler = Self {
            session,
            api,
            policy,
            state: state_tx,
        };
        let task = tokio::spawn(scheduler.run(shutdown_rx));
        SchedulerHandle {
            state: state_rx,
            shutdown: Some(shutdown_tx),
            task: Some(task),
        }
    }

    fn publish(&self, next: SchedulerState) {
        self.state.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            debug!(from = ?*current, to = ?next, "Scheduler state changed");
            *current = next;
            true
        });
    }

    async fn run(self, mut shutdown: oneshot::Receiver<()>) {
        info!(policy = ?self.policy, "Refresh scheduler started");
        loop {
            let delay = self.tick().await;
            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                _ = &mut shutdown => break,
            }
        }
        self.publish(SchedulerState::Stopped);
        info!("Refresh scheduler stopped");
    }

    /// One poll. Returns how long to sleep before the next.
    async fn tick(&self) -> Duration {
        let phase = self.session.phase(self.policy.threshold);
        self.publish(phase.into());
        if phase != SessionPhase::RefreshDue {
            return self.policy.poll_interval;
        }

        self.publish(SchedulerState::RefreshInFlight);
        match self.refresh_once(self.session.snapshot()).await {
            RefreshOutcome::Success { expires_in } => {
                debug!(?expires_in, "Token renewed");
                // A concurrent logout may have discarded the grant.
                self.publish(self.session.phase(self.policy.threshold).into());
                self.policy.poll_interval
            }
            RefreshOutcome::Failure(e) if e.is_transient() => {
                warn!(error = %e, backoff = ?self.policy.backoff, "Token renewal failed, backing off");
                self.publish(SchedulerState::RefreshFailedBackoff);
                self.policy.backoff
            }
            RefreshOutcome::Failure(e) => {
                warn!(error = %e, "Token renewal rejected");
                // A concurrent login keeps its session.
                self.publish(self.session.phase(self.policy.threshold).into());
                self.policy.poll_interval
            }
        }
    }

    /// Runs one renewal to completion.
    ///
    /// The completion callback commits the grant, or clears the session on
    /// a definitive failure, in both cases only if the session is still the
    /// one the snapshot was taken from.
    async fn refresh_once(&self, snapshot: SessionSnapshot) -> RefreshOutcome {
        let generation = snapshot.generation;
        let (Some(server), Some(token)) = (snapshot.server_url, snapshot.token) else {
            self.session.clear_if(generation);
            return RefreshOutcome::Failure(SessionError::NotAuthenticated);
        };

        let api = Arc::clone(&self.api);
        let session = self.session.clone();
        let task = ConnectionTask::spawn_with_timeout(
            self.policy.request_timeout,
            async move { api.refresh(&server, &token).await },
            move |result| match result {
                Ok(grant) => {
                    session.commit_refresh(generation, grant);
                }
                Err(e) if !e.is_transient() => {
                    session.clear_if(generation);
                }
                Err(_) => {}
            },
        );
        match task.join().await {
            Ok(grant) => RefreshOutcome::Success {
                expires_in: grant.expires_in,
            },
            Err(e) => RefreshOutcome::Failure(e),
        }
    }
}
