//! The shared session context.
//!
//! One [`SessionState`] exists per process, behind one mutex. [`Session`] is
//! the cloneable handle every component receives explicitly: the scheduler,
//! the login/logout commands and the CLI harness. No caller keeps a private
//! copy for mutation; every read and write goes through the lock, so the
//! token and expiry are never observed half-updated.
//!
//! Each mutation bumps [`SessionState::generation`]. A caller that read the
//! state, released the lock and did network work can then commit its result
//! only if nothing else changed the session in between.

use parking_lot::Mutex;
use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};
use url::Url;

/// A token issued by the server.
#[derive(Debug)]
pub struct Grant {
    pub token: SecretString,
    /// Lifetime from the moment the grant is committed.
    pub expires_in: Duration,
}

/// Fields of the session. Only reachable through [`Session`].
#[derive(Debug, Default)]
pub struct SessionState {
    pub server_url: Option<Url>,
    pub token: Option<SecretString>,
    /// Unset until a login completes; unset means no refresh is due.
    pub expiry: Option<Instant>,
    pub user: Option<String>,
    pub logged_in: bool,
    pub generation: u64,
}

impl SessionState {
    fn bump(&mut self) -> u64 {
        self.generation = self.generation.wrapping_add(1);
        self.generation
    }

    fn clear_credentials(&mut self) {
        self.token = None;
        self.expiry = None;
        self.user = None;
        self.logged_in = false;
    }
}

/// Where the session stands relative to its expiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// No expiry set.
    Unauthenticated,
    /// Expiry further away than the refresh threshold.
    Authenticated,
    /// Expiry within the refresh threshold (or already past).
    RefreshDue,
}

/// A consistent copy of the session, taken under one lock acquisition.
#[derive(Debug)]
pub struct SessionSnapshot {
    pub server_url: Option<Url>,
    pub token: Option<SecretString>,
    pub expiry: Option<Instant>,
    pub generation: u64,
}

/// Cloneable handle to the shared, lock-guarded session.
#[derive(Debug, Clone, Default)]
pub struct Session {
    inner: Arc<Mutex<SessionState>>,
}

fn copy_secret(secret: &SecretString) -> SecretString {
    SecretString::from(secret.expose_secret())
}

impl Session {
    pub fn new(server_url: Option<Url>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(SessionState {
                server_url,
                ..SessionState::default()
            })),
        }
    }

    pub fn expiry(&self) -> Option<Instant> {
        self.inner.lock().expiry
    }

    pub fn token(&self) -> Option<SecretString> {
        self.inner.lock().token.as_ref().map(copy_secret)
    }

    pub fn server_url(&self) -> Option<Url> {
        self.inner.lock().server_url.clone()
    }

    pub fn user(&self) -> Option<String> {
        self.inner.lock().user.clone()
    }

    pub fn generation(&self) -> u64 {
        self.inner.lock().generation
    }

    pub fn is_authenticated(&self) -> bool {
        let state = self.inner.lock();
        state.logged_in && state.expiry.is_some()
    }

    /// Time left until expiry, zero once expired, `None` when unset.
    pub fn remaining(&self) -> Option<Duration> {
        self.inner
            .lock()
            .expiry
            .map(|expiry| expiry.saturating_duration_since(Instant::now()))
    }

    pub fn phase(&self, threshold: Duration) -> SessionPhase {
        match self.remaining() {
            None => SessionPhase::Unauthenticated,
            Some(remaining) if remaining <= threshold => SessionPhase::RefreshDue,
            Some(_) => SessionPhase::Authenticated,
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let state = self.inner.lock();
        SessionSnapshot {
            server_url: state.server_url.clone(),
            token: state.token.as_ref().map(copy_secret),
            expiry: state.expiry,
            generation: state.generation,
        }
    }

    /// Records a login grant. Returns the new generation.
    pub fn commit_grant(&self, user: &str, grant: &Grant) -> u64 {
        let mut state = self.inner.lock();
        state.token = Some(copy_secret(&grant.token));
        state.expiry = Some(Instant::now() + grant.expires_in);
        state.user = Some(user.to_string());
        state.logged_in = true;
        let generation = state.bump();
        info!(user, expires_in = ?grant.expires_in, "Session authenticated");
        generation
    }

    /// Records a renewed token, unless the session changed since
    /// `expected_generation` was read.
    pub fn commit_refresh(&self, expected_generation: u64, grant: &Grant) -> bool {
        let mut state = self.inner.lock();
        if state.generation != expected_generation {
            debug!(
                expected_generation,
                current = state.generation,
                "Discarding refresh for superseded session"
            );
            return false;
        }
        state.token = Some(copy_secret(&grant.token));
        state.expiry = Some(Instant::now() + grant.expires_in);
        state.bump();
        debug!(expires_in = ?grant.expires_in, "Session token renewed");
        true
    }

    /// Drops the credentials (logout).
    pub fn clear(&self) {
        let mut state = self.inner.lock();
        state.clear_credentials();
        state.bump();
        info!("Session cleared");
    }

    /// Drops the credentials only if the session is still at
    /// `expected_generation`.
    pub fn clear_if(&self, expected_generation: u64) -> bool {
        let mut state = self.inner.lock();
        if state.generation != expected_generation {
            return false;
        }
        state.clear_credentials();
        state.bump();
        info!("Session cleared after rejection");
        true
    }

    /// Switches to another server, dropping any credentials.
    pub fn reset(&self, server_url: Url) {
        let mut state = self.inner.lock();
        state.clear_credentials();
        info!(server = %server_url, "Session reset");
        state.server_url = Some(server_url);
        state.bump();
    }
}
