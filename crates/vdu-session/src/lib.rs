//! Authenticated session and background token refresh.
//!
//! - [`Session`]: the single shared, mutex-guarded session context
//! - [`SessionApi`] / [`HttpApi`]: the remote service, one request per call
//! - [`ConnectionTask`]: one API call plus its completion callback
//! - [`SessionClient`]: login, logout, reset and remote-file commands
//! - [`RefreshScheduler`]: renews the token before it lapses
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use secrecy::SecretString;
//! use vdu_session::{HttpApi, RefreshPolicy, RefreshScheduler, Session, SessionClient};
//!
//! # async fn run() -> Result<(), vdu_session::SessionError> {
//! let session = Session::default();
//! let api = Arc::new(HttpApi::new(Duration::from_secs(30))?);
//! let client = SessionClient::new(session.clone(), api.clone(), Duration::from_secs(30));
//!
//! client.reset("vdu.example:4443")?;
//! client.login("alice", SecretString::from("secret")).await?;
//!
//! let scheduler = RefreshScheduler::spawn(session, api, RefreshPolicy::default());
//! // ... the token is renewed in the background ...
//! scheduler.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod client;
pub mod error;
pub mod scheduler;
pub mod state;
pub mod task;

pub use api::{API_KEY_HEADER, HttpApi, SessionApi};
pub use client::{SessionClient, parse_server_url};
pub use error::{ResultCode, SessionError, SessionResult};
pub use scheduler::{
    RefreshOutcome, RefreshPolicy, RefreshScheduler, SchedulerHandle, SchedulerState,
};
pub use state::{Grant, Session, SessionPhase, SessionSnapshot, SessionState};
pub use task::ConnectionTask;
