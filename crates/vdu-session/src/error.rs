//! Session error taxonomy and process result codes.

use std::time::Duration;
use thiserror::Error;

/// Stable result codes surfaced as process exit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ResultCode {
    Success = 0,
    General = 1,
    Usage = 2,
    AuthRejected = 3,
    ConnectionFailure = 4,
    PermissionDenied = 5,
    MountFailed = 6,
    NotFound = 7,
}

impl ResultCode {
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// The value to pass to `std::process::exit`.
    pub fn exit_code(self) -> i32 {
        i32::from(self.as_u8())
    }
}

/// Errors raised by session commands, connection tasks and the scheduler.
#[derive(Error, Debug)]
pub enum SessionError {
    /// The network step failed: transport error, HTTP 5xx or 429.
    #[error("Connection failed: {0}")]
    ConnectionFailure(String),

    /// The request did not complete in time.
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// The server refused the credentials or token (HTTP 401/403).
    #[error("Rejected by server (HTTP {status})")]
    Rejected { status: u16 },

    /// The addressed remote file does not exist (HTTP 404).
    #[error("Remote file not found: {0}")]
    NotFound(String),

    /// Any other unsuccessful HTTP status.
    #[error("Server returned HTTP {status}")]
    Remote { status: u16 },

    #[error("No server URL configured")]
    NoServer,

    #[error("Not logged in")]
    NotAuthenticated,

    #[error("Invalid server URL {0}")]
    InvalidUrl(String),

    /// The server answered with a body that could not be decoded.
    #[error("Malformed response: {0}")]
    Malformed(String),

    /// The connection task was cancelled or panicked.
    #[error("Connection task aborted")]
    TaskAborted,
}

impl SessionError {
    /// Classifies an unsuccessful HTTP status for the request named `what`.
    pub fn from_status(status: u16, what: &str) -> Self {
        match status {
            401 | 403 => Self::Rejected { status },
            404 => Self::NotFound(what.to_string()),
            429 | 500..=599 => Self::ConnectionFailure(format!("{what}: HTTP {status}")),
            _ => Self::Remote { status },
        }
    }

    /// Whether retrying after a delay may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::ConnectionFailure(_) | Self::Timeout(_) | Self::TaskAborted
        )
    }

    pub fn code(&self) -> ResultCode {
        match self {
            Self::ConnectionFailure(_) | Self::Timeout(_) => ResultCode::ConnectionFailure,
            Self::Rejected { .. } => ResultCode::AuthRejected,
            Self::NotAuthenticated => ResultCode::PermissionDenied,
            Self::NotFound(_) => ResultCode::NotFound,
            Self::NoServer | Self::InvalidUrl(_) => ResultCode::Usage,
            Self::Remote { .. } | Self::Malformed(_) | Self::TaskAborted => ResultCode::General,
        }
    }
}

/// Result alias for session operations.
pub type SessionResult<T> = Result<T, SessionError>;
