//! Provider configuration.

use crate::path_mapper::DEFAULT_MAX_PATH_LEN;
use std::fmt;
use std::sync::Arc;

/// Default volume label.
pub const DEFAULT_VOLUME_LABEL: &str = "VDU";

/// Decides whether filesystem callbacks may proceed.
///
/// When a gate is configured every callback consults it first and fails
/// with `AccessDenied` while it is closed. A session-backed implementation
/// ties the mounted volume to the login state.
pub trait AccessGate: Send + Sync + fmt::Debug {
    /// Returns true while callbacks are allowed.
    fn is_open(&self) -> bool;
}

/// Configuration options for the filesystem provider.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// Label reported by `get_volume_info`.
    pub volume_label: String,

    /// Maximum byte length of a mapped backing path.
    ///
    /// Default: 4096.
    pub max_path_len: usize,

    /// Optional access gate. Default: none (the volume is always accessible).
    pub gate: Option<Arc<dyn AccessGate>>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            volume_label: DEFAULT_VOLUME_LABEL.to_string(),
            max_path_len: DEFAULT_MAX_PATH_LEN,
            gate: None,
        }
    }
}

impl ProviderConfig {
    /// Sets the volume label.
    #[must_use]
    pub fn volume_label(mut self, label: impl Into<String>) -> Self {
        self.volume_label = label.into();
        self
    }

    /// Sets the maximum mapped path length.
    #[must_use]
    pub fn max_path_len(mut self, len: usize) -> Self {
        self.max_path_len = len;
        self
    }

    /// Installs an access gate.
    #[must_use]
    pub fn gate(mut self, gate: Arc<dyn AccessGate>) -> Self {
        self.gate = Some(gate);
        self
    }
}
