//! Error types shared across the daemon
//!
//! Callback failures never appear here: they are contained and logged at the
//! dispatch boundary. What remains is registration, hook, platform and
//! executor errors.

use std::time::Duration;

use crate::hotkey::BindingId;

/// Errors from starting the OS-level notification channel
#[derive(Debug, Clone, thiserror::Error)]
pub enum HookError {
    #[error("input hook unavailable: {0}")]
    Unavailable(String),

    #[error("failed to spawn hook thread: {0}")]
    ThreadSpawn(String),
}

/// Errors returned synchronously by hotkey registration
#[derive(Debug, Clone, thiserror::Error)]
pub enum RegistrationError {
    #[error("hotkey {0} is already registered")]
    DuplicateBinding(BindingId),

    #[error("invalid hotkey key: {0:?}")]
    InvalidKey(String),

    #[error("failed to start listener: {0}")]
    Hook(#[from] HookError),
}

/// Category used to pick a recovery action after a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    HotkeyRegistration,
    MouseOperation,
    SystemResource,
    KeyboardInput,
    Other,
}

/// Domain errors raised by platform operations
///
/// These pass through the executor unchanged once retries are exhausted.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PlatformError {
    #[error("hotkey registration failed: {0}")]
    HotkeyRegistration(String),

    #[error("hotkey {0} is already registered")]
    DuplicateBinding(BindingId),

    #[error("invalid hotkey key: {0:?}")]
    InvalidKey(String),

    #[error("mouse operation failed: {0}")]
    MouseOperation(String),

    #[error("system resource error: {0}")]
    SystemResource(String),

    #[error("keyboard input error: {0}")]
    KeyboardInput(String),

    #[error("operation panicked: {0}")]
    OperationPanicked(String),
}

impl PlatformError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::HotkeyRegistration(_) | Self::DuplicateBinding(_) | Self::InvalidKey(_) => {
                ErrorKind::HotkeyRegistration
            }
            Self::MouseOperation(_) => ErrorKind::MouseOperation,
            Self::SystemResource(_) => ErrorKind::SystemResource,
            Self::KeyboardInput(_) => ErrorKind::KeyboardInput,
            Self::OperationPanicked(_) => ErrorKind::Other,
        }
    }

    /// Whether another attempt could succeed
    ///
    /// Duplicate bindings and invalid keys are reported at once.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::DuplicateBinding(_) | Self::InvalidKey(_))
    }
}

impl From<RegistrationError> for PlatformError {
    fn from(err: RegistrationError) -> Self {
        match err {
            RegistrationError::DuplicateBinding(id) => Self::DuplicateBinding(id),
            RegistrationError::InvalidKey(key) => Self::InvalidKey(key),
            other => Self::HotkeyRegistration(other.to_string()),
        }
    }
}

/// Errors returned by the resilient executor
#[derive(Debug, Clone, thiserror::Error)]
pub enum ExecuteError {
    #[error("operation timed out after {timeout:?}: {label}")]
    Timeout { label: String, timeout: Duration },

    #[error("too many abandoned operations still running ({limit}): {label}")]
    Saturated { label: String, limit: usize },

    #[error("{label} failed after {attempts} attempt(s): {source}")]
    Failed {
        label: String,
        attempts: u32,
        #[source]
        source: PlatformError,
    },
}

impl ExecuteError {
    pub fn label(&self) -> &str {
        match self {
            Self::Timeout { label, .. }
            | Self::Saturated { label, .. }
            | Self::Failed { label, .. } => label,
        }
    }

    /// The original operation error, if the operation itself failed
    pub fn into_source(self) -> Option<PlatformError> {
        match self {
            Self::Failed { source, .. } => Some(source),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Errors from the callback worker pool
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WorkerError {
    #[error("worker queue is full")]
    QueueFull,

    #[error("worker pool has shut down")]
    Disconnected,

    #[error("failed to spawn worker thread: {0}")]
    Spawn(String),
}
