//! Core error types for eyerest-core.
//!
//! Construction-time and configuration failures are the only errors the
//! scheduler reports; once timers are running, failures surface as
//! events or finish reasons instead.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Core error type for eyerest-core.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Countdown timer construction errors
    #[error("Timer error: {0}")]
    Timer(#[from] TimerError),

    /// The UI-affinity context rejected work
    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    /// The display surface could not be shown
    #[error("Surface error: {0}")]
    Surface(#[from] SurfaceError),

    /// A finish reason value that does not map to any known reason
    #[error("Invalid finish reason value: {0}")]
    InvalidReason(u8),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while constructing a [`CountdownTimer`](crate::timer::CountdownTimer).
#[derive(Error, Debug)]
pub enum TimerError {
    /// Total duration or tick interval was zero
    #[error("Invalid duration for '{name}': {value:?} (must be positive)")]
    InvalidDuration { name: &'static str, value: Duration },

    /// The background worker thread could not be created
    #[error("Failed to spawn timer worker: {0}")]
    Spawn(#[source] std::io::Error),
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to load configuration
    #[error("Failed to load settings from {path}: {message}")]
    LoadFailed { path: PathBuf, message: String },

    /// Failed to save configuration
    #[error("Failed to save settings to {path}: {message}")]
    SaveFailed { path: PathBuf, message: String },

    /// Failed to parse configuration
    #[error("Failed to parse settings: {0}")]
    ParseFailed(String),

    /// One or more fields violate the settings rules
    #[error("Invalid settings: {}", join_field_errors(.0))]
    Invalid(Vec<FieldError>),
}

impl ConfigError {
    /// Field-level messages, empty for non-validation failures.
    pub fn field_errors(&self) -> &[FieldError] {
        match self {
            ConfigError::Invalid(errors) => errors,
            _ => &[],
        }
    }
}

/// A single validation failure on one settings field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

impl FieldError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for FieldError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn join_field_errors(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// UI-affinity context errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// The context was shut down or its thread has exited
    #[error("UI context is closed")]
    Closed,

    /// The job panicked before producing a result
    #[error("UI job panicked")]
    JobPanicked,
}

/// Display surface errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SurfaceError {
    /// The surface cannot be shown right now
    #[error("Display surface unavailable: {0}")]
    Unavailable(String),
}

/// Result type alias for CoreError
pub type Result<T, E = CoreError> = std::result::Result<T, E>;
