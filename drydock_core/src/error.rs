use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How a failed fixture operation should be reported by the consuming test.
///
/// `Warn` means the test should skip (the host cannot run containers at
/// all); `Fatal` means the fixture was expected to work and did not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Warn,
    Fatal,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Warn => write!(f, "warn"),
            Severity::Fatal => write!(f, "fatal"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DrydockError {
    /// An event that needs the user's attention, carrying a severity and a
    /// human-readable message for test-runner reporting.
    #[error("{message}")]
    User { severity: Severity, message: String },

    /// A lifecycle function was called before the environment was running.
    #[error("the environment '{0}' is not running")]
    NotRunning(String),
}

impl DrydockError {
    pub fn warn(message: impl Into<String>) -> Self {
        DrydockError::User {
            severity: Severity::Warn,
            message: message.into(),
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        DrydockError::User {
            severity: Severity::Fatal,
            message: message.into(),
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            DrydockError::User { severity, .. } => *severity,
            DrydockError::NotRunning(_) => Severity::Fatal,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }
}

pub type Result<T> = error_stack::Result<T, DrydockError>;
