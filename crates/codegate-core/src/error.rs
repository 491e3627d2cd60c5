//! Gateway error taxonomy
//!
//! Every failure an invocation can hit is folded into one of these variants
//! and then flattened into the `error` string of an
//! [`ExecutionOutcome`](crate::outcome::ExecutionOutcome). None of them is
//! ever raised to the gateway's caller.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Message returned for every Safety Gate rejection. Never names the rule.
pub const VALIDATION_MESSAGE: &str = "Code validation failed: dangerous pattern detected";

/// Message returned when the deadline fires before the snippet settles.
pub const TIMEOUT_MESSAGE: &str = "Execution timed out";

/// Errors produced while gating or running a snippet.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum GatewayError {
    /// The snippet matched a deny pattern or exceeded the size limit.
    #[error("Code validation failed: dangerous pattern detected")]
    Validation,

    /// The deadline elapsed first.
    #[error("Execution timed out")]
    Timeout,

    /// The snippet raised; carries the raised condition's description.
    #[error("{0}")]
    Runtime(String),

    /// The script engine itself could not be set up.
    #[error("Script engine error: {0}")]
    Engine(String),
}

/// Coarse classification of an outcome's error string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    Validation,
    Timeout,
    Runtime,
}

impl GatewayError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation => ErrorKind::Validation,
            Self::Timeout => ErrorKind::Timeout,
            Self::Runtime(_) | Self::Engine(_) => ErrorKind::Runtime,
        }
    }
}

impl ErrorKind {
    /// Classify an error message by its fixed prefix.
    ///
    /// Runtime messages are free text chosen by the snippet, so a snippet can
    /// imitate the other two; callers needing certainty should use
    /// [`GatewayError::kind`] before flattening.
    pub fn of(message: &str) -> Self {
        if message == VALIDATION_MESSAGE {
            Self::Validation
        } else if message == TIMEOUT_MESSAGE {
            Self::Timeout
        } else {
            Self::Runtime
        }
    }
}

impl From<rquickjs::Error> for GatewayError {
    fn from(e: rquickjs::Error) -> Self {
        Self::Engine(e.to_string())
    }
}
