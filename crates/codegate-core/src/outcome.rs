//! Normalized result of one gateway invocation

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ErrorKind, GatewayError};

/// `{ result | error, logs }` — returned for every invocation, never an `Err`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub logs: Vec<String>,
}

impl ExecutionOutcome {
    /// Normal completion. `None` means the snippet returned `undefined`.
    pub fn success(result: Option<Value>, logs: Vec<String>) -> Self {
        Self {
            result,
            error: None,
            logs,
        }
    }

    pub fn failure(error: GatewayError, logs: Vec<String>) -> Self {
        Self {
            result: None,
            error: Some(error.to_string()),
            logs,
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Classification of `error`, if present
    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_deref().map(ErrorKind::of)
    }
}
