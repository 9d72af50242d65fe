//! Response wrappers shared by every endpoint.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Standard `{success, message, data, errors}` wrapper used by the API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<T> {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default = "Option::default")]
    pub data: Option<T>,
    #[serde(default)]
    pub errors: Option<serde_json::Value>,
}

/// Body of endpoints that only acknowledge an action.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
}

impl MessageResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
        }
    }
}

/// Error body returned with non-2xx statuses, e.g. validation failures:
/// `{"message": "...", "errors": {"email": ["The email has already been taken."]}}`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorResponse {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub errors: BTreeMap<String, Vec<String>>,
}

impl ErrorResponse {
    /// The most specific message available: first field error, else the
    /// top-level message.
    pub fn first_error(&self) -> Option<&str> {
        self.errors
            .values()
            .flat_map(|messages| messages.iter())
            .map(String::as_str)
            .find(|m| !m.is_empty())
            .or_else(|| self.message.as_deref().filter(|m| !m.is_empty()))
    }

    /// Every field error, one per line; falls back to the top-level message.
    pub fn all_errors(&self) -> Option<String> {
        let lines: Vec<&str> = self
            .errors
            .values()
            .flat_map(|messages| messages.iter())
            .map(String::as_str)
            .collect();
        if lines.is_empty() {
            self.message.clone()
        } else {
            Some(lines.join("\n"))
        }
    }
}
