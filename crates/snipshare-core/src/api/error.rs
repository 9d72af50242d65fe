use reqwest::StatusCode;
use thiserror::Error;

use super::transport::TransportError;
use crate::models::ErrorResponse;

/// Boxed cause carried by catch-all errors.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Network error after {attempts} attempt(s): {source}")]
    Network {
        attempts: u32,
        #[source]
        source: TransportError,
    },

    #[error("Unauthorized - token may be expired")]
    Unauthorized,

    #[error("Server error {status}: {}", .message.as_deref().unwrap_or("no message"))]
    ServerError {
        status: u16,
        message: Option<String>,
        /// Raw response body, kept for diagnostics.
        body: String,
    },

    #[error("Invalid response: {context}")]
    Decode {
        context: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    #[error("Unexpected error: {source}")]
    Unknown {
        #[source]
        source: BoxError,
    },

    #[error("Request cancelled")]
    Cancelled,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

/// Shown when nothing more specific is known
const GENERIC_MESSAGE: &str = "An error occurred. Please try again.";

impl ApiError {
    /// Truncate a response body to avoid logging excessive data
    pub(crate) fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            body.to_string()
        } else {
            let mut end = MAX_ERROR_BODY_LENGTH;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
        }
    }

    /// Classify a non-2xx response.
    pub fn from_status(status: StatusCode, body: String) -> Self {
        if status == StatusCode::UNAUTHORIZED {
            return ApiError::Unauthorized;
        }
        let message = serde_json::from_str::<ErrorResponse>(&body)
            .ok()
            .and_then(|e| e.first_error().map(str::to_string));
        ApiError::ServerError {
            status: status.as_u16(),
            message,
            body,
        }
    }

    /// Decode failure for `body`, keeping a truncated copy for context.
    pub fn decode(source: serde_json::Error, body: &str) -> Self {
        ApiError::Decode {
            context: format!("{} in body: {}", source, Self::truncate_body(body)),
            source: Some(source),
        }
    }

    pub fn unknown(source: impl Into<BoxError>) -> Self {
        ApiError::Unknown {
            source: source.into(),
        }
    }

    /// HTTP status associated with the error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Unauthorized => Some(401),
            ApiError::ServerError { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ApiError::Unauthorized)
    }

    /// Message suitable for showing to the user.
    pub fn user_message(&self) -> String {
        match self {
            ApiError::Network { .. } => "Network error. Please check your connection.".to_string(),
            ApiError::Unauthorized => "Your session has expired. Please log in again.".to_string(),
            ApiError::ServerError {
                message: Some(message),
                ..
            } => message.clone(),
            ApiError::Cancelled => "Request cancelled.".to_string(),
            ApiError::InvalidRequest(reason) => reason.clone(),
            _ => GENERIC_MESSAGE.to_string(),
        }
    }
}
