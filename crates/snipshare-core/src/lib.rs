//! Core library for the snipshare snippet-sharing client.
//!
//! - `api`: `ApiClient` with retry, token attachment and typed endpoints
//! - `auth`: Encrypted credential storage and observable sign-in state
//! - `models`: JSON shapes exchanged with the server
//! - `config`: Persisted settings and base URL resolution
//! - `validation`: Input checks run before requests are sent

pub mod api;
pub mod auth;
pub mod config;
pub mod models;
pub mod validation;

pub use api::{ApiClient, ApiError, ApiRequest, ApiResponse, RetryPolicy};
pub use auth::{AuthState, Credential, CredentialError, CredentialStore, KeyProvider};
pub use config::Config;
pub use validation::ValidationError;
