//! REST API client for the snippet-sharing service.
//!
//! This module provides the `ApiClient` for talking to the service: it
//! attaches the stored bearer token, retries idempotent requests on
//! transient network failures, and classifies every response.
//!
//! The API authenticates with a bearer token obtained from `auth/login`
//! or `auth/register`, kept in the encrypted `CredentialStore`.

pub mod client;
mod endpoints;
pub mod error;
pub mod request;
pub mod retry;
pub mod transport;

pub use client::{ApiClient, ApiClientBuilder};
pub use error::ApiError;
pub use request::{ApiRequest, ApiResponse};
pub use retry::{Clock, RequestState, RetryPolicy, TokioClock};
pub use transport::{HttpTransport, RawResponse, Transport, TransportError, TransportRequest};
