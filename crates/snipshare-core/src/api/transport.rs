//! Low-level HTTP execution.
//!
//! `Transport` is the seam between `ApiClient` and the network. The
//! production implementation, `HttpTransport`, wraps a pooled reqwest client
//! and logs every exchange; tests substitute scripted transports.

use std::time::{Duration, Instant};

use futures::future::{BoxFuture, FutureExt};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, COOKIE};
use reqwest::{Client, Method, StatusCode, Url};
use thiserror::Error;
use tracing::{debug, trace};

use super::error::BoxError;
use super::ApiError;

/// Connect timeout applied when none is configured.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// How long idle pooled connections are kept.
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

/// Longest body excerpt written to trace logs.
const MAX_LOGGED_BODY: usize = 2048;

/// A fully resolved request, ready to put on the wire.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<Vec<u8>>,
    /// Budget for this attempt only.
    pub timeout: Duration,
}

/// Status, headers, and the fully read body.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("request timed out: {0}")]
    Timeout(#[source] BoxError),

    #[error("connection failed: {0}")]
    Connect(#[source] BoxError),

    #[error("connection interrupted: {0}")]
    Reset(#[source] BoxError),

    #[error("transport failure: {0}")]
    Other(#[source] BoxError),
}

impl TransportError {
    /// Whether the failure is expected to go away on retry.
    pub fn is_transient(&self) -> bool {
        !matches!(self, TransportError::Other(_))
    }

    fn from_reqwest(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            TransportError::Timeout(Box::new(error))
        } else if error.is_connect() {
            TransportError::Connect(Box::new(error))
        } else if error.is_request() || error.is_body() {
            TransportError::Reset(Box::new(error))
        } else {
            TransportError::Other(Box::new(error))
        }
    }
}

pub trait Transport: Send + Sync {
    fn execute(&self, request: TransportRequest) -> BoxFuture<'_, Result<RawResponse, TransportError>>;
}

/// reqwest-backed transport with connection pooling and request logging.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(user_agent: &str, connect_timeout: Duration) -> Result<Self, ApiError> {
        let client = Client::builder()
            .user_agent(user_agent)
            .connect_timeout(connect_timeout)
            .pool_idle_timeout(POOL_IDLE_TIMEOUT)
            .build()
            .map_err(ApiError::unknown)?;
        Ok(Self { client })
    }

    /// Share an existing connection pool.
    pub fn from_client(client: Client) -> Self {
        Self { client }
    }
}

impl Transport for HttpTransport {
    fn execute(&self, request: TransportRequest) -> BoxFuture<'_, Result<RawResponse, TransportError>> {
        async move {
            let started = Instant::now();
            let method = request.method.clone();
            let url = request.url.clone();
            debug!(method = %method, url = %url, "--> HTTP request");
            trace!(
                headers = ?redacted(&request.headers),
                body = %body_excerpt(request.body.as_deref()),
                "--> request detail"
            );

            let mut builder = self
                .client
                .request(request.method, request.url)
                .headers(request.headers)
                .timeout(request.timeout);
            if let Some(body) = request.body {
                builder = builder.body(body);
            }

            let response = builder.send().await.map_err(TransportError::from_reqwest)?;
            let status = response.status();
            let headers = response.headers().clone();
            let body = response
                .bytes()
                .await
                .map_err(TransportError::from_reqwest)?
                .to_vec();

            debug!(
                method = %method,
                url = %url,
                status = status.as_u16(),
                bytes = body.len(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "<-- HTTP response"
            );
            trace!(body = %body_excerpt(Some(&body)), "<-- response body");

            Ok(RawResponse {
                status,
                headers,
                body,
            })
        }
        .boxed()
    }
}

/// Copy of `headers` safe to log.
fn redacted(headers: &HeaderMap) -> HeaderMap {
    let mut safe = headers.clone();
    for name in [AUTHORIZATION, COOKIE] {
        if safe.contains_key(&name) {
            safe.insert(name, HeaderValue::from_static("<redacted>"));
        }
    }
    safe
}

fn body_excerpt(body: Option<&[u8]>) -> String {
    match body {
        None => "<none>".to_string(),
        Some(bytes) if bytes.len() <= MAX_LOGGED_BODY => String::from_utf8_lossy(bytes).into_owned(),
        Some(bytes) => format!(
            "{}... ({} bytes)",
            String::from_utf8_lossy(&bytes[..MAX_LOGGED_BODY]),
            bytes.len()
        ),
    }
}
