//! API client for the snippet-sharing REST API.
//!
//! This module provides the `ApiClient` struct: it resolves paths against the
//! configured base URL, attaches the stored bearer token, retries idempotent
//! requests on transient network failures, and classifies every outcome into
//! `ApiResponse` or `ApiError`.

use std::sync::Arc;
use std::time::Duration;

use futures::future::{AbortRegistration, Abortable};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Method, StatusCode, Url};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, error, info, trace, warn};

use super::request::{ApiRequest, ApiResponse};
use super::retry::{Clock, RequestState, RetryPolicy, TokioClock};
use super::transport::{
    HttpTransport, RawResponse, Transport, TransportError, TransportRequest, DEFAULT_CONNECT_TIMEOUT,
};
use super::ApiError;
use crate::auth::{Credential, CredentialError, CredentialStore};
use crate::config::Config;

// ============================================================================
// Constants
// ============================================================================

/// Per-attempt request timeout in seconds.
/// 30s allows for slow API responses while failing fast enough for good UX.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

const JSON: &str = "application/json";

fn default_user_agent() -> String {
    format!("snipshare/{}", env!("CARGO_PKG_VERSION"))
}

/// API client for the snippet service.
/// Clone is cheap - every field is shared, including the connection pool.
#[derive(Clone)]
pub struct ApiClient {
    base_url: Url,
    transport: Arc<dyn Transport>,
    credentials: Arc<CredentialStore>,
    retry: RetryPolicy,
    timeout: Duration,
    clock: Arc<dyn Clock>,
}

pub struct ApiClientBuilder {
    base_url: String,
    transport: Option<Arc<dyn Transport>>,
    retry: RetryPolicy,
    timeout: Duration,
    connect_timeout: Duration,
    user_agent: String,
    clock: Arc<dyn Clock>,
}

impl ApiClientBuilder {
    fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            transport: None,
            retry: RetryPolicy::default(),
            timeout: DEFAULT_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            user_agent: default_user_agent(),
            clock: Arc::new(TokioClock),
        }
    }

    /// Replace the reqwest transport, e.g. with a scripted one in tests.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Timeout for each attempt; a retry gets a fresh budget.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn build(self, credentials: Arc<CredentialStore>) -> Result<ApiClient, ApiError> {
        let base_url = parse_base_url(&self.base_url)?;
        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HttpTransport::new(&self.user_agent, self.connect_timeout)?),
        };
        debug!(base_url = %base_url, "API client ready");
        Ok(ApiClient {
            base_url,
            transport,
            credentials,
            retry: self.retry,
            timeout: self.timeout,
            clock: self.clock,
        })
    }
}

/// Parse the base URL and make sure it ends with `/` so relative paths
/// extend it instead of replacing its last segment.
fn parse_base_url(raw: &str) -> Result<Url, ApiError> {
    let mut url = Url::parse(raw)
        .map_err(|e| ApiError::InvalidRequest(format!("invalid base URL '{}': {}", raw, e)))?;
    if url.cannot_be_a_base() {
        return Err(ApiError::InvalidRequest(format!(
            "base URL '{}' cannot have paths",
            raw
        )));
    }
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

impl ApiClient {
    pub fn builder(base_url: impl Into<String>) -> ApiClientBuilder {
        ApiClientBuilder::new(base_url)
    }

    /// Client configured from the application config.
    pub fn from_config(config: &Config, credentials: Arc<CredentialStore>) -> Result<Self, ApiError> {
        Self::builder(config.base_url())
            .timeout(config.request_timeout())
            .connect_timeout(config.connect_timeout())
            .retry_policy(config.retry_policy())
            .build(credentials)
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn credentials(&self) -> &Arc<CredentialStore> {
        &self.credentials
    }

    /// Resolve `path` against the base URL. A leading `/` stays under the
    /// base; absolute URLs and `..` segments are rejected.
    pub fn resolve(&self, path: &str) -> Result<Url, ApiError> {
        let relative = path.trim_start_matches('/');
        let path_part = relative.split(&['?', '#'][..]).next().unwrap_or_default();

        if path_part.split('/').next().unwrap_or_default().contains(':') {
            return Err(ApiError::InvalidRequest(format!(
                "path '{}' must be relative to the base URL",
                path
            )));
        }
        if path_part.split('/').any(|segment| segment == "..") {
            return Err(ApiError::InvalidRequest(format!(
                "path '{}' escapes the base URL",
                path
            )));
        }

        let url = self
            .base_url
            .join(relative)
            .map_err(|e| ApiError::InvalidRequest(format!("invalid path '{}': {}", path, e)))?;

        // URL parsing decodes `%2e%2e` and treats `\` as `/`, so check the result too.
        if url.origin() != self.base_url.origin() || !url.path().starts_with(self.base_url.path()) {
            return Err(ApiError::InvalidRequest(format!(
                "path '{}' escapes the base URL",
                path
            )));
        }
        Ok(url)
    }

    // ===== Core request execution =====

    /// Send `method path` with an optional JSON body.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<ApiResponse, ApiError> {
        let mut request = ApiRequest::new(method, path);
        if let Some(body) = body {
            request = request.json(&body)?;
        }
        self.send(request).await
    }

    /// Execute a request through the retry state machine.
    pub async fn send(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
        let mut state = RequestState::Building;
        self.trace_state(&request, state);

        let (prepared, sent_token) = self.prepare(&request).await?;
        let max_attempts = if request.is_idempotent() {
            self.retry.attempts()
        } else {
            1
        };

        let mut attempt = 0;
        loop {
            attempt += 1;
            state = RequestState::Sent { attempt };
            self.trace_state(&request, state);

            let outcome = tokio::time::timeout(self.timeout, self.transport.execute(prepared.clone()))
                .await
                .unwrap_or_else(|elapsed| Err(TransportError::Timeout(Box::new(elapsed))));

            match outcome {
                Ok(raw) => {
                    let result = self.classify(&request, raw, attempt, sent_token.as_deref()).await;
                    state = if result.is_ok() {
                        RequestState::Succeeded { attempt }
                    } else {
                        RequestState::Failed { attempt }
                    };
                    self.trace_state(&request, state);
                    return result;
                }
                Err(err) if err.is_transient() && attempt < max_attempts => {
                    let delay = self.retry.delay_for(attempt, &mut rand::thread_rng());
                    warn!(
                        method = %request.method(),
                        path = request.path(),
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Transient network failure, backing off"
                    );
                    state = RequestState::Retrying { attempt, delay };
                    self.trace_state(&request, state);
                    self.clock.sleep(delay).await;
                }
                Err(err) => {
                    state = RequestState::Failed { attempt };
                    self.trace_state(&request, state);
                    return Err(if err.is_transient() {
                        warn!(
                            method = %request.method(),
                            path = request.path(),
                            attempts = attempt,
                            error = %err,
                            "Network failure"
                        );
                        ApiError::Network {
                            attempts: attempt,
                            source: err,
                        }
                    } else {
                        error!(
                            method = %request.method(),
                            path = request.path(),
                            error = ?err,
                            "Request failed"
                        );
                        ApiError::unknown(err)
                    });
                }
            }
        }
    }

    /// Like `send`, but aborts when the paired `AbortHandle` fires.
    /// Aborting drops the in-flight attempt (closing its connection) and
    /// skips any remaining retries.
    pub async fn send_cancellable(
        &self,
        request: ApiRequest,
        registration: AbortRegistration,
    ) -> Result<ApiResponse, ApiError> {
        let method = request.method().clone();
        let path = request.path().to_string();
        match Abortable::new(self.send(request), registration).await {
            Ok(result) => result,
            Err(_aborted) => {
                info!(method = %method, path = %path, "Request cancelled");
                Err(ApiError::Cancelled)
            }
        }
    }

    // ===== Typed helpers =====

    /// Send and decode a 2xx body as `T`.
    pub async fn send_json<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T, ApiError> {
        self.send(request).await?.json()
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.send_json(ApiRequest::get(path)).await
    }

    pub async fn post<B, T>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.send_json(ApiRequest::post(path).json(body)?).await
    }

    pub async fn put<B, T>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.send_json(ApiRequest::put(path).json(body)?).await
    }

    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.send_json(ApiRequest::delete(path)).await
    }

    // ===== Internals =====

    /// Resolve and decorate a request. Also returns the token it carries,
    /// so a 401 can revoke exactly that credential.
    async fn prepare(&self, request: &ApiRequest) -> Result<(TransportRequest, Option<String>), ApiError> {
        let url = self.resolve(request.path())?;

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(JSON));
        if request.body().is_some() {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static(JSON));
        }
        let credential = self.usable_credential().await?;
        if let Some(credential) = &credential {
            let mut value = HeaderValue::from_str(&credential.authorization_value()).map_err(|_| {
                ApiError::InvalidRequest("stored token is not a valid header value".to_string())
            })?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }
        for (name, value) in request.headers() {
            headers.insert(name.clone(), value.clone());
        }

        let prepared = TransportRequest {
            method: request.method().clone(),
            url,
            headers,
            body: request.body().map(<[u8]>::to_vec),
            timeout: self.timeout,
        };
        Ok((prepared, credential.map(|c| c.token)))
    }

    /// The stored credential, unless it has expired (then it is cleared).
    async fn usable_credential(&self) -> Result<Option<Credential>, ApiError> {
        let now = self.clock.now();
        self.with_store(move |store| {
            let Some(credential) = store.load()? else {
                return Ok(None);
            };
            if credential.is_expired_at(now) {
                info!("Stored credential has expired, sending request unauthenticated");
                store.clear_if_token(&credential.token)?;
                return Ok(None);
            }
            Ok(Some(credential))
        })
        .await
    }

    /// Run blocking store work (keyring lookup, key derivation, file I/O)
    /// on the blocking pool.
    async fn with_store<T, F>(&self, work: F) -> Result<T, ApiError>
    where
        T: Send + 'static,
        F: FnOnce(&CredentialStore) -> Result<T, CredentialError> + Send + 'static,
    {
        let store = Arc::clone(&self.credentials);
        tokio::task::spawn_blocking(move || work(&*store))
            .await
            .map_err(ApiError::unknown)?
            .map_err(ApiError::unknown)
    }

    /// Map a received response onto the result of the logical request.
    async fn classify(
        &self,
        request: &ApiRequest,
        raw: RawResponse,
        attempts: u32,
        sent_token: Option<&str>,
    ) -> Result<ApiResponse, ApiError> {
        if raw.status.is_success() {
            return Ok(ApiResponse::new(raw.status, raw.headers, raw.body, attempts));
        }

        if raw.status == StatusCode::UNAUTHORIZED {
            if let Some(token) = sent_token {
                let token = token.to_string();
                match self.with_store(move |store| store.clear_if_token(&token)).await {
                    Ok(true) => warn!(
                        method = %request.method(),
                        path = request.path(),
                        "Server rejected credential, cleared it"
                    ),
                    Ok(false) => info!(
                        method = %request.method(),
                        path = request.path(),
                        "Server rejected a credential that has since been replaced"
                    ),
                    Err(e) => error!(error = %e, "Failed to clear rejected credential"),
                }
            }
            return Err(ApiError::Unauthorized);
        }

        let body = String::from_utf8_lossy(&raw.body).into_owned();
        debug!(
            status = raw.status.as_u16(),
            body = %ApiError::truncate_body(&body),
            "Non-success response"
        );
        Err(ApiError::from_status(raw.status, body))
    }

    fn trace_state(&self, request: &ApiRequest, state: RequestState) {
        trace!(method = %request.method(), path = request.path(), ?state, "request state");
    }
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.base_url.as_str())
            .field("retry", &self.retry)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}
