//! Authenticated HTTP client with coordinated token refresh

use crate::config::{ClientConfig, ConfigGate, ConfigSource};
use crate::error::{ClientError, Result};
use crate::refresh::{CompletionGuard, RefreshCoordinator, RefreshOutcome, Ticket};
use crate::session::{LoginRedirect, UnauthorizedHandler};
use crate::token_store::{self, TokenStorage};
use crate::types::{ApiEnvelope, AuthTokens, RefreshRequest};
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Per-call request options
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub headers: HeaderMap,
    pub query: Vec<(String, String)>,
    /// Overrides the client-wide timeout for this call
    pub timeout: Option<Duration>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// A request kept in resendable form
struct PreparedRequest {
    method: Method,
    path: String,
    body: Option<Value>,
    options: RequestOptions,
}

struct Inner {
    config: ClientConfig,
    /// Client for application requests: bearer injection and 401 handling apply
    http: Client,
    /// Client for the refresh exchange only: no auth header, no 401 handling
    bare: Client,
    storage: Arc<dyn TokenStorage>,
    gate: ConfigGate,
    refresh: Arc<RefreshCoordinator>,
    unauthorized: RwLock<Option<Arc<dyn UnauthorizedHandler>>>,
    fallback: LoginRedirect,
}

/// HTTP client for the materials API
///
/// Attaches the stored access token to every request. When a request comes
/// back 401 the client exchanges the refresh token once, shared by every
/// request failing at the same time, and resends each of them once with the
/// new token. If the session cannot be recovered, stored tokens are cleared
/// and the registered [`UnauthorizedHandler`] is notified.
///
/// Cloning is cheap; clones share tokens, refresh state and configuration.
#[derive(Clone)]
pub struct AuthenticatedHttpClient {
    inner: Arc<Inner>,
}

impl AuthenticatedHttpClient {
    /// Create a new client
    ///
    /// Starts loading the runtime config from `config_source` in the
    /// background; requests wait for it before being sent. Must be called
    /// from within a tokio runtime.
    pub fn new<S>(config: ClientConfig, storage: impl TokenStorage + 'static, config_source: S) -> Result<Self>
    where
        S: ConfigSource,
    {
        config.validate()?;

        let http = Client::builder().timeout(config.timeout).build()?;
        let bare = Client::builder().timeout(config.timeout).build()?;
        let gate = ConfigGate::spawn(config_source, config.default_base_url.clone());
        let fallback = LoginRedirect::new(config.login_redirect.clone());

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                http,
                bare,
                storage: Arc::new(storage),
                gate,
                refresh: Arc::new(RefreshCoordinator::new()),
                unauthorized: RwLock::new(None),
                fallback,
            }),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Register the handler notified when a session cannot be recovered.
    ///
    /// Replaces any previously registered handler.
    pub fn set_unauthorized_handler(&self, handler: impl UnauthorizedHandler + 'static) {
        let handler: Arc<dyn UnauthorizedHandler> = Arc::new(handler);
        let mut slot = self
            .inner
            .unauthorized
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        *slot = Some(handler);
    }

    /// Store a fresh credentials pair, e.g. after login
    pub fn set_tokens(&self, access_token: &str, refresh_token: &str) -> Result<()> {
        token_store::store_tokens(self.inner.storage.as_ref(), access_token, refresh_token)
    }

    /// Clear stored credentials. Does not call the backend.
    pub fn logout(&self) -> Result<()> {
        info!("Clearing stored credentials");
        token_store::clear_tokens(self.inner.storage.as_ref())
    }

    pub fn access_token(&self) -> Option<String> {
        token_store::access_token(self.inner.storage.as_ref())
    }

    /// Resolved API base URL, waiting for the runtime config if needed
    pub async fn base_url(&self) -> String {
        self.inner.gate.base_url().await
    }

    /// Whether the runtime config has been resolved
    pub fn is_configured(&self) -> bool {
        self.inner.gate.is_resolved()
    }

    pub fn is_refreshing(&self) -> bool {
        self.inner.refresh.in_progress()
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str, options: Option<RequestOptions>) -> Result<T> {
        self.send(Method::GET, path, &(), options).await
    }

    pub async fn post<T, B>(&self, path: &str, body: &B, options: Option<RequestOptions>) -> Result<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.send(Method::POST, path, body, options).await
    }

    pub async fn put<T, B>(&self, path: &str, body: &B, options: Option<RequestOptions>) -> Result<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.send(Method::PUT, path, body, options).await
    }

    pub async fn patch<T, B>(&self, path: &str, body: &B, options: Option<RequestOptions>) -> Result<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.send(Method::PATCH, path, body, options).await
    }

    pub async fn delete<T: DeserializeOwned>(&self, path: &str, options: Option<RequestOptions>) -> Result<T> {
        self.send(Method::DELETE, path, &(), options).await
    }

    /// Send a request and decode its JSON response
    ///
    /// A body serializing to JSON `null` (such as `()`) is not sent. An empty
    /// response body decodes as `null`, so `()` and `Option<T>` accept it.
    pub async fn send<T, B>(&self, method: Method, path: &str, body: &B, options: Option<RequestOptions>) -> Result<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let body = match serde_json::to_value(body)? {
            Value::Null => None,
            value => Some(value),
        };
        let request = PreparedRequest {
            method,
            path: path.to_string(),
            body,
            options: options.unwrap_or_default(),
        };

        let response = self.execute(request).await?;
        decode(response).await
    }

    async fn execute(&self, request: PreparedRequest) -> Result<Response> {
        let base_url = self.inner.gate.base_url().await;
        let url = resolve_url(&base_url, &request.path);

        let token = self.access_token();
        let response = self.dispatch(&url, &request, token.as_deref()).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return ensure_success(response).await;
        }

        let original = status_error(response).await;
        let new_token = self.recover(&request.path, original).await?;

        // Resent once. A second 401 is returned to the caller as is.
        debug!(method = %request.method, url = %url, "Resending request with refreshed token");
        let response = self.dispatch(&url, &request, Some(&new_token)).await?;
        ensure_success(response).await
    }

    async fn dispatch(&self, url: &str, request: &PreparedRequest, token: Option<&str>) -> Result<Response> {
        debug!(method = %request.method, url = %url, authenticated = token.is_some(), "Sending request");

        let mut builder = self
            .inner
            .http
            .request(request.method.clone(), url)
            .headers(request.options.headers.clone());
        if !request.options.query.is_empty() {
            builder = builder.query(&request.options.query);
        }
        if let Some(timeout) = request.options.timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        Ok(authorize(builder, token).send().await?)
    }

    /// Obtain a new access token after a 401, or the error to return to the caller.
    async fn recover(&self, path: &str, original: ClientError) -> Result<String> {
        if self.inner.is_auth_endpoint(path) {
            debug!(path = %path, "401 from auth endpoint, not refreshing");
            return Err(original);
        }

        let Some(refresh_token) = token_store::refresh_token(self.inner.storage.as_ref()) else {
            warn!(path = %path, "401 with no refresh token stored, ending session");
            self.inner.end_session();
            return Err(original);
        };

        match self.inner.refresh.join() {
            Ticket::Follower(rx) => {
                debug!(path = %path, queued = self.inner.refresh.pending(), "Refresh in progress, queueing request");
                match rx.await {
                    Ok(Ok(token)) => Ok(token),
                    Ok(Err(cause)) => Err(ClientError::RefreshFailed(cause)),
                    Err(_) => Err(ClientError::RefreshFailed(Arc::new(ClientError::InvalidResponse(
                        "token refresh abandoned".to_string(),
                    )))),
                }
            }
            Ticket::Leader => {
                // Runs detached so that dropping this request does not strand the queue.
                let guard = CompletionGuard::new(Arc::clone(&self.inner.refresh));
                let inner = Arc::clone(&self.inner);
                let task = tokio::spawn(async move { inner.run_refresh(refresh_token, guard).await });

                match task.await {
                    Ok(result) => result,
                    Err(e) => Err(ClientError::RefreshFailed(Arc::new(ClientError::InvalidResponse(
                        format!("token refresh task failed: {e}"),
                    )))),
                }
            }
        }
    }
}

impl Inner {
    fn is_auth_endpoint(&self, path: &str) -> bool {
        let path = path.split('?').next().unwrap_or(path);
        path.contains(self.config.login_path.as_str()) || path.contains(self.config.refresh_path.as_str())
    }

    /// Exchange the refresh token, store the result and release the queue.
    async fn run_refresh(&self, refresh_token: String, guard: CompletionGuard) -> Result<String> {
        info!("Access token rejected, refreshing");

        let outcome: RefreshOutcome = match self.exchange_refresh_token(&refresh_token).await {
            Ok(tokens) => {
                // Keep the current refresh token when the backend does not rotate it
                let refresh = tokens.refresh_token.as_deref().unwrap_or(&refresh_token);
                token_store::store_tokens(self.storage.as_ref(), &tokens.access_token, refresh)
                    .map(|()| tokens.access_token)
                    .map_err(Arc::new)
            }
            Err(e) => Err(Arc::new(e)),
        };

        // Clear credentials and notify while the refresh flag still gates re-entry.
        if let Err(cause) = &outcome {
            warn!(error = %cause, "Token refresh failed, ending session");
            self.end_session();
        }

        let drained = guard.finish(&outcome);
        match outcome {
            Ok(token) => {
                info!(queued = drained, "Access token refreshed");
                Ok(token)
            }
            Err(cause) => Err(ClientError::RefreshFailed(cause)),
        }
    }

    async fn exchange_refresh_token(&self, refresh_token: &str) -> Result<AuthTokens> {
        let base_url = self.gate.base_url().await;
        let url = resolve_url(&base_url, &self.config.refresh_path);
        let request = RefreshRequest {
            refresh_token: refresh_token.to_string(),
        };

        let response = self.bare.post(&url).json(&request).send().await?;
        let response = ensure_success(response).await?;

        let envelope: ApiEnvelope<AuthTokens> = decode(response).await?;
        let message = envelope.message.clone();
        AuthTokens::from_envelope(envelope).ok_or_else(|| {
            ClientError::InvalidResponse(format!("refresh response carried no access token: {message}"))
        })
    }

    /// Clear stored credentials and notify the unauthorized handler.
    fn end_session(&self) {
        if let Err(e) = token_store::clear_tokens(self.storage.as_ref()) {
            warn!(error = %e, "Failed to clear stored credentials");
        }

        let handler = self
            .unauthorized
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match handler {
            Some(handler) => handler.on_unauthorized(),
            None => self.fallback.on_unauthorized(),
        }
    }
}

/// Attach the bearer token, if any. Never fails: a token that is not a valid
/// header value is skipped and the request goes out unauthenticated.
fn authorize(builder: RequestBuilder, token: Option<&str>) -> RequestBuilder {
    let Some(token) = token else {
        return builder;
    };
    match HeaderValue::from_str(&format!("Bearer {token}")) {
        Ok(mut value) => {
            value.set_sensitive(true);
            builder.header(AUTHORIZATION, value)
        }
        Err(e) => {
            warn!(error = %e, "Stored access token is not a valid header value, sending without it");
            builder
        }
    }
}

fn resolve_url(base_url: &str, path: &str) -> String {
    if path.starts_with("http://") || path.starts_with("https://") {
        return path.to_string();
    }
    let base_url = base_url.trim_end_matches('/');
    if path.is_empty() {
        base_url.to_string()
    } else if path.starts_with('/') {
        format!("{base_url}{path}")
    } else {
        format!("{base_url}/{path}")
    }
}

async fn status_error(response: Response) -> ClientError {
    let status = response.status();
    let url = response.url().to_string();
    let body = response.text().await.unwrap_or_default();
    ClientError::Status { status, url, body }
}

async fn ensure_success(response: Response) -> Result<Response> {
    if response.status().is_success() {
        Ok(response)
    } else {
        Err(status_error(response).await)
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
    let bytes = response.bytes().await?;
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(serde_json::from_value(Value::Null)?);
    }
    Ok(serde_json::from_slice(&bytes)?)
}
