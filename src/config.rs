//! Client configuration and the runtime base-URL gate

use crate::error::{ClientError, Result};
use crate::types::RuntimeConfig;
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

pub const DEFAULT_BASE_URL: &str = "http://localhost:8000/api";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_LOGIN_PATH: &str = "/auth/login";
pub const DEFAULT_REFRESH_PATH: &str = "/auth/refresh";
pub const DEFAULT_LOGIN_REDIRECT: &str = "/login";

/// Configuration for the authenticated client
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL used until (or instead of) the runtime config value
    pub default_base_url: String,

    /// Timeout applied to every request, including the refresh exchange
    pub timeout: Duration,

    /// Login endpoint path. Exempt from refresh handling.
    pub login_path: String,

    /// Refresh endpoint path. Exempt from refresh handling.
    pub refresh_path: String,

    /// Where the fallback unauthorized handler sends the user
    pub login_redirect: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            default_base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            login_path: DEFAULT_LOGIN_PATH.to_string(),
            refresh_path: DEFAULT_REFRESH_PATH.to_string(),
            login_redirect: DEFAULT_LOGIN_REDIRECT.to_string(),
        }
    }
}

impl ClientConfig {
    pub fn new(default_base_url: impl Into<String>) -> Self {
        Self {
            default_base_url: default_base_url.into(),
            ..Self::default()
        }
    }

    /// Build a config from the defaults overridden by environment variables
    ///
    /// * `MATERIALS_API_URL` - default base URL
    /// * `MATERIALS_API_TIMEOUT_SECS` - request timeout in seconds
    /// * `MATERIALS_LOGIN_REDIRECT` - login entry point for the fallback handler
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(url) = lookup("MATERIALS_API_URL") {
            config.default_base_url = url;
        }
        if let Some(raw) = lookup("MATERIALS_API_TIMEOUT_SECS") {
            let secs: u64 = raw.trim().parse().map_err(|e| {
                ClientError::Configuration(format!("Invalid MATERIALS_API_TIMEOUT_SECS {raw:?}: {e}"))
            })?;
            config.timeout = Duration::from_secs(secs);
        }
        if let Some(redirect) = lookup("MATERIALS_LOGIN_REDIRECT") {
            config.login_redirect = redirect;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_auth_paths(mut self, login_path: impl Into<String>, refresh_path: impl Into<String>) -> Self {
        self.login_path = login_path.into();
        self.refresh_path = refresh_path.into();
        self
    }

    pub fn with_login_redirect(mut self, login_redirect: impl Into<String>) -> Self {
        self.login_redirect = login_redirect.into();
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.default_base_url.trim().is_empty() {
            return Err(ClientError::Configuration("default base URL is empty".to_string()));
        }
        if self.timeout.is_zero() {
            return Err(ClientError::Configuration("timeout must be non-zero".to_string()));
        }
        if self.login_path.is_empty() || self.refresh_path.is_empty() {
            return Err(ClientError::Configuration("auth endpoint paths must be set".to_string()));
        }
        Ok(())
    }
}

/// Asynchronous source of the runtime configuration
pub trait ConfigSource: Send + Sync + 'static {
    fn load(&self) -> impl Future<Output = Result<RuntimeConfig>> + Send;
}

/// Fixed runtime configuration, for tests and embedded deployments
#[derive(Debug, Clone)]
pub struct StaticConfigSource {
    config: RuntimeConfig,
}

impl StaticConfigSource {
    pub fn new(api_url: impl Into<String>) -> Self {
        Self {
            config: RuntimeConfig { api_url: api_url.into() },
        }
    }
}

impl ConfigSource for StaticConfigSource {
    async fn load(&self) -> Result<RuntimeConfig> {
        Ok(self.config.clone())
    }
}

/// Runtime configuration fetched from a JSON document (`{"apiUrl": "..."}`)
#[derive(Debug, Clone)]
pub struct HttpConfigSource {
    url: String,
    timeout: Duration,
}

impl HttpConfigSource {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl ConfigSource for HttpConfigSource {
    async fn load(&self) -> Result<RuntimeConfig> {
        let client = reqwest::Client::builder().timeout(self.timeout).build()?;
        let response = client.get(&self.url).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Status {
                status,
                url: self.url.clone(),
                body,
            });
        }

        Ok(response.json::<RuntimeConfig>().await?)
    }
}

/// One-shot gate resolving the API base URL
///
/// Loading starts when the gate is spawned. Every waiter suspends until the
/// value is resolved, and the resolved value never changes afterwards.
#[derive(Clone)]
pub(crate) struct ConfigGate {
    resolved: watch::Receiver<Option<String>>,
    fallback: String,
}

impl ConfigGate {
    /// Start loading from `source` on a background task. Must run inside a tokio runtime.
    pub(crate) fn spawn<S: ConfigSource>(source: S, fallback: String) -> Self {
        let (tx, rx) = watch::channel(None);
        let default = fallback.clone();

        tokio::spawn(async move {
            let base_url = match source.load().await {
                Ok(config) if !config.api_url.trim().is_empty() => {
                    info!(api_url = %config.api_url, "Loaded runtime config");
                    config.api_url
                }
                Ok(_) => {
                    warn!(fallback = %default, "Runtime config has empty apiUrl, using default");
                    default
                }
                Err(e) => {
                    warn!(fallback = %default, error = %e, "Failed to load runtime config, using default");
                    default
                }
            };
            let _ = tx.send(Some(base_url));
        });

        Self {
            resolved: rx,
            fallback,
        }
    }

    /// Wait for the base URL to be resolved
    pub(crate) async fn base_url(&self) -> String {
        let mut rx = self.resolved.clone();
        let resolved = rx.wait_for(Option::is_some).await.ok().and_then(|v| v.clone());

        match resolved {
            Some(url) => url,
            None => {
                // Loader task ended without sending a value
                debug!(fallback = %self.fallback, "Config loader gone, using default base URL");
                self.fallback.clone()
            }
        }
    }

    pub(crate) fn is_resolved(&self) -> bool {
        self.resolved.borrow().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tokio::sync::{oneshot, Mutex};

    struct DeferredSource(Mutex<Option<oneshot::Receiver<Result<RuntimeConfig>>>>);

    impl ConfigSource for DeferredSource {
        async fn load(&self) -> Result<RuntimeConfig> {
            let rx = self.0.lock().await.take();
            match rx {
                Some(rx) => rx
                    .await
                    .unwrap_or_else(|_| Err(ClientError::Configuration("sender dropped".into()))),
                None => Err(ClientError::Configuration("already loaded".into())),
            }
        }
    }

    fn deferred() -> (DeferredSource, oneshot::Sender<Result<RuntimeConfig>>) {
        let (tx, rx) = oneshot::channel();
        (DeferredSource(Mutex::new(Some(rx))), tx)
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("MATERIALS_API_URL", "https://materials.example.com/api"),
            ("MATERIALS_API_TIMEOUT_SECS", "5"),
        ]);
        let config = ClientConfig::from_lookup(|k| env.get(k).map(|v| v.to_string())).unwrap();

        assert_eq!(config.default_base_url, "https://materials.example.com/api");
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert_eq!(config.login_path, DEFAULT_LOGIN_PATH);
        assert_eq!(config.login_redirect, DEFAULT_LOGIN_REDIRECT);
    }

    #[test]
    fn test_env_invalid_timeout() {
        let result = ClientConfig::from_lookup(|k| {
            (k == "MATERIALS_API_TIMEOUT_SECS").then(|| "soon".to_string())
        });
        assert!(matches!(result, Err(ClientError::Configuration(_))));
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let config = ClientConfig::default().with_timeout(Duration::ZERO);
        assert!(config.validate().is_err());
    }

    #[tokio::test]
    async fn test_gate_waits_for_source() {
        let (source, tx) = deferred();
        let gate = ConfigGate::spawn(source, DEFAULT_BASE_URL.to_string());

        tokio::task::yield_now().await;
        assert!(!gate.is_resolved());

        tx.send(Ok(RuntimeConfig {
            api_url: "https://api.example.com".to_string(),
        }))
        .unwrap();

        assert_eq!(gate.base_url().await, "https://api.example.com");
        assert!(gate.is_resolved());
        // Resolution is permanent
        assert_eq!(gate.clone().base_url().await, "https://api.example.com");
    }

    #[tokio::test]
    async fn test_gate_falls_back_on_error() {
        let (source, tx) = deferred();
        let gate = ConfigGate::spawn(source, "http://fallback".to_string());
        tx.send(Err(ClientError::Configuration("unreachable".into()))).unwrap();

        assert_eq!(gate.base_url().await, "http://fallback");
    }

    #[tokio::test]
    async fn test_gate_falls_back_on_empty_url() {
        let gate = ConfigGate::spawn(StaticConfigSource::new(""), "http://fallback".to_string());
        assert_eq!(gate.base_url().await, "http://fallback");
    }

    #[tokio::test]
    async fn test_http_source_unreachable() {
        // Port 9 (discard) on localhost is not expected to serve HTTP
        let source = HttpConfigSource::new("http://127.0.0.1:9/config.json")
            .with_timeout(Duration::from_millis(500));
        assert!(source.load().await.is_err());
    }
}
