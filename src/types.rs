//! Wire types shared with the backend

use serde::{Deserialize, Serialize};

/// Standard response envelope used by the backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiEnvelope<T> {
    pub status: bool,
    #[serde(default)]
    pub message: String,
    pub data: Option<T>,
}

/// Authentication tokens (access + refresh)
///
/// Refresh responses may omit a rotated refresh token, in which case the
/// previously stored one stays in use.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthTokens {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

impl AuthTokens {
    /// Extract tokens from a login/refresh envelope.
    ///
    /// Succeeds only when `status` is true and the access token is non-empty.
    pub fn from_envelope(envelope: ApiEnvelope<AuthTokens>) -> Option<AuthTokens> {
        if !envelope.status {
            return None;
        }
        let tokens = envelope.data?;
        if tokens.access_token.trim().is_empty() {
            return None;
        }
        let refresh_token = tokens.refresh_token.filter(|t| !t.trim().is_empty());
        Some(AuthTokens {
            access_token: tokens.access_token,
            refresh_token,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

/// Runtime configuration document served alongside the dashboard
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(rename = "apiUrl")]
    pub api_url: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(value: serde_json::Value) -> Option<AuthTokens> {
        let envelope: ApiEnvelope<AuthTokens> = serde_json::from_value(value).unwrap();
        AuthTokens::from_envelope(envelope)
    }

    #[test]
    fn test_refresh_envelope_success() {
        let tokens = parse(json!({
            "status": true,
            "message": "ok",
            "data": { "access_token": "A2", "refresh_token": "R2" }
        }))
        .unwrap();
        assert_eq!(tokens.access_token, "A2");
        assert_eq!(tokens.refresh_token.as_deref(), Some("R2"));
    }

    #[test]
    fn test_refresh_envelope_without_rotated_refresh_token() {
        let tokens = parse(json!({
            "status": true,
            "data": { "access_token": "A2" }
        }))
        .unwrap();
        assert_eq!(tokens.refresh_token, None);
    }

    #[test]
    fn test_refresh_envelope_rejections() {
        assert!(parse(json!({ "status": false, "message": "expired" })).is_none());
        assert!(parse(json!({ "status": true, "message": "no data" })).is_none());
        assert!(parse(json!({ "status": true, "data": { "access_token": "  " } })).is_none());
        assert!(
            parse(json!({ "status": false, "data": { "access_token": "A2" } })).is_none()
        );
    }

    #[test]
    fn test_runtime_config_field_name() {
        let config: RuntimeConfig =
            serde_json::from_value(json!({ "apiUrl": "https://api.example.com" })).unwrap();
        assert_eq!(config.api_url, "https://api.example.com");
    }
}
