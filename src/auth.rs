//! Login and logout on top of the authenticated client

use crate::auth_client::AuthenticatedHttpClient;
use crate::error::{ClientError, Result};
use crate::types::{ApiEnvelope, AuthTokens, LoginRequest};
use tracing::{info, warn};

/// Authentication service
#[derive(Clone)]
pub struct AuthService {
    client: AuthenticatedHttpClient,
}

impl AuthService {
    pub fn new(client: AuthenticatedHttpClient) -> Self {
        Self { client }
    }

    /// Log in with username and password and store the returned tokens
    ///
    /// A 401 from the login endpoint is returned as is; it never triggers a
    /// token refresh.
    pub async fn login(&self, username: &str, password: &str) -> Result<AuthTokens> {
        let request = LoginRequest {
            username: username.to_string(),
            password: password.to_string(),
        };
        let login_path = self.client.config().login_path.clone();

        let envelope: ApiEnvelope<AuthTokens> = self.client.post(&login_path, &request, None).await?;
        let message = envelope.message.clone();

        let Some(tokens) = AuthTokens::from_envelope(envelope) else {
            warn!(username = %username, message = %message, "Login rejected");
            let reason = if message.is_empty() {
                "login rejected".to_string()
            } else {
                message
            };
            return Err(ClientError::Authentication(reason));
        };

        let refresh_token = tokens.refresh_token.as_deref().ok_or_else(|| {
            ClientError::InvalidResponse("login response carried no refresh token".to_string())
        })?;
        self.client.set_tokens(&tokens.access_token, refresh_token)?;

        info!(username = %username, "Logged in");
        Ok(tokens)
    }

    pub fn logout(&self) -> Result<()> {
        self.client.logout()
    }

    pub fn is_authenticated(&self) -> bool {
        self.client.access_token().is_some()
    }
}
