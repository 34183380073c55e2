//! Materials Rust Client
//!
//! A Rust client library for the materials management API, with bearer
//! token injection, coordinated token refresh, and session-expiry notification.

pub mod auth;
pub mod auth_client;
pub mod config;
pub mod error;
mod refresh;
pub mod session;
pub mod token_store;
pub mod types;

pub use auth::AuthService;
pub use auth_client::{AuthenticatedHttpClient, RequestOptions};
pub use config::{ClientConfig, ConfigSource, HttpConfigSource, StaticConfigSource};
pub use error::{ClientError, Result};
pub use reqwest::{Method, StatusCode};
pub use session::{LoginRedirect, UnauthorizedHandler};
pub use token_store::{FileTokenStore, MemoryTokenStore, NoopTokenStore, TokenStorage};
pub use types::{ApiEnvelope, AuthTokens, RuntimeConfig};
