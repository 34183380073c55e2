//! Basic client example
//!
//! Usage:
//!   cargo run --example basic_client

use materials_client::{
    AuthService, AuthenticatedHttpClient, ClientConfig, FileTokenStore, HttpConfigSource, RequestOptions,
};
use serde_json::Value;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Configuration
    let config = ClientConfig::from_env()?;

    let config_url = std::env::var("MATERIALS_CONFIG_URL")
        .unwrap_or_else(|_| "http://localhost:3000/config.json".to_string());

    let username = std::env::var("MATERIALS_USERNAME").unwrap_or_else(|_| "admin".to_string());
    let password = std::env::var("MATERIALS_PASSWORD").unwrap_or_else(|_| "admin".to_string());

    println!("=== Materials Client Example ===");
    println!("Default API: {}", config.default_base_url);
    println!("Config URL: {}", config_url);
    println!();

    let store = FileTokenStore::default_location()?;
    println!("Token file: {}", store.path().display());

    // Config loading starts here; requests wait for it
    let client = AuthenticatedHttpClient::new(config, store, HttpConfigSource::new(config_url))?;
    client.set_unauthorized_handler(|| {
        println!("! Session expired, please log in again");
    });
    println!("✓ Client created, API base: {}", client.base_url().await);
    println!();

    let auth = AuthService::new(client.clone());
    if !auth.is_authenticated() {
        println!("Logging in as {}...", username);
        auth.login(&username, &password).await?;
        println!("✓ Logged in");
        println!();
    }

    // Expired access tokens are refreshed transparently
    let options = RequestOptions::new().query("page", "1");
    match client.get::<Value>("/materials", Some(options)).await {
        Ok(materials) => println!("Materials: {}", materials),
        Err(e) => println!("! Failed to list materials: {}", e),
    }

    Ok(())
}
