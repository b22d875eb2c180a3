//! Development seeding tool.
//!
//! Creates (or reuses) a demo account in the configured database, optionally
//! stores an upstream API key for it, and prints a session token for use as
//! a bearer credential against the API.

use anyhow::Context;

use murmur_chat::config::ServerConfig;
use murmur_chat::crypto::ApiKeyCipher;
use murmur_chat::store::ChatStore;

const DEMO_EMAIL: &str = "demo@example.com";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = ServerConfig::from_env();
    let store = ChatStore::open(&config.db_path)
        .await
        .with_context(|| format!("failed to open database at {}", config.db_path.display()))?;

    let user = match store.user_by_email(DEMO_EMAIL).await? {
        Some(user) => {
            println!("Reusing user {DEMO_EMAIL} ({})", user.id);
            user
        }
        None => {
            let user = store.create_user(DEMO_EMAIL).await?;
            println!("Created user {DEMO_EMAIL} ({})", user.id);
            user
        }
    };

    if let Ok(api_key) = std::env::var("MURMUR_SEED_API_KEY") {
        let key = config
            .encryption_key
            .as_deref()
            .context("MURMUR_ENCRYPTION_KEY must be set to seed an API key")?;
        let cipher = ApiKeyCipher::new(key)?;
        let blob = cipher.encrypt(api_key.trim())?;
        store.set_api_key(&user.id, &blob).await?;
        println!("Stored API key for {DEMO_EMAIL}");
    }

    let token = store.create_session(&user.id).await?;
    println!("Session token: {token}");

    Ok(())
}
