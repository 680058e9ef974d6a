//! Configuration management.
//!
//! Process-level configuration (database URL, token secret, frontend URL)
//! comes from the environment, usually via a `.env` file loaded at startup.
//! Everything tunable at runtime lives in the `app_settings` table instead
//! and is reached through the settings resolver.

/// Database connection and table creation
pub mod database;
/// Bootstrap defaults for the global settings table
pub mod defaults;

use crate::errors::{Error, Result};

/// Process configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// SeaORM connection string
    pub database_url: String,
    /// HS256 secret for approval tokens
    pub token_secret: String,
    /// Base URL for GC-facing approval links
    pub frontend_url: String,
    /// TTL for the resolver's global-settings cache, in seconds
    pub settings_cache_ttl_secs: u64,
}

/// Loads process configuration from the environment. Only the token secret
/// is mandatory - everything else has a development-friendly default.
pub fn load_app_config() -> Result<AppConfig> {
    let token_secret = std::env::var("TOKEN_SECRET").map_err(|_| Error::Config {
        message: "TOKEN_SECRET must be set (HS256 secret for approval tokens)".to_string(),
    })?;
    if token_secret.len() < 32 {
        return Err(Error::Config {
            message: "TOKEN_SECRET must be at least 32 bytes".to_string(),
        });
    }

    Ok(AppConfig {
        database_url: std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://data/rfco_buddy.sqlite".to_string()),
        token_secret,
        frontend_url: std::env::var("FRONTEND_URL")
            .unwrap_or_else(|_| "http://localhost:3000".to_string()),
        settings_cache_ttl_secs: std::env::var("SETTINGS_CACHE_TTL_SECS")
            .ok()
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(60),
    })
}
