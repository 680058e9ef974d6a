//! Service entrypoint: database bootstrap, settings seeding, and the
//! background email/reminder worker loop.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use dotenvy::dotenv;
use rfco_buddy::config::{self, database};
use rfco_buddy::core::settings::{SettingsCache, SettingsResolver};
use rfco_buddy::errors::Result;
use rfco_buddy::mailer::{EmailTransport, LogOnlyTransport};
use rfco_buddy::queue::{InMemoryJobQueue, JobQueue};
use rfco_buddy::worker::EmailWorker;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Initialize tracing (as early as possible)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // 2. Load .env file (non-fatal; env vars can be set externally)
    dotenv().ok();

    // 3. Process configuration
    let app_config = config::load_app_config()
        .inspect_err(|e| error!("Failed to load application configuration: {e}"))?;

    // 4. Database
    let db = database::create_connection(&app_config.database_url)
        .await
        .inspect(|_| info!("Database connection established"))
        .inspect_err(|e| error!("Failed to connect to database: {e}"))?;
    database::create_tables(&db).await?;

    // 5. Seed global settings on first boot (env + optional settings.toml)
    let resolver = Arc::new(SettingsResolver::new(SettingsCache::new(
        Duration::from_secs(app_config.settings_cache_ttl_secs),
    )));
    let settings_file = Path::new("settings.toml")
        .exists()
        .then(|| config::defaults::load_settings_file("settings.toml"))
        .transpose()?;
    let defaults = config::defaults::default_settings(settings_file.as_ref());
    resolver.seed_defaults(&db, &defaults).await?;

    // 6. Queue, transport and the worker loop
    let queue: Arc<dyn JobQueue> = Arc::new(InMemoryJobQueue::new());
    let transport: Arc<dyn EmailTransport> = Arc::new(LogOnlyTransport);
    let worker = EmailWorker::new(
        db,
        queue,
        resolver,
        transport,
        app_config.frontend_url.clone(),
    );

    tokio::select! {
        () = worker.run() => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received, stopping worker");
        }
    }

    Ok(())
}
