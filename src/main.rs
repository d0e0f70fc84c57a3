/// Mosque Registry - admin verification and lifecycle service
///
/// Binds administrator accounts to mosques through time-limited verification
/// codes, tracks each admin through review, removal and mosque deletion, and
/// routes every login to the right recovery flow.

mod admin;
mod api;
mod auth;
mod config;
mod context;
mod db;
mod error;
mod jobs;
mod mosque;
mod server;

use config::ServerConfig;
use context::AppContext;
use error::RegistryResult;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> RegistryResult<()> {
    // Load configuration first so the log format can follow it
    let config = ServerConfig::from_env()?;
    init_tracing(&config);

    tracing::info!(
        version = %config.service.version,
        database = %config.storage.registry_db.display(),
        "Starting mosque registry"
    );

    let ctx = Arc::new(AppContext::new(config).await?);

    // Start background jobs
    let scheduler = Arc::new(jobs::JobScheduler::new(Arc::clone(&ctx)));
    scheduler.start();

    server::serve((*ctx).clone()).await?;

    Ok(())
}

fn init_tracing(config: &ServerConfig) {
    let filter = EnvFilter::new(&config.logging.level);
    let registry = tracing_subscriber::registry().with(filter);
    if config.logging.json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
