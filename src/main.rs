//! pingwatch - URL reachability monitor
//!
//! Walks the configured targets one at a time, records their health and
//! serves the results over a small JSON API.

mod config;
mod db;
mod probe;
mod scheduler;
mod web;

use config::ServerConfig;
use db::{DropFileIngestor, Store};
use probe::HttpProber;
use scheduler::Scheduler;
use web::Server;

use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("pingwatch=info".parse()?))
        .init();

    // Load configuration
    let cfg = ServerConfig::load();
    tracing::info!("Starting pingwatch on port {}...", cfg.http_port);
    tracing::info!("Using database at {}", cfg.db_path);

    // Initialize database
    let store = Store::new(&cfg.db_path)?;
    tracing::info!("Database initialized successfully");

    let ingestor = DropFileIngestor::new(&cfg.drop_file, store.clone());
    let added = ingestor.ingest_logged();
    if added > 0 {
        tracing::info!("Imported {} targets from {}", added, cfg.drop_file);
    }

    // Create scheduler
    let prober = HttpProber::new(cfg.scheduler.probe_timeout)?;
    let scheduler = Scheduler::spawn(
        cfg.scheduler.clone(),
        Arc::new(store.clone()),
        Arc::new(ingestor),
        Arc::new(prober),
    );

    if cfg.autostart {
        scheduler.start().await;
    }

    // Start web server
    let server = Server::new(cfg, store, scheduler);
    server.start().await?;

    Ok(())
}
