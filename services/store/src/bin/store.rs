//! services/store/src/bin/store.rs
//!
//! Connects to Postgres, applies the embedded schema and reports what the
//! store currently holds. Collaborators run this before serving traffic.

use docgen_store_core::ports::{AuditTrail, DocumentStore};
use docgen_store_core::Pagination;
use store_lib::{adapters::PgStore, config::Config, error::ServiceError};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), ServiceError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Config::from_env()?;
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!("Configuration loaded.");

    // --- 2. Connect to Database & Run Migrations ---
    info!("Connecting to database...");
    let store = PgStore::connect(&config).await?;
    if config.run_migrations {
        info!("Running database migrations...");
        store.run_migrations().await?;
        info!("Database migrations complete.");
    } else {
        info!("Skipping database migrations (RUN_MIGRATIONS=false).");
    }

    // --- 3. Smoke-check the read paths ---
    let latest_documents = store.list_all_documents(Pagination::new(1, 0)).await?;
    let latest_audit = store.list_audit(Pagination::new(1, 0)).await?;
    info!(
        latest_document = ?latest_documents.first().map(|d| d.created_at),
        latest_audit_record = ?latest_audit.first().map(|r| r.created_at),
        "Store is ready."
    );

    store.pool().close().await;
    Ok(())
}
