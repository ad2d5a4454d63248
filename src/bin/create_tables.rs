use anyhow::Context;
use issue_desk::{config::AppConfig, db::Database, init_tracing};

/// Creates every missing table in the configured database, then exits.
/// Existing tables are left untouched.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load().context("invalid configuration")?;
    init_tracing(&config);

    tracing::info!(database = %config.database.name, "creating database tables");
    let db = Database::connect(&config.database)
        .await
        .context("failed to connect to the database")?;
    db.create_schema().await.context("table creation failed")?;

    tracing::info!("all tables created successfully");
    Ok(())
}
