//! Database Migration Runner
//!
//! Executes SQL migrations to initialize or update the database schema.

use anyhow::Result;
use sqlx::postgres::PgPoolOptions;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use housewatch_backend::AppConfig;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new("info"))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::load()?;
    let database_url =
        std::env::var("DATABASE_URL").unwrap_or_else(|_| config.database_url());

    info!("Connecting to database...");

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await?;

    info!("Running migrations...");

    sqlx::migrate!("./migrations").run(&pool).await?;

    info!("Migrations completed successfully!");

    Ok(())
}
