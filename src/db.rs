#![forbid(unsafe_code)]

use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::info;

/// Opens the analytics database when `DATABASE_URL` is configured.
pub async fn connect(database_url: Option<&str>) -> anyhow::Result<Option<PgPool>> {
    let url = match database_url {
        Some(url) => url,
        None => {
            info!("DATABASE_URL not set, analytics are kept in the data directory");
            return Ok(None);
        }
    };

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(3))
        .connect(url)
        .await?;

    info!("Connected to PostgreSQL");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await?;

    info!("Database migrations applied");

    Ok(Some(pool))
}
