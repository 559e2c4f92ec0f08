use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::{debug, info};

use shared_config::AppConfig;

/// Open a connection pool for the configured database. Acquiring a
/// connection is bounded by the reservation lock timeout so a saturated
/// pool surfaces as a transient error instead of a hang.
pub async fn connect(config: &AppConfig) -> Result<PgPool> {
    let url = config
        .database_url
        .as_deref()
        .ok_or_else(|| anyhow!("DATABASE_URL is not configured"))?;

    debug!(
        "Connecting to PostgreSQL with up to {} connections",
        config.database_max_connections
    );

    let acquire_timeout = config.reservation.lock_timeout.max(Duration::from_secs(1));

    let pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .acquire_timeout(acquire_timeout)
        .connect(url)
        .await
        .context("Failed to connect to PostgreSQL")?;

    info!("PostgreSQL pool ready");
    Ok(pool)
}

/// Apply the bundled schema migrations.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("Failed to run database migrations")?;

    info!("Database migrations applied");
    Ok(())
}
