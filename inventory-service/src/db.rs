use anyhow::Result;
use diesel::{Connection, PgConnection};
use diesel_async::pooled_connection::{bb8::Pool, AsyncDieselConnectionManager};
use diesel_async::AsyncPgConnection;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use std::time::Duration;
use tokio::time;
use tracing::{info, warn};
use crate::ledger::DbPool;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

/// The database may come up after us; retry the first connection a bounded number of times.
pub async fn connect_with_retry(database_url: &str, attempts: u32, backoff: Duration) -> Result<PgConnection> {
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match PgConnection::establish(database_url) {
            Ok(conn) => return Ok(conn),
            Err(e) if attempt < attempts => {
                warn!("Database not ready (attempt {}/{}): {}", attempt, attempts, e);
                time::sleep(backoff).await;
                attempt += 1;
            }
            Err(e) => return Err(anyhow::anyhow!("cannot connect to inventory database: {}", e)),
        }
    }
}

pub fn run_migrations(conn: &mut PgConnection) -> Result<()> {
    info!("Running database migrations...");
    conn.run_pending_migrations(MIGRATIONS)
        .map_err(|e| anyhow::anyhow!("Migration error: {}", e))?;
    info!("Migrations completed successfully");
    Ok(())
}

pub async fn build_pool(database_url: &str) -> Result<DbPool> {
    let config = AsyncDieselConnectionManager::<AsyncPgConnection>::new(database_url);
    Ok(Pool::builder().build(config).await?)
}
