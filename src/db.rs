//! Database pool for the app, provider and authorization stores.
//!
//! Postgres in deployments, SQLite for local runs and tests. Migrations come
//! from the `migration` crate and are applied before the server starts.

use anyhow::{Context, Result};
use migration::{Migrator, MigratorTrait};
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, Statement};
use std::time::Duration;
use tokio::time::sleep;

use crate::config::AppConfig;

const CONNECT_ATTEMPTS: u32 = 5;
const FIRST_RETRY_DELAY: Duration = Duration::from_millis(100);
const IDLE_TIMEOUT: Duration = Duration::from_secs(600);
const MAX_LIFETIME: Duration = Duration::from_secs(1800);

#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("could not reach the database: {source}")]
    ConnectionFailed {
        #[from]
        source: sea_orm::DbErr,
    },
    #[error("no database connection within {timeout_ms}ms")]
    ConnectionTimeout { timeout_ms: u64 },
    #[error("database configuration rejected: {message}")]
    InvalidConfiguration { message: String },
}

/// Every connection to `sqlite::memory:` opens a private empty database
fn is_sqlite_memory(url: &str) -> bool {
    url.starts_with("sqlite::memory:") || (url.starts_with("sqlite:") && url.contains("mode=memory"))
}

fn connect_options(cfg: &AppConfig) -> Result<ConnectOptions, DatabaseError> {
    if cfg.database_url.trim().is_empty() {
        return Err(DatabaseError::InvalidConfiguration {
            message: "CLOUDAPPS_DATABASE_URL is empty".to_string(),
        });
    }

    let pool_size = if is_sqlite_memory(&cfg.database_url) {
        1
    } else {
        cfg.db_max_connections
    };

    let mut options = ConnectOptions::new(&cfg.database_url);
    options
        .max_connections(pool_size)
        .acquire_timeout(Duration::from_millis(cfg.db_acquire_timeout_ms))
        .idle_timeout(IDLE_TIMEOUT)
        .max_lifetime(MAX_LIFETIME)
        .sqlx_logging(true)
        .sqlx_logging_level(log::LevelFilter::Debug);
    Ok(options)
}

/// Open the connection pool described by `cfg`.
///
/// A database that is still starting gets [`CONNECT_ATTEMPTS`] tries with a
/// doubling delay before startup gives up.
///
/// ```no_run
/// use cloud_apps::{config::AppConfig, db};
///
/// # async fn open() -> anyhow::Result<()> {
/// let pool = db::init_pool(&AppConfig::default()).await?;
/// db::run_migrations(&pool).await?;
/// # Ok(())
/// # }
/// ```
pub async fn init_pool(cfg: &AppConfig) -> Result<DatabaseConnection> {
    let options = connect_options(cfg)?;
    let mut delay = FIRST_RETRY_DELAY;

    for attempt in 1..=CONNECT_ATTEMPTS {
        match Database::connect(options.clone()).await {
            Ok(pool) => {
                log::info!("Database pool ready after {} attempt(s)", attempt);
                return Ok(pool);
            }
            Err(err) if attempt == CONNECT_ATTEMPTS => {
                log::error!("Giving up on the database after {} attempts: {}", attempt, err);
                return Err(DatabaseError::ConnectionFailed { source: err }.into());
            }
            Err(err) => {
                log::warn!(
                    "Database not reachable (attempt {}/{}): {}; next try in {:?}",
                    attempt,
                    CONNECT_ATTEMPTS,
                    err,
                    delay
                );
                sleep(delay).await;
                delay *= 2;
            }
        }
    }

    Err(DatabaseError::ConnectionTimeout {
        timeout_ms: cfg.db_acquire_timeout_ms,
    }
    .into())
}

/// Apply all pending migrations
pub async fn run_migrations(db: &DatabaseConnection) -> Result<()> {
    Migrator::up(db, None)
        .await
        .context("Failed to apply database migrations")?;
    log::info!("Database migrations applied");
    Ok(())
}

/// Round trip a `SELECT 1`; backs `/healthz`
pub async fn health_check(db: &DatabaseConnection) -> Result<()> {
    let ping = Statement::from_string(db.get_database_backend(), "SELECT 1".to_string());
    db.query_one(ping)
        .await
        .context("Database health check failed")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_url_is_a_configuration_error() {
        let config = AppConfig {
            database_url: "  ".to_string(),
            ..AppConfig::default()
        };

        let err = init_pool(&config).await.unwrap_err();

        assert!(matches!(
            err.downcast::<DatabaseError>(),
            Ok(DatabaseError::InvalidConfiguration { .. })
        ));
    }

    #[test]
    fn detects_in_memory_sqlite() {
        assert!(is_sqlite_memory("sqlite::memory:"));
        assert!(is_sqlite_memory("sqlite:file:apps?mode=memory&cache=shared"));
        assert!(!is_sqlite_memory("sqlite://data/apps.db"));
        assert!(!is_sqlite_memory("postgresql://localhost/cloud_apps"));
    }

    #[test]
    fn in_memory_sqlite_gets_a_single_connection() {
        let memory = AppConfig {
            database_url: "sqlite::memory:".to_string(),
            db_max_connections: 8,
            ..AppConfig::default()
        };
        assert_eq!(connect_options(&memory).unwrap().get_max_connections(), Some(1));

        let file = AppConfig {
            database_url: "sqlite://data/apps.db".to_string(),
            db_max_connections: 8,
            ..AppConfig::default()
        };
        assert_eq!(connect_options(&file).unwrap().get_max_connections(), Some(8));
    }

    #[tokio::test]
    async fn in_memory_pool_migrates_and_is_healthy() {
        let config = AppConfig {
            database_url: "sqlite::memory:".to_string(),
            ..AppConfig::default()
        };
        let db = init_pool(&config).await.unwrap();
        run_migrations(&db).await.unwrap();
        health_check(&db).await.unwrap();
    }
}
