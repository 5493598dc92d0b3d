//! Database connection used during startup.
//!
//! Stages run on the dispatcher thread, which has no async runtime, so the
//! connection carries a current-thread runtime of its own and blocks on each
//! query.

use crate::config::DatabaseSettings;
use crate::error::StageError;
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection};
use sqlx::Connection;
use std::time::Duration;
use tokio::runtime::{Builder, Runtime};
use tracing::{debug, info, warn};

/// An open connection to the configured MySQL server.
pub struct Database {
    // Dropped before the runtime it was opened on
    connection: MySqlConnection,
    runtime: Runtime,
}

fn database_error(e: impl std::fmt::Display) -> StageError {
    StageError::Database(e.to_string())
}

/// Quotes a table name for use in a statement.
pub fn quote_identifier(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

impl Database {
    /// Connects with the configured credentials, giving up after
    /// `connect_timeout_secs`.
    pub fn connect(settings: &DatabaseSettings) -> Result<Self, StageError> {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(database_error)?;

        let options = MySqlConnectOptions::new()
            .host(&settings.host)
            .port(settings.port)
            .username(&settings.user)
            .password(&settings.password)
            .database(&settings.database);
        let timeout = Duration::from_secs(settings.connect_timeout_secs.max(1));

        debug!(host = %settings.host, port = settings.port, "connecting to database");
        let connection = runtime
            .block_on(tokio::time::timeout(
                timeout,
                MySqlConnection::connect_with(&options),
            ))
            .map_err(|_| {
                StageError::Database(format!(
                    "timed out connecting to {}:{} after {:?}",
                    settings.host, settings.port, timeout
                ))
            })?
            .map_err(|e| {
                StageError::Database(format!(
                    "failed to connect to {}:{}: {}",
                    settings.host, settings.port, e
                ))
            })?;

        Ok(Self {
            connection,
            runtime,
        })
    }

    pub fn server_version(&mut self) -> Result<String, StageError> {
        let Self {
            connection,
            runtime,
        } = self;
        runtime
            .block_on(sqlx::query_scalar::<_, String>("SELECT VERSION()").fetch_one(connection))
            .map_err(database_error)
    }

    /// Whether the selected schema holds any tables.
    pub fn is_schema_present(&mut self) -> Result<bool, StageError> {
        let Self {
            connection,
            runtime,
        } = self;
        let tables: i64 = runtime
            .block_on(
                sqlx::query_scalar(
                    "SELECT COUNT(*) FROM information_schema.tables WHERE table_schema = DATABASE()",
                )
                .fetch_one(connection),
            )
            .map_err(database_error)?;
        Ok(tables > 0)
    }

    /// Runs `OPTIMIZE TABLE` on every table with reclaimable space and
    /// returns how many were optimized. A table that fails is skipped.
    pub fn optimize_tables(&mut self) -> Result<usize, StageError> {
        let Self {
            connection,
            runtime,
        } = self;
        runtime.block_on(async {
            let tables: Vec<String> = sqlx::query_scalar(
                "SELECT CAST(TABLE_NAME AS CHAR) FROM information_schema.tables \
                 WHERE table_schema = DATABASE() AND data_free > 0",
            )
            .fetch_all(&mut *connection)
            .await
            .map_err(database_error)?;

            let mut optimized: usize = 0;
            for table in tables {
                info!("Optimizing table {}...", table);
                let statement = format!("OPTIMIZE TABLE {}", quote_identifier(&table));
                match sqlx::query(&statement).execute(&mut *connection).await {
                    Ok(_) => optimized += 1,
                    Err(e) => warn!("Failed to optimize table {}: {}", table, e),
                }
            }
            Ok::<_, StageError>(optimized)
        })
    }
}
