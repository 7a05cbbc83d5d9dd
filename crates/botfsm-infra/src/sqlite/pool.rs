//! Database pool with split reader/writer connections in WAL mode.
//!
//! SQLite allows only one writer at a time. This module provides a `DatabasePool`
//! with a multi-connection reader pool for concurrent reads and a single-connection
//! writer pool for serialized writes. A caller may also hand in one pre-built
//! pool that serves both roles.

use std::str::FromStr;
use std::time::Duration;

use botfsm_types::config::StoreConfig;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};

/// Split read/write pool for SQLite.
///
/// - `reader`: Multi-connection pool for SELECT queries.
/// - `writer`: Single-connection pool for upserts and the schema bootstrap.
#[derive(Clone, Debug)]
pub struct DatabasePool {
    pub reader: SqlitePool,
    pub writer: SqlitePool,
}

impl DatabasePool {
    /// Open a reader and a writer pool on `database_url`.
    ///
    /// Both pools use WAL journal mode, `operation_timeout_ms` as SQLite's
    /// busy timeout and `checkout_timeout_ms` as the pool acquire timeout.
    /// The database file is created if missing.
    pub async fn connect(database_url: &str, config: &StoreConfig) -> Result<Self, sqlx::Error> {
        let base_opts = SqliteConnectOptions::from_str(database_url)?
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_millis(config.operation_timeout_ms))
            .create_if_missing(true);

        let read_opts = base_opts.clone().read_only(true);
        let write_opts = base_opts;
        let acquire_timeout = Duration::from_millis(config.checkout_timeout_ms);

        // Writer first so the file and WAL exist before read-only connections open.
        let writer = SqlitePoolOptions::new()
            .max_connections(1)
            .acquire_timeout(acquire_timeout)
            .connect_with(write_opts)
            .await?;

        let reader = SqlitePoolOptions::new()
            .max_connections(config.max_connections.max(1))
            .acquire_timeout(acquire_timeout)
            .connect_with(read_opts)
            .await?;

        Ok(Self { reader, writer })
    }

    /// Use one pre-built pool for both reads and writes.
    pub fn single(pool: SqlitePool) -> Self {
        Self {
            reader: pool.clone(),
            writer: pool,
        }
    }

    /// Close both pools, waiting for checked-out connections to return.
    pub async fn close(&self) {
        self.writer.close().await;
        self.reader.close().await;
    }

    pub fn is_closed(&self) -> bool {
        self.writer.is_closed() && self.reader.is_closed()
    }
}

/// Returns the default database URL based on `BOTFSM_DATA_DIR` env var,
/// falling back to `~/.botfsm/fsm.db`.
pub fn default_database_url() -> String {
    let data_dir = std::env::var("BOTFSM_DATA_DIR").unwrap_or_else(|_| {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        format!("{home}/.botfsm")
    });
    format!("sqlite://{data_dir}/fsm.db")
}
