//! Retried, transactional statement execution.
//!
//! Every statement runs in its own transaction on a pooled connection:
//! checkout is bounded by the checkout timeout, begin/statement/commit by the
//! request timeout, and the whole attempt is re-run under a [`RetryPolicy`]
//! when the failure is transient.

use std::collections::HashMap;
use std::time::Duration;

use botfsm_core::retry::{RetryPolicy, retry_operation};
use botfsm_types::config::StoreConfig;
use botfsm_types::error::ExecutorError;
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use sqlx::{Column, Connection, Row};

use super::pool::DatabasePool;

// ---------------------------------------------------------------------------
// Statement
// ---------------------------------------------------------------------------

/// Which pool a statement runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
}

/// A bound statement parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Param {
    Text(String),
    Null,
}

impl From<&str> for Param {
    fn from(value: &str) -> Self {
        Param::Text(value.to_string())
    }
}

impl From<String> for Param {
    fn from(value: String) -> Self {
        Param::Text(value)
    }
}

impl From<Option<String>> for Param {
    fn from(value: Option<String>) -> Self {
        value.map_or(Param::Null, Param::Text)
    }
}

/// A SQL template plus its positional parameters.
#[derive(Debug, Clone)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Param>,
    pub access: Access,
}

impl Statement {
    pub fn read(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
            access: Access::Read,
        }
    }

    pub fn write(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
            access: Access::Write,
        }
    }

    pub fn bind(mut self, param: impl Into<Param>) -> Self {
        self.params.push(param.into());
        self
    }
}

/// Column name to nullable text value.
pub type Record = HashMap<String, Option<String>>;

/// Result of one statement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryOutcome {
    /// Fetched rows (reads only).
    pub rows: Vec<Record>,
    /// Rows changed (writes only).
    pub rows_affected: u64,
}

impl QueryOutcome {
    /// Value of `column` in the first row: `None` when there is no row,
    /// `Some(None)` when the row holds NULL.
    pub fn first_value(&self, column: &str) -> Option<Option<&str>> {
        self.rows
            .first()
            .map(|row| row.get(column).and_then(|v| v.as_deref()))
    }
}

// ---------------------------------------------------------------------------
// QueryExecutor
// ---------------------------------------------------------------------------

/// Runs statements through the pool under timeouts and a retry policy.
#[derive(Debug, Clone)]
pub struct QueryExecutor {
    pool: DatabasePool,
    policy: RetryPolicy,
    checkout_timeout: Duration,
    request_timeout: Duration,
}

impl QueryExecutor {
    pub fn new(pool: DatabasePool, policy: RetryPolicy) -> Self {
        let defaults = StoreConfig::default();
        Self {
            pool,
            policy,
            checkout_timeout: Duration::from_millis(defaults.checkout_timeout_ms),
            request_timeout: Duration::from_millis(defaults.request_timeout_ms),
        }
    }

    /// Build from store configuration (retry schedule and both timeouts).
    pub fn from_config(pool: DatabasePool, config: &StoreConfig) -> Self {
        Self::new(pool, RetryPolicy::from_config(&config.retry)).with_timeouts(
            Duration::from_millis(config.checkout_timeout_ms),
            Duration::from_millis(config.request_timeout_ms),
        )
    }

    pub fn with_timeouts(mut self, checkout: Duration, request: Duration) -> Self {
        self.checkout_timeout = checkout;
        self.request_timeout = request;
        self
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn pool(&self) -> &DatabasePool {
        &self.pool
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Execute `statement`, retrying transient faults.
    pub async fn execute(&self, statement: &Statement) -> Result<QueryOutcome, ExecutorError> {
        retry_operation(&self.policy, |attempt| self.attempt(statement, attempt)).await
    }

    async fn attempt(&self, statement: &Statement, attempt: u32) -> Result<QueryOutcome, ExecutorError> {
        let pool = match statement.access {
            Access::Read => &self.pool.reader,
            Access::Write => &self.pool.writer,
        };
        let checkout_ms = self.checkout_timeout.as_millis() as u64;

        let mut conn = match tokio::time::timeout(self.checkout_timeout, pool.acquire()).await {
            Ok(Ok(conn)) => conn,
            Ok(Err(e)) => return Err(classify(e, checkout_ms)),
            Err(_) => return Err(ExecutorError::PoolExhausted { timeout_ms: checkout_ms }),
        };

        tracing::trace!(attempt, access = ?statement.access, sql = %statement.sql, "executing statement");

        match tokio::time::timeout(self.request_timeout, run_in_transaction(&mut conn, statement)).await {
            Ok(result) => result.map_err(|e| classify(e, checkout_ms)),
            Err(_) => Err(ExecutorError::OperationTimeout {
                timeout_ms: self.request_timeout.as_millis() as u64,
            }),
        }
    }
}

/// Begin, run the statement, commit. Dropping the future before commit
/// rolls the transaction back when the connection returns to the pool.
async fn run_in_transaction(
    conn: &mut SqliteConnection,
    statement: &Statement,
) -> Result<QueryOutcome, sqlx::Error> {
    let mut tx = conn.begin().await?;

    let mut query = sqlx::query(&statement.sql);
    for param in &statement.params {
        query = match param {
            Param::Text(value) => query.bind(value.as_str()),
            Param::Null => query.bind(None::<String>),
        };
    }

    let outcome = match statement.access {
        Access::Read => {
            let rows = query.fetch_all(&mut *tx).await?;
            let rows = rows.iter().map(to_record).collect::<Result<Vec<_>, _>>()?;
            QueryOutcome {
                rows,
                rows_affected: 0,
            }
        }
        Access::Write => {
            let result = query.execute(&mut *tx).await?;
            QueryOutcome {
                rows: Vec::new(),
                rows_affected: result.rows_affected(),
            }
        }
    };

    tx.commit().await?;
    Ok(outcome)
}

fn to_record(row: &SqliteRow) -> Result<Record, sqlx::Error> {
    let mut record = Record::with_capacity(row.columns().len());
    for column in row.columns() {
        let value: Option<String> = row.try_get(column.ordinal())?;
        record.insert(column.name().to_string(), value);
    }
    Ok(record)
}

// ---------------------------------------------------------------------------
// Error classification
// ---------------------------------------------------------------------------

/// SQLite result codes worth retrying: BUSY, LOCKED and their extended forms.
const RETRYABLE_SQLITE_CODES: &[&str] = &["5", "6", "261", "262", "517"];

/// Map a sqlx error onto the executor taxonomy.
fn classify(error: sqlx::Error, checkout_timeout_ms: u64) -> ExecutorError {
    match &error {
        sqlx::Error::PoolTimedOut => ExecutorError::PoolExhausted {
            timeout_ms: checkout_timeout_ms,
        },
        sqlx::Error::Io(_) | sqlx::Error::WorkerCrashed => ExecutorError::BackendFault {
            message: error.to_string(),
            retryable: true,
        },
        sqlx::Error::Database(db) => {
            let retryable = db
                .code()
                .is_some_and(|code| RETRYABLE_SQLITE_CODES.contains(&code.as_ref()));
            ExecutorError::BackendFault {
                message: db.message().to_string(),
                retryable,
            }
        }
        _ => ExecutorError::BackendFault {
            message: error.to_string(),
            retryable: false,
        },
    }
}
