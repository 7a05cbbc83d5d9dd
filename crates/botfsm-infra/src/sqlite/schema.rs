//! Idempotent creation of the FSM table.

use botfsm_types::config::TableName;
use botfsm_types::error::BootstrapError;

use super::executor::{QueryExecutor, Statement};

/// DDL for the FSM table: one row per derived key, text `data` and `state`.
pub fn create_table_sql(table: &TableName) -> String {
    format!(
        r#"CREATE TABLE IF NOT EXISTS {} (
               "key"   TEXT PRIMARY KEY NOT NULL,
               "data"  TEXT,
               "state" TEXT
           )"#,
        table.quoted()
    )
}

/// Create `table` unless it already exists. Runs on the writer pool.
pub async fn ensure_table(executor: &QueryExecutor, table: &TableName) -> Result<(), BootstrapError> {
    executor
        .execute(&Statement::write(create_table_sql(table)))
        .await
        .map_err(|source| BootstrapError {
            table: table.to_string(),
            source,
        })?;

    tracing::debug!(table = %table, "FSM table ready");
    Ok(())
}
