//! SQLite FSM storage implementation.
//!
//! Implements `FsmStorage` from `botfsm-core` on top of [`QueryExecutor`].
//! One row per derived key; `set_state` and `set_data` each upsert only their
//! own column. The `try_*` methods report failures; the trait methods log
//! them and degrade to a no-op or `None`.

use botfsm_core::codec::PayloadCodec;
use botfsm_core::retry::RetryPolicy;
use botfsm_core::storage::fsm_storage::FsmStorage;
use botfsm_core::storage::merge::merge_shallow;
use botfsm_types::config::{StoreConfig, TableName};
use botfsm_types::error::{BootstrapError, CodecError, StorageError};
use botfsm_types::fsm::{StateData, StorageKey};
use serde::Serialize;
use serde::de::DeserializeOwned;

use super::executor::{QueryExecutor, Statement};
use super::pool::{DatabasePool, default_database_url};
use super::schema::ensure_table;

// ---------------------------------------------------------------------------
// SQL
// ---------------------------------------------------------------------------

/// Statements for one table, rendered once at construction.
#[derive(Debug, Clone)]
struct Queries {
    set_state: String,
    get_state: String,
    set_data: String,
    get_data: String,
    insert_data_if_absent: String,
    swap_data: String,
}

impl Queries {
    fn new(table: &TableName) -> Self {
        let t = table.quoted();
        Self {
            set_state: format!(
                r#"INSERT INTO {t} ("key", "state") VALUES (?1, ?2)
                   ON CONFLICT ("key") DO UPDATE SET "state" = excluded."state""#
            ),
            get_state: format!(r#"SELECT "state" FROM {t} WHERE "key" = ?1"#),
            set_data: format!(
                r#"INSERT INTO {t} ("key", "data") VALUES (?1, ?2)
                   ON CONFLICT ("key") DO UPDATE SET "data" = excluded."data""#
            ),
            get_data: format!(r#"SELECT "data" FROM {t} WHERE "key" = ?1"#),
            insert_data_if_absent: format!(
                r#"INSERT INTO {t} ("key", "data") VALUES (?1, ?2)
                   ON CONFLICT ("key") DO NOTHING"#
            ),
            swap_data: format!(r#"UPDATE {t} SET "data" = ?2 WHERE "key" = ?1 AND "data" IS ?3"#),
        }
    }
}

// ---------------------------------------------------------------------------
// SqliteFsmStorage
// ---------------------------------------------------------------------------

/// SQLite-backed implementation of `FsmStorage`.
#[derive(Debug)]
pub struct SqliteFsmStorage {
    executor: QueryExecutor,
    codec: PayloadCodec,
    table: TableName,
    queries: Queries,
    max_update_conflicts: u32,
    /// Pools opened by `connect` are closed by `close`; supplied pools are not.
    owns_pool: bool,
}

impl SqliteFsmStorage {
    /// Open the database named by `config` and bootstrap the table.
    ///
    /// A bootstrap failure is logged and does not fail construction; only a
    /// database that cannot be opened at all is an error.
    pub async fn connect(config: StoreConfig) -> Result<Self, StorageError> {
        let url = config
            .database_url
            .clone()
            .unwrap_or_else(default_database_url);
        let pool = DatabasePool::connect(&url, &config)
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        let storage = Self::build(pool, &config, true);
        if let Err(e) = storage.bootstrap().await {
            tracing::error!(error = %e, "FSM storage bootstrap failed, continuing");
        }
        Ok(storage)
    }

    /// Use pre-built pools. Connection settings in `config` are ignored and
    /// the table is not created; call [`bootstrap`](Self::bootstrap) first if
    /// it may be missing.
    pub fn with_pool(pool: DatabasePool, config: StoreConfig) -> Self {
        Self::build(pool, &config, false)
    }

    fn build(pool: DatabasePool, config: &StoreConfig, owns_pool: bool) -> Self {
        let table = TableName::parse(&config.table_name).unwrap_or_else(|reason| {
            tracing::warn!(
                table = %config.table_name,
                reason = %reason,
                "invalid FSM table name, using default"
            );
            TableName::default()
        });

        Self {
            executor: QueryExecutor::from_config(pool, config),
            codec: PayloadCodec::new(config.serializing_method),
            queries: Queries::new(&table),
            table,
            max_update_conflicts: config.max_update_conflicts.max(1),
            owns_pool,
        }
    }

    /// Replace the retry policy used for every statement.
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.executor = self.executor.with_policy(policy);
        self
    }

    /// Create the table if it does not exist.
    pub async fn bootstrap(&self) -> Result<(), BootstrapError> {
        ensure_table(&self.executor, &self.table).await
    }

    pub fn table(&self) -> &TableName {
        &self.table
    }

    pub fn codec(&self) -> PayloadCodec {
        self.codec
    }

    pub fn executor(&self) -> &QueryExecutor {
        &self.executor
    }

    // -----------------------------------------------------------------------
    // Fallible operations
    // -----------------------------------------------------------------------

    /// Upsert the state column. `None` is stored as an empty label.
    pub async fn try_set_state(&self, key: &StorageKey, state: Option<&str>) -> Result<(), StorageError> {
        let statement = Statement::write(&self.queries.set_state)
            .bind(key.derive())
            .bind(state.unwrap_or_default());
        self.executor.execute(&statement).await?;
        Ok(())
    }

    /// `Ok(None)` when the row is missing or its state is empty.
    pub async fn try_get_state(&self, key: &StorageKey) -> Result<Option<String>, StorageError> {
        let statement = Statement::read(&self.queries.get_state).bind(key.derive());
        let outcome = self.executor.execute(&statement).await?;

        Ok(outcome
            .first_value("state")
            .flatten()
            .filter(|s| !s.is_empty())
            .map(str::to_string))
    }

    pub async fn try_set_data(&self, key: &StorageKey, data: &StateData) -> Result<(), StorageError> {
        self.try_set_data_as(key, data).await
    }

    pub async fn try_get_data(&self, key: &StorageKey) -> Result<Option<StateData>, StorageError> {
        self.try_get_data_as(key).await
    }

    /// Encode any serializable value and upsert it as the data column.
    /// Nothing is written when encoding fails.
    pub async fn try_set_data_as<T: Serialize + ?Sized>(
        &self,
        key: &StorageKey,
        value: &T,
    ) -> Result<(), StorageError> {
        let blob = self.codec.encode(value)?;
        let statement = Statement::write(&self.queries.set_data)
            .bind(key.derive())
            .bind(blob);
        self.executor.execute(&statement).await?;
        Ok(())
    }

    /// Read and decode the data column as `T`.
    pub async fn try_get_data_as<T: DeserializeOwned>(&self, key: &StorageKey) -> Result<Option<T>, StorageError> {
        let blob = self.fetch_data_blob(key).await?;
        Ok(self.codec.decode(blob.flatten().as_deref())?)
    }

    /// Merge `partial` into the stored payload with compare-and-swap.
    ///
    /// The write only lands if the `data` column still holds the text that was
    /// read; otherwise the merge is recomputed from a fresh read, up to
    /// `max_update_conflicts` rounds.
    pub async fn try_update_data(&self, key: &StorageKey, partial: &StateData) -> Result<StateData, StorageError> {
        let derived = key.derive();

        for round in 1..=self.max_update_conflicts {
            let stored = self.fetch_data_blob(key).await?;
            let current: Option<StateData> = match &stored {
                Some(blob) => self.codec.decode(blob.as_deref())?,
                None => None,
            };
            let merged = merge_shallow(current, partial);
            let blob = self.codec.encode(&merged)?;

            let statement = match stored {
                None => Statement::write(&self.queries.insert_data_if_absent)
                    .bind(derived.as_str())
                    .bind(blob),
                Some(previous) => Statement::write(&self.queries.swap_data)
                    .bind(derived.as_str())
                    .bind(blob)
                    .bind(previous),
            };

            if self.executor.execute(&statement).await?.rows_affected > 0 {
                return Ok(merged);
            }
            tracing::debug!(key = %derived, round, "concurrent data write detected, re-reading");
        }

        Err(StorageError::Conflict {
            key: derived,
            attempts: self.max_update_conflicts,
        })
    }

    /// `None` when the row is missing, `Some(None)` when `data` is NULL.
    async fn fetch_data_blob(&self, key: &StorageKey) -> Result<Option<Option<String>>, StorageError> {
        let statement = Statement::read(&self.queries.get_data).bind(key.derive());
        let outcome = self.executor.execute(&statement).await?;
        Ok(outcome.first_value("data").map(|v| v.map(str::to_string)))
    }

    // -----------------------------------------------------------------------
    // Typed convenience accessors (log and degrade)
    // -----------------------------------------------------------------------

    pub async fn set_data_as<T: Serialize + ?Sized>(&self, key: &StorageKey, value: &T) {
        if let Err(e) = self.try_set_data_as(key, value).await {
            log_failure(key, "set data", &e);
        }
    }

    pub async fn get_data_as<T: DeserializeOwned>(&self, key: &StorageKey) -> Option<T> {
        self.try_get_data_as(key)
            .await
            .unwrap_or_else(|e| {
                log_failure(key, "get data", &e);
                None
            })
    }
}

/// Codec problems are the caller's data; everything else is the backend.
fn log_failure(key: &StorageKey, operation: &str, error: &StorageError) {
    match error {
        StorageError::Codec(_) => {
            tracing::warn!(key = %key, operation, error = %error, "FSM storage codec error")
        }
        _ => tracing::error!(key = %key, operation, error = %error, "FSM storage error"),
    }
}

// ---------------------------------------------------------------------------
// FsmStorage implementation
// ---------------------------------------------------------------------------

impl FsmStorage for SqliteFsmStorage {
    async fn set_state(&self, key: &StorageKey, state: Option<&str>) {
        if let Err(e) = self.try_set_state(key, state).await {
            log_failure(key, "set state", &e);
        }
    }

    async fn get_state(&self, key: &StorageKey) -> Option<String> {
        self.try_get_state(key).await.unwrap_or_else(|e| {
            log_failure(key, "get state", &e);
            None
        })
    }

    async fn set_data(&self, key: &StorageKey, data: &StateData) {
        self.set_data_as(key, data).await
    }

    async fn get_data(&self, key: &StorageKey) -> Option<StateData> {
        self.get_data_as(key).await
    }

    /// A stored payload that cannot be decoded reads as empty, as in
    /// `get_data`: `partial` is written over it. On any other failure the
    /// merge of `partial` over an empty payload is returned unwritten.
    async fn update_data(&self, key: &StorageKey, partial: &StateData) -> StateData {
        let error = match self.try_update_data(key, partial).await {
            Ok(merged) => return merged,
            Err(e) => e,
        };
        log_failure(key, "update data", &error);

        let merged = merge_shallow(None, partial);
        if matches!(error, StorageError::Codec(CodecError::Deserialization { .. })) {
            if let Err(e) = self.try_set_data(key, &merged).await {
                log_failure(key, "update data", &e);
            }
        }
        merged
    }

    async fn close(&self) {
        if self.owns_pool {
            self.executor.pool().close().await;
            tracing::debug!(table = %self.table, "FSM storage closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use botfsm_types::config::SerializingMethod;
    use serde::Deserialize;
    use serde_json::json;

    fn temp_config() -> StoreConfig {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("fsm.db");
        std::mem::forget(dir);
        StoreConfig {
            database_url: Some(format!("sqlite://{}?mode=rwc", db_path.display())),
            ..StoreConfig::default()
        }
    }

    async fn test_storage() -> SqliteFsmStorage {
        SqliteFsmStorage::connect(temp_config()).await.unwrap()
    }

    fn key() -> StorageKey {
        StorageKey::new(1001, -42, 7)
    }

    fn map(value: serde_json::Value) -> StateData {
        value.as_object().cloned().unwrap()
    }

    // -------------------------------------------------------------------
    // State
    // -------------------------------------------------------------------

    #[tokio::test]
    async fn test_set_get_state() {
        let storage = test_storage().await;
        storage.set_state(&key(), Some("form:name")).await;
        assert_eq!(storage.get_state(&key()).await.as_deref(), Some("form:name"));
    }

    #[tokio::test]
    async fn test_clear_state() {
        let storage = test_storage().await;
        storage.set_state(&key(), Some("form:name")).await;
        storage.set_state(&key(), None).await;
        assert_eq!(storage.get_state(&key()).await, None);
    }

    #[tokio::test]
    async fn test_never_written_key_is_none() {
        let storage = test_storage().await;
        assert_eq!(storage.get_state(&key()).await, None);
        assert_eq!(storage.get_data(&key()).await, None);
        assert_eq!(storage.try_get_state(&key()).await.unwrap(), None);
        assert_eq!(storage.try_get_data(&key()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_contexts_are_isolated() {
        let storage = test_storage().await;
        let alice = StorageKey::new(1, 10, 100);
        let bob = StorageKey::new(1, 10, 101);
        let other_bot = StorageKey::new(2, 10, 100);

        storage.set_state(&alice, Some("a")).await;
        storage.set_state(&bob, Some("b")).await;

        assert_eq!(storage.get_state(&alice).await.as_deref(), Some("a"));
        assert_eq!(storage.get_state(&bob).await.as_deref(), Some("b"));
        assert_eq!(storage.get_state(&other_bot).await, None);
    }

    // -------------------------------------------------------------------
    // Data
    // -------------------------------------------------------------------

    #[tokio::test]
    async fn test_set_data_overwrites() {
        let storage = test_storage().await;
        storage.set_data(&key(), &map(json!({"a": 1}))).await;
        storage.set_data(&key(), &map(json!({"b": 2}))).await;
        assert_eq!(storage.get_data(&key()).await, Some(map(json!({"b": 2}))));
    }

    #[tokio::test]
    async fn test_state_and_data_columns_independent() {
        let storage = test_storage().await;
        storage.set_data(&key(), &map(json!({"a": 1}))).await;
        storage.set_state(&key(), Some("step2")).await;
        storage.set_state(&key(), None).await;
        assert_eq!(storage.get_data(&key()).await, Some(map(json!({"a": 1}))));

        storage.set_state(&key(), Some("step3")).await;
        storage.set_data(&key(), &StateData::new()).await;
        assert_eq!(storage.get_state(&key()).await.as_deref(), Some("step3"));
    }

    #[tokio::test]
    async fn test_get_value() {
        let storage = test_storage().await;
        storage.set_data(&key(), &map(json!({"name": "Ann", "age": 30}))).await;

        assert_eq!(storage.get_value(&key(), "name").await, Some(json!("Ann")));
        assert_eq!(storage.get_value(&key(), "missing").await, None);
    }

    #[tokio::test]
    async fn test_update_data_merges_and_persists() {
        let storage = test_storage().await;
        storage.set_data(&key(), &map(json!({"a": 1}))).await;

        let merged = storage.update_data(&key(), &map(json!({"b": 2}))).await;
        assert_eq!(merged, map(json!({"a": 1, "b": 2})));
        assert_eq!(storage.get_data(&key()).await, Some(map(json!({"a": 1, "b": 2}))));
    }

    #[tokio::test]
    async fn test_update_data_on_missing_row() {
        let storage = test_storage().await;
        let merged = storage.update_data(&key(), &map(json!({"b": 2}))).await;
        assert_eq!(merged, map(json!({"b": 2})));
        assert_eq!(storage.get_data(&key()).await, Some(merged));
    }

    #[tokio::test]
    async fn test_update_data_when_only_state_set() {
        let storage = test_storage().await;
        storage.set_state(&key(), Some("asking")).await;

        let merged = storage.update_data(&key(), &map(json!({"x": true}))).await;
        assert_eq!(merged, map(json!({"x": true})));
        assert_eq!(storage.get_data(&key()).await, Some(merged));
        assert_eq!(storage.get_state(&key()).await.as_deref(), Some("asking"));
    }

    #[tokio::test]
    async fn test_concurrent_updates_with_disjoint_fields_both_land() {
        let storage = Arc::new(test_storage().await);
        storage.set_data(&key(), &StateData::new()).await;

        let mut handles = Vec::new();
        for i in 0..6 {
            let storage = Arc::clone(&storage);
            handles.push(tokio::spawn(async move {
                let mut partial = StateData::new();
                partial.insert(format!("field{i}"), json!(i));
                storage.try_update_data(&key(), &partial).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let data = storage.get_data(&key()).await.unwrap();
        assert_eq!(data.len(), 6);
    }

    // -------------------------------------------------------------------
    // Codec modes
    // -------------------------------------------------------------------

    #[tokio::test]
    async fn test_msgpack_mode_roundtrip() {
        let config = StoreConfig {
            serializing_method: SerializingMethod::MessagePack,
            ..temp_config()
        };
        let storage = SqliteFsmStorage::connect(config).await.unwrap();
        let data = map(json!({"step": 2, "answers": ["a", "b"]}));

        storage.set_data(&key(), &data).await;
        assert_eq!(storage.get_data(&key()).await, Some(data));
    }

    #[tokio::test]
    async fn test_typed_data_accessors() {
        #[derive(Debug, PartialEq, Serialize, Deserialize)]
        struct Order {
            item: String,
            quantity: u32,
        }

        let storage = test_storage().await;
        let order = Order {
            item: "tea".to_string(),
            quantity: 2,
        };
        storage.set_data_as(&key(), &order).await;

        assert_eq!(storage.get_data_as::<Order>(&key()).await, Some(order));
        assert_eq!(
            storage.get_data(&key()).await,
            Some(map(json!({"item": "tea", "quantity": 2})))
        );
    }

    #[tokio::test]
    async fn test_unserializable_data_is_not_written() {
        let storage = test_storage().await;
        storage.set_data(&key(), &map(json!({"keep": 1}))).await;

        let bad: std::collections::BTreeMap<(u8, u8), u8> = [((0, 1), 2)].into();
        let err = storage.try_set_data_as(&key(), &bad).await.unwrap_err();
        assert!(matches!(err, StorageError::Codec(_)));

        storage.set_data_as(&key(), &bad).await;
        assert_eq!(storage.get_data(&key()).await, Some(map(json!({"keep": 1}))));
    }

    #[tokio::test]
    async fn test_mode_mismatch_reads_as_none() {
        let config = temp_config();
        let json_storage = SqliteFsmStorage::connect(config.clone()).await.unwrap();
        json_storage.set_data(&key(), &map(json!({"a": 1}))).await;

        let msgpack_storage = SqliteFsmStorage::connect(StoreConfig {
            serializing_method: SerializingMethod::MessagePack,
            ..config
        })
        .await
        .unwrap();

        assert_eq!(msgpack_storage.get_data(&key()).await, None);
        assert!(matches!(
            msgpack_storage.try_get_data(&key()).await,
            Err(StorageError::Codec(_))
        ));
        // The unreadable payload is not clobbered by a merge.
        assert!(msgpack_storage.try_update_data(&key(), &map(json!({"b": 2}))).await.is_err());
        assert_eq!(json_storage.get_data(&key()).await, Some(map(json!({"a": 1}))));
    }

    #[tokio::test]
    async fn test_update_over_unreadable_payload_replaces_it() {
        let config = temp_config();
        let json_storage = SqliteFsmStorage::connect(config.clone()).await.unwrap();
        json_storage.set_data(&key(), &map(json!({"a": 1}))).await;

        let msgpack_storage = SqliteFsmStorage::connect(StoreConfig {
            serializing_method: SerializingMethod::MessagePack,
            ..config
        })
        .await
        .unwrap();

        let merged = msgpack_storage.update_data(&key(), &map(json!({"b": 2}))).await;
        assert_eq!(merged, map(json!({"b": 2})));
        assert_eq!(msgpack_storage.get_data(&key()).await, Some(merged));

        // The rewritten payload is readable, so later updates merge normally.
        let merged = msgpack_storage.update_data(&key(), &map(json!({"c": 3}))).await;
        assert_eq!(merged, map(json!({"b": 2, "c": 3})));
        assert_eq!(msgpack_storage.get_data(&key()).await, Some(merged));
    }

    // -------------------------------------------------------------------
    // Construction, failures, lifecycle
    // -------------------------------------------------------------------

    #[tokio::test]
    async fn test_custom_table_name() {
        let config = StoreConfig {
            table_name: "bot_states".to_string(),
            ..temp_config()
        };
        let storage = SqliteFsmStorage::connect(config).await.unwrap();
        storage.set_state(&key(), Some("x")).await;

        let row: (String, String) = sqlx::query_as(r#"SELECT "key", "state" FROM bot_states"#)
            .fetch_one(&storage.executor().pool().reader)
            .await
            .unwrap();
        assert_eq!(row, ("1001:-42:7".to_string(), "x".to_string()));
    }

    #[tokio::test]
    async fn test_invalid_table_name_falls_back_to_default() {
        let config = StoreConfig {
            table_name: String::new(),
            ..temp_config()
        };
        let storage = SqliteFsmStorage::connect(config).await.unwrap();
        assert_eq!(storage.table().as_str(), "fsm_storage");
    }

    #[tokio::test]
    async fn test_bootstrap_failure_does_not_prevent_construction() {
        let pool = DatabasePool::connect(
            temp_config().database_url.as_deref().unwrap(),
            &StoreConfig::default(),
        )
        .await
        .unwrap();
        pool.close().await;

        let storage = SqliteFsmStorage::with_pool(pool, StoreConfig::default())
            .with_retry_policy(RetryPolicy::no_retry());
        assert!(storage.bootstrap().await.is_err());

        // Operations degrade instead of failing.
        storage.set_state(&key(), Some("x")).await;
        assert_eq!(storage.get_state(&key()).await, None);
        assert_eq!(storage.get_data(&key()).await, None);
        assert!(matches!(
            storage.try_get_state(&key()).await,
            Err(StorageError::Executor(_))
        ));
        let merged = storage.update_data(&key(), &map(json!({"b": 2}))).await;
        assert_eq!(merged, map(json!({"b": 2})));
    }

    #[tokio::test]
    async fn test_supplied_pool_requires_explicit_bootstrap() {
        let config = temp_config();
        let pool = DatabasePool::connect(config.database_url.as_deref().unwrap(), &config)
            .await
            .unwrap();
        let storage = SqliteFsmStorage::with_pool(pool.clone(), StoreConfig::default())
            .with_retry_policy(RetryPolicy::no_retry());

        assert!(storage.try_get_state(&key()).await.is_err(), "table should not exist yet");
        storage.bootstrap().await.unwrap();
        storage.set_state(&key(), Some("ready")).await;
        assert_eq!(storage.get_state(&key()).await.as_deref(), Some("ready"));

        // Closing a store built on a supplied pool leaves the pool open.
        storage.close().await;
        assert!(!pool.is_closed());
    }

    #[tokio::test]
    async fn test_close_releases_owned_pool() {
        let storage = test_storage().await;
        storage.close().await;
        assert!(storage.executor().pool().is_closed());
    }

    #[tokio::test]
    async fn test_pool_exhaustion_degrades_to_none() {
        let config = StoreConfig {
            checkout_timeout_ms: 20,
            ..temp_config()
        };
        let storage = SqliteFsmStorage::connect(config)
            .await
            .unwrap()
            .with_retry_policy(
                RetryPolicy::default()
                    .with_max_attempts(2)
                    .with_backoff(Duration::from_millis(1), 1.0, Duration::from_millis(1)),
            );
        storage.set_state(&key(), Some("before")).await;

        let _held = storage.executor().pool().writer.acquire().await.unwrap();
        storage.set_state(&key(), Some("after")).await;
        let err = storage.try_set_state(&key(), Some("after")).await.unwrap_err();
        assert!(matches!(
            err,
            StorageError::Executor(botfsm_types::error::ExecutorError::PoolExhausted { .. })
        ));
        assert_eq!(storage.get_state(&key()).await.as_deref(), Some("before"));
    }
}
