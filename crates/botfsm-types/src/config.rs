//! Configuration types for the FSM store.
//!
//! `StoreConfig` is deserialized from `botfsm.toml` (see `botfsm-infra::config`).
//! Every field has a default so an empty file is a valid configuration.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Table used when none (or an unusable one) is configured.
pub const DEFAULT_TABLE_NAME: &str = "fsm_storage";

// ---------------------------------------------------------------------------
// SerializingMethod
// ---------------------------------------------------------------------------

/// How the data payload is encoded in the `data` column.
///
/// Fixed for the lifetime of a table: rows carry no marker of the method
/// that wrote them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SerializingMethod {
    /// JSON text. Values must be representable as JSON.
    #[default]
    Json,
    /// Named MessagePack, base64 encoded. Accepts non-string map keys and bytes.
    MessagePack,
}

impl SerializingMethod {
    /// Parse a method name. Unrecognized names fall back to [`SerializingMethod::Json`].
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "msgpack" | "messagepack" | "binary" | "pickle" => SerializingMethod::MessagePack,
            _ => SerializingMethod::Json,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SerializingMethod::Json => "json",
            SerializingMethod::MessagePack => "msgpack",
        }
    }
}

impl From<String> for SerializingMethod {
    fn from(name: String) -> Self {
        Self::from_name(&name)
    }
}

impl From<SerializingMethod> for String {
    fn from(method: SerializingMethod) -> Self {
        method.as_str().to_string()
    }
}

impl fmt::Display for SerializingMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// TableName
// ---------------------------------------------------------------------------

/// A validated SQL table name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableName(String);

impl TableName {
    /// Validate a table name: non-empty, at most 128 bytes, no NUL or control characters.
    pub fn parse(name: &str) -> Result<Self, String> {
        if name.trim().is_empty() {
            return Err("table name must not be empty".to_string());
        }
        if name.len() > 128 {
            return Err(format!("table name is {} bytes, max is 128", name.len()));
        }
        if name.chars().any(char::is_control) {
            return Err("table name must not contain control characters".to_string());
        }
        Ok(Self(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The name as a double-quoted SQL identifier.
    pub fn quoted(&self) -> String {
        format!("\"{}\"", self.0.replace('"', "\"\""))
    }
}

impl Default for TableName {
    fn default() -> Self {
        Self(DEFAULT_TABLE_NAME.to_string())
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// RetryConfig
// ---------------------------------------------------------------------------

/// Retry schedule for backend statements.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts including the first one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

fn default_max_attempts() -> u32 {
    10
}

fn default_initial_backoff_ms() -> u64 {
    10
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_max_backoff_ms() -> u64 {
    1_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

// ---------------------------------------------------------------------------
// StoreConfig
// ---------------------------------------------------------------------------

/// Top-level configuration for an FSM store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// SQLite URL. `None` resolves to the data-directory default at connect time.
    /// Ignored when the store is built from pre-built pools.
    #[serde(default)]
    pub database_url: Option<String>,

    #[serde(default)]
    pub serializing_method: SerializingMethod,

    #[serde(default = "default_table_name")]
    pub table_name: String,

    /// Maximum wait for a pooled connection.
    #[serde(default = "default_checkout_timeout_ms")]
    pub checkout_timeout_ms: u64,

    /// Client-side deadline for one transaction (begin, statement, commit).
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Backend-side lock wait (SQLite `busy_timeout`).
    #[serde(default = "default_operation_timeout_ms")]
    pub operation_timeout_ms: u64,

    /// Size of the reader pool. The writer pool always has one connection.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    #[serde(default)]
    pub retry: RetryConfig,

    /// Compare-and-swap rounds `update_data` tries before giving up.
    #[serde(default = "default_max_update_conflicts")]
    pub max_update_conflicts: u32,
}

fn default_table_name() -> String {
    DEFAULT_TABLE_NAME.to_string()
}

fn default_checkout_timeout_ms() -> u64 {
    5_000
}

fn default_request_timeout_ms() -> u64 {
    3_000
}

fn default_operation_timeout_ms() -> u64 {
    2_000
}

fn default_max_connections() -> u32 {
    8
}

fn default_max_update_conflicts() -> u32 {
    8
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            serializing_method: SerializingMethod::default(),
            table_name: default_table_name(),
            checkout_timeout_ms: default_checkout_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            operation_timeout_ms: default_operation_timeout_ms(),
            max_connections: default_max_connections(),
            retry: RetryConfig::default(),
            max_update_conflicts: default_max_update_conflicts(),
        }
    }
}
