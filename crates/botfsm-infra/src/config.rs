//! Store configuration loader.
//!
//! Reads `botfsm.toml` and deserializes it into [`StoreConfig`], then applies
//! `BOTFSM_*` environment overrides. Falls back to defaults when the file is
//! missing or malformed.

use std::path::Path;

use botfsm_types::config::{SerializingMethod, StoreConfig};

/// Overrides `database_url`.
pub const ENV_DATABASE_URL: &str = "BOTFSM_DATABASE_URL";
/// Overrides `serializing_method`.
pub const ENV_SERIALIZING_METHOD: &str = "BOTFSM_SERIALIZING_METHOD";
/// Overrides `table_name`.
pub const ENV_TABLE_NAME: &str = "BOTFSM_TABLE_NAME";

/// Load store configuration from `path`, then apply environment overrides.
///
/// - If the file does not exist, starts from [`StoreConfig::default()`].
/// - If the file exists but fails to parse, logs a warning and starts from the default.
pub async fn load_store_config(path: &Path) -> StoreConfig {
    let config = read_config_file(path).await;
    apply_overrides(config, |name| std::env::var(name).ok())
}

async fn read_config_file(path: &Path) -> StoreConfig {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config file at {}, using defaults", path.display());
            return StoreConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", path.display());
            return StoreConfig::default();
        }
    };

    match toml::from_str::<StoreConfig>(&content) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!("Failed to parse {}: {err}, using defaults", path.display());
            StoreConfig::default()
        }
    }
}

/// Apply `BOTFSM_*` overrides looked up through `lookup`. Empty values are ignored.
pub fn apply_overrides(mut config: StoreConfig, lookup: impl Fn(&str) -> Option<String>) -> StoreConfig {
    let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

    if let Some(url) = get(ENV_DATABASE_URL) {
        config.database_url = Some(url);
    }
    if let Some(method) = get(ENV_SERIALIZING_METHOD) {
        config.serializing_method = SerializingMethod::from_name(&method);
    }
    if let Some(table) = get(ENV_TABLE_NAME) {
        config.table_name = table;
    }
    config
}
