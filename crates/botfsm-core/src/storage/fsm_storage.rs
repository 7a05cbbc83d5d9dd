//! FSM storage trait.
//!
//! The whole contract a host bot framework needs from a state store: state
//! and data per (bot, chat, user) context, plus a lifecycle `close`.

use botfsm_types::fsm::{StateData, StorageKey};

/// Persistent storage for FSM state labels and data payloads.
///
/// Methods never fail: implementations log backend and codec failures and
/// degrade to a no-op (writes) or `None` (reads). An absent context and an
/// unreachable backend therefore look the same through this trait.
/// Uses RPITIT (native async fn in traits, Rust 2024 edition).
pub trait FsmStorage: Send + Sync {
    /// Set the state label. `None` clears it.
    fn set_state(
        &self,
        key: &StorageKey,
        state: Option<&str>,
    ) -> impl std::future::Future<Output = ()> + Send;

    /// Current state label, or `None` if unset.
    fn get_state(
        &self,
        key: &StorageKey,
    ) -> impl std::future::Future<Output = Option<String>> + Send;

    /// Replace the data payload.
    fn set_data(
        &self,
        key: &StorageKey,
        data: &StateData,
    ) -> impl std::future::Future<Output = ()> + Send;

    /// Current data payload, or `None` if there is none.
    fn get_data(
        &self,
        key: &StorageKey,
    ) -> impl std::future::Future<Output = Option<StateData>> + Send;

    /// Merge `partial` into the stored payload (top-level keys only) and
    /// return the merged payload.
    fn update_data(
        &self,
        key: &StorageKey,
        partial: &StateData,
    ) -> impl std::future::Future<Output = StateData> + Send;

    /// Release backend resources.
    fn close(&self) -> impl std::future::Future<Output = ()> + Send;

    /// One top-level entry of the data payload.
    fn get_value(
        &self,
        key: &StorageKey,
        field: &str,
    ) -> impl std::future::Future<Output = Option<serde_json::Value>> + Send {
        async move { self.get_data(key).await?.remove(field) }
    }
}
