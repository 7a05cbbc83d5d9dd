//! Shallow merge of FSM data payloads.

use botfsm_types::fsm::StateData;

/// Merge `partial` over `current`, top-level keys only.
///
/// Keys in `partial` replace the same keys in `current` wholesale; nested
/// objects are not merged. A missing `current` counts as an empty payload.
pub fn merge_shallow(current: Option<StateData>, partial: &StateData) -> StateData {
    let mut merged = current.unwrap_or_default();
    for (field, value) in partial {
        merged.insert(field.clone(), value.clone());
    }
    merged
}
