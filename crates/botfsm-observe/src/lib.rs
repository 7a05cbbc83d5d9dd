//! Observability setup for processes hosting a botfsm store.

pub mod tracing_setup;
