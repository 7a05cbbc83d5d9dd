//! Shared domain types for botfsm.
//!
//! FSM context keys, store configuration and the error taxonomy used by the
//! core and infrastructure crates.
//!
//! Zero infrastructure dependencies -- only serde, serde_json, thiserror.

pub mod config;
pub mod error;
pub mod fsm;
