//! Storage abstractions for botfsm.
//!
//! Defines the FSM storage port the host bot framework depends on, plus the
//! payload merge rule shared by implementations. Implementations live in
//! botfsm-infra.

pub mod fsm_storage;
pub mod merge;
