//! Infrastructure layer for botfsm.
//!
//! Contains the SQLite implementation of the `FsmStorage` trait defined in
//! `botfsm-core`: split reader/writer pools, the retried statement executor,
//! the table bootstrap, and the configuration loader.

pub mod config;
pub mod sqlite;
