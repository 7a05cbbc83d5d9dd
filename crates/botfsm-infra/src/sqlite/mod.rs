//! SQLite storage layer.
//!
//! FSM storage backed by SQLite with WAL mode and split read/write
//! connection pools.

pub mod executor;
pub mod fsm;
pub mod pool;
pub mod schema;
