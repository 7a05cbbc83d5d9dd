//! Business logic and the storage port trait for botfsm.
//!
//! This crate defines the `FsmStorage` trait that the infrastructure layer
//! implements, the payload codec, and the retry policy. It depends only on
//! `botfsm-types` -- never on `botfsm-infra` or any database crate.

pub mod codec;
pub mod retry;
pub mod storage;
