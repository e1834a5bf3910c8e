//! Hermes bridge gateway library entry.
//!
//! Wires admission policy, synchronous dispatch, the durable event outbox
//! and its delivery workers, and the audit trail into one HTTP service.
//! Consumed by the binary (`main.rs`) and by integration tests.

pub mod api;
pub mod app_state;
pub mod audit;
pub mod config;
pub mod context;
pub mod delivery;
pub mod dispatch;
pub mod obs;
pub mod ops;
pub mod policy;
pub mod router;
pub mod storage;
pub mod webhook;
