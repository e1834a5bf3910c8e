//! Hermes core: transport-agnostic domain types, admission decisions, and the
//! shared error surface.
//!
//! This crate defines the contracts shared by the bridge gateway and any
//! tooling that talks to it: callers, targets, messages, outbox events and
//! their state machine. It carries no HTTP or storage dependencies.
//!
//! # Defensive guarantees
//! Panics, `unwrap`, and `expect` are compile-denied here
//! (`#![deny(clippy::panic, clippy::unwrap_used, clippy::expect_used)]`).
//! All fallible paths must surface as `BridgeError`/`Result`.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod clock;
pub mod error;
pub mod model;

/// Shared result type.
pub use error::{BridgeError, ClientCode, Result};
