//! Top-level facade crate for the Hermes bridge.
//!
//! Re-exports the domain types and the gateway library so embedders can
//! depend on a single crate.

pub mod core {
    pub use hermes_core::*;
}

pub mod gateway {
    pub use hermes_gateway::*;
}
