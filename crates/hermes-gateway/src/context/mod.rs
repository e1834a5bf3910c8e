//! Request identity shared by the HTTP handlers.

pub mod caller;

pub use caller::{callback_caller, normalize_caller_id, CALLBACK_PREFIX};
