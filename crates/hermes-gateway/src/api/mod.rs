//! `/api/v1` handlers.

pub mod admin;
pub mod ask;
pub mod events;
pub mod response;

pub use response::{ApiError, ApiResult};
