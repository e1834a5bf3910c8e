//! Signed outbound HTTP for workflow calls, event delivery and alerts.

pub mod client;
pub mod signing;

pub use client::{WebhookClient, WebhookError, WebhookResponse};
