//! Asynchronous path: draining the event outbox to webhook consumers.

pub mod alert;
pub mod retry;
pub mod worker;

pub use alert::{Alert, Alerter};
pub use retry::RetryPolicy;
pub use worker::{DeliveryDeps, DeliveryPool, DeliveryWorker, TickReport, WorkerHealth, WorkerSettings};
