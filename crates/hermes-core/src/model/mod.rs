//! Domain model: synchronous calls, admission decisions and outbox events.

pub mod admission;
pub mod event;
pub mod message;

pub use admission::{Admission, DenyReason, RateScope};
pub use event::{Event, EventFilter, EventId, EventStatus, NewEvent, OutboxCounts};
pub use message::{session_id, Caller, Message, Priority, Reply, Target};
