//! Synchronous routing.
//!
//! Targets resolve to a live dispatch capability (an agent or coordinator
//! inbox, or a workflow URL) before admission; the dispatcher then admits,
//! dispatches under a timeout and audits the outcome.

pub mod command;
pub mod dispatcher;
pub mod registry;
pub mod workflow;

pub use command::CommandInbox;
pub use dispatcher::{Dispatcher, SyncCall};
pub use registry::{AgentRegistry, Inbox, InboxRequest};
pub use workflow::WorkflowDispatch;
