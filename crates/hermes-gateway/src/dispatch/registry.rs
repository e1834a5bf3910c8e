use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot};

use hermes_core::error::Result;
use hermes_core::model::{Message, Reply};

/// One synchronous call handed to an agent's runtime.
#[derive(Debug)]
pub struct InboxRequest {
    pub message: Message,
    pub reply: oneshot::Sender<Result<Reply>>,
}

/// Sending half of a live inbound channel.
#[derive(Clone, Debug)]
pub struct Inbox {
    pub tx: mpsc::Sender<InboxRequest>,
}

impl Inbox {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<InboxRequest>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    pub fn is_live(&self) -> bool {
        !self.tx.is_closed()
    }
}

#[derive(Clone)]
struct InboxEntry {
    inbox: Inbox,
    registered_seq: u64,
}

/// Live inbound channels:
/// - `agent_id -> Inbox`
/// - the coordinating CLI's channel
#[derive(Default)]
pub struct AgentRegistry {
    agents: DashMap<String, InboxEntry>,
    coordinator: RwLock<Option<Inbox>>,
    seq: AtomicU64,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) an agent's channel. Returns the replaced one.
    pub fn register(&self, agent_id: impl Into<String>, inbox: Inbox) -> Option<Inbox> {
        let registered_seq = self.seq.fetch_add(1, Ordering::Relaxed);
        self.agents
            .insert(agent_id.into(), InboxEntry { inbox, registered_seq })
            .map(|old| old.inbox)
    }

    pub fn unregister(&self, agent_id: &str) -> Option<Inbox> {
        self.agents.remove(agent_id).map(|(_, e)| e.inbox)
    }

    /// Live channel for `agent_id`; a closed channel is evicted and reported absent.
    pub fn get(&self, agent_id: &str) -> Option<Inbox> {
        let entry = self.agents.get(agent_id)?.value().clone();
        if entry.inbox.is_live() {
            return Some(entry.inbox);
        }
        // Only evict the entry we looked at, not a newer registration.
        self.agents.remove_if(agent_id, |_, e| e.registered_seq == entry.registered_seq);
        None
    }

    pub fn register_coordinator(&self, inbox: Inbox) {
        match self.coordinator.write() {
            Ok(mut g) => *g = Some(inbox),
            Err(poisoned) => *poisoned.into_inner() = Some(inbox),
        }
    }

    pub fn coordinator(&self) -> Option<Inbox> {
        let guard = match self.coordinator.read() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.as_ref().filter(|i| i.is_live()).cloned()
    }

    pub fn agent_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .agents
            .iter()
            .filter(|e| e.value().inbox.is_live())
            .map(|e| e.key().clone())
            .collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_channel_is_absent() {
        let reg = AgentRegistry::new();
        let (inbox, rx) = Inbox::channel(4);
        reg.register("researcher", inbox);
        assert!(reg.get("researcher").is_some());
        drop(rx);
        assert!(reg.get("researcher").is_none());
        assert!(reg.agent_ids().is_empty());
    }

    #[test]
    fn replacement_returns_previous() {
        let reg = AgentRegistry::new();
        let (a, _ra) = Inbox::channel(1);
        let (b, _rb) = Inbox::channel(1);
        assert!(reg.register("x", a).is_none());
        assert!(reg.register("x", b).is_some());
        assert_eq!(reg.agent_ids(), vec!["x".to_string()]);
        assert!(reg.unregister("x").is_some());
        assert!(reg.get("x").is_none());
    }

    #[test]
    fn coordinator_slot() {
        let reg = AgentRegistry::new();
        assert!(reg.coordinator().is_none());
        let (c, _rx) = Inbox::channel(1);
        reg.register_coordinator(c);
        assert!(reg.coordinator().is_some());
    }
}
