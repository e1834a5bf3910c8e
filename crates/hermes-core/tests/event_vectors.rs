//! Outbox event wire-shape vector tests.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::fs;

use hermes_core::model::{Event, EventStatus, NewEvent, Priority};

fn load(name: &str) -> String {
    fs::read_to_string(format!("tests/vectors/{name}")).unwrap()
}

#[test]
fn parse_pending_event() {
    let s = load("event_pending.json");
    let ev: Event = serde_json::from_str(&s).unwrap();
    assert_eq!(ev.status, EventStatus::Pending);
    assert_eq!(ev.attempts, 2);
    assert_eq!(ev.partition(), ("task.created", "scheduler"));
    assert!(ev.delivered_at.is_none());
    assert_eq!(ev.payload["task_id"], 42);
}

#[test]
fn submit_without_payload_defaults_to_null() {
    let s = load("event_submit.json");
    let ev: NewEvent = serde_json::from_str(&s).unwrap();
    assert!(ev.payload.is_null());
    ev.validate().unwrap();
}

#[test]
fn priority_is_lowercase_on_the_wire() {
    let p: Priority = serde_json::from_str("\"critical\"").unwrap();
    assert!(p.is_critical());
    assert_eq!(serde_json::to_string(&Priority::Normal).unwrap(), "\"normal\"");
    assert!(serde_json::from_str::<Priority>("\"urgent\"").is_err());
}
