//! Admission under quiet hours, rolling quotas, concurrency and reloads.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};

use hermes_core::model::{Admission, DenyReason, Priority, RateScope};
use hermes_gateway::policy::{AdmissionCounter, MemoryCounter, PolicyDocument, PolicyEngine, PolicyStore};
use hermes_gateway::storage::{SqliteStore, StoreCounter};

const POLICY: &str = r#"
window_secs: 3600
global:
  calls_per_window: 1000
default_calls_per_window: 60
callers:
  coordinator:
    calls_per_window: 200
    priority_levels: [normal, critical]
quiet_hours:
  start: "23:00"
  end: "08:00"
  timezone: "UTC"
"#;

fn at(h: u32, m: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, h, m, 0).unwrap()
}

fn engine_with(policy: &str, counter: Arc<dyn AdmissionCounter>) -> Arc<PolicyEngine> {
    let doc = PolicyDocument::parse(policy).unwrap();
    let store = Arc::new(PolicyStore::from_document(doc).unwrap());
    Arc::new(PolicyEngine::new(store, counter))
}

fn durable_counter(dir: &tempfile::TempDir) -> Arc<dyn AdmissionCounter> {
    let store = SqliteStore::open(dir.path().join("hermes.db")).unwrap();
    Arc::new(StoreCounter::new(store))
}

#[tokio::test]
async fn scenario_a_critical_coordinator_admitted_at_night() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine_with(POLICY, durable_counter(&dir));
    let d = engine.admit("coordinator", Priority::Critical, at(2, 0)).await.unwrap();
    assert!(d.is_allowed(), "{d:?}");
}

#[tokio::test]
async fn critical_without_clearance_is_denied_at_night() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine_with(POLICY, durable_counter(&dir));
    let d = engine.admit("researcher", Priority::Critical, at(2, 0)).await.unwrap();
    assert_eq!(d.deny_reason(), Some(&DenyReason::PriorityNotAllowed { priority: Priority::Critical }));
    let used = engine.counter().window_count(Some("researcher"), 3_600_000, at(2, 0)).await.unwrap();
    assert_eq!(used, 0);
}

#[tokio::test]
async fn scenario_b_normal_researcher_blocked_at_night() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine_with(POLICY, durable_counter(&dir));
    let d = engine.admit("researcher", Priority::Normal, at(2, 0)).await.unwrap();
    assert_eq!(d.deny_reason(), Some(&DenyReason::QuietHoursBlocked));

    // Same caller at midday is fine.
    let d = engine.admit("researcher", Priority::Normal, at(12, 0)).await.unwrap();
    assert!(d.is_allowed());
}

#[tokio::test]
async fn scenario_c_sixty_first_call_in_the_hour_is_rate_limited() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine_with(POLICY, durable_counter(&dir));
    let start = at(9, 0);
    for i in 0..60 {
        let now = start + Duration::seconds(i * 50);
        let d = engine.admit("researcher", Priority::Normal, now).await.unwrap();
        assert!(d.is_allowed(), "call {i} denied: {d:?}");
    }
    let d = engine.admit("researcher", Priority::Normal, start + Duration::minutes(55)).await.unwrap();
    match d.deny_reason() {
        Some(DenyReason::RateLimited { scope, limit, .. }) => {
            assert_eq!(*scope, RateScope::Caller);
            assert_eq!(*limit, 60);
        }
        other => panic!("expected rate limit, got {other:?}"),
    }

    // The window rolls: once the first admission is an hour old, one slot frees up.
    let d = engine.admit("researcher", Priority::Normal, start + Duration::seconds(3601)).await.unwrap();
    assert!(d.is_allowed());
}

async fn hammer(engine: Arc<PolicyEngine>, calls: usize) -> usize {
    let now = at(12, 0);
    let mut tasks = Vec::with_capacity(calls);
    for _ in 0..calls {
        let engine = Arc::clone(&engine);
        tasks.push(tokio::spawn(async move {
            engine.admit("burst", Priority::Normal, now).await.unwrap().is_allowed()
        }));
    }
    let mut admitted = 0;
    for t in tasks {
        if t.await.unwrap() {
            admitted += 1;
        }
    }
    admitted
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_burst_never_overshoots_in_memory() {
    let engine = engine_with(POLICY, Arc::new(MemoryCounter::new()));
    assert_eq!(hammer(engine, 300).await, 60);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_burst_never_overshoots_in_store() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine_with(POLICY, durable_counter(&dir));
    assert_eq!(hammer(engine, 120).await, 60);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn two_processes_share_the_durable_quota() {
    let dir = tempfile::tempdir().unwrap();
    let a = engine_with(POLICY, durable_counter(&dir));
    let b = engine_with(POLICY, durable_counter(&dir));
    let (x, y) = tokio::join!(hammer(a, 50), hammer(b, 50));
    assert_eq!(x + y, 60);
}

/// Every decision must be explainable by exactly one snapshot.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn reload_racing_admissions_never_mixes_snapshots() {
    // Quiet-only: everything normal is blocked by quiet hours, quotas are huge.
    const QUIET_ONLY: &str = r#"
global: { calls_per_window: 100000 }
default_calls_per_window: 100000
quiet_hours: { start: "00:00", end: "23:59" }
"#;
    // Rate-only: no quiet hours, but the global quota is exhausted from the start.
    const RATE_ONLY: &str = r#"
global: { calls_per_window: 0 }
default_calls_per_window: 100000
"#;

    let engine = engine_with(QUIET_ONLY, Arc::new(MemoryCounter::new()));
    let mut kinds: HashMap<u64, &'static str> = HashMap::new();
    kinds.insert(engine.store().generation(), "quiet");

    let writer = {
        let store = Arc::clone(engine.store());
        tokio::spawn(async move {
            let mut seen = Vec::new();
            for i in 0..200 {
                let (src, kind) = if i % 2 == 0 { (RATE_ONLY, "rate") } else { (QUIET_ONLY, "quiet") };
                let g = store.replace(PolicyDocument::parse(src).unwrap()).unwrap();
                seen.push((g, kind));
                tokio::task::yield_now().await;
            }
            seen
        })
    };

    let mut readers = Vec::new();
    for _ in 0..4 {
        let engine = Arc::clone(&engine);
        readers.push(tokio::spawn(async move {
            let mut out = Vec::new();
            for _ in 0..300 {
                out.push(engine.admit("racer", Priority::Normal, at(12, 0)).await.unwrap());
                tokio::task::yield_now().await;
            }
            out
        }));
    }

    kinds.extend(writer.await.unwrap());
    for r in readers {
        for decision in r.await.unwrap() {
            let Admission::Deny { generation, reason } = decision else {
                panic!("nothing should be admitted under either policy");
            };
            match (kinds.get(&generation).copied(), reason) {
                (Some("quiet"), DenyReason::QuietHoursBlocked) => {}
                (Some("rate"), DenyReason::RateLimited { scope: RateScope::Global, .. }) => {}
                (kind, reason) => panic!("generation {generation} ({kind:?}) decided {reason:?}"),
            }
        }
    }
}
