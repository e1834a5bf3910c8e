//! Outbox drain against real HTTP consumers.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_partial_json, header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use hermes_core::clock::{Clock, ManualClock};
use hermes_core::model::{EventStatus, NewEvent};
use hermes_gateway::delivery::{Alerter, DeliveryDeps, DeliveryWorker, RetryPolicy, WorkerSettings};
use hermes_gateway::obs::BridgeMetrics;
use hermes_gateway::storage::{Outbox, SqliteStore};
use hermes_gateway::webhook::WebhookClient;

struct Rig {
    _dir: tempfile::TempDir,
    store: SqliteStore,
    clock: ManualClock,
    deps: DeliveryDeps,
}

fn rig() -> Rig {
    let dir = tempfile::tempdir().unwrap();
    let store = SqliteStore::open(dir.path().join("hermes.db")).unwrap();
    let clock = ManualClock::new(Utc::now());
    let metrics = Arc::new(BridgeMetrics::default());
    let client = WebhookClient::new(Some("test-secret".into())).unwrap();
    let deps = DeliveryDeps {
        outbox: Arc::new(store.clone()),
        client: client.clone(),
        alerter: Alerter::new(client, None, Arc::clone(&metrics)),
        metrics,
        clock: Arc::new(clock.clone()),
    };
    Rig { _dir: dir, store, clock, deps }
}

fn worker(rig: &Rig, id: usize) -> DeliveryWorker {
    worker_with_attempts(rig, id, 5)
}

fn worker_with_attempts(rig: &Rig, id: usize, max_attempts: u32) -> DeliveryWorker {
    let retry = RetryPolicy {
        max_attempts,
        base_delay: Duration::from_secs(5),
        max_delay: Duration::from_secs(300),
        jitter: 0.0,
    };
    let settings = WorkerSettings {
        batch_size: 20,
        poll_interval: Duration::from_millis(50),
        lease: Duration::from_secs(60),
        request_timeout: Duration::from_secs(5),
    };
    DeliveryWorker::new(id, rig.deps.clone(), retry, settings)
}

#[tokio::test]
async fn scenario_d_event_survives_consumer_outage() {
    let rig = rig();
    let w = worker(&rig, 0);
    let addr = {
        let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        l.local_addr().unwrap()
    };
    let url = format!("http://{addr}/webhook/hermes-events");
    let id = rig
        .store
        .enqueue(NewEvent::new("task.created", "planner", json!({"task_id": 7})), url, rig.clock.now())
        .await
        .unwrap();

    // Endpoint down: stays pending, attempts untouched.
    let report = w.run_once(&CancellationToken::new()).await.unwrap();
    assert_eq!(report.deferred, 1);
    let ev = rig.store.get(id).await.unwrap().unwrap();
    assert_eq!(ev.status, EventStatus::Pending);
    assert_eq!(ev.attempts, 0);
    assert!(ev.last_error.is_some());

    // Endpoint back on the same address.
    let listener = std::net::TcpListener::bind(addr).unwrap();
    let server = MockServer::builder().listener(listener).start().await;
    Mock::given(method("POST"))
        .and(path("/webhook/hermes-events"))
        .and(header_exists("x-hermes-event-id"))
        .and(header_exists("x-hermes-signature"))
        .and(body_partial_json(json!({"event_type": "task.created", "source": "planner", "attempt": 1})))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    // Not due until the outage delay passes.
    assert_eq!(w.run_once(&CancellationToken::new()).await.unwrap().claimed, 0);
    rig.clock.advance(chrono::Duration::seconds(6));

    let report = w.run_once(&CancellationToken::new()).await.unwrap();
    assert_eq!(report.delivered, 1);
    let ev = rig.store.get(id).await.unwrap().unwrap();
    assert_eq!(ev.status, EventStatus::Delivered);

    // Re-draining never calls the consumer again.
    rig.clock.advance(chrono::Duration::minutes(10));
    assert_eq!(w.run_once(&CancellationToken::new()).await.unwrap().claimed, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_workers_deliver_each_event_once() {
    let rig = rig();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(12)
        .mount(&server)
        .await;

    for i in 0..12 {
        rig.store
            .enqueue(NewEvent::new(format!("type.{i}"), "planner", json!({})), server.uri(), rig.clock.now())
            .await
            .unwrap();
    }

    let (a, b, c) = (worker(&rig, 0), worker(&rig, 1), worker(&rig, 2));
    let cancel = CancellationToken::new();
    let (ra, rb, rc) = tokio::join!(a.run_once(&cancel), b.run_once(&cancel), c.run_once(&cancel));
    let delivered = ra.unwrap().delivered + rb.unwrap().delivered + rc.unwrap().delivered;
    assert_eq!(delivered, 12);
    assert_eq!(rig.store.counts().await.unwrap().delivered, 12);
}

#[tokio::test]
async fn partition_order_holds_behind_a_failing_head() {
    let rig = rig();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({"payload": {"n": 1}})))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let first = rig
        .store
        .enqueue(NewEvent::new("task.created", "planner", json!({"n": 1})), server.uri(), rig.clock.now())
        .await
        .unwrap();
    let second = rig
        .store
        .enqueue(NewEvent::new("task.created", "planner", json!({"n": 2})), server.uri(), rig.clock.now())
        .await
        .unwrap();

    let w = worker(&rig, 0);
    let report = w.run_once(&CancellationToken::new()).await.unwrap();
    assert_eq!((report.claimed, report.retried), (1, 1));
    assert_eq!(rig.store.get(second).await.unwrap().unwrap().status, EventStatus::Pending);

    rig.clock.advance(chrono::Duration::seconds(6));
    w.run_once(&CancellationToken::new()).await.unwrap();
    assert_eq!(rig.store.get(first).await.unwrap().unwrap().status, EventStatus::Delivered);

    w.run_once(&CancellationToken::new()).await.unwrap();
    assert_eq!(rig.store.get(second).await.unwrap().unwrap().status, EventStatus::Delivered);
}

#[tokio::test]
async fn crashed_worker_lease_is_taken_over_after_expiry() {
    let rig = rig();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    let id = rig
        .store
        .enqueue(NewEvent::new("task.created", "planner", json!({})), server.uri(), rig.clock.now())
        .await
        .unwrap();

    // A worker claims the row and dies before calling out.
    let claimed = rig
        .store
        .claim_due("dead-worker", rig.clock.now(), chrono::Duration::seconds(60), 10)
        .await
        .unwrap();
    assert_eq!(claimed.len(), 1);

    let w = worker(&rig, 0);
    assert_eq!(w.run_once(&CancellationToken::new()).await.unwrap().claimed, 0);

    rig.clock.advance(chrono::Duration::seconds(61));
    assert_eq!(w.run_once(&CancellationToken::new()).await.unwrap().delivered, 1);
    assert_eq!(rig.store.get(id).await.unwrap().unwrap().status, EventStatus::Delivered);

    // The dead worker's late completion is rejected.
    assert!(!rig.store.mark_delivered(id, "dead-worker", rig.clock.now()).await.unwrap());
}

/// Reads each request, then closes the socket without a response.
async fn hang_up_consumer() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut sock, _)) = listener.accept().await {
            let mut buf = [0u8; 4096];
            let _ = sock.read(&mut buf).await;
        }
    });
    format!("http://{addr}/webhook/hermes-events")
}

#[tokio::test]
async fn consumer_dropping_requests_exhausts_attempts_and_alerts() {
    let rig = rig();
    let url = hang_up_consumer().await;
    let id = rig
        .store
        .enqueue(NewEvent::new("task.created", "planner", json!({})), url, rig.clock.now())
        .await
        .unwrap();
    let w = worker_with_attempts(&rig, 0, 2);

    let report = w.run_once(&CancellationToken::new()).await.unwrap();
    assert_eq!((report.retried, report.deferred), (1, 0));
    let ev = rig.store.get(id).await.unwrap().unwrap();
    assert_eq!((ev.status, ev.attempts), (EventStatus::Pending, 1));

    rig.clock.advance(chrono::Duration::seconds(6));
    let report = w.run_once(&CancellationToken::new()).await.unwrap();
    assert_eq!(report.failed, 1);
    let ev = rig.store.get(id).await.unwrap().unwrap();
    assert_eq!((ev.status, ev.attempts), (EventStatus::Failed, 2));
    assert_eq!(rig.deps.metrics.alerts.get(&[("sink", "log")]), 1);

    // Terminal: nothing left to claim.
    rig.clock.advance(chrono::Duration::minutes(10));
    assert_eq!(w.run_once(&CancellationToken::new()).await.unwrap().claimed, 0);
}
