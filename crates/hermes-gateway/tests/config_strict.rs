#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use hermes_gateway::config::{self, RateLimitBackend};

#[test]
fn deny_unknown_fields_nested() {
    let bad = r#"
version: 1
delivery:
  workerz: 2 # typo should fail
"#;

    let err = config::load_from_str(bad).expect_err("must fail");
    assert_eq!(err.client_code().as_str(), "BAD_REQUEST");
}

#[test]
fn ok_minimal_config() {
    let cfg = config::load_from_str("version: 1\n").expect("must parse");
    assert_eq!(cfg.version, 1);
    assert_eq!(cfg.gateway.listen, "0.0.0.0:8787");
    assert_eq!(cfg.gateway.drain_grace_ms, 5_000);
    assert_eq!(cfg.rate_limit.backend, RateLimitBackend::Store);
    assert_eq!(cfg.delivery.max_attempts, 5);
    assert!(cfg.agents.is_empty());
    assert!(cfg.coordinator.is_none());
}

#[test]
fn full_config_round_trips_sections() {
    let ok = r#"
version: 1
gateway:
  listen: "127.0.0.1:9000"
  dispatch_timeout_ms: 5000
  drain_grace_ms: 0
store:
  path: "/var/lib/hermes/hermes.db"
policy:
  path: "hermes_policy.yaml"
  reload_interval_ms: 0
rate_limit:
  backend: memory
workflow:
  base_url: "http://n8n:5678"
  signing_secret_env: "HERMES_SIGNING_SECRET"
delivery:
  workers: 2
  max_attempts: 3
  base_delay_ms: 1000
  max_delay_ms: 8000
audit:
  jsonl_path: "audit.jsonl"
alerts:
  webhook_url: "http://n8n:5678/webhook/agent-alert"
agents:
  - id: researcher
    command:
      argv: ["openclaw", "agent", "--agent", "{agent}", "--message", "{message}"]
  - id: planner
coordinator:
  argv: ["claude", "-p", "{message}", "--output-format", "json"]
"#;
    let cfg = config::load_from_str(ok).expect("must parse");
    assert_eq!(cfg.rate_limit.backend, RateLimitBackend::Memory);
    assert_eq!(cfg.gateway.drain_grace_ms, 0);
    assert_eq!(cfg.delivery.workers, 2);
    assert_eq!(cfg.agents.len(), 2);
    assert!(cfg.agents[1].command.is_none());
    assert_eq!(cfg.coordinator.unwrap().argv[0], "claude");
}

#[test]
fn rejects_wrong_version() {
    let err = config::load_from_str("version: 2\n").unwrap_err();
    assert!(err.to_string().contains("version"));
}

#[test]
fn rejects_duplicate_agents() {
    let bad = r#"
version: 1
agents:
  - id: researcher
  - id: researcher
"#;
    let err = config::load_from_str(bad).unwrap_err();
    assert!(err.to_string().contains("duplicate agent id"));
}

#[test]
fn lease_must_outlast_request_timeout() {
    let bad = r#"
version: 1
delivery:
  lease_ms: 5000
  request_timeout_ms: 5000
"#;
    let err = config::load_from_str(bad).unwrap_err();
    assert!(err.to_string().contains("lease_ms"));
}

#[test]
fn backoff_cap_must_cover_base() {
    let bad = r#"
version: 1
delivery:
  base_delay_ms: 10000
  max_delay_ms: 5000
"#;
    assert!(config::load_from_str(bad).is_err());
}

#[test]
fn drain_grace_is_bounded() {
    let err = config::load_from_str("version: 1\ngateway:\n  drain_grace_ms: 600000\n").unwrap_err();
    assert!(err.to_string().contains("drain_grace_ms"));
}
