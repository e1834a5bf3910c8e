//! Operator alerts for terminally failed deliveries.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::obs::BridgeMetrics;
use crate::webhook::WebhookClient;

const ALERT_TIMEOUT: Duration = Duration::from_secs(10);
const ALERT_AGENT: &str = "hermes-bridge";

#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub agent: &'static str,
    pub severity: &'static str,
    pub title: String,
    pub details: String,
    pub tags: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

impl Alert {
    pub fn critical(title: impl Into<String>, details: impl Into<String>, tags: Vec<String>, at: DateTime<Utc>) -> Self {
        Self {
            agent: ALERT_AGENT,
            severity: "critical",
            title: title.into(),
            details: details.into(),
            tags,
            timestamp: at,
        }
    }
}

/// Always logs; posts to the alert webhook when one is configured.
#[derive(Clone)]
pub struct Alerter {
    client: WebhookClient,
    webhook_url: Option<String>,
    metrics: Arc<BridgeMetrics>,
}

impl Alerter {
    pub fn new(client: WebhookClient, webhook_url: Option<String>, metrics: Arc<BridgeMetrics>) -> Self {
        Self { client, webhook_url, metrics }
    }

    /// Best effort: a failed alert post is logged, never returned.
    pub async fn raise(&self, alert: Alert) {
        tracing::error!(title = %alert.title, details = %alert.details, tags = ?alert.tags, "ALERT");

        let Some(url) = &self.webhook_url else {
            self.metrics.alerts.inc(&[("sink", "log")]);
            return;
        };
        let body = match serde_json::to_value(&alert) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "failed to encode alert");
                return;
            }
        };
        match self.client.post_json(url, &body, &[], ALERT_TIMEOUT).await {
            Ok(_) => self.metrics.alerts.inc(&[("sink", "webhook")]),
            Err(e) => {
                self.metrics.alerts.inc(&[("sink", "webhook_failed")]);
                tracing::warn!(error = %e, "alert webhook post failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn posts_critical_alert() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/alerts"))
            .and(body_partial_json(json!({"agent": "hermes-bridge", "severity": "critical", "title": "t"})))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let metrics = Arc::new(BridgeMetrics::default());
        let alerter = Alerter::new(
            WebhookClient::new(None).unwrap(),
            Some(format!("{}/alerts", server.uri())),
            Arc::clone(&metrics),
        );
        alerter.raise(Alert::critical("t", "d", vec!["outbox".into()], Utc::now())).await;
        assert_eq!(metrics.alerts.get(&[("sink", "webhook")]), 1);
    }

    #[tokio::test]
    async fn log_only_without_url() {
        let metrics = Arc::new(BridgeMetrics::default());
        let alerter = Alerter::new(WebhookClient::new(None).unwrap(), None, Arc::clone(&metrics));
        alerter.raise(Alert::critical("t", "d", vec![], Utc::now())).await;
        assert_eq!(metrics.alerts.get(&[("sink", "log")]), 1);
    }
}
