use std::time::Duration;

use hermes_core::error::{BridgeError, Result};
use hermes_core::model::{Message, Reply};

use crate::policy::snapshot::join_url;
use crate::webhook::WebhookClient;

/// Signed synchronous calls into the workflow engine.
#[derive(Debug, Clone)]
pub struct WorkflowDispatch {
    client: WebhookClient,
    base_url: String,
    timeout: Duration,
}

impl WorkflowDispatch {
    pub fn new(client: WebhookClient, base_url: impl Into<String>, timeout: Duration) -> Self {
        Self { client, base_url: base_url.into(), timeout }
    }

    /// Full URL for a workflow path; malformed paths are unknown targets.
    pub fn resolve(&self, path: &str) -> Result<String> {
        let p = path.trim();
        let malformed = p.is_empty()
            || p.contains("://")
            || p.contains("..")
            || p.chars().any(|c| c.is_whitespace() || c == '?' || c == '#');
        if malformed {
            return Err(BridgeError::UnknownTarget(format!("malformed workflow path: {path:?}")));
        }
        Ok(join_url(&self.base_url, p))
    }

    pub async fn call(&self, url: &str, message: &Message) -> Result<Reply> {
        let headers = [
            ("X-Hermes-Caller", message.caller.clone()),
            ("X-Hermes-Priority", message.priority.as_str().to_string()),
        ];
        let resp = self.client.post_json(url, &message.body, &headers, self.timeout).await?;
        Ok(Reply { response: resp.body, cost_usd: None, session_id: None })
    }
}
