//! Built-in inbox consumer that runs a CLI per message.
//!
//! argv placeholders: `{agent}`, `{message}`, `{session}`. No shell is
//! involved; each element is passed as one argument.

use std::process::Stdio;

use serde_json::Value;
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use hermes_core::error::{BridgeError, Result};
use hermes_core::model::{Message, Reply};

use super::registry::InboxRequest;

const MAX_STDERR: usize = 500;

#[derive(Debug, Clone)]
pub struct CommandInbox {
    name: String,
    argv: Vec<String>,
}

impl CommandInbox {
    pub fn new(name: impl Into<String>, argv: Vec<String>) -> Self {
        Self { name: name.into(), argv }
    }

    /// Consume `rx` until it closes or `cancel` fires. Messages are handled in order.
    pub fn spawn(self, mut rx: mpsc::Receiver<InboxRequest>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            tracing::info!(inbox = %self.name, "command inbox started");
            loop {
                let req = tokio::select! {
                    _ = cancel.cancelled() => break,
                    r = rx.recv() => match r {
                        Some(r) => r,
                        None => break,
                    },
                };
                let InboxRequest { message, mut reply } = req;
                if reply.is_closed() {
                    tracing::debug!(inbox = %self.name, session = %message.session_id, "caller already gone; skipping");
                    continue;
                }
                // Dropping the run future kills the child (kill_on_drop).
                let result = tokio::select! {
                    r = self.run(&message) => r,
                    _ = reply.closed() => {
                        tracing::warn!(inbox = %self.name, session = %message.session_id, "caller gave up; command killed");
                        continue;
                    }
                };
                let _ = reply.send(result);
            }
            tracing::info!(inbox = %self.name, "command inbox stopped");
        })
    }

    fn render_argv(&self, message: &Message) -> Vec<String> {
        let text = message.text();
        self.argv
            .iter()
            .map(|a| {
                a.replace("{agent}", &self.name)
                    .replace("{session}", &message.session_id)
                    .replace("{message}", &text)
            })
            .collect()
    }

    async fn run(&self, message: &Message) -> Result<Reply> {
        let argv = self.render_argv(message);
        let Some((program, args)) = argv.split_first() else {
            return Err(BridgeError::Internal(format!("inbox {} has an empty argv", self.name)));
        };

        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| BridgeError::Upstream(format!("failed to start {program}: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stderr: String = stderr.trim().chars().take(MAX_STDERR).collect();
            tracing::error!(inbox = %self.name, status = %output.status, "command failed");
            return Err(BridgeError::Upstream(format!("{program} exited with {}: {stderr}", output.status)));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let mut reply = parse_output(&stdout);
        reply.session_id = Some(message.session_id.clone());
        Ok(reply)
    }
}

/// Lenient CLI output parsing: tolerate log lines before the JSON object.
pub fn parse_output(raw: &str) -> Reply {
    let raw = raw.trim();
    let json = match raw.find("\n{") {
        Some(i) => &raw[i + 1..],
        None => raw,
    };
    match serde_json::from_str::<Value>(json) {
        Ok(v) if v.is_object() => reply_from_json(&v),
        _ => Reply::text(raw.chars().take(2000).collect::<String>()),
    }
}

fn reply_from_json(v: &Value) -> Reply {
    let cost_usd = v.get("cost_usd").and_then(Value::as_f64);

    let payload_text = v
        .pointer("/result/payloads")
        .and_then(Value::as_array)
        .map(|ps| {
            ps.iter()
                .filter_map(|p| p.get("text").and_then(Value::as_str))
                .filter(|t| !t.is_empty())
                .collect::<Vec<_>>()
                .join("\n")
        })
        .filter(|t| !t.is_empty());

    let text = payload_text.or_else(|| {
        ["result", "response", "output", "text", "summary"]
            .iter()
            .find_map(|k| v.get(*k).and_then(Value::as_str).map(str::to_string))
    });

    Reply {
        response: text.map(Value::String).unwrap_or_else(|| v.clone()),
        cost_usd,
        session_id: None,
    }
}
