//! Inbound operator messages.

use serde_json::Value;
use std::time::Duration;

use crate::error::{MenderError, Result};

/// One message from an operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inbound {
    pub sender: String,
    pub text: String,
}

impl Inbound {
    pub fn new(sender: &str, text: &str) -> Self {
        Self {
            sender: sender.to_string(),
            text: text.to_string(),
        }
    }
}

pub trait CommandChannel {
    /// Block for at most roughly `wait`, returning whatever arrived.
    fn poll(&self, wait: Duration) -> Result<Vec<Inbound>>;
}

// ---------------------------------------------------------------------------
// IdleChannel
// ---------------------------------------------------------------------------

/// A channel that never delivers anything; it only paces the daemon loop.
#[derive(Debug, Default)]
pub struct IdleChannel;

impl CommandChannel for IdleChannel {
    fn poll(&self, wait: Duration) -> Result<Vec<Inbound>> {
        std::thread::sleep(wait);
        Ok(Vec::new())
    }
}

// ---------------------------------------------------------------------------
// SignalChannel
// ---------------------------------------------------------------------------

/// Polls `GET <url>/v1/receive/<number>` on a Signal REST bridge.
pub struct SignalChannel {
    client: reqwest::blocking::Client,
    url: String,
    number: String,
}

impl SignalChannel {
    pub fn new(url: &str, number: &str) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .build()
            .map_err(|e| MenderError::Channel(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            url: url.trim_end_matches('/').to_string(),
            number: number.to_string(),
        })
    }
}

impl CommandChannel for SignalChannel {
    fn poll(&self, wait: Duration) -> Result<Vec<Inbound>> {
        let secs = wait.as_secs().max(1);
        let response = self
            .client
            .get(format!("{}/v1/receive/{}", self.url, self.number))
            .query(&[("timeout", secs.to_string())])
            .timeout(wait + Duration::from_secs(10))
            .send()
            .map_err(|e| MenderError::Channel(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(MenderError::Channel(format!("receive returned HTTP {status}")));
        }
        let body: Value = response
            .json()
            .map_err(|e| MenderError::Channel(format!("invalid receive payload: {e}")))?;
        Ok(parse_envelopes(&body))
    }
}

/// Extract sender and text from bridge envelopes. Reactions are delivered
/// as their emoji; removed reactions and receipts are dropped.
pub fn parse_envelopes(body: &Value) -> Vec<Inbound> {
    let Some(items) = body.as_array() else {
        return Vec::new();
    };
    items.iter().filter_map(parse_envelope).collect()
}

fn parse_envelope(item: &Value) -> Option<Inbound> {
    let envelope = item.get("envelope")?;
    let sender = envelope.get("source").and_then(Value::as_str)?.to_string();

    let candidates = [
        envelope.get("dataMessage"),
        envelope.get("syncMessage").and_then(|s| s.get("sentMessage")),
    ];
    for msg in candidates.into_iter().flatten() {
        if let Some(reaction) = msg.get("reaction") {
            if reaction.get("isRemove").and_then(Value::as_bool) == Some(true) {
                return None;
            }
            if let Some(emoji) = reaction.get("emoji").and_then(Value::as_str) {
                return Some(Inbound::new(&sender, emoji));
            }
        }
        if let Some(text) = msg.get("message").and_then(Value::as_str) {
            if !text.trim().is_empty() {
                return Some(Inbound::new(&sender, text));
            }
        }
    }
    None
}

// ---------------------------------------------------------------------------
// AuthorizedChannel
// ---------------------------------------------------------------------------

/// Drops messages whose sender is not on the allowlist. An empty allowlist
/// authorizes nobody.
pub struct AuthorizedChannel {
    inner: Box<dyn CommandChannel>,
    authorized: Vec<String>,
}

impl AuthorizedChannel {
    pub fn new(inner: Box<dyn CommandChannel>, authorized: Vec<String>) -> Self {
        if authorized.is_empty() {
            tracing::warn!("no authorized senders configured, all inbound commands will be ignored");
        }
        Self { inner, authorized }
    }
}

impl CommandChannel for AuthorizedChannel {
    fn poll(&self, wait: Duration) -> Result<Vec<Inbound>> {
        let mut messages = self.inner.poll(wait)?;
        messages.retain(|m| {
            let ok = self.authorized.iter().any(|a| a == &m.sender);
            if !ok {
                tracing::warn!(sender = %m.sender, "ignoring message from unauthorized sender");
            }
            ok
        });
        Ok(messages)
    }
}
