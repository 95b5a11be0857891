use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Fields consulted, in order, for the identifying part of a fingerprint.
pub const IDENTIFIER_FIELDS: &[&str] = &["container", "mount", "service", "unit", "path", "name"];

/// One detected abnormal condition reported by an evidence source.
///
/// Only `source`, `type` and `message` are interpreted by the engine. Every
/// other field a collector reports is kept in `extra` and written back out
/// unchanged, so plans carry the full trigger record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    #[serde(default = "unknown")]
    pub source: String,
    #[serde(rename = "type", default = "unknown")]
    pub issue_type: String,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

fn unknown() -> String {
    "unknown".to_string()
}

impl Issue {
    pub fn new(source: &str, issue_type: &str, message: &str) -> Self {
        Self {
            source: source.to_string(),
            issue_type: issue_type.to_string(),
            message: message.to_string(),
            severity: None,
            extra: BTreeMap::new(),
        }
    }

    /// Builder-style setter for an identifying or descriptive field.
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.extra.insert(key.to_string(), value.into());
        self
    }

    /// String value of an extra field, if present and scalar.
    pub fn field(&self, key: &str) -> Option<String> {
        match self.extra.get(key)? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(true) => Some("true".to_string()),
            _ => None,
        }
    }

    /// First present identifier among [`IDENTIFIER_FIELDS`].
    pub fn identifier(&self) -> Option<String> {
        IDENTIFIER_FIELDS.iter().find_map(|k| self.field(k))
    }

    /// Stable key `source:type:identifier`. Depends only on the issue record,
    /// so the same condition maps to the same key across restarts.
    pub fn fingerprint(&self) -> String {
        let identifier = self
            .identifier()
            .unwrap_or_else(unknown)
            .replace([':', '/'], "_");
        format!("{}:{}:{}", self.source, self.issue_type, identifier)
    }
}

/// Snapshot of host state gathered in one collection pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evidence {
    pub timestamp: DateTime<Utc>,
    pub hostname: String,
    #[serde(default)]
    pub issues: Vec<Issue>,
    #[serde(default)]
    pub metrics: BTreeMap<String, Value>,
}

impl Evidence {
    pub fn new(hostname: &str, timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            hostname: hostname.to_string(),
            issues: Vec::new(),
            metrics: BTreeMap::new(),
        }
    }

    pub fn has_issues(&self) -> bool {
        !self.issues.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
