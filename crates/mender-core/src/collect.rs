use chrono::{DateTime, Utc};
use serde_json::Value;
use std::time::Duration;

use crate::error::{MenderError, Result};
use crate::issue::{Evidence, Issue};
use crate::runner::{CommandRunner, ShellRunner};

pub const COLLECTOR_ERROR: &str = "collector_error";

/// What one source reported in one pass.
#[derive(Debug, Clone, Default)]
pub struct SourceReport {
    pub issues: Vec<Issue>,
    pub metrics: Value,
}

/// Produces the issues and metrics of one area of the host.
pub trait EvidenceSource {
    fn name(&self) -> &str;
    fn collect(&self) -> Result<SourceReport>;
}

/// Runs a shell command that prints `{"issues": [...], "metrics": {...}}`.
pub struct CommandSource {
    name: String,
    command: String,
    timeout: Duration,
}

impl CommandSource {
    pub fn new(name: &str, command: &str, timeout: Duration) -> Self {
        Self {
            name: name.to_string(),
            command: command.to_string(),
            timeout,
        }
    }

    fn error(&self, message: impl Into<String>) -> MenderError {
        MenderError::Collector {
            source_name: self.name.clone(),
            message: message.into(),
        }
    }
}

impl EvidenceSource for CommandSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn collect(&self) -> Result<SourceReport> {
        let out = ShellRunner.run(&self.command, self.timeout);
        if out.timed_out {
            return Err(self.error(format!("timed out after {}s", self.timeout.as_secs())));
        }
        if !out.success {
            let detail = out.stderr.trim();
            return Err(self.error(format!(
                "exit {}: {}",
                out.return_code.map_or("?".to_string(), |c| c.to_string()),
                if detail.is_empty() { "no output" } else { detail }
            )));
        }
        parse_report(&self.name, &out.stdout).map_err(|m| self.error(m))
    }
}

/// Parse collector output, filling a missing `source` with the collector name.
pub fn parse_report(source_name: &str, stdout: &str) -> std::result::Result<SourceReport, String> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Ok(SourceReport::default());
    }
    let mut doc: Value =
        serde_json::from_str(trimmed).map_err(|e| format!("invalid JSON output: {e}"))?;
    let Some(obj) = doc.as_object_mut() else {
        return Err("output is not a JSON object".into());
    };

    let mut issues = Vec::new();
    if let Some(Value::Array(raw)) = obj.remove("issues") {
        for mut item in raw {
            let Some(fields) = item.as_object_mut() else {
                return Err("issue entry is not an object".into());
            };
            fields
                .entry("source")
                .or_insert_with(|| Value::String(source_name.to_string()));
            let issue: Issue =
                serde_json::from_value(item).map_err(|e| format!("malformed issue: {e}"))?;
            issues.push(issue);
        }
    }

    Ok(SourceReport {
        issues,
        metrics: obj.remove("metrics").unwrap_or(Value::Null),
    })
}

/// Run every source once. A failing source becomes a `collector_error`
/// issue instead of aborting the pass.
pub fn collect_all(
    sources: &[Box<dyn EvidenceSource>],
    hostname: &str,
    now: DateTime<Utc>,
) -> Evidence {
    let mut evidence = Evidence::new(hostname, now);
    for source in sources {
        match source.collect() {
            Ok(report) => {
                tracing::debug!(source = source.name(), issues = report.issues.len(), "collected");
                evidence.issues.extend(report.issues);
                evidence
                    .metrics
                    .insert(source.name().to_string(), report.metrics);
            }
            Err(e) => {
                tracing::error!(source = source.name(), error = %e, "collector failed");
                evidence
                    .issues
                    .push(Issue::new(source.name(), COLLECTOR_ERROR, &e.to_string()));
            }
        }
    }
    evidence
}
