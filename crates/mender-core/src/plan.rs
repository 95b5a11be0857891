use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::executor::ExecutionResult;
use crate::issue::Issue;
use crate::types::{PlanStatus, Severity};

pub const DEFAULT_STEP_TIMEOUT_SECS: u64 = 60;

fn default_step_timeout() -> u64 {
    DEFAULT_STEP_TIMEOUT_SECS
}

fn default_true() -> bool {
    true
}

fn default_risk() -> String {
    "unknown".to_string()
}

fn default_schema_version() -> String {
    "1.0".to_string()
}

/// One ordered remediation step. A step without a command is informational.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    pub step: u32,
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default = "default_step_timeout")]
    pub timeout_seconds: u64,
    #[serde(default = "default_true")]
    pub reversible: bool,
}

impl PlanStep {
    pub fn new(step: u32, action: &str, command: Option<&str>) -> Self {
        Self {
            step,
            action: action.to_string(),
            command: command.map(str::to_string),
            timeout_seconds: DEFAULT_STEP_TIMEOUT_SECS,
            reversible: true,
        }
    }
}

/// A validated candidate plan: everything the analysis produced plus the
/// triggering issues, before an id and lifecycle state are assigned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanDraft {
    #[serde(default = "default_schema_version")]
    pub schema_version: String,
    pub summary: String,
    pub severity: Severity,
    pub confidence: f64,
    #[serde(default)]
    pub root_cause: String,
    #[serde(default)]
    pub evidence: Vec<String>,
    #[serde(default = "default_risk")]
    pub risk: String,
    #[serde(default)]
    pub prechecks: Vec<String>,
    #[serde(default, alias = "plan")]
    pub steps: Vec<PlanStep>,
    #[serde(default)]
    pub postchecks: Vec<String>,
    #[serde(default)]
    pub rollback: Vec<String>,
    #[serde(default)]
    pub do_not_execute_if: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default)]
    pub fingerprints: Vec<String>,
    #[serde(default)]
    pub trigger_issues: Vec<Issue>,
}

impl PlanDraft {
    pub fn new(summary: &str, severity: Severity, confidence: f64) -> Self {
        Self {
            schema_version: default_schema_version(),
            summary: summary.to_string(),
            severity,
            confidence,
            root_cause: String::new(),
            evidence: Vec::new(),
            risk: default_risk(),
            prechecks: Vec::new(),
            steps: Vec::new(),
            postchecks: Vec::new(),
            rollback: Vec::new(),
            do_not_execute_if: Vec::new(),
            notes: None,
            fingerprints: Vec::new(),
            trigger_issues: Vec::new(),
        }
    }

    /// Attach the issues this plan answers; fingerprints are derived from them.
    pub fn with_triggers(mut self, issues: &[Issue]) -> Self {
        self.fingerprints = issues.iter().map(Issue::fingerprint).collect();
        self.trigger_issues = issues.to_vec();
        self
    }

    pub fn with_step(mut self, step: PlanStep) -> Self {
        self.steps.push(step);
        self
    }
}

/// A persisted remediation plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub plan_id: String,
    pub status: PlanStatus,
    #[serde(flatten)]
    pub draft: PlanDraft,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejected_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notification_timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ExecutionResult>,
}

impl Plan {
    /// Sorted, de-duplicated fingerprints of the triggering issues.
    pub fn signature(&self) -> Vec<String> {
        let mut sig = self.draft.fingerprints.clone();
        sig.sort();
        sig.dedup();
        sig
    }

    pub fn summary(&self) -> &str {
        &self.draft.summary
    }

    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.created_at
    }
}

/// Extra fields carried by a status transition.
#[derive(Debug, Clone, Default)]
pub struct PlanUpdate {
    pub reason: Option<String>,
    pub result: Option<ExecutionResult>,
}

impl PlanUpdate {
    pub fn reason(reason: impl Into<String>) -> Self {
        Self {
            reason: Some(reason.into()),
            result: None,
        }
    }

    pub fn result(result: ExecutionResult) -> Self {
        Self {
            reason: None,
            result: Some(result),
        }
    }
}
