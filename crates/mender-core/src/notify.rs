use serde::Serialize;
use std::time::Duration;

use crate::error::{MenderError, Result};
use crate::plan::Plan;
use crate::types::PlanStatus;

/// Outbound operator messages. Delivery failures are returned to the caller,
/// which logs them; they never change plan state.
pub trait Notifier {
    fn notify_plan(&self, plan: &Plan) -> Result<()>;
    fn notify_result(&self, plan: &Plan) -> Result<()>;
    fn send_text(&self, text: &str) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Message formatting
// ---------------------------------------------------------------------------

pub fn format_plan_message(plan: &Plan) -> String {
    let d = &plan.draft;
    let steps: String = d
        .steps
        .iter()
        .map(|s| format!("  {}. {}\n", s.step, s.action))
        .collect();
    let root_cause = if d.root_cause.is_empty() {
        "unknown"
    } else {
        d.root_cause.as_str()
    };
    format!(
        "🔔 [{sev}] {summary}\n\n\
         Plan ID: {id}\n\
         Severity: {severity}\n\
         Confidence: {conf:.0}%\n\n\
         Root cause: {root_cause}\n\n\
         Proposed actions:\n{steps}\n\
         Risk: {risk}\n\n\
         Reply with:\n\
         • \"approve {id}\" to execute\n\
         • \"reject {id}\" to dismiss\n\
         • \"status\" to list pending plans",
        sev = d.severity.as_str().to_uppercase(),
        summary = d.summary,
        id = plan.plan_id,
        severity = d.severity,
        conf = d.confidence * 100.0,
        risk = d.risk,
    )
}

pub fn format_result_message(plan: &Plan) -> String {
    let summary = plan.summary();
    let id = &plan.plan_id;
    let detail = plan
        .result
        .as_ref()
        .map(|r| r.describe())
        .unwrap_or_else(|| "no result recorded".to_string());
    match plan.status {
        PlanStatus::Completed => format!("✅ [FIXED] {summary}\n\nPlan {id} executed: {detail}."),
        PlanStatus::Failed => format!("❌ [FAILED] {summary}\n\nPlan {id} failed.\nError: {detail}"),
        PlanStatus::Rejected => format!(
            "🚫 [CLOSED] {summary}\n\nPlan {id} rejected: {}",
            plan.rejection_reason.as_deref().unwrap_or("no reason given")
        ),
        status => format!("ℹ️ {summary}\n\nPlan {id} is {status}."),
    }
}

// ---------------------------------------------------------------------------
// LogNotifier
// ---------------------------------------------------------------------------

/// Writes every message to the log. Used when no webhook is configured.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify_plan(&self, plan: &Plan) -> Result<()> {
        tracing::info!(plan_id = %plan.plan_id, "{}", format_plan_message(plan));
        Ok(())
    }

    fn notify_result(&self, plan: &Plan) -> Result<()> {
        tracing::info!(plan_id = %plan.plan_id, "{}", format_result_message(plan));
        Ok(())
    }

    fn send_text(&self, text: &str) -> Result<()> {
        tracing::info!("{text}");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// WebhookNotifier
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct SendRequest<'a> {
    number: &'a str,
    recipients: &'a [String],
    message: &'a str,
}

/// POSTs `{number, recipients, message}` to `<url>/v1/send`, the shape a
/// Signal REST bridge expects.
pub struct WebhookNotifier {
    client: reqwest::blocking::Client,
    url: String,
    number: String,
    recipients: Vec<String>,
}

impl WebhookNotifier {
    pub fn new(url: &str, number: &str, recipients: Vec<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| MenderError::Notification(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            url: url.trim_end_matches('/').to_string(),
            number: number.to_string(),
            recipients,
        })
    }

    fn send(&self, message: &str) -> Result<()> {
        let body = SendRequest {
            number: &self.number,
            recipients: &self.recipients,
            message,
        };
        let response = self
            .client
            .post(format!("{}/v1/send", self.url))
            .json(&body)
            .send()
            .map_err(|e| MenderError::Notification(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().unwrap_or_default();
            return Err(MenderError::Notification(format!(
                "HTTP {status}: {}",
                text.chars().take(200).collect::<String>()
            )));
        }
        tracing::debug!(chars = message.chars().count(), "notification delivered");
        Ok(())
    }
}

impl Notifier for WebhookNotifier {
    fn notify_plan(&self, plan: &Plan) -> Result<()> {
        self.send(&format_plan_message(plan))
    }

    fn notify_result(&self, plan: &Plan) -> Result<()> {
        self.send(&format_result_message(plan))
    }

    fn send_text(&self, text: &str) -> Result<()> {
        self.send(text)
    }
}
