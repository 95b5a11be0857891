//! Turning evidence into candidate plans.
//!
//! An [`Analyzer`] returns raw JSON (validated later by
//! [`crate::validate::validate`]) or an explicit refusal. The command-line
//! analyzer shells out to an external model CLI; the playbook analyzer knows
//! a handful of canned fixes and serves as the fallback.

use regex::Regex;
use serde_json::{json, Value};
use std::sync::OnceLock;
use std::time::Duration;

use crate::error::{MenderError, Result};
use crate::issue::{Evidence, Issue};
use crate::runner::run_argv;

pub const PROMPT_TOKEN: &str = "{prompt}";

const INSTRUCTIONS: &str = r#"You are the on-call operator for a single Linux host.
Read the evidence below and propose a remediation plan. Prefer the smallest
reversible action. Never touch data volumes. Every command will be reviewed
by a human before it runs.

Reply with one JSON object and nothing else:

{
  "plan_schema_version": "1.0",
  "summary": "<one sentence>",
  "severity": "info|warning|critical",
  "confidence": 0.0,
  "root_cause": "<grounded in the evidence>",
  "evidence": ["<log line, metric or fact>"],
  "risk": "low|medium|high",
  "prechecks": ["<read-only command that must succeed first>"],
  "plan": [
    {"step": 1, "action": "<what>", "command": "<exact command or null>",
     "timeout_seconds": 60, "reversible": true}
  ],
  "postchecks": ["<command verifying the fix>"],
  "rollback": ["<how to undo each step>"],
  "do_not_execute_if": ["<stop condition>"],
  "notes": "<constraints or alternatives>"
}

If no safe plan exists return an empty "plan" array and explain in "notes"."#;

#[derive(Debug, Clone, PartialEq)]
pub enum AnalysisOutcome {
    /// Unvalidated candidate plan.
    Proposal(Value),
    /// The analyzer declined; carries its explanation.
    Refusal(String),
}

pub trait Analyzer {
    fn name(&self) -> &str;
    fn analyze(&self, evidence: &Evidence) -> Result<AnalysisOutcome>;
}

pub fn build_prompt(evidence: &Evidence) -> Result<String> {
    Ok(format!(
        "{INSTRUCTIONS}\n\n---\n\nEvidence:\n{}",
        serde_json::to_string_pretty(evidence)?
    ))
}

// ---------------------------------------------------------------------------
// CommandAnalyzer
// ---------------------------------------------------------------------------

/// Runs an external CLI. Arguments equal to `{prompt}` are replaced by the
/// prompt; without such an argument the prompt is written to stdin.
pub struct CommandAnalyzer {
    command: String,
    args: Vec<String>,
    model: Option<String>,
    timeout: Duration,
}

impl CommandAnalyzer {
    pub fn new(command: &str, args: Vec<String>, model: Option<String>, timeout: Duration) -> Self {
        Self {
            command: command.to_string(),
            args,
            model,
            timeout,
        }
    }

    pub fn default_args() -> Vec<String> {
        ["-p", PROMPT_TOKEN, "--output-format", "json"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    pub fn is_available(&self) -> bool {
        which::which(&self.command).is_ok()
    }

    fn argv(&self, prompt: &str) -> (Vec<String>, bool) {
        let mut argv = vec![self.command.clone()];
        let mut substituted = false;
        for arg in &self.args {
            if arg == PROMPT_TOKEN {
                argv.push(prompt.to_string());
                substituted = true;
            } else {
                argv.push(arg.clone());
            }
        }
        if let Some(model) = &self.model {
            argv.push("--model".into());
            argv.push(model.clone());
        }
        (argv, substituted)
    }
}

impl Analyzer for CommandAnalyzer {
    fn name(&self) -> &str {
        &self.command
    }

    fn analyze(&self, evidence: &Evidence) -> Result<AnalysisOutcome> {
        if !self.is_available() {
            return Err(MenderError::AnalyzerUnavailable(format!(
                "'{}' not found on PATH",
                self.command
            )));
        }
        let prompt = build_prompt(evidence)?;
        let (argv, substituted) = self.argv(&prompt);
        tracing::debug!(command = %self.command, issues = evidence.issues.len(), "running analyzer");

        let out = run_argv(&argv, (!substituted).then_some(prompt.as_str()), self.timeout);
        if out.timed_out {
            return Err(MenderError::Analysis(format!(
                "analyzer timed out after {}s",
                self.timeout.as_secs()
            )));
        }
        if !out.success {
            return Err(MenderError::Analysis(format!(
                "analyzer exited with {}: {}",
                out.return_code.map_or("signal".to_string(), |c| c.to_string()),
                out.stderr.trim()
            )));
        }

        let body = unwrap_envelope(out.stdout.trim());
        match extract_json(&body) {
            Some(candidate) => Ok(AnalysisOutcome::Proposal(candidate)),
            None => {
                tracing::debug!(response = %body, "unparseable analyzer response");
                Err(MenderError::Analysis(
                    "could not extract JSON from analyzer response".into(),
                ))
            }
        }
    }
}

/// Some CLIs wrap the model reply as `{"result": "..."}`.
pub fn unwrap_envelope(raw: &str) -> String {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(mut obj)) if obj.contains_key("result") => match obj.remove("result") {
            Some(Value::String(s)) => s,
            Some(other) => other.to_string(),
            None => raw.to_string(),
        },
        _ => raw.to_string(),
    }
}

static FENCED_JSON: OnceLock<Regex> = OnceLock::new();
static FENCED_ANY: OnceLock<Regex> = OnceLock::new();

/// Find a JSON object in free text. Tried in order: the whole text, a
/// ```json fenced block, any fenced block, the outermost brace span.
pub fn extract_json(text: &str) -> Option<Value> {
    let as_object = |s: &str| -> Option<Value> {
        serde_json::from_str::<Value>(s.trim())
            .ok()
            .filter(Value::is_object)
    };

    if let Some(v) = as_object(text) {
        return Some(v);
    }

    let fenced_json = FENCED_JSON
        .get_or_init(|| Regex::new(r"(?s)```json\s*(.*?)```").expect("fence regex is valid"));
    if let Some(v) = fenced_json
        .captures(text)
        .and_then(|c| c.get(1))
        .and_then(|m| as_object(m.as_str()))
    {
        return Some(v);
    }

    let fenced_any = FENCED_ANY.get_or_init(|| {
        Regex::new(r"(?s)```[A-Za-z0-9_-]{0,20}\s*\n(.*?)```").expect("fence regex is valid")
    });
    if let Some(v) = fenced_any
        .captures(text)
        .and_then(|c| c.get(1))
        .and_then(|m| as_object(m.as_str()))
    {
        return Some(v);
    }

    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end > start {
        return as_object(&text[start..=end]);
    }
    None
}

// ---------------------------------------------------------------------------
// PlaybookAnalyzer
// ---------------------------------------------------------------------------

/// Canned plans for well-understood issue types.
#[derive(Debug, Clone, Default)]
pub struct PlaybookAnalyzer;

impl PlaybookAnalyzer {
    fn playbook(issue: &Issue) -> Option<Value> {
        match issue.issue_type.as_str() {
            "container_unhealthy" => {
                let container = issue.field("container")?;
                Some(json!({
                    "summary": format!("Container {container} is unhealthy"),
                    "severity": "warning",
                    "confidence": 0.6,
                    "risk": "low",
                    "plan": [{
                        "step": 1,
                        "action": "Restart container",
                        "command": format!("docker restart {container}"),
                        "timeout_seconds": 60,
                        "reversible": true
                    }],
                    "postchecks": [format!("docker ps --filter name={container}")],
                    "rollback": ["Container restarts on its own if a restart policy is set"]
                }))
            }
            "disk_space_low" => {
                let mount = issue.field("mount").unwrap_or_else(|| "/".to_string());
                Some(json!({
                    "summary": format!("Disk {mount} is low on space"),
                    "severity": "warning",
                    "confidence": 0.5,
                    "risk": "low",
                    "plan": [{
                        "step": 1,
                        "action": "Prune unused Docker data",
                        "command": "docker system prune -f",
                        "timeout_seconds": 120,
                        "reversible": false
                    }],
                    "postchecks": [format!("df -h {mount}")],
                    "rollback": ["Pruned images cannot be recovered; pull them again if needed"]
                }))
            }
            _ => None,
        }
    }
}

impl Analyzer for PlaybookAnalyzer {
    fn name(&self) -> &str {
        "playbook"
    }

    fn analyze(&self, evidence: &Evidence) -> Result<AnalysisOutcome> {
        for issue in &evidence.issues {
            let Some(mut plan) = Self::playbook(issue) else {
                continue;
            };
            if let Some(obj) = plan.as_object_mut() {
                if !issue.message.is_empty() {
                    obj.insert("summary".into(), Value::String(issue.message.clone()));
                }
                obj.insert("plan_schema_version".into(), json!("1.0"));
                obj.insert("root_cause".into(), json!(issue.message));
                obj.insert("evidence".into(), json!([serde_json::to_string(issue)?]));
                obj.insert("prechecks".into(), json!([]));
                obj.insert("do_not_execute_if".into(), json!([]));
                obj.insert("notes".into(), json!("Generated from a built-in playbook"));
            }
            return Ok(AnalysisOutcome::Proposal(plan));
        }
        Ok(AnalysisOutcome::Refusal(
            "no playbook matches the reported issues".into(),
        ))
    }
}

// ---------------------------------------------------------------------------
// FallbackAnalyzer
// ---------------------------------------------------------------------------

/// Uses the primary analyzer, switching to playbooks when it is missing or
/// fails. Refusals from the primary are respected.
pub struct FallbackAnalyzer {
    primary: Box<dyn Analyzer>,
    fallback: PlaybookAnalyzer,
}

impl FallbackAnalyzer {
    pub fn new(primary: Box<dyn Analyzer>) -> Self {
        Self {
            primary,
            fallback: PlaybookAnalyzer,
        }
    }
}

impl Analyzer for FallbackAnalyzer {
    fn name(&self) -> &str {
        self.primary.name()
    }

    fn analyze(&self, evidence: &Evidence) -> Result<AnalysisOutcome> {
        match self.primary.analyze(evidence) {
            Ok(outcome) => Ok(outcome),
            Err(e @ (MenderError::AnalyzerUnavailable(_) | MenderError::Analysis(_))) => {
                tracing::warn!(error = %e, "primary analyzer failed, using playbooks");
                self.fallback.analyze(evidence)
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validate::validate;
    use chrono::Utc;

    fn evidence(issues: Vec<Issue>) -> Evidence {
        let mut ev = Evidence::new("host-a", Utc::now());
        ev.issues = issues;
        ev
    }

    #[test]
    fn extract_direct_json() {
        let v = extract_json(r#"{"summary":"x"}"#).unwrap();
        assert_eq!(v["summary"], "x");
    }

    #[test]
    fn extract_from_json_fence() {
        let text = "Here is the plan:\n```json\n{\"summary\": \"fenced\"}\n```\nDone.";
        assert_eq!(extract_json(text).unwrap()["summary"], "fenced");
    }

    #[test]
    fn extract_from_generic_fence() {
        let text = "Plan below\n```\n{\"summary\": \"generic\"}\n```";
        assert_eq!(extract_json(text).unwrap()["summary"], "generic");
    }

    #[test]
    fn extract_from_brace_span() {
        let text = "Sure! {\"summary\": \"inline\", \"n\": {\"a\": 1}} hope this helps";
        assert_eq!(extract_json(text).unwrap()["n"]["a"], 1);
    }

    #[test]
    fn extract_gives_up_on_prose() {
        assert!(extract_json("I cannot help with that.").is_none());
        assert!(extract_json("[1, 2, 3]").is_none());
    }

    #[test]
    fn envelope_is_unwrapped() {
        let raw = r#"{"type":"result","result":"```json\n{\"summary\":\"s\"}\n```"}"#;
        let body = unwrap_envelope(raw);
        assert_eq!(extract_json(&body).unwrap()["summary"], "s");
        assert_eq!(unwrap_envelope("plain"), "plain");
    }

    #[test]
    fn prompt_token_is_substituted() {
        let a = CommandAnalyzer::new(
            "claude",
            CommandAnalyzer::default_args(),
            Some("m1".into()),
            Duration::from_secs(5),
        );
        let (argv, substituted) = a.argv("PROMPT");
        assert!(substituted);
        assert_eq!(argv, vec!["claude", "-p", "PROMPT", "--output-format", "json", "--model", "m1"]);

        let a = CommandAnalyzer::new("llm", vec![], None, Duration::from_secs(5));
        let (argv, substituted) = a.argv("PROMPT");
        assert!(!substituted);
        assert_eq!(argv, vec!["llm"]);
    }

    #[test]
    fn command_analyzer_reads_stdout() {
        let script = r#"printf '%s\n' '{"result":"{\"summary\":\"ok\"}"}'"#;
        let a = CommandAnalyzer::new(
            "sh",
            vec!["-c".into(), script.into()],
            None,
            Duration::from_secs(10),
        );
        let outcome = a.analyze(&evidence(vec![])).unwrap();
        assert_eq!(outcome, AnalysisOutcome::Proposal(json!({"summary": "ok"})));
    }

    #[test]
    fn missing_binary_is_unavailable() {
        let a = CommandAnalyzer::new("no-such-analyzer-bin", vec![], None, Duration::from_secs(1));
        assert!(matches!(
            a.analyze(&evidence(vec![])),
            Err(MenderError::AnalyzerUnavailable(_))
        ));
    }

    #[test]
    fn playbook_produces_valid_restart_plan() {
        let issue = Issue::new("docker", "container_unhealthy", "web1 is unhealthy").with("container", "web1");
        let outcome = PlaybookAnalyzer.analyze(&evidence(vec![issue])).unwrap();
        let AnalysisOutcome::Proposal(raw) = outcome else {
            panic!("expected proposal");
        };
        let draft = validate(&raw).unwrap();
        assert_eq!(draft.steps[0].command.as_deref(), Some("docker restart web1"));
        assert_eq!(draft.summary, "web1 is unhealthy");
    }

    #[test]
    fn playbook_refuses_unknown_types() {
        let issue = Issue::new("system", "load_high", "load 40");
        assert!(matches!(
            PlaybookAnalyzer.analyze(&evidence(vec![issue])).unwrap(),
            AnalysisOutcome::Refusal(_)
        ));
    }

    #[test]
    fn fallback_uses_playbook_when_primary_missing() {
        let primary = CommandAnalyzer::new("no-such-analyzer-bin", vec![], None, Duration::from_secs(1));
        let analyzer = FallbackAnalyzer::new(Box::new(primary));
        let issue = Issue::new("system", "disk_space_low", "disk / 97% full").with("mount", "/");
        let AnalysisOutcome::Proposal(raw) = analyzer.analyze(&evidence(vec![issue])).unwrap() else {
            panic!("expected proposal");
        };
        assert_eq!(raw["plan"][0]["command"], "docker system prune -f");
        assert_eq!(raw["postchecks"][0], "df -h /");
    }
}
