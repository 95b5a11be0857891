//! Structural validation of candidate plans returned by an analyzer.
//!
//! The analyzer output is untrusted text turned into JSON; nothing reaches
//! the plan store without passing [`validate`].

use serde_json::{Map, Value};
use thiserror::Error;

use crate::plan::{PlanDraft, PlanStep, DEFAULT_STEP_TIMEOUT_SECS};
use crate::types::Severity;

pub const REQUIRED_FIELDS: &[&str] = &[
    "plan_schema_version",
    "summary",
    "severity",
    "confidence",
    "plan",
];

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("candidate is not a JSON object")]
    NotAnObject,

    #[error("missing required field: {0}")]
    MissingField(String),

    #[error("invalid severity: {0}")]
    InvalidSeverity(String),

    #[error("invalid confidence: {0}")]
    InvalidConfidence(String),

    #[error("field 'plan' must be an array")]
    StepsNotArray,

    #[error("step {index} is missing required field '{field}'")]
    StepMissingField { index: usize, field: String },

    #[error("step {index} is malformed: {message}")]
    MalformedStep { index: usize, message: String },

    /// The analyzer declined to propose any action.
    #[error("no safe plan proposed: {notes}")]
    EmptyPlan { notes: String },
}

impl ValidationError {
    pub fn is_refusal(&self) -> bool {
        matches!(self, ValidationError::EmptyPlan { .. })
    }
}

/// Check a raw candidate and convert it to a [`PlanDraft`].
///
/// Trigger issues and fingerprints are left empty; the caller attaches them.
pub fn validate(candidate: &Value) -> Result<PlanDraft, ValidationError> {
    let obj = candidate.as_object().ok_or(ValidationError::NotAnObject)?;

    for field in REQUIRED_FIELDS {
        if matches!(obj.get(*field), None | Some(Value::Null)) {
            return Err(ValidationError::MissingField(field.to_string()));
        }
    }

    let severity = match obj.get("severity") {
        Some(Value::String(s)) => {
            Severity::parse(s).ok_or_else(|| ValidationError::InvalidSeverity(s.clone()))?
        }
        Some(other) => return Err(ValidationError::InvalidSeverity(other.to_string())),
        None => return Err(ValidationError::MissingField("severity".into())),
    };

    let confidence = match obj.get("confidence").and_then(Value::as_f64) {
        Some(c) if (0.0..=1.0).contains(&c) => c,
        _ => {
            let raw = obj.get("confidence").map(Value::to_string).unwrap_or_default();
            return Err(ValidationError::InvalidConfidence(raw));
        }
    };

    let raw_steps = obj
        .get("plan")
        .and_then(Value::as_array)
        .ok_or(ValidationError::StepsNotArray)?;

    let mut steps = Vec::with_capacity(raw_steps.len());
    for (index, raw) in raw_steps.iter().enumerate() {
        steps.push(parse_step(index, raw)?);
    }

    if steps.is_empty() {
        let notes = text(obj, "notes").unwrap_or_else(|| "no notes given".to_string());
        return Err(ValidationError::EmptyPlan { notes });
    }

    Ok(PlanDraft {
        schema_version: text(obj, "plan_schema_version").unwrap_or_else(|| "1.0".into()),
        summary: text(obj, "summary").unwrap_or_default(),
        severity,
        confidence,
        root_cause: text(obj, "root_cause").unwrap_or_default(),
        evidence: text_list(obj, "evidence"),
        risk: text(obj, "risk").unwrap_or_else(|| "unknown".into()),
        prechecks: text_list(obj, "prechecks"),
        steps,
        postchecks: text_list(obj, "postchecks"),
        rollback: text_list(obj, "rollback"),
        do_not_execute_if: text_list(obj, "do_not_execute_if"),
        notes: text(obj, "notes"),
        fingerprints: Vec::new(),
        trigger_issues: Vec::new(),
    })
}

fn parse_step(index: usize, raw: &Value) -> Result<PlanStep, ValidationError> {
    let obj = raw.as_object().ok_or_else(|| ValidationError::MalformedStep {
        index,
        message: "not an object".into(),
    })?;
    for field in ["step", "action"] {
        if !obj.contains_key(field) {
            return Err(ValidationError::StepMissingField {
                index,
                field: field.into(),
            });
        }
    }

    let step = obj
        .get("step")
        .and_then(Value::as_u64)
        .and_then(|n| u32::try_from(n).ok())
        .ok_or_else(|| ValidationError::MalformedStep {
            index,
            message: "'step' must be a non-negative integer".into(),
        })?;

    let command = match obj.get("command") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) if s.trim().is_empty() => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(_) => {
            return Err(ValidationError::MalformedStep {
                index,
                message: "'command' must be a string or null".into(),
            })
        }
    };

    Ok(PlanStep {
        step,
        action: text(obj, "action").unwrap_or_default(),
        command,
        timeout_seconds: obj
            .get("timeout_seconds")
            .and_then(Value::as_u64)
            .filter(|t| *t > 0)
            .unwrap_or(DEFAULT_STEP_TIMEOUT_SECS),
        reversible: obj.get("reversible").and_then(Value::as_bool).unwrap_or(true),
    })
}

fn text(obj: &Map<String, Value>, key: &str) -> Option<String> {
    match obj.get(key)? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn text_list(obj: &Map<String, Value>, key: &str) -> Vec<String> {
    match obj.get(key) {
        Some(Value::Array(items)) => items
            .iter()
            .filter(|v| !v.is_null())
            .map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect(),
        Some(Value::String(s)) => vec![s.clone()],
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn candidate() -> Value {
        json!({
            "plan_schema_version": "1.0",
            "summary": "web1 unhealthy",
            "severity": "warning",
            "confidence": 0.8,
            "root_cause": "healthcheck failing",
            "evidence": ["health: unhealthy", 3],
            "risk": "low",
            "prechecks": ["docker inspect web1"],
            "plan": [
                {"step": 1, "action": "Restart", "command": "docker restart web1", "timeout_seconds": 90},
                {"step": 2, "action": "Observe", "command": null}
            ],
            "postchecks": ["docker ps"],
            "rollback": ["none"],
            "do_not_execute_if": ["db migration running"]
        })
    }

    #[test]
    fn accepts_well_formed_candidate() {
        let draft = validate(&candidate()).unwrap();
        assert_eq!(draft.severity, Severity::Warning);
        assert_eq!(draft.steps.len(), 2);
        assert_eq!(draft.steps[0].timeout_seconds, 90);
        assert_eq!(draft.steps[1].command, None);
        assert_eq!(draft.steps[1].timeout_seconds, 60);
        assert_eq!(draft.evidence, vec!["health: unhealthy".to_string(), "3".to_string()]);
        assert_eq!(draft.do_not_execute_if.len(), 1);
    }

    #[test]
    fn each_required_field_is_enforced() {
        for field in REQUIRED_FIELDS {
            let mut c = candidate();
            c.as_object_mut().unwrap().remove(*field);
            assert_eq!(
                validate(&c).unwrap_err(),
                ValidationError::MissingField(field.to_string())
            );
        }
    }

    #[test]
    fn null_required_field_counts_as_missing() {
        for field in REQUIRED_FIELDS {
            let mut c = candidate();
            c[*field] = Value::Null;
            assert_eq!(
                validate(&c).unwrap_err(),
                ValidationError::MissingField(field.to_string())
            );
        }
    }

    #[test]
    fn rejects_bad_severity_and_confidence() {
        let mut c = candidate();
        c["severity"] = json!("urgent");
        assert!(matches!(validate(&c), Err(ValidationError::InvalidSeverity(_))));

        let mut c = candidate();
        c["confidence"] = json!(1.5);
        assert!(matches!(validate(&c), Err(ValidationError::InvalidConfidence(_))));

        let mut c = candidate();
        c["confidence"] = json!("high");
        assert!(matches!(validate(&c), Err(ValidationError::InvalidConfidence(_))));
    }

    #[test]
    fn rejects_steps_without_step_or_action() {
        let mut c = candidate();
        c["plan"] = json!([{"step": 1, "command": "true"}]);
        assert_eq!(
            validate(&c).unwrap_err(),
            ValidationError::StepMissingField { index: 0, field: "action".into() }
        );
    }

    #[test]
    fn empty_plan_is_a_refusal() {
        let mut c = candidate();
        c["plan"] = json!([]);
        c["notes"] = json!("data volume at risk");
        let err = validate(&c).unwrap_err();
        assert!(err.is_refusal());
        assert!(err.to_string().contains("data volume at risk"));
    }

    #[test]
    fn non_object_is_rejected() {
        assert_eq!(validate(&json!([1, 2])).unwrap_err(), ValidationError::NotAnObject);
    }
}
