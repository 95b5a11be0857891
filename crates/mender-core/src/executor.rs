//! Safety-gated execution of approved plans.
//!
//! Order of operations: rate limit, safety scan, prechecks, steps,
//! postchecks. Any gate failure aborts before the next stage; a failing step
//! stops the plan and triggers the advisory rollback exactly once.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::plan::Plan;
use crate::ratelimit::RateJournal;
use crate::runner::{CommandOutput, CommandRunner};
use crate::safety::SafetyPolicy;

// ---------------------------------------------------------------------------
// Result types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExecutionError {
    #[error("rate limit exceeded ({max_per_hour} executions per hour)")]
    RateLimited { max_per_hour: usize },

    #[error("safety check failed: {reason}")]
    SafetyViolation { reason: String },

    #[error("precheck failed: {command}")]
    PrecheckFailed { command: String },

    #[error("step {step} failed: {stderr}")]
    StepFailed { step: u32, stderr: String },

    #[error("step {step} timed out after {seconds}s")]
    Timeout { step: u32, seconds: u64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepOutcome {
    pub step: u32,
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    pub success: bool,
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
    #[serde(default)]
    pub return_code: Option<i32>,
    #[serde(default)]
    pub timed_out: bool,
}

/// Outcome of a precheck or postcheck command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckOutcome {
    pub command: String,
    #[serde(flatten)]
    pub output: CommandOutput,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub prechecks: Vec<CheckOutcome>,
    #[serde(default)]
    pub steps: Vec<StepOutcome>,
    #[serde(default)]
    pub postchecks: Vec<CheckOutcome>,
    /// Rollback instructions reported after a failed step. `Some` means the
    /// rollback was invoked; the instructions are advisory and never run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollback: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ExecutionError>,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl ExecutionResult {
    fn started(now: DateTime<Utc>) -> Self {
        Self {
            success: true,
            dry_run: false,
            prechecks: Vec::new(),
            steps: Vec::new(),
            postchecks: Vec::new(),
            rollback: None,
            error: None,
            started_at: now,
            completed_at: None,
        }
    }

    fn fail(mut self, error: ExecutionError) -> Self {
        self.success = false;
        self.error = Some(error);
        self.completed_at = Some(Utc::now());
        self
    }

    /// A successful result that ran nothing.
    pub fn dry_run(now: DateTime<Utc>) -> Self {
        Self {
            dry_run: true,
            completed_at: Some(now),
            ..Self::started(now)
        }
    }

    pub fn failed_postchecks(&self) -> impl Iterator<Item = &CheckOutcome> {
        self.postchecks.iter().filter(|c| !c.output.success)
    }

    /// One line describing the outcome, for notifications and rejection reasons.
    pub fn describe(&self) -> String {
        match (&self.error, self.dry_run) {
            (Some(e), _) => e.to_string(),
            (None, true) => format!("dry run: {} step(s) not executed", self.steps.len()),
            (None, false) => {
                let failed = self.failed_postchecks().count();
                if failed == 0 {
                    format!("{} step(s) succeeded", self.steps.len())
                } else {
                    format!(
                        "{} step(s) succeeded, {failed} postcheck(s) failed",
                        self.steps.len()
                    )
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ExecutorLimits {
    pub max_fixes_per_hour: usize,
    pub check_timeout: Duration,
    pub stdout_limit: usize,
    pub stderr_limit: usize,
}

impl Default for ExecutorLimits {
    fn default() -> Self {
        Self {
            max_fixes_per_hour: 3,
            check_timeout: Duration::from_secs(30),
            stdout_limit: 5000,
            stderr_limit: 1000,
        }
    }
}

pub struct Executor {
    runner: Box<dyn CommandRunner>,
    policy: SafetyPolicy,
    journal: RateJournal,
    limits: ExecutorLimits,
    dry_run: bool,
}

impl Executor {
    pub fn new(
        runner: Box<dyn CommandRunner>,
        policy: SafetyPolicy,
        journal: RateJournal,
        limits: ExecutorLimits,
    ) -> Self {
        Self {
            runner,
            policy,
            journal,
            limits,
            dry_run: false,
        }
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    pub fn execute(&mut self, plan: &Plan) -> ExecutionResult {
        self.execute_at(plan, Utc::now())
    }

    pub fn execute_at(&mut self, plan: &Plan, now: DateTime<Utc>) -> ExecutionResult {
        if self.dry_run {
            return self.simulate(plan, now);
        }

        let result = ExecutionResult::started(now);
        let max = self.limits.max_fixes_per_hour;
        if self.journal.is_limited_at(now, max) {
            tracing::warn!(plan_id = %plan.plan_id, max, "execution rate limit exceeded");
            return result.fail(ExecutionError::RateLimited { max_per_hour: max });
        }

        let result = self.run_gated(plan, result);
        if let Err(e) = self.journal.record_at(now) {
            tracing::error!(error = %e, "failed to persist rate journal");
        }
        result
    }

    fn run_gated(&mut self, plan: &Plan, mut result: ExecutionResult) -> ExecutionResult {
        for condition in &plan.draft.do_not_execute_if {
            tracing::info!(plan_id = %plan.plan_id, condition = %condition, "stop condition (not evaluated)");
        }

        if let Err(reason) = self.policy.check_plan(plan) {
            tracing::warn!(plan_id = %plan.plan_id, %reason, "safety check failed");
            return result.fail(ExecutionError::SafetyViolation { reason });
        }

        for command in &plan.draft.prechecks {
            let output = self.run(command, self.limits.check_timeout);
            let ok = output.success;
            result.prechecks.push(CheckOutcome {
                command: command.clone(),
                output,
            });
            if !ok {
                tracing::warn!(plan_id = %plan.plan_id, %command, "precheck failed");
                return result.fail(ExecutionError::PrecheckFailed {
                    command: command.clone(),
                });
            }
        }

        for step in &plan.draft.steps {
            tracing::info!(plan_id = %plan.plan_id, step = step.step, action = %step.action, "executing step");
            let Some(command) = &step.command else {
                result.steps.push(StepOutcome {
                    step: step.step,
                    action: step.action.clone(),
                    command: None,
                    success: true,
                    stdout: String::new(),
                    stderr: String::new(),
                    return_code: None,
                    timed_out: false,
                });
                continue;
            };

            let output = self.run(command, Duration::from_secs(step.timeout_seconds));
            let error = if output.timed_out {
                Some(ExecutionError::Timeout {
                    step: step.step,
                    seconds: step.timeout_seconds,
                })
            } else if !output.success {
                Some(ExecutionError::StepFailed {
                    step: step.step,
                    stderr: output.stderr.clone(),
                })
            } else {
                None
            };
            result.steps.push(StepOutcome {
                step: step.step,
                action: step.action.clone(),
                command: Some(command.clone()),
                success: output.success,
                stdout: output.stdout,
                stderr: output.stderr,
                return_code: output.return_code,
                timed_out: output.timed_out,
            });

            if let Some(error) = error {
                tracing::error!(plan_id = %plan.plan_id, %error, "step failed, stopping plan");
                result.rollback = Some(rollback(plan));
                return result.fail(error);
            }
        }

        for command in &plan.draft.postchecks {
            let output = self.run(command, self.limits.check_timeout);
            if !output.success {
                tracing::warn!(plan_id = %plan.plan_id, %command, "postcheck failed");
            }
            result.postchecks.push(CheckOutcome {
                command: command.clone(),
                output,
            });
        }

        result.completed_at = Some(Utc::now());
        result
    }

    fn simulate(&self, plan: &Plan, now: DateTime<Utc>) -> ExecutionResult {
        if let Err(reason) = self.policy.check_plan(plan) {
            return ExecutionResult::started(now).fail(ExecutionError::SafetyViolation { reason });
        }
        let mut result = ExecutionResult::dry_run(now);
        result.steps = plan
            .draft
            .steps
            .iter()
            .map(|s| StepOutcome {
                step: s.step,
                action: s.action.clone(),
                command: s.command.clone(),
                success: true,
                stdout: String::new(),
                stderr: String::new(),
                return_code: None,
                timed_out: false,
            })
            .collect();
        tracing::info!(plan_id = %plan.plan_id, steps = result.steps.len(), "dry run, nothing executed");
        result
    }

    fn run(&self, command: &str, timeout: Duration) -> CommandOutput {
        tracing::debug!(%command, "running");
        self.runner
            .run(command, timeout)
            .truncated(self.limits.stdout_limit, self.limits.stderr_limit)
    }
}

/// Advisory rollback: instructions are logged and reported, never executed.
fn rollback(plan: &Plan) -> Vec<String> {
    if plan.draft.rollback.is_empty() {
        tracing::warn!(plan_id = %plan.plan_id, "no rollback instructions available");
    }
    for instruction in &plan.draft.rollback {
        tracing::info!(plan_id = %plan.plan_id, %instruction, "rollback instruction");
    }
    plan.draft.rollback.clone()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::plan::{PlanDraft, PlanStep};
    use crate::store::{BackendKind, PlanStore};
    use crate::types::Severity;
    use chrono::{Duration as CDur, TimeZone};
    use std::cell::RefCell;
    use std::rc::Rc;

    /// Records every command; fails any command containing "fail" and
    /// times out any containing "hang".
    #[derive(Clone, Default)]
    pub(crate) struct RecordingRunner {
        pub calls: Rc<RefCell<Vec<String>>>,
    }

    impl CommandRunner for RecordingRunner {
        fn run(&self, command: &str, timeout: Duration) -> CommandOutput {
            self.calls.borrow_mut().push(command.to_string());
            if command.contains("hang") {
                CommandOutput {
                    timed_out: true,
                    stderr: format!("timed out after {}s", timeout.as_secs()),
                    ..CommandOutput::default()
                }
            } else if command.contains("fail") || command == "false" {
                CommandOutput {
                    success: false,
                    return_code: Some(1),
                    stderr: format!("{command}: exit 1"),
                    ..CommandOutput::default()
                }
            } else {
                CommandOutput {
                    success: true,
                    return_code: Some(0),
                    stdout: "ok".into(),
                    ..CommandOutput::default()
                }
            }
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 18, 14, 0, 0).unwrap()
    }

    fn plan_with(commands: &[&str]) -> Plan {
        let dir = tempfile::TempDir::new().unwrap();
        let store = PlanStore::open(dir.path(), BackendKind::Fs).unwrap();
        let mut draft = PlanDraft::new("test plan", Severity::Warning, 0.9);
        for (i, cmd) in commands.iter().enumerate() {
            draft = draft.with_step(PlanStep::new(i as u32 + 1, "do", Some(cmd)));
        }
        draft.rollback = vec!["docker start web1".into()];
        store.prepare(draft, t0())
    }

    fn executor(runner: &RecordingRunner) -> Executor {
        Executor::new(
            Box::new(runner.clone()),
            SafetyPolicy::new(vec!["postgres".into()]),
            RateJournal::in_memory(),
            ExecutorLimits::default(),
        )
    }

    #[test]
    fn failing_step_stops_plan_and_rolls_back_once() {
        let runner = RecordingRunner::default();
        let mut exec = executor(&runner);
        let plan = plan_with(&["echo one", "fail now", "echo three"]);

        let result = exec.execute_at(&plan, t0());

        assert!(!result.success);
        assert_eq!(*runner.calls.borrow(), vec!["echo one", "fail now"]);
        assert_eq!(result.steps.len(), 2);
        assert!(result.steps[0].success);
        assert!(!result.steps[1].success);
        assert_eq!(result.rollback, Some(vec!["docker start web1".to_string()]));
        assert!(matches!(result.error, Some(ExecutionError::StepFailed { step: 2, .. })));
        assert!(result.postchecks.is_empty());
    }

    #[test]
    fn failed_first_step_skips_postchecks() {
        let runner = RecordingRunner::default();
        let mut exec = executor(&runner);
        let mut plan = plan_with(&["false"]);
        plan.draft.prechecks = vec!["true".into()];
        plan.draft.postchecks = vec!["true".into()];

        let result = exec.execute_at(&plan, t0());

        assert!(!result.success);
        assert!(matches!(result.error, Some(ExecutionError::StepFailed { step: 1, .. })));
        assert_eq!(*runner.calls.borrow(), vec!["true", "false"]);
        assert_eq!(result.prechecks.len(), 1);
        assert!(result.postchecks.is_empty());
    }

    #[test]
    fn safety_violation_runs_nothing() {
        let runner = RecordingRunner::default();
        let mut exec = executor(&runner);
        let plan = plan_with(&["echo prep", "rm -rf /"]);

        let result = exec.execute_at(&plan, t0());

        assert!(!result.success);
        assert!(matches!(result.error, Some(ExecutionError::SafetyViolation { .. })));
        assert!(runner.calls.borrow().is_empty());
        assert!(result.steps.is_empty());
    }

    #[test]
    fn protected_service_is_refused() {
        let runner = RecordingRunner::default();
        let mut exec = executor(&runner);
        let result = exec.execute_at(&plan_with(&["docker restart postgres"]), t0());
        assert!(matches!(result.error, Some(ExecutionError::SafetyViolation { .. })));
        assert!(runner.calls.borrow().is_empty());
    }

    #[test]
    fn rate_limit_blocks_fourth_execution_without_side_effects() {
        let runner = RecordingRunner::default();
        let mut exec = executor(&runner);
        let plan = plan_with(&["echo ok"]);

        for i in 0..3 {
            assert!(exec.execute_at(&plan, t0() + CDur::minutes(i)).success);
        }
        let calls_before = runner.calls.borrow().len();
        let result = exec.execute_at(&plan, t0() + CDur::minutes(5));

        assert!(matches!(result.error, Some(ExecutionError::RateLimited { max_per_hour: 3 })));
        assert_eq!(runner.calls.borrow().len(), calls_before);
        assert_eq!(exec.journal.count_at(t0() + CDur::minutes(5)), 3);

        // the window slides
        assert!(exec.execute_at(&plan, t0() + CDur::minutes(61)).success);
    }

    #[test]
    fn safety_failures_count_against_the_budget() {
        let runner = RecordingRunner::default();
        let mut exec = executor(&runner);
        exec.execute_at(&plan_with(&["rm -rf /"]), t0());
        assert_eq!(exec.journal.count_at(t0()), 1);
    }

    #[test]
    fn precheck_failure_aborts_before_steps() {
        let runner = RecordingRunner::default();
        let mut exec = executor(&runner);
        let mut plan = plan_with(&["echo step"]);
        plan.draft.prechecks = vec!["fail precheck".into()];

        let result = exec.execute_at(&plan, t0());

        assert_eq!(
            result.error,
            Some(ExecutionError::PrecheckFailed { command: "fail precheck".into() })
        );
        assert_eq!(*runner.calls.borrow(), vec!["fail precheck"]);
        assert!(result.rollback.is_none());
    }

    #[test]
    fn timeout_is_a_distinct_error() {
        let runner = RecordingRunner::default();
        let mut exec = executor(&runner);
        let result = exec.execute_at(&plan_with(&["hang forever"]), t0());
        assert_eq!(result.error, Some(ExecutionError::Timeout { step: 1, seconds: 60 }));
        assert!(result.rollback.is_some());
    }

    #[test]
    fn postcheck_failures_do_not_flip_success() {
        let runner = RecordingRunner::default();
        let mut exec = executor(&runner);
        let mut plan = plan_with(&["echo ok"]);
        plan.draft.postchecks = vec!["fail check".into(), "echo fine".into()];

        let result = exec.execute_at(&plan, t0());

        assert!(result.success);
        assert_eq!(result.postchecks.len(), 2);
        assert_eq!(result.failed_postchecks().count(), 1);
        assert!(result.describe().contains("1 postcheck(s) failed"));
    }

    #[test]
    fn steps_without_command_are_noops() {
        let runner = RecordingRunner::default();
        let mut exec = executor(&runner);
        let mut plan = plan_with(&[]);
        plan.draft.steps.push(PlanStep::new(1, "observe for ten minutes", None));

        let result = exec.execute_at(&plan, t0());
        assert!(result.success);
        assert_eq!(result.steps.len(), 1);
        assert!(runner.calls.borrow().is_empty());
    }

    #[test]
    fn dry_run_touches_nothing() {
        let runner = RecordingRunner::default();
        let mut exec = executor(&runner).with_dry_run(true);
        let result = exec.execute_at(&plan_with(&["echo a", "echo b"]), t0());

        assert!(result.success);
        assert!(result.dry_run);
        assert_eq!(result.steps.len(), 2);
        assert!(runner.calls.borrow().is_empty());
        assert_eq!(exec.journal.count_at(t0()), 0);
    }

    #[test]
    fn error_serializes_with_kind_tag() {
        let e = ExecutionError::Timeout { step: 2, seconds: 30 };
        let v = serde_json::to_value(&e).unwrap();
        assert_eq!(v["kind"], "timeout");
        assert_eq!(e.to_string(), "step 2 timed out after 30s");
    }
}
