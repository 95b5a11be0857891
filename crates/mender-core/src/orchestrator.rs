//! The plan lifecycle driver.
//!
//! [`Orchestrator`] is built once per process from [`Config`] and owns every
//! component: the deduplicator, the plan store, the executor and the
//! external collaborators. It runs evidence cycles and operator commands
//! against them, and the daemon loop interleaves the two.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::Path;
use std::time::{Duration, Instant};

use crate::analysis::{AnalysisOutcome, Analyzer, CommandAnalyzer, FallbackAnalyzer};
use crate::channel::{AuthorizedChannel, CommandChannel, IdleChannel, SignalChannel};
use crate::collect::{collect_all, CommandSource, EvidenceSource};
use crate::config::Config;
use crate::dedup::Deduplicator;
use crate::error::{MenderError, Result};
use crate::executor::{Executor, ExecutorLimits};
use crate::intent::{Intent, IntentParser, HELP_TEXT};
use crate::issue::{Evidence, Issue};
use crate::notify::{LogNotifier, Notifier, WebhookNotifier};
use crate::paths;
use crate::plan::{Plan, PlanDraft, PlanUpdate};
use crate::ratelimit::RateJournal;
use crate::revalidate::{OverlapCheck, PersistenceCheck};
use crate::runner::ShellRunner;
use crate::safety::SafetyPolicy;
use crate::store::PlanStore;
use crate::types::PlanStatus;
use crate::validate::validate;

pub const DEFAULT_REJECT_REASON: &str = "rejected by operator";

// ---------------------------------------------------------------------------
// Settings / components
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Settings {
    pub check_interval: Duration,
    pub command_poll: Duration,
    pub stale_after: chrono::Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(300),
            command_poll: Duration::from_secs(30),
            stale_after: chrono::Duration::seconds(300),
        }
    }
}

/// Everything an [`Orchestrator`] is made of.
pub struct Components {
    pub settings: Settings,
    pub hostname: String,
    pub dedup: Deduplicator,
    pub store: PlanStore,
    pub executor: Executor,
    pub sources: Vec<Box<dyn EvidenceSource>>,
    pub analyzer: Box<dyn Analyzer>,
    pub notifier: Box<dyn Notifier>,
    pub persistence: Box<dyn PersistenceCheck>,
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// What one evidence cycle did.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleReport {
    pub recovered: usize,
    pub issues_seen: usize,
    pub admitted: usize,
    pub already_covered: usize,
    /// Approved plans executed at the start of the cycle.
    pub executed: Vec<String>,
    pub created: Option<String>,
    /// Why no plan was created, when analysis ran but produced none.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

#[derive(Debug, Clone)]
pub enum ReinvestigateOutcome {
    /// The problem is gone; the plan was closed.
    Resolved(Plan),
    /// A fresh plan replaced the old one.
    Superseded { old: Plan, new: Plan },
    /// No usable new plan; the old one stays pending.
    Unchanged { plan: Plan, reason: String },
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

pub struct Orchestrator {
    settings: Settings,
    hostname: String,
    dedup: Deduplicator,
    store: PlanStore,
    executor: Executor,
    sources: Vec<Box<dyn EvidenceSource>>,
    analyzer: Box<dyn Analyzer>,
    notifier: Box<dyn Notifier>,
    persistence: Box<dyn PersistenceCheck>,
}

impl Orchestrator {
    pub fn new(c: Components) -> Self {
        Self {
            settings: c.settings,
            hostname: c.hostname,
            dedup: c.dedup,
            store: c.store,
            executor: c.executor,
            sources: c.sources,
            analyzer: c.analyzer,
            notifier: c.notifier,
            persistence: c.persistence,
        }
    }

    /// Wire up the production components described by `config`.
    pub fn from_config(root: &Path, config: &Config) -> Result<Self> {
        let settings = Settings {
            check_interval: config.check_interval(),
            command_poll: config.command_poll(),
            stale_after: chrono::Duration::seconds(config.agent.stale_after_secs as i64),
        };

        let limits = ExecutorLimits {
            max_fixes_per_hour: config.safety.max_fixes_per_hour,
            check_timeout: Duration::from_secs(config.safety.check_timeout_secs),
            stdout_limit: config.safety.stdout_limit,
            stderr_limit: config.safety.stderr_limit,
        };
        let executor = Executor::new(
            Box::new(ShellRunner),
            SafetyPolicy::new(config.safety.never_restart.clone()),
            RateJournal::load(&paths::rate_journal_path(root)),
            limits,
        )
        .with_dry_run(config.agent.dry_run);

        let sources: Vec<Box<dyn EvidenceSource>> = config
            .collectors
            .iter()
            .map(|c| {
                Box::new(CommandSource::new(
                    &c.name,
                    &c.command,
                    Duration::from_secs(c.timeout_secs),
                )) as Box<dyn EvidenceSource>
            })
            .collect();

        let primary = CommandAnalyzer::new(
            &config.analysis.resolved_command(),
            config.analysis.args.clone(),
            config.analysis.model.clone(),
            Duration::from_secs(config.analysis.timeout_secs),
        );
        let analyzer: Box<dyn Analyzer> = if config.analysis.fallback_playbooks {
            Box::new(FallbackAnalyzer::new(Box::new(primary)))
        } else {
            Box::new(primary)
        };

        let notifier: Box<dyn Notifier> = match &config.notifications.webhook {
            Some(hook) => Box::new(WebhookNotifier::new(
                &hook.url,
                &hook.number,
                hook.recipients.clone(),
                Duration::from_secs(hook.timeout_secs),
            )?),
            None => Box::new(LogNotifier),
        };

        Ok(Self::new(Components {
            settings,
            hostname: config.agent.hostname.clone().unwrap_or_else(detect_hostname),
            dedup: Deduplicator::load(&paths::dedup_path(root), config.dedup.suppress_hours),
            store: PlanStore::open(root, config.store.backend)?,
            executor,
            sources,
            analyzer,
            notifier,
            persistence: Box::new(OverlapCheck),
        }))
    }

    pub fn store(&self) -> &PlanStore {
        &self.store
    }

    pub fn dedup(&self) -> &Deduplicator {
        &self.dedup
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn collect_evidence(&self) -> Evidence {
        collect_all(&self.sources, &self.hostname, Utc::now())
    }

    // -----------------------------------------------------------------------
    // Evidence cycle
    // -----------------------------------------------------------------------

    pub fn run_cycle(&mut self) -> Result<CycleReport> {
        self.run_cycle_at(Utc::now())
    }

    pub fn run_cycle_at(&mut self, now: DateTime<Utc>) -> Result<CycleReport> {
        let mut report = CycleReport::default();

        match self.store.recover() {
            Ok(n) => report.recovered = n,
            Err(e) => tracing::error!(error = %e, "plan recovery failed"),
        }

        let evidence = collect_all(&self.sources, &self.hostname, now);
        report.issues_seen = evidence.issues.len();

        for plan in self.store.active()? {
            if plan.status != PlanStatus::Approved {
                continue;
            }
            match self.execute_plan(&plan.plan_id) {
                Ok(done) => report.executed.push(done.plan_id),
                Err(e) => tracing::error!(plan_id = %plan.plan_id, error = %e, "approved plan could not be executed"),
            }
        }

        let admitted: Vec<Issue> = evidence
            .issues
            .iter()
            .filter(|i| self.dedup.should_alert_at(i, now))
            .cloned()
            .collect();
        self.dedup.clear_resolved(&evidence.issues);
        report.admitted = admitted.len();

        let covered = self.store.covered_fingerprints()?;
        let (already, fresh): (Vec<Issue>, Vec<Issue>) = admitted
            .into_iter()
            .partition(|i| covered.contains(&i.fingerprint()));
        report.already_covered = already.len();

        if fresh.is_empty() {
            tracing::info!(issues = report.issues_seen, "no new issues to analyze");
            return Ok(report);
        }

        let mut scoped = evidence.clone();
        scoped.issues = fresh.clone();
        tracing::info!(issues = fresh.len(), "analyzing new issues");

        let draft = match self.propose(&scoped) {
            Ok(d) => d,
            Err(note) => {
                report.note = Some(note);
                return Ok(report);
            }
        };

        match self.store.create_at(draft.with_triggers(&fresh), now) {
            Ok(Some(plan)) => {
                self.notify_new(&plan, now);
                report.created = Some(plan.plan_id);
            }
            Ok(None) => report.note = Some("an active plan already covers these issues".into()),
            Err(e) => {
                tracing::error!(error = %e, "failed to persist plan, skipping this pass");
                report.note = Some(format!("plan not stored: {e}"));
            }
        }
        Ok(report)
    }

    /// Analyze and validate. `Err` carries a human-readable reason for
    /// producing nothing; none of these end the cycle with an error.
    fn propose(&self, evidence: &Evidence) -> std::result::Result<PlanDraft, String> {
        let raw = match self.analyzer.analyze(evidence) {
            Ok(AnalysisOutcome::Proposal(raw)) => raw,
            Ok(AnalysisOutcome::Refusal(why)) => {
                tracing::info!(reason = %why, "analyzer proposed no plan");
                return Err(format!("no plan proposed: {why}"));
            }
            Err(e) => {
                tracing::error!(error = %e, "analysis failed");
                return Err(e.to_string());
            }
        };
        validate(&raw).map_err(|e| {
            if e.is_refusal() {
                tracing::info!(reason = %e, "analyzer declined to act");
            } else {
                tracing::warn!(error = %e, "discarding invalid plan");
            }
            e.to_string()
        })
    }

    fn notify_new(&self, plan: &Plan, now: DateTime<Utc>) {
        match self.notifier.notify_plan(plan) {
            Ok(()) => {
                if let Err(e) = self.store.mark_notified(&plan.plan_id, now) {
                    tracing::warn!(plan_id = %plan.plan_id, error = %e, "failed to record notification time");
                }
            }
            Err(e) => tracing::warn!(plan_id = %plan.plan_id, error = %e, "plan notification failed"),
        }
    }

    fn announce(&self, plan: &Plan) {
        if let Err(e) = self.notifier.notify_result(plan) {
            tracing::warn!(plan_id = %plan.plan_id, error = %e, "result notification failed");
        }
    }

    // -----------------------------------------------------------------------
    // Execution
    // -----------------------------------------------------------------------

    /// Run an approved plan, record the result, archive and announce it.
    pub fn execute_plan(&mut self, plan_id: &str) -> Result<Plan> {
        let plan = self.store.get(plan_id)?;
        if plan.status != PlanStatus::Approved {
            return Err(MenderError::InvalidTransition {
                from: plan.status.to_string(),
                to: "executing".into(),
                reason: "only approved plans run".into(),
            });
        }
        tracing::info!(plan_id, "executing plan");
        let result = self.executor.execute(&plan);
        let to = if result.success {
            PlanStatus::Completed
        } else {
            PlanStatus::Failed
        };
        self.store.transition(plan_id, to, PlanUpdate::result(result))?;
        let done = self.store.archive(plan_id)?;
        self.announce(&done);
        Ok(done)
    }

    // -----------------------------------------------------------------------
    // Operator commands
    // -----------------------------------------------------------------------

    /// Approve and run a pending plan, re-checking stale plans first.
    ///
    /// Returns the plan in its final state: `completed`, `failed`, or
    /// `rejected` when a stale plan's problem has gone away.
    pub fn approve(&mut self, selector: Option<&str>) -> Result<Plan> {
        let plan = self.store.resolve_pending(selector)?;
        let now = Utc::now();

        if plan.age(now) > self.settings.stale_after {
            tracing::info!(plan_id = %plan.plan_id, "plan is stale, re-checking host before executing");
            let evidence = collect_all(&self.sources, &self.hostname, now);
            if !self.persistence.still_present(&plan, &evidence.issues) {
                return self.close(
                    &plan.plan_id,
                    "resolved: issue no longer present when approved",
                );
            }
        }

        self.store
            .transition(&plan.plan_id, PlanStatus::Approved, PlanUpdate::default())?;
        self.execute_plan(&plan.plan_id)
    }

    /// Mark a pending plan approved; the next evidence cycle runs it.
    pub fn approve_deferred(&mut self, selector: Option<&str>) -> Result<Plan> {
        let plan = self.store.resolve_pending(selector)?;
        self.store
            .transition(&plan.plan_id, PlanStatus::Approved, PlanUpdate::default())
    }

    pub fn reject(&mut self, selector: Option<&str>, reason: Option<&str>) -> Result<Plan> {
        let plan = self.store.resolve_pending(selector)?;
        let reason = reason
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .unwrap_or(DEFAULT_REJECT_REASON);
        self.close(&plan.plan_id, reason)
    }

    fn close(&mut self, plan_id: &str, reason: &str) -> Result<Plan> {
        self.store
            .transition(plan_id, PlanStatus::Rejected, PlanUpdate::reason(reason))?;
        let closed = self.store.archive(plan_id)?;
        self.announce(&closed);
        Ok(closed)
    }

    /// Look at the host again and either close, replace or keep a pending plan.
    pub fn reinvestigate(&mut self, selector: Option<&str>) -> Result<ReinvestigateOutcome> {
        let plan = self.store.resolve_pending(selector)?;
        let now = Utc::now();
        let evidence = collect_all(&self.sources, &self.hostname, now);

        if !evidence.has_issues() {
            let closed = self.close(&plan.plan_id, "resolved: no issues found on reinvestigation")?;
            return Ok(ReinvestigateOutcome::Resolved(closed));
        }

        let draft = match self.propose(&evidence) {
            Ok(d) => d.with_triggers(&evidence.issues),
            Err(reason) => return Ok(ReinvestigateOutcome::Unchanged { plan, reason }),
        };
        let replacement = self.store.prepare(draft, now);

        let signature = replacement.signature();
        let clash = !signature.is_empty()
            && self
                .store
                .active()?
                .iter()
                .any(|p| p.plan_id != plan.plan_id && p.signature() == signature);
        if clash {
            return Ok(ReinvestigateOutcome::Unchanged {
                plan,
                reason: "another active plan already covers the current issues".into(),
            });
        }

        let old = self.close(
            &plan.plan_id,
            &format!("superseded by {}", replacement.plan_id),
        )?;
        match self.store.insert(replacement)? {
            Some(new) => {
                self.notify_new(&new, now);
                Ok(ReinvestigateOutcome::Superseded { old, new })
            }
            None => Err(MenderError::Storage(
                "replacement plan was skipped after the original was closed".into(),
            )),
        }
    }

    /// Plans awaiting approval or execution.
    pub fn status(&self) -> Result<Vec<Plan>> {
        self.store.active()
    }

    /// Act on a channel message. Returns the reply to send, or `None` when
    /// the outcome has already been announced.
    pub fn handle(&mut self, intent: Intent) -> Option<String> {
        tracing::info!(%intent, "handling operator command");
        let outcome = match intent {
            Intent::Approve(sel) => self.approve(sel.as_deref()).map(|_| None),
            Intent::Reject { plan_id, reason } => self
                .reject(plan_id.as_deref(), reason.as_deref())
                .map(|_| None),
            Intent::Reinvestigate(sel) => self.reinvestigate(sel.as_deref()).map(|o| match o {
                ReinvestigateOutcome::Unchanged { plan, reason } => Some(format!(
                    "🔍 Plan {} left pending: {reason}",
                    plan.plan_id
                )),
                _ => None,
            }),
            Intent::Status => self.status().map(|plans| Some(format_status(&plans))),
            Intent::Help | Intent::FreeText(_) => Ok(Some(HELP_TEXT.to_string())),
        };
        outcome.unwrap_or_else(|e| Some(format!("⚠️ {e}")))
    }

    // -----------------------------------------------------------------------
    // Daemon
    // -----------------------------------------------------------------------

    /// Run evidence cycles every `check_interval`, polling `channel` for
    /// operator commands in between. Stops after `max_cycles` cycles if set.
    pub fn run_daemon(
        &mut self,
        channel: &dyn CommandChannel,
        parser: &dyn IntentParser,
        max_cycles: Option<u64>,
    ) {
        tracing::info!(
            hostname = %self.hostname,
            interval_secs = self.settings.check_interval.as_secs(),
            dry_run = self.executor.is_dry_run(),
            "daemon started"
        );
        let mut cycles = 0u64;
        loop {
            match self.run_cycle() {
                Ok(report) => tracing::info!(
                    issues = report.issues_seen,
                    admitted = report.admitted,
                    created = report.created.as_deref().unwrap_or("-"),
                    executed = report.executed.len(),
                    "cycle finished"
                ),
                Err(e) => tracing::error!(error = %e, "cycle failed"),
            }
            cycles += 1;
            if max_cycles.is_some_and(|max| cycles >= max) {
                break;
            }

            let next = Instant::now() + self.settings.check_interval;
            loop {
                let now = Instant::now();
                if now >= next {
                    break;
                }
                let wait = self.settings.command_poll.min(next - now);
                match channel.poll(wait) {
                    Ok(messages) => {
                        for msg in messages {
                            let intent = parser.parse(&msg.text);
                            if let Some(reply) = self.handle(intent) {
                                if let Err(e) = self.notifier.send_text(&reply) {
                                    tracing::warn!(error = %e, "reply failed");
                                }
                            }
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "command poll failed");
                        std::thread::sleep(wait);
                    }
                }
            }
        }
        tracing::info!(cycles, "daemon stopped");
    }
}

/// The configured command channel, or an idle one when none is set.
pub fn build_channel(config: &Config) -> Result<Box<dyn CommandChannel>> {
    match &config.commands.signal {
        Some(signal) => Ok(Box::new(AuthorizedChannel::new(
            Box::new(SignalChannel::new(&signal.url, &signal.number)?),
            signal.authorized.clone(),
        ))),
        None => Ok(Box::new(IdleChannel)),
    }
}

pub fn format_status(plans: &[Plan]) -> String {
    if plans.is_empty() {
        return "📋 No pending plans.".to_string();
    }
    let mut lines = vec!["📋 Active plans:".to_string()];
    for plan in plans.iter().take(5) {
        let summary: String = plan.summary().chars().take(50).collect();
        lines.push(format!(
            "• [{}] {} ({})\n  {summary}",
            plan.draft.severity.as_str().to_uppercase(),
            plan.plan_id,
            plan.status
        ));
    }
    if plans.len() > 5 {
        lines.push(format!("... and {} more", plans.len() - 5));
    }
    lines.push("Reply: approve <id> or reject <id>".to_string());
    lines.join("\n")
}

fn detect_hostname() -> String {
    std::fs::read_to_string("/etc/hostname")
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .or_else(|| std::env::var("HOSTNAME").ok().filter(|s| !s.is_empty()))
        .unwrap_or_else(|| "localhost".to_string())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
