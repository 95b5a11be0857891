//! Persisted remediation plans and their lifecycle state machine.
//!
//! [`PlanStore`] owns every rule about plans (id assignment, legal
//! transitions, signature uniqueness, write-once archival). Persistence is
//! delegated to a [`PlanBackend`], which only knows two collections: active
//! plans, which may be rewritten, and archived plans, which are written once.

mod db;
mod fs;

pub use self::db::RedbBackend;
pub use self::fs::FsBackend;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;

use crate::error::{MenderError, Result};
use crate::paths;
use crate::plan::{Plan, PlanDraft, PlanUpdate};
use crate::types::PlanStatus;

// ---------------------------------------------------------------------------
// Backend interface
// ---------------------------------------------------------------------------

pub trait PlanBackend {
    fn get_active(&self, plan_id: &str) -> Result<Option<Plan>>;
    fn put_active(&self, plan: &Plan) -> Result<()>;
    fn remove_active(&self, plan_id: &str) -> Result<()>;
    fn get_archived(&self, plan_id: &str) -> Result<Option<Plan>>;
    /// Write `plan` to the archive and drop its active copy. Fails with
    /// `AlreadyArchived` if the archive already holds this id.
    fn archive(&self, plan: &Plan) -> Result<()>;
    fn active(&self) -> Result<Vec<Plan>>;
    fn archived(&self) -> Result<Vec<Plan>>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    #[default]
    Fs,
    Redb,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BackendKind::Fs => "fs",
            BackendKind::Redb => "redb",
        })
    }
}

// ---------------------------------------------------------------------------
// PlanStore
// ---------------------------------------------------------------------------

pub struct PlanStore {
    backend: Box<dyn PlanBackend>,
}

impl PlanStore {
    pub fn new(backend: Box<dyn PlanBackend>) -> Self {
        Self { backend }
    }

    /// Open the configured backend under `<root>/.mender/`.
    pub fn open(root: &Path, kind: BackendKind) -> Result<Self> {
        let backend: Box<dyn PlanBackend> = match kind {
            BackendKind::Fs => Box::new(FsBackend::new(root)),
            BackendKind::Redb => Box::new(RedbBackend::open(&paths::plans_db_path(root))?),
        };
        Ok(Self::new(backend))
    }

    /// Assign an id and `pending` status to a draft without persisting it.
    pub fn prepare(&self, draft: PlanDraft, created_at: DateTime<Utc>) -> Plan {
        Plan {
            plan_id: new_plan_id(created_at),
            status: PlanStatus::Pending,
            draft,
            created_at,
            approved_at: None,
            rejected_at: None,
            rejection_reason: None,
            executed_at: None,
            notification_timestamp: None,
            result: None,
        }
    }

    /// Persist a prepared plan. Returns `None` (skipped) when an active plan
    /// already answers the same issue signature.
    pub fn insert(&self, plan: Plan) -> Result<Option<Plan>> {
        let signature = plan.signature();
        if !signature.is_empty() {
            if let Some(existing) = self
                .active()?
                .into_iter()
                .find(|p| p.signature() == signature)
            {
                tracing::info!(
                    plan_id = %existing.plan_id,
                    "active plan already covers this issue signature, skipping"
                );
                return Ok(None);
            }
        }
        if self.backend.get_active(&plan.plan_id)?.is_some()
            || self.backend.get_archived(&plan.plan_id)?.is_some()
        {
            return Err(MenderError::Storage(format!(
                "plan id collision: {}",
                plan.plan_id
            )));
        }
        self.backend.put_active(&plan)?;
        tracing::info!(plan_id = %plan.plan_id, summary = %plan.summary(), "plan created");
        Ok(Some(plan))
    }

    pub fn create(&self, draft: PlanDraft) -> Result<Option<Plan>> {
        self.create_at(draft, Utc::now())
    }

    pub fn create_at(&self, draft: PlanDraft, created_at: DateTime<Utc>) -> Result<Option<Plan>> {
        let plan = self.prepare(draft, created_at);
        self.insert(plan)
    }

    /// Look a plan up in the active collection, then the archive.
    pub fn get(&self, plan_id: &str) -> Result<Plan> {
        paths::validate_plan_id(plan_id)?;
        if let Some(plan) = self.backend.get_active(plan_id)? {
            return Ok(plan);
        }
        self.backend
            .get_archived(plan_id)?
            .ok_or_else(|| MenderError::PlanNotFound(plan_id.to_string()))
    }

    /// All plans, optionally filtered by status, newest first.
    pub fn list(&self, status: Option<PlanStatus>) -> Result<Vec<Plan>> {
        let mut plans = self.backend.active()?;
        plans.extend(self.backend.archived()?);
        if let Some(status) = status {
            plans.retain(|p| p.status == status);
        }
        sort_newest_first(&mut plans);
        Ok(plans)
    }

    /// Non-terminal plans, newest first.
    pub fn active(&self) -> Result<Vec<Plan>> {
        let mut plans = self.backend.active()?;
        plans.retain(|p| !p.status.is_terminal());
        sort_newest_first(&mut plans);
        Ok(plans)
    }

    pub fn pending(&self) -> Result<Vec<Plan>> {
        let mut plans = self.active()?;
        plans.retain(|p| p.status == PlanStatus::Pending);
        Ok(plans)
    }

    /// Fingerprints already answered by a non-terminal plan.
    pub fn covered_fingerprints(&self) -> Result<HashSet<String>> {
        Ok(self
            .active()?
            .into_iter()
            .flat_map(|p| p.draft.fingerprints)
            .collect())
    }

    /// Resolve an operator-supplied selector against pending plans.
    ///
    /// `None` picks the newest pending plan. Otherwise an exact id wins, then
    /// the newest plan whose id starts with the selector, then the newest
    /// whose id contains it.
    pub fn resolve_pending(&self, selector: Option<&str>) -> Result<Plan> {
        let pending = self.pending()?;
        if pending.is_empty() {
            return Err(MenderError::NoPendingPlans);
        }
        let Some(sel) = selector.map(str::trim).filter(|s| !s.is_empty()) else {
            return pending.into_iter().next().ok_or(MenderError::NoPendingPlans);
        };

        let found = pending
            .iter()
            .position(|p| p.plan_id == sel)
            .or_else(|| pending.iter().position(|p| p.plan_id.starts_with(sel)))
            .or_else(|| pending.iter().position(|p| p.plan_id.contains(sel)));

        match found {
            Some(i) => Ok(pending[i].clone()),
            None => Err(MenderError::NoMatchingPlan {
                selector: sel.to_string(),
                available: pending
                    .iter()
                    .map(|p| p.plan_id.as_str())
                    .collect::<Vec<_>>()
                    .join(", "),
            }),
        }
    }

    /// Move a plan along the lifecycle, stamping the matching timestamp.
    pub fn transition(&self, plan_id: &str, to: PlanStatus, update: PlanUpdate) -> Result<Plan> {
        self.transition_at(plan_id, to, update, Utc::now())
    }

    pub fn transition_at(
        &self,
        plan_id: &str,
        to: PlanStatus,
        update: PlanUpdate,
        now: DateTime<Utc>,
    ) -> Result<Plan> {
        let mut plan = match self.backend.get_active(plan_id)? {
            Some(p) => p,
            None => {
                return match self.backend.get_archived(plan_id)? {
                    Some(archived) => Err(MenderError::InvalidTransition {
                        from: archived.status.to_string(),
                        to: to.to_string(),
                        reason: "plan is archived".into(),
                    }),
                    None => Err(MenderError::PlanNotFound(plan_id.to_string())),
                };
            }
        };

        if !plan.status.can_transition_to(to) {
            return Err(MenderError::InvalidTransition {
                from: plan.status.to_string(),
                to: to.to_string(),
                reason: if plan.status.is_terminal() {
                    "terminal state".into()
                } else {
                    "not a lifecycle edge".into()
                },
            });
        }

        match to {
            PlanStatus::Approved => plan.approved_at = Some(now),
            PlanStatus::Rejected => {
                plan.rejected_at = Some(now);
                plan.rejection_reason = update.reason;
            }
            PlanStatus::Completed | PlanStatus::Failed => {
                plan.executed_at = Some(now);
                if update.result.is_some() {
                    plan.result = update.result;
                }
            }
            PlanStatus::Pending => {}
        }
        let from = plan.status;
        plan.status = to;
        self.backend.put_active(&plan)?;
        tracing::info!(plan_id, %from, %to, "plan transitioned");
        Ok(plan)
    }

    pub fn mark_notified(&self, plan_id: &str, at: DateTime<Utc>) -> Result<Plan> {
        let mut plan = self
            .backend
            .get_active(plan_id)?
            .ok_or_else(|| MenderError::PlanNotFound(plan_id.to_string()))?;
        plan.notification_timestamp = Some(at);
        self.backend.put_active(&plan)?;
        Ok(plan)
    }

    /// Move a terminal plan into the archive. Happens exactly once per plan.
    pub fn archive(&self, plan_id: &str) -> Result<Plan> {
        if self.backend.get_archived(plan_id)?.is_some() {
            return Err(MenderError::AlreadyArchived(plan_id.to_string()));
        }
        let plan = self
            .backend
            .get_active(plan_id)?
            .ok_or_else(|| MenderError::PlanNotFound(plan_id.to_string()))?;
        if !plan.status.is_terminal() {
            return Err(MenderError::InvalidTransition {
                from: plan.status.to_string(),
                to: "archive".into(),
                reason: "only terminal plans can be archived".into(),
            });
        }
        self.backend.archive(&plan)?;
        tracing::debug!(plan_id, status = %plan.status, "plan archived");
        Ok(plan)
    }

    /// Archive terminal plans left active by an interrupted process.
    /// Returns the number of plans recovered.
    pub fn recover(&self) -> Result<usize> {
        let mut count = 0;
        for plan in self.backend.active()? {
            if !plan.status.is_terminal() {
                continue;
            }
            if self.backend.get_archived(&plan.plan_id)?.is_some() {
                self.backend.remove_active(&plan.plan_id)?;
            } else {
                self.backend.archive(&plan)?;
            }
            tracing::warn!(plan_id = %plan.plan_id, status = %plan.status, "recovered unarchived terminal plan");
            count += 1;
        }
        Ok(count)
    }
}

fn sort_newest_first(plans: &mut [Plan]) {
    plans.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| b.plan_id.cmp(&a.plan_id))
    });
}

/// `YYYYMMDD_HHMMSS_xxxx`, sortable by creation time.
fn new_plan_id(created_at: DateTime<Utc>) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{}_{}", created_at.format("%Y%m%d_%H%M%S"), &suffix[..4])
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
