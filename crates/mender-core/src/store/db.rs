//! redb-backed plan storage.
//!
//! Two tables keyed by plan id, each value a JSON-encoded [`Plan`]:
//! `ACTIVE_PLANS` (rewritten on every transition) and `ARCHIVED_PLANS`
//! (insert-only). Archival moves a record between them in one write
//! transaction, so a crash leaves the plan in exactly one table.

use std::path::Path;

use redb::{Database, ReadableTable, TableDefinition};

use super::PlanBackend;
use crate::error::{MenderError, Result};
use crate::plan::Plan;

// ---------------------------------------------------------------------------
// Table definitions
// ---------------------------------------------------------------------------

const ACTIVE_PLANS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("active_plans");
const ARCHIVED_PLANS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("archived_plans");

fn storage<E: std::fmt::Display>(e: E) -> MenderError {
    MenderError::Storage(e.to_string())
}

// ---------------------------------------------------------------------------
// RedbBackend
// ---------------------------------------------------------------------------

pub struct RedbBackend {
    db: Database,
}

impl RedbBackend {
    /// Open or create the database at `path`, creating both tables.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path).map_err(storage)?;
        let wt = db.begin_write().map_err(storage)?;
        wt.open_table(ACTIVE_PLANS).map_err(storage)?;
        wt.open_table(ARCHIVED_PLANS).map_err(storage)?;
        wt.commit().map_err(storage)?;
        Ok(Self { db })
    }

    fn get(&self, table: TableDefinition<&[u8], &[u8]>, plan_id: &str) -> Result<Option<Plan>> {
        let rt = self.db.begin_read().map_err(storage)?;
        let table = rt.open_table(table).map_err(storage)?;
        let found = table.get(plan_id.as_bytes()).map_err(storage)?;
        match found {
            Some(v) => Ok(Some(serde_json::from_slice(v.value()).map_err(storage)?)),
            None => Ok(None),
        }
    }

    fn all(&self, table: TableDefinition<&[u8], &[u8]>) -> Result<Vec<Plan>> {
        let rt = self.db.begin_read().map_err(storage)?;
        let table = rt.open_table(table).map_err(storage)?;
        let mut plans = Vec::new();
        for entry in table.iter().map_err(storage)? {
            let (k, v) = entry.map_err(storage)?;
            match serde_json::from_slice::<Plan>(v.value()) {
                Ok(plan) => plans.push(plan),
                Err(e) => tracing::warn!(
                    key = %String::from_utf8_lossy(k.value()),
                    error = %e,
                    "skipping undecodable plan record"
                ),
            }
        }
        Ok(plans)
    }
}

impl PlanBackend for RedbBackend {
    fn get_active(&self, plan_id: &str) -> Result<Option<Plan>> {
        self.get(ACTIVE_PLANS, plan_id)
    }

    fn put_active(&self, plan: &Plan) -> Result<()> {
        let value = serde_json::to_vec(plan)?;
        let wt = self.db.begin_write().map_err(storage)?;
        {
            let mut table = wt.open_table(ACTIVE_PLANS).map_err(storage)?;
            table
                .insert(plan.plan_id.as_bytes(), value.as_slice())
                .map_err(storage)?;
        }
        wt.commit().map_err(storage)?;
        Ok(())
    }

    fn remove_active(&self, plan_id: &str) -> Result<()> {
        let wt = self.db.begin_write().map_err(storage)?;
        {
            let mut table = wt.open_table(ACTIVE_PLANS).map_err(storage)?;
            table.remove(plan_id.as_bytes()).map_err(storage)?;
        }
        wt.commit().map_err(storage)?;
        Ok(())
    }

    fn get_archived(&self, plan_id: &str) -> Result<Option<Plan>> {
        self.get(ARCHIVED_PLANS, plan_id)
    }

    fn archive(&self, plan: &Plan) -> Result<()> {
        let key = plan.plan_id.as_bytes();
        let value = serde_json::to_vec(plan)?;
        let wt = self.db.begin_write().map_err(storage)?;
        {
            let mut archived = wt.open_table(ARCHIVED_PLANS).map_err(storage)?;
            if archived.get(key).map_err(storage)?.is_some() {
                // Dropping the uncommitted transaction aborts it.
                return Err(MenderError::AlreadyArchived(plan.plan_id.clone()));
            }
            archived.insert(key, value.as_slice()).map_err(storage)?;
            let mut active = wt.open_table(ACTIVE_PLANS).map_err(storage)?;
            active.remove(key).map_err(storage)?;
        }
        wt.commit().map_err(storage)?;
        Ok(())
    }

    fn active(&self) -> Result<Vec<Plan>> {
        self.all(ACTIVE_PLANS)
    }

    fn archived(&self) -> Result<Vec<Plan>> {
        self.all(ARCHIVED_PLANS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paths;
    use crate::plan::{PlanDraft, PlanUpdate};
    use crate::store::PlanStore;
    use crate::types::{PlanStatus, Severity};
    use tempfile::TempDir;

    #[test]
    fn plans_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let db_path = paths::plans_db_path(dir.path());
        let id = {
            let store = PlanStore::new(Box::new(RedbBackend::open(&db_path).unwrap()));
            let plan = store
                .create(PlanDraft::new("restart web1", Severity::Warning, 0.8))
                .unwrap()
                .unwrap();
            store
                .transition(&plan.plan_id, PlanStatus::Rejected, PlanUpdate::reason("no"))
                .unwrap();
            store.archive(&plan.plan_id).unwrap();
            plan.plan_id
        };

        let store = PlanStore::new(Box::new(RedbBackend::open(&db_path).unwrap()));
        let plan = store.get(&id).unwrap();
        assert_eq!(plan.status, PlanStatus::Rejected);
        assert!(store.active().unwrap().is_empty());
    }

    #[test]
    fn archive_moves_between_tables() {
        let dir = TempDir::new().unwrap();
        let backend = RedbBackend::open(&dir.path().join("p.redb")).unwrap();
        let store = PlanStore::new(Box::new(RedbBackend::open(&dir.path().join("q.redb")).unwrap()));
        let mut plan = store.prepare(PlanDraft::new("x", Severity::Info, 0.1), chrono::Utc::now());
        plan.status = PlanStatus::Completed;

        backend.put_active(&plan).unwrap();
        backend.archive(&plan).unwrap();
        assert!(backend.get_active(&plan.plan_id).unwrap().is_none());
        assert!(backend.get_archived(&plan.plan_id).unwrap().is_some());
        assert!(matches!(
            backend.archive(&plan),
            Err(MenderError::AlreadyArchived(_))
        ));
    }
}
