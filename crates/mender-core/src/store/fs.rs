use std::path::{Path, PathBuf};

use super::PlanBackend;
use crate::error::{MenderError, Result};
use crate::io::{atomic_write, write_once};
use crate::paths;
use crate::plan::Plan;

/// One JSON file per plan under `plans/active/` and `plans/archive/`.
pub struct FsBackend {
    root: PathBuf,
}

impl FsBackend {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }
}

impl PlanBackend for FsBackend {
    fn get_active(&self, plan_id: &str) -> Result<Option<Plan>> {
        read_plan(&paths::active_plan_path(&self.root, plan_id))
    }

    fn put_active(&self, plan: &Plan) -> Result<()> {
        let data = serde_json::to_vec_pretty(plan)?;
        atomic_write(&paths::active_plan_path(&self.root, &plan.plan_id), &data)
    }

    fn remove_active(&self, plan_id: &str) -> Result<()> {
        match std::fs::remove_file(paths::active_plan_path(&self.root, plan_id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn get_archived(&self, plan_id: &str) -> Result<Option<Plan>> {
        read_plan(&paths::archived_plan_path(&self.root, plan_id))
    }

    fn archive(&self, plan: &Plan) -> Result<()> {
        let data = serde_json::to_vec_pretty(plan)?;
        let target = paths::archived_plan_path(&self.root, &plan.plan_id);
        match write_once(&target, &data) {
            Ok(()) => {}
            Err(MenderError::Io(e)) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(MenderError::AlreadyArchived(plan.plan_id.clone()));
            }
            Err(e) => return Err(e),
        }
        self.remove_active(&plan.plan_id)
    }

    fn active(&self) -> Result<Vec<Plan>> {
        read_dir(&paths::active_plans_dir(&self.root))
    }

    fn archived(&self) -> Result<Vec<Plan>> {
        read_dir(&paths::archived_plans_dir(&self.root))
    }
}

fn read_plan(path: &Path) -> Result<Option<Plan>> {
    let raw = match std::fs::read(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    serde_json::from_slice(&raw)
        .map(Some)
        .map_err(|e| MenderError::Storage(format!("{}: {e}", path.display())))
}

/// Load every plan file in `dir`. Unreadable files are logged and skipped so
/// one bad record does not hide the rest.
fn read_dir(dir: &Path) -> Result<Vec<Plan>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut plans = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some(paths::PLAN_EXT) {
            continue;
        }
        match read_plan(&path) {
            Ok(Some(plan)) => plans.push(plan),
            Ok(None) => {}
            Err(e) => tracing::warn!(error = %e, "skipping unreadable plan file"),
        }
    }
    Ok(plans)
}
