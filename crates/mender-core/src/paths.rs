use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use crate::error::{MenderError, Result};

// ---------------------------------------------------------------------------
// Directory constants
// ---------------------------------------------------------------------------

pub const MENDER_DIR: &str = ".mender";
pub const ACTIVE_PLANS_DIR: &str = ".mender/plans/active";
pub const ARCHIVED_PLANS_DIR: &str = ".mender/plans/archive";

pub const CONFIG_FILE: &str = ".mender/config.yaml";
pub const PLANS_DB_FILE: &str = ".mender/plans.redb";
pub const DEDUP_FILE: &str = ".mender/dedup.json";
pub const RATE_JOURNAL_FILE: &str = ".mender/rate_journal.json";

pub const PLAN_EXT: &str = "json";

// ---------------------------------------------------------------------------
// Plan id validation
// ---------------------------------------------------------------------------

static PLAN_ID_RE: OnceLock<Regex> = OnceLock::new();

fn plan_id_re() -> &'static Regex {
    PLAN_ID_RE.get_or_init(|| Regex::new(r"^[0-9A-Za-z][0-9A-Za-z_\-]*$").expect("plan id regex is valid"))
}

/// Plan ids become file names, so anything beyond word characters and
/// dashes is refused before a path is built from one.
pub fn validate_plan_id(plan_id: &str) -> Result<()> {
    if plan_id.len() > 64 || !plan_id_re().is_match(plan_id) {
        return Err(MenderError::InvalidPlanId(plan_id.to_string()));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub fn mender_dir(root: &Path) -> PathBuf {
    root.join(MENDER_DIR)
}

pub fn config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE)
}

pub fn active_plans_dir(root: &Path) -> PathBuf {
    root.join(ACTIVE_PLANS_DIR)
}

pub fn archived_plans_dir(root: &Path) -> PathBuf {
    root.join(ARCHIVED_PLANS_DIR)
}

pub fn active_plan_path(root: &Path, plan_id: &str) -> PathBuf {
    active_plans_dir(root).join(format!("{plan_id}.{PLAN_EXT}"))
}

pub fn archived_plan_path(root: &Path, plan_id: &str) -> PathBuf {
    archived_plans_dir(root).join(format!("{plan_id}.{PLAN_EXT}"))
}

pub fn plans_db_path(root: &Path) -> PathBuf {
    root.join(PLANS_DB_FILE)
}

pub fn dedup_path(root: &Path) -> PathBuf {
    root.join(DEDUP_FILE)
}

pub fn rate_journal_path(root: &Path) -> PathBuf {
    root.join(RATE_JOURNAL_FILE)
}
