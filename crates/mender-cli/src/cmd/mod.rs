pub mod config;
pub mod cycle;
pub mod dedup;
pub mod init;
pub mod plan;

use anyhow::Context;
use mender_core::{config::Config, orchestrator::Orchestrator};
use std::path::Path;

/// Load the config and build the orchestrator; `--dry-run` overrides the
/// configured value only to turn it on.
pub fn load_orchestrator(root: &Path, dry_run: bool) -> anyhow::Result<(Config, Orchestrator)> {
    let mut config = Config::load(root).context("failed to load config")?;
    if dry_run {
        config.agent.dry_run = true;
    }
    let orchestrator =
        Orchestrator::from_config(root, &config).context("failed to set up mender")?;
    Ok((config, orchestrator))
}
