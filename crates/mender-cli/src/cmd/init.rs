use anyhow::Context;
use mender_core::{config::Config, io, paths};
use std::path::Path;

pub fn run(root: &Path) -> anyhow::Result<()> {
    println!("Initializing mender in: {}", root.display());

    for dir in [
        paths::MENDER_DIR,
        paths::ACTIVE_PLANS_DIR,
        paths::ARCHIVED_PLANS_DIR,
    ] {
        let p = root.join(dir);
        io::ensure_dir(&p).with_context(|| format!("failed to create {}", p.display()))?;
    }

    let config_path = paths::config_path(root);
    if config_path.exists() {
        println!("  exists:  {}", paths::CONFIG_FILE);
    } else {
        Config::default()
            .save(root)
            .context("failed to write config.yaml")?;
        println!("  created: {}", paths::CONFIG_FILE);
    }

    println!();
    println!("Next: add collectors to {} and run 'mender config validate'", paths::CONFIG_FILE);
    Ok(())
}
