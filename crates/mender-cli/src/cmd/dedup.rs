use crate::output::{print_json, print_table};
use anyhow::Context;
use clap::Subcommand;
use mender_core::{config::Config, dedup::Deduplicator, paths};
use std::path::Path;

#[derive(Subcommand)]
pub enum DedupSubcommand {
    /// Show tracked fingerprints and how often each was suppressed
    Stats,
}

pub fn run(root: &Path, subcmd: DedupSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        DedupSubcommand::Stats => stats(root, json),
    }
}

fn stats(root: &Path, json: bool) -> anyhow::Result<()> {
    let config = Config::load(root).context("failed to load config")?;
    let dedup = Deduplicator::load(&paths::dedup_path(root), config.dedup.suppress_hours);
    let stats = dedup.stats();

    if json {
        return print_json(&stats);
    }

    println!(
        "{} active alert(s), {} suppressed repeat(s)",
        stats.active_alerts, stats.total_suppressed
    );
    if stats.alerts.is_empty() {
        return Ok(());
    }
    println!();
    let rows = stats
        .alerts
        .iter()
        .map(|(fp, count)| {
            let until = dedup
                .record(fp)
                .and_then(|r| r.suppressed_until)
                .map(|t| t.format("%Y-%m-%d %H:%M UTC").to_string())
                .unwrap_or_else(|| "-".to_string());
            vec![fp.clone(), count.to_string(), until]
        })
        .collect();
    print_table(&["FINGERPRINT", "SEEN", "SUPPRESSED UNTIL"], rows);
    Ok(())
}
