use super::load_orchestrator;
use crate::output::print_json;
use anyhow::Context;
use mender_core::{intent::KeywordIntentParser, orchestrator::build_channel};
use std::path::Path;

pub fn run(root: &Path, dry_run: bool, json: bool) -> anyhow::Result<()> {
    let (_, mut orchestrator) = load_orchestrator(root, dry_run)?;
    let report = orchestrator.run_cycle().context("evidence cycle failed")?;

    if json {
        return print_json(&report);
    }

    println!(
        "Cycle on {}: {} issue(s), {} new, {} already covered",
        orchestrator.hostname(),
        report.issues_seen,
        report.admitted - report.already_covered,
        report.already_covered
    );
    if report.recovered > 0 {
        println!("  recovered: {} plan(s) left mid-archive", report.recovered);
    }
    for id in &report.executed {
        println!("  executed: {id}");
    }
    match (&report.created, &report.note) {
        (Some(id), _) => {
            println!("  created:  {id}");
            println!("Next: mender show {id}");
        }
        (None, Some(note)) => println!("  no plan:  {note}"),
        (None, None) => {}
    }
    Ok(())
}

pub fn daemon(root: &Path, dry_run: bool, cycles: Option<u64>) -> anyhow::Result<()> {
    let (config, mut orchestrator) = load_orchestrator(root, dry_run)?;
    let channel = build_channel(&config).context("failed to set up command channel")?;
    orchestrator.run_daemon(channel.as_ref(), &KeywordIntentParser, cycles);
    Ok(())
}
