use super::load_orchestrator;
use crate::output::{ellipsize, print_json, print_table};
use anyhow::Context;
use mender_core::{
    config::Config,
    orchestrator::ReinvestigateOutcome,
    plan::Plan,
    store::PlanStore,
    types::PlanStatus,
};
use std::path::Path;
use std::str::FromStr;

fn open_store(root: &Path) -> anyhow::Result<PlanStore> {
    let config = Config::load(root).context("failed to load config")?;
    PlanStore::open(root, config.store.backend).context("failed to open plan store")
}

// ---------------------------------------------------------------------------
// approve / reject / reinvestigate
// ---------------------------------------------------------------------------

pub fn approve(
    root: &Path,
    id: Option<&str>,
    defer: bool,
    dry_run: bool,
    json: bool,
) -> anyhow::Result<()> {
    let (_, mut orchestrator) = load_orchestrator(root, dry_run)?;

    let plan = if defer {
        orchestrator.approve_deferred(id)
    } else {
        orchestrator.approve(id)
    }
    .context("approve failed")?;

    if json {
        print_json(&plan)?;
        if plan.status == PlanStatus::Failed {
            anyhow::bail!("plan {} failed", plan.plan_id);
        }
        return Ok(());
    }
    match plan.status {
        PlanStatus::Approved => {
            println!("Approved {}; it runs on the next cycle.", plan.plan_id)
        }
        PlanStatus::Completed => println!("Completed {}: {}", plan.plan_id, outcome(&plan)),
        PlanStatus::Rejected => println!(
            "Closed {} without running it: {}",
            plan.plan_id,
            plan.rejection_reason.as_deref().unwrap_or("-")
        ),
        _ => {
            println!("Failed {}: {}", plan.plan_id, outcome(&plan));
            anyhow::bail!("plan {} failed", plan.plan_id);
        }
    }
    Ok(())
}

pub fn reject(root: &Path, id: Option<&str>, reason: Option<&str>, json: bool) -> anyhow::Result<()> {
    let (_, mut orchestrator) = load_orchestrator(root, false)?;
    let plan = orchestrator.reject(id, reason).context("reject failed")?;

    if json {
        print_json(&plan)?;
    } else {
        println!(
            "Rejected {}: {}",
            plan.plan_id,
            plan.rejection_reason.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}

pub fn reinvestigate(root: &Path, id: Option<&str>, json: bool) -> anyhow::Result<()> {
    let (_, mut orchestrator) = load_orchestrator(root, false)?;
    let outcome = orchestrator.reinvestigate(id).context("reinvestigate failed")?;

    match outcome {
        ReinvestigateOutcome::Resolved(plan) => {
            if json {
                print_json(&serde_json::json!({ "outcome": "resolved", "plan": plan }))?;
            } else {
                println!("Closed {}: the host no longer reports any issue.", plan.plan_id);
            }
        }
        ReinvestigateOutcome::Superseded { old, new } => {
            if json {
                print_json(&serde_json::json!({
                    "outcome": "superseded",
                    "old": old,
                    "new": new,
                }))?;
            } else {
                println!("Replaced {} with {}.", old.plan_id, new.plan_id);
                println!("Next: mender show {}", new.plan_id);
            }
        }
        ReinvestigateOutcome::Unchanged { plan, reason } => {
            if json {
                print_json(&serde_json::json!({
                    "outcome": "unchanged",
                    "plan": plan,
                    "reason": reason,
                }))?;
            } else {
                println!("Kept {} pending: {reason}", plan.plan_id);
            }
        }
    }
    Ok(())
}

fn outcome(plan: &Plan) -> String {
    plan.result
        .as_ref()
        .map(|r| r.describe())
        .unwrap_or_else(|| "no result recorded".to_string())
}

// ---------------------------------------------------------------------------
// list / show
// ---------------------------------------------------------------------------

pub fn list(root: &Path, status: Option<&str>, json: bool) -> anyhow::Result<()> {
    let status = status
        .map(PlanStatus::from_str)
        .transpose()
        .context("invalid --status")?;
    let plans = open_store(root)?.list(status).context("failed to list plans")?;

    if json {
        return print_json(&plans);
    }
    if plans.is_empty() {
        println!("No plans.");
        return Ok(());
    }
    let rows = plans
        .iter()
        .map(|p| {
            vec![
                p.plan_id.clone(),
                p.status.to_string(),
                p.draft.severity.to_string(),
                format!("{:.2}", p.draft.confidence),
                p.created_at.format("%Y-%m-%d %H:%M").to_string(),
                ellipsize(p.summary(), 50),
            ]
        })
        .collect();
    print_table(&["ID", "STATUS", "SEVERITY", "CONF", "CREATED", "SUMMARY"], rows);
    Ok(())
}

pub fn show(root: &Path, id: &str, json: bool) -> anyhow::Result<()> {
    let plan = open_store(root)?
        .get(id)
        .with_context(|| format!("failed to load plan '{id}'"))?;

    if json {
        return print_json(&plan);
    }

    println!("Plan:       {}", plan.plan_id);
    println!("Status:     {}", plan.status);
    println!("Severity:   {}", plan.draft.severity);
    println!("Confidence: {:.2}", plan.draft.confidence);
    println!("Risk:       {}", plan.draft.risk);
    println!("Created:    {}", plan.created_at.to_rfc3339());
    println!("Summary:    {}", plan.summary());
    if !plan.draft.root_cause.is_empty() {
        println!("Root cause: {}", plan.draft.root_cause);
    }

    section("Triggered by", plan.draft.fingerprints.iter());
    section("Evidence", plan.draft.evidence.iter());
    section("Prechecks", plan.draft.prechecks.iter());
    if !plan.draft.steps.is_empty() {
        println!("\nSteps:");
        for s in &plan.draft.steps {
            match &s.command {
                Some(cmd) => println!("  {}. {}\n     $ {cmd}", s.step, s.action),
                None => println!("  {}. {}", s.step, s.action),
            }
        }
    }
    section("Postchecks", plan.draft.postchecks.iter());
    section("Rollback", plan.draft.rollback.iter());
    section("Do not execute if", plan.draft.do_not_execute_if.iter());
    if let Some(notes) = &plan.draft.notes {
        println!("\nNotes: {notes}");
    }

    if let Some(reason) = &plan.rejection_reason {
        println!("\nRejected: {reason}");
    }
    if let Some(result) = &plan.result {
        println!("\nResult: {}", result.describe());
        if let Some(rollback) = &result.rollback {
            section("Rollback advised", rollback.iter());
        }
    }
    Ok(())
}

fn section<'a>(title: &str, items: impl ExactSizeIterator<Item = &'a String>) {
    if items.len() == 0 {
        return;
    }
    println!("\n{title}:");
    for item in items {
        println!("  - {item}");
    }
}
