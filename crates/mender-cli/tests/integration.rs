#![allow(deprecated)]
use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;
use tempfile::TempDir;

fn mender(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("mender").unwrap();
    cmd.current_dir(dir.path())
        .env("MENDER_ROOT", dir.path())
        .env_remove("RUST_LOG");
    cmd
}

fn init_host(dir: &TempDir) {
    mender(dir).arg("init").assert().success();
}

/// A host whose only collector reports an unhealthy `web1` container, with
/// an analysis command that does not exist so built-in playbooks answer.
fn init_unhealthy_host(dir: &TempDir) {
    init_host(dir);
    let evidence = dir.path().join("evidence.json");
    std::fs::write(
        &evidence,
        r#"{"issues":[{"type":"container_unhealthy","container":"web1","message":"web1 failed 3 health checks"}],"metrics":{"containers":4}}"#,
    )
    .unwrap();
    let config = format!(
        "agent:\n  hostname: test-host\nanalysis:\n  command: mender-test-missing-analyzer\ncollectors:\n  - name: docker\n    command: cat {}\n",
        evidence.display()
    );
    std::fs::write(dir.path().join(".mender/config.yaml"), config).unwrap();
}

fn json_of(cmd: &mut Command) -> Value {
    let out = cmd.assert().success().get_output().stdout.clone();
    serde_json::from_slice(&out).unwrap()
}

fn run_cycle(dir: &TempDir) -> Value {
    json_of(mender(dir).args(["--json", "run"]))
}

// ---------------------------------------------------------------------------
// init / config
// ---------------------------------------------------------------------------

#[test]
fn init_creates_state_tree() {
    let dir = TempDir::new().unwrap();
    mender(&dir)
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("created: .mender/config.yaml"));

    assert!(dir.path().join(".mender/plans/active").is_dir());
    assert!(dir.path().join(".mender/plans/archive").is_dir());
    assert!(dir.path().join(".mender/config.yaml").exists());
}

#[test]
fn init_is_idempotent_and_keeps_config() {
    let dir = TempDir::new().unwrap();
    init_host(&dir);
    std::fs::write(dir.path().join(".mender/config.yaml"), "agent:\n  hostname: keep-me\n").unwrap();

    mender(&dir)
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("exists:  .mender/config.yaml"));
    let config = std::fs::read_to_string(dir.path().join(".mender/config.yaml")).unwrap();
    assert!(config.contains("keep-me"));
}

#[test]
fn commands_before_init_fail() {
    let dir = TempDir::new().unwrap();
    mender(&dir)
        .arg("list")
        .assert()
        .failure()
        .stderr(predicate::str::contains("mender init"));
}

#[test]
fn default_config_validates_with_warnings() {
    let dir = TempDir::new().unwrap();
    init_host(&dir);
    mender(&dir)
        .args(["config", "validate"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[warning] no collectors configured"));
}

#[test]
fn invalid_config_fails_validation() {
    let dir = TempDir::new().unwrap();
    init_host(&dir);
    std::fs::write(
        dir.path().join(".mender/config.yaml"),
        "dedup:\n  suppress_hours: 0\n",
    )
    .unwrap();

    mender(&dir)
        .args(["config", "validate"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("[error] dedup.suppress_hours must be positive"))
        .stderr(predicate::str::contains("config validation found errors"));
}

// ---------------------------------------------------------------------------
// run / list / show
// ---------------------------------------------------------------------------

#[test]
fn run_proposes_one_plan_per_problem() {
    let dir = TempDir::new().unwrap();
    init_unhealthy_host(&dir);

    let first = run_cycle(&dir);
    let id = first["created"].as_str().expect("plan created").to_string();
    assert_eq!(first["issues_seen"], 1);

    let second = run_cycle(&dir);
    assert!(second["created"].is_null());
    assert_eq!(second["admitted"], 0);

    let plans = json_of(mender(&dir).args(["--json", "list"]));
    assert_eq!(plans.as_array().unwrap().len(), 1);

    let plan = json_of(mender(&dir).args(["--json", "show", &id]));
    assert_eq!(plan["status"], "pending");
    assert_eq!(plan["fingerprints"][0], "docker:container_unhealthy:web1");
    assert_eq!(plan["steps"][0]["command"], "docker restart web1");
}

#[test]
fn show_renders_steps() {
    let dir = TempDir::new().unwrap();
    init_unhealthy_host(&dir);
    let id = run_cycle(&dir)["created"].as_str().unwrap().to_string();

    mender(&dir)
        .args(["show", &id])
        .assert()
        .success()
        .stdout(predicate::str::contains("$ docker restart web1"))
        .stdout(predicate::str::contains("Status:     pending"));
}

#[test]
fn list_rejects_unknown_status() {
    let dir = TempDir::new().unwrap();
    init_host(&dir);
    mender(&dir)
        .args(["list", "--status", "bogus"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid status"));
}

#[test]
fn dedup_stats_counts_repeats() {
    let dir = TempDir::new().unwrap();
    init_unhealthy_host(&dir);
    run_cycle(&dir);
    run_cycle(&dir);

    let stats = json_of(mender(&dir).args(["--json", "dedup", "stats"]));
    assert_eq!(stats["active_alerts"], 1);
    assert_eq!(stats["total_suppressed"], 1);
    assert_eq!(stats["alerts"]["docker:container_unhealthy:web1"], 2);
}

// ---------------------------------------------------------------------------
// approve / reject
// ---------------------------------------------------------------------------

#[test]
fn approve_without_pending_plans_fails() {
    let dir = TempDir::new().unwrap();
    init_host(&dir);
    mender(&dir)
        .arg("approve")
        .assert()
        .failure()
        .stderr(predicate::str::contains("no pending plans"));
}

#[test]
fn reject_archives_with_reason() {
    let dir = TempDir::new().unwrap();
    init_unhealthy_host(&dir);
    let id = run_cycle(&dir)["created"].as_str().unwrap().to_string();

    mender(&dir)
        .args(["reject", &id[..15], "--reason", "maintenance window"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Rejected"));

    assert!(dir
        .path()
        .join(format!(".mender/plans/archive/{id}.json"))
        .exists());
    let rejected = json_of(mender(&dir).args(["--json", "list", "--status", "rejected"]));
    assert_eq!(rejected[0]["rejection_reason"], "maintenance window");
}

#[test]
fn dry_run_approve_completes_without_executing() {
    let dir = TempDir::new().unwrap();
    init_unhealthy_host(&dir);
    let id = run_cycle(&dir)["created"].as_str().unwrap().to_string();

    let plan = json_of(mender(&dir).args(["--json", "--dry-run", "approve"]));
    assert_eq!(plan["plan_id"], id.as_str());
    assert_eq!(plan["status"], "completed");
    assert_eq!(plan["result"]["dry_run"], true);
    assert!(!dir.path().join(".mender/rate_journal.json").exists());
}

#[test]
fn failed_plan_exits_nonzero_with_json() {
    let dir = TempDir::new().unwrap();
    init_unhealthy_host(&dir);
    let config_path = dir.path().join(".mender/config.yaml");
    let mut config = std::fs::read_to_string(&config_path).unwrap();
    config.push_str("safety:\n  never_restart: [web1]\n");
    std::fs::write(&config_path, config).unwrap();
    let id = run_cycle(&dir)["created"].as_str().unwrap().to_string();

    let out = mender(&dir)
        .args(["--json", "approve", &id])
        .assert()
        .failure()
        .stderr(predicate::str::contains(format!("plan {id} failed")))
        .get_output()
        .stdout
        .clone();
    let plan: Value = serde_json::from_slice(&out).unwrap();
    assert_eq!(plan["status"], "failed");
    assert_eq!(plan["result"]["error"]["kind"], "safety_violation");
}

#[test]
fn deferred_approval_waits_for_next_cycle() {
    let dir = TempDir::new().unwrap();
    init_unhealthy_host(&dir);
    let id = run_cycle(&dir)["created"].as_str().unwrap().to_string();

    mender(&dir)
        .args(["approve", &id, "--defer"])
        .assert()
        .success()
        .stdout(predicate::str::contains("runs on the next cycle"));

    let report = json_of(mender(&dir).args(["--json", "--dry-run", "run"]));
    assert_eq!(report["executed"][0], id.as_str());
    let plan = json_of(mender(&dir).args(["--json", "show", &id]));
    assert_eq!(plan["status"], "completed");
}
