use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;

fn paideia() -> Command {
    Command::cargo_bin("paideia").unwrap()
}

/// A four-cell design (control vs recognition+multi-agent) with zero call
/// delay so the whole matrix runs in milliseconds.
const CONFIG: &str = r#"version: 1
description: "cli smoke"
settings:
  workers: 4
  call_delay_ms: 0
  repetitions: 2
  min_score: 70.0
scenarios:
  - id: s1
    name: "Recursion base case"
    context: "The learner's recursion never terminates."
    follow_up_turns:
      - learner_action: "The learner insists the base case is fine."
  - id: s2
    name: "Premature abstraction"
    context: "The learner wants a plugin system for two features."
profiles:
  - name: control
    provider: fake
    model: fake-model
  - name: recog_multi
    provider: fake
    model: fake-model
    recognition: true
    multi_agent_tutor: true
"#;

fn write_config(dir: &Path) -> std::path::PathBuf {
    let path = dir.join("eval.yaml");
    std::fs::write(&path, CONFIG).unwrap();
    path
}

fn extract_run_id(stdout: &[u8]) -> String {
    let text = String::from_utf8_lossy(stdout);
    text.lines()
        .find_map(|l| l.strip_prefix("run eval-"))
        .map(|rest| format!("eval-{rest}"))
        .expect("run id line in stdout")
}

#[test]
fn init_writes_sample_config_once() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("eval.yaml");

    paideia()
        .args(["init", "--config"])
        .arg(&config)
        .assert()
        .success()
        .stderr(predicate::str::contains("created"));
    assert!(config.exists());

    // second init refuses to clobber
    let before = std::fs::read_to_string(&config).unwrap();
    paideia()
        .args(["init", "--config"])
        .arg(&config)
        .assert()
        .success()
        .stderr(predicate::str::contains("already exists"));
    assert_eq!(std::fs::read_to_string(&config).unwrap(), before);
}

#[test]
fn run_analyze_and_list_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path());
    let db = dir.path().join("evaluations.db");

    let assert = paideia()
        .args(["run", "--description", "smoke"])
        .arg("--config")
        .arg(&config)
        .arg("--db")
        .arg(&db)
        .assert()
        .success()
        .stdout(predicate::str::contains("tests: 8 total, 8 succeeded, 0 failed"))
        .stdout(predicate::str::contains("mean overall score"));
    let run_id = extract_run_id(&assert.get_output().stdout);

    paideia()
        .arg("analyze")
        .arg(&run_id)
        .arg("--db")
        .arg(&db)
        .assert()
        .success()
        .stdout(predicate::str::contains("factorial ANOVA (overall)"))
        .stdout(predicate::str::contains("marginal means"))
        .stdout(predicate::str::contains("recognition"))
        .stdout(predicate::str::contains("r1_t1_l0"))
        .stdout(predicate::str::contains("range="));

    // JSON output carries the full seven-term table
    let json_out = paideia()
        .arg("analyze")
        .arg(&run_id)
        .args(["--json", "--db"])
        .arg(&db)
        .assert()
        .success();
    let anova: serde_json::Value =
        serde_json::from_slice(&json_out.get_output().stdout).unwrap();
    assert_eq!(anova["n"], 8);
    assert_eq!(anova["effects"].as_array().unwrap().len(), 7);

    paideia()
        .args(["runs", "--db"])
        .arg(&db)
        .assert()
        .success()
        .stdout(predicate::str::contains(&run_id))
        .stdout(predicate::str::contains("completed"));
}

#[test]
fn rejudge_reports_a_summary_and_keeps_history() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path());
    let db = dir.path().join("evaluations.db");

    let assert = paideia()
        .arg("run")
        .arg("--config")
        .arg(&config)
        .arg("--db")
        .arg(&db)
        .assert()
        .success();
    let run_id = extract_run_id(&assert.get_output().stdout);

    paideia()
        .arg("rejudge")
        .arg(&run_id)
        .arg("--config")
        .arg(&config)
        .arg("--db")
        .arg(&db)
        .assert()
        .success()
        .stdout(predicate::str::contains("8 examined, 8 rejudged, 0 skipped"));

    // the latest-judgment view analyze uses still sees one row per slot
    let json_out = paideia()
        .arg("analyze")
        .arg(&run_id)
        .args(["--json", "--db"])
        .arg(&db)
        .assert()
        .success();
    let anova: serde_json::Value =
        serde_json::from_slice(&json_out.get_output().stdout).unwrap();
    assert_eq!(anova["n"], 8);

    paideia()
        .args(["rejudge", "eval-2026-01-01-deadbeef", "--judge", "none"])
        .arg("--config")
        .arg(&config)
        .arg("--db")
        .arg(&db)
        .assert()
        .code(2);
}

#[test]
fn analyze_unknown_run_is_a_config_error() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("evaluations.db");

    paideia()
        .args(["analyze", "eval-2026-01-01-deadbeef", "--db"])
        .arg(&db)
        .assert()
        .code(2)
        .stderr(predicate::str::contains("run not found"));
}

#[test]
fn unknown_scenario_filter_fails_fast() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path());
    let db = dir.path().join("evaluations.db");

    paideia()
        .args(["run", "--scenario", "ghost"])
        .arg("--config")
        .arg(&config)
        .arg("--db")
        .arg(&db)
        .assert()
        .code(2);
}

#[test]
fn strict_mode_rejects_unknown_config_keys() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("eval.yaml");
    std::fs::write(&config, format!("{CONFIG}banana: true\n")).unwrap();
    let db = dir.path().join("evaluations.db");

    paideia()
        .args(["run", "--strict"])
        .arg("--config")
        .arg(&config)
        .arg("--db")
        .arg(&db)
        .assert()
        .code(2)
        .stderr(predicate::str::contains("banana"));
}
