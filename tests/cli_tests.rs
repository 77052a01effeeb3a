//! CLI surface tests for the `check` and `triggers validate` commands.

use std::io::Write;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::NamedTempFile;

fn write_file(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("temp file");
    write!(file, "{contents}").expect("write temp file");
    file
}

fn rollwatch() -> Command {
    Command::cargo_bin("rollwatch").expect("binary built")
}

#[test]
fn check_accepts_a_valid_config() {
    let config = write_file(
        r#"
        [[components]]
        name = "parser"
        strategy = "conservative"

        [rollout]
        error_threshold = 3

        [logging]
        level = "warn"
        format = "pretty"
        "#,
    );

    rollwatch()
        .args(["check", "--config"])
        .arg(config.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("Config OK"))
        .stdout(predicate::str::contains("parser"));
}

#[test]
fn check_rejects_invalid_rollout_settings() {
    let config = write_file(
        r#"
        [rollout]
        rollout_increment = 0.0
        "#,
    );

    rollwatch()
        .args(["check", "--config"])
        .arg(config.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("rollout_increment"));
}

#[test]
fn check_fails_on_missing_file() {
    rollwatch()
        .args(["check", "--config", "/nonexistent/rollwatch.toml"])
        .assert()
        .failure();
}

#[test]
fn triggers_validate_accepts_a_good_document() {
    let doc = write_file(
        r#"{"triggers": [{
            "trigger_id": "cpu-guard",
            "name": "CPU guard",
            "trigger_type": "threshold_based",
            "conditions": [{"metric": "cpu_usage", "operator": ">", "threshold": 90.0}],
            "target_components": ["parser"],
            "action": {"implementation": "baseline", "percentage": 0.0}
        }]}"#,
    );

    rollwatch()
        .args(["triggers", "validate"])
        .arg(doc.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("1 trigger(s) valid"));
}

#[test]
fn triggers_validate_rejects_missing_conditions() {
    let doc = write_file(
        r#"{"triggers": [{
            "trigger_id": "broken",
            "name": "no conditions",
            "trigger_type": "threshold_based",
            "target_components": ["parser"],
            "action": {"implementation": "baseline", "percentage": 0.0}
        }]}"#,
    );

    rollwatch()
        .args(["triggers", "validate"])
        .arg(doc.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("requires at least one condition"));
}

#[test]
fn check_validates_the_configured_trigger_document() {
    let doc = write_file(r#"{"triggers": []}"#);
    let config = write_file(&format!(
        "triggers_file = {:?}\n",
        doc.path().to_string_lossy()
    ));

    rollwatch()
        .args(["check", "--config"])
        .arg(config.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("0 valid"));
}
