use std::path::{Path, PathBuf};

use assert_cmd::Command;
use tempfile::{tempdir, TempDir};

fn fixture() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join("WoWCombatLog-sample.txt")
}

/// Keep the binary away from the real config and data directories.
fn keyline(home: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("keyline").unwrap();
    cmd.env("HOME", home.path())
        .env("XDG_CONFIG_HOME", home.path().join("config"))
        .env("XDG_DATA_HOME", home.path().join("data"))
        .env("XDG_STATE_HOME", home.path().join("state"))
        .env_remove("RUST_LOG");
    cmd
}

fn stdout_of(cmd: &mut Command) -> String {
    let output = cmd.output().unwrap();
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8(output.stdout).unwrap()
}

fn db_arg(path: &Path) -> String {
    path.display().to_string()
}

#[test]
fn stats_on_a_fresh_database() {
    let home = tempdir().unwrap();
    let db = home.path().join("runs.db");

    let out = stdout_of(keyline(&home).args(["stats", "--db", &db_arg(&db)]));
    assert!(out.starts_with("runs 0"), "{out}");
    assert!(out.contains("best --:--"), "{out}");
}

#[test]
fn replay_prints_each_run_and_the_totals() {
    let home = tempdir().unwrap();
    let db = home.path().join("runs.db");
    let log = fixture();

    let out = stdout_of(keyline(&home).args(["replay", &db_arg(&log), "--db", &db_arg(&db)]));
    assert!(out.contains("+12 (variant 503): completed after 28:00, 2 deaths, 2 bosses"), "{out}");
    assert!(out.contains("+14 (variant 503): left activity"), "{out}");
    assert!(out.contains("runs 2  deaths 3  deaths/run 1.50  best 28:00"), "{out}");

    // Without --record nothing reaches the database.
    let stats = stdout_of(keyline(&home).args(["stats", "--db", &db_arg(&db)]));
    assert!(stats.starts_with("runs 0"), "{stats}");
}

#[test]
fn replay_survives_invalid_utf8_in_the_log() {
    let home = tempdir().unwrap();
    let db = home.path().join("runs.db");
    let log = home.path().join("WoWCombatLog-broken.txt");

    let mut bytes = std::fs::read(fixture()).unwrap();
    let cut = bytes.iter().position(|&b| b == b'\n').unwrap() + 1;
    bytes.splice(cut..cut, b"2/22 19:59:51.000  EMOTE,\"N\xFFpc\"\n".iter().copied());
    std::fs::write(&log, bytes).unwrap();

    let out = stdout_of(keyline(&home).args(["replay", &db_arg(&log), "--db", &db_arg(&db)]));
    assert!(out.contains("runs 2  deaths 3"), "{out}");
}

#[test]
fn recorded_replay_shows_up_in_history_and_export() {
    let home = tempdir().unwrap();
    let db = home.path().join("runs.db");
    let log = fixture();

    stdout_of(keyline(&home).args(["replay", &db_arg(&log), "--record", "--db", &db_arg(&db)]));

    let history = stdout_of(keyline(&home).args(["history", "--db", &db_arg(&db)]));
    assert_eq!(history.lines().count(), 2, "{history}");

    let csv = stdout_of(keyline(&home).args(["history", "--csv", "--db", &db_arg(&db)]));
    assert_eq!(csv.lines().count(), 3, "{csv}");

    let export = home.path().join("last.json");
    let out = stdout_of(keyline(&home).args([
        "export",
        &db_arg(&export),
        "--db",
        &db_arg(&db),
    ]));
    assert!(out.starts_with("exported to"), "{out}");
    let record = keyline::export::ExportRecord::from_json(&std::fs::read_to_string(&export).unwrap())
        .unwrap();
    assert_eq!(record.level, 14);
}

#[test]
fn reset_and_status_without_a_saved_run() {
    let home = tempdir().unwrap();
    let db = home.path().join("runs.db");

    let out = stdout_of(keyline(&home).args(["reset", "--db", &db_arg(&db)]));
    assert_eq!(out.trim(), "nothing to reset");

    let out = stdout_of(keyline(&home).args(["status", "--db", &db_arg(&db)]));
    assert!(out.starts_with("no run in progress"), "{out}");
}

#[test]
fn config_set_is_saved_and_bad_values_are_rejected() {
    let home = tempdir().unwrap();
    let config = home.path().join("keyline.json");
    let config_arg = db_arg(&config);

    let out = stdout_of(keyline(&home).args([
        "--config",
        &config_arg,
        "config",
        "set",
        "penalty_seconds",
        "10",
    ]));
    assert_eq!(out.trim(), "penalty_seconds = 10");

    let shown = stdout_of(keyline(&home).args(["--config", &config_arg, "config"]));
    let settings: serde_json::Value = serde_json::from_str(&shown).unwrap();
    assert_eq!(settings["penalty_seconds"], 10.0);

    let output = keyline(&home)
        .args(["--config", &config_arg, "config", "set", "warp_speed", "9"])
        .output()
        .unwrap();
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("unknown setting"));
}
