//! CLI integration tests for gapfill
//!
//! Runs the gapfill binary end-to-end using assert_cmd, with configuration
//! and databases confined to a temp directory.

use assert_cmd::Command;
use predicates::prelude::*;
use std::path::PathBuf;
use tempfile::TempDir;

const FACILITIES: &str = r#"{"id": 1, "name": "Houston Methodist Hospital", "address": "6565 Fannin St", "city": "Houston", "state": "Texas", "state_code": "TX", "zip": "77030", "phone": "713-790-3311", "facility_type": "Acute Care Hospital"}
{"id": 2, "name": "Parkland Memorial Hospital", "address": "5200 Harry Hines Blvd", "city": "Dallas", "state": "Texas", "state_code": "TX", "zip": "75235", "phone": "214-590-8000", "facility_type": "Acute Care Hospital"}

{"id": 3, "name": "Mayo Clinic Hospital", "address": "1216 2nd St SW", "city": "Rochester", "state": "Minnesota", "state_code": "MN", "zip": "55902", "phone": "507-255-5123", "facility_type": "Acute Care Hospital"}
"#;

struct Sandbox {
    dir: TempDir,
}

impl Sandbox {
    fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
        }
    }

    fn db_path(&self) -> PathBuf {
        self.dir.path().join("facilities.db")
    }

    /// A command with no API key and all state under the sandbox
    #[allow(deprecated)]
    fn cmd(&self) -> Command {
        let mut cmd = Command::cargo_bin("gapfill").unwrap();
        cmd.current_dir(self.dir.path())
            .env("GAPFILL_CONFIG_DIR", self.dir.path().join("config"))
            .env_remove("GAPFILL_API_KEY")
            .env_remove("PERPLEXITY_API_KEY")
            .arg("--db")
            .arg(self.db_path());
        cmd
    }

    fn import_fixtures(&self) {
        let file = self.dir.path().join("facilities.jsonl");
        std::fs::write(&file, FACILITIES).unwrap();
        self.cmd()
            .args(["import"])
            .arg(&file)
            .assert()
            .success()
            .stdout(predicate::str::contains("Imported 3 facilities"));
    }
}

#[test]
fn test_help_lists_commands() {
    let sandbox = Sandbox::new();
    sandbox
        .cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("search"))
        .stdout(predicate::str::contains("import"))
        .stdout(predicate::str::contains("doctor"));
}

#[test]
fn test_search_from_database_only() {
    let sandbox = Sandbox::new();
    sandbox.import_fixtures();

    sandbox
        .cmd()
        .args(["search", "hospitals in Texas"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Found 2 facilities"))
        .stdout(predicate::str::contains("Houston Methodist Hospital"))
        .stdout(predicate::str::contains("Parkland Memorial Hospital"))
        .stdout(predicate::str::contains("Mayo Clinic").not())
        .stdout(predicate::str::contains("All data from the facility database"));
}

#[test]
fn test_search_json_output() {
    let sandbox = Sandbox::new();
    sandbox.import_fixtures();

    let output = sandbox
        .cmd()
        .args(["--format", "json", "search", "hospitals in Texas"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let response: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(response["results_count"], 2);
    assert_eq!(response["web_search_performed"], false);
    assert_eq!(response["query"]["intent"], "list");
}

#[test]
fn test_search_without_key_warns_on_web_fields() {
    let sandbox = Sandbox::new();
    sandbox.import_fixtures();

    sandbox
        .cmd()
        .args(["search", "hospitals in Texas with beds"])
        .assert()
        .success()
        .stdout(predicate::str::contains("bed_count: unknown"))
        .stdout(predicate::str::contains("E200"));
}

#[test]
fn test_unreachable_cache_does_not_fail_search() {
    let sandbox = Sandbox::new();
    sandbox.import_fixtures();

    // a regular file where the cache directory should be
    let blocker = sandbox.dir.path().join("blocker");
    std::fs::write(&blocker, "").unwrap();
    sandbox
        .cmd()
        .args(["config", "set", "storage.cache_path"])
        .arg(blocker.join("cache.db"))
        .assert()
        .success();

    sandbox
        .cmd()
        .args(["search", "hospitals in Texas"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Found 2 facilities"))
        .stderr(predicate::str::contains("E300"));

    // the cache command itself still reports the problem
    sandbox.cmd().args(["cache", "stats"]).assert().failure();
}

#[test]
fn test_empty_query_fails() {
    let sandbox = Sandbox::new();
    sandbox.import_fixtures();

    sandbox
        .cmd()
        .args(["search", "   "])
        .assert()
        .failure()
        .stderr(predicate::str::contains("E001"));
}

#[test]
fn test_import_rejects_bad_lines() {
    let sandbox = Sandbox::new();
    let file = sandbox.dir.path().join("broken.jsonl");
    std::fs::write(&file, "{\"id\": 1, \"name\": \"Ok\"}\nnot json\n").unwrap();

    sandbox
        .cmd()
        .arg("import")
        .arg(&file)
        .assert()
        .failure()
        .stderr(predicate::str::contains("broken.jsonl:2"));
}

#[test]
fn test_cache_stats_starts_empty() {
    let sandbox = Sandbox::new();

    sandbox
        .cmd()
        .args(["cache", "stats"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Entries:  0"));
}

#[test]
fn test_config_set_and_get() {
    let sandbox = Sandbox::new();

    sandbox
        .cmd()
        .args(["config", "set", "enrichment.ceiling", "7"])
        .assert()
        .success();

    sandbox
        .cmd()
        .args(["config", "get", "enrichment.ceiling"])
        .assert()
        .success()
        .stdout(predicate::str::contains("7"));
}

#[test]
fn test_config_rejects_unknown_key() {
    let sandbox = Sandbox::new();

    sandbox
        .cmd()
        .args(["config", "get", "enrichment.nope"])
        .assert()
        .failure();
}

#[test]
fn test_config_path_uses_override_dir() {
    let sandbox = Sandbox::new();

    sandbox
        .cmd()
        .args(["config", "path"])
        .assert()
        .success()
        .stdout(predicate::str::contains("config.toml"));
}

#[test]
fn test_doctor_reports_database() {
    let sandbox = Sandbox::new();
    sandbox.import_fixtures();

    sandbox
        .cmd()
        .arg("doctor")
        .assert()
        .success()
        .stdout(predicate::str::contains("[OK] Database"))
        .stdout(predicate::str::contains("Facilities: 3"));
}
