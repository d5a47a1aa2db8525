//! E2E tests for the `fmig` binary.
//!
//! Each test runs in its own temp workspace with HOME pointed at it, so no
//! user config leaks in.

mod common;

use common::cli::{FmigWorkspace, run_fmig};
use common::fixtures::{SourceData, SourceFixture, claim, zone_chunk};
use predicates::prelude::*;
use tempfile::TempDir;

fn two_factions() -> TempDir {
    let alpha = SourceFixture::new(1, "Alpha")
        .member(1, "leader")
        .member(2, "member")
        .field("power", serde_json::json!(40.0));
    let bravo = SourceFixture::new(2, "Bravo").member(3, "leader");
    let claims = [claim(&alpha, "world", 0, 0), claim(&bravo, "world", 5, 5)];
    SourceData::default()
        .faction(alpha)
        .faction(bravo)
        .claims(claims)
        .zones([zone_chunk("world", 20, 20, "safe"), zone_chunk("world", 21, 20, "safe")])
        .write_jsonl()
}

fn source_arg(dir: &TempDir) -> String {
    dir.path().display().to_string()
}

#[test]
fn e2e_init_creates_workspace() {
    let _log = common::test_log("e2e_init_creates_workspace");
    let workspace = FmigWorkspace::new();

    let init = run_fmig(&workspace, ["init"], "init");
    assert!(init.status.success(), "init failed: {}", init.stderr);
    assert!(predicate::str::contains("Initialized").eval(&init.stdout));
    assert!(workspace.root.join(".factions/factions.db").exists());
    assert!(workspace.backup_dir().is_dir());
}

#[test]
fn e2e_init_twice_is_an_error() {
    let _log = common::test_log("e2e_init_twice_is_an_error");
    let workspace = FmigWorkspace::initialized();

    let again = run_fmig(&workspace, ["init"], "init_again");
    assert_eq!(again.code(), Some(2));
    assert!(
        predicate::str::contains("ALREADY_INITIALIZED").eval(&again.stderr),
        "stderr: {}",
        again.stderr
    );

    let forced = run_fmig(&workspace, ["init", "--force"], "init_force");
    assert!(forced.status.success(), "forced init failed: {}", forced.stderr);
}

#[test]
fn e2e_commands_require_init() {
    let _log = common::test_log("e2e_commands_require_init");
    let workspace = FmigWorkspace::new();

    let list = run_fmig(&workspace, ["list", "--json"], "list_uninit");
    assert_eq!(list.code(), Some(2));
    assert!(predicate::str::contains("NOT_INITIALIZED").eval(&list.stderr));
}

#[test]
fn e2e_unknown_source_kind_rejected_by_parser() {
    let _log = common::test_log("e2e_unknown_source_kind_rejected_by_parser");
    let workspace = FmigWorkspace::initialized();

    let run = run_fmig(
        &workspace,
        ["migrate", "somewhere", "--from", "csv"],
        "migrate_bad_kind",
    );
    assert!(!run.status.success());
    assert!(predicate::str::contains("unknown source kind").eval(&run.stderr));
}

#[test]
fn e2e_dry_run_leaves_store_untouched() {
    let _log = common::test_log("e2e_dry_run_leaves_store_untouched");
    let workspace = FmigWorkspace::initialized();
    let source = two_factions();

    let dry = run_fmig(
        &workspace,
        ["--json", "migrate", &source_arg(&source), "--from", "jsonl", "--dry-run"],
        "migrate_dry",
    );
    assert!(dry.status.success(), "dry run failed: {}", dry.stderr);
    let report = dry.json();
    assert_eq!(report["dry_run"], true);
    assert_eq!(report["outcome"], "completed");
    assert_eq!(report["factions_imported"], 2);
    assert_eq!(report["zones_created"], 1);
    assert!(report.get("backup_path").is_none());

    let list = run_fmig(&workspace, ["--json", "list"], "list_after_dry");
    assert!(list.status.success(), "list failed: {}", list.stderr);
    assert_eq!(list.json().as_array().map(Vec::len), Some(0));

    let history = run_fmig(&workspace, ["--json", "history"], "history_after_dry");
    assert_eq!(history.json()["count"], 0);
}

#[test]
fn e2e_migrate_then_list_and_history() {
    let _log = common::test_log("e2e_migrate_then_list_and_history");
    let workspace = FmigWorkspace::initialized();
    let source = two_factions();

    let run = run_fmig(
        &workspace,
        ["--json", "migrate", &source_arg(&source), "--from", "jsonl"],
        "migrate",
    );
    assert!(run.status.success(), "migrate failed: {}", run.stderr);
    let report = run.json();
    assert_eq!(report["factions_imported"], 2);
    assert_eq!(report["claims_imported"], 2);
    assert_eq!(report["players_with_power"], 2);
    assert!(report["backup_path"].is_string());

    let list = run_fmig(&workspace, ["--json", "list"], "list");
    let rows = list.json();
    let names: Vec<&str> = rows
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|r| r["name"].as_str())
        .collect();
    assert_eq!(names, ["Alpha", "Bravo"]);
    assert_eq!(rows[0]["members"], 2);
    assert_eq!(rows[0]["leader"], "player1");

    let filtered = run_fmig(&workspace, ["list", "--name", "brav"], "list_filtered");
    assert!(predicate::str::contains("Bravo").eval(&filtered.stdout));
    assert!(!filtered.stdout.contains("Alpha"));

    let history = run_fmig(&workspace, ["--json", "history"], "history");
    assert!(history.status.success(), "history failed: {}", history.stderr);
    assert_eq!(history.json()["count"], 1);
}

#[test]
fn e2e_validate_reports_conflicts_without_writing() {
    let _log = common::test_log("e2e_validate_reports_conflicts_without_writing");
    let workspace = FmigWorkspace::initialized();
    let source = two_factions();

    let clean = run_fmig(
        &workspace,
        ["--json", "validate", &source_arg(&source), "--from", "jsonl"],
        "validate_clean",
    );
    assert!(clean.status.success(), "validate failed: {}", clean.stderr);
    let report = clean.json();
    assert_eq!(report["valid"], true);
    assert_eq!(report["total_factions"], 2);
    assert_eq!(report["total_members"], 3);
    assert_eq!(report["conflicts"].as_array().map(Vec::len), Some(0));

    let migrate = run_fmig(
        &workspace,
        ["migrate", &source_arg(&source), "--from", "jsonl", "--no-backup"],
        "migrate",
    );
    assert!(migrate.status.success(), "migrate failed: {}", migrate.stderr);

    let again = run_fmig(
        &workspace,
        ["--json", "validate", &source_arg(&source), "--from", "jsonl"],
        "validate_again",
    );
    assert!(again.status.success());
    let report = again.json();
    assert_eq!(report["valid"], true);
    let conflicts = report["conflicts"].as_array().unwrap();
    assert!(
        conflicts
            .iter()
            .any(|c| c["kind"] == "id" && c["existing"] == true),
        "conflicts: {conflicts:?}"
    );
}

#[test]
fn e2e_missing_listing_fails_with_source_exit_code() {
    let _log = common::test_log("e2e_missing_listing_fails_with_source_exit_code");
    let workspace = FmigWorkspace::initialized();
    let empty = TempDir::new().unwrap();

    let run = run_fmig(
        &workspace,
        ["--json", "migrate", &source_arg(&empty), "--from", "jsonl", "--no-backup"],
        "migrate_missing",
    );
    assert_eq!(run.code(), Some(5));
    let report = run.json();
    assert_eq!(report["outcome"], "failed");
    assert_eq!(report["errors"].as_array().map(Vec::len), Some(1));
}

#[test]
fn e2e_validate_missing_listing_is_invalid() {
    let _log = common::test_log("e2e_validate_missing_listing_is_invalid");
    let workspace = FmigWorkspace::initialized();
    let empty = TempDir::new().unwrap();

    let run = run_fmig(
        &workspace,
        ["--json", "validate", &source_arg(&empty), "--from", "directory"],
        "validate_missing",
    );
    assert_eq!(run.code(), Some(4));
    assert_eq!(run.json()["valid"], false);
}

#[test]
fn e2e_migrate_rejected_while_another_process_holds_lease() {
    use faction_migrate::storage::{RunLease, SqliteStore};

    let _log = common::test_log("e2e_migrate_rejected_while_another_process_holds_lease");
    let workspace = FmigWorkspace::initialized();
    let source = two_factions();
    let db = workspace.root.join(".factions/factions.db");
    let other = SqliteStore::open(&db).unwrap();
    other.acquire_lease("directory", "other-process").unwrap();

    let run = run_fmig(
        &workspace,
        ["--json", "migrate", &source_arg(&source), "--from", "jsonl", "--no-backup"],
        "migrate_leased",
    );
    assert_eq!(run.code(), Some(6), "stderr: {}", run.stderr);
    assert_eq!(run.json()["outcome"], "rejected");

    let dry = run_fmig(
        &workspace,
        ["migrate", &source_arg(&source), "--from", "jsonl", "--dry-run"],
        "migrate_leased_dry",
    );
    assert!(dry.status.success(), "dry run failed: {}", dry.stderr);

    other.release_lease("other-process").unwrap();
    let run = run_fmig(
        &workspace,
        ["migrate", &source_arg(&source), "--from", "jsonl", "--no-backup"],
        "migrate_after_release",
    );
    assert!(run.status.success(), "migrate failed: {}", run.stderr);
}
