//! End-to-end CLI tests for the tape-fetcher binary.

// `Command::cargo_bin` is deprecated in assert_cmd >=2.0.17 in favor of
// `cargo::cargo_bin_cmd!` macro. Suppressed until migration to the new API.
#![allow(deprecated)]

use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use tape_fetcher_core::{Database, Ledger, NewLedgerEntry};
use tempfile::TempDir;

fn tape_fetcher() -> Command {
    let mut cmd = Command::cargo_bin("tape-fetcher").unwrap();
    cmd.env_remove("RUST_LOG");
    cmd
}

fn seed_history_row(db_path: &Path, url: &str, owner: &str, file: &Path) {
    tokio_test::block_on(async {
        let db = Database::new(db_path).await.unwrap();
        let ledger = Ledger::open(db, None).await.unwrap();
        ledger
            .record_download(&NewLedgerEntry::new(url, owner, file))
            .await
            .unwrap();
    });
}

#[test]
fn test_binary_help_lists_subcommands() {
    tape_fetcher()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("search"))
        .stdout(predicate::str::contains("fetch"))
        .stdout(predicate::str::contains("clear-history"));
}

#[test]
fn test_binary_search_without_gallery_fails() {
    tape_fetcher()
        .arg("search")
        .assert()
        .failure()
        .stderr(predicate::str::contains("URL"));
}

#[test]
fn test_binary_clear_history_requires_confirmation() {
    let dir = TempDir::new().unwrap();
    tape_fetcher()
        .args(["clear-history", "--dest"])
        .arg(dir.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("--yes"));
}

#[test]
fn test_binary_history_without_location_fails() {
    tape_fetcher()
        .arg("history")
        .assert()
        .failure()
        .stderr(predicate::str::contains("no history database location"));
}

#[test]
fn test_binary_history_lists_seeded_rows() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("history.db");
    let file = dir.path().join("jdoe").join("Beach").join("a.webp");
    seed_history_row(&db_path, "https://imgsrc.ru/img/a.webp", "jdoe", &file);

    tape_fetcher()
        .arg("history")
        .arg("--database")
        .arg(&db_path)
        .assert()
        .success()
        .stdout(predicate::str::contains("https://imgsrc.ru/img/a.webp"))
        .stdout(predicate::str::contains("a.webp"));

    tape_fetcher()
        .args(["history", "--galleries", "--database"])
        .arg(&db_path)
        .assert()
        .success()
        .stdout(predicate::str::contains("jdoe - Beach"));
}

#[test]
fn test_binary_reconcile_marks_missing_files() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("history.db");
    let missing = dir.path().join("gone.webp");
    seed_history_row(&db_path, "https://imgsrc.ru/img/gone.webp", "jdoe", &missing);

    tape_fetcher()
        .arg("reconcile")
        .arg("--database")
        .arg(&db_path)
        .assert()
        .success()
        .stdout(predicate::str::contains("Checked 1 entries, marked 1 deleted"));
}

#[test]
fn test_binary_clear_history_with_yes_uses_dest_database() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join(".tape-fetcher").join("history.db");
    seed_history_row(
        &db_path,
        "https://imgsrc.ru/img/a.webp",
        "jdoe",
        &dir.path().join("a.webp"),
    );

    tape_fetcher()
        .args(["clear-history", "--yes", "--dest"])
        .arg(dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("Removed 1 history entries"));
}

#[test]
fn test_binary_download_empty_candidate_list_succeeds() {
    let dir = TempDir::new().unwrap();
    let list = dir.path().join("candidates.json");
    std::fs::write(&list, "[]").unwrap();

    tape_fetcher()
        .arg("download")
        .arg(&list)
        .arg("--dest")
        .arg(dir.path())
        .assert()
        .success();
}

#[test]
fn test_binary_download_rejects_malformed_candidate_file() {
    let dir = TempDir::new().unwrap();
    let list = dir.path().join("candidates.json");
    std::fs::write(&list, "{not json").unwrap();

    tape_fetcher()
        .arg("download")
        .arg(&list)
        .arg("--dest")
        .arg(dir.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("candidate file"));
}
