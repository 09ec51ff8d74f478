//! End-to-end tests for the `dbport` binary.

use assert_cmd::Command;
use std::io::Write;
use tempfile::{NamedTempFile, TempDir};

/// Creates a database file with a small fixture table
fn fixture_db(dir: &TempDir) -> String {
    let path = dir.path().join("app.db");
    let conn = rusqlite::Connection::open(&path).unwrap();
    conn.execute_batch(
        "CREATE TABLE users (id INTEGER PRIMARY KEY, Name TEXT, Email TEXT);
         INSERT INTO users (Name, Email) VALUES ('ada', ''), ('grace', 'grace@example.com');",
    )
    .unwrap();
    path.to_string_lossy().into_owned()
}

fn stdout_lines(output: &std::process::Output) -> Vec<String> {
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(str::to_string)
        .collect()
}

#[test]
fn test_prints_rows_as_json_lines() {
    let dir = TempDir::new().unwrap();
    let db = fixture_db(&dir);

    let output = Command::cargo_bin("dbport")
        .unwrap()
        .args([db.as_str(), "SELECT id, Name FROM users ORDER BY id"])
        .output()
        .unwrap();

    assert!(output.status.success());
    assert_eq!(stdout_lines(&output), vec![r#"[1,"ada"]"#, r#"[2,"grace"]"#]);
}

#[test]
fn test_assoc_rows_with_config() {
    let dir = TempDir::new().unwrap();
    let db = fixture_db(&dir);
    let mut config = NamedTempFile::new().unwrap();
    writeln!(config, "portability = \"FIX_CASE | EMPTY_TO_NULL\"").unwrap();

    let output = Command::cargo_bin("dbport")
        .unwrap()
        .args([db.as_str(), "SELECT Name, Email FROM users WHERE id = 1", "--assoc"])
        .arg("--config")
        .arg(config.path())
        .output()
        .unwrap();

    assert!(output.status.success());
    assert_eq!(stdout_lines(&output), vec![r#"{"name":"ada","email":null}"#]);
}

#[test]
fn test_reports_affected_rows() {
    let dir = TempDir::new().unwrap();
    let db = fixture_db(&dir);

    let output = Command::cargo_bin("dbport")
        .unwrap()
        .args([db.as_str(), "UPDATE users SET Email = 'x'"])
        .output()
        .unwrap();

    assert!(output.status.success());
    assert_eq!(stdout_lines(&output), vec![r#"{"affected":2}"#]);
}

#[test]
fn test_chained_result_sets_are_all_printed() {
    let dir = TempDir::new().unwrap();
    let db = fixture_db(&dir);

    let output = Command::cargo_bin("dbport")
        .unwrap()
        .args([db.as_str(), "SELECT 1; SELECT 2"])
        .output()
        .unwrap();

    assert!(output.status.success());
    assert_eq!(stdout_lines(&output), vec!["[1]", "[2]"]);
}

#[test]
fn test_usage_and_query_errors() {
    let output = Command::cargo_bin("dbport").unwrap().arg("only-one").output().unwrap();
    assert_eq!(output.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&output.stderr).contains("usage: dbport"));

    let dir = TempDir::new().unwrap();
    let db = fixture_db(&dir);
    let output = Command::cargo_bin("dbport")
        .unwrap()
        .args([db.as_str(), "SELECT * FROM missing_table"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("Error: "));
    assert!(output.stdout.is_empty());
}
