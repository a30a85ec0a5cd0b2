#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::path::Path;

use assert_cmd::Command;
use serde_json::Value;
use tempfile::TempDir;

fn iconvault(dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("iconvault").expect("binary");
    for key in [
        "ICONVAULT_STORAGE_ROOT",
        "ICONVAULT_DATA_DIR",
        "ICONVAULT_DATABASE_URL",
        "ICONVAULT_USE_DATABASE",
        "ICONVAULT_LOG_DIR",
        "ICONVAULT_DEFAULT_CATEGORY",
    ] {
        cmd.env_remove(key);
    }
    cmd.env("ICONVAULT_LOG", "off")
        .arg("--data-dir")
        .arg(dir.join("data"))
        .arg("--storage-root")
        .arg(dir.join("icons"));
    cmd
}

fn run_json(dir: &Path, args: &[&str]) -> Value {
    let output = iconvault(dir).args(args).output().expect("run");
    assert!(
        output.status.success(),
        "{args:?} failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).expect("json stdout")
}

fn run_error(dir: &Path, args: &[&str]) -> Value {
    let output = iconvault(dir).args(args).output().expect("run");
    assert_eq!(output.status.code(), Some(1), "{args:?} should fail");
    let payload: Value = serde_json::from_slice(&output.stderr).expect("json stderr");
    payload["error"].clone()
}

fn workspace() -> TempDir {
    tempfile::tempdir().expect("tempdir")
}

#[test]
fn status_reports_backend_and_default_category() {
    let dir = workspace();
    let status = run_json(dir.path(), &["status"]);
    assert_eq!(status["backend"], "database");
    assert_eq!(status["default_category"]["name"], "未分类");
    assert_eq!(status["categories"], 1);

    let status = run_json(dir.path(), &["--no-database", "status"]);
    assert_eq!(status["backend"], "file_system");
    assert!(status["degraded"].is_null());
}

#[test]
fn category_lifecycle_through_the_cli() {
    let dir = workspace();
    let created = run_json(dir.path(), &["categories", "create", "Arrows"]);
    let id = created["id"].as_i64().expect("id").to_string();
    assert!(dir.path().join("icons/Arrows").is_dir());

    let err = run_error(dir.path(), &["categories", "create", "Arrows"]);
    assert_eq!(err["code"], "DUPLICATE_NAME");

    let renamed = run_json(dir.path(), &["categories", "rename", &id, "Pointers"]);
    assert_eq!(renamed["name"], "Pointers");
    assert!(dir.path().join("icons/Pointers").is_dir());

    let listed = run_json(dir.path(), &["categories", "list", "--counts"]);
    let entries = listed.as_array().expect("array");
    assert_eq!(entries.len(), 2);
    assert!(entries.iter().all(|c| c["icon_count"] == 0));

    let deleted = run_json(dir.path(), &["categories", "delete", &id]);
    assert_eq!(deleted["reassigned"], 0);
    assert!(!dir.path().join("icons/Pointers").exists());
}

#[test]
fn icon_upload_move_and_export() {
    let dir = workspace();
    let source = dir.path().join("star.svg");
    std::fs::write(&source, b"<svg/>").expect("source");
    let target = run_json(dir.path(), &["--no-database", "categories", "create", "Shapes"]);
    let target_id = target["id"].as_i64().expect("id").to_string();

    let icon = run_json(
        dir.path(),
        &[
            "--no-database",
            "icons",
            "upload",
            source.to_str().expect("utf8"),
            "--tags",
            "star,shape",
        ],
    );
    let id = icon["id"].as_i64().expect("id").to_string();
    assert_eq!(icon["original_filename"], "star.svg");
    assert_eq!(icon["tags"], serde_json::json!(["shape", "star"]));

    let moved = run_json(dir.path(), &["--no-database", "icons", "move", &id, &target_id]);
    assert_eq!(moved["category_name"], "Shapes");
    let filename = moved["filename"].as_str().expect("filename");
    assert!(dir.path().join("icons/Shapes").join(filename).is_file());

    let out = dir.path().join("exported.svg");
    let exported = run_json(
        dir.path(),
        &[
            "--no-database",
            "icons",
            "export",
            "--id",
            &id,
            "--out",
            out.to_str().expect("utf8"),
        ],
    );
    assert_eq!(exported["mime"], "image/svg+xml");
    assert_eq!(std::fs::read(&out).expect("exported"), b"<svg/>");

    let deleted = run_json(dir.path(), &["--no-database", "icons", "delete", &id]);
    assert_eq!(deleted["file_removed"], true);
    let err = run_error(dir.path(), &["--no-database", "icons", "get", &id]);
    assert_eq!(err["code"], "NOT_FOUND");
}

#[test]
fn rejected_upload_exits_with_error_payload() {
    let dir = workspace();
    let source = dir.path().join("notes.txt");
    std::fs::write(&source, b"hello").expect("source");

    let err = run_error(
        dir.path(),
        &["icons", "upload", source.to_str().expect("utf8")],
    );
    assert_eq!(err["code"], "INVALID_EXTENSION");
}

#[test]
fn default_category_cannot_be_deleted() {
    let dir = workspace();
    let status = run_json(dir.path(), &["status"]);
    let id = status["default_category"]["id"].as_i64().expect("id").to_string();
    let err = run_error(dir.path(), &["categories", "delete", &id]);
    assert_eq!(err["code"], "IS_DEFAULT_CATEGORY");
}

#[test]
fn failing_command_still_flushes_log_file() {
    let dir = workspace();
    let logs = dir.path().join("logs");
    let output = iconvault(dir.path())
        .env("ICONVAULT_LOG", "iconvault=info")
        .env("ICONVAULT_LOG_DIR", &logs)
        .args(["icons", "get", "999"])
        .output()
        .expect("run");
    assert_eq!(output.status.code(), Some(1));

    let log_file = std::fs::read_dir(&logs)
        .expect("log dir")
        .map(|entry| entry.expect("entry").path())
        .find(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.starts_with("iconvault.log"))
        })
        .expect("log file present");
    let contents = std::fs::read_to_string(log_file).expect("read log");
    let events: Vec<Value> = contents
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).expect("json log line"))
        .collect();
    assert!(events
        .iter()
        .any(|value| value["fields"]["event"] == "cli_failed"));
    assert!(events
        .iter()
        .any(|value| value["fields"]["event"] == "default_category_created"));
}
