//! CLI smoke tests - run the compiled binary against files in a temp dir.
//!
//! HOME points at an empty temp dir so no user configuration leaks in.

use std::fs;
use std::path::Path;
use std::process::Command;

use tempfile::TempDir;

/// Helper: run agentgate with given args and return (exit_code, stdout, stderr).
fn run_cli(home: &Path, args: &[&str]) -> (i32, String, String) {
    let bin = env!("CARGO_BIN_EXE_agentgate");
    let output = Command::new(bin)
        .args(args)
        .env("HOME", home)
        .env("RUST_LOG", "off")
        .output()
        .expect("failed to execute agentgate binary");
    let code = output.status.code().unwrap_or(-1);
    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (code, stdout, stderr)
}

fn write(dir: &TempDir, name: &str, content: &str) -> String {
    let path = dir.path().join(name);
    fs::write(&path, content).unwrap();
    path.to_string_lossy().to_string()
}

// ============================================================================
// Help & Version
// ============================================================================

#[test]
fn cli_no_args_shows_help() {
    let home = TempDir::new().unwrap();
    let (code, stdout, _stderr) = run_cli(home.path(), &[]);
    assert_eq!(code, 0);
    assert!(stdout.contains("Usage:"));
    assert!(stdout.contains("agentgate"));
}

#[test]
fn cli_version_command() {
    let home = TempDir::new().unwrap();
    let (code, stdout, _stderr) = run_cli(home.path(), &["version"]);
    assert_eq!(code, 0);
    assert!(stdout.contains("agentgate"));
    assert!(stdout.contains('.'));
}

// ============================================================================
// Config & Permissions
// ============================================================================

#[test]
fn cli_config_check_without_file() {
    let home = TempDir::new().unwrap();
    let (code, stdout, _stderr) = run_cli(home.path(), &["config", "check"]);
    assert_eq!(code, 0);
    assert!(stdout.contains("No config file found"));
}

#[test]
fn cli_config_check_reports_unknown_field() {
    let home = TempDir::new().unwrap();
    let dir = home.path().join(".agentgate");
    fs::create_dir_all(&dir).unwrap();
    fs::write(
        dir.join("config.json"),
        r#"{"permisions": {"default_level": "system"}}"#,
    )
    .unwrap();

    let (code, stdout, _stderr) = run_cli(home.path(), &["config", "check"]);
    assert_eq!(code, 0);
    assert!(stdout.contains("[ERROR] permisions"), "stdout: {}", stdout);
    assert!(stdout.contains("did you mean 'permissions'?"));
}

#[test]
fn cli_permissions_lists_tiers() {
    let home = TempDir::new().unwrap();
    let (code, stdout, _stderr) = run_cli(home.path(), &["permissions"]);
    assert_eq!(code, 0);
    assert!(stdout.contains("[basic]"));
    assert!(stdout.contains("[operation]"));
    assert!(stdout.contains("[system]"));
    assert!(stdout.contains("required (60s)"));
}

#[test]
fn cli_permissions_rejects_unknown_level() {
    let home = TempDir::new().unwrap();
    let (code, _stdout, stderr) = run_cli(home.path(), &["permissions", "--level", "root"]);
    assert_ne!(code, 0);
    assert!(stderr.contains("root"));
}

// ============================================================================
// Validate
// ============================================================================

#[test]
fn cli_validate_passes_read() {
    let home = TempDir::new().unwrap();
    let request = write(
        &home,
        "read.json",
        r#"{"action": {"scope": "read", "target": "src/main.rs", "method": "read_file",
            "params": {"path": "src/main.rs"}, "requiredPermission": "basic"}}"#,
    );
    let (code, stdout, stderr) = run_cli(home.path(), &["validate", "--request", &request]);
    assert_eq!(code, 0, "stderr: {}", stderr);
    assert_eq!(stdout.matches("[PASS]").count(), 4);
}

#[test]
fn cli_validate_reports_failed_gate() {
    let home = TempDir::new().unwrap();
    let request = write(
        &home,
        "traversal.json",
        r#"{"action": {"scope": "read", "target": "../etc/passwd", "method": "read_file",
            "params": {"path": "../etc/passwd"}, "requiredPermission": "basic"}}"#,
    );
    let (code, stdout, _stderr) = run_cli(home.path(), &["validate", "--request", &request]);
    assert_ne!(code, 0);
    assert!(stdout.contains("[FAIL] operation_execution"));
}

#[test]
fn cli_validate_with_approve_runs_gated_write() {
    let home = TempDir::new().unwrap();
    let request = write(
        &home,
        "write.json",
        r#"{"action": {"scope": "write", "target": "src/lib.rs", "method": "write_file",
            "params": {"path": "src/lib.rs", "content": "fn main() {}"},
            "requiredPermission": "operation"}}"#,
    );
    let (code, stdout, stderr) = run_cli(
        home.path(),
        &[
            "validate",
            "--request",
            &request,
            "--level",
            "operation",
            "--approve",
            "--json",
        ],
    );
    assert_eq!(code, 0, "stdout: {} stderr: {}", stdout, stderr);
    assert!(stdout.contains("\"allPassed\": true"));
}

// ============================================================================
// Compact & Replay
// ============================================================================

#[test]
fn cli_compact_prints_statistics() {
    let home = TempDir::new().unwrap();
    let history = write(
        &home,
        "history.json",
        r#"[
            {"content": "build the app", "timestamp": 0, "type": "user"},
            {"content": "created src/main.rs", "timestamp": 0, "type": "ai"},
            {"content": "tests passed", "timestamp": 0, "type": "system"}
        ]"#,
    );
    let (code, stdout, stderr) =
        run_cli(home.path(), &["compact", "--history", &history, "--max", "2"]);
    assert_eq!(code, 0, "stderr: {}", stderr);
    assert!(stdout.contains("Items kept:        2 of 3"));
    assert!(stdout.contains("Compression ratio"));
}

#[test]
fn cli_replay_walks_decisions() {
    let home = TempDir::new().unwrap();
    let decisions = write(
        &home,
        "run.jsonl",
        concat!(
            r#"{"decision_id": "d1", "type": "TASK_LIST", "tasks": [{"id": 1, "title": "write"}]}"#,
            "\n",
            r#"{"decision_id": "d2", "type": "TOOL_CALL", "action": "write_file", "params": {"path": "a.txt", "content": "x"}}"#,
            "\n",
            r#"{"decision_id": "d2", "type": "TOOL_CALL", "action": "write_file"}"#,
            "\n",
            "not json\n",
            r#"{"decision_id": "d3", "type": "TASK_COMPLETE"}"#,
            "\n",
        ),
    );
    let (code, stdout, stderr) = run_cli(
        home.path(),
        &["replay", "--decisions", &decisions, "--approve-all"],
    );
    assert_eq!(code, 0, "stderr: {}", stderr);
    assert!(stdout.contains(r#""action":"CONTINUE""#));
    assert!(stdout.contains(r#""action":"WAIT_APPROVAL""#));
    assert!(stdout.contains(r#""approved":"d2""#));
    assert!(stdout.contains(r#""action":"IGNORE""#));
    assert!(stdout.contains(r#""action":"COMPLETE""#));
    assert!(stdout.contains(r#""status":"COMPLETED""#));
    assert!(stderr.contains("line 4"));
}
