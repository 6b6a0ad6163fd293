//! End-to-end acceptance tests for the tracelore binaries
//!
//! Each test runs the real binaries against a scoped XDG environment in a
//! temp directory so nothing touches the developer's real data.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

struct CliTestEnv {
    _temp_dir: TempDir,
    logs: PathBuf,
    xdg_data: PathBuf,
    xdg_config: PathBuf,
    xdg_state: PathBuf,
    xdg_runtime: PathBuf,
}

impl CliTestEnv {
    fn new() -> Self {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let base = temp_dir.path().to_path_buf();
        let logs = base.join("logs");
        let xdg_data = base.join("xdg-data");
        let xdg_config = base.join("xdg-config");
        let xdg_state = base.join("xdg-state");
        let xdg_runtime = base.join("xdg-runtime");

        for dir in [&logs, &xdg_data, &xdg_config, &xdg_state, &xdg_runtime] {
            fs::create_dir_all(dir).expect("failed to create test dir");
        }

        seed_session_fixture(&logs);

        Self {
            _temp_dir: temp_dir,
            logs,
            xdg_data,
            xdg_config,
            xdg_state,
            xdg_runtime,
        }
    }

    fn db_path(&self) -> PathBuf {
        self.xdg_data.join("tracelore/data.db")
    }
}

fn seed_session_fixture(logs: &Path) {
    let lines = [
        serde_json::json!({
            "type": "session_start",
            "session_id": "cli-session",
            "ts": "2026-03-01T09:00:00Z",
            "agent": "builder",
            "project": "cli-demo",
        }),
        serde_json::json!({
            "type": "tool_call",
            "session_id": "cli-session",
            "ts": "2026-03-01T09:00:01Z",
            "tool_name": "Read",
            "success": true,
            "duration_ms": 12,
            "project": "cli-demo",
        }),
        serde_json::json!({
            "type": "tool_call",
            "session_id": "cli-session",
            "ts": "2026-03-01T09:00:02Z",
            "tool_name": "Edit",
            "success": false,
            "error": "file not found",
            "project": "cli-demo",
        }),
        serde_json::json!({
            "type": "bash_command",
            "session_id": "cli-session",
            "ts": "2026-03-01T09:00:03Z",
            "command": "cargo check",
            "exit_code": 0,
            "project": "cli-demo",
        }),
        serde_json::json!({
            "type": "session_end",
            "session_id": "cli-session",
            "ts": "2026-03-01T09:00:10Z",
            "tokens_in": 500,
            "tokens_out": 900,
            "project": "cli-demo",
        }),
    ];

    let content = lines
        .iter()
        .map(|l| l.to_string())
        .collect::<Vec<_>>()
        .join("\n")
        + "\n";
    fs::write(logs.join("cli-session.jsonl"), content).expect("failed to seed fixture");
}

fn run_bin(env: &CliTestEnv, bin_name: &str, args: &[&str]) -> Output {
    let bin_path = match bin_name {
        "tracelore-ingest" => PathBuf::from(assert_cmd::cargo::cargo_bin!("tracelore-ingest")),
        _ => PathBuf::from(assert_cmd::cargo::cargo_bin!("tracelore")),
    };

    Command::new(bin_path)
        .args(args)
        .env("XDG_DATA_HOME", &env.xdg_data)
        .env("XDG_CONFIG_HOME", &env.xdg_config)
        .env("XDG_STATE_HOME", &env.xdg_state)
        .env("XDG_RUNTIME_DIR", &env.xdg_runtime)
        .env_remove("RUST_LOG")
        .output()
        .expect("failed to run binary")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

#[test]
fn test_ingest_one_shot_then_stats() {
    let env = CliTestEnv::new();
    let root = env.logs.to_string_lossy().to_string();

    let ingest = run_bin(&env, "tracelore-ingest", &["--root", &root]);
    assert!(
        ingest.status.success(),
        "ingest failed: {}",
        String::from_utf8_lossy(&ingest.stderr)
    );
    let out = stdout(&ingest);
    assert!(out.contains("Events processed: 5"), "unexpected output:\n{}", out);
    assert!(out.contains("Errors:           0"));
    assert!(env.db_path().exists());

    let summary = run_bin(&env, "tracelore", &["stats", "summary", "--project", "cli-demo"]);
    assert!(summary.status.success());
    let out = stdout(&summary);
    assert!(out.contains("Sessions:      1"), "unexpected output:\n{}", out);
    assert!(out.contains("Executions:    0"));

    let tools = run_bin(&env, "tracelore", &["stats", "tools"]);
    assert!(tools.status.success());
    let out = stdout(&tools);
    assert!(out.contains("Read"));
    assert!(out.contains("Edit"));
}

#[test]
fn test_ingest_is_idempotent_across_invocations() {
    let env = CliTestEnv::new();
    let root = env.logs.to_string_lossy().to_string();

    let first = run_bin(&env, "tracelore-ingest", &["--root", &root]);
    assert!(first.status.success());

    let second = run_bin(&env, "tracelore-ingest", &["--root", &root]);
    assert!(second.status.success());
    let out = stdout(&second);
    assert!(
        out.contains("Events processed: 0"),
        "re-run should find nothing new:\n{}",
        out
    );
}

#[test]
fn test_ingest_reports_failure_on_malformed_lines() {
    let env = CliTestEnv::new();
    let root = env.logs.to_string_lossy().to_string();

    fs::write(env.logs.join("broken.jsonl"), "this is not json\n").unwrap();

    let ingest = run_bin(&env, "tracelore-ingest", &["--root", &root]);
    assert!(
        !ingest.status.success(),
        "one-shot run with errors must exit non-zero"
    );
    // The good file was still ingested before the non-zero exit
    let out = stdout(&ingest);
    assert!(out.contains("Events processed: 5"), "unexpected output:\n{}", out);
    assert!(out.contains("Errors:           1"));
}

#[test]
fn test_dry_run_discovers_without_ingesting() {
    let env = CliTestEnv::new();
    let root = env.logs.to_string_lossy().to_string();

    let dry = run_bin(&env, "tracelore-ingest", &["--root", &root, "--dry-run"]);
    assert!(dry.status.success());
    let out = stdout(&dry);
    assert!(out.contains("Discovered 1 file(s)"));
    assert!(out.contains("Dry run - no ingestion performed"));
    assert!(!env.db_path().exists(), "dry run must not create the database");
}

#[test]
fn test_export_csv_header() {
    let env = CliTestEnv::new();
    let root = env.logs.to_string_lossy().to_string();

    run_bin(&env, "tracelore-ingest", &["--root", &root]);
    let record = run_bin(
        &env,
        "tracelore",
        &[
            "record",
            "--plan-file",
            "plan.md",
            "--run-number",
            "1",
            "--task-number",
            "3",
            "--task-name",
            "wire exporter",
            "--agent",
            "builder",
            "--duration-seconds",
            "12.5",
        ],
    );
    assert!(record.status.success());
    assert!(stdout(&record).contains("Recorded execution #1"));

    let export = run_bin(&env, "tracelore", &["export", "--format", "csv"]);
    assert!(export.status.success());
    let out = stdout(&export);
    assert!(out.starts_with(
        "id,plan_file,run_number,task_number,task_name,agent,success,error_message,duration_seconds,timestamp"
    ));
    assert!(out.contains("1,plan.md,1,3,wire exporter,builder,true,,12.5,"));

    let json = run_bin(&env, "tracelore", &["export", "--format", "json"]);
    assert!(json.status.success());
    let parsed: serde_json::Value = serde_json::from_str(&stdout(&json)).unwrap();
    assert_eq!(parsed["summary"]["sessions"], 1);
    assert_eq!(parsed["executions"][0]["task_name"], "wire exporter");
}
