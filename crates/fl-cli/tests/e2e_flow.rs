//! End-to-end tests driving the `fl` binary.
//!
//! Every test runs against its own temporary home directory and database.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

use tempfile::TempDir;

fn fl_binary() -> String {
    env!("CARGO_BIN_EXE_fl").to_string()
}

struct Env {
    temp: TempDir,
}

impl Env {
    fn new() -> Self {
        Self {
            temp: TempDir::new().unwrap(),
        }
    }

    fn home(&self) -> &Path {
        self.temp.path()
    }

    fn db_path(&self) -> PathBuf {
        self.home().join("data/fleetlog.db")
    }

    fn command(&self) -> Command {
        let mut command = Command::new(fl_binary());
        command
            .env("HOME", self.home())
            .env("XDG_CONFIG_HOME", self.home().join("config"))
            .env("XDG_DATA_HOME", self.home().join("share"))
            .env("TZ", "UTC")
            .env("FL_USER_ID", "driver-7")
            .env("FL_DATABASE_PATH", self.db_path())
            .env_remove("FL_API_URL")
            .env_remove("FL_API_TOKEN")
            .env_remove("RUST_LOG");
        command
    }

    fn run(&self, args: &[&str]) -> Output {
        self.command().args(args).output().expect("failed to run fl")
    }

    fn run_ok(&self, args: &[&str]) -> String {
        let output = self.run(args);
        assert!(
            output.status.success(),
            "fl {} should succeed: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr)
        );
        String::from_utf8(output.stdout).unwrap()
    }

    fn run_with_stdin(&self, args: &[&str], stdin: &str) -> String {
        let mut child = self
            .command()
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .expect("failed to spawn fl");
        child
            .stdin
            .take()
            .unwrap()
            .write_all(stdin.as_bytes())
            .unwrap();
        let output = child.wait_with_output().unwrap();
        assert!(
            output.status.success(),
            "fl {} should succeed: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr)
        );
        String::from_utf8(output.stdout).unwrap()
    }

    fn events_json(&self) -> Vec<serde_json::Value> {
        self.run_ok(&["events", "--json"])
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }
}

/// A Monday with a break, recorded out of order.
fn record_workday(env: &Env) {
    env.run_ok(&[
        "event",
        "work_end",
        "--at",
        "2025-01-06T16:00:00Z",
        "--odometer",
        "1240",
    ]);
    env.run_ok(&[
        "event",
        "work_start",
        "--at",
        "2025-01-06T07:00:00Z",
        "--odometer",
        "1000",
    ]);
    env.run_ok(&["event", "break_start", "--at", "2025-01-06T11:00:00Z"]);
    env.run_ok(&["event", "break_end", "--at", "2025-01-06T11:45:00Z"]);
}

#[test]
fn test_events_are_listed_in_time_order() {
    let env = Env::new();
    record_workday(&env);

    let events = env.events_json();
    let types: Vec<_> = events
        .iter()
        .map(|e| e["event_type"].as_str().unwrap().to_string())
        .collect();

    assert_eq!(types, ["work_start", "break_start", "break_end", "work_end"]);
    assert!(events.iter().all(|e| e["user_id"] == "driver-7"));
    assert!(events.iter().all(|e| e["synced"] == false));
    assert!(env.db_path().exists());
}

#[test]
fn test_report_for_explicit_range() {
    let env = Env::new();
    record_workday(&env);
    env.run_ok(&[
        "event",
        "vacation",
        "--at",
        "2025-01-08T00:00:00Z",
        "--until",
        "2025-01-10",
    ]);

    let output = env.run_ok(&[
        "report",
        "--from",
        "2025-01-06",
        "--to",
        "2025-01-12",
        "--json",
    ]);
    let report: serde_json::Value = serde_json::from_str(&output).unwrap();

    let totals = &report["totals"];
    assert_eq!(totals["net_work_ms"], 8 * 3_600_000 + 15 * 60_000);
    assert_eq!(totals["break_ms"], 45 * 60_000);
    assert_eq!(totals["worked_days"], 1);
    assert_eq!(totals["vacation_days"], 3);
    assert_eq!(totals["driven_km"], 240);
    assert_eq!(totals["overtime_ms"], 15 * 60_000);

    let text = env.run_ok(&["report", "--from", "2025-01-06", "--to", "2025-01-12"]);
    assert!(text.contains("WORK REPORT: 2025-01-06 to 2025-01-12"));
    assert!(text.contains("Overtime: +15m"));
}

#[test]
fn test_edit_resets_sync_state_and_delete_removes() {
    let env = Env::new();
    record_workday(&env);
    let events = env.events_json();
    let start_id = events[0]["id"].as_i64().unwrap().to_string();
    let break_id = events[1]["id"].as_i64().unwrap().to_string();

    env.run_ok(&["edit", &start_id, "work_start", "--odometer", "990"]);
    env.run_ok(&["delete", &break_id]);

    let events = env.events_json();
    assert_eq!(events.len(), 3);
    assert_eq!(events[0]["odometer_km"], 990);
    assert_eq!(events[0]["timestamp"], "2025-01-06T07:00:00Z");

    let missing = env.run(&["delete", &break_id]);
    assert!(!missing.status.success());
    assert!(String::from_utf8_lossy(&missing.stderr).contains("not found"));
}

#[test]
fn test_track_records_loading_from_stdin() {
    let env = Env::new();
    env.run_ok(&["event", "work_start", "--at", "2025-01-06T07:00:00Z"]);

    let samples = [
        r#"{"timestamp":"2025-01-06T09:00:00Z","latitude":52.5,"longitude":13.4,"speed_kmh":60.0}"#,
        r#"{"timestamp":"2025-01-06T09:01:00Z","latitude":52.5,"longitude":13.4,"speed_kmh":4.0}"#,
        r#"{"timestamp":"2025-01-06T09:02:00Z","latitude":52.5,"longitude":13.4,"speed_kmh":0.0}"#,
        r#"{"timestamp":"2025-01-06T09:04:00Z","latitude":52.5,"longitude":13.4,"speed_kmh":0.0}"#,
        r#"{"timestamp":"2025-01-06T09:30:00Z","latitude":52.6,"longitude":13.4,"speed_kmh":45.0}"#,
    ]
    .join("\n");

    let output = env.run_with_stdin(&["track"], &samples);
    assert!(output.contains("Processed 5 sample(s), recorded 2 loading event(s)"));

    let events = env.events_json();
    let loading: Vec<_> = events
        .iter()
        .filter(|e| e["event_type"].as_str().unwrap().starts_with("loading"))
        .collect();
    assert_eq!(loading.len(), 2);
    assert_eq!(loading[0]["timestamp"], "2025-01-06T09:01:00Z");
    assert_eq!(loading[1]["timestamp"], "2025-01-06T09:30:00Z");
    assert!(loading[0]["location"].is_object());
}

#[test]
fn test_status_reports_closed_day_as_inactive() {
    let env = Env::new();
    record_workday(&env);

    let output = env.run_ok(&["status", "--json"]);
    let status: serde_json::Value = serde_json::from_str(&output).unwrap();

    assert_eq!(status["workday_active"], false);
    assert_eq!(status["on_break"], false);
    assert_eq!(status["unsynced"], 4);
}

#[test]
fn test_sync_requires_backend() {
    let env = Env::new();
    let output = env.run(&["sync"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("api_url and api_token"));
}

#[test]
fn test_rejects_invalid_input() {
    let env = Env::new();
    assert!(!env.run(&["event", "lunch_break"]).status.success());
    assert!(
        !env.run(&["event", "work_start", "--until", "2025-01-10"])
            .status
            .success()
    );
    assert!(env.events_json().is_empty());
}

#[test]
fn test_config_file_sets_user() {
    let env = Env::new();
    let config_path = env.home().join("fleetlog.toml");
    std::fs::write(&config_path, "user_id = \"from-file\"\n").unwrap();

    let output = env
        .command()
        .env_remove("FL_USER_ID")
        .args(["--config", config_path.to_str().unwrap()])
        .args(["event", "work_start", "--at", "2025-01-06T07:00:00Z"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let listed = env
        .command()
        .env_remove("FL_USER_ID")
        .args(["--config", config_path.to_str().unwrap(), "events", "--json"])
        .output()
        .unwrap();
    let event: serde_json::Value =
        serde_json::from_slice(listed.stdout.split(|b| *b == b'\n').next().unwrap()).unwrap();
    assert_eq!(event["user_id"], "from-file");
}
