//! Integration tests for the `cerberusctl` binary.
//!
//! Argument parsing, config handling and exit codes, plus one round trip
//! against a scripted daemon on a loopback socket.
#![allow(clippy::unwrap_used)]

use std::io::{BufRead, BufReader, Write};
use std::net::TcpListener;
use std::path::Path;
use std::thread::JoinHandle;

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use serde_json::{Value, json};

// ── Helpers ─────────────────────────────────────────────────────────

/// `cerberusctl` with its config pointed at `home` and no `CERBERUS_*`
/// variables leaking in from the environment.
fn cerberus_cmd_in(home: &Path) -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("cerberusctl");
    cmd.env("HOME", home)
        .env("XDG_CONFIG_HOME", home.join(".config"))
        .env_remove("CERBERUS_PROFILE")
        .env_remove("CERBERUS_ENDPOINT")
        .env_remove("CERBERUS_OUTPUT")
        .env_remove("CERBERUS_TIMEOUT")
        .env_remove("CERBERUS_LOG");
    cmd
}

fn cerberus_cmd() -> assert_cmd::Command {
    cerberus_cmd_in(Path::new("/tmp/cerberus-cli-test-nonexistent"))
}

fn combined_output(output: &std::process::Output) -> String {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    format!("{stdout}{stderr}")
}

/// Answers one `query.get_all_policies` and then waits for the client to leave.
fn policies_daemon() -> (String, JoinHandle<Value>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let endpoint = format!("tcp://{}", listener.local_addr().unwrap());
    let handle = std::thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        let mut writer = stream.try_clone().unwrap();
        let mut lines = BufReader::new(stream).lines();

        let hello: Value = serde_json::from_str(&lines.next().unwrap().unwrap()).unwrap();
        let query: Value = serde_json::from_str(&lines.next().unwrap().unwrap()).unwrap();
        assert_eq!(query["type"], "query.get_all_policies");

        let reply = json!({
            "v": 1,
            "type": "resp.all_policies",
            "req_id": query["req_id"],
            "payload": {
                "hard_safety_net": ["com.android.systemui"],
                "policies": [
                    {"package_name": "com.b", "user_id": 0, "policy": 2},
                    {"package_name": "com.a", "user_id": 0, "policy": 3},
                    {"package_name": "com.c", "user_id": 10, "policy": 0}
                ]
            }
        });
        writeln!(writer, "{reply}").unwrap();
        // Drain until the client hangs up.
        for _ in lines.by_ref() {}
        hello
    });
    (endpoint, handle)
}

// ── Basic invocation ────────────────────────────────────────────────

#[test]
fn test_no_args_shows_help() {
    let output = cerberus_cmd().output().unwrap();
    assert_eq!(output.status.code(), Some(2), "Expected exit code 2");
    let text = combined_output(&output);
    assert!(text.contains("Usage"), "Expected 'Usage' in output:\n{text}");
}

#[test]
fn test_help_flag() {
    cerberus_cmd().arg("--help").assert().success().stdout(
        predicate::str::contains("cerberusd")
            .and(predicate::str::contains("dashboard"))
            .and(predicate::str::contains("policies"))
            .and(predicate::str::contains("probe")),
    );
}

#[test]
fn test_version_flag() {
    cerberus_cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("cerberusctl"));
}

#[test]
fn test_completions_bash() {
    cerberus_cmd()
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("cerberusctl"));
}

// ── Validation ──────────────────────────────────────────────────────

#[test]
fn test_invalid_endpoint_is_a_usage_error() {
    cerberus_cmd()
        .args(["--endpoint", "ftp://nowhere", "status"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("endpoint"));
}

#[test]
fn test_zero_timeout_is_rejected() {
    cerberus_cmd()
        .args(["--endpoint", "tcp://127.0.0.1:9", "--timeout", "0", "status"])
        .assert()
        .code(2);
}

#[test]
fn test_unknown_profile_exit_code() {
    cerberus_cmd()
        .args(["--profile", "nope", "status"])
        .assert()
        .code(4)
        .stderr(predicate::str::contains("nope"));
}

#[test]
fn test_malformed_probe_event_is_rejected() {
    cerberus_cmd()
        .args(["probe", "--send", "pause:com.a", "--duration", "1"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("pause:com.a"));
}

// ── Connection failures ─────────────────────────────────────────────

#[test]
fn test_unreachable_daemon_exit_code() {
    // Grab a free port and release it so nothing is listening there.
    let port = TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();
    let output = cerberus_cmd()
        .env("CERBERUS_PROFILES__DEFAULT__CONNECT_TIMEOUT_MS", "300")
        .env("CERBERUS_PROFILES__DEFAULT__RECONNECT_DELAY_MS", "50")
        .args(["--endpoint", &format!("tcp://127.0.0.1:{port}"), "status"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(7), "{}", combined_output(&output));
    assert!(combined_output(&output).contains("Could not connect"));
}

// ── Daemon round trip ───────────────────────────────────────────────

#[test]
fn test_policies_list_plain() {
    let (endpoint, daemon) = policies_daemon();
    cerberus_cmd()
        .args(["--endpoint", &endpoint, "-o", "plain", "policies", "list"])
        .assert()
        .success()
        .stdout("com.a:0\ncom.b:0\ncom.c:10\n");

    let hello = daemon.join().unwrap();
    assert_eq!(hello, json!({"v": 1, "type": "hello.ui"}));
}

// ── Config management ───────────────────────────────────────────────

#[test]
fn test_config_init_show_and_use() {
    let home = tempfile::tempdir().unwrap();

    cerberus_cmd_in(home.path())
        .args(["--endpoint", "tcp://10.0.0.2:28900", "config", "init", "--name", "device"])
        .assert()
        .success()
        .stderr(predicate::str::contains("device"));

    cerberus_cmd_in(home.path())
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("default_profile = \"device\"")
                .and(predicate::str::contains("tcp://10.0.0.2:28900")),
        );

    // Same name again without --force.
    cerberus_cmd_in(home.path())
        .args(["config", "init", "--name", "device"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("already exists"));

    cerberus_cmd_in(home.path())
        .args(["config", "init", "--name", "lab"])
        .assert()
        .success();
    cerberus_cmd_in(home.path())
        .args(["config", "use", "lab"])
        .assert()
        .success();
    cerberus_cmd_in(home.path())
        .args(["-o", "plain", "config", "profiles"])
        .assert()
        .success()
        .stdout("device\nlab\n");
    cerberus_cmd_in(home.path())
        .args(["config", "profiles"])
        .assert()
        .success()
        .stdout(predicate::str::contains("lab *"));

    cerberus_cmd_in(home.path())
        .args(["config", "use", "missing"])
        .assert()
        .code(4)
        .stderr(predicate::str::contains("device, lab"));
}

#[test]
fn test_config_path_follows_xdg() {
    let home = tempfile::tempdir().unwrap();
    let output = cerberus_cmd_in(home.path())
        .args(["config", "path"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let path = String::from_utf8_lossy(&output.stdout);
    assert!(path.trim_end().ends_with("config.toml"), "{path}");
}
