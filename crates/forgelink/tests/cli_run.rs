#![cfg(all(unix, feature = "cli"))]

use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::process::{Command, Output, Stdio};
use std::thread;
use std::time::{Duration, Instant};

const FORGELINK: &str = env!("CARGO_BIN_EXE_forgelink");
const MOCK_ENGINE: &str = env!("CARGO_BIN_EXE_forgelink-mock-engine");

fn unique_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("flcli-{tag}-{}", std::process::id()));
    std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
    dir
}

fn unique_channel(tag: &str) -> String {
    format!("flcli-{tag}-{}", std::process::id())
}

fn forgelink() -> Command {
    let mut command = Command::new(FORGELINK);
    command
        .env_remove("FORGELINK_ENGINE")
        .env_remove("FORGELINK_CHANNEL")
        .arg("--log-level")
        .arg("error");
    command
}

/// Run to completion, killing the child if it outlives `timeout`.
fn output_within(mut command: Command, timeout: Duration) -> Output {
    let mut child = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("command should start");

    let deadline = Instant::now() + timeout;
    loop {
        if child.try_wait().expect("try_wait should work").is_some() {
            break;
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            let output = child.wait_with_output().expect("output should be collected");
            panic!(
                "command timed out; stdout={} stderr={}",
                String::from_utf8_lossy(&output.stdout),
                String::from_utf8_lossy(&output.stderr)
            );
        }
        thread::sleep(Duration::from_millis(20));
    }
    child.wait_with_output().expect("output should be collected")
}

fn run_mock(channel: &str, format: &str, engine_args: &[&str]) -> Output {
    let mut command = forgelink();
    command
        .arg("--format")
        .arg(format)
        .arg("run")
        .arg(MOCK_ENGINE)
        .arg("--channel")
        .arg(channel)
        .arg("--grace")
        .arg("0")
        .arg("--no-kill-stale")
        .arg("--quiet-engine")
        .arg("--")
        .args(engine_args);
    output_within(command, Duration::from_secs(20))
}

fn json_lines(stdout: &[u8]) -> Vec<serde_json::Value> {
    String::from_utf8_lossy(stdout)
        .lines()
        .filter_map(|line| serde_json::from_str(line).ok())
        .collect()
}

#[test]
fn run_streams_engine_lines_until_exit() {
    let channel = unique_channel("raw");
    let output = run_mock(
        &channel,
        "raw",
        &["--line", "boot ok", "--line", "scene loaded", "--exit-after-ms", "300"],
    );

    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("[forgelink-mock-engine] -> boot ok"), "stdout: {stdout}");
    assert!(stdout.contains("[forgelink-mock-engine] -> scene loaded"), "stdout: {stdout}");
    let boot = stdout.find("boot ok").unwrap();
    let scene = stdout.find("scene loaded").unwrap();
    assert!(boot < scene);

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Starting server."), "stderr: {stderr}");
    assert!(stderr.contains("Engine process exited!"), "stderr: {stderr}");
}

#[test]
fn run_json_reports_levels_and_status() {
    let channel = unique_channel("json");
    let output = run_mock(
        &channel,
        "json",
        &["--line", "warming up", "--level", "2", "--exit-after-ms", "300"],
    );
    assert!(output.status.success());

    let lines = json_lines(&output.stdout);
    let engine_line = lines
        .iter()
        .find(|line| line["origin"] == "engine")
        .expect("an engine line should be printed");
    assert_eq!(engine_line["text"], "warming up");
    assert_eq!(engine_line["level"], "warn");
    assert_eq!(engine_line["level_ordinal"], 2);
    assert_eq!(engine_line["engine"], "forgelink-mock-engine");

    let statuses: Vec<&str> = lines
        .iter()
        .filter_map(|line| line["status"].as_str())
        .collect();
    assert!(statuses.contains(&"connected"), "statuses: {statuses:?}");
    assert_eq!(statuses.last(), Some(&"disconnected"));
}

#[test]
fn run_count_stops_the_engine() {
    // Without --exit-after-ms the mock waits for the editor to hang up.
    let mut command = forgelink();
    command
        .arg("--format")
        .arg("raw")
        .arg("run")
        .arg(MOCK_ENGINE)
        .arg("--channel")
        .arg(unique_channel("count"))
        .arg("--grace")
        .arg("0")
        .arg("--no-kill-stale")
        .arg("--quiet-engine")
        .arg("--count")
        .arg("2")
        .arg("--")
        .args(["--line", "one", "--line", "two", "--line", "three"]);
    let output = output_within(command, Duration::from_secs(20));

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    let engine_lines: Vec<&str> = stdout.lines().filter(|line| line.contains(" -> ")).collect();
    assert_eq!(
        engine_lines,
        vec![
            "[forgelink-mock-engine] -> one",
            "[forgelink-mock-engine] -> two"
        ]
    );
    assert!(String::from_utf8_lossy(&output.stderr).contains("Engine process killed!"));
}

#[test]
fn run_length_prefixed_framing() {
    let channel = unique_channel("lenpre");
    let mut command = forgelink();
    command
        .arg("--format")
        .arg("raw")
        .arg("run")
        .arg(MOCK_ENGINE)
        .arg("--channel")
        .arg(&channel)
        .arg("--grace")
        .arg("0")
        .arg("--framing")
        .arg("length-prefixed")
        .arg("--no-kill-stale")
        .arg("--quiet-engine")
        .arg("--")
        .args([
            "--framing",
            "length-prefixed",
            "--line",
            "framed hello",
            "--exit-after-ms",
            "300",
        ]);
    let output = output_within(command, Duration::from_secs(20));

    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout)
        .contains("[forgelink-mock-engine] -> framed hello"));
}

#[test]
fn run_missing_executable_is_usage_error() {
    let mut command = forgelink();
    command
        .arg("run")
        .arg("/definitely/not/here/Stakeforge")
        .arg("--channel")
        .arg(unique_channel("missing"))
        .arg("--no-kill-stale");
    let output = output_within(command, Duration::from_secs(10));

    assert_eq!(output.status.code(), Some(64));
    let all = format!(
        "{}{}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
    assert!(
        all.contains("Failed launching engine server, server path doesn't exist"),
        "output: {all}"
    );
}

#[test]
fn run_connect_timeout_exits_with_timeout_code() {
    // A worker that never opens the endpoint.
    let dir = unique_dir("timeout");
    let worker = dir.join("flcli-silent");
    std::fs::write(&worker, "#!/bin/sh\nwhile :; do sleep 1; done\n").unwrap();
    std::fs::set_permissions(&worker, std::fs::Permissions::from_mode(0o755)).unwrap();

    let mut command = forgelink();
    command
        .arg("--format")
        .arg("raw")
        .arg("run")
        .arg(&worker)
        .arg("--channel")
        .arg(unique_channel("timeout"))
        .arg("--grace")
        .arg("0")
        .arg("--connect-timeout")
        .arg("300ms")
        .arg("--no-kill-stale")
        .arg("--quiet-engine");
    let output = output_within(command, Duration::from_secs(10));
    let _ = std::fs::remove_dir_all(dir);

    assert_eq!(output.status.code(), Some(124));
    assert!(String::from_utf8_lossy(&output.stderr)
        .contains("Failed to connect to engine pipe: Timeout."));
}

#[test]
fn attach_streams_from_running_engine() {
    let channel = unique_channel("attach");
    let mut mock = Command::new(MOCK_ENGINE)
        .arg("--pipe")
        .arg(&channel)
        .args(["--line", "hello editor", "--exit-after-ms", "300"])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("mock engine should start");

    let mut command = forgelink();
    command
        .arg("--format")
        .arg("raw")
        .arg("attach")
        .arg("--channel")
        .arg(&channel)
        .arg("--name")
        .arg("Stakeforge")
        .arg("--timeout")
        .arg("5s");
    let output = output_within(command, Duration::from_secs(15));
    let _ = mock.wait();

    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("[Stakeforge] -> hello editor"));
}

#[test]
fn attach_without_engine_times_out() {
    let mut command = forgelink();
    command
        .arg("attach")
        .arg("--channel")
        .arg(unique_channel("noengine"))
        .arg("--timeout")
        .arg("200ms");
    let output = output_within(command, Duration::from_secs(10));

    assert_eq!(output.status.code(), Some(124));
}

#[test]
fn kill_dry_run_without_matches() {
    let mut command = forgelink();
    command
        .arg("--format")
        .arg("json")
        .arg("kill")
        .arg("/opt/none/flcli-no-such-engine")
        .arg("--dry-run");
    let output = output_within(command, Duration::from_secs(10));

    assert!(output.status.success());
    assert!(output.stdout.is_empty());
}

#[test]
fn status_of_absent_engine_fails_health_check() {
    let mut command = forgelink();
    command
        .arg("--format")
        .arg("json")
        .arg("status")
        .arg("/opt/none/flcli-no-such-engine")
        .arg("--channel")
        .arg(unique_channel("status"));
    let output = output_within(command, Duration::from_secs(10));

    assert_eq!(output.status.code(), Some(30));
    let lines = json_lines(&output.stdout);
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0]["running"], false);
    assert_eq!(lines[0]["endpoint_present"], false);
    assert_eq!(lines[0]["status"], "disconnected");
}

#[test]
fn version_prints_name_and_version() {
    let mut command = forgelink();
    command.arg("version");
    let output = output_within(command, Duration::from_secs(10));

    assert!(output.status.success());
    assert_eq!(
        String::from_utf8_lossy(&output.stdout).trim(),
        format!("forgelink {}", env!("CARGO_PKG_VERSION"))
    );
}
