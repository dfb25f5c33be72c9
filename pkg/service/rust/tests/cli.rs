// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

mod helpers;

use std::path::Path;
use std::time::Duration;

use detectmate_service::transport::{Address, Pattern, Socket, SocketOptions};
use helpers::{DEFAULT_TIMEOUT, DaemonHandle, run_cli};
use nix::sys::signal::Signal;
use serde_json::Value;

fn env_for(dir: &Path) -> Vec<(String, String)> {
    [
        ("DETECTMATE_COMPONENT_TYPE", "detectors.ThresholdDetector".to_string()),
        ("DETECTMATE_COMPONENT_NAME", "cli".to_string()),
        (
            "DETECTMATE_MANAGER_ADDR",
            format!("ipc://{}", dir.join("cmd.ipc").display()),
        ),
        (
            "DETECTMATE_ENGINE_ADDR",
            format!("ipc://{}", dir.join("engine.ipc").display()),
        ),
        (
            "DETECTMATE_CONFIG_FILE",
            dir.join("detector.yaml").display().to_string(),
        ),
        ("DETECTMATE_LOG_DIR", dir.join("logs").display().to_string()),
        ("DETECTMATE_MANAGER_RECV_TIMEOUT", "20".to_string()),
        ("DETECTMATE_ENGINE_RECV_TIMEOUT", "20".to_string()),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect()
}

fn reply_json(output: &std::process::Output) -> Value {
    serde_json::from_slice(&output.stdout).expect("reply should be JSON")
}

#[test]
fn test_control_commands_against_running_daemon() {
    let dir = tempfile::tempdir().unwrap();
    let env = env_for(dir.path());
    let mut daemon = DaemonHandle::start(&env);
    assert!(daemon.wait_for_log("service started"), "daemon should start");

    let status = run_cli(&env, &["status"]);
    assert!(status.status.success());
    let reply = reply_json(&status);
    assert_eq!(reply["ok"], true);
    assert_eq!(reply["result"]["state"], "RUNNING");
    assert_eq!(reply["result"]["component_name"], "cli");

    assert!(run_cli(&env, &["pause"]).status.success());
    let again = run_cli(&env, &["pause"]);
    assert!(!again.status.success(), "second pause should be rejected");
    assert_eq!(reply_json(&again)["kind"], "transition");
    assert!(run_cli(&env, &["resume"]).status.success());

    let new_config = dir.path().join("new.json");
    std::fs::write(&new_config, r#"{"threshold": 0.75}"#).unwrap();
    let reconfigure = run_cli(
        &env,
        &["reconfigure", "--config", new_config.to_str().unwrap(), "--persist"],
    );
    assert!(reconfigure.status.success());
    let saved = std::fs::read_to_string(dir.path().join("detector.yaml")).unwrap();
    assert!(saved.contains("threshold: 0.75"), "{saved}");

    let stop = run_cli(&env, &["stop"]);
    assert!(stop.status.success());
    assert_eq!(reply_json(&stop)["result"]["state"], "STOPPING");

    let status = daemon.wait_with_timeout(DEFAULT_TIMEOUT);
    assert!(status.success(), "daemon should exit cleanly");
    assert!(daemon.wait_for_log("stopped"));
}

#[test]
fn test_sigterm_stops_daemon() {
    let dir = tempfile::tempdir().unwrap();
    let env = env_for(dir.path());
    let mut daemon = DaemonHandle::start(&env);
    assert!(daemon.wait_for_log("service started"));

    daemon.send_signal(Signal::SIGTERM);
    let status = daemon.wait_with_timeout(DEFAULT_TIMEOUT);
    assert!(status.success(), "daemon should exit cleanly on SIGTERM");
    assert!(daemon.wait_for_log("received SIGTERM"));

    let logs: Vec<_> = std::fs::read_dir(dir.path().join("logs"))
        .unwrap()
        .map(|entry| entry.unwrap().file_name().into_string().unwrap())
        .collect();
    assert_eq!(logs.len(), 1);
    assert!(logs[0].starts_with("detectors.ThresholdDetector_"));
}

#[test]
fn test_unreachable_output_logs_dropped_payload() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("nobody.ipc");
    let mut env = env_for(dir.path());
    env.push(("DETECTMATE_OUT_ADDR".into(), format!("ipc://{}", out.display())));
    let mut daemon = DaemonHandle::start(&env);
    assert!(daemon.wait_for_log("service started"));

    let producer = Socket::dial(
        Pattern::Pair,
        &Address::Ipc(dir.path().join("engine.ipc")),
        SocketOptions {
            block_on_dial: true,
            ..SocketOptions::default()
        },
    )
    .unwrap();
    // Above the default threshold, so the detector emits an alert.
    producer.send(b"0.9").unwrap();

    assert!(
        daemon.wait_for_log(&format!("[ipc://{}] dropped", out.display())),
        "missing dropped-payload warning"
    );
    assert!(daemon.wait_for_log("byte payload"));

    daemon.send_signal(Signal::SIGTERM);
    assert!(daemon.wait_with_timeout(DEFAULT_TIMEOUT).success());
}

#[test]
fn test_client_without_daemon_fails() {
    let dir = tempfile::tempdir().unwrap();
    let output = run_cli(&env_for(dir.path()), &["--timeout", "200", "ping"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("cannot reach service"), "{stderr}");
}

#[test]
fn test_invalid_settings_fail_fast() {
    let dir = tempfile::tempdir().unwrap();
    let mut env = env_for(dir.path());
    env.push(("DETECTMATE_ENGINE_RECV_TIMEOUT".into(), "0".into()));
    let mut daemon = DaemonHandle::start(&env);
    let status = daemon.wait_with_timeout(Duration::from_secs(5));
    assert!(!status.success());
    assert!(daemon.wait_for_log("engine_recv_timeout"));
}
