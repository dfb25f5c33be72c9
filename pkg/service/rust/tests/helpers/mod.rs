// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

#![allow(dead_code)]

use std::io::{BufRead, BufReader};
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Output, Stdio};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use detectmate_service::transport::{Address, Pattern, Socket, SocketOptions};
use detectmate_service::{ControlClient, Service, ServiceBuilder, ServiceError, Settings};
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Settings for a service whose sockets live under `dir`, with short
/// timeouts and no log output.
pub fn settings(dir: &Path, component_type: &str) -> Settings {
    Settings {
        component_name: Some("it".to_string()),
        component_type: component_type.to_string(),
        log_to_console: false,
        log_to_file: false,
        manager_addr: Address::Ipc(dir.join("cmd.ipc")),
        manager_recv_timeout: Duration::from_millis(20),
        engine_addr: Address::Ipc(dir.join("engine.ipc")),
        engine_recv_timeout: Duration::from_millis(20),
        out_dial_timeout: Duration::from_millis(50),
        ..Settings::default()
    }
}

pub fn wait_until(timeout: Duration, cond: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if cond() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
}

/// An in-process service, stopped on drop.
pub struct TestService {
    service: Option<Service>,
    pub control: Address,
    pub data: Address,
}

impl TestService {
    pub fn start(settings: Settings) -> Self {
        Self::start_with(ServiceBuilder::new(settings.finalize().unwrap()))
    }

    pub fn start_with(builder: ServiceBuilder) -> Self {
        let service = builder.start().expect("service should start");
        Self {
            control: service.control_address().clone(),
            data: service.data_address().clone(),
            service: Some(service),
        }
    }

    pub fn service(&self) -> &Service {
        self.service.as_ref().unwrap()
    }

    pub fn client(&self) -> ControlClient {
        ControlClient::connect(&self.control, Duration::from_secs(2)).unwrap()
    }

    /// Connect a producer to the data channel.
    pub fn producer(&self) -> Socket {
        Socket::dial(
            Pattern::Pair,
            &self.data,
            SocketOptions {
                reconnect_interval: Duration::from_secs(1),
                block_on_dial: true,
                ..SocketOptions::default()
            },
        )
        .unwrap()
    }

    /// Block until the service stops on its own.
    pub fn wait(mut self) -> Result<(), ServiceError> {
        self.service.take().unwrap().wait()
    }

    pub fn stop(mut self) -> Result<(), ServiceError> {
        self.service.take().unwrap().stop()
    }
}

impl Drop for TestService {
    fn drop(&mut self) {
        if let Some(service) = self.service.take() {
            let _ = service.stop();
        }
    }
}

/// A listening output endpoint.
pub fn sink(address: &Address) -> Socket {
    Socket::listen(
        Pattern::Pair,
        address,
        SocketOptions {
            recv_timeout: Some(Duration::from_secs(2)),
            ..SocketOptions::default()
        },
    )
    .unwrap()
}

/// Handle to a `detectmate start` child process.
pub struct DaemonHandle {
    child: Child,
    log_lines: Arc<Mutex<Vec<String>>>,
    _stderr_thread: std::thread::JoinHandle<()>,
}

impl DaemonHandle {
    pub fn start(env: &[(String, String)]) -> Self {
        let mut child = Command::new(env!("CARGO_BIN_EXE_detectmate"))
            .arg("start")
            .envs(env.iter().map(|(k, v)| (k, v)))
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .expect("failed to start detectmate");

        let stderr = child.stderr.take().expect("failed to capture stderr");
        let log_lines = Arc::new(Mutex::new(Vec::<String>::new()));
        let lines = Arc::clone(&log_lines);
        // The logger writes every level to stderr.
        let stderr_thread = std::thread::spawn(move || {
            for line in BufReader::new(stderr).lines() {
                match line {
                    Ok(l) => {
                        eprintln!("[daemon] {l}");
                        lines.lock().unwrap().push(l);
                    }
                    Err(_) => break,
                }
            }
        });

        Self {
            child,
            log_lines,
            _stderr_thread: stderr_thread,
        }
    }

    pub fn wait_for_log(&self, pattern: &str) -> bool {
        wait_until(DEFAULT_TIMEOUT, || {
            self.log_lines
                .lock()
                .unwrap()
                .iter()
                .any(|l| l.contains(pattern))
        })
    }

    pub fn send_signal(&self, sig: Signal) {
        let pid = self.child.id() as i32;
        signal::kill(Pid::from_raw(pid), sig).expect("failed to send signal to detectmate");
    }

    pub fn wait_with_timeout(&mut self, timeout: Duration) -> ExitStatus {
        let deadline = Instant::now() + timeout;
        loop {
            match self.child.try_wait().expect("failed to check detectmate") {
                Some(status) => return status,
                None if Instant::now() >= deadline => {
                    self.child.kill().ok();
                    return self.child.wait().expect("failed to wait on killed detectmate");
                }
                None => std::thread::sleep(Duration::from_millis(50)),
            }
        }
    }
}

impl Drop for DaemonHandle {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Run a one-shot `detectmate` client command.
pub fn run_cli(env: &[(String, String)], args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_detectmate"))
        .args(args)
        .envs(env.iter().map(|(k, v)| (k, v)))
        .output()
        .expect("failed to run detectmate")
}
