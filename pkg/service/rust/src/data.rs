// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use std::io;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, error, info, warn};

use crate::output::{DispatchReport, OutputDispatcher};
use crate::runtime::{ComponentRuntime, Processed};
use crate::settings::{PausePolicy, Settings};
use crate::shutdown::{JoinError, ShutdownSignal, join_with_timeout};
use crate::state::RuntimeState;
use crate::transport::{Address, Pattern, Socket, SocketOptions, TransportError};

/// The data loop: receives payloads on the data address and feeds them
/// through the component, one at a time and in arrival order.
pub struct DataChannel {
    name: String,
    socket: Socket,
    runtime: Arc<ComponentRuntime>,
    outputs: Arc<OutputDispatcher>,
    shutdown: ShutdownSignal,
    pause_policy: PausePolicy,
    poll_interval: Duration,
}

impl DataChannel {
    pub fn bind(
        settings: &Settings,
        runtime: Arc<ComponentRuntime>,
        outputs: Arc<OutputDispatcher>,
        shutdown: ShutdownSignal,
    ) -> Result<Self, TransportError> {
        let socket = Socket::listen(
            Pattern::Pair,
            &settings.engine_addr,
            SocketOptions {
                recv_timeout: Some(settings.engine_recv_timeout),
                ..SocketOptions::default()
            },
        )?;
        info!(
            "[{}] data channel listening on {}",
            settings.component_id,
            socket.bound_address()
        );
        Ok(Self {
            name: settings.component_id.clone(),
            socket,
            runtime,
            outputs,
            shutdown,
            pause_policy: settings.engine_pause_policy,
            poll_interval: settings.engine_recv_timeout,
        })
    }

    pub fn bound_address(&self) -> &Address {
        self.socket.bound_address()
    }

    fn should_receive(&self, state: RuntimeState) -> bool {
        match state {
            RuntimeState::Running => true,
            RuntimeState::Paused => self.pause_policy == PausePolicy::Drain,
            _ => false,
        }
    }

    /// Poll until shutdown. Each wait is bounded by the receive timeout, so
    /// state changes are picked up within one interval.
    pub fn run(&self) {
        info!("[{}] data loop started", self.name);
        while !self.shutdown.is_triggered() {
            if !self.should_receive(self.runtime.state()) {
                self.shutdown.wait_timeout(self.poll_interval);
                continue;
            }
            match self.socket.recv() {
                Ok(payload) => {
                    self.handle(&payload);
                }
                Err(TransportError::Timeout) => {}
                Err(e) if e.is_fatal() => {
                    if !self.shutdown.is_triggered() {
                        error!("[{}] data socket failed: {e}; shutting down", self.name);
                        self.shutdown.trigger();
                    }
                    break;
                }
                Err(e) => warn!("[{}] data receive failed: {e}", self.name),
            }
        }
        info!("[{}] data loop exited", self.name);
    }

    /// Process one payload and forward any output. Returns the dispatch
    /// report when something was forwarded.
    pub fn handle(&self, payload: &[u8]) -> Option<DispatchReport> {
        match self.runtime.process(payload) {
            Ok(Processed::Output(output)) => Some(self.outputs.dispatch(&output)),
            Ok(Processed::Empty) => None,
            Ok(Processed::Skipped(state)) => {
                debug!(
                    "[{}] discarded {} byte payload while {state}",
                    self.name,
                    payload.len()
                );
                None
            }
            Err(e) => {
                error!(
                    "[{}] failed to process {} byte payload: {e}",
                    self.name,
                    payload.len()
                );
                None
            }
        }
    }

    pub fn close(&self) {
        self.socket.close();
    }
}

/// Runs a [`DataChannel`] on its own thread, started at most once.
pub struct DataWorker {
    channel: Arc<DataChannel>,
    handle: Mutex<Option<JoinHandle<()>>>,
    started: Mutex<bool>,
}

impl DataWorker {
    pub fn new(channel: Arc<DataChannel>) -> Self {
        Self {
            channel,
            handle: Mutex::new(None),
            started: Mutex::new(false),
        }
    }

    pub fn channel(&self) -> &DataChannel {
        &self.channel
    }

    /// Spawn the loop thread. Returns `false` if it was already started.
    pub fn start(&self) -> io::Result<bool> {
        let mut started = self.started.lock().unwrap_or_else(PoisonError::into_inner);
        if *started {
            return Ok(false);
        }
        let channel = Arc::clone(&self.channel);
        let handle = thread::Builder::new()
            .name("data-loop".to_string())
            .spawn(move || channel.run())?;
        *self.handle.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        *started = true;
        Ok(true)
    }

    pub fn is_started(&self) -> bool {
        *self.started.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Join the loop thread if it was ever started.
    pub fn join(&self, timeout: Duration) -> Result<(), JoinError> {
        let handle = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match handle {
            Some(handle) => join_with_timeout(handle, timeout, "data"),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::echo;
    use crate::state::LifecycleCommand;
    use serde_json::json;

    fn channel(name: &str, policy: PausePolicy) -> (Arc<DataChannel>, Arc<ComponentRuntime>) {
        let settings = Settings {
            engine_addr: Address::Inproc(format!("data-test-{name}")),
            engine_recv_timeout: Duration::from_millis(20),
            engine_pause_policy: policy,
            ..Settings::default()
        };
        let runtime = Arc::new(
            ComponentRuntime::new(Arc::new(echo::registration()), &json!({"prefix": "e:"}))
                .unwrap(),
        );
        let outputs = Arc::new(OutputDispatcher::open(&[], Duration::from_millis(20)).unwrap());
        let channel =
            DataChannel::bind(&settings, Arc::clone(&runtime), outputs, ShutdownSignal::new())
                .unwrap();
        (Arc::new(channel), runtime)
    }

    #[test]
    fn test_should_receive_by_state_and_policy() {
        let (drain, _) = channel("policy-drain", PausePolicy::Drain);
        let (hold, _) = channel("policy-hold", PausePolicy::Hold);
        assert!(drain.should_receive(RuntimeState::Running));
        assert!(drain.should_receive(RuntimeState::Paused));
        assert!(!hold.should_receive(RuntimeState::Paused));
        assert!(!drain.should_receive(RuntimeState::Initializing));
        assert!(!drain.should_receive(RuntimeState::Stopping));
    }

    #[test]
    fn test_worker_starts_once_and_exits_on_shutdown() {
        let (channel, runtime) = channel("worker", PausePolicy::Drain);
        runtime.apply(LifecycleCommand::Start).unwrap();
        let worker = DataWorker::new(Arc::clone(&channel));
        assert!(!worker.is_started());
        assert!(worker.start().unwrap());
        assert!(!worker.start().unwrap());

        channel.shutdown.trigger();
        assert_eq!(worker.join(Duration::from_secs(2)), Ok(()));
        channel.close();
    }

    #[test]
    fn test_join_without_start_is_ok() {
        let (channel, _) = channel("never-started", PausePolicy::Drain);
        let worker = DataWorker::new(channel);
        assert_eq!(worker.join(Duration::from_millis(10)), Ok(()));
    }

    #[test]
    fn test_closed_socket_triggers_shutdown() {
        let (channel, runtime) = channel("fatal", PausePolicy::Drain);
        runtime.apply(LifecycleCommand::Start).unwrap();
        let worker = DataWorker::new(Arc::clone(&channel));
        worker.start().unwrap();
        channel.close();
        assert_eq!(worker.join(Duration::from_secs(2)), Ok(()));
        assert!(channel.shutdown.is_triggered());
    }

    #[test]
    fn test_handle_without_outputs() {
        let (channel, runtime) = channel("handle", PausePolicy::Drain);
        assert_eq!(channel.handle(b"x"), None);
        runtime.apply(LifecycleCommand::Start).unwrap();
        assert_eq!(
            channel.handle(b"x"),
            Some(DispatchReport {
                delivered: 0,
                dropped: 0
            })
        );
    }
}
