// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use log::{debug, error, info, warn};
use serde_json::{Value, json};

use crate::config_store::{ConfigStore, ConfigStoreError};
use crate::data::DataWorker;
use crate::output::OutputDispatcher;
use crate::protocol::{ErrorKind, ReconfigureRequest, Reply, Request};
use crate::runtime::ComponentRuntime;
use crate::settings::Settings;
use crate::shutdown::ShutdownSignal;
use crate::state::LifecycleCommand;
use crate::transport::{Address, Pattern, Socket, SocketOptions, TransportError};

/// A named control command supplied by the embedding application. Receives
/// the text after the verb, if any.
pub type CommandHandler = Arc<dyn Fn(Option<&str>) -> Result<Value, String> + Send + Sync>;

/// What the control loop does after replying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Shutdown,
}

/// Executes control requests against the runtime. Holds no socket.
pub struct CommandDispatcher {
    settings: Arc<Settings>,
    runtime: Arc<ComponentRuntime>,
    outputs: Arc<OutputDispatcher>,
    worker: Arc<DataWorker>,
    store: Option<ConfigStore>,
    handlers: HashMap<String, CommandHandler>,
}

impl CommandDispatcher {
    pub fn new(
        settings: Arc<Settings>,
        runtime: Arc<ComponentRuntime>,
        outputs: Arc<OutputDispatcher>,
        worker: Arc<DataWorker>,
        store: Option<ConfigStore>,
        handlers: HashMap<String, CommandHandler>,
    ) -> Self {
        Self {
            settings,
            runtime,
            outputs,
            worker,
            store,
            handlers,
        }
    }

    fn name(&self) -> &str {
        &self.settings.component_id
    }

    pub fn handle(&self, raw: &[u8]) -> (Reply, Flow) {
        let request = match Request::parse(raw) {
            Ok(request) => request,
            Err(e) => {
                debug!("[{}] rejected control request: {e}", self.name());
                return (e.into(), Flow::Continue);
            }
        };
        debug!("[{}] control request: {}", self.name(), request.verb());
        match request {
            Request::Ping => (Reply::success(json!("pong")), Flow::Continue),
            Request::Status => (Reply::success(self.status()), Flow::Continue),
            Request::Start => (self.start(), Flow::Continue),
            Request::Pause => (self.transition(LifecycleCommand::Pause), Flow::Continue),
            Request::Resume => (self.transition(LifecycleCommand::Resume), Flow::Continue),
            Request::Stop => {
                let reply = self.transition(LifecycleCommand::Stop);
                let flow = if reply.ok {
                    Flow::Shutdown
                } else {
                    Flow::Continue
                };
                (reply, flow)
            }
            Request::Reconfigure(request) => (self.reconfigure(request), Flow::Continue),
            Request::Custom { verb, args } => (self.custom(&verb, args.as_deref()), Flow::Continue),
        }
    }

    pub fn status(&self) -> Value {
        let registration = self.runtime.registration();
        json!({
            "component_type": registration.component_type(),
            "component_id": self.settings.component_id,
            "component_name": self.settings.component_name,
            "config_class": registration.config_class(),
            "state": self.runtime.state(),
            "config": self.runtime.config(),
            "pause_policy": self.settings.engine_pause_policy,
            "outputs": self.outputs.status(),
        })
    }

    fn transition(&self, command: LifecycleCommand) -> Reply {
        match self.runtime.apply(command) {
            Ok(state) => {
                info!("[{}] {command}: now {state}", self.name());
                Reply::success(json!({ "state": state }))
            }
            Err(e) => {
                warn!("[{}] {e}", self.name());
                Reply::failure(ErrorKind::Transition, e)
            }
        }
    }

    fn start(&self) -> Reply {
        // Check before spawning so a rejected start leaves no thread behind.
        if let Err(e) = self.runtime.state().apply(LifecycleCommand::Start) {
            return Reply::failure(ErrorKind::Transition, e);
        }
        if let Err(e) = self.worker.start() {
            error!("[{}] failed to start data loop: {e}", self.name());
            return Reply::failure(ErrorKind::Internal, format!("failed to start data loop: {e}"));
        }
        self.transition(LifecycleCommand::Start)
    }

    /// Validate and swap first, persist second. A failed write keeps the
    /// new config in effect and says so in the reply.
    fn reconfigure(&self, request: ReconfigureRequest) -> Reply {
        let applied = match self.runtime.reconfigure(&request.config) {
            Ok(applied) => applied,
            Err(e) => {
                warn!("[{}] rejected reconfigure: {e}", self.name());
                return Reply::failure(ErrorKind::Validation, e);
            }
        };
        info!("[{}] reconfigured with {applied}", self.name());
        if !request.persist {
            return Reply::success(json!({ "config": applied, "persisted": false }));
        }

        let saved = match &self.store {
            Some(store) => store.save(&applied).map(|()| store.path()),
            None => Err(ConfigStoreError::NotConfigured),
        };
        match saved {
            Ok(path) => {
                info!("[{}] persisted config to {}", self.name(), path.display());
                Reply::success(json!({
                    "config": applied,
                    "persisted": true,
                    "path": path.display().to_string(),
                }))
            }
            Err(e) => {
                error!("[{}] config applied but not persisted: {e}", self.name());
                Reply::failure(ErrorKind::Persistence, e)
                    .with_result(json!({ "config": applied, "persisted": false }))
            }
        }
    }

    fn custom(&self, verb: &str, args: Option<&str>) -> Reply {
        let Some(handler) = self.handlers.get(verb) else {
            return Reply::failure(ErrorKind::UnknownCommand, format!("unknown command: {verb}"));
        };
        match panic::catch_unwind(AssertUnwindSafe(|| handler(args))) {
            Ok(Ok(result)) => Reply::success(result),
            Ok(Err(message)) => Reply::failure(ErrorKind::Internal, message),
            Err(_) => {
                error!("[{}] command '{verb}' panicked", self.name());
                Reply::failure(ErrorKind::Internal, format!("command '{verb}' panicked"))
            }
        }
    }
}

/// The control loop: one reply for every request, strictly alternating.
pub struct ControlChannel {
    name: String,
    socket: Socket,
    dispatcher: CommandDispatcher,
    shutdown: ShutdownSignal,
}

impl ControlChannel {
    pub fn bind(
        settings: &Settings,
        dispatcher: CommandDispatcher,
        shutdown: ShutdownSignal,
    ) -> Result<Self, TransportError> {
        let socket = Socket::listen(
            Pattern::Rep,
            &settings.manager_addr,
            SocketOptions {
                recv_timeout: Some(settings.manager_recv_timeout),
                ..SocketOptions::default()
            },
        )?;
        info!(
            "[{}] control channel listening on {}",
            settings.component_id,
            socket.bound_address()
        );
        Ok(Self {
            name: settings.component_id.clone(),
            socket,
            dispatcher,
            shutdown,
        })
    }

    pub fn bound_address(&self) -> &Address {
        self.socket.bound_address()
    }

    pub fn run(&self) {
        info!("[{}] control loop started", self.name);
        while !self.shutdown.is_triggered() {
            let raw = match self.socket.recv() {
                Ok(raw) => raw,
                Err(TransportError::Timeout) => continue,
                Err(e) if e.is_fatal() => {
                    if !self.shutdown.is_triggered() {
                        error!("[{}] control socket failed: {e}; shutting down", self.name);
                        self.shutdown.trigger();
                    }
                    break;
                }
                Err(e) => {
                    warn!("[{}] control receive failed: {e}", self.name);
                    continue;
                }
            };
            let (reply, flow) = self.dispatcher.handle(&raw);
            if let Err(e) = self.socket.send(&reply.to_bytes()) {
                warn!("[{}] failed to send reply: {e}", self.name);
            }
            if flow == Flow::Shutdown {
                info!("[{}] stop requested over control channel", self.name);
                self.shutdown.trigger();
                break;
            }
        }
        info!("[{}] control loop exited", self.name);
    }

    pub fn close(&self) {
        self.socket.close();
    }
}
