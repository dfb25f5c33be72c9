// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Service assembly and lifetime.
//!
//! [`ServiceBuilder::start`] binds both channels and spawns the control loop
//! (plus the data loop when autostart is on). [`Service::wait`] blocks until
//! a stop is requested, then tears everything down in a fixed order.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use log::{error, info, warn};
use serde_json::Value;

use crate::components::{Registration, Registry};
use crate::config_store::ConfigStore;
use crate::control::{CommandDispatcher, CommandHandler, ControlChannel};
use crate::data::{DataChannel, DataWorker};
use crate::errors::ServiceError;
use crate::output::OutputDispatcher;
use crate::protocol::BUILTIN_VERBS;
use crate::runtime::ComponentRuntime;
use crate::settings::Settings;
use crate::shutdown::{ShutdownSignal, join_with_timeout};
use crate::state::{LifecycleCommand, RuntimeState};
use crate::transport::Address;

pub struct ServiceBuilder {
    settings: Settings,
    registry: Registry,
    handlers: HashMap<String, CommandHandler>,
}

impl ServiceBuilder {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            registry: Registry::builtin(),
            handlers: HashMap::new(),
        }
    }

    /// Replace the set of known component types.
    pub fn registry(mut self, registry: Registry) -> Self {
        self.registry = registry;
        self
    }

    pub fn register_component(mut self, registration: Registration) -> Self {
        self.registry.register(registration);
        self
    }

    /// Add a control command. Verbs are matched case-insensitively; built-in
    /// verbs cannot be overridden.
    pub fn register_command<F>(mut self, name: &str, handler: F) -> Self
    where
        F: Fn(Option<&str>) -> Result<Value, String> + Send + Sync + 'static,
    {
        self.handlers
            .insert(name.trim().to_lowercase(), Arc::new(handler));
        self
    }

    pub fn start(self) -> Result<Service, ServiceError> {
        let ServiceBuilder {
            settings,
            registry,
            handlers,
        } = self;
        if let Some(name) = handlers
            .keys()
            .find(|name| name.is_empty() || BUILTIN_VERBS.contains(&name.as_str()))
        {
            return Err(ServiceError::ReservedCommand(name.clone()));
        }

        let settings = Arc::new(settings);
        let name = settings.component_id.clone();
        let registration = registry.resolve(
            &settings.component_type,
            settings.component_config_class.as_deref(),
        )?;

        let store = settings.config_file.as_ref().map(ConfigStore::new);
        let config = initial_config(&name, store.as_ref(), registration.default_config())?;
        let runtime = Arc::new(ComponentRuntime::new(registration, &config)?);

        let outputs = Arc::new(
            OutputDispatcher::open(&settings.out_addr, settings.out_dial_timeout).map_err(
                |source| ServiceError::Transport {
                    channel: "output",
                    source,
                },
            )?,
        );

        let shutdown = ShutdownSignal::new();
        let channel = DataChannel::bind(
            &settings,
            Arc::clone(&runtime),
            Arc::clone(&outputs),
            shutdown.clone(),
        )
        .map_err(|source| ServiceError::Transport {
            channel: "data",
            source,
        })?;
        let worker = Arc::new(DataWorker::new(Arc::new(channel)));

        let dispatcher = CommandDispatcher::new(
            Arc::clone(&settings),
            Arc::clone(&runtime),
            Arc::clone(&outputs),
            Arc::clone(&worker),
            store,
            handlers,
        );
        let control = Arc::new(
            ControlChannel::bind(&settings, dispatcher, shutdown.clone()).map_err(|source| {
                ServiceError::Transport {
                    channel: "control",
                    source,
                }
            })?,
        );

        if settings.engine_autostart {
            worker.start().map_err(|source| ServiceError::Spawn {
                name: "data-loop",
                source,
            })?;
            if let Err(e) = runtime.apply(LifecycleCommand::Start) {
                warn!("[{name}] autostart skipped: {e}");
            }
        }

        let control_thread = {
            let control = Arc::clone(&control);
            thread::Builder::new()
                .name("control-loop".to_string())
                .spawn(move || control.run())
                .map_err(|source| ServiceError::Spawn {
                    name: "control-loop",
                    source,
                })?
        };

        info!(
            "[{name}] {} service started in state {}",
            runtime.registration().component_type(),
            runtime.state()
        );
        Ok(Service {
            settings,
            runtime,
            outputs,
            worker,
            control,
            control_thread: Some(control_thread),
            shutdown,
        })
    }
}

/// Load the component config, writing the defaults out when the file does
/// not exist yet.
fn initial_config(
    name: &str,
    store: Option<&ConfigStore>,
    defaults: &Value,
) -> Result<Value, ServiceError> {
    let Some(store) = store else {
        return Ok(defaults.clone());
    };
    match store.load()? {
        Some(config) => {
            info!("[{name}] loaded config from {}", store.path().display());
            Ok(config)
        }
        None => {
            store.save(defaults)?;
            info!(
                "[{name}] wrote default config to {}",
                store.path().display()
            );
            Ok(defaults.clone())
        }
    }
}

/// Cloneable way to stop a running [`Service`] from another thread.
#[derive(Clone)]
pub struct ServiceHandle {
    shutdown: ShutdownSignal,
}

impl ServiceHandle {
    pub fn request_stop(&self) {
        self.shutdown.trigger();
    }

    pub fn is_stop_requested(&self) -> bool {
        self.shutdown.is_triggered()
    }
}

pub struct Service {
    settings: Arc<Settings>,
    runtime: Arc<ComponentRuntime>,
    outputs: Arc<OutputDispatcher>,
    worker: Arc<DataWorker>,
    control: Arc<ControlChannel>,
    control_thread: Option<JoinHandle<()>>,
    shutdown: ShutdownSignal,
}

impl Service {
    pub fn handle(&self) -> ServiceHandle {
        ServiceHandle {
            shutdown: self.shutdown.clone(),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn control_address(&self) -> &Address {
        self.control.bound_address()
    }

    pub fn data_address(&self) -> &Address {
        self.worker.channel().bound_address()
    }

    pub fn state(&self) -> RuntimeState {
        self.runtime.state()
    }

    /// Block until a stop is requested, then shut down: control loop first,
    /// data loop second, sockets last.
    pub fn wait(mut self) -> Result<(), ServiceError> {
        self.shutdown.wait();
        let name = self.settings.component_id.clone();
        info!("[{name}] shutting down");

        let mut failures = Vec::new();
        if let Some(handle) = self.control_thread.take()
            && let Err(e) = join_with_timeout(
                handle,
                self.settings.manager_thread_join_timeout,
                "control",
            )
        {
            error!("[{name}] {e}");
            failures.push(e);
        }

        if !self.runtime.state().is_terminating()
            && let Err(e) = self.runtime.apply(LifecycleCommand::Stop)
        {
            warn!("[{name}] {e}");
        }
        if let Err(e) = self.worker.join(self.settings.engine_thread_join_timeout) {
            error!("[{name}] {e}");
            failures.push(e);
        }

        self.control.close();
        self.worker.channel().close();
        self.outputs.close();
        self.runtime.mark_stopped();
        info!("[{name}] stopped");

        if failures.is_empty() {
            Ok(())
        } else {
            Err(ServiceError::Shutdown(failures))
        }
    }

    pub fn stop(self) -> Result<(), ServiceError> {
        self.shutdown.trigger();
        self.wait()
    }
}
