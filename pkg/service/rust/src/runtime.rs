// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Owns the active component, its configuration and the lifecycle state.
//!
//! State, config and a handle to the component sit behind one `RwLock`. The
//! control thread is the only writer; the data thread takes a read lock just
//! long enough to check the state and clone the handle, then runs the
//! component under the component's own mutex.
//!
//! A component that accepts a new config in place is updated under that
//! mutex, so the update waits for a call in flight and keeps whatever state
//! the component carries. Otherwise a fresh instance is built and swapped in
//! without waiting, and a call already in flight finishes against the
//! instance it started with. Panics raised while validating, building or
//! updating are contained like the ones raised by `process`.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{
    Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard,
};

use log::{debug, warn};
use serde_json::Value;
use thiserror::Error;

use crate::components::{Component, ComponentError, Registration, ValidationError};
use crate::state::{LifecycleCommand, RuntimeState, TransitionError};

#[derive(Error, Debug)]
pub enum ConfigureError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("failed to build {component_type}: {source}")]
    Build {
        component_type: String,
        #[source]
        source: ComponentError,
    },
}

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("component failed: {0}")]
    Fault(#[from] ComponentError),
    #[error("component panicked: {0}")]
    Panicked(String),
}

/// What became of one inbound payload.
#[derive(Debug, PartialEq, Eq)]
pub enum Processed {
    /// Not handed to the component because the service was not running.
    Skipped(RuntimeState),
    /// The component produced nothing to forward.
    Empty,
    Output(Vec<u8>),
}

type SharedComponent = Arc<Mutex<Box<dyn Component>>>;

struct Inner {
    state: RuntimeState,
    component: SharedComponent,
    config: Value,
}

pub struct ComponentRuntime {
    registration: Arc<Registration>,
    inner: RwLock<Inner>,
}

impl ComponentRuntime {
    /// Validate `config` and build the first component instance. Starts in
    /// `INITIALIZING`.
    pub fn new(registration: Arc<Registration>, config: &Value) -> Result<Self, ConfigureError> {
        let config = validate(&registration, config)?;
        let component = build(&registration, &config)?;
        Ok(Self {
            registration,
            inner: RwLock::new(Inner {
                state: RuntimeState::Initializing,
                component: Arc::new(Mutex::new(component)),
                config,
            }),
        })
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn registration(&self) -> &Registration {
        &self.registration
    }

    pub fn state(&self) -> RuntimeState {
        self.read().state
    }

    /// The active, normalized configuration.
    pub fn config(&self) -> Value {
        self.read().config.clone()
    }

    /// Apply a lifecycle command. On error the state is left untouched.
    pub fn apply(&self, command: LifecycleCommand) -> Result<RuntimeState, TransitionError> {
        let mut inner = self.write();
        let next = inner.state.apply(command)?;
        inner.state = next;
        Ok(next)
    }

    /// Enter the terminal state once shutdown has completed.
    pub fn mark_stopped(&self) {
        let mut inner = self.write();
        if !inner.state.can_finish() {
            debug!("marking service stopped from {}", inner.state);
        }
        inner.state = RuntimeState::Stopped;
    }

    /// Validate `raw` and hand it to the component, rebuilding the component
    /// when it cannot take the config in place. Returns the normalized config
    /// now in effect. On error the previous config stays active.
    pub fn reconfigure(&self, raw: &Value) -> Result<Value, ConfigureError> {
        let config = validate(&self.registration, raw)?;

        let current = Arc::clone(&self.read().component);
        let mut component = lock(&current);
        match panic::catch_unwind(AssertUnwindSafe(|| component.reconfigure(&config))) {
            Ok(Ok(true)) => {
                self.write().config = config.clone();
                return Ok(config);
            }
            Ok(Ok(false)) => {}
            Ok(Err(source)) => return Err(build_error(&self.registration, source)),
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                // The instance may be half updated.
                match build(&self.registration, &self.config()) {
                    Ok(fresh) => *component = fresh,
                    Err(e) => warn!("could not rebuild component after failed update: {e}"),
                }
                return Err(build_error(
                    &self.registration,
                    ComponentError::Failed(format!("panicked: {message}")),
                ));
            }
        }
        drop(component);

        let fresh = build(&self.registration, &config)?;
        let mut inner = self.write();
        inner.component = Arc::new(Mutex::new(fresh));
        inner.config = config.clone();
        Ok(config)
    }

    /// Run one payload through the component if the service is running.
    /// Faults and panics inside the component are returned, never propagated.
    pub fn process(&self, payload: &[u8]) -> Result<Processed, ProcessError> {
        let active = {
            let inner = self.read();
            if !inner.state.is_running() {
                return Ok(Processed::Skipped(inner.state));
            }
            Arc::clone(&inner.component)
        };
        let mut component = lock(&active);
        match panic::catch_unwind(AssertUnwindSafe(|| component.process(payload))) {
            Ok(Ok(Some(output))) => Ok(Processed::Output(output)),
            Ok(Ok(None)) => Ok(Processed::Empty),
            Ok(Err(fault)) => Err(ProcessError::Fault(fault)),
            Err(panic) => Err(ProcessError::Panicked(panic_message(panic.as_ref()))),
        }
    }
}

fn lock(component: &SharedComponent) -> MutexGuard<'_, Box<dyn Component>> {
    component.lock().unwrap_or_else(PoisonError::into_inner)
}

fn build_error(registration: &Registration, source: ComponentError) -> ConfigureError {
    ConfigureError::Build {
        component_type: registration.component_type().to_string(),
        source,
    }
}

/// Run `f`, reporting a panic as a build failure of the component.
fn contained<T>(
    registration: &Registration,
    f: impl FnOnce() -> Result<T, ConfigureError>,
) -> Result<T, ConfigureError> {
    panic::catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|panic| {
        Err(build_error(
            registration,
            ComponentError::Failed(format!("panicked: {}", panic_message(panic.as_ref()))),
        ))
    })
}

fn validate(registration: &Registration, raw: &Value) -> Result<Value, ConfigureError> {
    contained(registration, || Ok(registration.validate(raw)?))
}

fn build(registration: &Registration, config: &Value) -> Result<Box<dyn Component>, ConfigureError> {
    contained(registration, || {
        registration
            .build(config)
            .map_err(|source| build_error(registration, source))
    })
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
