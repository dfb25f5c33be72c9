// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RuntimeState {
    /// Sockets are up, the data loop has not started consuming.
    Initializing,
    /// Inbound payloads go through the component.
    Running,
    /// Inbound payloads are not processed.
    Paused,
    /// Shutdown requested, loops are exiting.
    Stopping,
    /// Terminal.
    Stopped,
}

/// A state change requested over the control channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleCommand {
    Start,
    Pause,
    Resume,
    Stop,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("cannot {command} while {from}")]
pub struct TransitionError {
    pub command: LifecycleCommand,
    pub from: RuntimeState,
}

impl RuntimeState {
    pub fn is_running(self) -> bool {
        self == RuntimeState::Running
    }

    pub fn is_terminating(self) -> bool {
        matches!(self, RuntimeState::Stopping | RuntimeState::Stopped)
    }

    /// The state `command` leads to from `self`, if the transition is allowed.
    pub fn apply(self, command: LifecycleCommand) -> Result<RuntimeState, TransitionError> {
        use LifecycleCommand::*;
        use RuntimeState::*;
        match (command, self) {
            (Start, Initializing) => Ok(Running),
            (Pause, Running) => Ok(Paused),
            (Resume, Paused) => Ok(Running),
            (Stop, Initializing | Running | Paused) => Ok(Stopping),
            (command, from) => Err(TransitionError { command, from }),
        }
    }

    pub(crate) fn can_finish(self) -> bool {
        self == RuntimeState::Stopping
    }
}

impl fmt::Display for RuntimeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeState::Initializing => write!(f, "INITIALIZING"),
            RuntimeState::Running => write!(f, "RUNNING"),
            RuntimeState::Paused => write!(f, "PAUSED"),
            RuntimeState::Stopping => write!(f, "STOPPING"),
            RuntimeState::Stopped => write!(f, "STOPPED"),
        }
    }
}

impl fmt::Display for LifecycleCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleCommand::Start => write!(f, "start"),
            LifecycleCommand::Pause => write!(f, "pause"),
            LifecycleCommand::Resume => write!(f, "resume"),
            LifecycleCommand::Stop => write!(f, "stop"),
        }
    }
}
