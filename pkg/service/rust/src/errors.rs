// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use std::io;

use thiserror::Error;

use crate::components::RegistryError;
use crate::config_store::ConfigStoreError;
use crate::runtime::ConfigureError;
use crate::shutdown::JoinError;
use crate::transport::TransportError;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Config(#[from] ConfigStoreError),
    #[error("invalid component config: {0}")]
    Component(#[from] ConfigureError),
    #[error("{channel} channel: {source}")]
    Transport {
        channel: &'static str,
        source: TransportError,
    },
    #[error("failed to spawn {name} thread: {source}")]
    Spawn { name: &'static str, source: io::Error },
    #[error("command '{0}' is reserved")]
    ReservedCommand(String),
    #[error("unclean shutdown: {}", join_messages(.0))]
    Shutdown(Vec<JoinError>),
}

fn join_messages(errors: &[JoinError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
