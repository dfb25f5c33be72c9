// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Hosting runtime for detection pipeline components.
//!
//! A service wraps one [`components::Component`] and exposes it on two
//! channels: a data channel that feeds payloads through the component and
//! fans results out to the configured outputs, and a control channel that
//! answers lifecycle, status and reconfiguration requests.

pub mod client;
pub mod components;
pub mod config_store;
pub mod control;
pub mod data;
pub mod errors;
pub mod output;
pub mod protocol;
pub mod runtime;
pub mod service;
pub mod settings;
pub mod shutdown;
pub mod state;
pub mod transport;

pub use client::{ClientError, ControlClient};
pub use errors::ServiceError;
pub use service::{Service, ServiceBuilder, ServiceHandle};
pub use settings::Settings;
pub use state::{LifecycleCommand, RuntimeState};
