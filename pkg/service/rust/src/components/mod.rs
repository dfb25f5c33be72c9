// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Processing components and the registry that builds them by type name.
//!
//! A component turns one inbound payload into zero or one output payloads.
//! Its configuration is an opaque JSON value for the rest of the service;
//! only the component's own [`ConfigSchema`] knows its fields.

pub mod echo;
pub mod threshold;

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use thiserror::Error;

pub trait Component: Send {
    /// Handle one payload. `Ok(None)` means nothing is forwarded.
    fn process(&mut self, payload: &[u8]) -> Result<Option<Vec<u8>>, ComponentError>;

    /// Take a new, already validated config without losing runtime state.
    ///
    /// Returns `Ok(false)` when the component has no way to do that, in which
    /// case a fresh instance is built from the config instead. An error must
    /// leave the component as it was.
    fn reconfigure(&mut self, _config: &Value) -> Result<bool, ComponentError> {
        Ok(false)
    }
}

#[derive(Error, Debug)]
pub enum ComponentError {
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
    #[error("{0}")]
    Failed(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("invalid {class}: {message}")]
    Schema { class: String, message: String },
    #[error("invalid {class}: {message}")]
    Constraint { class: String, message: String },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("unknown component type '{requested}' (known: {known})")]
    UnknownType { requested: String, known: String },
    #[error("component type '{component_type}' uses config class '{expected}', not '{requested}'")]
    ConfigClassMismatch {
        component_type: String,
        expected: String,
        requested: String,
    },
}

/// The typed configuration of a component.
pub trait ConfigSchema: Serialize + DeserializeOwned + Default {
    /// Constraints serde cannot express, such as value ranges.
    fn check(&self) -> Result<(), String> {
        Ok(())
    }
}

/// Deserialize, check and normalize a raw config against `C`.
fn validate_as<C: ConfigSchema>(class: &str, raw: &Value) -> Result<(C, Value), ValidationError> {
    let schema_error = |message: String| ValidationError::Schema {
        class: class.to_string(),
        message,
    };
    let empty = Value::Object(Map::new());
    let raw = if raw.is_null() { &empty } else { raw };
    let config: C =
        serde_json::from_value(raw.clone()).map_err(|e| schema_error(e.to_string()))?;
    config.check().map_err(|message| ValidationError::Constraint {
        class: class.to_string(),
        message,
    })?;
    let normalized = serde_json::to_value(&config).map_err(|e| schema_error(e.to_string()))?;
    Ok((config, normalized))
}

type Validator = dyn Fn(&Value) -> Result<Value, ValidationError> + Send + Sync;
type Factory = dyn Fn(&Value) -> Result<Box<dyn Component>, ComponentError> + Send + Sync;

/// Everything needed to validate configs for, and build, one component type.
pub struct Registration {
    component_type: String,
    config_class: String,
    default_config: Value,
    validator: Box<Validator>,
    factory: Box<Factory>,
}

impl Registration {
    pub fn new<C, F>(component_type: &str, config_class: &str, build: F) -> Self
    where
        C: ConfigSchema + 'static,
        F: Fn(C) -> Result<Box<dyn Component>, ComponentError> + Send + Sync + 'static,
    {
        let validate_class = config_class.to_string();
        let build_class = config_class.to_string();
        Self {
            component_type: component_type.to_string(),
            config_class: config_class.to_string(),
            default_config: serde_json::to_value(C::default()).unwrap_or_default(),
            validator: Box::new(move |raw| {
                validate_as::<C>(&validate_class, raw).map(|(_, normalized)| normalized)
            }),
            factory: Box::new(move |raw| {
                let (config, _) = validate_as::<C>(&build_class, raw)
                    .map_err(|e| ComponentError::Failed(e.to_string()))?;
                build(config)
            }),
        }
    }

    pub fn component_type(&self) -> &str {
        &self.component_type
    }

    pub fn config_class(&self) -> &str {
        &self.config_class
    }

    pub fn default_config(&self) -> &Value {
        &self.default_config
    }

    /// Validate a raw config and return it normalized, with defaults filled in.
    pub fn validate(&self, raw: &Value) -> Result<Value, ValidationError> {
        (self.validator)(raw)
    }

    pub fn build(&self, config: &Value) -> Result<Box<dyn Component>, ComponentError> {
        (self.factory)(config)
    }
}

impl std::fmt::Debug for Registration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registration")
            .field("component_type", &self.component_type)
            .field("config_class", &self.config_class)
            .finish_non_exhaustive()
    }
}

/// Maps component type names to their registrations.
#[derive(Debug, Clone)]
pub struct Registry {
    entries: HashMap<String, Arc<Registration>>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl Registry {
    pub fn empty() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// The components that ship with the service.
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        registry.register(echo::registration());
        registry.register(threshold::registration());
        registry
    }

    /// Add a registration, replacing any previous one for the same type.
    pub fn register(&mut self, registration: Registration) {
        self.entries.insert(
            registration.component_type().to_string(),
            Arc::new(registration),
        );
    }

    pub fn component_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }

    pub fn resolve(
        &self,
        component_type: &str,
        config_class: Option<&str>,
    ) -> Result<Arc<Registration>, RegistryError> {
        let registration =
            self.entries
                .get(component_type)
                .ok_or_else(|| RegistryError::UnknownType {
                    requested: component_type.to_string(),
                    known: self.component_types().join(", "),
                })?;
        if let Some(requested) = config_class
            && requested != registration.config_class()
        {
            return Err(RegistryError::ConfigClassMismatch {
                component_type: component_type.to_string(),
                expected: registration.config_class().to_string(),
                requested: requested.to_string(),
            });
        }
        Ok(Arc::clone(registration))
    }
}
