// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail, ensure};
use detectmate_log::{LogConfig, parse_level};
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use uuid::Uuid;

use crate::transport::Address;

pub const ENV_PREFIX: &str = "DETECTMATE_";

/// What the data loop does with inbound messages while paused.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PausePolicy {
    /// Keep receiving and discard.
    #[default]
    Drain,
    /// Stop receiving; the transport queues messages until resume.
    Hold,
}

impl fmt::Display for PausePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PausePolicy::Drain => write!(f, "drain"),
            PausePolicy::Hold => write!(f, "hold"),
        }
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// Service settings. Built once at startup, read-only afterwards.
///
/// Durations are given in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub component_name: Option<String>,
    /// Computed from the name or the addresses when left empty.
    pub component_id: String,
    pub component_type: String,
    pub component_config_class: Option<String>,
    /// Component config file, loaded at startup and written by persisted
    /// reconfigures.
    pub config_file: Option<PathBuf>,

    pub log_level: String,
    pub log_dir: PathBuf,
    pub log_to_console: bool,
    pub log_to_file: bool,

    pub manager_addr: Address,
    #[serde(with = "millis")]
    pub manager_recv_timeout: Duration,
    #[serde(with = "millis")]
    pub manager_thread_join_timeout: Duration,

    pub engine_addr: Address,
    pub engine_autostart: bool,
    #[serde(with = "millis")]
    pub engine_recv_timeout: Duration,
    #[serde(with = "millis")]
    pub engine_thread_join_timeout: Duration,
    pub engine_pause_policy: PausePolicy,

    pub out_addr: Vec<Address>,
    #[serde(with = "millis")]
    pub out_dial_timeout: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            component_name: None,
            component_id: String::new(),
            component_type: "core".to_string(),
            component_config_class: None,
            config_file: None,
            log_level: "INFO".to_string(),
            log_dir: PathBuf::from("./logs"),
            log_to_console: true,
            log_to_file: true,
            manager_addr: Address::Ipc(PathBuf::from("/tmp/detectmate.cmd.ipc")),
            manager_recv_timeout: Duration::from_millis(100),
            manager_thread_join_timeout: Duration::from_millis(1000),
            engine_addr: Address::Ipc(PathBuf::from("/tmp/detectmate.engine.ipc")),
            engine_autostart: true,
            engine_recv_timeout: Duration::from_millis(100),
            engine_thread_join_timeout: Duration::from_millis(1000),
            engine_pause_policy: PausePolicy::Drain,
            out_addr: Vec::new(),
            out_dial_timeout: Duration::from_millis(1000),
        }
    }
}

/// How an environment override is turned into a settings value.
#[derive(Clone, Copy)]
enum EnvKind {
    /// Taken verbatim.
    Text,
    /// Parsed as a YAML scalar: booleans and integers.
    Scalar,
    /// A YAML list or a comma-separated string.
    List,
}

const FIELDS: &[(&str, EnvKind)] = &[
    ("component_name", EnvKind::Text),
    ("component_id", EnvKind::Text),
    ("component_type", EnvKind::Text),
    ("component_config_class", EnvKind::Text),
    ("config_file", EnvKind::Text),
    ("log_level", EnvKind::Text),
    ("log_dir", EnvKind::Text),
    ("log_to_console", EnvKind::Scalar),
    ("log_to_file", EnvKind::Scalar),
    ("manager_addr", EnvKind::Text),
    ("manager_recv_timeout", EnvKind::Scalar),
    ("manager_thread_join_timeout", EnvKind::Scalar),
    ("engine_addr", EnvKind::Text),
    ("engine_autostart", EnvKind::Scalar),
    ("engine_recv_timeout", EnvKind::Scalar),
    ("engine_thread_join_timeout", EnvKind::Scalar),
    ("engine_pause_policy", EnvKind::Text),
    ("out_addr", EnvKind::List),
    ("out_dial_timeout", EnvKind::Scalar),
];

pub fn env_var_name(field: &str) -> String {
    format!("{ENV_PREFIX}{}", field.to_uppercase())
}

fn env_value(field: &str, kind: EnvKind, raw: &str) -> Result<Value> {
    let value = match kind {
        EnvKind::Text => Value::String(raw.to_string()),
        EnvKind::Scalar => serde_yaml::from_str(raw)
            .with_context(|| format!("invalid value for {}: {raw:?}", env_var_name(field)))?,
        EnvKind::List if raw.trim_start().starts_with('[') => serde_yaml::from_str(raw)
            .with_context(|| format!("invalid list for {}: {raw:?}", env_var_name(field)))?,
        EnvKind::List => Value::Sequence(
            raw.split(',')
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(|item| Value::String(item.to_string()))
                .collect(),
        ),
    };
    Ok(value)
}

/// Environment variables take precedence over values from the file.
fn apply_env_overrides(doc: &mut Mapping) -> Result<()> {
    for (field, kind) in FIELDS {
        if let Ok(raw) = std::env::var(env_var_name(field)) {
            doc.insert(Value::String((*field).to_string()), env_value(field, *kind, &raw)?);
        }
    }
    Ok(())
}

fn read_settings_file(path: &Path) -> Result<Mapping> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("reading settings file {}", path.display()))?;
    let doc: Value = serde_yaml::from_str(&contents)
        .with_context(|| format!("parsing settings file {}", path.display()))?;
    match doc {
        Value::Null => Ok(Mapping::new()),
        Value::Mapping(map) => Ok(map),
        _ => bail!("settings file {} must contain a mapping", path.display()),
    }
}

impl Settings {
    /// Load settings from an optional YAML file plus `DETECTMATE_*`
    /// environment overrides. A missing file means defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut doc = match path {
            Some(path) if path.exists() => read_settings_file(path)?,
            _ => Mapping::new(),
        };
        apply_env_overrides(&mut doc)?;
        let settings: Settings =
            serde_yaml::from_value(Value::Mapping(doc)).context("invalid settings")?;
        settings.finalize()
    }

    /// Validate and fill in computed fields. Called by [`Settings::load`];
    /// needed only when settings are built in code.
    pub fn finalize(mut self) -> Result<Self> {
        ensure!(
            !self.component_type.trim().is_empty(),
            "component_type must not be empty"
        );
        for (name, timeout) in [
            ("manager_recv_timeout", self.manager_recv_timeout),
            ("engine_recv_timeout", self.engine_recv_timeout),
            ("out_dial_timeout", self.out_dial_timeout),
        ] {
            ensure!(!timeout.is_zero(), "{name} must be greater than zero");
        }
        if self.component_id.is_empty() {
            self.component_id = derive_component_id(
                &self.component_type,
                self.component_name.as_deref(),
                &self.manager_addr,
                &self.engine_addr,
            );
        }
        Ok(self)
    }

    pub fn log_file(&self) -> PathBuf {
        self.log_dir
            .join(format!("{}_{}.log", self.component_type, self.component_id))
    }

    pub fn log_config(&self) -> LogConfig {
        LogConfig {
            level: parse_level(&self.log_level),
            console: self.log_to_console,
            file: self.log_to_file.then(|| self.log_file()),
        }
    }
}

/// Stable identifier: UUIDv5 (URL namespace) of the component name, or of
/// the addresses when unnamed, as 32 lowercase hex digits.
pub fn derive_component_id(
    component_type: &str,
    component_name: Option<&str>,
    manager_addr: &Address,
    engine_addr: &Address,
) -> String {
    let key = match component_name {
        Some(name) => format!("detectmate/{component_type}/{name}"),
        None => format!("detectmate/{component_type}|{manager_addr}|{engine_addr}"),
    };
    Uuid::new_v5(&Uuid::NAMESPACE_URL, key.as_bytes())
        .simple()
        .to_string()
}
