// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigStoreError {
    #[error("no component config file is configured")]
    NotConfigured,
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },
    #[error("failed to serialize config for {}: {message}", path.display())]
    Serialize { path: PathBuf, message: String },
    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Yaml,
    Json,
}

impl ConfigFormat {
    /// `.json` files are JSON, everything else is YAML.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => ConfigFormat::Json,
            _ => ConfigFormat::Yaml,
        }
    }
}

/// The file a component configuration is loaded from and persisted to.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
    format: ConfigFormat,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let format = ConfigFormat::from_path(&path);
        Self { path, format }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn format(&self) -> ConfigFormat {
        self.format
    }

    /// Read the stored config. `None` when the file does not exist; an empty
    /// file reads as an empty mapping.
    pub fn load(&self) -> Result<Option<Value>, ConfigStoreError> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(ConfigStoreError::Read {
                    path: self.path.clone(),
                    source,
                });
            }
        };
        if contents.trim().is_empty() {
            return Ok(Some(Value::Object(Map::new())));
        }
        let parsed = match self.format {
            ConfigFormat::Json => serde_json::from_str(&contents).map_err(|e| e.to_string()),
            ConfigFormat::Yaml => serde_yaml::from_str(&contents).map_err(|e| e.to_string()),
        };
        match parsed {
            Ok(Value::Null) => Ok(Some(Value::Object(Map::new()))),
            Ok(value) => Ok(Some(value)),
            Err(message) => Err(ConfigStoreError::Parse {
                path: self.path.clone(),
                message,
            }),
        }
    }

    /// Overwrite the file with `config`, in the file's own format.
    pub fn save(&self, config: &Value) -> Result<(), ConfigStoreError> {
        let serialized = match self.format {
            ConfigFormat::Json => serde_json::to_string_pretty(config)
                .map(|mut s| {
                    s.push('\n');
                    s
                })
                .map_err(|e| e.to_string()),
            ConfigFormat::Yaml => serde_yaml::to_string(config).map_err(|e| e.to_string()),
        }
        .map_err(|message| ConfigStoreError::Serialize {
            path: self.path.clone(),
            message,
        })?;

        let write = || -> io::Result<()> {
            if let Some(parent) = self.path.parent()
                && !parent.as_os_str().is_empty()
            {
                fs::create_dir_all(parent)?;
            }
            fs::write(&self.path, serialized)
        };
        write().map_err(|source| ConfigStoreError::Write {
            path: self.path.clone(),
            source,
        })
    }
}
