// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("missing scheme in address '{0}' (expected inproc://, ipc:// or tcp://)")]
    MissingScheme(String),
    #[error("unsupported scheme '{scheme}' in address '{address}'")]
    UnsupportedScheme { scheme: String, address: String },
    #[error("empty {what} in address '{address}'")]
    Empty { what: &'static str, address: String },
    #[error("missing port in TCP address '{0}'")]
    MissingPort(String),
    #[error("invalid port '{port}' in TCP address '{address}'")]
    InvalidPort { port: String, address: String },
}

/// A transport endpoint URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Address {
    /// `inproc://<name>`: only reachable from inside this process.
    Inproc(String),
    /// `ipc://<path>`: a Unix domain socket.
    Ipc(PathBuf),
    /// `tcp://<host>:<port>`. A host of `*` binds all interfaces.
    Tcp { host: String, port: u16 },
}

impl Address {
    pub fn scheme(&self) -> &'static str {
        match self {
            Address::Inproc(_) => "inproc",
            Address::Ipc(_) => "ipc",
            Address::Tcp { .. } => "tcp",
        }
    }

    pub(crate) fn bind_host(host: &str) -> &str {
        match host {
            "*" => "0.0.0.0",
            other => other,
        }
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.trim();
        let Some((scheme, rest)) = raw.split_once("://") else {
            return Err(AddressError::MissingScheme(raw.to_string()));
        };
        let empty = |what| AddressError::Empty {
            what,
            address: raw.to_string(),
        };
        match scheme {
            "inproc" => {
                if rest.is_empty() {
                    return Err(empty("name"));
                }
                Ok(Address::Inproc(rest.to_string()))
            }
            "ipc" => {
                if rest.is_empty() {
                    return Err(empty("path"));
                }
                Ok(Address::Ipc(PathBuf::from(rest)))
            }
            "tcp" => {
                let Some((host, port)) = rest.rsplit_once(':') else {
                    return Err(AddressError::MissingPort(raw.to_string()));
                };
                let host = host.trim_start_matches('[').trim_end_matches(']');
                if host.is_empty() {
                    return Err(empty("host"));
                }
                if port.is_empty() {
                    return Err(AddressError::MissingPort(raw.to_string()));
                }
                let port = port.parse::<u16>().map_err(|_| AddressError::InvalidPort {
                    port: port.to_string(),
                    address: raw.to_string(),
                })?;
                Ok(Address::Tcp {
                    host: host.to_string(),
                    port,
                })
            }
            other => Err(AddressError::UnsupportedScheme {
                scheme: other.to_string(),
                address: raw.to_string(),
            }),
        }
    }
}

impl TryFrom<String> for Address {
    type Error = AddressError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Address> for String {
    fn from(value: Address) -> Self {
        value.to_string()
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Inproc(name) => write!(f, "inproc://{name}"),
            Address::Ipc(path) => write!(f, "ipc://{}", path.display()),
            Address::Tcp { host, port } if host.contains(':') => {
                write!(f, "tcp://[{host}]:{port}")
            }
            Address::Tcp { host, port } => write!(f, "tcp://{host}:{port}"),
        }
    }
}
