// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use serde::{Deserialize, Serialize};

use super::{Component, ComponentError, ConfigSchema, Registration};

pub const COMPONENT_TYPE: &str = "core";
pub const CONFIG_CLASS: &str = "core.EchoConfig";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EchoConfig {
    /// Prepended to every forwarded payload.
    pub prefix: String,
}

impl ConfigSchema for EchoConfig {}

/// Forwards every payload unchanged apart from the configured prefix.
pub struct Echo {
    prefix: Vec<u8>,
}

impl Echo {
    pub fn new(config: EchoConfig) -> Self {
        Self {
            prefix: config.prefix.into_bytes(),
        }
    }
}

impl Component for Echo {
    fn process(&mut self, payload: &[u8]) -> Result<Option<Vec<u8>>, ComponentError> {
        let mut out = Vec::with_capacity(self.prefix.len() + payload.len());
        out.extend_from_slice(&self.prefix);
        out.extend_from_slice(payload);
        Ok(Some(out))
    }
}

pub fn registration() -> Registration {
    Registration::new::<EchoConfig, _>(COMPONENT_TYPE, CONFIG_CLASS, |config| {
        Ok(Box::new(Echo::new(config)))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_echo_prefixes_payload() {
        let mut echo = Echo::new(EchoConfig {
            prefix: "seen:".into(),
        });
        assert_eq!(echo.process(b"abc").unwrap(), Some(b"seen:abc".to_vec()));
        assert_eq!(echo.process(b"").unwrap(), Some(b"seen:".to_vec()));
    }

    #[test]
    fn test_default_config_is_plain_echo() {
        let reg = registration();
        assert_eq!(reg.default_config(), &json!({"prefix": ""}));
        let mut echo = reg.build(reg.default_config()).unwrap();
        assert_eq!(echo.process(b"\x00\xff").unwrap(), Some(vec![0, 0xff]));
    }
}
