// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Control channel wire format.
//!
//! A request is UTF-8 text, `<verb>[ <payload>]`, with a case-insensitive
//! verb. A reply is a JSON object with an `ok` flag, and either a `result`
//! or an error `kind` plus `error` detail.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub const BUILTIN_VERBS: &[&str] = &[
    "ping",
    "status",
    "start",
    "pause",
    "resume",
    "stop",
    "reconfigure",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReconfigureRequest {
    pub config: Value,
    #[serde(default)]
    pub persist: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Ping,
    Status,
    Start,
    Pause,
    Resume,
    Stop,
    Reconfigure(ReconfigureRequest),
    /// Any other verb; resolved against the registered custom commands.
    Custom { verb: String, args: Option<String> },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RequestError {
    #[error("empty request")]
    Empty,
    #[error("request is not valid UTF-8")]
    NotUtf8,
    #[error("{0} requires a payload")]
    MissingPayload(&'static str),
    #[error("invalid {verb} payload: {message}")]
    InvalidPayload { verb: &'static str, message: String },
}

impl Request {
    pub fn parse(raw: &[u8]) -> Result<Self, RequestError> {
        let text = std::str::from_utf8(raw).map_err(|_| RequestError::NotUtf8)?;
        let text = text.trim();
        if text.is_empty() {
            return Err(RequestError::Empty);
        }
        let (verb, payload) = match text.split_once(char::is_whitespace) {
            Some((verb, rest)) => (verb, Some(rest.trim()).filter(|p| !p.is_empty())),
            None => (text, None),
        };
        let request = match verb.to_lowercase().as_str() {
            "ping" => Request::Ping,
            "status" => Request::Status,
            "start" => Request::Start,
            "pause" => Request::Pause,
            "resume" => Request::Resume,
            "stop" => Request::Stop,
            "reconfigure" => {
                let payload = payload.ok_or(RequestError::MissingPayload("reconfigure"))?;
                let request = serde_json::from_str(payload).map_err(|e| {
                    RequestError::InvalidPayload {
                        verb: "reconfigure",
                        message: e.to_string(),
                    }
                })?;
                Request::Reconfigure(request)
            }
            other => Request::Custom {
                verb: other.to_string(),
                args: payload.map(str::to_string),
            },
        };
        Ok(request)
    }

    pub fn verb(&self) -> &str {
        match self {
            Request::Ping => "ping",
            Request::Status => "status",
            Request::Start => "start",
            Request::Pause => "pause",
            Request::Resume => "resume",
            Request::Stop => "stop",
            Request::Reconfigure(_) => "reconfigure",
            Request::Custom { verb, .. } => verb,
        }
    }

    pub fn to_wire(&self) -> Vec<u8> {
        match self {
            Request::Reconfigure(request) => {
                let payload = serde_json::to_string(request).unwrap_or_default();
                format!("reconfigure {payload}").into_bytes()
            }
            Request::Custom {
                verb,
                args: Some(args),
            } => format!("{verb} {args}").into_bytes(),
            other => other.verb().as_bytes().to_vec(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Transition,
    Persistence,
    BadRequest,
    UnknownCommand,
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Transition => "transition",
            ErrorKind::Persistence => "persistence",
            ErrorKind::BadRequest => "bad_request",
            ErrorKind::UnknownCommand => "unknown_command",
            ErrorKind::Internal => "internal",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<ErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Reply {
    pub fn success(result: Value) -> Self {
        Self {
            ok: true,
            result: Some(result),
            kind: None,
            error: None,
        }
    }

    pub fn failure(kind: ErrorKind, error: impl fmt::Display) -> Self {
        Self {
            ok: false,
            result: None,
            kind: Some(kind),
            error: Some(error.to_string()),
        }
    }

    /// Attach a result to a failure, for errors that still changed something.
    pub fn with_result(mut self, result: Value) -> Self {
        self.result = Some(result);
        self
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_else(|e| {
            format!(r#"{{"ok":false,"kind":"internal","error":"unserializable reply: {e}"}}"#)
                .into_bytes()
        })
    }

    pub fn from_bytes(raw: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(raw)
    }
}

impl From<RequestError> for Reply {
    fn from(err: RequestError) -> Self {
        Reply::failure(ErrorKind::BadRequest, err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_simple_verbs() {
        assert_eq!(Request::parse(b"ping").unwrap(), Request::Ping);
        assert_eq!(Request::parse(b"  STATUS \n").unwrap(), Request::Status);
        assert_eq!(Request::parse(b"Pause").unwrap(), Request::Pause);
        assert_eq!(Request::parse(b"stop now").unwrap(), Request::Stop);
    }

    #[test]
    fn test_parse_reconfigure() {
        let request =
            Request::parse(br#"reconfigure {"config": {"threshold": 0.9}, "persist": true}"#)
                .unwrap();
        assert_eq!(
            request,
            Request::Reconfigure(ReconfigureRequest {
                config: json!({"threshold": 0.9}),
                persist: true,
            })
        );
        let request = Request::parse(br#"reconfigure {"config": {}}"#).unwrap();
        assert!(matches!(
            request,
            Request::Reconfigure(ReconfigureRequest { persist: false, .. })
        ));
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(Request::parse(b"   ").unwrap_err(), RequestError::Empty);
        assert_eq!(Request::parse(&[0xff, 0xfe]).unwrap_err(), RequestError::NotUtf8);
        assert_eq!(
            Request::parse(b"reconfigure").unwrap_err(),
            RequestError::MissingPayload("reconfigure")
        );
        assert!(matches!(
            Request::parse(b"reconfigure {bad json").unwrap_err(),
            RequestError::InvalidPayload { .. }
        ));
        assert!(matches!(
            Request::parse(br#"reconfigure {"threshold": 0.9}"#).unwrap_err(),
            RequestError::InvalidPayload { .. }
        ));
    }

    #[test]
    fn test_custom_verbs_keep_args() {
        assert_eq!(
            Request::parse(b"Flush now please").unwrap(),
            Request::Custom {
                verb: "flush".into(),
                args: Some("now please".into())
            }
        );
    }

    #[test]
    fn test_wire_form_parses_back() {
        for request in [
            Request::Status,
            Request::Reconfigure(ReconfigureRequest {
                config: json!({"prefix": "a b"}),
                persist: true,
            }),
            Request::Custom {
                verb: "flush".into(),
                args: Some("all".into()),
            },
        ] {
            assert_eq!(Request::parse(&request.to_wire()).unwrap(), request);
        }
    }

    #[test]
    fn test_reply_json_shape() {
        let ok = Reply::success(json!("pong"));
        assert_eq!(
            serde_json::to_value(&ok).unwrap(),
            json!({"ok": true, "result": "pong"})
        );
        let err = Reply::failure(ErrorKind::UnknownCommand, "unknown command: frobnicate");
        assert_eq!(
            serde_json::to_value(&err).unwrap(),
            json!({"ok": false, "kind": "unknown_command", "error": "unknown command: frobnicate"})
        );
        assert_eq!(Reply::from_bytes(&err.to_bytes()).unwrap(), err);
    }
}
