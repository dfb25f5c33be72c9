// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

use crate::protocol::{ErrorKind, ReconfigureRequest, Reply, Request};
use crate::transport::{Address, Pattern, Socket, SocketOptions, TransportError};

#[derive(Error, Debug)]
pub enum ClientError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("malformed reply: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("{kind}: {error}")]
    Rejected { kind: ErrorKind, error: String },
}

/// Blocking request/reply client for a service's control channel.
pub struct ControlClient {
    socket: Socket,
}

impl ControlClient {
    /// Connect to `address`, failing if nothing is listening there. Each
    /// request waits up to `timeout` for its reply.
    pub fn connect(address: &Address, timeout: Duration) -> Result<Self, ClientError> {
        let socket = Socket::dial(
            Pattern::Req,
            address,
            SocketOptions {
                recv_timeout: Some(timeout),
                send_timeout: timeout,
                reconnect_interval: timeout,
                block_on_dial: true,
            },
        )?;
        Ok(Self { socket })
    }

    /// Send one request and return the decoded reply, successful or not.
    pub fn request(&self, request: &Request) -> Result<Reply, ClientError> {
        self.socket.send(&request.to_wire())?;
        let raw = self.socket.recv()?;
        Ok(Reply::from_bytes(&raw)?)
    }

    /// Like [`ControlClient::request`], but a failed reply becomes an error.
    pub fn call(&self, request: &Request) -> Result<Value, ClientError> {
        let reply = self.request(request)?;
        if reply.ok {
            return Ok(reply.result.unwrap_or(Value::Null));
        }
        Err(ClientError::Rejected {
            kind: reply.kind.unwrap_or(ErrorKind::Internal),
            error: reply.error.unwrap_or_default(),
        })
    }

    pub fn ping(&self) -> Result<Value, ClientError> {
        self.call(&Request::Ping)
    }

    pub fn status(&self) -> Result<Value, ClientError> {
        self.call(&Request::Status)
    }

    pub fn start(&self) -> Result<Value, ClientError> {
        self.call(&Request::Start)
    }

    pub fn pause(&self) -> Result<Value, ClientError> {
        self.call(&Request::Pause)
    }

    pub fn resume(&self) -> Result<Value, ClientError> {
        self.call(&Request::Resume)
    }

    pub fn stop(&self) -> Result<Value, ClientError> {
        self.call(&Request::Stop)
    }

    pub fn reconfigure(&self, config: Value, persist: bool) -> Result<Value, ClientError> {
        self.call(&Request::Reconfigure(ReconfigureRequest { config, persist }))
    }

    pub fn command(&self, verb: &str, args: Option<&str>) -> Result<Value, ClientError> {
        self.call(&Request::Custom {
            verb: verb.to_string(),
            args: args.map(str::to_string),
        })
    }
}
