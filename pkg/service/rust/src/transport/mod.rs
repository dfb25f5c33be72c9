// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Message sockets over in-process, Unix domain socket and TCP transports.

mod address;
mod frame;
mod socket;
mod stream;

use std::io;

use thiserror::Error;

pub use address::{Address, AddressError};
pub use frame::MAX_FRAME_LEN;
pub use socket::{Pattern, Socket, SocketOptions};

#[derive(Error, Debug)]
pub enum TransportError {
    #[error(transparent)]
    Address(#[from] AddressError),
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to connect to {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: io::Error,
    },
    #[error("timed out waiting for a message")]
    Timeout,
    #[error("socket is closed")]
    Closed,
    #[error("no peer connected on {0}")]
    NotConnected(String),
    #[error("no request is waiting for a reply")]
    NoPendingRequest,
    #[error("a reply must be sent before the next receive")]
    ReplyPending,
    #[error("failed to send to {address}: {source}")]
    Send {
        address: String,
        #[source]
        source: io::Error,
    },
    #[error("{operation} is not supported on a {pattern} socket")]
    Unsupported {
        operation: &'static str,
        pattern: Pattern,
    },
}

impl TransportError {
    /// Whether the socket can no longer be used at all.
    pub fn is_fatal(&self) -> bool {
        matches!(self, TransportError::Closed)
    }
}
