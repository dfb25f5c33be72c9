// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Best-effort fan-out of processed payloads.
//!
//! Each output address gets its own dialing socket that reconnects in the
//! background. A payload is handed to every connected target once; targets
//! that are down drop it with a warning. Nothing is queued or retried.
//!
//! Targets are written one after another, each bounded by `SEND_TIMEOUT`.
//! A peer that stops reading therefore delays every target after it by up
//! to that bound per payload, until the failed write drops its connection.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use log::{debug, info, warn};
use serde::Serialize;

use crate::transport::{Address, Pattern, Socket, SocketOptions, TransportError};

/// Upper bound for writing one payload to one target.
const SEND_TIMEOUT: Duration = Duration::from_millis(100);

struct OutputTarget {
    address: Address,
    socket: Socket,
    /// Last observed connection state, used to log transitions.
    connected: AtomicBool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetStatus {
    pub address: String,
    pub connected: bool,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchReport {
    pub delivered: usize,
    pub dropped: usize,
}

pub struct OutputDispatcher {
    targets: Vec<OutputTarget>,
}

impl OutputDispatcher {
    /// Start dialing every address. Returns without waiting for any
    /// connection; `dial_timeout` is both the connect timeout and the
    /// reconnect cadence.
    pub fn open(addresses: &[Address], dial_timeout: Duration) -> Result<Self, TransportError> {
        let options = SocketOptions {
            recv_timeout: None,
            send_timeout: SEND_TIMEOUT,
            reconnect_interval: dial_timeout,
            block_on_dial: false,
        };
        let mut targets = Vec::with_capacity(addresses.len());
        for address in addresses {
            let socket = Socket::dial(Pattern::Pair, address, options.clone())?;
            debug!("[{address}] output dialing");
            targets.push(OutputTarget {
                address: address.clone(),
                socket,
                connected: AtomicBool::new(false),
            });
        }
        Ok(Self { targets })
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Send `payload` to every target independently.
    pub fn dispatch(&self, payload: &[u8]) -> DispatchReport {
        let mut report = DispatchReport::default();
        for target in &self.targets {
            let connected = target.socket.is_connected();
            let was_connected = target.connected.swap(connected, Ordering::Relaxed);
            if connected && !was_connected {
                info!("[{}] output connected", target.address);
            } else if !connected && was_connected {
                warn!("[{}] output disconnected", target.address);
            }

            match target.socket.send(payload) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    warn!(
                        "[{}] dropped {} byte payload: {e}",
                        target.address,
                        payload.len()
                    );
                    report.dropped += 1;
                }
            }
        }
        report
    }

    pub fn status(&self) -> Vec<TargetStatus> {
        self.targets
            .iter()
            .map(|target| TargetStatus {
                address: target.address.to_string(),
                connected: target.socket.is_connected(),
            })
            .collect()
    }

    pub fn is_connected(&self, index: usize) -> bool {
        self.targets
            .get(index)
            .is_some_and(|target| target.socket.is_connected())
    }

    /// Close every target in configuration order.
    pub fn close(&self) {
        for target in &self.targets {
            target.socket.close();
            debug!("[{}] output closed", target.address);
        }
    }
}
