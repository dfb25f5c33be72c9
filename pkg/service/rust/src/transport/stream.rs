// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use std::collections::HashMap;
use std::io::{self, ErrorKind, Read, Write};
use std::net::{Shutdown, TcpListener, TcpStream, ToSocketAddrs};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{LazyLock, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use log::debug;

use super::Address;

const MIN_CONNECT_TIMEOUT: Duration = Duration::from_millis(10);

/// One established connection, whatever the underlying transport.
pub(crate) enum Stream {
    Unix(UnixStream),
    Tcp(TcpStream),
}

impl Stream {
    pub(crate) fn try_clone(&self) -> io::Result<Stream> {
        match self {
            Stream::Unix(s) => s.try_clone().map(Stream::Unix),
            Stream::Tcp(s) => s.try_clone().map(Stream::Tcp),
        }
    }

    /// Shut down both directions. Unblocks any thread reading a clone.
    pub(crate) fn shutdown(&self) {
        let _ = match self {
            Stream::Unix(s) => s.shutdown(Shutdown::Both),
            Stream::Tcp(s) => s.shutdown(Shutdown::Both),
        };
    }

    pub(crate) fn set_write_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        match self {
            Stream::Unix(s) => s.set_write_timeout(timeout),
            Stream::Tcp(s) => s.set_write_timeout(timeout),
        }
    }
}

impl Read for Stream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Stream::Unix(s) => s.read(buf),
            Stream::Tcp(s) => s.read(buf),
        }
    }
}

impl Write for Stream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Stream::Unix(s) => s.write(buf),
            Stream::Tcp(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Stream::Unix(s) => s.flush(),
            Stream::Tcp(s) => s.flush(),
        }
    }
}

/// Open a connection to a listening endpoint.
pub(crate) fn connect(address: &Address, timeout: Duration) -> io::Result<Stream> {
    match address {
        Address::Inproc(name) => inproc_connect(name).map(Stream::Unix),
        Address::Ipc(path) => UnixStream::connect(path).map(Stream::Unix),
        Address::Tcp { host, port } => {
            let mut last_err = None;
            for addr in (host.as_str(), *port).to_socket_addrs()? {
                match TcpStream::connect_timeout(&addr, timeout.max(MIN_CONNECT_TIMEOUT)) {
                    Ok(stream) => {
                        let _ = stream.set_nodelay(true);
                        return Ok(Stream::Tcp(stream));
                    }
                    Err(e) => last_err = Some(e),
                }
            }
            Err(last_err.unwrap_or_else(|| {
                io::Error::new(
                    ErrorKind::AddrNotAvailable,
                    format!("{host}:{port} did not resolve to any address"),
                )
            }))
        }
    }
}

/// The listening half of a bound endpoint.
pub(crate) enum Acceptor {
    Unix {
        listener: UnixListener,
        path: PathBuf,
    },
    Tcp(TcpListener),
    Inproc {
        name: String,
        incoming: Receiver<UnixStream>,
    },
}

impl Acceptor {
    /// Bind `address`. Returns the acceptor and the address actually bound,
    /// which differs from the input only for `tcp://host:0`.
    pub(crate) fn bind(address: &Address) -> io::Result<(Acceptor, Address)> {
        match address {
            Address::Inproc(name) => {
                let incoming = inproc_register(name)?;
                Ok((
                    Acceptor::Inproc {
                        name: name.clone(),
                        incoming,
                    },
                    address.clone(),
                ))
            }
            Address::Ipc(path) => {
                // A previous run may have left its socket file behind.
                std::fs::remove_file(path).or_else(|e| {
                    if e.kind() == ErrorKind::NotFound {
                        Ok(())
                    } else {
                        Err(e)
                    }
                })?;
                if let Some(parent) = path.parent()
                    && !parent.as_os_str().is_empty()
                    && !parent.exists()
                {
                    std::fs::create_dir_all(parent)?;
                }
                let listener = UnixListener::bind(path)?;
                listener.set_nonblocking(true)?;
                Ok((
                    Acceptor::Unix {
                        listener,
                        path: path.clone(),
                    },
                    address.clone(),
                ))
            }
            Address::Tcp { host, port } => {
                let listener = TcpListener::bind((Address::bind_host(host), *port))?;
                listener.set_nonblocking(true)?;
                let bound = Address::Tcp {
                    host: host.clone(),
                    port: listener.local_addr()?.port(),
                };
                Ok((Acceptor::Tcp(listener), bound))
            }
        }
    }

    /// Wait up to `wait` for one incoming connection.
    pub(crate) fn accept_timeout(&self, wait: Duration) -> io::Result<Option<Stream>> {
        match self {
            Acceptor::Unix { listener, .. } => match listener.accept() {
                Ok((stream, _)) => {
                    stream.set_nonblocking(false)?;
                    Ok(Some(Stream::Unix(stream)))
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    thread::sleep(wait);
                    Ok(None)
                }
                Err(e) => Err(e),
            },
            Acceptor::Tcp(listener) => match listener.accept() {
                Ok((stream, _)) => {
                    stream.set_nonblocking(false)?;
                    let _ = stream.set_nodelay(true);
                    Ok(Some(Stream::Tcp(stream)))
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    thread::sleep(wait);
                    Ok(None)
                }
                Err(e) => Err(e),
            },
            Acceptor::Inproc { incoming, .. } => match incoming.recv_timeout(wait) {
                Ok(stream) => Ok(Some(Stream::Unix(stream))),
                Err(RecvTimeoutError::Timeout) => Ok(None),
                Err(RecvTimeoutError::Disconnected) => Err(io::Error::new(
                    ErrorKind::BrokenPipe,
                    "inproc registration dropped",
                )),
            },
        }
    }
}

impl Drop for Acceptor {
    fn drop(&mut self) {
        match self {
            Acceptor::Unix { path, .. } => {
                if let Err(e) = std::fs::remove_file(&*path)
                    && e.kind() != ErrorKind::NotFound
                {
                    debug!("failed to remove socket file {}: {e}", path.display());
                }
            }
            Acceptor::Inproc { name, .. } => inproc_unregister(name),
            Acceptor::Tcp(_) => {}
        }
    }
}

static INPROC: LazyLock<Mutex<HashMap<String, Sender<UnixStream>>>> =
    LazyLock::new(Default::default);

fn inproc_registry() -> MutexGuard<'static, HashMap<String, Sender<UnixStream>>> {
    INPROC.lock().unwrap_or_else(PoisonError::into_inner)
}

fn inproc_register(name: &str) -> io::Result<Receiver<UnixStream>> {
    let mut registry = inproc_registry();
    if registry.contains_key(name) {
        return Err(io::Error::new(
            ErrorKind::AddrInUse,
            format!("inproc://{name} is already bound"),
        ));
    }
    let (tx, rx) = mpsc::channel();
    registry.insert(name.to_string(), tx);
    Ok(rx)
}

fn inproc_unregister(name: &str) {
    inproc_registry().remove(name);
}

/// Connect to an in-process listener through a socket pair.
fn inproc_connect(name: &str) -> io::Result<UnixStream> {
    let registry = inproc_registry();
    let refused = || {
        io::Error::new(
            ErrorKind::ConnectionRefused,
            format!("nothing bound at inproc://{name}"),
        )
    };
    let listener = registry.get(name).ok_or_else(refused)?;
    let (local, remote) = UnixStream::pair()?;
    listener.send(remote).map_err(|_| refused())?;
    Ok(local)
}
