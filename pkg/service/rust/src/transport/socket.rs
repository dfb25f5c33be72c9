// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use std::collections::BTreeMap;
use std::fmt;
use std::io::ErrorKind;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, warn};

use super::frame::{read_frame, write_frame};
use super::stream::{self, Acceptor, Stream};
use super::{Address, TransportError};

const ACCEPT_POLL: Duration = Duration::from_millis(50);
const CLOSED_POLL: Duration = Duration::from_millis(100);
const MIN_WRITE_TIMEOUT: Duration = Duration::from_millis(1);
/// Frames read ahead of `recv`. Once full, readers stop draining their
/// connections and writers on the other side block until their send
/// timeout.
const INBOUND_CAPACITY: usize = 32;
const FULL_POLL: Duration = Duration::from_millis(10);

/// Messaging pattern of a socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pattern {
    /// One peer at a time; either side may send.
    Pair,
    /// Dialer side of request/reply.
    Req,
    /// Listener side of request/reply. Every `recv` must be answered by a
    /// `send` before the next `recv`.
    Rep,
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pattern::Pair => write!(f, "pair"),
            Pattern::Req => write!(f, "req"),
            Pattern::Rep => write!(f, "rep"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SocketOptions {
    /// How long `recv` waits. `None` waits until a message arrives or the
    /// socket is closed.
    pub recv_timeout: Option<Duration>,
    /// Upper bound for writing one frame to a peer.
    pub send_timeout: Duration,
    /// Dialers only: connect timeout and the pause between reconnect attempts.
    pub reconnect_interval: Duration,
    /// Dialers only: make the first connection attempt synchronously and
    /// fail `dial` if it does not succeed.
    pub block_on_dial: bool,
}

impl Default for SocketOptions {
    fn default() -> Self {
        Self {
            recv_timeout: Some(Duration::from_millis(100)),
            send_timeout: Duration::from_secs(1),
            reconnect_interval: Duration::from_millis(100),
            block_on_dial: false,
        }
    }
}

type Inbound = (u64, Vec<u8>);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// State shared between a socket and its background worker threads.
struct Shared {
    pattern: Pattern,
    address: Address,
    send_timeout: Duration,
    closed: Mutex<bool>,
    wake: Condvar,
    /// Write halves of live connections, keyed by connection id.
    peers: Mutex<BTreeMap<u64, Stream>>,
    next_peer: AtomicU64,
}

impl Shared {
    fn is_closed(&self) -> bool {
        *lock(&self.closed)
    }

    /// Sleep for up to `timeout`, returning early with `true` once closed.
    fn wait_closed(&self, timeout: Duration) -> bool {
        let guard = lock(&self.closed);
        let (guard, _) = self
            .wake
            .wait_timeout_while(guard, timeout, |closed| !*closed)
            .unwrap_or_else(PoisonError::into_inner);
        *guard
    }

    /// Returns whether the socket was already closed.
    fn mark_closed(&self) -> bool {
        let mut closed = lock(&self.closed);
        let was_closed = *closed;
        *closed = true;
        self.wake.notify_all();
        was_closed
    }

    /// Register a new connection. Returns its id and a read half, or `None`
    /// when the connection was refused.
    fn attach(&self, stream: Stream) -> std::io::Result<Option<(u64, Stream)>> {
        stream.set_write_timeout(Some(self.send_timeout.max(MIN_WRITE_TIMEOUT)))?;
        let reader = stream.try_clone()?;
        let mut peers = lock(&self.peers);
        if self.is_closed() || (self.pattern == Pattern::Pair && !peers.is_empty()) {
            stream.shutdown();
            return Ok(None);
        }
        let id = self.next_peer.fetch_add(1, Ordering::Relaxed);
        peers.insert(id, stream);
        Ok(Some((id, reader)))
    }

    fn detach(&self, id: u64) {
        if let Some(stream) = lock(&self.peers).remove(&id) {
            stream.shutdown();
        }
    }

    fn shutdown_peers(&self) {
        let mut peers = lock(&self.peers);
        for stream in peers.values() {
            stream.shutdown();
        }
        peers.clear();
    }
}

/// Pump frames from one connection into the inbound queue until it drops.
fn read_frames(shared: &Shared, id: u64, mut reader: Stream, inbound: &SyncSender<Inbound>) {
    loop {
        match read_frame(&mut reader) {
            Ok(body) => {
                if !enqueue(shared, inbound, (id, body)) {
                    break;
                }
            }
            Err(e) => {
                if !shared.is_closed() && e.kind() != ErrorKind::UnexpectedEof {
                    debug!("[{}] connection {id} read failed: {e}", shared.address);
                }
                break;
            }
        }
    }
    shared.detach(id);
}

/// Wait for room in the inbound queue. Returns false once the socket is
/// closed or nobody is receiving any more.
fn enqueue(shared: &Shared, inbound: &SyncSender<Inbound>, mut frame: Inbound) -> bool {
    loop {
        match inbound.try_send(frame) {
            Ok(()) => return true,
            Err(TrySendError::Disconnected(_)) => return false,
            Err(TrySendError::Full(rejected)) => {
                if shared.wait_closed(FULL_POLL) {
                    return false;
                }
                frame = rejected;
            }
        }
    }
}

fn accept_loop(shared: Arc<Shared>, acceptor: Acceptor, inbound: SyncSender<Inbound>) {
    let mut readers: Vec<JoinHandle<()>> = Vec::new();
    while !shared.is_closed() {
        match acceptor.accept_timeout(ACCEPT_POLL) {
            Ok(Some(stream)) => match shared.attach(stream) {
                Ok(Some((id, reader))) => {
                    debug!("[{}] accepted connection {id}", shared.address);
                    let shared = Arc::clone(&shared);
                    let inbound = inbound.clone();
                    readers.push(thread::spawn(move || {
                        read_frames(&shared, id, reader, &inbound)
                    }));
                }
                Ok(None) => debug!(
                    "[{}] refused connection: {} socket already has a peer",
                    shared.address, shared.pattern
                ),
                Err(e) => warn!("[{}] failed to set up connection: {e}", shared.address),
            },
            Ok(None) => {}
            Err(e) => {
                warn!("[{}] accept failed: {e}", shared.address);
                thread::sleep(ACCEPT_POLL);
            }
        }
        readers.retain(|reader| !reader.is_finished());
    }
    // Unbind before waiting on the readers so new dials fail right away.
    drop(acceptor);
    for reader in readers {
        let _ = reader.join();
    }
}

fn dial_loop(
    shared: Arc<Shared>,
    mut initial: Option<Stream>,
    reconnect_interval: Duration,
    inbound: SyncSender<Inbound>,
) {
    let mut failures: u32 = 0;
    while !shared.is_closed() {
        let attempt = match initial.take() {
            Some(stream) => Ok(stream),
            None => stream::connect(&shared.address, reconnect_interval),
        };
        match attempt {
            Ok(stream) => match shared.attach(stream) {
                Ok(Some((id, reader))) => {
                    debug!("[{}] connected", shared.address);
                    failures = 0;
                    read_frames(&shared, id, reader, &inbound);
                    if !shared.is_closed() {
                        debug!("[{}] connection lost", shared.address);
                    }
                }
                Ok(None) => break,
                Err(e) => warn!("[{}] failed to set up connection: {e}", shared.address),
            },
            Err(e) => {
                if failures == 0 {
                    debug!(
                        "[{}] dial failed: {e}; retrying every {reconnect_interval:?}",
                        shared.address
                    );
                }
                failures = failures.saturating_add(1);
            }
        }
        if shared.wait_closed(reconnect_interval) {
            break;
        }
    }
}

/// A message socket bound to or dialing one address.
///
/// Background threads accept or (re)establish connections and queue every
/// inbound frame, so `send` and `recv` never wait on connection setup.
pub struct Socket {
    pattern: Pattern,
    recv_timeout: Option<Duration>,
    shared: Arc<Shared>,
    inbound: Mutex<Receiver<Inbound>>,
    /// Rep: the peer owed a reply. Req: the peer a reply is expected from.
    pending: Mutex<Option<u64>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Socket {
    pub fn listen(
        pattern: Pattern,
        address: &Address,
        options: SocketOptions,
    ) -> Result<Self, TransportError> {
        if pattern == Pattern::Req {
            return Err(TransportError::Unsupported {
                operation: "listen",
                pattern,
            });
        }
        let bind_error = |source| TransportError::Bind {
            address: address.to_string(),
            source,
        };
        let (acceptor, bound) = Acceptor::bind(address).map_err(bind_error)?;
        let shared = Arc::new(Shared::new(pattern, bound, options.send_timeout));
        let (tx, rx) = mpsc::sync_channel(INBOUND_CAPACITY);
        let worker = {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name(format!("{pattern}-accept"))
                .spawn(move || accept_loop(shared, acceptor, tx))
                .map_err(bind_error)?
        };
        debug!("[{}] listening ({pattern})", shared.address);
        Ok(Self::with_worker(pattern, options, shared, rx, worker))
    }

    pub fn dial(
        pattern: Pattern,
        address: &Address,
        options: SocketOptions,
    ) -> Result<Self, TransportError> {
        if pattern == Pattern::Rep {
            return Err(TransportError::Unsupported {
                operation: "dial",
                pattern,
            });
        }
        let connect_error = |source| TransportError::Connect {
            address: address.to_string(),
            source,
        };
        let initial = if options.block_on_dial {
            Some(stream::connect(address, options.reconnect_interval).map_err(connect_error)?)
        } else {
            None
        };
        let shared = Arc::new(Shared::new(pattern, address.clone(), options.send_timeout));
        let (tx, rx) = mpsc::sync_channel(INBOUND_CAPACITY);
        let reconnect_interval = options.reconnect_interval;
        let worker = {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name(format!("{pattern}-dial"))
                .spawn(move || dial_loop(shared, initial, reconnect_interval, tx))
                .map_err(connect_error)?
        };
        // With a blocking dial the connection must be usable once we return.
        if options.block_on_dial {
            let deadline = Instant::now() + options.reconnect_interval.max(CLOSED_POLL);
            while lock(&shared.peers).is_empty() && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(1));
            }
        }
        Ok(Self::with_worker(pattern, options, shared, rx, worker))
    }

    fn with_worker(
        pattern: Pattern,
        options: SocketOptions,
        shared: Arc<Shared>,
        inbound: Receiver<Inbound>,
        worker: JoinHandle<()>,
    ) -> Self {
        Self {
            pattern,
            recv_timeout: options.recv_timeout,
            shared,
            inbound: Mutex::new(inbound),
            pending: Mutex::new(None),
            worker: Mutex::new(Some(worker)),
        }
    }

    pub fn pattern(&self) -> Pattern {
        self.pattern
    }

    /// The address this socket is bound to or dialing. For `tcp://host:0`
    /// listeners this carries the port actually assigned.
    pub fn bound_address(&self) -> &Address {
        &self.shared.address
    }

    pub fn is_connected(&self) -> bool {
        !lock(&self.shared.peers).is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Receive one message, waiting at most the configured receive timeout.
    pub fn recv(&self) -> Result<Vec<u8>, TransportError> {
        let mut pending = lock(&self.pending);
        match self.pattern {
            Pattern::Rep if pending.is_some() => return Err(TransportError::ReplyPending),
            Pattern::Req if pending.is_none() => return Err(TransportError::NoPendingRequest),
            _ => {}
        }
        let (peer, body) = self.next_inbound()?;
        match self.pattern {
            Pattern::Rep => *pending = Some(peer),
            Pattern::Req => *pending = None,
            Pattern::Pair => {}
        }
        Ok(body)
    }

    fn next_inbound(&self) -> Result<Inbound, TransportError> {
        let inbound = lock(&self.inbound);
        if self.shared.is_closed() {
            return Err(TransportError::Closed);
        }
        let deadline = self.recv_timeout.map(|timeout| Instant::now() + timeout);
        loop {
            let wait = match deadline {
                Some(deadline) => deadline
                    .saturating_duration_since(Instant::now())
                    .min(CLOSED_POLL),
                None => CLOSED_POLL,
            };
            match inbound.recv_timeout(wait) {
                Ok(message) => return Ok(message),
                Err(RecvTimeoutError::Disconnected) => return Err(TransportError::Closed),
                Err(RecvTimeoutError::Timeout) => {
                    if self.shared.is_closed() {
                        return Err(TransportError::Closed);
                    }
                    if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                        return Err(TransportError::Timeout);
                    }
                }
            }
        }
    }

    /// Send one message. Never waits for a connection: without a peer the
    /// message is refused with `NotConnected`.
    pub fn send(&self, body: &[u8]) -> Result<(), TransportError> {
        if self.shared.is_closed() {
            return Err(TransportError::Closed);
        }
        let mut pending = lock(&self.pending);
        let target = match self.pattern {
            Pattern::Rep => Some(pending.take().ok_or(TransportError::NoPendingRequest)?),
            Pattern::Req => {
                // A new request abandons any reply still in flight.
                *pending = None;
                let inbound = lock(&self.inbound);
                while inbound.try_recv().is_ok() {}
                None
            }
            Pattern::Pair => None,
        };

        let mut peers = lock(&self.shared.peers);
        let peer = match target {
            Some(id) => peers.get_mut(&id).map(|stream| (id, stream)),
            None => peers.iter_mut().next().map(|(id, stream)| (*id, stream)),
        };
        let Some((id, stream)) = peer else {
            return Err(TransportError::NotConnected(self.shared.address.to_string()));
        };
        if let Err(source) = write_frame(stream, body) {
            stream.shutdown();
            peers.remove(&id);
            return Err(TransportError::Send {
                address: self.shared.address.to_string(),
                source,
            });
        }
        if self.pattern == Pattern::Req {
            *pending = Some(id);
        }
        Ok(())
    }

    /// Shut down every connection and stop the background worker. Safe to
    /// call more than once.
    pub fn close(&self) {
        if !self.shared.mark_closed() {
            debug!(
                "[{}] closing {} socket",
                self.shared.address, self.pattern
            );
        }
        self.shared.shutdown_peers();
        let worker = lock(&self.worker).take();
        if let Some(worker) = worker
            && worker.join().is_err()
        {
            warn!("[{}] socket worker panicked", self.shared.address);
        }
    }
}

impl Shared {
    fn new(pattern: Pattern, address: Address, send_timeout: Duration) -> Self {
        Self {
            pattern,
            address,
            send_timeout,
            closed: Mutex::new(false),
            wake: Condvar::new(),
            peers: Mutex::new(BTreeMap::new()),
            next_peer: AtomicU64::new(1),
        }
    }
}

impl Drop for Socket {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts(recv_ms: u64) -> SocketOptions {
        SocketOptions {
            recv_timeout: Some(Duration::from_millis(recv_ms)),
            send_timeout: Duration::from_millis(200),
            reconnect_interval: Duration::from_millis(20),
            block_on_dial: false,
        }
    }

    fn blocking(recv_ms: u64) -> SocketOptions {
        SocketOptions {
            block_on_dial: true,
            ..opts(recv_ms)
        }
    }

    fn wait_until(cond: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    fn inproc(name: &str) -> Address {
        Address::Inproc(format!("socket-test-{name}"))
    }

    #[test]
    fn test_req_rep_round_trip() {
        let addr = inproc("req-rep");
        let rep = Socket::listen(Pattern::Rep, &addr, opts(2000)).unwrap();
        let req = Socket::dial(Pattern::Req, &addr, blocking(2000)).unwrap();

        req.send(b"ping").unwrap();
        assert_eq!(rep.recv().unwrap(), b"ping");
        assert!(matches!(rep.recv(), Err(TransportError::ReplyPending)));
        rep.send(b"pong").unwrap();
        assert_eq!(req.recv().unwrap(), b"pong");
        assert!(matches!(rep.send(b"extra"), Err(TransportError::NoPendingRequest)));
        assert!(matches!(req.recv(), Err(TransportError::NoPendingRequest)));
    }

    #[test]
    fn test_rep_serves_several_clients() {
        let addr = inproc("rep-many");
        let rep = Socket::listen(Pattern::Rep, &addr, opts(2000)).unwrap();
        let a = Socket::dial(Pattern::Req, &addr, blocking(2000)).unwrap();
        let b = Socket::dial(Pattern::Req, &addr, blocking(2000)).unwrap();

        a.send(b"from a").unwrap();
        let request = rep.recv().unwrap();
        rep.send(&[b"re: ", request.as_slice()].concat()).unwrap();
        b.send(b"from b").unwrap();
        let request = rep.recv().unwrap();
        rep.send(&[b"re: ", request.as_slice()].concat()).unwrap();

        assert_eq!(a.recv().unwrap(), b"re: from a");
        assert_eq!(b.recv().unwrap(), b"re: from b");
    }

    #[test]
    fn test_recv_times_out() {
        let rep = Socket::listen(Pattern::Pair, &inproc("timeout"), opts(30)).unwrap();
        let started = Instant::now();
        assert!(matches!(rep.recv(), Err(TransportError::Timeout)));
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_pair_send_without_peer_is_not_connected() {
        let pair = Socket::listen(Pattern::Pair, &inproc("lonely"), opts(10)).unwrap();
        assert!(!pair.is_connected());
        assert!(matches!(
            pair.send(b"x"),
            Err(TransportError::NotConnected(_))
        ));
    }

    #[test]
    fn test_pair_listener_keeps_first_peer() {
        let addr = inproc("pair-exclusive");
        let listener = Socket::listen(Pattern::Pair, &addr, opts(2000)).unwrap();
        let first = Socket::dial(Pattern::Pair, &addr, blocking(2000)).unwrap();
        assert!(wait_until(|| listener.is_connected()));
        let second = Socket::dial(Pattern::Pair, &addr, blocking(2000)).unwrap();

        first.send(b"one").unwrap();
        assert_eq!(listener.recv().unwrap(), b"one");
        // The refused connection is shut down; anything sent on it is lost.
        let _ = second.send(b"two");
        listener.send(b"back").unwrap();
        assert_eq!(first.recv().unwrap(), b"back");
    }

    #[test]
    fn test_dialer_connects_once_listener_appears() {
        let dir = tempfile::tempdir().unwrap();
        let addr = Address::Ipc(dir.path().join("late.ipc"));
        let dialer = Socket::dial(Pattern::Pair, &addr, opts(10)).unwrap();
        assert!(!dialer.is_connected());
        assert!(matches!(
            dialer.send(b"early"),
            Err(TransportError::NotConnected(_))
        ));

        let listener = Socket::listen(Pattern::Pair, &addr, opts(2000)).unwrap();
        assert!(wait_until(|| dialer.is_connected()));
        dialer.send(b"late").unwrap();
        assert_eq!(listener.recv().unwrap(), b"late");
    }

    #[test]
    fn test_dialer_reconnects_after_listener_restart() {
        let dir = tempfile::tempdir().unwrap();
        let addr = Address::Ipc(dir.path().join("restart.ipc"));
        let dialer = Socket::dial(Pattern::Pair, &addr, opts(10)).unwrap();

        let listener = Socket::listen(Pattern::Pair, &addr, opts(2000)).unwrap();
        assert!(wait_until(|| dialer.is_connected()));
        listener.close();
        assert!(wait_until(|| !dialer.is_connected()));

        let listener = Socket::listen(Pattern::Pair, &addr, opts(2000)).unwrap();
        assert!(wait_until(|| dialer.is_connected()));
        dialer.send(b"again").unwrap();
        assert_eq!(listener.recv().unwrap(), b"again");
    }

    #[test]
    fn test_unread_frames_push_back_on_sender() {
        let dir = tempfile::tempdir().unwrap();
        let addr = Address::Ipc(dir.path().join("held.ipc"));
        let listener = Socket::listen(Pattern::Pair, &addr, opts(2000)).unwrap();
        let dialer = Socket::dial(Pattern::Pair, &addr, blocking(2000)).unwrap();

        let payload = vec![7u8; 64 * 1024];
        let mut sent = 0;
        let failure = loop {
            match dialer.send(&payload) {
                Ok(()) => sent += 1,
                Err(e) => break e,
            }
            assert!(sent < 1000, "sends never blocked on an idle receiver");
        };
        assert!(matches!(failure, TransportError::Send { .. }), "{failure}");
        assert!(sent >= INBOUND_CAPACITY, "only {sent} frames went through");

        // Everything that was accepted is still delivered in order.
        for _ in 0..INBOUND_CAPACITY {
            assert_eq!(listener.recv().unwrap(), payload);
        }
        // A reader waiting for room does not hold up close.
        listener.close();
        assert!(listener.is_closed());
    }

    #[test]
    fn test_close_is_idempotent_and_unbinds() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("closing.ipc");
        let addr = Address::Ipc(path.clone());
        let rep = Socket::listen(Pattern::Rep, &addr, opts(50)).unwrap();
        assert!(path.exists());

        rep.close();
        rep.close();
        assert!(rep.is_closed());
        assert!(!path.exists());
        assert!(matches!(rep.recv(), Err(TransportError::Closed)));
        assert!(matches!(
            Socket::dial(Pattern::Req, &addr, blocking(50)),
            Err(TransportError::Connect { .. })
        ));
    }

    #[test]
    fn test_tcp_listener_on_ephemeral_port() {
        let listener = Socket::listen(
            Pattern::Pair,
            &"tcp://127.0.0.1:0".parse().unwrap(),
            opts(2000),
        )
        .unwrap();
        let bound = listener.bound_address().clone();
        let dialer = Socket::dial(Pattern::Pair, &bound, blocking(2000)).unwrap();
        dialer.send(b"over tcp").unwrap();
        assert_eq!(listener.recv().unwrap(), b"over tcp");
    }

    #[test]
    fn test_unsupported_directions() {
        assert!(matches!(
            Socket::listen(Pattern::Req, &inproc("nope"), opts(10)),
            Err(TransportError::Unsupported { operation: "listen", .. })
        ));
        assert!(matches!(
            Socket::dial(Pattern::Rep, &inproc("nope"), opts(10)),
            Err(TransportError::Unsupported { operation: "dial", .. })
        ));
    }
}
