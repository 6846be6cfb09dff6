//! TCP mesh: connection registry, accept loop, per-peer reader threads.
//!
//! The registry maps `peer_id -> live connection`. Connections come from two
//! paths: an outbound connect (we already know the peer id from discovery)
//! and the inbound accept loop (the peer identifies itself with the HELLO
//! frame that must open every connection). Both paths converge on
//! [`Registry::register`]; when both sides dial simultaneously the newer
//! connection replaces the older and the older is closed.
//!
//! Reader threads translate socket life into [`MeshEvent`]s on a channel:
//! the node event loop is the only consumer. Writes are serialized per
//! connection with a write mutex; there is no global send lock.

use std::collections::HashMap;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::Sender;

use crate::core::NodeId;
use crate::error::{Error, Result};
use crate::net::frame::{FrameError, FrameReader, FrameWriter};
use crate::net::proto::{Envelope, Message, decode_envelope};

const ACCEPT_POLL: Duration = Duration::from_millis(25);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

pub type ConnId = u64;

/// What the mesh tells the node event loop.
#[derive(Debug)]
pub enum MeshEvent {
    /// A connection finished its handshake and is registered.
    Connected {
        id: NodeId,
        conn: ConnId,
        ip: IpAddr,
        tcp_port: u16,
        /// Name from the peer's HELLO; absent on the outbound path until
        /// the reply-HELLO arrives as a normal frame.
        display_name: Option<String>,
        /// The peer's HELLO was an opening (not a reply), so it expects one.
        needs_reply: bool,
    },
    /// A decoded frame from a registered connection.
    Frame { conn: ConnId, envelope: Envelope },
    /// The registered connection died (EOF, read error, or replacement
    /// closed it). Only emitted for the connection currently registered.
    Closed { id: NodeId, conn: ConnId },
}

/// One live TCP connection to a peer.
pub struct PeerLink {
    stream: TcpStream,
    writer: Mutex<FrameWriter<TcpStream>>,
}

impl PeerLink {
    fn new(stream: TcpStream, max_frame_bytes: usize) -> io::Result<Self> {
        stream.set_nodelay(true)?;
        let writer = FrameWriter::new(stream.try_clone()?, max_frame_bytes);
        Ok(Self {
            stream,
            writer: Mutex::new(writer),
        })
    }

    /// Single serialized write; failure leaves the connection to the reader
    /// thread's death path.
    fn send(&self, payload: &[u8]) -> std::result::Result<(), FrameError> {
        let mut writer = self.writer.lock().expect("peer writer lock poisoned");
        writer.write_frame(payload)?;
        Ok(())
    }

    fn close(&self) {
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}

struct RegisteredConn {
    conn: ConnId,
    link: Arc<PeerLink>,
}

/// Directed registry of live outbound and inbound connections.
pub struct Registry {
    inner: Mutex<HashMap<NodeId, RegisteredConn>>,
    next_conn: AtomicU64,
    max_frame_bytes: usize,
}

impl Registry {
    pub fn new(max_frame_bytes: usize) -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
            next_conn: AtomicU64::new(1),
            max_frame_bytes,
        }
    }

    pub fn max_frame_bytes(&self) -> usize {
        self.max_frame_bytes
    }

    /// Register `stream` as the connection for `peer`. An existing entry is
    /// replaced and its socket closed.
    pub fn register(&self, peer: &NodeId, stream: TcpStream) -> io::Result<(ConnId, Arc<PeerLink>)> {
        let link = Arc::new(PeerLink::new(stream, self.max_frame_bytes)?);
        let conn = self.next_conn.fetch_add(1, Ordering::Relaxed);
        let old = {
            let mut inner = self.inner.lock().expect("registry lock poisoned");
            inner.insert(
                peer.clone(),
                RegisteredConn {
                    conn,
                    link: Arc::clone(&link),
                },
            )
        };
        if let Some(old) = old {
            tracing::debug!("replacing connection to {peer}");
            old.link.close();
        }
        Ok((conn, link))
    }

    /// Drop `peer`'s entry only if `conn` is still the registered
    /// connection. Returns whether an entry was removed.
    pub fn remove_if(&self, peer: &NodeId, conn: ConnId) -> bool {
        let mut inner = self.inner.lock().expect("registry lock poisoned");
        let is_current = inner
            .get(peer)
            .is_some_and(|existing| existing.conn == conn);
        if !is_current {
            return false;
        }
        if let Some(removed) = inner.remove(peer) {
            removed.link.close();
        }
        true
    }

    pub fn contains(&self, peer: &NodeId) -> bool {
        self.inner
            .lock()
            .expect("registry lock poisoned")
            .contains_key(peer)
    }

    pub fn peer_ids(&self) -> Vec<NodeId> {
        self.inner
            .lock()
            .expect("registry lock poisoned")
            .keys()
            .cloned()
            .collect()
    }

    /// Send pre-encoded bytes to one peer. Returns false when the peer is
    /// unknown or the write failed (the connection is closed in that case
    /// and the reader thread reports the death).
    pub fn send_to(&self, peer: &NodeId, payload: &[u8]) -> bool {
        let link = {
            let inner = self.inner.lock().expect("registry lock poisoned");
            inner.get(peer).map(|entry| Arc::clone(&entry.link))
        };
        let Some(link) = link else {
            return false;
        };
        match link.send(payload) {
            Ok(()) => true,
            Err(err) => {
                tracing::debug!("send to {peer} failed: {err}");
                link.close();
                false
            }
        }
    }

    /// Best-effort fanout; individual failures are non-fatal.
    pub fn broadcast(&self, payload: &[u8]) {
        for peer in self.peer_ids() {
            self.send_to(&peer, payload);
        }
    }

    /// Close every connection. Reader threads notice and wind down.
    pub fn close_all(&self) {
        let inner = self.inner.lock().expect("registry lock poisoned");
        for entry in inner.values() {
            entry.link.close();
        }
    }
}

/// Bind the mesh listener, walking ports upward from `start`.
///
/// `start == 0` asks the OS for an ephemeral port (used by tests).
pub fn bind_mesh_listener(start: u16, range: u16) -> Result<(TcpListener, u16)> {
    let end = start.saturating_add(range.saturating_sub(1));
    for port in start..=end.max(start) {
        match TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)) {
            Ok(listener) => {
                let port = listener.local_addr()?.port();
                return Ok((listener, port));
            }
            Err(err) => {
                tracing::debug!("tcp bind on {port} failed: {err}");
            }
        }
    }
    Err(Error::NoFreePort { start, end })
}

/// Accept loop plus inbound handshakes.
pub struct MeshServer {
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl MeshServer {
    pub fn start(
        listener: TcpListener,
        own_id: NodeId,
        registry: Arc<Registry>,
        events_tx: Sender<MeshEvent>,
        shutdown: Arc<AtomicBool>,
    ) -> Result<Self> {
        listener.set_nonblocking(true)?;
        let flag = Arc::clone(&shutdown);
        let join = thread::Builder::new()
            .name("mesh-accept".into())
            .spawn(move || run_accept_loop(listener, own_id, registry, events_tx, flag))?;
        Ok(Self {
            shutdown,
            join: Some(join),
        })
    }

    pub fn shutdown(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

fn run_accept_loop(
    listener: TcpListener,
    own_id: NodeId,
    registry: Arc<Registry>,
    events_tx: Sender<MeshEvent>,
    shutdown: Arc<AtomicBool>,
) {
    loop {
        if shutdown.load(Ordering::Relaxed) {
            break;
        }
        match listener.accept() {
            Ok((stream, addr)) => {
                let own_id = own_id.clone();
                let registry = Arc::clone(&registry);
                let events_tx = events_tx.clone();
                let shutdown = Arc::clone(&shutdown);
                let spawned = thread::Builder::new().name("mesh-inbound".into()).spawn(
                    move || {
                        if let Err(err) =
                            run_inbound(stream, addr, own_id, registry, events_tx, shutdown)
                        {
                            tracing::debug!("inbound connection from {addr} ended: {err}");
                        }
                    },
                );
                if let Err(err) = spawned {
                    tracing::warn!("failed to spawn inbound handler: {err}");
                }
            }
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                thread::sleep(ACCEPT_POLL);
            }
            Err(err) => {
                tracing::warn!("mesh accept error: {err}");
                thread::sleep(ACCEPT_POLL);
            }
        }
    }
}

fn run_inbound(
    stream: TcpStream,
    addr: SocketAddr,
    own_id: NodeId,
    registry: Arc<Registry>,
    events_tx: Sender<MeshEvent>,
    shutdown: Arc<AtomicBool>,
) -> io::Result<()> {
    // Bound the handshake so silent dials cannot pin a thread.
    stream.set_read_timeout(Some(HANDSHAKE_TIMEOUT))?;
    let mut reader = FrameReader::new(stream.try_clone()?, registry.max_frame_bytes());

    let first = match reader.read_next() {
        Ok(Some(bytes)) => bytes,
        Ok(None) => return Ok(()),
        Err(err) => {
            tracing::debug!("handshake read from {addr} failed: {err}");
            return Ok(());
        }
    };
    let envelope = match decode_envelope(&first) {
        Ok(envelope) => envelope,
        Err(err) => {
            tracing::debug!("undecodable handshake from {addr}: {err}");
            return Ok(());
        }
    };
    let kind = envelope.message.kind();
    let Message::Hello {
        tcp_port,
        display_name,
        is_reply,
    } = envelope.message
    else {
        tracing::debug!("connection from {addr} opened with {kind:?}, expected HELLO");
        return Ok(());
    };
    if envelope.sender == own_id {
        tracing::debug!("dropping self-loop connection from {addr}");
        return Ok(());
    }

    stream.set_read_timeout(None)?;
    let peer = envelope.sender.clone();
    let (conn, _link) = registry.register(&peer, stream.try_clone()?)?;
    let delivered = events_tx
        .send(MeshEvent::Connected {
            id: peer.clone(),
            conn,
            ip: addr.ip(),
            tcp_port,
            display_name: Some(display_name),
            needs_reply: !is_reply,
        })
        .is_ok();
    if !delivered {
        return Ok(());
    }

    run_reader(reader, peer, conn, registry, events_tx, shutdown);
    Ok(())
}

/// Dial a discovered peer in a fresh thread: connect, introduce ourselves
/// with `hello` (a pre-encoded HELLO envelope), register, then read.
pub fn spawn_outbound(
    peer: NodeId,
    ip: IpAddr,
    tcp_port: u16,
    hello: Vec<u8>,
    registry: Arc<Registry>,
    events_tx: Sender<MeshEvent>,
    shutdown: Arc<AtomicBool>,
) {
    let spawned = thread::Builder::new().name("mesh-outbound".into()).spawn(move || {
        let addr = SocketAddr::new(ip, tcp_port);
        let stream = match TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT) {
            Ok(stream) => stream,
            Err(err) => {
                tracing::debug!("connect to {peer} at {addr} failed: {err}");
                return;
            }
        };
        if stream.set_nodelay(true).is_err() {
            return;
        }

        let max_frame = registry.max_frame_bytes();
        let writer_stream = match stream.try_clone() {
            Ok(clone) => clone,
            Err(err) => {
                tracing::debug!("clone for {peer} failed: {err}");
                return;
            }
        };
        let mut writer = FrameWriter::new(writer_stream, max_frame);
        if let Err(err) = writer.write_frame(&hello) {
            tracing::debug!("hello to {peer} failed: {err}");
            return;
        }

        let reader_stream = match stream.try_clone() {
            Ok(clone) => clone,
            Err(_) => return,
        };
        let (conn, _link) = match registry.register(&peer, stream) {
            Ok(registered) => registered,
            Err(err) => {
                tracing::debug!("register {peer} failed: {err}");
                return;
            }
        };
        let reader = FrameReader::new(reader_stream, max_frame);
        let delivered = events_tx
            .send(MeshEvent::Connected {
                id: peer.clone(),
                conn,
                ip,
                tcp_port,
                display_name: None,
                needs_reply: false,
            })
            .is_ok();
        if !delivered {
            return;
        }
        run_reader(reader, peer, conn, registry, events_tx, shutdown);
    });
    if let Err(err) = spawned {
        tracing::warn!("failed to spawn outbound handler: {err}");
    }
}

fn run_reader(
    mut reader: FrameReader<TcpStream>,
    peer: NodeId,
    conn: ConnId,
    registry: Arc<Registry>,
    events_tx: Sender<MeshEvent>,
    shutdown: Arc<AtomicBool>,
) {
    loop {
        match reader.read_next() {
            Ok(Some(bytes)) => match decode_envelope(&bytes) {
                Ok(envelope) => {
                    if events_tx.send(MeshEvent::Frame { conn, envelope }).is_err() {
                        break;
                    }
                }
                Err(err) => {
                    // Protocol violation: close, do not crash.
                    tracing::warn!("undecodable frame from {peer}: {err}");
                    break;
                }
            },
            Ok(None) => {
                tracing::debug!("peer {peer} closed the connection");
                break;
            }
            Err(err) => {
                if !shutdown.load(Ordering::Relaxed) {
                    tracing::debug!("read from {peer} failed: {err}");
                }
                break;
            }
        }
    }

    if registry.remove_if(&peer, conn) {
        let _ = events_tx.send(MeshEvent::Closed { id: peer, conn });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::VectorClock;
    use crate::net::frame::encode_frame;
    use crate::net::proto::encode_envelope;
    use std::time::Duration;

    const MAX_FRAME: usize = 1024 * 1024;

    fn hello_envelope(sender: &str, is_reply: bool) -> Envelope {
        Envelope {
            sender: NodeId::new(sender),
            sender_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            clock: VectorClock::new(),
            message: Message::Hello {
                tcp_port: 7000,
                display_name: format!("{sender}-name"),
                is_reply,
            },
        }
    }

    fn start_server() -> (
        MeshServer,
        u16,
        Arc<Registry>,
        crossbeam::channel::Receiver<MeshEvent>,
        Arc<AtomicBool>,
    ) {
        let (listener, port) = bind_mesh_listener(0, 1).unwrap();
        let registry = Arc::new(Registry::new(MAX_FRAME));
        let (tx, rx) = crossbeam::channel::unbounded();
        let shutdown = Arc::new(AtomicBool::new(false));
        let server = MeshServer::start(
            listener,
            NodeId::new("selfself"),
            Arc::clone(&registry),
            tx,
            Arc::clone(&shutdown),
        )
        .unwrap();
        (server, port, registry, rx, shutdown)
    }

    fn frame_of(envelope: &Envelope) -> Vec<u8> {
        encode_frame(&encode_envelope(envelope).unwrap(), MAX_FRAME).unwrap()
    }

    #[test]
    fn inbound_handshake_registers_and_reports() {
        let (mut server, port, registry, rx, _shutdown) = start_server();

        let mut client = TcpStream::connect((Ipv4Addr::LOCALHOST, port)).unwrap();
        use std::io::Write;
        client.write_all(&frame_of(&hello_envelope("peerpeer", false))).unwrap();

        match rx.recv_timeout(Duration::from_secs(5)).unwrap() {
            MeshEvent::Connected {
                id,
                display_name,
                needs_reply,
                tcp_port,
                ..
            } => {
                assert_eq!(id, NodeId::new("peerpeer"));
                assert_eq!(display_name.as_deref(), Some("peerpeer-name"));
                assert!(needs_reply);
                assert_eq!(tcp_port, 7000);
            }
            other => panic!("expected Connected, got {other:?}"),
        }
        assert!(registry.contains(&NodeId::new("peerpeer")));

        // A later frame on the same connection shows up as a Frame event.
        let heartbeat = Envelope {
            sender: NodeId::new("peerpeer"),
            sender_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            clock: VectorClock::new(),
            message: Message::Heartbeat,
        };
        client.write_all(&frame_of(&heartbeat)).unwrap();
        match rx.recv_timeout(Duration::from_secs(5)).unwrap() {
            MeshEvent::Frame { envelope, .. } => {
                assert_eq!(envelope.message, Message::Heartbeat);
            }
            other => panic!("expected Frame, got {other:?}"),
        }

        // Dropping the client surfaces as Closed and deregisters.
        drop(client);
        match rx.recv_timeout(Duration::from_secs(5)).unwrap() {
            MeshEvent::Closed { id, .. } => assert_eq!(id, NodeId::new("peerpeer")),
            other => panic!("expected Closed, got {other:?}"),
        }
        assert!(!registry.contains(&NodeId::new("peerpeer")));

        server.shutdown();
    }

    #[test]
    fn self_loop_hello_is_dropped() {
        let (mut server, port, registry, rx, _shutdown) = start_server();

        let mut client = TcpStream::connect((Ipv4Addr::LOCALHOST, port)).unwrap();
        use std::io::Write;
        client.write_all(&frame_of(&hello_envelope("selfself", false))).unwrap();

        assert!(rx.recv_timeout(Duration::from_millis(500)).is_err());
        assert!(!registry.contains(&NodeId::new("selfself")));
        server.shutdown();
    }

    #[test]
    fn non_hello_first_frame_closes_connection() {
        let (mut server, port, registry, rx, _shutdown) = start_server();

        let mut client = TcpStream::connect((Ipv4Addr::LOCALHOST, port)).unwrap();
        use std::io::Write;
        let bad_first = Envelope {
            sender: NodeId::new("peerpeer"),
            sender_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            clock: VectorClock::new(),
            message: Message::Heartbeat,
        };
        client.write_all(&frame_of(&bad_first)).unwrap();

        assert!(rx.recv_timeout(Duration::from_millis(500)).is_err());
        assert!(!registry.contains(&NodeId::new("peerpeer")));
        server.shutdown();
    }

    #[test]
    fn send_to_unknown_peer_is_false() {
        let registry = Registry::new(MAX_FRAME);
        assert!(!registry.send_to(&NodeId::new("nobody"), b"payload"));
    }
}
