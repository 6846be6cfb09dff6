//! UDP peer discovery.
//!
//! Two background threads: a beacon ticker that announces
//! `{node_id, ip, tcp_port}` to the subnet broadcast address and to
//! loopback, and a listener that turns foreign beacons into
//! [`PeerObserved`] events on a channel. The listener binds with
//! address/port reuse enabled so several instances can share one machine.
//!
//! A failed listener bind disables discovery but is not fatal: the TCP mesh
//! still forms from seeded peers.

use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::Sender;
use socket2::{Domain, Protocol, Socket, Type};

use crate::core::NodeId;
use crate::net::proto::{Beacon, decode_beacon, encode_beacon};

const RECV_POLL: Duration = Duration::from_millis(250);
const SHUTDOWN_POLL: Duration = Duration::from_millis(100);

/// A peer seen on the discovery port.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PeerObserved {
    pub id: NodeId,
    pub ip: IpAddr,
    pub tcp_port: u16,
}

pub struct Discovery {
    shutdown: Arc<AtomicBool>,
    listen_port: Option<u16>,
    listener: Option<JoinHandle<()>>,
    beacon: Option<JoinHandle<()>>,
}

impl Discovery {
    /// Spawn the listener and beacon threads.
    ///
    /// `observed_tx` receives one event per foreign beacon; deduplication is
    /// the consumer's concern (the callback contract is idempotent).
    pub fn start(
        node_id: NodeId,
        local_ip: IpAddr,
        tcp_port: u16,
        udp_port: u16,
        interval: Duration,
        observed_tx: Sender<PeerObserved>,
    ) -> Self {
        let shutdown = Arc::new(AtomicBool::new(false));

        let (listen_port, listener) = match bind_reusable(udp_port) {
            Ok(socket) => {
                let port = socket.local_addr().map(|a| a.port()).unwrap_or(udp_port);
                let own = node_id.clone();
                let flag = Arc::clone(&shutdown);
                let handle = thread::Builder::new()
                    .name("disc-listen".into())
                    .spawn(move || run_listener(socket, own, observed_tx, flag))
                    .expect("spawn discovery listener");
                tracing::info!("discovery listening on udp port {port}");
                (Some(port), Some(handle))
            }
            Err(err) => {
                tracing::warn!("discovery disabled, udp bind failed on {udp_port}: {err}");
                (None, None)
            }
        };

        let beacon = Beacon {
            node_id,
            ip: local_ip,
            tcp_port,
        };
        let target_port = listen_port.unwrap_or(udp_port);
        let flag = Arc::clone(&shutdown);
        let beacon_handle = thread::Builder::new()
            .name("disc-beacon".into())
            .spawn(move || run_beacon(beacon, target_port, interval, flag))
            .expect("spawn discovery beacon");

        Self {
            shutdown,
            listen_port,
            listener,
            beacon: Some(beacon_handle),
        }
    }

    /// Port the listener actually bound, `None` when discovery is disabled.
    pub fn listen_port(&self) -> Option<u16> {
        self.listen_port
    }

    pub fn shutdown(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.listener.take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.beacon.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Discovery {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn bind_reusable(port: u16) -> io::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    #[cfg(all(unix, not(any(target_os = "solaris", target_os = "illumos"))))]
    {
        // Lets several instances share the well-known port on one machine.
        let _ = socket.set_reuse_port(true);
    }
    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    socket.bind(&addr.into())?;
    let socket: UdpSocket = socket.into();
    socket.set_read_timeout(Some(RECV_POLL))?;
    Ok(socket)
}

fn run_listener(
    socket: UdpSocket,
    own_id: NodeId,
    observed_tx: Sender<PeerObserved>,
    shutdown: Arc<AtomicBool>,
) {
    let mut buf = [0u8; 2048];
    loop {
        if shutdown.load(Ordering::Relaxed) {
            break;
        }
        match socket.recv_from(&mut buf) {
            Ok((n, addr)) => {
                let beacon = match decode_beacon(&buf[..n]) {
                    Ok(beacon) => beacon,
                    Err(err) => {
                        tracing::trace!("ignoring undecodable beacon from {addr}: {err}");
                        continue;
                    }
                };
                if beacon.node_id == own_id {
                    continue;
                }
                tracing::debug!("peer {} seen at {}", beacon.node_id, addr.ip());
                // Trust the datagram's source address over the claimed one.
                let observed = PeerObserved {
                    id: beacon.node_id,
                    ip: addr.ip(),
                    tcp_port: beacon.tcp_port,
                };
                if observed_tx.send(observed).is_err() {
                    break;
                }
            }
            Err(err)
                if err.kind() == io::ErrorKind::WouldBlock
                    || err.kind() == io::ErrorKind::TimedOut => {}
            Err(err) => {
                if !shutdown.load(Ordering::Relaxed) {
                    tracing::warn!("discovery recv error: {err}");
                }
            }
        }
    }
}

fn run_beacon(beacon: Beacon, udp_port: u16, interval: Duration, shutdown: Arc<AtomicBool>) {
    let payload = match encode_beacon(&beacon) {
        Ok(payload) => payload,
        Err(err) => {
            tracing::error!("beacon encode failed: {err}");
            return;
        }
    };
    let socket = match UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)) {
        Ok(socket) => socket,
        Err(err) => {
            tracing::warn!("beacon socket unavailable: {err}");
            return;
        }
    };
    if let Err(err) = socket.set_broadcast(true) {
        tracing::warn!("beacon broadcast flag failed: {err}");
    }

    while !shutdown.load(Ordering::Relaxed) {
        // Subnet broadcast plus loopback so same-host instances hear us.
        for target in [
            SocketAddr::from((Ipv4Addr::BROADCAST, udp_port)),
            SocketAddr::from((Ipv4Addr::LOCALHOST, udp_port)),
        ] {
            if let Err(err) = socket.send_to(&payload, target) {
                tracing::debug!("beacon to {target} failed: {err}");
            }
        }

        let mut slept = Duration::ZERO;
        while slept < interval && !shutdown.load(Ordering::Relaxed) {
            let step = SHUTDOWN_POLL.min(interval - slept);
            thread::sleep(step);
            slept += step;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn listener_reports_foreign_beacons_and_skips_own() {
        let (tx, rx) = crossbeam::channel::unbounded();
        let mut discovery = Discovery::start(
            NodeId::new("aaaaaaaa"),
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            6001,
            0, // ephemeral port keeps the test isolated
            Duration::from_secs(60),
            tx,
        );
        let port = discovery.listen_port().expect("listener bound");

        let sender = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let own = encode_beacon(&Beacon {
            node_id: NodeId::new("aaaaaaaa"),
            ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            tcp_port: 6001,
        })
        .unwrap();
        let foreign = encode_beacon(&Beacon {
            node_id: NodeId::new("bbbbbbbb"),
            ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            tcp_port: 6002,
        })
        .unwrap();

        sender.send_to(&own, (Ipv4Addr::LOCALHOST, port)).unwrap();
        sender
            .send_to(b"not a beacon", (Ipv4Addr::LOCALHOST, port))
            .unwrap();
        sender
            .send_to(&foreign, (Ipv4Addr::LOCALHOST, port))
            .unwrap();

        let observed = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(observed.id, NodeId::new("bbbbbbbb"));
        assert_eq!(observed.tcp_port, 6002);

        discovery.shutdown();
        // Nothing else surfaced: own beacon and garbage were dropped.
        assert!(rx.try_recv().is_err());
    }
}
