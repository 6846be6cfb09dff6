//! Networking: framing, message codec, UDP discovery, TCP mesh.

pub mod discovery;
pub mod frame;
pub mod proto;
pub mod registry;

use std::net::{IpAddr, Ipv4Addr, UdpSocket};

/// Best-effort LAN address detection: the kernel picks the outbound
/// interface for a UDP "connect" (no packets are sent). Falls back to
/// loopback when the host has no route.
pub fn local_ip() -> IpAddr {
    let probe = || -> std::io::Result<IpAddr> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
        socket.connect(("8.8.8.8", 80))?;
        Ok(socket.local_addr()?.ip())
    };
    probe().unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}
