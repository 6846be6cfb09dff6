//! Shared fixtures for integration tests: fast timers, ephemeral ports,
//! seeded peers (no UDP cross-talk between tests).
#![allow(dead_code)]

use std::fs;
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::time::{Duration, Instant};

use rand::SeedableRng;
use rand::rngs::StdRng;
use tempfile::TempDir;

use chorus::playback::SilentSink;
use chorus::view::NullView;
use chorus::{Config, Node, NodeHandle, derive_node_id};

pub const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

pub fn fast_config(media_dir: &TempDir) -> Config {
    Config {
        // Ephemeral everything: tests never share ports.
        udp_port: 0,
        tcp_port: 0,
        tcp_port_range: 1,
        heartbeat_interval_secs: 0.05,
        host_timeout_secs: 0.4,
        election_timeout_secs: 0.2,
        startup_grace_secs: 0.25,
        discovery_interval_secs: 60.0,
        media_dirs: vec![media_dir.path().to_path_buf()],
        ..Config::default()
    }
}

pub fn start_node(name: &str, config: Config) -> NodeHandle {
    let node_id = derive_node_id(name, "test-password");
    Node::start(
        config,
        node_id,
        name,
        Box::new(SilentSink::default()),
        Box::new(StdRng::seed_from_u64(42)),
        Box::new(NullView),
    )
    .expect("node starts")
}

pub fn media_file(dir: &TempDir, name: &str) -> PathBuf {
    let path = dir.path().join(format!("{name}.mp3"));
    fs::write(&path, b"not really audio").expect("write media file");
    path
}

pub fn link(a: &NodeHandle, b: &NodeHandle) {
    a.observe_peer(b.local_id().clone(), LOCALHOST, b.tcp_port());
}

/// Poll until `predicate` holds, or fail the test after `deadline`.
pub fn wait_for(what: &str, deadline: Duration, predicate: impl Fn() -> bool) {
    let end = Instant::now() + deadline;
    while Instant::now() < end {
        if predicate() {
            return;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    panic!("timed out waiting for {what}");
}

/// True when `predicate` stays true for three consecutive samples.
pub fn holds_steadily(predicate: impl Fn() -> bool) -> bool {
    for _ in 0..3 {
        if !predicate() {
            return false;
        }
        std::thread::sleep(Duration::from_millis(60));
    }
    true
}
