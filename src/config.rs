//! Config loading.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Runtime knobs. Every field has a default matching the protocol's
/// well-known values; a TOML file and `CHORUS_*` environment variables can
/// override them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Well-known discovery port.
    pub udp_port: u16,
    /// First TCP port to try; binding walks upward from here.
    pub tcp_port: u16,
    /// How many successive ports to try past `tcp_port`.
    pub tcp_port_range: u16,
    /// Seconds between Host heartbeats and playback sync frames.
    pub heartbeat_interval_secs: f64,
    /// Seconds without a heartbeat before the Host is presumed dead.
    pub host_timeout_secs: f64,
    /// Seconds a campaigner waits for an ANSWER.
    pub election_timeout_secs: f64,
    /// Uptime advantage (seconds) at which a higher-ranked node yields.
    pub uptime_threshold_secs: u64,
    /// Seconds a causally premature message may sit in the pending buffer.
    pub pending_ttl_secs: f64,
    /// Seconds between presence beacons.
    pub discovery_interval_secs: f64,
    /// Seconds after startup before the first spontaneous election.
    pub startup_grace_secs: f64,
    /// Largest accepted TCP frame payload.
    pub max_frame_bytes: usize,
    /// Soft cap on buffered premature messages.
    pub pending_cap: usize,
    /// Bound on the skip-previous history stack.
    pub history_cap: usize,
    /// Directories searched when re-resolving a track path by basename.
    pub media_dirs: Vec<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            udp_port: 5000,
            tcp_port: 5001,
            tcp_port_range: 100,
            heartbeat_interval_secs: 1.0,
            host_timeout_secs: 3.1,
            election_timeout_secs: 3.0,
            uptime_threshold_secs: 60,
            pending_ttl_secs: 30.0,
            discovery_interval_secs: 2.0,
            startup_grace_secs: 3.0,
            max_frame_bytes: 1024 * 1024,
            pending_cap: 256,
            history_cap: 64,
            media_dirs: vec![PathBuf::from("./media")],
        }
    }
}

impl Config {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs_f64(self.heartbeat_interval_secs)
    }

    pub fn host_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.host_timeout_secs)
    }

    pub fn election_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.election_timeout_secs)
    }

    pub fn pending_ttl(&self) -> Duration {
        Duration::from_secs_f64(self.pending_ttl_secs)
    }

    pub fn discovery_interval(&self) -> Duration {
        Duration::from_secs_f64(self.discovery_interval_secs)
    }

    pub fn startup_grace(&self) -> Duration {
        Duration::from_secs_f64(self.startup_grace_secs)
    }

    /// Last TCP port tried during the bind scan.
    pub fn tcp_port_end(&self) -> u16 {
        self.tcp_port.saturating_add(self.tcp_port_range.saturating_sub(1))
    }
}

pub fn load(path: Option<&Path>) -> Result<Config> {
    let mut config = match path {
        Some(path) => read_file(path)?,
        None => Config::default(),
    };
    apply_env_overrides(&mut config);
    Ok(config)
}

fn read_file(path: &Path) -> Result<Config> {
    let contents = fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("failed to read {}: {e}", path.display())))?;
    toml::from_str(&contents)
        .map_err(|e| Error::Config(format!("failed to parse {}: {e}", path.display())))
}

/// `CHORUS_UDP_PORT`, `CHORUS_TCP_PORT` and `CHORUS_HOST_TIMEOUT_SECS`
/// override the file layer. Unparseable values are ignored with a warning.
pub fn apply_env_overrides(config: &mut Config) {
    override_parse(&mut config.udp_port, "CHORUS_UDP_PORT");
    override_parse(&mut config.tcp_port, "CHORUS_TCP_PORT");
    override_parse(&mut config.host_timeout_secs, "CHORUS_HOST_TIMEOUT_SECS");
}

fn override_parse<T: std::str::FromStr>(target: &mut T, key: &str) {
    if let Ok(raw) = env::var(key) {
        match raw.parse::<T>() {
            Ok(value) => *target = value,
            Err(_) => tracing::warn!("ignoring unparseable {key}={raw}"),
        }
    }
}
