//! The user-interface seam: a snapshot push model.
//!
//! The node loop captures a [`StateSnapshot`] once per tick and hands it to
//! whatever [`View`] the embedder supplied. Notices are one-line events
//! (missing files, role changes) the view may surface more loudly.

use serde::Serialize;

use crate::core::{NodeId, RepeatMode, Track};
use crate::state::store::StateStore;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Host,
    Listener,
}

#[derive(Clone, Debug, Serialize)]
pub struct StateSnapshot {
    pub role: Role,
    pub leader_id: Option<NodeId>,
    pub leader_name: Option<String>,
    pub playlist: Vec<Track>,
    pub current_track: Option<Track>,
    pub position_seconds: f64,
    pub duration_seconds: f64,
    pub is_playing: bool,
    pub shuffle: bool,
    pub repeat_mode: RepeatMode,
    pub alive_peers: usize,
}

impl StateSnapshot {
    pub fn capture(store: &StateStore) -> Self {
        let leader_id = store.leader().cloned();
        let leader_name = leader_id.as_ref().and_then(|id| {
            if id == store.local_id() {
                Some(store.display_name().to_string())
            } else {
                store.peer_name(id).map(str::to_string)
            }
        });
        let playback = store.playback();
        Self {
            role: if store.is_self_leader() {
                Role::Host
            } else {
                Role::Listener
            },
            leader_id,
            leader_name,
            playlist: store.playlist().to_vec(),
            current_track: playback.current_track.clone(),
            position_seconds: playback.position_seconds,
            duration_seconds: playback.duration_seconds,
            is_playing: playback.is_playing,
            shuffle: playback.shuffle,
            repeat_mode: playback.repeat_mode,
            alive_peers: store.alive_peer_ids().len(),
        }
    }
}

pub trait View: Send {
    fn render(&self, snapshot: &StateSnapshot);
    fn notify(&self, line: &str);
}

/// Discards everything; the default for tests and embedding.
pub struct NullView;

impl View for NullView {
    fn render(&self, _snapshot: &StateSnapshot) {}
    fn notify(&self, _line: &str) {}
}

/// Logs state transitions; what the headless binary runs with.
pub struct LogView {
    last: std::sync::Mutex<Option<String>>,
}

impl LogView {
    pub fn new() -> Self {
        Self {
            last: std::sync::Mutex::new(None),
        }
    }
}

impl Default for LogView {
    fn default() -> Self {
        Self::new()
    }
}

impl View for LogView {
    fn render(&self, snapshot: &StateSnapshot) {
        let line = match &snapshot.current_track {
            Some(track) => format!(
                "{:?} of {} | {} - {} | {} queued",
                snapshot.role,
                snapshot.leader_name.as_deref().unwrap_or("?"),
                track.title,
                if snapshot.is_playing { "playing" } else { "paused" },
                snapshot.playlist.len(),
            ),
            None => format!(
                "{:?} of {} | idle | {} queued",
                snapshot.role,
                snapshot.leader_name.as_deref().unwrap_or("?"),
                snapshot.playlist.len(),
            ),
        };
        let mut last = self.last.lock().expect("view lock poisoned");
        if last.as_deref() != Some(&line) {
            tracing::info!("{line}");
            *last = Some(line);
        }
    }

    fn notify(&self, line: &str) {
        tracing::info!("{line}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_role_and_leader_name() {
        let mut store = StateStore::new(NodeId::new("aaaa0000"), "alice", 64);
        let snap = StateSnapshot::capture(&store);
        assert_eq!(snap.role, Role::Listener);
        assert!(snap.leader_id.is_none());

        store.set_leader(Some(NodeId::new("aaaa0000")));
        let snap = StateSnapshot::capture(&store);
        assert_eq!(snap.role, Role::Host);
        assert_eq!(snap.leader_name.as_deref(), Some("alice"));
    }
}
