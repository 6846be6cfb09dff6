//! The replicated data: peer registry, playlist, playback state, vector
//! clock, leadership.
//!
//! One instance lives behind a single mutex; every critical section is a
//! plain collection mutation or a clock copy. No I/O happens under the
//! lock - sends and sink calls are the node loop's business.

use std::collections::BTreeMap;
use std::net::IpAddr;

use crate::core::{NodeId, PlaybackState, RepeatMode, Track, TrackId, VectorClock};
use crate::net::proto::FullState;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PeerStatus {
    Alive,
    Dead,
}

#[derive(Clone, Debug)]
pub struct PeerRecord {
    pub id: NodeId,
    pub ip: IpAddr,
    pub tcp_port: u16,
    pub display_name: Option<String>,
    pub status: PeerStatus,
}

/// Election rank: lexicographic `(username, node_id)`.
///
/// A peer whose name we have not learned yet ranks with an empty username.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Rank {
    pub username: String,
    pub node_id: NodeId,
}

pub struct StateStore {
    local_id: NodeId,
    display_name: String,
    peers: BTreeMap<NodeId, PeerRecord>,
    playlist: Vec<Track>,
    playback: PlaybackState,
    clock: VectorClock,
    leader: Option<NodeId>,
    uptime_secs: u64,
}

impl StateStore {
    pub fn new(local_id: NodeId, display_name: impl Into<String>, history_cap: usize) -> Self {
        let mut clock = VectorClock::new();
        clock.observe(&local_id);
        let mut playback = PlaybackState::default();
        playback.history = crate::core::PlayHistory::new(history_cap);
        Self {
            local_id,
            display_name: display_name.into(),
            peers: BTreeMap::new(),
            playlist: Vec::new(),
            playback,
            clock,
            leader: None,
            uptime_secs: 0,
        }
    }

    pub fn local_id(&self) -> &NodeId {
        &self.local_id
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    // -- leadership ---------------------------------------------------------

    pub fn leader(&self) -> Option<&NodeId> {
        self.leader.as_ref()
    }

    pub fn set_leader(&mut self, leader: Option<NodeId>) {
        if self.leader != leader {
            match &leader {
                Some(id) => tracing::info!("leader is now {id}"),
                None => tracing::info!("leader lost"),
            }
        }
        self.leader = leader;
    }

    pub fn is_self_leader(&self) -> bool {
        self.leader.as_ref() == Some(&self.local_id)
    }

    pub fn uptime_secs(&self) -> u64 {
        self.uptime_secs
    }

    pub fn set_uptime_secs(&mut self, uptime: u64) {
        self.uptime_secs = uptime;
    }

    // -- peers --------------------------------------------------------------

    pub fn upsert_peer(
        &mut self,
        id: &NodeId,
        ip: IpAddr,
        tcp_port: u16,
        display_name: Option<&str>,
    ) {
        let record = self
            .peers
            .entry(id.clone())
            .or_insert_with(|| PeerRecord {
                id: id.clone(),
                ip,
                tcp_port,
                display_name: None,
                status: PeerStatus::Alive,
            });
        record.ip = ip;
        record.tcp_port = tcp_port;
        record.status = PeerStatus::Alive;
        if let Some(name) = display_name {
            record.display_name = Some(name.to_string());
        }
        self.clock.observe(id);
    }

    pub fn mark_dead(&mut self, id: &NodeId) {
        if let Some(record) = self.peers.get_mut(id) {
            record.status = PeerStatus::Dead;
        }
    }

    pub fn peer(&self, id: &NodeId) -> Option<&PeerRecord> {
        self.peers.get(id)
    }

    pub fn peer_name(&self, id: &NodeId) -> Option<&str> {
        self.peers.get(id).and_then(|p| p.display_name.as_deref())
    }

    pub fn alive_peer_ids(&self) -> Vec<NodeId> {
        self.peers
            .values()
            .filter(|p| p.status == PeerStatus::Alive)
            .map(|p| p.id.clone())
            .collect()
    }

    pub fn local_rank(&self) -> Rank {
        Rank {
            username: self.display_name.clone(),
            node_id: self.local_id.clone(),
        }
    }

    pub fn rank_of(&self, id: &NodeId) -> Rank {
        Rank {
            username: self
                .peer_name(id)
                .map(str::to_string)
                .unwrap_or_default(),
            node_id: id.clone(),
        }
    }

    /// Alive peers ranked strictly above us - the ELECTION fanout set.
    pub fn higher_ranked_alive(&self) -> Vec<NodeId> {
        let local = self.local_rank();
        self.peers
            .values()
            .filter(|p| p.status == PeerStatus::Alive)
            .filter(|p| self.rank_of(&p.id) > local)
            .map(|p| p.id.clone())
            .collect()
    }

    // -- clock --------------------------------------------------------------

    pub fn clock_snapshot(&self) -> VectorClock {
        self.clock.clone()
    }

    /// Bump our own entry before sending a causal message; returns the
    /// stamped snapshot to put on the wire.
    pub fn increment_clock(&mut self) -> VectorClock {
        let local = self.local_id.clone();
        self.clock.increment(&local);
        self.clock.clone()
    }

    pub fn merge_clock(&mut self, incoming: &VectorClock) {
        self.clock.merge(incoming);
    }

    pub fn can_deliver(&self, sender: &NodeId, incoming: &VectorClock) -> bool {
        self.clock.ready_for(sender, incoming)
    }

    // -- playlist mutations -------------------------------------------------

    pub fn playlist(&self) -> &[Track] {
        &self.playlist
    }

    pub fn playback(&self) -> &PlaybackState {
        &self.playback
    }

    pub fn playback_mut(&mut self) -> &mut PlaybackState {
        &mut self.playback
    }

    /// Append unless the id is already queued or currently playing.
    pub fn queue_add(&mut self, track: Track) -> bool {
        let duplicate = self.playlist.iter().any(|t| t.id == track.id)
            || self.playback.current_track_id() == Some(track.id);
        if duplicate {
            return false;
        }
        tracing::debug!("queued {} ({})", track.title, track.id);
        self.playlist.push(track);
        true
    }

    pub fn queue_remove(&mut self, id: TrackId) -> Option<Track> {
        let index = self.playlist.iter().position(|t| t.id == id)?;
        Some(self.playlist.remove(index))
    }

    pub fn queue_clear(&mut self) {
        self.playlist.clear();
    }

    /// Pop the playlist head.
    pub fn queue_pop_front(&mut self) -> Option<Track> {
        if self.playlist.is_empty() {
            None
        } else {
            Some(self.playlist.remove(0))
        }
    }

    pub fn queue_push_front(&mut self, track: Track) {
        self.playlist.insert(0, track);
    }

    pub fn queue_remove_at(&mut self, index: usize) -> Option<Track> {
        if index < self.playlist.len() {
            Some(self.playlist.remove(index))
        } else {
            None
        }
    }

    // -- replica updates ----------------------------------------------------

    /// Replace playlist, current track and playback flags with a snapshot.
    /// The caller merges the envelope clock.
    pub fn apply_full_state(&mut self, state: &FullState) {
        self.playlist = state.playlist.clone();
        self.playback.current_track = state.current_track.clone();
        self.playback.position_seconds = state.position_seconds;
        self.playback.duration_seconds = state.duration_seconds;
        self.playback.is_playing = state.is_playing;
        self.playback.shuffle = state.shuffle;
        self.playback.repeat_mode = state.repeat_mode;
        // A track can never sit in both places.
        if let Some(current) = self.playback.current_track_id() {
            self.playlist.retain(|t| t.id != current);
        }
    }

    pub fn apply_now_playing(&mut self, track: Option<Track>) {
        match track {
            Some(track) => {
                self.playlist.retain(|t| t.id != track.id);
                self.playback.current_track = Some(track);
                self.playback.position_seconds = 0.0;
                self.playback.is_playing = true;
            }
            None => self.playback.clear_current(),
        }
    }

    pub fn apply_playback_sync(&mut self, position: f64, duration: f64, is_playing: bool) {
        self.playback.position_seconds = position;
        self.playback.duration_seconds = duration;
        self.playback.is_playing = is_playing;
    }

    pub fn apply_playback_status(&mut self, is_playing: bool, shuffle: bool, repeat: RepeatMode) {
        self.playback.is_playing = is_playing;
        self.playback.shuffle = shuffle;
        self.playback.repeat_mode = repeat;
    }

    /// Snapshot for FULL_STATE transfer.
    pub fn full_state(&self) -> FullState {
        FullState {
            playlist: self.playlist.clone(),
            current_track: self.playback.current_track.clone(),
            position_seconds: self.playback.position_seconds,
            duration_seconds: self.playback.duration_seconds,
            is_playing: self.playback.is_playing,
            shuffle: self.playback.shuffle,
            repeat_mode: self.playback.repeat_mode,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn store() -> StateStore {
        StateStore::new(NodeId::new("aaaa0000"), "alice", 64)
    }

    fn track(title: &str) -> Track {
        Track::from_path(&format!("/music/{title}.mp3"), NodeId::new("aaaa0000"))
    }

    #[test]
    fn queue_add_deduplicates_by_id() {
        let mut s = store();
        let t = track("one");
        assert!(s.queue_add(t.clone()));
        assert!(!s.queue_add(t.clone()));
        assert_eq!(s.playlist().len(), 1);
    }

    #[test]
    fn queue_add_rejects_current_track() {
        let mut s = store();
        let t = track("one");
        s.apply_now_playing(Some(t.clone()));
        assert!(!s.queue_add(t));
        assert!(s.playlist().is_empty());
    }

    #[test]
    fn add_then_remove_restores_playlist() {
        let mut s = store();
        let keep = track("keep");
        s.queue_add(keep.clone());
        let before: Vec<_> = s.playlist().to_vec();

        let t = track("transient");
        s.queue_add(t.clone());
        s.queue_remove(t.id);
        assert_eq!(s.playlist(), &before[..]);
        assert_eq!(s.playlist()[0].id, keep.id);
    }

    #[test]
    fn remove_unknown_id_is_noop() {
        let mut s = store();
        s.queue_add(track("one"));
        assert!(s.queue_remove(TrackId::random()).is_none());
        assert_eq!(s.playlist().len(), 1);
    }

    #[test]
    fn now_playing_pulls_track_out_of_playlist() {
        let mut s = store();
        let t = track("one");
        s.queue_add(t.clone());
        s.apply_now_playing(Some(t.clone()));
        assert!(s.playlist().is_empty());
        assert_eq!(s.playback().current_track_id(), Some(t.id));
        assert!(s.playback().is_playing);

        s.apply_now_playing(None);
        assert!(s.playback().current_track.is_none());
        assert!(!s.playback().is_playing);
    }

    #[test]
    fn full_state_roundtrip_matches_sender() {
        let mut sender = store();
        sender.queue_add(track("a"));
        sender.queue_add(track("b"));
        sender.apply_now_playing(Some(track("current")));
        sender.apply_playback_sync(12.0, 180.0, true);
        sender.increment_clock();

        let mut receiver = StateStore::new(NodeId::new("bbbb0000"), "bob", 64);
        receiver.apply_full_state(&sender.full_state());
        receiver.merge_clock(&sender.clock_snapshot());

        assert_eq!(receiver.playlist(), sender.playlist());
        assert_eq!(
            receiver.playback().current_track_id(),
            sender.playback().current_track_id()
        );
        assert!(receiver.playback().is_playing);
        // Clock absorbed the sender's entries.
        assert!(receiver.can_deliver(sender.local_id(), &{
            let mut next = sender.clock_snapshot();
            next.increment(sender.local_id());
            next
        }));
    }

    #[test]
    fn higher_ranked_orders_by_username_then_id() {
        let mut s = store(); // local: ("alice", aaaa0000)
        let ip = IpAddr::V4(Ipv4Addr::LOCALHOST);
        s.upsert_peer(&NodeId::new("cccc0000"), ip, 1, Some("zed"));
        s.upsert_peer(&NodeId::new("bbbb0000"), ip, 1, Some("albert"));
        s.upsert_peer(&NodeId::new("dddd0000"), ip, 1, Some("alice"));

        let higher = s.higher_ranked_alive();
        // "zed" > "alice"; ("alice", dddd0000) > ("alice", aaaa0000);
        // "albert" < "alice".
        assert!(higher.contains(&NodeId::new("cccc0000")));
        assert!(higher.contains(&NodeId::new("dddd0000")));
        assert!(!higher.contains(&NodeId::new("bbbb0000")));
    }

    #[test]
    fn unnamed_peer_ranks_below_named_local() {
        let mut s = store();
        let ip = IpAddr::V4(Ipv4Addr::LOCALHOST);
        s.upsert_peer(&NodeId::new("zzzz0000"), ip, 1, None);
        assert!(s.higher_ranked_alive().is_empty());
    }

    #[test]
    fn dead_peers_leave_the_fanout_set() {
        let mut s = store();
        let ip = IpAddr::V4(Ipv4Addr::LOCALHOST);
        s.upsert_peer(&NodeId::new("cccc0000"), ip, 1, Some("zed"));
        s.mark_dead(&NodeId::new("cccc0000"));
        assert!(s.higher_ranked_alive().is_empty());
        assert!(s.alive_peer_ids().is_empty());
    }
}
