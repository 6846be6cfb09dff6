//! Replicated playback state.

use serde::{Deserialize, Serialize};

use super::{Track, TrackId};

/// Repeat behavior when a track finishes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepeatMode {
    #[default]
    Off,
    All,
    One,
}

impl RepeatMode {
    /// Cycle Off -> All -> One -> Off, the order the repeat button steps.
    pub fn next(self) -> Self {
        match self {
            RepeatMode::Off => RepeatMode::All,
            RepeatMode::All => RepeatMode::One,
            RepeatMode::One => RepeatMode::Off,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RepeatMode::Off => "off",
            RepeatMode::All => "all",
            RepeatMode::One => "one",
        }
    }
}

/// Bounded stack of previously played tracks, for "skip previous".
///
/// Whole tracks are kept (not just ids) so a popped entry can be replayed
/// even after it left the playlist.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlayHistory {
    entries: Vec<Track>,
    #[serde(skip, default = "default_history_cap")]
    cap: usize,
}

const DEFAULT_HISTORY_CAP: usize = 64;

fn default_history_cap() -> usize {
    DEFAULT_HISTORY_CAP
}

impl Default for PlayHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAP)
    }
}

impl PlayHistory {
    pub fn new(cap: usize) -> Self {
        Self {
            entries: Vec::new(),
            cap: cap.max(1),
        }
    }

    pub fn push(&mut self, track: Track) {
        if self.entries.len() == self.cap {
            self.entries.remove(0);
        }
        self.entries.push(track);
    }

    pub fn pop(&mut self) -> Option<Track> {
        self.entries.pop()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The Host-authoritative playback value; replicas hold lagging copies
/// advanced by dead reckoning between sync frames.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PlaybackState {
    pub current_track: Option<Track>,
    pub position_seconds: f64,
    pub duration_seconds: f64,
    pub is_playing: bool,
    pub shuffle: bool,
    pub repeat_mode: RepeatMode,
    pub history: PlayHistory,
}

impl PlaybackState {
    pub fn current_track_id(&self) -> Option<TrackId> {
        self.current_track.as_ref().map(|t| t.id)
    }

    /// Reset to the "nothing queued, nothing playing" state.
    pub fn clear_current(&mut self) {
        self.current_track = None;
        self.position_seconds = 0.0;
        self.duration_seconds = 0.0;
        self.is_playing = false;
    }

    /// Listener-side position estimation: advance by `elapsed` seconds,
    /// clamped to the track duration.
    pub fn dead_reckon(&mut self, elapsed: f64) {
        if self.is_playing && self.duration_seconds > 0.0 {
            self.position_seconds = (self.position_seconds + elapsed).min(self.duration_seconds);
        }
    }
}
