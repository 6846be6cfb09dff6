//! The audio output seam.
//!
//! The coordinator only ever talks to [`AudioSink`]; which library (if
//! any) sits behind it is the embedder's business. [`SilentSink`] is the
//! built-in implementation: it plays nothing but models time faithfully,
//! which keeps a headless node's auto-advance honest and gives tests a
//! deterministic clock to poke.

use std::path::Path;
use std::time::Instant;

/// Contract for an audio output device.
///
/// `position` reports seconds played since the last `play` call; the
/// coordinator adds its accumulated seek offset on top. `is_busy` is true
/// while a track is loaded, including while paused.
pub trait AudioSink: Send {
    /// Load `path` and start at `start_offset` seconds. Returns false when
    /// the device refuses the file.
    fn play(&mut self, path: &Path, start_offset: f64) -> bool;

    fn stop(&mut self);

    /// Toggle pause; returns the new paused state.
    fn pause_toggle(&mut self) -> bool;

    fn set_volume(&mut self, volume: f32);

    /// Seconds of audio played since the last `play`.
    fn position(&self) -> f64;

    fn is_busy(&self) -> bool;

    /// Total length of the file, when the device can tell.
    fn duration_of(&self, _path: &Path) -> Option<f64> {
        None
    }
}

/// A sink that consumes wall-clock time instead of audio.
///
/// Every track "lasts" `track_duration` seconds from its `play` offset.
pub struct SilentSink {
    track_duration: f64,
    session: Option<Session>,
    volume: f32,
}

struct Session {
    resumed_at: Instant,
    /// Seconds played before the last pause.
    accumulated: f64,
    paused: bool,
    /// Offset the track started from; `position()` excludes it.
    start_offset: f64,
}

pub const DEFAULT_TRACK_DURATION: f64 = 180.0;

impl SilentSink {
    pub fn new(track_duration: f64) -> Self {
        Self {
            track_duration,
            session: None,
            volume: 0.7,
        }
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    fn played(&self) -> f64 {
        match &self.session {
            None => 0.0,
            Some(s) if s.paused => s.accumulated,
            Some(s) => s.accumulated + s.resumed_at.elapsed().as_secs_f64(),
        }
    }
}

impl Default for SilentSink {
    fn default() -> Self {
        Self::new(DEFAULT_TRACK_DURATION)
    }
}

impl AudioSink for SilentSink {
    fn play(&mut self, _path: &Path, start_offset: f64) -> bool {
        self.session = Some(Session {
            resumed_at: Instant::now(),
            accumulated: 0.0,
            paused: false,
            start_offset,
        });
        true
    }

    fn stop(&mut self) {
        self.session = None;
    }

    fn pause_toggle(&mut self) -> bool {
        let Some(session) = &mut self.session else {
            return false;
        };
        if session.paused {
            session.resumed_at = Instant::now();
            session.paused = false;
        } else {
            session.accumulated += session.resumed_at.elapsed().as_secs_f64();
            session.paused = true;
        }
        session.paused
    }

    fn set_volume(&mut self, volume: f32) {
        self.volume = volume.clamp(0.0, 1.0);
    }

    fn position(&self) -> f64 {
        self.played()
    }

    fn is_busy(&self) -> bool {
        match &self.session {
            None => false,
            Some(s) if s.paused => true,
            Some(s) => s.start_offset + self.played() < self.track_duration,
        }
    }

    fn duration_of(&self, _path: &Path) -> Option<f64> {
        Some(self.track_duration)
    }
}
