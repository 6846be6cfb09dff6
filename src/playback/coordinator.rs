//! Host-only playback coordination.
//!
//! Runs the auto-advance/tick cycle against the audio sink and turns every
//! authoritative change into broadcasts for the mesh. All methods are
//! called by the node loop only while this node is the Host; outputs are
//! [`PlaybackUpdate`]s the loop executes (it wraps broadcasts in stamped
//! envelopes and routes notices to the view).

use std::path::PathBuf;

use rand::{Rng, RngCore};

use crate::core::{RepeatMode, Track, TrackId};
use crate::net::proto::Message;
use crate::playback::resolve_media_path;
use crate::playback::sink::AudioSink;
use crate::state::store::StateStore;

/// Fallback when the sink cannot measure a file.
const FALLBACK_DURATION: f64 = 180.0;
/// "Previous" pops history only within this many seconds of track start;
/// later presses restart the current track.
const PREV_RESTART_WINDOW: f64 = 2.0;

#[derive(Debug, PartialEq)]
pub enum PlaybackUpdate {
    /// Send to every peer (the node loop stamps and frames it).
    Broadcast(Message),
    /// Surface to the local view.
    Notice(String),
}

pub struct PlaybackCoordinator {
    sink: Box<dyn AudioSink>,
    rng: Box<dyn RngCore + Send>,
    media_dirs: Vec<PathBuf>,
    /// Seconds already consumed before the sink's current `play` call;
    /// keeps `position()` truthful across seeks.
    seek_offset: f64,
    paused: bool,
    /// What the sink is actually playing. A current track we did not start
    /// ourselves is one inherited through failover and gets resumed.
    last_started: Option<TrackId>,
}

impl PlaybackCoordinator {
    pub fn new(
        sink: Box<dyn AudioSink>,
        rng: Box<dyn RngCore + Send>,
        media_dirs: Vec<PathBuf>,
    ) -> Self {
        Self {
            sink,
            rng,
            media_dirs,
            seek_offset: 0.0,
            paused: false,
            last_started: None,
        }
    }

    /// 1 Hz driver while Host: sync position while the sink is busy,
    /// otherwise advance the queue.
    pub fn tick(&mut self, store: &mut StateStore) -> Vec<PlaybackUpdate> {
        if self.sink.is_busy() {
            let position = self.seek_offset + self.sink.position();
            let playback = store.playback_mut();
            playback.position_seconds = if playback.duration_seconds > 0.0 {
                position.min(playback.duration_seconds)
            } else {
                position
            };
            vec![self.sync_update(store)]
        } else {
            self.auto_advance(store)
        }
    }

    fn auto_advance(&mut self, store: &mut StateStore) -> Vec<PlaybackUpdate> {
        let mut updates = Vec::new();

        if let Some(current) = store.playback().current_track.clone() {
            if self.last_started != Some(current.id) {
                // Inherited through failover or a state transfer: resume
                // from the replicated position.
                let offset = store.playback().position_seconds;
                if self.start_track(store, current, offset, false, &mut updates) {
                    return updates;
                }
                // Unresolvable here. Leave it seated as the current track
                // so the queue advance below treats it as finished and
                // still emits the transition broadcasts.
            } else if store.playback().repeat_mode == RepeatMode::One
                && self.start_track(store, current, 0.0, false, &mut updates)
            {
                return updates;
            }
        }

        self.advance_from_queue(store, &mut updates);
        updates
    }

    /// Pop the next queued track (FIFO or shuffle) and start it, skipping
    /// unplayable entries; empty queue transitions to queue end.
    fn advance_from_queue(&mut self, store: &mut StateStore, updates: &mut Vec<PlaybackUpdate>) {
        let finished = store.playback().current_track.clone();

        loop {
            if store.playlist().is_empty() {
                if finished.is_some() {
                    self.queue_end(store, updates);
                }
                return;
            }

            let index = self.pick_index(store);
            let candidate = store
                .queue_remove_at(index)
                .expect("picked index is in range");
            if self.start_track(store, candidate, 0.0, true, updates) {
                if let Some(finished) = finished {
                    if store.playback().repeat_mode == RepeatMode::All {
                        // Recycle the finished track to the tail everywhere.
                        if store.queue_add(finished.clone()) {
                            updates.push(PlaybackUpdate::Broadcast(Message::QueueAdd {
                                track: finished.clone(),
                            }));
                        }
                    }
                    store.playback_mut().history.push(finished);
                }
                return;
            }
        }
    }

    /// Uniform shuffle pick excluding the just-finished track (when there
    /// is a choice); FIFO head otherwise.
    fn pick_index(&mut self, store: &StateStore) -> usize {
        let len = store.playlist().len();
        if !store.playback().shuffle {
            return 0;
        }
        if len == 1 {
            return 0;
        }
        let pool: Vec<usize> = (0..len)
            .filter(|&i| Some(store.playlist()[i].id) != self.last_started)
            .collect();
        let pool = if pool.is_empty() {
            (0..len).collect()
        } else {
            pool
        };
        pool[self.rng.gen_range(0..pool.len())]
    }

    /// Resolve, start the sink, update local state and emit the broadcast
    /// set. Failure (missing or refused file) notifies the view, removes
    /// the track everywhere when it came off the queue, and never touches
    /// NOW_PLAYING.
    fn start_track(
        &mut self,
        store: &mut StateStore,
        track: Track,
        offset: f64,
        from_queue: bool,
        updates: &mut Vec<PlaybackUpdate>,
    ) -> bool {
        let Some(path) = resolve_media_path(&track.file_path, &self.media_dirs) else {
            tracing::warn!("media file missing for {}: {}", track.title, track.file_path);
            updates.push(PlaybackUpdate::Notice(format!(
                "Missing file: {}",
                track.title
            )));
            if from_queue {
                updates.push(PlaybackUpdate::Broadcast(Message::QueueRemove {
                    track_id: track.id,
                }));
            }
            return false;
        };
        if !self.sink.play(&path, offset) {
            tracing::warn!("sink refused {}", path.display());
            updates.push(PlaybackUpdate::Notice(format!(
                "Unplayable file: {}",
                track.title
            )));
            if from_queue {
                updates.push(PlaybackUpdate::Broadcast(Message::QueueRemove {
                    track_id: track.id,
                }));
            }
            return false;
        }

        let duration = self.sink.duration_of(&path).unwrap_or(FALLBACK_DURATION);
        self.seek_offset = offset;
        self.paused = false;
        self.last_started = Some(track.id);

        tracing::info!("now playing {} at {offset:.1}s", track.title);
        store.apply_now_playing(Some(track.clone()));
        {
            let playback = store.playback_mut();
            playback.position_seconds = offset;
            playback.duration_seconds = duration;
        }

        updates.push(PlaybackUpdate::Broadcast(Message::NowPlaying {
            track: Some(track.clone()),
        }));
        if from_queue {
            updates.push(PlaybackUpdate::Broadcast(Message::QueueRemove {
                track_id: track.id,
            }));
        }
        updates.push(PlaybackUpdate::Broadcast(Message::PlaybackSync {
            position_seconds: offset,
            duration_seconds: duration,
            is_playing: true,
        }));
        true
    }

    fn queue_end(&mut self, store: &mut StateStore, updates: &mut Vec<PlaybackUpdate>) {
        tracing::info!("queue ended");
        self.sink.stop();
        self.paused = false;
        self.last_started = None;
        self.seek_offset = 0.0;
        store.playback_mut().clear_current();

        updates.push(PlaybackUpdate::Broadcast(Message::NowPlaying { track: None }));
        updates.push(PlaybackUpdate::Broadcast(Message::PlaybackSync {
            position_seconds: 0.0,
            duration_seconds: 0.0,
            is_playing: false,
        }));
        updates.push(self.status_update(store));
    }

    // -- user intents (Host-gated by the controller) ------------------------

    pub fn play_pause(&mut self, store: &mut StateStore) -> Vec<PlaybackUpdate> {
        if store.playback().current_track.is_none() {
            return Vec::new();
        }
        let paused = self.sink.pause_toggle();
        self.paused = paused;
        store.playback_mut().is_playing = !paused;
        tracing::info!(
            "{}",
            if paused { "playback paused" } else { "playback resumed" }
        );
        vec![self.status_update(store)]
    }

    pub fn skip_next(&mut self, store: &mut StateStore) -> Vec<PlaybackUpdate> {
        if store.playback().current_track.is_none() && store.playlist().is_empty() {
            return Vec::new();
        }
        self.sink.stop();
        self.paused = false;
        let mut updates = Vec::new();
        self.advance_from_queue(store, &mut updates);
        updates
    }

    pub fn skip_prev(&mut self, store: &mut StateStore) -> Vec<PlaybackUpdate> {
        let Some(current) = store.playback().current_track.clone() else {
            return Vec::new();
        };
        let mut updates = Vec::new();

        if store.playback().position_seconds <= PREV_RESTART_WINDOW {
            if let Some(prev) = store.playback_mut().history.pop() {
                self.sink.stop();
                self.paused = false;
                if self.start_track(store, prev.clone(), 0.0, false, &mut updates) {
                    // The interrupted track rejoins the queue, replicated.
                    if store.queue_add(current.clone()) {
                        updates.push(PlaybackUpdate::Broadcast(Message::QueueAdd {
                            track: current,
                        }));
                    }
                    return updates;
                }
                // Unplayable history entry: put it back instead of losing
                // the track, then fall through to a plain restart.
                store.playback_mut().history.push(prev);
            }
        }

        self.restart_current(store, &mut updates);
        updates
    }

    /// `fraction` in `0.0..=1.0` of the current duration.
    pub fn seek(&mut self, store: &mut StateStore, fraction: f64) -> Vec<PlaybackUpdate> {
        let Some(current) = store.playback().current_track.clone() else {
            return Vec::new();
        };
        let duration = store.playback().duration_seconds;
        if duration <= 0.0 {
            return Vec::new();
        }
        let position = fraction.clamp(0.0, 1.0) * duration;
        let Some(path) = resolve_media_path(&current.file_path, &self.media_dirs) else {
            return vec![PlaybackUpdate::Notice(format!(
                "Missing file: {}",
                current.title
            ))];
        };

        // The sink contract has no native seek: stop and restart at the
        // offset, carrying pause state across.
        let was_paused = self.paused;
        if !self.sink.play(&path, position) {
            return vec![PlaybackUpdate::Notice(format!(
                "Unplayable file: {}",
                current.title
            ))];
        }
        if was_paused {
            self.sink.pause_toggle();
            self.paused = true;
        }
        self.seek_offset = position;
        store.playback_mut().position_seconds = position;
        vec![self.sync_update(store)]
    }

    pub fn toggle_shuffle(&mut self, store: &mut StateStore) -> Vec<PlaybackUpdate> {
        let playback = store.playback_mut();
        playback.shuffle = !playback.shuffle;
        tracing::info!(
            "shuffle {}",
            if playback.shuffle { "on" } else { "off" }
        );
        vec![self.status_update(store)]
    }

    pub fn cycle_repeat(&mut self, store: &mut StateStore) -> Vec<PlaybackUpdate> {
        let playback = store.playback_mut();
        playback.repeat_mode = playback.repeat_mode.next();
        tracing::info!("repeat mode {}", playback.repeat_mode.as_str());
        vec![self.status_update(store)]
    }

    /// Local-only volume pass-through.
    pub fn set_volume(&mut self, volume: f32) {
        self.sink.set_volume(volume.clamp(0.0, 1.0));
    }

    /// Called when another node takes over: listeners never drive audio.
    pub fn relinquish(&mut self) {
        self.sink.stop();
        self.paused = false;
        self.last_started = None;
        self.seek_offset = 0.0;
    }

    // -- helpers ------------------------------------------------------------

    fn restart_current(&mut self, store: &mut StateStore, updates: &mut Vec<PlaybackUpdate>) {
        let Some(current) = store.playback().current_track.clone() else {
            return;
        };
        let Some(path) = resolve_media_path(&current.file_path, &self.media_dirs) else {
            updates.push(PlaybackUpdate::Notice(format!(
                "Missing file: {}",
                current.title
            )));
            return;
        };
        if !self.sink.play(&path, 0.0) {
            updates.push(PlaybackUpdate::Notice(format!(
                "Unplayable file: {}",
                current.title
            )));
            return;
        }
        self.seek_offset = 0.0;
        self.paused = false;
        let playback = store.playback_mut();
        playback.position_seconds = 0.0;
        playback.is_playing = true;
        updates.push(self.sync_update(store));
    }

    fn sync_update(&self, store: &StateStore) -> PlaybackUpdate {
        let playback = store.playback();
        PlaybackUpdate::Broadcast(Message::PlaybackSync {
            position_seconds: playback.position_seconds,
            duration_seconds: playback.duration_seconds,
            is_playing: playback.is_playing,
        })
    }

    fn status_update(&self, store: &StateStore) -> PlaybackUpdate {
        let playback = store.playback();
        PlaybackUpdate::Broadcast(Message::PlaybackStatus {
            is_playing: playback.is_playing,
            shuffle: playback.shuffle,
            repeat_mode: playback.repeat_mode,
        })
    }
}
