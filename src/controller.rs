//! User intents and the Host-only gate.
//!
//! The view (or CLI, or any embedder) emits [`UserIntent`]s; this module
//! turns them into state mutations plus [`PlaybackUpdate`]s for the node
//! loop to broadcast. Enqueuing is open to every peer; everything that
//! mutates playback or removes tracks is a no-op unless this node is the
//! Host.

use crate::core::{Track, TrackId};
use crate::net::proto::Message;
use crate::playback::coordinator::{PlaybackCoordinator, PlaybackUpdate};
use crate::state::store::StateStore;

#[derive(Clone, Debug, PartialEq)]
pub enum UserIntent {
    /// Enqueue a local file. Allowed from any peer.
    AddTrack { path: String },
    /// Host-only from here down (except volume, which stays local).
    RemoveTrack { id: TrackId },
    ClearQueue,
    PlayPause,
    SkipNext,
    SkipPrev,
    /// Fraction of the current duration, `0.0..=1.0`.
    Seek { fraction: f64 },
    ToggleShuffle,
    CycleRepeat,
    SetVolume { volume: f32 },
}

pub fn handle_intent(
    intent: UserIntent,
    store: &mut StateStore,
    coordinator: &mut PlaybackCoordinator,
) -> Vec<PlaybackUpdate> {
    match intent {
        UserIntent::AddTrack { path } => {
            let track = Track::from_path(&path, store.local_id().clone());
            if store.queue_add(track.clone()) {
                vec![PlaybackUpdate::Broadcast(Message::QueueAdd { track })]
            } else {
                Vec::new()
            }
        }
        UserIntent::SetVolume { volume } => {
            coordinator.set_volume(volume);
            Vec::new()
        }
        host_only => {
            if !store.is_self_leader() {
                tracing::debug!("ignoring {host_only:?}: not the host");
                return Vec::new();
            }
            match host_only {
                UserIntent::RemoveTrack { id } => {
                    if store.queue_remove(id).is_some() {
                        vec![PlaybackUpdate::Broadcast(Message::QueueRemove {
                            track_id: id,
                        })]
                    } else {
                        Vec::new()
                    }
                }
                UserIntent::ClearQueue => {
                    store.queue_clear();
                    vec![PlaybackUpdate::Broadcast(Message::QueueClear)]
                }
                UserIntent::PlayPause => coordinator.play_pause(store),
                UserIntent::SkipNext => coordinator.skip_next(store),
                UserIntent::SkipPrev => coordinator.skip_prev(store),
                UserIntent::Seek { fraction } => coordinator.seek(store, fraction),
                UserIntent::ToggleShuffle => coordinator.toggle_shuffle(store),
                UserIntent::CycleRepeat => coordinator.cycle_repeat(store),
                UserIntent::AddTrack { .. } | UserIntent::SetVolume { .. } => unreachable!(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::NodeId;
    use crate::playback::sink::SilentSink;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn fixture(is_host: bool) -> (StateStore, PlaybackCoordinator) {
        let mut store = StateStore::new(NodeId::new("aaaa0000"), "alice", 64);
        if is_host {
            store.set_leader(Some(NodeId::new("aaaa0000")));
        }
        let coordinator = PlaybackCoordinator::new(
            Box::new(SilentSink::default()),
            Box::new(StdRng::seed_from_u64(1)),
            Vec::new(),
        );
        (store, coordinator)
    }

    #[test]
    fn any_peer_may_enqueue() {
        let (mut store, mut coordinator) = fixture(false);
        let updates = handle_intent(
            UserIntent::AddTrack {
                path: "/music/x.mp3".into(),
            },
            &mut store,
            &mut coordinator,
        );
        assert_eq!(store.playlist().len(), 1);
        assert!(matches!(
            updates[0],
            PlaybackUpdate::Broadcast(Message::QueueAdd { .. })
        ));
    }

    #[test]
    fn host_only_intents_are_noops_for_listeners() {
        let (mut store, mut coordinator) = fixture(false);
        store.queue_add(Track::from_path("/music/x.mp3", NodeId::new("aaaa0000")));
        let id = store.playlist()[0].id;

        for intent in [
            UserIntent::RemoveTrack { id },
            UserIntent::ClearQueue,
            UserIntent::PlayPause,
            UserIntent::SkipNext,
            UserIntent::SkipPrev,
            UserIntent::Seek { fraction: 0.5 },
            UserIntent::ToggleShuffle,
            UserIntent::CycleRepeat,
        ] {
            assert!(
                handle_intent(intent.clone(), &mut store, &mut coordinator).is_empty(),
                "{intent:?} must be gated"
            );
        }
        assert_eq!(store.playlist().len(), 1);
        assert!(!store.playback().shuffle);
    }

    #[test]
    fn host_remove_and_clear_broadcast() {
        let (mut store, mut coordinator) = fixture(true);
        store.queue_add(Track::from_path("/music/x.mp3", NodeId::new("aaaa0000")));
        let id = store.playlist()[0].id;

        let updates = handle_intent(UserIntent::RemoveTrack { id }, &mut store, &mut coordinator);
        assert!(matches!(
            updates[0],
            PlaybackUpdate::Broadcast(Message::QueueRemove { .. })
        ));
        assert!(store.playlist().is_empty());

        store.queue_add(Track::from_path("/music/y.mp3", NodeId::new("aaaa0000")));
        let updates = handle_intent(UserIntent::ClearQueue, &mut store, &mut coordinator);
        assert!(matches!(
            updates[0],
            PlaybackUpdate::Broadcast(Message::QueueClear)
        ));
        assert!(store.playlist().is_empty());
    }

    #[test]
    fn remove_of_unknown_id_stays_silent() {
        let (mut store, mut coordinator) = fixture(true);
        let updates = handle_intent(
            UserIntent::RemoveTrack {
                id: TrackId::random(),
            },
            &mut store,
            &mut coordinator,
        );
        assert!(updates.is_empty());
    }

    #[test]
    fn host_toggles_reach_the_coordinator() {
        let (mut store, mut coordinator) = fixture(true);
        let updates = handle_intent(UserIntent::ToggleShuffle, &mut store, &mut coordinator);
        assert!(store.playback().shuffle);
        assert!(matches!(
            updates[0],
            PlaybackUpdate::Broadcast(Message::PlaybackStatus { .. })
        ));
    }

    #[test]
    fn volume_is_never_gated() {
        let (mut store, mut coordinator) = fixture(false);
        assert!(
            handle_intent(
                UserIntent::SetVolume { volume: 0.3 },
                &mut store,
                &mut coordinator
            )
            .is_empty()
        );
    }
}
