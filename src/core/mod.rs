//! Core domain types.
//!
//! Module order follows type dependency:
//! - ids: NodeId and friends
//! - clock: vector clock primitives
//! - track: Track and TrackId
//! - playback: playback state, repeat modes, play history

pub mod clock;
pub mod ids;
pub mod playback;
pub mod track;

pub use clock::VectorClock;
pub use ids::NodeId;
pub use playback::{PlayHistory, PlaybackState, RepeatMode};
pub use track::{Track, TrackId};
