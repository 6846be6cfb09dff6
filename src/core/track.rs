//! Tracks and track identifiers.

use std::fmt;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::NodeId;

/// Track identifier - a random UUID minted by whoever enqueues the track.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackId(Uuid);

impl TrackId {
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Debug for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TrackId({})", self.0)
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single entry of the shared playlist. Immutable once created.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub id: TrackId,
    pub title: String,
    pub artist: String,
    /// Path as seen by the node that enqueued the track. Other nodes
    /// re-resolve it locally by basename before playback.
    pub file_path: String,
    pub added_by: NodeId,
    /// Milliseconds since the Unix epoch at enqueue time.
    pub added_at_ms: u64,
}

impl Track {
    /// Build a track from a local file path, deriving the title from the
    /// file name the way the jukebox displays it.
    pub fn from_path(path: &str, added_by: NodeId) -> Self {
        let title = Path::new(path)
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string());
        Self {
            id: TrackId::random(),
            title,
            artist: "Unknown Artist".to_string(),
            file_path: path.to_string(),
            added_by,
            added_at_ms: now_ms(),
        }
    }
}

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_path_derives_title() {
        let t = Track::from_path("/music/Daft Punk - One More Time.mp3", NodeId::new("a1b2c3d4"));
        assert_eq!(t.title, "Daft Punk - One More Time");
        assert_eq!(t.file_path, "/music/Daft Punk - One More Time.mp3");
    }

    #[test]
    fn ids_are_unique() {
        let a = Track::from_path("x.mp3", NodeId::new("n"));
        let b = Track::from_path("x.mp3", NodeId::new("n"));
        assert_ne!(a.id, b.id);
    }
}
