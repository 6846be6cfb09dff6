//! Host-side playback: the audio sink seam and the coordinator that
//! drives it.

pub mod coordinator;
pub mod sink;

pub use coordinator::{PlaybackCoordinator, PlaybackUpdate};
pub use sink::{AudioSink, SilentSink};

use std::path::{Path, PathBuf};

/// Resolve a track's path on this machine.
///
/// Paths travel the network as the enqueuer saw them; other nodes try the
/// exact path first, then fall back to a basename search through the
/// configured media directories (separators normalized, so a Windows path
/// resolves on Unix and vice versa).
pub fn resolve_media_path(file_path: &str, media_dirs: &[PathBuf]) -> Option<PathBuf> {
    if file_path.is_empty() {
        return None;
    }
    let exact = Path::new(file_path);
    if exact.exists() {
        return Some(exact.to_path_buf());
    }

    let normalized = file_path.replace('\\', "/");
    let basename = normalized.rsplit('/').next()?;
    if basename.is_empty() {
        return None;
    }
    for dir in media_dirs {
        let candidate = dir.join(basename);
        if candidate.exists() {
            return Some(candidate);
        }
    }
    None
}
