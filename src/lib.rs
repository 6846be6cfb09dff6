#![forbid(unsafe_code)]

//! chorus: a serverless LAN collaborative jukebox.
//!
//! Peers on one broadcast domain discover each other over UDP, keep a TCP
//! mesh, replicate a shared playlist with vector-clock causal delivery, and
//! elect a single playback Host with a weighted bully election (uptime
//! veto). Only the Host drives audio; everyone may enqueue.

pub mod config;
pub mod controller;
pub mod core;
pub mod election;
pub mod error;
pub mod identity;
pub mod net;
pub mod node;
pub mod playback;
pub mod state;
pub mod telemetry;
pub mod view;

pub use error::{Error, Result};

// Re-export the embedding surface at the crate root.
pub use crate::config::Config;
pub use crate::controller::UserIntent;
pub use crate::core::{NodeId, PlaybackState, RepeatMode, Track, TrackId, VectorClock};
pub use crate::identity::derive_node_id;
pub use crate::node::{Node, NodeHandle};
pub use crate::playback::{AudioSink, SilentSink};
pub use crate::view::{LogView, NullView, Role, StateSnapshot, View};
