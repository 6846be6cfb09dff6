//! Replicated state and causal delivery.

pub mod causal;
pub mod store;

pub use causal::CausalDelivery;
pub use store::{PeerRecord, PeerStatus, StateStore};
