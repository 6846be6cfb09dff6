//! Node identity derivation.
//!
//! A node id is an 8-character stable identifier derived from the user's
//! display name and network password. The same credentials always produce
//! the same id, so a node keeps its identity across restarts.

use uuid::Uuid;

use crate::core::NodeId;

/// Derive the stable node id for a `(display_name, password)` pair.
///
/// The id is the first 8 hex characters of a v5 UUID over
/// `"{name}:{password}"` in the DNS namespace.
pub fn derive_node_id(display_name: &str, password: &str) -> NodeId {
    let seed = format!("{display_name}:{password}");
    let full = Uuid::new_v5(&Uuid::NAMESPACE_DNS, seed.as_bytes());
    let hex = full.simple().to_string();
    NodeId::new(&hex[..8])
}
