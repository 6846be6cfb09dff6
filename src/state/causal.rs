//! Causal delivery of playlist mutations.
//!
//! Incoming causal messages are gated on vector-clock readiness. A message
//! that arrives before its dependencies sits in a bounded pending buffer;
//! every successful delivery re-scans the buffer until a fixpoint. Entries
//! that outlive their TTL are dropped with a log line - prematurity never
//! escalates into an error.
//!
//! FULL_STATE is the one causal kind applied without the readiness gate:
//! its body replaces the replicated state wholesale and its clock is merged,
//! which is exactly what catches a late joiner up.

use std::time::{Duration, Instant};

use crate::net::proto::{Envelope, Message};
use crate::state::store::StateStore;

struct PendingEntry {
    envelope: Envelope,
    buffered_at: Instant,
}

pub struct CausalDelivery {
    pending: Vec<PendingEntry>,
    cap: usize,
    ttl: Duration,
}

impl CausalDelivery {
    pub fn new(cap: usize, ttl: Duration) -> Self {
        Self {
            pending: Vec::new(),
            cap: cap.max(1),
            ttl,
        }
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Handle one causal message. Returns every envelope applied as a
    /// result, in delivery order (the incoming one plus any unblocked
    /// buffered ones); empty when the message was buffered.
    pub fn receive(
        &mut self,
        store: &mut StateStore,
        envelope: Envelope,
        now: Instant,
    ) -> Vec<Envelope> {
        debug_assert!(envelope.message.is_causal());

        let deliverable = matches!(envelope.message, Message::FullState(_))
            || store.can_deliver(&envelope.sender, &envelope.clock);
        if !deliverable {
            tracing::debug!(
                "buffering premature {:?} from {}",
                envelope.message.kind(),
                envelope.sender
            );
            self.buffer(envelope, now);
            return Vec::new();
        }

        let mut applied = Vec::new();
        apply(store, &envelope);
        applied.push(envelope);
        self.drain_ready(store, &mut applied);
        applied
    }

    /// Re-scan the buffer until nothing new becomes deliverable.
    fn drain_ready(&mut self, store: &mut StateStore, applied: &mut Vec<Envelope>) {
        loop {
            let ready = self
                .pending
                .iter()
                .position(|entry| store.can_deliver(&entry.envelope.sender, &entry.envelope.clock));
            let Some(index) = ready else {
                break;
            };
            let entry = self.pending.remove(index);
            apply(store, &entry.envelope);
            applied.push(entry.envelope);
        }
    }

    fn buffer(&mut self, envelope: Envelope, now: Instant) {
        if self.pending.len() == self.cap {
            let dropped = self.pending.remove(0);
            tracing::warn!(
                "pending buffer full, dropping {:?} from {}",
                dropped.envelope.message.kind(),
                dropped.envelope.sender
            );
        }
        self.pending.push(PendingEntry {
            envelope,
            buffered_at: now,
        });
    }

    /// Drop entries older than the TTL. Returns how many were dropped.
    pub fn sweep(&mut self, now: Instant) -> usize {
        let ttl = self.ttl;
        let before = self.pending.len();
        self.pending.retain(|entry| {
            let keep = now.duration_since(entry.buffered_at) <= ttl;
            if !keep {
                tracing::warn!(
                    "dropping expired {:?} from {} after {:?} in pending buffer",
                    entry.envelope.message.kind(),
                    entry.envelope.sender,
                    ttl
                );
            }
            keep
        });
        before - self.pending.len()
    }
}

/// Merge the clock, then apply the mutation.
fn apply(store: &mut StateStore, envelope: &Envelope) {
    store.merge_clock(&envelope.clock);
    match &envelope.message {
        Message::QueueAdd { track } => {
            store.queue_add(track.clone());
        }
        Message::QueueRemove { track_id } => {
            store.queue_remove(*track_id);
        }
        Message::QueueClear => {
            store.queue_clear();
        }
        Message::FullState(state) => {
            store.apply_full_state(state);
        }
        other => {
            debug_assert!(false, "non-causal message reached causal apply: {other:?}");
        }
    }
}
