// src/state.rs

//! Sequence-id bookkeeping shared by senders and receivers.

use serde::{Deserialize, Serialize};

/// Id a caller asks a sender to stamp on its next envelope.
///
/// A state below the sender's counter is stale: the envelope is dropped and
/// the counter left alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SendState {
    pub id: u64,
}

impl SendState {
    pub fn new(id: u64) -> Self {
        Self { id }
    }
}

/// What a receiver reports about the envelope it delivered last.
///
/// `synced` is true when `id` is an upstream sender id. It is false when
/// the receiver has no synced source and `id` is its own local count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecvState {
    pub id: u64,
    pub synced: bool,
}

impl RecvState {
    // ---
    /// Resume point: deliver nothing older than `id`.
    pub fn resume(id: u64) -> Self {
        Self { id, synced: true }
    }
}

impl From<RecvState> for SendState {
    fn from(state: RecvState) -> Self {
        Self { id: state.id }
    }
}

/// Monotonic id counter.
///
/// `current()` is the id the next envelope will carry. It only moves
/// forward: by one per stamped envelope, or by an explicit fast-forward.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SequenceState {
    next: u64,
}

impl SequenceState {
    // ---
    pub fn new() -> Self {
        Self::default()
    }

    pub fn starting_at(id: u64) -> Self {
        Self { next: id }
    }

    pub fn current(&self) -> u64 {
        self.next
    }

    /// True when `state` asks for an id this counter has already passed.
    pub fn is_stale(&self, state: Option<SendState>) -> bool {
        state.is_some_and(|s| s.id < self.next)
    }

    /// Move the counter forward to `id`. Returns false if it was already
    /// at or past it.
    pub fn ffwd(&mut self, id: u64) -> bool {
        // ---
        if id > self.next {
            self.next = id;
            true
        } else {
            false
        }
    }

    /// Allocate the id for one envelope and advance past it.
    ///
    /// An explicit `state` at or above the counter becomes the stamped id.
    pub fn stamp(&mut self, state: Option<SendState>) -> u64 {
        // ---
        if let Some(state) = state {
            self.ffwd(state.id);
        }
        let id = self.next;
        self.next += 1;
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stamps_increment_by_one() {
        // ---
        let mut seq = SequenceState::new();
        assert_eq!(seq.stamp(None), 0);
        assert_eq!(seq.stamp(None), 1);
        assert_eq!(seq.current(), 2);
    }

    #[test]
    fn explicit_state_fast_forwards() {
        // ---
        let mut seq = SequenceState::starting_at(1);
        assert!(!seq.is_stale(Some(SendState::new(10))));
        assert_eq!(seq.stamp(Some(SendState::new(10))), 10);
        assert_eq!(seq.current(), 11);
    }

    #[test]
    fn older_state_is_stale() {
        // ---
        let seq = SequenceState::starting_at(11);
        assert!(seq.is_stale(Some(SendState::new(5))));
        assert!(!seq.is_stale(Some(SendState::new(11))));
        assert!(!seq.is_stale(None));
    }

    #[test]
    fn ffwd_never_rewinds() {
        // ---
        let mut seq = SequenceState::starting_at(7);
        assert!(!seq.ffwd(3));
        assert_eq!(seq.current(), 7);
        assert!(seq.ffwd(9));
        assert_eq!(seq.current(), 9);
    }

    #[test]
    fn recv_state_converts_to_send_state() {
        let state = RecvState { id: 4, synced: false };
        assert_eq!(SendState::from(state), SendState::new(4));
    }
}
