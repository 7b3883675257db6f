// src/sender/channel.rs

//! Per-connection bookkeeping on the sender side.

use crate::{
    // ---
    domain::{DeliveryError, Envelope, Outbox},
    endpoint::Delivery,
    protocol::Downstream,
};

/// What a sender knows about one connected receiver endpoint.
pub struct ChannelState {
    // ---
    /// Peer identity, known after `Hello` or the first request.
    pub peer_id: Option<String>,

    /// Delivery level the peer asked for. Unknown until it says.
    pub level: Option<Delivery>,

    /// Id of the last envelope delivered to this peer.
    pub last_sent_id: Option<u64>,

    /// Highest id the peer reported as already received.
    pub last_received_id: Option<u64>,

    /// Outstanding requests not yet answered.
    pub pending_requests: u32,

    /// Peer completed the handshake.
    pub handshaked: bool,

    /// Peer has sent at least one request.
    pub requested: bool,

    outbox: Outbox<Downstream>,
}

impl ChannelState {
    // ---
    pub(crate) fn new(outbox: Outbox<Downstream>) -> Self {
        Self {
            peer_id: None,
            level: None,
            last_sent_id: None,
            last_received_id: None,
            pending_requests: 0,
            handshaked: false,
            requested: false,
            outbox,
        }
    }

    pub(crate) fn on_hello(&mut self, peer_id: String, level: Delivery) {
        // ---
        self.peer_id = Some(peer_id);
        self.level = Some(level);
        self.handshaked = true;
    }

    pub(crate) fn on_request(&mut self, peer_id: String, level: Delivery, want: u64) {
        // ---
        self.peer_id.get_or_insert(peer_id);
        self.level.get_or_insert(level);
        self.last_received_id = want.checked_sub(1);
        self.requested = true;
        self.pending_requests = self.pending_requests.saturating_add(1);
    }

    /// The lowest id this peer will accept.
    pub fn wants_from(&self) -> u64 {
        self.last_received_id.map_or(0, |id| id + 1)
    }

    /// True when this peer holds the sender back until it asks.
    ///
    /// With the handshake on, a synced peer joins at `Hello`. Without it,
    /// it joins at its first request.
    pub fn in_barrier(&self, handshake: bool) -> bool {
        // ---
        self.level == Some(Delivery::Synced) && (self.requested || (handshake && self.handshaked))
    }

    /// True when this peer asked for an envelope it has not received.
    pub fn is_requesting(&self) -> bool {
        matches!(self.level, Some(level) if level.requests()) && self.pending_requests > 0
    }

    /// True when the next published envelope goes to this peer.
    pub fn wants_data(&self) -> bool {
        // ---
        match self.level {
            Some(Delivery::DoublyEphemeral) => true,
            Some(_) => self.pending_requests > 0,
            None => false,
        }
    }

    /// Deliver `env`, consuming one request where applicable.
    pub(crate) fn deliver(&mut self, env: &Envelope) -> Result<(), DeliveryError> {
        // ---
        self.outbox.try_send(Downstream::Data(env.clone()))?;
        if self.level != Some(Delivery::DoublyEphemeral) {
            self.pending_requests = self.pending_requests.saturating_sub(1);
        }
        self.last_sent_id = Some(env.id);
        Ok(())
    }

    pub(crate) fn send(&self, frame: Downstream) -> Result<(), DeliveryError> {
        self.outbox.try_send(frame)
    }

    pub fn is_closed(&self) -> bool {
        self.outbox.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Topics;
    use tokio::sync::mpsc;

    fn channel() -> (ChannelState, mpsc::Receiver<Downstream>) {
        let (tx, rx) = mpsc::channel(8);
        (ChannelState::new(Box::new(tx)), rx)
    }

    #[test]
    fn unknown_level_gets_nothing() {
        // ---
        let (state, _rx) = channel();
        assert!(!state.wants_data());
        assert!(!state.in_barrier(true));
    }

    #[test]
    fn synced_joins_barrier_on_hello_or_request() {
        // ---
        let (mut state, _rx) = channel();
        state.on_hello("rx".into(), Delivery::Synced);
        assert!(state.in_barrier(true));
        assert!(!state.in_barrier(false));

        state.on_request("rx".into(), Delivery::Synced, 0);
        assert!(state.in_barrier(false));
        assert!(state.is_requesting());
    }

    #[test]
    fn request_records_last_received() {
        // ---
        let (mut state, _rx) = channel();
        state.on_request("rx".into(), Delivery::Synced, 10);
        assert_eq!(state.last_received_id, Some(9));
        assert_eq!(state.wants_from(), 10);

        state.on_request("rx".into(), Delivery::Synced, 0);
        assert_eq!(state.last_received_id, None);
        assert_eq!(state.wants_from(), 0);
    }

    #[test]
    fn deliver_consumes_one_request() {
        // ---
        let (mut state, mut rx) = channel();
        state.on_request("rx".into(), Delivery::Ephemeral, 0);

        state.deliver(&Envelope::new(3, Topics::new())).unwrap();

        assert_eq!(state.pending_requests, 0);
        assert_eq!(state.last_sent_id, Some(3));
        assert!(!state.wants_data());
        assert!(matches!(rx.try_recv(), Ok(Downstream::Data(env)) if env.id == 3));
    }

    #[test]
    fn doubly_ephemeral_always_wants_data() {
        // ---
        let (mut state, _rx) = channel();
        state.on_hello("watch".into(), Delivery::DoublyEphemeral);

        assert!(state.wants_data());
        assert!(!state.is_requesting());
        state.deliver(&Envelope::default()).unwrap();
        assert!(state.wants_data());
    }
}
