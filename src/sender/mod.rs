//! Sending side: binds output endpoints and publishes envelopes under flow
//! control.
//!
//! A [`Sender`] owns one event queue fed by every output it binds. Each call
//! to [`Sender::send`] first drains that queue (new peers, requests,
//! goodbyes, out-of-band messages), then decides whether the envelope may go
//! out now:
//!
//! - every peer named in `required` must have connected,
//! - every synced peer on a target output must have an outstanding request,
//! - somebody, synced or ephemeral, must have asked for data.
//!
//! If the answer is no, it waits for more events until the timeout expires.
//! Nothing is queued on the sender side; an envelope that cannot be sent is
//! handed back to the caller as `Ok(None)`.

mod channel;

pub use channel::ChannelState;

use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use tokio::{sync::mpsc, time::Instant};

use crate::{
    // ---
    config::SenderConfig,
    domain::{
        Binding, ConnId, DeliveryError, Envelope, EventSink, ListenerEvent, OobCallback,
        OobMessage, Topics,
    },
    endpoint::{Delivery, Endpoint},
    log_debug, log_info, log_warn,
    protocol::{Downstream, Upstream},
    state::{SendState, SequenceState},
    transport, Result,
};

/// One bound output endpoint and the peers connected to it.
struct Output {
    // ---
    endpoint: Endpoint,
    peers: BTreeMap<ConnId, ChannelState>,
    _binding: Binding,
}

impl Output {
    // ---
    /// Every synced peer in the barrier has asked for data.
    fn barrier_open(&self, handshake: bool) -> bool {
        self.peers
            .values()
            .filter(|p| p.in_barrier(handshake))
            .all(|p| p.pending_requests > 0)
    }

    fn has_requester(&self) -> bool {
        self.peers.values().any(ChannelState::is_requesting)
    }

    /// Lowest id every requesting synced peer will accept.
    fn synced_floor(&self) -> Option<u64> {
        self.peers
            .values()
            .filter(|p| p.level == Some(Delivery::Synced) && p.pending_requests > 0)
            .map(ChannelState::wants_from)
            .min()
    }
}

/// Publishes envelopes to receivers connected on one or more outputs.
pub struct Sender {
    // ---
    config: SenderConfig,
    outputs: Vec<Output>,
    _events_tx: mpsc::Sender<(usize, ListenerEvent)>,
    events: mpsc::Receiver<(usize, ListenerEvent)>,
    seq: SequenceState,
    seen_peers: HashSet<String>,
    cursor: usize,
    on_oob: Option<OobCallback>,
}

impl Sender {
    // ---
    /// Bind every output in `config`.
    pub async fn new(config: SenderConfig) -> Result<Self> {
        Self::build(config, None).await
    }

    /// Bind every output in `config` and route incoming out-of-band
    /// messages to `on_oob`.
    pub async fn with_oob<F>(config: SenderConfig, on_oob: F) -> Result<Self>
    where
        F: FnMut(OobMessage) + Send + 'static,
    {
        Self::build(config, Some(Box::new(on_oob))).await
    }

    async fn build(config: SenderConfig, on_oob: Option<OobCallback>) -> Result<Self> {
        // ---
        let endpoints = config.endpoints()?;
        let (events_tx, events) = mpsc::channel(config.queue_len);

        let mut outputs = Vec::with_capacity(endpoints.len());
        for (slot, endpoint) in endpoints.into_iter().enumerate() {
            let transport = transport::resolve(&endpoint, config.hub.as_ref())?;
            let binding = transport
                .bind(&endpoint, EventSink::new(slot, events_tx.clone()))
                .await?;
            log_info!("{}: bound {endpoint}", config.identity);

            outputs.push(Output {
                endpoint,
                peers: BTreeMap::new(),
                _binding: binding,
            });
        }

        Ok(Self {
            config,
            outputs,
            _events_tx: events_tx,
            events,
            seq: SequenceState::new(),
            seen_peers: HashSet::new(),
            cursor: 0,
            on_oob,
        })
    }

    pub fn identity(&self) -> &str {
        &self.config.identity
    }

    /// Id the next envelope will carry.
    pub fn current_id(&self) -> u64 {
        self.seq.current()
    }

    /// Number of connected peers across all outputs.
    pub fn peer_count(&self) -> usize {
        self.outputs.iter().map(|o| o.peers.len()).sum()
    }

    /// Output endpoints as bound.
    pub fn endpoints(&self) -> impl Iterator<Item = &Endpoint> {
        self.outputs.iter().map(|o| &o.endpoint)
    }

    /// Publish `topics` as one envelope.
    ///
    /// Returns the counter after the send (the sent id plus one), or
    /// `Ok(None)` when the envelope could not go out before `timeout`.
    /// `None` for `timeout` waits indefinitely; a zero timeout only checks
    /// what has already arrived.
    ///
    /// With `state`, the envelope is stamped with `state.id`, moving the
    /// counter forward. A `state` the counter has already passed drops the
    /// envelope and returns the counter unchanged.
    pub async fn send(
        &mut self,
        topics: Topics,
        state: Option<SendState>,
        timeout: Option<Duration>,
    ) -> Result<Option<u64>> {
        // ---
        if self.seq.is_stale(state) {
            log_debug!(
                "{}: dropping envelope for stale {state:?}, counter at {}",
                self.config.identity,
                self.seq.current()
            );
            return Ok(Some(self.seq.current()));
        }

        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            self.pump();

            if let Some(targets) = self.ready_targets() {
                self.publish(&targets, topics, state);
                return Ok(Some(self.seq.current()));
            }

            if !self.wait(deadline).await {
                return Ok(None);
            }
        }
    }

    /// Send an out-of-band message to every connected peer. Never blocks.
    pub fn send_oob(&mut self, msg: OobMessage) {
        // ---
        self.pump();
        let mut closed = Vec::new();

        for (slot, output) in self.outputs.iter().enumerate() {
            for (conn, peer) in &output.peers {
                if let Err(DeliveryError::Closed) = peer.send(Downstream::Oob(msg.clone())) {
                    closed.push((slot, *conn));
                }
            }
        }
        self.drop_peers(closed);
    }

    /// Process pending connection events without sending.
    pub fn poll(&mut self) {
        self.pump();
    }

    /// Unbind all outputs.
    pub fn close(self) {
        log_debug!("{}: closing", self.config.identity);
    }

    fn pump(&mut self) {
        // ---
        while let Ok((slot, event)) = self.events.try_recv() {
            self.handle_event(slot, event);
        }
    }

    /// Wait for one event. Returns false once `deadline` passes.
    async fn wait(&mut self, deadline: Option<Instant>) -> bool {
        // ---
        let next = match deadline {
            Some(deadline) => match tokio::time::timeout_at(deadline, self.events.recv()).await {
                Ok(next) => next,
                Err(_) => return false,
            },
            None => self.events.recv().await,
        };

        match next {
            Some((slot, event)) => {
                self.handle_event(slot, event);
                true
            }
            None => false,
        }
    }

    fn handle_event(&mut self, slot: usize, event: ListenerEvent) {
        // ---
        let identity = &self.config.identity;
        let Some(output) = self.outputs.get_mut(slot) else {
            return;
        };

        match event {
            ListenerEvent::Opened { conn, outbox } => {
                log_debug!("{identity}: {conn} opened on {}", output.endpoint);
                output.peers.insert(conn, ChannelState::new(outbox));
            }

            ListenerEvent::Closed { conn } => {
                if output.peers.remove(&conn).is_some() {
                    log_debug!("{identity}: {conn} closed on {}", output.endpoint);
                }
            }

            ListenerEvent::Frame { conn, frame } => {
                let Some(peer) = output.peers.get_mut(&conn) else {
                    log_debug!("{identity}: frame from unknown {conn}");
                    return;
                };

                match frame {
                    Upstream::Hello { peer_id, level } => {
                        log_debug!("{identity}: hello from {peer_id} ({level:?}) on {conn}");
                        self.seen_peers.insert(peer_id.clone());
                        peer.on_hello(peer_id, level);

                        let welcome = Downstream::Welcome {
                            sender_id: identity.clone(),
                            next_id: self.seq.current(),
                        };
                        if peer.send(welcome).is_err() {
                            log_debug!("{identity}: could not welcome {conn}");
                        }
                    }

                    Upstream::Request {
                        peer_id,
                        level,
                        want,
                    } => {
                        self.seen_peers.insert(peer_id.clone());
                        peer.on_request(peer_id, level, want);
                    }

                    Upstream::Oob(msg) => {
                        if let Some(on_oob) = self.on_oob.as_mut() {
                            on_oob(msg);
                        }
                    }

                    Upstream::Bye { peer_id } => {
                        log_debug!("{identity}: bye from {peer_id}");
                        output.peers.remove(&conn);
                    }
                }
            }
        }
    }

    fn required_present(&self) -> bool {
        self.config
            .required
            .iter()
            .all(|peer| self.seen_peers.contains(peer))
    }

    /// Outputs the next envelope goes to, or `None` if it must wait.
    fn ready_targets(&mut self) -> Option<Vec<usize>> {
        // ---
        if !self.required_present() {
            return None;
        }

        let n = self.outputs.len();
        if n == 0 {
            return Some(Vec::new());
        }

        let handshake = self.config.handshake;
        if self.config.balance {
            for k in 0..n {
                let i = (self.cursor + k) % n;
                let output = &self.outputs[i];
                if output.has_requester() && output.barrier_open(handshake) {
                    self.cursor = (i + 1) % n;
                    return Some(vec![i]);
                }
            }
            return None;
        }

        let barrier_open = self.outputs.iter().all(|o| o.barrier_open(handshake));
        let requested = self.outputs.iter().any(Output::has_requester);
        (barrier_open && requested).then(|| (0..n).collect())
    }

    fn publish(&mut self, targets: &[usize], topics: Topics, state: Option<SendState>) {
        // ---
        if self.config.sync_ids {
            let floor = targets
                .iter()
                .filter_map(|&i| self.outputs[i].synced_floor())
                .min();
            if let Some(floor) = floor {
                if self.seq.ffwd(floor) {
                    log_debug!("{}: ids synced forward to {floor}", self.config.identity);
                }
            }
        }

        let env = Envelope::new(self.seq.stamp(state), topics);
        let mut closed = Vec::new();

        for &slot in targets {
            let output = &mut self.outputs[slot];
            for (conn, peer) in output.peers.iter_mut() {
                if !peer.wants_data() {
                    continue;
                }
                match peer.deliver(&env) {
                    Ok(()) => {}
                    Err(DeliveryError::Full) => {
                        log_warn!(
                            "{}: queue full, dropping {} for {conn}",
                            self.config.identity,
                            env.id
                        );
                    }
                    Err(DeliveryError::Closed) => closed.push((slot, *conn)),
                }
            }
        }

        self.drop_peers(closed);
    }

    fn drop_peers(&mut self, closed: Vec<(usize, ConnId)>) {
        // ---
        for (slot, conn) in closed {
            if let Some(output) = self.outputs.get_mut(slot) {
                output.peers.remove(&conn);
            }
        }
    }
}
