// src/receiver/source.rs

//! Per-source connection state on the receiver side.

use std::time::Duration;

use tokio::{sync::mpsc, time::Instant};

use crate::{
    // ---
    domain::{DeliveryError, Envelope, EventSink, Link, LinkEvent, TransportPtr},
    endpoint::{Delivery, Source},
    log_debug,
    protocol::Upstream,
};

/// One upstream source: its link, request state and the contribution it
/// holds for the round being assembled.
pub(crate) struct SourceLink {
    // ---
    pub source: Source,
    transport: TransportPtr,
    link: Option<Link>,
    last_attempt: Option<Instant>,

    /// Identity of the sender on the other end, from `Welcome`.
    pub sender_id: Option<String>,

    /// A request is outstanding.
    pub requested: bool,

    /// Lowest id this source may contribute.
    pub want: u64,

    /// Selected contribution waiting to be released.
    pub pending: Option<Envelope>,
}

impl SourceLink {
    // ---
    pub fn new(source: Source, transport: TransportPtr) -> Self {
        Self {
            source,
            transport,
            link: None,
            last_attempt: None,
            sender_id: None,
            requested: false,
            want: 0,
            pending: None,
        }
    }

    pub fn level(&self) -> Delivery {
        self.source.endpoint.delivery
    }

    pub fn is_connected(&self) -> bool {
        self.link.is_some()
    }

    /// True if `conn` is the live connection of this source.
    pub fn owns(&self, conn: crate::domain::ConnId) -> bool {
        self.link.as_ref().is_some_and(|link| link.conn() == conn)
    }

    /// Drop the connection and everything tied to it.
    pub fn reset(&mut self) {
        // ---
        if self.link.take().is_some() {
            log_debug!("{}: disconnected", self.source.endpoint);
        }
        self.sender_id = None;
        self.requested = false;
        self.pending = None;
    }

    /// Connect if disconnected and the retry interval has passed.
    ///
    /// A fresh connection may lead to a restarted sender, so `want` drops
    /// back to `floor`.
    pub async fn ensure_link(
        &mut self,
        slot: usize,
        events_tx: &mpsc::Sender<(usize, LinkEvent)>,
        identity: &str,
        retry: Duration,
        floor: u64,
    ) {
        // ---
        if self.link.as_ref().is_some_and(Link::is_closed) {
            self.reset();
        }
        if self.link.is_some() {
            return;
        }
        if self.last_attempt.is_some_and(|t| t.elapsed() < retry) {
            return;
        }
        self.last_attempt = Some(Instant::now());

        let sink = EventSink::new(slot, events_tx.clone());
        match self.transport.connect(&self.source.endpoint, sink).await {
            Ok(link) => {
                let hello = Upstream::Hello {
                    peer_id: identity.to_string(),
                    level: self.level(),
                };
                if link.send(hello).is_err() {
                    log_debug!("{}: hello not delivered", self.source.endpoint);
                    return;
                }
                log_debug!("{identity}: connected to {}", self.source.endpoint);
                self.link = Some(link);
                self.want = floor;
            }
            Err(_e) => {
                log_debug!("{identity}: connect to {} failed: {_e}", self.source.endpoint);
            }
        }
    }

    /// Ask for the next envelope if this source should have a request out.
    pub fn prime(&mut self, identity: &str) {
        // ---
        if self.level().requests() && !self.requested && self.pending.is_none() {
            self.request(identity);
        }
    }

    /// Send a request for an envelope with id `>= want`.
    pub fn request(&mut self, identity: &str) {
        // ---
        let Some(link) = self.link.as_ref() else {
            return;
        };

        let result = link.send(Upstream::Request {
            peer_id: identity.to_string(),
            level: self.level(),
            want: self.want,
        });
        match result {
            Ok(()) => self.requested = true,
            Err(DeliveryError::Full) => {
                log_debug!("{}: request queue full", self.source.endpoint);
            }
            Err(DeliveryError::Closed) => self.reset(),
        }
    }

    pub fn send(&mut self, frame: Upstream) {
        // ---
        let closed = match self.link.as_ref() {
            Some(link) => link.send(frame) == Err(DeliveryError::Closed),
            None => false,
        };
        if closed {
            self.reset();
        }
    }

    /// Take in a data envelope from the sender.
    ///
    /// Synced sources drop envelopes older than `want`. Ephemeral sources
    /// drop anything they did not ask for. Non-synced sources also drop
    /// envelopes below `resume` and envelopes whose selection is empty.
    pub fn accept(&mut self, env: Envelope, resume: Option<u64>) {
        // ---
        let level = self.level();
        match level {
            Delivery::Synced => {
                self.requested = false;
                if env.id < self.want {
                    log_debug!(
                        "{}: discarding {} below {}",
                        self.source.endpoint,
                        env.id,
                        self.want
                    );
                    return;
                }
            }
            Delivery::Ephemeral => {
                if !self.requested {
                    log_debug!("{}: unsolicited {}", self.source.endpoint, env.id);
                    return;
                }
                self.requested = false;
            }
            Delivery::DoublyEphemeral => {}
        }

        if level != Delivery::Synced && resume.is_some_and(|r| env.id < r) {
            return;
        }

        let topics = self.source.selector.select(&env.topics);
        if level != Delivery::Synced && topics.is_empty() {
            return;
        }
        self.pending = Some(Envelope::new(env.id, topics));
    }
}
