//! Receiving side: connects to sources, requests envelopes and joins them.
//!
//! A [`Receiver`] connects to every source it is given and keeps one merged
//! event queue for all of them. Each [`Receiver::recv`] call:
//!
//! 1. drains arrived frames into per-source contributions,
//! 2. releases a round if one is complete,
//! 3. otherwise (re)connects sources and sends requests, then waits.
//!
//! A round over synced sources is complete when every connected synced
//! source holds a contribution with the same id. Sources that fall behind
//! are asked again for the leading id; sources that run ahead simply wait.
//! Ephemeral and doubly-ephemeral contributions ride along with whatever
//! round is released. A receiver without synced sources numbers its
//! deliveries with a local counter instead.
//!
//! In balance mode there is no join: each call returns the first
//! contribution found, scanning round-robin from the last source used.

mod source;

use std::collections::HashMap;
use std::time::Duration;

use tokio::{sync::mpsc, time::Instant};

use crate::{
    // ---
    config::ReceiverConfig,
    domain::{Envelope, LinkEvent, OobCallback, OobMessage, Topics},
    endpoint::{Delivery, Source},
    log_debug, log_error, log_info,
    protocol::{Downstream, Upstream},
    state::{RecvState, SequenceState},
    transport, Error, Result,
};
use source::SourceLink;

/// Receives joined envelopes from one or more upstream senders.
pub struct Receiver {
    // ---
    config: ReceiverConfig,
    sources: Vec<SourceLink>,
    events_tx: mpsc::Sender<(usize, LinkEvent)>,
    events: mpsc::Receiver<(usize, LinkEvent)>,
    resume: Option<u64>,
    local: SequenceState,
    cursor: usize,
    owners: HashMap<String, usize>,
    state: Option<RecvState>,
    on_oob: Option<OobCallback>,
}

impl Receiver {
    // ---
    /// Start connecting to every source in `config`.
    ///
    /// Unreachable sources are not an error; they are retried on every
    /// `recv` at most once per reconnect interval.
    pub async fn new(config: ReceiverConfig) -> Result<Self> {
        Self::build(config, None).await
    }

    /// Like [`Receiver::new`], routing out-of-band messages to `on_oob`.
    pub async fn with_oob<F>(config: ReceiverConfig, on_oob: F) -> Result<Self>
    where
        F: FnMut(OobMessage) + Send + 'static,
    {
        Self::build(config, Some(Box::new(on_oob))).await
    }

    async fn build(config: ReceiverConfig, on_oob: Option<OobCallback>) -> Result<Self> {
        // ---
        let parsed = config.parsed_sources()?;
        let (events_tx, events) = mpsc::channel(config.queue_len);

        let mut sources = Vec::with_capacity(parsed.len());
        for source in parsed {
            let transport = transport::resolve(&source.endpoint, config.hub.as_ref())?;
            sources.push(SourceLink::new(source, transport));
        }

        let mut receiver = Self {
            config,
            sources,
            events_tx,
            events,
            resume: None,
            local: SequenceState::new(),
            cursor: 0,
            owners: HashMap::new(),
            state: None,
            on_oob,
        };
        receiver.connect_all().await;

        log_info!(
            "{}: receiving from {} source(s)",
            receiver.config.identity,
            receiver.sources.len()
        );
        Ok(receiver)
    }

    pub fn identity(&self) -> &str {
        &self.config.identity
    }

    /// State of the last delivered envelope.
    pub fn state(&self) -> Option<RecvState> {
        self.state
    }

    /// Configured sources.
    pub fn sources(&self) -> impl Iterator<Item = &Source> {
        self.sources.iter().map(|s| &s.source)
    }

    /// Number of sources with a live connection.
    pub fn connected_count(&self) -> usize {
        self.sources.iter().filter(|s| s.is_connected()).count()
    }

    /// Receive the next envelope.
    ///
    /// `resume` asks for nothing older than its id; rounds below it are
    /// discarded until one at or above it arrives. Returns `Ok(None)` when
    /// nothing could be delivered before `timeout`. `None` for `timeout`
    /// waits indefinitely.
    ///
    /// Fails with [`Error::DuplicateTopic`] when two sources contribute the
    /// same topic.
    pub async fn recv(
        &mut self,
        resume: Option<RecvState>,
        timeout: Option<Duration>,
    ) -> Result<Option<Envelope>> {
        // ---
        if let Some(resume) = resume {
            self.set_resume(resume.id);
        }

        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            self.pump();

            if let Some(env) = self.release()? {
                return Ok(Some(env));
            }

            self.maintain().await;

            if !self.wait(deadline).await {
                return Ok(None);
            }
        }
    }

    /// Send an out-of-band message to every connected source. Never blocks.
    pub fn send_oob(&mut self, msg: OobMessage) {
        // ---
        for source in self.sources.iter_mut() {
            source.send(Upstream::Oob(msg.clone()));
        }
    }

    /// Say goodbye to every source and disconnect.
    pub fn close(mut self) {
        // ---
        let identity = self.config.identity.clone();
        for source in self.sources.iter_mut() {
            source.send(Upstream::Bye {
                peer_id: identity.clone(),
            });
        }
        log_debug!("{identity}: closed");
    }

    fn set_resume(&mut self, id: u64) {
        // ---
        self.resume = Some(id);
        for source in self.sources.iter_mut() {
            if source.level() == Delivery::Synced && source.want < id {
                source.want = id;
                if source.pending.as_ref().is_some_and(|env| env.id < id) {
                    source.pending = None;
                }
            }
        }
    }

    async fn connect_all(&mut self) {
        // ---
        let retry = self.config.reconnect_interval;
        let floor = self.resume.unwrap_or(0);
        for (slot, source) in self.sources.iter_mut().enumerate() {
            source
                .ensure_link(slot, &self.events_tx, &self.config.identity, retry, floor)
                .await;
        }
    }

    /// Reconnect dropped sources and put requests out.
    async fn maintain(&mut self) {
        // ---
        self.connect_all().await;
        for source in self.sources.iter_mut() {
            source.prime(&self.config.identity);
        }
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
        let retry_at = self
            .sources
            .iter()
            .any(|s| !s.is_connected())
            .then(|| Instant::now() + self.config.reconnect_interval);

        let wake = match (deadline, retry_at) {
            (Some(deadline), Some(retry_at)) => Some(deadline.min(retry_at)),
            (deadline, None) => deadline,
            (None, retry_at) => retry_at,
        };

        let next = match wake {
            Some(wake) => match tokio::time::timeout_at(wake, self.events.recv()).await {
                Ok(next) => next,
                Err(_) => return deadline.map_or(true, |d| Instant::now() < d),
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

    fn handle_event(&mut self, slot: usize, event: LinkEvent) {
        // ---
        let Some(source) = self.sources.get_mut(slot) else {
            return;
        };

        match event {
            LinkEvent::Closed { conn } => {
                if source.owns(conn) {
                    source.reset();
                }
            }

            LinkEvent::Frame { conn, frame } => {
                if !source.owns(conn) {
                    return;
                }
                match frame {
                    Downstream::Welcome { sender_id, next_id } => {
                        log_debug!(
                            "{}: welcomed by {sender_id} at {next_id} on {}",
                            self.config.identity,
                            source.source.endpoint
                        );
                        source.sender_id = Some(sender_id);
                    }
                    Downstream::Data(env) => source.accept(env, self.resume),
                    Downstream::Oob(msg) => {
                        if let Some(on_oob) = self.on_oob.as_mut() {
                            on_oob(msg);
                        }
                    }
                }
            }
        }
    }

    /// Release a complete round, if there is one.
    fn release(&mut self) -> Result<Option<Envelope>> {
        // ---
        if self.config.balance {
            return Ok(self.release_balanced());
        }

        let synced: Vec<usize> = (0..self.sources.len())
            .filter(|&i| {
                let s = &self.sources[i];
                s.level() == Delivery::Synced && s.is_connected()
            })
            .collect();

        if synced.is_empty() {
            return self.release_unsynced();
        }

        let mut target = 0;
        for &i in &synced {
            match &self.sources[i].pending {
                Some(env) => target = target.max(env.id),
                None => return Ok(None),
            }
        }

        let mut behind = false;
        for &i in &synced {
            let source = &mut self.sources[i];
            if source.pending.as_ref().is_some_and(|env| env.id < target) {
                source.pending = None;
                source.want = target;
                behind = true;
            }
        }
        if behind {
            return Ok(None);
        }

        let contributors: Vec<usize> = (0..self.sources.len())
            .filter(|&i| self.sources[i].pending.is_some())
            .collect();
        let topics = self.merge(&contributors)?;

        for &i in &contributors {
            self.sources[i].pending = None;
        }
        for &i in &synced {
            let source = &mut self.sources[i];
            source.want = target + 1;
            source.request(&self.config.identity);
        }

        Ok(Some(self.deliver(target, true, topics)))
    }

    /// No synced source connected: deliver whatever non-synced sources hold.
    fn release_unsynced(&mut self) -> Result<Option<Envelope>> {
        // ---
        let contributors: Vec<usize> = (0..self.sources.len())
            .filter(|&i| self.sources[i].pending.is_some())
            .collect();
        if contributors.is_empty() {
            return Ok(None);
        }

        let topics = self.merge(&contributors)?;
        for &i in &contributors {
            self.sources[i].pending = None;
        }

        let id = self.local.stamp(None);
        Ok(Some(self.deliver(id, false, topics)))
    }

    fn release_balanced(&mut self) -> Option<Envelope> {
        // ---
        let n = self.sources.len();
        for k in 0..n {
            let i = (self.cursor + k) % n;
            let source = &mut self.sources[i];
            let Some(env) = source.pending.take() else {
                continue;
            };
            self.cursor = (i + 1) % n;

            let synced = source.level() == Delivery::Synced;
            if synced {
                source.want = env.id + 1;
                source.request(&self.config.identity);
            }
            let id = if synced { env.id } else { self.local.stamp(None) };
            return Some(self.deliver(id, synced, env.topics));
        }
        None
    }

    fn deliver(&mut self, id: u64, synced: bool, topics: Topics) -> Envelope {
        // ---
        self.resume = None;
        self.state = Some(RecvState { id, synced });
        Envelope::new(id, topics)
    }

    /// Combine the pending contributions of `contributors`.
    ///
    /// A topic belongs to the first source that delivered it. Any other
    /// source delivering the same topic later is a topology error.
    fn merge(&mut self, contributors: &[usize]) -> Result<Topics> {
        // ---
        let mut topics = Topics::new();
        let mut claimed: HashMap<String, usize> = HashMap::new();

        for &i in contributors {
            let Some(env) = self.sources[i].pending.as_ref() else {
                continue;
            };
            for (name, payload) in &env.topics {
                let owner = self
                    .owners
                    .get(name)
                    .or_else(|| claimed.get(name))
                    .copied();
                if let Some(owner) = owner.filter(|&owner| owner != i) {
                    let err = Error::DuplicateTopic {
                        topic: name.clone(),
                        first: self.sources[owner].source.to_string(),
                        second: self.sources[i].source.to_string(),
                    };
                    log_error!("{}: {err}", self.config.identity);
                    return Err(err);
                }
                claimed.insert(name.clone(), i);
                topics.insert(name.clone(), payload.clone());
            }
        }

        self.owners.extend(claimed);
        Ok(topics)
    }
}
