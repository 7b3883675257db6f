//! Full-duplex bridge: one [`Receiver`] in, one [`Sender`] out.
//!
//! [`Mq::recv`] remembers the id of the envelope it delivered, and the next
//! [`Mq::send`] stamps its envelope with that id, so ids flow through a
//! pipeline stage unchanged. The remembered id is used once; a second send
//! without an intervening receive numbers itself as usual.
//!
//! Unless disabled, the bridge also keeps [`Metrics`] and publishes them
//! either inline as a `_metrics` topic on every outgoing envelope or on a
//! dedicated sender of their own.

mod metrics;

pub use metrics::{Metrics, MetricsRecord, METRICS_TOPIC};

use std::time::{Duration, Instant};

use crate::{
    // ---
    config::{MetricsMode, MqConfig},
    domain::{OobMessage, Payload, Topics},
    log_debug,
    receiver::Receiver,
    sender::Sender,
    state::{RecvState, SendState},
    Result,
};

/// Receiver and sender pair with id pass-through and metrics.
pub struct Mq {
    // ---
    config: MqConfig,
    sender: Sender,
    receiver: Receiver,
    metrics_sender: Option<Sender>,
    metrics: Option<Metrics>,
    inbound: Option<SendState>,
}

impl Mq {
    // ---
    /// Bind the outputs, then connect to the sources.
    pub async fn new(config: MqConfig) -> Result<Self> {
        // ---
        config.validate()?;

        let sender = Sender::new(config.sender_config()).await?;
        let metrics_sender = match config.metrics_sender_config()? {
            Some(metrics_config) => Some(Sender::new(metrics_config).await?),
            None => None,
        };
        let receiver = Receiver::new(config.receiver_config()).await?;

        let metrics = (config.metrics != MetricsMode::Off)
            .then(|| Metrics::new(config.metrics_interval, config.extra_metrics.clone()));

        Ok(Self {
            config,
            sender,
            receiver,
            metrics_sender,
            metrics,
            inbound: None,
        })
    }

    pub fn identity(&self) -> &str {
        &self.config.identity
    }

    /// Receive the next envelope's topics.
    ///
    /// `timeout` overrides the configured `sources_timeout`.
    pub async fn recv(&mut self, timeout: Option<Duration>) -> Result<Option<Topics>> {
        // ---
        let timeout = timeout.or(self.config.sources_timeout);
        let started = Instant::now();

        let Some(env) = self.receiver.recv(None, timeout).await? else {
            return Ok(None);
        };

        if let Some(metrics) = self.metrics.as_mut() {
            metrics.on_recv(started.elapsed());
        }
        self.inbound = self
            .receiver
            .state()
            .filter(|state| state.synced)
            .map(SendState::from);

        Ok(Some(env.topics))
    }

    /// Send `topics`, stamped with the id of the last received envelope if
    /// that id has not been used yet.
    ///
    /// `timeout` overrides the configured `outputs_timeout`.
    pub async fn send(&mut self, topics: Topics, timeout: Option<Duration>) -> Result<Option<u64>> {
        let state = self.inbound;
        self.send_with_state(topics, state, timeout).await
    }

    /// Send `topics` with an explicit state, ignoring the remembered one.
    pub async fn send_with_state(
        &mut self,
        mut topics: Topics,
        state: Option<SendState>,
        timeout: Option<Duration>,
    ) -> Result<Option<u64>> {
        // ---
        let timeout = timeout.or(self.config.outputs_timeout);
        let data_bytes: usize = topics.values().map(Payload::data_len).sum();

        self.publish_metrics(&mut topics).await?;

        let started = Instant::now();
        let sent = self.sender.send(topics, state, timeout).await?;

        if sent.is_some() {
            self.inbound = None;
            if let Some(metrics) = self.metrics.as_mut() {
                metrics.on_send(data_bytes, started.elapsed());
            }
        }
        Ok(sent)
    }

    async fn publish_metrics(&mut self, topics: &mut Topics) -> Result<()> {
        // ---
        let Some(metrics) = self.metrics.as_mut() else {
            return Ok(());
        };
        let refreshed = metrics.refresh(Instant::now());

        match self.metrics_sender.as_mut() {
            None => {
                if let Some(payload) = metrics.payload()? {
                    topics.insert(METRICS_TOPIC.to_string(), payload);
                }
            }
            Some(metrics_sender) if refreshed => {
                if let Some(payload) = metrics.payload()? {
                    let out = Topics::from([(METRICS_TOPIC.to_string(), payload)]);
                    if metrics_sender.send(out, None, Some(Duration::ZERO)).await?.is_none() {
                        log_debug!("{}: no metrics consumer ready", self.config.identity);
                    }
                }
            }
            Some(_) => {}
        }
        Ok(())
    }

    /// State of the last received envelope.
    pub fn recv_state(&self) -> Option<RecvState> {
        self.receiver.state()
    }

    /// Latest metrics snapshot, if metrics are on and one was taken.
    pub fn metrics(&self) -> Option<&MetricsRecord> {
        self.metrics.as_ref().and_then(Metrics::snapshot)
    }

    /// Out-of-band message to every downstream peer.
    pub fn send_oob_downstream(&mut self, msg: OobMessage) {
        self.sender.send_oob(msg);
    }

    /// Out-of-band message to every upstream source.
    pub fn send_oob_upstream(&mut self, msg: OobMessage) {
        self.receiver.send_oob(msg);
    }

    pub fn sender(&self) -> &Sender {
        &self.sender
    }

    pub fn receiver(&self) -> &Receiver {
        &self.receiver
    }

    /// Close the receiver and unbind the outputs.
    pub fn close(self) {
        // ---
        self.receiver.close();
        self.sender.close();
        if let Some(metrics_sender) = self.metrics_sender {
            metrics_sender.close();
        }
    }
}
