//! Sender, receiver and bridge configuration.
//!
//! Configs are plain data with `with_*` builder methods. Endpoint strings
//! are kept as given and only parsed when the sender or receiver is built,
//! so a bad string surfaces as an error from the constructor.

use std::sync::Arc;
use std::time::Duration;

use crate::{
    // ---
    endpoint::{split_list, Endpoint, Source},
    transport::MemoryHub,
    Error, Result,
};

/// Default length of a sender's or receiver's event queue.
pub const DEFAULT_QUEUE_LEN: usize = 1024;

/// Default delay between reconnect attempts for a receiver source.
pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_millis(100);

/// Default interval between metrics refreshes.
pub const DEFAULT_METRICS_INTERVAL: Duration = Duration::from_secs(1);

fn identity_or_random(identity: String, prefix: &str) -> String {
    // ---
    if identity.is_empty() {
        format!("{prefix}-{}", uuid::Uuid::new_v4().simple())
    } else {
        identity
    }
}

/// Configuration of a [`Sender`](crate::Sender).
#[derive(Debug, Clone)]
pub struct SenderConfig {
    // ---
    /// Identity reported to receivers in `Welcome`. Empty means random.
    pub identity: String,

    /// Endpoints to bind. Each entry may be a comma-separated list.
    pub outputs: Vec<String>,

    /// Peer identities that must have connected before anything is sent.
    pub required: Vec<String>,

    /// Deliver each envelope to one output, round-robin, instead of all.
    pub balance: bool,

    /// When true a synced peer joins the barrier on `Hello`. When false it
    /// joins on its first request.
    pub handshake: bool,

    /// Fast-forward the counter to the lowest id every synced peer wants.
    pub sync_ids: bool,

    /// Length of the merged event queue.
    pub queue_len: usize,

    /// Hub for `memory://` outputs. `None` uses the process-global hub.
    pub hub: Option<Arc<MemoryHub>>,
}

impl SenderConfig {
    // ---
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            identity: identity_or_random(identity.into(), "sender"),
            outputs: Vec::new(),
            required: Vec::new(),
            balance: false,
            handshake: true,
            sync_ids: false,
            queue_len: DEFAULT_QUEUE_LEN,
            hub: None,
        }
    }

    /// Add an output endpoint (or comma-separated list).
    pub fn output(mut self, endpoint: impl Into<String>) -> Self {
        self.outputs.push(endpoint.into());
        self
    }

    pub fn with_required<I, S>(mut self, peers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required = peers.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_balance(mut self, balance: bool) -> Self {
        self.balance = balance;
        self
    }

    pub fn with_handshake(mut self, handshake: bool) -> Self {
        self.handshake = handshake;
        self
    }

    pub fn with_sync_ids(mut self, sync_ids: bool) -> Self {
        self.sync_ids = sync_ids;
        self
    }

    pub fn with_queue_len(mut self, queue_len: usize) -> Self {
        self.queue_len = queue_len;
        self
    }

    pub fn with_hub(mut self, hub: Arc<MemoryHub>) -> Self {
        self.hub = Some(hub);
        self
    }

    /// Parse and validate the output endpoints.
    pub fn endpoints(&self) -> Result<Vec<Endpoint>> {
        // ---
        if self.queue_len == 0 {
            return Err(Error::ConfigConflict("queue_len must be positive".into()));
        }

        let mut endpoints: Vec<Endpoint> = Vec::new();
        for entry in &self.outputs {
            for part in split_list(entry) {
                let endpoint = Endpoint::bind(part)?.with_balance(self.balance);
                if endpoint.delivery != crate::Delivery::Synced {
                    return Err(Error::InvalidEndpoint(
                        part.to_string(),
                        "delivery markers only apply to sources".into(),
                    ));
                }
                if endpoints.iter().any(|e| e.uri() == endpoint.uri()) {
                    return Err(Error::ConfigConflict(format!(
                        "output {} listed twice",
                        endpoint.uri()
                    )));
                }
                endpoints.push(endpoint);
            }
        }
        Ok(endpoints)
    }
}

/// Configuration of a [`Receiver`](crate::Receiver).
#[derive(Debug, Clone)]
pub struct ReceiverConfig {
    // ---
    /// Identity sent upstream in `Hello` and `Request`. Empty means random.
    pub identity: String,

    /// Sources to connect to. Each entry may be a comma-separated list.
    pub sources: Vec<String>,

    /// Pull from one source per call, round-robin, instead of joining all.
    pub balance: bool,

    /// Length of the merged event queue.
    pub queue_len: usize,

    /// Delay between reconnect attempts to an unreachable source.
    pub reconnect_interval: Duration,

    /// Hub for `memory://` sources. `None` uses the process-global hub.
    pub hub: Option<Arc<MemoryHub>>,
}

impl ReceiverConfig {
    // ---
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            identity: identity_or_random(identity.into(), "receiver"),
            sources: Vec::new(),
            balance: false,
            queue_len: DEFAULT_QUEUE_LEN,
            reconnect_interval: DEFAULT_RECONNECT_INTERVAL,
            hub: None,
        }
    }

    /// Add a source (or comma-separated list of sources).
    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.sources.push(source.into());
        self
    }

    pub fn with_balance(mut self, balance: bool) -> Self {
        self.balance = balance;
        self
    }

    pub fn with_queue_len(mut self, queue_len: usize) -> Self {
        self.queue_len = queue_len;
        self
    }

    pub fn with_reconnect_interval(mut self, interval: Duration) -> Self {
        self.reconnect_interval = interval;
        self
    }

    pub fn with_hub(mut self, hub: Arc<MemoryHub>) -> Self {
        self.hub = Some(hub);
        self
    }

    /// Parse and validate the sources.
    pub fn parsed_sources(&self) -> Result<Vec<Source>> {
        // ---
        if self.queue_len == 0 {
            return Err(Error::ConfigConflict("queue_len must be positive".into()));
        }

        let mut sources = Vec::new();
        for entry in &self.sources {
            for mut source in Source::parse_list(entry)? {
                source.endpoint = source.endpoint.with_balance(self.balance);
                sources.push(source);
            }
        }
        Ok(sources)
    }
}

/// Where a bridge publishes its metrics.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum MetricsMode {
    // ---
    /// No metrics.
    Off,
    /// Attach a `_metrics` topic to every outgoing envelope.
    #[default]
    Inline,
    /// Publish `_metrics` envelopes on these endpoints, independent of the
    /// data outputs.
    Dedicated(Vec<String>),
}

/// Configuration of an [`Mq`](crate::Mq) bridge.
#[derive(Debug, Clone)]
pub struct MqConfig {
    // ---
    /// Identity shared by the bridge's sender and receiver.
    pub identity: String,
    pub sources: Vec<String>,
    pub outputs: Vec<String>,
    pub sources_balance: bool,
    pub outputs_balance: bool,

    /// Peer identities the outputs wait for before sending.
    pub required: Vec<String>,

    pub metrics: MetricsMode,
    pub metrics_interval: Duration,

    /// Extra key/value pairs merged into every metrics record.
    pub extra_metrics: serde_json::Map<String, serde_json::Value>,

    /// Default `recv` timeout. `None` blocks.
    pub sources_timeout: Option<Duration>,

    /// Default `send` timeout. `None` blocks.
    pub outputs_timeout: Option<Duration>,

    pub handshake: bool,
    pub sync_ids: bool,
    pub hub: Option<Arc<MemoryHub>>,
}

impl MqConfig {
    // ---
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            identity: identity_or_random(identity.into(), "mq"),
            sources: Vec::new(),
            outputs: Vec::new(),
            sources_balance: false,
            outputs_balance: false,
            required: Vec::new(),
            metrics: MetricsMode::default(),
            metrics_interval: DEFAULT_METRICS_INTERVAL,
            extra_metrics: serde_json::Map::new(),
            sources_timeout: None,
            outputs_timeout: None,
            handshake: true,
            sync_ids: false,
            hub: None,
        }
    }

    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.sources.push(source.into());
        self
    }

    pub fn output(mut self, output: impl Into<String>) -> Self {
        self.outputs.push(output.into());
        self
    }

    pub fn with_sources_balance(mut self, balance: bool) -> Self {
        self.sources_balance = balance;
        self
    }

    pub fn with_outputs_balance(mut self, balance: bool) -> Self {
        self.outputs_balance = balance;
        self
    }

    pub fn with_required<I, S>(mut self, peers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required = peers.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_metrics(mut self, metrics: MetricsMode) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_metrics_interval(mut self, interval: Duration) -> Self {
        self.metrics_interval = interval;
        self
    }

    pub fn with_extra_metric(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extra_metrics.insert(key.into(), value);
        self
    }

    pub fn with_sources_timeout(mut self, timeout: Duration) -> Self {
        self.sources_timeout = Some(timeout);
        self
    }

    pub fn with_outputs_timeout(mut self, timeout: Duration) -> Self {
        self.outputs_timeout = Some(timeout);
        self
    }

    pub fn with_handshake(mut self, handshake: bool) -> Self {
        self.handshake = handshake;
        self
    }

    pub fn with_sync_ids(mut self, sync_ids: bool) -> Self {
        self.sync_ids = sync_ids;
        self
    }

    pub fn with_hub(mut self, hub: Arc<MemoryHub>) -> Self {
        self.hub = Some(hub);
        self
    }

    /// Config of the data sender.
    pub fn sender_config(&self) -> SenderConfig {
        // ---
        SenderConfig {
            identity: self.identity.clone(),
            outputs: self.outputs.clone(),
            required: self.required.clone(),
            balance: self.outputs_balance,
            handshake: self.handshake,
            sync_ids: self.sync_ids,
            queue_len: DEFAULT_QUEUE_LEN,
            hub: self.hub.clone(),
        }
    }

    /// Config of the dedicated metrics sender, if metrics go to their own
    /// endpoints.
    pub fn metrics_sender_config(&self) -> Result<Option<SenderConfig>> {
        // ---
        match &self.metrics {
            MetricsMode::Dedicated(outputs) if outputs.is_empty() => Err(Error::MissingConfig(
                "dedicated metrics mode needs at least one endpoint".into(),
            )),
            MetricsMode::Dedicated(outputs) => Ok(Some(SenderConfig {
                identity: format!("{}-metrics", self.identity),
                outputs: outputs.clone(),
                required: Vec::new(),
                balance: false,
                handshake: self.handshake,
                sync_ids: false,
                queue_len: DEFAULT_QUEUE_LEN,
                hub: self.hub.clone(),
            })),
            _ => Ok(None),
        }
    }

    /// Config of the receiver.
    pub fn receiver_config(&self) -> ReceiverConfig {
        // ---
        ReceiverConfig {
            identity: self.identity.clone(),
            sources: self.sources.clone(),
            balance: self.sources_balance,
            queue_len: DEFAULT_QUEUE_LEN,
            reconnect_interval: DEFAULT_RECONNECT_INTERVAL,
            hub: self.hub.clone(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        // ---
        if self.metrics != MetricsMode::Off && self.metrics_interval.is_zero() {
            return Err(Error::ConfigConflict(
                "metrics_interval must be positive".into(),
            ));
        }
        self.metrics_sender_config().map(|_| ())
    }
}
