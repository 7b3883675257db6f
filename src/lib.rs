//! Sequenced multi-topic envelope transport for stream-processing pipelines
//!
//! A [`Sender`] publishes envelopes, each a sequence id plus a set of named
//! topics, to any number of connected [`Receiver`]s. Receivers pull: a
//! sender only publishes once every synced receiver has asked for the next
//! envelope, so a slow consumer slows the producer instead of piling up
//! queues. Receivers joining several upstream senders merge their topics
//! into one envelope per id. An [`Mq`] pairs a receiver and a sender into a
//! pipeline stage that passes ids through.
//!
//! ```no_run
//! # use filter_mq::{Payload, Receiver, ReceiverConfig, Sender, SenderConfig, Topics};
//! # async fn example() -> filter_mq::Result<()> {
//! let mut sender = Sender::new(SenderConfig::new("camera").output("tcp://*:5550")).await?;
//! let mut receiver =
//!     Receiver::new(ReceiverConfig::new("detector").source("tcp://127.0.0.1:5550;main")).await?;
//!
//! receiver.recv(None, Some(std::time::Duration::ZERO)).await?;
//!
//! let topics = Topics::from([("main".to_string(), Payload::new("{}"))]);
//! sender.send(topics, None, None).await?;
//!
//! let env = receiver.recv(None, None).await?;
//! # Ok(())
//! # }
//! ```

// Import all sub modules once...
mod macros;

mod config;
mod domain;
mod endpoint;
mod error;
mod mq;
mod protocol;
mod receiver;
mod sender;
mod state;
mod transport;

pub(crate) use macros::{log_debug, log_error, log_info, log_warn};

// Re-export main types
pub use mq::{Metrics, MetricsRecord, Mq, METRICS_TOPIC};
pub use receiver::Receiver;
pub use sender::{ChannelState, Sender};

pub use config::{
    //
    MetricsMode,
    MqConfig,
    ReceiverConfig,
    SenderConfig,
    DEFAULT_METRICS_INTERVAL,
    DEFAULT_QUEUE_LEN,
    DEFAULT_RECONNECT_INTERVAL,
};
pub use endpoint::{
    //
    Delivery,
    Endpoint,
    Role,
    Source,
    TopicRule,
    TopicSelector,
    TransportKind,
    HIDDEN_PREFIX,
    WILDCARD,
};
pub use error::{Error, Result};
pub use protocol::{Downstream, Upstream, MAX_FRAME_LEN};
pub use state::{RecvState, SendState, SequenceState};

pub use transport::{
    //
    create_memory_transport,
    create_memory_transport_with_hub,
    create_tcp_transport,
    resolve as resolve_transport,
    MemoryHub,
};

#[cfg(unix)]
pub use transport::create_ipc_transport;

// --- public re-exports
pub use domain::{
    //
    Binding,
    ConnId,
    DeliveryError,
    Envelope,
    EventSink,
    FrameTx,
    Link,
    LinkEvent,
    ListenerEvent,
    OobCallback,
    OobMessage,
    Outbox,
    Payload,
    TaskSet,
    Topics,
    Transport,
    TransportPtr,
};
