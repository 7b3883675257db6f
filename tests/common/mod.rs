// tests/common/mod.rs

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use filter_mq::{
    // ---
    MemoryHub,
    Payload,
    Receiver,
    ReceiverConfig,
    Result,
    Sender,
    SenderConfig,
    Topics,
};

/// Generous bound for operations expected to succeed.
pub const WAIT: Option<Duration> = Some(Duration::from_millis(1000));

/// Bound for operations expected to come back empty.
pub const SHORT: Option<Duration> = Some(Duration::from_millis(20));

/// Check what has already arrived without waiting.
pub const NOW: Option<Duration> = Some(Duration::ZERO);

/// Topics whose metadata is the topic's own value string.
pub fn topics(pairs: &[(&str, &str)]) -> Topics {
    pairs
        .iter()
        .map(|(name, meta)| (name.to_string(), Payload::new(meta.to_string())))
        .collect()
}

pub fn names(topics: &Topics) -> Vec<&str> {
    topics.keys().map(String::as_str).collect()
}

pub async fn sender(hub: &Arc<MemoryHub>, identity: &str, outputs: &[&str]) -> Result<Sender> {
    // ---
    let mut config = SenderConfig::new(identity).with_hub(hub.clone());
    for output in outputs {
        config = config.output(*output);
    }
    Sender::new(config).await
}

pub async fn receiver(hub: &Arc<MemoryHub>, identity: &str, sources: &[&str]) -> Result<Receiver> {
    // ---
    let mut config = ReceiverConfig::new(identity).with_hub(hub.clone());
    for source in sources {
        config = config.source(*source);
    }
    Receiver::new(config).await
}

#[cfg(feature = "logging")]
mod imp {
    use std::sync::Once;

    static INIT: Once = Once::new();

    pub fn init() {
        INIT.call_once(|| {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
                .with_test_writer()
                .try_init();
        });
    }
}

#[cfg(not(feature = "logging"))]
mod imp {
    #[inline]
    pub fn init() {}
}

pub fn init_logging() {
    imp::init();
}
