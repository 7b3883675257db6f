//! In-memory transport implementation.
//!
//! This module provides a pure in-process implementation of the domain-level
//! `Transport` trait. It backs `memory://` and `inproc://` endpoints and is
//! the transport every test in this crate runs on.
//!
//! ## Reference Semantics
//!
//! - A sender binds a name on a [`MemoryHub`]; receivers connect to that name.
//! - Frames are handed straight to the peer's event queue with `try_send`,
//!   so delivery is synchronous and never blocks the producing side. A full
//!   queue drops the frame.
//! - Dropping a [`Link`] reports `Closed` to the sender. Dropping the
//!   sender's event queue closes every link into it.
//! - Connecting to a name nobody has bound fails with `NotBound`; the
//!   receiver retries later.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use tokio::sync::RwLock;

use crate::{
    // ---
    domain::{
        Binding, ConnId, DeliveryError, EventSink, FrameTx, Link, LinkEvent, ListenerEvent,
        TaskSet, Transport, TransportPtr,
    },
    endpoint::{Endpoint, TransportKind},
    log_debug,
    protocol::{Downstream, Upstream},
    Error, Result,
};

/// Shared name registry for the in-memory transport.
///
/// All `memory://` endpoints resolved against the same hub can reach each
/// other. Tests construct their own hub to stay isolated from each other;
/// everything else shares the process-global one.
///
/// ```
/// # use filter_mq::{MemoryHub, SenderConfig};
/// let hub = MemoryHub::new();
/// let config = SenderConfig::new("tx").output("memory://frames").with_hub(hub.clone());
/// ```
pub struct MemoryHub {
    // ---
    listeners: RwLock<HashMap<String, EventSink<ListenerEvent>>>,
}

impl MemoryHub {
    /// Create a new, empty hub.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    async fn bind(&self, address: &str, sink: EventSink<ListenerEvent>) -> Result<()> {
        // ---
        let mut listeners = self.listeners.write().await;

        if let Some(existing) = listeners.get(address) {
            if !existing.is_closed() {
                return Err(Error::AddressInUse(format!("memory://{address}")));
            }
        }

        log_debug!("memory: bind {address}");
        listeners.insert(address.to_string(), sink);
        Ok(())
    }

    async fn connect(&self, address: &str, sink: EventSink<LinkEvent>) -> Result<Link> {
        // ---
        let listener = {
            let listeners = self.listeners.read().await;
            match listeners.get(address) {
                Some(listener) if !listener.is_closed() => listener.clone(),
                _ => return Err(Error::NotBound(format!("memory://{address}"))),
            }
        };

        let conn = ConnId::next();
        let downstream = ToReceiver { conn, sink };

        match listener.try_emit(ListenerEvent::Opened {
            conn,
            outbox: Box::new(downstream),
        }) {
            Ok(()) => {}
            Err(DeliveryError::Closed) => {
                return Err(Error::NotBound(format!("memory://{address}")));
            }
            Err(DeliveryError::Full) => {
                return Err(Error::Transport(format!(
                    "memory://{address}: sender event queue full"
                )));
            }
        }

        log_debug!("memory: {conn} connected to {address}");

        let closer = listener.clone();
        let upstream = ToSender {
            conn,
            sink: listener,
        };
        let link = Link::new(conn, Box::new(upstream), TaskSet::default()).on_drop(move || {
            let _ = closer.try_emit(ListenerEvent::Closed { conn });
        });
        Ok(link)
    }

    /// Number of live bound names. Closed bindings are not counted.
    pub async fn bound_count(&self) -> usize {
        // ---
        let listeners = self.listeners.read().await;
        listeners.values().filter(|sink| !sink.is_closed()).count()
    }
}

impl Default for MemoryHub {
    fn default() -> Self {
        // ---
        Self {
            listeners: RwLock::new(HashMap::new()),
        }
    }
}

impl std::fmt::Debug for MemoryHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryHub").finish_non_exhaustive()
    }
}

/// Receiver → sender frames for one connection.
struct ToSender {
    conn: ConnId,
    sink: EventSink<ListenerEvent>,
}

impl FrameTx<Upstream> for ToSender {
    // ---
    fn try_send(&self, frame: Upstream) -> std::result::Result<(), DeliveryError> {
        self.sink.try_emit(ListenerEvent::Frame {
            conn: self.conn,
            frame,
        })
    }

    fn is_closed(&self) -> bool {
        self.sink.is_closed()
    }
}

/// Sender → receiver frames for one connection.
struct ToReceiver {
    conn: ConnId,
    sink: EventSink<LinkEvent>,
}

impl FrameTx<Downstream> for ToReceiver {
    // ---
    fn try_send(&self, frame: Downstream) -> std::result::Result<(), DeliveryError> {
        self.sink.try_emit(LinkEvent::Frame {
            conn: self.conn,
            frame,
        })
    }

    fn is_closed(&self) -> bool {
        self.sink.is_closed()
    }
}

/// Process-global hub used by [`create_memory_transport`].
static GLOBAL_HUB: OnceLock<Arc<MemoryHub>> = OnceLock::new();

fn global_hub() -> Arc<MemoryHub> {
    GLOBAL_HUB.get_or_init(MemoryHub::new).clone()
}

/// In-memory transport routing through a [`MemoryHub`].
struct MemoryTransport {
    // ---
    hub: Arc<MemoryHub>,
}

#[async_trait::async_trait]
impl Transport for MemoryTransport {
    // ---
    fn kind(&self) -> TransportKind {
        TransportKind::Memory
    }

    async fn bind(&self, endpoint: &Endpoint, sink: EventSink<ListenerEvent>) -> Result<Binding> {
        // ---
        self.hub.bind(&endpoint.address, sink).await?;
        Ok(Binding::new(endpoint.uri(), TaskSet::default()))
    }

    async fn connect(&self, endpoint: &Endpoint, sink: EventSink<LinkEvent>) -> Result<Link> {
        self.hub.connect(&endpoint.address, sink).await
    }
}

/// Create an in-memory transport on the process-global hub.
pub fn create_transport() -> TransportPtr {
    create_transport_with_hub(global_hub())
}

/// Create an in-memory transport on an explicit hub.
///
/// Integration tests use this to keep parallel test cases from seeing each
/// other's endpoints.
pub fn create_transport_with_hub(hub: Arc<MemoryHub>) -> TransportPtr {
    Arc::new(MemoryTransport { hub })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn second_live_bind_is_rejected() {
        // ---
        let hub = MemoryHub::new();
        let transport = create_transport_with_hub(hub.clone());
        let endpoint = Endpoint::bind("memory://dup").unwrap();

        let (tx_a, _rx_a) = mpsc::channel(4);
        let _binding = transport
            .bind(&endpoint, EventSink::new(0, tx_a))
            .await
            .expect("first bind");

        let (tx_b, _rx_b) = mpsc::channel(4);
        let err = transport
            .bind(&endpoint, EventSink::new(0, tx_b))
            .await
            .err()
            .expect("second bind must fail");
        assert!(matches!(err, Error::AddressInUse(_)));
    }

    #[tokio::test]
    async fn bind_replaces_closed_listener() {
        // ---
        let hub = MemoryHub::new();
        let transport = create_transport_with_hub(hub.clone());
        let endpoint = Endpoint::bind("memory://reuse").unwrap();

        let (tx_a, rx_a) = mpsc::channel(4);
        let first = transport.bind(&endpoint, EventSink::new(0, tx_a)).await.unwrap();
        drop(rx_a);
        drop(first);

        let (tx_b, _rx_b) = mpsc::channel(4);
        assert!(transport.bind(&endpoint, EventSink::new(0, tx_b)).await.is_ok());
        assert_eq!(hub.bound_count().await, 1);
    }

    #[tokio::test]
    async fn connect_without_listener_fails() {
        // ---
        let transport = create_transport_with_hub(MemoryHub::new());
        let endpoint = Endpoint::connect("memory://nobody").unwrap();
        let (tx, _rx) = mpsc::channel(4);

        let err = transport
            .connect(&endpoint, EventSink::new(0, tx))
            .await
            .err()
            .expect("connect must fail");
        assert!(matches!(err, Error::NotBound(_)));
    }
}
