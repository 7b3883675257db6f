// src/domain/transport.rs

//! Transport domain abstractions.
//!
//! A transport moves protocol frames between one bound sender endpoint and
//! any number of connected receiver endpoints. It knows nothing about ids,
//! barriers or topic selection; those live in the sender and receiver.
//!
//! Every transport reports activity by pushing events into an [`EventSink`].
//! A sender or receiver owns exactly one event queue and hands each endpoint
//! a sink tagged with that endpoint's slot, so all endpoints are serviced
//! from a single `recv().await`.
//!
//! Concrete implementations live under `src/transport/`.
use crate::{
    // ---
    endpoint::{Endpoint, TransportKind},
    protocol::{Downstream, Upstream},
    Result,
};
use async_trait::async_trait;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex,
};
use tokio::{sync::mpsc, task::JoinHandle};

/// Identity of one sender-side connection, unique within the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnId(u64);

impl ConnId {
    // ---
    /// Allocate a fresh connection id.
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ConnId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Why a frame could not be queued for delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryError {
    // ---
    /// The peer queue is at its high-water mark. The frame is dropped.
    Full,
    /// The peer is gone.
    Closed,
}

/// Events seen by a bound (sender side) endpoint.
pub enum ListenerEvent {
    // ---
    /// A receiver connected. `outbox` delivers frames back to it.
    Opened {
        conn: ConnId,
        outbox: Outbox<Downstream>,
    },
    /// A frame arrived from a connected receiver.
    Frame { conn: ConnId, frame: Upstream },
    /// The receiver went away.
    Closed { conn: ConnId },
}

/// Events seen by a connected (receiver side) endpoint.
#[derive(Debug)]
pub enum LinkEvent {
    // ---
    Frame { conn: ConnId, frame: Downstream },
    Closed { conn: ConnId },
}

/// Slot-tagged handle into a sender's or receiver's merged event queue.
pub struct EventSink<E> {
    slot: usize,
    tx: mpsc::Sender<(usize, E)>,
}

impl<E> Clone for EventSink<E> {
    fn clone(&self) -> Self {
        Self {
            slot: self.slot,
            tx: self.tx.clone(),
        }
    }
}

impl<E> EventSink<E> {
    // ---
    pub fn new(slot: usize, tx: mpsc::Sender<(usize, E)>) -> Self {
        Self { slot, tx }
    }

    pub fn slot(&self) -> usize {
        self.slot
    }

    /// Queue an event without waiting. Used by in-process delivery, which
    /// must never block the producing side.
    pub fn try_emit(&self, event: E) -> std::result::Result<(), DeliveryError> {
        // ---
        self.tx.try_send((self.slot, event)).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DeliveryError::Full,
            mpsc::error::TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }

    /// Queue an event, waiting for room. Used by socket reader tasks.
    pub async fn emit(&self, event: E) -> std::result::Result<(), DeliveryError> {
        self.tx
            .send((self.slot, event))
            .await
            .map_err(|_| DeliveryError::Closed)
    }

    /// True once the owning sender or receiver has been dropped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Non-blocking frame queue towards one peer.
pub trait FrameTx<F>: Send + Sync {
    // ---
    fn try_send(&self, frame: F) -> std::result::Result<(), DeliveryError>;

    fn is_closed(&self) -> bool;
}

impl<F: Send> FrameTx<F> for mpsc::Sender<F> {
    // ---
    fn try_send(&self, frame: F) -> std::result::Result<(), DeliveryError> {
        mpsc::Sender::try_send(self, frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DeliveryError::Full,
            mpsc::error::TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }

    fn is_closed(&self) -> bool {
        mpsc::Sender::is_closed(self)
    }
}

pub type Outbox<F> = Box<dyn FrameTx<F>>;

/// Background tasks owned by a binding or link. Aborted when the owner drops.
#[derive(Clone, Default)]
pub struct TaskSet {
    inner: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl TaskSet {
    // ---
    pub fn push(&self, handle: JoinHandle<()>) {
        // ---
        let mut tasks = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        tasks.retain(|h| !h.is_finished());
        tasks.push(handle);
    }

    pub fn abort_all(&self) {
        // ---
        let mut tasks = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        for handle in tasks.drain(..) {
            handle.abort();
        }
    }
}

type DropHook = Box<dyn FnOnce() + Send>;

/// A live bound endpoint. Dropping it stops accepting connections and tears
/// down every connection it accepted.
pub struct Binding {
    address: String,
    tasks: TaskSet,
    on_drop: Option<DropHook>,
}

impl Binding {
    // ---
    pub fn new(address: impl Into<String>, tasks: TaskSet) -> Self {
        Self {
            address: address.into(),
            tasks,
            on_drop: None,
        }
    }

    /// Run `hook` when the binding is dropped.
    pub fn on_drop(mut self, hook: impl FnOnce() + Send + 'static) -> Self {
        self.on_drop = Some(Box::new(hook));
        self
    }

    pub fn address(&self) -> &str {
        &self.address
    }
}

impl Drop for Binding {
    fn drop(&mut self) {
        // ---
        self.tasks.abort_all();
        if let Some(hook) = self.on_drop.take() {
            hook();
        }
    }
}

/// A live connection from a receiver endpoint to a bound sender endpoint.
pub struct Link {
    conn: ConnId,
    outbox: Outbox<Upstream>,
    tasks: TaskSet,
    on_drop: Option<DropHook>,
}

impl Link {
    // ---
    pub fn new(conn: ConnId, outbox: Outbox<Upstream>, tasks: TaskSet) -> Self {
        Self {
            conn,
            outbox,
            tasks,
            on_drop: None,
        }
    }

    /// Run `hook` when the link is dropped.
    pub fn on_drop(mut self, hook: impl FnOnce() + Send + 'static) -> Self {
        self.on_drop = Some(Box::new(hook));
        self
    }

    pub fn conn(&self) -> ConnId {
        self.conn
    }

    pub fn send(&self, frame: Upstream) -> std::result::Result<(), DeliveryError> {
        self.outbox.try_send(frame)
    }

    pub fn is_closed(&self) -> bool {
        self.outbox.is_closed()
    }
}

impl Drop for Link {
    fn drop(&mut self) {
        // ---
        self.tasks.abort_all();
        if let Some(hook) = self.on_drop.take() {
            hook();
        }
    }
}

/// Moves frames between bound and connected endpoints of one transport kind.
///
/// `bind` is called by senders, `connect` by receivers. Both return handles
/// whose lifetime is the lifetime of the endpoint; all further activity is
/// reported through the supplied sink.
#[async_trait]
pub trait Transport: Send + Sync {
    // ---
    fn kind(&self) -> TransportKind;

    async fn bind(&self, endpoint: &Endpoint, sink: EventSink<ListenerEvent>) -> Result<Binding>;

    async fn connect(&self, endpoint: &Endpoint, sink: EventSink<LinkEvent>) -> Result<Link>;
}

pub type TransportPtr = Arc<dyn Transport>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conn_ids_are_unique() {
        // ---
        let a = ConnId::next();
        let b = ConnId::next();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn sink_reports_full_and_closed() {
        // ---
        let (tx, rx) = mpsc::channel::<(usize, u8)>(1);
        let sink = EventSink::new(4, tx);

        assert_eq!(sink.try_emit(1), Ok(()));
        assert_eq!(sink.try_emit(2), Err(DeliveryError::Full));

        drop(rx);
        assert!(sink.is_closed());
        assert_eq!(sink.try_emit(3), Err(DeliveryError::Closed));
    }

    #[tokio::test]
    async fn sink_tags_events_with_slot() {
        // ---
        let (tx, mut rx) = mpsc::channel::<(usize, &str)>(4);
        let sink = EventSink::new(2, tx);

        sink.emit("hello").await.expect("emit");
        assert_eq!(rx.recv().await, Some((2, "hello")));
    }

    #[tokio::test]
    async fn link_drop_runs_hook() {
        // ---
        let (tx, _rx) = mpsc::channel::<Upstream>(1);
        let (hook_tx, mut hook_rx) = mpsc::channel::<()>(1);

        let link = Link::new(ConnId::next(), Box::new(tx), TaskSet::default()).on_drop(move || {
            let _ = hook_tx.try_send(());
        });
        drop(link);

        assert_eq!(hook_rx.try_recv(), Ok(()));
    }
}
