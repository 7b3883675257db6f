//! Domain layer public interface.
//!
//! This module defines the value types that flow between senders and
//! receivers and the transport seam they are delivered through. Nothing here
//! refers to a concrete socket or hub implementation.
//!
//! All domain consumers must import symbols via this module, not by
//! referencing individual files directly.

mod envelope;
mod transport;

// --- Envelope re-exports ---

pub use envelope::{
    //
    Envelope,
    OobCallback,
    OobMessage,
    Payload,
    Topics,
};

// --- Transport domain re-exports ---

pub use transport::{
    //
    Binding,
    ConnId,
    DeliveryError,
    EventSink,
    FrameTx,
    Link,
    LinkEvent,
    ListenerEvent,
    Outbox,
    TaskSet,
    Transport,
    TransportPtr,
};
