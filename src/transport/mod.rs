//! Transport implementations.
//!
//! This module provides concrete implementations of the domain-level
//! `Transport` trait and resolves an endpoint's scheme to one of them.
//!
//! Sender and receiver code must not depend on transport-specific types.

mod memory;
mod stream;

use std::sync::Arc;

use crate::{
    // ---
    domain::TransportPtr,
    endpoint::{Endpoint, TransportKind},
    Result,
};

#[cfg(not(unix))]
use crate::Error;

pub use memory::{
    //
    create_transport as create_memory_transport,
    create_transport_with_hub as create_memory_transport_with_hub,
    MemoryHub,
};

#[cfg(unix)]
pub use stream::create_ipc_transport;
pub use stream::create_tcp_transport;

/// Pick the transport serving `endpoint`.
///
/// `memory://` endpoints use `hub` when given, the process-global hub
/// otherwise.
pub fn resolve(endpoint: &Endpoint, hub: Option<&Arc<MemoryHub>>) -> Result<TransportPtr> {
    // ---
    match endpoint.kind {
        TransportKind::Memory => Ok(match hub {
            Some(hub) => create_memory_transport_with_hub(hub.clone()),
            None => create_memory_transport(),
        }),
        TransportKind::Tcp => Ok(create_tcp_transport()),
        #[cfg(unix)]
        TransportKind::Ipc => Ok(create_ipc_transport()),
        #[cfg(not(unix))]
        TransportKind::Ipc => Err(Error::InvalidEndpoint(
            endpoint.to_string(),
            "ipc endpoints need unix domain sockets".into(),
        )),
    }
}
