use crate::{
    // ---
    domain::{Envelope, OobMessage},
    endpoint::Delivery,
};
use serde::{Deserialize, Serialize};

/// Frames a receiver sends to a sender.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Upstream {
    // ---
    /// First frame on every connection. Registers the peer and its level.
    Hello { peer_id: String, level: Delivery },

    /// Ask for one more envelope with id `>= want`.
    Request {
        peer_id: String,
        level: Delivery,
        want: u64,
    },

    /// Out-of-band message, delivered to the sender's callback.
    Oob(OobMessage),

    /// Orderly goodbye before the connection closes.
    Bye { peer_id: String },
}

/// Frames a sender sends to a receiver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Downstream {
    // ---
    /// Reply to `Hello` with the sender identity and the id it will stamp
    /// next.
    Welcome { sender_id: String, next_id: u64 },

    /// A published envelope.
    Data(Envelope),

    /// Out-of-band message, delivered to the receiver's callback.
    Oob(OobMessage),
}

impl Upstream {
    // ---
    pub fn peer_id(&self) -> Option<&str> {
        match self {
            Upstream::Hello { peer_id, .. }
            | Upstream::Request { peer_id, .. }
            | Upstream::Bye { peer_id } => Some(peer_id),
            Upstream::Oob(_) => None,
        }
    }
}
