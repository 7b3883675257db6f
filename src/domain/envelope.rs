// src/domain/envelope.rs

use crate::Result;
use bytes::Bytes;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::BTreeMap;

/// Content of a single topic.
///
/// `meta` is an opaque metadata blob (JSON by convention, see
/// [`Payload::json`]). `data` is an optional binary blob such as an encoded
/// image. Neither is interpreted by the transport.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    pub meta: Bytes,
    pub data: Option<Bytes>,
}

impl Payload {
    // ---
    /// Payload with metadata only.
    pub fn new(meta: impl Into<Bytes>) -> Self {
        // ---
        Self {
            meta: meta.into(),
            data: None,
        }
    }

    /// Payload with metadata and a binary blob.
    pub fn with_data(meta: impl Into<Bytes>, data: impl Into<Bytes>) -> Self {
        // ---
        Self {
            meta: meta.into(),
            data: Some(data.into()),
        }
    }

    /// Serialize `value` as JSON into the metadata blob.
    pub fn json<T: Serialize>(value: &T) -> Result<Self> {
        Ok(Self::new(serde_json::to_vec(value)?))
    }

    /// Deserialize the metadata blob as JSON.
    pub fn meta_json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.meta)?)
    }

    /// Length of the binary blob, zero when absent.
    pub fn data_len(&self) -> usize {
        self.data.as_ref().map_or(0, Bytes::len)
    }
}

/// Named payloads carried by one envelope. Topic names are unique.
pub type Topics = BTreeMap<String, Payload>;

/// Out-of-band message. Carries no id and bypasses flow control.
pub type OobMessage = Payload;

/// Callback invoked for every out-of-band message an endpoint receives.
pub type OobCallback = Box<dyn FnMut(OobMessage) + Send>;

/// Unit of transfer: a sequence id plus a mapping of topic name to payload.
///
/// Ids increase by exactly 1 per successful send from a given sender unless
/// the sender was explicitly fast-forwarded. An envelope may carry zero
/// topics.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub id: u64,
    pub topics: Topics,
}

impl Envelope {
    // ---
    pub fn new(id: u64, topics: Topics) -> Self {
        Self { id, topics }
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }

    /// Look up a topic by name.
    pub fn topic(&self, name: &str) -> Option<&Payload> {
        self.topics.get(name)
    }
}
