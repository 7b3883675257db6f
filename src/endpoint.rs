// src/endpoint.rs

//! Endpoint and topic-selector grammar.
//!
//! An endpoint string is `scheme://address` followed by an optional delivery
//! marker: none for synced, `?` for ephemeral, `??` for doubly-ephemeral.
//!
//! | scheme                  | address                          |
//! |-------------------------|----------------------------------|
//! | `memory://`, `inproc://`| any non-empty name               |
//! | `tcp://`                | `host:port`, `*` binds all hosts |
//! | `ipc://`                | filesystem path of a unix socket |
//!
//! A receiver source adds a topic selector after the endpoint:
//! `address[?|??][;topic[>dest]]*`. An empty selector passes every topic
//! through unchanged except hidden ones, whose names start with `_` (such
//! as `_metrics`). `*` passes hidden topics too, as does naming one
//! explicitly. Several endpoints may be given in one string separated by
//! commas.

use crate::{domain::Topics, Error, Result};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// Topic name that matches every topic in a selector.
pub const WILDCARD: &str = "*";

/// Prefix of topics an empty selector leaves out.
pub const HIDDEN_PREFIX: char = '_';

/// Which transport an endpoint uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    Memory,
    Tcp,
    Ipc,
}

impl TransportKind {
    // ---
    fn from_scheme(scheme: &str) -> Option<Self> {
        match scheme {
            "memory" | "inproc" => Some(Self::Memory),
            "tcp" => Some(Self::Tcp),
            "ipc" => Some(Self::Ipc),
            _ => None,
        }
    }

    pub fn scheme(self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Tcp => "tcp",
            Self::Ipc => "ipc",
        }
    }
}

/// Whether the endpoint listens or dials out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Bind,
    Connect,
}

/// Delivery level a receiver endpoint requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Delivery {
    // ---
    /// Participates in the sender's join barrier and gets every envelope.
    Synced,
    /// Gets an envelope only when it asked for one. Never blocks the sender.
    Ephemeral,
    /// Never asks. Gets whatever is published while connected.
    DoublyEphemeral,
}

impl Delivery {
    // ---
    fn marker(self) -> &'static str {
        match self {
            Self::Synced => "",
            Self::Ephemeral => "?",
            Self::DoublyEphemeral => "??",
        }
    }

    /// True for levels that send requests upstream.
    pub fn requests(self) -> bool {
        !matches!(self, Self::DoublyEphemeral)
    }
}

/// A parsed transport endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub kind: TransportKind,
    pub address: String,
    pub role: Role,
    pub delivery: Delivery,
    pub balance: bool,
}

impl Endpoint {
    // ---
    /// Parse an endpoint a sender will listen on.
    pub fn bind(s: &str) -> Result<Self> {
        Self::parse(s, Role::Bind)
    }

    /// Parse an endpoint a receiver will dial.
    pub fn connect(s: &str) -> Result<Self> {
        Self::parse(s, Role::Connect)
    }

    pub fn parse(s: &str, role: Role) -> Result<Self> {
        // ---
        let invalid = |why: &str| Error::InvalidEndpoint(s.to_string(), why.to_string());
        let trimmed = s.trim();

        let (scheme, rest) = trimmed
            .split_once("://")
            .ok_or_else(|| invalid("expected scheme://address"))?;
        let kind = TransportKind::from_scheme(scheme).ok_or_else(|| invalid("unknown scheme"))?;

        let address = rest.trim_end_matches('?');
        let delivery = match rest.len() - address.len() {
            0 => Delivery::Synced,
            1 => Delivery::Ephemeral,
            2 => Delivery::DoublyEphemeral,
            _ => return Err(invalid("too many '?' markers")),
        };
        if address.is_empty() {
            return Err(invalid("empty address"));
        }

        let address = match kind {
            TransportKind::Tcp => normalize_tcp(address, role).map_err(invalid)?,
            _ => address.to_string(),
        };

        Ok(Self {
            kind,
            address,
            role,
            delivery,
            balance: false,
        })
    }

    pub fn with_balance(mut self, balance: bool) -> Self {
        self.balance = balance;
        self
    }

    /// `scheme://address` without delivery markers.
    pub fn uri(&self) -> String {
        format!("{}://{}", self.kind.scheme(), self.address)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.uri(), self.delivery.marker())
    }
}

fn normalize_tcp(address: &str, role: Role) -> std::result::Result<String, &'static str> {
    // ---
    let (host, port) = address.rsplit_once(':').ok_or("expected host:port")?;
    port.parse::<u16>().map_err(|_| "invalid port")?;

    match (host, role) {
        ("", _) => Err("empty host"),
        ("*", Role::Bind) => Ok(format!("0.0.0.0:{port}")),
        ("*", Role::Connect) => Err("cannot connect to wildcard host"),
        _ => Ok(address.to_string()),
    }
}

/// Split a comma-separated endpoint list, dropping empty entries.
pub fn split_list(s: &str) -> impl Iterator<Item = &str> {
    s.split(',').map(str::trim).filter(|part| !part.is_empty())
}

/// One topic mapping rule inside a selector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicRule {
    pub source: String,
    pub dest: Option<String>,
}

/// Which upstream topics a source keeps, and what they are renamed to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopicSelector {
    rules: Vec<TopicRule>,
}

impl TopicSelector {
    // ---
    /// Pass every topic through unchanged, hidden topics excepted.
    pub fn all() -> Self {
        Self::default()
    }

    /// Keep `source`, optionally renamed to `dest`.
    pub fn rule(mut self, source: impl Into<String>, dest: Option<&str>) -> Self {
        self.rules.push(TopicRule {
            source: source.into(),
            dest: dest.map(str::to_string),
        });
        self
    }

    pub fn rules(&self) -> &[TopicRule] {
        &self.rules
    }

    pub fn is_wildcard(&self) -> bool {
        self.rules.is_empty() || self.rules.iter().any(|r| r.source == WILDCARD && r.dest.is_none())
    }

    /// Parse `topic[>dest];topic[>dest]...`.
    pub fn parse(s: &str) -> Result<Self> {
        // ---
        let invalid = |why: &str| Error::InvalidEndpoint(s.to_string(), why.to_string());
        let mut selector = Self::all();

        for part in s.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            let (source, dest) = match part.split_once('>') {
                Some((source, dest)) => (source.trim(), Some(dest.trim())),
                None => (part, None),
            };
            if source.is_empty() || dest.is_some_and(str::is_empty) {
                return Err(invalid("empty topic name"));
            }
            if source == WILDCARD && dest.is_some() {
                return Err(invalid("wildcard topic cannot be renamed"));
            }
            selector = selector.rule(source, dest);
        }

        selector.validate().map_err(|_| invalid("two topics map to the same name"))?;
        Ok(selector)
    }

    /// Reject selectors whose rules map two topics onto one output name.
    pub fn validate(&self) -> Result<()> {
        // ---
        let mut seen = std::collections::HashSet::new();
        for rule in &self.rules {
            if rule.source == WILDCARD {
                continue;
            }
            let name = rule.dest.as_deref().unwrap_or(&rule.source);
            if !seen.insert(name) {
                return Err(Error::ConfigConflict(format!("topic {name:?} selected twice")));
            }
        }
        Ok(())
    }

    /// Apply the selector to an envelope's topics.
    ///
    /// Explicit rules win over the wildcard. A topic renamed by an explicit
    /// rule is not passed through under its old name as well.
    pub fn select(&self, topics: &Topics) -> Topics {
        // ---
        if self.rules.is_empty() {
            return topics
                .iter()
                .filter(|(name, _)| !name.starts_with(HIDDEN_PREFIX))
                .map(|(name, payload)| (name.clone(), payload.clone()))
                .collect();
        }

        let wildcard = self.is_wildcard();
        let mut out = Topics::new();

        for (name, payload) in topics {
            match self.rules.iter().find(|r| r.source == *name) {
                Some(rule) => {
                    let dest = rule.dest.clone().unwrap_or_else(|| name.clone());
                    out.insert(dest, payload.clone());
                }
                None if wildcard => {
                    out.entry(name.clone()).or_insert_with(|| payload.clone());
                }
                None => {}
            }
        }
        out
    }
}

impl fmt::Display for TopicSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // ---
        let parts: Vec<String> = self
            .rules
            .iter()
            .map(|r| match &r.dest {
                Some(dest) => format!("{}>{dest}", r.source),
                None => r.source.clone(),
            })
            .collect();
        write!(f, "{}", parts.join(";"))
    }
}

/// A receiver source: endpoint plus topic selector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Source {
    pub endpoint: Endpoint,
    pub selector: TopicSelector,
}

impl Source {
    // ---
    pub fn new(endpoint: Endpoint, selector: TopicSelector) -> Self {
        Self { endpoint, selector }
    }

    /// Parse a comma-separated list of sources.
    pub fn parse_list(s: &str) -> Result<Vec<Self>> {
        split_list(s).map(|part| part.parse::<Source>()).collect()
    }
}

impl FromStr for Source {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        // ---
        let (endpoint, selector) = match s.split_once(';') {
            Some((endpoint, selector)) => (endpoint, selector),
            None => (s, ""),
        };
        Ok(Self {
            endpoint: Endpoint::connect(endpoint)?,
            selector: TopicSelector::parse(selector)?,
        })
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // ---
        if self.selector.rules.is_empty() {
            write!(f, "{}", self.endpoint)
        } else {
            write!(f, "{};{}", self.endpoint, self.selector)
        }
    }
}
