//! Deterministic relay selection.
//!
//! Every party that knows a target's identifier picks the same relay for a
//! given replica index without talking to anyone: each candidate `r` scores
//! `|int(target) - int(sha256(r || replica))|` and the lowest score wins, ties
//! going to the candidate listed first.

// construct_uint! expands to code clippy flags
#![allow(clippy::manual_div_ceil)]
#![allow(clippy::assign_op_pattern)]

use std::fmt;

use thiserror::Error;
use uint::construct_uint;

use tether_crypto::hash::sha256;

construct_uint! {
    /// 256-bit unsigned integer for hash distances.
    pub struct U256(4);
}

/// Relays used when the configuration does not name any.
pub const DEFAULT_RELAY_SERVERS: &[&str] = &[
    "matrix.papers.tech",
    "matrix.tez.ie",
    "matrix-dev.papers.tech",
    "matrix.stove-labs.com",
    "yadayada.cryptonomic-infra.tech",
];

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RelayError {
    #[error("relay server list is empty")]
    NoRelayServers,
    #[error("invalid target hash: {0}")]
    InvalidTargetHash(String),
}

/// Participant address of an identifier on a relay: `@<identifier>:<relay>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerAddress {
    pub identifier: String,
    pub relay_server: String,
}

impl PeerAddress {
    pub fn new(identifier: impl Into<String>, relay_server: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            relay_server: relay_server.into(),
        }
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}:{}", self.identifier, self.relay_server)
    }
}

/// Fixed, ordered set of candidate relays.
#[derive(Debug, Clone)]
pub struct RelaySelector {
    servers: Vec<String>,
}

impl Default for RelaySelector {
    fn default() -> Self {
        Self {
            servers: DEFAULT_RELAY_SERVERS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl RelaySelector {
    pub fn new(servers: Vec<String>) -> Result<Self, RelayError> {
        if servers.is_empty() {
            return Err(RelayError::NoRelayServers);
        }
        Ok(Self { servers })
    }

    pub fn servers(&self) -> &[String] {
        &self.servers
    }

    /// Pick the relay for `target_hash_hex` (a hex-encoded digest) and `replica`.
    pub fn select(&self, target_hash_hex: &str, replica: usize) -> Result<&str, RelayError> {
        let target = parse_target(target_hash_hex)?;

        let mut best: Option<(&str, U256)> = None;
        for server in &self.servers {
            let score = distance(target, relay_point(server, replica));
            match best {
                // strict: the earlier candidate keeps ties
                Some((_, best_score)) if score >= best_score => {}
                _ => best = Some((server.as_str(), score)),
            }
        }
        best.map(|(server, _)| server).ok_or(RelayError::NoRelayServers)
    }
}

fn parse_target(target_hash_hex: &str) -> Result<U256, RelayError> {
    let bytes = hex::decode(target_hash_hex)
        .map_err(|e| RelayError::InvalidTargetHash(e.to_string()))?;
    if bytes.is_empty() || bytes.len() > 32 {
        return Err(RelayError::InvalidTargetHash(format!(
            "expected 1..=32 bytes, got {}",
            bytes.len()
        )));
    }
    Ok(U256::from_big_endian(&bytes))
}

/// Position of `server` on the ring for `replica`.
pub(crate) fn relay_point(server: &str, replica: usize) -> U256 {
    U256::from_big_endian(&sha256(format!("{server}{replica}").as_bytes()))
}

pub(crate) fn distance(a: U256, b: U256) -> U256 {
    if a > b {
        a - b
    } else {
        b - a
    }
}
