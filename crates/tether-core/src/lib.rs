//! Tether Core - pairing and secure channels over federated chat relays.
//!
//! This crate implements:
//! - Deterministic relay selection (rendezvous hashing over a fixed relay list)
//! - The bootstrap channel-open handshake (sealed announcements)
//! - Encrypted session messaging with directional keys
//! - The replicated channel client tying them to relay transports
//! - Client configuration

#![forbid(unsafe_code)]

// Protocol
pub mod relay;
pub mod handshake;
pub mod messaging;

// Client
pub mod client;
pub mod config;

// Supporting modules
pub mod errors;
pub mod harness;

pub use client::ChannelClient;
pub use config::ClientConfig;
pub use errors::ChannelError;
pub use handshake::HandshakeInfo;
