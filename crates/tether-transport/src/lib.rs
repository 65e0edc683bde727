//! Relay transport abstractions for Tether.
//!
//! The core only needs a narrow capability from a chat-room relay: log in, find
//! or create a room shared with a participant, publish a text body, and receive
//! a stream of room events. [`RelayTransport`] and [`RelayConnector`] describe
//! that capability; [`testing`] provides an in-memory federated relay network
//! and [`matrix`] a Matrix client-server adapter.

pub mod traits;
pub mod testing;

#[cfg(feature = "matrix")]
pub mod matrix;

pub use traits::*;
pub use testing::*;
