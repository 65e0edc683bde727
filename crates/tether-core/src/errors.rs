//! Error types for Tether Core.

use thiserror::Error;

use tether_crypto::identity::IdentityError;
use tether_transport::TransportError;

use crate::config::ConfigError;
use crate::relay::RelayError;

/// Errors surfaced by the channel client and the protocol helpers.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// An operation needing the derived keypair ran before `start()` succeeded.
    #[error("identity not ready: client has not been started")]
    IdentityNotReady,

    #[error("invalid seed: {0}")]
    InvalidSeed(String),

    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),

    /// Login, room creation/join or publish was refused by a relay.
    #[error("transport rejected by {server}: {source}")]
    TransportRejected {
        server: String,
        #[source]
        source: TransportError,
    },

    /// Inbound payload that is not a well-formed envelope for us. Listeners drop
    /// these without invoking their callback.
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(&'static str),

    /// A cryptographic primitive failed on input that passed the length checks.
    #[error("crypto operation failed: {0}")]
    CryptoOperationFailure(String),

    #[error(transparent)]
    Relay(#[from] RelayError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl ChannelError {
    pub fn is_malformed(&self) -> bool {
        matches!(self, ChannelError::MalformedEnvelope(_))
    }

    pub(crate) fn crypto(e: impl std::fmt::Display) -> Self {
        ChannelError::CryptoOperationFailure(e.to_string())
    }
}

impl From<IdentityError> for ChannelError {
    fn from(e: IdentityError) -> Self {
        match e {
            IdentityError::InvalidSeed(reason) => ChannelError::InvalidSeed(reason.to_string()),
            other => ChannelError::InvalidPublicKey(other.to_string()),
        }
    }
}
