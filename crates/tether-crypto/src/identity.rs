//! Identity module for seed-derived keypair management.
//!
//! A single Ed25519 keypair is derived from a secret seed. The same keypair is
//! converted to X25519 form whenever a Diffie-Hellman exchange is needed, so a
//! peer only ever has to learn one public key.

use std::fmt;

use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use x25519_dalek::StaticSecret;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::hash::{derive_id, sha256};

/// Error type for identity operations.
#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("invalid seed: {0}")]
    InvalidSeed(&'static str),
    #[error("invalid key length: expected {expected}, got {got}")]
    InvalidKeyLength { expected: usize, got: usize },
    #[error("invalid hex encoding")]
    InvalidHex,
    #[error("invalid public key")]
    InvalidPublicKey,
    #[error("invalid signature")]
    InvalidSignature,
}

/// A cryptographic identity derived from a secret seed.
///
/// Key material is zeroized when the Identity is dropped.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct Identity {
    #[zeroize(skip)] // SigningKey implements ZeroizeOnDrop internally
    sign_key: SigningKey,
}

/// X25519 form of an identity's keypair.
pub struct ExchangeKeyPair {
    pub secret: StaticSecret,
    pub public: [u8; 32],
}

impl Identity {
    /// Derive an identity from a seed string.
    ///
    /// The seed is hashed to 32 bytes which become the Ed25519 secret seed, so
    /// any two calls with the same seed yield the same keypair.
    pub fn from_seed(seed: &str) -> Result<Self, IdentityError> {
        if seed.is_empty() {
            return Err(IdentityError::InvalidSeed("seed must not be empty"));
        }
        let mut seed_bytes = sha256(seed.as_bytes());
        let identity = Self::from_seed_bytes(&seed_bytes);
        seed_bytes.zeroize();
        Ok(identity)
    }

    /// Create an identity from a raw 32-byte Ed25519 seed.
    pub fn from_seed_bytes(seed: &[u8; 32]) -> Self {
        Self {
            sign_key: SigningKey::from_bytes(seed),
        }
    }

    /// Ed25519 public key bytes.
    pub fn public_key(&self) -> [u8; 32] {
        self.sign_key.verifying_key().to_bytes()
    }

    pub fn public_key_hex(&self) -> String {
        hex::encode(self.public_key())
    }

    /// ID = SHA-256(public_key)
    pub fn id(&self) -> [u8; 32] {
        derive_id(&self.public_key())
    }

    /// Lowercase hex of [`Identity::id`]; the login name and address local part on a relay.
    pub fn identifier(&self) -> String {
        hex::encode(self.id())
    }

    /// Sign a message using Ed25519.
    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        let signature: Signature = self.sign_key.sign(message);
        signature.to_bytes()
    }

    /// Convert the signing keypair to its X25519 form.
    ///
    /// The secret is the unclamped Ed25519 scalar; x25519-dalek clamps it on use,
    /// which yields the same scalar the Ed25519 public key was built from.
    pub fn exchange_keypair(&self) -> ExchangeKeyPair {
        ExchangeKeyPair {
            secret: StaticSecret::from(self.sign_key.to_scalar_bytes()),
            public: self.sign_key.verifying_key().to_montgomery().to_bytes(),
        }
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("identifier", &self.identifier())
            .finish_non_exhaustive()
    }
}

/// Convert a peer's Ed25519 public key to its X25519 public key.
pub fn exchange_public_key(sign_pub: &[u8; 32]) -> Result<[u8; 32], IdentityError> {
    let vk = VerifyingKey::from_bytes(sign_pub).map_err(|_| IdentityError::InvalidPublicKey)?;
    Ok(vk.to_montgomery().to_bytes())
}

/// Parse a hex-encoded Ed25519 public key, rejecting bytes that are not a curve point.
pub fn parse_public_key_hex(public_key_hex: &str) -> Result<[u8; 32], IdentityError> {
    let bytes = hex::decode(public_key_hex.trim()).map_err(|_| IdentityError::InvalidHex)?;
    let key: [u8; 32] = bytes
        .as_slice()
        .try_into()
        .map_err(|_| IdentityError::InvalidKeyLength {
            expected: 32,
            got: bytes.len(),
        })?;
    VerifyingKey::from_bytes(&key).map_err(|_| IdentityError::InvalidPublicKey)?;
    Ok(key)
}

/// Verify an Ed25519 signature.
pub fn verify_signature(
    pub_key: &[u8; 32],
    message: &[u8],
    signature: &[u8; 64],
) -> Result<(), IdentityError> {
    let verifying_key =
        VerifyingKey::from_bytes(pub_key).map_err(|_| IdentityError::InvalidPublicKey)?;
    let sig = Signature::from_bytes(signature);
    verifying_key
        .verify_strict(message, &sig)
        .map_err(|_| IdentityError::InvalidSignature)
}
