//! Anonymous-sender sealed boxes.
//!
//! Sealing uses a fresh ephemeral X25519 key, HKDF-SHA256 over the shared secret
//! (salted with both public keys) and XChaCha20-Poly1305. Output layout is
//! `ephemeral_pub(32) || ciphertext || tag(16)`. The recipient learns nothing
//! about who sealed the box.

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    Key, XChaCha20Poly1305, XNonce,
};
use hkdf::Hkdf;
use rand_core::OsRng;
use sha2::Sha256;
use x25519_dalek::{EphemeralSecret, PublicKey as X25519PublicKey};

use crate::identity::{exchange_public_key, ExchangeKeyPair, Identity};
use crate::secretbox::{NONCE_LEN, TAG_LEN};

pub const EPHEMERAL_PUB_LEN: usize = 32;
pub const SEAL_OVERHEAD: usize = EPHEMERAL_PUB_LEN + TAG_LEN;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SealError {
    #[error("sealed box too short: {0} bytes")]
    TooShort(usize),
    #[error("invalid recipient public key")]
    InvalidPublicKey,
    #[error("key derivation failed")]
    KeyDerivation,
    #[error("encryption failed")]
    EncryptFailed,
    #[error("decryption failed")]
    DecryptFailed,
}

fn kdf_key_nonce(
    shared_secret: &[u8; 32],
    eph_pub: &[u8; 32],
    recipient_pub: &[u8; 32],
) -> Result<([u8; 32], [u8; NONCE_LEN]), SealError> {
    let mut salt = [0u8; 64];
    salt[..32].copy_from_slice(eph_pub);
    salt[32..].copy_from_slice(recipient_pub);
    let hk = Hkdf::<Sha256>::new(Some(&salt), shared_secret);

    let mut key = [0u8; 32];
    hk.expand(b"tether_seal_v1_key", &mut key)
        .map_err(|_| SealError::KeyDerivation)?;
    let mut nonce = [0u8; NONCE_LEN];
    hk.expand(b"tether_seal_v1_nonce", &mut nonce)
        .map_err(|_| SealError::KeyDerivation)?;
    Ok((key, nonce))
}

/// Seal `plaintext` to an X25519 public key.
pub fn seal(plaintext: &[u8], recipient_kex_pub: &[u8; 32]) -> Result<Vec<u8>, SealError> {
    let eph = EphemeralSecret::random_from_rng(OsRng);
    let eph_pub = X25519PublicKey::from(&eph).to_bytes();

    let shared = eph.diffie_hellman(&X25519PublicKey::from(*recipient_kex_pub));
    if !shared.was_contributory() {
        return Err(SealError::InvalidPublicKey);
    }

    let (key, nonce) = kdf_key_nonce(shared.as_bytes(), &eph_pub, recipient_kex_pub)?;
    let ct = XChaCha20Poly1305::new(Key::from_slice(&key))
        .encrypt(XNonce::from_slice(&nonce), plaintext)
        .map_err(|_| SealError::EncryptFailed)?;

    let mut out = Vec::with_capacity(EPHEMERAL_PUB_LEN + ct.len());
    out.extend_from_slice(&eph_pub);
    out.extend_from_slice(&ct);
    Ok(out)
}

/// Open a sealed box with the recipient's X25519 keypair.
pub fn open(sealed: &[u8], recipient: &ExchangeKeyPair) -> Result<Vec<u8>, SealError> {
    if sealed.len() < SEAL_OVERHEAD {
        return Err(SealError::TooShort(sealed.len()));
    }
    let (eph_bytes, ct) = sealed.split_at(EPHEMERAL_PUB_LEN);
    let eph_pub: [u8; 32] = eph_bytes
        .try_into()
        .map_err(|_| SealError::TooShort(sealed.len()))?;

    let shared = recipient
        .secret
        .diffie_hellman(&X25519PublicKey::from(eph_pub));
    if !shared.was_contributory() {
        return Err(SealError::DecryptFailed);
    }

    let (key, nonce) = kdf_key_nonce(shared.as_bytes(), &eph_pub, &recipient.public)?;
    XChaCha20Poly1305::new(Key::from_slice(&key))
        .decrypt(XNonce::from_slice(&nonce), ct)
        .map_err(|_| SealError::DecryptFailed)
}

/// Seal to a peer identified by its Ed25519 public key.
pub fn seal_to_signing_key(
    plaintext: &[u8],
    recipient_sign_pub: &[u8; 32],
) -> Result<Vec<u8>, SealError> {
    let kex_pub =
        exchange_public_key(recipient_sign_pub).map_err(|_| SealError::InvalidPublicKey)?;
    seal(plaintext, &kex_pub)
}

/// Open a box sealed to `identity`'s public key.
pub fn open_with_identity(sealed: &[u8], identity: &Identity) -> Result<Vec<u8>, SealError> {
    open(sealed, &identity.exchange_keypair())
}
