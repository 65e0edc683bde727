//! Authenticated secret-key framing for session payloads.
//!
//! Wire layout: `nonce(24) || ciphertext || tag(16)` using XChaCha20-Poly1305
//! with a fresh random nonce per message.

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    Key, XChaCha20Poly1305, XNonce,
};

pub const NONCE_LEN: usize = 24;
pub const TAG_LEN: usize = 16;
/// Smallest byte length a well-formed envelope can have.
pub const MIN_ENVELOPE_LEN: usize = NONCE_LEN + TAG_LEN;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SecretBoxError {
    #[error("envelope too short: {0} bytes")]
    TooShort(usize),
    #[error("decryption failed")]
    DecryptionFailed,
    #[error("encryption failed")]
    EncryptionFailed,
    #[error("RNG failed")]
    RngError,
}

/// Encrypt under `key`. Returns `nonce || ciphertext || tag`.
pub fn encrypt(plaintext: &[u8], key: &[u8; 32]) -> Result<Vec<u8>, SecretBoxError> {
    let mut nonce = [0u8; NONCE_LEN];
    getrandom::getrandom(&mut nonce).map_err(|_| SecretBoxError::RngError)?;

    let cipher = XChaCha20Poly1305::new(Key::from_slice(key));
    let ct = cipher
        .encrypt(XNonce::from_slice(&nonce), plaintext)
        .map_err(|_| SecretBoxError::EncryptionFailed)?;

    let mut out = Vec::with_capacity(NONCE_LEN + ct.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ct);
    Ok(out)
}

/// Decrypt `nonce || ciphertext || tag` under `key`.
pub fn decrypt(envelope: &[u8], key: &[u8; 32]) -> Result<Vec<u8>, SecretBoxError> {
    if envelope.len() < MIN_ENVELOPE_LEN {
        return Err(SecretBoxError::TooShort(envelope.len()));
    }
    let (nonce, ct) = envelope.split_at(NONCE_LEN);
    let cipher = XChaCha20Poly1305::new(Key::from_slice(key));
    cipher
        .decrypt(XNonce::from_slice(nonce), ct)
        .map_err(|_| SecretBoxError::DecryptionFailed)
}
