//! Session message framing.
//!
//! A session payload is `hex(nonce || ciphertext || tag)` under the sender's
//! `tx` key. The receiver derives keys in the server role and opens with `rx`.

use tether_crypto::hash::hex_hash;
use tether_crypto::secretbox::{self, SecretBoxError, MIN_ENVELOPE_LEN};
use tether_crypto::session_keys::SessionKeys;
use tether_transport::RoomMessage;

use crate::errors::ChannelError;

/// Frame `message` for the wire under `keys.tx`.
pub fn encrypt_message(message: &str, keys: &SessionKeys) -> Result<String, ChannelError> {
    let envelope = secretbox::encrypt(message.as_bytes(), &keys.tx).map_err(ChannelError::crypto)?;
    Ok(hex::encode(envelope))
}

/// Relay user-id prefix of the participant holding `public_key`.
pub fn sender_prefix(public_key: &[u8; 32]) -> String {
    format!("@{}", hex_hash(public_key))
}

/// Decode a wire body into raw envelope bytes, enforcing the length guard.
pub fn decode_envelope(body: &str) -> Result<Vec<u8>, ChannelError> {
    let envelope =
        hex::decode(body).map_err(|_| ChannelError::MalformedEnvelope("payload is not hex"))?;
    if envelope.len() < MIN_ENVELOPE_LEN {
        return Err(ChannelError::MalformedEnvelope("payload too short"));
    }
    Ok(envelope)
}

/// Try to read `message` as a session payload from the sender with `prefix`.
///
/// `Ok(None)` when the event is not from that sender or not text.
/// `MalformedEnvelope` for bodies failing decode or the length guard.
/// `CryptoOperationFailure` when authentication fails on a well-formed envelope.
pub fn open_message(
    message: &RoomMessage,
    prefix: &str,
    keys: &SessionKeys,
) -> Result<Option<String>, ChannelError> {
    if !message.is_text() || !message.sender.starts_with(prefix) {
        return Ok(None);
    }

    let envelope = decode_envelope(&message.body)?;
    let plaintext = secretbox::decrypt(&envelope, &keys.rx).map_err(|e| match e {
        SecretBoxError::TooShort(_) => ChannelError::MalformedEnvelope("payload too short"),
        other => ChannelError::crypto(other),
    })?;
    String::from_utf8(plaintext)
        .map(Some)
        .map_err(|_| ChannelError::MalformedEnvelope("plaintext is not text"))
}
