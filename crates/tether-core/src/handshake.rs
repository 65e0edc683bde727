//! Bootstrap channel-open handshake.
//!
//! The initiator seals its own public key (lowercase hex text) to the
//! recipient's public key and posts
//! `@channel-open:@<recipient id>:<relay>:<hex sealed payload>` in a room
//! shared with the recipient. Only the recipient can open it; the sender stays
//! anonymous to the relay.

use serde::{Deserialize, Serialize};
use tracing::debug;

use tether_crypto::hash::hex_hash;
use tether_crypto::identity::Identity;
use tether_crypto::sealed_box::{open_with_identity, seal_to_signing_key};
use tether_crypto::secretbox::MIN_ENVELOPE_LEN;
use tether_transport::RoomMessage;

use crate::errors::ChannelError;
use crate::relay::PeerAddress;

pub const CHANNEL_OPEN_PREFIX: &str = "@channel-open:";

/// Build the announcement of `identity` to `recipient_public_key` on `relay_server`.
///
/// Returns the recipient's address (where the room must be shared) and the
/// message body to publish there.
pub fn channel_open_body(
    identity: &Identity,
    recipient_public_key: &[u8; 32],
    relay_server: &str,
) -> Result<(PeerAddress, String), ChannelError> {
    let recipient = PeerAddress::new(hex_hash(recipient_public_key), relay_server);
    let sealed = seal_to_signing_key(identity.public_key_hex().as_bytes(), recipient_public_key)
        .map_err(ChannelError::crypto)?;
    let body = format!("{CHANNEL_OPEN_PREFIX}{recipient}:{}", hex::encode(sealed));
    Ok((recipient, body))
}

/// Prefix of announcements addressed to `identity`, independent of relay.
pub fn announcement_prefix(identity: &Identity) -> String {
    format!("{CHANNEL_OPEN_PREFIX}@{}", identity.identifier())
}

/// Try to read a channel-open announcement addressed to `identity`.
///
/// `Ok(None)` means the event is not an announcement for us. Any announcement
/// for us that cannot be decoded or opened is `MalformedEnvelope`.
pub fn open_channel_announcement(
    identity: &Identity,
    message: &RoomMessage,
) -> Result<Option<String>, ChannelError> {
    if !message.is_text() || !message.body.starts_with(&announcement_prefix(identity)) {
        return Ok(None);
    }

    let payload_hex = message
        .body
        .rsplit(':')
        .next()
        .ok_or(ChannelError::MalformedEnvelope("missing payload"))?;
    let payload = hex::decode(payload_hex)
        .map_err(|_| ChannelError::MalformedEnvelope("payload is not hex"))?;
    if payload.len() < MIN_ENVELOPE_LEN {
        return Err(ChannelError::MalformedEnvelope("payload too short"));
    }

    let opened = open_with_identity(&payload, identity).map_err(|e| {
        debug!(room = %message.room_id, "channel-open payload did not open: {}", e);
        ChannelError::MalformedEnvelope("sealed payload did not open")
    })?;
    let sender_public_key = String::from_utf8(opened)
        .map_err(|_| ChannelError::MalformedEnvelope("sealed payload is not text"))?;
    Ok(Some(sender_public_key))
}

/// Out-of-band pairing payload: what a peer needs to open a channel to us.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandshakeInfo {
    pub public_key: String,
    pub relay_server: String,
}

impl HandshakeInfo {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Render the JSON payload as an SVG QR code.
    #[cfg(feature = "qr")]
    pub fn to_qr_svg(&self) -> Result<String, ChannelError> {
        use qrcode::render::svg;
        use qrcode::QrCode;

        let json = self.to_json().map_err(ChannelError::crypto)?;
        let code = QrCode::new(json.as_bytes()).map_err(ChannelError::crypto)?;
        Ok(code
            .render::<svg::Color>()
            .min_dimensions(200, 200)
            .dark_color(svg::Color("#000000"))
            .light_color(svg::Color("#FFFFFF"))
            .build())
    }
}
