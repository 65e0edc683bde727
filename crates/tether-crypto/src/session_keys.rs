//! Directional session keys from a converted Diffie-Hellman exchange.
//!
//! Both parties convert their Ed25519 keypairs to X25519 and run one DH. The
//! shared secret is expanded with HKDF-SHA256, salted with
//! `client_pub || server_pub`, into 64 bytes split into two halves:
//!
//! | role   | rx          | tx          |
//! |--------|-------------|-------------|
//! | client | first half  | second half |
//! | server | second half | first half  |
//!
//! so `client.tx == server.rx` and `client.rx == server.tx`. The sender of a
//! message always takes the client role, the listener for that sender the
//! server role.

use hkdf::Hkdf;
use sha2::Sha256;
use x25519_dalek::PublicKey as X25519PublicKey;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::identity::{exchange_public_key, Identity};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SessionKeyError {
    #[error("invalid peer public key")]
    InvalidPublicKey,
    #[error("key derivation failed")]
    KeyDerivation,
}

/// Which half of the exchange the local party computes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionRole {
    /// Sending side of a direction.
    Client,
    /// Listening side of a direction.
    Server,
}

#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SessionKeys {
    pub rx: [u8; 32],
    pub tx: [u8; 32],
}

impl SessionKeys {
    /// Derive keys for `identity` talking to the peer with Ed25519 key `peer_sign_pub`.
    pub fn derive(
        identity: &Identity,
        peer_sign_pub: &[u8; 32],
        role: SessionRole,
    ) -> Result<Self, SessionKeyError> {
        let local = identity.exchange_keypair();
        let remote_pub =
            exchange_public_key(peer_sign_pub).map_err(|_| SessionKeyError::InvalidPublicKey)?;

        let shared = local
            .secret
            .diffie_hellman(&X25519PublicKey::from(remote_pub));
        if !shared.was_contributory() {
            return Err(SessionKeyError::InvalidPublicKey);
        }

        let (client_pub, server_pub) = match role {
            SessionRole::Client => (&local.public, &remote_pub),
            SessionRole::Server => (&remote_pub, &local.public),
        };
        let mut salt = [0u8; 64];
        salt[..32].copy_from_slice(client_pub);
        salt[32..].copy_from_slice(server_pub);

        let hk = Hkdf::<Sha256>::new(Some(&salt), shared.as_bytes());
        let mut okm = [0u8; 64];
        hk.expand(b"tether_kx_v1", &mut okm)
            .map_err(|_| SessionKeyError::KeyDerivation)?;

        let mut first = [0u8; 32];
        let mut second = [0u8; 32];
        first.copy_from_slice(&okm[..32]);
        second.copy_from_slice(&okm[32..]);
        okm.zeroize();

        Ok(match role {
            SessionRole::Client => Self { rx: first, tx: second },
            SessionRole::Server => Self { rx: second, tx: first },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secretbox;

    #[test]
    fn test_client_tx_matches_server_rx() {
        let x = Identity::from_seed("x").unwrap();
        let y = Identity::from_seed("y").unwrap();

        let sender = SessionKeys::derive(&x, &y.public_key(), SessionRole::Client).unwrap();
        let listener = SessionKeys::derive(&y, &x.public_key(), SessionRole::Server).unwrap();

        assert_eq!(sender.tx, listener.rx);
        assert_eq!(sender.rx, listener.tx);
        assert_ne!(sender.tx, sender.rx);
    }

    #[test]
    fn test_swapped_roles_do_not_match() {
        let x = Identity::from_seed("x").unwrap();
        let y = Identity::from_seed("y").unwrap();

        let a = SessionKeys::derive(&x, &y.public_key(), SessionRole::Client).unwrap();
        let b = SessionKeys::derive(&y, &x.public_key(), SessionRole::Client).unwrap();

        assert_ne!(a.tx, b.rx);
    }

    #[test]
    fn test_directions_are_independent() {
        let x = Identity::from_seed("x").unwrap();
        let y = Identity::from_seed("y").unwrap();

        let x_sends = SessionKeys::derive(&x, &y.public_key(), SessionRole::Client).unwrap();
        let y_sends = SessionKeys::derive(&y, &x.public_key(), SessionRole::Client).unwrap();
        assert_ne!(x_sends.tx, y_sends.tx);
    }

    #[test]
    fn test_message_round_trip() {
        let x = Identity::from_seed("x").unwrap();
        let y = Identity::from_seed("y").unwrap();

        let sender = SessionKeys::derive(&x, &y.public_key(), SessionRole::Client).unwrap();
        let listener = SessionKeys::derive(&y, &x.public_key(), SessionRole::Server).unwrap();

        let envelope = secretbox::encrypt(b"hello", &sender.tx).unwrap();
        assert_eq!(secretbox::decrypt(&envelope, &listener.rx).unwrap(), b"hello");
    }

    #[test]
    fn test_invalid_peer_key() {
        let x = Identity::from_seed("x").unwrap();
        // Edwards identity point: small order, converts to u = 0
        let mut bad = [0u8; 32];
        bad[0] = 1;
        assert_eq!(
            SessionKeys::derive(&x, &bad, SessionRole::Client).err(),
            Some(SessionKeyError::InvalidPublicKey)
        );
    }
}
