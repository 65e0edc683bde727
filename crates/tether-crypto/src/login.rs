//! Time-bucketed login credentials.
//!
//! A relay login secret is a signature over `sha256("login:" || bucket)` where
//! `bucket = floor(unix_seconds / 300)`. Anyone holding the seed can mint a fresh
//! credential; a captured one is only useful until its bucket rolls over.

use crate::hash::{derive_id, sha256};
use crate::identity::{verify_signature, Identity};

/// Width of one credential window in seconds.
pub const LOGIN_WINDOW_SECS: u64 = 300;

const SECRET_PREFIX: &str = "ed";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum LoginError {
    #[error("malformed login secret")]
    Malformed,
    #[error("login name does not match public key")]
    UserMismatch,
    #[error("signature does not verify for the current window")]
    BadSignature,
}

/// Credential handed to a relay: the identifier as user name plus the signed secret.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoginCredential {
    pub user: String,
    pub password: String,
}

/// Window index for a unix timestamp.
pub fn login_bucket(now_unix: u64) -> u64 {
    now_unix / LOGIN_WINDOW_SECS
}

fn login_digest(bucket: u64) -> [u8; 32] {
    sha256(format!("login:{bucket}").as_bytes())
}

/// Build the credential valid for the window containing `now_unix`.
pub fn build_login_credential(identity: &Identity, now_unix: u64) -> LoginCredential {
    let signature = identity.sign(&login_digest(login_bucket(now_unix)));
    LoginCredential {
        user: identity.identifier(),
        password: format!(
            "{SECRET_PREFIX}:{}:{}",
            hex::encode(signature),
            identity.public_key_hex()
        ),
    }
}

/// Relay-side check of a credential against the window containing `now_unix`.
pub fn verify_login_credential(
    credential: &LoginCredential,
    now_unix: u64,
) -> Result<(), LoginError> {
    let mut parts = credential.password.split(':');
    let (Some(SECRET_PREFIX), Some(sig_hex), Some(pub_hex), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(LoginError::Malformed);
    };

    let signature: [u8; 64] = hex::decode(sig_hex)
        .ok()
        .and_then(|b| b.try_into().ok())
        .ok_or(LoginError::Malformed)?;
    let public_key: [u8; 32] = hex::decode(pub_hex)
        .ok()
        .and_then(|b| b.try_into().ok())
        .ok_or(LoginError::Malformed)?;

    if credential.user != hex::encode(derive_id(&public_key)) {
        return Err(LoginError::UserMismatch);
    }

    verify_signature(&public_key, &login_digest(login_bucket(now_unix)), &signature)
        .map_err(|_| LoginError::BadSignature)
}
