//! Test harness for Tether Core.
//!
//! Helpers to stand up clients on a [`MemoryRelayNetwork`] and collect what
//! their listeners deliver.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use tether_crypto::login::{verify_login_credential, LoginCredential, LOGIN_WINDOW_SECS};
use tether_transport::MemoryRelayNetwork;

use crate::client::{unix_now, ChannelClient};
use crate::config::ClientConfig;
use crate::errors::ChannelError;

/// Relay names used by tests.
pub fn test_relays() -> Vec<String> {
    vec![
        "relay-a.test".to_string(),
        "relay-b.test".to_string(),
        "relay-c.test".to_string(),
        "relay-d.test".to_string(),
    ]
}

/// A network whose relays verify login credentials the way a real relay
/// would. The previous window is accepted too, for logins made across a
/// window boundary.
pub fn authenticating_network() -> MemoryRelayNetwork {
    MemoryRelayNetwork::new().with_authenticator(|credentials| {
        let credential = LoginCredential {
            user: credentials.user.clone(),
            password: credentials.password.clone(),
        };
        let now = unix_now();
        verify_login_credential(&credential, now).is_ok()
            || verify_login_credential(&credential, now.saturating_sub(LOGIN_WINDOW_SECS)).is_ok()
    })
}

/// Build and start a client on `network`.
pub async fn start_memory_client(
    network: &MemoryRelayNetwork,
    name: &str,
    seed: &str,
    replication_count: usize,
    relay_servers: Vec<String>,
) -> Result<ChannelClient, ChannelError> {
    let config = ClientConfig::new(name, seed)
        .with_replication_count(replication_count)
        .with_relay_servers(relay_servers)
        .with_debug(true);
    let mut client = ChannelClient::new(config, Arc::new(network.clone()))?;
    client.start().await?;
    Ok(client)
}

/// Drain `rx` until nothing arrives for `idle`.
pub async fn collect_until_idle<T>(rx: &mut mpsc::UnboundedReceiver<T>, idle: Duration) -> Vec<T> {
    let mut items = Vec::new();
    while let Ok(Some(item)) = tokio::time::timeout(idle, rx.recv()).await {
        items.push(item);
    }
    items
}
