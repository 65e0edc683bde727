//! Replicated channel client.
//!
//! One identity is logged in to `replication_count` relays at once, each
//! chosen by [`RelaySelector`] from the identity's own identifier. Sends fan
//! out over every connection and every replica relay of the recipient, so the
//! recipient may see the same payload more than once.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use tether_crypto::hash::hex_hash;
use tether_crypto::identity::{parse_public_key_hex, Identity};
use tether_crypto::login::build_login_credential;
use tether_crypto::session_keys::{SessionKeys, SessionRole};
use tether_transport::{
    Credentials, RelayConnector, RelayEvent, RelayTransport, RoomMessage, TransportError,
};

use crate::config::ClientConfig;
use crate::errors::ChannelError;
use crate::handshake::{channel_open_body, open_channel_announcement, HandshakeInfo};
use crate::messaging::{encrypt_message, open_message, sender_prefix};
use crate::relay::{PeerAddress, RelaySelector};

/// One logged-in relay session plus its invitation auto-join task.
pub struct Connection {
    transport: Arc<dyn RelayTransport>,
    auto_join: JoinHandle<()>,
}

impl Connection {
    pub fn server(&self) -> &str {
        self.transport.server()
    }

    pub fn user_id(&self) -> &str {
        self.transport.user_id()
    }

    fn rejected(&self, source: TransportError) -> ChannelError {
        ChannelError::TransportRejected {
            server: self.server().to_string(),
            source,
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.auto_join.abort();
    }
}

struct Started {
    identity: Arc<Identity>,
    connections: Vec<Connection>,
    listeners: Mutex<Vec<JoinHandle<()>>>,
}

impl Drop for Started {
    fn drop(&mut self) {
        for task in self.listeners.lock().drain(..) {
            task.abort();
        }
    }
}

enum ClientState {
    Uninitialized,
    Started(Started),
}

pub struct ChannelClient {
    config: ClientConfig,
    selector: RelaySelector,
    connector: Arc<dyn RelayConnector>,
    state: ClientState,
}

impl ChannelClient {
    pub fn new(
        config: ClientConfig,
        connector: Arc<dyn RelayConnector>,
    ) -> Result<Self, ChannelError> {
        config.validate()?;
        let selector = RelaySelector::new(config.relay_servers.clone())?;
        Ok(Self {
            config,
            selector,
            connector,
            state: ClientState::Uninitialized,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn is_started(&self) -> bool {
        matches!(self.state, ClientState::Started(_))
    }

    /// Derive the identity and log in to one relay per replica index.
    ///
    /// Connections are made in replica order. If any of them fails the client
    /// stays uninitialized and the connections made so far are dropped.
    pub async fn start(&mut self) -> Result<(), ChannelError> {
        if self.is_started() {
            warn!(client = %self.config.name, "start() called on a started client");
            return Ok(());
        }

        let identity = Arc::new(Identity::from_seed(&self.config.seed)?);
        let identifier = identity.identifier();
        let login = build_login_credential(&identity, unix_now());
        let credentials = Credentials {
            user: login.user.clone(),
            password: login.password.clone(),
        };

        let mut connections = Vec::with_capacity(self.config.replication_count);
        for replica in 0..self.config.replication_count {
            let server = self.selector.select(&identifier, replica)?;
            let transport = self
                .connector
                .connect(server, &credentials)
                .await
                .map_err(|source| ChannelError::TransportRejected {
                    server: server.to_string(),
                    source,
                })?;
            let connection = self.auto_join(transport).await?;
            info!(
                client = %self.config.name,
                replica,
                server = %connection.server(),
                user_id = %connection.user_id(),
                "relay connection established"
            );
            connections.push(connection);
        }

        self.state = ClientState::Started(Started {
            identity,
            connections,
            listeners: Mutex::new(Vec::new()),
        });
        Ok(())
    }

    /// Own Ed25519 public key as lowercase hex.
    pub fn public_key(&self) -> Result<String, ChannelError> {
        Ok(self.started()?.identity.public_key_hex())
    }

    /// Own identifier, the local part of every own relay address.
    pub fn identifier(&self) -> Result<String, ChannelError> {
        Ok(self.started()?.identity.identifier())
    }

    /// Relay the holder of `public_key_hex` uses for `replica`.
    pub fn relay_server_for(
        &self,
        public_key_hex: &str,
        replica: usize,
    ) -> Result<String, ChannelError> {
        let public_key = parse_public_key_hex(public_key_hex)?;
        Ok(self
            .selector
            .select(&hex_hash(&public_key), replica)?
            .to_string())
    }

    /// Pairing payload a peer needs to open a channel to us.
    pub fn handshake_info(&self) -> Result<HandshakeInfo, ChannelError> {
        let identity = &self.started()?.identity;
        let relay_server = self.selector.select(&identity.identifier(), 0)?.to_string();
        Ok(HandshakeInfo {
            public_key: identity.public_key_hex(),
            relay_server,
        })
    }

    /// `(server, user_id)` of every live connection. Empty before `start()`.
    pub fn connections(&self) -> Vec<(String, String)> {
        match &self.state {
            ClientState::Uninitialized => Vec::new(),
            ClientState::Started(started) => started
                .connections
                .iter()
                .map(|c| (c.server().to_string(), c.user_id().to_string()))
                .collect(),
        }
    }

    /// Announce ourselves to `recipient_public_key_hex` on `relay_server`.
    pub async fn open_channel(
        &self,
        recipient_public_key_hex: &str,
        relay_server: &str,
    ) -> Result<(), ChannelError> {
        let started = self.started()?;
        let recipient = parse_public_key_hex(recipient_public_key_hex)?;
        let (address, body) = channel_open_body(&started.identity, &recipient, relay_server)?;

        self.log_debug(|| format!("opening channel to {address}"));
        self.fan_out(started, &[address], &body).await
    }

    /// Invoke `callback` with the sender public key of every announcement
    /// addressed to us, on every connection.
    pub async fn listen_for_channel_opening<F>(&self, callback: F) -> Result<(), ChannelError>
    where
        F: Fn(String) + Send + Sync + 'static,
    {
        let started = self.started()?;
        let callback = Arc::new(callback);
        let debug = self.config.debug;

        for connection in &started.connections {
            let identity = started.identity.clone();
            let callback = callback.clone();
            let task = spawn_listener(connection, move |message| {
                match open_channel_announcement(&identity, &message) {
                    Ok(Some(sender_public_key)) => callback(sender_public_key),
                    Ok(None) => {}
                    Err(e) => {
                        if debug {
                            debug!(room = %message.room_id, "dropping channel-open: {}", e);
                        }
                    }
                }
            });
            started.listeners.lock().push(task);
        }
        Ok(())
    }

    /// Invoke `callback` for every session payload from `sender_public_key_hex`.
    ///
    /// Payloads that fail to decode or are too short are dropped. Payloads that
    /// fail authentication reach the callback as `Err`.
    pub async fn listen_for_encrypted_message<F>(
        &self,
        sender_public_key_hex: &str,
        callback: F,
    ) -> Result<(), ChannelError>
    where
        F: Fn(Result<String, ChannelError>) + Send + Sync + 'static,
    {
        let started = self.started()?;
        let sender = parse_public_key_hex(sender_public_key_hex)?;
        let keys = Arc::new(
            SessionKeys::derive(&started.identity, &sender, SessionRole::Server)
                .map_err(|e| ChannelError::InvalidPublicKey(e.to_string()))?,
        );
        let prefix = Arc::new(sender_prefix(&sender));
        let callback = Arc::new(callback);
        let debug = self.config.debug;

        for connection in &started.connections {
            let keys = keys.clone();
            let prefix = prefix.clone();
            let callback = callback.clone();
            let task = spawn_listener(connection, move |message| {
                match open_message(&message, &prefix, &keys) {
                    Ok(Some(plaintext)) => callback(Ok(plaintext)),
                    Ok(None) => {}
                    Err(e) if e.is_malformed() => {
                        if debug {
                            debug!(room = %message.room_id, "dropping message: {}", e);
                        }
                    }
                    Err(e) => callback(Err(e)),
                }
            });
            started.listeners.lock().push(task);
        }
        Ok(())
    }

    /// Encrypt `message` for `recipient_public_key_hex` and publish it on every
    /// (connection, recipient replica relay) pair.
    ///
    /// Succeeds when at least one publish succeeded.
    pub async fn send_message(
        &self,
        recipient_public_key_hex: &str,
        message: &str,
    ) -> Result<(), ChannelError> {
        let started = self.started()?;
        let recipient = parse_public_key_hex(recipient_public_key_hex)?;
        let keys = SessionKeys::derive(&started.identity, &recipient, SessionRole::Client)
            .map_err(|e| ChannelError::InvalidPublicKey(e.to_string()))?;
        let body = encrypt_message(message, &keys)?;

        let recipient_id = hex_hash(&recipient);
        let addresses = (0..self.config.replication_count)
            .map(|replica| {
                let relay = self.selector.select(&recipient_id, replica)?;
                Ok(PeerAddress::new(recipient_id.clone(), relay))
            })
            .collect::<Result<Vec<_>, ChannelError>>()?;

        self.fan_out(started, &addresses, &body).await
    }

    fn started(&self) -> Result<&Started, ChannelError> {
        match &self.state {
            ClientState::Started(started) => Ok(started),
            ClientState::Uninitialized => Err(ChannelError::IdentityNotReady),
        }
    }

    fn log_debug(&self, line: impl FnOnce() -> String) {
        if self.config.debug {
            debug!(client = %self.config.name, "{}", line());
        }
    }

    /// Publish `body` to every address from every connection.
    async fn fan_out(
        &self,
        started: &Started,
        addresses: &[PeerAddress],
        body: &str,
    ) -> Result<(), ChannelError> {
        let mut published = 0usize;
        let mut last_error = None;

        for address in addresses {
            for connection in &started.connections {
                match self.publish(connection, address, body).await {
                    Ok(()) => published += 1,
                    Err(e) => {
                        warn!(
                            client = %self.config.name,
                            server = %connection.server(),
                            to = %address,
                            "publish failed: {}",
                            e
                        );
                        last_error = Some(e);
                    }
                }
            }
        }

        match last_error {
            Some(e) if published == 0 => Err(e),
            _ => Ok(()),
        }
    }

    async fn publish(
        &self,
        connection: &Connection,
        address: &PeerAddress,
        body: &str,
    ) -> Result<(), ChannelError> {
        let room_id = self.relevant_room(connection, address).await?;
        connection
            .transport
            .send_text(&room_id, body)
            .await
            .map_err(|e| connection.rejected(e))
    }

    /// Joined room that already has `address` as a member, or a new direct room
    /// inviting it.
    async fn relevant_room(
        &self,
        connection: &Connection,
        address: &PeerAddress,
    ) -> Result<String, ChannelError> {
        let address = address.to_string();
        let transport = &connection.transport;

        let rooms = transport
            .joined_rooms()
            .await
            .map_err(|e| connection.rejected(e))?;
        for room_id in rooms {
            let members = transport
                .room_members(&room_id)
                .await
                .map_err(|e| connection.rejected(e))?;
            if members.iter().any(|m| *m == address) {
                self.log_debug(|| format!("reusing room {room_id} for {address}"));
                return Ok(room_id);
            }
        }

        let room_id = transport
            .create_direct_room(&address)
            .await
            .map_err(|e| connection.rejected(e))?;
        self.log_debug(|| format!("created room {room_id} for {address}"));
        Ok(room_id)
    }

    /// Join invitations pending now and every one that arrives later.
    async fn auto_join(
        &self,
        transport: Arc<dyn RelayTransport>,
    ) -> Result<Connection, ChannelError> {
        let rejected = |source| ChannelError::TransportRejected {
            server: transport.server().to_string(),
            source,
        };

        // subscribe first so no invite falls between the two steps
        let events = transport.subscribe();
        for room_id in transport.pending_invites().await.map_err(rejected)? {
            transport.join_room(&room_id).await.map_err(rejected)?;
        }

        let auto_join = tokio::spawn(join_invites(
            transport.clone(),
            events,
            self.config.name.clone(),
        ));
        Ok(Connection {
            transport,
            auto_join,
        })
    }
}

async fn join_invites(
    transport: Arc<dyn RelayTransport>,
    mut events: broadcast::Receiver<RelayEvent>,
    client: String,
) {
    loop {
        match events.recv().await {
            Ok(RelayEvent::Invite { room_id }) => {
                if let Err(e) = transport.join_room(&room_id).await {
                    warn!(%client, server = %transport.server(), %room_id, "auto-join failed: {}", e);
                }
            }
            Ok(RelayEvent::Message(_)) => {}
            Err(RecvError::Lagged(skipped)) => {
                warn!(%client, server = %transport.server(), skipped, "invite stream lagged");
            }
            Err(RecvError::Closed) => break,
        }
    }
}

/// Feed every room message of `connection` to `handler` on a spawned task.
fn spawn_listener<H>(connection: &Connection, handler: H) -> JoinHandle<()>
where
    H: Fn(RoomMessage) + Send + 'static,
{
    let mut events = connection.transport.subscribe();
    let server = connection.server().to_string();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(RelayEvent::Message(message)) => handler(message),
                Ok(RelayEvent::Invite { .. }) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!(%server, skipped, "event stream lagged; messages lost");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
