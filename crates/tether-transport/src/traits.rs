//! Transport traits and event types for chat-room relays.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;

/// Capacity of each session's event broadcast.
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Login material presented to a relay.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

/// Message type of a room message as reported by the relay.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MessageKind {
    /// Plain text message (`m.text` on Matrix).
    Text,
    /// Anything else (notices, media, ...).
    Other(String),
}

/// A message published in a room.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoomMessage {
    pub room_id: String,
    /// Full participant address of the sender, e.g. `@<id>:<server>`.
    pub sender: String,
    pub kind: MessageKind,
    pub body: String,
}

impl RoomMessage {
    pub fn is_text(&self) -> bool {
        self.kind == MessageKind::Text
    }
}

/// Event pushed by a relay session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RelayEvent {
    /// A message in a joined room.
    Message(RoomMessage),
    /// The logged-in user was invited to a room.
    Invite { room_id: String },
}

/// One logged-in session on one relay server.
#[async_trait]
pub trait RelayTransport: Send + Sync {
    /// Relay host name this session is logged in to.
    fn server(&self) -> &str;

    /// Full participant address of the logged-in user.
    fn user_id(&self) -> &str;

    /// Rooms the user has joined.
    async fn joined_rooms(&self) -> Result<Vec<String>, TransportError>;

    /// Rooms the user is invited to but has not joined yet.
    async fn pending_invites(&self) -> Result<Vec<String>, TransportError>;

    /// Members of a room, joined or invited.
    async fn room_members(&self, room_id: &str) -> Result<Vec<String>, TransportError>;

    /// Create a direct, invite-only room with `invitee` invited. Returns the room id.
    async fn create_direct_room(&self, invitee: &str) -> Result<String, TransportError>;

    /// Join a room the user was invited to.
    async fn join_room(&self, room_id: &str) -> Result<(), TransportError>;

    /// Publish a plain text message.
    async fn send_text(&self, room_id: &str, body: &str) -> Result<(), TransportError>;

    /// Subscribe to this session's event stream.
    ///
    /// Each receiver sees every event delivered after the call.
    fn subscribe(&self) -> broadcast::Receiver<RelayEvent>;
}

/// Factory that logs in to a relay server.
#[async_trait]
pub trait RelayConnector: Send + Sync {
    async fn connect(
        &self,
        server: &str,
        credentials: &Credentials,
    ) -> Result<Arc<dyn RelayTransport>, TransportError>;
}

/// Common transport error type
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("login rejected by {server}: {reason}")]
    LoginRejected { server: String, reason: String },

    #[error("relay server unavailable: {0}")]
    Unavailable(String),

    #[error("room not found: {0}")]
    RoomNotFound(String),

    #[error("not a member of room {0}")]
    NotMember(String),

    #[error("request failed: {0}")]
    Request(String),

    #[error("bad response: {0}")]
    BadResponse(String),
}
