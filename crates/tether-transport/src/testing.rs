//! In-memory federated relay network for tests and local demos.
//!
//! Rooms are global across servers, as on a federated relay: a user on one
//! server can invite and talk to a user on another. Every logged-in session gets
//! its own event broadcast; room messages go to every session of every joined
//! member, and joining a room replays its timeline to the joining user.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::broadcast;

use crate::traits::{
    Credentials, MessageKind, RelayConnector, RelayEvent, RelayTransport, RoomMessage,
    TransportError, EVENT_CHANNEL_CAPACITY,
};

/// Login check applied by [`MemoryRelayNetwork`]; return `false` to reject.
pub type Authenticator = Arc<dyn Fn(&Credentials) -> bool + Send + Sync>;

#[derive(Default)]
struct Room {
    joined: BTreeSet<String>,
    invited: BTreeSet<String>,
    timeline: Vec<RoomMessage>,
}

#[derive(Default)]
struct NetworkState {
    rooms: HashMap<String, Room>,
    sessions: HashMap<String, Vec<broadcast::Sender<RelayEvent>>>,
    offline: HashSet<String>,
    logins: Vec<(String, String)>,
    next_room: u64,
}

impl NetworkState {
    fn deliver(&self, user_id: &str, event: &RelayEvent) {
        if let Some(senders) = self.sessions.get(user_id) {
            for tx in senders {
                // No receivers yet is not an error for a relay.
                let _ = tx.send(event.clone());
            }
        }
    }

    fn ensure_online(&self, server: &str) -> Result<(), TransportError> {
        if self.offline.contains(server) {
            return Err(TransportError::Unavailable(server.to_string()));
        }
        Ok(())
    }
}

/// Shared handle to an in-memory relay network.
#[derive(Clone, Default)]
pub struct MemoryRelayNetwork {
    state: Arc<Mutex<NetworkState>>,
    authenticator: Option<Authenticator>,
}

impl MemoryRelayNetwork {
    /// Create a network that accepts any credentials.
    pub fn new() -> Self {
        Self::default()
    }

    /// Require every login to pass `check`.
    pub fn with_authenticator(
        mut self,
        check: impl Fn(&Credentials) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.authenticator = Some(Arc::new(check));
        self
    }

    /// Take a server offline (or bring it back). Offline servers reject logins and
    /// every operation of sessions logged in to them.
    pub fn set_offline(&self, server: &str, offline: bool) {
        let mut state = self.state.lock();
        if offline {
            state.offline.insert(server.to_string());
        } else {
            state.offline.remove(server);
        }
    }

    /// `(server, user_id)` of every successful login, in order.
    pub fn logins(&self) -> Vec<(String, String)> {
        self.state.lock().logins.clone()
    }

    pub fn room_count(&self) -> usize {
        self.state.lock().rooms.len()
    }

    /// Every message published on the network, grouped by room.
    pub fn messages(&self) -> Vec<RoomMessage> {
        let state = self.state.lock();
        let mut room_ids: Vec<&String> = state.rooms.keys().collect();
        room_ids.sort();
        room_ids
            .into_iter()
            .flat_map(|id| state.rooms[id].timeline.iter().cloned())
            .collect()
    }

    /// Open a session for `user_id` on `server` without credentials.
    pub fn session(&self, server: &str, user_id: &str) -> Arc<MemorySession> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let mut state = self.state.lock();
        state
            .sessions
            .entry(user_id.to_string())
            .or_default()
            .push(events.clone());
        state
            .logins
            .push((server.to_string(), user_id.to_string()));
        Arc::new(MemorySession {
            server: server.to_string(),
            user_id: user_id.to_string(),
            state: self.state.clone(),
            events,
        })
    }
}

#[async_trait]
impl RelayConnector for MemoryRelayNetwork {
    async fn connect(
        &self,
        server: &str,
        credentials: &Credentials,
    ) -> Result<Arc<dyn RelayTransport>, TransportError> {
        self.state.lock().ensure_online(server)?;

        if let Some(check) = &self.authenticator {
            if !check(credentials) {
                return Err(TransportError::LoginRejected {
                    server: server.to_string(),
                    reason: "invalid credentials".to_string(),
                });
            }
        }

        let user_id = format!("@{}:{}", credentials.user, server);
        Ok(self.session(server, &user_id))
    }
}

/// A logged-in session on a [`MemoryRelayNetwork`].
pub struct MemorySession {
    server: String,
    user_id: String,
    state: Arc<Mutex<NetworkState>>,
    events: broadcast::Sender<RelayEvent>,
}

#[async_trait]
impl RelayTransport for MemorySession {
    fn server(&self) -> &str {
        &self.server
    }

    fn user_id(&self) -> &str {
        &self.user_id
    }

    async fn joined_rooms(&self) -> Result<Vec<String>, TransportError> {
        let state = self.state.lock();
        state.ensure_online(&self.server)?;
        let mut rooms: Vec<String> = state
            .rooms
            .iter()
            .filter(|(_, room)| room.joined.contains(&self.user_id))
            .map(|(id, _)| id.clone())
            .collect();
        rooms.sort();
        Ok(rooms)
    }

    async fn pending_invites(&self) -> Result<Vec<String>, TransportError> {
        let state = self.state.lock();
        state.ensure_online(&self.server)?;
        let mut rooms: Vec<String> = state
            .rooms
            .iter()
            .filter(|(_, room)| room.invited.contains(&self.user_id))
            .map(|(id, _)| id.clone())
            .collect();
        rooms.sort();
        Ok(rooms)
    }

    async fn room_members(&self, room_id: &str) -> Result<Vec<String>, TransportError> {
        let state = self.state.lock();
        state.ensure_online(&self.server)?;
        let room = state
            .rooms
            .get(room_id)
            .ok_or_else(|| TransportError::RoomNotFound(room_id.to_string()))?;
        Ok(room.joined.union(&room.invited).cloned().collect())
    }

    async fn create_direct_room(&self, invitee: &str) -> Result<String, TransportError> {
        let mut state = self.state.lock();
        state.ensure_online(&self.server)?;

        state.next_room += 1;
        let room_id = format!("!room{}:{}", state.next_room, self.server);
        let mut room = Room::default();
        room.joined.insert(self.user_id.clone());
        if invitee != self.user_id {
            room.invited.insert(invitee.to_string());
        }
        state.rooms.insert(room_id.clone(), room);

        state.deliver(
            invitee,
            &RelayEvent::Invite {
                room_id: room_id.clone(),
            },
        );
        Ok(room_id)
    }

    async fn join_room(&self, room_id: &str) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        state.ensure_online(&self.server)?;

        let room = state
            .rooms
            .get_mut(room_id)
            .ok_or_else(|| TransportError::RoomNotFound(room_id.to_string()))?;
        if room.joined.contains(&self.user_id) {
            return Ok(());
        }
        if !room.invited.remove(&self.user_id) {
            return Err(TransportError::NotMember(room_id.to_string()));
        }
        room.joined.insert(self.user_id.clone());
        let backlog = room.timeline.clone();

        for message in backlog {
            state.deliver(&self.user_id, &RelayEvent::Message(message));
        }
        Ok(())
    }

    async fn send_text(&self, room_id: &str, body: &str) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        state.ensure_online(&self.server)?;

        let room = state
            .rooms
            .get_mut(room_id)
            .ok_or_else(|| TransportError::RoomNotFound(room_id.to_string()))?;
        if !room.joined.contains(&self.user_id) {
            return Err(TransportError::NotMember(room_id.to_string()));
        }

        let message = RoomMessage {
            room_id: room_id.to_string(),
            sender: self.user_id.clone(),
            kind: MessageKind::Text,
            body: body.to_string(),
        };
        room.timeline.push(message.clone());
        let members: Vec<String> = room.joined.iter().cloned().collect();

        let event = RelayEvent::Message(message);
        for member in members {
            state.deliver(&member, &event);
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<RelayEvent> {
        self.events.subscribe()
    }
}
