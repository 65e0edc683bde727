#![cfg(feature = "matrix")]
//! Matrix client-server adapter.
//!
//! Implements [`RelayTransport`] on top of the Matrix client-server API (v3):
//! password login, a background `/sync` long-poll feeding the event broadcast,
//! `createRoom`, `join`, `joined_rooms`, `members` and `m.room.message` sends.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tracing::{debug, warn};
use url::Url;

use crate::traits::{
    Credentials, MessageKind, RelayConnector, RelayEvent, RelayTransport, RoomMessage,
    TransportError, EVENT_CHANNEL_CAPACITY,
};

const CLIENT_API: [&str; 3] = ["_matrix", "client", "v3"];
const MESSAGE_EVENT: &str = "m.room.message";
const TEXT_MSGTYPE: &str = "m.text";
const SYNC_RETRY_DELAY: Duration = Duration::from_secs(5);

#[derive(Deserialize)]
struct LoginResponse {
    access_token: String,
    user_id: String,
}

#[derive(Deserialize)]
struct JoinedRoomsResponse {
    joined_rooms: Vec<String>,
}

#[derive(Deserialize)]
struct CreateRoomResponse {
    room_id: String,
}

#[derive(Deserialize)]
struct MembersResponse {
    #[serde(default)]
    chunk: Vec<MemberEvent>,
}

#[derive(Deserialize)]
struct MemberEvent {
    state_key: String,
    #[serde(default)]
    content: Value,
}

#[derive(Deserialize, Default)]
pub(crate) struct SyncResponse {
    next_batch: String,
    #[serde(default)]
    rooms: SyncRooms,
}

#[derive(Deserialize, Default)]
struct SyncRooms {
    #[serde(default)]
    join: HashMap<String, JoinedRoom>,
    #[serde(default)]
    invite: HashMap<String, Value>,
}

#[derive(Deserialize, Default)]
struct JoinedRoom {
    #[serde(default)]
    timeline: Timeline,
}

#[derive(Deserialize, Default)]
struct Timeline {
    #[serde(default)]
    events: Vec<ClientEvent>,
}

#[derive(Deserialize)]
struct ClientEvent {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    sender: String,
    #[serde(default)]
    content: Value,
}

/// Translate one sync batch into relay events: invites first, then messages.
pub(crate) fn sync_events(sync: &SyncResponse) -> Vec<RelayEvent> {
    let mut invites: Vec<&String> = sync.rooms.invite.keys().collect();
    invites.sort();
    let mut events: Vec<RelayEvent> = invites
        .into_iter()
        .map(|room_id| RelayEvent::Invite {
            room_id: room_id.clone(),
        })
        .collect();

    let mut joined: Vec<(&String, &JoinedRoom)> = sync.rooms.join.iter().collect();
    joined.sort_by(|a, b| a.0.cmp(b.0));
    for (room_id, room) in joined {
        for event in &room.timeline.events {
            if event.event_type != MESSAGE_EVENT {
                continue;
            }
            let Some(body) = event.content.get("body").and_then(Value::as_str) else {
                continue;
            };
            let kind = match event.content.get("msgtype").and_then(Value::as_str) {
                Some(TEXT_MSGTYPE) => MessageKind::Text,
                Some(other) => MessageKind::Other(other.to_string()),
                None => MessageKind::Other(String::new()),
            };
            events.push(RelayEvent::Message(RoomMessage {
                room_id: room_id.clone(),
                sender: event.sender.clone(),
                kind,
                body: body.to_string(),
            }));
        }
    }
    events
}

/// `createRoom` body for an invite-only direct chat with `invitee`.
fn direct_room_request(invitee: &str) -> Value {
    json!({
        "invite": [invitee],
        "preset": "trusted_private_chat",
        "is_direct": true,
    })
}

fn client_endpoint(base: &Url, segments: &[&str]) -> Result<Url, TransportError> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| TransportError::Request(format!("not a base url: {base}")))?
        .pop_if_empty()
        .extend(CLIENT_API.iter().chain(segments.iter()));
    Ok(url)
}

async fn read_json<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, TransportError> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(TransportError::BadResponse(format!(
            "status={status} body={body}"
        )));
    }
    resp.json::<T>()
        .await
        .map_err(|e| TransportError::BadResponse(e.to_string()))
}

fn request_error(e: reqwest::Error) -> TransportError {
    TransportError::Request(e.to_string())
}

/// Logs in to Matrix homeservers addressed by host name.
#[derive(Clone)]
pub struct MatrixConnector {
    client: reqwest::Client,
    scheme: String,
    sync_timeout: Duration,
}

impl MatrixConnector {
    pub fn new() -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .use_rustls_tls()
            .build()
            .map_err(request_error)?;
        Ok(Self {
            client,
            scheme: "https".to_string(),
            sync_timeout: Duration::from_secs(30),
        })
    }

    /// Use plain `http` (local homeservers).
    pub fn with_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.scheme = scheme.into();
        self
    }

    pub fn with_sync_timeout(mut self, timeout: Duration) -> Self {
        self.sync_timeout = timeout;
        self
    }
}

#[async_trait]
impl RelayConnector for MatrixConnector {
    async fn connect(
        &self,
        server: &str,
        credentials: &Credentials,
    ) -> Result<Arc<dyn RelayTransport>, TransportError> {
        let base = Url::parse(&format!("{}://{}", self.scheme, server))
            .map_err(|e| TransportError::Request(e.to_string()))?;

        let resp = self
            .client
            .post(client_endpoint(&base, &["login"])?)
            .json(&json!({
                "type": "m.login.password",
                "identifier": { "type": "m.id.user", "user": credentials.user },
                "password": credentials.password,
            }))
            .send()
            .await
            .map_err(|e| TransportError::Unavailable(format!("{server}: {e}")))?;
        let login: LoginResponse = read_json(resp).await.map_err(|e| {
            TransportError::LoginRejected {
                server: server.to_string(),
                reason: e.to_string(),
            }
        })?;

        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let session = Arc::new(MatrixSession {
            server: server.to_string(),
            user_id: login.user_id,
            base,
            client: self.client.clone(),
            access_token: login.access_token,
            events,
            txn_prefix: rand::random::<u32>(),
            txn_counter: AtomicU64::new(0),
        });

        // History before login is not replayed; start from the current position.
        let initial = session.sync(None, Duration::ZERO).await?;
        tokio::spawn(sync_loop(
            Arc::downgrade(&session),
            initial.next_batch,
            self.sync_timeout,
        ));

        Ok(session)
    }
}

async fn sync_loop(session: Weak<MatrixSession>, mut since: String, timeout: Duration) {
    loop {
        let Some(s) = session.upgrade() else {
            return;
        };
        match s.sync(Some(&since), timeout).await {
            Ok(batch) => {
                for event in sync_events(&batch) {
                    let _ = s.events.send(event);
                }
                since = batch.next_batch;
            }
            Err(e) => {
                warn!(server = %s.server, error = %e, "matrix sync failed");
                drop(s);
                tokio::time::sleep(SYNC_RETRY_DELAY).await;
            }
        }
    }
}

/// A logged-in Matrix session.
pub struct MatrixSession {
    server: String,
    user_id: String,
    base: Url,
    client: reqwest::Client,
    access_token: String,
    events: broadcast::Sender<RelayEvent>,
    txn_prefix: u32,
    txn_counter: AtomicU64,
}

impl MatrixSession {
    async fn sync(
        &self,
        since: Option<&str>,
        timeout: Duration,
    ) -> Result<SyncResponse, TransportError> {
        let mut query = vec![("timeout", timeout.as_millis().to_string())];
        if let Some(since) = since {
            query.push(("since", since.to_string()));
        }
        let resp = self
            .client
            .get(client_endpoint(&self.base, &["sync"])?)
            .bearer_auth(&self.access_token)
            .query(&query)
            .send()
            .await
            .map_err(request_error)?;
        read_json(resp).await
    }

    fn next_txn_id(&self) -> String {
        let n = self.txn_counter.fetch_add(1, Ordering::Relaxed);
        format!("tether{:08x}{n}", self.txn_prefix)
    }
}

#[async_trait]
impl RelayTransport for MatrixSession {
    fn server(&self) -> &str {
        &self.server
    }

    fn user_id(&self) -> &str {
        &self.user_id
    }

    async fn joined_rooms(&self) -> Result<Vec<String>, TransportError> {
        let resp = self
            .client
            .get(client_endpoint(&self.base, &["joined_rooms"])?)
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(request_error)?;
        let rooms: JoinedRoomsResponse = read_json(resp).await?;
        Ok(rooms.joined_rooms)
    }

    async fn pending_invites(&self) -> Result<Vec<String>, TransportError> {
        let batch = self.sync(None, Duration::ZERO).await?;
        let mut rooms: Vec<String> = batch.rooms.invite.into_keys().collect();
        rooms.sort();
        Ok(rooms)
    }

    async fn room_members(&self, room_id: &str) -> Result<Vec<String>, TransportError> {
        let resp = self
            .client
            .get(client_endpoint(&self.base, &["rooms", room_id, "members"])?)
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(request_error)?;
        let members: MembersResponse = read_json(resp).await?;
        Ok(members
            .chunk
            .into_iter()
            .filter(|m| {
                matches!(
                    m.content.get("membership").and_then(Value::as_str),
                    Some("join") | Some("invite")
                )
            })
            .map(|m| m.state_key)
            .collect())
    }

    async fn create_direct_room(&self, invitee: &str) -> Result<String, TransportError> {
        let resp = self
            .client
            .post(client_endpoint(&self.base, &["createRoom"])?)
            .bearer_auth(&self.access_token)
            .json(&direct_room_request(invitee))
            .send()
            .await
            .map_err(request_error)?;
        let created: CreateRoomResponse = read_json(resp).await?;
        debug!(room_id = %created.room_id, invitee, "created direct room");
        Ok(created.room_id)
    }

    async fn join_room(&self, room_id: &str) -> Result<(), TransportError> {
        let resp = self
            .client
            .post(client_endpoint(&self.base, &["rooms", room_id, "join"])?)
            .bearer_auth(&self.access_token)
            .json(&json!({}))
            .send()
            .await
            .map_err(request_error)?;
        let _: Value = read_json(resp).await?;
        Ok(())
    }

    async fn send_text(&self, room_id: &str, body: &str) -> Result<(), TransportError> {
        let txn_id = self.next_txn_id();
        let resp = self
            .client
            .put(client_endpoint(
                &self.base,
                &["rooms", room_id, "send", MESSAGE_EVENT, &txn_id],
            )?)
            .bearer_auth(&self.access_token)
            .json(&json!({ "msgtype": TEXT_MSGTYPE, "body": body }))
            .send()
            .await
            .map_err(request_error)?;
        let _: Value = read_json(resp).await?;
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<RelayEvent> {
        self.events.subscribe()
    }
}
