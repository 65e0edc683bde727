use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use tether_core::harness::{
    authenticating_network, collect_until_idle, start_memory_client, test_relays,
};
use tether_core::relay::RelaySelector;
use tether_core::{ChannelClient, ChannelError, ClientConfig};
use tether_crypto::identity::Identity;
use tether_crypto::secretbox::MIN_ENVELOPE_LEN;
use tether_transport::{MemoryRelayNetwork, RelayTransport, TransportError};

const IDLE: Duration = Duration::from_millis(200);

/// Relays `seed`'s identity uses for replicas `0..count` on the test relays.
fn relays_for(seed: &str, count: usize) -> Vec<String> {
    let identifier = Identity::from_seed(seed).unwrap().identifier();
    let selector = RelaySelector::new(test_relays()).unwrap();
    (0..count)
        .map(|replica| selector.select(&identifier, replica).unwrap().to_string())
        .collect()
}

/// First `prefix-N` seed whose replicas land on pairwise distinct relays.
fn seed_with_distinct_relays(prefix: &str, count: usize, avoid: &[String]) -> String {
    (0..1000)
        .map(|i| format!("{prefix}-{i}"))
        .find(|seed| {
            let relays = relays_for(seed, count);
            let mut unique = relays.clone();
            unique.sort();
            unique.dedup();
            unique.len() == count && relays.iter().all(|r| !avoid.contains(r))
        })
        .unwrap()
}

async fn message_inbox(
    receiver: &ChannelClient,
    sender_public_key: &str,
) -> mpsc::UnboundedReceiver<Result<String, ChannelError>> {
    let (tx, rx) = mpsc::unbounded_channel();
    receiver
        .listen_for_encrypted_message(sender_public_key, move |result| {
            let _ = tx.send(result);
        })
        .await
        .unwrap();
    rx
}

async fn opening_inbox(receiver: &ChannelClient) -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    receiver
        .listen_for_channel_opening(move |public_key| {
            let _ = tx.send(public_key);
        })
        .await
        .unwrap();
    rx
}

/// A session claiming to be `impersonated` that shares a room with `target`.
async fn rogue_room(
    network: &MemoryRelayNetwork,
    impersonated: &ChannelClient,
    target: &ChannelClient,
) -> (Arc<tether_transport::MemorySession>, String) {
    let rogue_id = format!("@{}:rogue.test", impersonated.identifier().unwrap());
    let rogue = network.session("rogue.test", &rogue_id);
    let (_, target_address) = target.connections()[0].clone();
    let room_id = rogue.create_direct_room(&target_address).await.unwrap();
    (rogue, room_id)
}

/// Seeds for two replication-2 clients whose four relays are pairwise distinct.
fn disjoint_seeds() -> (String, String) {
    let bob_seed = seed_with_distinct_relays("bob", 2, &[]);
    let alice_seed = seed_with_distinct_relays("alice", 2, &relays_for(&bob_seed, 2));
    (alice_seed, bob_seed)
}

#[tokio::test]
async fn test_end_to_end_with_two_replicas() {
    let network = authenticating_network();
    let (alice_seed, bob_seed) = disjoint_seeds();
    let alice = start_memory_client(&network, "alice", &alice_seed, 2, test_relays())
        .await
        .unwrap();
    let bob = start_memory_client(&network, "bob", &bob_seed, 2, test_relays())
        .await
        .unwrap();

    let mut inbox = message_inbox(&bob, &alice.public_key().unwrap()).await;
    alice
        .send_message(&bob.public_key().unwrap(), "hello")
        .await
        .unwrap();

    // every local connection publishes to every recipient replica
    let expected = alice.connections().len() * 2;
    assert_eq!(expected, 4);
    assert_eq!(network.room_count(), expected);
    assert_eq!(network.messages().len(), expected);

    let delivered = collect_until_idle(&mut inbox, IDLE).await;
    assert_eq!(delivered.len(), expected);
    for result in delivered {
        assert_eq!(result.unwrap(), "hello");
    }
}

#[tokio::test]
async fn test_each_recipient_replica_gets_a_copy() {
    let (alice_seed, bob_seed) = disjoint_seeds();
    let bob_relays = relays_for(&bob_seed, 2);

    for offline in 0..2 {
        let network = MemoryRelayNetwork::new();
        let alice = start_memory_client(&network, "alice", &alice_seed, 2, test_relays())
            .await
            .unwrap();
        let bob = start_memory_client(&network, "bob", &bob_seed, 2, test_relays())
            .await
            .unwrap();
        let mut inbox = message_inbox(&bob, &alice.public_key().unwrap()).await;

        // only the other replica's relay can join and deliver
        network.set_offline(&bob_relays[offline], true);
        alice
            .send_message(&bob.public_key().unwrap(), "hello")
            .await
            .unwrap();

        let delivered = collect_until_idle(&mut inbox, IDLE).await;
        assert_eq!(delivered.len(), 2, "relay {} offline", bob_relays[offline]);
        for result in delivered {
            assert_eq!(result.unwrap(), "hello");
        }
    }
}

#[tokio::test]
async fn test_invites_pending_at_start_are_joined() {
    let network = MemoryRelayNetwork::new();
    let alice = start_memory_client(&network, "alice", "alice seed", 1, test_relays())
        .await
        .unwrap();
    let bob_key = Identity::from_seed("bob seed").unwrap().public_key_hex();

    // bob is not logged in yet; the room only holds an invite for him
    alice.send_message(&bob_key, "early").await.unwrap();
    assert_eq!(network.room_count(), 1);

    let bob = start_memory_client(&network, "bob", "bob seed", 1, test_relays())
        .await
        .unwrap();
    let mut inbox = message_inbox(&bob, &alice.public_key().unwrap()).await;
    alice.send_message(&bob_key, "late").await.unwrap();
    assert_eq!(network.room_count(), 1);

    let delivered: Vec<String> = collect_until_idle(&mut inbox, IDLE)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();
    assert_eq!(delivered, vec!["late"]);
}

#[tokio::test]
async fn test_channel_open_then_message() {
    let network = authenticating_network();
    let wallet = start_memory_client(&network, "wallet", "wallet seed", 1, test_relays())
        .await
        .unwrap();
    let dapp = start_memory_client(&network, "dapp", "dapp seed", 1, test_relays())
        .await
        .unwrap();

    // the dapp scanned the wallet's pairing payload
    let info = wallet.handshake_info().unwrap();
    let mut openings = opening_inbox(&wallet).await;
    dapp.open_channel(&info.public_key, &info.relay_server)
        .await
        .unwrap();

    let opened = collect_until_idle(&mut openings, IDLE).await;
    let dapp_key = dapp.public_key().unwrap();
    assert_eq!(opened, vec![dapp_key.clone()]);

    let mut inbox = message_inbox(&wallet, &dapp_key).await;
    dapp.send_message(&info.public_key, "sign this").await.unwrap();

    let delivered = collect_until_idle(&mut inbox, IDLE).await;
    assert!(!delivered.is_empty());
    for result in delivered {
        assert_eq!(result.unwrap(), "sign this");
    }
}

#[tokio::test]
async fn test_short_payloads_never_reach_listeners() {
    let network = MemoryRelayNetwork::new();
    let alice = start_memory_client(&network, "alice", "alice seed", 1, test_relays())
        .await
        .unwrap();
    let bob = start_memory_client(&network, "bob", "bob seed", 1, test_relays())
        .await
        .unwrap();

    let mut openings = opening_inbox(&bob).await;
    let mut inbox = message_inbox(&bob, &alice.public_key().unwrap()).await;
    let (rogue, room_id) = rogue_room(&network, &alice, &bob).await;

    let (_, bob_address) = bob.connections()[0].clone();
    for len in 0..MIN_ENVELOPE_LEN {
        let payload = hex::encode(vec![0x5A; len]);
        rogue.send_text(&room_id, &payload).await.unwrap();
        rogue
            .send_text(&room_id, &format!("@channel-open:{bob_address}:{payload}"))
            .await
            .unwrap();
    }
    rogue.send_text(&room_id, "not hex at all").await.unwrap();

    assert!(collect_until_idle(&mut openings, IDLE).await.is_empty());
    assert!(collect_until_idle(&mut inbox, IDLE).await.is_empty());
}

#[tokio::test]
async fn test_tampered_payload_surfaces_error() {
    let network = MemoryRelayNetwork::new();
    let alice = start_memory_client(&network, "alice", "alice seed", 1, test_relays())
        .await
        .unwrap();
    let bob = start_memory_client(&network, "bob", "bob seed", 1, test_relays())
        .await
        .unwrap();

    let mut inbox = message_inbox(&bob, &alice.public_key().unwrap()).await;
    let (rogue, room_id) = rogue_room(&network, &alice, &bob).await;
    rogue
        .send_text(&room_id, &hex::encode([0x33u8; MIN_ENVELOPE_LEN + 8]))
        .await
        .unwrap();

    let delivered = collect_until_idle(&mut inbox, IDLE).await;
    assert_eq!(delivered.len(), 1);
    assert!(matches!(
        delivered[0],
        Err(ChannelError::CryptoOperationFailure(_))
    ));
}

#[tokio::test]
async fn test_operations_before_start() {
    let network = MemoryRelayNetwork::new();
    let config = ClientConfig::new("idle", "idle seed").with_relay_servers(test_relays());
    let client = ChannelClient::new(config, Arc::new(network)).unwrap();

    assert!(matches!(client.identifier(), Err(ChannelError::IdentityNotReady)));
    assert!(matches!(
        client.open_channel(&"ab".repeat(32), "relay-a.test").await,
        Err(ChannelError::IdentityNotReady)
    ));
    assert!(matches!(
        client.listen_for_channel_opening(|_| {}).await,
        Err(ChannelError::IdentityNotReady)
    ));
}

#[tokio::test]
async fn test_failed_start_leaves_client_uninitialized() {
    let network = MemoryRelayNetwork::new();
    let seed = seed_with_distinct_relays("offline", 2, &[]);
    let relays = relays_for(&seed, 2);
    // first replica connects, second one fails
    network.set_offline(&relays[1], true);

    let config = ClientConfig::new("offline", seed.as_str())
        .with_replication_count(2)
        .with_relay_servers(test_relays());
    let mut client = ChannelClient::new(config, Arc::new(network.clone())).unwrap();

    match client.start().await {
        Err(ChannelError::TransportRejected { server, source }) => {
            assert_eq!(server, relays[1]);
            assert!(matches!(source, TransportError::Unavailable(_)));
        }
        other => panic!("unexpected start result: {other:?}"),
    }
    assert!(!client.is_started());
    assert!(client.connections().is_empty());
    assert!(matches!(client.public_key(), Err(ChannelError::IdentityNotReady)));

    // retry once the relay is back
    network.set_offline(&relays[1], false);
    client.start().await.unwrap();
    assert_eq!(client.connections().len(), 2);
}

#[tokio::test]
async fn test_rejected_login() {
    let network = MemoryRelayNetwork::new().with_authenticator(|_| false);
    let result = start_memory_client(&network, "alice", "alice seed", 1, test_relays()).await;
    assert!(matches!(
        result,
        Err(ChannelError::TransportRejected {
            source: TransportError::LoginRejected { .. },
            ..
        })
    ));
}

#[tokio::test]
async fn test_send_survives_one_offline_connection() {
    let network = MemoryRelayNetwork::new();
    let alice_seed = seed_with_distinct_relays("alice", 2, &[]);
    let alice_relays = relays_for(&alice_seed, 2);
    let bob_seed = seed_with_distinct_relays("bob", 1, &alice_relays[1..]);

    let alice = start_memory_client(&network, "alice", &alice_seed, 2, test_relays())
        .await
        .unwrap();
    let bob = start_memory_client(&network, "bob", &bob_seed, 1, test_relays())
        .await
        .unwrap();
    let mut inbox = message_inbox(&bob, &alice.public_key().unwrap()).await;

    network.set_offline(&alice_relays[1], true);
    alice
        .send_message(&bob.public_key().unwrap(), "hello")
        .await
        .unwrap();

    let delivered = collect_until_idle(&mut inbox, IDLE).await;
    assert!(!delivered.is_empty());
    for result in delivered {
        assert_eq!(result.unwrap(), "hello");
    }

    // nothing left to publish from
    network.set_offline(&alice_relays[0], true);
    assert!(matches!(
        alice.send_message(&bob.public_key().unwrap(), "hello").await,
        Err(ChannelError::TransportRejected { .. })
    ));
}

#[tokio::test]
async fn test_rooms_are_reused() {
    let network = MemoryRelayNetwork::new();
    let alice = start_memory_client(&network, "alice", "alice seed", 1, test_relays())
        .await
        .unwrap();
    let bob = start_memory_client(&network, "bob", "bob seed", 1, test_relays())
        .await
        .unwrap();
    let alice_key = alice.public_key().unwrap();
    let bob_key = bob.public_key().unwrap();

    let mut bob_inbox = message_inbox(&bob, &alice_key).await;
    alice.send_message(&bob_key, "one").await.unwrap();
    assert_eq!(network.room_count(), 1);
    alice.send_message(&bob_key, "two").await.unwrap();
    assert_eq!(network.room_count(), 1);

    let delivered: Vec<String> = collect_until_idle(&mut bob_inbox, IDLE)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();
    assert_eq!(delivered, vec!["one", "two"]);

    // bob has joined by now and answers in the same room
    let mut alice_inbox = message_inbox(&alice, &bob_key).await;
    bob.send_message(&alice_key, "three").await.unwrap();
    assert_eq!(network.room_count(), 1);

    let delivered = collect_until_idle(&mut alice_inbox, IDLE).await;
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].as_deref().ok(), Some("three"));
}
