//! Integration tests for the gather server
//!
//! These tests boot the real accept loop on an ephemeral port and drive it with
//! WebSocket clients, validating behaviour across codec, router, hub and store.

use futures_util::{SinkExt, StreamExt};
use gather_server::hub::Hub;
use gather_server::network::Server;
use gather_server::router::Router;
use gather_server::store::{MemoryStore, SqliteStore, Store};
use gather_shared::{kind, Envelope};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const WAIT: Duration = Duration::from_secs(2);

/// Starts a server on 127.0.0.1 with an OS-assigned port
async fn start_server(store: Arc<dyn Store>) -> (SocketAddr, Arc<Hub>) {
    let hub = Arc::new(Hub::new(16));
    let router = Arc::new(Router::new(
        Arc::clone(&hub),
        store,
        StdRng::seed_from_u64(3),
    ));
    let server = Server::bind("127.0.0.1:0", router).await.unwrap();
    let addr = server.local_addr().unwrap();

    tokio::spawn(async move {
        let _ = server.run().await;
    });

    (addr, hub)
}

async fn connect(addr: SocketAddr, hub: &Hub) -> Client {
    let before = hub.len().await;
    let (client, _) = connect_async(format!("ws://{}", addr)).await.unwrap();
    wait_for_connections(hub, before + 1).await;
    client
}

async fn wait_for_connections(hub: &Hub, expected: usize) {
    timeout(WAIT, async {
        while hub.len().await != expected {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("connection count never settled");
}

async fn send(client: &mut Client, kind: &str, data: Value) {
    let text = json!({ "type": kind, "data": data }).to_string();
    client.send(Message::Text(text)).await.unwrap();
}

/// Next text frame decoded as an envelope; pings and pongs are skipped
async fn next_envelope(client: &mut Client) -> Envelope {
    loop {
        let message = timeout(WAIT, client.next())
            .await
            .expect("no frame within timeout")
            .expect("stream ended")
            .unwrap();
        match message {
            Message::Text(text) => return serde_json::from_str(&text).unwrap(),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected frame: {:?}", other),
        }
    }
}

/// Asserts nothing arrives for a short while
async fn assert_silent(client: &mut Client) {
    assert!(timeout(Duration::from_millis(100), client.next())
        .await
        .is_err());
}

/// WIRE PROTOCOL TESTS
mod protocol_tests {
    use super::*;

    /// Creator is answered first, late joiners learn about the player from the join snapshot
    #[tokio::test]
    async fn create_then_late_join_sees_player() {
        let (addr, hub) = start_server(Arc::new(MemoryStore::new())).await;
        let mut c1 = connect(addr, &hub).await;

        send(&mut c1, kind::CREATE, json!({"name": "Rex"})).await;

        let created = next_envelope(&mut c1).await;
        assert_eq!(created.kind, kind::CREATED);
        assert_eq!(created.data["id"], 1);
        assert_eq!(created.data["name"], "Rex");

        let announced = next_envelope(&mut c1).await;
        assert_eq!(announced.kind, kind::NEW_PLAYER);
        assert_eq!(announced.data, created.data);

        let mut c2 = connect(addr, &hub).await;
        let snapshot = next_envelope(&mut c2).await;
        assert_eq!(snapshot.kind, kind::NEW_PLAYER);
        assert_eq!(snapshot.data, created.data);
        assert_silent(&mut c2).await;
    }

    /// A non-string type is dropped and the connection keeps working
    #[tokio::test]
    async fn malformed_message_is_dropped() {
        let (addr, hub) = start_server(Arc::new(MemoryStore::new())).await;
        let mut client = connect(addr, &hub).await;

        client
            .send(Message::Text(r#"{"type": 5}"#.to_string()))
            .await
            .unwrap();
        send(&mut client, kind::GET_PLAYERS, Value::Null).await;

        let players = next_envelope(&mut client).await;
        assert_eq!(players.kind, kind::PLAYERS);
        assert_eq!(players.data, json!([]));
        assert_eq!(hub.len().await, 1);
    }

    /// Binary frames carrying JSON are handled like text frames
    #[tokio::test]
    async fn binary_frames_are_accepted() {
        let (addr, hub) = start_server(Arc::new(MemoryStore::new())).await;
        let mut client = connect(addr, &hub).await;

        let bytes = json!({"type": "get_players"}).to_string().into_bytes();
        client.send(Message::Binary(bytes)).await.unwrap();

        assert_eq!(next_envelope(&mut client).await.kind, kind::PLAYERS);
    }
}

/// FAN-OUT TESTS
mod fan_out_tests {
    use super::*;

    /// Moves reach every client, the sender included, with coordinates truncated
    #[tokio::test]
    async fn move_reaches_everyone() {
        let (addr, hub) = start_server(Arc::new(MemoryStore::new())).await;
        let mut clients = Vec::new();
        for _ in 0..3 {
            clients.push(connect(addr, &hub).await);
        }

        send(&mut clients[0], kind::MOVE, json!({"id": 4, "x": 10.7, "y": 20})).await;

        for client in clients.iter_mut() {
            let envelope = next_envelope(client).await;
            assert_eq!(envelope.kind, kind::MOVE);
            assert_eq!(envelope.data, json!({"id": 4, "x": 10, "y": 20}));
        }
    }

    /// Deleting a player is announced but the record survives
    #[tokio::test]
    async fn delete_player_is_a_soft_remove() {
        let store = Arc::new(MemoryStore::new());
        let (addr, hub) = start_server(store.clone()).await;
        let mut c1 = connect(addr, &hub).await;
        let mut c2 = connect(addr, &hub).await;

        send(&mut c1, kind::CREATE, json!({"name": "Rex"})).await;
        assert_eq!(next_envelope(&mut c2).await.kind, kind::NEW_PLAYER);

        send(&mut c1, kind::DELETE_PLAYER, json!({"id": 1})).await;
        let deleted = next_envelope(&mut c2).await;
        assert_eq!(deleted.kind, kind::PLAYER_DELETED);
        assert_eq!(deleted.data, json!({"id": 1}));

        assert!(store.player(1).await.is_some());
    }
}

/// CONNECTION LIFECYCLE TESTS
mod lifecycle_tests {
    use super::*;

    /// Closing the socket removes the connection from the hub
    #[tokio::test]
    async fn client_close_unregisters() {
        let (addr, hub) = start_server(Arc::new(MemoryStore::new())).await;
        let mut client = connect(addr, &hub).await;

        client.close(None).await.unwrap();
        wait_for_connections(&hub, 0).await;
    }

    /// Hub shutdown sends a going-away close to every client
    #[tokio::test]
    async fn shutdown_closes_clients_going_away() {
        let (addr, hub) = start_server(Arc::new(MemoryStore::new())).await;
        let mut client = connect(addr, &hub).await;

        hub.shutdown().await;

        let message = timeout(WAIT, client.next()).await.unwrap().unwrap().unwrap();
        match message {
            Message::Close(Some(frame)) => assert_eq!(frame.code, CloseCode::Away),
            other => panic!("expected close frame, got {:?}", other),
        }
        wait_for_connections(&hub, 0).await;
    }
}

/// PERSISTENCE TESTS
mod persistence_tests {
    use super::*;

    /// Players written through SQLite show up in the join snapshot and listings
    #[tokio::test]
    async fn sqlite_backed_server_round_trip() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let (addr, hub) = start_server(store).await;
        let mut c1 = connect(addr, &hub).await;

        send(&mut c1, kind::CREATE, json!({"name": "Ada"})).await;
        let created = next_envelope(&mut c1).await;
        assert_eq!(created.kind, kind::CREATED);

        send(&mut c1, kind::CHANGE_NAME, json!({"id": created.data["id"], "name": "Ada L"})).await;
        // new_player, then name_changed
        assert_eq!(next_envelope(&mut c1).await.kind, kind::NEW_PLAYER);
        assert_eq!(next_envelope(&mut c1).await.kind, kind::NAME_CHANGED);

        let mut c2 = connect(addr, &hub).await;
        let snapshot = next_envelope(&mut c2).await;
        assert_eq!(snapshot.data["name"], "Ada L");

        send(&mut c2, kind::GET_PLAYERS, Value::Null).await;
        let players = next_envelope(&mut c2).await;
        assert_eq!(players.data.as_array().map(Vec::len), Some(1));
    }
}
