//! Integration tests for the chat relay
//!
//! These tests run a real server on an ephemeral port and talk to it over
//! WebSocket connections, the same way browser clients do.

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use server::commands::CommandRegistry;
use server::config::Config;
use server::dispatch::{ChatState, Dispatcher};
use server::moderation::ModerationPolicy;
use server::network::Server;
use server::police::Police;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const RECV_TIMEOUT: Duration = Duration::from_secs(2);
const QUIET_PERIOD: Duration = Duration::from_millis(300);

async fn start_server(config: Config) -> SocketAddr {
    let state = ChatState::new(Police::default(), ModerationPolicy::new(&config));
    let dispatcher = Dispatcher::new(CommandRegistry::new(), state);
    let server = Server::new(&config, dispatcher).await.unwrap();
    let addr = server.local_addr().unwrap();
    tokio::spawn(server.run());
    addr
}

async fn start_default_server() -> SocketAddr {
    start_server(Config {
        port: 0,
        salt: "pepper".to_string(),
        ..Config::default()
    })
    .await
}

async fn connect(addr: SocketAddr) -> Client {
    let (client, _) = connect_async(format!("ws://{}", addr)).await.unwrap();
    client
}

async fn send(client: &mut Client, frame: Value) {
    client.send(Message::Text(frame.to_string())).await.unwrap();
}

/// Next text frame as JSON, failing the test if none arrives in time
async fn recv(client: &mut Client) -> Value {
    loop {
        let message = timeout(RECV_TIMEOUT, client.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("connection ended")
            .expect("websocket error");
        if let Message::Text(text) = message {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

/// Whether a text frame shows up within the quiet period
async fn receives_nothing(client: &mut Client) -> bool {
    loop {
        match timeout(QUIET_PERIOD, client.next()).await {
            Err(_) => return true,
            Ok(Some(Ok(Message::Text(_)))) => return false,
            Ok(Some(Ok(_))) => continue,
            Ok(_) => return true,
        }
    }
}

/// Connects and joins, returning once the roster arrives.
async fn join(addr: SocketAddr, channel: &str, nick: &str) -> (Client, Value) {
    let mut client = connect(addr).await;
    send(
        &mut client,
        json!({ "cmd": "join", "channel": channel, "nick": nick }),
    )
    .await;
    let roster = recv(&mut client).await;
    assert_eq!(roster["cmd"], "onlineSet");
    (client, roster)
}

/// Reads until the server closes the socket.
async fn closed_by_server(client: &mut Client) -> bool {
    loop {
        match timeout(RECV_TIMEOUT, client.next()).await {
            Err(_) => return false,
            Ok(None) | Ok(Some(Err(_))) | Ok(Some(Ok(Message::Close(_)))) => return true,
            Ok(Some(Ok(_))) => continue,
        }
    }
}

mod membership_tests {
    use super::*;

    #[tokio::test]
    async fn join_sends_roster_and_announces_arrival() {
        let addr = start_default_server().await;

        let (mut alice, roster) = join(addr, "lobby", "alice").await;
        assert_eq!(roster["nicks"], json!(["alice"]));
        assert!(roster["time"].is_u64());

        let (_bob, roster) = join(addr, "lobby", "bob").await;
        assert_eq!(roster["nicks"], json!(["alice", "bob"]));

        let added = recv(&mut alice).await;
        assert_eq!(added["cmd"], "onlineAdd");
        assert_eq!(added["nick"], "bob");
    }

    #[tokio::test]
    async fn duplicate_nick_is_rejected_case_insensitively() {
        let addr = start_default_server().await;
        let (_alice, _) = join(addr, "lobby", "alice").await;

        let mut imposter = connect(addr).await;
        send(
            &mut imposter,
            json!({ "cmd": "join", "channel": "lobby", "nick": "ALICE" }),
        )
        .await;

        let reply = recv(&mut imposter).await;
        assert_eq!(reply["cmd"], "warn");
        assert_eq!(reply["text"], "Nickname taken");
    }

    #[tokio::test]
    async fn closing_socket_announces_departure() {
        let addr = start_default_server().await;
        let (mut alice, _) = join(addr, "lobby", "alice").await;
        let (mut bob, _) = join(addr, "lobby", "bob").await;
        assert_eq!(recv(&mut alice).await["cmd"], "onlineAdd");

        bob.close(None).await.unwrap();

        let removed = recv(&mut alice).await;
        assert_eq!(removed["cmd"], "onlineRemove");
        assert_eq!(removed["nick"], "bob");
    }
}

mod chat_tests {
    use super::*;

    #[tokio::test]
    async fn chat_reaches_only_the_senders_channel() {
        let addr = start_default_server().await;
        let (mut alice, _) = join(addr, "lobby", "alice").await;
        let (mut bob, _) = join(addr, "lobby", "bob").await;
        let (mut outsider, _) = join(addr, "elsewhere", "carol").await;
        assert_eq!(recv(&mut alice).await["cmd"], "onlineAdd");

        send(&mut alice, json!({ "cmd": "chat", "text": "hi" })).await;

        let received = recv(&mut bob).await;
        assert_eq!(received["cmd"], "chat");
        assert_eq!(received["nick"], "alice");
        assert_eq!(received["text"], "hi");
        assert!(received["time"].is_u64());
        assert!(received.get("trip").is_none());

        // The sender gets its own line back
        assert_eq!(recv(&mut alice).await["text"], "hi");
        assert!(receives_nothing(&mut outsider).await);
    }

    #[tokio::test]
    async fn chat_carries_trip() {
        let addr = start_default_server().await;
        let (mut alice, _) = join(addr, "lobby", "alice#secret").await;

        send(&mut alice, json!({ "cmd": "chat", "text": "signed" })).await;

        let received = recv(&mut alice).await;
        assert_eq!(received["nick"], "alice");
        let trip = received["trip"].as_str().unwrap();
        assert_eq!(trip.len(), 6);
    }

    #[tokio::test]
    async fn chat_before_join_is_dropped() {
        let addr = start_default_server().await;
        let mut lurker = connect(addr).await;

        send(&mut lurker, json!({ "cmd": "chat", "text": "anyone?" })).await;
        assert!(receives_nothing(&mut lurker).await);
    }

    #[tokio::test]
    async fn stats_reports_active_counts() {
        let addr = start_default_server().await;
        let (mut alice, _) = join(addr, "lobby", "alice").await;

        send(&mut alice, json!({ "cmd": "stats" })).await;

        let reply = recv(&mut alice).await;
        assert_eq!(reply["cmd"], "info");
        assert_eq!(reply["text"], "1 unique IPs in 1 channels");
    }
}

mod protocol_tests {
    use super::*;

    #[tokio::test]
    async fn malformed_frame_closes_connection() {
        let addr = start_default_server().await;
        let (mut alice, _) = join(addr, "lobby", "alice").await;
        let (mut bob, _) = join(addr, "lobby", "bob").await;
        assert_eq!(recv(&mut alice).await["cmd"], "onlineAdd");

        bob.send(Message::Text("{ not json".to_string()))
            .await
            .unwrap();

        assert!(closed_by_server(&mut bob).await);
        let removed = recv(&mut alice).await;
        assert_eq!(removed["cmd"], "onlineRemove");
        assert_eq!(removed["nick"], "bob");
    }

    #[tokio::test]
    async fn unknown_command_is_ignored() {
        let addr = start_default_server().await;
        let (mut alice, _) = join(addr, "lobby", "alice").await;

        send(&mut alice, json!({ "cmd": "teleport" })).await;
        assert!(receives_nothing(&mut alice).await);

        // The connection is still usable
        send(&mut alice, json!({ "cmd": "chat", "text": "still here" })).await;
        assert_eq!(recv(&mut alice).await["text"], "still here");
    }

    #[tokio::test]
    async fn flooding_is_rate_limited() {
        let addr = start_default_server().await;
        let (mut alice, _) = join(addr, "lobby", "alice").await;

        // Each of these costs 5 on top of the join's 3
        let wall = "x".repeat(1660);
        for _ in 0..4 {
            send(&mut alice, json!({ "cmd": "chat", "text": wall })).await;
        }

        let mut warned = false;
        for _ in 0..4 {
            let frame = recv(&mut alice).await;
            if frame["cmd"] == "warn" {
                assert!(frame["text"]
                    .as_str()
                    .unwrap()
                    .starts_with("You are sending too much text."));
                warned = true;
                break;
            }
        }
        assert!(warned);
    }

    #[tokio::test]
    async fn short_lines_are_not_rate_limited() {
        let addr = start_default_server().await;
        let (mut alice, _) = join(addr, "lobby", "alice").await;

        for _ in 0..20 {
            send(&mut alice, json!({ "cmd": "chat", "text": "hi" })).await;
        }
        for _ in 0..20 {
            assert_eq!(recv(&mut alice).await["cmd"], "chat");
        }
    }
}
