//! Relay broker integration tests.
//!
//! Each test binds its own relay on a loopback port and drives it with real
//! WebSocket clients: attach rules, close codes, verbatim forwarding, status
//! fan-out, and the per-address ceilings.

use std::{net::SocketAddr, time::Duration};

use futures_util::{SinkExt, StreamExt};
use lanyard_proto::CloseCode;
use lanyard_relay::{Relay, RelayConfig};
use tokio::{net::TcpStream, time::timeout};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use uuid::Uuid;

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

fn test_config() -> RelayConfig {
    RelayConfig { bind_address: "127.0.0.1:0".to_string(), ..Default::default() }
}

async fn start_relay(config: RelayConfig) -> SocketAddr {
    let relay = Relay::bind(config).await.unwrap();
    let addr = relay.local_addr().unwrap();
    tokio::spawn(relay.run());
    addr
}

async fn connect_raw(addr: SocketAddr, query: &str) -> Client {
    let (ws, _) = connect_async(format!("ws://{addr}/?{query}")).await.unwrap();
    ws
}

async fn connect(addr: SocketAddr, role: &str, session: Uuid) -> Client {
    connect_raw(addr, &format!("role={role}&session={session}")).await
}

/// Next frame that is not transport keepalive noise.
async fn next_relevant(ws: &mut Client) -> Option<Message> {
    loop {
        let msg = timeout(Duration::from_secs(5), ws.next()).await.ok()??;
        match msg {
            Ok(Message::Ping(_) | Message::Pong(_)) => continue,
            Ok(msg) => return Some(msg),
            Err(_) => return None,
        }
    }
}

async fn expect_close_code(ws: &mut Client) -> u16 {
    match next_relevant(ws).await {
        Some(Message::Close(Some(frame))) => u16::from(frame.code),
        other => panic!("expected close frame, got {other:?}"),
    }
}

async fn expect_status(ws: &mut Client, needle: &str) {
    match next_relevant(ws).await {
        Some(Message::Text(text)) => {
            assert!(text.contains(needle), "expected {needle} in {text}");
        },
        other => panic!("expected status text frame, got {other:?}"),
    }
}

async fn expect_binary(ws: &mut Client) -> Vec<u8> {
    match next_relevant(ws).await {
        Some(Message::Binary(data)) => data,
        other => panic!("expected binary frame, got {other:?}"),
    }
}

#[tokio::test]
async fn malformed_params_are_rejected() {
    let addr = start_relay(test_config()).await;
    let session = Uuid::new_v4();

    let mut ws = connect_raw(addr, &format!("role=admin&session={session}")).await;
    assert_eq!(expect_close_code(&mut ws).await, CloseCode::InvalidParams.as_u16());

    let mut ws = connect_raw(addr, "role=host").await;
    assert_eq!(expect_close_code(&mut ws).await, CloseCode::InvalidParams.as_u16());

    let mut ws = connect_raw(addr, "role=host&session=not-a-uuid").await;
    assert_eq!(expect_close_code(&mut ws).await, CloseCode::InvalidParams.as_u16());
}

#[tokio::test]
async fn client_without_host_is_rejected() {
    let addr = start_relay(test_config()).await;

    let mut ws = connect(addr, "client", Uuid::new_v4()).await;
    assert_eq!(expect_close_code(&mut ws).await, CloseCode::UnknownSession.as_u16());
}

#[tokio::test]
async fn frames_are_forwarded_verbatim() {
    let addr = start_relay(test_config()).await;
    let session = Uuid::new_v4();

    let mut host = connect(addr, "host", session).await;
    let mut client = connect(addr, "client", session).await;
    expect_status(&mut host, "CLIENT_CONNECTED").await;

    // Arbitrary bytes, not valid ciphertext. The relay must not care.
    let c2h = vec![0x01, 0xff, 0x00, 0x42, 0x42];
    client.send(Message::Binary(c2h.clone())).await.unwrap();
    assert_eq!(expect_binary(&mut host).await, c2h);

    let h2c: Vec<u8> = (0..=255).collect();
    host.send(Message::Binary(h2c.clone())).await.unwrap();
    assert_eq!(expect_binary(&mut client).await, h2c);
}

#[tokio::test]
async fn host_reattach_supersedes_and_notifies_client() {
    let addr = start_relay(test_config()).await;
    let session = Uuid::new_v4();

    let mut first_host = connect(addr, "host", session).await;
    let mut client = connect(addr, "client", session).await;
    expect_status(&mut first_host, "CLIENT_CONNECTED").await;

    let mut second_host = connect(addr, "host", session).await;
    assert_eq!(expect_close_code(&mut first_host).await, CloseCode::Superseded.as_u16());
    expect_status(&mut client, "HOST_CONNECTED").await;

    // Forwarding now reaches the replacement.
    client.send(Message::Binary(vec![7, 7, 7])).await.unwrap();
    assert_eq!(expect_binary(&mut second_host).await, vec![7, 7, 7]);
}

#[tokio::test]
async fn host_disconnect_notifies_client() {
    let addr = start_relay(test_config()).await;
    let session = Uuid::new_v4();

    let mut host = connect(addr, "host", session).await;
    let mut client = connect(addr, "client", session).await;
    expect_status(&mut host, "CLIENT_CONNECTED").await;

    host.close(None).await.unwrap();
    expect_status(&mut client, "HOST_DISCONNECTED").await;
}

#[tokio::test]
async fn global_session_cap_turns_new_hosts_away() {
    let addr = start_relay(RelayConfig { max_sessions: 1, ..test_config() }).await;
    let session = Uuid::new_v4();

    let _host = connect(addr, "host", session).await;

    let mut overflow = connect(addr, "host", Uuid::new_v4()).await;
    assert_eq!(expect_close_code(&mut overflow).await, CloseCode::RelayFull.as_u16());

    // Re-attaching to the existing registration is still allowed at the cap.
    let mut replacement = connect(addr, "host", session).await;
    let mut client = connect(addr, "client", session).await;
    expect_status(&mut replacement, "CLIENT_CONNECTED").await;
    client.send(Message::Binary(vec![9])).await.unwrap();
    assert_eq!(expect_binary(&mut replacement).await, vec![9]);
}

#[tokio::test]
async fn per_address_ceiling_rejects_and_recovers() {
    // The recovery loop below may open dozens of short-lived connections;
    // keep the churn ceiling out of the way.
    let addr = start_relay(RelayConfig {
        max_new_connections_per_ip_per_minute: 1000,
        ..test_config()
    })
    .await;
    let anchor_session = Uuid::new_v4();

    // Nine parked hosts plus the anchor host saturate the default ceiling
    // of ten connections from one address.
    let mut parked = Vec::new();
    for _ in 0..9 {
        parked.push(connect(addr, "host", Uuid::new_v4()).await);
    }
    let mut anchor = connect(addr, "host", anchor_session).await;

    let mut over = connect(addr, "client", anchor_session).await;
    assert_eq!(expect_close_code(&mut over).await, CloseCode::TooManyConnections.as_u16());

    // Freeing one slot lets a new connection through. The close is processed
    // asynchronously, so poll until the attach lands.
    parked.pop();
    let mut attached = false;
    let mut admitted = None;
    for _ in 0..50 {
        let candidate = connect(addr, "client", anchor_session).await;
        match timeout(Duration::from_millis(300), anchor.next()).await {
            Ok(Some(Ok(Message::Text(text)))) if text.contains("CLIENT_CONNECTED") => {
                admitted = Some(candidate);
                attached = true;
                break;
            },
            _ => {
                drop(candidate);
                tokio::time::sleep(Duration::from_millis(100)).await;
            },
        }
    }
    assert!(attached, "no connection admitted after freeing a slot");
    drop(admitted);
}

#[tokio::test]
async fn connection_throughput_ceiling_closes_the_sender() {
    let addr = start_relay(RelayConfig {
        max_msgs_per_sec_per_connection: 3,
        ..test_config()
    })
    .await;
    let session = Uuid::new_v4();

    let mut host = connect(addr, "host", session).await;
    let mut client = connect(addr, "client", session).await;
    expect_status(&mut host, "CLIENT_CONNECTED").await;

    for _ in 0..4 {
        client.send(Message::Binary(vec![0; 8])).await.unwrap();
    }

    // Three forwarded, the fourth closes the flooding connection.
    for _ in 0..3 {
        expect_binary(&mut host).await;
    }
    assert_eq!(expect_close_code(&mut client).await, CloseCode::RateLimited.as_u16());
}

#[tokio::test]
async fn address_throughput_ceiling_spans_connections() {
    let addr = start_relay(RelayConfig {
        max_msgs_per_sec_per_ip: 5,
        ..test_config()
    })
    .await;
    let session = Uuid::new_v4();

    let mut host = connect(addr, "host", session).await;
    let mut client = connect(addr, "client", session).await;
    expect_status(&mut host, "CLIENT_CONNECTED").await;

    // Five messages from one connection exhaust the address budget, so the
    // sixth from the sibling connection is over the line.
    for _ in 0..5 {
        client.send(Message::Binary(vec![1])).await.unwrap();
        expect_binary(&mut host).await;
    }
    host.send(Message::Binary(vec![2])).await.unwrap();
    assert_eq!(expect_close_code(&mut host).await, CloseCode::RateLimited.as_u16());
}

#[tokio::test]
async fn connection_churn_ceiling_rejects_reconnect_floods() {
    let addr = start_relay(RelayConfig {
        max_new_connections_per_ip_per_minute: 3,
        ..test_config()
    })
    .await;

    let mut parked = Vec::new();
    for _ in 0..3 {
        parked.push(connect(addr, "host", Uuid::new_v4()).await);
    }

    let mut over = connect(addr, "host", Uuid::new_v4()).await;
    assert_eq!(expect_close_code(&mut over).await, CloseCode::RateLimited.as_u16());
    drop(parked);
}

#[tokio::test]
async fn silent_peer_is_terminated_after_missed_pong() {
    let addr = start_relay(RelayConfig {
        heartbeat_interval: Duration::from_millis(100),
        ..test_config()
    })
    .await;

    let mut host = connect(addr, "host", Uuid::new_v4()).await;

    // Not polling the socket means the transport never answers the relay's
    // pings, so the next heartbeat tick must tear the connection down.
    tokio::time::sleep(Duration::from_millis(400)).await;

    let ended = timeout(Duration::from_secs(5), async {
        loop {
            match host.next().await {
                None | Some(Err(_)) => break,
                Some(Ok(_)) => {},
            }
        }
    })
    .await;
    assert!(ended.is_ok(), "relay kept a silent connection alive");
}
