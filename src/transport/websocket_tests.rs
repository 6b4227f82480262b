use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tungstenite::protocol::Message as WsMessage;

use crate::broker::Broker;
use crate::broker::message::{Event, Subscription};
use crate::client::{Client, Subscriber};
use crate::config::Settings;
use crate::transport::message::{ErrorCode, ServerMessage};
use crate::transport::server::{Server, Shutdown};
use crate::utils::error::{Error, Result};

struct Running {
    addr: SocketAddr,
    broker: Arc<Broker>,
    shutdown: Shutdown,
    handle: JoinHandle<Result<()>>,
}

impl Running {
    fn client(&self) -> Client {
        Client::new(self.addr.to_string())
    }
}

async fn start_server(maintenance: bool) -> Running {
    let settings = Settings {
        bind_addr: "127.0.0.1:0".to_string(),
        maintenance,
        ..Settings::default()
    };
    let server = Server::bind(&settings).await.expect("bind");
    let running_addr = server.local_addr();
    let broker = server.broker();
    let shutdown = server.shutdown_handle();
    let handle = tokio::spawn(server.serve_with_shutdown(std::future::pending()));

    Running {
        addr: running_addr,
        broker,
        shutdown,
        handle,
    }
}

async fn eventually(check: impl Fn() -> bool) -> bool {
    for _ in 0..50 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

async fn reply_to_first_frame(server: &Running, frame: &str) -> ServerMessage {
    let (mut ws, _) = connect_async(server.client().url()).await.unwrap();
    ws.send(WsMessage::Text(frame.to_string().into()))
        .await
        .unwrap();
    let frame = ws.next().await.unwrap().unwrap();
    serde_json::from_slice(&frame.into_data()).unwrap()
}

async fn next_payload(sub: &mut Subscriber) -> String {
    let event = tokio::time::timeout(Duration::from_secs(2), sub.next())
        .await
        .expect("timed out waiting for event")
        .expect("subscribe stream failed")
        .expect("subscribe stream ended");
    String::from_utf8(event.payload).unwrap()
}

#[tokio::test]
async fn test_status_reports_ok() {
    let server = start_server(false).await;

    let state = server.client().status().await.expect("status");
    assert_eq!(state.status, "ok");
    assert_eq!(state.version, crate::VERSION);
    assert!(!state.uptime.is_empty());
}

#[tokio::test]
async fn test_maintenance_allows_only_status() {
    let server = start_server(true).await;
    let client = server.client();

    let state = client.status().await.expect("status");
    assert_eq!(state.status, "maintenance");

    match client.subscribe(Subscription::new("orders", "g1")).await {
        Err(Error::Remote { code, .. }) => assert_eq!(code, ErrorCode::Unavailable),
        Err(e) => panic!("expected unavailable, got {e}"),
        Ok(_) => panic!("subscribe should be rejected in maintenance"),
    }
    match client.publisher().await {
        Err(Error::Remote { code, .. }) => assert_eq!(code, ErrorCode::Unavailable),
        Err(e) => panic!("expected unavailable, got {e}"),
        Ok(_) => panic!("publish should be rejected in maintenance"),
    }

    assert!(server.broker.topics().is_empty());
}

#[tokio::test]
async fn test_round_robin_end_to_end() {
    let server = start_server(false).await;
    let client = server.client();

    let mut c1 = client
        .subscribe(Subscription::new("orders", "g1"))
        .await
        .unwrap();
    let mut c2 = client
        .subscribe(Subscription::new("orders", "g1"))
        .await
        .unwrap();
    assert_eq!(c1.group(), "g1");
    assert_ne!(c1.consumer(), c2.consumer());

    let mut publisher = client.publisher().await.unwrap();
    for n in 1..=4 {
        publisher
            .send(Event::new("orders", format!("e{n}")))
            .await
            .unwrap();
    }
    assert_eq!(publisher.close().await.unwrap(), 4);

    assert_eq!(next_payload(&mut c1).await, "e1");
    assert_eq!(next_payload(&mut c1).await, "e3");
    assert_eq!(next_payload(&mut c2).await, "e2");
    assert_eq!(next_payload(&mut c2).await, "e4");
}

#[tokio::test]
async fn test_omitted_group_broadcasts_end_to_end() {
    let server = start_server(false).await;
    let client = server.client();

    let mut a = client.subscribe(Subscription::new("x", "")).await.unwrap();
    let mut b = client.subscribe(Subscription::new("x", "")).await.unwrap();
    assert_ne!(a.group(), b.group());

    let mut publisher = client.publisher().await.unwrap();
    publisher.send(Event::new("x", "hello")).await.unwrap();
    publisher.close().await.unwrap();

    assert_eq!(next_payload(&mut a).await, "hello");
    assert_eq!(next_payload(&mut b).await, "hello");
}

#[tokio::test]
async fn test_publish_to_unknown_topic_is_acked() {
    let server = start_server(false).await;

    let mut publisher = server.client().publisher().await.unwrap();
    publisher.send(Event::new("nobody", "x")).await.unwrap();
    assert_eq!(publisher.close().await.unwrap(), 1);
}

#[tokio::test]
async fn test_closed_subscriber_leaves_its_group() {
    let server = start_server(false).await;
    let sub = server
        .client()
        .subscribe(Subscription::new("orders", "g1"))
        .await
        .unwrap();
    assert_eq!(server.broker.consumers("orders", "g1").len(), 1);

    sub.close().await.unwrap();

    let detached = eventually(|| server.broker.consumers("orders", "g1").is_empty()).await;
    assert!(detached, "consumer should be removed after disconnect");
}

#[tokio::test]
async fn test_reset_subscriber_leaves_others_untouched() {
    let server = start_server(false).await;
    let client = server.client();

    let mut survivor = client
        .subscribe(Subscription::new("orders", "g1"))
        .await
        .unwrap();
    let reset = client
        .subscribe(Subscription::new("orders", "g1"))
        .await
        .unwrap();
    let mut sibling = client
        .subscribe(Subscription::new("orders", "g2"))
        .await
        .unwrap();
    assert_eq!(server.broker.consumers("orders", "g1").len(), 2);

    // no close handshake, the TCP connection just goes away
    drop(reset);
    let members = || {
        server
            .broker
            .consumers("orders", "g1")
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
    };
    let detached = eventually(|| members() == vec![survivor.consumer().to_string()]).await;
    assert!(detached, "reset consumer should leave g1");

    let mut publisher = client.publisher().await.unwrap();
    for n in 1..=4 {
        publisher
            .send(Event::new("orders", format!("e{n}")))
            .await
            .unwrap();
    }
    assert_eq!(publisher.close().await.unwrap(), 4);

    for n in 1..=4 {
        assert_eq!(next_payload(&mut survivor).await, format!("e{n}"));
        assert_eq!(next_payload(&mut sibling).await, format!("e{n}"));
    }
}

#[tokio::test]
async fn test_unexpected_first_frame_is_rejected() {
    let server = start_server(false).await;

    match reply_to_first_frame(&server, r#"{"type":"close_send"}"#).await {
        ServerMessage::Error { code, .. } => assert_eq!(code, ErrorCode::InvalidArgument),
        other => panic!("expected error, got {other:?}"),
    }
    match reply_to_first_frame(&server, "not json").await {
        ServerMessage::Error { code, .. } => assert_eq!(code, ErrorCode::InvalidArgument),
        other => panic!("expected error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_unexpected_first_frame_in_maintenance_is_unavailable() {
    let server = start_server(true).await;

    for frame in [r#"{"type":"close_send"}"#, "not json"] {
        match reply_to_first_frame(&server, frame).await {
            ServerMessage::Error { code, .. } => assert_eq!(code, ErrorCode::Unavailable),
            other => panic!("expected error, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn test_shutdown_drains_streams_and_is_idempotent() {
    let server = start_server(false).await;
    let mut sub = server
        .client()
        .subscribe(Subscription::new("orders", "g1"))
        .await
        .unwrap();

    assert!(server.shutdown.trigger());
    assert!(!server.shutdown.trigger());
    assert!(server.shutdown.is_triggered());

    let ended = tokio::time::timeout(Duration::from_secs(2), sub.next())
        .await
        .expect("subscribe stream should end on shutdown")
        .unwrap();
    assert!(ended.is_none());

    let served = tokio::time::timeout(Duration::from_secs(2), server.handle)
        .await
        .expect("server should stop after draining")
        .unwrap();
    assert!(served.is_ok());
    assert!(Client::new(server.addr.to_string()).status().await.is_err());
}

#[tokio::test]
async fn test_shutdown_drains_past_a_subscriber_that_stopped_reading() {
    let server = start_server(false).await;

    // subscribes, then never reads again
    let (mut stalled, _) = connect_async(server.client().url()).await.unwrap();
    stalled
        .send(WsMessage::Text(
            r#"{"type":"subscribe","topic":"t","group":"g"}"#.to_string().into(),
        ))
        .await
        .unwrap();
    let _subscribed = stalled.next().await.unwrap().unwrap();

    let mut publisher = server.client().publisher().await.unwrap();
    let flood = tokio::spawn(async move {
        let payload = vec![b'x'; 256 * 1024];
        for _ in 0..400 {
            if publisher.send(Event::new("t", payload.clone())).await.is_err() {
                break;
            }
        }
    });

    // socket buffers and the mailbox fill long before 400 events get through
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(!flood.is_finished());

    assert!(server.shutdown.trigger());
    let served = tokio::time::timeout(Duration::from_secs(5), server.handle)
        .await
        .expect("server should drain despite a subscriber that stopped reading")
        .unwrap();
    assert!(served.is_ok());

    flood.abort();
    drop(stalled);
}
