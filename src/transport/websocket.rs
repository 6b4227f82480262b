//! WebSocket transport
//!
//! Each accepted connection carries exactly one RPC. The first frame names the
//! call; the handler for it runs inside the availability gate and owns the
//! connection until the call ends. Responsibilities:
//! - Status: answer with the current `ServiceState`
//! - Subscribe: register a consumer and stream its mailbox to the peer
//! - Publish: feed every received event to the broker, ack on `close_send`
//!
//! A peer closing its side ends a stream cleanly. Any other transport error
//! ends only that connection. Every wait on the peer or on the broker is cut
//! short by shutdown, so a stalled peer cannot hold up the server's drain.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio_tungstenite::{WebSocketStream, accept_async};
use tracing::{debug, error, info, warn};
use tungstenite::protocol::Message as WsMessage;
use uuid::Uuid;

use crate::broker::message::Subscription;
use crate::transport::gate::Method;
use crate::transport::message::{ClientMessage, ServerMessage, ServiceState};
use crate::transport::server::{Context, stopping};
use crate::utils::error::{Error, Result};

type Sink = SplitSink<WebSocketStream<TcpStream>, WsMessage>;
type Source = SplitStream<WebSocketStream<TcpStream>>;

/// How long a finished connection may spend sending its last reply and the
/// close frame before it is simply dropped.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

pub(crate) async fn handle_connection(stream: TcpStream, peer: SocketAddr, ctx: Arc<Context>) {
    let mut shutdown = ctx.shutdown.clone();
    let ws_stream = match unless_stopping(&mut shutdown, accept_async(stream)).await {
        Some(Ok(ws)) => ws,
        Some(Err(e)) => {
            warn!(peer = %peer, error = %e, "websocket handshake error");
            return;
        }
        None => return,
    };
    let (mut sink, mut source) = ws_stream.split();

    let first = unless_stopping(&mut shutdown, next_frame(&mut source))
        .await
        .unwrap_or(Ok(None));
    let result = match first {
        Ok(Some(ClientMessage::Status)) => ctx.gate.intercept(Method::Status, status(&ctx, &mut sink)).await,
        Ok(Some(ClientMessage::Subscribe(sub))) => {
            let call = subscribe(&ctx, sub, &mut sink, &mut source, &mut shutdown);
            ctx.gate.intercept(Method::Subscribe, call).await
        }
        Ok(Some(ClientMessage::Publish)) => {
            let call = publish(&ctx, &mut sink, &mut source, &mut shutdown);
            ctx.gate.intercept(Method::Publish, call).await
        }
        Ok(Some(other)) => {
            let name = frame_name(&other);
            let error = Error::Protocol(format!("expected status, subscribe or publish, got {name}"));
            Err(ctx.gate.refuse(name, error))
        }
        Ok(None) => {
            debug!(peer = %peer, "connection closed before a request was sent");
            Ok(())
        }
        Err(e @ Error::Codec(_)) => Err(ctx.gate.refuse("malformed request", e)),
        Err(e) => Err(e),
    };

    let reply = match result {
        Ok(()) => None,
        Err(e) if e.is_terminated() => None,
        Err(e) => {
            match &e {
                Error::Unavailable => {}
                Error::Transport(_) | Error::Io(_) => {
                    error!(peer = %peer, error = %e, "connection failed")
                }
                _ => warn!(peer = %peer, error = %e, "rejecting request"),
            }
            Some(ServerMessage::Error {
                code: e.code(),
                message: e.to_string(),
            })
        }
    };

    // a peer that stopped reading must not hold the connection open
    let farewell = async {
        if let Some(reply) = reply {
            let _ = send(&mut sink, &reply).await;
        }
        let _ = sink.close().await;
    };
    if tokio::time::timeout(CLOSE_TIMEOUT, farewell).await.is_err() {
        debug!(peer = %peer, "peer did not take the close frame, dropping connection");
    }
}

async fn status(ctx: &Context, sink: &mut Sink) -> Result<()> {
    let state = ServiceState::new(ctx.gate.maintenance(), ctx.started.elapsed());
    send(sink, &ServerMessage::ServiceState(state)).await
}

async fn subscribe(
    ctx: &Context,
    sub: Subscription,
    sink: &mut Sink,
    source: &mut Source,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<()> {
    let mut feed = ctx.broker.connect(sub);
    let subscribed = ServerMessage::Subscribed {
        consumer: feed.consumer().to_string(),
        group: feed.group().to_string(),
    };
    send(sink, &subscribed).await?;

    loop {
        tokio::select! {
            event = feed.recv() => match event {
                Some(event) => match unless_stopping(shutdown, send(sink, &ServerMessage::Event(event))).await {
                    Some(sent) => sent?,
                    None => return Ok(()),
                },
                None => return Ok(()),
            },
            frame = next_frame(source) => match frame? {
                Some(other) => debug!(consumer = %feed.consumer(), frame = frame_name(&other), "ignoring frame on subscribe stream"),
                None => {
                    debug!(consumer = %feed.consumer(), "subscriber closed stream");
                    return Ok(());
                }
            },
            _ = stopping(shutdown) => return Ok(()),
        }
    }
}

async fn publish(
    ctx: &Context,
    sink: &mut Sink,
    source: &mut Source,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<()> {
    let publisher = Uuid::new_v4();
    info!(id = %publisher, "publisher connected");
    send(sink, &ServerMessage::Accepted).await?;

    let mut events = 0u64;
    loop {
        let frame = tokio::select! {
            frame = next_frame(source) => frame?,
            _ = stopping(shutdown) => return Ok(()),
        };

        match frame {
            Some(ClientMessage::Event(event)) => {
                events += 1;
                if unless_stopping(shutdown, ctx.broker.publish(event)).await.is_none() {
                    return Ok(());
                }
            }
            Some(ClientMessage::CloseSend) => {
                debug!(id = %publisher, events, "publisher finished");
                return unless_stopping(shutdown, send(sink, &ServerMessage::Ack { events }))
                    .await
                    .unwrap_or(Ok(()));
            }
            Some(other) => {
                return Err(Error::Protocol(format!(
                    "unexpected {} on publish stream",
                    frame_name(&other)
                )));
            }
            None => return Ok(()),
        }
    }
}

/// Run `call` to completion unless shutdown is requested first.
async fn unless_stopping<T>(
    shutdown: &mut watch::Receiver<bool>,
    call: impl Future<Output = T>,
) -> Option<T> {
    tokio::select! {
        out = call => Some(out),
        _ = stopping(shutdown) => None,
    }
}

/// Next request frame from the peer, `None` once it has closed its side.
async fn next_frame(source: &mut Source) -> Result<Option<ClientMessage>> {
    while let Some(frame) = source.next().await {
        match frame? {
            WsMessage::Text(text) => return Ok(Some(serde_json::from_str(text.as_str())?)),
            WsMessage::Binary(data) => return Ok(Some(serde_json::from_slice(&data)?)),
            WsMessage::Close(_) => return Ok(None),
            _ => continue,
        }
    }
    Ok(None)
}

async fn send(sink: &mut Sink, message: &ServerMessage) -> Result<()> {
    let text = serde_json::to_string(message)?;
    sink.send(WsMessage::Text(text.into())).await?;
    Ok(())
}

fn frame_name(message: &ClientMessage) -> &'static str {
    match message {
        ClientMessage::Status => "status",
        ClientMessage::Subscribe(_) => "subscribe",
        ClientMessage::Publish => "publish",
        ClientMessage::Event(_) => "event",
        ClientMessage::CloseSend => "close_send",
    }
}
