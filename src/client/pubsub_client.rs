//! RPC client
//!
//! `Client` opens one WebSocket connection per call, mirroring how the server
//! handles them. Subscribing yields a [`Subscriber`] that reads events until
//! the server closes the stream; publishing yields a [`Publisher`] whose
//! `close` waits for the server's ack.

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tungstenite::protocol::Message as WsMessage;

use crate::broker::message::{Event, Subscription};
use crate::transport::message::{ClientMessage, ServerMessage, ServiceState};
use crate::utils::error::{Error, Result};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone)]
pub struct Client {
    endpoint: String,
}

impl Client {
    /// `endpoint` is either `host:port` or a full `ws://`/`wss://` URL.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
        }
    }

    pub fn url(&self) -> String {
        if self.endpoint.starts_with("ws://") || self.endpoint.starts_with("wss://") {
            self.endpoint.clone()
        } else {
            format!("ws://{}", self.endpoint)
        }
    }

    async fn open(&self, request: &ClientMessage) -> Result<WsStream> {
        let (mut ws, _response) = connect_async(self.url()).await?;
        send(&mut ws, request).await?;
        Ok(ws)
    }

    pub async fn status(&self) -> Result<ServiceState> {
        let mut ws = self.open(&ClientMessage::Status).await?;
        match recv(&mut ws).await? {
            Some(ServerMessage::ServiceState(state)) => {
                let _ = ws.close(None).await;
                Ok(state)
            }
            other => Err(unexpected(other)),
        }
    }

    pub async fn subscribe(&self, subscription: Subscription) -> Result<Subscriber> {
        let mut ws = self.open(&ClientMessage::Subscribe(subscription)).await?;
        match recv(&mut ws).await? {
            Some(ServerMessage::Subscribed { consumer, group }) => Ok(Subscriber {
                ws,
                consumer,
                group,
            }),
            other => Err(unexpected(other)),
        }
    }

    pub async fn publisher(&self) -> Result<Publisher> {
        let mut ws = self.open(&ClientMessage::Publish).await?;
        match recv(&mut ws).await? {
            Some(ServerMessage::Accepted) => Ok(Publisher { ws, sent: 0 }),
            other => Err(unexpected(other)),
        }
    }
}

/// An open Subscribe stream.
pub struct Subscriber {
    ws: WsStream,
    consumer: String,
    group: String,
}

impl Subscriber {
    /// Consumer id assigned by the server.
    pub fn consumer(&self) -> &str {
        &self.consumer
    }

    /// Group joined; generated by the server when none was requested.
    pub fn group(&self) -> &str {
        &self.group
    }

    /// Next event, or `None` once the server has ended the stream.
    pub async fn next(&mut self) -> Result<Option<Event>> {
        match recv(&mut self.ws).await? {
            Some(ServerMessage::Event(event)) => Ok(Some(event)),
            None => Ok(None),
            other => Err(unexpected(other)),
        }
    }

    pub async fn close(mut self) -> Result<()> {
        self.ws.close(None).await?;
        Ok(())
    }
}

/// An open Publish stream.
pub struct Publisher {
    ws: WsStream,
    sent: u64,
}

impl Publisher {
    pub async fn send(&mut self, event: Event) -> Result<()> {
        send(&mut self.ws, &ClientMessage::Event(event)).await?;
        self.sent += 1;
        Ok(())
    }

    pub fn sent(&self) -> u64 {
        self.sent
    }

    /// Finish the stream and wait for the server's ack. Returns the number of
    /// events the server received.
    pub async fn close(mut self) -> Result<u64> {
        send(&mut self.ws, &ClientMessage::CloseSend).await?;
        let events = match recv(&mut self.ws).await? {
            Some(ServerMessage::Ack { events }) => events,
            other => return Err(unexpected(other)),
        };
        let _ = self.ws.close(None).await;
        Ok(events)
    }
}

async fn send(ws: &mut WsStream, message: &ClientMessage) -> Result<()> {
    let text = serde_json::to_string(message)?;
    ws.send(WsMessage::Text(text.into())).await?;
    Ok(())
}

async fn recv(ws: &mut WsStream) -> Result<Option<ServerMessage>> {
    while let Some(frame) = ws.next().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                let e = Error::from(e);
                if e.is_terminated() {
                    return Ok(None);
                }
                return Err(e);
            }
        };
        match frame {
            WsMessage::Text(text) => return Ok(Some(serde_json::from_str(text.as_str())?)),
            WsMessage::Binary(data) => return Ok(Some(serde_json::from_slice(&data)?)),
            WsMessage::Close(_) => return Ok(None),
            _ => continue,
        }
    }
    Ok(None)
}

fn unexpected(message: Option<ServerMessage>) -> Error {
    match message {
        Some(ServerMessage::Error { code, message }) => Error::Remote { code, message },
        Some(other) => Error::Protocol(format!("unexpected response: {other:?}")),
        None => Error::Transport(tungstenite::Error::ConnectionClosed),
    }
}
