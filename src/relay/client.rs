//! Per-connection state and the read/write pumps
//!
//! Each admitted connection runs two cooperating loops. The reader owns
//! liveness (pong-extended idle deadline) and feeds the hub; the writer owns
//! keep-alive pings and drains the outbound queue. They share nothing except
//! the queue and the two halves of the socket.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{interval_at, timeout, timeout_at, Instant};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::limit::TokenBucket;
use crate::relay::hub::Hub;
use crate::relay::{
    BURST_SIZE, OUTBOUND_QUEUE_CAP, PING_PERIOD, PONG_WAIT, RATE_LIMIT, WRITE_WAIT,
};

/// Unique identity of a connected client
pub type ClientId = Uuid;

/// Client class advertised at admission time
///
/// The class selects fan-out and history policy: draw clients broadcast with
/// history for late joiners, breaker clients relay pairwise without either.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientClass {
    Draw,
    Breaker,
}

impl ClientClass {
    /// Resolve the class from the `client` query parameter.
    ///
    /// Only `ab` selects the breaker class; anything else is draw.
    pub fn from_query(value: Option<&str>) -> Self {
        match value {
            Some("ab") => ClientClass::Breaker,
            _ => ClientClass::Draw,
        }
    }
}

/// The hub's view of a client: identity, room, class, and the queue sender.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    pub id: ClientId,
    pub room: String,
    pub class: ClientClass,
    pub send: mpsc::Sender<Bytes>,
}

/// A payload on its way from one client to a room.
#[derive(Debug)]
pub struct RelayMessage {
    pub room: String,
    pub data: Bytes,
    pub sender: ClientId,
    pub sender_class: ClientClass,
}

/// Reader-side state of one connection
pub struct Client {
    id: ClientId,
    room: String,
    class: ClientClass,
    limiter: TokenBucket,
    hub: Arc<Hub>,
}

impl Client {
    /// Create a client with a fresh outbound queue.
    ///
    /// Returns the reader-side state, the handle the hub keeps, and the
    /// receiver half of the outbound queue for the writer.
    pub fn new(
        hub: Arc<Hub>,
        room: String,
        class: ClientClass,
    ) -> (Self, ClientHandle, mpsc::Receiver<Bytes>) {
        let id = Uuid::new_v4();
        let (send, recv) = mpsc::channel(OUTBOUND_QUEUE_CAP);

        let client = Self {
            id,
            room: room.clone(),
            class,
            limiter: TokenBucket::new(RATE_LIMIT, BURST_SIZE),
            hub,
        };
        let handle = ClientHandle {
            id,
            room,
            class,
            send,
        };
        (client, handle, recv)
    }

    /// Read frames from the peer and hand them to the hub.
    ///
    /// Exits on any read error, on the idle deadline, or on a close frame.
    /// The deadline is extended only by pongs, so a peer that streams data
    /// but never answers pings is still dropped. On exit the client is
    /// unregistered from the hub; closing the outbound queue is left to the
    /// resulting unregister handling.
    pub async fn read_pump(mut self, mut stream: SplitStream<WebSocket>) {
        let mut deadline = Instant::now() + PONG_WAIT;

        loop {
            let frame = match timeout_at(deadline, stream.next()).await {
                Err(_) => {
                    debug!("Read deadline expired for client in room {}", self.room);
                    break;
                }
                Ok(None) => break,
                Ok(Some(Err(err))) => {
                    debug!("Read error in room {}: {}", self.room, err);
                    break;
                }
                Ok(Some(Ok(frame))) => frame,
            };

            let data = match frame {
                Message::Binary(data) => data,
                Message::Text(text) => Bytes::from(text.as_str().to_owned()),
                Message::Pong(_) => {
                    deadline = Instant::now() + PONG_WAIT;
                    continue;
                }
                // Pings are answered by the transport.
                Message::Ping(_) => continue,
                Message::Close(_) => break,
            };

            if !self.limiter.allow() {
                warn!("Rate limit exceeded, ignoring frame in room {}", self.room);
                continue;
            }

            self.hub
                .broadcast(RelayMessage {
                    room: self.room.clone(),
                    data,
                    sender: self.id,
                    sender_class: self.class,
                })
                .await;
        }

        let Client { id, room, hub, .. } = self;
        hub.unregister(room, id).await;
    }
}

/// Drain the outbound queue to the peer and keep the connection alive.
///
/// A closed queue means the hub has removed this client from its room; the
/// writer then emits a protocol close frame and exits. Every transport write
/// runs under the write deadline and any failure is terminal.
pub async fn write_pump(mut queue: mpsc::Receiver<Bytes>, mut sink: SplitSink<WebSocket, Message>) {
    let mut ticker = interval_at(Instant::now() + PING_PERIOD, PING_PERIOD);

    loop {
        tokio::select! {
            payload = queue.recv() => match payload {
                Some(data) => {
                    if !send_with_deadline(&mut sink, Message::Binary(data)).await {
                        break;
                    }
                }
                None => {
                    send_with_deadline(&mut sink, Message::Close(None)).await;
                    break;
                }
            },
            _ = ticker.tick() => {
                if !send_with_deadline(&mut sink, Message::Ping(Bytes::new())).await {
                    break;
                }
            }
        }
    }
}

/// Write one frame under the write deadline. Returns false on any failure.
async fn send_with_deadline(sink: &mut SplitSink<WebSocket, Message>, msg: Message) -> bool {
    match timeout(WRITE_WAIT, sink.send(msg)).await {
        Ok(Ok(())) => true,
        Ok(Err(err)) => {
            debug!("Write error: {}", err);
            false
        }
        Err(_) => {
            debug!("Write deadline expired");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_class_from_query() {
        assert_eq!(ClientClass::from_query(Some("ab")), ClientClass::Breaker);
        assert_eq!(ClientClass::from_query(Some("draw")), ClientClass::Draw);
        assert_eq!(ClientClass::from_query(Some("")), ClientClass::Draw);
        assert_eq!(ClientClass::from_query(None), ClientClass::Draw);
    }
}
