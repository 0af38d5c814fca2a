//! WebSocket admission front-end
//!
//! Resolves the room cap from the passphrase and advertised client class,
//! rejects joins to full rooms, and hands upgraded connections to the hub.

use std::sync::Arc;

use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use futures_util::StreamExt;
use serde::Deserialize;
use tracing::warn;

use crate::http::AppState;
use crate::relay::{room_cap, write_pump, Client, ClientClass, Hub, MAX_MESSAGE_SIZE};

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    passphrase: Option<String>,
    client: Option<String>,
}

/// `GET /ws?passphrase=...&client=...`
///
/// The occupancy check is advisory: it runs before registration, so two
/// concurrent joins can race one admission past the cap.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> Response {
    let passphrase = match query.passphrase {
        Some(p) if !p.is_empty() => p,
        _ => return (StatusCode::BAD_REQUEST, "Passphrase is required").into_response(),
    };

    let class = ClientClass::from_query(query.client.as_deref());
    let cap = room_cap(&passphrase, class);

    let current = state.hub.occupancy(&passphrase).await;
    if current >= cap {
        warn!(
            "Rejected connection to full room {} ({}/{})",
            passphrase, current, cap
        );
        return (StatusCode::FORBIDDEN, "Room is full").into_response();
    }

    let hub = Arc::clone(&state.hub);
    ws.max_message_size(MAX_MESSAGE_SIZE)
        .on_upgrade(move |socket| client_session(hub, socket, passphrase, class))
}

/// Register the upgraded connection and run its pumps.
///
/// The writer runs in its own task; this future lives as long as the reader.
async fn client_session(hub: Arc<Hub>, socket: WebSocket, passphrase: String, class: ClientClass) {
    let (sink, stream) = socket.split();
    let (client, handle, queue) = Client::new(Arc::clone(&hub), passphrase, class);

    hub.register(handle).await;

    tokio::spawn(write_pump(queue, sink));
    client.read_pump(stream).await;
}

// Admission is tested against a served listener: the WebSocket upgrade
// extractor refuses any request that did not arrive over a real hyper
// connection, so an in-process router call alone cannot reach the handler.
#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;

    use bytes::Bytes;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::sync::mpsc;

    use crate::http::counters::Counters;
    use crate::http::ip_limit::IpRateLimiter;
    use crate::http::{router, AppState};
    use crate::relay::ClientHandle;

    async fn serve() -> (SocketAddr, Arc<Hub>) {
        let hub = Arc::new(Hub::new());
        tokio::spawn(Arc::clone(&hub).run());

        let state = AppState {
            hub: Arc::clone(&hub),
            dataset: Arc::new(Vec::new()),
            counters: Arc::new(Counters::new()),
            ip_limiter: Arc::new(IpRateLimiter::new()),
        };

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = router(state);
        tokio::spawn(async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await
            .unwrap();
        });

        (addr, hub)
    }

    async fn join(hub: &Hub, room: &str, class: ClientClass, expect: usize) -> mpsc::Receiver<Bytes> {
        let (tx, rx) = mpsc::channel(8);
        hub.register(ClientHandle {
            id: uuid::Uuid::new_v4(),
            room: room.to_string(),
            class,
            send: tx,
        })
        .await;
        while hub.occupancy(room).await != expect {
            tokio::task::yield_now().await;
        }
        rx
    }

    /// Issue a WebSocket upgrade request and return the response status line.
    async fn upgrade_status(addr: SocketAddr, path: &str) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let request = format!(
            "GET {} HTTP/1.1\r\n\
             Host: localhost\r\n\
             Connection: Upgrade\r\n\
             Upgrade: websocket\r\n\
             Sec-WebSocket-Version: 13\r\n\
             Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
             \r\n",
            path
        );
        stream.write_all(request.as_bytes()).await.unwrap();

        let mut response = Vec::new();
        let mut buf = [0u8; 1024];
        loop {
            let n = stream.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            response.extend_from_slice(&buf[..n]);
            if response.windows(4).any(|w| w == b"\r\n\r\n") {
                break;
            }
        }

        let response = String::from_utf8_lossy(&response).to_string();
        response.lines().next().unwrap_or_default().to_string()
    }

    #[tokio::test]
    async fn test_missing_passphrase_rejected() {
        let (addr, _hub) = serve().await;

        let status = upgrade_status(addr, "/ws").await;
        assert!(status.starts_with("HTTP/1.1 400"), "got: {}", status);

        let status = upgrade_status(addr, "/ws?passphrase=").await;
        assert!(status.starts_with("HTTP/1.1 400"), "got: {}", status);
    }

    #[tokio::test]
    async fn test_full_room_rejected() {
        let (addr, hub) = serve().await;
        let _rx1 = join(&hub, "bout", ClientClass::Breaker, 1).await;
        let _rx2 = join(&hub, "bout", ClientClass::Breaker, 2).await;

        // Two breaker clients fill the room; a third is turned away.
        let status = upgrade_status(addr, "/ws?passphrase=bout&client=ab").await;
        assert!(status.starts_with("HTTP/1.1 403"), "got: {}", status);
    }

    #[tokio::test]
    async fn test_admission_below_cap_upgrades() {
        let (addr, hub) = serve().await;
        let _rx1 = join(&hub, "duel", ClientClass::Breaker, 1).await;

        // One of two seats taken: the join at the cap boundary still succeeds.
        let status = upgrade_status(addr, "/ws?passphrase=duel&client=ab").await;
        assert!(status.starts_with("HTTP/1.1 101"), "got: {}", status);
    }
}
