//! Relay core: rooms, the hub event loop, and per-connection pumps

use std::time::Duration;

pub mod client;
pub mod hub;
pub mod room;

pub use client::{write_pump, Client, ClientClass, ClientHandle, ClientId, RelayMessage};
pub use hub::Hub;
pub use room::{room_cap, Room, RoomClass};

/// Time allowed to write a frame to the peer.
pub const WRITE_WAIT: Duration = Duration::from_secs(10);
/// Time allowed to read the next pong from the peer.
pub const PONG_WAIT: Duration = Duration::from_secs(60);
/// Interval for sending pings to the peer. Must be less than `PONG_WAIT`.
pub const PING_PERIOD: Duration = Duration::from_secs(54);
/// Maximum frame size accepted from a peer.
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024; // 16 KiB
/// Maximum number of payloads retained in a room's history.
pub const HISTORY_CAP: usize = 5000;
/// Maximum users in a party room (64-character passphrase).
pub const MAX_USERS_PARTY: usize = 8;
/// Maximum users in a shared room (any other passphrase).
pub const MAX_USERS_SHARED: usize = 48;
/// Maximum users in a room joined by a breaker-class client.
pub const BREAKER_MAX_USERS: usize = 2;
/// How long a room may hold a single client before it is closed.
pub const LONE_CLIENT_TIMEOUT: Duration = Duration::from_secs(3 * 60);
/// Maximum lifetime of any room.
pub const ROOM_LIFETIME: Duration = Duration::from_secs(2 * 60 * 60);
/// How often the sweeper scans for expired rooms.
pub const ROOM_CHECK_INTERVAL: Duration = Duration::from_secs(5 * 60);
/// Ingress rate limit per client, frames per second.
pub const RATE_LIMIT: f64 = 10.0;
/// Ingress burst allowance per client.
pub const BURST_SIZE: f64 = 20.0;
/// Capacity of each client's outbound queue.
pub const OUTBOUND_QUEUE_CAP: usize = 256;
/// Pause between the closing warning and queue closure, so writers can flush.
pub const CLEANUP_FLUSH_DELAY: Duration = Duration::from_millis(100);

/// Payload sent to every member just before their room is closed.
pub const CLOSE_WARNING: [u8; 1] = [0x05];
