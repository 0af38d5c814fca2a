//! AetherDraw relay server
//!
//! A passphrase-addressed, in-memory WebSocket relay. Clients that connect
//! with the same passphrase form a room; every payload a client sends is
//! fanned out to the room and retained in a bounded history that is replayed
//! to late joiners. A second client class plays pairwise matches instead:
//! its payloads skip the sender and are never retained.
//!
//! ## Architecture
//!
//! - **Hub** ([`relay::Hub`]): one event loop consumes register, unregister,
//!   broadcast, and cleanup events, so room membership has a single writer.
//! - **Connection pumps** ([`relay::client`]): a reader (liveness, rate
//!   limiting, ingress) and a writer (queue drain, keep-alive pings) per
//!   connection, sharing only the bounded outbound queue.
//! - **Rooms** ([`relay::room`]): passive state — members, history ring,
//!   lone-client timer, creation time.
//! - **HTTP surface** ([`http`]): the `/ws` admission endpoint plus a small
//!   auxiliary surface (marker search, counters, keep-alive) that shares no
//!   state with the relay core.

pub mod config;
pub mod error;
pub mod http;
pub mod limit;
pub mod relay;

pub use config::RelayConfig;
pub use error::{RelayError, Result};
pub use limit::TokenBucket;
pub use relay::{Client, ClientClass, ClientHandle, Hub, RelayMessage, Room, RoomClass};
