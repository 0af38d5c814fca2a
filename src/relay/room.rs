//! Room state: membership, bounded history, and the lone-client timer
//!
//! A room is passive; all lifecycle decisions are made by the hub loop.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::warn;

use crate::relay::client::{ClientClass, ClientHandle, ClientId};
use crate::relay::{
    BREAKER_MAX_USERS, HISTORY_CAP, LONE_CLIENT_TIMEOUT, MAX_USERS_PARTY, MAX_USERS_SHARED,
};

/// Room class derived from the passphrase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomClass {
    /// 64-character passphrase, generated for a party
    Party,
    /// Any other passphrase, typed by hand and shareable
    Shared,
}

impl RoomClass {
    /// Classify a passphrase.
    pub fn of(passphrase: &str) -> Self {
        if passphrase.len() == 64 {
            RoomClass::Party
        } else {
            RoomClass::Shared
        }
    }

    /// Maximum users admitted to a room of this class.
    pub fn max_users(self) -> usize {
        match self {
            RoomClass::Party => MAX_USERS_PARTY,
            RoomClass::Shared => MAX_USERS_SHARED,
        }
    }
}

/// User cap for a room, as seen by an admitting client.
///
/// Breaker clients play pairwise matches, so they override the cap to 2.
pub fn room_cap(passphrase: &str, class: ClientClass) -> usize {
    if class == ClientClass::Breaker {
        BREAKER_MAX_USERS
    } else {
        RoomClass::of(passphrase).max_users()
    }
}

/// A room member as tracked by the hub.
///
/// The `send` half here is the only long-lived sender for the member's
/// outbound queue; dropping the member closes the queue.
#[derive(Debug)]
pub struct Member {
    pub class: ClientClass,
    pub send: mpsc::Sender<Bytes>,
}

/// A passphrase-addressed room
pub struct Room {
    /// Registered members indexed by client id
    members: HashMap<ClientId, Member>,
    /// In-memory payload history, oldest first
    history: Arc<RwLock<VecDeque<Bytes>>>,
    /// Timer that schedules cleanup when only one client is left
    cleanup_timer: Option<JoinHandle<()>>,
    /// When the room was created
    created_at: Instant,
}

impl Room {
    /// Create an empty room.
    pub fn new() -> Self {
        Self {
            members: HashMap::new(),
            history: Arc::new(RwLock::new(VecDeque::with_capacity(HISTORY_CAP))),
            cleanup_timer: None,
            created_at: Instant::now(),
        }
    }

    /// Insert a member.
    pub fn insert(&mut self, handle: ClientHandle) {
        self.members.insert(
            handle.id,
            Member {
                class: handle.class,
                send: handle.send,
            },
        );
    }

    /// Remove a member, returning it if present.
    ///
    /// The returned member owns the queue sender; dropping it closes the
    /// member's outbound queue.
    pub fn remove(&mut self, id: &ClientId) -> Option<Member> {
        self.members.remove(id)
    }

    /// Current occupancy.
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Whether the room has no members.
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Iterate over the members.
    pub fn members(&self) -> impl Iterator<Item = (&ClientId, &Member)> {
        self.members.iter()
    }

    /// Shared handle to the history, for replay outside the room index lock.
    pub fn history(&self) -> Arc<RwLock<VecDeque<Bytes>>> {
        Arc::clone(&self.history)
    }

    /// Append a payload to the history, dropping the oldest entry past the cap.
    pub async fn append_history(&self, data: Bytes) {
        let mut history = self.history.write().await;
        history.push_back(data);
        if history.len() > HISTORY_CAP {
            history.pop_front();
        }
    }

    /// Age of the room.
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Arm the lone-client timer.
    ///
    /// When it fires, the room name is sent on the hub's cleanup channel.
    pub fn arm_cleanup_timer(&mut self, name: String, cleanup_tx: mpsc::Sender<String>) {
        self.cleanup_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(LONE_CLIENT_TIMEOUT).await;
            let _ = cleanup_tx.send(name).await;
        }));
    }

    /// Disarm the lone-client timer. A no-op when none is armed.
    pub fn disarm_cleanup_timer(&mut self) {
        if let Some(timer) = self.cleanup_timer.take() {
            timer.abort();
        }
    }

    /// Whether a lone-client timer is currently armed.
    pub fn timer_armed(&self) -> bool {
        self.cleanup_timer.is_some()
    }
}

impl Default for Room {
    fn default() -> Self {
        Self::new()
    }
}

/// Replay a history snapshot onto a newly registered client's queue.
///
/// Entries are offered without blocking; a full queue skips the entry so that
/// replay can never stall registration.
pub async fn replay_history(
    history: &RwLock<VecDeque<Bytes>>,
    name: &str,
    send: &mpsc::Sender<Bytes>,
) {
    let history = history.read().await;
    for payload in history.iter() {
        if send.try_send(payload.clone()).is_err() {
            warn!("Failed to replay history entry to client in room {}, send queue full", name);
        }
    }
}
