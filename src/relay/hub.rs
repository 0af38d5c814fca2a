//! The hub: single serialization point for all room mutation
//!
//! Every register, unregister, broadcast, and room-cleanup event is consumed
//! by one loop, so membership is never written from two tasks. Admission and
//! the sweeper only take read locks on the room index for occupancy scans.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::time::interval;
use tracing::{info, warn};

use crate::relay::client::{ClientClass, ClientHandle, ClientId, RelayMessage};
use crate::relay::room::{replay_history, Room};
use crate::relay::{CLEANUP_FLUSH_DELAY, CLOSE_WARNING, ROOM_CHECK_INTERVAL, ROOM_LIFETIME};

/// Receiver halves of the hub's event channels, taken once by the run loop.
struct HubReceivers {
    register_rx: mpsc::Receiver<ClientHandle>,
    unregister_rx: mpsc::Receiver<(String, ClientId)>,
    broadcast_rx: mpsc::Receiver<RelayMessage>,
    cleanup_rx: mpsc::Receiver<String>,
}

/// Maintains the set of active rooms and relays payloads between members.
pub struct Hub {
    /// Registered rooms indexed by passphrase
    rooms: RwLock<HashMap<String, Room>>,
    register_tx: mpsc::Sender<ClientHandle>,
    unregister_tx: mpsc::Sender<(String, ClientId)>,
    broadcast_tx: mpsc::Sender<RelayMessage>,
    cleanup_tx: mpsc::Sender<String>,
    receivers: Mutex<Option<HubReceivers>>,
}

impl Hub {
    /// Create a new hub. Call [`Hub::run`] on an `Arc` of it to start the loop.
    pub fn new() -> Self {
        let (register_tx, register_rx) = mpsc::channel(1);
        let (unregister_tx, unregister_rx) = mpsc::channel(1);
        let (broadcast_tx, broadcast_rx) = mpsc::channel(1);
        let (cleanup_tx, cleanup_rx) = mpsc::channel(1);

        Self {
            rooms: RwLock::new(HashMap::new()),
            register_tx,
            unregister_tx,
            broadcast_tx,
            cleanup_tx,
            receivers: Mutex::new(Some(HubReceivers {
                register_rx,
                unregister_rx,
                broadcast_rx,
                cleanup_rx,
            })),
        }
    }

    /// Hand a newly admitted client to the hub.
    pub async fn register(&self, handle: ClientHandle) {
        let _ = self.register_tx.send(handle).await;
    }

    /// Announce that a client's reader has exited.
    pub async fn unregister(&self, room: String, id: ClientId) {
        let _ = self.unregister_tx.send((room, id)).await;
    }

    /// Relay a payload to a room.
    pub async fn broadcast(&self, message: RelayMessage) {
        let _ = self.broadcast_tx.send(message).await;
    }

    /// Current occupancy of a room; 0 when the room does not exist.
    pub async fn occupancy(&self, room: &str) -> usize {
        self.rooms
            .read()
            .await
            .get(room)
            .map(|r| r.len())
            .unwrap_or(0)
    }

    /// Number of active rooms.
    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    /// Run the hub event loop. Consumes the receiver set; a second call returns
    /// immediately.
    pub async fn run(self: Arc<Self>) {
        let receivers = self.receivers.lock().await.take();
        let Some(mut rx) = receivers else {
            warn!("Hub event loop already running");
            return;
        };

        loop {
            tokio::select! {
                Some(handle) = rx.register_rx.recv() => self.handle_register(handle).await,
                Some((room, id)) = rx.unregister_rx.recv() => self.handle_unregister(&room, id).await,
                Some(message) = rx.broadcast_rx.recv() => self.handle_broadcast(message).await,
                Some(name) = rx.cleanup_rx.recv() => self.handle_cleanup(&name).await,
                else => break,
            }
        }
    }

    /// Insert the client into its room (creating the room on first join),
    /// manage the lone-client timer, then replay history to the newcomer.
    async fn handle_register(&self, handle: ClientHandle) {
        let name = handle.room.clone();
        let send = handle.send.clone();

        let history = {
            let mut rooms = self.rooms.write().await;
            let room = rooms.entry(name.clone()).or_insert_with(|| {
                info!("Created new room {}", name);
                Room::new()
            });
            room.insert(handle);
            if room.timer_armed() {
                room.disarm_cleanup_timer();
                info!("Stopped cleanup timer for room {}", name);
            }
            if room.len() == 1 {
                info!("First client in room {}, starting cleanup timer", name);
                room.arm_cleanup_timer(name.clone(), self.cleanup_tx.clone());
            }
            info!("Client registered in room {} ({} present)", name, room.len());
            room.history()
        };

        // Outside the index lock: replay never blocks other rooms.
        replay_history(&history, &name, &send).await;
    }

    /// Remove the client and close its queue; delete the room when it empties,
    /// or arm the lone-client timer when one member remains. Tolerates clients
    /// already evicted and rooms already gone.
    async fn handle_unregister(&self, name: &str, id: ClientId) {
        let mut rooms = self.rooms.write().await;
        if let Some(room) = rooms.get_mut(name) {
            if room.remove(&id).is_some() {
                info!("Client unregistered from room {} ({} left)", name, room.len());
                if room.is_empty() {
                    room.disarm_cleanup_timer();
                    rooms.remove(name);
                    info!("Room {} is empty, deleting", name);
                } else if room.len() == 1 {
                    info!("Only one client left in room {}, starting cleanup timer", name);
                    room.arm_cleanup_timer(name.to_string(), self.cleanup_tx.clone());
                }
            }
        }
    }

    /// Append to history (draw sources only) and fan the payload out.
    ///
    /// Breaker sources are excluded from their own fan-out. A member whose
    /// queue is full is evicted on the spot; its reader will follow up with an
    /// unregister that finds nothing left to do.
    async fn handle_broadcast(&self, message: RelayMessage) {
        let mut rooms = self.rooms.write().await;
        let Some(room) = rooms.get_mut(&message.room) else {
            return;
        };

        if message.sender_class != ClientClass::Breaker {
            room.append_history(message.data.clone()).await;
        }

        let mut evicted: Vec<ClientId> = Vec::new();
        for (id, member) in room.members() {
            if message.sender_class == ClientClass::Breaker && *id == message.sender {
                continue;
            }
            if member.send.try_send(message.data.clone()).is_err() {
                evicted.push(*id);
            }
        }
        for id in evicted {
            room.remove(&id);
            warn!("Evicted slow client from room {}", message.room);
        }
    }

    /// Warn every member, give writers a moment to flush, then close all
    /// queues and drop the room. A no-op when the room is already gone.
    async fn handle_cleanup(&self, name: &str) {
        let mut rooms = self.rooms.write().await;
        if let Some(mut room) = rooms.remove(name) {
            info!("Sending closing warning to room {}", name);
            room.disarm_cleanup_timer();

            let warning = Bytes::from_static(&CLOSE_WARNING);
            for (_, member) in room.members() {
                // A member whose writer already exited surfaces as an
                // immediate send error; skip it and keep closing the rest.
                let _ = member.send.send(warning.clone()).await;
            }

            tokio::time::sleep(CLEANUP_FLUSH_DELAY).await;
            drop(room);
            info!("Closed room {}", name);
        }
    }

    /// Scan for rooms past their lifetime and schedule each for cleanup.
    ///
    /// The cleanup sends happen outside the index lock: the hub loop consumes
    /// them and takes the same lock.
    pub async fn sweep_expired(&self) {
        let expired: Vec<String> = {
            let rooms = self.rooms.read().await;
            rooms
                .iter()
                .filter(|(_, room)| room.age() > ROOM_LIFETIME)
                .map(|(name, _)| name.clone())
                .collect()
        };

        for name in expired {
            info!("Room {} has expired, scheduling for cleanup", name);
            let _ = self.cleanup_tx.send(name).await;
        }
    }

    /// Periodically sweep for expired rooms.
    pub async fn run_sweeper(self: Arc<Self>) {
        let mut ticker = interval(ROOM_CHECK_INTERVAL);
        // interval fires immediately; skip the first tick so the first sweep
        // happens one full period after startup.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            self.sweep_expired().await;
        }
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::LONE_CLIENT_TIMEOUT;
    use std::time::Duration;

    fn spawn_hub() -> Arc<Hub> {
        let hub = Arc::new(Hub::new());
        tokio::spawn(Arc::clone(&hub).run());
        hub
    }

    fn handle(room: &str, class: ClientClass, cap: usize) -> (ClientHandle, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(cap);
        let handle = ClientHandle {
            id: uuid::Uuid::new_v4(),
            room: room.to_string(),
            class,
            send: tx,
        };
        (handle, rx)
    }

    fn msg(room: &str, data: Vec<u8>, sender: &ClientHandle) -> RelayMessage {
        RelayMessage {
            room: room.to_string(),
            data: Bytes::from(data),
            sender: sender.id,
            sender_class: sender.class,
        }
    }

    async fn wait_for_occupancy(hub: &Hub, room: &str, n: usize) {
        while hub.occupancy(room).await != n {
            tokio::task::yield_now().await;
        }
    }

    async fn wait_for_room_count(hub: &Hub, n: usize) {
        while hub.room_count().await != n {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_history_replayed_in_order_before_live_traffic() {
        let hub = spawn_hub();

        let (c1, mut rx1) = handle("alpha", ClientClass::Draw, 8);
        hub.register(c1.clone()).await;
        wait_for_occupancy(&hub, "alpha", 1).await;

        hub.broadcast(msg("alpha", vec![0x01], &c1)).await;
        hub.broadcast(msg("alpha", vec![0x02], &c1)).await;
        // Draw senders receive their own broadcasts; draining c1 proves both
        // events were processed before the second client joins.
        assert_eq!(rx1.recv().await.unwrap().as_ref(), &[0x01]);
        assert_eq!(rx1.recv().await.unwrap().as_ref(), &[0x02]);

        let (c2, mut rx2) = handle("alpha", ClientClass::Draw, 8);
        hub.register(c2).await;
        assert_eq!(rx2.recv().await.unwrap().as_ref(), &[0x01]);
        assert_eq!(rx2.recv().await.unwrap().as_ref(), &[0x02]);

        hub.broadcast(msg("alpha", vec![0x03], &c1)).await;
        assert_eq!(rx2.recv().await.unwrap().as_ref(), &[0x03]);
    }

    #[tokio::test]
    async fn test_breaker_fanout_excludes_sender_and_history() {
        let hub = spawn_hub();

        let (b1, mut rx1) = handle("bout", ClientClass::Breaker, 8);
        let (b2, mut rx2) = handle("bout", ClientClass::Breaker, 8);
        hub.register(b1.clone()).await;
        hub.register(b2.clone()).await;
        wait_for_occupancy(&hub, "bout", 2).await;

        hub.broadcast(msg("bout", vec![0xAA], &b1)).await;
        assert_eq!(rx2.recv().await.unwrap().as_ref(), &[0xAA]);

        // b1 never saw its own payload: the first frame it receives is b2's.
        hub.broadcast(msg("bout", vec![0xBB], &b2)).await;
        assert_eq!(rx1.recv().await.unwrap().as_ref(), &[0xBB]);

        // Breaker payloads are never retained, so a late joiner gets no
        // replay: its first frame is the next live broadcast.
        let (d3, mut rx3) = handle("bout", ClientClass::Draw, 8);
        hub.register(d3).await;
        wait_for_occupancy(&hub, "bout", 3).await;
        hub.broadcast(msg("bout", vec![0xCC], &b1)).await;
        assert_eq!(rx3.recv().await.unwrap().as_ref(), &[0xCC]);
    }

    #[tokio::test]
    async fn test_history_bounded_for_late_joiner() {
        let hub = spawn_hub();

        let (c1, _rx1) = handle("r", ClientClass::Draw, 1);
        hub.register(c1.clone()).await;
        wait_for_occupancy(&hub, "r", 1).await;

        let total = crate::relay::HISTORY_CAP + 1;
        for i in 1..=total {
            hub.broadcast(msg("r", vec![(i >> 8) as u8, (i & 0xff) as u8], &c1))
                .await;
        }

        let (c2, mut rx2) = handle("r", ClientClass::Draw, crate::relay::HISTORY_CAP);
        hub.register(c2.clone()).await;

        // The oldest payload fell off, so replay starts at the second send.
        let first = rx2.recv().await.unwrap();
        assert_eq!(first.as_ref(), &[0, 2]);
        let mut last = first;
        for _ in 1..crate::relay::HISTORY_CAP {
            last = rx2.recv().await.unwrap();
        }
        assert_eq!(last.as_ref(), &[(total >> 8) as u8, (total & 0xff) as u8]);

        // Exactly the capped history was replayed: the next frame c2 sees is
        // a fresh broadcast, not a leftover replay entry.
        hub.broadcast(msg("r", vec![0xFF, 0xFF], &c2)).await;
        assert_eq!(rx2.recv().await.unwrap().as_ref(), &[0xFF, 0xFF]);
    }

    #[tokio::test]
    async fn test_slow_consumer_evicted() {
        let hub = spawn_hub();

        let (c1, mut rx1) = handle("s", ClientClass::Draw, 1);
        let (c2, mut rx2) = handle("s", ClientClass::Draw, 8);
        hub.register(c1.clone()).await;
        hub.register(c2.clone()).await;
        wait_for_occupancy(&hub, "s", 2).await;

        hub.broadcast(msg("s", vec![0x10], &c2)).await;
        assert_eq!(rx2.recv().await.unwrap().as_ref(), &[0x10]);

        // c1's queue is full now; the next broadcast evicts it.
        hub.broadcast(msg("s", vec![0x11], &c2)).await;
        assert_eq!(rx2.recv().await.unwrap().as_ref(), &[0x11]);
        wait_for_occupancy(&hub, "s", 1).await;

        // c1 drains the payload it got, then observes the closed queue.
        assert_eq!(rx1.recv().await.unwrap().as_ref(), &[0x10]);
        assert_eq!(rx1.recv().await, None);

        // The evicted client's reader still sends an unregister; the hub
        // tolerates it and stays responsive.
        hub.unregister("s".to_string(), c1.id).await;
        hub.broadcast(msg("s", vec![0x12], &c2)).await;
        assert_eq!(rx2.recv().await.unwrap().as_ref(), &[0x12]);
        assert_eq!(hub.occupancy("s").await, 1);
    }

    #[tokio::test]
    async fn test_connect_disconnect_cycles_leave_empty_index() {
        let hub = spawn_hub();

        for _ in 0..2 {
            let (c, mut rx) = handle("cycle", ClientClass::Draw, 4);
            hub.register(c.clone()).await;
            wait_for_occupancy(&hub, "cycle", 1).await;

            hub.unregister("cycle".to_string(), c.id).await;
            assert_eq!(rx.recv().await, None);
            wait_for_room_count(&hub, 0).await;
        }

        // Unregister against a room that no longer exists is a no-op.
        hub.unregister("cycle".to_string(), uuid::Uuid::new_v4())
            .await;
        let (c, _rx) = handle("cycle", ClientClass::Draw, 4);
        hub.register(c).await;
        wait_for_occupancy(&hub, "cycle", 1).await;
    }

    #[tokio::test]
    async fn test_broadcast_to_unknown_room_is_dropped() {
        let hub = spawn_hub();
        let (ghost, _rx) = handle("nowhere", ClientClass::Draw, 4);

        hub.broadcast(msg("nowhere", vec![0x01], &ghost)).await;

        // The hub neither created a room nor fell over.
        let (c, mut rx) = handle("elsewhere", ClientClass::Draw, 4);
        hub.register(c.clone()).await;
        wait_for_occupancy(&hub, "elsewhere", 1).await;
        assert_eq!(hub.room_count().await, 1);

        hub.broadcast(msg("elsewhere", vec![0x02], &c)).await;
        assert_eq!(rx.recv().await.unwrap().as_ref(), &[0x02]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lone_client_timer_closes_room() {
        let hub = spawn_hub();

        let (c1, mut rx1) = handle("q", ClientClass::Draw, 8);
        hub.register(c1.clone()).await;
        wait_for_occupancy(&hub, "q", 1).await;

        // A second client joining disarms the timer; its departure re-arms it.
        let (c2, _rx2) = handle("q", ClientClass::Draw, 8);
        hub.register(c2.clone()).await;
        wait_for_occupancy(&hub, "q", 2).await;
        hub.unregister("q".to_string(), c2.id).await;
        wait_for_occupancy(&hub, "q", 1).await;

        tokio::time::sleep(LONE_CLIENT_TIMEOUT + Duration::from_secs(1)).await;

        // The survivor receives the closing warning, then nothing more.
        assert_eq!(rx1.recv().await.unwrap().as_ref(), &CLOSE_WARNING);
        assert_eq!(rx1.recv().await, None);
        wait_for_room_count(&hub, 0).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_client_cancels_lone_timer() {
        let hub = spawn_hub();

        let (c1, mut rx1) = handle("q", ClientClass::Draw, 8);
        hub.register(c1.clone()).await;
        wait_for_occupancy(&hub, "q", 1).await;

        tokio::time::sleep(Duration::from_secs(100)).await;

        let (c2, _rx2) = handle("q", ClientClass::Draw, 8);
        hub.register(c2).await;
        wait_for_occupancy(&hub, "q", 2).await;

        // Well past the original deadline: the room is still open and no
        // warning was delivered.
        tokio::time::sleep(LONE_CLIENT_TIMEOUT * 2).await;
        assert_eq!(hub.occupancy("q").await, 2);
        assert!(rx1.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_closes_expired_rooms() {
        let hub = spawn_hub();

        let (c1, mut rx1) = handle("old", ClientClass::Draw, 8);
        let (c2, mut rx2) = handle("old", ClientClass::Draw, 8);
        hub.register(c1).await;
        hub.register(c2).await;
        wait_for_occupancy(&hub, "old", 2).await;

        tokio::time::sleep(ROOM_LIFETIME + Duration::from_secs(1)).await;
        hub.sweep_expired().await;

        // Every member gets the warning as the last payload before closure.
        assert_eq!(rx1.recv().await.unwrap().as_ref(), &CLOSE_WARNING);
        assert_eq!(rx1.recv().await, None);
        assert_eq!(rx2.recv().await.unwrap().as_ref(), &CLOSE_WARNING);
        assert_eq!(rx2.recv().await, None);
        wait_for_room_count(&hub, 0).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_spares_young_rooms() {
        let hub = spawn_hub();

        let (c1, mut rx1) = handle("young", ClientClass::Draw, 8);
        let (c2, _rx2) = handle("young", ClientClass::Draw, 8);
        hub.register(c1).await;
        hub.register(c2).await;
        wait_for_occupancy(&hub, "young", 2).await;

        tokio::time::sleep(ROOM_LIFETIME / 2).await;
        hub.sweep_expired().await;

        assert_eq!(hub.occupancy("young").await, 2);
        assert!(rx1.try_recv().is_err());
    }
}
