use chisel_hooks::{Factory, HookRegistry};
use chisel_protocol::ClientPacket;
use chisel_types::{BlockPos, ItemStack, Location};
use chisel_world::{Entity, EntityKind, SharedChunk, World};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::info;

/// Out-of-band requests other tasks may post into a session loop.
#[derive(Debug)]
pub enum SessionCtrl {
    /// Move the player and replay its spawn sequence.
    Teleport(Location),
}

/// Snapshot state a session publishes for the rest of the server to
/// read: the broadcast bus consults these without touching the session.
pub struct SessionShared {
    pub eid: u32,
    pub username: String,
    pub location: Mutex<Location>,
    pub chunk_keys: Mutex<HashSet<(i32, i32)>>,
    pub held: Mutex<Option<ItemStack>>,
}

/// A registered, authenticated session as the factory sees it.
pub struct SessionHandle {
    pub packet_tx: mpsc::UnboundedSender<ClientPacket>,
    pub ctrl_tx: mpsc::UnboundedSender<SessionCtrl>,
    pub shared: Arc<SessionShared>,
}

/// The server-wide hub: session registry, broadcast bus, eid allocator,
/// and clock. Passed to every session and (as `dyn Factory`) to hooks.
pub struct ServerFactory {
    pub world: Arc<World>,
    pub registry: Arc<HookRegistry>,
    sessions: RwLock<HashMap<String, SessionHandle>>,
    next_eid: AtomicU32,
    started: Instant,
}

impl ServerFactory {
    pub fn new(world: Arc<World>, registry: Arc<HookRegistry>) -> Self {
        Self {
            world,
            registry,
            sessions: RwLock::new(HashMap::new()),
            next_eid: AtomicU32::new(1),
            started: Instant::now(),
        }
    }

    pub fn allocate_eid(&self) -> u32 {
        self.next_eid.fetch_add(1, Ordering::Relaxed)
    }

    pub fn insert_session(&self, handle: SessionHandle) {
        let mut sessions = self.sessions.write().unwrap();
        sessions.insert(handle.shared.username.clone(), handle);
    }

    /// Remove a session, but only if the eid still matches: a newer
    /// login under the same name must not be evicted by the old one.
    pub fn remove_session(&self, username: &str, eid: u32) {
        let mut sessions = self.sessions.write().unwrap();
        if sessions.get(username).is_some_and(|h| h.shared.eid == eid) {
            sessions.remove(username);
        }
    }

    pub fn session_count(&self) -> usize {
        self.sessions.read().unwrap().len()
    }

    /// Spawn/equipment snapshots of every registered player, used to
    /// replay the room to a client that just authenticated.
    pub fn snapshots(&self) -> Vec<(u32, String, Location, Option<ItemStack>)> {
        let sessions = self.sessions.read().unwrap();
        sessions
            .values()
            .map(|h| {
                (
                    h.shared.eid,
                    h.shared.username.clone(),
                    *h.shared.location.lock().unwrap(),
                    *h.shared.held.lock().unwrap(),
                )
            })
            .collect()
    }

    pub fn broadcast_for_others(&self, packet: ClientPacket, origin: &str) {
        let sessions = self.sessions.read().unwrap();
        for (username, handle) in sessions.iter() {
            if username != origin {
                let _ = handle.packet_tx.send(packet.clone());
            }
        }
    }

    /// Send a packet to every session that has the chunk in its cache.
    pub fn broadcast_for_chunk(&self, packet: ClientPacket, cx: i32, cz: i32) {
        let sessions = self.sessions.read().unwrap();
        for handle in sessions.values() {
            if handle.shared.chunk_keys.lock().unwrap().contains(&(cx, cz)) {
                let _ = handle.packet_tx.send(packet.clone());
            }
        }
    }

    /// Player avatars within `radius` blocks of `location`, excluding
    /// the player with `origin_eid`.
    pub fn players_near(&self, origin_eid: u32, location: &Location, radius: f64) -> Vec<Entity> {
        let sessions = self.sessions.read().unwrap();
        sessions
            .values()
            .filter(|h| h.shared.eid != origin_eid)
            .filter_map(|h| {
                let other = *h.shared.location.lock().unwrap();
                (location.distance(&other) <= radius).then(|| Entity {
                    eid: h.shared.eid,
                    kind: EntityKind::Player {
                        username: h.shared.username.clone(),
                    },
                    location: other,
                })
            })
            .collect()
    }

    /// Push any pending block damage of the chunk to every session
    /// streaming it, then clear it.
    pub fn flush_chunk(&self, chunk: &SharedChunk) {
        let mut guard = chunk.lock().unwrap();
        if !guard.has_damage() {
            return;
        }
        for packet in guard.damage_packets() {
            self.broadcast_for_chunk(packet, guard.x, guard.z);
        }
        guard.clear_damage();
    }

    /// Remove an entity from its owning chunk. Clients that saw it are
    /// told separately via destroy packets.
    pub fn destroy_entity(&self, eid: u32) {
        self.world.remove_entity(eid);
    }

    /// Handshake decision for a connecting client. Offline mode accepts
    /// everyone.
    pub fn handshake_hook(&self, _username: &str) -> bool {
        true
    }

    /// Authentication decision for a logging-in client, taken after the
    /// protocol version check.
    pub async fn login_hook(&self, _username: &str) -> Result<(), ()> {
        Ok(())
    }
}

impl Factory for ServerFactory {
    fn broadcast(&self, packet: ClientPacket) {
        let sessions = self.sessions.read().unwrap();
        for handle in sessions.values() {
            let _ = handle.packet_tx.send(packet.clone());
        }
    }

    fn chat(&self, message: &str) {
        info!("chat: {}", message);
        self.broadcast(ClientPacket::Chat {
            message: message.to_string(),
        });
    }

    fn give(&self, coords: (i32, i32, i32), item: (i16, i16), count: i8) {
        let location = Location::at(
            coords.0 as f64 / 32.0,
            coords.1 as f64 / 32.0,
            coords.2 as f64 / 32.0,
        );
        let entity = Entity::item(
            self.allocate_eid(),
            ItemStack::new(item.0, item.1, count),
            location,
        );
        let packet = entity.save_to_packet();
        if self.world.insert_entity(entity) {
            self.broadcast(packet);
        }
    }

    fn world(&self) -> &Arc<World> {
        &self.world
    }

    fn block_at(&self, pos: BlockPos) -> Option<u8> {
        self.world
            .chunk_if_loaded(pos.x >> 4, pos.z >> 4)
            .map(|chunk| chunk.lock().unwrap().get_block(pos.local()))
    }

    fn usernames(&self) -> Vec<String> {
        self.sessions.read().unwrap().keys().cloned().collect()
    }

    fn player_location(&self, username: &str) -> Option<Location> {
        let sessions = self.sessions.read().unwrap();
        sessions
            .get(username)
            .map(|h| *h.shared.location.lock().unwrap())
    }

    fn teleport(&self, username: &str, location: Location) -> bool {
        let sessions = self.sessions.read().unwrap();
        match sessions.get(username) {
            Some(handle) => handle
                .ctrl_tx
                .send(SessionCtrl::Teleport(location))
                .is_ok(),
            None => false,
        }
    }

    fn next_eid(&self) -> u32 {
        self.allocate_eid()
    }

    fn commands(&self) -> Vec<(String, String, String)> {
        self.registry
            .commands()
            .map(|c| {
                (
                    c.name().to_string(),
                    c.usage().to_string(),
                    c.info().to_string(),
                )
            })
            .collect()
    }

    fn time(&self) -> i64 {
        // 20 ticks per second since boot.
        (self.started.elapsed().as_millis() / 50) as i64
    }
}
