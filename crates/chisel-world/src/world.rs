use crate::entity::{Entity, Player};
use crate::generator::generate_chunk;
use crate::inventory::Inventory;
use crate::serializer::{PlayerRecord, Serializer, SlotRecord};
use crate::chunk::Chunk;
use chisel_protocol::ClientPacket;
use chisel_types::{BlockPos, ItemStack, Location};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum WorldError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("bad player record: {0}")]
    BadRecord(String),
}

/// A chunk shared between the world and the sessions streaming it.
pub type SharedChunk = Arc<Mutex<Chunk>>;

/// The asynchronous facade over the shared voxel world. Chunks are owned
/// here; sessions hold shared borrows in their per-session caches.
pub struct World {
    chunks: Mutex<HashMap<(i32, i32), SharedChunk>>,
    serializer: Box<dyn Serializer>,
    pub spawn: BlockPos,
}

impl World {
    pub fn new(serializer: Box<dyn Serializer>) -> Self {
        Self {
            chunks: Mutex::new(HashMap::new()),
            serializer,
            spawn: BlockPos::new(0, 63, 0),
        }
    }

    /// Obtain the chunk at (cx, cz), generating it on first access.
    pub async fn request_chunk(&self, cx: i32, cz: i32) -> Result<SharedChunk, WorldError> {
        if let Some(chunk) = self.chunk_if_loaded(cx, cz) {
            return Ok(chunk);
        }
        // Chunk fills are the heavy path; let other tasks run first.
        tokio::task::yield_now().await;
        debug!("generating chunk ({}, {})", cx, cz);
        let generated = Arc::new(Mutex::new(generate_chunk(cx, cz)));
        let mut chunks = self.chunks.lock().unwrap();
        Ok(chunks.entry((cx, cz)).or_insert(generated).clone())
    }

    /// The chunk at (cx, cz) if it is already resident.
    pub fn chunk_if_loaded(&self, cx: i32, cz: i32) -> Option<SharedChunk> {
        self.chunks.lock().unwrap().get(&(cx, cz)).cloned()
    }

    pub async fn get_block(&self, pos: BlockPos) -> Result<u8, WorldError> {
        let chunk = self.request_chunk(pos.x >> 4, pos.z >> 4).await?;
        let block = chunk.lock().unwrap().get_block(pos.local());
        Ok(block)
    }

    pub async fn set_block(&self, pos: BlockPos, id: u8) -> Result<(), WorldError> {
        let chunk = self.request_chunk(pos.x >> 4, pos.z >> 4).await?;
        chunk.lock().unwrap().set_block(pos.local(), id);
        Ok(())
    }

    pub async fn get_metadata(&self, pos: BlockPos) -> Result<u8, WorldError> {
        let chunk = self.request_chunk(pos.x >> 4, pos.z >> 4).await?;
        let metadata = chunk.lock().unwrap().get_metadata(pos.local());
        Ok(metadata)
    }

    pub async fn set_metadata(&self, pos: BlockPos, value: u8) -> Result<(), WorldError> {
        let chunk = self.request_chunk(pos.x >> 4, pos.z >> 4).await?;
        chunk.lock().unwrap().set_metadata(pos.local(), value);
        Ok(())
    }

    pub async fn destroy(&self, pos: BlockPos) -> Result<(), WorldError> {
        let chunk = self.request_chunk(pos.x >> 4, pos.z >> 4).await?;
        chunk.lock().unwrap().destroy(pos.local());
        Ok(())
    }

    /// Load a player by name, creating a fresh one at the world spawn
    /// when no record exists.
    pub async fn load_player(&self, name: &str) -> Result<Player, WorldError> {
        match self.serializer.load_player(name)? {
            Some(record) => Ok(player_from_record(name, record)),
            None => {
                let location = Location::at(
                    self.spawn.x as f64 + 0.5,
                    self.spawn.y as f64,
                    self.spawn.z as f64 + 0.5,
                );
                Ok(Player::new(name, location))
            }
        }
    }

    pub async fn save_player(&self, player: &Player) -> Result<(), WorldError> {
        self.serializer
            .save_player(&player.username, &player_to_record(player))
    }

    pub fn load_plugin_data(&self, key: &str) -> Result<Vec<u8>, WorldError> {
        self.serializer.load_plugin_data(key)
    }

    pub fn save_plugin_data(&self, key: &str, data: &[u8]) -> Result<(), WorldError> {
        self.serializer.save_plugin_data(key, data)
    }

    /// Place an entity into the chunk its location falls within. Fails
    /// quietly when that chunk is not resident.
    pub fn insert_entity(&self, entity: Entity) -> bool {
        let pos = entity.location.block_pos();
        match self.chunk_if_loaded(pos.x >> 4, pos.z >> 4) {
            Some(chunk) => {
                let mut chunk = chunk.lock().unwrap();
                chunk.entities.push(entity);
                chunk.dirty = true;
                true
            }
            None => {
                debug!("dropped entity spawn outside resident chunks");
                false
            }
        }
    }

    /// Remove an entity by eid from whichever resident chunk holds it.
    pub fn remove_entity(&self, eid: u32) -> Option<Entity> {
        let chunks = self.chunks.lock().unwrap();
        for chunk in chunks.values() {
            let mut chunk = chunk.lock().unwrap();
            if let Some(i) = chunk.entities.iter().position(|e| e.eid == eid) {
                chunk.dirty = true;
                return Some(chunk.entities.remove(i));
            }
        }
        None
    }

}

fn player_to_record(player: &Player) -> PlayerRecord {
    let items = match player.inventory.save_to_packet(0) {
        ClientPacket::WindowItems { items, .. } => items,
        _ => Vec::new(),
    };
    let slots = items
        .iter()
        .enumerate()
        .filter_map(|(index, stack)| {
            stack.map(|s| SlotRecord {
                index,
                id: s.id,
                secondary: s.secondary,
                count: s.count,
            })
        })
        .collect();
    PlayerRecord {
        location: player.location,
        equipped: player.equipped,
        slots,
    }
}

fn player_from_record(name: &str, record: PlayerRecord) -> Player {
    let mut inventory = Inventory::player();
    for slot in &record.slots {
        if let Some(slot_ref) = inventory.slot_mut(slot.index) {
            *slot_ref = Some(ItemStack::new(slot.id, slot.secondary, slot.count));
        }
    }
    let mut player = Player::new(name, record.location);
    player.inventory = inventory;
    player.equipped = record.equipped.min(8);
    player
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serializer::FlatFileSerializer;
    use chisel_types::ItemStack;

    fn test_world() -> (tempfile::TempDir, World) {
        let dir = tempfile::tempdir().unwrap();
        let serializer = FlatFileSerializer::new(dir.path()).unwrap();
        let world = World::new(Box::new(serializer));
        (dir, world)
    }

    #[tokio::test]
    async fn test_request_chunk_is_cached() {
        let (_dir, world) = test_world();
        let a = world.request_chunk(0, 0).await.unwrap();
        let b = world.request_chunk(0, 0).await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn test_block_roundtrip() {
        let (_dir, world) = test_world();
        let pos = BlockPos::new(-3, 70, 18);
        world.set_block(pos, 4).await.unwrap();
        assert_eq!(world.get_block(pos).await.unwrap(), 4);
        world.destroy(pos).await.unwrap();
        assert_eq!(world.get_block(pos).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_metadata_roundtrip() {
        let (_dir, world) = test_world();
        let pos = BlockPos::new(2, 70, 2);
        world.set_block(pos, 50).await.unwrap();
        world.set_metadata(pos, 5).await.unwrap();
        assert_eq!(world.get_metadata(pos).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_load_player_seeds_at_spawn() {
        let (_dir, world) = test_world();
        let player = world.load_player("fresh").await.unwrap();
        assert_eq!(player.username, "fresh");
        assert_eq!(player.location.y, world.spawn.y as f64);
    }

    #[tokio::test]
    async fn test_save_and_reload_player() {
        let (_dir, world) = test_world();
        let mut player = world.load_player("alice").await.unwrap();
        player.inventory.holdables[1] = Some(ItemStack::new(278, 0, 1));
        player.equipped = 1;
        player.location.x = 99.5;
        world.save_player(&player).await.unwrap();

        let reloaded = world.load_player("alice").await.unwrap();
        assert_eq!(reloaded.equipped, 1);
        assert_eq!(reloaded.location.x, 99.5);
        assert_eq!(reloaded.held(), Some(ItemStack::new(278, 0, 1)));
    }

    #[tokio::test]
    async fn test_entity_insert_and_remove() {
        let (_dir, world) = test_world();
        world.request_chunk(0, 0).await.unwrap();
        let entity = Entity::item(7, ItemStack::new(4, 0, 1), Location::at(3.0, 64.0, 3.0));
        assert!(world.insert_entity(entity));
        let removed = world.remove_entity(7).unwrap();
        assert_eq!(removed.eid, 7);
        assert!(world.remove_entity(7).is_none());
    }
}
