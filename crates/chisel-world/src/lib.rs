pub mod blocks;
pub mod chunk;
pub mod entity;
pub mod generator;
pub mod inventory;
pub mod serializer;
pub mod world;

pub use chunk::{Chunk, Sign, CHUNK_HEIGHT, CHUNK_WIDTH};
pub use entity::{Entity, EntityKind, Player};
pub use inventory::{sync_inventories, Inventory};
pub use serializer::{FlatFileSerializer, PlayerRecord, Serializer};
pub use world::{SharedChunk, World, WorldError};
