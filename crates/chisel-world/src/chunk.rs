use crate::entity::Entity;
use chisel_protocol::ClientPacket;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::collections::{HashMap, HashSet};
use std::io::Write as _;

pub const CHUNK_WIDTH: usize = 16;
pub const CHUNK_HEIGHT: usize = 128;

const BLOCK_COUNT: usize = CHUNK_WIDTH * CHUNK_WIDTH * CHUNK_HEIGHT;
const NIBBLE_COUNT: usize = BLOCK_COUNT / 2;

/// A sign tile: four lines of text attached to a block.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Sign {
    pub lines: [String; 4],
}

impl Sign {
    /// The update packet for this sign at the given world coordinates.
    pub fn packet(&self, x: i32, y: u8, z: i32) -> ClientPacket {
        ClientPacket::Sign {
            x,
            y: y as i16,
            z,
            lines: self.lines.clone(),
        }
    }
}

/// A 16x128x16 voxel column, the unit of streaming and persistence.
///
/// Blocks are stored in wire order (x, then z, then y) so the packet body
/// is a straight copy. Metadata and light are nibble arrays in the same
/// order.
pub struct Chunk {
    pub x: i32,
    pub z: i32,
    blocks: Vec<u8>,
    metadata: Vec<u8>,
    block_light: Vec<u8>,
    sky_light: Vec<u8>,
    heightmap: [u8; CHUNK_WIDTH * CHUNK_WIDTH],
    pub entities: Vec<Entity>,
    pub tiles: HashMap<(u8, u8, u8), Sign>,
    /// Set when the chunk differs from its persisted form.
    pub dirty: bool,
    damaged: HashSet<(u8, u8, u8)>,
}

fn index(x: u8, y: u8, z: u8) -> usize {
    ((x as usize) << 11) | ((z as usize) << 7) | y as usize
}

fn nibble_get(data: &[u8], i: usize) -> u8 {
    let byte = data[i / 2];
    if i % 2 == 0 {
        byte & 0x0f
    } else {
        byte >> 4
    }
}

fn nibble_set(data: &mut [u8], i: usize, value: u8) {
    let byte = &mut data[i / 2];
    if i % 2 == 0 {
        *byte = (*byte & 0xf0) | (value & 0x0f);
    } else {
        *byte = (*byte & 0x0f) | ((value & 0x0f) << 4);
    }
}

impl Chunk {
    pub fn new(x: i32, z: i32) -> Self {
        Self {
            x,
            z,
            blocks: vec![0; BLOCK_COUNT],
            metadata: vec![0; NIBBLE_COUNT],
            block_light: vec![0; NIBBLE_COUNT],
            sky_light: vec![0xff; NIBBLE_COUNT],
            heightmap: [0; CHUNK_WIDTH * CHUNK_WIDTH],
            entities: Vec::new(),
            tiles: HashMap::new(),
            dirty: false,
            damaged: HashSet::new(),
        }
    }

    pub fn get_block(&self, (x, y, z): (u8, u8, u8)) -> u8 {
        self.blocks[index(x, y, z)]
    }

    pub fn set_block(&mut self, (x, y, z): (u8, u8, u8), id: u8) {
        let i = index(x, y, z);
        if self.blocks[i] == id {
            return;
        }
        self.blocks[i] = id;
        self.update_height(x, z, y, id);
        self.dirty = true;
        self.damaged.insert((x, y, z));
    }

    pub fn get_metadata(&self, (x, y, z): (u8, u8, u8)) -> u8 {
        nibble_get(&self.metadata, index(x, y, z))
    }

    pub fn set_metadata(&mut self, (x, y, z): (u8, u8, u8), value: u8) {
        nibble_set(&mut self.metadata, index(x, y, z), value);
        self.dirty = true;
        self.damaged.insert((x, y, z));
    }

    /// Remove the block at the given local coordinates, along with its
    /// metadata and any tile attached to it.
    pub fn destroy(&mut self, local: (u8, u8, u8)) {
        self.set_block(local, 0);
        self.set_metadata(local, 0);
        self.tiles.remove(&local);
    }

    /// The full column of block ids at (x, z), bottom to top.
    pub fn get_column(&self, x: u8, z: u8) -> [u8; CHUNK_HEIGHT] {
        let start = index(x, 0, z);
        let mut column = [0; CHUNK_HEIGHT];
        column.copy_from_slice(&self.blocks[start..start + CHUNK_HEIGHT]);
        column
    }

    /// Y of the highest non-air block in the column at (x, z).
    pub fn height_at(&self, x: u8, z: u8) -> u8 {
        self.heightmap[(z as usize) * CHUNK_WIDTH + x as usize]
    }

    fn update_height(&mut self, x: u8, z: u8, y: u8, id: u8) {
        let slot = (z as usize) * CHUNK_WIDTH + x as usize;
        let current = self.heightmap[slot];
        if id != 0 {
            if y > current {
                self.heightmap[slot] = y;
            }
        } else if y == current {
            let column_start = index(x, 0, z);
            let column = &self.blocks[column_start..column_start + CHUNK_HEIGHT];
            self.heightmap[slot] = column
                .iter()
                .rposition(|&b| b != 0)
                .map(|h| h as u8)
                .unwrap_or(0);
        }
    }

    /// Recompute the whole heightmap; used after bulk generation.
    pub fn rebuild_heightmap(&mut self) {
        for x in 0..CHUNK_WIDTH as u8 {
            for z in 0..CHUNK_WIDTH as u8 {
                let start = index(x, 0, z);
                let column = &self.blocks[start..start + CHUNK_HEIGHT];
                self.heightmap[(z as usize) * CHUNK_WIDTH + x as usize] = column
                    .iter()
                    .rposition(|&b| b != 0)
                    .map(|h| h as u8)
                    .unwrap_or(0);
            }
        }
    }

    /// The full chunk payload packet: blocks, metadata, and light, zlib
    /// compressed.
    pub fn save_to_packet(&self) -> ClientPacket {
        let mut body =
            Vec::with_capacity(BLOCK_COUNT + NIBBLE_COUNT * 3);
        body.extend_from_slice(&self.blocks);
        body.extend_from_slice(&self.metadata);
        body.extend_from_slice(&self.block_light);
        body.extend_from_slice(&self.sky_light);

        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        let _ = encoder.write_all(&body);
        let data = encoder.finish().unwrap_or_default();

        ClientPacket::ChunkData {
            x: self.x * 16,
            y: 0,
            z: self.z * 16,
            sx: (CHUNK_WIDTH - 1) as u8,
            sy: (CHUNK_HEIGHT - 1) as u8,
            sz: (CHUNK_WIDTH - 1) as u8,
            data,
        }
    }

    /// Block-change packets for every coordinate mutated since the last
    /// flush.
    pub fn damage_packets(&self) -> Vec<ClientPacket> {
        self.damaged
            .iter()
            .map(|&(x, y, z)| ClientPacket::BlockChange {
                x: self.x * 16 + x as i32,
                y,
                z: self.z * 16 + z as i32,
                block: self.get_block((x, y, z)),
                metadata: self.get_metadata((x, y, z)),
            })
            .collect()
    }

    pub fn has_damage(&self) -> bool {
        !self.damaged.is_empty()
    }

    pub fn clear_damage(&mut self) {
        self.damaged.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_get() {
        let mut chunk = Chunk::new(0, 0);
        chunk.set_block((3, 64, 9), 1);
        assert_eq!(chunk.get_block((3, 64, 9)), 1);
        assert_eq!(chunk.get_block((3, 63, 9)), 0);
    }

    #[test]
    fn test_metadata_nibbles() {
        let mut chunk = Chunk::new(0, 0);
        chunk.set_metadata((0, 0, 0), 5);
        chunk.set_metadata((0, 1, 0), 9);
        assert_eq!(chunk.get_metadata((0, 0, 0)), 5);
        assert_eq!(chunk.get_metadata((0, 1, 0)), 9);
    }

    #[test]
    fn test_destroy_clears_everything() {
        let mut chunk = Chunk::new(0, 0);
        chunk.set_block((1, 10, 1), 63);
        chunk.set_metadata((1, 10, 1), 4);
        chunk.tiles.insert((1, 10, 1), Sign::default());
        chunk.clear_damage();
        chunk.dirty = false;

        chunk.destroy((1, 10, 1));
        assert_eq!(chunk.get_block((1, 10, 1)), 0);
        assert_eq!(chunk.get_metadata((1, 10, 1)), 0);
        assert!(chunk.tiles.is_empty());
        assert!(chunk.dirty);
        assert!(chunk.has_damage());
    }

    #[test]
    fn test_height_tracking() {
        let mut chunk = Chunk::new(0, 0);
        chunk.set_block((4, 10, 4), 1);
        chunk.set_block((4, 20, 4), 1);
        assert_eq!(chunk.height_at(4, 4), 20);
        chunk.set_block((4, 20, 4), 0);
        assert_eq!(chunk.height_at(4, 4), 10);
    }

    #[test]
    fn test_dig_at_bottom_of_world() {
        let mut chunk = Chunk::new(0, 0);
        chunk.set_block((0, 0, 0), 1);
        chunk.destroy((0, 0, 0));
        assert_eq!(chunk.get_block((0, 0, 0)), 0);
    }

    #[test]
    fn test_column() {
        let mut chunk = Chunk::new(0, 0);
        chunk.set_block((2, 0, 3), 7);
        chunk.set_block((2, 127, 3), 1);
        let column = chunk.get_column(2, 3);
        assert_eq!(column[0], 7);
        assert_eq!(column[127], 1);
        assert_eq!(column[64], 0);
    }

    #[test]
    fn test_damage_packets_carry_world_coords() {
        let mut chunk = Chunk::new(2, -1);
        chunk.set_block((3, 60, 15), 4);
        let packets = chunk.damage_packets();
        assert_eq!(packets.len(), 1);
        match &packets[0] {
            ClientPacket::BlockChange { x, y, z, block, .. } => {
                assert_eq!((*x, *y, *z), (35, 60, -1));
                assert_eq!(*block, 4);
            }
            other => panic!("unexpected packet {:?}", other),
        }
        chunk.clear_damage();
        assert!(!chunk.has_damage());
    }
}
