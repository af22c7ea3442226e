use crate::chunk::{Chunk, CHUNK_WIDTH};

/// Surface height of generated terrain.
pub const SURFACE_Y: u8 = 62;

/// Generate a flat chunk: bedrock floor, stone body, dirt cap, grass on
/// top.
pub fn generate_chunk(cx: i32, cz: i32) -> Chunk {
    let mut chunk = Chunk::new(cx, cz);
    for x in 0..CHUNK_WIDTH as u8 {
        for z in 0..CHUNK_WIDTH as u8 {
            chunk.set_block((x, 0, z), 7);
            for y in 1..SURFACE_Y - 2 {
                chunk.set_block((x, y, z), 1);
            }
            chunk.set_block((x, SURFACE_Y - 2, z), 3);
            chunk.set_block((x, SURFACE_Y - 1, z), 3);
            chunk.set_block((x, SURFACE_Y, z), 2);
        }
    }
    chunk.rebuild_heightmap();
    chunk.dirty = false;
    chunk.clear_damage();
    chunk
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flat_surface() {
        let chunk = generate_chunk(0, 0);
        assert_eq!(chunk.height_at(0, 0), SURFACE_Y);
        assert_eq!(chunk.height_at(15, 15), SURFACE_Y);
        assert_eq!(chunk.get_block((8, SURFACE_Y, 8)), 2);
        assert_eq!(chunk.get_block((8, 0, 8)), 7);
        assert_eq!(chunk.get_block((8, SURFACE_Y + 1, 8)), 0);
        assert!(!chunk.dirty);
    }
}
