use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// A block position in the world. Y is constrained to the 0..128 column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockPos {
    pub x: i32,
    pub y: u8,
    pub z: i32,
}

impl BlockPos {
    pub fn new(x: i32, y: u8, z: i32) -> Self {
        Self { x, y, z }
    }

    pub fn chunk_pos(&self) -> ChunkPos {
        ChunkPos {
            x: self.x >> 4,
            z: self.z >> 4,
        }
    }

    /// The local coordinates of this position within its chunk.
    pub fn local(&self) -> (u8, u8, u8) {
        ((self.x & 15) as u8, self.y, (self.z & 15) as u8)
    }
}

/// A chunk position (x, z).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChunkPos {
    pub x: i32,
    pub z: i32,
}

impl ChunkPos {
    pub fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }

    /// Squared distance to another chunk, used to order chunk loads
    /// nearest-first.
    pub fn distance_sq(&self, other: ChunkPos) -> i64 {
        let dx = (self.x - other.x) as i64;
        let dz = (self.z - other.z) as i64;
        dx * dx + dz * dz
    }
}

/// Split a block coordinate pair into (chunk x, local x, chunk z, local z).
pub fn split_coords(x: i32, z: i32) -> (i32, u8, i32, u8) {
    (x >> 4, (x & 15) as u8, z >> 4, (z & 15) as u8)
}

/// Truncate a fractional world coordinate to the block it falls within.
/// Negative values bias toward negative infinity, so -0.5 lands in block -1.
pub fn block_coord(v: f64) -> i32 {
    if v < 0.0 {
        v as i32 - 1
    } else {
        v as i32
    }
}

/// Quantize an angle in degrees to the 0..255 wire byte
/// (`int(theta * 255 / 2pi) mod 256` with theta in radians).
pub fn angle_byte(degrees: f32) -> u8 {
    let theta = (degrees as f64).to_radians();
    ((theta * 255.0 / (2.0 * PI)) as i64).rem_euclid(256) as u8
}

/// Convert a world coordinate to the fixed-point wire format
/// (multiply by 32, truncate).
pub fn fixed_point(v: f64) -> i32 {
    (v * 32.0) as i32
}

/// A player or entity location: position, eye stance, orientation, and
/// the grounded flag.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub stance: f64,
    /// Yaw in degrees, as sent on the wire.
    pub yaw: f32,
    /// Pitch in degrees.
    pub pitch: f32,
    pub grounded: bool,
}

impl Default for Location {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            z: 0.0,
            stance: 1.0,
            yaw: 0.0,
            pitch: 0.0,
            grounded: false,
        }
    }
}

impl Location {
    pub fn at(x: f64, y: f64, z: f64) -> Self {
        Self {
            x,
            y,
            z,
            stance: y + 1.0,
            ..Self::default()
        }
    }

    /// The block this location falls within.
    pub fn block_pos(&self) -> BlockPos {
        BlockPos {
            x: block_coord(self.x),
            y: self.y.clamp(0.0, 127.0) as u8,
            z: block_coord(self.z),
        }
    }

    /// A location `distance` blocks ahead of this one, along the yaw
    /// direction on the horizontal plane.
    pub fn in_front_of(&self, distance: f64) -> Location {
        let theta = (self.yaw as f64).to_radians();
        Location {
            x: self.x - distance * theta.sin(),
            z: self.z + distance * theta.cos(),
            ..*self
        }
    }

    /// Euclidean distance to another location, in blocks.
    pub fn distance(&self, other: &Location) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }

    /// Whether the reported stance is within the tolerated offset from y.
    /// Violations are ignored rather than fatal; this only informs logging.
    pub fn stance_valid(&self) -> bool {
        let offset = self.stance - self.y;
        (0.1..=1.65).contains(&offset)
    }

    /// Position in fixed-point wire units.
    pub fn fixed(&self) -> (i32, i32, i32) {
        (fixed_point(self.x), fixed_point(self.y), fixed_point(self.z))
    }

    /// Orientation as wire angle bytes (yaw, pitch).
    pub fn angles(&self) -> (u8, u8) {
        (angle_byte(self.yaw), angle_byte(self.pitch))
    }
}

/// An item stack: id, secondary data (damage or variant), and count.
/// Id -1 on the wire means an empty slot; empty slots are `None` here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemStack {
    pub id: i16,
    pub secondary: i16,
    pub count: i8,
}

impl ItemStack {
    pub fn new(id: i16, secondary: i16, count: i8) -> Self {
        Self {
            id,
            secondary,
            count,
        }
    }

    /// The (id, secondary) pair used when matching stacks for consumption.
    pub fn key(&self) -> (i16, i16) {
        (self.id, self.secondary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_coord_negative_bias() {
        assert_eq!(block_coord(-0.5), -1);
        assert_eq!(block_coord(-15.2), -16);
        assert_eq!(block_coord(0.0), 0);
        assert_eq!(block_coord(0.9), 0);
        assert_eq!(block_coord(17.3), 17);
    }

    #[test]
    fn test_split_coords() {
        assert_eq!(split_coords(0, 0), (0, 0, 0, 0));
        assert_eq!(split_coords(17, 33), (1, 1, 2, 1));
        assert_eq!(split_coords(-1, -16), (-1, 15, -1, 0));
    }

    #[test]
    fn test_angle_byte_quantization() {
        assert_eq!(angle_byte(0.0), 0);
        assert_eq!(angle_byte(90.0), 63);
        assert_eq!(angle_byte(180.0), 127);
        // Negative angles land in range via the modulus, not saturation.
        assert_eq!(angle_byte(-90.0), 193);
        assert_eq!(angle_byte(-1.0), 0);
    }

    #[test]
    fn test_fixed_point() {
        assert_eq!(fixed_point(1.0), 32);
        assert_eq!(fixed_point(0.5), 16);
        assert_eq!(fixed_point(-2.0), -64);
    }

    #[test]
    fn test_in_front_of() {
        let loc = Location::at(0.0, 64.0, 0.0);
        let ahead = loc.in_front_of(2.0);
        // Yaw 0 faces +z.
        assert!((ahead.z - 2.0).abs() < 1e-9);
        assert!(ahead.x.abs() < 1e-9);
        assert_eq!(ahead.y, loc.y);
    }

    #[test]
    fn test_distance() {
        let a = Location::at(0.0, 0.0, 0.0);
        let b = Location::at(3.0, 4.0, 0.0);
        assert!((a.distance(&b) - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_stance_tolerance() {
        let mut loc = Location::at(0.0, 64.0, 0.0);
        loc.stance = 65.62;
        assert!(loc.stance_valid());
        loc.stance = 64.0;
        assert!(!loc.stance_valid());
        loc.stance = 70.0;
        assert!(!loc.stance_valid());
    }
}
