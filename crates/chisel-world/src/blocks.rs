use chisel_protocol::Face;

/// A block type and the properties the gameplay pipeline cares about.
#[derive(Debug)]
pub struct Block {
    pub id: u8,
    pub name: &'static str,
    /// Whether digging can remove this block at all.
    pub breakable: bool,
    /// Whether a build may overwrite this block in place.
    pub replaceable: bool,
    /// Base break time factor in seconds. Zero breaks instantly.
    pub hardness: f32,
    /// Block or item id dropped when broken; zero drops nothing.
    pub drop: u8,
}

pub const AIR: u8 = 0;
pub const WORKBENCH: u8 = 58;

macro_rules! block {
    ($id:expr, $name:expr, $hardness:expr) => {
        Block {
            id: $id,
            name: $name,
            breakable: true,
            replaceable: false,
            hardness: $hardness,
            drop: $id,
        }
    };
    ($id:expr, $name:expr, $hardness:expr, drop $drop:expr) => {
        Block {
            id: $id,
            name: $name,
            breakable: true,
            replaceable: false,
            hardness: $hardness,
            drop: $drop,
        }
    };
}

static BLOCKS: &[Block] = &[
    Block {
        id: 0,
        name: "air",
        breakable: false,
        replaceable: true,
        hardness: 0.0,
        drop: 0,
    },
    block!(1, "stone", 1.5, drop 4),
    block!(2, "grass", 0.6, drop 3),
    block!(3, "dirt", 0.5),
    block!(4, "cobblestone", 2.0),
    block!(5, "wood", 2.0),
    block!(6, "sapling", 0.0),
    Block {
        id: 7,
        name: "bedrock",
        breakable: false,
        replaceable: false,
        hardness: -1.0,
        drop: 0,
    },
    Block {
        id: 8,
        name: "water",
        breakable: false,
        replaceable: true,
        hardness: 100.0,
        drop: 0,
    },
    Block {
        id: 9,
        name: "spring",
        breakable: false,
        replaceable: true,
        hardness: 100.0,
        drop: 0,
    },
    Block {
        id: 10,
        name: "lava",
        breakable: false,
        replaceable: true,
        hardness: 100.0,
        drop: 0,
    },
    Block {
        id: 11,
        name: "lava-spring",
        breakable: false,
        replaceable: true,
        hardness: 100.0,
        drop: 0,
    },
    block!(12, "sand", 0.5),
    block!(13, "gravel", 0.6),
    block!(14, "gold-ore", 3.0),
    block!(15, "iron-ore", 3.0),
    block!(16, "coal-ore", 3.0),
    block!(17, "log", 2.0),
    block!(18, "leaves", 0.2, drop 0),
    block!(20, "glass", 0.3, drop 0),
    block!(24, "sandstone", 0.8),
    block!(35, "wool", 0.8),
    block!(37, "flower", 0.0),
    block!(38, "rose", 0.0),
    block!(44, "step", 2.0),
    block!(45, "brick", 2.0),
    block!(49, "obsidian", 10.0),
    block!(50, "torch", 0.0),
    block!(53, "wooden-stairs", 2.0, drop 5),
    block!(54, "chest", 2.5),
    block!(56, "diamond-ore", 3.0),
    block!(58, "workbench", 2.5),
    block!(61, "furnace", 3.5),
    block!(63, "signpost", 1.0, drop 0),
    block!(65, "ladder", 0.4),
    block!(67, "stone-stairs", 2.0, drop 4),
    block!(68, "wall-sign", 1.0, drop 0),
    Block {
        id: 78,
        name: "snow",
        breakable: true,
        replaceable: true,
        hardness: 0.1,
        drop: 0,
    },
    block!(79, "ice", 0.5, drop 0),
    block!(80, "snow-block", 0.2),
    block!(82, "clay", 0.6),
];

pub fn block_by_id(id: u8) -> Option<&'static Block> {
    BLOCKS.iter().find(|b| b.id == id)
}

pub fn block_by_name(name: &str) -> Option<&'static Block> {
    BLOCKS.iter().find(|b| b.name == name)
}

/// Names for item ids above the block range. Items cannot be placed as
/// blocks; the build pipeline rejects them.
pub fn item_name(id: i16) -> Option<&'static str> {
    Some(match id {
        256 => "iron-shovel",
        257 => "iron-pickaxe",
        258 => "iron-axe",
        259 => "flint-and-steel",
        260 => "apple",
        261 => "bow",
        262 => "arrow",
        263 => "coal",
        264 => "diamond",
        265 => "iron-ingot",
        266 => "gold-ingot",
        267 => "iron-sword",
        268 => "wooden-sword",
        269 => "wooden-shovel",
        270 => "wooden-pickaxe",
        271 => "wooden-axe",
        272 => "stone-sword",
        273 => "stone-shovel",
        274 => "stone-pickaxe",
        275 => "stone-axe",
        276 => "diamond-sword",
        277 => "diamond-shovel",
        278 => "diamond-pickaxe",
        279 => "diamond-axe",
        280 => "stick",
        281 => "bowl",
        283 => "gold-sword",
        284 => "gold-shovel",
        285 => "gold-pickaxe",
        286 => "gold-axe",
        323 => "sign",
        324 => "wooden-door",
        _ => return None,
    })
}

/// Whether placement of this block needs orientation metadata.
pub fn orientable(id: u8) -> bool {
    matches!(id, 50 | 65 | 68)
}

/// Orientation metadata for placing `id` against `face`, or `None` when
/// the block cannot sit on that face.
pub fn orientation(id: u8, face: Face) -> Option<u8> {
    match id {
        // Torches point away from the block they attach to.
        50 => match face {
            Face::PosX => Some(1),
            Face::NegX => Some(2),
            Face::PosZ => Some(3),
            Face::NegZ => Some(4),
            Face::PosY => Some(5),
            _ => None,
        },
        // Ladders and wall signs hang on vertical faces only.
        65 | 68 => match face {
            Face::NegZ => Some(2),
            Face::PosZ => Some(3),
            Face::NegX => Some(4),
            Face::PosX => Some(5),
            _ => None,
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup() {
        assert_eq!(block_by_id(1).unwrap().name, "stone");
        assert_eq!(block_by_name("workbench").unwrap().id, WORKBENCH);
        assert!(block_by_id(200).is_none());
    }

    #[test]
    fn test_drop_overrides() {
        assert_eq!(block_by_id(1).unwrap().drop, 4);
        assert_eq!(block_by_id(2).unwrap().drop, 3);
        assert_eq!(block_by_id(3).unwrap().drop, 3);
    }

    #[test]
    fn test_bedrock_unbreakable() {
        let bedrock = block_by_id(7).unwrap();
        assert!(!bedrock.breakable);
    }

    #[test]
    fn test_orientation_faces() {
        assert_eq!(orientation(50, Face::PosY), Some(5));
        assert_eq!(orientation(50, Face::NegY), None);
        assert_eq!(orientation(65, Face::PosZ), Some(3));
        assert_eq!(orientation(65, Face::PosY), None);
        assert_eq!(orientation(1, Face::PosY), None);
    }

    #[test]
    fn test_item_names() {
        assert_eq!(item_name(278), Some("diamond-pickaxe"));
        assert!(item_name(9999).is_none());
    }
}
