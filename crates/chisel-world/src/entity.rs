use crate::inventory::Inventory;
use chisel_protocol::ClientPacket;
use chisel_types::{ItemStack, Location};

/// What an entity is; the payload varies per kind.
#[derive(Debug, Clone, PartialEq)]
pub enum EntityKind {
    Player { username: String },
    Item { stack: ItemStack },
}

/// A world entity. Owned by the chunk it stands in; referenced from
/// elsewhere by eid only.
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    pub eid: u32,
    pub kind: EntityKind,
    pub location: Location,
}

impl Entity {
    pub fn item(eid: u32, stack: ItemStack, location: Location) -> Self {
        Self {
            eid,
            kind: EntityKind::Item { stack },
            location,
        }
    }

    /// The registered name hooks subscribe to.
    pub fn name(&self) -> &'static str {
        match self.kind {
            EntityKind::Player { .. } => "Player",
            EntityKind::Item { .. } => "Item",
        }
    }

    /// The packet that makes this entity appear on a client.
    pub fn save_to_packet(&self) -> ClientPacket {
        let (x, y, z) = self.location.fixed();
        let (yaw, pitch) = self.location.angles();
        match &self.kind {
            EntityKind::Player { username } => ClientPacket::SpawnPlayer {
                eid: self.eid as i32,
                username: username.clone(),
                x,
                y,
                z,
                yaw,
                pitch,
                item: 0,
            },
            EntityKind::Item { stack } => ClientPacket::SpawnItem {
                eid: self.eid as i32,
                primary: stack.id,
                count: stack.count,
                secondary: stack.secondary,
                x,
                y,
                z,
                yaw: yaw as i8,
                pitch: pitch as i8,
                roll: 0,
            },
        }
    }
}

/// A connected (or persisted) player avatar.
#[derive(Debug, Clone)]
pub struct Player {
    pub eid: u32,
    pub username: String,
    pub location: Location,
    pub inventory: Inventory,
    /// Index into the holdable row (0..9).
    pub equipped: usize,
}

impl Player {
    pub fn new(username: impl Into<String>, location: Location) -> Self {
        Self {
            eid: 0,
            username: username.into(),
            location,
            inventory: Inventory::player(),
            equipped: 0,
        }
    }

    /// The stack in the currently equipped holdable slot.
    pub fn held(&self) -> Option<ItemStack> {
        self.inventory.holdables[self.equipped]
    }

    /// The spawn packet other clients use to render this player.
    pub fn save_to_packet(&self) -> ClientPacket {
        let (x, y, z) = self.location.fixed();
        let (yaw, pitch) = self.location.angles();
        ClientPacket::SpawnPlayer {
            eid: self.eid as i32,
            username: self.username.clone(),
            x,
            y,
            z,
            yaw,
            pitch,
            item: self.held().map(|s| s.id).unwrap_or(0),
        }
    }

    /// The equipment packet describing the held item. An empty hand is
    /// signalled with primary -1 (0xffff on the wire).
    pub fn save_equipment_to_packet(&self) -> ClientPacket {
        let (primary, secondary) = match self.held() {
            Some(stack) => (stack.id, stack.secondary),
            None => (-1, 0),
        };
        ClientPacket::EntityEquipment {
            eid: self.eid as i32,
            slot: 0,
            primary,
            secondary,
        }
    }

    /// An ephemeral entity view of this player, for use-hook targeting.
    pub fn as_entity(&self) -> Entity {
        Entity {
            eid: self.eid,
            kind: EntityKind::Player {
                username: self.username.clone(),
            },
            location: self.location,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_spawn_packet() {
        let entity = Entity::item(
            5,
            ItemStack::new(4, 0, 1),
            Location::at(1.0, 64.0, 1.0),
        );
        match entity.save_to_packet() {
            ClientPacket::SpawnItem {
                eid, primary, x, y, ..
            } => {
                assert_eq!(eid, 5);
                assert_eq!(primary, 4);
                assert_eq!(x, 32);
                assert_eq!(y, 2048);
            }
            other => panic!("unexpected packet {:?}", other),
        }
    }

    #[test]
    fn test_empty_hand_equipment() {
        let player = Player::new("alice", Location::default());
        match player.save_equipment_to_packet() {
            ClientPacket::EntityEquipment { primary, .. } => assert_eq!(primary, -1),
            other => panic!("unexpected packet {:?}", other),
        }
    }
}
