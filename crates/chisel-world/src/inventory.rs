use chisel_protocol::ClientPacket;
use chisel_types::ItemStack;

const MAX_STACK: i8 = 64;

/// Window identifier for the player's own inventory.
pub const PLAYER_IDENTIFIER: u8 = 0;
/// Window identifier for a workbench.
pub const WORKBENCH_IDENTIFIER: u8 = 1;

/// A slotted item container, arranged the way the client windows are:
/// craft output, crafting grid, armor (player inventory only), main
/// storage, then the holdable row.
#[derive(Debug, Clone, PartialEq)]
pub struct Inventory {
    pub identifier: u8,
    pub crafted: [Option<ItemStack>; 1],
    pub crafting: Vec<Option<ItemStack>>,
    pub armor: [Option<ItemStack>; 4],
    pub storage: [Option<ItemStack>; 27],
    pub holdables: [Option<ItemStack>; 9],
    /// Stack picked up by the client's cursor during window actions.
    cursor: Option<ItemStack>,
}

impl Inventory {
    pub fn player() -> Self {
        Self {
            identifier: PLAYER_IDENTIFIER,
            crafted: [None],
            crafting: vec![None; 4],
            armor: [None; 4],
            storage: [None; 27],
            holdables: [None; 9],
            cursor: None,
        }
    }

    pub fn workbench() -> Self {
        Self {
            identifier: WORKBENCH_IDENTIFIER,
            crafted: [None],
            crafting: vec![None; 9],
            armor: [None; 4],
            storage: [None; 27],
            holdables: [None; 9],
            cursor: None,
        }
    }

    /// Number of slots the window exposes. The workbench window has no
    /// armor slots.
    pub fn len(&self) -> usize {
        if self.identifier == WORKBENCH_IDENTIFIER {
            1 + self.crafting.len() + 27 + 9
        } else {
            1 + self.crafting.len() + 4 + 27 + 9
        }
    }

    pub(crate) fn slot_mut(&mut self, slot: usize) -> Option<&mut Option<ItemStack>> {
        let grid = self.crafting.len();
        if slot == 0 {
            return Some(&mut self.crafted[0]);
        }
        if slot <= grid {
            return self.crafting.get_mut(slot - 1);
        }
        let mut rest = slot - 1 - grid;
        if self.identifier != WORKBENCH_IDENTIFIER {
            if rest < 4 {
                return Some(&mut self.armor[rest]);
            }
            rest -= 4;
        }
        if rest < 27 {
            return Some(&mut self.storage[rest]);
        }
        rest -= 27;
        if rest < 9 {
            return Some(&mut self.holdables[rest]);
        }
        None
    }

    /// First slot index of the holdable row in this window.
    fn holdable_base(&self) -> usize {
        if self.identifier == WORKBENCH_IDENTIFIER {
            1 + self.crafting.len() + 27
        } else {
            1 + self.crafting.len() + 4 + 27
        }
    }

    /// Add items to the inventory, stacking onto matching slots first,
    /// holdables before storage. Returns whether everything fit.
    pub fn add(&mut self, key: (i16, i16), count: u8) -> bool {
        let mut stack = ItemStack::new(key.0, key.1, count as i8);
        stack = match add_to(&mut self.holdables, stack) {
            None => return true,
            Some(rest) => rest,
        };
        add_to(&mut self.storage, stack).is_none()
    }

    /// Remove a single item matching `key` from the given holdable slot.
    pub fn consume(&mut self, key: (i16, i16), held_slot: usize) -> bool {
        let Some(slot) = self.holdables.get_mut(held_slot) else {
            return false;
        };
        match slot {
            Some(stack) if stack.key() == key && stack.count > 0 => {
                stack.count -= 1;
                if stack.count == 0 {
                    *slot = None;
                }
                true
            }
            _ => false,
        }
    }

    /// Apply a window click. Returns whether anything changed.
    pub fn select(&mut self, slot: usize, right_click: bool, shift: bool) -> bool {
        if shift {
            return self.quick_move(slot);
        }

        // Craft output only supports taking the whole result.
        if slot == 0 {
            if self.cursor.is_none() {
                if let Some(stack) = self.crafted[0].take() {
                    self.cursor = Some(stack);
                    return true;
                }
            }
            return false;
        }

        let cursor = self.cursor;
        let Some(target_ref) = self.slot_mut(slot) else {
            return false;
        };
        match (cursor, *target_ref) {
            (None, None) => false,
            (None, Some(stack)) => {
                if right_click {
                    let take = (stack.count + 1) / 2;
                    let rest = stack.count - take;
                    *target_ref = (rest > 0).then(|| ItemStack { count: rest, ..stack });
                    self.cursor = Some(ItemStack { count: take, ..stack });
                } else {
                    *target_ref = None;
                    self.cursor = Some(stack);
                }
                true
            }
            (Some(held), None) => {
                if right_click {
                    *target_ref = Some(ItemStack { count: 1, ..held });
                    let rest = held.count - 1;
                    self.cursor = (rest > 0).then(|| ItemStack { count: rest, ..held });
                } else {
                    *target_ref = Some(held);
                    self.cursor = None;
                }
                true
            }
            (Some(held), Some(stack)) if held.key() == stack.key() => {
                let room = MAX_STACK - stack.count;
                let moving = if right_click { 1 } else { held.count }.min(room);
                if moving <= 0 {
                    return false;
                }
                *target_ref = Some(ItemStack {
                    count: stack.count + moving,
                    ..stack
                });
                let rest = held.count - moving;
                self.cursor = (rest > 0).then(|| ItemStack { count: rest, ..held });
                true
            }
            (Some(held), Some(stack)) => {
                *target_ref = Some(held);
                self.cursor = Some(stack);
                true
            }
        }
    }

    fn quick_move(&mut self, slot: usize) -> bool {
        let to_storage = slot >= self.holdable_base();
        let Some(src_ref) = self.slot_mut(slot) else {
            return false;
        };
        let Some(stack) = src_ref.take() else {
            return false;
        };
        let leftover = if to_storage {
            add_to(&mut self.storage, stack)
        } else {
            add_to(&mut self.holdables, stack)
        };
        match leftover {
            None => true,
            Some(rest) => {
                let moved = rest.count < stack.count;
                // Put what didn't fit back where it came from.
                if let Some(src_ref) = self.slot_mut(slot) {
                    *src_ref = Some(rest);
                }
                moved
            }
        }
    }

    /// The full-window item listing, in client slot order.
    pub fn save_to_packet(&self, wid: u8) -> ClientPacket {
        let mut items = Vec::with_capacity(self.len());
        items.extend_from_slice(&self.crafted);
        items.extend_from_slice(&self.crafting);
        if self.identifier != WORKBENCH_IDENTIFIER {
            items.extend_from_slice(&self.armor);
        }
        items.extend_from_slice(&self.storage);
        items.extend_from_slice(&self.holdables);
        ClientPacket::WindowItems { wid, items }
    }
}

/// Merge a stack into the given slots, filling matching stacks before
/// empty ones. Returns what did not fit.
fn add_to(slots: &mut [Option<ItemStack>], mut stack: ItemStack) -> Option<ItemStack> {
    for slot in slots.iter_mut() {
        if let Some(existing) = slot {
            if existing.key() == stack.key() && existing.count < MAX_STACK {
                let moving = stack.count.min(MAX_STACK - existing.count);
                existing.count += moving;
                stack.count -= moving;
                if stack.count == 0 {
                    return None;
                }
            }
        }
    }
    for slot in slots.iter_mut() {
        if slot.is_none() {
            *slot = Some(stack);
            return None;
        }
    }
    Some(stack)
}

/// Copy the shared sections (storage and holdables) from one inventory
/// into another, used when opening and closing workbench windows.
pub fn sync_inventories(src: &Inventory, dst: &mut Inventory) {
    dst.storage = src.storage;
    dst.holdables = src.holdables;
}
