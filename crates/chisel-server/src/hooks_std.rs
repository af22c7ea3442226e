use chisel_hooks::{
    BuildData, BuildTarget, DigHook, Factory, HookError, HookRegistry, PreBuildHook, SignHook,
};
use chisel_types::{BlockPos, ItemStack, Location};
use chisel_world::blocks;
use chisel_world::{Chunk, Entity, Player};
use std::sync::Arc;
use tracing::info;

/// Registered as "overwrite": vetoes builds whose destination cell is
/// occupied by something that cannot be replaced.
pub struct OverwriteHook;

impl PreBuildHook for OverwriteHook {
    fn pre_build(
        &self,
        factory: &dyn Factory,
        _player: &mut Player,
        data: BuildData,
    ) -> Result<(bool, BuildData), HookError> {
        if let BuildTarget::Item(_) = data.target {
            // The commit rejects items on its own.
            return Ok((true, data));
        }
        let (dx, dy, dz) = data.face.offset();
        let y = data.y as i32 + dy;
        if !(0..128).contains(&y) {
            return Ok((false, data));
        }
        let destination = BlockPos::new(data.x + dx, y as u8, data.z + dz);
        match factory.block_at(destination) {
            Some(id) => {
                let replaceable = blocks::block_by_id(id)
                    .map(|b| b.replaceable)
                    .unwrap_or(false);
                Ok((replaceable, data))
            }
            // Chunk not resident here; the commit path will load it.
            None => Ok((true, data)),
        }
    }
}

/// Registered as "drops": spawns the broken block's drop as an item
/// entity in the hole.
pub struct DropsHook;

impl DigHook for DropsHook {
    fn dig(
        &self,
        factory: &dyn Factory,
        chunk: &mut Chunk,
        x: u8,
        y: u8,
        z: u8,
        block: &'static blocks::Block,
    ) {
        if block.drop == 0 {
            return;
        }
        let location = Location::at(
            chunk.x as f64 * 16.0 + x as f64 + 0.5,
            y as f64 + 0.5,
            chunk.z as f64 * 16.0 + z as f64 + 0.5,
        );
        let entity = Entity::item(
            factory.next_eid(),
            ItemStack::new(block.drop as i16, 0, 1),
            location,
        );
        let packet = entity.save_to_packet();
        chunk.entities.push(entity);
        chunk.dirty = true;
        factory.broadcast(packet);
    }
}

/// Registered as "notify": logs sign edits for the console.
pub struct NotifyHook;

impl SignHook for NotifyHook {
    fn sign(
        &self,
        _factory: &dyn Factory,
        _chunk: &mut Chunk,
        x: i32,
        y: u8,
        z: i32,
        lines: &[String; 4],
        new: bool,
    ) {
        info!(
            "sign {} at ({}, {}, {}): {:?}",
            if new { "placed" } else { "edited" },
            x,
            y,
            z,
            lines.join(" / ")
        );
    }
}

/// Register the hooks the default config refers to by name.
pub fn register_defaults(registry: &mut HookRegistry) {
    registry.register_pre_build("overwrite", Arc::new(OverwriteHook));
    registry.register_dig("drops", Arc::new(DropsHook));
    registry.register_sign("notify", Arc::new(NotifyHook));
}
