use chisel_types::ItemStack;
use chisel_world::blocks::Block;
use std::time::Duration;

/// A block breaks immediately when its computed dig time falls under
/// this threshold.
const INSTANT_BREAK: Duration = Duration::from_millis(100);

/// Speed factor a held tool contributes to digging. Bare hands and
/// non-tool items dig at factor 1.
fn tool_speed(tool: Option<ItemStack>) -> f32 {
    let Some(stack) = tool else { return 1.0 };
    match stack.id {
        // wooden pickaxe, shovel, axe
        270 | 269 | 271 => 2.0,
        // stone
        274 | 273 | 275 => 4.0,
        // iron
        257 | 256 | 258 => 6.0,
        // diamond
        278 | 277 | 279 => 8.0,
        // gold
        285 | 284 | 286 => 12.0,
        _ => 1.0,
    }
}

/// The stock dig policy: hardness scaled by tool speed.
#[derive(Debug, Clone, Copy, Default)]
pub struct DigPolicy;

impl DigPolicy {
    /// How long breaking `block` takes with `tool` in hand.
    pub fn dig_time(&self, block: &Block, tool: Option<ItemStack>) -> Duration {
        if !block.breakable {
            // Effectively forever; the pipeline refuses the break anyway.
            return Duration::from_secs(3600);
        }
        if block.hardness <= 0.0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f32(block.hardness * 1.5 / tool_speed(tool))
    }

    /// Whether `block` breaks in one shot with `tool`.
    pub fn is_1ko(&self, block: &Block, tool: Option<ItemStack>) -> bool {
        block.breakable && self.dig_time(block, tool) < INSTANT_BREAK
    }
}
