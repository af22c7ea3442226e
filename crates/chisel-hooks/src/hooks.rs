use chisel_protocol::{ClientPacket, Face};
use chisel_types::{BlockPos, Location};
use chisel_world::blocks::Block;
use chisel_world::{Chunk, Entity, Player, World};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HookError {
    #[error("{0}")]
    Failed(String),
}

impl HookError {
    pub fn failed(message: impl Into<String>) -> Self {
        HookError::Failed(message.into())
    }
}

/// The bag of server capabilities handed to hooks and chat commands.
/// The server's broadcast bus implements this.
pub trait Factory: Send + Sync {
    /// Send a packet to every connected client.
    fn broadcast(&self, packet: ClientPacket);
    /// Format and broadcast a chat line, and log it.
    fn chat(&self, message: &str);
    /// Spawn a dropped-item entity at fixed-point world coordinates.
    fn give(&self, coords: (i32, i32, i32), item: (i16, i16), count: i8);
    /// The shared world gateway.
    fn world(&self) -> &Arc<World>;
    /// The block at `pos` if its chunk is resident; hooks are
    /// synchronous and must not suspend on chunk I/O.
    fn block_at(&self, pos: BlockPos) -> Option<u8>;
    /// Usernames of every connected player.
    fn usernames(&self) -> Vec<String>;
    /// Current location of a connected player.
    fn player_location(&self, username: &str) -> Option<Location>;
    /// Move a connected player and replay its spawn sequence. Returns
    /// false when no such player is connected.
    fn teleport(&self, username: &str, location: Location) -> bool;
    /// Allocate a fresh entity id.
    fn next_eid(&self) -> u32;
    /// (name, usage, info) for every registered chat command.
    fn commands(&self) -> Vec<(String, String, String)>;
    /// Server time in ticks.
    fn time(&self) -> i64;
}

/// What a build request is trying to place: a block, or an item the
/// commit step will refuse.
#[derive(Debug, Clone, Copy)]
pub enum BuildTarget {
    Block(&'static Block),
    Item(i16),
}

/// Everything a build request carries between hooks. Pre-build hooks may
/// rewrite any field before the commit happens.
#[derive(Debug, Clone, Copy)]
pub struct BuildData {
    pub target: BuildTarget,
    pub metadata: u8,
    pub x: i32,
    pub y: u8,
    pub z: i32,
    pub face: Face,
}

/// Runs before a build commits. Returning `false` stops the chain and
/// skips the commit; the returned `BuildData` feeds the next hook.
pub trait PreBuildHook: Send + Sync {
    fn pre_build(
        &self,
        factory: &dyn Factory,
        player: &mut Player,
        data: BuildData,
    ) -> Result<(bool, BuildData), HookError>;
}

/// Runs after a build has committed. Cannot veto.
pub trait PostBuildHook: Send + Sync {
    fn post_build(
        &self,
        factory: &dyn Factory,
        player: &mut Player,
        coords: BlockPos,
        block: &'static Block,
    ) -> Result<(), HookError>;
}

/// Runs after a block has been destroyed by digging. Receives the chunk
/// and local coordinates, plus the identity of the block that stood
/// there.
pub trait DigHook: Send + Sync {
    fn dig(
        &self,
        factory: &dyn Factory,
        chunk: &mut Chunk,
        x: u8,
        y: u8,
        z: u8,
        block: &'static Block,
    );
}

/// Runs when a sign is created or edited.
pub trait SignHook: Send + Sync {
    fn sign(
        &self,
        factory: &dyn Factory,
        chunk: &mut Chunk,
        x: i32,
        y: u8,
        z: i32,
        lines: &[String; 4],
        new: bool,
    );
}

/// Runs when a player right- or left-clicks an entity. Registered per
/// entity name via `targets`.
pub trait UseHook: Send + Sync {
    fn targets(&self) -> &'static [&'static str];
    fn used(&self, factory: &dyn Factory, player: &mut Player, target: &Entity, primary: bool);
}

/// A slash command. Returned lines are sent back to the caller one chat
/// packet each, in order.
pub trait ChatCommand: Send + Sync {
    fn name(&self) -> &'static str;
    fn aliases(&self) -> &'static [&'static str] {
        &[]
    }
    fn usage(&self) -> &'static str {
        ""
    }
    fn info(&self) -> &'static str {
        ""
    }
    fn run(
        &self,
        factory: &dyn Factory,
        username: &str,
        params: &[&str],
    ) -> Result<Vec<String>, HookError>;
}

/// An external physics subsystem fed with the coordinates of blocks it
/// has subscribed to.
pub trait Automaton: Send + Sync {
    fn blocks(&self) -> &'static [u8];
    fn feed(&self, factory: &dyn Factory, coords: BlockPos);
}
