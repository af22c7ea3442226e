pub mod codec;
pub mod packets;

pub use codec::*;
pub use packets::*;

/// The only wire protocol version this server speaks.
pub const SUPPORTED_PROTOCOL: i32 = 11;
