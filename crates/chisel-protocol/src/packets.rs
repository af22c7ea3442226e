use crate::codec::*;
use bytes::{Buf, BufMut, BytesMut};
use chisel_types::ItemStack;
use tracing::warn;

/// The face of a block an action is applied to, or `Noop` when the client
/// sends -1 to mean "no particular face".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Face {
    NegY,
    PosY,
    NegZ,
    PosZ,
    NegX,
    PosX,
    Noop,
}

impl Face {
    pub fn from_wire(v: i8) -> DecodeResult<Face> {
        match v {
            -1 => Ok(Face::Noop),
            0 => Ok(Face::NegY),
            1 => Ok(Face::PosY),
            2 => Ok(Face::NegZ),
            3 => Ok(Face::PosZ),
            4 => Ok(Face::NegX),
            5 => Ok(Face::PosX),
            _ => Err(DecodeError::Malformed("bad face")),
        }
    }

    pub fn to_wire(self) -> i8 {
        match self {
            Face::Noop => -1,
            Face::NegY => 0,
            Face::PosY => 1,
            Face::NegZ => 2,
            Face::PosZ => 3,
            Face::NegX => 4,
            Face::PosX => 5,
        }
    }

    /// Unit offset along this face's axis.
    pub fn offset(self) -> (i32, i32, i32) {
        match self {
            Face::NegY => (0, -1, 0),
            Face::PosY => (0, 1, 0),
            Face::NegZ => (0, 0, -1),
            Face::PosZ => (0, 0, 1),
            Face::NegX => (-1, 0, 0),
            Face::PosX => (1, 0, 0),
            Face::Noop => (0, 0, 0),
        }
    }
}

/// Phase of a dig reported by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigStatus {
    Started,
    Digging,
    Stopped,
    Broken,
    Dropped,
}

impl DigStatus {
    pub fn from_wire(v: i8) -> DecodeResult<DigStatus> {
        match v {
            0 => Ok(DigStatus::Started),
            1 => Ok(DigStatus::Digging),
            2 => Ok(DigStatus::Stopped),
            3 => Ok(DigStatus::Broken),
            4 => Ok(DigStatus::Dropped),
            _ => Err(DecodeError::Malformed("bad dig status")),
        }
    }

    pub fn to_wire(self) -> i8 {
        match self {
            DigStatus::Started => 0,
            DigStatus::Digging => 1,
            DigStatus::Stopped => 2,
            DigStatus::Broken => 3,
            DigStatus::Dropped => 4,
        }
    }
}

/// Packets the client sends to the server.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerPacket {
    Ping,
    Login {
        protocol: i32,
        username: String,
        seed: i64,
        dimension: i8,
    },
    Handshake {
        username: String,
    },
    Chat {
        message: String,
    },
    Use {
        eid: i32,
        target: i32,
        button: i8,
    },
    Grounded {
        grounded: bool,
    },
    Position {
        x: f64,
        y: f64,
        stance: f64,
        z: f64,
        grounded: bool,
    },
    Orientation {
        yaw: f32,
        pitch: f32,
        grounded: bool,
    },
    Location {
        x: f64,
        y: f64,
        stance: f64,
        z: f64,
        yaw: f32,
        pitch: f32,
        grounded: bool,
    },
    Digging {
        status: DigStatus,
        x: i32,
        y: u8,
        z: i32,
        face: Face,
    },
    Build {
        x: i32,
        y: u8,
        z: i32,
        face: Face,
        primary: i16,
        count: i8,
        secondary: i16,
    },
    Equip {
        slot: i16,
    },
    Animate {
        eid: i32,
        animation: i8,
    },
    Action {
        eid: i32,
        action: i8,
    },
    Pickup {
        eid: i32,
        primary: i16,
        count: i8,
        secondary: i16,
        x: i32,
        y: i32,
        z: i32,
        yaw: i8,
        pitch: i8,
        roll: i8,
    },
    WindowClose {
        wid: u8,
    },
    WindowAction {
        wid: u8,
        slot: i16,
        right_click: bool,
        token: i16,
        shift: bool,
        item: i16,
        count: i8,
        secondary: i16,
    },
    WindowAck {
        wid: u8,
        token: i16,
        accepted: bool,
    },
    Sign {
        x: i32,
        y: i16,
        z: i32,
        lines: [String; 4],
    },
    Quit {
        reason: String,
    },
}

impl ServerPacket {
    pub fn tag(&self) -> u8 {
        match self {
            ServerPacket::Ping => 0x00,
            ServerPacket::Login { .. } => 0x01,
            ServerPacket::Handshake { .. } => 0x02,
            ServerPacket::Chat { .. } => 0x03,
            ServerPacket::Use { .. } => 0x07,
            ServerPacket::Grounded { .. } => 0x0a,
            ServerPacket::Position { .. } => 0x0b,
            ServerPacket::Orientation { .. } => 0x0c,
            ServerPacket::Location { .. } => 0x0d,
            ServerPacket::Digging { .. } => 0x0e,
            ServerPacket::Build { .. } => 0x0f,
            ServerPacket::Equip { .. } => 0x10,
            ServerPacket::Animate { .. } => 0x12,
            ServerPacket::Action { .. } => 0x13,
            ServerPacket::Pickup { .. } => 0x15,
            ServerPacket::WindowClose { .. } => 0x65,
            ServerPacket::WindowAction { .. } => 0x66,
            ServerPacket::WindowAck { .. } => 0x6a,
            ServerPacket::Sign { .. } => 0x82,
            ServerPacket::Quit { .. } => 0xff,
        }
    }

    /// Decode the payload for `tag`. The tag byte itself has already been
    /// consumed from `buf`.
    pub fn decode(tag: u8, buf: &mut BytesMut) -> DecodeResult<ServerPacket> {
        match tag {
            0x00 => Ok(ServerPacket::Ping),
            0x01 => Ok(ServerPacket::Login {
                protocol: read_i32(buf)?,
                username: read_string16(buf)?,
                seed: read_i64(buf)?,
                dimension: read_i8(buf)?,
            }),
            0x02 => Ok(ServerPacket::Handshake {
                username: read_string16(buf)?,
            }),
            0x03 => Ok(ServerPacket::Chat {
                message: read_string16(buf)?,
            }),
            0x07 => Ok(ServerPacket::Use {
                eid: read_i32(buf)?,
                target: read_i32(buf)?,
                button: read_i8(buf)?,
            }),
            0x0a => Ok(ServerPacket::Grounded {
                grounded: read_bool(buf)?,
            }),
            0x0b => Ok(ServerPacket::Position {
                x: read_f64(buf)?,
                y: read_f64(buf)?,
                stance: read_f64(buf)?,
                z: read_f64(buf)?,
                grounded: read_bool(buf)?,
            }),
            0x0c => Ok(ServerPacket::Orientation {
                yaw: read_f32(buf)?,
                pitch: read_f32(buf)?,
                grounded: read_bool(buf)?,
            }),
            0x0d => Ok(ServerPacket::Location {
                x: read_f64(buf)?,
                y: read_f64(buf)?,
                stance: read_f64(buf)?,
                z: read_f64(buf)?,
                yaw: read_f32(buf)?,
                pitch: read_f32(buf)?,
                grounded: read_bool(buf)?,
            }),
            0x0e => Ok(ServerPacket::Digging {
                status: DigStatus::from_wire(read_i8(buf)?)?,
                x: read_i32(buf)?,
                y: read_u8(buf)?,
                z: read_i32(buf)?,
                face: Face::from_wire(read_i8(buf)?)?,
            }),
            0x0f => {
                let x = read_i32(buf)?;
                let y = read_u8(buf)?;
                let z = read_i32(buf)?;
                let face = Face::from_wire(read_i8(buf)?)?;
                let primary = read_i16(buf)?;
                let (count, secondary) = if primary >= 0 {
                    (read_i8(buf)?, read_i16(buf)?)
                } else {
                    (0, 0)
                };
                Ok(ServerPacket::Build {
                    x,
                    y,
                    z,
                    face,
                    primary,
                    count,
                    secondary,
                })
            }
            0x10 => Ok(ServerPacket::Equip {
                slot: read_i16(buf)?,
            }),
            0x12 => Ok(ServerPacket::Animate {
                eid: read_i32(buf)?,
                animation: read_i8(buf)?,
            }),
            0x13 => Ok(ServerPacket::Action {
                eid: read_i32(buf)?,
                action: read_i8(buf)?,
            }),
            0x15 => Ok(ServerPacket::Pickup {
                eid: read_i32(buf)?,
                primary: read_i16(buf)?,
                count: read_i8(buf)?,
                secondary: read_i16(buf)?,
                x: read_i32(buf)?,
                y: read_i32(buf)?,
                z: read_i32(buf)?,
                yaw: read_i8(buf)?,
                pitch: read_i8(buf)?,
                roll: read_i8(buf)?,
            }),
            0x65 => Ok(ServerPacket::WindowClose {
                wid: read_u8(buf)?,
            }),
            0x66 => {
                let wid = read_u8(buf)?;
                let slot = read_i16(buf)?;
                let right_click = read_bool(buf)?;
                let token = read_i16(buf)?;
                let shift = read_bool(buf)?;
                let item = read_i16(buf)?;
                let (count, secondary) = if item >= 0 {
                    (read_i8(buf)?, read_i16(buf)?)
                } else {
                    (0, 0)
                };
                Ok(ServerPacket::WindowAction {
                    wid,
                    slot,
                    right_click,
                    token,
                    shift,
                    item,
                    count,
                    secondary,
                })
            }
            0x6a => Ok(ServerPacket::WindowAck {
                wid: read_u8(buf)?,
                token: read_i16(buf)?,
                accepted: read_bool(buf)?,
            }),
            0x82 => Ok(ServerPacket::Sign {
                x: read_i32(buf)?,
                y: read_i16(buf)?,
                z: read_i32(buf)?,
                lines: [
                    read_string16(buf)?,
                    read_string16(buf)?,
                    read_string16(buf)?,
                    read_string16(buf)?,
                ],
            }),
            0xff => Ok(ServerPacket::Quit {
                reason: read_string16(buf)?,
            }),
            other => Err(DecodeError::UnknownTag(other)),
        }
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.tag());
        match self {
            ServerPacket::Ping => {}
            ServerPacket::Login {
                protocol,
                username,
                seed,
                dimension,
            } => {
                buf.put_i32(*protocol);
                write_string16(buf, username);
                buf.put_i64(*seed);
                buf.put_i8(*dimension);
            }
            ServerPacket::Handshake { username } => write_string16(buf, username),
            ServerPacket::Chat { message } => write_string16(buf, message),
            ServerPacket::Use {
                eid,
                target,
                button,
            } => {
                buf.put_i32(*eid);
                buf.put_i32(*target);
                buf.put_i8(*button);
            }
            ServerPacket::Grounded { grounded } => buf.put_u8(*grounded as u8),
            ServerPacket::Position {
                x,
                y,
                stance,
                z,
                grounded,
            } => {
                buf.put_f64(*x);
                buf.put_f64(*y);
                buf.put_f64(*stance);
                buf.put_f64(*z);
                buf.put_u8(*grounded as u8);
            }
            ServerPacket::Orientation {
                yaw,
                pitch,
                grounded,
            } => {
                buf.put_f32(*yaw);
                buf.put_f32(*pitch);
                buf.put_u8(*grounded as u8);
            }
            ServerPacket::Location {
                x,
                y,
                stance,
                z,
                yaw,
                pitch,
                grounded,
            } => {
                buf.put_f64(*x);
                buf.put_f64(*y);
                buf.put_f64(*stance);
                buf.put_f64(*z);
                buf.put_f32(*yaw);
                buf.put_f32(*pitch);
                buf.put_u8(*grounded as u8);
            }
            ServerPacket::Digging {
                status,
                x,
                y,
                z,
                face,
            } => {
                buf.put_i8(status.to_wire());
                buf.put_i32(*x);
                buf.put_u8(*y);
                buf.put_i32(*z);
                buf.put_i8(face.to_wire());
            }
            ServerPacket::Build {
                x,
                y,
                z,
                face,
                primary,
                count,
                secondary,
            } => {
                buf.put_i32(*x);
                buf.put_u8(*y);
                buf.put_i32(*z);
                buf.put_i8(face.to_wire());
                buf.put_i16(*primary);
                if *primary >= 0 {
                    buf.put_i8(*count);
                    buf.put_i16(*secondary);
                }
            }
            ServerPacket::Equip { slot } => buf.put_i16(*slot),
            ServerPacket::Animate { eid, animation } => {
                buf.put_i32(*eid);
                buf.put_i8(*animation);
            }
            ServerPacket::Action { eid, action } => {
                buf.put_i32(*eid);
                buf.put_i8(*action);
            }
            ServerPacket::Pickup {
                eid,
                primary,
                count,
                secondary,
                x,
                y,
                z,
                yaw,
                pitch,
                roll,
            } => {
                buf.put_i32(*eid);
                buf.put_i16(*primary);
                buf.put_i8(*count);
                buf.put_i16(*secondary);
                buf.put_i32(*x);
                buf.put_i32(*y);
                buf.put_i32(*z);
                buf.put_i8(*yaw);
                buf.put_i8(*pitch);
                buf.put_i8(*roll);
            }
            ServerPacket::WindowClose { wid } => buf.put_u8(*wid),
            ServerPacket::WindowAction {
                wid,
                slot,
                right_click,
                token,
                shift,
                item,
                count,
                secondary,
            } => {
                buf.put_u8(*wid);
                buf.put_i16(*slot);
                buf.put_u8(*right_click as u8);
                buf.put_i16(*token);
                buf.put_u8(*shift as u8);
                buf.put_i16(*item);
                if *item >= 0 {
                    buf.put_i8(*count);
                    buf.put_i16(*secondary);
                }
            }
            ServerPacket::WindowAck {
                wid,
                token,
                accepted,
            } => {
                buf.put_u8(*wid);
                buf.put_i16(*token);
                buf.put_u8(*accepted as u8);
            }
            ServerPacket::Sign { x, y, z, lines } => {
                buf.put_i32(*x);
                buf.put_i16(*y);
                buf.put_i32(*z);
                for line in lines {
                    write_string16(buf, line);
                }
            }
            ServerPacket::Quit { reason } => write_string16(buf, reason),
        }
    }
}

/// Packets the server sends to the client.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientPacket {
    Ping,
    Login {
        eid: i32,
        username: String,
        seed: i64,
        dimension: i8,
    },
    Handshake {
        username: String,
    },
    Chat {
        message: String,
    },
    Time {
        time: i64,
    },
    EntityEquipment {
        eid: i32,
        slot: i16,
        primary: i16,
        secondary: i16,
    },
    SpawnPosition {
        x: i32,
        y: i32,
        z: i32,
    },
    /// Tag 0x0d toward the client swaps stance and y relative to the
    /// serverbound layout.
    PlayerLocation {
        x: f64,
        stance: f64,
        y: f64,
        z: f64,
        yaw: f32,
        pitch: f32,
        grounded: bool,
    },
    Animate {
        eid: i32,
        animation: i8,
    },
    SpawnPlayer {
        eid: i32,
        username: String,
        x: i32,
        y: i32,
        z: i32,
        yaw: u8,
        pitch: u8,
        item: i16,
    },
    SpawnItem {
        eid: i32,
        primary: i16,
        count: i8,
        secondary: i16,
        x: i32,
        y: i32,
        z: i32,
        yaw: i8,
        pitch: i8,
        roll: i8,
    },
    Collect {
        collected: i32,
        collector: i32,
    },
    DestroyEntity {
        eid: i32,
    },
    CreateEntity {
        eid: i32,
    },
    EntityOrientation {
        eid: i32,
        yaw: u8,
        pitch: u8,
    },
    EntityTeleport {
        eid: i32,
        x: i32,
        y: i32,
        z: i32,
        yaw: u8,
        pitch: u8,
    },
    Prechunk {
        cx: i32,
        cz: i32,
        enabled: bool,
    },
    ChunkData {
        x: i32,
        y: i16,
        z: i32,
        sx: u8,
        sy: u8,
        sz: u8,
        data: Vec<u8>,
    },
    BlockChange {
        x: i32,
        y: u8,
        z: i32,
        block: u8,
        metadata: u8,
    },
    WindowOpen {
        wid: u8,
        kind: u8,
        title: String,
        slots: u8,
    },
    WindowItems {
        wid: u8,
        items: Vec<Option<ItemStack>>,
    },
    WindowToken {
        wid: u8,
        token: i16,
        accepted: bool,
    },
    Sign {
        x: i32,
        y: i16,
        z: i32,
        lines: [String; 4],
    },
    Error {
        message: String,
    },
}

impl ClientPacket {
    pub fn tag(&self) -> u8 {
        match self {
            ClientPacket::Ping => 0x00,
            ClientPacket::Login { .. } => 0x01,
            ClientPacket::Handshake { .. } => 0x02,
            ClientPacket::Chat { .. } => 0x03,
            ClientPacket::Time { .. } => 0x04,
            ClientPacket::EntityEquipment { .. } => 0x05,
            ClientPacket::SpawnPosition { .. } => 0x06,
            ClientPacket::PlayerLocation { .. } => 0x0d,
            ClientPacket::Animate { .. } => 0x12,
            ClientPacket::SpawnPlayer { .. } => 0x14,
            ClientPacket::SpawnItem { .. } => 0x15,
            ClientPacket::Collect { .. } => 0x16,
            ClientPacket::DestroyEntity { .. } => 0x1d,
            ClientPacket::CreateEntity { .. } => 0x1e,
            ClientPacket::EntityOrientation { .. } => 0x20,
            ClientPacket::EntityTeleport { .. } => 0x22,
            ClientPacket::Prechunk { .. } => 0x32,
            ClientPacket::ChunkData { .. } => 0x33,
            ClientPacket::BlockChange { .. } => 0x35,
            ClientPacket::WindowOpen { .. } => 0x64,
            ClientPacket::WindowItems { .. } => 0x68,
            ClientPacket::WindowToken { .. } => 0x6a,
            ClientPacket::Sign { .. } => 0x82,
            ClientPacket::Error { .. } => 0xff,
        }
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.tag());
        match self {
            ClientPacket::Ping => {}
            ClientPacket::Login {
                eid,
                username,
                seed,
                dimension,
            } => {
                buf.put_i32(*eid);
                write_string16(buf, username);
                buf.put_i64(*seed);
                buf.put_i8(*dimension);
            }
            ClientPacket::Handshake { username } => write_string16(buf, username),
            ClientPacket::Chat { message } => write_string16(buf, message),
            ClientPacket::Time { time } => buf.put_i64(*time),
            ClientPacket::EntityEquipment {
                eid,
                slot,
                primary,
                secondary,
            } => {
                buf.put_i32(*eid);
                buf.put_i16(*slot);
                buf.put_i16(*primary);
                buf.put_i16(*secondary);
            }
            ClientPacket::SpawnPosition { x, y, z } => {
                buf.put_i32(*x);
                buf.put_i32(*y);
                buf.put_i32(*z);
            }
            ClientPacket::PlayerLocation {
                x,
                stance,
                y,
                z,
                yaw,
                pitch,
                grounded,
            } => {
                buf.put_f64(*x);
                buf.put_f64(*stance);
                buf.put_f64(*y);
                buf.put_f64(*z);
                buf.put_f32(*yaw);
                buf.put_f32(*pitch);
                buf.put_u8(*grounded as u8);
            }
            ClientPacket::Animate { eid, animation } => {
                buf.put_i32(*eid);
                buf.put_i8(*animation);
            }
            ClientPacket::SpawnPlayer {
                eid,
                username,
                x,
                y,
                z,
                yaw,
                pitch,
                item,
            } => {
                buf.put_i32(*eid);
                write_string16(buf, username);
                buf.put_i32(*x);
                buf.put_i32(*y);
                buf.put_i32(*z);
                buf.put_u8(*yaw);
                buf.put_u8(*pitch);
                buf.put_i16(*item);
            }
            ClientPacket::SpawnItem {
                eid,
                primary,
                count,
                secondary,
                x,
                y,
                z,
                yaw,
                pitch,
                roll,
            } => {
                buf.put_i32(*eid);
                buf.put_i16(*primary);
                buf.put_i8(*count);
                buf.put_i16(*secondary);
                buf.put_i32(*x);
                buf.put_i32(*y);
                buf.put_i32(*z);
                buf.put_i8(*yaw);
                buf.put_i8(*pitch);
                buf.put_i8(*roll);
            }
            ClientPacket::Collect {
                collected,
                collector,
            } => {
                buf.put_i32(*collected);
                buf.put_i32(*collector);
            }
            ClientPacket::DestroyEntity { eid } => buf.put_i32(*eid),
            ClientPacket::CreateEntity { eid } => buf.put_i32(*eid),
            ClientPacket::EntityOrientation { eid, yaw, pitch } => {
                buf.put_i32(*eid);
                buf.put_u8(*yaw);
                buf.put_u8(*pitch);
            }
            ClientPacket::EntityTeleport {
                eid,
                x,
                y,
                z,
                yaw,
                pitch,
            } => {
                buf.put_i32(*eid);
                buf.put_i32(*x);
                buf.put_i32(*y);
                buf.put_i32(*z);
                buf.put_u8(*yaw);
                buf.put_u8(*pitch);
            }
            ClientPacket::Prechunk { cx, cz, enabled } => {
                buf.put_i32(*cx);
                buf.put_i32(*cz);
                buf.put_u8(*enabled as u8);
            }
            ClientPacket::ChunkData {
                x,
                y,
                z,
                sx,
                sy,
                sz,
                data,
            } => {
                buf.put_i32(*x);
                buf.put_i16(*y);
                buf.put_i32(*z);
                buf.put_u8(*sx);
                buf.put_u8(*sy);
                buf.put_u8(*sz);
                buf.put_i32(data.len() as i32);
                buf.put_slice(data);
            }
            ClientPacket::BlockChange {
                x,
                y,
                z,
                block,
                metadata,
            } => {
                buf.put_i32(*x);
                buf.put_u8(*y);
                buf.put_i32(*z);
                buf.put_u8(*block);
                buf.put_u8(*metadata);
            }
            ClientPacket::WindowOpen {
                wid,
                kind,
                title,
                slots,
            } => {
                buf.put_u8(*wid);
                buf.put_u8(*kind);
                write_string8(buf, title);
                buf.put_u8(*slots);
            }
            ClientPacket::WindowItems { wid, items } => {
                buf.put_u8(*wid);
                buf.put_i16(items.len() as i16);
                for item in items {
                    match item {
                        None => buf.put_i16(-1),
                        Some(stack) => {
                            buf.put_i16(stack.id);
                            buf.put_i8(stack.count);
                            buf.put_i16(stack.secondary);
                        }
                    }
                }
            }
            ClientPacket::WindowToken {
                wid,
                token,
                accepted,
            } => {
                buf.put_u8(*wid);
                buf.put_i16(*token);
                buf.put_u8(*accepted as u8);
            }
            ClientPacket::Sign { x, y, z, lines } => {
                buf.put_i32(*x);
                buf.put_i16(*y);
                buf.put_i32(*z);
                for line in lines {
                    write_string16(buf, line);
                }
            }
            ClientPacket::Error { message } => write_string16(buf, message),
        }
    }

    /// Decode the payload for `tag`; the inverse of `encode`, used by
    /// tests and diagnostics to read back a server output stream.
    pub fn decode(tag: u8, buf: &mut BytesMut) -> DecodeResult<ClientPacket> {
        match tag {
            0x00 => Ok(ClientPacket::Ping),
            0x01 => Ok(ClientPacket::Login {
                eid: read_i32(buf)?,
                username: read_string16(buf)?,
                seed: read_i64(buf)?,
                dimension: read_i8(buf)?,
            }),
            0x02 => Ok(ClientPacket::Handshake {
                username: read_string16(buf)?,
            }),
            0x03 => Ok(ClientPacket::Chat {
                message: read_string16(buf)?,
            }),
            0x04 => Ok(ClientPacket::Time {
                time: read_i64(buf)?,
            }),
            0x05 => Ok(ClientPacket::EntityEquipment {
                eid: read_i32(buf)?,
                slot: read_i16(buf)?,
                primary: read_i16(buf)?,
                secondary: read_i16(buf)?,
            }),
            0x06 => Ok(ClientPacket::SpawnPosition {
                x: read_i32(buf)?,
                y: read_i32(buf)?,
                z: read_i32(buf)?,
            }),
            0x0d => Ok(ClientPacket::PlayerLocation {
                x: read_f64(buf)?,
                stance: read_f64(buf)?,
                y: read_f64(buf)?,
                z: read_f64(buf)?,
                yaw: read_f32(buf)?,
                pitch: read_f32(buf)?,
                grounded: read_bool(buf)?,
            }),
            0x12 => Ok(ClientPacket::Animate {
                eid: read_i32(buf)?,
                animation: read_i8(buf)?,
            }),
            0x14 => Ok(ClientPacket::SpawnPlayer {
                eid: read_i32(buf)?,
                username: read_string16(buf)?,
                x: read_i32(buf)?,
                y: read_i32(buf)?,
                z: read_i32(buf)?,
                yaw: read_u8(buf)?,
                pitch: read_u8(buf)?,
                item: read_i16(buf)?,
            }),
            0x15 => Ok(ClientPacket::SpawnItem {
                eid: read_i32(buf)?,
                primary: read_i16(buf)?,
                count: read_i8(buf)?,
                secondary: read_i16(buf)?,
                x: read_i32(buf)?,
                y: read_i32(buf)?,
                z: read_i32(buf)?,
                yaw: read_i8(buf)?,
                pitch: read_i8(buf)?,
                roll: read_i8(buf)?,
            }),
            0x16 => Ok(ClientPacket::Collect {
                collected: read_i32(buf)?,
                collector: read_i32(buf)?,
            }),
            0x1d => Ok(ClientPacket::DestroyEntity {
                eid: read_i32(buf)?,
            }),
            0x1e => Ok(ClientPacket::CreateEntity {
                eid: read_i32(buf)?,
            }),
            0x20 => Ok(ClientPacket::EntityOrientation {
                eid: read_i32(buf)?,
                yaw: read_u8(buf)?,
                pitch: read_u8(buf)?,
            }),
            0x22 => Ok(ClientPacket::EntityTeleport {
                eid: read_i32(buf)?,
                x: read_i32(buf)?,
                y: read_i32(buf)?,
                z: read_i32(buf)?,
                yaw: read_u8(buf)?,
                pitch: read_u8(buf)?,
            }),
            0x32 => Ok(ClientPacket::Prechunk {
                cx: read_i32(buf)?,
                cz: read_i32(buf)?,
                enabled: read_bool(buf)?,
            }),
            0x33 => {
                let x = read_i32(buf)?;
                let y = read_i16(buf)?;
                let z = read_i32(buf)?;
                let sx = read_u8(buf)?;
                let sy = read_u8(buf)?;
                let sz = read_u8(buf)?;
                let len = read_i32(buf)?;
                if len < 0 {
                    return Err(DecodeError::Malformed("negative chunk data length"));
                }
                let len = len as usize;
                if buf.remaining() < len {
                    return Err(DecodeError::NotEnoughData);
                }
                let data = buf.split_to(len).to_vec();
                Ok(ClientPacket::ChunkData {
                    x,
                    y,
                    z,
                    sx,
                    sy,
                    sz,
                    data,
                })
            }
            0x35 => Ok(ClientPacket::BlockChange {
                x: read_i32(buf)?,
                y: read_u8(buf)?,
                z: read_i32(buf)?,
                block: read_u8(buf)?,
                metadata: read_u8(buf)?,
            }),
            0x64 => Ok(ClientPacket::WindowOpen {
                wid: read_u8(buf)?,
                kind: read_u8(buf)?,
                title: read_string8(buf)?,
                slots: read_u8(buf)?,
            }),
            0x68 => {
                let wid = read_u8(buf)?;
                let count = read_i16(buf)?;
                if count < 0 {
                    return Err(DecodeError::Malformed("negative item count"));
                }
                let mut items = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    let id = read_i16(buf)?;
                    if id < 0 {
                        items.push(None);
                    } else {
                        let count = read_i8(buf)?;
                        let secondary = read_i16(buf)?;
                        items.push(Some(ItemStack::new(id, secondary, count)));
                    }
                }
                Ok(ClientPacket::WindowItems { wid, items })
            }
            0x6a => Ok(ClientPacket::WindowToken {
                wid: read_u8(buf)?,
                token: read_i16(buf)?,
                accepted: read_bool(buf)?,
            }),
            0x82 => Ok(ClientPacket::Sign {
                x: read_i32(buf)?,
                y: read_i16(buf)?,
                z: read_i32(buf)?,
                lines: [
                    read_string16(buf)?,
                    read_string16(buf)?,
                    read_string16(buf)?,
                    read_string16(buf)?,
                ],
            }),
            0xff => Ok(ClientPacket::Error {
                message: read_string16(buf)?,
            }),
            other => Err(DecodeError::UnknownTag(other)),
        }
    }
}

/// Split an append-only byte buffer into the complete packets it contains.
///
/// Only whole packets are consumed: an incomplete tail is left in `buf`,
/// starting at that packet's tag byte, so the caller can append more data
/// and try again. Truncation is therefore not an error. An unknown tag
/// cannot be skipped (the wire carries no lengths), so the rest of the
/// buffer is logged and dropped; the connection survives.
pub fn parse_packets(buf: &mut BytesMut) -> Result<Vec<ServerPacket>, DecodeError> {
    let mut packets = Vec::new();
    loop {
        if buf.is_empty() {
            return Ok(packets);
        }
        let mut peek = buf.clone();
        let tag = peek.get_u8();
        match ServerPacket::decode(tag, &mut peek) {
            Ok(packet) => {
                let consumed = buf.len() - peek.len();
                buf.advance(consumed);
                packets.push(packet);
            }
            Err(DecodeError::NotEnoughData) => return Ok(packets),
            Err(DecodeError::UnknownTag(tag)) => {
                warn!("didn't handle unparseable packet 0x{:02x}", tag);
                buf.clear();
                return Ok(packets);
            }
            Err(err) => return Err(err),
        }
    }
}

/// Build the bytes of an error packet (tag 0xff) with the given reason.
pub fn make_error_packet(message: &str) -> BytesMut {
    let mut buf = BytesMut::new();
    ClientPacket::Error {
        message: message.into(),
    }
    .encode(&mut buf);
    buf
}
