use bytes::{Buf, BufMut, BytesMut};
use thiserror::Error;

/// Longest string the wire accepts, in UTF-16 code units.
const MAX_STRING_LEN: usize = 32767;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("not enough data")]
    NotEnoughData,
    #[error("malformed field: {0}")]
    Malformed(&'static str),
    #[error("unknown packet tag 0x{0:02x}")]
    UnknownTag(u8),
}

pub type DecodeResult<T> = Result<T, DecodeError>;

pub fn read_u8(buf: &mut BytesMut) -> DecodeResult<u8> {
    if !buf.has_remaining() {
        return Err(DecodeError::NotEnoughData);
    }
    Ok(buf.get_u8())
}

pub fn read_i8(buf: &mut BytesMut) -> DecodeResult<i8> {
    Ok(read_u8(buf)? as i8)
}

pub fn read_bool(buf: &mut BytesMut) -> DecodeResult<bool> {
    Ok(read_u8(buf)? != 0)
}

pub fn read_i16(buf: &mut BytesMut) -> DecodeResult<i16> {
    if buf.remaining() < 2 {
        return Err(DecodeError::NotEnoughData);
    }
    Ok(buf.get_i16())
}

pub fn read_i32(buf: &mut BytesMut) -> DecodeResult<i32> {
    if buf.remaining() < 4 {
        return Err(DecodeError::NotEnoughData);
    }
    Ok(buf.get_i32())
}

pub fn read_i64(buf: &mut BytesMut) -> DecodeResult<i64> {
    if buf.remaining() < 8 {
        return Err(DecodeError::NotEnoughData);
    }
    Ok(buf.get_i64())
}

pub fn read_f32(buf: &mut BytesMut) -> DecodeResult<f32> {
    if buf.remaining() < 4 {
        return Err(DecodeError::NotEnoughData);
    }
    Ok(buf.get_f32())
}

pub fn read_f64(buf: &mut BytesMut) -> DecodeResult<f64> {
    if buf.remaining() < 8 {
        return Err(DecodeError::NotEnoughData);
    }
    Ok(buf.get_f64())
}

/// Read a UTF-16BE string prefixed by its length in code units.
pub fn read_string16(buf: &mut BytesMut) -> DecodeResult<String> {
    let len = read_i16(buf)?;
    if len < 0 {
        return Err(DecodeError::Malformed("negative string length"));
    }
    let len = len as usize;
    if len > MAX_STRING_LEN {
        return Err(DecodeError::Malformed("string too long"));
    }
    if buf.remaining() < len * 2 {
        return Err(DecodeError::NotEnoughData);
    }
    let units: Vec<u16> = (0..len).map(|_| buf.get_u16()).collect();
    char::decode_utf16(units)
        .collect::<Result<String, _>>()
        .map_err(|_| DecodeError::Malformed("invalid UTF-16"))
}

pub fn write_string16(buf: &mut BytesMut, s: &str) {
    let units: Vec<u16> = s.encode_utf16().collect();
    buf.put_i16(units.len().min(MAX_STRING_LEN) as i16);
    for unit in units.iter().take(MAX_STRING_LEN) {
        buf.put_u16(*unit);
    }
}

/// Read a UTF-8 string prefixed by its byte length. Window titles use
/// this older encoding; everything else on the wire is UTF-16BE.
pub fn read_string8(buf: &mut BytesMut) -> DecodeResult<String> {
    let len = read_i16(buf)?;
    if len < 0 {
        return Err(DecodeError::Malformed("negative string length"));
    }
    let len = len as usize;
    if buf.remaining() < len {
        return Err(DecodeError::NotEnoughData);
    }
    let bytes = buf.split_to(len);
    String::from_utf8(bytes.to_vec()).map_err(|_| DecodeError::Malformed("invalid UTF-8"))
}

pub fn write_string8(buf: &mut BytesMut, s: &str) {
    buf.put_i16(s.len().min(MAX_STRING_LEN) as i16);
    buf.put_slice(&s.as_bytes()[..s.len().min(MAX_STRING_LEN)]);
}
