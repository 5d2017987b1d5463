//! Low-level read/write helpers shared by the token decoder and request encoders.
//!
//! All readers check `remaining()` before consuming and report
//! [`ProtocolError::UnexpectedEof`] without advancing when data is short,
//! so callers can retry once more bytes arrive.

use bytes::{Buf, BufMut};

use crate::error::ProtocolError;

/// Fail with `UnexpectedEof` unless `n` bytes are available.
#[inline]
pub fn need(src: &impl Buf, n: usize) -> Result<(), ProtocolError> {
    if src.remaining() < n {
        Err(ProtocolError::UnexpectedEof)
    } else {
        Ok(())
    }
}

/// Read a UTF-16LE string with a 1-byte character count.
pub fn read_b_varchar(src: &mut impl Buf) -> Result<String, ProtocolError> {
    need(src, 1)?;
    let len = usize::from(src.chunk()[0]);
    need(src, 1 + len * 2)?;
    src.advance(1);
    read_utf16_string(src, len)
}

/// Read a UTF-16LE string with a 2-byte character count.
pub fn read_us_varchar(src: &mut impl Buf) -> Result<String, ProtocolError> {
    need(src, 2)?;
    let mut peek = src.chunk();
    let len = if peek.len() >= 2 {
        usize::from(peek.get_u16_le())
    } else {
        // Header split across chunks; only happens with chained buffers.
        return read_us_varchar_slow(src);
    };
    need(src, 2 + len * 2)?;
    src.advance(2);
    read_utf16_string(src, len)
}

fn read_us_varchar_slow(src: &mut impl Buf) -> Result<String, ProtocolError> {
    let len = usize::from(src.get_u16_le());
    read_utf16_string(src, len)
}

/// Read `char_count` UTF-16LE code units.
pub fn read_utf16_string(src: &mut impl Buf, char_count: usize) -> Result<String, ProtocolError> {
    need(src, char_count * 2)?;
    let units: Vec<u16> = (0..char_count).map(|_| src.get_u16_le()).collect();
    String::from_utf16(&units).map_err(|e| ProtocolError::StringEncoding(e.to_string()))
}

/// Decode a complete UTF-16LE byte slice.
pub fn decode_utf16(bytes: &[u8]) -> Result<String, ProtocolError> {
    if bytes.len() % 2 != 0 {
        return Err(ProtocolError::StringEncoding(format!(
            "odd UTF-16 byte length {}",
            bytes.len()
        )));
    }
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    String::from_utf16(&units).map_err(|e| ProtocolError::StringEncoding(e.to_string()))
}

/// Write a UTF-16LE string with a 1-byte character count.
pub fn write_b_varchar(dst: &mut impl BufMut, s: &str) {
    let units: Vec<u16> = s.encode_utf16().take(usize::from(u8::MAX)).collect();
    dst.put_u8(units.len() as u8);
    units.iter().for_each(|&u| dst.put_u16_le(u));
}

/// Write a UTF-16LE string with a 2-byte character count.
pub fn write_us_varchar(dst: &mut impl BufMut, s: &str) {
    let units: Vec<u16> = s.encode_utf16().take(usize::from(u16::MAX)).collect();
    dst.put_u16_le(units.len() as u16);
    units.iter().for_each(|&u| dst.put_u16_le(u));
}

/// Write a UTF-16LE string without a length prefix.
pub fn write_utf16_string(dst: &mut impl BufMut, s: &str) {
    for unit in s.encode_utf16() {
        dst.put_u16_le(unit);
    }
}
