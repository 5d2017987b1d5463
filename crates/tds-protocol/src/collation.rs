//! Collations and the single-byte encodings they select.
//!
//! A collation is five bytes on the wire: four bytes of LCID plus flags,
//! one byte of sort id. Only the LCID matters for decoding: it selects the
//! Windows code page used by `CHAR`/`VARCHAR`/`TEXT` data. A zero LCID
//! (legacy servers) defers to the connection charset.

use bytes::Buf;
use encoding_rs::{
    BIG5, EUC_KR, Encoding, GBK, SHIFT_JIS, UTF_8, WINDOWS_874, WINDOWS_1250, WINDOWS_1251,
    WINDOWS_1252, WINDOWS_1253, WINDOWS_1254, WINDOWS_1255, WINDOWS_1256, WINDOWS_1257,
    WINDOWS_1258,
};

use crate::codec::need;
use crate::error::ProtocolError;

/// Bit 27 of the LCID field marks a UTF-8 collation.
pub const COLLATION_FLAG_UTF8: u32 = 0x0800_0000;

const LANGUAGE_MASK: u32 = 0x0000_FFFF;

/// Column collation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Collation {
    /// LCID plus collation flags.
    pub lcid: u32,
    /// SQL sort order id.
    pub sort_id: u8,
}

impl Collation {
    /// Wire size.
    pub const SIZE: usize = 5;

    /// Decode the five collation bytes.
    pub fn decode(src: &mut impl Buf) -> Result<Self, ProtocolError> {
        need(src, Self::SIZE)?;
        let lcid = src.get_u32_le();
        let sort_id = src.get_u8();
        Ok(Self { lcid, sort_id })
    }

    /// Whether this is a UTF-8 collation.
    #[must_use]
    pub const fn is_utf8(&self) -> bool {
        self.lcid & COLLATION_FLAG_UTF8 != 0
    }

    /// Encoding for single-byte data, `None` when the LCID is unset.
    #[must_use]
    pub fn encoding(&self) -> Option<&'static Encoding> {
        if self.is_utf8() {
            return Some(UTF_8);
        }
        let language = self.lcid & LANGUAGE_MASK;
        if language == 0 {
            return None;
        }
        Some(encoding_for_language(language))
    }
}

fn encoding_for_language(language: u32) -> &'static Encoding {
    match language {
        0x0411 => SHIFT_JIS,
        0x0804 | 0x1004 => GBK,
        0x0412 => EUC_KR,
        0x0404 | 0x0C04 | 0x1404 => BIG5,
        0x041E => WINDOWS_874,
        0x042A => WINDOWS_1258,
        0x0405 | 0x0415 | 0x040E | 0x041B | 0x0424 | 0x041A | 0x0418 | 0x041C | 0x081A => {
            WINDOWS_1250
        }
        0x0419 | 0x0422 | 0x0402 | 0x0423 | 0x042F | 0x0C1A | 0x0444 | 0x043F => WINDOWS_1251,
        0x0408 => WINDOWS_1253,
        0x041F | 0x042C => WINDOWS_1254,
        0x040D => WINDOWS_1255,
        0x0425 | 0x0426 | 0x0427 => WINDOWS_1257,
        // Every Arabic locale has primary language 0x01.
        l if l & 0x3FF == 0x01 || l == 0x0429 || l == 0x0420 => WINDOWS_1256,
        _ => WINDOWS_1252,
    }
}
