//! Decoded column values.
//!
//! Values keep the wire representation where a lossless Rust type is not
//! available without optional dependencies: money stays a scaled integer,
//! decimals keep their mantissa and scale, temporal values keep the day and
//! tick counts of the protocol. `tds-types` converts these into `chrono`,
//! `rust_decimal` and `uuid` types.

use std::fmt;

use bytes::Bytes;
use encoding_rs::Encoding;

/// A single decoded column value.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValue {
    /// SQL NULL.
    Null,
    /// BIT.
    Bit(bool),
    /// TINYINT.
    TinyInt(u8),
    /// SMALLINT.
    SmallInt(i16),
    /// INT.
    Int(i32),
    /// BIGINT.
    BigInt(i64),
    /// REAL.
    Real(f32),
    /// FLOAT.
    Float(f64),
    /// MONEY / SMALLMONEY in ten-thousandths.
    Money(i64),
    /// DECIMAL / NUMERIC.
    Numeric(Numeric),
    /// DATETIME / SMALLDATETIME.
    DateTime(DateTime),
    /// DATE.
    Date(Date),
    /// TIME.
    Time(Time),
    /// DATETIME2.
    DateTime2(Date, Time),
    /// DATETIMEOFFSET; date and time are UTC.
    DateTimeOffset(Date, Time, i16),
    /// UNIQUEIDENTIFIER in wire byte order.
    Guid([u8; 16]),
    /// Character data that fits in a row.
    String(String),
    /// Binary data that fits in a row (also sql_variant payloads).
    Binary(Bytes),
    /// Large object, kept as the chunks it arrived in.
    Lob(LobValue),
}

impl ColumnValue {
    /// Whether this is SQL NULL.
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

/// DECIMAL / NUMERIC value: `mantissa * 10^-scale`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Numeric {
    /// Signed unscaled value.
    pub mantissa: i128,
    /// Declared precision.
    pub precision: u8,
    /// Digits after the decimal point.
    pub scale: u8,
}

impl fmt::Display for Numeric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let digits = self.mantissa.unsigned_abs().to_string();
        let scale = usize::from(self.scale);
        let sign = if self.mantissa < 0 { "-" } else { "" };
        if scale == 0 {
            return write!(f, "{sign}{digits}");
        }
        let padded = format!("{digits:0>width$}", width = scale + 1);
        let (int_part, frac_part) = padded.split_at(padded.len() - scale);
        write!(f, "{sign}{int_part}.{frac_part}")
    }
}

/// DATETIME value: days since 1900-01-01 and 1/300 second ticks since midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateTime {
    /// Days relative to 1900-01-01, may be negative.
    pub days: i32,
    /// Three-hundredths of a second since midnight.
    pub ticks: u32,
}

/// DATE value: days since 0001-01-01.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Date {
    /// Days since 0001-01-01.
    pub days: u32,
}

/// TIME value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Time {
    /// Nanoseconds since midnight.
    pub nanos: u64,
    /// Declared fractional-second scale.
    pub scale: u8,
}

/// How the bytes of a large object are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LobKind {
    /// IMAGE, VARBINARY(MAX), UDT.
    Binary,
    /// NTEXT, NVARCHAR(MAX), XML: UTF-16LE.
    Unicode,
    /// TEXT, VARCHAR(MAX): single-byte text in the given encoding.
    SingleByte(&'static Encoding),
}

/// A large-object value as received from the wire.
///
/// The chunks are the zero-copy slices the decoder split off the packet
/// buffer; they are only concatenated when a consumer asks for contiguous
/// access.
#[derive(Debug, Clone, PartialEq)]
pub struct LobValue {
    kind: LobKind,
    chunks: Vec<Bytes>,
}

impl LobValue {
    /// Create a value from its chunks.
    #[must_use]
    pub fn new(kind: LobKind, chunks: Vec<Bytes>) -> Self {
        Self { kind, chunks }
    }

    /// Interpretation of the bytes.
    #[must_use]
    pub const fn kind(&self) -> LobKind {
        self.kind
    }

    /// Raw chunks in arrival order.
    #[must_use]
    pub fn chunks(&self) -> &[Bytes] {
        &self.chunks
    }

    /// Total length in bytes.
    #[must_use]
    pub fn byte_len(&self) -> u64 {
        self.chunks.iter().map(|c| c.len() as u64).sum()
    }

    /// Whether the value has no bytes at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chunks.iter().all(Bytes::is_empty)
    }

    /// Concatenate the chunks. Free when the value arrived in one chunk.
    #[must_use]
    pub fn to_bytes(&self) -> Bytes {
        match self.chunks.as_slice() {
            [] => Bytes::new(),
            [single] => single.clone(),
            many => {
                let mut out = Vec::with_capacity(many.iter().map(Bytes::len).sum());
                many.iter().for_each(|c| out.extend_from_slice(c));
                Bytes::from(out)
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_display() {
        let n = |mantissa, scale| Numeric {
            mantissa,
            precision: 18,
            scale,
        };
        assert_eq!(n(12345, 2).to_string(), "123.45");
        assert_eq!(n(-5, 3).to_string(), "-0.005");
        assert_eq!(n(42, 0).to_string(), "42");
        assert_eq!(n(0, 2).to_string(), "0.00");
    }

    #[test]
    fn test_lob_concatenation() {
        let lob = LobValue::new(
            LobKind::Binary,
            vec![Bytes::from_static(b"ab"), Bytes::from_static(b"cde")],
        );
        assert_eq!(lob.byte_len(), 5);
        assert_eq!(&lob.to_bytes()[..], b"abcde");
        assert!(!lob.is_empty());
        assert!(LobValue::new(LobKind::Unicode, Vec::new()).is_empty());
    }
}
