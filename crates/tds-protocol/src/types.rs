//! Data type codes as they appear in column metadata.

use bitflags::bitflags;

/// Data type identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TypeId {
    // Fixed-length types
    /// Null type, always zero bytes.
    Null = 0x1F,
    /// 8-bit unsigned integer.
    Int1 = 0x30,
    /// Bit.
    Bit = 0x32,
    /// 16-bit signed integer.
    Int2 = 0x34,
    /// 32-bit signed integer.
    Int4 = 0x38,
    /// 64-bit signed integer.
    Int8 = 0x7F,
    /// 32-bit float.
    Float4 = 0x3B,
    /// 64-bit float.
    Float8 = 0x3E,
    /// 8-byte money.
    Money = 0x3C,
    /// 4-byte money.
    Money4 = 0x7A,
    /// 8-byte datetime.
    DateTime = 0x3D,
    /// 4-byte small datetime.
    DateTime4 = 0x3A,

    // Byte-length prefixed
    /// Nullable GUID.
    Guid = 0x24,
    /// Nullable integer.
    IntN = 0x26,
    /// Legacy decimal.
    Decimal = 0x37,
    /// Legacy numeric.
    Numeric = 0x3F,
    /// Nullable bit.
    BitN = 0x68,
    /// Nullable decimal.
    DecimalN = 0x6A,
    /// Nullable numeric.
    NumericN = 0x6C,
    /// Nullable float.
    FloatN = 0x6D,
    /// Nullable money.
    MoneyN = 0x6E,
    /// Nullable datetime.
    DateTimeN = 0x6F,
    /// Legacy fixed character.
    Char = 0x2F,
    /// Legacy variable character.
    VarChar = 0x27,
    /// Legacy fixed binary.
    Binary = 0x2D,
    /// Legacy variable binary.
    VarBinary = 0x25,
    /// Date, 3 bytes.
    Date = 0x28,
    /// Time with scale.
    Time = 0x29,
    /// DateTime2 with scale.
    DateTime2 = 0x2A,
    /// DateTimeOffset with scale.
    DateTimeOffset = 0x2B,

    // Unsigned-short prefixed, PLP when declared as MAX
    /// Variable character.
    BigVarChar = 0xA7,
    /// Variable binary.
    BigVarBinary = 0xA5,
    /// Fixed character.
    BigChar = 0xAF,
    /// Fixed binary.
    BigBinary = 0xAD,
    /// Fixed Unicode character.
    NChar = 0xEF,
    /// Variable Unicode character.
    NVarChar = 0xE7,

    // Large objects
    /// Legacy character LOB.
    Text = 0x23,
    /// Legacy binary LOB.
    Image = 0x22,
    /// Legacy Unicode LOB.
    NText = 0x63,
    /// XML, always PLP.
    Xml = 0xF1,
    /// CLR user-defined type.
    Udt = 0xF0,
    /// sql_variant, int-length prefixed.
    Variant = 0x62,
}

/// Value used for `max_length` of a `(MAX)` column.
pub const MAX_LENGTH_PLP: u32 = 0xFFFF;

impl TypeId {
    /// Create a type id from a raw byte.
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0x1F => Self::Null,
            0x30 => Self::Int1,
            0x32 => Self::Bit,
            0x34 => Self::Int2,
            0x38 => Self::Int4,
            0x7F => Self::Int8,
            0x3B => Self::Float4,
            0x3E => Self::Float8,
            0x3C => Self::Money,
            0x7A => Self::Money4,
            0x3D => Self::DateTime,
            0x3A => Self::DateTime4,
            0x24 => Self::Guid,
            0x26 => Self::IntN,
            0x37 => Self::Decimal,
            0x3F => Self::Numeric,
            0x68 => Self::BitN,
            0x6A => Self::DecimalN,
            0x6C => Self::NumericN,
            0x6D => Self::FloatN,
            0x6E => Self::MoneyN,
            0x6F => Self::DateTimeN,
            0x2F => Self::Char,
            0x27 => Self::VarChar,
            0x2D => Self::Binary,
            0x25 => Self::VarBinary,
            0x28 => Self::Date,
            0x29 => Self::Time,
            0x2A => Self::DateTime2,
            0x2B => Self::DateTimeOffset,
            0xA7 => Self::BigVarChar,
            0xA5 => Self::BigVarBinary,
            0xAF => Self::BigChar,
            0xAD => Self::BigBinary,
            0xEF => Self::NChar,
            0xE7 => Self::NVarChar,
            0x23 => Self::Text,
            0x22 => Self::Image,
            0x63 => Self::NText,
            0xF1 => Self::Xml,
            0xF0 => Self::Udt,
            0x62 => Self::Variant,
            _ => return None,
        })
    }

    /// Width of a fixed-length type, `None` for length-prefixed ones.
    #[must_use]
    pub const fn fixed_size(&self) -> Option<usize> {
        match self {
            Self::Null => Some(0),
            Self::Int1 | Self::Bit => Some(1),
            Self::Int2 => Some(2),
            Self::Int4 | Self::Float4 | Self::Money4 | Self::DateTime4 => Some(4),
            Self::Int8 | Self::Float8 | Self::Money | Self::DateTime => Some(8),
            _ => None,
        }
    }

    /// Whether values use the textptr/timestamp legacy LOB layout.
    #[must_use]
    pub const fn is_textptr(&self) -> bool {
        matches!(self, Self::Text | Self::NText | Self::Image)
    }

    /// Whether values are UTF-16LE text.
    #[must_use]
    pub const fn is_unicode(&self) -> bool {
        matches!(self, Self::NChar | Self::NVarChar | Self::NText | Self::Xml)
    }

    /// Whether values are single-byte character data.
    #[must_use]
    pub const fn is_single_byte_text(&self) -> bool {
        matches!(
            self,
            Self::Char | Self::VarChar | Self::BigChar | Self::BigVarChar | Self::Text
        )
    }

    /// Whether the column carries a collation in its metadata.
    #[must_use]
    pub const fn has_collation(&self) -> bool {
        matches!(
            self,
            Self::BigChar | Self::BigVarChar | Self::NChar | Self::NVarChar | Self::Text | Self::NText
        )
    }
}

bitflags! {
    /// Column flags from column metadata.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ColumnFlags: u16 {
        /// Column accepts NULL.
        const NULLABLE = 0x0001;
        /// Comparison is case sensitive.
        const CASE_SENSITIVE = 0x0002;
        /// Column is writable.
        const UPDATEABLE = 0x0008;
        /// Identity column.
        const IDENTITY = 0x0010;
        /// Computed column.
        const COMPUTED = 0x0020;
        /// Fixed-length CLR type.
        const FIXED_LEN_CLR = 0x0100;
        /// Hidden browse-mode key column.
        const HIDDEN = 0x2000;
        /// Key column.
        const KEY = 0x4000;
        /// Nullability is unknown.
        const NULLABLE_UNKNOWN = 0x8000;
    }
}
