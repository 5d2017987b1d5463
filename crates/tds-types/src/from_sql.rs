//! Trait for converting decoded column values to Rust types.

use bytes::Bytes;
use tds_protocol::codec::decode_utf16;
use tds_protocol::{ColumnValue, LobKind, LobValue};

use crate::error::TypeError;

/// Name of the SQL type a value was decoded from, for error messages.
#[must_use]
pub fn type_name(value: &ColumnValue) -> &'static str {
    match value {
        ColumnValue::Null => "NULL",
        ColumnValue::Bit(_) => "BIT",
        ColumnValue::TinyInt(_) => "TINYINT",
        ColumnValue::SmallInt(_) => "SMALLINT",
        ColumnValue::Int(_) => "INT",
        ColumnValue::BigInt(_) => "BIGINT",
        ColumnValue::Real(_) => "REAL",
        ColumnValue::Float(_) => "FLOAT",
        ColumnValue::Money(_) => "MONEY",
        ColumnValue::Numeric(_) => "DECIMAL",
        ColumnValue::DateTime(_) => "DATETIME",
        ColumnValue::Date(_) => "DATE",
        ColumnValue::Time(_) => "TIME",
        ColumnValue::DateTime2(..) => "DATETIME2",
        ColumnValue::DateTimeOffset(..) => "DATETIMEOFFSET",
        ColumnValue::Guid(_) => "UNIQUEIDENTIFIER",
        ColumnValue::String(_) => "VARCHAR",
        ColumnValue::Binary(_) => "VARBINARY",
        ColumnValue::Lob(lob) => match lob.kind() {
            LobKind::Binary => "IMAGE",
            LobKind::Unicode => "NTEXT",
            LobKind::SingleByte(_) => "TEXT",
        },
    }
}

fn mismatch(expected: &'static str, value: &ColumnValue) -> TypeError {
    if value.is_null() {
        TypeError::UnexpectedNull
    } else {
        TypeError::TypeMismatch {
            expected,
            actual: type_name(value),
        }
    }
}

/// Decode a character large object into a string.
pub fn lob_to_string(lob: &LobValue) -> Result<String, TypeError> {
    match lob.kind() {
        LobKind::Unicode => {
            decode_utf16(&lob.to_bytes()).map_err(|e| TypeError::InvalidEncoding(e.to_string()))
        }
        LobKind::SingleByte(encoding) => {
            let bytes = lob.to_bytes();
            let (text, _) = encoding.decode_without_bom_handling(&bytes);
            Ok(text.into_owned())
        }
        LobKind::Binary => Err(TypeError::TypeMismatch {
            expected: "String",
            actual: "IMAGE",
        }),
    }
}

/// Trait for types that can be converted from SQL values.
///
/// This trait is implemented for common Rust types to enable
/// type-safe extraction of values from query results.
pub trait FromSql: Sized {
    /// Convert from a SQL value to this type.
    fn from_sql(value: &ColumnValue) -> Result<Self, TypeError>;

    /// Convert from an optional SQL value.
    ///
    /// Returns `None` if the value is NULL.
    fn from_sql_nullable(value: &ColumnValue) -> Result<Option<Self>, TypeError> {
        if value.is_null() {
            Ok(None)
        } else {
            Self::from_sql(value).map(Some)
        }
    }
}

impl FromSql for bool {
    fn from_sql(value: &ColumnValue) -> Result<Self, TypeError> {
        match value {
            ColumnValue::Bit(v) => Ok(*v),
            ColumnValue::TinyInt(v) => Ok(*v != 0),
            ColumnValue::SmallInt(v) => Ok(*v != 0),
            ColumnValue::Int(v) => Ok(*v != 0),
            _ => Err(mismatch("bool", value)),
        }
    }
}

impl FromSql for u8 {
    fn from_sql(value: &ColumnValue) -> Result<Self, TypeError> {
        match value {
            ColumnValue::TinyInt(v) => Ok(*v),
            _ => Err(mismatch("u8", value)),
        }
    }
}

impl FromSql for i16 {
    fn from_sql(value: &ColumnValue) -> Result<Self, TypeError> {
        match value {
            ColumnValue::SmallInt(v) => Ok(*v),
            ColumnValue::TinyInt(v) => Ok(i16::from(*v)),
            _ => Err(mismatch("i16", value)),
        }
    }
}

impl FromSql for i32 {
    fn from_sql(value: &ColumnValue) -> Result<Self, TypeError> {
        match value {
            ColumnValue::Int(v) => Ok(*v),
            ColumnValue::SmallInt(v) => Ok(i32::from(*v)),
            ColumnValue::TinyInt(v) => Ok(i32::from(*v)),
            ColumnValue::BigInt(v) => {
                i32::try_from(*v).map_err(|_| TypeError::OutOfRange { target_type: "i32" })
            }
            _ => Err(mismatch("i32", value)),
        }
    }
}

impl FromSql for i64 {
    fn from_sql(value: &ColumnValue) -> Result<Self, TypeError> {
        match value {
            ColumnValue::BigInt(v) => Ok(*v),
            ColumnValue::Int(v) => Ok(i64::from(*v)),
            ColumnValue::SmallInt(v) => Ok(i64::from(*v)),
            ColumnValue::TinyInt(v) => Ok(i64::from(*v)),
            _ => Err(mismatch("i64", value)),
        }
    }
}

impl FromSql for f32 {
    fn from_sql(value: &ColumnValue) -> Result<Self, TypeError> {
        match value {
            ColumnValue::Real(v) => Ok(*v),
            _ => Err(mismatch("f32", value)),
        }
    }
}

impl FromSql for f64 {
    fn from_sql(value: &ColumnValue) -> Result<Self, TypeError> {
        match value {
            ColumnValue::Float(v) => Ok(*v),
            ColumnValue::Real(v) => Ok(f64::from(*v)),
            _ => Err(mismatch("f64", value)),
        }
    }
}

impl FromSql for String {
    fn from_sql(value: &ColumnValue) -> Result<Self, TypeError> {
        match value {
            ColumnValue::String(v) => Ok(v.clone()),
            ColumnValue::Numeric(n) => Ok(n.to_string()),
            ColumnValue::Lob(lob) => lob_to_string(lob),
            _ => Err(mismatch("String", value)),
        }
    }
}

impl FromSql for Bytes {
    fn from_sql(value: &ColumnValue) -> Result<Self, TypeError> {
        match value {
            ColumnValue::Binary(v) => Ok(v.clone()),
            ColumnValue::Lob(lob) => Ok(lob.to_bytes()),
            ColumnValue::Guid(g) => Ok(Bytes::copy_from_slice(g)),
            _ => Err(mismatch("Bytes", value)),
        }
    }
}

impl FromSql for Vec<u8> {
    fn from_sql(value: &ColumnValue) -> Result<Self, TypeError> {
        Bytes::from_sql(value).map(|b| b.to_vec())
    }
}

impl<T: FromSql> FromSql for Option<T> {
    fn from_sql(value: &ColumnValue) -> Result<Self, TypeError> {
        T::from_sql_nullable(value)
    }
}

#[cfg(feature = "uuid")]
impl FromSql for uuid::Uuid {
    fn from_sql(value: &ColumnValue) -> Result<Self, TypeError> {
        match value {
            // First three groups are little-endian on the wire.
            ColumnValue::Guid(bytes) => Ok(uuid::Uuid::from_bytes_le(*bytes)),
            _ => Err(mismatch("Uuid", value)),
        }
    }
}

#[cfg(feature = "decimal")]
impl FromSql for rust_decimal::Decimal {
    fn from_sql(value: &ColumnValue) -> Result<Self, TypeError> {
        match value {
            ColumnValue::Numeric(n) => {
                rust_decimal::Decimal::try_from_i128_with_scale(n.mantissa, u32::from(n.scale))
                    .map_err(|e| TypeError::InvalidDecimal(e.to_string()))
            }
            ColumnValue::Money(v) => Ok(rust_decimal::Decimal::new(*v, 4)),
            ColumnValue::Int(v) => Ok(rust_decimal::Decimal::from(*v)),
            ColumnValue::BigInt(v) => Ok(rust_decimal::Decimal::from(*v)),
            _ => Err(mismatch("Decimal", value)),
        }
    }
}

#[cfg(feature = "chrono")]
impl FromSql for chrono::NaiveDate {
    fn from_sql(value: &ColumnValue) -> Result<Self, TypeError> {
        match value {
            ColumnValue::Date(d) => crate::temporal::date(*d),
            ColumnValue::DateTime2(d, _) => crate::temporal::date(*d),
            ColumnValue::DateTime(dt) => crate::temporal::datetime(*dt).map(|v| v.date()),
            _ => Err(mismatch("NaiveDate", value)),
        }
    }
}

#[cfg(feature = "chrono")]
impl FromSql for chrono::NaiveTime {
    fn from_sql(value: &ColumnValue) -> Result<Self, TypeError> {
        match value {
            ColumnValue::Time(t) => crate::temporal::time(*t),
            ColumnValue::DateTime2(_, t) => crate::temporal::time(*t),
            ColumnValue::DateTime(dt) => crate::temporal::datetime(*dt).map(|v| v.time()),
            _ => Err(mismatch("NaiveTime", value)),
        }
    }
}

#[cfg(feature = "chrono")]
impl FromSql for chrono::NaiveDateTime {
    fn from_sql(value: &ColumnValue) -> Result<Self, TypeError> {
        match value {
            ColumnValue::DateTime(dt) => crate::temporal::datetime(*dt),
            ColumnValue::DateTime2(d, t) => crate::temporal::datetime2(*d, *t),
            ColumnValue::DateTimeOffset(d, t, _) => crate::temporal::datetime2(*d, *t),
            _ => Err(mismatch("NaiveDateTime", value)),
        }
    }
}

#[cfg(feature = "chrono")]
impl FromSql for chrono::DateTime<chrono::FixedOffset> {
    fn from_sql(value: &ColumnValue) -> Result<Self, TypeError> {
        match value {
            ColumnValue::DateTimeOffset(d, t, offset) => {
                crate::temporal::datetime_offset(*d, *t, *offset)
            }
            _ => Err(mismatch("DateTime<FixedOffset>", value)),
        }
    }
}
