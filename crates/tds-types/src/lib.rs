//! # tds-types
//!
//! Rust type mappings for decoded TDS values.
//!
//! The protocol crate decodes rows into [`ColumnValue`](tds_protocol::ColumnValue)s
//! that keep the wire representation. This crate converts them into Rust
//! types and converts Rust values into request parameters.
//!
//! ## Features
//!
//! - `chrono` (default): Enable date/time type support via chrono
//! - `uuid` (default): Enable UUID type support
//! - `decimal` (default): Enable decimal type support via rust_decimal
//!
//! ## Type Mappings
//!
//! | SQL Server Type | Rust Type |
//! |-----------------|-----------|
//! | `BIT` | `bool` |
//! | `TINYINT` | `u8` |
//! | `SMALLINT` | `i16` |
//! | `INT` | `i32` |
//! | `BIGINT` | `i64` |
//! | `REAL` | `f32` |
//! | `FLOAT` | `f64` |
//! | `DECIMAL`/`NUMERIC`/`MONEY` | `rust_decimal::Decimal` |
//! | `VARCHAR`/`NVARCHAR`/`TEXT`/`NTEXT` | `String` |
//! | `VARBINARY`/`IMAGE` | `Vec<u8>`, `Bytes` |
//! | `DATE` | `chrono::NaiveDate` |
//! | `TIME` | `chrono::NaiveTime` |
//! | `DATETIME`/`DATETIME2` | `chrono::NaiveDateTime` |
//! | `DATETIMEOFFSET` | `chrono::DateTime<FixedOffset>` |
//! | `UNIQUEIDENTIFIER` | `uuid::Uuid` |

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod error;
pub mod from_sql;
#[cfg(feature = "chrono")]
pub mod temporal;
pub mod to_sql;

pub use error::TypeError;
pub use from_sql::{FromSql, lob_to_string, type_name};
pub use to_sql::{SqlTyped, ToSql};
