//! Token encoders for scripted responses.
//!
//! Columns decide how values are laid out on the wire, so rows are encoded
//! against the same [`MockColumn`] list that produced the metadata.

use bytes::{BufMut, Bytes, BytesMut};
use encoding_rs::WINDOWS_1252;
use tds_protocol::codec::{write_b_varchar, write_us_varchar, write_utf16_string};
use tds_protocol::{ColumnFlags, DoneStatus, MAX_LENGTH_PLP, TokenType, TypeId};

/// Latin1_General_CI_AS.
pub const LATIN1_COLLATION: [u8; 5] = [0x09, 0x04, 0xD0, 0x00, 0x34];

/// Value of one cell in a scripted row.
#[derive(Debug, Clone, PartialEq)]
pub enum ScalarValue {
    /// NULL value.
    Null,
    /// Boolean value.
    Bool(bool),
    /// 32-bit integer.
    Int(i32),
    /// 64-bit integer.
    BigInt(i64),
    /// 64-bit float.
    Double(f64),
    /// String value.
    String(String),
    /// Binary data.
    Binary(Vec<u8>),
    /// Raw PLP chunks, for controlling how a large object is split.
    Chunks(Vec<Vec<u8>>),
}

impl ScalarValue {
    /// Create a string value.
    pub fn string(value: impl Into<String>) -> Self {
        Self::String(value.into())
    }

    fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

/// Scripted column definition.
#[derive(Debug, Clone)]
pub struct MockColumn {
    /// Column name.
    pub name: String,
    /// Column type.
    pub type_id: TypeId,
    /// Declared length; [`MAX_LENGTH_PLP`] for `(MAX)` columns.
    pub max_length: u32,
    /// Whether the column is nullable.
    pub nullable: bool,
    /// Largest PLP chunk emitted for string and binary values.
    pub chunk_size: usize,
}

impl MockColumn {
    /// Create a new column definition.
    pub fn new(name: impl Into<String>, type_id: TypeId, max_length: u32) -> Self {
        Self {
            name: name.into(),
            type_id,
            max_length,
            nullable: true,
            chunk_size: 8000,
        }
    }

    /// Create a BIT column.
    pub fn bit(name: impl Into<String>) -> Self {
        Self::new(name, TypeId::BitN, 1)
    }

    /// Create an INT column.
    pub fn int(name: impl Into<String>) -> Self {
        Self::new(name, TypeId::IntN, 4)
    }

    /// Create a BIGINT column.
    pub fn bigint(name: impl Into<String>) -> Self {
        Self::new(name, TypeId::IntN, 8)
    }

    /// Create a FLOAT column.
    pub fn float(name: impl Into<String>) -> Self {
        Self::new(name, TypeId::FloatN, 8)
    }

    /// Create an NVARCHAR(n) column.
    pub fn nvarchar(name: impl Into<String>, max_chars: u32) -> Self {
        Self::new(name, TypeId::NVarChar, max_chars * 2)
    }

    /// Create an NVARCHAR(MAX) column.
    pub fn nvarchar_max(name: impl Into<String>) -> Self {
        Self::new(name, TypeId::NVarChar, MAX_LENGTH_PLP)
    }

    /// Create a VARCHAR(MAX) column with a Latin1 collation.
    pub fn varchar_max(name: impl Into<String>) -> Self {
        Self::new(name, TypeId::BigVarChar, MAX_LENGTH_PLP)
    }

    /// Create a VARBINARY(n) column.
    pub fn varbinary(name: impl Into<String>, max_len: u32) -> Self {
        Self::new(name, TypeId::BigVarBinary, max_len)
    }

    /// Create a VARBINARY(MAX) column.
    pub fn varbinary_max(name: impl Into<String>) -> Self {
        Self::new(name, TypeId::BigVarBinary, MAX_LENGTH_PLP)
    }

    /// Create a legacy TEXT column.
    pub fn text(name: impl Into<String>) -> Self {
        Self::new(name, TypeId::Text, 0x7FFF_FFFF)
    }

    /// Create a legacy NTEXT column.
    pub fn ntext(name: impl Into<String>) -> Self {
        Self::new(name, TypeId::NText, 0x7FFF_FFFF)
    }

    /// Create a legacy IMAGE column.
    pub fn image(name: impl Into<String>) -> Self {
        Self::new(name, TypeId::Image, 0x7FFF_FFFF)
    }

    /// Set nullable flag.
    #[must_use]
    pub fn with_nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    /// Split PLP values into chunks of at most `size` bytes.
    #[must_use]
    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size.max(1);
        self
    }

    fn is_plp(&self) -> bool {
        self.max_length == MAX_LENGTH_PLP
            && matches!(
                self.type_id,
                TypeId::NVarChar | TypeId::BigVarChar | TypeId::BigVarBinary
            )
    }

    fn is_textptr(&self) -> bool {
        matches!(self.type_id, TypeId::Text | TypeId::NText | TypeId::Image)
    }

    fn encode_type_info(&self, dst: &mut BytesMut) {
        dst.put_u8(self.type_id as u8);
        match self.type_id {
            TypeId::NVarChar | TypeId::BigVarChar => {
                dst.put_u16_le(self.max_length as u16);
                dst.put_slice(&LATIN1_COLLATION);
            }
            TypeId::BigVarBinary => dst.put_u16_le(self.max_length as u16),
            TypeId::Text | TypeId::NText | TypeId::Image => {
                dst.put_u32_le(self.max_length);
                if self.type_id != TypeId::Image {
                    dst.put_slice(&LATIN1_COLLATION);
                }
                dst.put_u8(1);
                write_us_varchar(dst, "t");
            }
            _ => dst.put_u8(self.max_length as u8),
        }
    }

    fn value_bytes(&self, value: &ScalarValue) -> Vec<u8> {
        match value {
            ScalarValue::String(s) if self.type_id.is_unicode() => utf16_bytes(s),
            ScalarValue::String(s) => WINDOWS_1252.encode(s).0.into_owned(),
            ScalarValue::Binary(b) => b.clone(),
            ScalarValue::Chunks(chunks) => chunks.concat(),
            ScalarValue::Bool(v) => vec![u8::from(*v)],
            ScalarValue::Int(v) => v.to_le_bytes().to_vec(),
            ScalarValue::BigInt(v) => v.to_le_bytes().to_vec(),
            ScalarValue::Double(v) => v.to_le_bytes().to_vec(),
            ScalarValue::Null => Vec::new(),
        }
    }

    fn encode_value(&self, value: &ScalarValue, dst: &mut BytesMut) {
        if self.is_plp() {
            if value.is_null() {
                dst.put_u64_le(u64::MAX);
                return;
            }
            let chunks: Vec<Vec<u8>> = match value {
                ScalarValue::Chunks(chunks) => chunks.clone(),
                other => self
                    .value_bytes(other)
                    .chunks(self.chunk_size)
                    .map(<[u8]>::to_vec)
                    .collect(),
            };
            dst.put_u64_le(chunks.iter().map(|c| c.len() as u64).sum());
            for chunk in chunks.iter().filter(|c| !c.is_empty()) {
                dst.put_u32_le(chunk.len() as u32);
                dst.put_slice(chunk);
            }
            dst.put_u32_le(0);
            return;
        }

        if self.is_textptr() {
            if value.is_null() {
                dst.put_u8(0);
                return;
            }
            let data = self.value_bytes(value);
            dst.put_u8(16);
            dst.put_slice(&[0xAA; 16]);
            dst.put_slice(&[0u8; 8]);
            dst.put_u32_le(data.len() as u32);
            dst.put_slice(&data);
            return;
        }

        match self.type_id {
            TypeId::NVarChar | TypeId::BigVarChar | TypeId::BigVarBinary => {
                if value.is_null() {
                    dst.put_u16_le(0xFFFF);
                } else {
                    let data = self.value_bytes(value);
                    dst.put_u16_le(data.len() as u16);
                    dst.put_slice(&data);
                }
            }
            _ => {
                let data = match value {
                    // Narrow to the declared width of INTN columns.
                    ScalarValue::BigInt(v) if self.max_length == 4 => {
                        (*v as i32).to_le_bytes().to_vec()
                    }
                    ScalarValue::Int(v) if self.max_length == 8 => {
                        i64::from(*v).to_le_bytes().to_vec()
                    }
                    other => self.value_bytes(other),
                };
                dst.put_u8(data.len() as u8);
                dst.put_slice(&data);
            }
        }
    }
}

/// Builder for a response token stream.
#[derive(Debug, Default)]
pub struct TokenStream {
    buf: BytesMut,
}

impl TokenStream {
    /// Create an empty stream.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a COLMETADATA token.
    #[must_use]
    pub fn colmetadata(mut self, columns: &[MockColumn]) -> Self {
        let dst = &mut self.buf;
        dst.put_u8(TokenType::ColMetaData as u8);
        dst.put_u16_le(columns.len() as u16);
        for column in columns {
            dst.put_u32_le(0);
            let flags = if column.nullable {
                ColumnFlags::NULLABLE
            } else {
                ColumnFlags::empty()
            };
            dst.put_u16_le(flags.bits());
            column.encode_type_info(dst);
            write_b_varchar(dst, &column.name);
        }
        self
    }

    /// Append a ROW token.
    #[must_use]
    pub fn row(mut self, columns: &[MockColumn], values: &[ScalarValue]) -> Self {
        self.buf.put_u8(TokenType::Row as u8);
        for (column, value) in columns.iter().zip(values) {
            column.encode_value(value, &mut self.buf);
        }
        self
    }

    /// Append one ROW token per entry of `rows`.
    #[must_use]
    pub fn rows(self, columns: &[MockColumn], rows: &[Vec<ScalarValue>]) -> Self {
        rows.iter().fold(self, |stream, row| stream.row(columns, row))
    }

    /// Append an NBCROW token; NULL cells go into the bitmap.
    #[must_use]
    pub fn nbc_row(mut self, columns: &[MockColumn], values: &[ScalarValue]) -> Self {
        self.buf.put_u8(TokenType::NbcRow as u8);
        let mut bitmap = vec![0u8; columns.len().div_ceil(8)];
        for (i, value) in values.iter().enumerate() {
            if value.is_null() {
                bitmap[i / 8] |= 1 << (i % 8);
            }
        }
        self.buf.put_slice(&bitmap);
        for (column, value) in columns.iter().zip(values) {
            if !value.is_null() {
                column.encode_value(value, &mut self.buf);
            }
        }
        self
    }

    /// Append an ERROR token.
    #[must_use]
    pub fn error(self, number: i32, class: u8, message: &str) -> Self {
        self.message(TokenType::Error, number, class, message)
    }

    /// Append an INFO token.
    #[must_use]
    pub fn info(self, number: i32, message: &str) -> Self {
        self.message(TokenType::Info, number, 0, message)
    }

    fn message(mut self, tag: TokenType, number: i32, class: u8, message: &str) -> Self {
        let mut body = BytesMut::new();
        body.put_i32_le(number);
        body.put_u8(1);
        body.put_u8(class);
        write_us_varchar(&mut body, message);
        write_b_varchar(&mut body, "mock");
        write_b_varchar(&mut body, "");
        body.put_i32_le(1);

        self.buf.put_u8(tag as u8);
        self.buf.put_u16_le(body.len() as u16);
        self.buf.put_slice(&body);
        self
    }

    /// Append a DONE token.
    #[must_use]
    pub fn done(self, status: DoneStatus, row_count: u64) -> Self {
        self.end(TokenType::Done, status, row_count)
    }

    /// Append a DONEPROC token.
    #[must_use]
    pub fn done_proc(self, status: DoneStatus, row_count: u64) -> Self {
        self.end(TokenType::DoneProc, status, row_count)
    }

    /// Append a DONEINPROC token.
    #[must_use]
    pub fn done_in_proc(self, status: DoneStatus, row_count: u64) -> Self {
        self.end(TokenType::DoneInProc, status, row_count)
    }

    /// Append a final DONE with a row count.
    #[must_use]
    pub fn done_count(self, row_count: u64) -> Self {
        self.done(DoneStatus::COUNT, row_count)
    }

    fn end(mut self, tag: TokenType, status: DoneStatus, row_count: u64) -> Self {
        self.buf.put_u8(tag as u8);
        self.buf.put_u16_le(status.bits());
        self.buf.put_u16_le(0xC1);
        self.buf.put_u64_le(row_count);
        self
    }

    /// Append a RETURNSTATUS token.
    #[must_use]
    pub fn return_status(mut self, status: i32) -> Self {
        self.buf.put_u8(TokenType::ReturnStatus as u8);
        self.buf.put_i32_le(status);
        self
    }

    /// Append a RETURNVALUE token for an output parameter.
    #[must_use]
    pub fn return_value(mut self, ordinal: u16, column: &MockColumn, value: &ScalarValue) -> Self {
        self.buf.put_u8(TokenType::ReturnValue as u8);
        self.buf.put_u16_le(ordinal);
        write_b_varchar(&mut self.buf, &column.name);
        self.buf.put_u8(0x01);
        self.buf.put_u32_le(0);
        self.buf.put_u16_le(ColumnFlags::NULLABLE.bits());
        column.encode_type_info(&mut self.buf);
        column.encode_value(value, &mut self.buf);
        self
    }

    /// Append a packet size ENVCHANGE.
    #[must_use]
    pub fn env_packet_size(mut self, new: usize, old: usize) -> Self {
        let mut body = BytesMut::new();
        body.put_u8(4);
        write_b_varchar(&mut body, &new.to_string());
        write_b_varchar(&mut body, &old.to_string());
        self.buf.put_u8(TokenType::EnvChange as u8);
        self.buf.put_u16_le(body.len() as u16);
        self.buf.put_slice(&body);
        self
    }

    /// Append raw bytes.
    #[must_use]
    pub fn raw(mut self, bytes: &[u8]) -> Self {
        self.buf.put_slice(bytes);
        self
    }

    /// Finish the stream.
    pub fn build(self) -> Bytes {
        self.buf.freeze()
    }
}

/// A final DONE acknowledging an attention signal.
pub fn attention_ack() -> Bytes {
    TokenStream::new().done(DoneStatus::ATTN, 0).build()
}

/// Encode `s` as UTF-16LE, the layout of NVARCHAR and NTEXT data.
pub fn utf16_bytes(s: &str) -> Vec<u8> {
    let mut buf = BytesMut::new();
    write_utf16_string(&mut buf, s);
    buf.to_vec()
}
