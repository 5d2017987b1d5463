//! Resumable token decoder.
//!
//! [`TokenDecoder::decode`] is called with the bytes received so far. It
//! either returns a complete token and removes its bytes from the buffer,
//! or returns `Ok(None)` to ask for another packet. Small tokens are parsed
//! from a scratch slice and committed only on success. Rows are committed
//! column by column and large objects chunk by chunk, so a row spanning
//! many packets is never re-parsed from its start and LOB bytes are split
//! off the packet buffer without copying.

use bytes::{Buf, Bytes, BytesMut};
use encoding_rs::{Encoding, WINDOWS_1252};

use crate::codec::{decode_utf16, need, read_b_varchar};
use crate::error::ProtocolError;
use crate::token::{
    ColumnDescriptor, ColumnMetadata, Done, DoneKind, EnvChange, LobLayout, MessageKind,
    OutputParameter, ServerMessage, Token, TokenType, decode_order, decode_type_info,
    decode_unknown,
};
use crate::types::{ColumnFlags, TypeId};
use crate::value::{ColumnValue, Date, DateTime, LobKind, LobValue, Numeric, Time};

const PLP_NULL: u64 = 0xFFFF_FFFF_FFFF_FFFF;

/// Incremental token decoder for one connection.
#[derive(Debug)]
pub struct TokenDecoder {
    columns: Option<ColumnMetadata>,
    charset: &'static Encoding,
    partial: Option<PartialRow>,
}

impl Default for TokenDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenDecoder {
    /// Create a decoder using windows-1252 for collation-less text.
    #[must_use]
    pub fn new() -> Self {
        Self::with_charset(WINDOWS_1252)
    }

    /// Create a decoder with an explicit charset for collation-less text.
    #[must_use]
    pub fn with_charset(charset: &'static Encoding) -> Self {
        Self {
            columns: None,
            charset,
            partial: None,
        }
    }

    /// Charset used for single-byte text without a usable collation.
    #[must_use]
    pub fn charset(&self) -> &'static Encoding {
        self.charset
    }

    /// Replace the charset, e.g. after a charset environment change.
    pub fn set_charset(&mut self, charset: &'static Encoding) {
        self.charset = charset;
    }

    /// Metadata rows are currently decoded against.
    #[must_use]
    pub fn columns(&self) -> Option<&ColumnMetadata> {
        self.columns.as_ref()
    }

    /// Whether a row is partially decoded.
    #[must_use]
    pub fn is_mid_token(&self) -> bool {
        self.partial.is_some()
    }

    /// Forget metadata and partial state before a new response.
    pub fn reset(&mut self) {
        self.columns = None;
        self.partial = None;
    }

    /// Decode the next token from `buf`.
    ///
    /// Returns `Ok(None)` when `buf` does not yet hold a complete token.
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Token>, ProtocolError> {
        if let Some(partial) = self.partial.take() {
            return self.resume_row(partial, buf);
        }
        let Some(&tag) = buf.first() else {
            return Ok(None);
        };

        if tag == TokenType::Row as u8 || tag == TokenType::NbcRow as u8 {
            let columns = self.columns.clone().ok_or(ProtocolError::MissingMetadata)?;
            buf.advance(1);
            let partial = PartialRow::new(columns, tag == TokenType::NbcRow as u8);
            return self.resume_row(partial, buf);
        }

        let (result, consumed) = {
            let mut cursor: &[u8] = &buf[1..];
            let result = self.decode_self_contained(tag, &mut cursor);
            (result, buf.len() - cursor.len())
        };
        match result {
            Ok(token) => {
                buf.advance(consumed);
                if let Token::ColumnMetadata(meta) = &token {
                    self.columns = Some(meta.clone());
                }
                Ok(Some(token))
            }
            Err(ProtocolError::UnexpectedEof) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn decode_self_contained(&self, tag: u8, src: &mut &[u8]) -> Result<Token, ProtocolError> {
        let Some(token_type) = TokenType::from_u8(tag) else {
            return decode_unknown(tag, src);
        };
        Ok(match token_type {
            TokenType::ColMetaData => Token::ColumnMetadata(ColumnMetadata::decode(src)?),
            TokenType::Error => Token::Message(ServerMessage::decode(MessageKind::Error, src)?),
            TokenType::Info => Token::Message(ServerMessage::decode(MessageKind::Info, src)?),
            TokenType::ReturnStatus => {
                need(src, 4)?;
                Token::ReturnStatus(src.get_i32_le())
            }
            TokenType::ReturnValue => Token::OutputParameter(self.decode_return_value(src)?),
            TokenType::Done => Token::EndOfResults(Done::decode(DoneKind::Done, src)?),
            TokenType::DoneProc => Token::EndOfResults(Done::decode(DoneKind::Proc, src)?),
            TokenType::DoneInProc => Token::EndOfResults(Done::decode(DoneKind::InProc, src)?),
            TokenType::EnvChange => Token::EnvChange(EnvChange::decode(src)?),
            TokenType::Order => Token::Order(decode_order(src)?),
            TokenType::Row | TokenType::NbcRow => return Err(ProtocolError::InvalidTokenType(tag)),
        })
    }

    fn decode_return_value(&self, src: &mut &[u8]) -> Result<OutputParameter, ProtocolError> {
        need(src, 2)?;
        let ordinal = src.get_u16_le();
        let name = read_b_varchar(src)?;
        need(src, 1 + 4 + 2 + 1)?;
        let status = src.get_u8();
        let user_type = src.get_u32_le();
        let flags = ColumnFlags::from_bits_retain(src.get_u16_le());
        let raw_type = src.get_u8();
        let type_id = TypeId::from_u8(raw_type).ok_or(ProtocolError::InvalidDataType(raw_type))?;
        let type_info = decode_type_info(src, type_id)?;
        let descriptor = ColumnDescriptor {
            name: name.clone(),
            type_id,
            user_type,
            flags,
            type_info,
        };

        let value = match descriptor.lob_layout() {
            Some(layout) => {
                let mut cursor = LobCursor::new(layout);
                match cursor.step(src)? {
                    LobStep::Pending => return Err(ProtocolError::UnexpectedEof),
                    LobStep::Null => ColumnValue::Null,
                    LobStep::Complete(chunks) => {
                        ColumnValue::Lob(LobValue::new(lob_kind(&descriptor, self.charset), chunks))
                    }
                }
            }
            None => decode_value(src, &descriptor, self.charset)?,
        };

        Ok(OutputParameter {
            ordinal,
            name,
            status,
            descriptor,
            value,
        })
    }

    fn resume_row(
        &mut self,
        mut partial: PartialRow,
        buf: &mut BytesMut,
    ) -> Result<Option<Token>, ProtocolError> {
        let count = partial.columns.len();

        if partial.nbc && partial.null_bitmap.is_none() {
            let bitmap_len = count.div_ceil(8);
            if buf.len() < bitmap_len {
                self.partial = Some(partial);
                return Ok(None);
            }
            partial.null_bitmap = Some(buf.split_to(bitmap_len).freeze());
        }

        while partial.values.len() < count {
            let index = partial.values.len();
            if partial.is_null_in_bitmap(index) {
                partial.values.push(ColumnValue::Null);
                continue;
            }
            let Some(column) = partial.columns.get(index) else {
                return Err(ProtocolError::MissingMetadata);
            };

            if let Some(layout) = column.lob_layout() {
                let cursor = partial.lob.get_or_insert_with(|| LobCursor::new(layout));
                match cursor.step(buf)? {
                    LobStep::Pending => {
                        self.partial = Some(partial);
                        return Ok(None);
                    }
                    LobStep::Null => partial.values.push(ColumnValue::Null),
                    LobStep::Complete(chunks) => {
                        let kind = lob_kind(column, self.charset);
                        partial.values.push(ColumnValue::Lob(LobValue::new(kind, chunks)));
                    }
                }
                partial.lob = None;
                continue;
            }

            let (result, consumed) = {
                let mut cursor: &[u8] = &buf[..];
                let result = decode_value(&mut cursor, column, self.charset);
                (result, buf.len() - cursor.len())
            };
            match result {
                Ok(value) => {
                    buf.advance(consumed);
                    partial.values.push(value);
                }
                Err(ProtocolError::UnexpectedEof) => {
                    self.partial = Some(partial);
                    return Ok(None);
                }
                Err(e) => return Err(e),
            }
        }

        Ok(Some(Token::Row(partial.values)))
    }
}

/// A row whose columns are not all decoded yet.
#[derive(Debug)]
struct PartialRow {
    columns: ColumnMetadata,
    nbc: bool,
    null_bitmap: Option<Bytes>,
    values: Vec<ColumnValue>,
    lob: Option<LobCursor>,
}

impl PartialRow {
    fn new(columns: ColumnMetadata, nbc: bool) -> Self {
        let capacity = columns.len();
        Self {
            columns,
            nbc,
            null_bitmap: None,
            values: Vec::with_capacity(capacity),
            lob: None,
        }
    }

    fn is_null_in_bitmap(&self, index: usize) -> bool {
        self.null_bitmap
            .as_ref()
            .and_then(|bitmap| bitmap.get(index / 8))
            .is_some_and(|byte| byte & (1 << (index % 8)) != 0)
    }
}

// =============================================================================
// Large objects
// =============================================================================

/// Buffer that can hand out its front bytes as an owned chunk.
trait ChunkSource: Buf {
    fn take_chunk(&mut self, n: usize) -> Bytes;
}

impl ChunkSource for BytesMut {
    fn take_chunk(&mut self, n: usize) -> Bytes {
        self.split_to(n).freeze()
    }
}

impl ChunkSource for &[u8] {
    fn take_chunk(&mut self, n: usize) -> Bytes {
        self.copy_to_bytes(n)
    }
}

#[derive(Debug, Clone, Copy)]
enum LobStage {
    Header,
    ChunkLength,
    Data { remaining: usize, last: bool },
}

enum LobStep {
    Pending,
    Null,
    Complete(Vec<Bytes>),
}

/// Progress through one large-object value.
#[derive(Debug)]
struct LobCursor {
    layout: LobLayout,
    stage: LobStage,
    chunks: Vec<Bytes>,
}

impl LobCursor {
    fn new(layout: LobLayout) -> Self {
        Self {
            layout,
            stage: LobStage::Header,
            chunks: Vec::new(),
        }
    }

    /// Consume as much of the value as `src` holds.
    fn step(&mut self, src: &mut impl ChunkSource) -> Result<LobStep, ProtocolError> {
        loop {
            match self.stage {
                LobStage::Header => match self.layout {
                    LobLayout::Plp => {
                        if src.remaining() < 8 {
                            return Ok(LobStep::Pending);
                        }
                        if src.get_u64_le() == PLP_NULL {
                            return Ok(LobStep::Null);
                        }
                        self.stage = LobStage::ChunkLength;
                    }
                    LobLayout::TextPtr => {
                        if src.remaining() < 1 {
                            return Ok(LobStep::Pending);
                        }
                        let ptr_len = usize::from(src.chunk()[0]);
                        if ptr_len == 0 {
                            src.advance(1);
                            return Ok(LobStep::Null);
                        }
                        // textptr, 8-byte timestamp, 4-byte data length
                        if src.remaining() < 1 + ptr_len + 8 + 4 {
                            return Ok(LobStep::Pending);
                        }
                        src.advance(1 + ptr_len + 8);
                        let len = src.get_u32_le() as usize;
                        self.stage = LobStage::Data {
                            remaining: len,
                            last: true,
                        };
                    }
                },
                LobStage::ChunkLength => {
                    if src.remaining() < 4 {
                        return Ok(LobStep::Pending);
                    }
                    let len = src.get_u32_le() as usize;
                    if len == 0 {
                        return Ok(LobStep::Complete(std::mem::take(&mut self.chunks)));
                    }
                    self.stage = LobStage::Data {
                        remaining: len,
                        last: false,
                    };
                }
                LobStage::Data { remaining: 0, last } => {
                    if last {
                        return Ok(LobStep::Complete(std::mem::take(&mut self.chunks)));
                    }
                    self.stage = LobStage::ChunkLength;
                }
                LobStage::Data { remaining, last } => {
                    if !src.has_remaining() {
                        return Ok(LobStep::Pending);
                    }
                    let n = remaining.min(src.remaining());
                    self.chunks.push(src.take_chunk(n));
                    self.stage = LobStage::Data {
                        remaining: remaining - n,
                        last,
                    };
                }
            }
        }
    }
}

fn lob_kind(column: &ColumnDescriptor, charset: &'static Encoding) -> LobKind {
    if column.type_id.is_unicode() {
        LobKind::Unicode
    } else if column.type_id.is_single_byte_text() {
        LobKind::SingleByte(text_encoding(column, charset))
    } else {
        LobKind::Binary
    }
}

fn text_encoding(column: &ColumnDescriptor, charset: &'static Encoding) -> &'static Encoding {
    column
        .type_info
        .collation
        .and_then(|c| c.encoding())
        .unwrap_or(charset)
}

// =============================================================================
// In-row values
// =============================================================================

/// Decode one non-LOB value. Fails with `UnexpectedEof` if `src` is short.
fn decode_value(
    src: &mut impl Buf,
    column: &ColumnDescriptor,
    charset: &'static Encoding,
) -> Result<ColumnValue, ProtocolError> {
    let type_id = column.type_id;

    if let Some(size) = type_id.fixed_size() {
        need(src, size)?;
        return decode_sized(src, column, size);
    }

    match type_id {
        TypeId::IntN
        | TypeId::BitN
        | TypeId::FloatN
        | TypeId::MoneyN
        | TypeId::DateTimeN
        | TypeId::Guid
        | TypeId::Decimal
        | TypeId::Numeric
        | TypeId::DecimalN
        | TypeId::NumericN
        | TypeId::Date
        | TypeId::Time
        | TypeId::DateTime2
        | TypeId::DateTimeOffset => {
            let len = take_length(src, 1)?;
            if len == 0 {
                return Ok(ColumnValue::Null);
            }
            decode_sized(src, column, len)
        }

        // Legacy short types use zero length for NULL.
        TypeId::Char | TypeId::VarChar | TypeId::Binary | TypeId::VarBinary => {
            let len = take_length(src, 1)?;
            if len == 0 {
                return Ok(ColumnValue::Null);
            }
            decode_bytes(src, column, len, charset)
        }

        TypeId::BigVarChar
        | TypeId::BigChar
        | TypeId::NVarChar
        | TypeId::NChar
        | TypeId::BigVarBinary
        | TypeId::BigBinary
        | TypeId::Udt => {
            let len = take_length(src, 2)?;
            if len == 0xFFFF {
                return Ok(ColumnValue::Null);
            }
            decode_bytes(src, column, len, charset)
        }

        TypeId::Variant => {
            let len = take_length(src, 4)?;
            if len == 0 {
                return Ok(ColumnValue::Null);
            }
            Ok(ColumnValue::Binary(src.copy_to_bytes(len)))
        }

        _ => Err(ProtocolError::InvalidDataType(type_id as u8)),
    }
}

/// Read a little-endian length prefix and make sure the data is buffered.
///
/// Null sentinels (`0xFFFF` for two-byte prefixes) skip the data check.
fn take_length(src: &mut impl Buf, width: usize) -> Result<usize, ProtocolError> {
    need(src, width)?;
    let chunk = src.chunk();
    let len = match width {
        1 => usize::from(chunk[0]),
        2 => usize::from(u16::from_le_bytes([chunk[0], chunk[1]])),
        _ => u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]) as usize,
    };
    let data = if width == 2 && len == 0xFFFF { 0 } else { len };
    need(src, width + data)?;
    src.advance(width);
    Ok(len)
}

fn decode_bytes(
    src: &mut impl Buf,
    column: &ColumnDescriptor,
    len: usize,
    charset: &'static Encoding,
) -> Result<ColumnValue, ProtocolError> {
    let bytes = src.copy_to_bytes(len);
    if column.type_id.is_unicode() {
        Ok(ColumnValue::String(decode_utf16(&bytes)?))
    } else if column.type_id.is_single_byte_text() {
        let encoding = text_encoding(column, charset);
        let (text, _) = encoding.decode_without_bom_handling(&bytes);
        Ok(ColumnValue::String(text.into_owned()))
    } else {
        Ok(ColumnValue::Binary(bytes))
    }
}

fn decode_sized(
    src: &mut impl Buf,
    column: &ColumnDescriptor,
    len: usize,
) -> Result<ColumnValue, ProtocolError> {
    let bad_length = || ProtocolError::InvalidValueLength {
        type_id: column.type_id as u8,
        length: len,
    };

    Ok(match (column.type_id, len) {
        (TypeId::Null, _) => ColumnValue::Null,
        (TypeId::Int1 | TypeId::IntN, 1) => ColumnValue::TinyInt(src.get_u8()),
        (TypeId::Int2 | TypeId::IntN, 2) => ColumnValue::SmallInt(src.get_i16_le()),
        (TypeId::Int4 | TypeId::IntN, 4) => ColumnValue::Int(src.get_i32_le()),
        (TypeId::Int8 | TypeId::IntN, 8) => ColumnValue::BigInt(src.get_i64_le()),
        (TypeId::Bit | TypeId::BitN, 1) => ColumnValue::Bit(src.get_u8() != 0),
        (TypeId::Float4 | TypeId::FloatN, 4) => ColumnValue::Real(src.get_f32_le()),
        (TypeId::Float8 | TypeId::FloatN, 8) => ColumnValue::Float(src.get_f64_le()),
        (TypeId::Money4 | TypeId::MoneyN, 4) => ColumnValue::Money(i64::from(src.get_i32_le())),
        (TypeId::Money | TypeId::MoneyN, 8) => {
            let high = i64::from(src.get_i32_le());
            let low = i64::from(src.get_u32_le());
            ColumnValue::Money((high << 32) | low)
        }
        (TypeId::DateTime4 | TypeId::DateTimeN, 4) => {
            let days = i32::from(src.get_u16_le());
            let minutes = u32::from(src.get_u16_le());
            ColumnValue::DateTime(DateTime {
                days,
                ticks: minutes * 60 * 300,
            })
        }
        (TypeId::DateTime | TypeId::DateTimeN, 8) => ColumnValue::DateTime(DateTime {
            days: src.get_i32_le(),
            ticks: src.get_u32_le(),
        }),
        (TypeId::Guid, 16) => {
            let mut guid = [0u8; 16];
            src.copy_to_slice(&mut guid);
            ColumnValue::Guid(guid)
        }
        (TypeId::Decimal | TypeId::Numeric | TypeId::DecimalN | TypeId::NumericN, 2..=17) => {
            let positive = src.get_u8() != 0;
            let mut magnitude = [0u8; 16];
            src.copy_to_slice(&mut magnitude[..len - 1]);
            let value = u128::from_le_bytes(magnitude);
            let value = i128::try_from(value).map_err(|_| bad_length())?;
            ColumnValue::Numeric(Numeric {
                mantissa: if positive { value } else { -value },
                precision: column.precision(),
                scale: column.scale(),
            })
        }
        (TypeId::Date, 3) => ColumnValue::Date(read_date(src)),
        (TypeId::Time, _) if len == time_len(column.scale()) => {
            ColumnValue::Time(read_time(src, column.scale()))
        }
        (TypeId::DateTime2, _) if len == time_len(column.scale()) + 3 => {
            let time = read_time(src, column.scale());
            ColumnValue::DateTime2(read_date(src), time)
        }
        (TypeId::DateTimeOffset, _) if len == time_len(column.scale()) + 5 => {
            let time = read_time(src, column.scale());
            let date = read_date(src);
            ColumnValue::DateTimeOffset(date, time, src.get_i16_le())
        }
        _ => return Err(bad_length()),
    })
}

fn time_len(scale: u8) -> usize {
    match scale {
        0..=2 => 3,
        3..=4 => 4,
        _ => 5,
    }
}

fn read_time(src: &mut impl Buf, scale: u8) -> Time {
    let len = time_len(scale);
    let mut raw = [0u8; 8];
    src.copy_to_slice(&mut raw[..len]);
    let units = u64::from_le_bytes(raw);
    let nanos = units * 10u64.pow(9u32.saturating_sub(u32::from(scale.min(9))));
    Time { nanos, scale }
}

fn read_date(src: &mut impl Buf) -> Date {
    let mut raw = [0u8; 4];
    src.copy_to_slice(&mut raw[..3]);
    Date {
        days: u32::from_le_bytes(raw),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::codec::{write_b_varchar, write_us_varchar};
    use crate::types::MAX_LENGTH_PLP;
    use bytes::BufMut;

    fn column(buf: &mut BytesMut, type_id: TypeId, info: &[u8], name: &str) {
        buf.put_u32_le(0);
        buf.put_u16_le(0x0001);
        buf.put_u8(type_id as u8);
        buf.extend_from_slice(info);
        write_b_varchar(buf, name);
    }

    fn metadata(columns: impl FnOnce(&mut BytesMut) -> u16) -> BytesMut {
        let mut body = BytesMut::new();
        let count = columns(&mut body);
        let mut buf = BytesMut::new();
        buf.put_u8(0x81);
        buf.put_u16_le(count);
        buf.extend_from_slice(&body);
        buf
    }

    fn done(status: u16, rows: u64) -> BytesMut {
        let mut buf = BytesMut::new();
        buf.put_u8(0xFD);
        buf.put_u16_le(status);
        buf.put_u16_le(0xC1);
        buf.put_u64_le(rows);
        buf
    }

    const LATIN1: [u8; 5] = [0x09, 0x04, 0xD0, 0x00, 0x34];

    fn decode_all(decoder: &mut TokenDecoder, buf: &mut BytesMut) -> Vec<Token> {
        let mut tokens = Vec::new();
        while let Some(token) = decoder.decode(buf).unwrap() {
            tokens.push(token);
        }
        tokens
    }

    #[test]
    fn test_metadata_then_rows() {
        let mut buf = metadata(|b| {
            column(b, TypeId::IntN, &[4], "id");
            let mut info = vec![0x64, 0x00];
            info.extend_from_slice(&LATIN1);
            column(b, TypeId::NVarChar, &info, "name");
            2
        });
        buf.put_u8(0xD1);
        buf.put_u8(4);
        buf.put_i32_le(7);
        buf.put_u16_le(4);
        buf.extend_from_slice(&[b'a', 0, b'b', 0]);
        buf.put_u8(0xD1);
        buf.put_u8(0);
        buf.put_u16_le(0xFFFF);
        buf.extend_from_slice(&done(0x10, 2));

        let mut decoder = TokenDecoder::new();
        let tokens = decode_all(&mut decoder, &mut buf);
        assert_eq!(tokens.len(), 4);
        assert_eq!(
            tokens[1],
            Token::Row(vec![ColumnValue::Int(7), ColumnValue::String("ab".into())])
        );
        assert_eq!(tokens[2], Token::Row(vec![ColumnValue::Null, ColumnValue::Null]));
        assert!(matches!(tokens[3], Token::EndOfResults(d) if d.update_count() == Some(2)));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_row_without_metadata() {
        let mut buf = BytesMut::from(&[0xD1u8, 0x00][..]);
        let mut decoder = TokenDecoder::new();
        assert_eq!(decoder.decode(&mut buf).unwrap_err(), ProtocolError::MissingMetadata);
    }

    #[test]
    fn test_malformed_buffered_error_fails_at_once() {
        let mut buf = BytesMut::from(&[0xAAu8, 4, 0, 208, 0, 0, 0][..]);
        let mut decoder = TokenDecoder::new();
        assert_eq!(
            decoder.decode(&mut buf).unwrap_err(),
            ProtocolError::MalformedToken(0xAA)
        );

        // a body that is merely incomplete still waits for more data
        let mut buf = BytesMut::from(&[0xAAu8, 40, 0, 208][..]);
        assert!(decoder.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_nbc_row_skips_null_columns() {
        let mut buf = metadata(|b| {
            column(b, TypeId::IntN, &[4], "a");
            column(b, TypeId::IntN, &[4], "b");
            column(b, TypeId::IntN, &[4], "c");
            3
        });
        buf.put_u8(0xD2);
        buf.put_u8(0b0000_0101);
        buf.put_u8(4);
        buf.put_i32_le(99);

        let mut decoder = TokenDecoder::new();
        let tokens = decode_all(&mut decoder, &mut buf);
        assert_eq!(
            tokens[1],
            Token::Row(vec![ColumnValue::Null, ColumnValue::Int(99), ColumnValue::Null])
        );
    }

    #[test]
    fn test_row_split_across_feeds_resumes_per_column() {
        let mut whole = metadata(|b| {
            column(b, TypeId::Int4, &[], "a");
            column(b, TypeId::Int8, &[], "b");
            2
        });
        whole.put_u8(0xD1);
        whole.put_i32_le(1);
        whole.put_i64_le(2);

        let mut decoder = TokenDecoder::new();
        let mut buf = BytesMut::new();
        let mut tokens = Vec::new();
        for byte in whole.iter() {
            buf.put_u8(*byte);
            if let Some(token) = decoder.decode(&mut buf).unwrap() {
                tokens.push(token);
            }
        }
        assert_eq!(tokens.len(), 2);
        assert_eq!(
            tokens[1],
            Token::Row(vec![ColumnValue::Int(1), ColumnValue::BigInt(2)])
        );
        assert!(!decoder.is_mid_token());
    }

    #[test]
    fn test_plp_value_is_chunked_without_reparse() {
        let mut head = metadata(|b| {
            column(b, TypeId::BigVarBinary, &[0xFF, 0xFF], "blob");
            1
        });
        head.put_u8(0xD1);
        head.put_u64_le(6);
        head.put_u32_le(4);
        head.extend_from_slice(b"ab");

        let mut decoder = TokenDecoder::new();
        let mut buf = head;
        assert!(matches!(decoder.decode(&mut buf).unwrap(), Some(Token::ColumnMetadata(_))));
        assert!(decoder.decode(&mut buf).unwrap().is_none());
        assert!(decoder.is_mid_token());
        assert!(buf.is_empty(), "partial chunk data is taken eagerly");

        buf.extend_from_slice(b"cd");
        buf.put_u32_le(2);
        buf.extend_from_slice(b"ef");
        buf.put_u32_le(0);

        match decoder.decode(&mut buf).unwrap() {
            Some(Token::Row(values)) => match &values[0] {
                ColumnValue::Lob(lob) => {
                    assert_eq!(lob.kind(), LobKind::Binary);
                    assert_eq!(&lob.to_bytes()[..], b"abcdef");
                    assert_eq!(lob.chunks().len(), 3);
                }
                other => panic!("unexpected {other:?}"),
            },
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_plp_null_and_empty() {
        let mut buf = metadata(|b| {
            let mut info = vec![0xFF, 0xFF];
            info.extend_from_slice(&LATIN1);
            column(b, TypeId::NVarChar, &info, "n");
            1
        });
        buf.put_u8(0xD1);
        buf.put_u64_le(PLP_NULL);
        buf.put_u8(0xD1);
        buf.put_u64_le(0);
        buf.put_u32_le(0);

        let mut decoder = TokenDecoder::new();
        let tokens = decode_all(&mut decoder, &mut buf);
        assert_eq!(tokens[1], Token::Row(vec![ColumnValue::Null]));
        match &tokens[2] {
            Token::Row(values) => {
                assert!(matches!(&values[0], ColumnValue::Lob(lob) if lob.is_empty()));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_textptr_values() {
        let mut buf = metadata(|b| {
            let mut info = Vec::new();
            info.put_u32_le(0x7FFF_FFFF);
            info.put_u8(0);
            column(b, TypeId::Image, &info, "img");
            let mut info = Vec::new();
            info.put_u32_le(0x7FFF_FFFF);
            info.extend_from_slice(&LATIN1);
            info.put_u8(0);
            column(b, TypeId::Text, &info, "txt");
            2
        });
        buf.put_u8(0xD1);
        buf.put_u8(16);
        buf.extend_from_slice(&[0xAA; 16]);
        buf.extend_from_slice(&[0; 8]);
        buf.put_u32_le(3);
        buf.extend_from_slice(&[1, 2, 3]);
        buf.put_u8(0);

        let mut decoder = TokenDecoder::new();
        let tokens = decode_all(&mut decoder, &mut buf);
        match &tokens[1] {
            Token::Row(values) => {
                assert!(matches!(&values[0], ColumnValue::Lob(l) if &l.to_bytes()[..] == [1, 2, 3]));
                assert_eq!(values[1], ColumnValue::Null);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_varchar_uses_collation_encoding() {
        let mut buf = metadata(|b| {
            let mut info = vec![0x10, 0x00];
            info.extend_from_slice(&[0x19, 0x04, 0x00, 0x00, 0x00]);
            column(b, TypeId::BigVarChar, &info, "ru");
            1
        });
        buf.put_u8(0xD1);
        buf.put_u16_le(2);
        buf.extend_from_slice(&[0xC4, 0xE0]);

        let mut decoder = TokenDecoder::new();
        let tokens = decode_all(&mut decoder, &mut buf);
        assert_eq!(tokens[1], Token::Row(vec![ColumnValue::String("Да".into())]));
    }

    #[test]
    fn test_fixed_scalar_types() {
        let mut buf = metadata(|b| {
            column(b, TypeId::Money, &[], "m");
            column(b, TypeId::DateTime, &[], "d");
            column(b, TypeId::DecimalN, &[9, 10, 2], "n");
            column(b, TypeId::Bit, &[], "flag");
            4
        });
        buf.put_u8(0xD1);
        buf.put_i32_le(0);
        buf.put_u32_le(1_234_500);
        buf.put_i32_le(1);
        buf.put_u32_le(300);
        buf.put_u8(5);
        buf.put_u8(0);
        buf.put_u32_le(12345);
        buf.put_u8(1);

        let mut decoder = TokenDecoder::new();
        let tokens = decode_all(&mut decoder, &mut buf);
        assert_eq!(
            tokens[1],
            Token::Row(vec![
                ColumnValue::Money(1_234_500),
                ColumnValue::DateTime(DateTime { days: 1, ticks: 300 }),
                ColumnValue::Numeric(Numeric {
                    mantissa: -12345,
                    precision: 10,
                    scale: 2
                }),
                ColumnValue::Bit(true),
            ])
        );
    }

    #[test]
    fn test_datetime2_scale_seven() {
        let mut buf = metadata(|b| {
            column(b, TypeId::DateTime2, &[7], "ts");
            1
        });
        buf.put_u8(0xD1);
        buf.put_u8(8);
        buf.extend_from_slice(&[0x01, 0, 0, 0, 0]);
        buf.extend_from_slice(&[0x0A, 0, 0]);

        let mut decoder = TokenDecoder::new();
        let tokens = decode_all(&mut decoder, &mut buf);
        assert_eq!(
            tokens[1],
            Token::Row(vec![ColumnValue::DateTime2(
                Date { days: 10 },
                Time { nanos: 100, scale: 7 }
            )])
        );
    }

    #[test]
    fn test_bad_intn_length() {
        let mut buf = metadata(|b| {
            column(b, TypeId::IntN, &[4], "x");
            1
        });
        buf.put_u8(0xD1);
        buf.put_u8(3);
        buf.extend_from_slice(&[0, 0, 0]);

        let mut decoder = TokenDecoder::new();
        decoder.decode(&mut buf).unwrap();
        assert!(matches!(
            decoder.decode(&mut buf).unwrap_err(),
            ProtocolError::InvalidValueLength { length: 3, .. }
        ));
    }

    #[test]
    fn test_return_status_and_value() {
        let mut buf = BytesMut::new();
        buf.put_u8(0x79);
        buf.put_i32_le(-4);
        buf.put_u8(0xAC);
        buf.put_u16_le(1);
        write_b_varchar(&mut buf, "@out");
        buf.put_u8(0x01);
        buf.put_u32_le(0);
        buf.put_u16_le(0x0001);
        buf.put_u8(TypeId::IntN as u8);
        buf.put_u8(4);
        buf.put_u8(4);
        buf.put_i32_le(31);

        let mut decoder = TokenDecoder::new();
        let tokens = decode_all(&mut decoder, &mut buf);
        assert_eq!(tokens[0], Token::ReturnStatus(-4));
        match &tokens[1] {
            Token::OutputParameter(param) => {
                assert_eq!(param.name, "@out");
                assert_eq!(param.ordinal, 1);
                assert_eq!(param.value, ColumnValue::Int(31));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_return_value_max_type() {
        let mut buf = BytesMut::new();
        buf.put_u8(0xAC);
        buf.put_u16_le(2);
        write_b_varchar(&mut buf, "@doc");
        buf.put_u8(0x01);
        buf.put_u32_le(0);
        buf.put_u16_le(0x0001);
        buf.put_u8(TypeId::BigVarBinary as u8);
        buf.put_u16_le(MAX_LENGTH_PLP as u16);
        buf.put_u64_le(2);
        buf.put_u32_le(2);
        buf.extend_from_slice(&[9, 8]);
        buf.put_u32_le(0);

        let mut decoder = TokenDecoder::new();
        match decoder.decode(&mut buf).unwrap() {
            Some(Token::OutputParameter(param)) => {
                assert!(matches!(param.value, ColumnValue::Lob(l) if &l.to_bytes()[..] == [9, 8]));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_unknown_token_is_skipped() {
        let mut buf = BytesMut::new();
        buf.put_u8(0xA4);
        buf.put_u16_le(4);
        write_us_varchar(&mut buf, "t");
        buf.extend_from_slice(&done(0, 0));

        let mut decoder = TokenDecoder::new();
        let tokens = decode_all(&mut decoder, &mut buf);
        assert!(matches!(tokens[0], Token::Unknown { tag: 0xA4, .. }));
        assert!(matches!(tokens[1], Token::EndOfResults(_)));
    }

    #[test]
    fn test_incomplete_token_leaves_buffer_untouched() {
        let full = done(0x10, 5);
        let mut buf = BytesMut::from(&full[..7]);
        let mut decoder = TokenDecoder::new();
        assert!(decoder.decode(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), 7);
        buf.extend_from_slice(&full[7..]);
        assert!(matches!(
            decoder.decode(&mut buf).unwrap(),
            Some(Token::EndOfResults(d)) if d.row_count == 5
        ));
    }
}
