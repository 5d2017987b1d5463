//! Token definitions and decoders for everything except rows.
//!
//! A response is a sequence of tokens, each introduced by a one-byte tag.
//! Row tokens depend on the active column metadata and are decoded
//! incrementally by [`TokenDecoder`](crate::decoder::TokenDecoder); the
//! decoders here parse complete, self-contained tokens from a buffer and
//! report [`ProtocolError::UnexpectedEof`] if it is too short.

use std::sync::Arc;

use bitflags::bitflags;
use bytes::{Buf, Bytes};

use crate::codec::{need, read_b_varchar, read_us_varchar};
use crate::collation::Collation;
use crate::error::ProtocolError;
use crate::types::{ColumnFlags, MAX_LENGTH_PLP, TypeId};
use crate::value::ColumnValue;

/// Token tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TokenType {
    /// Column metadata (COLMETADATA).
    ColMetaData = 0x81,
    /// Row (ROW).
    Row = 0xD1,
    /// Null-bitmap compressed row (NBCROW).
    NbcRow = 0xD2,
    /// Error message (ERROR).
    Error = 0xAA,
    /// Informational message (INFO).
    Info = 0xAB,
    /// Stored procedure return status (RETURNSTATUS).
    ReturnStatus = 0x79,
    /// Output parameter (RETURNVALUE).
    ReturnValue = 0xAC,
    /// End of statement (DONE).
    Done = 0xFD,
    /// End of stored procedure (DONEPROC).
    DoneProc = 0xFE,
    /// End of statement inside a procedure (DONEINPROC).
    DoneInProc = 0xFF,
    /// Environment change (ENVCHANGE).
    EnvChange = 0xE3,
    /// ORDER BY columns (ORDER).
    Order = 0xA9,
}

impl TokenType {
    /// Map a tag byte to a token type with a dedicated decoder.
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0x81 => Self::ColMetaData,
            0xD1 => Self::Row,
            0xD2 => Self::NbcRow,
            0xAA => Self::Error,
            0xAB => Self::Info,
            0x79 => Self::ReturnStatus,
            0xAC => Self::ReturnValue,
            0xFD => Self::Done,
            0xFE => Self::DoneProc,
            0xFF => Self::DoneInProc,
            0xE3 => Self::EnvChange,
            0xA9 => Self::Order,
            _ => return None,
        })
    }
}

/// A decoded token.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// Column descriptors of the result set that follows.
    ColumnMetadata(ColumnMetadata),
    /// One row aligned with the active column metadata.
    Row(Vec<ColumnValue>),
    /// Error or informational message.
    Message(ServerMessage),
    /// Return status of a stored procedure.
    ReturnStatus(i32),
    /// Output parameter of a stored procedure.
    OutputParameter(OutputParameter),
    /// End of a statement, procedure or batch.
    EndOfResults(Done),
    /// Session environment change.
    EnvChange(EnvChange),
    /// ORDER BY column ordinals.
    Order(Vec<u16>),
    /// Token without a dedicated variant, skipped by length.
    Unknown {
        /// Tag byte.
        tag: u8,
        /// Raw payload.
        payload: Bytes,
    },
}

/// Length class encoded in bits 4 and 5 of a tag.
///
/// Used to step over tokens this crate has no decoder for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TagClass {
    /// Followed by a variable count of items; cannot be skipped blindly.
    VariableCount,
    /// No payload.
    Zero,
    /// Two-byte little-endian length, then payload.
    VariableLength,
    /// Payload of 1, 2, 4 or 8 bytes.
    Fixed(usize),
}

impl TagClass {
    pub(crate) const fn of(tag: u8) -> Self {
        match tag & 0x30 {
            0x00 => Self::VariableCount,
            0x10 => Self::Zero,
            0x20 => Self::VariableLength,
            _ => Self::Fixed(1 << ((tag >> 2) & 0x03)),
        }
    }
}

/// Skip a token this crate does not model, returning its payload.
pub(crate) fn decode_unknown(tag: u8, src: &mut impl Buf) -> Result<Token, ProtocolError> {
    let len = match TagClass::of(tag) {
        TagClass::VariableCount => return Err(ProtocolError::InvalidTokenType(tag)),
        TagClass::Zero => 0,
        TagClass::Fixed(n) => n,
        TagClass::VariableLength => {
            need(src, 2)?;
            let len = usize::from(u16::from_le_bytes([src.chunk()[0], src.chunk()[1]]));
            need(src, 2 + len)?;
            src.advance(2);
            len
        }
    };
    need(src, len)?;
    Ok(Token::Unknown {
        tag,
        payload: src.copy_to_bytes(len),
    })
}

// =============================================================================
// Column metadata
// =============================================================================

/// Type-specific column properties.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TypeInfo {
    /// Declared maximum length in bytes; `0xFFFF` marks a `(MAX)` column.
    pub max_length: Option<u32>,
    /// Decimal precision.
    pub precision: Option<u8>,
    /// Decimal or fractional-second scale.
    pub scale: Option<u8>,
    /// Collation of character columns.
    pub collation: Option<Collation>,
    /// Owning table of legacy LOB columns.
    pub table_name: Option<String>,
}

/// Descriptor of one result column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDescriptor {
    /// Column name, possibly empty.
    pub name: String,
    /// Wire type code.
    pub type_id: TypeId,
    /// Server user type.
    pub user_type: u32,
    /// Column flags.
    pub flags: ColumnFlags,
    /// Size, precision, scale and collation.
    pub type_info: TypeInfo,
}

/// How the value of a large-object column is framed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LobLayout {
    /// Partially length-prefixed chunks (`(MAX)` types and XML).
    Plp,
    /// Legacy textptr + timestamp + int length (TEXT, NTEXT, IMAGE).
    TextPtr,
}

impl ColumnDescriptor {
    /// Whether the column accepts NULL.
    #[must_use]
    pub fn is_nullable(&self) -> bool {
        self.flags.contains(ColumnFlags::NULLABLE)
    }

    /// Layout of the value if this is a large-object column.
    #[must_use]
    pub fn lob_layout(&self) -> Option<LobLayout> {
        match self.type_id {
            TypeId::Text | TypeId::NText | TypeId::Image => Some(LobLayout::TextPtr),
            TypeId::Xml => Some(LobLayout::Plp),
            TypeId::BigVarChar | TypeId::BigVarBinary | TypeId::NVarChar | TypeId::Udt
                if self.type_info.max_length == Some(MAX_LENGTH_PLP) =>
            {
                Some(LobLayout::Plp)
            }
            _ => None,
        }
    }

    /// Whether values of this column are large objects.
    #[must_use]
    pub fn is_lob(&self) -> bool {
        self.lob_layout().is_some()
    }

    /// Declared precision, falling back to the natural precision of the type.
    #[must_use]
    pub fn precision(&self) -> u8 {
        self.type_info.precision.unwrap_or(match self.type_id {
            TypeId::Int1 => 3,
            TypeId::Int2 => 5,
            TypeId::Int4 => 10,
            TypeId::Int8 => 19,
            _ => 0,
        })
    }

    /// Declared scale, 0 when the type has none.
    #[must_use]
    pub fn scale(&self) -> u8 {
        self.type_info.scale.unwrap_or(0)
    }

    fn decode(src: &mut impl Buf) -> Result<Self, ProtocolError> {
        need(src, 7)?;
        let user_type = src.get_u32_le();
        let flags = ColumnFlags::from_bits_retain(src.get_u16_le());
        let raw_type = src.get_u8();
        let type_id = TypeId::from_u8(raw_type).ok_or(ProtocolError::InvalidDataType(raw_type))?;
        let type_info = decode_type_info(src, type_id)?;
        let name = read_b_varchar(src)?;
        Ok(Self {
            name,
            type_id,
            user_type,
            flags,
            type_info,
        })
    }
}

/// Decode the type-specific metadata that follows a type code.
pub(crate) fn decode_type_info(
    src: &mut impl Buf,
    type_id: TypeId,
) -> Result<TypeInfo, ProtocolError> {
    let mut info = TypeInfo::default();
    match type_id {
        TypeId::Null
        | TypeId::Int1
        | TypeId::Bit
        | TypeId::Int2
        | TypeId::Int4
        | TypeId::Int8
        | TypeId::Float4
        | TypeId::Float8
        | TypeId::Money
        | TypeId::Money4
        | TypeId::DateTime
        | TypeId::DateTime4
        | TypeId::Date => {}

        TypeId::IntN
        | TypeId::BitN
        | TypeId::FloatN
        | TypeId::MoneyN
        | TypeId::DateTimeN
        | TypeId::Guid
        | TypeId::Char
        | TypeId::VarChar
        | TypeId::Binary
        | TypeId::VarBinary => {
            need(src, 1)?;
            info.max_length = Some(u32::from(src.get_u8()));
        }

        TypeId::Decimal | TypeId::Numeric | TypeId::DecimalN | TypeId::NumericN => {
            need(src, 3)?;
            info.max_length = Some(u32::from(src.get_u8()));
            info.precision = Some(src.get_u8());
            info.scale = Some(src.get_u8());
        }

        TypeId::Time | TypeId::DateTime2 | TypeId::DateTimeOffset => {
            need(src, 1)?;
            info.scale = Some(src.get_u8());
        }

        TypeId::BigVarChar | TypeId::BigChar | TypeId::NVarChar | TypeId::NChar => {
            need(src, 2 + Collation::SIZE)?;
            info.max_length = Some(u32::from(src.get_u16_le()));
            info.collation = Some(Collation::decode(src)?);
        }

        TypeId::BigVarBinary | TypeId::BigBinary => {
            need(src, 2)?;
            info.max_length = Some(u32::from(src.get_u16_le()));
        }

        TypeId::Text | TypeId::NText | TypeId::Image => {
            need(src, 4)?;
            info.max_length = Some(src.get_u32_le());
            if type_id != TypeId::Image {
                info.collation = Some(Collation::decode(src)?);
            }
            need(src, 1)?;
            let parts = src.get_u8();
            let mut names = Vec::with_capacity(usize::from(parts));
            for _ in 0..parts {
                names.push(read_us_varchar(src)?);
            }
            info.table_name = (!names.is_empty()).then(|| names.join("."));
        }

        TypeId::Xml => {
            need(src, 1)?;
            if src.get_u8() != 0 {
                read_b_varchar(src)?;
                read_b_varchar(src)?;
                read_us_varchar(src)?;
            }
            info.max_length = Some(MAX_LENGTH_PLP);
        }

        TypeId::Udt => {
            need(src, 2)?;
            info.max_length = Some(u32::from(src.get_u16_le()));
            read_b_varchar(src)?;
            read_b_varchar(src)?;
            read_b_varchar(src)?;
            read_us_varchar(src)?;
        }

        TypeId::Variant => {
            need(src, 4)?;
            info.max_length = Some(src.get_u32_le());
        }
    }
    Ok(info)
}

/// Column descriptors of one result set.
///
/// Cloning is cheap: every row of the result set shares the same
/// immutable descriptor slice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMetadata {
    columns: Arc<[ColumnDescriptor]>,
}

impl ColumnMetadata {
    /// Wrap a list of descriptors.
    #[must_use]
    pub fn new(columns: Vec<ColumnDescriptor>) -> Self {
        Self {
            columns: columns.into(),
        }
    }

    /// Decode a COLMETADATA token body (after the tag).
    pub fn decode(src: &mut impl Buf) -> Result<Self, ProtocolError> {
        need(src, 2)?;
        let count = src.get_u16_le();
        // 0xFFFF: the server reused metadata and sent none.
        if count == 0xFFFF {
            return Ok(Self::new(Vec::new()));
        }
        let mut columns = Vec::with_capacity(usize::from(count));
        for _ in 0..count {
            columns.push(ColumnDescriptor::decode(src)?);
        }
        Ok(Self::new(columns))
    }

    /// Number of columns.
    #[must_use]
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Whether the result set has no columns.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Descriptor at a zero-based index.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&ColumnDescriptor> {
        self.columns.get(index)
    }

    /// All descriptors.
    #[must_use]
    pub fn as_slice(&self) -> &[ColumnDescriptor] {
        &self.columns
    }

    /// Iterate over descriptors.
    pub fn iter(&self) -> std::slice::Iter<'_, ColumnDescriptor> {
        self.columns.iter()
    }

    /// Zero-based index of a column, matching names case-insensitively.
    #[must_use]
    pub fn find(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// Whether two handles share the same descriptor allocation.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.columns, &other.columns)
    }
}

// =============================================================================
// Messages
// =============================================================================

/// Whether a message came from an ERROR or an INFO token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// ERROR token.
    Error,
    /// INFO token.
    Info,
}

/// Server error or informational message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerMessage {
    /// Token the message arrived in.
    pub kind: MessageKind,
    /// Message number.
    pub number: i32,
    /// Error state.
    pub state: u8,
    /// Severity class.
    pub class: u8,
    /// Message text.
    pub message: String,
    /// Server name.
    pub server: String,
    /// Procedure name, empty outside procedures.
    pub procedure: String,
    /// Line number in the batch or procedure.
    pub line: i32,
}

impl ServerMessage {
    /// Decode an ERROR or INFO body (after the tag).
    pub fn decode(kind: MessageKind, src: &mut impl Buf) -> Result<Self, ProtocolError> {
        need(src, 2)?;
        let len = usize::from(u16::from_le_bytes([src.chunk()[0], src.chunk()[1]]));
        need(src, 2 + len)?;
        src.advance(2);
        let tag = match kind {
            MessageKind::Error => TokenType::Error,
            MessageKind::Info => TokenType::Info,
        };
        Self::decode_body(kind, src.copy_to_bytes(len)).map_err(|e| e.within_body(tag as u8))
    }

    fn decode_body(kind: MessageKind, mut body: Bytes) -> Result<Self, ProtocolError> {
        need(&body, 6)?;
        let number = body.get_i32_le();
        let state = body.get_u8();
        let class = body.get_u8();
        let message = read_us_varchar(&mut body)?;
        let server = read_b_varchar(&mut body)?;
        let procedure = read_b_varchar(&mut body)?;
        need(&body, 4)?;
        let line = body.get_i32_le();

        Ok(Self {
            kind,
            number,
            state,
            class,
            message,
            server,
            procedure,
            line,
        })
    }
}

// =============================================================================
// Done
// =============================================================================

bitflags! {
    /// Status bits of DONE, DONEPROC and DONEINPROC.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct DoneStatus: u16 {
        /// More results follow.
        const MORE = 0x0001;
        /// The statement failed.
        const ERROR = 0x0002;
        /// A transaction is in progress.
        const IN_XACT = 0x0004;
        /// `row_count` is valid.
        const COUNT = 0x0010;
        /// Acknowledges an attention signal.
        const ATTN = 0x0020;
        /// Severe server error; results so far are suspect.
        const SRVERROR = 0x0100;
    }
}

/// Which end token was received.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DoneKind {
    /// DONE: end of a statement in a batch.
    Done,
    /// DONEPROC: end of a stored procedure.
    Proc,
    /// DONEINPROC: end of a statement inside a procedure.
    InProc,
}

/// End-of-results token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Done {
    /// Which token this was.
    pub kind: DoneKind,
    /// Status bits.
    pub status: DoneStatus,
    /// Current command code.
    pub cur_cmd: u16,
    /// Rows affected, valid when `COUNT` is set.
    pub row_count: u64,
}

impl Done {
    /// Body size after the tag.
    pub const SIZE: usize = 12;

    /// Size of the whole token, tag included.
    pub const TOKEN_SIZE: usize = Self::SIZE + 1;

    /// Whether `message` ends with a DONE token acknowledging an attention.
    ///
    /// Finds the acknowledgement in data the decoder could not follow; the
    /// server always sends it as the last token of a message.
    #[must_use]
    pub fn is_attention_ack(message: &[u8]) -> bool {
        let Some(start) = message.len().checked_sub(Self::TOKEN_SIZE) else {
            return false;
        };
        match &message[start..] {
            [tag, lo, hi, ..] if *tag == TokenType::Done as u8 => {
                DoneStatus::from_bits_retain(u16::from_le_bytes([*lo, *hi]))
                    .contains(DoneStatus::ATTN)
            }
            _ => false,
        }
    }

    /// Decode a DONE-family body (after the tag).
    pub fn decode(kind: DoneKind, src: &mut impl Buf) -> Result<Self, ProtocolError> {
        need(src, Self::SIZE)?;
        Ok(Self {
            kind,
            status: DoneStatus::from_bits_retain(src.get_u16_le()),
            cur_cmd: src.get_u16_le(),
            row_count: src.get_u64_le(),
        })
    }

    /// Whether more results follow in this response.
    #[must_use]
    pub const fn has_more(&self) -> bool {
        self.status.contains(DoneStatus::MORE)
    }

    /// Whether this token acknowledges a cancel.
    #[must_use]
    pub const fn was_canceled(&self) -> bool {
        self.status.contains(DoneStatus::ATTN)
    }

    /// Whether `row_count` is meaningful.
    #[must_use]
    pub const fn has_count(&self) -> bool {
        self.status.contains(DoneStatus::COUNT)
    }

    /// Whether the statement reported an error.
    #[must_use]
    pub const fn has_error(&self) -> bool {
        self.status.contains(DoneStatus::ERROR) || self.status.contains(DoneStatus::SRVERROR)
    }

    /// Row count when the `COUNT` bit is set.
    #[must_use]
    pub const fn update_count(&self) -> Option<u64> {
        if self.has_count() {
            Some(self.row_count)
        } else {
            None
        }
    }
}

// =============================================================================
// Output parameters
// =============================================================================

/// Output parameter returned by a stored procedure call.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputParameter {
    /// Position of the parameter in the call.
    pub ordinal: u16,
    /// Parameter name including the leading `@`, possibly empty.
    pub name: String,
    /// 0x01 for output parameters, 0x02 for user-defined function results.
    pub status: u8,
    /// Declared type of the value.
    pub descriptor: ColumnDescriptor,
    /// The value.
    pub value: ColumnValue,
}

// =============================================================================
// Environment changes
// =============================================================================

/// Session environment change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvChange {
    /// Current database changed.
    Database {
        /// New database.
        new: String,
        /// Previous database.
        old: String,
    },
    /// Session language changed.
    Language {
        /// New language.
        new: String,
    },
    /// Character set for single-byte data changed.
    Charset {
        /// New charset name as reported by the server.
        new: String,
    },
    /// Negotiated packet size changed.
    PacketSize {
        /// New packet size in bytes.
        new: usize,
    },
    /// Default collation changed.
    Collation {
        /// New collation, if one was sent.
        new: Option<Collation>,
    },
    /// Any other change (transactions, routing, ...).
    Other {
        /// Change type byte.
        kind: u8,
        /// Raw change payload after the type byte.
        payload: Bytes,
    },
}

impl EnvChange {
    /// Decode an ENVCHANGE body (after the tag).
    pub fn decode(src: &mut impl Buf) -> Result<Self, ProtocolError> {
        need(src, 2)?;
        let len = usize::from(u16::from_le_bytes([src.chunk()[0], src.chunk()[1]]));
        need(src, 2 + len)?;
        src.advance(2);
        Self::decode_body(src.copy_to_bytes(len))
            .map_err(|e| e.within_body(TokenType::EnvChange as u8))
    }

    fn decode_body(mut body: Bytes) -> Result<Self, ProtocolError> {
        need(&body, 1)?;
        let kind = body.get_u8();
        Ok(match kind {
            1 => Self::Database {
                new: read_b_varchar(&mut body)?,
                old: read_b_varchar(&mut body)?,
            },
            2 => Self::Language {
                new: read_b_varchar(&mut body)?,
            },
            3 => Self::Charset {
                new: read_b_varchar(&mut body)?,
            },
            4 => {
                let value = read_b_varchar(&mut body)?;
                let new = value
                    .parse()
                    .map_err(|_| ProtocolError::StringEncoding(format!("packet size {value:?}")))?;
                Self::PacketSize { new }
            }
            7 => {
                need(&body, 1)?;
                let len = usize::from(body.get_u8());
                let new = if len >= Collation::SIZE {
                    Some(Collation::decode(&mut body)?)
                } else {
                    None
                };
                Self::Collation { new }
            }
            _ => Self::Other {
                kind,
                payload: body,
            },
        })
    }
}

/// Decode an ORDER body (after the tag).
pub(crate) fn decode_order(src: &mut impl Buf) -> Result<Vec<u16>, ProtocolError> {
    need(src, 2)?;
    let len = usize::from(u16::from_le_bytes([src.chunk()[0], src.chunk()[1]]));
    need(src, 2 + len)?;
    src.advance(2);
    Ok((0..len / 2).map(|_| src.get_u16_le()).collect())
}
