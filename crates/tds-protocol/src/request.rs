//! Client request encoding.
//!
//! Two request kinds are supported: SQL batches (packet type 0x01) and
//! remote procedure calls (packet type 0x03). Both start with an
//! ALL_HEADERS section carrying the transaction descriptor; the payload
//! returned here is split into packets by the transport.

use bytes::{BufMut, Bytes, BytesMut};

use crate::codec::{write_b_varchar, write_utf16_string};
use crate::packet::PacketType;
use crate::types::TypeId;

/// Largest in-row NVARCHAR / VARBINARY parameter in bytes.
const MAX_IN_ROW_BYTES: usize = 8000;

/// Collation sent with character parameters (Latin1_General_CI_AS).
const DEFAULT_COLLATION: [u8; 5] = [0x09, 0x04, 0xD0, 0x00, 0x34];

/// A request ready to be sent.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    /// Ad hoc SQL text.
    Batch(String),
    /// Stored procedure or parameterized statement.
    Rpc(RpcRequest),
}

impl Request {
    /// Create a SQL batch.
    #[must_use]
    pub fn batch(sql: impl Into<String>) -> Self {
        Self::Batch(sql.into())
    }

    /// Packet type the payload must be sent with.
    #[must_use]
    pub const fn packet_type(&self) -> PacketType {
        match self {
            Self::Batch(_) => PacketType::SqlBatch,
            Self::Rpc(_) => PacketType::Rpc,
        }
    }

    /// Encode the payload in auto-commit mode.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        self.encode_with_transaction(0)
    }

    /// Encode the payload with a transaction descriptor.
    ///
    /// The descriptor is the value the server sent when the transaction
    /// began, or 0 outside explicit transactions.
    #[must_use]
    pub fn encode_with_transaction(&self, transaction_descriptor: u64) -> Bytes {
        match self {
            Self::Batch(sql) => {
                let mut buf = BytesMut::with_capacity(22 + sql.len() * 2);
                write_all_headers(&mut buf, transaction_descriptor);
                write_utf16_string(&mut buf, sql);
                buf.freeze()
            }
            Self::Rpc(rpc) => rpc.encode(transaction_descriptor),
        }
    }
}

impl From<RpcRequest> for Request {
    fn from(rpc: RpcRequest) -> Self {
        Self::Rpc(rpc)
    }
}

fn write_all_headers(buf: &mut BytesMut, transaction_descriptor: u64) {
    // total length, then one transaction descriptor header
    buf.put_u32_le(22);
    buf.put_u32_le(18);
    buf.put_u16_le(0x0002);
    buf.put_u64_le(transaction_descriptor);
    // outstanding request count
    buf.put_u32_le(1);
}

/// Well-known procedures addressed by id instead of name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ProcId {
    /// sp_executesql.
    ExecuteSql = 0x000A,
}

#[derive(Debug, Clone, PartialEq)]
enum RpcTarget {
    Named(String),
    Id(ProcId),
}

/// A remote procedure call.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcRequest {
    target: RpcTarget,
    params: Vec<RpcParam>,
}

impl RpcRequest {
    /// Call a stored procedure by name.
    #[must_use]
    pub fn procedure(name: impl Into<String>) -> Self {
        Self {
            target: RpcTarget::Named(name.into()),
            params: Vec::new(),
        }
    }

    /// Run parameterized SQL through `sp_executesql`.
    ///
    /// The statement text and the parameter declaration list are prepended
    /// to `params`.
    #[must_use]
    pub fn execute_sql(sql: &str, params: Vec<RpcParam>) -> Self {
        let mut all = Vec::with_capacity(params.len() + 2);
        all.push(RpcParam::input("", ParamValue::String(sql.to_owned())));
        if !params.is_empty() {
            all.push(RpcParam::input(
                "",
                ParamValue::String(declarations(&params)),
            ));
        }
        all.extend(params);
        Self {
            target: RpcTarget::Id(ProcId::ExecuteSql),
            params: all,
        }
    }

    /// Append a parameter.
    #[must_use]
    pub fn param(mut self, param: RpcParam) -> Self {
        self.params.push(param);
        self
    }

    /// Parameters in call order.
    #[must_use]
    pub fn params(&self) -> &[RpcParam] {
        &self.params
    }

    /// Procedure name, `None` for calls by id.
    #[must_use]
    pub fn procedure_name(&self) -> Option<&str> {
        match &self.target {
            RpcTarget::Named(name) => Some(name),
            RpcTarget::Id(_) => None,
        }
    }

    fn encode(&self, transaction_descriptor: u64) -> Bytes {
        let mut buf = BytesMut::with_capacity(256);
        write_all_headers(&mut buf, transaction_descriptor);

        match &self.target {
            RpcTarget::Id(id) => {
                buf.put_u16_le(0xFFFF);
                buf.put_u16_le(*id as u16);
            }
            RpcTarget::Named(name) => {
                buf.put_u16_le(name.encode_utf16().count() as u16);
                write_utf16_string(&mut buf, name);
            }
        }
        // option flags
        buf.put_u16_le(0);

        for param in &self.params {
            param.encode(&mut buf);
        }
        buf.freeze()
    }
}

fn declarations(params: &[RpcParam]) -> String {
    params
        .iter()
        .enumerate()
        .map(|(i, p)| {
            let name = if p.name.is_empty() {
                format!("@p{}", i + 1)
            } else if p.name.starts_with('@') {
                p.name.clone()
            } else {
                format!("@{}", p.name)
            };
            let output = if p.output { " output" } else { "" };
            format!("{name} {}{output}", p.sql_type.declaration(p.value.as_ref()))
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Declared SQL type of a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    /// BIT.
    Bit,
    /// INT.
    Int,
    /// BIGINT.
    BigInt,
    /// FLOAT.
    Float,
    /// NVARCHAR(4000) or NVARCHAR(MAX).
    NVarChar,
    /// VARBINARY(8000) or VARBINARY(MAX).
    VarBinary,
    /// UNIQUEIDENTIFIER.
    Guid,
}

impl ParamType {
    fn is_max(self, value: Option<&ParamValue>) -> bool {
        match value {
            Some(ParamValue::String(s)) => s.len() * 2 > MAX_IN_ROW_BYTES,
            Some(ParamValue::Binary(b)) => b.len() > MAX_IN_ROW_BYTES,
            _ => false,
        }
    }

    fn declaration(self, value: Option<&ParamValue>) -> &'static str {
        let max = self.is_max(value);
        match self {
            Self::Bit => "bit",
            Self::Int => "int",
            Self::BigInt => "bigint",
            Self::Float => "float",
            Self::NVarChar if max => "nvarchar(max)",
            Self::NVarChar => "nvarchar(4000)",
            Self::VarBinary if max => "varbinary(max)",
            Self::VarBinary => "varbinary(8000)",
            Self::Guid => "uniqueidentifier",
        }
    }

    fn fixed_width(self) -> Option<u8> {
        match self {
            Self::Bit => Some(1),
            Self::Int => Some(4),
            Self::BigInt | Self::Float => Some(8),
            Self::Guid => Some(16),
            Self::NVarChar | Self::VarBinary => None,
        }
    }

    fn type_id(self) -> TypeId {
        match self {
            Self::Bit => TypeId::BitN,
            Self::Int | Self::BigInt => TypeId::IntN,
            Self::Float => TypeId::FloatN,
            Self::NVarChar => TypeId::NVarChar,
            Self::VarBinary => TypeId::BigVarBinary,
            Self::Guid => TypeId::Guid,
        }
    }
}

/// Parameter value.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    /// BIT.
    Bit(bool),
    /// INT.
    Int(i32),
    /// BIGINT.
    BigInt(i64),
    /// FLOAT.
    Float(f64),
    /// NVARCHAR.
    String(String),
    /// VARBINARY.
    Binary(Bytes),
    /// UNIQUEIDENTIFIER in wire byte order.
    Guid([u8; 16]),
}

impl ParamValue {
    /// Type the value is declared as.
    #[must_use]
    pub const fn param_type(&self) -> ParamType {
        match self {
            Self::Bit(_) => ParamType::Bit,
            Self::Int(_) => ParamType::Int,
            Self::BigInt(_) => ParamType::BigInt,
            Self::Float(_) => ParamType::Float,
            Self::String(_) => ParamType::NVarChar,
            Self::Binary(_) => ParamType::VarBinary,
            Self::Guid(_) => ParamType::Guid,
        }
    }

    fn put(&self, buf: &mut BytesMut) {
        match self {
            Self::Bit(v) => buf.put_u8(u8::from(*v)),
            Self::Int(v) => buf.put_i32_le(*v),
            Self::BigInt(v) => buf.put_i64_le(*v),
            Self::Float(v) => buf.put_f64_le(*v),
            Self::String(s) => write_utf16_string(buf, s),
            Self::Binary(b) => buf.put_slice(b),
            Self::Guid(g) => buf.put_slice(g),
        }
    }

    fn byte_len(&self) -> usize {
        match self {
            Self::String(s) => s.encode_utf16().count() * 2,
            Self::Binary(b) => b.len(),
            other => usize::from(other.param_type().fixed_width().unwrap_or(0)),
        }
    }
}

/// One RPC parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcParam {
    /// Name including `@`, or empty for positional parameters.
    pub name: String,
    /// Declared type.
    pub sql_type: ParamType,
    /// Value, `None` for NULL.
    pub value: Option<ParamValue>,
    /// Whether the server should return the parameter's final value.
    pub output: bool,
}

impl RpcParam {
    /// Input parameter with a value.
    #[must_use]
    pub fn input(name: impl Into<String>, value: ParamValue) -> Self {
        Self {
            name: name.into(),
            sql_type: value.param_type(),
            value: Some(value),
            output: false,
        }
    }

    /// NULL input parameter of the given type.
    #[must_use]
    pub fn null(name: impl Into<String>, sql_type: ParamType) -> Self {
        Self {
            name: name.into(),
            sql_type,
            value: None,
            output: false,
        }
    }

    /// Mark the parameter as an output parameter.
    #[must_use]
    pub fn as_output(mut self) -> Self {
        self.output = true;
        self
    }

    fn encode(&self, buf: &mut BytesMut) {
        write_b_varchar(buf, &self.name);
        buf.put_u8(u8::from(self.output));

        let max = self.sql_type.is_max(self.value.as_ref());
        buf.put_u8(self.sql_type.type_id() as u8);
        match self.sql_type.fixed_width() {
            Some(width) => buf.put_u8(width),
            None => {
                buf.put_u16_le(if max { 0xFFFF } else { MAX_IN_ROW_BYTES as u16 });
                if self.sql_type == ParamType::NVarChar {
                    buf.put_slice(&DEFAULT_COLLATION);
                }
            }
        }

        let Some(value) = &self.value else {
            match self.sql_type.fixed_width() {
                Some(_) => buf.put_u8(0),
                None => buf.put_u16_le(0xFFFF),
            }
            return;
        };

        let len = value.byte_len();
        if max {
            buf.put_u64_le(len as u64);
            if len > 0 {
                buf.put_u32_le(len as u32);
                value.put(buf);
            }
            buf.put_u32_le(0);
        } else if self.sql_type.fixed_width().is_some() {
            buf.put_u8(len as u8);
            value.put(buf);
        } else {
            buf.put_u16_le(len as u16);
            value.put(buf);
        }
    }
}
