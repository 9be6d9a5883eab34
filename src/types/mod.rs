//! The value data model shared by the codecs, the row writer, and the
//! extended-query engine.

use bytes::Bytes;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

use crate::errors::Error;

pub mod codec;

pub use codec::{TypeRegistry, ValueCodec};


/// Postgres object identifier. Unsigned four-byte integer on the wire.
pub type Oid = u32;

/// OIDs of the built-in type catalog.
pub mod oids {
    use super::Oid;

    /// 0 means "unspecified"; values pass through as raw text/bytes.
    pub const UNSPECIFIED: Oid = 0;
    pub const BOOL: Oid = 16;
    pub const BYTEA: Oid = 17;
    pub const INT8: Oid = 20;
    pub const INT2: Oid = 21;
    pub const INT4: Oid = 23;
    pub const TEXT: Oid = 25;
    pub const FLOAT4: Oid = 700;
    pub const FLOAT8: Oid = 701;
    pub const BPCHAR: Oid = 1042;
    pub const VARCHAR: Oid = 1043;
    pub const DATE: Oid = 1082;
    pub const TIMESTAMP: Oid = 1114;
    pub const TIMESTAMPTZ: Oid = 1184;
    pub const NUMERIC: Oid = 1700;
    pub const UUID: Oid = 2950;
}

/// Wire representation declared per column or parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i16)]
pub enum FormatCode {
    Text = 0,
    Binary = 1,
}

impl FormatCode {
    pub fn from_i16(code: i16) -> Result<FormatCode, Error> {
        match code {
            0 => Ok(FormatCode::Text),
            1 => Ok(FormatCode::Binary),
            other => Err(Error::ProtocolViolation(format!(
                "unknown format code {other}"
            ))),
        }
    }
}

/// One column of a declared result set, as advertised in RowDescription.
#[derive(Debug, Clone)]
pub struct Column {
    pub name: String,
    pub table_oid: Oid,
    pub attr_number: i16,
    pub type_oid: Oid,
    pub type_size: i16,
    pub type_modifier: i32,
}

impl Column {
    /// A free-standing column of the given type: no table, default modifier,
    /// width from the type catalog.
    pub fn new(name: impl Into<String>, type_oid: Oid) -> Self {
        Column {
            name: name.into(),
            table_oid: 0,
            attr_number: 0,
            type_oid,
            type_size: type_width(type_oid),
            type_modifier: -1,
        }
    }
}

/// Fixed widths for the built-in catalog; -1 means variable length.
pub fn type_width(oid: Oid) -> i16 {
    match oid {
        oids::BOOL => 1,
        oids::INT2 => 2,
        oids::INT4 | oids::FLOAT4 | oids::DATE => 4,
        oids::INT8 | oids::FLOAT8 | oids::TIMESTAMP | oids::TIMESTAMPTZ => 8,
        oids::UUID => 16,
        _ => -1,
    }
}

/// A bound parameter: declared OID, the raw bytes exactly as they arrived
/// (None for the null parameter, length -1 on the wire), and the format the
/// client used.
#[derive(Debug, Clone)]
pub struct Parameter {
    pub oid: Oid,
    pub format: FormatCode,
    pub bytes: Option<Bytes>,
}

impl Parameter {
    /// Decode the raw bytes through the registry codec for this parameter's
    /// declared type.
    pub fn decode(&self, registry: &TypeRegistry) -> Result<Value, Error> {
        match &self.bytes {
            None => Ok(Value::Null),
            Some(bytes) => registry.decode(self.oid, bytes, self.format),
        }
    }
}

/// A decoded (or to-be-encoded) value of the built-in catalog.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int2(i16),
    Int4(i32),
    Int8(i64),
    Float4(f32),
    Float8(f64),
    Text(String),
    Bytea(Vec<u8>),
    /// Canonical decimal text; validated when encoded.
    Numeric(String),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
    TimestampTz(DateTime<Utc>),
    Uuid([u8; 16]),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i16> for Value {
    fn from(v: i16) -> Self {
        Value::Int2(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int4(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int8(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float4(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float8(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl<T> From<Option<T>> for Value
where
    T: Into<Value>,
{
    fn from(v: Option<T>) -> Self {
        match v {
            Some(v) => v.into(),
            None => Value::Null,
        }
    }
}
