//! Text and binary codecs for the built-in type catalog.
//!
//! Text format follows PostgreSQL's canonical textual forms; binary format
//! follows the network-byte-order layouts, including the base-10000 digit
//! groups of `numeric` and the 2000-01-01 epoch of the date/time types.

use std::sync::Arc;

use ahash::AHashMap;
use bytes::{Buf, BufMut, BytesMut};
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};

use crate::errors::{Error, ErrorInfo};
use crate::types::{oids, FormatCode, Oid, Value};

/// 22P02 invalid_text_representation
const INVALID_TEXT: &str = "22P02";
/// 22P03 invalid_binary_representation
const INVALID_BINARY: &str = "22P03";
/// 42804 datatype_mismatch
const DATATYPE_MISMATCH: &str = "42804";

fn text_err(type_name: &str, detail: impl Into<String>) -> Error {
    Error::Query(
        ErrorInfo::new(format!("invalid input syntax for type {type_name}"))
            .with_code(INVALID_TEXT)
            .with_detail(detail),
    )
}

fn binary_err(type_name: &str) -> Error {
    Error::Query(
        ErrorInfo::new(format!("invalid binary representation for type {type_name}"))
            .with_code(INVALID_BINARY),
    )
}

fn mismatch(type_name: &str, value: &Value) -> Error {
    Error::Query(
        ErrorInfo::new(format!("value {value:?} cannot be encoded as {type_name}"))
            .with_code(DATATYPE_MISMATCH),
    )
}

fn utf8<'a>(bytes: &'a [u8], type_name: &str) -> Result<&'a str, Error> {
    std::str::from_utf8(bytes).map_err(|_| text_err(type_name, "value is not valid utf-8"))
}

/// Encode/decode capability for one type OID.
pub trait ValueCodec: Send + Sync {
    fn encode(&self, value: &Value, format: FormatCode) -> Result<BytesMut, Error>;
    fn decode(&self, bytes: &[u8], format: FormatCode) -> Result<Value, Error>;
}

/// OID → codec table. Unknown OIDs fall back to an opaque passthrough so
/// hosts can serve types the catalog does not model.
pub struct TypeRegistry {
    codecs: AHashMap<Oid, Arc<dyn ValueCodec>>,
    passthrough: Arc<dyn ValueCodec>,
}

impl TypeRegistry {
    pub fn built_in() -> Self {
        let mut codecs: AHashMap<Oid, Arc<dyn ValueCodec>> = AHashMap::new();
        codecs.insert(oids::BOOL, Arc::new(BoolCodec));
        codecs.insert(oids::INT2, Arc::new(Int2Codec));
        codecs.insert(oids::INT4, Arc::new(Int4Codec));
        codecs.insert(oids::INT8, Arc::new(Int8Codec));
        codecs.insert(oids::FLOAT4, Arc::new(Float4Codec));
        codecs.insert(oids::FLOAT8, Arc::new(Float8Codec));
        codecs.insert(oids::TEXT, Arc::new(TextCodec));
        codecs.insert(oids::VARCHAR, Arc::new(TextCodec));
        codecs.insert(oids::BPCHAR, Arc::new(TextCodec));
        codecs.insert(oids::BYTEA, Arc::new(ByteaCodec));
        codecs.insert(oids::NUMERIC, Arc::new(NumericCodec));
        codecs.insert(oids::DATE, Arc::new(DateCodec));
        codecs.insert(oids::TIMESTAMP, Arc::new(TimestampCodec));
        codecs.insert(oids::TIMESTAMPTZ, Arc::new(TimestampTzCodec));
        codecs.insert(oids::UUID, Arc::new(UuidCodec));
        TypeRegistry {
            codecs,
            passthrough: Arc::new(PassthroughCodec),
        }
    }

    /// Register or replace the codec for an OID.
    pub fn extend(&mut self, oid: Oid, codec: Arc<dyn ValueCodec>) {
        self.codecs.insert(oid, codec);
    }

    fn codec(&self, oid: Oid) -> &Arc<dyn ValueCodec> {
        self.codecs.get(&oid).unwrap_or(&self.passthrough)
    }

    pub fn encode(&self, oid: Oid, value: &Value, format: FormatCode) -> Result<BytesMut, Error> {
        self.codec(oid).encode(value, format)
    }

    pub fn decode(&self, oid: Oid, bytes: &[u8], format: FormatCode) -> Result<Value, Error> {
        self.codec(oid).decode(bytes, format)
    }
}

struct PassthroughCodec;

impl ValueCodec for PassthroughCodec {
    fn encode(&self, value: &Value, _format: FormatCode) -> Result<BytesMut, Error> {
        match value {
            Value::Text(text) => Ok(BytesMut::from(text.as_bytes())),
            Value::Bytea(bytes) => Ok(BytesMut::from(&bytes[..])),
            other => Err(mismatch("unknown type", other)),
        }
    }

    fn decode(&self, bytes: &[u8], _format: FormatCode) -> Result<Value, Error> {
        match std::str::from_utf8(bytes) {
            Ok(text) => Ok(Value::Text(text.to_string())),
            Err(_) => Ok(Value::Bytea(bytes.to_vec())),
        }
    }
}

struct BoolCodec;

impl ValueCodec for BoolCodec {
    fn encode(&self, value: &Value, format: FormatCode) -> Result<BytesMut, Error> {
        let v = match value {
            Value::Bool(v) => *v,
            other => return Err(mismatch("boolean", other)),
        };
        Ok(match format {
            FormatCode::Text => BytesMut::from(if v { &b"t"[..] } else { &b"f"[..] }),
            FormatCode::Binary => BytesMut::from(&[v as u8][..]),
        })
    }

    fn decode(&self, bytes: &[u8], format: FormatCode) -> Result<Value, Error> {
        match format {
            FormatCode::Text => match utf8(bytes, "boolean")?.to_ascii_lowercase().as_str() {
                "t" | "true" | "1" | "on" | "yes" => Ok(Value::Bool(true)),
                "f" | "false" | "0" | "off" | "no" => Ok(Value::Bool(false)),
                other => Err(text_err("boolean", other.to_string())),
            },
            FormatCode::Binary => match bytes {
                [0] => Ok(Value::Bool(false)),
                [1] => Ok(Value::Bool(true)),
                _ => Err(binary_err("boolean")),
            },
        }
    }
}

macro_rules! int_codec {
    ($name:ident, $variant:ident, $ty:ty, $pg_name:literal, $put:ident, $get:ident, $width:literal) => {
        struct $name;

        impl ValueCodec for $name {
            fn encode(&self, value: &Value, format: FormatCode) -> Result<BytesMut, Error> {
                let v = match value {
                    Value::$variant(v) => *v,
                    other => return Err(mismatch($pg_name, other)),
                };
                Ok(match format {
                    FormatCode::Text => BytesMut::from(v.to_string().as_bytes()),
                    FormatCode::Binary => {
                        let mut buf = BytesMut::with_capacity($width);
                        buf.$put(v);
                        buf
                    }
                })
            }

            fn decode(&self, bytes: &[u8], format: FormatCode) -> Result<Value, Error> {
                match format {
                    FormatCode::Text => utf8(bytes, $pg_name)?
                        .trim()
                        .parse::<$ty>()
                        .map(Value::$variant)
                        .map_err(|err| text_err($pg_name, err.to_string())),
                    FormatCode::Binary => {
                        if bytes.len() != $width {
                            return Err(binary_err($pg_name));
                        }
                        let mut bytes = bytes;
                        Ok(Value::$variant(bytes.$get()))
                    }
                }
            }
        }
    };
}

int_codec!(Int2Codec, Int2, i16, "smallint", put_i16, get_i16, 2);
int_codec!(Int4Codec, Int4, i32, "integer", put_i32, get_i32, 4);
int_codec!(Int8Codec, Int8, i64, "bigint", put_i64, get_i64, 8);

fn float_to_text(v: f64) -> String {
    if v.is_nan() {
        "NaN".to_string()
    } else if v == f64::INFINITY {
        "Infinity".to_string()
    } else if v == f64::NEG_INFINITY {
        "-Infinity".to_string()
    } else {
        format!("{v}")
    }
}

fn float_from_text(text: &str) -> Option<f64> {
    match text {
        "NaN" => Some(f64::NAN),
        "Infinity" | "inf" => Some(f64::INFINITY),
        "-Infinity" | "-inf" => Some(f64::NEG_INFINITY),
        other => other.trim().parse().ok(),
    }
}

struct Float4Codec;

impl ValueCodec for Float4Codec {
    fn encode(&self, value: &Value, format: FormatCode) -> Result<BytesMut, Error> {
        let v = match value {
            Value::Float4(v) => *v,
            other => return Err(mismatch("real", other)),
        };
        Ok(match format {
            FormatCode::Text => {
                // Format at f32 precision; going through f64 would print
                // the widened mantissa.
                let text = if v.is_nan() {
                    "NaN".to_string()
                } else if v == f32::INFINITY {
                    "Infinity".to_string()
                } else if v == f32::NEG_INFINITY {
                    "-Infinity".to_string()
                } else {
                    format!("{v}")
                };
                BytesMut::from(text.as_bytes())
            }
            FormatCode::Binary => {
                let mut buf = BytesMut::with_capacity(4);
                buf.put_f32(v);
                buf
            }
        })
    }

    fn decode(&self, bytes: &[u8], format: FormatCode) -> Result<Value, Error> {
        match format {
            FormatCode::Text => {
                let text = utf8(bytes, "real")?;
                match text {
                    "NaN" => Ok(Value::Float4(f32::NAN)),
                    "Infinity" | "inf" => Ok(Value::Float4(f32::INFINITY)),
                    "-Infinity" | "-inf" => Ok(Value::Float4(f32::NEG_INFINITY)),
                    other => other
                        .trim()
                        .parse::<f32>()
                        .map(Value::Float4)
                        .map_err(|err| text_err("real", err.to_string())),
                }
            }
            FormatCode::Binary => {
                if bytes.len() != 4 {
                    return Err(binary_err("real"));
                }
                let mut bytes = bytes;
                Ok(Value::Float4(bytes.get_f32()))
            }
        }
    }
}

struct Float8Codec;

impl ValueCodec for Float8Codec {
    fn encode(&self, value: &Value, format: FormatCode) -> Result<BytesMut, Error> {
        let v = match value {
            Value::Float8(v) => *v,
            other => return Err(mismatch("double precision", other)),
        };
        Ok(match format {
            FormatCode::Text => BytesMut::from(float_to_text(v).as_bytes()),
            FormatCode::Binary => {
                let mut buf = BytesMut::with_capacity(8);
                buf.put_f64(v);
                buf
            }
        })
    }

    fn decode(&self, bytes: &[u8], format: FormatCode) -> Result<Value, Error> {
        match format {
            FormatCode::Text => {
                let text = utf8(bytes, "double precision")?;
                float_from_text(text)
                    .map(Value::Float8)
                    .ok_or_else(|| text_err("double precision", text.to_string()))
            }
            FormatCode::Binary => {
                if bytes.len() != 8 {
                    return Err(binary_err("double precision"));
                }
                let mut bytes = bytes;
                Ok(Value::Float8(bytes.get_f64()))
            }
        }
    }
}

struct TextCodec;

impl ValueCodec for TextCodec {
    fn encode(&self, value: &Value, _format: FormatCode) -> Result<BytesMut, Error> {
        match value {
            Value::Text(text) => Ok(BytesMut::from(text.as_bytes())),
            other => Err(mismatch("text", other)),
        }
    }

    fn decode(&self, bytes: &[u8], _format: FormatCode) -> Result<Value, Error> {
        Ok(Value::Text(utf8(bytes, "text")?.to_string()))
    }
}

struct ByteaCodec;

impl ValueCodec for ByteaCodec {
    fn encode(&self, value: &Value, format: FormatCode) -> Result<BytesMut, Error> {
        let v = match value {
            Value::Bytea(v) => v,
            other => return Err(mismatch("bytea", other)),
        };
        Ok(match format {
            FormatCode::Text => {
                let mut out = BytesMut::with_capacity(2 + v.len() * 2);
                out.put_slice(b"\\x");
                for byte in v {
                    out.put_slice(format!("{byte:02x}").as_bytes());
                }
                out
            }
            FormatCode::Binary => BytesMut::from(&v[..]),
        })
    }

    fn decode(&self, bytes: &[u8], format: FormatCode) -> Result<Value, Error> {
        match format {
            FormatCode::Text => {
                let text = utf8(bytes, "bytea")?;
                let hex = text
                    .strip_prefix("\\x")
                    .ok_or_else(|| text_err("bytea", "expected \\x-prefixed hex"))?;
                if hex.len() % 2 != 0 {
                    return Err(text_err("bytea", "odd number of hex digits"));
                }
                let mut out = Vec::with_capacity(hex.len() / 2);
                for chunk in hex.as_bytes().chunks(2) {
                    let pair = std::str::from_utf8(chunk).unwrap();
                    let byte = u8::from_str_radix(pair, 16)
                        .map_err(|_| text_err("bytea", format!("bad hex pair {pair:?}")))?;
                    out.push(byte);
                }
                Ok(Value::Bytea(out))
            }
            FormatCode::Binary => Ok(Value::Bytea(bytes.to_vec())),
        }
    }
}

const NUMERIC_POS: u16 = 0x0000;
const NUMERIC_NEG: u16 = 0x4000;
const NUMERIC_NAN: u16 = 0xC000;

/// Validate a decimal string: optional sign, digits, optional fraction.
fn validate_numeric_text(text: &str) -> Result<(), Error> {
    let t = text.trim();
    if t.eq_ignore_ascii_case("nan") {
        return Ok(());
    }
    let unsigned = t.strip_prefix(['-', '+']).unwrap_or(t);
    let (int_part, frac_part) = match unsigned.split_once('.') {
        Some((i, f)) => (i, f),
        None => (unsigned, ""),
    };
    let all_digits =
        |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    if (all_digits(int_part) && (frac_part.is_empty() || all_digits(frac_part)))
        || (int_part.is_empty() && all_digits(frac_part))
    {
        Ok(())
    } else {
        Err(text_err("numeric", text.to_string()))
    }
}

fn numeric_text_to_binary(text: &str) -> Result<BytesMut, Error> {
    validate_numeric_text(text)?;
    let t = text.trim();

    let mut out = BytesMut::with_capacity(16);
    if t.eq_ignore_ascii_case("nan") {
        out.put_i16(0);
        out.put_i16(0);
        out.put_u16(NUMERIC_NAN);
        out.put_i16(0);
        return Ok(out);
    }

    let (sign, unsigned) = match t.strip_prefix('-') {
        Some(rest) => (NUMERIC_NEG, rest),
        None => (NUMERIC_POS, t.strip_prefix('+').unwrap_or(t)),
    };
    let (int_part, frac_part) = match unsigned.split_once('.') {
        Some((i, f)) => (i, f),
        None => (unsigned, ""),
    };
    let int_part = int_part.trim_start_matches('0');
    let dscale = frac_part.len() as i16;

    // Align both sides to base-10000 groups.
    let mut digits_str = String::new();
    let lead_pad = (4 - int_part.len() % 4) % 4;
    digits_str.extend(std::iter::repeat('0').take(lead_pad));
    digits_str.push_str(int_part);
    let int_groups = digits_str.len() / 4;
    digits_str.push_str(frac_part);
    let tail_pad = (4 - digits_str.len() % 4) % 4;
    digits_str.extend(std::iter::repeat('0').take(tail_pad));

    let mut groups: Vec<u16> = digits_str
        .as_bytes()
        .chunks(4)
        .map(|chunk| std::str::from_utf8(chunk).unwrap().parse::<u16>().unwrap())
        .collect();

    let mut weight = int_groups as i16 - 1;
    // Strip zero groups off both ends; leading strips shift the weight.
    let mut start = 0;
    while start < groups.len() && groups[start] == 0 {
        start += 1;
        weight -= 1;
    }
    groups.drain(..start);
    while groups.last() == Some(&0) {
        groups.pop();
    }
    if groups.is_empty() {
        weight = 0;
    }

    out.put_i16(groups.len() as i16);
    out.put_i16(weight);
    out.put_u16(sign);
    out.put_i16(dscale);
    for group in groups {
        out.put_u16(group);
    }
    Ok(out)
}

fn numeric_binary_to_text(mut bytes: &[u8]) -> Result<String, Error> {
    if bytes.len() < 8 {
        return Err(binary_err("numeric"));
    }
    let ndigits = bytes.get_i16();
    let weight = bytes.get_i16();
    let sign = bytes.get_u16();
    let dscale = bytes.get_i16();
    if ndigits < 0 || bytes.len() != ndigits as usize * 2 {
        return Err(binary_err("numeric"));
    }
    if sign == NUMERIC_NAN {
        return Ok("NaN".to_string());
    }

    let mut groups = Vec::with_capacity(ndigits as usize);
    for _ in 0..ndigits {
        let group = bytes.get_u16();
        if group > 9999 {
            return Err(binary_err("numeric"));
        }
        groups.push(group);
    }

    let mut int_str = String::new();
    if weight >= 0 {
        for i in 0..=weight as usize {
            let group = groups.get(i).copied().unwrap_or(0);
            if int_str.is_empty() {
                int_str.push_str(&group.to_string());
            } else {
                int_str.push_str(&format!("{group:04}"));
            }
        }
    } else {
        int_str.push('0');
    }

    let mut text = String::new();
    if sign == NUMERIC_NEG {
        text.push('-');
    }
    text.push_str(&int_str);

    if dscale > 0 {
        let mut frac_str = String::new();
        if weight < -1 {
            frac_str.extend(std::iter::repeat('0').take((-1 - weight) as usize * 4));
        }
        let frac_start = (weight + 1).max(0) as usize;
        for group in groups.iter().skip(frac_start) {
            frac_str.push_str(&format!("{group:04}"));
        }
        frac_str.truncate(dscale as usize);
        while frac_str.len() < dscale as usize {
            frac_str.push('0');
        }
        text.push('.');
        text.push_str(&frac_str);
    }
    Ok(text)
}

struct NumericCodec;

impl ValueCodec for NumericCodec {
    fn encode(&self, value: &Value, format: FormatCode) -> Result<BytesMut, Error> {
        let text = match value {
            Value::Numeric(text) => text,
            other => return Err(mismatch("numeric", other)),
        };
        match format {
            FormatCode::Text => {
                validate_numeric_text(text)?;
                Ok(BytesMut::from(text.trim().as_bytes()))
            }
            FormatCode::Binary => numeric_text_to_binary(text),
        }
    }

    fn decode(&self, bytes: &[u8], format: FormatCode) -> Result<Value, Error> {
        match format {
            FormatCode::Text => {
                let text = utf8(bytes, "numeric")?;
                validate_numeric_text(text)?;
                Ok(Value::Numeric(text.trim().to_string()))
            }
            FormatCode::Binary => Ok(Value::Numeric(numeric_binary_to_text(bytes)?)),
        }
    }
}

fn pg_epoch_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2000, 1, 1).unwrap()
}

fn pg_epoch_datetime() -> NaiveDateTime {
    pg_epoch_date().and_hms_opt(0, 0, 0).unwrap()
}

fn format_timestamp(ts: &NaiveDateTime) -> String {
    // Canonical form drops a zero fraction entirely.
    if ts.and_utc().timestamp_subsec_micros() == 0 {
        ts.format("%Y-%m-%d %H:%M:%S").to_string()
    } else {
        ts.format("%Y-%m-%d %H:%M:%S%.6f")
            .to_string()
            .trim_end_matches('0')
            .to_string()
    }
}

struct DateCodec;

impl ValueCodec for DateCodec {
    fn encode(&self, value: &Value, format: FormatCode) -> Result<BytesMut, Error> {
        let v = match value {
            Value::Date(v) => *v,
            other => return Err(mismatch("date", other)),
        };
        Ok(match format {
            FormatCode::Text => BytesMut::from(v.format("%Y-%m-%d").to_string().as_bytes()),
            FormatCode::Binary => {
                let days = (v - pg_epoch_date()).num_days() as i32;
                let mut buf = BytesMut::with_capacity(4);
                buf.put_i32(days);
                buf
            }
        })
    }

    fn decode(&self, bytes: &[u8], format: FormatCode) -> Result<Value, Error> {
        match format {
            FormatCode::Text => {
                let text = utf8(bytes, "date")?;
                NaiveDate::parse_from_str(text.trim(), "%Y-%m-%d")
                    .map(Value::Date)
                    .map_err(|err| text_err("date", err.to_string()))
            }
            FormatCode::Binary => {
                if bytes.len() != 4 {
                    return Err(binary_err("date"));
                }
                let mut bytes = bytes;
                let days = bytes.get_i32();
                pg_epoch_date()
                    .checked_add_signed(Duration::days(days as i64))
                    .map(Value::Date)
                    .ok_or_else(|| binary_err("date"))
            }
        }
    }
}

struct TimestampCodec;

impl ValueCodec for TimestampCodec {
    fn encode(&self, value: &Value, format: FormatCode) -> Result<BytesMut, Error> {
        let v = match value {
            Value::Timestamp(v) => *v,
            other => return Err(mismatch("timestamp", other)),
        };
        Ok(match format {
            FormatCode::Text => BytesMut::from(format_timestamp(&v).as_bytes()),
            FormatCode::Binary => {
                let micros = (v - pg_epoch_datetime())
                    .num_microseconds()
                    .ok_or_else(|| mismatch("timestamp", value))?;
                let mut buf = BytesMut::with_capacity(8);
                buf.put_i64(micros);
                buf
            }
        })
    }

    fn decode(&self, bytes: &[u8], format: FormatCode) -> Result<Value, Error> {
        match format {
            FormatCode::Text => {
                let text = utf8(bytes, "timestamp")?;
                NaiveDateTime::parse_from_str(text.trim(), "%Y-%m-%d %H:%M:%S%.f")
                    .map(Value::Timestamp)
                    .map_err(|err| text_err("timestamp", err.to_string()))
            }
            FormatCode::Binary => {
                if bytes.len() != 8 {
                    return Err(binary_err("timestamp"));
                }
                let mut bytes = bytes;
                let micros = bytes.get_i64();
                pg_epoch_datetime()
                    .checked_add_signed(Duration::microseconds(micros))
                    .map(Value::Timestamp)
                    .ok_or_else(|| binary_err("timestamp"))
            }
        }
    }
}

struct TimestampTzCodec;

impl ValueCodec for TimestampTzCodec {
    fn encode(&self, value: &Value, format: FormatCode) -> Result<BytesMut, Error> {
        let v = match value {
            Value::TimestampTz(v) => *v,
            other => return Err(mismatch("timestamptz", other)),
        };
        Ok(match format {
            FormatCode::Text => {
                let mut text = format_timestamp(&v.naive_utc());
                text.push_str("+00");
                BytesMut::from(text.as_bytes())
            }
            FormatCode::Binary => {
                let micros = (v.naive_utc() - pg_epoch_datetime())
                    .num_microseconds()
                    .ok_or_else(|| mismatch("timestamptz", value))?;
                let mut buf = BytesMut::with_capacity(8);
                buf.put_i64(micros);
                buf
            }
        })
    }

    fn decode(&self, bytes: &[u8], format: FormatCode) -> Result<Value, Error> {
        match format {
            FormatCode::Text => {
                let text = utf8(bytes, "timestamptz")?;
                let trimmed = text.trim();
                DateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S%.f%#z")
                    .or_else(|_| DateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S%.f%:z"))
                    .map(|ts| Value::TimestampTz(ts.with_timezone(&Utc)))
                    .map_err(|err| text_err("timestamptz", err.to_string()))
            }
            FormatCode::Binary => {
                if bytes.len() != 8 {
                    return Err(binary_err("timestamptz"));
                }
                let mut bytes = bytes;
                let micros = bytes.get_i64();
                pg_epoch_datetime()
                    .checked_add_signed(Duration::microseconds(micros))
                    .map(|ts| Value::TimestampTz(ts.and_utc()))
                    .ok_or_else(|| binary_err("timestamptz"))
            }
        }
    }
}

struct UuidCodec;

impl ValueCodec for UuidCodec {
    fn encode(&self, value: &Value, format: FormatCode) -> Result<BytesMut, Error> {
        let v = match value {
            Value::Uuid(v) => v,
            other => return Err(mismatch("uuid", other)),
        };
        Ok(match format {
            FormatCode::Text => {
                let hex: String = v.iter().map(|b| format!("{b:02x}")).collect();
                let text = format!(
                    "{}-{}-{}-{}-{}",
                    &hex[0..8],
                    &hex[8..12],
                    &hex[12..16],
                    &hex[16..20],
                    &hex[20..32]
                );
                BytesMut::from(text.as_bytes())
            }
            FormatCode::Binary => BytesMut::from(&v[..]),
        })
    }

    fn decode(&self, bytes: &[u8], format: FormatCode) -> Result<Value, Error> {
        match format {
            FormatCode::Text => {
                let text = utf8(bytes, "uuid")?.trim().to_ascii_lowercase();
                let hex: String = text.chars().filter(|c| *c != '-').collect();
                if hex.len() != 32 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
                    return Err(text_err("uuid", text));
                }
                let mut out = [0u8; 16];
                for (i, chunk) in hex.as_bytes().chunks(2).enumerate() {
                    let pair = std::str::from_utf8(chunk).unwrap();
                    out[i] = u8::from_str_radix(pair, 16).unwrap();
                }
                Ok(Value::Uuid(out))
            }
            FormatCode::Binary => {
                let v: [u8; 16] = bytes.try_into().map_err(|_| binary_err("uuid"))?;
                Ok(Value::Uuid(v))
            }
        }
    }
}
