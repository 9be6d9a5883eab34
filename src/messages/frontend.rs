//! Parsers for the frontend messages the command loop dispatches on.

use bytes::{Buf, Bytes, BytesMut};

use crate::errors::Error;
use crate::types::Oid;

fn read_cstr(bytes: &mut BytesMut) -> Result<String, Error> {
    let nul = bytes
        .iter()
        .position(|b| *b == 0)
        .ok_or_else(|| Error::ProtocolViolation("string is not nul-terminated".into()))?;
    let raw = bytes.split_to(nul);
    bytes.advance(1);
    String::from_utf8(raw.to_vec())
        .map_err(|_| Error::ProtocolViolation("string is not valid utf-8".into()))
}

fn ensure_remaining(bytes: &BytesMut, needed: usize, what: &str) -> Result<(), Error> {
    if bytes.remaining() < needed {
        return Err(Error::ProtocolViolation(format!("truncated {what} message")));
    }
    Ok(())
}

/// Parse ('P'): statement name, query text, declared parameter OIDs.
#[derive(Debug)]
pub struct ParseMessage {
    pub name: String,
    pub query: String,
    pub parameter_oids: Vec<Oid>,
}

impl ParseMessage {
    pub fn parse(mut payload: BytesMut) -> Result<Self, Error> {
        let name = read_cstr(&mut payload)?;
        let query = read_cstr(&mut payload)?;
        ensure_remaining(&payload, 2, "Parse")?;
        let count = payload.get_i16();
        if count < 0 {
            return Err(Error::ProtocolViolation("negative parameter count in Parse".into()));
        }
        ensure_remaining(&payload, count as usize * 4, "Parse")?;
        let mut parameter_oids = Vec::with_capacity(count as usize);
        for _ in 0..count {
            parameter_oids.push(payload.get_i32() as Oid);
        }
        Ok(ParseMessage {
            name,
            query,
            parameter_oids,
        })
    }
}

/// Bind ('B'): portal, statement, parameter formats and values, result
/// format codes.
#[derive(Debug)]
pub struct BindMessage {
    pub portal: String,
    pub statement: String,
    pub parameter_formats: Vec<i16>,
    pub parameters: Vec<Option<Bytes>>,
    pub result_formats: Vec<i16>,
}

impl BindMessage {
    pub fn parse(mut payload: BytesMut) -> Result<Self, Error> {
        let portal = read_cstr(&mut payload)?;
        let statement = read_cstr(&mut payload)?;

        ensure_remaining(&payload, 2, "Bind")?;
        let format_count = payload.get_i16();
        if format_count < 0 {
            return Err(Error::ProtocolViolation("negative format count in Bind".into()));
        }
        ensure_remaining(&payload, format_count as usize * 2, "Bind")?;
        let mut parameter_formats = Vec::with_capacity(format_count as usize);
        for _ in 0..format_count {
            parameter_formats.push(payload.get_i16());
        }

        ensure_remaining(&payload, 2, "Bind")?;
        let parameter_count = payload.get_i16();
        if parameter_count < 0 {
            return Err(Error::ProtocolViolation("negative parameter count in Bind".into()));
        }
        let mut parameters = Vec::with_capacity(parameter_count as usize);
        for _ in 0..parameter_count {
            ensure_remaining(&payload, 4, "Bind")?;
            let len = payload.get_i32();
            if len < 0 {
                parameters.push(None);
            } else {
                ensure_remaining(&payload, len as usize, "Bind")?;
                parameters.push(Some(payload.split_to(len as usize).freeze()));
            }
        }

        ensure_remaining(&payload, 2, "Bind")?;
        let result_count = payload.get_i16();
        if result_count < 0 {
            return Err(Error::ProtocolViolation("negative result-format count in Bind".into()));
        }
        ensure_remaining(&payload, result_count as usize * 2, "Bind")?;
        let mut result_formats = Vec::with_capacity(result_count as usize);
        for _ in 0..result_count {
            result_formats.push(payload.get_i16());
        }

        Ok(BindMessage {
            portal,
            statement,
            parameter_formats,
            parameters,
            result_formats,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescribeTarget {
    Statement,
    Portal,
}

/// Describe ('D') and Close ('C') share the same layout: a target byte
/// ('S' or 'P') followed by a name.
#[derive(Debug)]
pub struct TargetMessage {
    pub target: DescribeTarget,
    pub name: String,
}

impl TargetMessage {
    pub fn parse(mut payload: BytesMut) -> Result<Self, Error> {
        ensure_remaining(&payload, 1, "Describe/Close")?;
        let target = match payload.get_u8() {
            b'S' => DescribeTarget::Statement,
            b'P' => DescribeTarget::Portal,
            other => {
                return Err(Error::ProtocolViolation(format!(
                    "unknown describe target {:?}",
                    other as char
                )))
            }
        };
        let name = read_cstr(&mut payload)?;
        Ok(TargetMessage { target, name })
    }
}

/// Execute ('E'): portal name plus the row limit (0 = unlimited).
#[derive(Debug)]
pub struct ExecuteMessage {
    pub portal: String,
    pub max_rows: i32,
}

impl ExecuteMessage {
    pub fn parse(mut payload: BytesMut) -> Result<Self, Error> {
        let portal = read_cstr(&mut payload)?;
        ensure_remaining(&payload, 4, "Execute")?;
        let max_rows = payload.get_i32();
        Ok(ExecuteMessage { portal, max_rows })
    }
}

/// Query ('Q'): the whole simple-query text.
pub fn parse_query(mut payload: BytesMut) -> Result<String, Error> {
    read_cstr(&mut payload)
}

/// CopyFail ('f'): the client's reason for aborting the COPY.
pub fn parse_copy_fail(mut payload: BytesMut) -> Result<String, Error> {
    read_cstr(&mut payload)
}
