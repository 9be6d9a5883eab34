//! Builders for the backend half of the conversation, plus the startup
//! parameter parser and the socket write helpers.

use std::collections::HashMap;

use bytes::{Buf, BufMut, BytesMut};
use md5::{Digest, Md5};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::errors::{Error, ErrorInfo};
use crate::messages::builder::MessageBuilder;
use crate::messages::constants::*;
use crate::types::{Column, FormatCode, Oid};

/// Write a buffer to the stream without flushing.
pub async fn write_all<S>(stream: &mut S, buf: &[u8]) -> Result<(), Error>
where
    S: AsyncWrite + Unpin,
{
    stream
        .write_all(buf)
        .await
        .map_err(|err| Error::SocketError(format!("failed to write to socket: {err}")))
}

/// Write a buffer and flush the stream.
pub async fn write_all_flush<S>(stream: &mut S, buf: &[u8]) -> Result<(), Error>
where
    S: AsyncWrite + Unpin,
{
    write_all(stream, buf).await?;
    stream
        .flush()
        .await
        .map_err(|err| Error::SocketError(format!("failed to flush socket: {err}")))
}

/// AuthenticationOk.
pub fn auth_ok() -> BytesMut {
    let mut builder = MessageBuilder::new();
    builder.start(MSG_AUTHENTICATION).put_i32(AUTH_OK).finish();
    builder.into_bytes()
}

/// AuthenticationCleartextPassword challenge.
pub fn cleartext_password_challenge() -> BytesMut {
    let mut builder = MessageBuilder::new();
    builder
        .start(MSG_AUTHENTICATION)
        .put_i32(AUTH_CLEARTEXT_PASSWORD)
        .finish();
    builder.into_bytes()
}

/// AuthenticationMD5Password challenge carrying the per-connection salt.
pub fn md5_challenge(salt: &[u8; 4]) -> BytesMut {
    let mut builder = MessageBuilder::new();
    builder
        .start(MSG_AUTHENTICATION)
        .put_i32(AUTH_MD5_PASSWORD)
        .put_bytes(salt)
        .finish();
    builder.into_bytes()
}

/// First pass of the MD5 scheme: `md5(password + user)` as lowercase hex.
pub fn md5_hash_password(user: &str, password: &str) -> String {
    let mut md5 = Md5::new();
    md5.update(password.as_bytes());
    md5.update(user.as_bytes());
    format!("{:x}", md5.finalize())
}

/// Second pass: `"md5" + md5(first_pass_hex + salt)`, which is what the
/// client sends back in its PasswordMessage.
pub fn md5_hash_second_pass(hash: &str, salt: &[u8]) -> String {
    let mut md5 = Md5::new();
    md5.update(hash.as_bytes());
    md5.update(salt);
    format!("md5{:x}", md5.finalize())
}

/// ParameterStatus.
pub fn parameter_status(key: &str, value: &str) -> BytesMut {
    let mut builder = MessageBuilder::new();
    builder
        .start(MSG_PARAMETER_STATUS)
        .put_cstr(key)
        .put_cstr(value)
        .finish();
    builder.into_bytes()
}

/// BackendKeyData.
pub fn backend_key_data(process_id: i32, secret_key: i32) -> BytesMut {
    let mut builder = MessageBuilder::new();
    builder
        .start(MSG_BACKEND_KEY_DATA)
        .put_i32(process_id)
        .put_i32(secret_key)
        .finish();
    builder.into_bytes()
}

/// ReadyForQuery with the given transaction-status indicator.
pub fn ready_for_query(status: TransactionStatus) -> BytesMut {
    let mut builder = MessageBuilder::new();
    builder
        .start(MSG_READY_FOR_QUERY)
        .put_u8(status.as_byte())
        .finish();
    builder.into_bytes()
}

/// CommandComplete with the given tag.
pub fn command_complete(tag: &str) -> BytesMut {
    let mut builder = MessageBuilder::new();
    builder.start(MSG_COMMAND_COMPLETE).put_cstr(tag).finish();
    builder.into_bytes()
}

pub fn empty_query_response() -> BytesMut {
    let mut builder = MessageBuilder::new();
    builder.start(MSG_EMPTY_QUERY_RESPONSE).finish();
    builder.into_bytes()
}

pub fn parse_complete() -> BytesMut {
    let mut builder = MessageBuilder::new();
    builder.start(MSG_PARSE_COMPLETE).finish();
    builder.into_bytes()
}

pub fn bind_complete() -> BytesMut {
    let mut builder = MessageBuilder::new();
    builder.start(MSG_BIND_COMPLETE).finish();
    builder.into_bytes()
}

pub fn close_complete() -> BytesMut {
    let mut builder = MessageBuilder::new();
    builder.start(MSG_CLOSE_COMPLETE).finish();
    builder.into_bytes()
}

pub fn no_data() -> BytesMut {
    let mut builder = MessageBuilder::new();
    builder.start(MSG_NO_DATA).finish();
    builder.into_bytes()
}

pub fn portal_suspended() -> BytesMut {
    let mut builder = MessageBuilder::new();
    builder.start(MSG_PORTAL_SUSPENDED).finish();
    builder.into_bytes()
}

/// RowDescription. When `formats` is shorter than the column list the last
/// resolved code applies; an empty slice means text everywhere.
pub fn row_description(columns: &[Column], formats: &[FormatCode]) -> BytesMut {
    let mut builder = MessageBuilder::new();
    builder
        .start(MSG_ROW_DESCRIPTION)
        .put_i16(columns.len() as i16);
    for (index, column) in columns.iter().enumerate() {
        let format = formats
            .get(index)
            .or_else(|| formats.last())
            .copied()
            .unwrap_or(FormatCode::Text);
        builder
            .put_cstr(&column.name)
            .put_i32(column.table_oid as i32)
            .put_i16(column.attr_number)
            .put_i32(column.type_oid as i32)
            .put_i16(column.type_size)
            .put_i32(column.type_modifier)
            .put_i16(format as i16);
    }
    builder.finish();
    builder.into_bytes()
}

/// ParameterDescription listing the declared parameter OIDs.
pub fn parameter_description(oids: &[Oid]) -> BytesMut {
    let mut builder = MessageBuilder::new();
    builder
        .start(MSG_PARAMETER_DESCRIPTION)
        .put_i16(oids.len() as i16);
    for oid in oids {
        builder.put_i32(*oid as i32);
    }
    builder.finish();
    builder.into_bytes()
}

/// DataRow from already-encoded column values; `None` is the null column
/// (length -1 on the wire).
pub fn data_row(values: &[Option<BytesMut>]) -> BytesMut {
    let mut builder = MessageBuilder::new();
    builder.start(MSG_DATA_ROW).put_i16(values.len() as i16);
    for value in values {
        match value {
            Some(bytes) => {
                builder.put_i32(bytes.len() as i32).put_bytes(bytes);
            }
            None => {
                builder.put_i32(-1);
            }
        }
    }
    builder.finish();
    builder.into_bytes()
}

fn error_fields(builder: &mut MessageBuilder, info: &ErrorInfo) {
    builder
        .put_u8(b'S')
        .put_cstr(info.severity.as_str())
        .put_u8(b'V')
        .put_cstr(info.severity.as_str())
        .put_u8(b'C')
        .put_cstr(&info.code)
        .put_u8(b'M')
        .put_cstr(&info.message);
    if let Some(detail) = &info.detail {
        builder.put_u8(b'D').put_cstr(detail);
    }
    if let Some(hint) = &info.hint {
        builder.put_u8(b'H').put_cstr(hint);
    }
    builder.put_u8(0);
}

/// ErrorResponse from wire metadata.
pub fn error_response(info: &ErrorInfo) -> BytesMut {
    let mut builder = MessageBuilder::new();
    builder.start(MSG_ERROR_RESPONSE);
    error_fields(&mut builder, info);
    builder.finish();
    builder.into_bytes()
}

/// NoticeResponse: the same field layout under the 'N' type byte.
pub fn notice_response(info: &ErrorInfo) -> BytesMut {
    let mut builder = MessageBuilder::new();
    builder.start(MSG_NOTICE_RESPONSE);
    error_fields(&mut builder, info);
    builder.finish();
    builder.into_bytes()
}

fn copy_response(message_type: u8, binary: bool, column_count: i16) -> BytesMut {
    let mut builder = MessageBuilder::new();
    builder
        .start(message_type)
        .put_u8(binary as u8)
        .put_i16(column_count);
    let column_format: i16 = binary as i16;
    for _ in 0..column_count {
        builder.put_i16(column_format);
    }
    builder.finish();
    builder.into_bytes()
}

/// CopyInResponse declaring the overall format and one format per column.
pub fn copy_in_response(binary: bool, column_count: i16) -> BytesMut {
    copy_response(MSG_COPY_IN_RESPONSE, binary, column_count)
}

/// CopyOutResponse, symmetric to [`copy_in_response`].
pub fn copy_out_response(binary: bool, column_count: i16) -> BytesMut {
    copy_response(MSG_COPY_OUT_RESPONSE, binary, column_count)
}

/// CopyData wrapping an opaque chunk of the stream.
pub fn copy_data(payload: &[u8]) -> BytesMut {
    let mut builder = MessageBuilder::new();
    builder.start(MSG_COPY_DATA).put_bytes(payload).finish();
    builder.into_bytes()
}

pub fn copy_done() -> BytesMut {
    let mut builder = MessageBuilder::new();
    builder.start(MSG_COPY_DONE).finish();
    builder.into_bytes()
}

/// Parse nul-terminated key/value pairs out of a startup payload.
pub fn parse_params(mut bytes: BytesMut) -> Result<HashMap<String, String>, Error> {
    let mut strings = Vec::new();
    let mut current = Vec::new();

    while bytes.has_remaining() {
        let c = bytes.get_u8();
        if c == 0 {
            if current.is_empty() {
                break; // final terminator
            }
            let value = String::from_utf8(std::mem::take(&mut current))
                .map_err(|_| Error::BadStartup)?;
            strings.push(value);
        } else {
            current.push(c);
        }
    }

    if strings.len() % 2 != 0 {
        return Err(Error::BadStartup);
    }

    let mut result = HashMap::new();
    let mut iter = strings.into_iter();
    while let (Some(key), Some(value)) = (iter.next(), iter.next()) {
        result.insert(key, value);
    }
    Ok(result)
}

/// Parse StartupMessage parameters. The protocol makes `user` mandatory.
pub fn parse_startup(bytes: BytesMut) -> Result<HashMap<String, String>, Error> {
    let result = parse_params(bytes)?;
    if !result.contains_key("user") {
        return Err(Error::BadStartup);
    }
    Ok(result)
}
