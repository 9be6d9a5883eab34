//! Protocol literals shared across the crate.

/// Protocol version 3.0 as sent in the startup message.
pub const PROTOCOL_VERSION_NUMBER: i32 = 196608;

/// Magic startup codes that arrive instead of a protocol version.
pub const SSL_REQUEST_CODE: i32 = 80877103;
pub const CANCEL_REQUEST_CODE: i32 = 80877102;
pub const REQUEST_GSSENCMODE_CODE: i32 = 80877104;

// Frontend message type bytes.
pub const MSG_QUERY: u8 = b'Q';
pub const MSG_PARSE: u8 = b'P';
pub const MSG_BIND: u8 = b'B';
pub const MSG_DESCRIBE: u8 = b'D';
pub const MSG_EXECUTE: u8 = b'E';
pub const MSG_CLOSE: u8 = b'C';
pub const MSG_SYNC: u8 = b'S';
pub const MSG_FLUSH: u8 = b'H';
pub const MSG_TERMINATE: u8 = b'X';
pub const MSG_PASSWORD: u8 = b'p';
pub const MSG_COPY_DATA: u8 = b'd';
pub const MSG_COPY_DONE: u8 = b'c';
pub const MSG_COPY_FAIL: u8 = b'f';

// Backend message type bytes.
pub const MSG_AUTHENTICATION: u8 = b'R';
pub const MSG_PARAMETER_STATUS: u8 = b'S';
pub const MSG_BACKEND_KEY_DATA: u8 = b'K';
pub const MSG_READY_FOR_QUERY: u8 = b'Z';
pub const MSG_PARSE_COMPLETE: u8 = b'1';
pub const MSG_BIND_COMPLETE: u8 = b'2';
pub const MSG_CLOSE_COMPLETE: u8 = b'3';
pub const MSG_ROW_DESCRIPTION: u8 = b'T';
pub const MSG_PARAMETER_DESCRIPTION: u8 = b't';
pub const MSG_NO_DATA: u8 = b'n';
pub const MSG_DATA_ROW: u8 = b'D';
pub const MSG_COMMAND_COMPLETE: u8 = b'C';
pub const MSG_EMPTY_QUERY_RESPONSE: u8 = b'I';
pub const MSG_PORTAL_SUSPENDED: u8 = b's';
pub const MSG_ERROR_RESPONSE: u8 = b'E';
pub const MSG_NOTICE_RESPONSE: u8 = b'N';
pub const MSG_COPY_IN_RESPONSE: u8 = b'G';
pub const MSG_COPY_OUT_RESPONSE: u8 = b'H';

// AuthenticationRequest sub-codes.
pub const AUTH_OK: i32 = 0;
pub const AUTH_CLEARTEXT_PASSWORD: i32 = 3;
pub const AUTH_MD5_PASSWORD: i32 = 5;

/// Transaction-status indicator carried by ReadyForQuery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    Idle,
    InTransaction,
    Failed,
}

impl TransactionStatus {
    pub fn as_byte(&self) -> u8 {
        match self {
            TransactionStatus::Idle => b'I',
            TransactionStatus::InTransaction => b'T',
            TransactionStatus::Failed => b'E',
        }
    }
}

/// Default cap on a single frontend message payload (matches the PostgreSQL
/// backend's own limit).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 256 * 1024 * 1024;

/// Startup messages are tiny; anything bigger than this is garbage.
pub const MAX_STARTUP_SIZE: i32 = 8 * 1024;

/// Signature that opens a COPY BINARY stream.
pub const COPY_BINARY_SIGNATURE: [u8; 11] = *b"PGCOPY\n\xff\r\n\0";
