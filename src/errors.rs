//! Errors.

use std::fmt;

/// Severity level attached to an error or notice sent to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Panic,
    Fatal,
    Error,
    Warning,
    Notice,
    Info,
    Log,
    Debug,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Panic => "PANIC",
            Severity::Fatal => "FATAL",
            Severity::Error => "ERROR",
            Severity::Warning => "WARNING",
            Severity::Notice => "NOTICE",
            Severity::Info => "INFO",
            Severity::Log => "LOG",
            Severity::Debug => "DEBUG",
        }
    }

    /// Anything below ERROR is reported as a NoticeResponse and does not
    /// abort the current batch.
    pub fn is_notice(&self) -> bool {
        matches!(
            self,
            Severity::Warning | Severity::Notice | Severity::Info | Severity::Log | Severity::Debug
        )
    }
}

/// The wire-visible part of an error: what ends up in an ErrorResponse or
/// NoticeResponse. Host callbacks can raise these directly; everything else
/// in [`Error`] is mapped onto one before it reaches the client.
#[derive(Debug, Clone)]
pub struct ErrorInfo {
    pub severity: Severity,
    /// SQLSTATE code, five characters.
    pub code: String,
    pub message: String,
    pub detail: Option<String>,
    pub hint: Option<String>,
}

impl ErrorInfo {
    pub fn new(message: impl Into<String>) -> Self {
        ErrorInfo {
            severity: Severity::Error,
            code: sqlstate::INTERNAL_ERROR.to_string(),
            message: message.into(),
            detail: None,
            hint: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = code.into();
        self
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}: {} ({})", self.severity.as_str(), self.message, self.code)
    }
}

impl std::error::Error for ErrorInfo {}

/// SQLSTATE codes the library emits on its own behalf.
pub mod sqlstate {
    /// 08P01 protocol_violation
    pub const PROTOCOL_VIOLATION: &str = "08P01";
    /// 28P01 invalid_password
    pub const INVALID_PASSWORD: &str = "28P01";
    /// 28000 invalid_authorization_specification
    pub const INVALID_AUTHORIZATION: &str = "28000";
    /// 26000 invalid_sql_statement_name
    pub const INVALID_STATEMENT_NAME: &str = "26000";
    /// 34000 invalid_cursor_name
    pub const INVALID_CURSOR_NAME: &str = "34000";
    /// 57014 query_canceled
    pub const QUERY_CANCELED: &str = "57014";
    /// 0A000 feature_not_supported
    pub const FEATURE_NOT_SUPPORTED: &str = "0A000";
    /// 54000 program_limit_exceeded
    pub const PROGRAM_LIMIT_EXCEEDED: &str = "54000";
    /// XX000 internal_error
    pub const INTERNAL_ERROR: &str = "XX000";
}

/// Various errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("socket error: {0}")]
    SocketError(String),
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),
    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(i32),
    #[error("bad startup message")]
    BadStartup,
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),
    #[error("tls negotiation failed: {0}")]
    TlsError(String),
    #[error("message exceeds the configured maximum size")]
    MaxMessageSize,
    #[error("shutting down")]
    ShuttingDown,
    /// A failure raised by a host callback, carrying its wire metadata.
    #[error(transparent)]
    Query(#[from] ErrorInfo),
    /// Internal sentinel: the writer hit the Execute row limit. Handlers
    /// propagate it with `?`; the engine turns it into PortalSuspended.
    #[error("execute row limit reached")]
    ExecutionLimited,
}

impl Error {
    /// A host error with default metadata (SQLSTATE `XX000`, severity ERROR).
    pub fn query(message: impl Into<String>) -> Self {
        Error::Query(ErrorInfo::new(message))
    }

    /// Attach a SQLSTATE code. Non-query errors are promoted to query errors
    /// first so the code sticks.
    pub fn with_code(self, code: impl Into<String>) -> Self {
        Error::Query(self.into_error_info().with_code(code))
    }

    /// Attach a severity level.
    pub fn with_severity(self, severity: Severity) -> Self {
        Error::Query(self.into_error_info().with_severity(severity))
    }

    /// Classify this error into the fields of an ErrorResponse.
    pub fn to_error_info(&self) -> ErrorInfo {
        match self {
            Error::Query(info) => info.clone(),
            Error::ProtocolViolation(message) => {
                ErrorInfo::new(message.clone()).with_code(sqlstate::PROTOCOL_VIOLATION)
            }
            Error::UnsupportedVersion(version) => ErrorInfo::new(format!(
                "unsupported protocol version {version}, server speaks 3.0"
            ))
            .with_code(sqlstate::PROTOCOL_VIOLATION)
            .with_severity(Severity::Fatal),
            Error::BadStartup => ErrorInfo::new("malformed startup message")
                .with_code(sqlstate::PROTOCOL_VIOLATION)
                .with_severity(Severity::Fatal),
            Error::AuthenticationFailed(message) => ErrorInfo::new(message.clone())
                .with_code(sqlstate::INVALID_PASSWORD)
                .with_severity(Severity::Fatal),
            Error::MaxMessageSize => ErrorInfo::new("message exceeds the maximum message size")
                .with_code(sqlstate::PROGRAM_LIMIT_EXCEEDED)
                .with_severity(Severity::Fatal),
            Error::ShuttingDown => ErrorInfo::new("the server is shutting down")
                .with_code("57P01")
                .with_severity(Severity::Fatal),
            other => ErrorInfo::new(other.to_string()),
        }
    }

    fn into_error_info(self) -> ErrorInfo {
        match self {
            Error::Query(info) => info,
            other => other.to_error_info(),
        }
    }

    /// Errors after which the connection cannot continue.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::SocketError(_)
                | Error::UnsupportedVersion(_)
                | Error::BadStartup
                | Error::AuthenticationFailed(_)
                | Error::TlsError(_)
                | Error::MaxMessageSize
                | Error::ShuttingDown
        )
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::SocketError(err.to_string())
    }
}
