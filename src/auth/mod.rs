//! Authentication strategies.
//!
//! A strategy is a value conforming to the `authenticate` capability; the
//! built-ins cover trust, clear-text, MD5 and TLS-certificate admission,
//! and hosts can supply their own. On success the startup sequence writes
//! AuthenticationOk; on failure the connection gets an ErrorResponse with
//! SQLSTATE 28P01 and closes.

use std::collections::HashMap;

use futures::future::BoxFuture;
use tokio::io::AsyncWrite;

use crate::copy::FrameSource;
use crate::errors::Error;
use crate::messages::constants::MSG_PASSWORD;
use crate::messages::protocol::{
    cleartext_password_challenge, md5_challenge, md5_hash_second_pass, write_all_flush,
};

/// The conversation a strategy drives: challenge writes, the password
/// response read, and the startup facts it may decide on.
pub struct AuthExchange<'a> {
    pub(crate) source: &'a mut dyn FrameSource,
    pub(crate) write: &'a mut (dyn AsyncWrite + Send + Unpin),
    pub(crate) startup_parameters: &'a HashMap<String, String>,
    pub(crate) tls: bool,
}

impl AuthExchange<'_> {
    /// The user name from the startup message (mandatory by the protocol).
    pub fn username(&self) -> &str {
        self.startup_parameters
            .get("user")
            .map(String::as_str)
            .unwrap_or_default()
    }

    pub fn startup_parameter(&self, key: &str) -> Option<&str> {
        self.startup_parameters.get(key).map(String::as_str)
    }

    pub fn is_tls(&self) -> bool {
        self.tls
    }

    /// Send a raw challenge frame and flush.
    pub async fn send(&mut self, frame: &[u8]) -> Result<(), Error> {
        write_all_flush(&mut self.write, frame).await
    }

    /// Read the client's PasswordMessage ('p') and return its payload
    /// without the trailing nul.
    pub async fn read_password(&mut self) -> Result<String, Error> {
        let (code, payload) = self
            .source
            .next_frame()
            .await?
            .ok_or_else(|| Error::SocketError("connection closed during authentication".into()))?;
        if code != MSG_PASSWORD {
            return Err(Error::ProtocolViolation(format!(
                "expected password message (p), received {:?}",
                code as char
            )));
        }
        let end = payload
            .iter()
            .position(|b| *b == 0)
            .unwrap_or(payload.len());
        String::from_utf8(payload[..end].to_vec())
            .map_err(|_| Error::ProtocolViolation("password is not valid utf-8".into()))
    }
}

pub trait AuthStrategy: Send + Sync {
    fn authenticate<'a, 'b>(
        &'a self,
        exchange: &'a mut AuthExchange<'b>,
    ) -> BoxFuture<'a, Result<(), Error>>;
}

fn invalid_password(user: &str) -> Error {
    Error::AuthenticationFailed(format!(
        "password authentication failed for user \"{user}\""
    ))
}

/// No authentication: every startup is admitted.
pub struct Trust;

impl AuthStrategy for Trust {
    fn authenticate<'a, 'b>(
        &'a self,
        _exchange: &'a mut AuthExchange<'b>,
    ) -> BoxFuture<'a, Result<(), Error>> {
        Box::pin(async { Ok(()) })
    }
}

/// Clear-text passwords checked by a host callback.
pub struct CleartextPassword {
    verify: Box<dyn Fn(&str, &str) -> bool + Send + Sync>,
}

impl CleartextPassword {
    /// `verify(user, password)` decides admission.
    pub fn new(verify: impl Fn(&str, &str) -> bool + Send + Sync + 'static) -> Self {
        CleartextPassword {
            verify: Box::new(verify),
        }
    }
}

impl AuthStrategy for CleartextPassword {
    fn authenticate<'a, 'b>(
        &'a self,
        exchange: &'a mut AuthExchange<'b>,
    ) -> BoxFuture<'a, Result<(), Error>> {
        Box::pin(async move {
            exchange.send(&cleartext_password_challenge()).await?;
            let password = exchange.read_password().await?;
            let user = exchange.username().to_string();
            if (self.verify)(&user, &password) {
                Ok(())
            } else {
                Err(invalid_password(&user))
            }
        })
    }
}

/// MD5 challenge/response with a per-connection salt.
///
/// The host lookup returns the stored first-pass hash — lowercase hex of
/// `md5(password + user)`, which is what `pg_authid` keeps without the
/// `md5` prefix. The library salts it and compares the second pass.
pub struct Md5Password {
    lookup: Box<dyn Fn(&str) -> Option<String> + Send + Sync>,
}

impl Md5Password {
    pub fn new(lookup: impl Fn(&str) -> Option<String> + Send + Sync + 'static) -> Self {
        Md5Password {
            lookup: Box::new(lookup),
        }
    }
}

impl AuthStrategy for Md5Password {
    fn authenticate<'a, 'b>(
        &'a self,
        exchange: &'a mut AuthExchange<'b>,
    ) -> BoxFuture<'a, Result<(), Error>> {
        Box::pin(async move {
            let salt: [u8; 4] = rand::random();
            exchange.send(&md5_challenge(&salt)).await?;
            let response = exchange.read_password().await?;
            let user = exchange.username().to_string();

            let stored = match (self.lookup)(&user) {
                Some(stored) => stored,
                None => return Err(invalid_password(&user)),
            };
            let expected = md5_hash_second_pass(&stored, &salt);
            if response == expected {
                Ok(())
            } else {
                Err(invalid_password(&user))
            }
        })
    }
}

/// Admission by client certificate: the TLS handshake is the credential.
/// Plain connections are refused outright.
pub struct CertificateAuth;

impl AuthStrategy for CertificateAuth {
    fn authenticate<'a, 'b>(
        &'a self,
        exchange: &'a mut AuthExchange<'b>,
    ) -> BoxFuture<'a, Result<(), Error>> {
        Box::pin(async move {
            if exchange.is_tls() {
                Ok(())
            } else {
                Err(Error::AuthenticationFailed(
                    "connection requires a TLS client certificate".into(),
                ))
            }
        })
    }
}
