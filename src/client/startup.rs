//! Handshake and session establishment: the untyped startup exchange, the
//! SSLRequest fork, authentication, and the setup burst that ends in the
//! first ReadyForQuery.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::{Buf, BytesMut};
use log::{debug, info};
use tokio::io::{split, AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::watch;

use crate::auth::AuthExchange;
use crate::client::core::{Session, SessionContext};
use crate::errors::Error;
use crate::messages::constants::*;
use crate::messages::protocol::{
    auth_ok, backend_key_data, error_response, parse_startup, ready_for_query, write_all,
    write_all_flush,
};
use crate::messages::MessageReader;
use crate::server::config::ServerConfig;

/// What the first frame on a (plain or freshly-encrypted) stream asked for.
pub(crate) enum StartupKind {
    Tls,
    GssEnc,
    Cancel(BytesMut),
    Startup(BytesMut),
}

/// Read the untyped startup frame straight off the stream. No buffering
/// here: a TLS upgrade may follow and must see the raw byte stream.
pub(crate) async fn get_startup<S>(stream: &mut S) -> Result<StartupKind, Error>
where
    S: AsyncRead + Unpin,
{
    let len = match stream.read_i32().await {
        Ok(len) => len,
        Err(_) => return Err(Error::BadStartup),
    };
    if !(8..=MAX_STARTUP_SIZE).contains(&len) {
        return Err(Error::BadStartup);
    }

    let mut payload = BytesMut::zeroed((len - 4) as usize);
    stream
        .read_exact(&mut payload)
        .await
        .map_err(|_| Error::BadStartup)?;

    let code = payload.get_i32();
    match code {
        SSL_REQUEST_CODE => Ok(StartupKind::Tls),
        REQUEST_GSSENCMODE_CODE => Ok(StartupKind::GssEnc),
        CANCEL_REQUEST_CODE => Ok(StartupKind::Cancel(payload)),
        PROTOCOL_VERSION_NUMBER => Ok(StartupKind::Startup(payload)),
        other if (other >> 16) == 3 => {
            // 3.x minor versions negotiate down to 3.0.
            Ok(StartupKind::Startup(payload))
        }
        other => Err(Error::UnsupportedVersion(other)),
    }
}

/// Read a startup frame, reporting version failures to the client before
/// the connection drops.
async fn read_startup_or_report<S>(stream: &mut S) -> Result<StartupKind, Error>
where
    S: AsyncRead + AsyncWrite + Send + Unpin,
{
    match get_startup(stream).await {
        Ok(kind) => Ok(kind),
        Err(err) => {
            let _ = write_all_flush(stream, &error_response(&err.to_error_info())).await;
            Err(err)
        }
    }
}

/// Drive one accepted socket from the first byte to the end of its command
/// loop.
pub(crate) async fn run_connection(
    config: Arc<ServerConfig>,
    shutdown: watch::Receiver<bool>,
    mut stream: TcpStream,
    addr: SocketAddr,
) -> Result<(), Error> {
    // The pre-startup negotiation loop: SSLRequest and GSSENCRequest may
    // each precede the real startup message.
    loop {
        match read_startup_or_report(&mut stream).await? {
            StartupKind::Tls => {
                let acceptor = match config.tls_acceptor.clone() {
                    Some(acceptor) => {
                        write_all(&mut stream, b"S").await?;
                        acceptor
                    }
                    None => {
                        write_all(&mut stream, b"N").await?;
                        continue;
                    }
                };

                let mut tls_stream = acceptor
                    .accept(stream)
                    .await
                    .map_err(|err| Error::TlsError(err.to_string()))?;
                debug!("client {addr} upgraded to TLS");

                // Same negotiation on the encrypted stream, minus SSLRequest.
                loop {
                    match read_startup_or_report(&mut tls_stream).await? {
                        StartupKind::GssEnc => {
                            write_all(&mut tls_stream, b"N").await?;
                        }
                        StartupKind::Cancel(payload) => return handle_cancel(payload),
                        StartupKind::Startup(payload) => {
                            return establish(config, shutdown, tls_stream, payload, Some(addr), true)
                                .await
                        }
                        StartupKind::Tls => {
                            return Err(Error::ProtocolViolation(
                                "SSLRequest on an already-encrypted connection".into(),
                            ))
                        }
                    }
                }
            }
            StartupKind::GssEnc => {
                write_all(&mut stream, b"N").await?;
            }
            StartupKind::Cancel(payload) => return handle_cancel(payload),
            StartupKind::Startup(payload) => {
                return establish(config, shutdown, stream, payload, Some(addr), false).await
            }
        }
    }
}

/// CancelRequest routing is best-effort; the reference behaviour is to
/// accept and discard, then close the secondary socket.
fn handle_cancel(mut payload: BytesMut) -> Result<(), Error> {
    if payload.remaining() >= 8 {
        let process_id = payload.get_i32();
        debug!("cancel request for backend {process_id}; discarding");
    }
    Ok(())
}

/// Authenticate, run the session middleware, send the setup burst, and
/// enter the command loop.
pub(crate) async fn establish<S>(
    config: Arc<ServerConfig>,
    shutdown: watch::Receiver<bool>,
    stream: S,
    startup_payload: BytesMut,
    addr: Option<SocketAddr>,
    tls: bool,
) -> Result<(), Error>
where
    S: AsyncRead + AsyncWrite + Send + Unpin,
{
    let parameters = parse_startup(startup_payload)?;

    let (read_half, write_half) = split(stream);
    let mut reader = MessageReader::new(read_half, config.max_message_size);
    let mut write = write_half;

    {
        let mut exchange = AuthExchange {
            source: &mut reader,
            write: &mut write,
            startup_parameters: &parameters,
            tls,
        };
        if let Err(err) = config.auth.authenticate(&mut exchange).await {
            write_all_flush(&mut write, &error_response(&err.to_error_info())).await?;
            return Err(err);
        }
    }

    let username = parameters.get("user").cloned().unwrap_or_default();
    info!("client {username:?} authenticated{}", if tls { " (TLS)" } else { "" });

    // Arbitrary unique pair for BackendKeyData; never registered anywhere,
    // cancellation routing is a no-op.
    let process_id: i32 = rand::random();
    let secret_key: i32 = rand::random();

    let ctx = Arc::new(SessionContext::new(
        username,
        parameters,
        process_id,
        secret_key,
        addr,
        tls,
        shutdown,
    ));

    if let Some(middleware) = &config.session_middleware {
        if let Err(err) = middleware.handle(&ctx).await {
            write_all_flush(&mut write, &error_response(&err.to_error_info())).await?;
            return Err(err);
        }
    }

    // The setup burst goes out as one write: AuthenticationOk, every
    // ParameterStatus, BackendKeyData, and the first ReadyForQuery.
    let mut setup = BytesMut::new();
    setup.extend_from_slice(&auth_ok());
    setup.extend_from_slice(&config.parameters.to_frames());
    setup.extend_from_slice(&backend_key_data(process_id, secret_key));
    setup.extend_from_slice(&ready_for_query(TransactionStatus::Idle));
    write_all_flush(&mut write, &setup).await?;

    let mut session = Session::new(reader, write, config.clone(), ctx.clone());
    let result = session.handle().await;

    match &result {
        Ok(()) => {
            if let Some(hook) = &config.close_conn {
                hook(&ctx);
            }
        }
        Err(err) => {
            if let Some(hook) = &config.terminate_conn {
                hook(&ctx, err);
            }
        }
    }
    result
}
