//! The per-connection command loop.

use log::{debug, trace};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use crate::client::core::Session;
use crate::errors::Error;
use crate::messages::constants::*;

impl<S, T> Session<S, T>
where
    S: AsyncRead + Send + Unpin,
    T: AsyncWrite + Send + Unpin,
{
    /// Read and dispatch messages until the client terminates, the socket
    /// closes, or a fatal error ends the connection.
    pub(crate) async fn handle(&mut self) -> Result<(), Error> {
        loop {
            let frame = match self.config.read_timeout {
                Some(deadline) => {
                    match tokio::time::timeout(deadline, self.read.read_typed()).await {
                        Ok(frame) => frame?,
                        Err(_) => {
                            return Err(Error::SocketError(
                                "client idle past the read deadline".into(),
                            ))
                        }
                    }
                }
                None => self.read.read_typed().await?,
            };

            let (code, payload) = match frame {
                Some(frame) => frame,
                // Clean EOF between messages.
                None => {
                    debug!("client closed the connection");
                    return Ok(());
                }
            };
            trace!("dispatching {:?}", code as char);

            // Skip mode: between an error and the next Sync, everything in
            // the extended batch is read and discarded.
            if self.skip_until_sync && code != MSG_SYNC && code != MSG_TERMINATE {
                debug!("skipping {:?} until Sync", code as char);
                continue;
            }

            match code {
                MSG_QUERY => self.on_query(payload).await?,
                MSG_PARSE => self.on_parse(payload).await?,
                MSG_BIND => self.on_bind(payload).await?,
                MSG_DESCRIBE => self.on_describe(payload).await?,
                MSG_EXECUTE => self.on_execute(payload).await?,
                MSG_CLOSE => self.on_close(payload).await?,
                MSG_SYNC => self.on_sync().await?,
                MSG_FLUSH => self.on_flush().await?,
                MSG_TERMINATE => {
                    debug!("client sent Terminate");
                    return Ok(());
                }
                // Stale COPY frames arrive when a COPY aborted on our side
                // while the client kept sending; they carry nothing now.
                MSG_COPY_DATA | MSG_COPY_DONE | MSG_COPY_FAIL => {
                    trace!("discarding {:?} outside COPY", code as char);
                }
                other => {
                    self.respond_error(Error::ProtocolViolation(format!(
                        "unknown message type {:?}",
                        other as char
                    )))
                    .await?;
                }
            }
        }
    }

    /// Sync ends the batch: drain queued work, clear skip mode, and emit
    /// exactly one ReadyForQuery.
    async fn on_sync(&mut self) -> Result<(), Error> {
        self.drain_pipeline().await?;
        self.skip_until_sync = false;
        self.ready_for_query().await
    }

    /// Flush forces buffered output out without ending the batch.
    async fn on_flush(&mut self) -> Result<(), Error> {
        self.drain_pipeline().await?;
        self.write
            .flush()
            .await
            .map_err(|err| Error::SocketError(format!("failed to flush socket: {err}")))
    }
}
