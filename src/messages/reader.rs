//! Frame reads from the client socket.

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, BufReader};

use crate::errors::Error;

/// Buffered reader yielding `(type byte, payload)` pairs.
///
/// The payload cap defends against a malicious length prefix; oversized
/// frames surface as [`Error::MaxMessageSize`] and terminate the connection.
pub struct MessageReader<S> {
    stream: BufReader<S>,
    max_message_size: usize,
}

impl<S> MessageReader<S>
where
    S: AsyncRead + Unpin,
{
    pub fn new(stream: S, max_message_size: usize) -> Self {
        MessageReader {
            stream: BufReader::new(stream),
            max_message_size,
        }
    }

    /// Read one typed frame. `Ok(None)` means the client closed the socket
    /// cleanly between messages.
    pub async fn read_typed(&mut self) -> Result<Option<(u8, BytesMut)>, Error> {
        let code = match self.stream.read_u8().await {
            Ok(code) => code,
            Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(err) => return Err(Error::SocketError(format!("failed to read message type: {err}"))),
        };

        let len = self
            .stream
            .read_i32()
            .await
            .map_err(|err| Error::SocketError(format!("failed to read message length: {err}")))?;

        if len < 4 {
            return Err(Error::ProtocolViolation(format!(
                "message length {len} is smaller than the length field itself"
            )));
        }
        let payload_len = (len - 4) as usize;
        if payload_len > self.max_message_size {
            return Err(Error::MaxMessageSize);
        }

        let mut payload = BytesMut::zeroed(payload_len);
        self.stream
            .read_exact(&mut payload)
            .await
            .map_err(|err| Error::SocketError(format!("failed to read message payload: {err}")))?;

        Ok(Some((code, payload)))
    }

}
