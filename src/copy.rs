//! The COPY subprotocol: inbound chunk streaming, the binary tuple reader,
//! and outbound COPY OUT framing.

use bytes::{Buf, Bytes, BytesMut};
use futures::future::BoxFuture;
use tokio::io::AsyncRead;

use crate::errors::{sqlstate, Error, ErrorInfo};
use crate::messages::constants::*;
use crate::messages::reader::MessageReader;

/// Type-erased access to the connection's frame stream, so the COPY reader
/// does not need to be generic over the socket type.
pub(crate) trait FrameSource: Send {
    fn next_frame(&mut self) -> BoxFuture<'_, Result<Option<(u8, BytesMut)>, Error>>;
}

impl<S> FrameSource for MessageReader<S>
where
    S: AsyncRead + Send + std::marker::Unpin,
{
    fn next_frame(&mut self) -> BoxFuture<'_, Result<Option<(u8, BytesMut)>, Error>> {
        Box::pin(self.read_typed())
    }
}

/// Consumes the CopyData stream of an active COPY IN.
///
/// The payloads of consecutive CopyData messages form one logical byte
/// stream; message boundaries carry no meaning. [`chunk`](Self::chunk)
/// returns `None` once the client sends CopyDone, and surfaces CopyFail as
/// a query error carrying the client's message.
pub struct CopyReader<'a> {
    source: &'a mut dyn FrameSource,
    done: bool,
}

impl<'a> CopyReader<'a> {
    pub(crate) fn new(source: &'a mut dyn FrameSource) -> Self {
        CopyReader { source, done: false }
    }

    pub async fn chunk(&mut self) -> Result<Option<BytesMut>, Error> {
        if self.done {
            return Ok(None);
        }
        loop {
            match self.source.next_frame().await? {
                None => {
                    self.done = true;
                    return Err(Error::SocketError(
                        "connection closed in the middle of COPY".into(),
                    ));
                }
                Some((MSG_COPY_DATA, payload)) => return Ok(Some(payload)),
                Some((MSG_COPY_DONE, _)) => {
                    self.done = true;
                    return Ok(None);
                }
                Some((MSG_COPY_FAIL, payload)) => {
                    self.done = true;
                    let reason = crate::messages::frontend::parse_copy_fail(payload)
                        .unwrap_or_else(|_| "COPY terminated by client".to_string());
                    return Err(Error::Query(
                        ErrorInfo::new(format!("COPY from client failed: {reason}"))
                            .with_code(sqlstate::QUERY_CANCELED),
                    ));
                }
                // Flush and Sync are legal mid-COPY and carry nothing here.
                Some((MSG_FLUSH, _)) | Some((MSG_SYNC, _)) => continue,
                Some((other, _)) => {
                    return Err(Error::ProtocolViolation(format!(
                        "unexpected message {:?} during COPY",
                        other as char
                    )))
                }
            }
        }
    }
}

/// One tuple of a binary COPY stream: raw field values, `None` for null.
pub type CopyTuple = Vec<Option<Bytes>>;

/// Parses the COPY BINARY framing on top of a [`CopyReader`]: signature,
/// flags, header extension, length-prefixed tuples, and the -1 trailer.
pub struct BinaryCopyReader<'a> {
    inner: CopyReader<'a>,
    buf: BytesMut,
    header_done: bool,
    finished: bool,
}

impl<'a> BinaryCopyReader<'a> {
    pub fn new(inner: CopyReader<'a>) -> Self {
        BinaryCopyReader {
            inner,
            buf: BytesMut::new(),
            header_done: false,
            finished: false,
        }
    }

    /// Ensure at least `needed` unparsed bytes are buffered. `false` means
    /// the copy stream ended first.
    async fn fill(&mut self, needed: usize) -> Result<bool, Error> {
        while self.buf.len() < needed {
            match self.inner.chunk().await? {
                Some(chunk) => self.buf.extend_from_slice(&chunk),
                None => return Ok(false),
            }
        }
        Ok(true)
    }

    async fn read_header(&mut self) -> Result<(), Error> {
        if !self.fill(19).await? {
            return Err(bad_binary("stream ended inside the header"));
        }
        let signature = self.buf.split_to(11);
        if signature[..] != COPY_BINARY_SIGNATURE {
            return Err(bad_binary("bad signature"));
        }
        let flags = self.buf.get_i32();
        // The upper half of the flags word denotes critical format changes
        // (bit 16 is the withdrawn OID option); refuse anything we do not
        // understand.
        if flags as u32 & 0xFFFF_0000 != 0 {
            return Err(bad_binary("unsupported critical flags"));
        }
        let extension_len = self.buf.get_i32();
        if extension_len < 0 {
            return Err(bad_binary("negative header extension length"));
        }
        if !self.fill(extension_len as usize).await? {
            return Err(bad_binary("stream ended inside the header extension"));
        }
        self.buf.advance(extension_len as usize);
        self.header_done = true;
        Ok(())
    }

    /// Read the next tuple, or `None` after the trailer.
    pub async fn tuple(&mut self) -> Result<Option<CopyTuple>, Error> {
        if self.finished {
            return Ok(None);
        }
        if !self.header_done {
            self.read_header().await?;
        }

        if !self.fill(2).await? {
            return Err(bad_binary("stream ended before the trailer"));
        }
        let field_count = self.buf.get_i16();
        if field_count == -1 {
            self.finished = true;
            // Drain whatever follows the trailer so the CopyDone is consumed.
            while self.inner.chunk().await?.is_some() {}
            return Ok(None);
        }
        if field_count < 0 {
            return Err(bad_binary("negative field count"));
        }

        let mut fields = Vec::with_capacity(field_count as usize);
        for _ in 0..field_count {
            if !self.fill(4).await? {
                return Err(bad_binary("stream ended inside a tuple"));
            }
            let len = self.buf.get_i32();
            if len == -1 {
                fields.push(None);
                continue;
            }
            if len < 0 {
                return Err(bad_binary("negative field length"));
            }
            if !self.fill(len as usize).await? {
                return Err(bad_binary("stream ended inside a field"));
            }
            fields.push(Some(self.buf.split_to(len as usize).freeze()));
        }
        Ok(Some(fields))
    }
}

fn bad_binary(detail: &str) -> Error {
    Error::Query(
        ErrorInfo::new("invalid COPY BINARY stream")
            .with_code(sqlstate::PROTOCOL_VIOLATION)
            .with_detail(detail),
    )
}
