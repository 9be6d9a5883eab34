//! The row writer handed to statement handlers.

use bytes::BytesMut;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::copy::{CopyReader, FrameSource};
use crate::errors::{sqlstate, Error, ErrorInfo};
use crate::messages::protocol;
use crate::types::{Column, FormatCode, TypeRegistry, Value};

/// Flush threshold for streamed output (8 KiB). Staged frames are pushed to
/// the socket once the buffer reaches this size.
const BUFFER_FLUSH_THRESHOLD: usize = 8192;

/// Streams protocol output on behalf of one executing statement.
///
/// In the ordinary path the writer stages frames and pushes them to the
/// connection socket; under the pipeline engine it stages into a per-task
/// buffer that is flushed in submission order later. Handlers cannot tell
/// the difference, except that COPY needs the socket conversation and is
/// therefore refused on a detached writer.
pub struct DataWriter<'a> {
    staged: BytesMut,
    stream: Option<&'a mut (dyn AsyncWrite + Send + Unpin)>,
    source: Option<&'a mut dyn FrameSource>,
    registry: &'a TypeRegistry,
    columns: &'a [Column],
    formats: Vec<FormatCode>,
    max_rows: i32,
    row_count: i32,
    suspended: bool,
    completed: bool,
}

impl<'a> DataWriter<'a> {
    /// Writer connected to the live socket conversation.
    pub(crate) fn streaming(
        stream: &'a mut (dyn AsyncWrite + Send + Unpin),
        source: &'a mut dyn FrameSource,
        registry: &'a TypeRegistry,
        columns: &'a [Column],
        formats: Vec<FormatCode>,
        max_rows: i32,
    ) -> Self {
        DataWriter {
            staged: BytesMut::new(),
            stream: Some(stream),
            source: Some(source),
            registry,
            columns,
            formats,
            max_rows,
            row_count: 0,
            suspended: false,
            completed: false,
        }
    }

    /// Detached writer used by pipeline workers: frames accumulate in the
    /// staging buffer and are never pushed to a socket here.
    pub(crate) fn buffered(
        registry: &'a TypeRegistry,
        columns: &'a [Column],
        formats: Vec<FormatCode>,
        max_rows: i32,
    ) -> Self {
        DataWriter {
            staged: BytesMut::new(),
            stream: None,
            source: None,
            registry,
            columns,
            formats,
            max_rows,
            row_count: 0,
            suspended: false,
            completed: false,
        }
    }

    /// Emit one DataRow. Values are encoded per the portal's column format
    /// codes; `Value::Null` becomes the null column.
    ///
    /// Once the Execute row limit is reached this returns
    /// [`Error::ExecutionLimited`]; propagate it with `?` and the engine
    /// will emit PortalSuspended.
    pub async fn row(&mut self, values: &[Value]) -> Result<(), Error> {
        if self.completed {
            return Err(Error::query("row written after the result was completed"));
        }
        if self.suspended || (self.max_rows > 0 && self.row_count >= self.max_rows) {
            self.suspended = true;
            return Err(Error::ExecutionLimited);
        }
        if values.len() != self.columns.len() {
            return Err(Error::query(format!(
                "row has {} values but the statement declares {} columns",
                values.len(),
                self.columns.len()
            )));
        }

        let mut encoded = Vec::with_capacity(values.len());
        for (index, value) in values.iter().enumerate() {
            if value.is_null() {
                encoded.push(None);
                continue;
            }
            let column = &self.columns[index];
            let format = self.formats.get(index).copied().unwrap_or(FormatCode::Text);
            encoded.push(Some(self.registry.encode(column.type_oid, value, format)?));
        }

        self.staged.extend_from_slice(&protocol::data_row(&encoded));
        self.row_count += 1;
        self.maybe_flush().await
    }

    /// Finish the statement with a CommandComplete carrying `tag`.
    pub async fn complete(&mut self, tag: &str) -> Result<(), Error> {
        self.staged.extend_from_slice(&protocol::command_complete(tag));
        self.completed = true;
        Ok(())
    }

    /// Report an empty query (EmptyQueryResponse).
    pub async fn empty(&mut self) -> Result<(), Error> {
        self.staged.extend_from_slice(&protocol::empty_query_response());
        self.completed = true;
        Ok(())
    }

    /// Push everything staged so far to the client.
    pub async fn flush(&mut self) -> Result<(), Error> {
        if let Some(stream) = self.stream.as_mut() {
            if !self.staged.is_empty() {
                let staged = self.staged.split();
                protocol::write_all(stream, &staged).await?;
            }
            stream
                .flush()
                .await
                .map_err(|err| Error::SocketError(format!("failed to flush socket: {err}")))?;
        }
        Ok(())
    }

    /// Begin COPY IN: send CopyInResponse and hand back the chunk reader.
    /// The column count and per-column formats come from the statement's
    /// declared columns and the `binary` flag.
    pub async fn copy_in(&mut self, binary: bool) -> Result<CopyReader<'_>, Error> {
        if self.stream.is_none() || self.source.is_none() {
            return Err(copy_detached());
        }
        self.staged
            .extend_from_slice(&protocol::copy_in_response(binary, self.columns.len() as i16));
        // The client will not start sending CopyData until it sees the
        // response, so this flush is load-bearing.
        self.flush().await?;
        match self.source.as_mut() {
            Some(source) => Ok(CopyReader::new(&mut **source)),
            None => Err(copy_detached()),
        }
    }

    /// Begin COPY OUT: send CopyOutResponse and hand back the chunk writer.
    pub async fn copy_out(&mut self, binary: bool) -> Result<CopyWriter<'_, 'a>, Error> {
        if self.stream.is_none() {
            return Err(copy_detached());
        }
        self.staged
            .extend_from_slice(&protocol::copy_out_response(binary, self.columns.len() as i16));
        Ok(CopyWriter { writer: self })
    }

    pub(crate) fn is_completed(&self) -> bool {
        self.completed
    }

    pub(crate) fn is_suspended(&self) -> bool {
        self.suspended
    }

    pub(crate) fn rows_written(&self) -> i32 {
        self.row_count
    }

    /// Stage an arbitrary pre-built frame (engine use).
    pub(crate) fn stage(&mut self, frame: &[u8]) {
        self.staged.extend_from_slice(frame);
    }

    /// Hand the staged bytes to the pipeline engine (detached writers).
    pub(crate) fn into_staged(self) -> BytesMut {
        self.staged
    }

    /// Drain any staged remainder to the socket without a flush syscall.
    pub(crate) async fn drain_staged(&mut self) -> Result<(), Error> {
        if let Some(stream) = self.stream.as_mut() {
            if !self.staged.is_empty() {
                let staged = self.staged.split();
                protocol::write_all(stream, &staged).await?;
            }
        }
        Ok(())
    }

    async fn maybe_flush(&mut self) -> Result<(), Error> {
        if self.stream.is_some() && self.staged.len() >= BUFFER_FLUSH_THRESHOLD {
            if let Some(stream) = self.stream.as_mut() {
                let staged = self.staged.split();
                protocol::write_all(stream, &staged).await?;
            }
        }
        Ok(())
    }
}

fn copy_detached() -> Error {
    Error::Query(
        ErrorInfo::new("COPY is not available inside a pipelined batch")
            .with_code(sqlstate::FEATURE_NOT_SUPPORTED)
            .with_hint("run COPY statements outside a parallel batch"),
    )
}

/// Outbound half of COPY OUT: feed chunks, then finish with `done`.
pub struct CopyWriter<'w, 'a> {
    writer: &'w mut DataWriter<'a>,
}

impl CopyWriter<'_, '_> {
    pub async fn send(&mut self, chunk: &[u8]) -> Result<(), Error> {
        self.writer.stage(&protocol::copy_data(chunk));
        self.writer.maybe_flush().await
    }

    pub async fn done(self) -> Result<(), Error> {
        self.writer.stage(&protocol::copy_done());
        Ok(())
    }
}
