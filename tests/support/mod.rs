//! Shared fixtures: a scripted query engine behind the library, plus a
//! byte-level PostgreSQL client for driving it.

// Each integration-test binary compiles its own copy; not every binary uses
// every helper.
#![allow(dead_code)]

use std::time::Duration;

use bytes::{Buf, BufMut, BytesMut};
use futures::future::BoxFuture;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use pg_porter::{
    oids, Column, DataWriter, Error, Parameter, PreparedStatement, QueryParser, Server,
    ServerConfig, SessionContext, StatementHandler, Value,
};

// ---------------------------------------------------------------------------
// Server-side fixture: a parser that fakes a tiny query engine.

/// Emits `n` integer rows, sleeping `delay` first.
struct Rows {
    values: Vec<i32>,
    delay: Duration,
    tag: String,
}

impl StatementHandler for Rows {
    fn execute<'a, 'b>(
        &'a self,
        _ctx: &'a SessionContext,
        writer: &'a mut DataWriter<'b>,
        _parameters: &'a [Parameter],
    ) -> BoxFuture<'a, Result<(), Error>> {
        Box::pin(async move {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            for value in &self.values {
                writer.row(&[Value::Int4(*value)]).await?;
            }
            writer.complete(&self.tag).await
        })
    }
}

/// Echoes its single int4 parameter back as one row.
struct EchoParam;

impl StatementHandler for EchoParam {
    fn execute<'a, 'b>(
        &'a self,
        _ctx: &'a SessionContext,
        writer: &'a mut DataWriter<'b>,
        parameters: &'a [Parameter],
    ) -> BoxFuture<'a, Result<(), Error>> {
        Box::pin(async move {
            let value = match parameters.first() {
                Some(parameter) => parameter.decode(writer_registry())?,
                None => Value::Null,
            };
            writer.row(&[value]).await?;
            writer.complete("SELECT 1").await
        })
    }
}

// The registry the echo handler decodes against. Built-ins only, which is
// what the fixture server runs with.
fn writer_registry() -> &'static pg_porter::TypeRegistry {
    use std::sync::OnceLock;
    static REGISTRY: OnceLock<pg_porter::TypeRegistry> = OnceLock::new();
    REGISTRY.get_or_init(pg_porter::TypeRegistry::built_in)
}

/// COPY IN in binary format: counts tuples and completes with `COPY n`.
struct CopyInCount;

impl StatementHandler for CopyInCount {
    fn execute<'a, 'b>(
        &'a self,
        _ctx: &'a SessionContext,
        writer: &'a mut DataWriter<'b>,
        _parameters: &'a [Parameter],
    ) -> BoxFuture<'a, Result<(), Error>> {
        Box::pin(async move {
            let reader = writer.copy_in(true).await?;
            let mut reader = pg_porter::BinaryCopyReader::new(reader);
            let mut tuples = 0u64;
            while let Some(_tuple) = reader.tuple().await? {
                tuples += 1;
            }
            writer.complete(&format!("COPY {tuples}")).await
        })
    }
}

/// Parses fine, fails at execute time.
struct FailingStatement;

impl StatementHandler for FailingStatement {
    fn execute<'a, 'b>(
        &'a self,
        _ctx: &'a SessionContext,
        _writer: &'a mut DataWriter<'b>,
        _parameters: &'a [Parameter],
    ) -> BoxFuture<'a, Result<(), Error>> {
        Box::pin(async move { Err(Error::query("division by zero").with_code("22012")) })
    }
}

/// Raises a warning-severity error, which must surface as a notice.
struct WarningStatement;

impl StatementHandler for WarningStatement {
    fn execute<'a, 'b>(
        &'a self,
        _ctx: &'a SessionContext,
        _writer: &'a mut DataWriter<'b>,
        _parameters: &'a [Parameter],
    ) -> BoxFuture<'a, Result<(), Error>> {
        Box::pin(async move {
            Err(Error::query("this can only end badly")
                .with_severity(pg_porter::Severity::Warning))
        })
    }
}

pub struct TestParser;

impl QueryParser for TestParser {
    fn parse<'a>(
        &'a self,
        _ctx: &'a SessionContext,
        query: &'a str,
    ) -> BoxFuture<'a, Result<Vec<PreparedStatement>, Error>> {
        Box::pin(async move {
            let mut statements = Vec::new();
            for piece in query.split(';') {
                let piece = piece.trim();
                if piece.is_empty() {
                    continue;
                }
                statements.push(statement_for(piece)?);
            }
            if statements.is_empty() {
                return Err(Error::query("empty statement").with_code("42601"));
            }
            Ok(statements)
        })
    }
}

fn statement_for(piece: &str) -> Result<PreparedStatement, Error> {
    let int_column = |name: &str| vec![Column::new(name, oids::INT4)];

    if let Some(rest) = piece.strip_prefix("SELECT ") {
        if rest == "$1" {
            return Ok(PreparedStatement::new(EchoParam)
                .with_columns(int_column("?column?"))
                .with_parameters(vec![oids::INT4]));
        }
        if let Ok(value) = rest.parse::<i32>() {
            return Ok(PreparedStatement::new(Rows {
                values: vec![value],
                delay: Duration::ZERO,
                tag: "SELECT 1".to_string(),
            })
            .with_columns(int_column("?column?")));
        }
    }
    if let Some(rest) = piece.strip_prefix("SLEEP ") {
        let millis: u64 = rest.parse().unwrap_or(100);
        return Ok(PreparedStatement::new(Rows {
            values: vec![1],
            delay: Duration::from_millis(millis),
            tag: "SELECT 1".into(),
        })
        .with_columns(int_column("?column?")));
    }
    if piece == "MANY" {
        return Ok(PreparedStatement::new(Rows {
            values: (1..=5).collect(),
            delay: Duration::ZERO,
            tag: "SELECT 5".into(),
        })
        .with_columns(int_column("n")));
    }
    if piece == "LOAD" {
        return Ok(PreparedStatement::new(CopyInCount));
    }
    if piece == "ERROR" {
        return Ok(PreparedStatement::new(FailingStatement));
    }
    if piece == "WARN" {
        return Ok(PreparedStatement::new(WarningStatement));
    }
    Err(Error::query(format!("syntax error at or near \"{piece}\"")).with_code("42601"))
}

/// Bind a listener, serve the config on it, and return the server handle
/// plus the address.
pub async fn start(config: ServerConfig) -> (Server, std::net::SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = Server::new(config);
    let serving = server.clone();
    tokio::spawn(async move { serving.serve(listener).await });
    (server, addr)
}

pub async fn start_default() -> (Server, std::net::SocketAddr) {
    start(ServerConfig::new(TestParser)).await
}

// ---------------------------------------------------------------------------
// Client-side fixture: raw frames.

pub struct TestClient {
    pub stream: TcpStream,
}

impl TestClient {
    /// Connect and complete the startup exchange up to ReadyForQuery.
    pub async fn connect(addr: std::net::SocketAddr) -> Self {
        let mut client = Self::connect_raw(addr).await;
        client.send_startup("tester").await;
        client.read_until_ready().await;
        client
    }

    pub async fn connect_raw(addr: std::net::SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        TestClient { stream }
    }

    pub async fn send_startup(&mut self, user: &str) {
        let mut body = BytesMut::new();
        body.put_i32(196608);
        body.put_slice(b"user\0");
        body.put_slice(user.as_bytes());
        body.put_u8(0);
        body.put_slice(b"database\0app\0");
        body.put_u8(0);
        let mut frame = BytesMut::new();
        frame.put_i32(body.len() as i32 + 4);
        frame.put_slice(&body);
        self.stream.write_all(&frame).await.unwrap();
    }

    pub async fn send(&mut self, code: u8, payload: &[u8]) {
        let mut frame = BytesMut::with_capacity(payload.len() + 5);
        frame.put_u8(code);
        frame.put_i32(payload.len() as i32 + 4);
        frame.put_slice(payload);
        self.stream.write_all(&frame).await.unwrap();
    }

    pub async fn query(&mut self, sql: &str) {
        let mut payload = BytesMut::new();
        payload.put_slice(sql.as_bytes());
        payload.put_u8(0);
        self.send(b'Q', &payload).await;
    }

    pub async fn parse(&mut self, name: &str, sql: &str) {
        let mut payload = BytesMut::new();
        payload.put_slice(name.as_bytes());
        payload.put_u8(0);
        payload.put_slice(sql.as_bytes());
        payload.put_u8(0);
        payload.put_i16(0);
        self.send(b'P', &payload).await;
    }

    /// Bind with optional binary parameters and one result-format code.
    pub async fn bind(
        &mut self,
        portal: &str,
        statement: &str,
        parameters: &[Option<&[u8]>],
        parameter_format: i16,
        result_format: Option<i16>,
    ) {
        let mut payload = BytesMut::new();
        payload.put_slice(portal.as_bytes());
        payload.put_u8(0);
        payload.put_slice(statement.as_bytes());
        payload.put_u8(0);
        payload.put_i16(1);
        payload.put_i16(parameter_format);
        payload.put_i16(parameters.len() as i16);
        for parameter in parameters {
            match parameter {
                Some(bytes) => {
                    payload.put_i32(bytes.len() as i32);
                    payload.put_slice(bytes);
                }
                None => payload.put_i32(-1),
            }
        }
        match result_format {
            Some(format) => {
                payload.put_i16(1);
                payload.put_i16(format);
            }
            None => payload.put_i16(0),
        }
        self.send(b'B', &payload).await;
    }

    pub async fn describe(&mut self, target: u8, name: &str) {
        let mut payload = BytesMut::new();
        payload.put_u8(target);
        payload.put_slice(name.as_bytes());
        payload.put_u8(0);
        self.send(b'D', &payload).await;
    }

    pub async fn execute(&mut self, portal: &str, max_rows: i32) {
        let mut payload = BytesMut::new();
        payload.put_slice(portal.as_bytes());
        payload.put_u8(0);
        payload.put_i32(max_rows);
        self.send(b'E', &payload).await;
    }

    pub async fn sync(&mut self) {
        self.send(b'S', &[]).await;
    }

    pub async fn terminate(&mut self) {
        self.send(b'X', &[]).await;
    }

    pub async fn copy_data(&mut self, chunk: &[u8]) {
        self.send(b'd', chunk).await;
    }

    pub async fn copy_done(&mut self) {
        self.send(b'c', &[]).await;
    }

    /// Read one backend frame.
    pub async fn read_frame(&mut self) -> (u8, Vec<u8>) {
        let code = self.stream.read_u8().await.unwrap();
        let len = self.stream.read_i32().await.unwrap();
        let mut payload = vec![0u8; (len - 4) as usize];
        self.stream.read_exact(&mut payload).await.unwrap();
        (code, payload)
    }

    /// Read frames up to and including ReadyForQuery; returns the codes in
    /// order and the payload of each.
    pub async fn read_until_ready(&mut self) -> Vec<(u8, Vec<u8>)> {
        let mut frames = Vec::new();
        loop {
            let frame = self.read_frame().await;
            let done = frame.0 == b'Z';
            frames.push(frame);
            if done {
                return frames;
            }
        }
    }
}

/// Codes of a frame sequence, as a readable string ("12TDCZ").
pub fn codes(frames: &[(u8, Vec<u8>)]) -> String {
    frames.iter().map(|(code, _)| *code as char).collect()
}

/// Build the payload of a binary COPY stream with int4 tuples.
pub fn binary_copy_stream(rows: &[&[Option<i32>]]) -> Vec<u8> {
    let mut payload = BytesMut::new();
    payload.put_slice(b"PGCOPY\n\xff\r\n\0");
    payload.put_i32(0);
    payload.put_i32(0);
    for row in rows {
        payload.put_i16(row.len() as i16);
        for field in *row {
            match field {
                Some(value) => {
                    payload.put_i32(4);
                    payload.put_i32(*value);
                }
                None => payload.put_i32(-1),
            }
        }
    }
    payload.put_i16(-1);
    payload.to_vec()
}

/// Extract the SQLSTATE code from an ErrorResponse payload.
pub fn sqlstate_of(payload: &[u8]) -> String {
    let mut bytes = &payload[..];
    while bytes.has_remaining() {
        let field = bytes.get_u8();
        if field == 0 {
            break;
        }
        let nul = bytes.iter().position(|b| *b == 0).unwrap();
        let value = String::from_utf8(bytes[..nul].to_vec()).unwrap();
        bytes.advance(nul + 1);
        if field == b'C' {
            return value;
        }
    }
    String::new()
}
