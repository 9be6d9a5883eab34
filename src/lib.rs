//! pg_porter: an embeddable PostgreSQL wire-protocol (v3.0) server.
//!
//! The host supplies a [`QueryParser`] that turns query text into
//! [`PreparedStatement`]s; the library owns everything between the socket
//! and that callback — handshake, TLS upgrade, authentication, the simple
//! and extended query subprotocols, parameter binding, row encoding, COPY
//! framing, and graceful shutdown. It does not parse SQL, plan queries, or
//! manage transactions: any engine that can answer "here is a query string,
//! give me statements" can sit behind unmodified PostgreSQL drivers.
//!
//! ```no_run
//! use futures::future::BoxFuture;
//! use pg_porter::{
//!     Column, DataWriter, Error, Parameter, PreparedStatement, QueryParser, Server,
//!     ServerConfig, SessionContext, StatementHandler, Value, oids,
//! };
//!
//! struct SelectOne;
//!
//! impl StatementHandler for SelectOne {
//!     fn execute<'a, 'b>(
//!         &'a self,
//!         _ctx: &'a SessionContext,
//!         writer: &'a mut DataWriter<'b>,
//!         _parameters: &'a [Parameter],
//!     ) -> BoxFuture<'a, Result<(), Error>> {
//!         Box::pin(async move {
//!             writer.row(&[Value::Int4(1)]).await?;
//!             writer.complete("SELECT 1").await
//!         })
//!     }
//! }
//!
//! struct Parser;
//!
//! impl QueryParser for Parser {
//!     fn parse<'a>(
//!         &'a self,
//!         _ctx: &'a SessionContext,
//!         _query: &'a str,
//!     ) -> BoxFuture<'a, Result<Vec<PreparedStatement>, Error>> {
//!         Box::pin(async move {
//!             Ok(vec![PreparedStatement::new(SelectOne)
//!                 .with_columns(vec![Column::new("?column?", oids::INT4)])])
//!         })
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = Server::new(ServerConfig::new(Parser));
//!     let listener = tokio::net::TcpListener::bind("127.0.0.1:5432").await?;
//!     server.serve(listener).await?;
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod cache;
pub mod client;
pub mod copy;
pub mod errors;
pub mod messages;
pub mod server;
pub mod statements;
pub mod types;
pub mod writer;

pub use auth::{AuthExchange, AuthStrategy, CertificateAuth, CleartextPassword, Md5Password, Trust};
pub use cache::{
    BoundedPortalCache, BoundedStatementCache, CachedStatement, Portal, PortalCache,
    StatementCache, UnboundedPortalCache, UnboundedStatementCache,
};
pub use client::SessionContext;
pub use copy::{BinaryCopyReader, CopyReader, CopyTuple};
pub use errors::{sqlstate, Error, ErrorInfo, Severity};
pub use server::{PipelineConfig, Server, ServerConfig, ServerParameters};
pub use statements::{PreparedStatement, QueryParser, SessionMiddleware, StatementHandler};
pub use types::{oids, Column, FormatCode, Oid, Parameter, TypeRegistry, Value, ValueCodec};
pub use writer::{CopyWriter, DataWriter};
