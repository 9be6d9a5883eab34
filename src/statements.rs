//! Host-facing statement contracts: the query parser, prepared statements,
//! and their execute handlers.

use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;

use crate::client::SessionContext;
use crate::errors::Error;
use crate::types::{Column, Oid, Parameter};
use crate::writer::DataWriter;

/// Turns a query string into one or more prepared statements.
///
/// The library never interprets the query text itself; everything about
/// its meaning lives behind this capability. A single call may return
/// several statements (a compound query), which then execute in order
/// under one protocol cycle.
pub trait QueryParser: Send + Sync {
    fn parse<'a>(
        &'a self,
        ctx: &'a SessionContext,
        query: &'a str,
    ) -> BoxFuture<'a, Result<Vec<PreparedStatement>, Error>>;
}

/// Executes one prepared statement, streaming rows through the writer.
///
/// Handlers should honour `ctx.is_shutting_down()`; the command loop never
/// aborts them forcibly.
pub trait StatementHandler: Send + Sync {
    fn execute<'a, 'b>(
        &'a self,
        ctx: &'a SessionContext,
        writer: &'a mut DataWriter<'b>,
        parameters: &'a [Parameter],
    ) -> BoxFuture<'a, Result<(), Error>>;
}

/// Runs once after authentication so the host can enrich the session
/// (load roles, stash engine handles in attributes, reject the user).
pub trait SessionMiddleware: Send + Sync {
    fn handle<'a>(&'a self, ctx: &'a SessionContext) -> BoxFuture<'a, Result<(), Error>>;
}

/// A parsed, immutable query template: the execute handler plus the
/// declared result columns and parameter types.
#[derive(Clone)]
pub struct PreparedStatement {
    pub(crate) handler: Arc<dyn StatementHandler>,
    pub(crate) columns: Arc<Vec<Column>>,
    pub(crate) parameter_oids: Vec<Oid>,
}

impl PreparedStatement {
    pub fn new(handler: impl StatementHandler + 'static) -> Self {
        PreparedStatement {
            handler: Arc::new(handler),
            columns: Arc::new(Vec::new()),
            parameter_oids: Vec::new(),
        }
    }

    /// Declare the result columns advertised by Describe and RowDescription.
    pub fn with_columns(mut self, columns: Vec<Column>) -> Self {
        self.columns = Arc::new(columns);
        self
    }

    /// Declare the parameter OIDs. These win over OIDs the client supplies
    /// in Parse.
    pub fn with_parameters(mut self, oids: Vec<Oid>) -> Self {
        self.parameter_oids = oids;
        self
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn parameter_oids(&self) -> &[Oid] {
        &self.parameter_oids
    }
}

impl fmt::Debug for PreparedStatement {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("PreparedStatement")
            .field("columns", &self.columns.len())
            .field("parameter_oids", &self.parameter_oids)
            .finish()
    }
}
