//! The extended-query engine: Parse, Bind, Describe, Execute, Close, and
//! the execute paths shared with the pipeline workers.

use std::sync::Arc;

use bytes::BytesMut;
use log::debug;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::cache::{coerce_parameters, resolve_result_formats, CachedStatement, Portal};
use crate::client::core::{Session, SessionContext};
use crate::client::pipeline::TaskOutput;
use crate::errors::{sqlstate, Error, ErrorInfo};
use crate::messages::frontend::{
    BindMessage, DescribeTarget, ExecuteMessage, ParseMessage, TargetMessage,
};
use crate::messages::protocol;
use crate::statements::PreparedStatement;
use crate::types::{Oid, TypeRegistry};
use crate::writer::DataWriter;

/// How one statement's execution ended.
pub(crate) enum Outcome {
    Completed,
    Suspended,
    Failed(ErrorInfo),
}

impl<S, T> Session<S, T>
where
    S: AsyncRead + Send + Unpin,
    T: AsyncWrite + Send + Unpin,
{
    /// Queue or write one operation's output. Under pipelining the buffer
    /// joins the current window; otherwise it goes straight to the socket
    /// and a failure flips skip mode immediately.
    pub(crate) async fn emit(&mut self, buffer: BytesMut, failed: bool) -> Result<(), Error> {
        match self.pipeline.as_mut() {
            Some(pipeline) => {
                pipeline.push_ready(buffer, failed);
                if pipeline.at_capacity() {
                    self.drain_pipeline().await?;
                }
            }
            None => {
                protocol::write_all(&mut self.write, &buffer).await?;
                if failed {
                    self.skip_until_sync = true;
                }
            }
        }
        Ok(())
    }

    /// Await the pipeline window and flush it in submission order.
    pub(crate) async fn drain_pipeline(&mut self) -> Result<(), Error> {
        if let Some(pipeline) = self.pipeline.as_mut() {
            if pipeline.is_empty() {
                return Ok(());
            }
            let drained = pipeline.drain().await;
            protocol::write_all(&mut self.write, &drained.buffer).await?;
            if drained.failed {
                self.skip_until_sync = true;
            }
        }
        Ok(())
    }

    /// Convert a per-operation error into wire frames, or bubble it up if
    /// the connection cannot continue.
    pub(crate) async fn respond_error(&mut self, err: Error) -> Result<(), Error> {
        if err.is_fatal() {
            return Err(err);
        }
        debug!("operation failed: {err}");
        let frame = protocol::error_response(&err.to_error_info());
        self.emit(frame, true).await
    }

    /// Named Parse/Bind/Close mutate state other operations may depend on;
    /// the window drains before they are admitted. Unnamed operations stay
    /// on the loop thread and need no barrier.
    async fn serialize_if_named(&mut self, name: &str) -> Result<(), Error> {
        if !name.is_empty() {
            self.drain_pipeline().await?;
        }
        Ok(())
    }

    pub(crate) async fn on_parse(&mut self, payload: BytesMut) -> Result<(), Error> {
        let message = match ParseMessage::parse(payload) {
            Ok(message) => message,
            Err(err) => return self.respond_error(err).await,
        };
        self.serialize_if_named(&message.name).await?;
        if self.skip_until_sync {
            return Ok(());
        }

        let ctx = self.ctx.clone();
        let parser = self.config.parser.clone();
        match parser.parse(&ctx, &message.query).await {
            Ok(statements) => {
                let parameter_oids = resolve_parameter_oids(&statements, &message.parameter_oids);
                debug!(
                    "parsed statement {:?} into {} statement(s)",
                    message.name,
                    statements.len()
                );
                self.statements.put(
                    &message.name,
                    CachedStatement {
                        query: message.query,
                        statements: Arc::new(statements),
                        parameter_oids: Arc::new(parameter_oids),
                    },
                );
                self.emit(protocol::parse_complete(), false).await
            }
            Err(err) => self.respond_error(err).await,
        }
    }

    pub(crate) async fn on_bind(&mut self, payload: BytesMut) -> Result<(), Error> {
        let message = match BindMessage::parse(payload) {
            Ok(message) => message,
            Err(err) => return self.respond_error(err).await,
        };
        self.serialize_if_named(&message.portal).await?;
        if self.skip_until_sync {
            return Ok(());
        }

        let cached = match self.statements.get(&message.statement) {
            Some(cached) => cached,
            None => {
                return self
                    .respond_error(unknown_statement(&message.statement))
                    .await
            }
        };

        if !cached.parameter_oids.is_empty()
            && message.parameters.len() != cached.parameter_oids.len()
        {
            return self
                .respond_error(Error::ProtocolViolation(format!(
                    "bind supplies {} parameters, but statement {:?} requires {}",
                    message.parameters.len(),
                    message.statement,
                    cached.parameter_oids.len()
                )))
                .await;
        }

        let parameters = match coerce_parameters(
            &self.config.registry,
            &cached.parameter_oids,
            &message.parameter_formats,
            message.parameters,
        ) {
            Ok(parameters) => parameters,
            Err(err) => return self.respond_error(err).await,
        };

        self.portals.put(
            &message.portal,
            Portal {
                statement: cached,
                parameters,
                result_formats: message.result_formats,
            },
        );
        self.emit(protocol::bind_complete(), false).await
    }

    pub(crate) async fn on_describe(&mut self, payload: BytesMut) -> Result<(), Error> {
        let message = match TargetMessage::parse(payload) {
            Ok(message) => message,
            Err(err) => return self.respond_error(err).await,
        };

        let frames = match message.target {
            DescribeTarget::Statement => match self.statements.get(&message.name) {
                Some(cached) => {
                    let mut frames =
                        protocol::parameter_description(&cached.parameter_oids);
                    let columns = first_columns(&cached.statements);
                    if columns.is_empty() {
                        frames.extend_from_slice(&protocol::no_data());
                    } else {
                        frames.extend_from_slice(&protocol::row_description(columns, &[]));
                    }
                    frames
                }
                None => return self.respond_error(unknown_statement(&message.name)).await,
            },
            DescribeTarget::Portal => match self.portals.get(&message.name) {
                Some(portal) => {
                    let columns = first_columns(&portal.statement.statements);
                    if columns.is_empty() {
                        protocol::no_data()
                    } else {
                        match resolve_result_formats(&portal.result_formats, columns.len()) {
                            Ok(formats) => protocol::row_description(columns, &formats),
                            Err(err) => return self.respond_error(err).await,
                        }
                    }
                }
                None => return self.respond_error(unknown_portal(&message.name)).await,
            },
        };
        self.emit(frames, false).await
    }

    pub(crate) async fn on_close(&mut self, payload: BytesMut) -> Result<(), Error> {
        let message = match TargetMessage::parse(payload) {
            Ok(message) => message,
            Err(err) => return self.respond_error(err).await,
        };
        self.serialize_if_named(&message.name).await?;
        if self.skip_until_sync {
            return Ok(());
        }

        // Closing an unknown name is not an error.
        match message.target {
            DescribeTarget::Statement => {
                self.statements.remove(&message.name);
            }
            DescribeTarget::Portal => {
                self.portals.remove(&message.name);
            }
        }
        self.emit(protocol::close_complete(), false).await
    }

    pub(crate) async fn on_execute(&mut self, payload: BytesMut) -> Result<(), Error> {
        let message = match ExecuteMessage::parse(payload) {
            Ok(message) => message,
            Err(err) => return self.respond_error(err).await,
        };

        let portal = match self.portals.get(&message.portal) {
            Some(portal) => portal,
            None => return self.respond_error(unknown_portal(&message.portal)).await,
        };

        match self.pipeline.as_mut() {
            Some(pipeline) => {
                let ctx = self.ctx.clone();
                let registry = self.config.registry.clone();
                pipeline.spawn(execute_detached(
                    ctx,
                    registry,
                    portal,
                    message.max_rows,
                ));
                if pipeline.at_capacity() {
                    self.drain_pipeline().await?;
                }
                Ok(())
            }
            None => self.execute_streaming(&portal, message.max_rows).await,
        }
    }

    /// Execute a portal inline, streaming rows to the socket as they come.
    async fn execute_streaming(&mut self, portal: &Portal, max_rows: i32) -> Result<(), Error> {
        for statement in portal.statement.statements.iter() {
            let formats = match resolve_result_formats(&portal.result_formats, statement.columns.len())
            {
                Ok(formats) => formats,
                Err(err) => return self.respond_error(err).await,
            };

            let ctx = self.ctx.clone();
            let registry = self.config.registry.clone();
            let mut writer = DataWriter::streaming(
                &mut self.write,
                &mut self.read,
                registry.as_ref(),
                statement.columns(),
                formats,
                max_rows,
            );
            let result = statement.handler.execute(&ctx, &mut writer, &portal.parameters).await;
            let outcome = settle(&mut writer, result).await?;
            writer.drain_staged().await?;
            drop(writer);

            match outcome {
                Outcome::Completed => continue,
                Outcome::Suspended => {
                    return protocol::write_all(&mut self.write, &protocol::portal_suspended())
                        .await
                }
                Outcome::Failed(info) => {
                    protocol::write_all(&mut self.write, &protocol::error_response(&info)).await?;
                    self.skip_until_sync = true;
                    return Ok(());
                }
            }
        }
        Ok(())
    }
}

/// Host-declared parameter OIDs win over the ones the client put in Parse.
fn resolve_parameter_oids(statements: &[PreparedStatement], client_oids: &[Oid]) -> Vec<Oid> {
    statements
        .iter()
        .find(|statement| !statement.parameter_oids.is_empty())
        .map(|statement| statement.parameter_oids.clone())
        .unwrap_or_else(|| client_oids.to_vec())
}

/// Columns advertised for a (possibly compound) statement set.
fn first_columns(statements: &[PreparedStatement]) -> &[crate::types::Column] {
    statements
        .first()
        .map(|statement| statement.columns())
        .unwrap_or(&[])
}

fn unknown_statement(name: &str) -> Error {
    Error::Query(
        ErrorInfo::new(format!("prepared statement \"{name}\" does not exist"))
            .with_code(sqlstate::INVALID_STATEMENT_NAME),
    )
}

fn unknown_portal(name: &str) -> Error {
    Error::Query(
        ErrorInfo::new(format!("portal \"{name}\" does not exist"))
            .with_code(sqlstate::INVALID_CURSOR_NAME),
    )
}

/// Classify a handler result against the writer state and stage the
/// completion frame for the success cases.
pub(crate) async fn settle(
    writer: &mut DataWriter<'_>,
    result: Result<(), Error>,
) -> Result<Outcome, Error> {
    match result {
        Ok(()) => {
            if writer.is_suspended() {
                return Ok(Outcome::Suspended);
            }
            if !writer.is_completed() {
                writer.complete("OK").await?;
            }
            Ok(Outcome::Completed)
        }
        Err(Error::ExecutionLimited) => Ok(Outcome::Suspended),
        Err(err) => {
            let info = err.to_error_info();
            if info.severity.is_notice() {
                // Sub-error severities surface as notices and do not abort.
                writer.stage(&protocol::notice_response(&info));
                if !writer.is_completed() {
                    writer.complete("OK").await?;
                }
                return Ok(Outcome::Completed);
            }
            Ok(Outcome::Failed(info))
        }
    }
}

/// Execute a portal on a pipeline worker, collecting output into the
/// task's buffer.
pub(crate) async fn execute_detached(
    ctx: Arc<SessionContext>,
    registry: Arc<TypeRegistry>,
    portal: Portal,
    max_rows: i32,
) -> TaskOutput {
    let mut buffer = BytesMut::new();

    for statement in portal.statement.statements.iter() {
        let formats = match resolve_result_formats(&portal.result_formats, statement.columns.len()) {
            Ok(formats) => formats,
            Err(err) => {
                buffer.extend_from_slice(&protocol::error_response(&err.to_error_info()));
                return TaskOutput { buffer, failed: true };
            }
        };

        let mut writer =
            DataWriter::buffered(registry.as_ref(), statement.columns(), formats, max_rows);
        let result = statement.handler.execute(&ctx, &mut writer, &portal.parameters).await;
        let outcome = match settle(&mut writer, result).await {
            Ok(outcome) => outcome,
            Err(err) => Outcome::Failed(err.to_error_info()),
        };
        buffer.extend_from_slice(&writer.into_staged());

        match outcome {
            Outcome::Completed => continue,
            Outcome::Suspended => {
                buffer.extend_from_slice(&protocol::portal_suspended());
                return TaskOutput { buffer, failed: false };
            }
            Outcome::Failed(info) => {
                buffer.extend_from_slice(&protocol::error_response(&info));
                return TaskOutput { buffer, failed: true };
            }
        }
    }

    TaskOutput { buffer, failed: false }
}

