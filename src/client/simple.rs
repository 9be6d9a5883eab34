//! The simple-query subprotocol.

use bytes::BytesMut;
use log::debug;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::cache::resolve_result_formats;
use crate::client::core::Session;
use crate::client::extended::{settle, Outcome};
use crate::errors::Error;
use crate::messages::constants::TransactionStatus;
use crate::messages::frontend::parse_query;
use crate::messages::protocol;
use crate::writer::DataWriter;

impl<S, T> Session<S, T>
where
    S: AsyncRead + Send + Unpin,
    T: AsyncWrite + Send + Unpin,
{
    /// One Query ('Q') message: parse the whole text once, run each
    /// returned statement against an implicit unnamed portal with empty
    /// parameters and text results, and finish with a single ReadyForQuery.
    pub(crate) async fn on_query(&mut self, payload: BytesMut) -> Result<(), Error> {
        // A simple query is a synchronization point of its own; any queued
        // extended work flushes first.
        self.drain_pipeline().await?;

        let query = match parse_query(payload) {
            Ok(query) => query,
            Err(err) => return self.fail_simple(err).await,
        };

        // Nothing but whitespace and semicolons is the empty query.
        if query
            .trim_matches(|c: char| c.is_whitespace() || c == ';')
            .is_empty()
        {
            protocol::write_all(&mut self.write, &protocol::empty_query_response()).await?;
            return self.ready_for_query().await;
        }

        let ctx = self.ctx.clone();
        let parser = self.config.parser.clone();
        let statements = match parser.parse(&ctx, &query).await {
            Ok(statements) => statements,
            Err(err) => return self.fail_simple(err).await,
        };
        debug!("simple query produced {} statement(s)", statements.len());

        for statement in statements.iter() {
            // Simple-query semantics: the row description always precedes
            // the rows, text format everywhere.
            if !statement.columns().is_empty() {
                protocol::write_all(
                    &mut self.write,
                    &protocol::row_description(statement.columns(), &[]),
                )
                .await?;
            }

            let formats = resolve_result_formats(&[], statement.columns().len())?;
            let registry = self.config.registry.clone();
            let mut writer = DataWriter::streaming(
                &mut self.write,
                &mut self.read,
                registry.as_ref(),
                statement.columns(),
                formats,
                0,
            );
            let result = statement.handler.execute(&ctx, &mut writer, &[]).await;
            let outcome = settle(&mut writer, result).await?;
            writer.drain_staged().await?;
            drop(writer);

            match outcome {
                Outcome::Completed => continue,
                // No row limit applies here; suspension cannot happen, but
                // treat it as completion if a handler manufactures it.
                Outcome::Suspended => continue,
                Outcome::Failed(info) => {
                    // Abort the rest of the batch; the trailing
                    // ReadyForQuery still goes out.
                    protocol::write_all(&mut self.write, &protocol::error_response(&info)).await?;
                    break;
                }
            }
        }

        self.ready_for_query().await
    }

    /// Error before any statement ran: one ErrorResponse, one ReadyForQuery.
    async fn fail_simple(&mut self, err: Error) -> Result<(), Error> {
        if err.is_fatal() {
            return Err(err);
        }
        protocol::write_all(
            &mut self.write,
            &protocol::error_response(&err.to_error_info()),
        )
        .await?;
        self.ready_for_query().await
    }

    /// The single ReadyForQuery that closes every simple-query batch and
    /// every Sync. This library does not manage transactions; the status
    /// indicator is always idle.
    pub(crate) async fn ready_for_query(&mut self) -> Result<(), Error> {
        protocol::write_all_flush(
            &mut self.write,
            &protocol::ready_for_query(TransactionStatus::Idle),
        )
        .await
    }
}
