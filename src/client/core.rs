//! Per-connection state.

use std::any::Any;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use ahash::AHashMap;
use parking_lot::RwLock;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::watch;

use crate::cache::{PortalCache, StatementCache};
use crate::client::pipeline::Pipeline;
use crate::messages::MessageReader;
use crate::server::config::ServerConfig;

/// The request-scoped context threaded through every host callback.
///
/// This is the shared, thread-safe part of a session: pipeline workers and
/// the command loop may hold it concurrently, so the attribute map sits
/// behind a lock. The caches are not here — they belong exclusively to the
/// command loop.
pub struct SessionContext {
    username: String,
    startup_parameters: HashMap<String, String>,
    attributes: RwLock<AHashMap<String, Box<dyn Any + Send + Sync>>>,
    process_id: i32,
    secret_key: i32,
    remote_addr: Option<SocketAddr>,
    tls: bool,
    shutdown: watch::Receiver<bool>,
}

impl SessionContext {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        username: String,
        startup_parameters: HashMap<String, String>,
        process_id: i32,
        secret_key: i32,
        remote_addr: Option<SocketAddr>,
        tls: bool,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        SessionContext {
            username,
            startup_parameters,
            attributes: RwLock::new(AHashMap::new()),
            process_id,
            secret_key,
            remote_addr,
            tls,
            shutdown,
        }
    }

    /// The authenticated user.
    pub fn username(&self) -> &str {
        &self.username
    }

    /// A client-supplied startup parameter (`database`, `application_name`, …).
    pub fn startup_parameter(&self, key: &str) -> Option<&str> {
        self.startup_parameters.get(key).map(String::as_str)
    }

    pub fn startup_parameters(&self) -> &HashMap<String, String> {
        &self.startup_parameters
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    pub fn is_tls(&self) -> bool {
        self.tls
    }

    /// The BackendKeyData pair handed to this client.
    pub fn backend_key(&self) -> (i32, i32) {
        (self.process_id, self.secret_key)
    }

    /// Store an arbitrary host value on the session.
    pub fn set_attribute<T: Send + Sync + 'static>(&self, key: impl Into<String>, value: T) {
        self.attributes.write().insert(key.into(), Box::new(value));
    }

    /// Read back an attribute by type; `None` if absent or of another type.
    pub fn attribute<T: Clone + 'static>(&self, key: &str) -> Option<T> {
        self.attributes
            .read()
            .get(key)
            .and_then(|value| value.downcast_ref::<T>())
            .cloned()
    }

    pub fn remove_attribute(&self, key: &str) {
        self.attributes.write().remove(key);
    }

    /// True once the server has entered shutdown or the connection is being
    /// torn down. Long-running handlers should poll this (or await
    /// [`shutdown_signal`](Self::shutdown_signal)) and wind down.
    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// A watch receiver that flips to `true` on shutdown.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.clone()
    }
}

/// One client connection after authentication: the frame reader/writer,
/// the statement and portal caches, and the protocol state bits.
pub(crate) struct Session<S, T> {
    pub(crate) read: MessageReader<S>,
    pub(crate) write: T,
    pub(crate) config: Arc<ServerConfig>,
    pub(crate) ctx: Arc<SessionContext>,
    pub(crate) statements: Box<dyn StatementCache>,
    pub(crate) portals: Box<dyn PortalCache>,
    /// Set after an error inside an extended batch; cleared by Sync.
    pub(crate) skip_until_sync: bool,
    pub(crate) pipeline: Option<Pipeline>,
}

impl<S, T> Session<S, T>
where
    S: AsyncRead + Send + Unpin,
    T: AsyncWrite + Send + Unpin,
{
    pub(crate) fn new(
        read: MessageReader<S>,
        write: T,
        config: Arc<ServerConfig>,
        ctx: Arc<SessionContext>,
    ) -> Self {
        let statements = (config.statements)();
        let portals = (config.portals)();
        let pipeline = if config.pipeline.enabled {
            Some(Pipeline::new(&config.pipeline))
        } else {
            None
        };
        Session {
            read,
            write,
            config,
            ctx,
            statements,
            portals,
            skip_until_sync: false,
            pipeline,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> SessionContext {
        let (_tx, rx) = watch::channel(false);
        SessionContext::new(
            "alice".into(),
            HashMap::from([("database".to_string(), "app".to_string())]),
            42,
            7,
            None,
            false,
            rx,
        )
    }

    #[test]
    fn attributes_round_trip_by_type() {
        let ctx = ctx();
        ctx.set_attribute("tenant", 17u64);
        assert_eq!(ctx.attribute::<u64>("tenant"), Some(17));
        assert_eq!(ctx.attribute::<String>("tenant"), None);
        ctx.remove_attribute("tenant");
        assert_eq!(ctx.attribute::<u64>("tenant"), None);
    }

    #[test]
    fn startup_parameters_are_visible() {
        let ctx = ctx();
        assert_eq!(ctx.startup_parameter("database"), Some("app"));
        assert_eq!(ctx.username(), "alice");
        assert_eq!(ctx.backend_key(), (42, 7));
    }

    #[test]
    fn shutdown_flag_tracks_sender() {
        let (tx, rx) = watch::channel(false);
        let ctx = SessionContext::new(
            "u".into(),
            HashMap::new(),
            1,
            2,
            None,
            false,
            rx,
        );
        assert!(!ctx.is_shutting_down());
        tx.send(true).unwrap();
        assert!(ctx.is_shutting_down());
    }
}
