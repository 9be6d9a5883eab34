//! Server configuration. Everything here is read-only once `serve` starts.

use std::sync::Arc;
use std::time::Duration;

use crate::auth::{AuthStrategy, Trust};
use crate::cache::{
    PortalCache, StatementCache, UnboundedPortalCache, UnboundedStatementCache,
};
use crate::client::SessionContext;
use crate::errors::Error;
use crate::messages::constants::DEFAULT_MAX_MESSAGE_SIZE;
use crate::server::parameters::ServerParameters;
use crate::statements::{QueryParser, SessionMiddleware};
use crate::types::{Oid, TypeRegistry, ValueCodec};

pub type StatementCacheFactory = Arc<dyn Fn() -> Box<dyn StatementCache> + Send + Sync>;
pub type PortalCacheFactory = Arc<dyn Fn() -> Box<dyn PortalCache> + Send + Sync>;
/// Invoked when a connection ends cleanly.
pub type CloseHook = Arc<dyn Fn(&SessionContext) + Send + Sync>;
/// Invoked when a connection ends on an error, with that error.
pub type TerminateHook = Arc<dyn Fn(&SessionContext, &Error) + Send + Sync>;

/// Parallel execution of independent extended-query operations between
/// Syncs. Off by default.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub enabled: bool,
    /// Worker cap; 0 means one per CPU.
    pub max_concurrency: usize,
    /// Outstanding-operation cap before the loop drains the window early.
    pub max_queue_depth: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            enabled: false,
            max_concurrency: 0,
            max_queue_depth: 64,
        }
    }
}

impl PipelineConfig {
    pub(crate) fn effective_concurrency(&self) -> usize {
        if self.max_concurrency == 0 {
            num_cpus::get()
        } else {
            self.max_concurrency
        }
    }
}

/// Process-wide configuration: the host callbacks and every tunable the
/// options surface exposes.
pub struct ServerConfig {
    pub(crate) parser: Arc<dyn QueryParser>,
    pub(crate) auth: Arc<dyn AuthStrategy>,
    pub(crate) tls_acceptor: Option<tokio_native_tls::TlsAcceptor>,
    pub(crate) version: String,
    pub(crate) parameters: ServerParameters,
    pub(crate) registry: Arc<TypeRegistry>,
    pub(crate) statements: StatementCacheFactory,
    pub(crate) portals: PortalCacheFactory,
    pub(crate) session_middleware: Option<Arc<dyn SessionMiddleware>>,
    pub(crate) close_conn: Option<CloseHook>,
    pub(crate) terminate_conn: Option<TerminateHook>,
    pub(crate) pipeline: PipelineConfig,
    pub(crate) max_message_size: usize,
    pub(crate) shutdown_timeout: Duration,
    pub(crate) read_timeout: Option<Duration>,
}

impl ServerConfig {
    pub fn new(parser: impl QueryParser + 'static) -> Self {
        let version = "17.0".to_string();
        ServerConfig {
            parser: Arc::new(parser),
            auth: Arc::new(Trust),
            tls_acceptor: None,
            parameters: ServerParameters::new(&version),
            version,
            registry: Arc::new(TypeRegistry::built_in()),
            statements: Arc::new(|| {
                Box::new(UnboundedStatementCache::default()) as Box<dyn StatementCache>
            }),
            portals: Arc::new(|| Box::new(UnboundedPortalCache::default()) as Box<dyn PortalCache>),
            session_middleware: None,
            close_conn: None,
            terminate_conn: None,
            pipeline: PipelineConfig::default(),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            shutdown_timeout: Duration::from_secs(1),
            read_timeout: None,
        }
    }

    /// The version string advertised in `server_version`.
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self.parameters.set("server_version", self.version.clone());
        self
    }

    pub fn with_auth(mut self, auth: impl AuthStrategy + 'static) -> Self {
        self.auth = Arc::new(auth);
        self
    }

    pub fn with_tls(mut self, acceptor: tokio_native_tls::TlsAcceptor) -> Self {
        self.tls_acceptor = Some(acceptor);
        self
    }

    /// Build the TLS acceptor from a certificate/key identity.
    pub fn with_tls_identity(self, identity: native_tls::Identity) -> Result<Self, Error> {
        let acceptor = native_tls::TlsAcceptor::new(identity)
            .map_err(|err| Error::TlsError(err.to_string()))?;
        Ok(self.with_tls(tokio_native_tls::TlsAcceptor::from(acceptor)))
    }

    /// Add or override a ParameterStatus entry advertised at session setup.
    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.set(key, value);
        self
    }

    /// Register host codecs for additional type OIDs.
    pub fn with_types(mut self, types: Vec<(Oid, Arc<dyn ValueCodec>)>) -> Self {
        let mut registry = TypeRegistry::built_in();
        for (oid, codec) in types {
            registry.extend(oid, codec);
        }
        self.registry = Arc::new(registry);
        self
    }

    pub fn with_statement_cache(mut self, factory: StatementCacheFactory) -> Self {
        self.statements = factory;
        self
    }

    pub fn with_portal_cache(mut self, factory: PortalCacheFactory) -> Self {
        self.portals = factory;
        self
    }

    pub fn with_session_middleware(mut self, middleware: impl SessionMiddleware + 'static) -> Self {
        self.session_middleware = Some(Arc::new(middleware));
        self
    }

    pub fn with_close_conn(mut self, hook: impl Fn(&SessionContext) + Send + Sync + 'static) -> Self {
        self.close_conn = Some(Arc::new(hook));
        self
    }

    pub fn with_terminate_conn(
        mut self,
        hook: impl Fn(&SessionContext, &Error) + Send + Sync + 'static,
    ) -> Self {
        self.terminate_conn = Some(Arc::new(hook));
        self
    }

    pub fn with_pipeline(mut self, pipeline: PipelineConfig) -> Self {
        self.pipeline = pipeline;
        self
    }

    /// Cap on a single frontend message payload.
    pub fn with_message_buffer_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    /// How long `close` waits for in-flight connections before giving up.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Optional per-read deadline on idle connections.
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self
    }
}
