//! Server lifecycle: the accept loop and graceful shutdown.

pub mod config;
pub mod parameters;

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use log::{debug, error, info, warn};
use scopeguard::defer;
use tokio::net::TcpListener;
use tokio::sync::{watch, Notify};

use crate::client::startup::run_connection;
use crate::errors::Error;
pub use config::{PipelineConfig, ServerConfig};
pub use parameters::ServerParameters;

struct ServerInner {
    config: Arc<ServerConfig>,
    /// Authoritative shutdown guard; set exactly once by the CAS in `close`.
    closing: AtomicBool,
    shutdown: watch::Sender<bool>,
    /// In-flight connection tasks.
    active: AtomicI64,
    drained: Notify,
}

/// The embeddable wire-protocol server. Cheap to clone; all clones share
/// one lifecycle.
#[derive(Clone)]
pub struct Server {
    inner: Arc<ServerInner>,
}

impl Server {
    pub fn new(config: ServerConfig) -> Self {
        let (shutdown, _) = watch::channel(false);
        Server {
            inner: Arc::new(ServerInner {
                config: Arc::new(config),
                closing: AtomicBool::new(false),
                shutdown,
                active: AtomicI64::new(0),
                drained: Notify::new(),
            }),
        }
    }

    pub fn is_closing(&self) -> bool {
        self.inner.closing.load(Ordering::SeqCst)
    }

    /// Accept connections until [`close`](Self::close) fires. Each accepted
    /// socket becomes a tracked task; accept errors are logged and the loop
    /// continues. Returns Ok after shutdown.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), Error> {
        let mut shutdown = self.inner.shutdown.subscribe();
        if *shutdown.borrow() {
            return Ok(());
        }
        if let Ok(addr) = listener.local_addr() {
            info!(
                "serving on {addr}, advertised server version {}",
                self.inner.config.version
            );
        }

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    debug!("shutdown signalled, closing the listener");
                    break;
                }
                accepted = listener.accept() => {
                    match accepted {
                        Ok((socket, addr)) => {
                            let _ = socket.set_nodelay(true);
                            self.spawn_connection(socket, addr);
                        }
                        Err(err) => {
                            if self.is_closing() {
                                debug!("accept after close: {err}");
                            } else {
                                error!("accept error: {err}");
                            }
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn spawn_connection(&self, socket: tokio::net::TcpStream, addr: std::net::SocketAddr) {
        let inner = self.inner.clone();
        inner.active.fetch_add(1, Ordering::SeqCst);

        tokio::spawn(async move {
            defer! {
                inner.active.fetch_sub(1, Ordering::SeqCst);
                inner.drained.notify_waiters();
            }

            debug!("client {addr} connected");
            let shutdown = inner.shutdown.subscribe();
            let result = run_connection(inner.config.clone(), shutdown, socket, addr).await;
            match result {
                Ok(()) => debug!("client {addr} disconnected"),
                Err(err) => {
                    // During shutdown, broken sockets are the expected way
                    // for connections to end; keep the log quiet.
                    if inner.closing.load(Ordering::SeqCst) {
                        debug!("client {addr} disconnected during shutdown: {err}");
                    } else {
                        warn!("client {addr} disconnected with error: {err}");
                    }
                }
            }
        });
    }

    /// Graceful shutdown: signal, stop accepting, and wait for in-flight
    /// connections to drain, bounded by the configured shutdown timeout.
    /// Idempotent; every call returns Ok.
    pub async fn close(&self) -> Result<(), Error> {
        if self
            .inner
            .closing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(());
        }

        let _ = self.inner.shutdown.send(true);

        let drain = async {
            loop {
                let notified = self.inner.drained.notified();
                if self.inner.active.load(Ordering::SeqCst) == 0 {
                    break;
                }
                notified.await;
            }
        };

        let timeout = self.inner.config.shutdown_timeout;
        if tokio::time::timeout(timeout, drain).await.is_err() {
            let abandoned = self.inner.active.load(Ordering::SeqCst);
            warn!("graceful shutdown timed out; abandoning {abandoned} connection(s)");
        } else {
            info!("all connections drained");
        }
        Ok(())
    }
}
