//! # TCP server core
//!
//! Owns the listening endpoints, runs one accept loop per endpoint on the
//! `accept` worker and hands every accepted [`Connection`] to a
//! [`ClientHandler`] on the connection `worker`, so slow handlers never
//! starve acceptance.
//!
//! ```text
//! bind(addrs) ──► endpoints ──start()──► accept loop ──► handle_client(conn)
//!                    ▲                        │
//!                    └──── stop(): cancel ────┘
//! ```

mod connection;
mod endpoint;
pub mod scheduler;

use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::config::{
    ConfigError, ConfigRegistry, ServerConfig, Subscription, ACCEPT_WORKER, CONNECTION_WORKER,
};

pub use connection::Connection;
pub use endpoint::{Acceptor, Endpoint};
pub use scheduler::{Scheduler, Task, TokioScheduler};

const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(60);
/// Pause after a failed accept, so a persistent failure such as running out
/// of file descriptors doesn't spin the accept worker.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("couldn't bind {}", .failed.join(", "))]
    Bind { failed: Vec<String> },
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Per-connection protocol. Each call owns `conn` until it returns and must
/// leave it closed.
#[async_trait]
pub trait ClientHandler: Send + Sync + 'static {
    async fn handle_client(&self, conn: Connection) {
        info!(peer = %conn.peer_addr(), "client connected, no protocol installed");
        conn.close().await;
    }
}

/// Accepts and closes.
pub struct NoopHandler;

impl ClientHandler for NoopHandler {}

struct Inner<H> {
    config: ServerConfig,
    handler: Arc<H>,
    scheduler: Arc<dyn Scheduler>,
    running: AtomicBool,
    /// Bumped by every `stop`; accept loops from an earlier run retire.
    generation: AtomicU64,
    endpoints: Mutex<Vec<Arc<Endpoint>>>,
    timeout_ms: Arc<AtomicU64>,
}

impl<H> Inner<H> {
    fn endpoints(&self) -> MutexGuard<'_, Vec<Arc<Endpoint>>> {
        self.endpoints.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn is_current(&self, generation: u64) -> bool {
        self.running.load(Ordering::SeqCst) && self.generation.load(Ordering::SeqCst) == generation
    }
}

pub struct TcpServer<H> {
    inner: Arc<Inner<H>>,
}

impl<H> Clone for TcpServer<H> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<H: ClientHandler> TcpServer<H> {
    pub fn new(
        config: ServerConfig,
        handler: H,
        scheduler: Arc<dyn Scheduler>,
    ) -> Result<Self, ServerError> {
        config.validate()?;
        let timeout_ms = Arc::new(AtomicU64::new(config.timeout_ms));

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                handler: Arc::new(handler),
                scheduler,
                running: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                endpoints: Mutex::new(Vec::new()),
                timeout_ms,
            }),
        })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.inner.config
    }

    pub fn handler(&self) -> &Arc<H> {
        &self.inner.handler
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Receive timeout the next accepted connection will get.
    pub fn recv_timeout_ms(&self) -> u64 {
        self.inner.timeout_ms.load(Ordering::SeqCst)
    }

    /// Follows `<name>.timeout_ms` in `registry`. The registry's current
    /// value, if any, takes effect immediately.
    pub fn watch_config(&self, registry: &ConfigRegistry) -> Subscription {
        let key = self.inner.config.timeout_key();
        if let Some(ms) = registry.get_u64(&key) {
            self.inner.timeout_ms.store(ms, Ordering::SeqCst);
        }

        let timeout_ms = self.inner.timeout_ms.clone();
        let name = self.inner.config.name.clone();
        registry.subscribe(&key, move |value| match value.as_u64() {
            Some(ms) => {
                info!(server = %name, timeout_ms = ms, "receive timeout updated");
                timeout_ms.store(ms, Ordering::SeqCst);
            }
            None => warn!(server = %name, "ignoring non-numeric timeout {}", value),
        })
    }

    /// Binds every address from the server's configuration.
    pub async fn bind_configured(&self) -> Result<(), ServerError> {
        let addresses = self.inner.config.addresses.clone();
        self.bind(&addresses).await
    }

    /// All-or-nothing: if any address fails, every endpoint created by this
    /// call is released and the failed addresses are reported.
    pub async fn bind(&self, addresses: &[String]) -> Result<(), ServerError> {
        let mut bound = Vec::with_capacity(addresses.len());
        let mut failed = Vec::new();

        for addr in addresses {
            match Endpoint::bind(addr) {
                Ok(ep) => {
                    debug!(server = %self.inner.config.name, addr = %ep.local_addr(), "bound");
                    bound.push(Arc::new(ep));
                }
                Err(e) => {
                    error!(server = %self.inner.config.name, addr = %addr, "bind failed: {}", e);
                    failed.push(addr.clone());
                }
            }
        }

        if !failed.is_empty() {
            drop(bound);
            return Err(ServerError::Bind { failed });
        }

        let mut endpoints = self.inner.endpoints();
        if self.is_running() {
            for ep in &bound {
                self.spawn_accept_loop(ep.clone());
            }
        }
        endpoints.extend(bound);
        Ok(())
    }

    pub async fn bound_addrs(&self) -> Vec<SocketAddr> {
        let endpoints = self.inner.endpoints();
        endpoints.iter().map(|ep| ep.local_addr()).collect()
    }

    /// Starts one accept loop per bound endpoint. A no-op when already
    /// running.
    pub async fn start(&self) -> Result<(), ServerError> {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            debug!(server = %self.inner.config.name, "already running");
            return Ok(());
        }

        let endpoints = self.inner.endpoints();
        for ep in endpoints.iter() {
            self.spawn_accept_loop(ep.clone());
        }
        info!(
            server = %self.inner.config.name,
            endpoints = endpoints.len(),
            "server started"
        );
        Ok(())
    }

    /// Clears the running flag, detaches every endpoint bound so far and
    /// schedules a cleanup on the accept worker that cancels their pending
    /// accepts and releases them. Endpoints bound after this call belong to
    /// the next `start`. Handlers already dispatched keep running until their
    /// connection ends.
    pub fn stop(&self) {
        self.inner.running.store(false, Ordering::SeqCst);
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        let detached = std::mem::take(&mut *self.inner.endpoints());

        let name = self.inner.config.name.clone();
        let cleanup = async move {
            for ep in detached {
                ep.cancel_all();
                info!(server = %name, addr = %ep.local_addr(), "endpoint closed");
            }
        };
        self.inner
            .scheduler
            .schedule(Box::pin(cleanup), self.inner.config.worker(ACCEPT_WORKER));
    }

    fn spawn_accept_loop(&self, ep: Arc<Endpoint>) {
        let inner = self.inner.clone();
        let generation = inner.generation.load(Ordering::SeqCst);
        self.inner.scheduler.schedule(
            Box::pin(accept_loop(inner, ep, generation)),
            self.inner.config.worker(ACCEPT_WORKER),
        );
    }
}

async fn accept_loop<H, A>(inner: Arc<Inner<H>>, ep: Arc<A>, generation: u64)
where
    H: ClientHandler,
    A: Acceptor,
{
    let addr = ep.local_addr();
    debug!(server = %inner.config.name, %addr, "accept loop running");

    while inner.is_current(generation) {
        let accepted = match ep.accept().await {
            Some(accepted) => accepted,
            None => break,
        };

        match accepted {
            Ok((stream, peer)) => {
                if !inner.is_current(generation) {
                    debug!(server = %inner.config.name, %peer, "dropping connection to a stopped endpoint");
                    break;
                }
                let mut conn = Connection::new(stream, peer);
                conn.set_recv_timeout(inner.timeout_ms.load(Ordering::SeqCst));
                if inner.config.keepalive {
                    if let Err(e) = conn.set_keepalive(KEEPALIVE_INTERVAL) {
                        warn!(%peer, "couldn't enable keepalive: {}", e);
                    }
                }
                debug!(server = %inner.config.name, %peer, "accepted");

                let handler = inner.handler.clone();
                inner.scheduler.schedule(
                    Box::pin(async move { handler.handle_client(conn).await }),
                    inner.config.worker(CONNECTION_WORKER),
                );
            }
            Err(e) => {
                warn!(server = %inner.config.name, %addr, "accept failed: {}", e);
                tokio::time::sleep(ACCEPT_BACKOFF).await;
            }
        }
    }

    debug!(server = %inner.config.name, %addr, "accept loop finished");
}
