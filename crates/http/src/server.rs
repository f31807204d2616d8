//! Server supervisor: binds the endpoint, spawns workers, joins them.
//!
//! The listener is bound once at build time and cloned into every worker, so
//! the kernel load-balances accepts across threads. `run` blocks the calling
//! thread until every worker exits, either because a [`ShutdownHandle`] fired
//! or, in hammer mode, because every cursor ran dry.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::mpsc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info};

use crate::cors::CorsStyle;
use crate::endpoint::{Endpoint, Listener};
use crate::hammer::{HammerCursor, HammerReport};
use crate::handler::ServiceHandler;
use crate::protocol::EngineError;
use crate::worker::{WorkerConfig, WorkerSource, spawn_worker};

const DEFAULT_BACKLOG: i32 = 128;
const DEFAULT_POOL_SIZE: usize = 1024;
const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Configures and builds a [`Server`].
pub struct ServerBuilder<H: ServiceHandler> {
    endpoint: Endpoint,
    handler: Arc<H>,
    num_threads: usize,
    backlog: i32,
    request_pool_size: usize,
    idle_timeout: Duration,
    cors: CorsStyle,
}

impl<H: ServiceHandler> ServerBuilder<H> {
    fn new(endpoint: Endpoint, handler: H) -> Self {
        Self {
            endpoint,
            handler: Arc::new(handler),
            num_threads: 1,
            backlog: DEFAULT_BACKLOG,
            request_pool_size: DEFAULT_POOL_SIZE,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            cors: CorsStyle::default(),
        }
    }

    /// Number of worker threads.
    pub fn threads(mut self, num: usize) -> Self {
        self.num_threads = num;
        self
    }

    /// Pending-connection queue length passed to `listen`.
    pub fn backlog(mut self, backlog: i32) -> Self {
        self.backlog = backlog;
        self
    }

    /// Per-worker bound on concurrently active requests.
    pub fn request_pool_size(mut self, size: usize) -> Self {
        self.request_pool_size = size;
        self
    }

    /// How long a connection may sit idle before it is closed.
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Which access-control header block responses carry.
    pub fn cors(mut self, style: CorsStyle) -> Self {
        self.cors = style;
        self
    }

    /// Validates the configuration and binds the endpoint.
    pub fn build(self) -> Result<Server<H>, EngineError> {
        if self.num_threads == 0 {
            return Err(EngineError::config("num_threads must be at least 1"));
        }
        if self.request_pool_size == 0 {
            return Err(EngineError::config("request_pool_size must be at least 1"));
        }
        if self.backlog <= 0 {
            return Err(EngineError::config("backlog must be positive"));
        }

        let listener = self.endpoint.bind(self.backlog)?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Ok(Server {
            endpoint: self.endpoint,
            handler: self.handler,
            listener,
            num_threads: self.num_threads,
            request_pool_size: self.request_pool_size,
            idle_timeout: self.idle_timeout,
            cors: self.cors,
            shutdown_tx: Arc::new(shutdown_tx),
            shutdown_rx,
        })
    }
}

impl<H: ServiceHandler> std::fmt::Debug for ServerBuilder<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerBuilder")
            .field("endpoint", &self.endpoint)
            .field("num_threads", &self.num_threads)
            .finish()
    }
}

/// A built server, ready to run.
pub struct Server<H: ServiceHandler> {
    endpoint: Endpoint,
    handler: Arc<H>,
    listener: Option<Listener>,
    num_threads: usize,
    request_pool_size: usize,
    idle_timeout: Duration,
    cors: CorsStyle,
    shutdown_tx: Arc<watch::Sender<bool>>,
    shutdown_rx: watch::Receiver<bool>,
}

/// Result of a completed run.
#[derive(Debug, Default)]
pub struct RunReport {
    /// Aggregated hammer statistics, present only for hammer runs.
    pub hammer: Option<HammerReport>,
}

/// Signals every worker of one server to stop accepting and drain.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        let _ = self.tx.send(true);
    }
}

impl<H: ServiceHandler> Server<H> {
    /// TCP server on all interfaces; port 0 picks a free port.
    pub fn tcp(port: u16, handler: H) -> ServerBuilder<H> {
        ServerBuilder::new(Endpoint::Tcp { port }, handler)
    }

    /// Unix-domain-socket server.
    #[cfg(unix)]
    pub fn unix<P: Into<std::path::PathBuf>>(path: P, handler: H) -> ServerBuilder<H> {
        ServerBuilder::new(Endpoint::Unix { path: path.into() }, handler)
    }

    /// Server over a listening descriptor the embedder already bound.
    #[cfg(unix)]
    pub fn fd(fd: std::os::fd::RawFd, handler: H) -> ServerBuilder<H> {
        ServerBuilder::new(Endpoint::Fd { fd }, handler)
    }

    /// Synthetic-load run replaying `urls` through normal dispatch `repeat`
    /// times per worker.
    pub fn hammer(urls: Vec<String>, repeat: u32, handler: H) -> ServerBuilder<H> {
        ServerBuilder::new(Endpoint::Hammer { urls, repeat }, handler)
    }

    /// The bound TCP address, once built. `None` for unix and hammer servers.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().and_then(|l| l.local_addr().ok().flatten())
    }

    /// A handle that can stop this server from any thread.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle { tx: Arc::clone(&self.shutdown_tx) }
    }

    /// Runs the server to completion on the calling thread.
    ///
    /// Every worker must come up before any traffic is considered served; a
    /// thread-data failure on any worker stops the rest and surfaces here.
    pub fn run(self) -> Result<RunReport, EngineError> {
        info!(threads = self.num_threads, endpoint = ?self.endpoint, "starting server");

        let (startup_tx, startup_rx) = mpsc::channel();
        let mut joins = Vec::with_capacity(self.num_threads);

        for thread_id in 0..self.num_threads {
            let source = match (&self.listener, &self.endpoint) {
                (Some(listener), _) => WorkerSource::Listener(listener.try_clone()?),
                (None, Endpoint::Hammer { urls, repeat }) => {
                    WorkerSource::Hammer(HammerCursor::new(urls.clone(), *repeat))
                }
                (None, _) => return Err(EngineError::worker("endpoint bound no listener")),
            };
            let config = WorkerConfig {
                thread_id,
                request_pool_size: self.request_pool_size,
                idle_timeout: self.idle_timeout,
                cors: self.cors,
            };
            let join = spawn_worker(
                Arc::clone(&self.handler),
                config,
                source,
                self.shutdown_rx.clone(),
                startup_tx.clone(),
            )?;
            joins.push(join);
        }
        drop(startup_tx);

        let mut first_error = None;
        for _ in 0..self.num_threads {
            match startup_rx.recv() {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!(cause = %e, "worker failed to start, stopping server");
                    let _ = self.shutdown_tx.send(true);
                    first_error.get_or_insert(e);
                }
                Err(_) => break,
            }
        }

        let mut report = RunReport::default();
        for join in joins {
            match join.join() {
                Ok(Ok(Some(hammer))) => {
                    report.hammer.get_or_insert_with(HammerReport::default).merge(hammer);
                }
                Ok(Ok(None)) => {}
                Ok(Err(e)) => {
                    error!(cause = %e, "worker exited with error");
                    first_error.get_or_insert(e);
                }
                Err(_) => {
                    first_error.get_or_insert(EngineError::worker("worker thread panicked"));
                }
            }
        }

        #[cfg(unix)]
        if let Endpoint::Unix { path } = &self.endpoint {
            let _ = std::fs::remove_file(path);
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }
}

impl<H: ServiceHandler> std::fmt::Debug for Server<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("endpoint", &self.endpoint)
            .field("num_threads", &self.num_threads)
            .finish()
    }
}
