//! Worker threads: one OS thread, one single-threaded runtime, one pool.
//!
//! Each worker owns everything it touches. Connections accepted by a worker
//! are served as local tasks on its `LocalSet` and never migrate, which is
//! what lets the pool and thread data live behind `Rc` without locks.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::task::LocalSet;
use tracing::{debug, warn};

use crate::connection::{self, ConnectionContext};
use crate::cors::CorsStyle;
use crate::date::HeaderStamp;
use crate::endpoint::Listener;
use crate::hammer::{self, HammerCursor, HammerReport};
use crate::handler::ServiceHandler;
use crate::pool::RequestPool;
use crate::protocol::EngineError;

/// How long a stopping worker waits for active requests to finish
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub(crate) struct WorkerConfig {
    pub(crate) thread_id: usize,
    pub(crate) request_pool_size: usize,
    pub(crate) idle_timeout: Duration,
    pub(crate) cors: CorsStyle,
}

/// What a worker serves: a cloned listener or its own hammer cursor.
#[derive(Debug)]
pub(crate) enum WorkerSource {
    Listener(Listener),
    Hammer(HammerCursor),
}

/// Starts a worker thread.
///
/// The worker reports readiness (or a thread-data failure) once through
/// `startup_tx` before serving anything; the supervisor blocks on that
/// barrier so a failed worker aborts the whole start.
pub(crate) fn spawn_worker<H: ServiceHandler>(
    handler: Arc<H>,
    config: WorkerConfig,
    source: WorkerSource,
    shutdown: watch::Receiver<bool>,
    startup_tx: std::sync::mpsc::Sender<Result<(), EngineError>>,
) -> std::io::Result<std::thread::JoinHandle<Result<Option<HammerReport>, EngineError>>> {
    std::thread::Builder::new()
        .name(format!("ember-worker-{}", config.thread_id))
        .spawn(move || run_worker(handler, config, source, shutdown, startup_tx))
}

fn run_worker<H: ServiceHandler>(
    handler: Arc<H>,
    config: WorkerConfig,
    source: WorkerSource,
    shutdown: watch::Receiver<bool>,
    startup_tx: std::sync::mpsc::Sender<Result<(), EngineError>>,
) -> Result<Option<HammerReport>, EngineError> {
    let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build()?;

    let thread_data = match handler.create_thread_data() {
        Ok(data) => Rc::new(data),
        Err(e) => {
            let reason = e.to_string();
            let _ = startup_tx.send(Err(e));
            return Err(EngineError::thread_data(reason));
        }
    };
    let _ = startup_tx.send(Ok(()));

    let local = LocalSet::new();
    runtime.block_on(local.run_until(async move {
        let pool = Rc::new(RefCell::new(RequestPool::new(config.request_pool_size)));
        let stamp = HeaderStamp::new(config.thread_id);
        let _refresh = stamp.spawn_refresh();

        let ctx = ConnectionContext {
            handler,
            pool: Rc::clone(&pool),
            thread_data,
            stamp,
            cors: config.cors,
            idle_timeout: config.idle_timeout,
        };

        match source {
            WorkerSource::Listener(listener) => {
                serve_listener(ctx, pool, listener, shutdown).await.map(|()| None)
            }
            WorkerSource::Hammer(cursor) => run_hammer(ctx, cursor, shutdown).await.map(Some),
        }
    }))
}

async fn serve_listener<H: ServiceHandler>(
    ctx: ConnectionContext<H>,
    pool: Rc<RefCell<RequestPool>>,
    listener: Listener,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), EngineError> {
    let listener = listener.into_async()?;
    debug!("worker accepting connections");

    loop {
        tokio::select! {
            // a dropped sender counts as shutdown too
            _ = shutdown.changed() => break,
            accepted = listener.accept() => match accepted {
                Ok((reader, writer)) => {
                    let ctx = ctx.clone();
                    tokio::task::spawn_local(async move {
                        if let Err(e) = connection::process(ctx, reader, writer).await {
                            debug!(cause = %e, "connection closed with error");
                        }
                    });
                }
                Err(e) => warn!(cause = %e, "accept failed"),
            },
        }
    }

    drain(&pool).await;
    Ok(())
}

/// Waits for in-flight requests to release their cores, bounded by
/// [`DRAIN_TIMEOUT`].
async fn drain(pool: &Rc<RefCell<RequestPool>>) {
    let deadline = Instant::now() + DRAIN_TIMEOUT;
    while pool.borrow().active() > 0 {
        if Instant::now() >= deadline {
            warn!(active = pool.borrow().active(), "drain deadline reached, abandoning requests");
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

async fn run_hammer<H: ServiceHandler>(
    ctx: ConnectionContext<H>,
    mut cursor: HammerCursor,
    shutdown: watch::Receiver<bool>,
) -> Result<HammerReport, EngineError> {
    let started = Instant::now();
    let mut requests = 0u64;

    while let Some(url) = cursor.next() {
        if *shutdown.borrow() {
            break;
        }
        let raw = hammer::render_request(url);
        let reader = std::io::Cursor::new(raw);
        connection::process(ctx.clone(), reader, Box::new(tokio::io::sink())).await?;
        requests += 1;
    }

    Ok(HammerReport { requests, elapsed: started.elapsed() })
}
