//! Proxy supervisor: owns the lifecycle of every component.
//!
//! The supervisor replaces ambient global state with one context object
//! built from [`Config`]. It is driven entirely by [`ControlEvent`]s — the
//! binary translates process signals into events, tests send them
//! directly — so shutdown and reload are ordinary control flow.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, watch};

use crate::capture::{capture_loop, LiveCapture, PacketSource};
use crate::config::Config;
use crate::error::{ProxyError, Result};
use crate::server::control::{control_channel, ControlEvent, ControlHandle};
use crate::server::{
    ProxyMetrics, SegmentHandler, TaskHandle, TaskKind, TaskRegistry, WorkerPool,
};
use crate::session::{spawn_sweeper, ServiceEndpoint, SessionTable};
use crate::tls::TlsContextPool;

/// Lifecycle state of the proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyState {
    /// Constructed, not yet running
    Init,
    /// Capture, workers, and sweeper are live
    Running,
    /// Shutdown in progress: stopping capture, joining tasks
    Stopping,
    /// All tasks joined, resources released
    Terminated,
}

/// The proxy context object.
///
/// Construct with [`Proxy::new`], then drive with [`Proxy::run`] (live
/// capture) or [`Proxy::run_with_source`] (any [`PacketSource`], used by
/// tests and embedders). Multiple independent instances can coexist in
/// one process.
pub struct Proxy {
    config: Arc<Config>,
    service: ServiceEndpoint,
    table: Arc<SessionTable>,
    metrics: Arc<ProxyMetrics>,
    tls_pool: Arc<TlsContextPool>,
    handler: Arc<dyn SegmentHandler>,
    control: ControlHandle,
    control_rx: mpsc::Receiver<ControlEvent>,
    state_tx: watch::Sender<ProxyState>,
}

impl std::fmt::Debug for Proxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Proxy").finish_non_exhaustive()
    }
}

impl Proxy {
    /// Build a proxy from configuration.
    ///
    /// Validates the config, builds the session table and metrics, and
    /// populates the TLS credential pool. TLS population failures are
    /// fatal here; per-slot tolerance applies only to reloads.
    pub fn new(config: Config, handler: Arc<dyn SegmentHandler>) -> Result<Self> {
        config.validate().map_err(ProxyError::Config)?;
        let service = config.service.endpoint()?;

        let tls_pool = Arc::new(TlsContextPool::from_config(&config.tls)?);
        let table = SessionTable::shared(
            service,
            std::time::Duration::from_secs(config.session.idle_timeout_secs),
            config.session.max_sessions,
        );
        let (control, control_rx) = control_channel();
        let (state_tx, _) = watch::channel(ProxyState::Init);

        Ok(Self {
            config: Arc::new(config),
            service,
            table,
            metrics: ProxyMetrics::shared(),
            tls_pool,
            handler,
            control,
            control_rx,
            state_tx,
        })
    }

    /// Handle for sending control events to this proxy.
    pub fn control(&self) -> ControlHandle {
        self.control.clone()
    }

    /// Shared metrics.
    pub fn metrics(&self) -> Arc<ProxyMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Shared session table.
    pub fn session_table(&self) -> Arc<SessionTable> {
        Arc::clone(&self.table)
    }

    /// Shared TLS credential pool.
    pub fn tls_pool(&self) -> Arc<TlsContextPool> {
        Arc::clone(&self.tls_pool)
    }

    /// Watch the proxy's lifecycle state.
    pub fn state(&self) -> watch::Receiver<ProxyState> {
        self.state_tx.subscribe()
    }

    /// Open live capture and run until shutdown.
    ///
    /// A capture-open failure is fatal and returns before anything is
    /// spawned.
    pub async fn run(self) -> Result<()> {
        let source = LiveCapture::open(&self.config.capture, &self.service)?;
        self.run_with_source(Box::new(source)).await
    }

    /// Run against an arbitrary packet source.
    ///
    /// Returns after a `Shutdown` control event (or a fatal capture
    /// failure, as an error), with every spawned task joined.
    pub async fn run_with_source(self, source: Box<dyn PacketSource>) -> Result<()> {
        let Proxy {
            config,
            service,
            table,
            metrics,
            tls_pool,
            handler,
            control,
            mut control_rx,
            state_tx,
        } = self;

        let (shutdown_tx, _) = broadcast::channel::<()>(4);
        let mut registry = TaskRegistry::new();

        let pool = Arc::new(WorkerPool::spawn(
            &config.workers,
            Arc::clone(&table),
            Arc::clone(&handler),
            Arc::clone(&metrics),
            &shutdown_tx,
            &mut registry,
        ));

        let sweeper = spawn_sweeper(
            Arc::clone(&table),
            Arc::clone(&handler),
            Arc::clone(&metrics),
            std::time::Duration::from_secs(config.session.sweep_interval_secs),
            shutdown_tx.subscribe(),
        );
        registry.register(TaskHandle::spawned(
            TaskKind::Sweeper,
            "session-sweeper",
            sweeper,
        ));

        let stop = Arc::new(AtomicBool::new(false));
        let capture_handle = {
            let pool = Arc::clone(&pool);
            let stop = Arc::clone(&stop);
            let metrics = Arc::clone(&metrics);
            let control = control.clone();
            tokio::task::spawn_blocking(move || capture_loop(source, pool, stop, metrics, control))
        };
        registry.register(TaskHandle::spawned(
            TaskKind::Capture,
            "capture",
            capture_handle,
        ));

        state_tx.send_replace(ProxyState::Running);
        info!(
            %service,
            workers = pool.worker_count(),
            "proxy running"
        );

        let mut run_result = Ok(());
        loop {
            match control_rx.recv().await {
                Some(ControlEvent::Shutdown) | None => {
                    info!("shutdown requested");
                    break;
                }
                Some(ControlEvent::ReloadTls) => {
                    let reloaded = tls_pool.reload().await;
                    info!(slots = reloaded, "TLS credential reload complete");
                }
                Some(ControlEvent::DumpStatus) => {
                    let snapshot = metrics.snapshot();
                    info!(?snapshot, sessions = table.len(), "status");
                    registry.dump();
                }
                Some(ControlEvent::CaptureFailed(reason)) => {
                    error!(%reason, "capture thread failed");
                    run_result = Err(ProxyError::Capture(reason));
                    break;
                }
            }
        }

        state_tx.send_replace(ProxyState::Stopping);
        stop.store(true, Ordering::Relaxed);
        let _ = shutdown_tx.send(());
        drop(pool);

        let join_result = registry.join_all().await;
        state_tx.send_replace(ProxyState::Terminated);

        let snapshot = metrics.snapshot();
        info!(
            frames = snapshot.frames_captured,
            sessions_opened = snapshot.sessions_opened,
            sessions_remaining = table.len(),
            "proxy stopped"
        );

        run_result.and(join_result)
    }
}
