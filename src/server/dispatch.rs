//! Worker pool: bounded hand-off between the capture thread and the
//! segment-processing workers.
//!
//! Segments are routed by hashing the client endpoint of their flow, so
//! every segment of one session reaches the same worker and per-session
//! arrival order is preserved without cross-worker locking.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};

use crate::capture::TcpSegment;
use crate::config::{OverflowPolicy, WorkerConfig};
use crate::server::{ProxyMetrics, TaskHandle, TaskKind, TaskRegistry};
use crate::session::{CloseReason, Direction, FlowKey, SegmentOutcome, Session, SessionTable};

/// Upper bound on the worker pool size.
pub const WORKER_MAX: usize = 20;

/// Observer of session lifecycle and payload on the worker path.
///
/// Implementations must be cheap or move work elsewhere; callbacks run on
/// the worker that owns the session.
pub trait SegmentHandler: Send + Sync {
    /// A session was created for a client SYN.
    fn on_session_open(&self, _session: &Session) {}

    /// One payload chunk was drained from a session queue, in arrival
    /// order within its direction.
    fn on_payload(&self, _session: &Session, _direction: Direction, _payload: &[u8]) {}

    /// A session left the table.
    fn on_session_close(&self, _session: &Session, _reason: CloseReason) {}
}

/// Default handler: structured debug logging only.
pub struct LoggingHandler;

impl SegmentHandler for LoggingHandler {
    fn on_session_open(&self, session: &Session) {
        debug!(session_id = %session.id(), flow = %session.key(), "session opened");
    }

    fn on_payload(&self, session: &Session, direction: Direction, payload: &[u8]) {
        trace!(
            session_id = %session.id(),
            %direction,
            bytes = payload.len(),
            "payload observed"
        );
    }

    fn on_session_close(&self, session: &Session, reason: CloseReason) {
        debug!(session_id = %session.id(), flow = %session.key(), %reason, "session closed");
    }
}

/// Fixed pool of segment-processing workers behind bounded queues.
pub struct WorkerPool {
    senders: Vec<mpsc::Sender<TcpSegment>>,
    policy: OverflowPolicy,
    metrics: Arc<ProxyMetrics>,
    table: Arc<SessionTable>,
}

impl WorkerPool {
    /// Spawn the configured number of workers and register them.
    pub fn spawn(
        config: &WorkerConfig,
        table: Arc<SessionTable>,
        handler: Arc<dyn SegmentHandler>,
        metrics: Arc<ProxyMetrics>,
        shutdown: &broadcast::Sender<()>,
        registry: &mut TaskRegistry,
    ) -> Self {
        let count = config.count.clamp(1, WORKER_MAX);
        let mut senders = Vec::with_capacity(count);

        for i in 0..count {
            let (tx, rx) = mpsc::channel(config.queue_depth);
            let handle = tokio::spawn(worker_loop(
                rx,
                Arc::clone(&table),
                Arc::clone(&handler),
                Arc::clone(&metrics),
                shutdown.subscribe(),
            ));
            registry.register(TaskHandle::spawned(
                TaskKind::Worker,
                format!("worker-{}", i),
                handle,
            ));
            senders.push(tx);
        }

        Self {
            senders,
            policy: config.overflow,
            metrics,
            table,
        }
    }

    /// Number of workers in the pool.
    pub fn worker_count(&self) -> usize {
        self.senders.len()
    }

    /// Pick the worker owning a flow. Both directions of one session hash
    /// to the same index.
    fn route(&self, key: &FlowKey) -> usize {
        let (addr, port) = match self.table.service().classify(key) {
            Some(Direction::ServerToClient) => (key.dst_addr, key.dst_port),
            _ => (key.src_addr, key.src_port),
        };
        let mut hasher = DefaultHasher::new();
        addr.hash(&mut hasher);
        port.hash(&mut hasher);
        (hasher.finish() as usize) % self.senders.len()
    }

    /// Hand a segment to its worker from the capture thread.
    ///
    /// Under the `block` policy this waits for queue space (backpressure
    /// propagates into the capture buffer); under `drop_newest` a full
    /// queue drops the segment and counts it. Must not be called from
    /// async context; use [`WorkerPool::dispatch`] there.
    pub fn dispatch_blocking(&self, segment: TcpSegment) {
        let idx = self.route(&segment.key);
        match self.policy {
            OverflowPolicy::Block => {
                if self.senders[idx].blocking_send(segment).is_ok() {
                    self.metrics.segment_dispatched();
                }
            }
            OverflowPolicy::DropNewest => match self.senders[idx].try_send(segment) {
                Ok(()) => self.metrics.segment_dispatched(),
                Err(mpsc::error::TrySendError::Full(_)) => self.metrics.segment_dropped(),
                Err(mpsc::error::TrySendError::Closed(_)) => {}
            },
        }
    }

    /// Async variant of [`WorkerPool::dispatch_blocking`].
    pub async fn dispatch(&self, segment: TcpSegment) {
        let idx = self.route(&segment.key);
        match self.policy {
            OverflowPolicy::Block => {
                if self.senders[idx].send(segment).await.is_ok() {
                    self.metrics.segment_dispatched();
                }
            }
            OverflowPolicy::DropNewest => match self.senders[idx].try_send(segment) {
                Ok(()) => self.metrics.segment_dispatched(),
                Err(mpsc::error::TrySendError::Full(_)) => self.metrics.segment_dropped(),
                Err(mpsc::error::TrySendError::Closed(_)) => {}
            },
        }
    }
}

async fn worker_loop(
    mut rx: mpsc::Receiver<TcpSegment>,
    table: Arc<SessionTable>,
    handler: Arc<dyn SegmentHandler>,
    metrics: Arc<ProxyMetrics>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            maybe = rx.recv() => match maybe {
                Some(segment) => process_segment(&table, &handler, &metrics, &segment),
                None => break,
            },
            _ = shutdown_rx.recv() => {
                // Drain what is already queued so close notifications
                // are not lost, then exit.
                while let Ok(segment) = rx.try_recv() {
                    process_segment(&table, &handler, &metrics, &segment);
                }
                break;
            }
        }
    }
    debug!("worker stopped");
}

fn process_segment(
    table: &SessionTable,
    handler: &Arc<dyn SegmentHandler>,
    metrics: &ProxyMetrics,
    segment: &TcpSegment,
) {
    match table.record_segment(segment) {
        SegmentOutcome::Created(session) => {
            metrics.session_opened();
            handler.on_session_open(&session);
            deliver_payload(&session, handler, metrics);
        }
        SegmentOutcome::Data(session, _) => {
            deliver_payload(&session, handler, metrics);
        }
        SegmentOutcome::Closed(session, reason) => {
            deliver_payload(&session, handler, metrics);
            metrics.session_closed(reason);
            handler.on_session_close(&session, reason);
        }
        SegmentOutcome::Orphan => metrics.orphan_segment(),
        SegmentOutcome::TableFull => metrics.session_rejected_full(),
    }
}

fn deliver_payload(session: &Arc<Session>, handler: &Arc<dyn SegmentHandler>, metrics: &ProxyMetrics) {
    for direction in [Direction::ClientToServer, Direction::ServerToClient] {
        for chunk in session.drain(direction) {
            metrics.payload_bytes(direction, chunk.len());
            handler.on_payload(session, direction, &chunk);
        }
    }
}
