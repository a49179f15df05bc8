//! Proxy metrics for observability.
//!
//! Atomic counters recorded on the capture, dispatch, and session paths.
//! The overhead is minimal, making it safe to record metrics on every
//! frame.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::session::{CloseReason, Direction};

/// Atomic ordering used for metrics (Relaxed is sufficient for counters).
const METRIC_ORDERING: Ordering = Ordering::Relaxed;

/// Centralized metrics collection for the proxy.
#[derive(Debug, Default)]
pub struct ProxyMetrics {
    /// Frames delivered by the capture handle
    pub frames_captured: AtomicU64,
    /// Frames that were not IP/TCP or failed to slice
    pub non_tcp_frames: AtomicU64,
    /// Capture read errors survived by the receive loop
    pub read_errors: AtomicU64,

    /// Segments handed to a worker queue
    pub segments_dispatched: AtomicU64,
    /// Segments dropped by the drop_newest overflow policy
    pub segments_dropped: AtomicU64,
    /// Segments with no owning session that could not start one
    pub orphan_segments: AtomicU64,

    /// Sessions created
    pub sessions_opened: AtomicU64,
    /// Sessions closed by FIN
    pub sessions_closed_fin: AtomicU64,
    /// Sessions closed by RST
    pub sessions_closed_rst: AtomicU64,
    /// Sessions reclaimed by the idle sweeper
    pub sessions_expired: AtomicU64,
    /// New sessions refused because the table was full
    pub sessions_rejected_full: AtomicU64,

    /// Client-to-server payload bytes observed
    pub payload_bytes_in: AtomicU64,
    /// Server-to-client payload bytes observed
    pub payload_bytes_out: AtomicU64,
}

impl ProxyMetrics {
    /// Create a new metrics instance with all counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a shared metrics instance.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Record a frame delivered by the capture handle.
    pub fn frame_captured(&self) {
        self.frames_captured.fetch_add(1, METRIC_ORDERING);
    }

    /// Record a frame rejected by the decoder.
    pub fn non_tcp_frame(&self) {
        self.non_tcp_frames.fetch_add(1, METRIC_ORDERING);
    }

    /// Record a survived capture read error.
    pub fn read_error(&self) {
        self.read_errors.fetch_add(1, METRIC_ORDERING);
    }

    /// Record a segment handed to a worker queue.
    pub fn segment_dispatched(&self) {
        self.segments_dispatched.fetch_add(1, METRIC_ORDERING);
    }

    /// Record a segment dropped under backpressure.
    pub fn segment_dropped(&self) {
        self.segments_dropped.fetch_add(1, METRIC_ORDERING);
    }

    /// Record an orphan segment.
    pub fn orphan_segment(&self) {
        self.orphan_segments.fetch_add(1, METRIC_ORDERING);
    }

    /// Record a session creation.
    pub fn session_opened(&self) {
        self.sessions_opened.fetch_add(1, METRIC_ORDERING);
    }

    /// Record a session close with its reason.
    pub fn session_closed(&self, reason: CloseReason) {
        let counter = match reason {
            CloseReason::Fin => &self.sessions_closed_fin,
            CloseReason::Rst => &self.sessions_closed_rst,
            CloseReason::IdleTimeout => &self.sessions_expired,
        };
        counter.fetch_add(1, METRIC_ORDERING);
    }

    /// Record a new session refused at capacity.
    pub fn session_rejected_full(&self) {
        self.sessions_rejected_full.fetch_add(1, METRIC_ORDERING);
    }

    /// Record observed payload bytes for one direction.
    pub fn payload_bytes(&self, direction: Direction, len: usize) {
        let counter = match direction {
            Direction::ClientToServer => &self.payload_bytes_in,
            Direction::ServerToClient => &self.payload_bytes_out,
        };
        counter.fetch_add(len as u64, METRIC_ORDERING);
    }

    /// Take a point-in-time snapshot of all counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            frames_captured: self.frames_captured.load(METRIC_ORDERING),
            non_tcp_frames: self.non_tcp_frames.load(METRIC_ORDERING),
            read_errors: self.read_errors.load(METRIC_ORDERING),
            segments_dispatched: self.segments_dispatched.load(METRIC_ORDERING),
            segments_dropped: self.segments_dropped.load(METRIC_ORDERING),
            orphan_segments: self.orphan_segments.load(METRIC_ORDERING),
            sessions_opened: self.sessions_opened.load(METRIC_ORDERING),
            sessions_closed_fin: self.sessions_closed_fin.load(METRIC_ORDERING),
            sessions_closed_rst: self.sessions_closed_rst.load(METRIC_ORDERING),
            sessions_expired: self.sessions_expired.load(METRIC_ORDERING),
            sessions_rejected_full: self.sessions_rejected_full.load(METRIC_ORDERING),
            payload_bytes_in: self.payload_bytes_in.load(METRIC_ORDERING),
            payload_bytes_out: self.payload_bytes_out.load(METRIC_ORDERING),
        }
    }
}

/// Point-in-time copy of all proxy counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
    pub frames_captured: u64,
    pub non_tcp_frames: u64,
    pub read_errors: u64,
    pub segments_dispatched: u64,
    pub segments_dropped: u64,
    pub orphan_segments: u64,
    pub sessions_opened: u64,
    pub sessions_closed_fin: u64,
    pub sessions_closed_rst: u64,
    pub sessions_expired: u64,
    pub sessions_rejected_full: u64,
    pub payload_bytes_in: u64,
    pub payload_bytes_out: u64,
}
