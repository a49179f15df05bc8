//! tapproxy - Passive TCP session proxy fed by live packet capture
//!
//! This library provides the core functionality for a capture-fed proxy that:
//! - Captures raw frames for one fronted service from a live interface
//! - Decodes IP/TCP framing and reassembles per-flow sessions
//! - Dispatches session data across a fixed pool of worker tasks
//! - Manages a slot-indexed pool of TLS credentials with exclusive checkout
//! - Runs under an event-driven supervisor with bounded shutdown

#[macro_use]
mod logging;

pub mod capture;
pub mod config;
pub mod error;
pub mod server;
pub mod session;
pub mod tls;

pub use capture::{decode_segment, Frame, LinkLayer, LiveCapture, PacketSource, TcpSegment};
pub use config::Config;
pub use error::{ProxyError, Result};
pub use server::{
    ControlEvent, ControlHandle, LoggingHandler, MetricsSnapshot, Proxy, ProxyMetrics, ProxyState,
    SegmentHandler, TaskHandle, TaskKind, TaskRegistry, WorkerPool, WORKER_MAX,
};
pub use session::{
    CloseReason, Direction, FlowKey, SegmentOutcome, ServiceEndpoint, Session, SessionPhase,
    SessionTable,
};
pub use tls::{ContextLease, SlotRole, TlsContextPool, TlsError};
