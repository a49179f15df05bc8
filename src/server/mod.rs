//! Proxy runtime: supervisor, worker dispatch, task registry, and metrics.

mod control;
mod dispatch;
mod metrics;
mod registry;
mod supervisor;

pub use control::{ControlEvent, ControlHandle};
pub use dispatch::{LoggingHandler, SegmentHandler, WorkerPool, WORKER_MAX};
pub use metrics::{MetricsSnapshot, ProxyMetrics};
pub use registry::{TaskHandle, TaskKind, TaskRegistry};
pub use supervisor::{Proxy, ProxyState};
