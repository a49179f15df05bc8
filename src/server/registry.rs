//! Typed registry of the proxy's background tasks.
//!
//! Every long-lived task the supervisor spawns is recorded here with its
//! role, so shutdown can join them all and diagnostics can name them.

use std::fmt;

use tokio::task::JoinHandle;

use crate::error::{ProxyError, Result};

/// Role of a registered task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    /// The blocking packet-capture loop
    Capture,
    /// A segment-processing worker
    Worker,
    /// The idle-session sweeper
    Sweeper,
    /// Auxiliary control-plane task
    Control,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskKind::Capture => write!(f, "capture"),
            TaskKind::Worker => write!(f, "worker"),
            TaskKind::Sweeper => write!(f, "sweeper"),
            TaskKind::Control => write!(f, "control"),
        }
    }
}

/// Record of one spawned (or deliberately empty) task.
pub struct TaskHandle {
    kind: TaskKind,
    label: String,
    handle: Option<JoinHandle<()>>,
}

impl TaskHandle {
    /// Record a running task.
    pub fn spawned(kind: TaskKind, label: impl Into<String>, handle: JoinHandle<()>) -> Self {
        Self {
            kind,
            label: label.into(),
            handle: Some(handle),
        }
    }

    /// Record a slot that never started a task. Joining it succeeds
    /// immediately.
    pub fn empty(kind: TaskKind, label: impl Into<String>) -> Self {
        Self {
            kind,
            label: label.into(),
            handle: None,
        }
    }

    /// Role of this task.
    pub fn kind(&self) -> TaskKind {
        self.kind
    }

    /// Display label of this task.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Whether a task was ever recorded here (and not yet joined).
    pub fn is_populated(&self) -> bool {
        self.handle.is_some()
    }

    /// Wait for the task to finish.
    ///
    /// Returns `Ok(())` immediately if no task was ever recorded. A task
    /// panic is surfaced as an error, not swallowed.
    pub async fn join(&mut self) -> Result<()> {
        match self.handle.take() {
            None => Ok(()),
            Some(handle) => handle
                .await
                .map_err(|e| ProxyError::Task(format!("{} task failed: {}", self.label, e))),
        }
    }
}

/// Collection of all registered tasks.
#[derive(Default)]
pub struct TaskRegistry {
    tasks: Vec<TaskHandle>,
}

impl TaskRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a task.
    pub fn register(&mut self, handle: TaskHandle) {
        self.tasks.push(handle);
    }

    /// Number of registered tasks.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Join every registered task.
    ///
    /// All tasks are joined even if some fail; the first failure is
    /// returned.
    pub async fn join_all(&mut self) -> Result<()> {
        let mut first_error = None;
        for task in &mut self.tasks {
            if let Err(err) = task.join().await {
                error!(%err, "task join failed");
                if first_error.is_none() {
                    first_error = Some(err);
                }
            }
        }
        match first_error {
            None => Ok(()),
            Some(err) => Err(err),
        }
    }

    /// Write one diagnostic line per registered task.
    pub fn dump(&self) {
        for task in &self.tasks {
            info!(
                kind = %task.kind(),
                label = %task.label(),
                running = task.is_populated(),
                "registered task"
            );
        }
    }
}
