//! Control events: the typed replacement for signal-flag polling.
//!
//! Process signals are translated (at the binary edge) into these events
//! and delivered over a channel the supervisor selects on, so shutdown and
//! reload are ordinary control flow rather than asynchronous flags.

use tokio::sync::mpsc;

/// Queue depth for control events. Control traffic is tiny; this only has
/// to absorb a burst of status requests.
const CONTROL_QUEUE_DEPTH: usize = 32;

/// An event directed at the supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlEvent {
    /// Stop the proxy: drain, join all tasks, return
    Shutdown,
    /// Re-read TLS credential files (the SIGUSR1 action)
    ReloadTls,
    /// Log a runtime status snapshot (the SIGUSR2 action)
    DumpStatus,
    /// The capture thread died; carries the cause
    CaptureFailed(String),
}

/// Cloneable sender half used by signal tasks, the capture thread, and
/// tests to drive the supervisor.
#[derive(Clone)]
pub struct ControlHandle {
    tx: mpsc::Sender<ControlEvent>,
}

impl ControlHandle {
    fn send(&self, event: ControlEvent) {
        // A full queue means the supervisor already has work pending; a
        // closed one means it already stopped. Either way the event can
        // be discarded.
        let _ = self.tx.try_send(event);
    }

    /// Request a graceful stop.
    pub fn shutdown(&self) {
        self.send(ControlEvent::Shutdown);
    }

    /// Request a TLS credential reload.
    pub fn reload_tls(&self) {
        self.send(ControlEvent::ReloadTls);
    }

    /// Request a status snapshot in the log.
    pub fn dump_status(&self) {
        self.send(ControlEvent::DumpStatus);
    }

    /// Report a dead capture source.
    pub fn capture_failed(&self, reason: String) {
        self.send(ControlEvent::CaptureFailed(reason));
    }
}

/// Create the control channel pair.
pub(crate) fn control_channel() -> (ControlHandle, mpsc::Receiver<ControlEvent>) {
    let (tx, rx) = mpsc::channel(CONTROL_QUEUE_DEPTH);
    (ControlHandle { tx }, rx)
}
