//! Packet capture: live source, frame decoding, and the receive loop.
//!
//! The capture side is deliberately narrow: a [`PacketSource`] yields raw
//! frames, [`decode_segment`] turns a frame into a [`TcpSegment`] or rejects
//! it, and [`capture_loop`] runs on a dedicated blocking thread feeding the
//! worker pool until the stop flag is raised or the source dies.

mod decode;
mod source;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::Result;
use crate::server::{ControlHandle, ProxyMetrics, WorkerPool};

pub use decode::{decode_segment, LinkLayer, TcpSegment};
pub use source::LiveCapture;

/// One raw frame as handed over by the capture facility.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Raw frame bytes, starting at the link layer
    pub data: Vec<u8>,
}

/// A source of captured frames.
///
/// `Ok(None)` means the read timed out with nothing to deliver; the caller
/// keeps looping. An `Err` is a read failure; the capture loop tolerates a
/// bounded run of consecutive failures before treating the source as dead.
pub trait PacketSource: Send {
    /// Block until the next frame, a read timeout, or an error.
    fn next_frame(&mut self) -> Result<Option<Frame>>;

    /// Link layer the source's frames start with.
    fn link_layer(&self) -> LinkLayer;
}

/// Consecutive read failures after which the source is considered dead.
const MAX_CONSECUTIVE_READ_ERRORS: u32 = 8;

/// Receive loop: runs on a blocking thread until stopped.
///
/// Decodes every captured frame and hands TCP segments to the worker pool.
/// Non-TCP frames are counted, not logged. A fatal source failure is
/// reported through the control handle so the supervisor observes it.
pub fn capture_loop(
    mut source: Box<dyn PacketSource>,
    pool: Arc<WorkerPool>,
    stop: Arc<AtomicBool>,
    metrics: Arc<ProxyMetrics>,
    control: ControlHandle,
) {
    let link = source.link_layer();
    let mut consecutive_errors = 0u32;

    while !stop.load(Ordering::Relaxed) {
        match source.next_frame() {
            Ok(Some(frame)) => {
                consecutive_errors = 0;
                metrics.frame_captured();
                match decode_segment(link, &frame.data) {
                    Some(segment) => pool.dispatch_blocking(segment),
                    None => metrics.non_tcp_frame(),
                }
            }
            Ok(None) => {
                consecutive_errors = 0;
            }
            Err(err) => {
                consecutive_errors += 1;
                metrics.read_error();
                warn!(%err, attempt = consecutive_errors, "capture read failed");
                if consecutive_errors >= MAX_CONSECUTIVE_READ_ERRORS {
                    error!(%err, "capture source failed repeatedly, giving up");
                    control.capture_failed(err.to_string());
                    return;
                }
            }
        }
    }
    debug!("capture loop stopped");
}
