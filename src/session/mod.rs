//! Session tracking for captured TCP flows.
//!
//! A session is the proxy's in-memory record of one client/service exchange:
//! two ordered payload queues (one per direction), TCP sequencing state, and
//! a lifecycle phase. Sessions are keyed by the client-side 4-tuple and live
//! in a [`SessionTable`] shared between the worker pool and the background
//! idle sweeper.

mod key;
mod table;

pub use key::{Direction, FlowKey, ServiceEndpoint};
pub use table::{
    spawn_sweeper, CloseReason, FlowCounters, SegmentOutcome, Session, SessionPhase, SessionTable,
};
