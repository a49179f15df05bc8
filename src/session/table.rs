//! Session table: flow lookup, payload queues, and lifecycle.
//!
//! The table maps canonical (client -> service) 4-tuples to shared
//! [`Session`] records. Sessions are created only when a client SYN is
//! observed, close on FIN or RST from either direction, and are reclaimed
//! by a background sweeper once idle past the configured timeout.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::capture::TcpSegment;
use crate::server::{ProxyMetrics, SegmentHandler};
use crate::session::{Direction, FlowKey, ServiceEndpoint};

/// Why a session left the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// FIN observed in either direction
    Fin,
    /// RST observed in either direction
    Rst,
    /// No segment arrived within the idle timeout
    IdleTimeout,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::Fin => write!(f, "fin"),
            CloseReason::Rst => write!(f, "rst"),
            CloseReason::IdleTimeout => write!(f, "idle-timeout"),
        }
    }
}

/// Lifecycle phase of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Client SYN seen, waiting for the service's SYN-ACK
    SynSent,
    /// Handshake observed in both directions
    Established,
    /// Stream-terminating condition observed
    Closed(CloseReason),
}

/// Last-observed TCP control values for one direction of a flow.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlowCounters {
    /// Sequence number of the most recent segment
    pub seq: u32,
    /// Acknowledgment number of the most recent segment
    pub ack: u32,
    /// Advertised receive window
    pub window: u16,
}

struct SessionState {
    /// Client-to-server payload, in arrival order
    inbound: VecDeque<Bytes>,
    /// Server-to-client payload, in arrival order
    outbound: VecDeque<Bytes>,
    client: FlowCounters,
    server: FlowCounters,
    bytes_in: u64,
    bytes_out: u64,
    last_activity: Instant,
    phase: SessionPhase,
}

/// One tracked client/service exchange.
///
/// Sessions are shared via `Arc`; removal from the table never invalidates
/// a handle a worker still holds.
pub struct Session {
    id: Uuid,
    key: FlowKey,
    created_at: Instant,
    state: Mutex<SessionState>,
}

impl Session {
    fn new(key: FlowKey) -> Self {
        Self {
            id: Uuid::new_v4(),
            key,
            created_at: Instant::now(),
            state: Mutex::new(SessionState {
                inbound: VecDeque::new(),
                outbound: VecDeque::new(),
                client: FlowCounters::default(),
                server: FlowCounters::default(),
                bytes_in: 0,
                bytes_out: 0,
                last_activity: Instant::now(),
                phase: SessionPhase::SynSent,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Unique session identifier (for logs and correlation).
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Canonical (client -> service) flow key.
    pub fn key(&self) -> FlowKey {
        self.key
    }

    /// Time since the session was created.
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> SessionPhase {
        self.state().phase
    }

    /// Time since the last segment for this session arrived.
    pub fn idle_for(&self) -> Duration {
        self.state().last_activity.elapsed()
    }

    /// Last-observed TCP control values for one direction.
    pub fn counters(&self, direction: Direction) -> FlowCounters {
        let state = self.state();
        match direction {
            Direction::ClientToServer => state.client,
            Direction::ServerToClient => state.server,
        }
    }

    /// Total payload bytes observed in one direction since creation.
    pub fn bytes_observed(&self, direction: Direction) -> u64 {
        let state = self.state();
        match direction {
            Direction::ClientToServer => state.bytes_in,
            Direction::ServerToClient => state.bytes_out,
        }
    }

    /// Number of undrained payload chunks queued for one direction.
    pub fn queued(&self, direction: Direction) -> usize {
        let state = self.state();
        match direction {
            Direction::ClientToServer => state.inbound.len(),
            Direction::ServerToClient => state.outbound.len(),
        }
    }

    /// Remove and return all queued payload chunks for one direction,
    /// preserving arrival order.
    pub fn drain(&self, direction: Direction) -> Vec<Bytes> {
        let mut state = self.state();
        let queue = match direction {
            Direction::ClientToServer => &mut state.inbound,
            Direction::ServerToClient => &mut state.outbound,
        };
        queue.drain(..).collect()
    }

    /// Apply one segment: update counters, queue payload, advance the phase.
    /// Returns the close reason if this segment terminated the stream.
    fn apply(&self, direction: Direction, segment: &TcpSegment) -> Option<CloseReason> {
        let mut state = self.state();
        state.last_activity = Instant::now();

        let counters = match direction {
            Direction::ClientToServer => &mut state.client,
            Direction::ServerToClient => &mut state.server,
        };
        counters.seq = segment.seq;
        counters.ack = segment.ack;
        counters.window = segment.window;

        if !segment.payload.is_empty() {
            let len = segment.payload.len() as u64;
            match direction {
                Direction::ClientToServer => {
                    state.bytes_in += len;
                    state.inbound.push_back(segment.payload.clone());
                }
                Direction::ServerToClient => {
                    state.bytes_out += len;
                    state.outbound.push_back(segment.payload.clone());
                }
            }
        }

        if segment.rst {
            state.phase = SessionPhase::Closed(CloseReason::Rst);
            return Some(CloseReason::Rst);
        }
        if segment.fin {
            state.phase = SessionPhase::Closed(CloseReason::Fin);
            return Some(CloseReason::Fin);
        }
        if state.phase == SessionPhase::SynSent
            && direction == Direction::ServerToClient
            && segment.syn
            && segment.ack_flag
        {
            state.phase = SessionPhase::Established;
        }
        None
    }

    fn mark_closed(&self, reason: CloseReason) {
        self.state().phase = SessionPhase::Closed(reason);
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("phase", &self.phase())
            .finish()
    }
}

/// Result of recording one captured segment.
#[derive(Debug)]
pub enum SegmentOutcome {
    /// A new session was created for a client SYN
    Created(Arc<Session>),
    /// The segment was applied to an existing session
    Data(Arc<Session>, Direction),
    /// The segment terminated its session; the entry has been removed
    Closed(Arc<Session>, CloseReason),
    /// No owning session and the segment cannot start one
    Orphan,
    /// A new session was refused because the table is at capacity
    TableFull,
}

/// Hash-indexed lookup from canonical 4-tuple to session state.
///
/// The receive side (via workers) writes new entries and appends data;
/// the sweeper and status readers only read. Entries are `Arc`-shared so
/// teardown never races a worker still processing the session.
pub struct SessionTable {
    service: ServiceEndpoint,
    idle_timeout: Duration,
    max_sessions: usize,
    sessions: RwLock<HashMap<FlowKey, Arc<Session>>>,
}

impl SessionTable {
    /// Create a table for one fronted service.
    pub fn new(service: ServiceEndpoint, idle_timeout: Duration, max_sessions: usize) -> Self {
        Self {
            service,
            idle_timeout,
            max_sessions,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Create a shared instance wrapped in Arc.
    pub fn shared(service: ServiceEndpoint, idle_timeout: Duration, max_sessions: usize) -> Arc<Self> {
        Arc::new(Self::new(service, idle_timeout, max_sessions))
    }

    /// The service endpoint this table classifies against.
    pub fn service(&self) -> ServiceEndpoint {
        self.service
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.read_map().len()
    }

    /// Whether the table has no live sessions.
    pub fn is_empty(&self) -> bool {
        self.read_map().is_empty()
    }

    /// Whether a canonical key currently has a session.
    pub fn contains(&self, key: &FlowKey) -> bool {
        self.read_map().contains_key(key)
    }

    /// Look up a session by its canonical key.
    pub fn get(&self, key: &FlowKey) -> Option<Arc<Session>> {
        self.read_map().get(key).cloned()
    }

    fn read_map(&self) -> std::sync::RwLockReadGuard<'_, HashMap<FlowKey, Arc<Session>>> {
        self.sessions.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_map(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<FlowKey, Arc<Session>>> {
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Record one captured segment against the table.
    ///
    /// Lookup-or-create semantics: a session is created only for a client
    /// SYN toward the service. Payload bytes append to the owning
    /// direction's queue in arrival order. FIN or RST in either direction
    /// closes the session and removes it from the table.
    pub fn record_segment(&self, segment: &TcpSegment) -> SegmentOutcome {
        let Some(direction) = self.service.classify(&segment.key) else {
            return SegmentOutcome::Orphan;
        };
        let canonical = match direction {
            Direction::ClientToServer => segment.key,
            Direction::ServerToClient => segment.key.reversed(),
        };

        let existing = self.get(&canonical);
        let (session, created) = match existing {
            Some(session) => (session, false),
            None => {
                let starts_flow =
                    direction == Direction::ClientToServer && segment.syn && !segment.ack_flag;
                if !starts_flow {
                    return SegmentOutcome::Orphan;
                }
                let mut map = self.write_map();
                if map.len() >= self.max_sessions {
                    return SegmentOutcome::TableFull;
                }
                let session = Arc::new(Session::new(canonical));
                map.insert(canonical, Arc::clone(&session));
                debug!(session_id = %session.id(), flow = %canonical, "session created");
                (session, true)
            }
        };

        if let Some(reason) = session.apply(direction, segment) {
            self.write_map().remove(&canonical);
            debug!(session_id = %session.id(), flow = %canonical, %reason, "session closed");
            return SegmentOutcome::Closed(session, reason);
        }

        if created {
            SegmentOutcome::Created(session)
        } else {
            SegmentOutcome::Data(session, direction)
        }
    }

    /// Remove a session by canonical key, returning it if present.
    pub fn remove(&self, key: &FlowKey) -> Option<Arc<Session>> {
        self.write_map().remove(key)
    }

    /// Remove and return every session idle past the configured timeout.
    ///
    /// Removed sessions are marked closed with [`CloseReason::IdleTimeout`];
    /// the caller is responsible for close notifications.
    pub fn reap_idle(&self) -> Vec<Arc<Session>> {
        let timeout = self.idle_timeout;
        let mut removed = Vec::new();
        let mut map = self.write_map();
        map.retain(|_, session| {
            if session.idle_for() > timeout {
                session.mark_closed(CloseReason::IdleTimeout);
                removed.push(Arc::clone(session));
                false
            } else {
                true
            }
        });
        removed
    }
}

/// Start the background task that reclaims idle sessions.
///
/// Runs [`SessionTable::reap_idle`] every `interval` until the shutdown
/// signal arrives, notifying the handler for each reclaimed session.
pub fn spawn_sweeper(
    table: Arc<SessionTable>,
    handler: Arc<dyn SegmentHandler>,
    metrics: Arc<ProxyMetrics>,
    interval: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let removed = table.reap_idle();
                    if !removed.is_empty() {
                        debug!(removed = removed.len(), "idle sessions reclaimed");
                    }
                    for session in removed {
                        metrics.session_closed(CloseReason::IdleTimeout);
                        handler.on_session_close(&session, CloseReason::IdleTimeout);
                    }
                }
                _ = shutdown_rx.recv() => {
                    debug!("session sweeper shutting down");
                    break;
                }
            }
        }
    })
}
