//! End-to-end flow test: synthetic capture through the full proxy.
//!
//! Feeds crafted Ethernet frames for two interleaved flows through
//! `Proxy::run_with_source` and verifies that each session sees only its
//! own bytes, in arrival order, with open/close notifications.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use etherparse::PacketBuilder;
use tapproxy::{
    CloseReason, Config, Direction, Frame, LinkLayer, MetricsSnapshot, PacketSource, Proxy,
    ProxyState, Result, SegmentHandler, Session,
};

const SERVICE_ADDR: [u8; 4] = [10, 0, 0, 2];
const SERVICE_PORT: u16 = 443;

struct ScriptedSource {
    frames: VecDeque<Vec<u8>>,
}

impl ScriptedSource {
    fn new(frames: Vec<Vec<u8>>) -> Self {
        Self {
            frames: frames.into(),
        }
    }
}

impl PacketSource for ScriptedSource {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        match self.frames.pop_front() {
            Some(data) => Ok(Some(Frame { data })),
            None => {
                // Behave like a live handle with a read timeout
                std::thread::sleep(Duration::from_millis(10));
                Ok(None)
            }
        }
    }

    fn link_layer(&self) -> LinkLayer {
        LinkLayer::Ethernet
    }
}

struct FrameWriter;

impl FrameWriter {
    fn frame(
        src: [u8; 4],
        sport: u16,
        dst: [u8; 4],
        dport: u16,
        flags: &str,
        payload: &[u8],
    ) -> Vec<u8> {
        let tcp = PacketBuilder::ethernet2([1; 6], [2; 6])
            .ipv4(src, dst, 64)
            .tcp(sport, dport, 1000, 4096);
        let tcp = match flags {
            "syn" => tcp.syn(),
            "syn-ack" => tcp.syn().ack(1001),
            "fin" => tcp.fin().ack(1001),
            "rst" => tcp.rst(),
            _ => tcp.ack(1001),
        };
        let mut frame = Vec::with_capacity(payload.len() + 64);
        tcp.write(&mut frame, payload).unwrap();
        frame
    }

    fn to_service(client_port: u16, flags: &str, payload: &[u8]) -> Vec<u8> {
        Self::frame(
            [10, 0, 0, 1],
            client_port,
            SERVICE_ADDR,
            SERVICE_PORT,
            flags,
            payload,
        )
    }

    fn from_service(client_port: u16, flags: &str, payload: &[u8]) -> Vec<u8> {
        Self::frame(
            SERVICE_ADDR,
            SERVICE_PORT,
            [10, 0, 0, 1],
            client_port,
            flags,
            payload,
        )
    }
}

/// Records every notification tagged by the session's client port.
#[derive(Default)]
struct CollectingHandler {
    events: Mutex<Vec<(u16, String)>>,
}

impl CollectingHandler {
    fn events_for(&self, client_port: u16) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|(port, _)| *port == client_port)
            .map(|(_, event)| event.clone())
            .collect()
    }
}

impl SegmentHandler for CollectingHandler {
    fn on_session_open(&self, session: &Session) {
        self.events
            .lock()
            .unwrap()
            .push((session.key().src_port, "open".to_string()));
    }

    fn on_payload(&self, session: &Session, direction: Direction, payload: &[u8]) {
        self.events.lock().unwrap().push((
            session.key().src_port,
            format!("{} {}", direction, String::from_utf8_lossy(payload)),
        ));
    }

    fn on_session_close(&self, session: &Session, reason: CloseReason) {
        self.events
            .lock()
            .unwrap()
            .push((session.key().src_port, format!("close {}", reason)));
    }
}

async fn wait_for(
    metrics: &tapproxy::ProxyMetrics,
    predicate: impl Fn(&MetricsSnapshot) -> bool,
) -> MetricsSnapshot {
    for _ in 0..500 {
        let snapshot = metrics.snapshot();
        if predicate(&snapshot) {
            return snapshot;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached: {:?}", metrics.snapshot());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn two_interleaved_flows_produce_two_ordered_sessions() {
    // Flow A (port 40000) completes with FIN; flow B (port 41000) is
    // reset by the service. Their frames arrive interleaved.
    let frames = vec![
        FrameWriter::to_service(40000, "syn", b""),
        FrameWriter::to_service(41000, "syn", b""),
        FrameWriter::from_service(40000, "syn-ack", b""),
        FrameWriter::to_service(40000, "ack", b"hello "),
        FrameWriter::to_service(41000, "ack", b"b-data"),
        FrameWriter::from_service(40000, "ack", b"HELLO"),
        FrameWriter::to_service(40000, "ack", b"world"),
        FrameWriter::from_service(41000, "rst", b""),
        FrameWriter::to_service(40000, "fin", b""),
    ];

    let handler = Arc::new(CollectingHandler::default());
    let proxy = Proxy::new(
        Config::with_service("10.0.0.2", SERVICE_PORT),
        Arc::clone(&handler) as Arc<dyn SegmentHandler>,
    )
    .unwrap();
    let control = proxy.control();
    let metrics = proxy.metrics();
    let mut state = proxy.state();

    let run = tokio::spawn(proxy.run_with_source(Box::new(ScriptedSource::new(frames))));

    let snapshot = wait_for(&metrics, |s| {
        s.sessions_closed_fin == 1 && s.sessions_closed_rst == 1
    })
    .await;
    assert_eq!(snapshot.sessions_opened, 2);

    control.shutdown();
    tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .expect("run did not stop in time")
        .unwrap()
        .unwrap();
    assert_eq!(*state.borrow_and_update(), ProxyState::Terminated);

    // Each session saw only its own bytes, in arrival order
    assert_eq!(
        handler.events_for(40000),
        vec![
            "open",
            "client->server hello ",
            "server->client HELLO",
            "client->server world",
            "close fin",
        ]
    );
    assert_eq!(
        handler.events_for(41000),
        vec!["open", "client->server b-data", "close rst"]
    );

    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.payload_bytes_in, 17); // "hello world" + "b-data"
    assert_eq!(snapshot.payload_bytes_out, 5);
    assert_eq!(snapshot.non_tcp_frames, 0);
    assert_eq!(snapshot.orphan_segments, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn non_tcp_and_orphan_traffic_is_counted_silently() {
    let udp = {
        let builder = PacketBuilder::ethernet2([1; 6], [2; 6])
            .ipv4([10, 0, 0, 1], SERVICE_ADDR, 64)
            .udp(40000, SERVICE_PORT);
        let mut frame = Vec::new();
        builder.write(&mut frame, b"dgram").unwrap();
        frame
    };
    let frames = vec![
        udp,
        // Traffic for an unrelated host:port pair
        FrameWriter::frame([10, 0, 0, 8], 5000, [10, 0, 0, 9], 80, "ack", b"x"),
        // Data for a flow whose SYN was never seen
        FrameWriter::to_service(40000, "ack", b"no-syn"),
    ];

    let handler = Arc::new(CollectingHandler::default());
    let proxy = Proxy::new(
        Config::with_service("10.0.0.2", SERVICE_PORT),
        Arc::clone(&handler) as Arc<dyn SegmentHandler>,
    )
    .unwrap();
    let control = proxy.control();
    let metrics = proxy.metrics();

    let run = tokio::spawn(proxy.run_with_source(Box::new(ScriptedSource::new(frames))));

    wait_for(&metrics, |s| s.non_tcp_frames == 1 && s.orphan_segments == 2).await;

    control.shutdown();
    tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .expect("run did not stop in time")
        .unwrap()
        .unwrap();

    assert!(handler.events.lock().unwrap().is_empty());
    assert_eq!(metrics.snapshot().sessions_opened, 0);
}
