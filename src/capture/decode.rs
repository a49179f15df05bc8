//! Frame decoding: link/IP/TCP validation and 4-tuple extraction.

use std::net::IpAddr;

use bytes::Bytes;
use etherparse::{NetSlice, SlicedPacket, TransportSlice};

use crate::error::{ProxyError, Result};
use crate::session::FlowKey;

/// Link layer of captured frames, derived from the capture handle's
/// datalink type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkLayer {
    /// Ethernet II framing (DLT_EN10MB)
    Ethernet,
    /// Linux cooked capture, 16-byte pseudo header (DLT_LINUX_SLL)
    LinuxSll,
    /// Linux cooked capture v2, 20-byte pseudo header (DLT_LINUX_SLL2)
    LinuxSll2,
    /// Raw IP, no link header (DLT_RAW)
    RawIp,
    /// BSD loopback, 4-byte family header (DLT_NULL)
    Loopback,
}

impl LinkLayer {
    /// Map a libpcap datalink value. Unknown datalinks are an open error,
    /// not a per-frame one: a capture handle whose framing we cannot parse
    /// is useless.
    pub fn from_dlt(dlt: i32) -> Result<Self> {
        match dlt {
            1 => Ok(LinkLayer::Ethernet),
            113 => Ok(LinkLayer::LinuxSll),
            276 => Ok(LinkLayer::LinuxSll2),
            12 | 101 => Ok(LinkLayer::RawIp),
            0 => Ok(LinkLayer::Loopback),
            other => Err(ProxyError::Capture(format!(
                "unsupported datalink type {}",
                other
            ))),
        }
    }
}

/// One decoded TCP segment.
#[derive(Debug, Clone)]
pub struct TcpSegment {
    /// 4-tuple in wire order (source -> destination)
    pub key: FlowKey,
    /// Sequence number
    pub seq: u32,
    /// Acknowledgment number
    pub ack: u32,
    /// Advertised receive window
    pub window: u16,
    /// SYN flag
    pub syn: bool,
    /// ACK flag
    pub ack_flag: bool,
    /// FIN flag
    pub fin: bool,
    /// RST flag
    pub rst: bool,
    /// Payload bytes (may be empty)
    pub payload: Bytes,
}

/// Validate that a frame is IP/TCP and extract its segment.
///
/// Returns `None` for anything else: truncated frames, non-IP protocols,
/// UDP/ICMP, and slices etherparse rejects. Callers count these; nothing
/// is logged per frame.
pub fn decode_segment(link: LinkLayer, data: &[u8]) -> Option<TcpSegment> {
    let sliced = match link {
        LinkLayer::Ethernet => SlicedPacket::from_ethernet(data).ok()?,
        LinkLayer::LinuxSll => SlicedPacket::from_ip(data.get(16..)?).ok()?,
        LinkLayer::LinuxSll2 => SlicedPacket::from_ip(data.get(20..)?).ok()?,
        LinkLayer::Loopback => SlicedPacket::from_ip(data.get(4..)?).ok()?,
        LinkLayer::RawIp => SlicedPacket::from_ip(data).ok()?,
    };

    let (src_addr, dst_addr) = match sliced.net? {
        NetSlice::Ipv4(v4) => (
            IpAddr::V4(v4.header().source_addr()),
            IpAddr::V4(v4.header().destination_addr()),
        ),
        NetSlice::Ipv6(v6) => (
            IpAddr::V6(v6.header().source_addr()),
            IpAddr::V6(v6.header().destination_addr()),
        ),
    };

    let tcp = match sliced.transport? {
        TransportSlice::Tcp(tcp) => tcp,
        _ => return None,
    };

    Some(TcpSegment {
        key: FlowKey::new(
            src_addr,
            tcp.source_port(),
            dst_addr,
            tcp.destination_port(),
        ),
        seq: tcp.sequence_number(),
        ack: tcp.acknowledgment_number(),
        window: tcp.window_size(),
        syn: tcp.syn(),
        ack_flag: tcp.ack(),
        fin: tcp.fin(),
        rst: tcp.rst(),
        payload: Bytes::copy_from_slice(tcp.payload()),
    })
}
