//! Live packet capture over libpcap.

use pcap::{Active, Capture};

use crate::capture::{Frame, LinkLayer, PacketSource};
use crate::config::CaptureConfig;
use crate::error::Result;
use crate::session::ServiceEndpoint;

/// Live capture handle on a network interface.
///
/// Opened non-promiscuous with a bounded snapshot length and a read
/// timeout; the timeout is what bounds shutdown latency for the capture
/// thread. A kernel-side BPF filter restricts delivery to the fronted
/// service's TCP traffic unless the configuration overrides it.
pub struct LiveCapture {
    capture: Capture<Active>,
    link: LinkLayer,
}

impl LiveCapture {
    /// Open the configured interface for live capture.
    ///
    /// # Errors
    ///
    /// Returns an error if the interface cannot be opened, the BPF filter
    /// does not compile, or the device's datalink framing is unsupported.
    /// Open failures are fatal to the proxy; there is no retry.
    pub fn open(config: &CaptureConfig, service: &ServiceEndpoint) -> Result<Self> {
        let filter = config.effective_filter(service);

        let mut capture = Capture::from_device(config.interface.as_str())?
            .promisc(config.promiscuous)
            .snaplen(config.snaplen as i32)
            .timeout(config.read_timeout_ms as i32)
            .immediate_mode(true)
            .open()?;
        capture.filter(&filter, true)?;

        let link = LinkLayer::from_dlt(capture.get_datalink().0)?;
        info!(
            interface = %config.interface,
            %filter,
            link = ?link,
            snaplen = config.snaplen,
            "capture opened"
        );

        Ok(Self { capture, link })
    }
}

impl PacketSource for LiveCapture {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        match self.capture.next_packet() {
            Ok(packet) => Ok(Some(Frame {
                data: packet.data.to_vec(),
            })),
            Err(pcap::Error::TimeoutExpired) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn link_layer(&self) -> LinkLayer {
        self.link
    }
}
