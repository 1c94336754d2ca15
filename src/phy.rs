//! The physical interface contract consumed by the network layer.

use std::time::Duration;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Duplex {
    /// The medium cannot receive while it is transmitting.
    Simplex,
    /// The medium can receive and transmit at once but not in both
    /// directions through the same radio/bus at the same instant.
    HalfDuplex,
    /// The medium can receive and transmit simultaneously.
    Duplex,
}

/// Static characteristics of a physical interface, used by the network layer
/// to decide whether a retransmission may be looped back onto the interface
/// it arrived on.
#[derive(Clone, Copy, Debug)]
pub struct PhysicalInterfaceOptions {
    pub duplex: Duplex,
    /// Time needed to switch from transmitting to receiving.
    pub tx_to_rx_time: Duration,
    /// Typical time to transmit one frame.
    pub tx_time: Duration,
    /// Whether a frame may be retransmitted back out of the interface it was
    /// received on (relevant on shared/broadcast media where other
    /// listeners besides the original sender may still need the relay).
    pub retransmit_back: bool,
    pub ring_buffer_size: usize,
}

impl Default for PhysicalInterfaceOptions {
    fn default() -> Self {
        Self {
            duplex: Duplex::HalfDuplex,
            tx_to_rx_time: Duration::from_millis(1),
            tx_time: Duration::from_millis(10),
            retransmit_back: false,
            ring_buffer_size: 2048,
        }
    }
}

/// A physical medium endpoint. The network layer owns the ring buffer that
/// accumulates bytes between decode passes; the interface just reports
/// whatever has newly arrived, accepts frames for transmission, and reports
/// whether it is still busy transmitting the previous one.
pub trait PhysicalInterface {
    /// Drains and returns any bytes that have arrived since the last call.
    fn poll_incoming(&mut self) -> Vec<u8>;

    /// Hands a fully-encoded channel frame off for transmission. Returns
    /// `false` if the interface could not accept it right now.
    fn send(&mut self, frame: &[u8]) -> bool;

    fn busy(&self) -> bool;

    fn options(&self) -> &PhysicalInterfaceOptions;
}
