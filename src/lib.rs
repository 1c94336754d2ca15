//! A layered communication stack for small, unreliable, possibly broadcast
//! physical media (radios, serial buses, shared buses).
//!
//! Three layers compose bottom-up: [`channel`] frames a byte stream into
//! checksummed records and resyncs past corruption; [`network`] addresses,
//! deduplicates, and flood-forwards packages across any number of physical
//! interfaces; [`transport`] multiplexes packages by port and runs
//! fire-and-forget datagram sockets alongside reliable, connection-oriented
//! sockets with retransmission and acknowledgement coalescing.
//!
//! [`system`] and [`phy`] are the pluggable collaborators every layer is
//! built against: a clock/randomness source, and a physical-interface
//! contract. [`testing`] provides an in-memory medium implementing that
//! contract, used by the test suite and the `loopback_chat` example.

pub mod buffer;
pub mod channel;
mod hash;
pub mod network;
pub mod phy;
pub mod system;
pub mod testing;
pub mod transport;
pub mod util;

pub use buffer::{Buffer, SegmentBuffer};
pub use network::{Address, NetworkLayer, BROADCAST_ADDR};
pub use phy::{Duplex, PhysicalInterface, PhysicalInterfaceOptions};
pub use system::{DeterministicSystemDriver, RealSystemDriver, SystemDriver};
