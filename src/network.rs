//! Network layer: addressed, hop-limited, deduplicated flood forwarding on
//! top of any number of physical interfaces.

use std::collections::VecDeque;

use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::buffer::{Buffer, RingBuffer, SegmentBuffer};
use crate::channel::{Channel, ChannelError};
use crate::phy::PhysicalInterface;
use crate::system::SystemDriver;
use crate::util::CachingSet;

/// Node address. The wire format below can encode up to 4 bytes of it; an
/// address needing more overflows [`encode_header`].
pub type Address = u64;

/// Address accepted by every node in addition to its own.
pub const BROADCAST_ADDR: Address = 0xFF;

const MAX_FRAME_SIZE: usize = 1024;
const DEDUP_CAPACITY: usize = 100;
const DEFAULT_HOP_LIMIT: u8 = 10;

#[derive(Error, Debug)]
pub enum NetworkHeaderError {
    #[error("address {0} does not fit in 4 bytes")]
    AddressTooWide(Address),
    #[error("truncated network header")]
    Truncated,
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct NetworkHeader {
    source_addr: Address,
    destination_addr: Address,
    package_id: u16,
    hop_limit: u8,
}

fn width_for(addr: Address) -> Result<u8, NetworkHeaderError> {
    for w in 1..=4u32 {
        if addr < (1u128 << (w * 8)) as u64 {
            return Ok(w as u8);
        }
    }
    Err(NetworkHeaderError::AddressTooWide(addr))
}

fn encode_header(header: &NetworkHeader) -> Result<Vec<u8>, NetworkHeaderError> {
    let src_w = width_for(header.source_addr)?;
    let dst_w = width_for(header.destination_addr)?;

    let mut out = Vec::with_capacity(2 + 2 + src_w as usize + dst_w as usize);

    let hop_nibble = if header.hop_limit >= 0xF {
        0xF
    } else {
        header.hop_limit
    };
    out.push((hop_nibble << 4) | ((dst_w - 1) << 2) | (src_w - 1));
    if hop_nibble == 0xF {
        out.push(header.hop_limit);
    }
    out.extend_from_slice(&header.package_id.to_le_bytes());
    out.extend_from_slice(&header.source_addr.to_be_bytes()[8 - src_w as usize..]);
    out.extend_from_slice(&header.destination_addr.to_be_bytes()[8 - dst_w as usize..]);
    Ok(out)
}

/// Decodes a header from the front of `data`, returning the header and the
/// number of bytes it occupied.
fn decode_header(data: &[u8]) -> Result<(NetworkHeader, usize), NetworkHeaderError> {
    if data.is_empty() {
        return Err(NetworkHeaderError::Truncated);
    }
    let first = data[0];
    let src_w = (first & 0b11) as usize + 1;
    let dst_w = ((first >> 2) & 0b11) as usize + 1;
    let hop_nibble = first >> 4;

    let mut pos = 1;
    let hop_limit = if hop_nibble == 0xF {
        let b = *data.get(pos).ok_or(NetworkHeaderError::Truncated)?;
        pos += 1;
        b
    } else {
        hop_nibble
    };

    let id_bytes = data
        .get(pos..pos + 2)
        .ok_or(NetworkHeaderError::Truncated)?;
    let package_id = u16::from_le_bytes([id_bytes[0], id_bytes[1]]);
    pos += 2;

    let src_bytes = data
        .get(pos..pos + src_w)
        .ok_or(NetworkHeaderError::Truncated)?;
    let source_addr = be_bytes_to_addr(src_bytes);
    pos += src_w;

    let dst_bytes = data
        .get(pos..pos + dst_w)
        .ok_or(NetworkHeaderError::Truncated)?;
    let destination_addr = be_bytes_to_addr(dst_bytes);
    pos += dst_w;

    Ok((
        NetworkHeader {
            source_addr,
            destination_addr,
            package_id,
            hop_limit,
        },
        pos,
    ))
}

fn be_bytes_to_addr(bytes: &[u8]) -> Address {
    let mut v: Address = 0;
    for &b in bytes {
        v = (v << 8) | b as Address;
    }
    v
}

/// A package delivered to this node's upstack (transport layer).
#[derive(Clone, Debug)]
pub struct Package {
    pub source_addr: Address,
    pub data: Buffer,
}

struct PhysicalSlot {
    iface: Box<dyn PhysicalInterface>,
    ring: RingBuffer,
    channel: Channel,
    outgoing: VecDeque<Buffer>,
}

/// One node's view of the network: its address, its attached physical
/// interfaces, and the dedup/forwarding logic that ties them together.
pub struct NetworkLayer<S: SystemDriver> {
    sys: S,
    addr: Address,
    incoming: VecDeque<Package>,
    interfaces: Vec<PhysicalSlot>,
    already_received: CachingSet<u16>,
}

impl<S: SystemDriver> NetworkLayer<S> {
    pub fn new(sys: S, addr: Address) -> Self {
        Self {
            sys,
            addr,
            incoming: VecDeque::new(),
            interfaces: Vec::new(),
            already_received: CachingSet::new(DEDUP_CAPACITY),
        }
    }

    pub fn addr(&self) -> Address {
        self.addr
    }

    pub fn add_physical(&mut self, iface: Box<dyn PhysicalInterface>) {
        let ring_size = iface.options().ring_buffer_size;
        self.interfaces.push(PhysicalSlot {
            iface,
            ring: RingBuffer::new(ring_size),
            channel: Channel::new(MAX_FRAME_SIZE),
            outgoing: VecDeque::new(),
        });
    }

    /// Originates a new package. Locally-acceptable destinations are
    /// delivered to this node's own incoming queue (and, unless the
    /// destination is exactly this node's address, also flooded out).
    pub fn send(&mut self, data: Buffer, destination_addr: Address, hop_limit: u8) {
        let package_id = self.random_id();

        if self.address_acceptable(destination_addr) {
            self.already_received.check_update(package_id);
            self.incoming.push_back(Package {
                source_addr: self.addr,
                data: data.clone(),
            });
            if destination_addr == self.addr {
                return;
            }
        } else {
            self.already_received.check_update(package_id);
        }

        let header = NetworkHeader {
            source_addr: self.addr,
            destination_addr,
            package_id,
            hop_limit,
        };
        self.enqueue_on_all(&header, data, None);
    }

    pub fn incoming(&mut self) -> Option<Package> {
        self.incoming.pop_front()
    }

    pub fn serve(&mut self) {
        self.serve_incoming();
        self.serve_outgoing();
    }

    fn serve_incoming(&mut self) {
        for i in 0..self.interfaces.len() {
            let frames = {
                let slot = &mut self.interfaces[i];
                let fresh = slot.iface.poll_incoming();
                slot.ring.write(&fresh);
                slot.channel.decode(&mut slot.ring)
            };
            for frame in frames {
                self.handle_frame(frame, i);
            }
        }
    }

    fn handle_frame(&mut self, frame: Buffer, arrived_on: usize) {
        let (header, consumed) = match decode_header(frame.as_slice()) {
            Ok(v) => v,
            Err(err) => {
                warn!(?err, "dropping frame with malformed network header");
                return;
            }
        };
        let payload = Buffer::from(&frame.as_slice()[consumed..]);

        if self.already_received.check_update(header.package_id) {
            trace!(id = header.package_id, "dropping duplicate package");
            return;
        }

        if self.address_acceptable(header.destination_addr) {
            self.incoming.push_back(Package {
                source_addr: header.source_addr,
                data: payload.clone(),
            });
        }

        if header.destination_addr != self.addr {
            self.retransmit(header, payload, arrived_on);
        }
    }

    fn retransmit(&mut self, header: NetworkHeader, payload: Buffer, arrived_on: usize) {
        let Some(hop_limit) = header.hop_limit.checked_sub(1) else {
            debug!(id = header.package_id, "hop limit exhausted, dropping");
            return;
        };
        let forwarded = NetworkHeader { hop_limit, ..header };
        self.enqueue_on_all(&forwarded, payload, Some(arrived_on));
    }

    fn enqueue_on_all(&mut self, header: &NetworkHeader, payload: Buffer, skip: Option<usize>) {
        let Ok(header_bytes) = encode_header(header) else {
            warn!(addr = header.source_addr, "address too wide to encode, dropping");
            return;
        };

        for (i, slot) in self.interfaces.iter_mut().enumerate() {
            if Some(i) == skip && !slot.iface.options().retransmit_back {
                continue;
            }
            let seg = SegmentBuffer::from_buffer(payload.clone());
            let mut seg = seg;
            seg.push_front(Buffer::from(&header_bytes[..]));
            match slot.channel.encode(seg) {
                Ok(framed) => slot.outgoing.push_back(framed.merge()),
                Err(err) => warn!(?err, "package too large to frame"),
            }
        }
    }

    fn serve_outgoing(&mut self) {
        for slot in &mut self.interfaces {
            while !slot.iface.busy() {
                let Some(frame) = slot.outgoing.pop_front() else {
                    break;
                };
                if !slot.iface.send(frame.as_slice()) {
                    slot.outgoing.push_front(frame);
                    break;
                }
            }
        }
    }

    fn address_acceptable(&self, addr: Address) -> bool {
        addr == self.addr || addr == BROADCAST_ADDR
    }

    fn random_id(&self) -> u16 {
        self.sys.random_nonzero()
    }
}

pub(crate) fn default_hop_limit() -> u8 {
    DEFAULT_HOP_LIMIT
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_round_trip_small_addrs() {
        let header = NetworkHeader {
            source_addr: 123,
            destination_addr: 321,
            package_id: 7,
            hop_limit: 10,
        };
        let bytes = encode_header(&header).unwrap();
        let (decoded, consumed) = decode_header(&bytes).unwrap();
        assert_eq!(decoded, header);
        assert_eq!(consumed, bytes.len());
    }

    #[test]
    fn test_header_round_trip_high_hop_limit() {
        let header = NetworkHeader {
            source_addr: 1,
            destination_addr: 0xFF,
            package_id: 0xBEEF,
            hop_limit: 200,
        };
        let bytes = encode_header(&header).unwrap();
        let (decoded, _) = decode_header(&bytes).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn test_width_for() {
        assert_eq!(width_for(0).unwrap(), 1);
        assert_eq!(width_for(255).unwrap(), 1);
        assert_eq!(width_for(256).unwrap(), 2);
        assert_eq!(width_for(0xFFFF_FFFF).unwrap(), 4);
        assert!(width_for(0x1_0000_0000).is_err());
    }

    #[test]
    fn test_address_acceptable() {
        let net = NetworkLayer::new(crate::system::RealSystemDriver, 42);
        assert!(net.address_acceptable(42));
        assert!(net.address_acceptable(BROADCAST_ADDR));
        assert!(!net.address_acceptable(43));
    }
}
