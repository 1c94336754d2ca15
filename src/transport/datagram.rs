//! Fire-and-forget datagram sockets: no message ids, no acks, no retries.

use crate::buffer::{Buffer, SegmentBuffer};
use crate::network::Address;
use crate::transport::description::{TransportDescription, Type};
use crate::util::LockedQueue;

const QUEUE_CAPACITY: usize = 10;

pub struct DatagramTransmitter {
    local_port: u16,
    remote_addr: Address,
    remote_port: u16,
    queue: LockedQueue<Buffer>,
}

impl DatagramTransmitter {
    pub fn new(local_port: u16, remote_addr: Address, remote_port: u16) -> Self {
        Self {
            local_port,
            remote_addr,
            remote_port,
            queue: LockedQueue::new(QUEUE_CAPACITY),
        }
    }

    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    /// `false` means "cannot accept more" (queue already at capacity).
    pub fn busy(&self) -> bool {
        self.queue.len() >= QUEUE_CAPACITY
    }

    pub fn send(&self, buf: Buffer) -> bool {
        self.queue.push(buf)
    }

    pub fn pick_outgoing(&self) -> Option<(TransportDescription, SegmentBuffer)> {
        let buf = self.queue.pop()?;
        let desc = TransportDescription::new(
            0,
            self.local_port,
            self.remote_addr,
            self.remote_port,
            Type::DataTransfer,
        );
        Some((desc, SegmentBuffer::from_buffer(buf)))
    }
}

pub struct DatagramReceiver {
    local_port: u16,
    queue: LockedQueue<(Address, Buffer)>,
}

impl DatagramReceiver {
    pub fn new(local_port: u16) -> Self {
        Self {
            local_port,
            queue: LockedQueue::new(QUEUE_CAPACITY),
        }
    }

    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    pub fn receive(&self, source_addr: Address, payload: Buffer) {
        // Drop silently on overflow; there is no backpressure signal for an
        // unsolicited inbound datagram.
        self.queue.push((source_addr, payload));
    }

    pub fn has_incoming(&self) -> bool {
        !self.queue.is_empty()
    }

    pub fn get_incoming(&self) -> Option<(Address, Buffer)> {
        self.queue.pop()
    }
}
