//! Transport-level broadcast sockets. Distinct from the network layer's
//! broadcast address: these let an application listen for any
//! `Broadcast`-typed package on a given port without a connection.

use crate::buffer::{Buffer, SegmentBuffer};
use crate::network::{Address, BROADCAST_ADDR};
use crate::transport::description::{TransportDescription, Type};
use crate::util::LockedQueue;

const QUEUE_CAPACITY: usize = 10;

pub struct BroadcastReceiver {
    local_port: u16,
    queue: LockedQueue<(Address, Buffer)>,
}

impl BroadcastReceiver {
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
        self.queue.push((source_addr, payload));
    }

    pub fn has_data(&self) -> bool {
        !self.queue.is_empty()
    }

    pub fn get_received(&self) -> Option<(Address, Buffer)> {
        self.queue.pop()
    }
}

pub struct BroadcastTransmitter {
    local_port: u16,
    queue: LockedQueue<Buffer>,
}

impl BroadcastTransmitter {
    pub fn new(local_port: u16) -> Self {
        Self {
            local_port,
            queue: LockedQueue::new(QUEUE_CAPACITY),
        }
    }

    pub fn busy(&self) -> bool {
        self.queue.len() >= QUEUE_CAPACITY
    }

    pub fn send(&self, buf: Buffer) -> bool {
        self.queue.push(buf)
    }

    pub fn pick_outgoing(&self) -> Option<(TransportDescription, SegmentBuffer)> {
        let buf = self.queue.pop()?;
        let desc = TransportDescription::new(0, self.local_port, BROADCAST_ADDR, self.local_port, Type::Broadcast);
        Some((desc, SegmentBuffer::from_buffer(buf)))
    }
}
