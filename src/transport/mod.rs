//! Transport layer: port multiplexing, acceptors, and reliable sockets on
//! top of the network layer.

pub mod acceptor;
pub mod broadcast;
pub mod datagram;
pub mod description;
pub mod socket;

use std::time::Instant;

use ahash::AHashMap;
use tracing::trace;

use crate::buffer::{Buffer, SegmentBuffer};
use crate::network::{Address, NetworkLayer};
use crate::system::SystemDriver;

pub use acceptor::{Acceptor, SharedSocket};
pub use broadcast::{BroadcastReceiver, BroadcastTransmitter};
pub use datagram::{DatagramReceiver, DatagramTransmitter};
pub use description::{TransportDescription, Type};
pub use socket::{Policy, ReliableSocket, RetransmissionOptions, State};

const DEFAULT_HOP_LIMIT: u8 = 10;

type SocketKey = (u16, Address);

/// Owns every socket, acceptor, and broadcast endpoint registered on one
/// node, and drives their traffic through a [`NetworkLayer`].
pub struct TransportLayer<S: SystemDriver> {
    sys: S,
    local_addr: Address,

    sockets: AHashMap<SocketKey, SharedSocket<S>>,
    acceptors: AHashMap<u16, Acceptor<S>>,
    on_new_connection: AHashMap<u16, Box<dyn FnMut(SharedSocket<S>)>>,

    datagram_tx: Vec<DatagramTransmitter>,
    datagram_rx: AHashMap<u16, DatagramReceiver>,

    broadcast_tx: Vec<BroadcastTransmitter>,
    broadcast_rx: AHashMap<u16, BroadcastReceiver>,
}

impl<S: SystemDriver> TransportLayer<S> {
    pub fn new(sys: S, local_addr: Address) -> Self {
        Self {
            sys,
            local_addr,
            sockets: AHashMap::new(),
            acceptors: AHashMap::new(),
            on_new_connection: AHashMap::new(),
            datagram_tx: Vec::new(),
            datagram_rx: AHashMap::new(),
            broadcast_tx: Vec::new(),
            broadcast_rx: AHashMap::new(),
        }
    }

    /// Creates, registers, and returns a client-side reliable socket ready
    /// to `connect()`.
    pub fn open_socket(
        &mut self,
        local_port: u16,
        remote_addr: Address,
        remote_port: u16,
        options: RetransmissionOptions,
    ) -> SharedSocket<S> {
        let socket = std::rc::Rc::new(std::cell::RefCell::new(ReliableSocket::new(
            self.sys.clone(),
            self.local_addr,
            local_port,
            remote_addr,
            remote_port,
            options,
        )));
        self.sockets.insert((local_port, remote_addr), socket.clone());
        socket
    }

    pub fn remove_socket(&mut self, local_port: u16, remote_addr: Address) {
        self.sockets.remove(&(local_port, remote_addr));
    }

    /// Registers an acceptor on `local_port`. `on_new_connection` is called
    /// synchronously, from within `serve()`, whenever a new client connects.
    pub fn add_acceptor(
        &mut self,
        local_port: u16,
        options: RetransmissionOptions,
        on_new_connection: impl FnMut(SharedSocket<S>) + 'static,
    ) {
        self.acceptors.insert(local_port, Acceptor::new(local_port, options));
        self.on_new_connection
            .insert(local_port, Box::new(on_new_connection));
    }

    pub fn remove_acceptor(&mut self, local_port: u16) {
        self.acceptors.remove(&local_port);
        self.on_new_connection.remove(&local_port);
    }

    pub fn add_datagram_transmitter(&mut self, local_port: u16, remote_addr: Address, remote_port: u16) -> usize {
        self.datagram_tx
            .push(DatagramTransmitter::new(local_port, remote_addr, remote_port));
        self.datagram_tx.len() - 1
    }

    pub fn datagram_transmitter(&self, index: usize) -> &DatagramTransmitter {
        &self.datagram_tx[index]
    }

    pub fn add_datagram_receiver(&mut self, local_port: u16) {
        self.datagram_rx.insert(local_port, DatagramReceiver::new(local_port));
    }

    pub fn datagram_receiver(&self, local_port: u16) -> Option<&DatagramReceiver> {
        self.datagram_rx.get(&local_port)
    }

    pub fn add_broadcast_receiver(&mut self, local_port: u16) {
        self.broadcast_rx
            .insert(local_port, BroadcastReceiver::new(local_port));
    }

    pub fn remove_broadcast_receiver(&mut self, local_port: u16) {
        self.broadcast_rx.remove(&local_port);
    }

    pub fn broadcast_receiver(&self, local_port: u16) -> Option<&BroadcastReceiver> {
        self.broadcast_rx.get(&local_port)
    }

    pub fn add_broadcast_transmitter(&mut self, local_port: u16) -> usize {
        self.broadcast_tx.push(BroadcastTransmitter::new(local_port));
        self.broadcast_tx.len() - 1
    }

    pub fn broadcast_transmitter(&self, index: usize) -> &BroadcastTransmitter {
        &self.broadcast_tx[index]
    }

    pub fn serve(&mut self, network: &mut NetworkLayer<S>) {
        self.serve_incoming(network);
        self.serve_outgoing(network);
    }

    fn serve_incoming(&mut self, network: &mut NetworkLayer<S>) {
        while let Some(package) = network.incoming() {
            self.dispatch(package.source_addr, package.data);
        }
    }

    fn dispatch(&mut self, source_addr: Address, data: Buffer) {
        let (header, consumed) = match TransportDescription::decode(data.as_slice(), source_addr, self.local_addr) {
            Ok(v) => v,
            Err(err) => {
                trace!(?err, "dropping malformed transport package");
                return;
            }
        };
        let payload = Buffer::from(&data.as_slice()[consumed..]);

        match header.r#type {
            Type::ConnectionRequest => self.dispatch_request(&header),
            Type::Broadcast => {
                if let Some(rx) = self.broadcast_rx.get(&header.destination_port) {
                    rx.receive(source_addr, payload);
                } else {
                    self.dispatch_to_socket_or_datagram(&header, source_addr, payload);
                }
            }
            _ => self.dispatch_to_socket_or_datagram(&header, source_addr, payload),
        }
    }

    /// Shared fallback for any package type that isn't a connection request
    /// or a (registered) broadcast: an existing socket for this
    /// `(port, remote_addr)` pair takes it, otherwise an unsolicited
    /// `DataTransfer` falls through to a registered datagram receiver.
    fn dispatch_to_socket_or_datagram(&mut self, header: &TransportDescription, source_addr: Address, payload: Buffer) {
        if let Some(socket) = self.sockets.get(&(header.destination_port, source_addr)) {
            socket.borrow_mut().receive(payload, header);
        } else if header.r#type == Type::DataTransfer {
            if let Some(rx) = self.datagram_rx.get(&header.destination_port) {
                rx.receive(source_addr, payload);
            }
        }
    }

    fn dispatch_request(&mut self, header: &TransportDescription) {
        let Some(acceptor) = self.acceptors.get_mut(&header.destination_port) else {
            return;
        };
        if let Some(socket) = acceptor.accept(self.sys.clone(), self.local_addr, header) {
            let key = (socket.borrow().local_port(), header.source_addr);
            self.sockets.insert(key, socket.clone());
            if let Some(cb) = self.on_new_connection.get_mut(&header.destination_port) {
                cb(socket);
            }
        }
    }

    fn serve_outgoing(&mut self, network: &mut NetworkLayer<S>) {
        let now = self.sys.now();

        for socket in self.sockets.values() {
            while let Some((desc, seg)) = socket.borrow_mut().pick_outgoing(now) {
                Self::send_via_network(network, desc, seg);
            }
        }
        for tx in &self.datagram_tx {
            while let Some((desc, seg)) = tx.pick_outgoing() {
                Self::send_via_network(network, desc, seg);
            }
        }
        for tx in &self.broadcast_tx {
            while let Some((desc, seg)) = tx.pick_outgoing() {
                Self::send_via_network(network, desc, seg);
            }
        }
    }

    fn send_via_network(network: &mut NetworkLayer<S>, desc: TransportDescription, mut seg: SegmentBuffer) {
        let header_bytes = desc.encode();
        seg.push_front(Buffer::from(&header_bytes[..]));
        network.send(seg.merge(), desc.destination_addr, DEFAULT_HOP_LIMIT);
    }
}
