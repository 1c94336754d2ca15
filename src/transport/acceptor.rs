//! Mints server-side reliable sockets in response to connection requests.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use tracing::debug;

use crate::network::Address;
use crate::system::SystemDriver;
use crate::transport::description::TransportDescription;
use crate::transport::socket::{ReliableSocket, RetransmissionOptions};
use crate::util::CachingMap;

const CACHE_CAPACITY: usize = 10;

pub type SharedSocket<S> = Rc<RefCell<ReliableSocket<S>>>;

/// Listens on a port for `ConnectionRequest` packages. A small LRU cache
/// keyed by the requester's message id makes a retransmitted request route
/// back to the same freshly-minted socket instead of spawning a duplicate.
pub struct Acceptor<S: SystemDriver> {
    local_port: u16,
    options: RetransmissionOptions,
    already_created: CachingMap<u16, Weak<RefCell<ReliableSocket<S>>>>,
}

impl<S: SystemDriver> Acceptor<S> {
    pub fn new(local_port: u16, options: RetransmissionOptions) -> Self {
        Self {
            local_port,
            options,
            already_created: CachingMap::new(CACHE_CAPACITY),
        }
    }

    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    /// Handles one incoming `ConnectionRequest`. Returns a freshly-minted
    /// socket if this is a new client; returns `None` if the request was a
    /// retransmission of one already answered (the existing socket is told
    /// to resend its submit).
    pub fn accept(
        &mut self,
        sys: S,
        local_addr: Address,
        header: &TransportDescription,
    ) -> Option<SharedSocket<S>> {
        if let Some(existing) = self.already_created.get_update(&header.message_id) {
            if let Some(socket) = existing.upgrade() {
                socket.borrow_mut().send_connection_submit(header.message_id);
                return None;
            }
        }

        let local_port = sys.random_nonzero();
        let socket = Rc::new(RefCell::new(ReliableSocket::new(
            sys,
            local_addr,
            local_port,
            header.source_addr,
            header.source_port,
            self.options,
        )));
        socket.borrow_mut().send_connection_submit(header.message_id);
        self.already_created
            .put_update(header.message_id, Rc::downgrade(&socket));

        debug!(
            listening_port = self.local_port,
            client = header.source_addr,
            "accepted new connection"
        );
        Some(socket)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::DeterministicSystemDriver;

    #[test]
    fn test_retransmitted_request_reuses_socket() {
        let sys = DeterministicSystemDriver::new(7);
        let mut acceptor = Acceptor::new(10, RetransmissionOptions::default());
        let header = TransportDescription::new(1, 100, 2, 10, crate::transport::description::Type::ConnectionRequest);
        let mut header = header;
        header.message_id = 42;

        let first = acceptor.accept(sys.clone(), 2, &header).unwrap();
        let second = acceptor.accept(sys, 2, &header);
        assert!(second.is_none());
        assert!(Rc::strong_count(&first) >= 1);
    }
}
