//! Reliable, connection-oriented socket: one message in flight at a time,
//! piggy-backed acks, retransmission with a fixed schedule, and a small
//! connection-lifecycle state machine.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::buffer::{Buffer, SegmentBuffer};
use crate::network::Address;
use crate::system::SystemDriver;
use crate::transport::description::{TransportDescription, Type};
use crate::util::LockedQueue;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Policy {
    DropWhenTimeout,
    BreakWhenTimeout,
}

#[derive(Clone, Copy, Debug)]
pub struct RetransmissionOptions {
    pub policy: Policy,
    pub timeout: Duration,
    pub retransmission_time: Duration,
    pub force_ack_after: Duration,
}

impl Default for RetransmissionOptions {
    fn default() -> Self {
        Self {
            policy: Policy::BreakWhenTimeout,
            timeout: Duration::from_secs(10),
            retransmission_time: Duration::from_secs(1),
            force_ack_after: Duration::from_millis(200),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    NotConnected,
    WaitingForSubmit,
    Connected,
    Closed,
    ConnectionTimeout,
}

struct AckTask {
    message_id: u16,
    was_sent_at_least_once: bool,
    time_seg_received: Instant,
    force_send_immediately: bool,
}

struct SendTask {
    description: TransportDescription,
    buf: Buffer,
    sent_count: u32,
    created: Instant,
    last_pick: Instant,
}

/// A reliable socket bound to one remote peer and port pair.
pub struct ReliableSocket<S: SystemDriver> {
    sys: S,
    options: RetransmissionOptions,

    local_addr: Address,
    local_port: u16,
    remote_addr: Address,
    remote_port: u16,

    state: State,
    ack_task: Option<AckTask>,
    send_task: Option<SendTask>,
    /// One-off replies that never enter the retransmission machinery, used
    /// to keep re-acking a peer stuck retransmitting after this side has
    /// already moved past its own close handshake.
    immediate_outgoing: VecDeque<TransportDescription>,

    incoming: LockedQueue<Buffer>,
    last_received_message_id: u16,
    last_outgoing_message_id: u16,
    unconfirmed_to_remote: u16,
    missed_from_remote: u16,
}

const INCOMING_CAPACITY: usize = 64;

impl<S: SystemDriver> ReliableSocket<S> {
    pub fn new(
        sys: S,
        local_addr: Address,
        local_port: u16,
        remote_addr: Address,
        remote_port: u16,
        options: RetransmissionOptions,
    ) -> Self {
        Self {
            sys,
            options,
            local_addr,
            local_port,
            remote_addr,
            remote_port,
            state: State::NotConnected,
            ack_task: None,
            send_task: None,
            immediate_outgoing: VecDeque::new(),
            incoming: LockedQueue::new(INCOMING_CAPACITY),
            last_received_message_id: 0,
            last_outgoing_message_id: 0,
            unconfirmed_to_remote: 0,
            missed_from_remote: 0,
        }
    }

    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    pub fn remote_addr(&self) -> Address {
        self.remote_addr
    }

    pub fn remote_port(&self) -> u16 {
        self.remote_port
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn busy(&self) -> bool {
        self.send_task.is_some()
    }

    pub fn ready_to_send(&self) -> bool {
        self.state == State::Connected && !self.busy()
    }

    pub fn unconfirmed_to_remote(&self) -> u16 {
        self.unconfirmed_to_remote
    }

    pub fn missed_from_remote(&self) -> u16 {
        self.missed_from_remote
    }

    pub fn has_data(&self) -> bool {
        !self.incoming.is_empty()
    }

    pub fn get_received(&self) -> Option<Buffer> {
        self.incoming.pop()
    }

    /// Client side: initiates a connection. No-op (returns `false`) unless
    /// the socket is fresh.
    pub fn connect(&mut self) -> bool {
        if self.state != State::NotConnected {
            return false;
        }
        self.create_send_task(Type::ConnectionRequest, Buffer::from(&[][..]));
        self.state = State::WaitingForSubmit;
        true
    }

    /// Server side: called by the acceptor once per (possibly retransmitted)
    /// connection request it has decided to answer.
    pub fn send_connection_submit(&mut self, request_message_id: u16) {
        self.prepare_ack(request_message_id, true);
        self.last_outgoing_message_id = 0;
        self.create_send_task(Type::ConnectionSubmit, Buffer::from(&[][..]));
        self.state = State::Connected;
    }

    /// Queues `buf` for reliable delivery. Rejected with `false` while a
    /// send is already in flight.
    pub fn send(&mut self, buf: Buffer) -> bool {
        if self.state != State::Connected || self.busy() {
            return false;
        }
        self.create_send_task(Type::DataTransfer, buf);
        true
    }

    /// Only effective from `Connected`; otherwise a no-op, so repeated calls
    /// are safe.
    pub fn close(&mut self) {
        if self.state == State::Connected {
            self.create_send_task(Type::ConnectionClose, Buffer::from(&[][..]));
            self.state = State::Closed;
        }
    }

    pub fn receive(&mut self, payload: Buffer, header: &TransportDescription) {
        if self.state == State::ConnectionTimeout {
            return;
        }

        if header.has_ack {
            if let Some(task) = &self.send_task {
                if header.ack_for_message_id == task.description.message_id {
                    self.send_task = None;
                    self.unconfirmed_to_remote = self.unconfirmed_to_remote.saturating_sub(1);
                }
            }
        }

        match (self.state, header.r#type) {
            (State::WaitingForSubmit, Type::ConnectionSubmit) => {
                self.remote_port = header.source_port;
                self.send_task = None;
                self.unconfirmed_to_remote = 0;
                self.prepare_ack(header.message_id, false);
                self.state = State::Connected;
            }
            (State::Connected, Type::DataTransfer) => {
                if header.message_id > self.last_received_message_id {
                    self.missed_from_remote = self
                        .missed_from_remote
                        .saturating_add(header.message_id - (self.last_received_message_id + 1));
                    self.last_received_message_id = header.message_id;
                    if !payload.is_empty() {
                        self.incoming.push(payload);
                    }
                }
                self.prepare_ack(header.message_id, false);
            }
            (State::Connected, Type::ConnectionClose) => {
                self.state = State::Closed;
                self.prepare_ack(header.message_id, true);
                self.create_send_task(Type::ConnectionCloseSubmit, Buffer::from(&[][..]));
            }
            (State::Closed, Type::ConnectionCloseSubmit) => {
                self.send_task = None;
                self.ack_task = None;
                self.unconfirmed_to_remote = self.unconfirmed_to_remote.saturating_sub(1);
            }
            (State::Closed, _) => {
                let mut desc = TransportDescription::new(
                    self.local_addr,
                    self.local_port,
                    self.remote_addr,
                    self.remote_port,
                    Type::ConnectionCloseSubmit,
                );
                desc.has_ack = true;
                desc.ack_for_message_id = header.message_id;
                self.immediate_outgoing.push_back(desc);
            }
            _ => {}
        }
    }

    pub fn pick_outgoing(&mut self, now: Instant) -> Option<(TransportDescription, SegmentBuffer)> {
        if self.state == State::ConnectionTimeout {
            return None;
        }
        self.drop_if_timeout(now);

        if let Some(desc) = self.immediate_outgoing.pop_front() {
            return Some((desc, SegmentBuffer::new()));
        }

        if self.send_task.is_none() {
            return self.pick_force_ack(now);
        }

        let ready = {
            let task = self.send_task.as_ref().unwrap();
            task.sent_count == 0 || now.duration_since(task.last_pick) >= self.options.retransmission_time
        };
        if !ready {
            return None;
        }

        let ack = self.ack_task.as_mut().map(|ack| {
            ack.was_sent_at_least_once = true;
            ack.message_id
        });

        let task = self.send_task.as_mut().unwrap();
        task.last_pick = now;
        task.sent_count += 1;

        let mut desc = task.description;
        if let Some(message_id) = ack {
            desc.ack_for_message_id = message_id;
            desc.has_ack = true;
        }

        Some((desc, SegmentBuffer::from_buffer(task.buf.clone())))
    }

    fn pick_force_ack(&mut self, now: Instant) -> Option<(TransportDescription, SegmentBuffer)> {
        let ack = self.ack_task.as_mut()?;
        if ack.was_sent_at_least_once {
            return None;
        }
        if !ack.force_send_immediately && now.duration_since(ack.time_seg_received) < self.options.force_ack_after {
            return None;
        }
        ack.was_sent_at_least_once = true;

        let mut desc = TransportDescription::new(
            self.local_addr,
            self.local_port,
            self.remote_addr,
            self.remote_port,
            Type::DataTransfer,
        );
        desc.has_ack = true;
        desc.ack_for_message_id = ack.message_id;
        Some((desc, SegmentBuffer::new()))
    }

    fn prepare_ack(&mut self, message_id: u16, force_immediately: bool) {
        self.ack_task = Some(AckTask {
            message_id,
            was_sent_at_least_once: false,
            time_seg_received: self.sys.now(),
            force_send_immediately: force_immediately,
        });
    }

    fn create_send_task(&mut self, r#type: Type, buf: Buffer) {
        let message_id = if r#type == Type::ConnectionRequest {
            self.sys.random_nonzero()
        } else {
            self.last_outgoing_message_id += 1;
            self.last_outgoing_message_id
        };

        let mut description = TransportDescription::new(
            self.local_addr,
            self.local_port,
            self.remote_addr,
            self.remote_port,
            r#type,
        );
        description.message_id = message_id;

        let now = self.sys.now();
        self.send_task = Some(SendTask {
            description,
            buf,
            sent_count: 0,
            created: now,
            last_pick: now,
        });
        self.unconfirmed_to_remote = self.unconfirmed_to_remote.saturating_add(1);
    }

    fn drop_if_timeout(&mut self, now: Instant) {
        let Some(task) = &self.send_task else {
            return;
        };
        if now.duration_since(task.created) < self.options.timeout {
            return;
        }

        let was_request = task.description.r#type == Type::ConnectionRequest;
        debug!(port = self.local_port, was_request, "send task timed out");
        self.send_task = None;
        if was_request {
            self.state = State::ConnectionTimeout;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::DeterministicSystemDriver;

    fn pair() -> (
        ReliableSocket<DeterministicSystemDriver>,
        ReliableSocket<DeterministicSystemDriver>,
    ) {
        let sys = DeterministicSystemDriver::new(1);
        let client = ReliableSocket::new(sys.clone(), 1, 100, 2, 10, RetransmissionOptions::default());
        let server = ReliableSocket::new(sys, 2, 10, 1, 100, RetransmissionOptions::default());
        (client, server)
    }

    #[test]
    fn test_handshake_reaches_connected() {
        let (mut client, mut server) = pair();
        let now = Instant::now();

        assert!(client.connect());
        let (request, _) = client.pick_outgoing(now).unwrap();

        server.receive(Buffer::from(&[][..]), &request);
        // server is not connected via receive(); the acceptor drives
        // send_connection_submit directly in the real flow.
        server.send_connection_submit(request.message_id);
        let (submit, _) = server.pick_outgoing(now).unwrap();

        client.receive(Buffer::from(&[][..]), &submit);
        assert_eq!(client.state(), State::Connected);

        let force_ack_time = now + Duration::from_millis(201);
        let (ack, _) = client.pick_outgoing(force_ack_time).unwrap();
        server.receive(Buffer::from(&[][..]), &ack);

        assert_eq!(server.state(), State::Connected);
        assert_eq!(client.unconfirmed_to_remote(), 0);
    }

    #[test]
    fn test_one_in_flight_send() {
        let (mut client, _server) = pair();
        client.state = State::Connected;
        assert!(client.send(Buffer::from(&b"a"[..])));
        assert!(!client.send(Buffer::from(&b"b"[..])));
    }

    #[test]
    fn test_duplicate_data_is_not_redelivered() {
        let (_client, mut server) = pair();
        server.state = State::Connected;

        let mut desc = TransportDescription::new(1, 100, 2, 10, Type::DataTransfer);
        desc.message_id = 1;
        server.receive(Buffer::from(&b"hi"[..]), &desc);
        server.receive(Buffer::from(&b"hi"[..]), &desc);

        assert!(server.has_data());
        assert_eq!(server.get_received().unwrap().as_slice(), b"hi");
        assert!(!server.has_data());
    }

    #[test]
    fn test_connection_request_timeout_is_terminal() {
        let (mut client, _server) = pair();
        assert!(client.connect());
        let later = Instant::now() + Duration::from_secs(11);
        assert!(client.pick_outgoing(later).is_none());
        assert_eq!(client.state(), State::ConnectionTimeout);
    }

    #[test]
    fn test_close_is_noop_outside_connected() {
        let (mut client, _server) = pair();
        client.close();
        assert_eq!(client.state(), State::NotConnected);
    }
}
