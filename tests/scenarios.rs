//! End-to-end scenarios driving the full channel/network/transport stack
//! through the in-memory virtual medium.

use ntlink::buffer::Buffer;
use ntlink::network::NetworkLayer;
use ntlink::phy::PhysicalInterfaceOptions;
use ntlink::system::DeterministicSystemDriver;
use ntlink::testing::TransmissionMedium;
use ntlink::transport::{RetransmissionOptions, TransportLayer};
use ntlink::BROADCAST_ADDR;

struct Node {
    net: NetworkLayer<DeterministicSystemDriver>,
    transport: TransportLayer<DeterministicSystemDriver>,
}

fn make_node(medium: &TransmissionMedium, sys: DeterministicSystemDriver, addr: u64) -> Node {
    let mut net = NetworkLayer::new(sys.clone(), addr);
    net.add_physical(Box::new(medium.add_client(PhysicalInterfaceOptions::default())));
    Node {
        net,
        transport: TransportLayer::new(sys, addr),
    }
}

fn tick(nodes: &mut [Node]) {
    for node in nodes.iter_mut() {
        node.transport.serve(&mut node.net);
    }
    for node in nodes.iter_mut() {
        node.net.serve();
    }
    for node in nodes.iter_mut() {
        node.transport.serve(&mut node.net);
    }
}

#[test]
fn test_two_node_datagram() {
    let medium = TransmissionMedium::new();
    let sys = DeterministicSystemDriver::new(1);
    let mut a = make_node(&medium, sys.clone(), 123);
    let mut b = make_node(&medium, sys, 321);

    b.transport.add_datagram_receiver(10);
    let tx = a.transport.add_datagram_transmitter(5, 321, 10);
    a.transport
        .datagram_transmitter(tx)
        .send(Buffer::from(&b"Hello A->B"[..]));

    let mut nodes = vec![a, b];
    tick(&mut nodes);

    let rx = nodes[1].transport.datagram_receiver(10).unwrap();
    assert!(rx.has_incoming());
    let (source, payload) = rx.get_incoming().unwrap();
    assert_eq!(source, 123);
    assert_eq!(payload.as_slice(), b"Hello A->B");
    assert!(rx.get_incoming().is_none());
}

#[test]
fn test_broadcast_loopback_and_forward() {
    let medium = TransmissionMedium::new();
    let sys = DeterministicSystemDriver::new(2);
    let mut a = make_node(&medium, sys.clone(), 1);
    let mut b = make_node(&medium, sys, 2);

    a.transport.add_broadcast_receiver(7);
    b.transport.add_broadcast_receiver(7);
    let tx = a.transport.add_broadcast_transmitter(7);
    a.transport
        .broadcast_transmitter(tx)
        .send(Buffer::from(&b"bcast"[..]));

    let mut nodes = vec![a, b];
    // One round is enough: `a` floods onto the medium and loops the package
    // back to itself within the same round's second `transport.serve` pass.
    tick(&mut nodes);
    assert!(nodes[0].transport.broadcast_receiver(7).unwrap().has_data());

    let b_rx = nodes[1].transport.broadcast_receiver(7).unwrap();
    assert!(b_rx.has_data());
    assert_eq!(b_rx.get_received().unwrap().0, 1);

    // A second round introduces no further deliveries: the package id was
    // already recorded as seen.
    tick(&mut nodes);
    assert!(!nodes[1].transport.broadcast_receiver(7).unwrap().has_data());
}

#[test]
fn test_reliable_handshake_and_data_exchange() {
    let medium = TransmissionMedium::new();
    let sys = DeterministicSystemDriver::new(3);
    let mut client = make_node(&medium, sys.clone(), 10);
    let mut server = make_node(&medium, sys.clone(), 20);

    server
        .transport
        .add_acceptor(99, RetransmissionOptions::default(), |_socket| {});

    let socket = client.transport.open_socket(500, 20, 99, RetransmissionOptions::default());
    socket.borrow_mut().connect();

    let mut nodes = vec![client, server];
    for _ in 0..6 {
        tick(&mut nodes);
        sys.advance(std::time::Duration::from_millis(250));
    }

    assert_eq!(socket.borrow().state(), ntlink::transport::State::Connected);
    assert_eq!(socket.borrow().unconfirmed_to_remote(), 0);
}

#[test]
fn test_duplicate_broadcast_delivered_once() {
    let medium = TransmissionMedium::new();
    let sys = DeterministicSystemDriver::new(4);
    let mut a = make_node(&medium, sys.clone(), 1);
    let mut b = make_node(&medium, sys, 2);

    b.transport.add_broadcast_receiver(1);

    // Originate once; the network layer's own dedup set means repeated
    // local `serve()` calls never re-flood the same package id.
    let tx = a.transport.add_broadcast_transmitter(1);
    a.transport
        .broadcast_transmitter(tx)
        .send(Buffer::from(&b"once"[..]));

    let mut nodes = vec![a, b];
    for _ in 0..3 {
        tick(&mut nodes);
    }

    let rx = nodes[1].transport.broadcast_receiver(1).unwrap();
    assert!(rx.get_received().is_some());
    assert!(rx.get_received().is_none());
}

#[test]
fn test_close_handshake() {
    let medium = TransmissionMedium::new();
    let sys = DeterministicSystemDriver::new(5);
    let mut client = make_node(&medium, sys.clone(), 10);
    let mut server = make_node(&medium, sys.clone(), 20);

    let accepted: std::rc::Rc<std::cell::RefCell<Vec<ntlink::transport::SharedSocket<DeterministicSystemDriver>>>> =
        std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
    let accepted_cb = accepted.clone();
    server
        .transport
        .add_acceptor(99, RetransmissionOptions::default(), move |socket| {
            accepted_cb.borrow_mut().push(socket);
        });

    let client_socket = client.transport.open_socket(500, 20, 99, RetransmissionOptions::default());
    client_socket.borrow_mut().connect();

    let mut nodes = vec![client, server];
    for _ in 0..6 {
        tick(&mut nodes);
        sys.advance(std::time::Duration::from_millis(250));
    }
    assert_eq!(client_socket.borrow().state(), ntlink::transport::State::Connected);

    let server_socket = accepted.borrow()[0].clone();
    assert_eq!(server_socket.borrow().state(), ntlink::transport::State::Connected);
    server_socket.borrow_mut().close();
    assert_eq!(server_socket.borrow().state(), ntlink::transport::State::Closed);

    for _ in 0..6 {
        tick(&mut nodes);
        sys.advance(std::time::Duration::from_millis(250));
    }

    assert_eq!(client_socket.borrow().state(), ntlink::transport::State::Closed);
    assert_eq!(server_socket.borrow().state(), ntlink::transport::State::Closed);
    // The close was confirmed (client's `ConnectionCloseSubmit` reached the
    // server), so the server has nothing left in flight.
    assert_eq!(server_socket.borrow().unconfirmed_to_remote(), 0);
    assert!(!server_socket.borrow().busy());

    // The server has nothing left to say: its close request is confirmed
    // and it never sends an explicit ack of its own to the close-submit.
    let now = sys.now();
    assert!(server_socket.borrow_mut().pick_outgoing(now).is_none());
}

#[test]
fn test_lossy_medium_stress() {
    let medium = TransmissionMedium::new();
    let sys = DeterministicSystemDriver::new(6);
    let options = RetransmissionOptions {
        policy: ntlink::transport::Policy::BreakWhenTimeout,
        timeout: std::time::Duration::from_secs(20),
        retransmission_time: std::time::Duration::from_millis(100),
        force_ack_after: std::time::Duration::from_millis(50),
    };

    let mut server = make_node(&medium, sys.clone(), 1);
    let accepted: std::rc::Rc<std::cell::RefCell<Vec<ntlink::transport::SharedSocket<DeterministicSystemDriver>>>> =
        std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
    let accepted_cb = accepted.clone();
    server.transport.add_acceptor(99, options, move |socket| {
        accepted_cb.borrow_mut().push(socket);
    });

    const CLIENT_COUNT: u64 = 3;
    let mut clients = Vec::new();
    let mut client_sockets = Vec::new();
    for i in 0..CLIENT_COUNT {
        let mut client = make_node(&medium, sys.clone(), 100 + i);
        let socket = client.transport.open_socket(500, 1, 99, options);
        socket.borrow_mut().connect();
        clients.push(client);
        client_sockets.push(socket);
    }

    let mut nodes = vec![server];
    nodes.extend(clients);

    // Every other round the medium drops every frame outright. Each socket
    // retries every round (`retransmission_time` is shorter than one round),
    // so both legs of every handshake get repeated chances to land on a
    // round where the medium happens to be clear.
    for round in 0..40u32 {
        medium.set_broken(round % 2 == 0);
        tick(&mut nodes);
        sys.advance(std::time::Duration::from_millis(250));
    }
    medium.set_broken(false);

    for socket in &client_sockets {
        assert_eq!(socket.borrow().state(), ntlink::transport::State::Connected);
    }
    assert_eq!(accepted.borrow().len(), CLIENT_COUNT as usize);
}

#[test]
fn test_broadcast_address_is_locally_acceptable() {
    assert_eq!(BROADCAST_ADDR, 0xFF);
}
