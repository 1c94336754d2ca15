//! Minimal two-node demo: a client connects to a server's acceptor over an
//! in-memory medium and exchanges a few reliable messages.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use ntlink::buffer::Buffer;
use ntlink::network::NetworkLayer;
use ntlink::phy::PhysicalInterfaceOptions;
use ntlink::system::DeterministicSystemDriver;
use ntlink::testing::TransmissionMedium;
use ntlink::transport::{RetransmissionOptions, SharedSocket, TransportLayer};

const SERVER_ADDR: u64 = 1;
const CLIENT_ADDR: u64 = 2;
const SERVER_PORT: u16 = 10;

fn main() {
    tracing_subscriber::fmt::init();

    let medium = TransmissionMedium::new();
    let sys = DeterministicSystemDriver::new(0xC0FFEE);

    let mut server_net = NetworkLayer::new(sys.clone(), SERVER_ADDR);
    server_net.add_physical(Box::new(medium.add_client(PhysicalInterfaceOptions::default())));
    let mut server_transport = TransportLayer::new(sys.clone(), SERVER_ADDR);

    let accepted: Rc<RefCell<Vec<SharedSocket<DeterministicSystemDriver>>>> = Rc::new(RefCell::new(Vec::new()));
    let accepted_cb = accepted.clone();
    server_transport.add_acceptor(SERVER_PORT, RetransmissionOptions::default(), move |socket| {
        tracing::info!("server accepted a new connection");
        accepted_cb.borrow_mut().push(socket);
    });

    let mut client_net = NetworkLayer::new(sys.clone(), CLIENT_ADDR);
    client_net.add_physical(Box::new(medium.add_client(PhysicalInterfaceOptions::default())));
    let mut client_transport = TransportLayer::new(sys.clone(), CLIENT_ADDR);
    let client_socket = client_transport.open_socket(100, SERVER_ADDR, SERVER_PORT, RetransmissionOptions::default());
    client_socket.borrow_mut().connect();

    for round in 0..20 {
        client_transport.serve(&mut client_net);
        client_net.serve();
        server_net.serve();
        server_transport.serve(&mut server_net);

        sys.advance(Duration::from_millis(250));

        if round == 5 {
            if let Some(server_socket) = accepted.borrow().first() {
                server_socket
                    .borrow_mut()
                    .send(Buffer::from(&b"hello from server"[..]));
            }
            if client_socket.borrow().ready_to_send() {
                client_socket
                    .borrow_mut()
                    .send(Buffer::from(&b"hello from client"[..]));
            }
        }

        if client_socket.borrow().has_data() {
            let msg = client_socket.borrow().get_received().unwrap();
            tracing::info!(message = ?String::from_utf8_lossy(msg.as_slice()), "client received");
        }
        for server_socket in accepted.borrow().iter() {
            if server_socket.borrow().has_data() {
                let msg = server_socket.borrow().get_received().unwrap();
                tracing::info!(message = ?String::from_utf8_lossy(msg.as_slice()), "server received");
            }
        }
    }

    tracing::info!(state = ?client_socket.borrow().state(), "final client state");
}
