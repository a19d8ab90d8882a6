mod common;

use evloop::{Backend, Error, EventListener, EventLoop, EventSocket, ListenerHandler, SocketHandler, SocketIo};
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::os::fd::OwnedFd;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(2);

#[evloop::test]
fn test_listener_accepts_connections(event_loop: &EventLoop) {
    common::init_tracing();
    let (tx, rx) = mpsc::channel();

    let listener = EventListener::new(event_loop, move |stream: OwnedFd, peer: SocketAddr| {
        tx.send((stream, peer)).unwrap();
    });

    assert!(listener.local_addr().is_none());
    listener.bind(0).unwrap();

    let port = listener.local_addr().expect("bound listener has an address").port();
    assert_ne!(port, 0);

    let client = TcpStream::connect(("127.0.0.1", port)).expect("Failed to connect");
    let (_stream, peer) = rx.recv_timeout(WAIT).expect("No connection accepted");

    assert_eq!(peer, client.local_addr().unwrap());
}

#[evloop::test(backend = "poll")]
fn test_listener_accepts_with_poll(event_loop: &EventLoop) {
    assert_eq!(event_loop.backend(), Backend::Poll);
    let (tx, rx) = mpsc::channel();

    let listener = EventListener::new(event_loop, move |stream: OwnedFd, peer: SocketAddr| {
        tx.send((stream, peer)).unwrap();
    });
    listener.bind(0).unwrap();
    let port = listener.local_addr().unwrap().port();

    let clients: Vec<TcpStream> = (0..3)
        .map(|_| TcpStream::connect(("127.0.0.1", port)).expect("Failed to connect"))
        .collect();

    for _ in &clients {
        rx.recv_timeout(WAIT).expect("No connection accepted");
    }
}

#[evloop::test]
fn test_listener_bind_twice_fails(event_loop: &EventLoop) {
    let listener = EventListener::new(event_loop, |_: OwnedFd, _: SocketAddr| {});

    listener.bind(0).unwrap();
    assert!(matches!(listener.bind(0), Err(Error::AlreadyBound)));
}

#[evloop::test]
fn test_listener_port_in_use(event_loop: &EventLoop) {
    let holder = std::net::TcpListener::bind("0.0.0.0:0").unwrap();
    let port = holder.local_addr().unwrap().port();

    let listener = EventListener::new(event_loop, |_: OwnedFd, _: SocketAddr| {});
    assert!(listener.bind(port).is_err(), "Port held by another listener");
    assert!(listener.local_addr().is_none());
}

struct Echo;

impl SocketHandler for Echo {
    fn on_read(&mut self, io: &SocketIo<'_>) {
        let mut buf = [0u8; 512];
        while let Ok(n @ 1..) = io.read(&mut buf) {
            let _ = io.write(&buf[..n]);
        }
    }
}

/// Wraps every accepted connection in an echoing [`EventSocket`].
struct EchoServer {
    event_loop: Arc<EventLoop>,
    sockets: Arc<Mutex<Vec<EventSocket>>>,
}

impl ListenerHandler for EchoServer {
    fn on_accept(&mut self, stream: OwnedFd, _peer: SocketAddr) {
        let socket = EventSocket::new(&self.event_loop, Echo);
        socket.bind_owned(stream).unwrap();
        self.sockets.lock().unwrap().push(socket);
    }

    fn on_error(&mut self, err: &io::Error) {
        panic!("accept failed: {err}");
    }
}

#[test]
fn test_echo_server() {
    common::init_tracing();

    let event_loop = Arc::new(EventLoop::make_event_loop());
    let sockets = Arc::new(Mutex::new(Vec::new()));

    let listener = EventListener::new(
        &event_loop,
        EchoServer {
            event_loop: event_loop.clone(),
            sockets: sockets.clone(),
        },
    );
    listener.bind(0).unwrap();
    let port = listener.local_addr().unwrap().port();

    let dispatcher = event_loop.spawn_dispatcher().unwrap();

    let mut client = TcpStream::connect(("127.0.0.1", port)).unwrap();
    client.set_read_timeout(Some(WAIT)).unwrap();
    client.write_all(b"echo me").unwrap();

    let mut buf = [0u8; 7];
    client.read_exact(&mut buf).unwrap();
    assert_eq!(&buf, b"echo me");
    assert_eq!(sockets.lock().unwrap().len(), 1);

    dispatcher.stop().unwrap();

    sockets.lock().unwrap().clear();
    drop(listener);
    assert_eq!(event_loop.live_handles(), 0);
}
