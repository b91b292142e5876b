mod common;

use common::{EchoHandler, LineProtocol, wait_until};
use netreactor::{
    ChannelContext, ConfigurationBuilder, Error, IoEventHandler, Result, Session, SocketAcceptor,
};
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpStream as StdTcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

fn acceptor(handler: EchoHandler, loops: usize) -> SocketAcceptor<LineProtocol> {
    let config = ConfigurationBuilder::new()
        .host("127.0.0.1")
        .port(0)
        .selector_loops(loops)
        .build();

    SocketAcceptor::new(Arc::new(ChannelContext::new(config, LineProtocol, handler)))
}

fn client(addr: SocketAddr) -> (StdTcpStream, BufReader<StdTcpStream>) {
    let stream = StdTcpStream::connect(addr).expect("connect");
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .expect("read timeout");
    let reader = BufReader::new(stream.try_clone().expect("clone"));

    (stream, reader)
}

#[test]
fn echoes_lines_split_across_packets() {
    common::init_tracing();

    let acceptor = acceptor(EchoHandler::default(), 1);
    let addr = acceptor.bind().expect("bind");
    let (mut stream, mut reader) = client(addr);

    stream.write_all(b"hello\nwor").expect("write");
    stream.flush().expect("flush");
    std::thread::sleep(Duration::from_millis(20));
    stream.write_all(b"ld\n").expect("write");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read");
    assert_eq!(line, "hello\n");

    line.clear();
    reader.read_line(&mut line).expect("read");
    assert_eq!(line, "world\n");

    acceptor.unbind();
    assert!(!acceptor.is_bound());
}

#[test]
fn spreads_clients_over_loops_and_tracks_sessions() {
    let handler = EchoHandler::default();
    let opened = handler.opened.clone();
    let closed = handler.closed.clone();
    let acceptor = acceptor(handler, 2);
    let addr = acceptor.bind().expect("bind");

    let mut clients: Vec<_> = (0..4).map(|_| client(addr)).collect();
    for (index, (stream, reader)) in clients.iter_mut().enumerate() {
        writeln!(stream, "client-{index}").expect("write");

        let mut line = String::new();
        reader.read_line(&mut line).expect("read");
        assert_eq!(line, format!("client-{index}\n"));
    }

    let sessions = acceptor.context().sessions();
    assert_eq!(sessions.len(), 4);
    assert!(wait_until(Duration::from_secs(2), || opened.load(Ordering::SeqCst) == 4));

    drop(clients);

    assert!(wait_until(Duration::from_secs(5), || sessions.is_empty()));
    assert!(wait_until(Duration::from_secs(2), || closed.load(Ordering::SeqCst) == 4));
}

#[test]
fn large_frames_survive_partial_writes() {
    let acceptor = acceptor(EchoHandler::default(), 1);
    let addr = acceptor.bind().expect("bind");
    let (mut stream, mut reader) = client(addr);

    let payload = "x".repeat(512 * 1024);
    let writer = {
        let mut stream = stream.try_clone().expect("clone");
        let payload = payload.clone();
        std::thread::spawn(move || {
            stream.write_all(payload.as_bytes()).expect("write");
            stream.write_all(b"\n").expect("write");
        })
    };

    let mut line = String::new();
    reader.read_line(&mut line).expect("read");
    writer.join().unwrap();

    assert_eq!(line.len(), payload.len() + 1);
    assert!(line.starts_with(&payload));

    stream.write_all(b"after\n").expect("write");
    line.clear();
    reader.read_line(&mut line).expect("read");
    assert_eq!(line, "after\n");
}

#[test]
fn handler_failure_closes_only_that_session() {
    let acceptor = acceptor(EchoHandler::default(), 1);
    let addr = acceptor.bind().expect("bind");

    let (mut healthy, mut healthy_reader) = client(addr);

    for trigger in ["boom\n", "panic\n"] {
        let (mut stream, _) = client(addr);
        stream.write_all(trigger.as_bytes()).expect("write");

        let mut rest = Vec::new();
        let read = stream.read_to_end(&mut rest).expect("peer closes");
        assert_eq!(read, 0);
    }

    healthy.write_all(b"still here\n").expect("write");
    let mut line = String::new();
    healthy_reader.read_line(&mut line).expect("read");
    assert_eq!(line, "still here\n");
}

#[test]
fn unbind_closes_live_connections() {
    let handler = EchoHandler::default();
    let closed = handler.closed.clone();
    let acceptor = acceptor(handler, 2);
    let addr = acceptor.bind().expect("bind");

    let (mut stream, mut reader) = client(addr);
    stream.write_all(b"ping\n").expect("write");
    let mut line = String::new();
    reader.read_line(&mut line).expect("read");

    acceptor.unbind();

    let mut rest = Vec::new();
    assert_eq!(stream.read_to_end(&mut rest).expect("eof"), 0);
    assert_eq!(closed.load(Ordering::SeqCst), 1);
    assert!(acceptor.context().sessions().is_empty());
}

/// Records frames; `slow-boom` fails after a pause so later frames queue up.
#[derive(Default)]
struct RecordingHandler {
    frames: Arc<Mutex<Vec<String>>>,
    closed: Arc<AtomicUsize>,
}

impl IoEventHandler<String> for RecordingHandler {
    fn accept(&self, _session: &Session<String>, frame: String) -> Result<()> {
        self.frames.lock().unwrap().push(frame.clone());

        if frame == "slow-boom" {
            thread::sleep(Duration::from_millis(100));
            return Err(Error::Handler("slow-boom".to_string()));
        }

        Ok(())
    }

    fn session_closed(&self, _session: &Session<String>) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn frames_queued_behind_a_failure_are_dropped() {
    let handler = RecordingHandler::default();
    let frames = handler.frames.clone();
    let closed = handler.closed.clone();

    let config = ConfigurationBuilder::new().port(0).build();
    let acceptor = SocketAcceptor::new(Arc::new(ChannelContext::new(
        config,
        LineProtocol,
        handler,
    )));
    let addr = acceptor.bind().expect("bind");
    let (mut stream, _) = client(addr);

    stream.write_all(b"slow-boom\n").expect("write");
    thread::sleep(Duration::from_millis(20));
    // The peer may already be gone.
    let _ = stream.write_all(b"late\n");

    assert!(wait_until(Duration::from_secs(5), || {
        closed.load(Ordering::SeqCst) == 1
    }));
    thread::sleep(Duration::from_millis(50));
    assert_eq!(*frames.lock().unwrap(), vec!["slow-boom".to_string()]);
}

#[test]
fn undelimited_input_past_the_read_limit_closes_the_session() {
    let handler = EchoHandler::default();
    let closed = handler.closed.clone();

    let config = ConfigurationBuilder::new()
        .port(0)
        .max_read_buffer(1024)
        .build();
    let acceptor = SocketAcceptor::new(Arc::new(ChannelContext::new(
        config,
        LineProtocol,
        handler,
    )));
    let addr = acceptor.bind().expect("bind");
    let (mut stream, _) = client(addr);

    let _ = stream.write_all(&[b'x'; 4096]);

    // Either a clean EOF or a reset, never an echo.
    let mut rest = Vec::new();
    let _ = stream.read_to_end(&mut rest);
    assert!(rest.is_empty());

    assert!(wait_until(Duration::from_secs(5), || {
        closed.load(Ordering::SeqCst) == 1
    }));
    assert!(wait_until(Duration::from_secs(5), || {
        acceptor.context().sessions().is_empty()
    }));
}
