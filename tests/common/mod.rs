#![allow(dead_code)]

use bytes::{Bytes, BytesMut};
use netreactor::{
    Error, IoEventHandler, ProtocolDecoder, ProtocolEncoder, ProtocolFactory, Result, Session,
    SocketIo, WriteDispatcher, WriteTask,
};
use std::io::{self, ErrorKind};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Newline-delimited UTF-8 frames.
#[derive(Clone, Copy, Default)]
pub struct LineProtocol;

pub struct LineDecoder;

pub struct LineEncoder;

impl ProtocolDecoder for LineDecoder {
    type Frame = String;

    fn decode(&mut self, src: &mut BytesMut) -> io::Result<Option<String>> {
        let Some(at) = src.iter().position(|b| *b == b'\n') else {
            return Ok(None);
        };

        let line = src.split_to(at + 1);
        String::from_utf8(line[..at].to_vec())
            .map(Some)
            .map_err(|err| io::Error::new(ErrorKind::InvalidData, err))
    }
}

impl ProtocolEncoder for LineEncoder {
    type Frame = String;

    fn encode(&self, frame: String) -> io::Result<WriteTask> {
        Ok(WriteTask::new(Bytes::from(format!("{frame}\n"))))
    }
}

impl ProtocolFactory for LineProtocol {
    type Frame = String;
    type Decoder = LineDecoder;
    type Encoder = LineEncoder;

    fn decoder(&self) -> LineDecoder {
        LineDecoder
    }

    fn encoder(&self) -> LineEncoder {
        LineEncoder
    }
}

/// Writes every line back; `boom` fails the handler and `panic` panics it.
#[derive(Default)]
pub struct EchoHandler {
    pub opened: Arc<AtomicUsize>,
    pub closed: Arc<AtomicUsize>,
}

impl IoEventHandler<String> for EchoHandler {
    fn accept(&self, session: &Session<String>, frame: String) -> Result<()> {
        match frame.as_str() {
            "boom" => Err(Error::Handler("boom".to_string())),
            "panic" => panic!("handler panic"),
            _ => session.write(frame),
        }
    }

    fn session_opened(&self, _session: &Session<String>) {
        self.opened.fetch_add(1, Ordering::SeqCst);
    }

    fn session_closed(&self, _session: &Session<String>) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Forwards every received line to a test channel.
pub struct CollectingHandler {
    pub frames: Mutex<Sender<String>>,
}

impl IoEventHandler<String> for CollectingHandler {
    fn accept(&self, _session: &Session<String>, frame: String) -> Result<()> {
        let _ = self.frames.lock().unwrap().send(frame);
        Ok(())
    }
}

/// Counts dispatches and close requests.
#[derive(Default)]
pub struct RecordingDispatcher {
    pub dispatched: AtomicUsize,
    pub closes: AtomicUsize,
}

impl WriteDispatcher for RecordingDispatcher {
    fn dispatch(&self, _token: netreactor::Token) {
        self.dispatched.fetch_add(1, Ordering::SeqCst);
    }

    fn close(&self, _token: netreactor::Token) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct ThrottleState {
    /// Bytes the socket still accepts before reporting `WouldBlock`.
    pub budget: usize,
    pub written: Vec<u8>,
    pub shutdowns: usize,
    pub deregistrations: usize,
}

/// In-memory socket whose send side accepts a bounded number of bytes.
#[derive(Clone, Default)]
pub struct ThrottledSocket {
    pub state: Arc<Mutex<ThrottleState>>,
}

impl ThrottledSocket {
    pub fn allow(&self, budget: usize) {
        self.state.lock().unwrap().budget = budget;
    }

    pub fn written(&self) -> Vec<u8> {
        self.state.lock().unwrap().written.clone()
    }
}

impl SocketIo for ThrottledSocket {
    fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        Err(ErrorKind::WouldBlock.into())
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.state.lock().unwrap();
        if state.budget == 0 {
            return Err(ErrorKind::WouldBlock.into());
        }

        let n = buf.len().min(state.budget);
        state.budget -= n;
        state.written.extend_from_slice(&buf[..n]);
        Ok(n)
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        Ok(SocketAddr::from((Ipv4Addr::LOCALHOST, 4000)))
    }

    fn peer_addr(&self) -> io::Result<SocketAddr> {
        Ok(SocketAddr::from((Ipv4Addr::LOCALHOST, 5000)))
    }

    fn deregister(&mut self) -> io::Result<()> {
        self.state.lock().unwrap().deregistrations += 1;
        Ok(())
    }

    fn shutdown(&mut self) -> io::Result<()> {
        self.state.lock().unwrap().shutdowns += 1;
        Ok(())
    }
}

/// Collects the results handed to write callbacks, tagged by task.
#[derive(Clone, Default)]
pub struct Completions {
    pub results: Arc<Mutex<Vec<(usize, std::result::Result<(), String>)>>>,
}

impl Completions {
    pub fn task(&self, tag: usize, payload: Vec<u8>) -> WriteTask {
        let results = self.results.clone();
        WriteTask::new(payload).on_complete(move |result| {
            results
                .lock()
                .unwrap()
                .push((tag, result.map_err(|err| err.to_string())));
        })
    }

    pub fn snapshot(&self) -> Vec<(usize, std::result::Result<(), String>)> {
        self.results.lock().unwrap().clone()
    }
}

/// Polls `condition` until it holds or `timeout` elapses.
pub fn wait_until(timeout: std::time::Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = std::time::Instant::now() + timeout;

    while std::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(std::time::Duration::from_millis(5));
    }

    condition()
}
