mod common;

use common::{EchoHandler, LineProtocol};
use netreactor::{
    ChannelContext, ConfigurationBuilder, Error, LifeCycleContext, LifeCycleListener,
    LoggingLifeCycleListener, SocketAcceptor,
};
use std::net::TcpListener as StdTcpListener;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

struct RecordingListener {
    name: &'static str,
    index: i32,
    log: Arc<Mutex<Vec<String>>>,
}

impl RecordingListener {
    fn record(&self, event: &str) {
        self.log.lock().unwrap().push(format!("{}:{event}", self.name));
    }
}

impl LifeCycleListener for RecordingListener {
    fn sort_index(&self) -> i32 {
        self.index
    }

    fn started(&self, _context: &LifeCycleContext) {
        self.record("started");
    }

    fn stopping(&self, _context: &LifeCycleContext) {
        self.record("stopping");
    }

    fn stopped(&self, _context: &LifeCycleContext) {
        self.record("stopped");
    }

    fn failure(&self, _context: &LifeCycleContext, _error: &Error) {
        self.record("failure");
    }
}

fn acceptor(port: u16, log: &Arc<Mutex<Vec<String>>>) -> SocketAcceptor<LineProtocol> {
    let config = ConfigurationBuilder::new().port(port).build();
    let context = ChannelContext::new(config, LineProtocol, EchoHandler::default())
        .with_listener(LoggingLifeCycleListener)
        .with_listener(RecordingListener {
            name: "late",
            index: 10,
            log: log.clone(),
        })
        .with_listener(RecordingListener {
            name: "early",
            index: 1,
            log: log.clone(),
        });

    SocketAcceptor::new(Arc::new(context))
}

#[test]
fn listeners_run_in_sort_order() {
    common::init_tracing();

    let log = Arc::new(Mutex::new(Vec::new()));
    let acceptor = acceptor(0, &log);

    let addr = acceptor.bind().expect("bind");
    assert_eq!(acceptor.bind().expect("bind twice"), addr);
    assert_eq!(acceptor.local_address(), Some(addr));

    acceptor.unbind();
    acceptor.unbind();

    assert_eq!(
        *log.lock().unwrap(),
        vec![
            "early:started",
            "late:started",
            "early:stopping",
            "late:stopping",
            "early:stopped",
            "late:stopped",
        ]
    );
}

#[test]
fn bind_failure_notifies_listeners() {
    let occupied = StdTcpListener::bind("127.0.0.1:0").expect("bind");
    let port = occupied.local_addr().expect("addr").port();

    let log = Arc::new(Mutex::new(Vec::new()));
    let acceptor = acceptor(port, &log);

    assert!(matches!(acceptor.bind(), Err(Error::Io(_))));
    assert!(!acceptor.is_bound());
    assert_eq!(*log.lock().unwrap(), vec!["early:failure", "late:failure"]);
}

#[test]
fn logging_listener_sorts_last_and_reports_uptime() {
    assert_eq!(LoggingLifeCycleListener.sort_index(), 999);

    let context = LifeCycleContext {
        port: 8300,
        started_at: Instant::now() - Duration::from_secs(36),
    };
    let hours = context.uptime_hours();
    assert!((0.0099..0.02).contains(&hours), "uptime {hours}");

    LoggingLifeCycleListener.stopped(&context);
}
