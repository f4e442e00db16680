//! Scenario 5 (spec.md §8): a session that never sends a request line
//! times out, the `timeout` hook fires exactly once, and the session ends
//! `Closed` (observed here as the peer's socket being closed).

use std::io::Read;
use std::net::TcpStream;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use linemux::{Controller, MultiplexerBuilder, Server, Session};

struct TimeoutProbe(Arc<AtomicUsize>);

impl Controller for TimeoutProbe {
    fn request(&self, session: &mut Session, _line: &str) -> i32 {
        session.response_set(0, "", "");
        0
    }

    fn response(&self, _session: &mut Session, _request_code: i32) -> i32 {
        0
    }

    fn timeout(&self, _session: &mut Session) -> i32 {
        self.0.fetch_add(1, Ordering::SeqCst);
        0
    }
}

#[test]
fn idle_session_times_out_exactly_once_and_closes() {
    let timeout_count = Arc::new(AtomicUsize::new(0));
    let probe_count = Arc::clone(&timeout_count);

    let mut multiplexer = MultiplexerBuilder::new()
        .bind_addresses(["127.0.0.1".to_string()])
        .constructor(Box::new(move |server: &mut Server| {
            server.set_service("timeout-probe");
            server.set_port(0);
            server.set_timeout_secs(1);
            server.set_controller(Box::new(TimeoutProbe(Arc::clone(&probe_count))));
            Ok(())
        }))
        .build()
        .expect("pre-loop setup should succeed");

    let addr = multiplexer.servers()[0].listening_socket().local_addr().unwrap();
    let shutdown = multiplexer.shutdown_handle();
    let run_handle = thread::spawn(move || multiplexer.run());

    let mut stream = TcpStream::connect(addr).unwrap();
    // Send nothing; wait past the 1s server-side timeout.
    thread::sleep(Duration::from_millis(1500));

    let mut buf = [0_u8; 16];
    let n = stream.read(&mut buf).expect("peer should close cleanly, not reset");
    assert_eq!(n, 0, "timed-out session should close the connection");
    assert_eq!(timeout_count.load(Ordering::SeqCst), 1);

    shutdown.shutdown();
    run_handle.join().unwrap().expect("run should exit cleanly on shutdown");
}
