//! Scenario 6 (spec.md §8): once `CLIENT_COUNT_MAX` sessions are
//! concurrently open, the next accepted connection is rejected through the
//! `overload` hook and closed immediately, while the listener keeps
//! accepting connections after that.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use linemux::{Controller, MultiplexerBuilder, Server, Session};

struct Hold(Arc<AtomicUsize>);

impl Controller for Hold {
    fn request(&self, session: &mut Session, _line: &str) -> i32 {
        session.response_set(0, "", "");
        0
    }

    fn response(&self, _session: &mut Session, _request_code: i32) -> i32 {
        0
    }

    fn overload(&self, _session: &mut Session) -> i32 {
        self.0.fetch_add(1, Ordering::SeqCst);
        0
    }
}

#[test]
fn overload_closes_the_connection_beyond_client_count_max() {
    let overload_count = Arc::new(AtomicUsize::new(0));
    let probe_count = Arc::clone(&overload_count);

    let mut multiplexer = MultiplexerBuilder::new()
        .bind_addresses(["127.0.0.1".to_string()])
        .client_count_max(2)
        .constructor(Box::new(move |server: &mut Server| {
            server.set_service("hold");
            server.set_port(0);
            server.set_timeout_secs(30);
            server.set_controller(Box::new(Hold(Arc::clone(&probe_count))));
            Ok(())
        }))
        .build()
        .expect("pre-loop setup should succeed");

    let addr = multiplexer.servers()[0].listening_socket().local_addr().unwrap();
    let shutdown = multiplexer.shutdown_handle();
    let run_handle = thread::spawn(move || multiplexer.run());

    let mut held_one = TcpStream::connect(addr).unwrap();
    thread::sleep(Duration::from_millis(150));
    let mut held_two = TcpStream::connect(addr).unwrap();
    thread::sleep(Duration::from_millis(150));
    let mut rejected = TcpStream::connect(addr).unwrap();
    thread::sleep(Duration::from_millis(300));

    let mut buf = [0_u8; 16];
    let n = rejected.read(&mut buf).expect("overloaded session should close cleanly");
    assert_eq!(n, 0, "third connection should be rejected as overloaded");
    assert_eq!(overload_count.load(Ordering::SeqCst), 1);

    held_one.set_read_timeout(Some(Duration::from_millis(200))).unwrap();
    let held_one_result = held_one.read(&mut buf);
    assert!(
        held_one_result.is_err(),
        "a held session should still be open, not closed by the overload check"
    );

    held_two.write_all(b"still here\n").ok();

    shutdown.shutdown();
    run_handle.join().unwrap().expect("run should exit cleanly on shutdown");
}
