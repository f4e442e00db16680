//! Scenario 3 (spec.md §8): two constructors, each with its own
//! controller, fanned out across the same bind address. Each listener
//! dispatches through its own registered controller independently.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::thread;

use linemux::{Controller, MultiplexerBuilder, Server, Session};

struct Echo;

impl Controller for Echo {
    fn request(&self, session: &mut Session, line: &str) -> i32 {
        session.response_set(0, "", line.to_string());
        0
    }

    fn response(&self, session: &mut Session, _request_code: i32) -> i32 {
        let body = session.response().body.clone();
        match session.socket_mut().write(body.as_bytes()) {
            Ok(()) => 0,
            Err(_) => 1,
        }
    }
}

struct Reverse;

impl Controller for Reverse {
    fn request(&self, session: &mut Session, line: &str) -> i32 {
        let trimmed = line.trim_end_matches(['\r', '\n']);
        let reversed: String = trimmed.chars().rev().collect();
        session.response_set(0, "", format!("{reversed}\n"));
        0
    }

    fn response(&self, session: &mut Session, _request_code: i32) -> i32 {
        let body = session.response().body.clone();
        match session.socket_mut().write(body.as_bytes()) {
            Ok(()) => 0,
            Err(_) => 1,
        }
    }
}

#[test]
fn multiplexer_fans_out_distinct_controllers_across_constructors() {
    let mut multiplexer = MultiplexerBuilder::new()
        .bind_addresses(["127.0.0.1".to_string()])
        .constructor(Box::new(|server: &mut Server| {
            server.set_service("echo");
            server.set_port(0);
            server.set_controller(Box::new(Echo));
            Ok(())
        }))
        .constructor(Box::new(|server: &mut Server| {
            server.set_service("reverse");
            server.set_port(0);
            server.set_controller(Box::new(Reverse));
            Ok(())
        }))
        .build()
        .expect("pre-loop setup should succeed");

    let echo_addr = multiplexer.servers()[0].listening_socket().local_addr().unwrap();
    let reverse_addr = multiplexer.servers()[1].listening_socket().local_addr().unwrap();

    let shutdown = multiplexer.shutdown_handle();
    let run_handle = thread::spawn(move || multiplexer.run());

    let mut echo_stream = TcpStream::connect(echo_addr).unwrap();
    echo_stream.write_all(b"hi\n").unwrap();
    let mut buf = [0_u8; 16];
    let n = echo_stream.read(&mut buf).unwrap();
    assert_eq!(&buf[..n], b"hi\n");

    let mut reverse_stream = TcpStream::connect(reverse_addr).unwrap();
    reverse_stream.write_all(b"hi\n").unwrap();
    let n = reverse_stream.read(&mut buf).unwrap();
    assert_eq!(&buf[..n], b"ih\n");

    shutdown.shutdown();
    run_handle.join().unwrap().expect("run should exit cleanly on shutdown");
}
