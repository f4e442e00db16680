//! Scenario 4 (spec.md §8): a PF_LOCAL server binds cleanly over a stale
//! socket path left behind by a previous, no-longer-running listener —
//! exercised through the `Server`/`Multiplexer` layers, not just
//! `Socket::bind` directly (see `socket::tests::rebinding_stale_local_path_succeeds`
//! for the lower-level version of this behavior).

use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::thread;

use linemux::{Controller, Family, MultiplexerBuilder, Server, Session};

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

fn constructor(path: String) -> Box<dyn Fn(&mut Server) -> linemux::Result<()> + Send + Sync> {
    Box::new(move |server: &mut Server| {
        server.set_family(Family::Local);
        server.set_service("pf-local-echo");
        server.set_local_path(path.clone());
        server.set_controller(Box::new(Echo));
        Ok(())
    })
}

#[test]
fn rebinding_a_stale_socket_path_through_the_server_layer_succeeds() {
    let path = std::env::temp_dir().join(format!("linemux-pf-local-test-{}.sock", std::process::id()));
    let _ = std::fs::remove_file(&path);

    let first = MultiplexerBuilder::new()
        .bind_addresses(["127.0.0.1".to_string()])
        .constructor(constructor(path.to_str().unwrap().to_string()))
        .build()
        .expect("first bind should succeed");
    drop(first);
    assert!(path.exists(), "closing the multiplexer must not remove the socket path");

    let mut second = MultiplexerBuilder::new()
        .bind_addresses(["127.0.0.1".to_string()])
        .constructor(constructor(path.to_str().unwrap().to_string()))
        .build()
        .expect("rebinding over the stale path should succeed");

    let shutdown = second.shutdown_handle();
    let run_handle = thread::spawn(move || second.run());

    let mut stream = UnixStream::connect(&path).unwrap();
    stream.write_all(b"ping\n").unwrap();
    let mut buf = [0_u8; 64];
    let n = stream.read(&mut buf).unwrap();
    assert_eq!(&buf[..n], b"ping\n");

    shutdown.shutdown();
    run_handle.join().unwrap().expect("run should exit cleanly on shutdown");
    let _ = std::fs::remove_file(&path);
}
