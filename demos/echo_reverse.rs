//! Two protocols in one process, fanned out across every bind address
//! (spec.md §8, scenario 3): `echo` sends each line straight back,
//! `reverse` sends each line back with its characters reversed.
//!
//! ```text
//! $ cargo run --bin echo-reverse-demo
//! $ nc 127.0.0.1 7000   # echo
//! $ nc 127.0.0.1 7001   # reverse
//! ```

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
            Err(err) => {
                log::warn!("echo: write failed: {err}");
                1
            }
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
            Err(err) => {
                log::warn!("reverse: write failed: {err}");
                1
            }
        }
    }
}

fn main() -> linemux::Result<()> {
    env_logger::init();

    let mut multiplexer = MultiplexerBuilder::new()
        .bind_addresses(["127.0.0.1".to_string()])
        .constructor(Box::new(|server: &mut Server| {
            server.set_service("echo");
            server.set_port(7000);
            server.set_timeout_secs(30);
            server.set_controller(Box::new(Echo));
            Ok(())
        }))
        .constructor(Box::new(|server: &mut Server| {
            server.set_service("reverse");
            server.set_port(7001);
            server.set_timeout_secs(30);
            server.set_controller(Box::new(Reverse));
            Ok(())
        }))
        .build()?;

    for server in multiplexer.servers() {
        log::info!("{} listening on {}:{}", server.service(), server.bind_address(), server.port());
    }

    multiplexer.run()
}
