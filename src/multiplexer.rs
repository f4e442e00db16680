//! The entrypoint binding every listener and driving the accept loop
//! (spec.md §4.5).
//!
//! Pre-loop setup creates one [`Server`] per `(constructor, address)` pair,
//! runs the constructor, binds it, and registers its listening socket with
//! a single `mio::Poll`. The main loop then waits on all listeners at once
//! — exactly the concern `mio` exists for — and reacts to readiness by
//! accepting and spawning a detached handler thread per connection.

use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use mio::{Events, Token, Waker};

use crate::controller::{Handle, Hook, Registry};
use crate::error::{Error, Result};
use crate::server::{Constructor, Server};
use crate::session::Session;
use crate::socket::Family;

/// Listen backlog and controller-table limits live with their owning
/// modules (`socket::raw::LISTEN_BACKLOG`, `controller::CONTROLLER_MAX`);
/// this is the multiplexer's own limit (spec.md §6): sessions beyond this
/// count are rejected via the `overload` hook rather than accepted.
pub const CLIENT_COUNT_MAX_DEFAULT: usize = 1024;

const SHUTDOWN_TOKEN: Token = Token(0);

/// A cheap, `Send + Clone` handle host code can use (e.g. from a signal
/// handler installed outside this crate) to stop a running
/// [`Multiplexer::run`] loop (SPEC_FULL.md §4.5 supplement: graceful
/// shutdown via `mio::Waker`, since the original source never integrates
/// signals with its poll loop).
#[derive(Clone)]
pub struct ShutdownHandle {
    waker: Arc<Waker>,
    requested: Arc<AtomicBool>,
}

impl ShutdownHandle {
    /// Request that the poll loop stop accepting new connections and
    /// return from `run`. In-flight sessions are not cancelled.
    pub fn shutdown(&self) {
        self.requested.store(true, Ordering::SeqCst);
        if let Err(err) = self.waker.wake() {
            log::error!("shutdown handle: failed to wake poll loop: {err}");
        }
    }
}

/// Builds a [`Multiplexer`] from an ordered bind-address list and an
/// ordered constructor list (spec.md §4.5 inputs).
pub struct MultiplexerBuilder {
    bind_addresses: Vec<String>,
    constructors: Vec<Constructor>,
    client_count_max: usize,
}

impl MultiplexerBuilder {
    /// An empty builder: no addresses (meaning "enumerate local IPv4
    /// interfaces" once built), no constructors, the default client limit.
    #[must_use]
    pub fn new() -> Self {
        MultiplexerBuilder {
            bind_addresses: Vec::new(),
            constructors: Vec::new(),
            client_count_max: CLIENT_COUNT_MAX_DEFAULT,
        }
    }

    /// Set the bind address list. Leaving this unset (or empty) means "all
    /// local IPv4 interface addresses" (spec.md §4.5).
    #[must_use]
    pub fn bind_addresses(mut self, addresses: impl IntoIterator<Item = String>) -> Self {
        self.bind_addresses = addresses.into_iter().collect();
        self
    }

    /// Append one protocol constructor.
    #[must_use]
    pub fn constructor(mut self, constructor: Constructor) -> Self {
        self.constructors.push(constructor);
        self
    }

    /// Override the concurrent-session limit (default
    /// [`CLIENT_COUNT_MAX_DEFAULT`]).
    #[must_use]
    pub fn client_count_max(mut self, client_count_max: usize) -> Self {
        self.client_count_max = client_count_max;
        self
    }

    /// Run pre-loop setup: populate bind addresses if empty, create a
    /// `Server` per `(constructor, address)`, run each constructor, bind,
    /// register each distinct controller once, and register every
    /// listener with a fresh `mio::Poll` (spec.md §4.5).
    ///
    /// # Errors
    /// Propagates any error a constructor callback returns, plus
    /// [`Error::Io`]/[`Error::UnknownUser`]/[`Error::UnknownGroup`]/
    /// [`Error::RegistryFull`] from `init_socket`/`bind`/
    /// `register_controller`.
    pub fn build(self) -> Result<Multiplexer> {
        let bind_addresses = if self.bind_addresses.is_empty() {
            enumerate_ipv4_addresses()?
        } else {
            self.bind_addresses
        };

        let poll = mio::Poll::new().map_err(|e| Error::io("epoll_create", e))?;
        let waker = Arc::new(
            Waker::new(poll.registry(), SHUTDOWN_TOKEN).map_err(|e| Error::io("eventfd", e))?,
        );

        let registry = Arc::new(Registry::new());
        let mut servers = Vec::new();
        let mut resolved_handles: Vec<Option<Handle>> = vec![None; self.constructors.len()];

        for (constructor_idx, constructor) in self.constructors.iter().enumerate() {
            if bind_addresses.is_empty() {
                log::warn!("multiplexer: no bind addresses available for constructor {constructor_idx}");
                continue;
            }
            for address in &bind_addresses {
                let mut server = Server::new();
                constructor(&mut server)?;
                server.init_socket()?;

                match resolved_handles[constructor_idx] {
                    Some(handle) => server.adopt_controller_handle(handle),
                    None => {
                        server.register_controller(&registry)?;
                        resolved_handles[constructor_idx] = Some(server.controller_handle());
                    }
                }

                let is_local = server.family() == Family::Local;
                let bind_target = if is_local {
                    server
                        .local_path()
                        .ok_or(Error::BadState(
                            "Family::Local constructor must call set_local_path before init_socket returns",
                        ))?
                        .to_string()
                } else {
                    address.clone()
                };
                server.bind(&bind_target)?;

                let token = Token(servers.len() + 1);
                server
                    .listening_socket_mut()
                    .register_listener(poll.registry(), token)
                    .map_err(|e| Error::io("epoll_ctl", e))?;
                servers.push(server);

                if is_local {
                    break;
                }
            }
        }

        Ok(Multiplexer {
            poll,
            waker,
            registry,
            servers,
            shutdown_requested: Arc::new(AtomicBool::new(false)),
            client_count: Arc::new(AtomicUsize::new(0)),
            client_count_max: self.client_count_max,
        })
    }
}

impl Default for MultiplexerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// The bound, listening multiplexer: one `mio::Poll` watching every
/// server's listening socket, plus the shared controller registry every
/// accepted session dispatches through.
pub struct Multiplexer {
    poll: mio::Poll,
    waker: Arc<Waker>,
    registry: Arc<Registry>,
    servers: Vec<Server>,
    shutdown_requested: Arc<AtomicBool>,
    client_count: Arc<AtomicUsize>,
    client_count_max: usize,
}

impl Multiplexer {
    /// The servers bound by pre-loop setup, in creation order.
    #[must_use]
    pub fn servers(&self) -> &[Server] {
        &self.servers
    }

    /// A cloneable handle that can stop [`Multiplexer::run`] from another
    /// thread (e.g. a signal handler).
    #[must_use]
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle { waker: Arc::clone(&self.waker), requested: Arc::clone(&self.shutdown_requested) }
    }

    /// Enter the poll loop: wait on every listener with no timeout, accept
    /// readable ones (looping each until it would block, since `mio`'s
    /// epoll backend is edge-triggered and a single readiness notification
    /// can cover several pending connections), dump-and-continue on
    /// `POLLERR`/`POLLHUP`/`POLLNVAL` (no dynamic slot removal, per
    /// spec.md §4.5), and return once a [`ShutdownHandle::shutdown`] call
    /// wakes the loop.
    ///
    /// # Errors
    /// Returns [`Error::Io`] if `poll(2)` fails for a reason other than
    /// signal interruption, or [`Error::UnhandledConnections`] if a single
    /// iteration left ready descriptors undispatched.
    pub fn run(&mut self) -> Result<()> {
        let mut events = Events::with_capacity(self.servers.len().max(1) + 1);
        loop {
            match self.poll.poll(&mut events, None) {
                Ok(()) => {}
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(Error::io("poll", err)),
            }

            let reported = events.iter().count();
            let mut handled = 0usize;

            for event in events.iter() {
                if event.token() == SHUTDOWN_TOKEN {
                    handled += 1;
                    if self.shutdown_requested.load(Ordering::SeqCst) {
                        log::info!("multiplexer: shutdown requested, exiting poll loop");
                        return Ok(());
                    }
                    continue;
                }

                let idx = event.token().0 - 1;
                if idx >= self.servers.len() {
                    continue;
                }
                handled += 1;

                if event.is_error() || event.is_read_closed() || event.is_write_closed() {
                    self.servers[idx].dump();
                    continue;
                }
                if event.is_readable() {
                    self.accept_ready(idx);
                }
            }

            if handled < reported {
                return Err(Error::UnhandledConnections { reported, handled });
            }
        }
    }

    /// Drain every pending connection on `servers[idx]`'s listener
    /// (edge-triggered: keep accepting until `accept` would block).
    fn accept_ready(&mut self, idx: usize) {
        loop {
            match self.server_accept(idx) {
                Ok(true) => {}
                Ok(false) => break,
                Err(err) => {
                    log::error!("multiplexer: accept on {}: {err}", self.servers[idx].service());
                    break;
                }
            }
        }
    }

    /// The composed accept operation from spec.md §4.5: accept, run the
    /// `init` hook, enforce the concurrent-session limit (via the
    /// `overload` hook rather than the original's descriptor-number check
    /// — see SPEC_FULL.md §9), then spawn a detached handler thread.
    ///
    /// Returns `Ok(false)` once the listener has no more pending
    /// connections (a non-fatal `WouldBlock`), `Ok(true)` after handling
    /// one connection (accepted-and-spawned, or accepted-and-overloaded).
    fn server_accept(&mut self, idx: usize) -> Result<bool> {
        let server = &self.servers[idx];
        let socket = match server.listening_socket().accept() {
            Ok(socket) => socket,
            Err(Error::Io { source, .. }) if source.kind() == io::ErrorKind::WouldBlock => {
                return Ok(false);
            }
            Err(err) => return Err(err),
        };
        let context = server.session_context(Arc::clone(&self.registry));
        let mut session = Session::from_connected_socket(socket, context)?;

        let handle = session.controller_handle();
        if let Err(err) = self.registry.invoke(handle, Hook::Init, &mut session, 0) {
            log::warn!("multiplexer: init hook failed: {err}");
        }

        let previous = self.client_count.fetch_add(1, Ordering::SeqCst);
        if previous >= self.client_count_max {
            self.client_count.fetch_sub(1, Ordering::SeqCst);
            if let Err(err) = self.registry.invoke(handle, Hook::Overload, &mut session, 0) {
                log::warn!("multiplexer: overload hook failed: {err}");
            }
            session.close();
            if let Err(err) = session.destroy() {
                log::error!("multiplexer: destroying overloaded session failed: {err}");
            }
            return Ok(true);
        }

        let counter = Arc::clone(&self.client_count);
        let service = server.service().to_string();
        let spawned = thread::Builder::new().name(format!("session-{service}")).spawn(move || {
            session.handler();
            counter.fetch_sub(1, Ordering::SeqCst);
        });
        if let Err(err) = spawned {
            self.client_count.fetch_sub(1, Ordering::SeqCst);
            return Err(Error::io("thread::spawn", err));
        }
        Ok(true)
    }
}

fn enumerate_ipv4_addresses() -> Result<Vec<String>> {
    let addresses = nix::ifaddrs::getifaddrs()
        .map_err(|e| Error::io("getifaddrs", io::Error::from(e)))?
        .filter_map(|ifaddr| ifaddr.address)
        .filter_map(|address| address.as_sockaddr_in().map(|sin| sin.ip().to_string()))
        .collect();
    Ok(addresses)
}
