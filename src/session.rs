//! Per-connection session state and lifecycle (spec.md §4.3).
//!
//! A `Session` owns exactly one connected [`crate::socket::Socket`] and
//! drives it through a fixed hook order — `init` once, then a
//! `greeting`/`response` pair, then repeated `request`/`response` cycles,
//! then an optional `timeout` hook, then `destroy` — via whichever
//! [`Controller`](crate::controller::Controller) its `controller_handle`
//! resolves to in the shared [`Registry`](crate::controller::Registry).

use std::any::Any;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::controller::{Handle, Hook, Registry};
use crate::error::{Error, Result};
use crate::socket::{Family, Socket, Status};

/// A session's position in its lifecycle (spec.md §4.3).
///
/// `Idle` and `Write` are part of the original state space but are never
/// produced by this handler loop — every read/dispatch/respond cycle stays
/// in `Read` until it ends in `Timeout` or `Closed`. They're kept here so
/// the enum matches the full data model rather than silently narrowing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No session object yet exists; never observed on a live `Session`.
    Undef,
    /// `handler` has started and is about to run the greeting hook.
    Greeting,
    /// Set by `new`, before `handler` begins.
    Open,
    /// The read/dispatch/respond loop is active.
    Read,
    /// Reserved; unused by this implementation.
    Idle,
    /// Reserved; unused by this implementation.
    Write,
    /// `readline` reported a timeout with the peer still connected.
    Timeout,
    /// The socket is closed; terminal state.
    Closed,
}

/// A structured response populated by the `request` (or `greeting`) hook
/// and serialized by the `response` hook (spec.md §4.3, §6).
#[derive(Debug, Clone, Default)]
pub struct Response {
    /// Protocol-defined status code.
    pub code: i32,
    /// First line of the response, before the body.
    pub header: String,
    /// Optional response body.
    pub body: String,
    /// If `true`, the `response` hook already wrote directly to the socket
    /// and the framework should not attempt any further serialization.
    pub as_is: bool,
}

/// The slice of a [`crate::server::Server`]'s configuration a `Session`
/// needs, shared cheaply (`Arc`) rather than held by reference, since a
/// session must never borrow from — or outlive — its server.
pub(crate) struct SessionContext {
    pub(crate) family: Family,
    pub(crate) timeout_secs: u64,
    pub(crate) controller_handle: Handle,
    pub(crate) registry: Arc<Registry>,
    pub(crate) service: String,
}

impl SessionContext {
    pub(crate) fn new(
        family: Family,
        timeout_secs: u64,
        controller_handle: Handle,
        registry: Arc<Registry>,
        service: String,
    ) -> Arc<Self> {
        Arc::new(SessionContext { family, timeout_secs, controller_handle, registry, service })
    }
}

/// Per-connection state: the owned socket, identity, lifecycle state, and
/// the structured response the active controller populates.
pub struct Session {
    socket: Socket,
    user: String,
    groups: Vec<String>,
    context: Arc<SessionContext>,
    start_time: Instant,
    expire_time: Option<Instant>,
    state: SessionState,
    protocol_state: i32,
    error_count: u32,
    argv: Vec<String>,
    scratch_context: Vec<String>,
    response: Response,
    protocol_data: Option<Box<dyn Any + Send>>,
    controller_handle: Handle,
}

impl Session {
    fn new(socket: Socket, controller_handle: Handle, context: Arc<SessionContext>) -> Self {
        let start_time = Instant::now();
        let expire_time =
            (context.timeout_secs > 0).then(|| start_time + Duration::from_secs(context.timeout_secs));
        Session {
            socket,
            user: String::new(),
            groups: Vec::new(),
            context,
            start_time,
            expire_time,
            state: SessionState::Open,
            protocol_state: 0,
            error_count: 0,
            argv: Vec::new(),
            scratch_context: Vec::new(),
            response: Response::default(),
            protocol_data: None,
            controller_handle,
        }
    }

    /// Accept one connection off `listener`, inheriting the owning server's
    /// family, controller handle and timeout (spec.md §4.3: `accept`
    /// "copies family and controller_handle from the server, and applies
    /// `set_timeout(server.timeout, 60)`").
    ///
    /// # Errors
    /// Propagates [`Error::Io`] from the underlying `accept`/`setsockopt`
    /// calls.
    #[cfg(test)]
    pub(crate) fn accept(listener: &Socket, context: Arc<SessionContext>) -> Result<Session> {
        let socket = listener.accept()?;
        Session::from_connected_socket(socket, context)
    }

    /// Wrap an already-accepted socket (the multiplexer calls
    /// `Socket::accept` itself, in a loop, to drain an edge-triggered
    /// listener) into a session, applying `set_timeout(server.timeout, 60)`
    /// (spec.md §4.3).
    ///
    /// # Errors
    /// Propagates [`Error::Io`] from the `setsockopt` calls.
    pub(crate) fn from_connected_socket(mut socket: Socket, context: Arc<SessionContext>) -> Result<Session> {
        socket.set_timeout(context.timeout_secs, 60)?;
        let handle = context.controller_handle;
        Ok(Session::new(socket, handle, context))
    }

    /// Build an outbound session: connects to `host:port` and sets
    /// `controller_handle` to [`Handle::INERT`] (spec.md §4.3: "outbound
    /// sessions ... controller_handle = 0").
    ///
    /// # Errors
    /// Propagates [`Error::BadState`]/[`Error::Io`] from `connect`.
    pub fn connect(registry: Arc<Registry>, family: Family, host: &str, port: u16) -> Result<Session> {
        let mut socket = Socket::new();
        socket.set_family(family)?;
        socket.connect(host, port)?;
        let context = SessionContext::new(family, 0, Handle::INERT, registry, "outbound".to_string());
        Ok(Session::new(socket, Handle::INERT, context))
    }

    /// The session's current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// The controller handle resolved for this session (the owning
    /// server's handle for inbound sessions, [`Handle::INERT`] for
    /// outbound ones).
    #[must_use]
    pub fn controller_handle(&self) -> Handle {
        self.controller_handle
    }

    /// The authenticated user name, if any.
    #[must_use]
    pub fn user(&self) -> &str {
        &self.user
    }

    /// Set the authenticated user name.
    pub fn set_user(&mut self, user: impl Into<String>) {
        self.user = user.into();
    }

    /// The authenticated group set.
    #[must_use]
    pub fn groups(&self) -> &[String] {
        &self.groups
    }

    /// Append a group to the authenticated group set.
    pub fn push_group(&mut self, group: impl Into<String>) {
        self.groups.push(group.into());
    }

    /// The request's parsed argument vector, populated by the controller.
    #[must_use]
    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    /// Mutable access to the argument vector.
    pub fn argv_mut(&mut self) -> &mut Vec<String> {
        &mut self.argv
    }

    /// Free-form protocol scratch lines (spec.md §3's `context`).
    #[must_use]
    pub fn context_lines(&self) -> &[String] {
        &self.scratch_context
    }

    /// Mutable access to the scratch context lines.
    pub fn context_lines_mut(&mut self) -> &mut Vec<String> {
        &mut self.scratch_context
    }

    /// The protocol-defined integer state a controller may use across
    /// requests within one session (e.g. an SMTP-style phase counter).
    #[must_use]
    pub fn protocol_state(&self) -> i32 {
        self.protocol_state
    }

    /// Set the protocol-defined integer state.
    pub fn set_protocol_state(&mut self, state: i32) {
        self.protocol_state = state;
    }

    /// The count of protocol-level errors a controller has recorded.
    #[must_use]
    pub fn error_count(&self) -> u32 {
        self.error_count
    }

    /// Increment the protocol-level error count.
    pub fn record_error(&mut self) {
        self.error_count += 1;
    }

    /// Stash opaque, protocol-defined per-session data.
    pub fn set_protocol_data<T: Any + Send>(&mut self, data: T) {
        self.protocol_data = Some(Box::new(data));
    }

    /// Borrow the stashed protocol data, if present and of type `T`.
    #[must_use]
    pub fn protocol_data<T: Any>(&self) -> Option<&T> {
        self.protocol_data.as_deref().and_then(<dyn Any>::downcast_ref)
    }

    /// Mutably borrow the stashed protocol data, if present and of type `T`.
    pub fn protocol_data_mut<T: Any>(&mut self) -> Option<&mut T> {
        self.protocol_data.as_deref_mut().and_then(<dyn Any>::downcast_mut)
    }

    /// The pending response a controller populates via [`Session::response_set`]
    /// or by writing its fields directly.
    #[must_use]
    pub fn response(&self) -> &Response {
        &self.response
    }

    /// Mutable access to the pending response.
    pub fn response_mut(&mut self) -> &mut Response {
        &mut self.response
    }

    /// Populate `code`/`header`/`body` in one call, clearing `as_is`
    /// (spec.md §4.3: "the controller's request hook SHOULD populate
    /// `code/header/body` via a `response_set` helper").
    pub fn response_set(&mut self, code: i32, header: impl Into<String>, body: impl Into<String>) {
        self.response.code = code;
        self.response.header = header.into();
        self.response.body = body.into();
        self.response.as_is = false;
    }

    /// The owned socket.
    #[must_use]
    pub fn socket(&self) -> &Socket {
        &self.socket
    }

    /// Mutable access to the owned socket, for controllers that write
    /// responses directly (setting `response.as_is = true`).
    pub fn socket_mut(&mut self) -> &mut Socket {
        &mut self.socket
    }

    /// When this session was created.
    #[must_use]
    pub fn start_time(&self) -> Instant {
        self.start_time
    }

    /// When this session's inactivity timeout will elapse, if a timeout
    /// was configured.
    #[must_use]
    pub fn expire_time(&self) -> Option<Instant> {
        self.expire_time
    }

    /// The service name of the owning server ("outbound" for sessions
    /// created via [`Session::connect`]).
    #[must_use]
    pub fn service(&self) -> &str {
        &self.context.service
    }

    /// Read one request line and drive it through the `request` and
    /// `response` hooks (spec.md §4.3).
    ///
    /// On a read timeout, transitions to `SessionState::Timeout` and
    /// returns `Ok(())` — timeout is a state, not an error (spec.md §7). On
    /// any other read failure (peer closed, truncated line), logs and
    /// transitions to `SessionState::Closed`. On a non-zero return from the
    /// `response` hook, transitions to `SessionState::Closed` (spec.md §7:
    /// "a failing response hook terminates the session").
    ///
    /// # Errors
    /// Propagates [`Error::BadHandle`] if `controller_handle` does not
    /// resolve (an invariant violation — it is set once, internally, at
    /// session creation and never mutated).
    pub fn process_request(&mut self) -> Result<()> {
        let line = match self.socket.readline() {
            Ok(line) => line,
            Err(Error::Timeout) => {
                self.state = SessionState::Timeout;
                return Ok(());
            }
            Err(err) => {
                log::debug!("session ({}): read failed, closing: {err}", self.service());
                self.state = SessionState::Closed;
                return Ok(());
            }
        };

        self.response = Response::default();
        let registry = Arc::clone(&self.context.registry);
        let handle = self.controller_handle;
        let request_code = registry.invoke_request(handle, self, &line)?;
        let response_code = registry.invoke(handle, Hook::Response, self, request_code)?;
        if response_code != 0 {
            self.state = SessionState::Closed;
        }
        Ok(())
    }

    /// Zero the error counter and invoke the controller's `reset` hook.
    ///
    /// # Errors
    /// Propagates [`Error::BadHandle`], see [`Session::process_request`].
    pub fn reset(&mut self) -> Result<()> {
        self.error_count = 0;
        let registry = Arc::clone(&self.context.registry);
        let handle = self.controller_handle;
        registry.invoke(handle, Hook::Reset, self, 0)?;
        Ok(())
    }

    /// The per-connection driver: greeting, then the read/dispatch/respond
    /// loop, then an optional `timeout` hook, then close and destroy
    /// (spec.md §4.3). Consumes `self` — the handler thread owns the
    /// session for its entire lifetime and it is never reused afterwards.
    pub(crate) fn handler(mut self) {
        self.state = SessionState::Greeting;
        if let Err(err) = self.run_greeting() {
            log::warn!("session ({}): greeting failed: {err}", self.service());
            self.state = SessionState::Closed;
        } else {
            self.state = SessionState::Read;
        }

        while self.state == SessionState::Read {
            if let Err(err) = self.process_request() {
                log::error!("session ({}): hook dispatch failed: {err}", self.service());
                self.state = SessionState::Closed;
                break;
            }
        }

        if self.state == SessionState::Timeout {
            if self.socket.status().contains(Status::CONNECTED) {
                let registry = Arc::clone(&self.context.registry);
                let handle = self.controller_handle;
                if let Err(err) = registry.invoke(handle, Hook::Timeout, &mut self, 0) {
                    log::warn!("session ({}): timeout hook failed: {err}", self.service());
                }
            }
            self.state = SessionState::Closed;
        }

        self.close();
        if let Err(err) = self.destroy() {
            log::error!("session ({}): destroy failed: {err}", self.service());
        }
    }

    fn run_greeting(&mut self) -> Result<()> {
        self.response = Response::default();
        let registry = Arc::clone(&self.context.registry);
        let handle = self.controller_handle;
        let greeting_code = registry.invoke(handle, Hook::Greeting, self, 0)?;
        registry.invoke(handle, Hook::Response, self, greeting_code)?;
        Ok(())
    }

    /// Close the session's socket. Idempotent beyond `SessionState::Closed`
    /// — a second call logs a warning rather than failing (spec.md §4.3).
    pub fn close(&mut self) {
        if self.state == SessionState::Closed {
            log::warn!("session ({}): double close", self.service());
            return;
        }
        self.user.clear();
        self.groups.clear();
        self.socket.close();
        self.state = SessionState::Closed;
    }

    /// Run the `destroy` hook and free the session's owned resources.
    /// Requires `SessionState::Closed` or `SessionState::Open`.
    ///
    /// # Errors
    /// Returns [`Error::BadState`] if the session is in neither state, or
    /// propagates [`Error::BadHandle`] from hook dispatch.
    pub fn destroy(mut self) -> Result<()> {
        if !matches!(self.state, SessionState::Closed | SessionState::Open) {
            return Err(Error::BadState("destroy requires a Closed or Open session"));
        }
        let registry = Arc::clone(&self.context.registry);
        let handle = self.controller_handle;
        registry.invoke(handle, Hook::Destroy, &mut self, 0)?;
        Ok(())
    }

    /// Inject `line` into the `request` hook and assert the resulting
    /// `response.code` matches `expected_code` (spec.md §4.3: `test-inject`,
    /// used by tests — this is the "test" operation from the public
    /// contract, not a `#[cfg(test)]` item, since host crates use it too).
    ///
    /// # Errors
    /// Returns [`Error::Fatal`] if the response code doesn't match, or
    /// propagates [`Error::BadHandle`] from hook dispatch.
    pub fn test(&mut self, line: &str, expected_code: i32) -> Result<()> {
        self.response = Response::default();
        let registry = Arc::clone(&self.context.registry);
        let handle = self.controller_handle;
        registry.invoke_request(handle, self, line)?;
        if self.response.code != expected_code {
            return Err(Error::Fatal("test: response code did not match expectation"));
        }
        Ok(())
    }
}
