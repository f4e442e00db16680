//! Process-wide protocol controller registry (spec.md §4.2).
//!
//! A [`Controller`] bundles up to seven optional hooks that are invoked at
//! defined points in a session's lifecycle. Multiple protocols can coexist
//! in one process by registering separate controllers; each registration
//! yields an opaque [`Handle`] that a [`crate::server::Server`] attaches to
//! every [`crate::session::Session`] it accepts.

use std::sync::RwLock;

use crate::error::{Error, Result};
use crate::session::Session;

/// Maximum number of distinct protocol controllers in one process.
///
/// Slot 0 is reserved for the inert, no-op controller.
pub const CONTROLLER_MAX: usize = 10;

/// Identifies a hook within a [`Controller`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hook {
    /// Runs once, immediately after `Session::accept`, before the greeting.
    Init,
    /// Runs once at the start of `Session::handler`, before the read loop.
    Greeting,
    /// Runs once per request line; populates the session's response.
    Request,
    /// Runs once per request line, after `Request`; serializes the response.
    Response,
    /// Runs when `Session::reset` is called.
    Reset,
    /// Runs when `readline` reports a timeout with the peer still connected.
    Timeout,
    /// Runs when the accept path rejects a session for exceeding
    /// `CLIENT_COUNT_MAX`.
    Overload,
    /// Runs once, immediately before the session's owned resources are freed.
    Destroy,
}

/// An opaque handle identifying a registered [`Controller`].
///
/// `Handle(0)` is always valid and refers to the inert controller: every
/// hook invocation on it is a no-op that returns `0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Handle(pub(crate) u32);

impl Handle {
    /// The inert handle. Inbound sessions whose server was never registered
    /// and all outbound (connect-path) sessions use this handle.
    pub const INERT: Handle = Handle(0);

    /// Returns `true` if this is the inert handle.
    #[must_use]
    pub fn is_inert(self) -> bool {
        self.0 == 0
    }
}

/// A protocol's set of lifecycle hooks.
///
/// Only `request` and `response` are required; every other hook defaults to
/// a no-op. Implementors typically hold their protocol state behind
/// interior mutability (the same controller instance serves every session
/// of that protocol concurrently, from many handler threads).
pub trait Controller: Send + Sync {
    /// Handle one request line, populating `session`'s response. Returns a
    /// protocol-defined status code; `0` conventionally means success.
    fn request(&self, session: &mut Session, line: &str) -> i32;

    /// Serialize and send `session`'s response, given the `request` hook's
    /// return code. Always invoked after `request`, even on failure, so the
    /// protocol can emit an error response.
    fn response(&self, session: &mut Session, request_code: i32) -> i32;

    /// Runs once per session, right after accept, before anything is read.
    fn init(&self, _session: &mut Session) -> i32 {
        0
    }

    /// Runs once per session, producing the greeting response.
    fn greeting(&self, _session: &mut Session) -> i32 {
        0
    }

    /// Runs when a session is explicitly reset.
    fn reset(&self, _session: &mut Session) -> i32 {
        0
    }

    /// Runs once, when the session's read times out with the peer still
    /// connected.
    fn timeout(&self, _session: &mut Session) -> i32 {
        0
    }

    /// Runs when the session is rejected for exceeding the client limit.
    fn overload(&self, _session: &mut Session) -> i32 {
        0
    }

    /// Runs once, right before the session's owned resources are freed.
    fn destroy(&self, _session: &mut Session) -> i32 {
        0
    }
}

/// The inert, no-op controller occupying registry slot 0.
struct NullController;

impl Controller for NullController {
    fn request(&self, _session: &mut Session, _line: &str) -> i32 {
        0
    }

    fn response(&self, _session: &mut Session, _request_code: i32) -> i32 {
        0
    }
}

/// A process-wide, append-only table of [`Controller`]s.
///
/// Registration (`register`) is only safe to call before a
/// [`crate::multiplexer::Multiplexer`] enters its poll loop (spec.md §5:
/// "writes happen only during `register`, which MUST be called before the
/// poll loop starts"). After that point the registry is read-only and
/// requires no further synchronization beyond the `RwLock` already in
/// place for read concurrency across handler threads.
pub struct Registry {
    controllers: RwLock<Vec<Box<dyn Controller>>>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    /// Create a fresh registry with only the inert controller in slot 0.
    #[must_use]
    pub fn new() -> Self {
        Registry {
            controllers: RwLock::new(vec![Box::new(NullController)]),
        }
    }

    /// Register a new controller, returning its handle.
    ///
    /// # Errors
    /// Returns [`Error::RegistryFull`] once [`CONTROLLER_MAX`] controllers
    /// are registered.
    pub fn register(&self, controller: Box<dyn Controller>) -> Result<Handle> {
        let mut controllers = self
            .controllers
            .write()
            .expect("controller registry lock poisoned");
        if controllers.len() >= CONTROLLER_MAX {
            return Err(Error::RegistryFull);
        }
        let handle = Handle(controllers.len() as u32);
        controllers.push(controller);
        Ok(handle)
    }

    /// Invoke a zero-argument hook (every hook except `request`, which
    /// additionally needs the request line — see [`Registry::invoke_request`]
    /// — and `response`, which takes the request hook's return code as
    /// `arg`) on the controller identified by `handle`.
    ///
    /// `handle == Handle::INERT` resolves to the inert controller, whose
    /// hooks are all no-ops returning `0`.
    ///
    /// # Errors
    /// Returns [`Error::BadHandle`] for a handle that was never returned by
    /// `register`.
    pub fn invoke(&self, handle: Handle, hook: Hook, session: &mut Session, arg: i32) -> Result<i32> {
        let controllers = self
            .controllers
            .read()
            .expect("controller registry lock poisoned");
        let controller = controllers
            .get(handle.0 as usize)
            .ok_or(Error::BadHandle(handle))?;
        Ok(match hook {
            Hook::Init => controller.init(session),
            Hook::Greeting => controller.greeting(session),
            Hook::Response => controller.response(session, arg),
            Hook::Reset => controller.reset(session),
            Hook::Timeout => controller.timeout(session),
            Hook::Overload => controller.overload(session),
            Hook::Destroy => controller.destroy(session),
            Hook::Request => unreachable!("use invoke_request for Hook::Request"),
        })
    }

    /// Invoke the `request` hook, which (unlike every other hook) takes the
    /// request line as an argument rather than an `i32`.
    ///
    /// # Errors
    /// Returns [`Error::BadHandle`] for a handle that was never returned by
    /// `register`.
    pub fn invoke_request(&self, handle: Handle, session: &mut Session, line: &str) -> Result<i32> {
        let controllers = self
            .controllers
            .read()
            .expect("controller registry lock poisoned");
        let controller = controllers
            .get(handle.0 as usize)
            .ok_or(Error::BadHandle(handle))?;
        Ok(controller.request(session, line))
    }

    /// Number of controllers registered, including the inert one.
    #[must_use]
    pub fn len(&self) -> usize {
        self.controllers.read().expect("lock poisoned").len()
    }

    /// Returns `true` if only the inert controller is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() <= 1
    }
}
