//! A thread-per-connection framework for line-oriented network daemons.
//!
//! A process using this crate assembles one or more [`Server`]
//! configurations (via constructor callbacks), hands them and a bind
//! address list to a [`MultiplexerBuilder`], and calls
//! [`Multiplexer::run`]. Each accepted connection becomes a [`Session`]
//! that is driven, on its own detached thread, through a fixed hook
//! sequence defined by the protocol's [`Controller`] — `init`, `greeting`,
//! repeated `request`/`response` cycles, an optional `timeout`, then
//! `destroy`.
//!
//! # Modules
//!
//! - [`socket`] — the line-buffered, optionally-TLS socket endpoint.
//! - [`session`] — per-connection state and the hook-dispatch loop.
//! - [`server`] — one protocol endpoint's binding configuration.
//! - [`controller`] — the process-wide registry of protocol hook sets.
//! - [`multiplexer`] — pre-loop setup and the `mio`-driven accept loop.
//! - [`preflight`] — privilege drop and chroot, run before the poll loop.
//! - [`config`] — optional `serde` (de)serialization of the two
//!   data-shaped inputs (`PreflightConfig`, `BindConfig`).
//! - [`error`] — the crate-wide error taxonomy.
//!
//! # Features
//!
//! - `log` (default): routes diagnostics through the `log` crate.
//! - `tls`: adds `rustls`-backed `start_tls_server`/`start_tls_client` to
//!   [`Socket`].
//! - `config`: derives `serde::{Serialize, Deserialize}` on
//!   [`config::PreflightConfig`] and [`config::BindConfig`].

pub mod config;
pub mod controller;
pub mod error;
pub mod multiplexer;
pub mod preflight;
pub mod server;
pub mod session;
pub mod socket;

pub use config::{BindConfig, PreflightConfig};
pub use controller::{Controller, Handle, Hook, Registry, CONTROLLER_MAX};
pub use error::{Error, Result};
pub use multiplexer::{Multiplexer, MultiplexerBuilder, ShutdownHandle, CLIENT_COUNT_MAX_DEFAULT};
pub use preflight::drop_privileges;
pub use server::{Constructor, Server};
pub use session::{Response, Session, SessionState};
pub use socket::{Direction, Family, Interest, LocalCredentials, Socket, Status};

#[cfg(feature = "tls")]
pub use socket::{ClientTlsConfig, ServerTlsConfig};
