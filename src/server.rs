//! Listening-socket configuration for one protocol endpoint (spec.md §4.4).
//!
//! A `Server` bundles the identity to run as, the bind address/port (or
//! PF_LOCAL path), the protocol controller, and the owned listening
//! [`Socket`]. The [`crate::multiplexer::Multiplexer`] creates one `Server`
//! per `(constructor, address)` pair, runs the constructor callback against
//! it, then binds and registers it.

use std::sync::Arc;

use crate::controller::{Controller, Handle, Registry};
use crate::error::Result;
use crate::session::SessionContext;
use crate::socket::{Family, LocalCredentials, Socket};

#[cfg(feature = "tls")]
use crate::socket::ServerTlsConfig;

/// A server construction callback: customizes a freshly created `Server`
/// (service name, family, port, controller, ...) before it is bound.
/// Failure aborts the multiplexer (spec.md §4.4).
pub type Constructor = Box<dyn Fn(&mut Server) -> Result<()> + Send + Sync>;

/// Binding configuration plus the owned listening socket for one protocol
/// endpoint.
pub struct Server {
    uid: String,
    gid: String,
    service: String,
    family: Family,
    bind_address: String,
    local_path: Option<String>,
    port: i32,
    mode: u32,
    timeout_secs: u64,
    #[cfg(feature = "tls")]
    tls_config: Option<Arc<ServerTlsConfig>>,
    socket: Socket,
    controller: Option<Box<dyn Controller>>,
    controller_handle: Handle,
}

impl Server {
    /// A fresh server with the spec's defaults: `uid="nobody"`,
    /// `gid="nogroup"`, `service="undef-proto"`, `port=-1`, `mode=0o660`,
    /// `family=Inet`, `timeout=300s`.
    #[must_use]
    pub fn new() -> Self {
        Server {
            uid: "nobody".to_string(),
            gid: "nogroup".to_string(),
            service: "undef-proto".to_string(),
            family: Family::Inet,
            bind_address: String::new(),
            local_path: None,
            port: -1,
            mode: 0o660,
            timeout_secs: 300,
            #[cfg(feature = "tls")]
            tls_config: None,
            socket: Socket::new(),
            controller: None,
            controller_handle: Handle::INERT,
        }
    }

    /// Set the identity (PF_LOCAL socket owner) this server's bind path is
    /// `chown`ed to.
    pub fn set_identity(&mut self, uid: impl Into<String>, gid: impl Into<String>) {
        self.uid = uid.into();
        self.gid = gid.into();
    }

    /// Set the protocol/service name (used only for logging).
    pub fn set_service(&mut self, service: impl Into<String>) {
        self.service = service.into();
    }

    /// Set the address family.
    pub fn set_family(&mut self, family: Family) {
        self.family = family;
    }

    /// Set the port (`Family::Inet` only; ignored for `Family::Local`).
    pub fn set_port(&mut self, port: i32) {
        self.port = port;
    }

    /// Set the PF_LOCAL socket path this server listens on. Required for
    /// `Family::Local` constructors — unlike `Family::Inet` servers, a
    /// PF_LOCAL listener doesn't bind per network interface, so its path
    /// comes from the constructor, not the multiplexer's bind-address list
    /// (spec.md §4.5: "for `local` family, break after the first address").
    pub fn set_local_path(&mut self, path: impl Into<String>) {
        self.local_path = Some(path.into());
    }

    /// Set the PF_LOCAL socket file mode.
    pub fn set_mode(&mut self, mode: u32) {
        self.mode = mode;
    }

    /// Set the per-session inactivity timeout.
    pub fn set_timeout_secs(&mut self, timeout_secs: u64) {
        self.timeout_secs = timeout_secs;
    }

    /// Attach the protocol controller this server's sessions will dispatch
    /// to. Ownership transfers to the multiplexer's registry the first
    /// time this constructor's handle is resolved (spec.md §4.5).
    pub fn set_controller(&mut self, controller: Box<dyn Controller>) {
        self.controller = Some(controller);
    }

    /// Attach a TLS configuration and mark this server as TLS-enabled.
    #[cfg(feature = "tls")]
    pub fn set_tls_config(&mut self, config: Arc<ServerTlsConfig>) {
        self.tls_config = Some(config);
    }

    /// `true` if a TLS configuration has been attached.
    #[cfg(feature = "tls")]
    #[must_use]
    pub fn tls(&self) -> bool {
        self.tls_config.is_some()
    }

    /// `true` if a TLS configuration has been attached. Always `false`
    /// when the `tls` feature is disabled.
    #[cfg(not(feature = "tls"))]
    #[must_use]
    pub fn tls(&self) -> bool {
        false
    }

    /// The attached TLS configuration, if any.
    #[cfg(feature = "tls")]
    #[must_use]
    pub fn tls_config(&self) -> Option<&Arc<ServerTlsConfig>> {
        self.tls_config.as_ref()
    }

    /// The address family.
    #[must_use]
    pub fn family(&self) -> Family {
        self.family
    }

    /// The service name.
    #[must_use]
    pub fn service(&self) -> &str {
        &self.service
    }

    /// The configured port (`-1` until a constructor sets one).
    #[must_use]
    pub fn port(&self) -> i32 {
        self.port
    }

    /// The resolved bind address (empty until `bind` has been called).
    #[must_use]
    pub fn bind_address(&self) -> &str {
        &self.bind_address
    }

    /// The configured PF_LOCAL path, if [`Server::set_local_path`] was
    /// called.
    #[must_use]
    pub fn local_path(&self) -> Option<&str> {
        self.local_path.as_deref()
    }

    /// The per-session inactivity timeout.
    #[must_use]
    pub fn timeout_secs(&self) -> u64 {
        self.timeout_secs
    }

    /// The controller handle resolved for this server (`Handle::INERT`
    /// until `register_controller` has run).
    #[must_use]
    pub fn controller_handle(&self) -> Handle {
        self.controller_handle
    }

    /// The owned listening socket.
    #[must_use]
    pub fn listening_socket(&self) -> &Socket {
        &self.socket
    }

    /// Mutable access to the owned listening socket, for registering it
    /// with the multiplexer's `mio::Poll`.
    pub(crate) fn listening_socket_mut(&mut self) -> &mut Socket {
        &mut self.socket
    }

    /// Apply `family` to the owned socket and, for `Family::Local`,
    /// resolve `uid`/`gid` to numeric ids and attach the credential triple
    /// that will be applied to the bound path (spec.md §4.4).
    ///
    /// # Errors
    /// Returns [`Error::UnknownUser`]/[`Error::UnknownGroup`] if `uid`/`gid`
    /// don't resolve via the system's name databases, or [`Error::BadState`]
    /// if the socket's family was already set.
    pub fn init_socket(&mut self) -> Result<()> {
        self.socket.set_family(self.family)?;
        if self.family == Family::Local {
            let uid = crate::preflight::resolve_uid(&self.uid)?;
            let gid = crate::preflight::resolve_gid(&self.gid)?;
            self.socket.set_local_credentials(LocalCredentials {
                uid: Some(uid),
                gid: Some(gid),
                mode: self.mode,
            });
        }
        Ok(())
    }

    /// Bind and listen on `address` (the resolved bind address or, for
    /// `Family::Local`, the filesystem path), recording it for `dump`.
    ///
    /// # Errors
    /// Propagates [`Error::Io`]/[`Error::BadState`] from
    /// [`Socket::bind`](crate::socket::Socket::bind).
    pub(crate) fn bind(&mut self, address: &str) -> Result<()> {
        self.bind_address = address.to_string();
        self.socket.bind(address, self.port)
    }

    /// Register this server's controller into `registry` if it still owns
    /// one, storing the resulting handle. A no-op (keeping whatever handle
    /// is already set) if the controller was already taken — this is how
    /// later `(constructor, address)` entries for the same constructor
    /// reuse the first entry's handle instead of registering a duplicate
    /// controller instance (spec.md §4.5: "register ... once, on the first
    /// address only").
    ///
    /// # Errors
    /// Propagates [`Error::RegistryFull`].
    pub(crate) fn register_controller(&mut self, registry: &Registry) -> Result<()> {
        if let Some(controller) = self.controller.take() {
            self.controller_handle = registry.register(controller)?;
        }
        Ok(())
    }

    /// Adopt an already-resolved controller handle without registering
    /// (used for the second and later addresses of a `Family::Local`
    /// constructor, and for duplicate `(constructor, address)` entries
    /// sharing a controller — see [`Server::register_controller`]).
    pub(crate) fn adopt_controller_handle(&mut self, handle: Handle) {
        self.controller = None;
        self.controller_handle = handle;
    }

    /// Build the shared, read-only context a [`crate::session::Session`]
    /// needs from this server (family, timeout, controller handle, service
    /// name), cloning `registry` cheaply (`Arc`).
    pub(crate) fn session_context(&self, registry: Arc<Registry>) -> Arc<SessionContext> {
        SessionContext::new(
            self.family,
            self.timeout_secs,
            self.controller_handle,
            registry,
            self.service.clone(),
        )
    }

    /// Log this server's current configuration at `error` level (spec.md
    /// §4.5: called when the multiplexer observes `POLLERR | POLLHUP |
    /// POLLNVAL` on this server's listener).
    pub fn dump(&self) {
        log::error!(
            "server dump: service={} family={:?} bind_address={:?} port={} mode={:o} timeout={}s tls={} controller_handle={:?}",
            self.service,
            self.family,
            self.bind_address,
            self.port,
            self.mode,
            self.timeout_secs,
            self.tls(),
            self.controller_handle,
        );
    }

    /// Close the owned socket and drop the server's owned strings and
    /// controller record (spec.md §4.4).
    pub fn destroy(mut self) {
        self.socket.close();
    }
}

impl Default for Server {
    fn default() -> Self {
        Self::new()
    }
}
