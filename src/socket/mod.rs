//! The socket endpoint (spec.md §4.1): a bidirectional byte channel with
//! line-buffered reads, optional TLS, and PF_INET/PF_LOCAL support.
//!
//! A single [`Socket`] type represents both the listening side (owned by a
//! [`crate::server::Server`]) and the connected side (owned by a
//! [`crate::session::Session`]), matching the data model in spec.md §3: the
//! same struct, `direction` telling them apart. Internally the listening
//! side is backed by a non-blocking `mio` listener (registered with the
//! multiplexer's `Poll`) and the connected side by a blocking `std` stream
//! with kernel read/write timeouts — the split described in SPEC_FULL.md §2.

mod line_buffer;
mod raw;
#[cfg(feature = "tls")]
mod tls;

use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::os::unix::io::{FromRawFd, IntoRawFd};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::time::Duration;

use bitflags::bitflags;

use crate::error::{Error, Result};
pub use line_buffer::LineBuffer;

#[cfg(feature = "tls")]
pub use tls::{ClientTlsConfig, ServerTlsConfig};

/// Read scratch buffer size for a single `read(2)` call.
const RECV_BUF_SIZE: usize = 4096;

/// Address family of a [`Socket`] (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    /// PF_INET: a TCP/IPv4 (or IPv6) socket.
    Inet,
    /// PF_LOCAL: a UNIX-domain socket, addressed by filesystem path.
    Local,
}

/// Which role a [`Socket`] has taken on (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    /// `set_family` has not yet been followed by `bind` or `connect`.
    #[default]
    Unset,
    /// Bound and listening.
    Listen,
    /// Connected, either by `accept` or by `connect`.
    Connect,
}

bitflags! {
    /// Socket status flags (spec.md §3).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Status: u32 {
        /// The socket has an active connection (or is listening).
        const CONNECTED    = 1 << 0;
        /// The underlying fd is in non-blocking mode.
        const NON_BLOCKING = 1 << 1;
        /// The read buffer's tail element is a dangling fragment.
        const FRAGMENTED   = 1 << 2;
        /// Last `select` reported read readiness.
        const READ_READY   = 1 << 3;
        /// Last `select` reported write readiness.
        const WRITE_READY  = 1 << 4;
        /// Last `select` reported an exceptional condition.
        const EXCEPTION    = 1 << 5;
        /// Last wait timed out rather than becoming ready.
        const TIMEOUT      = 1 << 6;
    }
}

bitflags! {
    /// Which readiness conditions [`Socket::select`] should wait for.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Interest: u32 {
        /// Wait for read readiness.
        const READ      = 1 << 0;
        /// Wait for write readiness.
        const WRITE     = 1 << 1;
        /// Wait for an exceptional condition.
        const EXCEPTION = 1 << 2;
    }
}

/// A PF_LOCAL socket's owner/group/permission triple, applied after bind.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalCredentials {
    /// Numeric uid to `chown` the socket path to, if any.
    pub uid: Option<u32>,
    /// Numeric gid to `chown` the socket path to, if any.
    pub gid: Option<u32>,
    /// File mode applied with `chmod` after bind.
    pub mode: u32,
}

enum Listener {
    Inet(mio::net::TcpListener),
    Local(mio::net::UnixListener),
}

enum Stream {
    Inet(TcpStream),
    Local(UnixStream),
    #[cfg(feature = "tls")]
    TlsServer(Box<tls::ServerStream>),
    #[cfg(feature = "tls")]
    TlsClient(Box<tls::ClientStream>),
}

enum Backend {
    Empty,
    Listener(Listener),
    Stream(Stream),
}

/// A bidirectional, line-buffered socket endpoint.
///
/// See the module documentation and spec.md §4.1 for the full contract.
pub struct Socket {
    family: Option<Family>,
    direction: Direction,
    status: Status,
    backend: Backend,
    read_buffer: LineBuffer,
    local_addr: Option<SocketAddr>,
    remote_addr: Option<SocketAddr>,
    local_path: Option<PathBuf>,
    local_credentials: LocalCredentials,
    peer_credentials: Option<(u32, u32)>,
}

impl Socket {
    /// A fresh, unconfigured endpoint: no family, `Direction::Unset`, empty
    /// read buffer.
    #[must_use]
    pub fn new() -> Self {
        Socket {
            family: None,
            direction: Direction::Unset,
            status: Status::empty(),
            backend: Backend::Empty,
            read_buffer: LineBuffer::new(),
            local_addr: None,
            remote_addr: None,
            local_path: None,
            local_credentials: LocalCredentials { mode: 0o660, ..Default::default() },
            peer_credentials: None,
        }
    }

    /// Set the address family. Permitted exactly once.
    ///
    /// # Errors
    /// Returns [`Error::BadState`] if the family was already set.
    pub fn set_family(&mut self, family: Family) -> Result<()> {
        if self.family.is_some() {
            return Err(Error::BadState("family already set"));
        }
        self.family = Some(family);
        Ok(())
    }

    /// The configured family, if any.
    #[must_use]
    pub fn family(&self) -> Option<Family> {
        self.family
    }

    /// The current direction.
    #[must_use]
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// The current status flags.
    #[must_use]
    pub fn status(&self) -> Status {
        self.status
    }

    /// Set the PF_LOCAL owner/group/mode triple to apply after `bind`.
    /// Ignored for `Family::Inet`.
    pub fn set_local_credentials(&mut self, credentials: LocalCredentials) {
        self.local_credentials = credentials;
    }

    /// Bind and listen.
    ///
    /// For `Family::Inet`, `address` is parsed as an IP literal and `port`
    /// as a TCP port; if the process is not running as root and `port <=
    /// 1024`, the port is shifted by 1000 and a warning is logged (spec.md
    /// §4.1). For `Family::Local`, `address` is a filesystem path and
    /// `port` is ignored; any pre-existing inode at that path is removed
    /// first, and the configured credential triple is applied afterwards.
    ///
    /// # Errors
    /// Returns [`Error::BadState`] if the family has not been set, or
    /// [`Error::Io`] if the underlying syscalls fail.
    pub fn bind(&mut self, address: &str, port: i32) -> Result<()> {
        let family = self.family.ok_or(Error::BadState("family not set before bind"))?;
        match family {
            Family::Inet => {
                let port = adjust_privileged_port(port);
                let addr = parse_inet_address(address, port)?;
                let fd = raw::bind_inet(addr)?;
                let listener = unsafe { mio::net::TcpListener::from_raw_fd(fd) };
                self.local_addr = listener.local_addr().ok();
                self.backend = Backend::Listener(Listener::Inet(listener));
            }
            Family::Local => {
                let path = Path::new(address);
                let fd = raw::bind_local(
                    path,
                    self.local_credentials.mode,
                    self.local_credentials.uid,
                    self.local_credentials.gid,
                )?;
                let listener = unsafe { mio::net::UnixListener::from_raw_fd(fd) };
                self.local_path = Some(path.to_path_buf());
                self.backend = Backend::Listener(Listener::Local(listener));
            }
        }
        self.direction = Direction::Listen;
        self.status.insert(Status::CONNECTED);
        Ok(())
    }

    /// Connect out to `host:port` (for `Family::Local`, `host` is a path
    /// and `port` is ignored).
    ///
    /// For `Family::Inet`, each resolved address is attempted in turn with
    /// a non-blocking connect and up to a 30-second wait for write
    /// readiness (`EINPROGRESS` is not an error); the first to succeed wins.
    ///
    /// # Errors
    /// Returns [`Error::BadState`] if the family has not been set, or
    /// [`Error::Io`] if every candidate address fails to connect.
    pub fn connect(&mut self, host: &str, port: u16) -> Result<()> {
        let family = self.family.ok_or(Error::BadState("family not set before connect"))?;
        match family {
            Family::Inet => {
                let stream = connect_inet_with_timeout(host, port, Duration::from_secs(30))?;
                self.remote_addr = stream.peer_addr().ok();
                self.local_addr = stream.local_addr().ok();
                self.backend = Backend::Stream(Stream::Inet(stream));
            }
            Family::Local => {
                let stream = UnixStream::connect(host).map_err(|e| Error::io("connect", e))?;
                self.backend = Backend::Stream(Stream::Local(stream));
            }
        }
        self.direction = Direction::Connect;
        self.status.insert(Status::CONNECTED);
        Ok(())
    }

    /// Wrap this already-connected `Family::Inet` socket in a server-side
    /// TLS handshake, in place. Only valid before any `readline`/`write`
    /// call has crossed the wire in cleartext.
    ///
    /// # Errors
    /// Returns [`Error::BadState`] if the socket is not a plain, connected
    /// TCP stream, or [`Error::Io`] if the handshake fails.
    #[cfg(feature = "tls")]
    pub fn start_tls_server(&mut self, config: &tls::ServerTlsConfig) -> Result<()> {
        let plain = match std::mem::replace(&mut self.backend, Backend::Empty) {
            Backend::Stream(Stream::Inet(stream)) => stream,
            other => {
                self.backend = other;
                return Err(Error::BadState("start_tls_server requires a plain, connected inet socket"));
            }
        };
        let tls_stream = tls::accept_handshake(plain, config).map_err(|e| Error::io("tls handshake", e))?;
        self.backend = Backend::Stream(Stream::TlsServer(Box::new(tls_stream)));
        Ok(())
    }

    /// Wrap this already-connected `Family::Inet` socket in a client-side
    /// TLS handshake, in place, verifying the peer against `server_name`.
    ///
    /// # Errors
    /// Returns [`Error::BadState`] if the socket is not a plain, connected
    /// TCP stream, or [`Error::Io`] if the handshake fails.
    #[cfg(feature = "tls")]
    pub fn start_tls_client(&mut self, config: &tls::ClientTlsConfig, server_name: &str) -> Result<()> {
        let plain = match std::mem::replace(&mut self.backend, Backend::Empty) {
            Backend::Stream(Stream::Inet(stream)) => stream,
            other => {
                self.backend = other;
                return Err(Error::BadState("start_tls_client requires a plain, connected inet socket"));
            }
        };
        let tls_stream = tls::connect_handshake(plain, config, server_name)
            .map_err(|e| Error::io("tls handshake", e))?;
        self.backend = Backend::Stream(Stream::TlsClient(Box::new(tls_stream)));
        Ok(())
    }

    /// Accept one pending connection from this listening socket.
    ///
    /// The new `Socket` is connected, blocking, and (for `Family::Local`)
    /// carries the peer's credentials. `ECONNABORTED` is reported through
    /// the normal `Result`, not a panic — callers (the multiplexer) treat it
    /// as a non-fatal, per-accept failure.
    ///
    /// # Errors
    /// Returns [`Error::BadState`] if this socket is not a listener, or
    /// [`Error::Io`] if `accept(2)` fails.
    pub fn accept(&self) -> Result<Socket> {
        match &self.backend {
            Backend::Listener(Listener::Inet(listener)) => {
                let (stream, remote_addr) =
                    listener.accept().map_err(|e| Error::io("accept", e))?;
                let fd = stream.into_raw_fd();
                raw::set_blocking(fd).map_err(|e| Error::io("fcntl", e))?;
                let stream = unsafe { TcpStream::from_raw_fd(fd) };
                let local_addr = stream.local_addr().ok();
                Ok(Socket {
                    family: Some(Family::Inet),
                    direction: Direction::Connect,
                    status: Status::CONNECTED,
                    backend: Backend::Stream(Stream::Inet(stream)),
                    read_buffer: LineBuffer::new(),
                    local_addr,
                    remote_addr: Some(remote_addr),
                    local_path: None,
                    local_credentials: LocalCredentials::default(),
                    peer_credentials: None,
                })
            }
            Backend::Listener(Listener::Local(listener)) => {
                let (stream, _addr) = listener.accept().map_err(|e| Error::io("accept", e))?;
                let fd = stream.into_raw_fd();
                raw::set_blocking(fd).map_err(|e| Error::io("fcntl", e))?;
                let peer_credentials = raw::peer_credentials(fd).ok();
                let stream = unsafe { UnixStream::from_raw_fd(fd) };
                Ok(Socket {
                    family: Some(Family::Local),
                    direction: Direction::Connect,
                    status: Status::CONNECTED,
                    backend: Backend::Stream(Stream::Local(stream)),
                    read_buffer: LineBuffer::new(),
                    local_addr: None,
                    remote_addr: None,
                    local_path: None,
                    local_credentials: LocalCredentials::default(),
                    peer_credentials,
                })
            }
            _ => Err(Error::BadState("accept called on a non-listening socket")),
        }
    }

    /// Wait up to `timeout_secs` seconds (`-1` = forever) for any of
    /// `interest` to become ready. A zero return sets `Status::TIMEOUT` and
    /// is not an error; signal interruption is retried transparently.
    ///
    /// # Errors
    /// Returns [`Error::NotConnected`]-equivalent [`Error::BadState`] if the
    /// socket is not connected, or [`Error::Io`] if `poll(2)` fails.
    pub fn select(&mut self, interest: Interest, timeout_secs: i32) -> Result<()> {
        let fd = self.as_raw_fd().ok_or(Error::BadState("select on an unconnected socket"))?;
        self.status.remove(Status::READ_READY | Status::WRITE_READY | Status::EXCEPTION | Status::TIMEOUT);

        let mut events = 0;
        if interest.contains(Interest::READ) {
            events |= libc::POLLIN;
        }
        if interest.contains(Interest::WRITE) {
            events |= libc::POLLOUT;
        }
        if interest.contains(Interest::EXCEPTION) {
            events |= libc::POLLPRI;
        }

        let mut pfd = libc::pollfd { fd, events: events as i16, revents: 0 };
        let timeout_ms = if timeout_secs < 0 { -1 } else { timeout_secs.saturating_mul(1000) };

        loop {
            let rc = unsafe { libc::poll(&mut pfd, 1, timeout_ms) };
            if rc < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(Error::io("poll", err));
            }
            if rc == 0 {
                self.status.insert(Status::TIMEOUT);
                return Ok(());
            }
            break;
        }

        if pfd.revents & libc::POLLIN != 0 {
            self.status.insert(Status::READ_READY);
        }
        if pfd.revents & libc::POLLOUT != 0 {
            self.status.insert(Status::WRITE_READY);
        }
        if pfd.revents & (libc::POLLERR | libc::POLLHUP | libc::POLLNVAL) != 0 {
            self.status.insert(Status::EXCEPTION);
        }
        Ok(())
    }

    /// Read exactly one line (terminator preserved; callers strip it
    /// themselves if desired — see spec.md §4.1).
    ///
    /// # Errors
    /// Returns [`Error::Timeout`] if the per-socket receive timeout
    /// elapses with no data, or [`Error::Truncated`] if the peer closes
    /// mid-line with nothing left to deliver.
    pub fn readline(&mut self) -> Result<String> {
        self.status.remove(Status::TIMEOUT);

        if self.read_buffer.ready() {
            return Ok(self.read_buffer.pop().expect("ready() implies non-empty"));
        }

        loop {
            match self.recv_scratch()? {
                RecvOutcome::Data(chunk) => {
                    self.read_buffer.ingest(&chunk);
                    self.status.set(Status::FRAGMENTED, self.read_buffer.is_fragmented());
                    if self.read_buffer.ready() {
                        break;
                    }
                    if !self.status.contains(Status::CONNECTED) {
                        break;
                    }
                }
                RecvOutcome::Eof => {
                    self.status.remove(Status::CONNECTED);
                    break;
                }
                RecvOutcome::Timeout => {
                    self.status.insert(Status::TIMEOUT);
                    return Err(Error::Timeout);
                }
            }
        }

        self.read_buffer.pop().ok_or(Error::Truncated)
    }

    fn recv_scratch(&mut self) -> Result<RecvOutcome> {
        let mut buf = [0_u8; RECV_BUF_SIZE];
        let result = match &mut self.backend {
            Backend::Stream(Stream::Inet(stream)) => stream.read(&mut buf),
            Backend::Stream(Stream::Local(stream)) => stream.read(&mut buf),
            #[cfg(feature = "tls")]
            Backend::Stream(Stream::TlsServer(stream)) => stream.read(&mut buf),
            #[cfg(feature = "tls")]
            Backend::Stream(Stream::TlsClient(stream)) => stream.read(&mut buf),
            _ => return Err(Error::BadState("readline on an unconnected socket")),
        };

        match result {
            Ok(0) => Ok(RecvOutcome::Eof),
            Ok(n) => Ok(RecvOutcome::Data(String::from_utf8_lossy(&buf[..n]).into_owned())),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::TimedOut => {
                Ok(RecvOutcome::Timeout)
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => self.recv_scratch(),
            Err(e) => Err(Error::io("read", e)),
        }
    }

    /// Write the entire buffer. Fails on a partial write (spec.md §4.1).
    ///
    /// # Errors
    /// Returns [`Error::Io`] on a write failure, or [`Error::Truncated`] if
    /// fewer than `buf.len()` bytes were accepted in one call.
    pub fn write(&mut self, buf: &[u8]) -> Result<()> {
        let n = match &mut self.backend {
            Backend::Stream(Stream::Inet(stream)) => stream.write(buf).map_err(|e| Error::io("write", e))?,
            Backend::Stream(Stream::Local(stream)) => stream.write(buf).map_err(|e| Error::io("write", e))?,
            #[cfg(feature = "tls")]
            Backend::Stream(Stream::TlsServer(stream)) => stream.write(buf).map_err(|e| Error::io("write", e))?,
            #[cfg(feature = "tls")]
            Backend::Stream(Stream::TlsClient(stream)) => stream.write(buf).map_err(|e| Error::io("write", e))?,
            _ => return Err(Error::BadState("write on an unconnected socket")),
        };
        if n != buf.len() {
            return Err(Error::Truncated);
        }
        Ok(())
    }

    /// Apply receive/send timeouts to the connected socket via the kernel
    /// `SO_RCVTIMEO`/`SO_SNDTIMEO` knobs. A duration of zero means "wait
    /// forever" (no timeout is installed).
    ///
    /// # Errors
    /// Returns [`Error::Io`] if the underlying `setsockopt` fails.
    pub fn set_timeout(&mut self, read_secs: u64, write_secs: u64) -> Result<()> {
        let read = (read_secs > 0).then(|| Duration::from_secs(read_secs));
        let write = (write_secs > 0).then(|| Duration::from_secs(write_secs));
        match &self.backend {
            Backend::Stream(Stream::Inet(stream)) => {
                stream.set_read_timeout(read).map_err(|e| Error::io("setsockopt(SO_RCVTIMEO)", e))?;
                stream.set_write_timeout(write).map_err(|e| Error::io("setsockopt(SO_SNDTIMEO)", e))?;
            }
            Backend::Stream(Stream::Local(stream)) => {
                stream.set_read_timeout(read).map_err(|e| Error::io("setsockopt(SO_RCVTIMEO)", e))?;
                stream.set_write_timeout(write).map_err(|e| Error::io("setsockopt(SO_SNDTIMEO)", e))?;
            }
            _ => return Err(Error::BadState("set_timeout on an unconnected socket")),
        }
        Ok(())
    }

    /// Idempotent close: beyond the first call this is a no-op.
    pub fn close(&mut self) {
        if matches!(self.backend, Backend::Empty) {
            return;
        }
        self.backend = Backend::Empty;
        self.status.remove(Status::CONNECTED);
    }

    /// The peer's `(uid, gid)`, if this is a connected PF_LOCAL socket that
    /// went through `accept`.
    #[must_use]
    pub fn peer_credentials(&self) -> Option<(u32, u32)> {
        self.peer_credentials
    }

    /// The local address, for `Family::Inet` sockets.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// The remote address, for connected `Family::Inet` sockets.
    #[must_use]
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    /// The bound filesystem path, for `Family::Local` listening sockets.
    #[must_use]
    pub fn local_path(&self) -> Option<&Path> {
        self.local_path.as_deref()
    }

    fn as_raw_fd(&self) -> Option<std::os::unix::io::RawFd> {
        use std::os::unix::io::AsRawFd;
        match &self.backend {
            Backend::Stream(Stream::Inet(stream)) => Some(stream.as_raw_fd()),
            Backend::Stream(Stream::Local(stream)) => Some(stream.as_raw_fd()),
            #[cfg(feature = "tls")]
            Backend::Stream(Stream::TlsServer(stream)) => Some(stream.sock.as_raw_fd()),
            #[cfg(feature = "tls")]
            Backend::Stream(Stream::TlsClient(stream)) => Some(stream.sock.as_raw_fd()),
            Backend::Listener(Listener::Inet(listener)) => Some(listener.as_raw_fd()),
            Backend::Listener(Listener::Local(listener)) => Some(listener.as_raw_fd()),
            Backend::Empty => None,
        }
    }

    /// Register this socket's listening side with a multiplexer `Poll`.
    pub(crate) fn register_listener(
        &mut self,
        registry: &mio::Registry,
        token: mio::Token,
    ) -> io::Result<()> {
        match &mut self.backend {
            Backend::Listener(Listener::Inet(listener)) => {
                registry.register(listener, token, mio::Interest::READABLE)
            }
            Backend::Listener(Listener::Local(listener)) => {
                registry.register(listener, token, mio::Interest::READABLE)
            }
            _ => Err(io::Error::new(io::ErrorKind::InvalidInput, "not a listening socket")),
        }
    }
}

impl Default for Socket {
    fn default() -> Self {
        Self::new()
    }
}

use std::os::unix::io::AsRawFd;
impl AsRawFd for Listener {
    fn as_raw_fd(&self) -> std::os::unix::io::RawFd {
        match self {
            Listener::Inet(l) => l.as_raw_fd(),
            Listener::Local(l) => l.as_raw_fd(),
        }
    }
}

enum RecvOutcome {
    Data(String),
    Eof,
    Timeout,
}

/// Port-shift rule for unprivileged processes (spec.md §4.1): when not
/// running as root and `port <= 1024`, shift by 1000 and warn.
fn adjust_privileged_port(port: i32) -> i32 {
    if port > 0 && port <= 1024 && !is_root() {
        let shifted = port + 1000;
        log::warn!("port {port} requires root; using {shifted} instead");
        shifted
    } else {
        port
    }
}

fn is_root() -> bool {
    unsafe { libc::geteuid() == 0 }
}

fn parse_inet_address(address: &str, port: i32) -> Result<SocketAddr> {
    let address = if address.is_empty() { "0.0.0.0" } else { address };
    format!("{address}:{port}")
        .parse()
        .map_err(|_| Error::BadState("invalid inet bind address"))
}

fn connect_inet_with_timeout(host: &str, port: u16, timeout: Duration) -> Result<TcpStream> {
    use std::net::ToSocketAddrs;
    use socket2::{Domain, Socket as Socket2, Type};

    let candidates: Vec<SocketAddr> = (host, port)
        .to_socket_addrs()
        .map_err(|e| Error::io("getaddrinfo", e))?
        .collect();
    if candidates.is_empty() {
        return Err(Error::io("getaddrinfo", io::Error::new(io::ErrorKind::NotFound, "no addresses resolved")));
    }

    let mut last_err = None;
    for addr in candidates {
        let domain = if addr.is_ipv6() { Domain::IPV6 } else { Domain::IPV4 };
        let socket = match Socket2::new(domain, Type::STREAM, None) {
            Ok(s) => s,
            Err(e) => {
                last_err = Some(e);
                continue;
            }
        };
        if socket.set_nonblocking(true).is_err() {
            continue;
        }
        match socket.connect(&addr.into()) {
            Ok(()) => {}
            Err(e) if e.raw_os_error() == Some(libc::EINPROGRESS) => {}
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(e) => {
                last_err = Some(e);
                continue;
            }
        }

        let fd = socket.as_raw_fd();
        let mut pfd = libc::pollfd { fd, events: libc::POLLOUT, revents: 0 };
        let timeout_ms = timeout.as_millis() as i32;
        let rc = unsafe { libc::poll(&mut pfd, 1, timeout_ms) };
        if rc <= 0 {
            last_err = Some(io::Error::new(io::ErrorKind::TimedOut, "connect timed out"));
            continue;
        }

        match socket.take_error() {
            Ok(None) => {
                let _ = socket.set_nonblocking(false);
                return Ok(socket.into());
            }
            Ok(Some(e)) => {
                last_err = Some(e);
            }
            Err(e) => {
                last_err = Some(e);
            }
        }
    }

    Err(Error::io("connect", last_err.unwrap_or_else(|| io::Error::new(io::ErrorKind::Other, "connect failed"))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader, Write as _};
    use std::os::unix::fs::PermissionsExt;
    use std::thread;

    #[test]
    fn bind_accept_readline_write_roundtrip() {
        let mut listener = Socket::new();
        listener.set_family(Family::Inet).unwrap();
        listener.bind("127.0.0.1", 0).unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = thread::spawn(move || {
            let mut stream = TcpStream::connect(addr).unwrap();
            stream.write_all(b"hello\n").unwrap();
            let mut reply = String::new();
            BufReader::new(stream).read_line(&mut reply).unwrap();
            reply
        });

        // mio listeners are non-blocking; poll until accept succeeds.
        let mut session = loop {
            match listener.accept() {
                Ok(s) => break s,
                Err(_) => thread::yield_now(),
            }
        };
        session.set_timeout(5, 5).unwrap();
        let line = session.readline().unwrap();
        assert_eq!(line, "hello\n");
        session.write(b"world\n").unwrap();

        assert_eq!(handle.join().unwrap(), "world\n");
    }

    #[test]
    fn set_family_twice_fails() {
        let mut socket = Socket::new();
        socket.set_family(Family::Inet).unwrap();
        assert!(matches!(socket.set_family(Family::Inet), Err(Error::BadState(_))));
    }

    #[test]
    fn rebinding_stale_local_path_succeeds() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("linemux-test-{}.sock", std::process::id()));
        std::fs::write(&path, b"stale").unwrap();

        let mut socket = Socket::new();
        socket.set_family(Family::Local).unwrap();
        socket.set_local_credentials(LocalCredentials { uid: None, gid: None, mode: 0o660 });
        socket.bind(path.to_str().unwrap(), 0).unwrap();

        let meta = std::fs::metadata(&path).unwrap();
        assert_eq!(meta.permissions().mode() & 0o777, 0o660);

        socket.close();
        let _ = std::fs::remove_file(&path);
    }
}
