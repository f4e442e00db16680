//! Low-level bind/listen/credential plumbing.
//!
//! Adapted from `mio`'s own `sys::unix::tcp::listener` and
//! `sys::unix::uds::listener` modules: the same "build a `socket2::Socket`,
//! twiddle it with raw syscalls, hand the fd to the safe wrapper" shape, with
//! two additions the `mio::net` listeners don't need: a fixed backlog of
//! 300 (spec.md §6) and the PF_LOCAL unlink-then-bind-then-chown/chmod
//! dance (spec.md §4.1, §6).

use std::fs;
use std::io;
use std::net::SocketAddr;
use std::os::unix::io::{IntoRawFd, RawFd};
use std::path::Path;

use socket2::{Domain, Socket as Socket2, Type};

use crate::error::{Error, Result};

/// Listen backlog used for every bound socket (spec.md §4.1, §6).
pub const LISTEN_BACKLOG: i32 = 300;

/// Bind and listen on an inet address, returning the raw fd of a
/// non-blocking listening socket ready to be handed to `mio::net::TcpListener`.
pub fn bind_inet(addr: SocketAddr) -> Result<RawFd> {
    let domain = if addr.is_ipv6() { Domain::IPV6 } else { Domain::IPV4 };
    let socket = Socket2::new(domain, Type::STREAM, None).map_err(|e| Error::io("socket", e))?;
    socket.set_reuse_address(true).map_err(|e| Error::io("setsockopt(SO_REUSEADDR)", e))?;
    socket.bind(&addr.into()).map_err(|e| Error::io("bind", e))?;
    socket.listen(LISTEN_BACKLOG).map_err(|e| Error::io("listen", e))?;
    socket.set_nonblocking(true).map_err(|e| Error::io("fcntl(O_NONBLOCK)", e))?;
    Ok(socket.into_raw_fd())
}

/// Bind and listen on a PF_LOCAL path, returning the raw fd of a
/// non-blocking listening socket ready to be handed to
/// `mio::net::UnixListener`.
///
/// Any pre-existing inode at `path` is removed first (spec.md §4.1: "any
/// pre-existing path is unlinked"), and `mode`/`uid`/`gid` are applied with
/// `chmod(2)`/`chown(2)` after bind.
pub fn bind_local(path: &Path, mode: u32, uid: Option<u32>, gid: Option<u32>) -> Result<RawFd> {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(Error::io("unlink", e)),
    }

    let socket = Socket2::new(Domain::UNIX, Type::STREAM, None).map_err(|e| Error::io("socket", e))?;
    let addr = socket2::SockAddr::unix(path).map_err(|e| Error::io("bind", e))?;
    socket.bind(&addr).map_err(|e| Error::io("bind", e))?;
    socket.listen(LISTEN_BACKLOG).map_err(|e| Error::io("listen", e))?;
    socket.set_nonblocking(true).map_err(|e| Error::io("fcntl(O_NONBLOCK)", e))?;

    chmod(path, mode)?;
    if uid.is_some() || gid.is_some() {
        chown(path, uid, gid)?;
    }

    Ok(socket.into_raw_fd())
}

fn chmod(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode)).map_err(|e| Error::io("chmod", e))
}

fn chown(path: &Path, uid: Option<u32>, gid: Option<u32>) -> Result<()> {
    let c_path = std::ffi::CString::new(path.as_os_str().as_encoded_bytes())
        .map_err(|_| Error::BadState("PF_LOCAL path contains a NUL byte"))?;
    let uid = uid.map_or(u32::MAX, |u| u);
    let gid = gid.map_or(u32::MAX, |g| g);
    let rc = unsafe { libc::chown(c_path.as_ptr(), uid, gid) };
    if rc != 0 {
        return Err(Error::io("chown", io::Error::last_os_error()));
    }
    Ok(())
}

/// Read the peer's credentials off a connected PF_LOCAL socket via
/// `SO_PEERCRED` (Linux) or the BSD `LOCAL_PEERCRED`/`getpeereid` equivalent.
#[cfg(target_os = "linux")]
pub fn peer_credentials(fd: RawFd) -> io::Result<(u32, u32)> {
    let mut creds = libc::ucred { pid: 0, uid: 0, gid: 0 };
    let mut len = std::mem::size_of::<libc::ucred>() as libc::socklen_t;
    let rc = unsafe {
        libc::getsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_PEERCRED,
            std::ptr::addr_of_mut!(creds).cast(),
            &mut len,
        )
    };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok((creds.uid, creds.gid))
}

#[cfg(not(target_os = "linux"))]
pub fn peer_credentials(fd: RawFd) -> io::Result<(u32, u32)> {
    let mut uid: libc::uid_t = 0;
    let mut gid: libc::gid_t = 0;
    let rc = unsafe { libc::getpeereid(fd, &mut uid, &mut gid) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok((uid, gid))
}

/// Convert a raw, non-blocking listening fd into a blocking `std`
/// `TcpStream`-compatible fd after `accept(2)`, used once a session takes
/// ownership of a just-accepted connection (spec.md §4.3: sessions perform
/// blocking reads with a kernel receive timeout, not non-blocking I/O).
pub fn set_blocking(fd: RawFd) -> io::Result<()> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL, 0) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    let rc = unsafe { libc::fcntl(fd, libc::F_SETFL, flags & !libc::O_NONBLOCK) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}
