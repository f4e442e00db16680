//! Optional synchronous TLS overlay, gated behind the `tls` feature
//! (SPEC_FULL.md §4.1 supplement). Wraps an already-connected `Socket` in a
//! `rustls` session without changing the blocking read/write contract the
//! rest of the crate relies on.

use std::io;
use std::net::TcpStream;
use std::sync::Arc;

use rustls::{ClientConnection, ServerConnection, StreamOwned};

use crate::error::{Error, Result};

/// Server-side TLS configuration: certificate chain and private key are the
/// caller's responsibility to load (typically via `rustls_pemfile`).
#[derive(Clone)]
pub struct ServerTlsConfig {
    pub(crate) inner: Arc<rustls::ServerConfig>,
}

impl ServerTlsConfig {
    /// Build a config from a loaded certificate chain and private key.
    ///
    /// # Errors
    /// Returns [`Error::Fatal`] if `rustls` rejects the key material.
    pub fn new(
        chain: Vec<rustls::pki_types::CertificateDer<'static>>,
        key: rustls::pki_types::PrivateKeyDer<'static>,
    ) -> Result<Self> {
        let config = rustls::ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(chain, key)
            .map_err(|_| Error::Fatal("invalid TLS certificate/key"))?;
        Ok(ServerTlsConfig { inner: Arc::new(config) })
    }
}

/// Client-side TLS configuration.
#[derive(Clone)]
pub struct ClientTlsConfig {
    pub(crate) inner: Arc<rustls::ClientConfig>,
}

impl ClientTlsConfig {
    /// Build a config that verifies the peer against the platform's native
    /// root store.
    ///
    /// # Errors
    /// Returns [`Error::Fatal`] if the native root store cannot be loaded.
    pub fn new() -> Result<Self> {
        let mut roots = rustls::RootCertStore::empty();
        for cert in rustls_native_certs::load_native_certs().certs {
            let _ = roots.add(cert);
        }
        let config = rustls::ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();
        Ok(ClientTlsConfig { inner: Arc::new(config) })
    }
}

pub(crate) type ServerStream = StreamOwned<ServerConnection, TcpStream>;
pub(crate) type ClientStream = StreamOwned<ClientConnection, TcpStream>;

pub(crate) fn accept_handshake(stream: TcpStream, config: &ServerTlsConfig) -> io::Result<ServerStream> {
    use io::Write;
    let conn = ServerConnection::new(config.inner.clone())
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
    let mut stream = StreamOwned::new(conn, stream);
    // `StreamOwned` drives the handshake lazily on the first real read or
    // write; force it eagerly here so `start_tls` reports failures up front
    // instead of surfacing them from the first `readline`.
    stream.flush()?;
    Ok(stream)
}

pub(crate) fn connect_handshake(
    stream: TcpStream,
    config: &ClientTlsConfig,
    server_name: &str,
) -> io::Result<ClientStream> {
    use io::Write;
    let name = rustls::pki_types::ServerName::try_from(server_name.to_string())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    let conn = ClientConnection::new(config.inner.clone(), name)
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
    let mut stream = StreamOwned::new(conn, stream);
    stream.flush()?;
    Ok(stream)
}
