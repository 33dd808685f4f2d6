use std::io::{self, Read, Write};
use std::sync::{Arc, Once};

use rustls::{ClientConfig, ClientConnection, ServerConfig, ServerConnection};
use rustls_pki_types::ServerName;

use crate::error::{CoreError, CoreResult};

static CRYPTO_PROVIDER_INIT: Once = Once::new();

/// Installs the process-wide default crypto provider exactly once. Every
/// path that constructs a [`Conn`] calls this first; repeat calls are
/// free. Mirrors the one-time library init a TLS engine like OpenSSL
/// needs before any session can be created.
pub fn ensure_crypto_provider_installed() {
    CRYPTO_PROVIDER_INIT.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

/// Which side of the handshake this session is driving.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

/// Wraps rustls's client/server connection behind the single surface the
/// handshake/app-I-O pump needs: feed ciphertext in, drain ciphertext
/// out, read/write plaintext, and ask whether the handshake is done.
pub enum Conn {
    Client(Box<ClientConnection>),
    Server(Box<ServerConnection>),
}

impl Conn {
    pub fn new_client(config: Arc<ClientConfig>, server_name: ServerName<'static>) -> CoreResult<Conn> {
        ensure_crypto_provider_installed();
        let conn =
            ClientConnection::new(config, server_name).map_err(|_| CoreError::SslFailed)?;
        Ok(Conn::Client(Box::new(conn)))
    }

    pub fn new_server(config: Arc<ServerConfig>) -> CoreResult<Conn> {
        ensure_crypto_provider_installed();
        let conn = ServerConnection::new(config).map_err(|_| CoreError::SslFailed)?;
        Ok(Conn::Server(Box::new(conn)))
    }

    pub fn role(&self) -> Role {
        match self {
            Conn::Client(_) => Role::Client,
            Conn::Server(_) => Role::Server,
        }
    }

    /// Feeds ciphertext read from `rd` into the engine. Must only be
    /// called with a reader that has at least one byte available.
    pub fn read_tls(&mut self, rd: &mut dyn io::Read) -> io::Result<usize> {
        match self {
            Conn::Client(c) => c.read_tls(rd),
            Conn::Server(c) => c.read_tls(rd),
        }
    }

    /// Drains ciphertext the engine has queued for the peer into `wr`.
    pub fn write_tls(&mut self, wr: &mut dyn io::Write) -> io::Result<usize> {
        match self {
            Conn::Client(c) => c.write_tls(wr),
            Conn::Server(c) => c.write_tls(wr),
        }
    }

    /// Decrypts/processes whatever `read_tls` just fed in, advancing the
    /// handshake state machine as a side effect.
    pub fn process_new_packets(&mut self) -> CoreResult<()> {
        let result = match self {
            Conn::Client(c) => c.process_new_packets().map(|_| ()),
            Conn::Server(c) => c.process_new_packets().map(|_| ()),
        };
        result.map_err(|_| CoreError::SslFailed)
    }

    pub fn is_handshaking(&self) -> bool {
        match self {
            Conn::Client(c) => c.is_handshaking(),
            Conn::Server(c) => c.is_handshaking(),
        }
    }

    pub fn wants_write(&self) -> bool {
        match self {
            Conn::Client(c) => c.wants_write(),
            Conn::Server(c) => c.wants_write(),
        }
    }

    pub fn write_plain(&mut self, data: &[u8]) -> CoreResult<usize> {
        let result = match self {
            Conn::Client(c) => c.writer().write(data),
            Conn::Server(c) => c.writer().write(data),
        };
        match result {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(0),
            Err(_) => Err(CoreError::SslFailed),
        }
    }

    pub fn read_plain(&mut self, data: &mut [u8]) -> CoreResult<usize> {
        let result = match self {
            Conn::Client(c) => c.reader().read(data),
            Conn::Server(c) => c.reader().read(data),
        };
        match result {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(0),
            Err(e) if is_clean_shutdown(&e) => Err(CoreError::Failed),
            Err(_) => Err(CoreError::SslFailed),
        }
    }

    pub fn send_close_notify(&mut self) {
        match self {
            Conn::Client(c) => c.send_close_notify(),
            Conn::Server(c) => c.send_close_notify(),
        }
    }

    pub fn alpn_protocol(&self) -> Option<&[u8]> {
        match self {
            Conn::Client(c) => c.alpn_protocol(),
            Conn::Server(c) => c.alpn_protocol(),
        }
    }
}

fn is_clean_shutdown(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::UnexpectedEof
}
