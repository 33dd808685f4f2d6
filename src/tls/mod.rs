//! Non-blocking TLS session engine: a handshake/application-data pump
//! built around two in-memory ciphertext buffers shuttled between a
//! streaming crypto engine ([`rustls`]) and the socket layer. Record
//! framing above the raw byte stream (HTTP/2, WebSocket, ...) is out of
//! scope for this crate.

mod buffer;
mod engine;
mod pump;
mod session;

pub use buffer::Buffer;
pub use engine::{ensure_crypto_provider_installed, Conn, Role};
pub use pump::{HandshakeState, Transport};
pub use session::TlsSession;
