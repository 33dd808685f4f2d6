use std::io::Write;

use crate::error::{CoreError, CoreResult};

use super::buffer::Buffer;
use super::engine::Conn;

/// The socket side of the pump: a non-blocking send/recv pair. `Again`
/// means "would block", any other error is fatal and tears the session
/// down.
pub trait Transport {
    fn send(&mut self, data: &[u8]) -> CoreResult<usize>;
    fn recv(&mut self, data: &mut [u8]) -> CoreResult<usize>;
}

const RECV_CHUNK: usize = 20 * 1024;

/// Pushes ciphertext the engine has queued out through `transport`,
/// pulling more out of the engine as room frees up. Returns `Again` when
/// the engine has nothing left queued (handshake driver should try to
/// make more progress); any other non-error return means the socket
/// itself is the bottleneck.
pub fn try_send(conn: &mut Conn, send_buf: &mut Buffer, transport: &mut dyn Transport) -> CoreResult<()> {
    if !send_buf.is_empty() {
        drain_socket(send_buf, transport)?;
        if !send_buf.is_empty() {
            return Ok(()); // socket write blocked, keep buffered data for next try
        }
    }

    send_buf.reserve(RECV_CHUNK);
    loop {
        let n = conn.write_tls(send_buf).map_err(|_| CoreError::SslFailed)?;
        if n == 0 {
            break;
        }
        drain_socket(send_buf, transport)?;
        if !send_buf.is_empty() {
            return Ok(()); // socket write blocked mid-drain
        }
    }

    Err(CoreError::Again) // engine has nothing queued right now
}

fn drain_socket(buf: &mut Buffer, transport: &mut dyn Transport) -> CoreResult<()> {
    while !buf.is_empty() {
        match transport.send(buf.readable()) {
            Ok(0) => break,
            Ok(n) => buf.consume(n),
            Err(CoreError::Again) => break,
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Pulls ciphertext in from `transport`, feeding it to the engine.
/// Returns `Ok(())` once the socket has no more to give (recv blocked);
/// fatal engine/socket errors propagate.
pub fn try_recv(conn: &mut Conn, recv_buf: &mut Buffer, transport: &mut dyn Transport) -> CoreResult<()> {
    if !recv_buf.is_empty() {
        feed_engine(conn, recv_buf)?;
        if !recv_buf.is_empty() {
            return Ok(());
        }
    }

    recv_buf.reserve(RECV_CHUNK);
    loop {
        let mut chunk = [0u8; RECV_CHUNK];
        let n = match transport.recv(&mut chunk) {
            Ok(0) => break,
            Ok(n) => n,
            Err(CoreError::Again) => break,
            Err(e) => return Err(e),
        };
        recv_buf.reserve(n);
        recv_buf.write_all(&chunk[..n]).map_err(|_| CoreError::SockError)?;
        feed_engine(conn, recv_buf)?;
        if !recv_buf.is_empty() {
            // Engine fell behind the socket; retry immediately rather
            // than waiting on another readiness notification.
            return Err(CoreError::Again);
        }
    }
    Ok(())
}

fn feed_engine(conn: &mut Conn, buf: &mut Buffer) -> CoreResult<()> {
    // `Buffer::read` already advances the read cursor for whatever
    // `read_tls` consumed; nothing left to do with its return value.
    conn.read_tls(buf).map_err(|_| CoreError::SockError)?;
    conn.process_new_packets()
}

/// Drives the handshake one step: process what's buffered, pump both
/// directions, and report whether the handshake finished, is still in
/// progress, or failed outright.
pub fn drive_handshake(
    conn: &mut Conn,
    send_buf: &mut Buffer,
    recv_buf: &mut Buffer,
    transport: &mut dyn Transport,
) -> CoreResult<HandshakeState> {
    let mut try_recv_again = true;
    let mut try_send_again = true;

    loop {
        if try_recv_again {
            match try_recv(conn, recv_buf, transport) {
                Ok(()) => try_recv_again = false,
                Err(CoreError::Again) => {}
                Err(e) => return Err(e),
            }
        }

        if !conn.is_handshaking() {
            return Ok(HandshakeState::Done);
        }

        if try_send_again {
            match try_send(conn, send_buf, transport) {
                Ok(()) => try_send_again = false,
                Err(CoreError::Again) => {
                    if !conn.is_handshaking() {
                        return Ok(HandshakeState::Done);
                    }
                }
                Err(e) => return Err(e),
            }
        }

        if !(try_recv_again && try_send_again) {
            break;
        }
    }

    Ok(HandshakeState::InProgress)
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum HandshakeState {
    InProgress,
    Done,
}
