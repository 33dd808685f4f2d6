use std::sync::Arc;

use log::debug;
use rustls::{ClientConfig, ServerConfig};
use rustls_pki_types::ServerName;

use crate::error::{CoreError, CoreResult};

use super::buffer::Buffer;
use super::engine::{Conn, Role};
use super::pump::{self, HandshakeState, Transport};

/// Where a session sits in the `none -> handshaking -> established ->
/// failed` state machine. Application I/O is only valid in `Established`;
/// `handshake` is only valid in `None`/`Handshaking`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum SessionState {
    None,
    Handshaking,
    Established,
    Failed,
}

/// A non-blocking TLS session: a crypto engine plus the two in-memory
/// ciphertext buffers pumped between it and the socket layer.
///
/// Callers drive it by calling [`TlsSession::handshake`] until it reports
/// [`HandshakeState::Done`], then [`TlsSession::send`]/[`TlsSession::receive`]
/// for application data. After any send/receive returns with bytes still
/// queued, flush it with [`TlsSession::send_buffered_data`] once the
/// socket becomes writable again, *before* sending anything new, to keep
/// record order intact. A fatal error from any of these moves the session
/// to `failed`; afterwards every operation but `close` returns
/// `CoreError::InvalidState`.
pub struct TlsSession {
    conn: Conn,
    send_buf: Buffer,
    recv_buf: Buffer,
    state: SessionState,
}

impl TlsSession {
    pub fn new_client(config: Arc<ClientConfig>, server_name: ServerName<'static>) -> CoreResult<TlsSession> {
        Ok(TlsSession {
            conn: Conn::new_client(config, server_name)?,
            send_buf: Buffer::new(),
            recv_buf: Buffer::new(),
            state: SessionState::None,
        })
    }

    pub fn new_server(config: Arc<ServerConfig>) -> CoreResult<TlsSession> {
        Ok(TlsSession {
            conn: Conn::new_server(config)?,
            send_buf: Buffer::new(),
            recv_buf: Buffer::new(),
            state: SessionState::None,
        })
    }

    pub fn role(&self) -> Role {
        self.conn.role()
    }

    pub fn alpn_protocol(&self) -> Option<&[u8]> {
        self.conn.alpn_protocol()
    }

    pub fn is_established(&self) -> bool {
        self.state == SessionState::Established
    }

    pub fn is_failed(&self) -> bool {
        self.state == SessionState::Failed
    }

    /// Advances the handshake by one round of I/O. Call again whenever
    /// the socket becomes readable/writable until this returns `Done`.
    /// Only valid before the session has reached `established`.
    pub fn handshake(&mut self, transport: &mut dyn Transport) -> CoreResult<HandshakeState> {
        match self.state {
            SessionState::None | SessionState::Handshaking => {}
            SessionState::Established | SessionState::Failed => return Err(CoreError::InvalidState),
        }
        self.state = SessionState::Handshaking;

        match pump::drive_handshake(&mut self.conn, &mut self.send_buf, &mut self.recv_buf, transport) {
            Ok(HandshakeState::Done) => {
                self.state = SessionState::Established;
                debug!("{:?} tls handshake established", self.conn.role());
                Ok(HandshakeState::Done)
            }
            Ok(HandshakeState::InProgress) => Ok(HandshakeState::InProgress),
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Encrypts and sends as much of `data` as the engine and socket will
    /// currently take. A short return does not mean failure: call
    /// [`TlsSession::send_buffered_data`] once the socket is writable
    /// again to push out what's left queued internally. Only valid once
    /// the handshake has completed.
    pub fn send(&mut self, data: &[u8], transport: &mut dyn Transport) -> CoreResult<usize> {
        self.require_established()?;
        self.send_unchecked(data, transport)
    }

    /// Per-buffer equivalent of [`TlsSession::send`]: sends each buffer in
    /// turn, stopping at the first short write, and returns the number of
    /// bytes sent across all buffers so far. Does not guarantee the
    /// buffers are delivered as separate TLS records.
    pub fn send_vectored(&mut self, bufs: &[&[u8]], transport: &mut dyn Transport) -> CoreResult<usize> {
        self.require_established()?;
        let mut total = 0;
        for buf in bufs {
            let n = self.send_unchecked(buf, transport)?;
            total += n;
            if n < buf.len() {
                break;
            }
        }
        Ok(total)
    }

    fn send_unchecked(&mut self, data: &[u8], transport: &mut dyn Transport) -> CoreResult<usize> {
        let mut total = 0;
        loop {
            let n = self.conn.write_plain(&data[total..]).map_err(|e| self.fail(e))?;
            total += n;
            match pump::try_send(&mut self.conn, &mut self.send_buf, transport) {
                Ok(()) => break,
                Err(CoreError::Again) => {}
                Err(e) => return Err(self.fail(e)),
            }
            if total >= data.len() {
                break;
            }
        }
        Ok(total)
    }

    /// Reads as much decrypted application data into `data` as is
    /// currently available, pulling more ciphertext off the socket as
    /// needed. Only valid once the handshake has completed.
    pub fn receive(&mut self, data: &mut [u8], transport: &mut dyn Transport) -> CoreResult<usize> {
        self.require_established()?;
        let mut total = 0;
        loop {
            let keep_going = match pump::try_recv(&mut self.conn, &mut self.recv_buf, transport) {
                Ok(()) => false,
                Err(CoreError::Again) => true,
                Err(e) => return Err(self.fail(e)),
            };
            let n = self.conn.read_plain(&mut data[total..]).map_err(|e| self.fail(e))?;
            total += n;
            if !keep_going || total >= data.len() {
                break;
            }
        }
        Ok(total)
    }

    /// Flushes whatever ciphertext is still queued in `send_buf` once the
    /// socket reports writable, per the back-pressure contract: this must
    /// be called before any further plaintext is sent.
    pub fn send_buffered_data(&mut self, transport: &mut dyn Transport) -> CoreResult<()> {
        self.require_established()?;
        match pump::try_send(&mut self.conn, &mut self.send_buf, transport) {
            Ok(()) | Err(CoreError::Again) => Ok(()),
            Err(e) => Err(self.fail(e)),
        }
    }

    pub fn has_buffered_send_data(&self) -> bool {
        !self.send_buf.is_empty()
    }

    pub fn close(&mut self) {
        self.conn.send_close_notify();
    }

    fn require_established(&self) -> CoreResult<()> {
        if self.state == SessionState::Established {
            Ok(())
        } else {
            Err(CoreError::InvalidState)
        }
    }

    /// Records `e` as fatal (moving the session to `failed` so every
    /// subsequent operation but `close` rejects) and returns it unchanged
    /// for the caller to propagate. `Again` is transient, not fatal, so
    /// callers must not route it through here.
    fn fail(&mut self, e: CoreError) -> CoreError {
        debug_assert!(e.is_fatal(), "Again should never reach TlsSession::fail");
        debug!("{:?} tls session failed: {}", self.conn.role(), e);
        self.state = SessionState::Failed;
        e
    }
}

#[cfg(test)]
mod test {
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;
    use std::sync::Arc;

    use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
    use rustls::{ClientConfig, DigitallySignedStruct, ServerConfig, SignatureScheme};
    use rustls_pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};

    use super::*;

    /// One direction of an in-process byte pipe implementing [`Transport`].
    /// `blocked` lets a test simulate the peer not being writable/readable
    /// yet without needing a real socket.
    struct MockPipe {
        outbox: Rc<RefCell<VecDeque<u8>>>,
        inbox: Rc<RefCell<VecDeque<u8>>>,
        blocked: Rc<RefCell<bool>>,
    }

    fn pipe_pair() -> (MockPipe, MockPipe) {
        let a_to_b = Rc::new(RefCell::new(VecDeque::new()));
        let b_to_a = Rc::new(RefCell::new(VecDeque::new()));
        let a = MockPipe {
            outbox: a_to_b.clone(),
            inbox: b_to_a.clone(),
            blocked: Rc::new(RefCell::new(false)),
        };
        let b = MockPipe {
            outbox: b_to_a,
            inbox: a_to_b,
            blocked: Rc::new(RefCell::new(false)),
        };
        (a, b)
    }

    impl Transport for MockPipe {
        fn send(&mut self, data: &[u8]) -> CoreResult<usize> {
            if *self.blocked.borrow() {
                return Err(CoreError::Again);
            }
            self.outbox.borrow_mut().extend(data.iter().copied());
            Ok(data.len())
        }

        fn recv(&mut self, data: &mut [u8]) -> CoreResult<usize> {
            let mut inbox = self.inbox.borrow_mut();
            if inbox.is_empty() {
                return Err(CoreError::Again);
            }
            let n = inbox.len().min(data.len());
            for slot in data.iter_mut().take(n) {
                *slot = inbox.pop_front().unwrap();
            }
            Ok(n)
        }
    }

    /// Accepts any server certificate, mirroring a `skip-peer-verify` TLS
    /// config: fine for a test that only drives the handshake state
    /// machine and never touches real peer identity.
    #[derive(Debug)]
    struct AcceptAnyCert;

    impl ServerCertVerifier for AcceptAnyCert {
        fn verify_server_cert(
            &self,
            _end_entity: &CertificateDer<'_>,
            _intermediates: &[CertificateDer<'_>],
            _server_name: &ServerName<'_>,
            _ocsp_response: &[u8],
            _now: UnixTime,
        ) -> Result<ServerCertVerified, rustls::Error> {
            Ok(ServerCertVerified::assertion())
        }

        fn verify_tls12_signature(
            &self,
            _message: &[u8],
            _cert: &CertificateDer<'_>,
            _dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, rustls::Error> {
            Ok(HandshakeSignatureValid::assertion())
        }

        fn verify_tls13_signature(
            &self,
            _message: &[u8],
            _cert: &CertificateDer<'_>,
            _dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, rustls::Error> {
            Ok(HandshakeSignatureValid::assertion())
        }

        fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
            vec![
                SignatureScheme::RSA_PKCS1_SHA256,
                SignatureScheme::ECDSA_NISTP256_SHA256,
                SignatureScheme::ED25519,
            ]
        }
    }

    fn test_configs() -> (Arc<ClientConfig>, Arc<ServerConfig>) {
        let cert = rcgen::generate_simple_self_signed(vec!["localhost".into()]).unwrap();
        let cert_der = CertificateDer::from(cert.cert);
        let key_der = PrivateKeyDer::Pkcs8(cert.signing_key.serialize_der().into());

        let server_config = ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(vec![cert_der], key_der)
            .unwrap();

        let client_config = ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyCert))
            .with_no_client_auth();

        (Arc::new(client_config), Arc::new(server_config))
    }

    fn run_handshake_to_completion(client: &mut TlsSession, server: &mut TlsSession, client_t: &mut MockPipe, server_t: &mut MockPipe) {
        loop {
            let client_done = client.handshake(client_t).unwrap() == HandshakeState::Done;
            let server_done = server.handshake(server_t).unwrap() == HandshakeState::Done;
            if client_done && server_done {
                break;
            }
        }
    }

    #[test]
    fn handshake_resumes_after_a_blocked_send() {
        let _ = env_logger::builder().is_test(true).try_init();

        let (client_config, server_config) = test_configs();
        let server_name = ServerName::try_from("localhost").unwrap();
        let mut client = TlsSession::new_client(client_config, server_name).unwrap();
        let mut server = TlsSession::new_server(server_config).unwrap();
        let (mut client_t, mut server_t) = pipe_pair();

        // Block the client's transport so the first handshake round leaves
        // ciphertext queued in `send_buf` instead of reaching the server.
        *client_t.blocked.borrow_mut() = true;
        let state = client.handshake(&mut client_t).unwrap();
        assert_eq!(state, HandshakeState::InProgress);
        assert!(client.has_buffered_send_data());

        // Unblock and resume: the queued bytes drain and the handshake
        // proceeds to completion from there.
        *client_t.blocked.borrow_mut() = false;
        run_handshake_to_completion(&mut client, &mut server, &mut client_t, &mut server_t);

        assert!(client.is_established());
        assert!(server.is_established());
        assert!(!client.has_buffered_send_data());
    }

    #[test]
    fn application_data_round_trips_after_handshake() {
        let _ = env_logger::builder().is_test(true).try_init();

        let (client_config, server_config) = test_configs();
        let server_name = ServerName::try_from("localhost").unwrap();
        let mut client = TlsSession::new_client(client_config, server_name).unwrap();
        let mut server = TlsSession::new_server(server_config).unwrap();
        let (mut client_t, mut server_t) = pipe_pair();

        let mut scratch = [0u8; 16];
        assert_eq!(client.send(b"too soon", &mut client_t), Err(CoreError::InvalidState));
        assert_eq!(client.receive(&mut scratch, &mut client_t), Err(CoreError::InvalidState));

        run_handshake_to_completion(&mut client, &mut server, &mut client_t, &mut server_t);

        let sent = client
            .send_vectored(&[b"hello, ", b"world"], &mut client_t)
            .unwrap();
        assert_eq!(sent, b"hello, world".len());

        let mut buf = [0u8; 32];
        let mut total = 0;
        while total < sent {
            total += server.receive(&mut buf[total..], &mut server_t).unwrap();
        }
        assert_eq!(&buf[..total], b"hello, world");
    }
}
