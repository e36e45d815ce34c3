//! Scripted LDAP servers for the integration tests.
//!
//! Each server accepts one connection on a loopback port and runs a handler
//! on its own thread. Messages are framed with the library's own codec.

#![allow(dead_code)]

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bytes::BytesMut;
use ldapwire::controls::RawControl;
use ldapwire::tls::TlsContext;
use ldapwire::{BindResponse, ExtendedResponse, LdapResult, Message, ProtocolOp};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::{ServerConfig, ServerConnection, StreamOwned};

pub type TlsServerStream = StreamOwned<ServerConnection, TcpStream>;

/// One side of a connection, reading and writing whole messages.
pub struct Peer<S> {
    stream: S,
    buf: BytesMut,
}

impl<S: Read + Write> Peer<S> {
    pub fn new(stream: S) -> Self {
        Peer {
            stream,
            buf: BytesMut::new(),
        }
    }

    /// Next message, or `None` once the client has closed the connection.
    pub fn recv(&mut self) -> Option<Message> {
        loop {
            if let Some(msg) = Message::decode(&mut self.buf).expect("well-formed client message") {
                return Some(msg);
            }
            let mut chunk = [0u8; 4096];
            match self.stream.read(&mut chunk) {
                Ok(0) | Err(_) => return None,
                Ok(n) => self.buf.extend_from_slice(&chunk[..n]),
            }
        }
    }

    /// Every message up to the end of the connection.
    pub fn drain(&mut self) -> Vec<Message> {
        let mut rest = Vec::new();
        while let Some(msg) = self.recv() {
            rest.push(msg);
        }
        rest
    }

    pub fn send(&mut self, msg: Message) {
        let mut out = BytesMut::new();
        msg.encode(&mut out);
        self.send_raw(&out);
    }

    pub fn send_raw(&mut self, raw: &[u8]) {
        self.stream.write_all(raw).unwrap();
        self.stream.flush().unwrap();
    }

    pub fn into_inner(self) -> S {
        assert!(self.buf.is_empty(), "client sent data ahead of time");
        self.stream
    }
}

/// A server running a script on the single connection it accepts.
pub struct MockServer {
    pub addr: SocketAddr,
    handle: JoinHandle<Vec<Message>>,
}

impl MockServer {
    /// Start a server whose handler returns the messages it received.
    pub fn start<F>(handler: F) -> MockServer
    where
        F: FnOnce(TcpStream) -> Vec<Message> + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            stream.set_read_timeout(Some(Duration::from_secs(10))).unwrap();
            handler(stream)
        });
        MockServer { addr, handle }
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Wait for the handler and return what it received.
    pub fn finish(self) -> Vec<Message> {
        self.handle.join().expect("server thread panicked")
    }
}

pub fn ldap_result(rc: u32, matched: &str, text: &str) -> LdapResult {
    LdapResult {
        rc,
        matched: matched.to_owned(),
        text: text.to_owned(),
        refs: Vec::new(),
        ctrls: Vec::new(),
    }
}

pub fn bind_response(id: i32, rc: u32, ctrls: Vec<RawControl>) -> Message {
    Message::new(
        id,
        ProtocolOp::BindResponse(BindResponse {
            result: ldap_result(rc, "", ""),
            server_sasl_creds: None,
        }),
    )
    .with_controls(ctrls)
}

pub fn extended_response(id: i32, result: LdapResult, value: Option<&[u8]>) -> Message {
    Message::new(
        id,
        ProtocolOp::ExtendedResponse(ExtendedResponse {
            result,
            name: None,
            value: value.map(<[u8]>::to_vec),
        }),
    )
}

/// Self-signed server certificate with its key.
pub struct ServerCert {
    pub cert: CertificateDer<'static>,
    pem: String,
    key: Vec<u8>,
}

impl ServerCert {
    pub fn generate() -> ServerCert {
        let key = rcgen::generate_simple_self_signed(vec!["localhost".into()]).unwrap();
        ServerCert {
            cert: key.cert.der().clone(),
            pem: key.cert.pem(),
            key: key.key_pair.serialize_der(),
        }
    }

    pub fn config(&self) -> Arc<ServerConfig> {
        let private = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(self.key.clone()));
        let config = ServerConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
            .with_safe_default_protocol_versions()
            .unwrap()
            .with_no_client_auth()
            .with_single_cert(vec![self.cert.clone()], private)
            .unwrap();
        Arc::new(config)
    }

    /// Write the certificate as a PEM file and return its path.
    pub fn write_pem(&self, name: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("ldapwire-{}-{}.pem", std::process::id(), name));
        std::fs::write(&path, &self.pem).unwrap();
        path
    }
}

/// Wrap an accepted connection in server-side TLS with a fresh certificate.
/// The handshake runs on the first read.
pub fn accept_tls(stream: TcpStream) -> TlsServerStream {
    accept_tls_with(stream, ServerCert::generate().config())
}

pub fn accept_tls_with(stream: TcpStream, config: Arc<ServerConfig>) -> TlsServerStream {
    let conn = ServerConnection::new(config).unwrap();
    StreamOwned::new(conn, stream)
}

/// Client context accepting the mock server's self-signed certificate.
pub fn client_tls() -> TlsContext {
    TlsContext::builder().trust_all(true).build().unwrap()
}
