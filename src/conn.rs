//! Socket establishment.
//!
//! A connection attempt resolves the host, then tries every resolved address
//! in order until one accepts. With direct TLS the handshake is part of each
//! attempt. With StartTLS the extended operation is sent over the plain
//! connection, and the handshake runs on the same socket once the server
//! agrees.

use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use crate::exop::StartTLS;
use crate::ldap::{Ldap, MessageIdCounter};
use crate::options::{ConnectionOptions, TlsMode};
use crate::result::{ErrorKind, LdapConnectionError, Result};
use crate::tls::TlsContext;

use tokio::io::{self, AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{self as tnet, TcpSocket, TcpStream};
use tokio::time;
use tokio_rustls::client::TlsStream;

/// Linger timeout of every connection socket.
const LINGER: Duration = Duration::from_secs(5);

/// The byte stream under a connection.
#[derive(Debug)]
pub enum ConnType {
    Tcp(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl AsyncRead for ConnType {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context, buf: &mut ReadBuf) -> Poll<io::Result<()>> {
        match self.get_mut() {
            ConnType::Tcp(ts) => Pin::new(ts).poll_read(cx, buf),
            ConnType::Tls(tls) => Pin::new(tls).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for ConnType {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context, buf: &[u8]) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            ConnType::Tcp(ts) => Pin::new(ts).poll_write(cx, buf),
            ConnType::Tls(tls) => Pin::new(tls).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context) -> Poll<io::Result<()>> {
        match self.get_mut() {
            ConnType::Tcp(ts) => Pin::new(ts).poll_flush(cx),
            ConnType::Tls(tls) => Pin::new(tls).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context) -> Poll<io::Result<()>> {
        match self.get_mut() {
            ConnType::Tcp(ts) => Pin::new(ts).poll_shutdown(cx),
            ConnType::Tls(tls) => Pin::new(tls).poll_shutdown(cx),
        }
    }
}

/// How an established connection is secured.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transport {
    Plain,
    DirectTls,
    StartTls,
}

async fn deadline<T, F>(timeout: Option<Duration>, what: &str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match timeout {
        Some(limit) => time::timeout(limit, fut).await.map_err(|_| {
            LdapConnectionError::timeout(format!("{} did not complete within {:?}", what, limit))
        })?,
        None => fut.await,
    }
}

/// Resolve `host` to the addresses to try, in resolution order.
pub(crate) async fn resolve(host: &str, port: u16) -> Result<Vec<SocketAddr>> {
    let addrs: Vec<SocketAddr> = tnet::lookup_host((host, port))
        .await
        .map_err(|e| LdapConnectionError::connect(format!("unknown host {}: {}", host, e)).with_source(e))?
        .collect();
    if addrs.is_empty() {
        return Err(LdapConnectionError::connect(format!(
            "unknown host {}: no addresses",
            host
        )));
    }
    Ok(addrs)
}

/// Try `attempt` on each address in turn, returning the first success. If
/// every attempt fails, the error of the first one is returned.
pub(crate) async fn connect_any<T, F, Fut>(addrs: &[SocketAddr], mut attempt: F) -> Result<T>
where
    F: FnMut(SocketAddr) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut first_err = None;
    for &addr in addrs {
        debug!("connecting to {}", addr);
        match attempt(addr).await {
            Ok(conn) => return Ok(conn),
            Err(e) => {
                debug!("connection to {} failed: {}", addr, e);
                first_err.get_or_insert(e);
            }
        }
    }
    Err(first_err.unwrap_or_else(|| LdapConnectionError::connect("no addresses to connect to")))
}

pub(crate) async fn connect_tcp(addr: SocketAddr, timeout: Option<Duration>) -> Result<TcpStream> {
    let failed = |e: io::Error| {
        LdapConnectionError::connect(format!("cannot connect to {}: {}", addr, e)).with_source(e)
    };
    let socket = match addr {
        SocketAddr::V4(_) => TcpSocket::new_v4(),
        SocketAddr::V6(_) => TcpSocket::new_v6(),
    }
    .map_err(failed)?;
    socket.set_reuseaddr(true).map_err(failed)?;
    #[allow(deprecated)]
    socket.set_linger(Some(LINGER)).map_err(failed)?;
    deadline(timeout, "TCP connect", async { socket.connect(addr).await.map_err(failed) }).await
}

async fn connect_tls(
    ctx: &TlsContext,
    host: &str,
    addr: SocketAddr,
    timeout: Option<Duration>,
) -> Result<TlsStream<TcpStream>> {
    let tcp = connect_tcp(addr, timeout).await?;
    deadline(timeout, "TLS handshake", ctx.connect(host, tcp)).await
}

/// Upgrade a plain connection with the StartTLS extended operation.
///
/// The read timeout applies to the StartTLS response only and is cleared
/// again whatever the outcome. A refusal ends the attempt; there is no
/// fallback to the plain connection.
pub(crate) async fn start_tls(
    mut ldap: Ldap,
    ctx: &TlsContext,
    host: &str,
    timeout: Option<Duration>,
) -> Result<Ldap> {
    debug!("requesting StartTLS");
    ldap.set_read_timeout(timeout);
    let res = ldap.extended(StartTLS).await;
    ldap.set_read_timeout(None);
    let resp = res?;
    if resp.result.rc != 0 {
        return Err(LdapConnectionError::from_result(
            ErrorKind::StartTlsRejected,
            format!("the server refused StartTLS: {}", resp.result),
            &resp.result,
        ));
    }
    let (stream, codec, ids) = ldap.into_stream()?;
    let tcp = match stream {
        ConnType::Tcp(tcp) => tcp,
        ConnType::Tls(_) => return Err(LdapConnectionError::state("the connection already uses TLS")),
    };
    let tls = deadline(timeout, "TLS handshake", ctx.connect(host, tcp)).await?;
    debug!("StartTLS negotiated with {}", host);
    Ok(Ldap::new(ConnType::Tls(Box::new(tls)), codec, ids))
}

/// Open a connection to `host`:`port` as `options` ask, returning the
/// exchange handle over it. Nothing survives a failed attempt: every socket
/// opened along the way is dropped, and so closed, with the error.
pub(crate) async fn establish(
    host: &str,
    port: u16,
    options: &ConnectionOptions,
    ids: &MessageIdCounter,
    timeout: Option<Duration>,
) -> Result<(Ldap, Transport)> {
    let addrs = resolve(host, port).await?;
    match options.tls() {
        TlsMode::None => {
            let tcp = connect_any(&addrs, |addr| connect_tcp(addr, timeout)).await?;
            Ok((Ldap::new(ConnType::Tcp(tcp), options.codec(), ids.clone()), Transport::Plain))
        }
        TlsMode::Direct(ctx) => {
            let tls = connect_any(&addrs, |addr| connect_tls(ctx, host, addr, timeout)).await?;
            Ok((
                Ldap::new(ConnType::Tls(Box::new(tls)), options.codec(), ids.clone()),
                Transport::DirectTls,
            ))
        }
        TlsMode::StartTls(ctx) => {
            let tcp = connect_any(&addrs, |addr| connect_tcp(addr, timeout)).await?;
            let ldap = Ldap::new(ConnType::Tcp(tcp), options.codec(), ids.clone());
            Ok((start_tls(ldap, ctx, host, timeout).await?, Transport::StartTls))
        }
    }
}
