use std::time::Duration;

use crate::bind::{self, BindOutcome};
use crate::conn::{self, Transport};
use crate::ldap::{Ldap, MessageIdCounter};
use crate::message::{Message, ProtocolOp};
use crate::options::{ConnectionOptions, LdapTarget};
use crate::result::{LdapConnectionError, Result};
use crate::tls::TlsContext;

use tokio::runtime::{self, Runtime};

/// Lifecycle state of a [`LdapConnection`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Unconnected,
    Connected,
    Closed,
}

/// Blocking connection to an LDAP server.
///
/// A connection is created unconnected, with the target and the options it
/// will use. [`connect_to_host()`](#method.connect_to_host) then opens the
/// socket, negotiates TLS as the options ask, and binds. A connection gets
/// one attempt: if it fails, the instance is unusable and a new one must be
/// created.
///
/// All operations are performed synchronously on a private current-thread
/// runtime: the thread waits until the result is available or the operation
/// times out. The struct is meant for one caller at a time; if you need
/// concurrency, open more connections.
#[derive(Debug)]
pub struct LdapConnection {
    rt: Runtime,
    host: String,
    port: u16,
    options: ConnectionOptions,
    state: ConnectionState,
    attempted: bool,
    ldap: Option<Ldap>,
    outcome: Option<BindOutcome>,
    transport: Option<Transport>,
}

fn connected<'a>(state: ConnectionState, ldap: &'a mut Option<Ldap>) -> Result<&'a mut Ldap> {
    match (state, ldap.as_mut()) {
        (ConnectionState::Connected, Some(ldap)) => Ok(ldap),
        (state, _) => Err(LdapConnectionError::state(format!(
            "the connection is {:?}, not connected",
            state
        ))),
    }
}

impl LdapConnection {
    /// Create an unconnected connection to `host`:`port`.
    pub fn new(host: impl Into<String>, port: u16, options: ConnectionOptions) -> Result<Self> {
        let rt = runtime::Builder::new_current_thread().enable_all().build()?;
        Ok(LdapConnection {
            rt,
            host: host.into(),
            port,
            options,
            state: ConnectionState::Unconnected,
            attempted: false,
            ldap: None,
            outcome: None,
            transport: None,
        })
    }

    /// Create an unconnected connection to the server named by an LDAP URL.
    /// The URL scheme selects the TLS mode; `tls` must be given for `ldaps`
    /// and `ldap+starttls`.
    pub fn from_url(url: &str, tls: Option<TlsContext>, options: ConnectionOptions) -> Result<Self> {
        let target = LdapTarget::parse(url)?;
        let options = options.set_tls(target.tls_mode(tls)?);
        Self::new(target.host, target.port, options)
    }

    /// Open the connection and bind.
    ///
    /// Without a bind DN or a SASL selection in the options, no bind is sent
    /// and the connection is anonymous. Message IDs come from `ids`, which
    /// the caller may keep using afterwards. A non-zero `timeout` bounds each
    /// connect attempt, TLS handshake, and the wait for the StartTLS response.
    pub fn connect_to_host(
        &mut self,
        bind_dn: Option<&str>,
        bind_pw: Option<&[u8]>,
        ids: &MessageIdCounter,
        timeout: Duration,
    ) -> Result<()> {
        if self.attempted {
            return Err(LdapConnectionError::state(
                "a connection can be attempted only once",
            ));
        }
        self.attempted = true;
        self.options.validate()?;
        let timeout = (!timeout.is_zero()).then_some(timeout);
        let (host, port, options) = (&self.host, self.port, &self.options);
        let (ldap, transport, outcome) = self.rt.block_on(async move {
            let (mut ldap, transport) = conn::establish(host, port, options, ids, timeout).await?;
            let outcome = bind::authenticate(&mut ldap, options, bind_dn, bind_pw).await?;
            Ok::<_, LdapConnectionError>((ldap, transport, outcome))
        })?;
        debug!("connected to {}:{} ({:?})", self.host, self.port, transport);
        self.ldap = Some(ldap);
        self.transport = Some(transport);
        self.outcome = Some(outcome);
        self.state = ConnectionState::Connected;
        Ok(())
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn options(&self) -> &ConnectionOptions {
        &self.options
    }

    /// What the bind established, once connected.
    pub fn bind_outcome(&self) -> Option<&BindOutcome> {
        self.outcome.as_ref()
    }

    /// How the connection is secured, once connected.
    pub fn transport(&self) -> Option<Transport> {
        self.transport
    }

    /// See [`Ldap::write_message()`](struct.Ldap.html#method.write_message).
    pub fn write_message(&mut self, msg: Message) -> Result<()> {
        let rt = &mut self.rt;
        let ldap = connected(self.state, &mut self.ldap)?;
        rt.block_on(async move { ldap.write_message(msg).await })
    }

    /// See [`Ldap::read_message()`](struct.Ldap.html#method.read_message).
    pub fn read_message(&mut self) -> Result<Option<Message>> {
        let rt = &mut self.rt;
        let ldap = connected(self.state, &mut self.ldap)?;
        rt.block_on(async move { ldap.read_message().await })
    }

    /// See [`Ldap::who_am_i()`](struct.Ldap.html#method.who_am_i).
    pub fn who_am_i(&mut self) -> Result<Option<String>> {
        let rt = &mut self.rt;
        let ldap = connected(self.state, &mut self.ldap)?;
        rt.block_on(async move { ldap.who_am_i().await })
    }

    /// Close the connection.
    ///
    /// With a counter, an unbind request is sent first, with the next ID from
    /// it. Failures are logged and otherwise ignored; the socket is released
    /// regardless. Closing a closed connection does nothing.
    pub fn close(&mut self, ids: Option<&MessageIdCounter>) {
        if self.state == ConnectionState::Closed {
            return;
        }
        self.state = ConnectionState::Closed;
        let Some(mut ldap) = self.ldap.take() else {
            return;
        };
        self.rt.block_on(async {
            if let Some(ids) = ids {
                let sent = match ids.next() {
                    Ok(id) => ldap.write_message(Message::new(id, ProtocolOp::UnbindRequest)).await,
                    Err(e) => Err(e),
                };
                if let Err(e) = sent {
                    warn!("cannot send unbind request: {}", e);
                }
            }
            if let Err(e) = ldap.shutdown().await {
                debug!("error shutting down the connection: {}", e);
            }
        });
        drop(ldap);
        debug!("closed connection to {}:{}", self.host, self.port);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::ErrorKind;

    #[test]
    fn unconnected_operations_fail() {
        let mut conn = LdapConnection::new("localhost", 389, ConnectionOptions::new()).unwrap();
        assert_eq!(conn.state(), ConnectionState::Unconnected);
        let err = conn.read_message().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::State);
        conn.close(None);
        conn.close(None);
        assert_eq!(conn.state(), ConnectionState::Closed);
    }

    #[test]
    fn secure_url_needs_context() {
        let err = LdapConnection::from_url("ldaps://ldap.example.com", None, ConnectionOptions::new())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Param);
        let conn = LdapConnection::from_url("ldap://ldap.example.com:1389", None, ConnectionOptions::new())
            .unwrap();
        assert_eq!((conn.host(), conn.port()), ("ldap.example.com", 1389));
    }

    #[test]
    fn invalid_options_fail_before_connecting() {
        let options = ConnectionOptions::new().set_version(7);
        let mut conn = LdapConnection::new("localhost", 389, options).unwrap();
        let ids = MessageIdCounter::new();
        let err = conn
            .connect_to_host(None, None, &ids, Duration::ZERO)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Param);
        assert_eq!(ids.current(), 1);
        let err = conn
            .connect_to_host(None, None, &ids, Duration::ZERO)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::State);
    }
}
