use std::fmt;
use std::sync::Arc;

use crate::message::Message;
use crate::protocol::{Direction, LdapCodec, LogTrace, MessageTrace};
use crate::result::{LdapConnectionError, Result};
use crate::sasl::{SaslRegistry, SaslSelection};
use crate::tls::TlsContext;

use lber::parse::DEFAULT_MAX_ELEMENT_LEN;
use url::Url;

/// How the connection is secured.
///
/// The TLS context travels with the mode, so it's present exactly when TLS is.
#[derive(Clone, Debug, Default)]
pub enum TlsMode {
    #[default]
    None,
    /// TLS negotiated as soon as the TCP connection is up (`ldaps`).
    Direct(TlsContext),
    /// Plain connection upgraded with the StartTLS extended operation.
    StartTls(TlsContext),
}

impl TlsMode {
    pub fn context(&self) -> Option<&TlsContext> {
        match self {
            TlsMode::None => None,
            TlsMode::Direct(ctx) | TlsMode::StartTls(ctx) => Some(ctx),
        }
    }
}

/// Settings for establishing a connection.
///
/// An instance with default values is constructed by [`new()`](#method.new),
/// and every setting can be replaced through the builder-like `set_*`
/// methods. The options are cloned into a connection when it's created, so
/// later changes to the original don't affect it.
#[derive(Clone)]
pub struct ConnectionOptions {
    version: u8,
    tls: TlsMode,
    sasl: SaslSelection,
    report_authz_id: bool,
    use_password_policy_control: bool,
    verbose: bool,
    trace: Option<Arc<dyn MessageTrace>>,
    mechanisms: SaslRegistry,
    max_message_len: usize,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        ConnectionOptions {
            version: 3,
            tls: TlsMode::None,
            sasl: SaslSelection::None,
            report_authz_id: false,
            use_password_policy_control: false,
            verbose: false,
            trace: None,
            mechanisms: SaslRegistry::new(),
            max_message_len: DEFAULT_MAX_ELEMENT_LEN,
        }
    }
}

impl fmt::Debug for ConnectionOptions {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ConnectionOptions")
            .field("version", &self.version)
            .field("tls", &self.tls)
            .field("sasl", &self.sasl)
            .field("report_authz_id", &self.report_authz_id)
            .field("use_password_policy_control", &self.use_password_policy_control)
            .field("verbose", &self.verbose)
            .field("trace", &self.trace.is_some())
            .field("mechanisms", &self.mechanisms)
            .field("max_message_len", &self.max_message_len)
            .finish()
    }
}

impl ConnectionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Protocol version, 2 or 3. Defaults to 3.
    pub fn set_version(mut self, version: u8) -> Self {
        self.version = version;
        self
    }

    pub fn set_tls(mut self, tls: TlsMode) -> Self {
        self.tls = tls;
        self
    }

    pub fn set_sasl(mut self, sasl: SaslSelection) -> Self {
        self.sasl = sasl;
        self
    }

    /// Ask for the authorization identity with the bind, falling back to
    /// the Who Am I operation if the server doesn't return it.
    pub fn set_report_authz_id(mut self, report: bool) -> Self {
        self.report_authz_id = report;
        self
    }

    /// Attach the password policy request control to the bind.
    pub fn set_use_password_policy_control(mut self, use_control: bool) -> Self {
        self.use_password_policy_control = use_control;
        self
    }

    /// Log every message sent and received, with its octets, at trace level.
    pub fn set_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Install an additional message trace.
    pub fn set_trace(mut self, trace: Arc<dyn MessageTrace>) -> Self {
        self.trace = Some(trace);
        self
    }

    /// Mechanisms available for named SASL binds.
    pub fn set_mechanisms(mut self, mechanisms: SaslRegistry) -> Self {
        self.mechanisms = mechanisms;
        self
    }

    /// Largest incoming message accepted, in octets.
    pub fn set_max_message_len(mut self, len: usize) -> Self {
        self.max_message_len = len;
        self
    }

    pub fn version(&self) -> u8 {
        self.version
    }

    pub fn tls(&self) -> &TlsMode {
        &self.tls
    }

    pub fn sasl(&self) -> &SaslSelection {
        &self.sasl
    }

    pub fn report_authz_id(&self) -> bool {
        self.report_authz_id
    }

    pub fn use_password_policy_control(&self) -> bool {
        self.use_password_policy_control
    }

    pub fn verbose(&self) -> bool {
        self.verbose
    }

    pub fn mechanisms(&self) -> &SaslRegistry {
        &self.mechanisms
    }

    /// Check the combination of settings before anything is sent.
    pub fn validate(&self) -> Result<()> {
        if !matches!(self.version, 2 | 3) {
            return Err(LdapConnectionError::param(format!(
                "unsupported LDAP protocol version {}",
                self.version
            )));
        }
        if self.version == 2 && self.sasl != SaslSelection::None {
            return Err(LdapConnectionError::param(
                "SASL authentication requires LDAP protocol version 3",
            ));
        }
        Ok(())
    }

    /// A codec with the configured message size limit and traces.
    pub(crate) fn codec(&self) -> LdapCodec {
        let trace: Option<Arc<dyn MessageTrace>> = match (self.verbose(), &self.trace) {
            (false, None) => None,
            (false, Some(trace)) => Some(trace.clone()),
            (true, None) => Some(Arc::new(LogTrace)),
            (true, Some(trace)) => Some(Arc::new(Both(trace.clone()))),
        };
        LdapCodec::new(self.max_message_len).with_trace(trace)
    }
}

/// Logs and forwards to a caller's trace.
struct Both(Arc<dyn MessageTrace>);

impl MessageTrace for Both {
    fn record(&self, direction: Direction, msg: &Message, raw: &[u8]) {
        LogTrace.record(direction, msg, raw);
        self.0.record(direction, msg, raw);
    }
}

/// Which transport a target URL asks for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Security {
    Plain,
    Direct,
    StartTls,
}

/// Host and port to connect to, parsed from an LDAP URL.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LdapTarget {
    pub host: String,
    pub port: u16,
    pub security: Security,
}

impl LdapTarget {
    /// Parse `ldap://host[:port]`, `ldaps://host[:port]` or
    /// `ldap+starttls://host[:port]`. An empty host means `localhost`.
    pub fn parse(url: &str) -> Result<LdapTarget> {
        let url = Url::parse(url)
            .map_err(|e| LdapConnectionError::param(format!("invalid LDAP URL \"{}\": {}", url, e)).with_source(e))?;
        let (security, default_port) = match url.scheme() {
            "ldap" => (Security::Plain, 389),
            "ldaps" => (Security::Direct, 636),
            "ldap+starttls" => (Security::StartTls, 389),
            s => return Err(LdapConnectionError::param(format!("unknown LDAP URL scheme \"{}\"", s))),
        };
        let host = match url.host_str() {
            None | Some("") => "localhost".to_owned(),
            Some(h) => h.trim_start_matches('[').trim_end_matches(']').to_owned(),
        };
        Ok(LdapTarget {
            host,
            port: url.port().unwrap_or(default_port),
            security,
        })
    }

    /// The TLS mode this target needs, with `ctx` for the secure schemes.
    pub fn tls_mode(&self, ctx: Option<TlsContext>) -> Result<TlsMode> {
        match (self.security, ctx) {
            (Security::Plain, _) => Ok(TlsMode::None),
            (Security::Direct, Some(ctx)) => Ok(TlsMode::Direct(ctx)),
            (Security::StartTls, Some(ctx)) => Ok(TlsMode::StartTls(ctx)),
            (_, None) => Err(LdapConnectionError::param("a TLS context is required for a secure LDAP URL")),
        }
    }
}
