//! SASL mechanism selection.
//!
//! The bind negotiator doesn't know any mechanism's byte-level protocol. It
//! asks a [`SaslMechanism`] for a [`SaslSession`], sends what the session
//! produces, and feeds server challenges back to it for as long as the server
//! answers with `saslBindInProgress`. PLAIN and ANONYMOUS are built in;
//! anything else is registered by the caller in a [`SaslRegistry`].
//! EXTERNAL is handled by the negotiator itself, since its credentials come
//! from the TLS layer.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use crate::result::{ErrorKind, LdapConnectionError, Result, ResultCode};

/// SASL properties: property name to its values. Names are matched
/// case-insensitively.
pub type SaslProperties = BTreeMap<String, Vec<String>>;

pub const EXTERNAL: &str = "EXTERNAL";
pub const PLAIN: &str = "PLAIN";
pub const ANONYMOUS: &str = "ANONYMOUS";

/// How, if at all, to authenticate with SASL.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum SaslSelection {
    /// No SASL. A simple bind is done if a bind DN is supplied.
    #[default]
    None,
    /// SASL EXTERNAL, taking the identity from the TLS client certificate.
    ///
    /// Without `authzid` the bind carries no credentials. With one, it is
    /// sent as the credentials to request that authorization identity, which
    /// not every server accepts.
    External { authzid: Option<String> },
    /// Any other mechanism, by name, with its properties.
    Named {
        mechanism: String,
        properties: SaslProperties,
    },
}

/// What a mechanism gets to work with when a bind starts.
#[derive(Clone, Copy, Debug)]
pub struct SaslContext<'a> {
    pub bind_dn: Option<&'a str>,
    pub password: Option<&'a [u8]>,
    pub properties: &'a SaslProperties,
}

/// A SASL mechanism implementation.
pub trait SaslMechanism: Send + Sync {
    /// Mechanism name as registered with IANA, e.g. `DIGEST-MD5`.
    fn name(&self) -> &str;

    /// Validate the context and begin an exchange.
    fn start(&self, ctx: &SaslContext<'_>) -> Result<Box<dyn SaslSession>>;
}

/// One authentication exchange.
pub trait SaslSession: Send {
    /// Credentials for the first bind request. `None` omits them.
    fn initial_response(&mut self) -> Result<Option<Vec<u8>>>;

    /// Answer a server challenge received with `saslBindInProgress`.
    fn evaluate(&mut self, challenge: Option<&[u8]>) -> Result<Option<Vec<u8>>>;
}

/// Mechanisms available to the bind negotiator, keyed by upper-cased name.
#[derive(Clone)]
pub struct SaslRegistry {
    mechanisms: HashMap<String, Arc<dyn SaslMechanism>>,
}

impl SaslRegistry {
    /// A registry holding the built-in PLAIN and ANONYMOUS mechanisms.
    pub fn new() -> Self {
        let mut registry = SaslRegistry {
            mechanisms: HashMap::new(),
        };
        registry.register(Arc::new(PlainMechanism));
        registry.register(Arc::new(AnonymousMechanism));
        registry
    }

    /// Add a mechanism, replacing any with the same name.
    pub fn register(&mut self, mechanism: Arc<dyn SaslMechanism>) {
        self.mechanisms
            .insert(mechanism.name().to_ascii_uppercase(), mechanism);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn SaslMechanism>> {
        self.mechanisms.get(&name.to_ascii_uppercase()).cloned()
    }
}

impl Default for SaslRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SaslRegistry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut names: Vec<_> = self.mechanisms.keys().collect();
        names.sort();
        f.debug_struct("SaslRegistry").field("mechanisms", &names).finish()
    }
}

/// Reject properties outside `allowed`.
pub fn check_allowed(properties: &SaslProperties, allowed: &[&str], mechanism: &str) -> Result<()> {
    for name in properties.keys() {
        if !allowed.iter().any(|a| a.eq_ignore_ascii_case(name)) {
            return Err(LdapConnectionError::param(format!(
                "property \"{}\" is not allowed for the SASL {} mechanism",
                name, mechanism
            )));
        }
    }
    Ok(())
}

/// Value of a single-valued property, if present.
pub fn single_valued<'a>(properties: &'a SaslProperties, name: &str) -> Result<Option<&'a str>> {
    let mut found = None;
    for (key, values) in properties {
        if !key.eq_ignore_ascii_case(name) {
            continue;
        }
        for value in values {
            if found.is_some() {
                return Err(LdapConnectionError::param(format!(
                    "the \"{}\" SASL property takes a single value",
                    name
                )));
            }
            found = Some(value.as_str());
        }
    }
    Ok(found)
}

/// Resolve a mechanism name against the registry.
pub(crate) fn lookup(registry: &SaslRegistry, mechanism: &str) -> Result<Arc<dyn SaslMechanism>> {
    if mechanism.is_empty() {
        return Err(LdapConnectionError::param("no SASL mechanism name given"));
    }
    registry.get(mechanism).ok_or_else(|| {
        LdapConnectionError::new(
            ErrorKind::AuthUnknown,
            ResultCode::AUTH_UNKNOWN,
            format!("unsupported SASL mechanism \"{}\"", mechanism),
        )
    })
}

/// Credentials of an EXTERNAL bind.
pub(crate) fn external_credentials(authzid: Option<&str>) -> Option<Vec<u8>> {
    authzid.map(|id| id.as_bytes().to_vec())
}

/// Single-step mechanism whose whole exchange is the initial response.
struct OneShot(Option<Vec<u8>>);

impl SaslSession for OneShot {
    fn initial_response(&mut self) -> Result<Option<Vec<u8>>> {
        Ok(self.0.take())
    }

    fn evaluate(&mut self, _challenge: Option<&[u8]>) -> Result<Option<Vec<u8>>> {
        Err(LdapConnectionError::unexpected(
            "server sent a challenge to a single-step SASL mechanism",
        ))
    }
}

/// SASL PLAIN ([RFC 4616](https://tools.ietf.org/html/rfc4616)).
///
/// Requires the `authid` property; `authzid` is optional.
#[derive(Clone, Copy, Debug)]
pub struct PlainMechanism;

impl SaslMechanism for PlainMechanism {
    fn name(&self) -> &str {
        PLAIN
    }

    fn start(&self, ctx: &SaslContext<'_>) -> Result<Box<dyn SaslSession>> {
        check_allowed(ctx.properties, &["authid", "authzid"], PLAIN)?;
        let authid = match single_valued(ctx.properties, "authid")? {
            Some(id) if !id.is_empty() => id,
            _ => {
                return Err(LdapConnectionError::param(
                    "the SASL PLAIN mechanism requires the \"authid\" property",
                ))
            }
        };
        let authzid = single_valued(ctx.properties, "authzid")?.unwrap_or_default();
        let mut creds = Vec::with_capacity(authzid.len() + authid.len() + 2);
        creds.extend_from_slice(authzid.as_bytes());
        creds.push(0);
        creds.extend_from_slice(authid.as_bytes());
        creds.push(0);
        creds.extend_from_slice(ctx.password.unwrap_or_default());
        Ok(Box::new(OneShot(Some(creds))))
    }
}

/// SASL ANONYMOUS ([RFC 4505](https://tools.ietf.org/html/rfc4505)).
///
/// The optional `trace` property is sent as the credentials.
#[derive(Clone, Copy, Debug)]
pub struct AnonymousMechanism;

impl SaslMechanism for AnonymousMechanism {
    fn name(&self) -> &str {
        ANONYMOUS
    }

    fn start(&self, ctx: &SaslContext<'_>) -> Result<Box<dyn SaslSession>> {
        check_allowed(ctx.properties, &["trace"], ANONYMOUS)?;
        let trace = single_valued(ctx.properties, "trace")?;
        Ok(Box::new(OneShot(trace.map(|t| t.as_bytes().to_vec()))))
    }
}
