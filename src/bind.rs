//! Bind negotiation.
//!
//! One bind per connection attempt, chosen by the SASL selection of the
//! options: SASL EXTERNAL, a named SASL mechanism, or a simple bind when a
//! bind DN is given. Without any of those, the connection stays anonymous
//! and nothing is sent.

use crate::controls::{AuthzIdRequest, PasswordPolicyRequest, RawControl};
use crate::ldap::Ldap;
use crate::message::{BindAuth, BindRequest};
use crate::options::ConnectionOptions;
use crate::result::{ErrorKind, LdapConnectionError, LdapResult, Result, ResultCode};
use crate::sasl::{self, SaslContext, SaslProperties, SaslSelection, EXTERNAL};
use crate::signals::{self, AuthSignal};

/// Upper bound on bind round trips of one SASL exchange.
const MAX_SASL_STEPS: usize = 32;

/// What a completed bind established.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BindOutcome {
    /// Authorization identity, from the response control or Who Am I.
    pub authz_id: Option<String>,
    /// Signals decoded from the response controls.
    pub signals: Vec<AuthSignal>,
    /// Raw response controls of the final bind response.
    pub controls: Vec<RawControl>,
    /// Result of the final bind response, `None` if no bind was sent.
    pub result: Option<LdapResult>,
}

impl BindOutcome {
    pub fn is_anonymous(&self) -> bool {
        self.result.is_none()
    }
}

fn request_controls(options: &ConnectionOptions) -> Vec<RawControl> {
    let mut ctrls = Vec::new();
    if options.report_authz_id() {
        ctrls.push(AuthzIdRequest.into());
    }
    if options.use_password_policy_control() {
        ctrls.push(PasswordPolicyRequest.into());
    }
    ctrls
}

async fn sasl_exchange(
    ldap: &mut Ldap,
    options: &ConnectionOptions,
    bind_dn: Option<&str>,
    password: Option<&[u8]>,
    mechanism: &str,
    properties: &SaslProperties,
) -> Result<LdapResult> {
    let mech = sasl::lookup(options.mechanisms(), mechanism)?;
    let ctx = SaslContext {
        bind_dn,
        password,
        properties,
    };
    let mut session = mech.start(&ctx)?;
    let mut credentials = session.initial_response()?;
    debug!("SASL {} bind", mech.name());
    for _ in 0..MAX_SASL_STEPS {
        let req = BindRequest {
            version: options.version(),
            name: bind_dn.unwrap_or_default().to_owned(),
            auth: BindAuth::Sasl {
                mechanism: mech.name().to_owned(),
                credentials,
            },
        };
        let resp = ldap.with_controls(request_controls(options)).bind(req).await?;
        if resp.result.code() != ResultCode::SASL_BIND_IN_PROGRESS {
            return Ok(resp.result);
        }
        credentials = session.evaluate(resp.server_sasl_creds.as_deref())?;
    }
    Err(LdapConnectionError::new(
        ErrorKind::UnexpectedResponse,
        ResultCode::CLIENT_LOOP,
        format!("SASL {} exchange did not finish in {} steps", mech.name(), MAX_SASL_STEPS),
    ))
}

async fn send_bind(
    ldap: &mut Ldap,
    options: &ConnectionOptions,
    bind_dn: Option<&str>,
    password: Option<&[u8]>,
) -> Result<Option<LdapResult>> {
    let auth = match options.sasl() {
        SaslSelection::External { authzid } => {
            debug!("SASL EXTERNAL bind");
            BindAuth::Sasl {
                mechanism: EXTERNAL.to_owned(),
                credentials: sasl::external_credentials(authzid.as_deref()),
            }
        }
        SaslSelection::Named {
            mechanism,
            properties,
        } => {
            return sasl_exchange(ldap, options, bind_dn, password, mechanism, properties)
                .await
                .map(Some)
        }
        SaslSelection::None => match bind_dn {
            Some(dn) => {
                debug!("simple bind as \"{}\"", dn);
                BindAuth::Simple(password.unwrap_or_default().to_vec())
            }
            None => {
                debug!("no bind DN, the connection stays anonymous");
                return Ok(None);
            }
        },
    };
    let req = BindRequest {
        version: options.version(),
        name: bind_dn.unwrap_or_default().to_owned(),
        auth,
    };
    let resp = ldap.with_controls(request_controls(options)).bind(req).await?;
    Ok(Some(resp.result))
}

/// Run the bind the options ask for and interpret its response.
///
/// A non-success result is a `BindRejected` error with the server's code,
/// diagnostic and matched DN. Transport and decoding failures carry the
/// connect-error code.
pub(crate) async fn authenticate(
    ldap: &mut Ldap,
    options: &ConnectionOptions,
    bind_dn: Option<&str>,
    password: Option<&[u8]>,
) -> Result<BindOutcome> {
    let mut result = match send_bind(ldap, options, bind_dn, password).await {
        Ok(Some(result)) => result,
        Ok(None) => return Ok(BindOutcome::default()),
        Err(e) => return Err(e.into_connect_failure()),
    };
    if result.rc != 0 {
        return Err(LdapConnectionError::from_result(
            ErrorKind::BindRejected,
            format!("bind failed: {}", result),
            &result,
        ));
    }
    let controls = std::mem::take(&mut result.ctrls);
    let signals = signals::interpret(&controls);
    for signal in &signals {
        info!("{}", signal);
    }
    let mut authz_id = signals.iter().find_map(|s| match s {
        AuthSignal::AuthorizationIdentity(id) => Some(id.clone()),
        _ => None,
    });
    if options.report_authz_id() && authz_id.is_none() {
        match ldap.who_am_i().await {
            Ok(id) => {
                if let Some(ref id) = id {
                    info!("authorization identity: {}", id);
                }
                authz_id = id;
            }
            Err(e) => warn!("cannot determine the authorization identity: {}", e),
        }
    }
    Ok(BindOutcome {
        authz_id,
        signals,
        controls,
        result: Some(result),
    })
}
