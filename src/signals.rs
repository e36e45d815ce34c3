//! Authentication signals carried by bind response controls.
//!
//! Interpretation is a pure function of the controls. Each control is looked
//! at on its own; the order doesn't matter and unknown controls are skipped.

use std::fmt;

use crate::controls::{
    AuthzIdResp, ControlType, PasswordExpired, PasswordExpiring, PasswordPolicyError,
    PasswordPolicyResp, PasswordPolicyWarning, RawControl,
};
use crate::util::seconds_to_time_string;

/// User-facing outcome of a response control.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AuthSignal {
    /// Authorization identity established by the bind.
    AuthorizationIdentity(String),
    PasswordExpired,
    AccountLocked,
    /// The password was reset and must be changed before anything else is allowed.
    MustChangePassword,
    /// The password expires in `seconds`; `display` is the formatted duration.
    PasswordExpiring { seconds: u64, display: String },
    GraceLoginsRemaining(u32),
}

impl AuthSignal {
    fn expiring(seconds: u64) -> AuthSignal {
        AuthSignal::PasswordExpiring {
            seconds,
            display: seconds_to_time_string(seconds),
        }
    }
}

impl fmt::Display for AuthSignal {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            AuthSignal::AuthorizationIdentity(id) => write!(f, "authorization identity: {}", id),
            AuthSignal::PasswordExpired => f.write_str("the password has expired"),
            AuthSignal::AccountLocked => f.write_str("the account is locked"),
            AuthSignal::MustChangePassword => {
                f.write_str("the password was reset and must be changed")
            }
            AuthSignal::PasswordExpiring { display, .. } => {
                write!(f, "the password will expire in {}", display)
            }
            AuthSignal::GraceLoginsRemaining(n) => write!(f, "{} grace logins remaining", n),
        }
    }
}

/// Decode every recognized control into signals.
///
/// A recognized control with a malformed value is logged and skipped.
pub fn interpret(controls: &[RawControl]) -> Vec<AuthSignal> {
    let mut signals = Vec::new();
    for ctrl in controls {
        let Some(ctype) = ctrl.control_type() else {
            continue;
        };
        if let Err(e) = interpret_one(ctype, ctrl, &mut signals) {
            warn!("ignoring malformed {} response control: {}", ctrl.ctype, e);
        }
    }
    signals
}

fn interpret_one(
    ctype: ControlType,
    ctrl: &RawControl,
    signals: &mut Vec<AuthSignal>,
) -> Result<(), lber::DecodeError> {
    match ctype {
        ControlType::AuthzIdResponse => {
            let AuthzIdResp { authz_id } = ctrl.parse()?;
            signals.push(AuthSignal::AuthorizationIdentity(authz_id));
        }
        ControlType::PasswordExpired => {
            ctrl.parse::<PasswordExpired>()?;
            signals.push(AuthSignal::PasswordExpired);
        }
        ControlType::PasswordExpiring => {
            let PasswordExpiring { seconds } = ctrl.parse()?;
            signals.push(AuthSignal::expiring(seconds));
        }
        ControlType::PasswordPolicy => {
            let resp: PasswordPolicyResp = ctrl.parse()?;
            match resp.error {
                Some(PasswordPolicyError::PasswordExpired) => signals.push(AuthSignal::PasswordExpired),
                Some(PasswordPolicyError::AccountLocked) => signals.push(AuthSignal::AccountLocked),
                Some(PasswordPolicyError::ChangeAfterReset) => {
                    signals.push(AuthSignal::MustChangePassword)
                }
                Some(_) | None => (),
            }
            match resp.warning {
                Some(PasswordPolicyWarning::TimeBeforeExpiration(secs)) => {
                    signals.push(AuthSignal::expiring(u64::from(secs)))
                }
                Some(PasswordPolicyWarning::GraceAuthNsRemaining(n)) => {
                    signals.push(AuthSignal::GraceLoginsRemaining(n))
                }
                None => (),
            }
        }
        ControlType::AuthzIdRequest => (),
    }
    Ok(())
}
