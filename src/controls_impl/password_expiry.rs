//! Legacy password expiration controls, carried by bind responses
//! from Netscape-lineage directory servers.
use super::{ControlParser, RawControl};

use lber::DecodeError;

pub const PASSWORD_EXPIRED_OID: &str = "2.16.840.1.113730.3.4.4";
pub const PASSWORD_EXPIRING_OID: &str = "2.16.840.1.113730.3.4.5";

/// The password has expired and must be changed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PasswordExpired;

impl ControlParser for PasswordExpired {
    fn parse(_val: &[u8]) -> Result<PasswordExpired, DecodeError> {
        Ok(PasswordExpired)
    }
}

impl From<PasswordExpired> for RawControl {
    fn from(_: PasswordExpired) -> RawControl {
        RawControl {
            ctype: PASSWORD_EXPIRED_OID.to_owned(),
            crit: false,
            val: Some(b"0".to_vec()),
        }
    }
}

/// The password will expire; the value is the number of seconds left,
/// as a decimal string.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PasswordExpiring {
    pub seconds: u64,
}

impl ControlParser for PasswordExpiring {
    fn parse(val: &[u8]) -> Result<PasswordExpiring, DecodeError> {
        let text = std::str::from_utf8(val).map_err(|_| DecodeError::Utf8("expiration time"))?;
        let seconds = text.trim().parse().map_err(|_| DecodeError::Malformed)?;
        Ok(PasswordExpiring { seconds })
    }
}

impl From<PasswordExpiring> for RawControl {
    fn from(pe: PasswordExpiring) -> RawControl {
        RawControl {
            ctype: PASSWORD_EXPIRING_OID.to_owned(),
            crit: false,
            val: Some(pe.seconds.to_string().into_bytes()),
        }
    }
}
