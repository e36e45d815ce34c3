use super::{ControlParser, RawControl};

use lber::DecodeError;

pub const AUTHZ_ID_REQUEST_OID: &str = "2.16.840.1.113730.3.4.16";
pub const AUTHZ_ID_RESPONSE_OID: &str = "2.16.840.1.113730.3.4.15";

/// Authorization Identity request control ([RFC 3829](https://tools.ietf.org/html/rfc3829)).
///
/// Asks the server to report the authorization identity established by the bind.
/// The control has no value.
#[derive(Clone, Copy, Debug, Default)]
pub struct AuthzIdRequest;

impl AuthzIdRequest {
    pub const OID: &'static str = AUTHZ_ID_REQUEST_OID;
}

impl From<AuthzIdRequest> for RawControl {
    fn from(_: AuthzIdRequest) -> RawControl {
        RawControl {
            ctype: AUTHZ_ID_REQUEST_OID.to_owned(),
            crit: false,
            val: None,
        }
    }
}

/// Authorization Identity response control.
///
/// The value is the authzId in its textual form, `dn:` or `u:` prefixed,
/// and empty for an anonymous identity.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthzIdResp {
    pub authz_id: String,
}

impl ControlParser for AuthzIdResp {
    fn parse(val: &[u8]) -> Result<AuthzIdResp, DecodeError> {
        let authz_id = String::from_utf8(val.to_vec())
            .map_err(|_| DecodeError::Utf8("authorization identity"))?;
        Ok(AuthzIdResp { authz_id })
    }
}

impl From<AuthzIdResp> for RawControl {
    fn from(resp: AuthzIdResp) -> RawControl {
        RawControl {
            ctype: AUTHZ_ID_RESPONSE_OID.to_owned(),
            crit: false,
            val: Some(resp.authz_id.into_bytes()),
        }
    }
}
