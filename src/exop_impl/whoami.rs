use super::{Exop, ExopParser};

use lber::DecodeError;

pub const WHOAMI_OID: &str = "1.3.6.1.4.1.4203.1.11.3";

/// Who Am I extended operation ([RFC 4532](https://tools.ietf.org/html/rfc4532)).
///
/// The operation doesn't have any data associated with a request. The response
/// carries the authorization identity of the connection.
#[derive(Clone, Copy, Debug)]
pub struct WhoAmI;

/// Who Am I response.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WhoAmIResp {
    /// Authorization identity, `dn:` or `u:` prefixed. Empty for anonymous.
    pub authzid: String,
}

impl WhoAmIResp {
    /// The identity, or `None` if the server reported an anonymous one.
    pub fn identity(&self) -> Option<&str> {
        match self.authzid.as_str() {
            "" | "dn:" => None,
            id => Some(id),
        }
    }
}

impl From<WhoAmI> for Exop {
    fn from(_: WhoAmI) -> Exop {
        Exop {
            name: Some(WHOAMI_OID.to_owned()),
            val: None,
        }
    }
}

impl ExopParser for WhoAmIResp {
    fn parse(val: &[u8]) -> Result<WhoAmIResp, DecodeError> {
        let authzid = String::from_utf8(val.to_vec())
            .map_err(|_| DecodeError::Utf8("authorization identity"))?;
        Ok(WhoAmIResp { authzid })
    }
}
