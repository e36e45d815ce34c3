use super::Exop;

pub const STARTTLS_OID: &str = "1.3.6.1.4.1.1466.20037";

/// StartTLS extended operation ([RFC 4511, section 4.14](https://tools.ietf.org/html/rfc4511#section-4.14)).
///
/// The request carries no value. A successful response means the server expects
/// the TLS handshake to start immediately on the same connection.
#[derive(Clone, Copy, Debug)]
pub struct StartTLS;

impl From<StartTLS> for Exop {
    fn from(_: StartTLS) -> Exop {
        Exop {
            name: Some(STARTTLS_OID.to_owned()),
            val: None,
        }
    }
}
