use lber::DecodeError;

mod notice;
pub use self::notice::{NoticeOfDisconnection, NOTICE_OF_DISCONNECTION_OID};

mod starttls;
pub use self::starttls::{StartTLS, STARTTLS_OID};

mod whoami;
pub use self::whoami::{WhoAmI, WhoAmIResp, WHOAMI_OID};

/// Generic extended operation.
///
/// Since the same struct can be used both for requests and responses,
/// both fields must be declared as optional; when sending an extended
/// request, `name` must not be `None`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Exop {
    /// OID of the operation. It may be absent in the response.
    pub name: Option<String>,
    /// Request or response value. It may be absent in both cases.
    pub val: Option<Vec<u8>>,
}

impl Exop {
    /// Parse the generic exop into an exop-specific struct.
    ///
    /// An absent response value is passed to the parser as an empty slice.
    pub fn parse<T: ExopParser>(&self) -> Result<T, DecodeError> {
        T::parse(self.val.as_deref().unwrap_or_default())
    }
}

/// Conversion trait for extended response values.
pub trait ExopParser: Sized {
    /// Convert the raw value into an exop-specific struct.
    fn parse(val: &[u8]) -> Result<Self, DecodeError>;
}
