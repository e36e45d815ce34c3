use std::collections::HashMap;
use std::sync::LazyLock;

use lber::common::TagClass;
use lber::structure::StructureTag;
use lber::structures::{ASNTag, Tag};
use lber::universal::Types;
use lber::DecodeError;

/// Recognized control types.
///
/// These are the controls which accompany a bind: two request controls asking the
/// server for extra information, and the response controls carrying it back.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControlType {
    AuthzIdRequest,
    AuthzIdResponse,
    PasswordExpired,
    PasswordExpiring,
    PasswordPolicy,
}

mod authz_id;
pub use self::authz_id::{AuthzIdRequest, AuthzIdResp};

mod password_expiry;
pub use self::password_expiry::{PasswordExpired, PasswordExpiring};

mod password_policy;
pub use self::password_policy::{
    PasswordPolicyError, PasswordPolicyRequest, PasswordPolicyResp, PasswordPolicyWarning,
};

#[rustfmt::skip]
static CONTROLS: LazyLock<HashMap<&'static str, ControlType>> = LazyLock::new(|| {
    HashMap::from([
        (self::authz_id::AUTHZ_ID_REQUEST_OID, ControlType::AuthzIdRequest),
        (self::authz_id::AUTHZ_ID_RESPONSE_OID, ControlType::AuthzIdResponse),
        (self::password_expiry::PASSWORD_EXPIRED_OID, ControlType::PasswordExpired),
        (self::password_expiry::PASSWORD_EXPIRING_OID, ControlType::PasswordExpiring),
        (self::password_policy::PASSWORD_POLICY_OID, ControlType::PasswordPolicy),
    ])
});

/// Conversion trait for response controls.
pub trait ControlParser: Sized {
    /// Convert the raw value into a control-specific struct. Controls defined
    /// without a value receive an empty slice.
    fn parse(val: &[u8]) -> Result<Self, DecodeError>;
}

/// Generic control.
///
/// Used both for request and response controls. A response control is turned
/// into a control-specific struct by calling type-qualified [`parse()`](#method.parse)
/// on it, if a [`ControlParser`](trait.ControlParser.html) implementation exists for
/// that type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawControl {
    /// OID of the control.
    pub ctype: String,
    /// Criticality, has no meaning on response.
    pub crit: bool,
    /// Raw value of the control, if any.
    pub val: Option<Vec<u8>>,
}

impl RawControl {
    /// The control type, if the OID is one this library implements.
    pub fn control_type(&self) -> Option<ControlType> {
        CONTROLS.get(self.ctype.as_str()).copied()
    }

    /// Parse the generic control into a control-specific struct.
    pub fn parse<T: ControlParser>(&self) -> Result<T, DecodeError> {
        T::parse(self.val.as_deref().unwrap_or_default())
    }
}

pub(crate) fn build_tag(rc: RawControl) -> StructureTag {
    let mut seq = vec![Tag::octets(rc.ctype)];
    if rc.crit {
        seq.push(Tag::boolean(true));
    }
    if let Some(val) = rc.val {
        seq.push(Tag::octets(val));
    }
    Tag::sequence(seq).into_structure()
}

pub(crate) fn parse_controls(t: StructureTag) -> Result<Vec<RawControl>, DecodeError> {
    let mut ctrls = Vec::new();
    for ctrl in t.into_elements("controls")? {
        let mut components = ctrl
            .expect_tag(TagClass::Universal, Types::Sequence as u64, "control")?
            .into_elements("control")?;
        let ctype = components.next_required("control type")?.into_string("control type")?;
        let crit = match components.next_if(TagClass::Universal, Types::Boolean as u64) {
            Some(c) => c.into_bool("criticality")?,
            None => false,
        };
        let val = match components.next() {
            Some(v) if v.is_universal(Types::OctetString) => Some(v.into_bytes("control value")?),
            Some(v) => {
                return Err(DecodeError::UnexpectedTag {
                    expected: "control value",
                    class: v.class,
                    id: v.id,
                })
            }
            None => None,
        };
        ctrls.push(RawControl { ctype, crit, val });
    }
    Ok(ctrls)
}
