use super::{ControlParser, RawControl};

use lber::common::TagClass;
use lber::parse::parse_complete;
use lber::structure::StructureTag;
use lber::structures::{ASNTag, Enumerated, Integer, Tag};
use lber::universal::Types;
use lber::write;
use lber::DecodeError;

use bytes::BytesMut;

pub const PASSWORD_POLICY_OID: &str = "1.3.6.1.4.1.42.2.27.8.5.1";

/// Password policy request control
/// ([draft-behera-ldap-password-policy](https://tools.ietf.org/html/draft-behera-ldap-password-policy-11)).
///
/// The control has no value.
#[derive(Clone, Copy, Debug, Default)]
pub struct PasswordPolicyRequest;

impl PasswordPolicyRequest {
    pub const OID: &'static str = PASSWORD_POLICY_OID;
}

impl From<PasswordPolicyRequest> for RawControl {
    fn from(_: PasswordPolicyRequest) -> RawControl {
        RawControl {
            ctype: PASSWORD_POLICY_OID.to_owned(),
            crit: false,
            val: None,
        }
    }
}

/// Warning component of the response.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PasswordPolicyWarning {
    /// Seconds until the password expires.
    TimeBeforeExpiration(u32),
    /// Grace authentications left after expiration.
    GraceAuthNsRemaining(u32),
}

/// Error component of the response.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PasswordPolicyError {
    PasswordExpired = 0,
    AccountLocked = 1,
    ChangeAfterReset = 2,
    PasswordModNotAllowed = 3,
    MustSupplyOldPassword = 4,
    InsufficientPasswordQuality = 5,
    PasswordTooShort = 6,
    PasswordTooYoung = 7,
    PasswordInHistory = 8,
}

impl PasswordPolicyError {
    fn from_i64(n: i64) -> Option<PasswordPolicyError> {
        use PasswordPolicyError::*;
        Some(match n {
            0 => PasswordExpired,
            1 => AccountLocked,
            2 => ChangeAfterReset,
            3 => PasswordModNotAllowed,
            4 => MustSupplyOldPassword,
            5 => InsufficientPasswordQuality,
            6 => PasswordTooShort,
            7 => PasswordTooYoung,
            8 => PasswordInHistory,
            _ => return None,
        })
    }
}

/// Password policy response control.
///
/// ```text
/// PasswordPolicyResponseValue ::= SEQUENCE {
///     warning [0] CHOICE {
///         timeBeforeExpiration [0] INTEGER (0 .. maxInt),
///         graceAuthNsRemaining [1] INTEGER (0 .. maxInt) } OPTIONAL,
///     error   [1] ENUMERATED { ... } OPTIONAL }
/// ```
///
/// Either component may be absent; a response with neither carries no information.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PasswordPolicyResp {
    pub warning: Option<PasswordPolicyWarning>,
    pub error: Option<PasswordPolicyError>,
}

fn non_negative(tag: StructureTag, what: &'static str) -> Result<u32, DecodeError> {
    u32::try_from(tag.into_int(what)?).map_err(|_| DecodeError::IntegerOverflow)
}

fn parse_warning(tag: StructureTag) -> Result<PasswordPolicyWarning, DecodeError> {
    let choice = tag
        .into_elements("password policy warning")?
        .next()
        .ok_or(DecodeError::Missing("password policy warning"))?;
    match choice {
        t if t.is(TagClass::Context, 0) => Ok(PasswordPolicyWarning::TimeBeforeExpiration(
            non_negative(t, "timeBeforeExpiration")?,
        )),
        t if t.is(TagClass::Context, 1) => Ok(PasswordPolicyWarning::GraceAuthNsRemaining(
            non_negative(t, "graceAuthNsRemaining")?,
        )),
        t => Err(DecodeError::UnexpectedTag {
            expected: "password policy warning",
            class: t.class,
            id: t.id,
        }),
    }
}

impl ControlParser for PasswordPolicyResp {
    fn parse(val: &[u8]) -> Result<PasswordPolicyResp, DecodeError> {
        let mut resp = PasswordPolicyResp::default();
        if val.is_empty() {
            return Ok(resp);
        }
        let elements = parse_complete(val)?
            .expect_tag(TagClass::Universal, Types::Sequence as u64, "password policy response")?
            .into_elements("password policy response")?;
        for element in elements {
            match element {
                t if t.is(TagClass::Context, 0) => resp.warning = Some(parse_warning(t)?),
                t if t.is(TagClass::Context, 1) => {
                    let code = t.into_int("password policy error")?;
                    resp.error =
                        Some(PasswordPolicyError::from_i64(code).ok_or(DecodeError::Malformed)?);
                }
                _ => (),
            }
        }
        Ok(resp)
    }
}

impl From<PasswordPolicyResp> for RawControl {
    fn from(resp: PasswordPolicyResp) -> RawControl {
        let mut seq = Vec::new();
        if let Some(warning) = resp.warning {
            let (id, value) = match warning {
                PasswordPolicyWarning::TimeBeforeExpiration(secs) => (0, secs),
                PasswordPolicyWarning::GraceAuthNsRemaining(count) => (1, count),
            };
            seq.push(Tag::context(
                0,
                vec![Tag::Integer(Integer {
                    id,
                    class: TagClass::Context,
                    inner: i64::from(value),
                })],
            ));
        }
        if let Some(error) = resp.error {
            seq.push(Tag::Enumerated(Enumerated {
                id: 1,
                class: TagClass::Context,
                inner: error as i64,
            }));
        }
        let mut buf = BytesMut::new();
        write::encode_into(&mut buf, &Tag::sequence(seq).into_structure());
        RawControl {
            ctype: PASSWORD_POLICY_OID.to_owned(),
            crit: false,
            val: Some(buf.to_vec()),
        }
    }
}
