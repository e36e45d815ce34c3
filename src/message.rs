//! Protocol message model.
//!
//! A [`Message`] is a value: the message ID, one protocol operation, and
//! the controls attached to it. Only the operations which take part in
//! connection establishment are decoded into typed form; everything else
//! travels as [`ProtocolOp::Other`] with its BER element intact.

use crate::controls::RawControl;
use crate::controls_impl::{build_tag, parse_controls};
use crate::exop::Exop;
use crate::result::LdapResult;
use crate::RequestId;

use lber::common::TagClass;
use lber::structure::{Elements, StructureTag};
use lber::structures::{ASNTag, Null, Tag};
use lber::universal::Types;
use lber::{write, DecodeError, Parser};

use bytes::{Buf, BytesMut};

const BIND_REQUEST: u64 = 0;
const BIND_RESPONSE: u64 = 1;
const UNBIND_REQUEST: u64 = 2;
const EXTENDED_REQUEST: u64 = 23;
const EXTENDED_RESPONSE: u64 = 24;

/// One LDAP message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    pub id: RequestId,
    pub op: ProtocolOp,
    pub controls: Vec<RawControl>,
}

/// Protocol operation carried by a message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProtocolOp {
    BindRequest(BindRequest),
    BindResponse(BindResponse),
    UnbindRequest,
    ExtendedRequest(ExtendedRequest),
    ExtendedResponse(ExtendedResponse),
    /// Any other operation, kept as its raw element.
    Other(StructureTag),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BindRequest {
    pub version: u8,
    /// Bind DN; empty, never absent, for anonymous and most SASL binds.
    pub name: String,
    pub auth: BindAuth,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BindAuth {
    /// Simple password; empty for an unauthenticated bind.
    Simple(Vec<u8>),
    /// SASL mechanism and credentials. `None` omits the credentials field
    /// altogether, which is different from sending empty credentials.
    Sasl {
        mechanism: String,
        credentials: Option<Vec<u8>>,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BindResponse {
    pub result: LdapResult,
    pub server_sasl_creds: Option<Vec<u8>>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExtendedRequest {
    pub name: String,
    pub value: Option<Vec<u8>>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExtendedResponse {
    pub result: LdapResult,
    pub name: Option<String>,
    pub value: Option<Vec<u8>>,
}

impl Message {
    pub fn new(id: RequestId, op: ProtocolOp) -> Message {
        Message {
            id,
            op,
            controls: Vec::new(),
        }
    }

    pub fn with_controls(mut self, controls: Vec<RawControl>) -> Message {
        self.controls = controls;
        self
    }

    /// BER-encode the message, appending it to `buf`.
    pub fn encode(self, buf: &mut BytesMut) {
        write::encode_into(buf, &self.into_structure());
    }

    /// Decode one message from the front of `buf`, consuming its octets.
    ///
    /// Returns `Ok(None)` and leaves `buf` untouched if it doesn't yet hold
    /// a complete message.
    pub fn decode(buf: &mut BytesMut) -> Result<Option<Message>, DecodeError> {
        match Parser::new().parse(buf)? {
            None => Ok(None),
            Some((tag, used)) => {
                buf.advance(used);
                Message::from_structure(tag).map(Some)
            }
        }
    }

    pub(crate) fn into_structure(self) -> StructureTag {
        let mut inner = vec![Tag::integer(i64::from(self.id)), Tag::StructureTag(self.op.into_structure())];
        if !self.controls.is_empty() {
            inner.push(Tag::StructureTag(StructureTag::constructed(
                TagClass::Context,
                0,
                self.controls.into_iter().map(build_tag).collect(),
            )));
        }
        Tag::sequence(inner).into_structure()
    }

    pub(crate) fn from_structure(tag: StructureTag) -> Result<Message, DecodeError> {
        let mut elements = tag
            .expect_tag(TagClass::Universal, Types::Sequence as u64, "LDAP message")?
            .into_elements("LDAP message")?;
        let id = elements
            .next_required("message ID")?
            .expect_tag(TagClass::Universal, Types::Integer as u64, "message ID")?
            .into_int("message ID")?;
        let id = RequestId::try_from(id)
            .ok()
            .filter(|id| *id >= 0)
            .ok_or(DecodeError::IntegerOverflow)?;
        let mut op = ProtocolOp::from_structure(elements.next_required("protocol op")?)?;
        let mut controls = Vec::new();
        for extra in elements {
            if extra.is(TagClass::Context, 0) {
                controls = parse_controls(extra)?;
            } else if extra.is(TagClass::Context, 10) {
                // Active Directory puts the response name of a notice of disconnection
                // after the ExtendedResponse, where the controls belong.
                if let ProtocolOp::ExtendedResponse(ref mut resp) = op {
                    if resp.name.is_none() {
                        resp.name = Some(extra.into_string("response name")?);
                    }
                }
            }
        }
        Ok(Message { id, op, controls })
    }
}

impl From<Exop> for ProtocolOp {
    fn from(exop: Exop) -> ProtocolOp {
        ProtocolOp::ExtendedRequest(ExtendedRequest {
            name: exop.name.unwrap_or_default(),
            value: exop.val,
        })
    }
}

impl ExtendedResponse {
    /// Name and value of the response as a generic [`Exop`].
    pub fn exop(&self) -> Exop {
        Exop {
            name: self.name.clone(),
            val: self.value.clone(),
        }
    }
}

fn result_tags(result: LdapResult) -> Vec<Tag> {
    let mut tags = vec![
        Tag::enumerated(i64::from(result.rc)),
        Tag::octets(result.matched),
        Tag::octets(result.text),
    ];
    if !result.refs.is_empty() {
        tags.push(Tag::context(3, result.refs.into_iter().map(Tag::octets).collect()));
    }
    tags
}

fn parse_result(elements: &mut Elements) -> Result<LdapResult, DecodeError> {
    let rc = elements
        .next_required("result code")?
        .expect_tag(TagClass::Universal, Types::Enumerated as u64, "result code")?
        .into_int("result code")?;
    let rc = u32::try_from(rc).map_err(|_| DecodeError::IntegerOverflow)?;
    let matched = elements.next_required("matched DN")?.into_string("matched DN")?;
    let text = elements
        .next_required("diagnostic message")?
        .into_string("diagnostic message")?;
    let refs = match elements.next_if(TagClass::Context, 3) {
        Some(refs) => refs
            .into_elements("referral")?
            .map(|r| r.into_string("referral URI"))
            .collect::<Result<Vec<_>, _>>()?,
        None => Vec::new(),
    };
    Ok(LdapResult {
        rc,
        matched,
        text,
        refs,
        ctrls: Vec::new(),
    })
}

fn optional_bytes(
    elements: &mut Elements,
    id: u64,
    what: &'static str,
) -> Result<Option<Vec<u8>>, DecodeError> {
    elements
        .next_if(TagClass::Context, id)
        .map(|t| t.into_bytes(what))
        .transpose()
}

fn optional_string(
    elements: &mut Elements,
    id: u64,
    what: &'static str,
) -> Result<Option<String>, DecodeError> {
    elements
        .next_if(TagClass::Context, id)
        .map(|t| t.into_string(what))
        .transpose()
}

impl ProtocolOp {
    pub(crate) fn into_structure(self) -> StructureTag {
        let tag = match self {
            ProtocolOp::BindRequest(req) => {
                let auth = match req.auth {
                    BindAuth::Simple(password) => Tag::context_octets(0, password),
                    BindAuth::Sasl {
                        mechanism,
                        credentials,
                    } => {
                        let mut sasl = vec![Tag::octets(mechanism)];
                        if let Some(credentials) = credentials {
                            sasl.push(Tag::octets(credentials));
                        }
                        Tag::context(3, sasl)
                    }
                };
                Tag::application(
                    BIND_REQUEST,
                    vec![Tag::integer(i64::from(req.version)), Tag::octets(req.name), auth],
                )
            }
            ProtocolOp::BindResponse(resp) => {
                let mut inner = result_tags(resp.result);
                if let Some(creds) = resp.server_sasl_creds {
                    inner.push(Tag::context_octets(7, creds));
                }
                Tag::application(BIND_RESPONSE, inner)
            }
            ProtocolOp::UnbindRequest => Tag::Null(Null {
                id: UNBIND_REQUEST,
                class: TagClass::Application,
            }),
            ProtocolOp::ExtendedRequest(req) => {
                let mut inner = vec![Tag::context_octets(0, req.name)];
                if let Some(value) = req.value {
                    inner.push(Tag::context_octets(1, value));
                }
                Tag::application(EXTENDED_REQUEST, inner)
            }
            ProtocolOp::ExtendedResponse(resp) => {
                let mut inner = result_tags(resp.result);
                if let Some(name) = resp.name {
                    inner.push(Tag::context_octets(10, name));
                }
                if let Some(value) = resp.value {
                    inner.push(Tag::context_octets(11, value));
                }
                Tag::application(EXTENDED_RESPONSE, inner)
            }
            ProtocolOp::Other(tag) => Tag::StructureTag(tag),
        };
        tag.into_structure()
    }

    pub(crate) fn from_structure(tag: StructureTag) -> Result<ProtocolOp, DecodeError> {
        if tag.class != TagClass::Application {
            return Err(DecodeError::UnexpectedTag {
                expected: "protocol op",
                class: tag.class,
                id: tag.id,
            });
        }
        let op = match tag.id {
            BIND_REQUEST => {
                let mut elements = tag.into_elements("bind request")?;
                let version = elements.next_required("version")?.into_int("version")?;
                let version = u8::try_from(version).map_err(|_| DecodeError::IntegerOverflow)?;
                let name = elements.next_required("bind DN")?.into_string("bind DN")?;
                let auth = match elements.next_required("authentication")? {
                    t if t.is(TagClass::Context, 0) => BindAuth::Simple(t.into_bytes("password")?),
                    t if t.is(TagClass::Context, 3) => {
                        let mut sasl = t.into_elements("SASL credentials")?;
                        let mechanism = sasl.next_required("SASL mechanism")?.into_string("SASL mechanism")?;
                        let credentials = sasl.next().map(|c| c.into_bytes("SASL credentials")).transpose()?;
                        BindAuth::Sasl {
                            mechanism,
                            credentials,
                        }
                    }
                    t => {
                        return Err(DecodeError::UnexpectedTag {
                            expected: "authentication choice",
                            class: t.class,
                            id: t.id,
                        })
                    }
                };
                ProtocolOp::BindRequest(BindRequest {
                    version,
                    name,
                    auth,
                })
            }
            BIND_RESPONSE => {
                let mut elements = tag.into_elements("bind response")?;
                let result = parse_result(&mut elements)?;
                let server_sasl_creds = optional_bytes(&mut elements, 7, "server SASL credentials")?;
                ProtocolOp::BindResponse(BindResponse {
                    result,
                    server_sasl_creds,
                })
            }
            UNBIND_REQUEST => {
                tag.into_bytes("unbind request")?;
                ProtocolOp::UnbindRequest
            }
            EXTENDED_REQUEST => {
                let mut elements = tag.into_elements("extended request")?;
                let name = elements
                    .next_required("request name")?
                    .expect_tag(TagClass::Context, 0, "request name")?
                    .into_string("request name")?;
                let value = optional_bytes(&mut elements, 1, "request value")?;
                ProtocolOp::ExtendedRequest(ExtendedRequest { name, value })
            }
            EXTENDED_RESPONSE => {
                let mut elements = tag.into_elements("extended response")?;
                let result = parse_result(&mut elements)?;
                let name = optional_string(&mut elements, 10, "response name")?;
                let value = optional_bytes(&mut elements, 11, "response value")?;
                ProtocolOp::ExtendedResponse(ExtendedResponse {
                    result,
                    name,
                    value,
                })
            }
            _ => ProtocolOp::Other(tag),
        };
        Ok(op)
    }

    /// Short name of the operation, for log and error messages.
    pub fn name(&self) -> &'static str {
        match self {
            ProtocolOp::BindRequest(_) => "bind request",
            ProtocolOp::BindResponse(_) => "bind response",
            ProtocolOp::UnbindRequest => "unbind request",
            ProtocolOp::ExtendedRequest(_) => "extended request",
            ProtocolOp::ExtendedResponse(_) => "extended response",
            ProtocolOp::Other(_) => "protocol op",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controls::{AuthzIdRequest, PasswordPolicyRequest};

    fn round_trip(msg: Message) -> Message {
        let mut buf = BytesMut::new();
        msg.encode(&mut buf);
        let decoded = Message::decode(&mut buf).unwrap().unwrap();
        assert!(buf.is_empty());
        decoded
    }

    #[test]
    fn sasl_bind_with_request_controls() {
        let msg = Message::new(
            2,
            ProtocolOp::BindRequest(BindRequest {
                version: 3,
                name: String::new(),
                auth: BindAuth::Sasl {
                    mechanism: "EXTERNAL".into(),
                    credentials: None,
                },
            }),
        )
        .with_controls(vec![AuthzIdRequest.into(), PasswordPolicyRequest.into()]);
        assert_eq!(round_trip(msg.clone()), msg);
    }

    #[test]
    fn absent_and_empty_sasl_credentials_differ() {
        let with_empty = |credentials| {
            let mut buf = BytesMut::new();
            Message::new(
                1,
                ProtocolOp::BindRequest(BindRequest {
                    version: 3,
                    name: String::new(),
                    auth: BindAuth::Sasl {
                        mechanism: "ANONYMOUS".into(),
                        credentials,
                    },
                }),
            )
            .encode(&mut buf);
            buf.len()
        };
        assert_eq!(with_empty(Some(vec![])), with_empty(None) + 2);
    }

    #[test]
    fn extended_response_with_referrals() {
        let msg = Message::new(
            7,
            ProtocolOp::ExtendedResponse(ExtendedResponse {
                result: LdapResult {
                    rc: 10,
                    matched: "dc=example,dc=com".into(),
                    text: "see elsewhere".into(),
                    refs: vec!["ldap://other.example.com/".into()],
                    ctrls: vec![],
                },
                name: Some("1.2.3".into()),
                value: Some(vec![0, 1, 2]),
            }),
        );
        assert_eq!(round_trip(msg.clone()), msg);
    }

    #[test]
    fn unbind_wire_form() {
        let mut buf = BytesMut::new();
        Message::new(3, ProtocolOp::UnbindRequest).encode(&mut buf);
        assert_eq!(&buf[..], &[0x30, 0x05, 0x02, 0x01, 0x03, 0x42, 0x00]);
        assert_eq!(
            Message::decode(&mut buf).unwrap().unwrap().op,
            ProtocolOp::UnbindRequest
        );
        let msg = Message::new(3, ProtocolOp::UnbindRequest);
        assert_eq!(round_trip(msg.clone()), msg);
    }

    #[test]
    fn simple_bind_response_wire_form() {
        // SEQUENCE { 1, [APPLICATION 1] { ENUMERATED 0, "", "" } }
        let mut buf = BytesMut::from(
            &[0x30, 0x0c, 0x02, 0x01, 0x01, 0x61, 0x07, 0x0a, 0x01, 0x00, 0x04, 0x00, 0x04, 0x00][..],
        );
        let msg = Message::decode(&mut buf).unwrap().unwrap();
        assert_eq!(msg.id, 1);
        match msg.op {
            ProtocolOp::BindResponse(ref resp) => {
                assert_eq!(resp.result.rc, 0);
                assert_eq!(resp.server_sasl_creds, None);
            }
            ref op => panic!("unexpected op {:?}", op),
        }
        assert_eq!(round_trip(msg.clone()), msg);
    }

    #[test]
    fn negative_result_code_is_rejected() {
        // SEQUENCE { 1, [APPLICATION 1] { ENUMERATED -1, "", "" } }
        let mut buf = BytesMut::from(
            &[0x30, 0x0c, 0x02, 0x01, 0x01, 0x61, 0x07, 0x0a, 0x01, 0xff, 0x04, 0x00, 0x04, 0x00][..],
        );
        assert_eq!(Message::decode(&mut buf), Err(DecodeError::IntegerOverflow));
    }

    #[test]
    fn extended_request_with_and_without_value() {
        let with_value = Message::new(
            4,
            ProtocolOp::ExtendedRequest(ExtendedRequest {
                name: "1.3.6.1.4.1.4203.1.11.1".into(),
                value: Some(vec![0x30, 0x00]),
            }),
        );
        assert_eq!(round_trip(with_value.clone()), with_value);
        let without_value = Message::new(
            5,
            ProtocolOp::ExtendedRequest(ExtendedRequest {
                name: crate::exop::STARTTLS_OID.into(),
                value: None,
            }),
        );
        assert_eq!(round_trip(without_value.clone()), without_value);
    }

    #[test]
    fn bind_response_with_server_creds_and_controls() {
        let msg = Message::new(
            6,
            ProtocolOp::BindResponse(BindResponse {
                result: LdapResult {
                    rc: 14,
                    matched: String::new(),
                    text: "continue".into(),
                    refs: vec![],
                    ctrls: vec![],
                },
                server_sasl_creds: Some(b"challenge".to_vec()),
            }),
        )
        .with_controls(vec![PasswordPolicyRequest.into()]);
        assert_eq!(round_trip(msg.clone()), msg);
    }

    #[test]
    fn version_2_simple_bind() {
        let msg = Message::new(
            1,
            ProtocolOp::BindRequest(BindRequest {
                version: 2,
                name: "cn=admin,dc=example,dc=com".into(),
                auth: BindAuth::Simple(b"secret".to_vec()),
            }),
        );
        assert_eq!(round_trip(msg.clone()), msg);
    }

    #[test]
    fn unknown_op_is_kept_raw() {
        // SEQUENCE { 4, [APPLICATION 16] 2 }, an abandon request
        let mut buf = BytesMut::from(&[0x30, 0x06, 0x02, 0x01, 0x04, 0x50, 0x01, 0x02][..]);
        let msg = Message::decode(&mut buf).unwrap().unwrap();
        assert_eq!(
            msg.op,
            ProtocolOp::Other(StructureTag::primitive(TagClass::Application, 16, vec![2]))
        );
        let mut out = BytesMut::new();
        msg.encode(&mut out);
        assert_eq!(&out[..], &[0x30, 0x06, 0x02, 0x01, 0x04, 0x50, 0x01, 0x02]);
    }

    #[test]
    fn misplaced_notice_name_is_recovered() {
        let mut buf = BytesMut::new();
        let notice = Tag::sequence(vec![
            Tag::integer(0),
            Tag::application(
                EXTENDED_RESPONSE,
                vec![Tag::enumerated(52), Tag::octets(""), Tag::octets("shutting down")],
            ),
            Tag::context_octets(10, crate::exop::NOTICE_OF_DISCONNECTION_OID),
        ]);
        write::encode_into(&mut buf, &notice.into_structure());
        let msg = Message::decode(&mut buf).unwrap().unwrap();
        let resp = crate::exop::NoticeOfDisconnection::matches(&msg).unwrap();
        assert_eq!(resp.result.rc, 52);
        assert_eq!(resp.name.as_deref(), Some(crate::exop::NOTICE_OF_DISCONNECTION_OID));
    }

    #[test]
    fn negative_message_id_is_rejected() {
        let mut buf = BytesMut::from(&[0x30, 0x05, 0x02, 0x01, 0xff, 0x42, 0x00][..]);
        assert_eq!(Message::decode(&mut buf), Err(DecodeError::IntegerOverflow));
    }

    #[test]
    fn partial_message_leaves_buffer_alone() {
        let mut buf = BytesMut::from(&[0x30, 0x05, 0x02, 0x01][..]);
        assert_eq!(Message::decode(&mut buf), Ok(None));
        assert_eq!(buf.len(), 4);
    }
}
