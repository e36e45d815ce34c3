//! Connection establishment and bind over plain TCP.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{bind_response, extended_response, ldap_result, MockServer, Peer};
use ldapwire::controls::{
    AuthzIdRequest, AuthzIdResp, PasswordPolicyRequest, PasswordPolicyResp, PasswordPolicyWarning,
};
use ldapwire::exop::{NOTICE_OF_DISCONNECTION_OID, WHOAMI_OID};
use ldapwire::sasl::{SaslContext, SaslMechanism, SaslProperties, SaslRegistry, SaslSelection, SaslSession};
use ldapwire::{
    AuthSignal, BindAuth, ConnectionOptions, ConnectionState, ErrorKind, ExtendedResponse,
    LdapConnection, Message, MessageIdCounter, ProtocolOp, ResultCode, Transport,
};

const DN: &str = "uid=jdoe,ou=People,dc=example,dc=com";
const TIMEOUT: Duration = Duration::from_secs(5);

fn connection(server: &MockServer, options: ConnectionOptions) -> LdapConnection {
    LdapConnection::new("127.0.0.1", server.port(), options).unwrap()
}

fn bind_request(msg: &Message) -> (&str, &BindAuth) {
    match msg.op {
        ProtocolOp::BindRequest(ref req) => (req.name.as_str(), &req.auth),
        ref op => panic!("expected a bind request, got {:?}", op),
    }
}

/// Answer the bind with success, then collect everything else.
fn accept_bind(stream: std::net::TcpStream) -> Vec<Message> {
    let mut peer = Peer::new(stream);
    let bind = peer.recv().expect("bind request");
    peer.send(bind_response(bind.id, 0, vec![]));
    let mut received = vec![bind];
    received.extend(peer.drain());
    received
}

#[test]
fn simple_bind() {
    let _ = env_logger::builder().is_test(true).try_init();
    let server = MockServer::start(accept_bind);
    let mut conn = connection(&server, ConnectionOptions::new());
    let ids = MessageIdCounter::new();
    conn.connect_to_host(Some(DN), Some(b"secret"), &ids, TIMEOUT).unwrap();
    assert_eq!(conn.state(), ConnectionState::Connected);
    assert_eq!(conn.transport(), Some(Transport::Plain));
    assert_eq!(ids.current(), 2);
    assert!(!conn.bind_outcome().unwrap().is_anonymous());
    conn.close(Some(&ids));

    let received = server.finish();
    assert_eq!(received[0].id, 1);
    assert_eq!(
        bind_request(&received[0]),
        (DN, &BindAuth::Simple(b"secret".to_vec()))
    );
    assert!(received[0].controls.is_empty());
    assert_eq!(received[1].id, 2);
    assert_eq!(received[1].op, ProtocolOp::UnbindRequest);
}

#[test]
fn anonymous_connect_sends_nothing() {
    let server = MockServer::start(|stream| Peer::new(stream).drain());
    let mut conn = connection(&server, ConnectionOptions::new());
    let ids = MessageIdCounter::new();
    conn.connect_to_host(None, None, &ids, TIMEOUT).unwrap();
    assert_eq!(conn.state(), ConnectionState::Connected);
    assert!(conn.bind_outcome().unwrap().is_anonymous());
    assert_eq!(ids.current(), 1);
    conn.close(None);
    assert!(server.finish().is_empty());
}

#[test]
fn bind_without_password_sends_empty_credentials() {
    let server = MockServer::start(accept_bind);
    let mut conn = connection(&server, ConnectionOptions::new());
    let ids = MessageIdCounter::new();
    conn.connect_to_host(Some(""), None, &ids, TIMEOUT).unwrap();
    conn.close(None);
    let received = server.finish();
    assert_eq!(bind_request(&received[0]), ("", &BindAuth::Simple(vec![])));
}

#[test]
fn rejected_bind() {
    let server = MockServer::start(|stream| {
        let mut peer = Peer::new(stream);
        let bind = peer.recv().unwrap();
        let mut resp = bind_response(bind.id, 49, vec![]);
        if let ProtocolOp::BindResponse(ref mut r) = resp.op {
            r.result = ldap_result(49, "ou=People,dc=example,dc=com", "invalid credentials");
        }
        peer.send(resp);
        peer.drain()
    });
    let mut conn = connection(&server, ConnectionOptions::new());
    let ids = MessageIdCounter::new();
    let err = conn
        .connect_to_host(Some(DN), Some(b"wrong"), &ids, TIMEOUT)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BindRejected);
    assert_eq!(err.result_code(), ResultCode::INVALID_CREDENTIALS);
    assert_eq!(err.diagnostic(), Some("invalid credentials"));
    assert_eq!(err.matched_dn(), Some("ou=People,dc=example,dc=com"));
    assert_eq!(conn.state(), ConnectionState::Unconnected);

    let err = conn
        .connect_to_host(Some(DN), Some(b"secret"), &ids, TIMEOUT)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::State);
    assert!(server.finish().is_empty());
}

#[test]
fn password_policy_warning() {
    let server = MockServer::start(|stream| {
        let mut peer = Peer::new(stream);
        let bind = peer.recv().unwrap();
        let ctrl = PasswordPolicyResp {
            warning: Some(PasswordPolicyWarning::TimeBeforeExpiration(3600)),
            error: None,
        };
        peer.send(bind_response(bind.id, 0, vec![ctrl.into()]));
        let mut received = vec![bind];
        received.extend(peer.drain());
        received
    });
    let options = ConnectionOptions::new().set_use_password_policy_control(true);
    let mut conn = connection(&server, options);
    let ids = MessageIdCounter::new();
    conn.connect_to_host(Some(DN), Some(b"secret"), &ids, TIMEOUT).unwrap();
    let outcome = conn.bind_outcome().unwrap().clone();
    assert_eq!(
        outcome.signals,
        vec![AuthSignal::PasswordExpiring {
            seconds: 3600,
            display: "1 hours, 0 minutes, 0 seconds".into()
        }]
    );
    assert_eq!(outcome.controls.len(), 1);
    conn.close(None);

    let received = server.finish();
    let oids: Vec<_> = received[0].controls.iter().map(|c| c.ctype.as_str()).collect();
    assert_eq!(oids, vec![PasswordPolicyRequest::OID]);
}

#[test]
fn authz_id_from_response_control() {
    let server = MockServer::start(|stream| {
        let mut peer = Peer::new(stream);
        let bind = peer.recv().unwrap();
        let ctrl = AuthzIdResp {
            authz_id: format!("dn:{}", DN),
        };
        peer.send(bind_response(bind.id, 0, vec![ctrl.into()]));
        let mut received = vec![bind];
        received.extend(peer.drain());
        received
    });
    let options = ConnectionOptions::new().set_report_authz_id(true);
    let mut conn = connection(&server, options);
    let ids = MessageIdCounter::new();
    conn.connect_to_host(Some(DN), Some(b"secret"), &ids, TIMEOUT).unwrap();
    assert_eq!(conn.bind_outcome().unwrap().authz_id, Some(format!("dn:{}", DN)));
    assert_eq!(ids.current(), 2);
    conn.close(None);

    let received = server.finish();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].controls[0].ctype, AuthzIdRequest::OID);
}

#[test]
fn authz_id_falls_back_to_who_am_i() {
    let server = MockServer::start(|stream| {
        let mut peer = Peer::new(stream);
        let bind = peer.recv().unwrap();
        peer.send(bind_response(bind.id, 0, vec![]));
        let whoami = peer.recv().unwrap();
        let identity = format!("dn:{}", DN);
        peer.send(extended_response(
            whoami.id,
            ldap_result(0, "", ""),
            Some(identity.as_bytes()),
        ));
        let mut received = vec![bind, whoami];
        received.extend(peer.drain());
        received
    });
    let options = ConnectionOptions::new().set_report_authz_id(true);
    let mut conn = connection(&server, options);
    let ids = MessageIdCounter::new();
    conn.connect_to_host(Some(DN), Some(b"secret"), &ids, TIMEOUT).unwrap();
    assert_eq!(conn.bind_outcome().unwrap().authz_id, Some(format!("dn:{}", DN)));
    assert_eq!(ids.current(), 3);
    conn.close(None);

    let received = server.finish();
    assert_eq!(received[1].id, 2);
    match received[1].op {
        ProtocolOp::ExtendedRequest(ref req) => assert_eq!(req.name, WHOAMI_OID),
        ref op => panic!("expected Who Am I, got {:?}", op),
    }
}

#[test]
fn failed_who_am_i_is_not_fatal() {
    let server = MockServer::start(|stream| {
        let mut peer = Peer::new(stream);
        let bind = peer.recv().unwrap();
        peer.send(bind_response(bind.id, 0, vec![]));
        let whoami = peer.recv().unwrap();
        peer.send(extended_response(whoami.id, ldap_result(53, "", "not allowed"), None));
        peer.drain()
    });
    let options = ConnectionOptions::new().set_report_authz_id(true);
    let mut conn = connection(&server, options);
    let ids = MessageIdCounter::new();
    conn.connect_to_host(Some(DN), Some(b"secret"), &ids, TIMEOUT).unwrap();
    assert_eq!(conn.state(), ConnectionState::Connected);
    assert_eq!(conn.bind_outcome().unwrap().authz_id, None);
    conn.close(None);
    server.finish();
}

#[test]
fn double_close_sends_one_unbind() {
    let server = MockServer::start(accept_bind);
    let mut conn = connection(&server, ConnectionOptions::new());
    let ids = MessageIdCounter::new();
    conn.connect_to_host(Some(DN), Some(b"secret"), &ids, TIMEOUT).unwrap();
    conn.close(Some(&ids));
    conn.close(Some(&ids));
    assert_eq!(conn.state(), ConnectionState::Closed);
    assert_eq!(ids.current(), 3);

    let unbinds = server
        .finish()
        .into_iter()
        .filter(|m| m.op == ProtocolOp::UnbindRequest)
        .count();
    assert_eq!(unbinds, 1);
}

#[test]
fn refused_connection() {
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let mut conn = LdapConnection::new("127.0.0.1", port, ConnectionOptions::new()).unwrap();
    let err = conn
        .connect_to_host(Some(DN), Some(b"secret"), &MessageIdCounter::new(), TIMEOUT)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Connect);
    assert_eq!(err.result_code(), ResultCode::CONNECT_ERROR);
}

#[test]
fn server_closes_mid_response() {
    let server = MockServer::start(|stream| {
        let mut peer = Peer::new(stream);
        let bind = peer.recv().unwrap();
        let mut out = bytes::BytesMut::new();
        bind_response(bind.id, 0, vec![]).encode(&mut out);
        peer.send_raw(&out[..5]);
        vec![bind]
    });
    let mut conn = connection(&server, ConnectionOptions::new());
    let err = conn
        .connect_to_host(Some(DN), Some(b"secret"), &MessageIdCounter::new(), TIMEOUT)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ServerDisconnect);
    assert_eq!(err.result_code(), ResultCode::SERVER_DOWN);
    server.finish();
}

#[test]
fn garbage_response_is_a_connect_failure() {
    let server = MockServer::start(|stream| {
        let mut peer = Peer::new(stream);
        let bind = peer.recv().unwrap();
        peer.send_raw(&[0x04, 0x01, 0x00]);
        vec![bind]
    });
    let mut conn = connection(&server, ConnectionOptions::new());
    let err = conn
        .connect_to_host(Some(DN), Some(b"secret"), &MessageIdCounter::new(), TIMEOUT)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Decode);
    assert_eq!(err.result_code(), ResultCode::CONNECT_ERROR);
    server.finish();
}

#[test]
fn notice_of_disconnection_instead_of_bind_response() {
    let server = MockServer::start(|stream| {
        let mut peer = Peer::new(stream);
        let bind = peer.recv().unwrap();
        peer.send(Message::new(
            0,
            ProtocolOp::ExtendedResponse(ExtendedResponse {
                result: ldap_result(52, "", "server shutting down"),
                name: Some(NOTICE_OF_DISCONNECTION_OID.into()),
                value: None,
            }),
        ));
        vec![bind]
    });
    let mut conn = connection(&server, ConnectionOptions::new());
    let err = conn
        .connect_to_host(Some(DN), Some(b"secret"), &MessageIdCounter::new(), TIMEOUT)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ServerDisconnect);
    assert_eq!(err.result_code(), ResultCode::UNAVAILABLE);
    assert_eq!(err.diagnostic(), Some("server shutting down"));
    server.finish();
}

#[test]
fn sasl_plain() {
    let server = MockServer::start(accept_bind);
    let mut properties = SaslProperties::new();
    properties.insert("authid".into(), vec!["u:jdoe".into()]);
    let options = ConnectionOptions::new().set_sasl(SaslSelection::Named {
        mechanism: "plain".into(),
        properties,
    });
    let mut conn = connection(&server, options);
    let ids = MessageIdCounter::new();
    conn.connect_to_host(None, Some(b"secret"), &ids, TIMEOUT).unwrap();
    conn.close(None);

    let received = server.finish();
    assert_eq!(
        bind_request(&received[0]).1,
        &BindAuth::Sasl {
            mechanism: "PLAIN".into(),
            credentials: Some(b"\0u:jdoe\0secret".to_vec()),
        }
    );
}

#[test]
fn sasl_external_without_authzid_omits_credentials() {
    let server = MockServer::start(accept_bind);
    let options = ConnectionOptions::new().set_sasl(SaslSelection::External { authzid: None });
    let mut conn = connection(&server, options);
    conn.connect_to_host(None, None, &MessageIdCounter::new(), TIMEOUT).unwrap();
    conn.close(None);

    let received = server.finish();
    assert_eq!(
        bind_request(&received[0]),
        (
            "",
            &BindAuth::Sasl {
                mechanism: "EXTERNAL".into(),
                credentials: None,
            }
        )
    );
}

#[test]
fn sasl_external_carries_the_bind_dn() {
    let server = MockServer::start(accept_bind);
    let options = ConnectionOptions::new().set_sasl(SaslSelection::External {
        authzid: Some("dn:cn=proxy,dc=example,dc=com".into()),
    });
    let mut conn = connection(&server, options);
    conn.connect_to_host(Some(DN), None, &MessageIdCounter::new(), TIMEOUT).unwrap();
    conn.close(None);

    let received = server.finish();
    assert_eq!(
        bind_request(&received[0]),
        (
            DN,
            &BindAuth::Sasl {
                mechanism: "EXTERNAL".into(),
                credentials: Some(b"dn:cn=proxy,dc=example,dc=com".to_vec()),
            }
        )
    );
}

#[test]
fn unknown_sasl_mechanism_sends_nothing() {
    let server = MockServer::start(|stream| Peer::new(stream).drain());
    let options = ConnectionOptions::new().set_sasl(SaslSelection::Named {
        mechanism: "GSSAPI".into(),
        properties: SaslProperties::new(),
    });
    let mut conn = connection(&server, options);
    let err = conn
        .connect_to_host(None, None, &MessageIdCounter::new(), TIMEOUT)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AuthUnknown);
    assert_eq!(err.result_code(), ResultCode::AUTH_UNKNOWN);
    drop(conn);
    assert!(server.finish().is_empty());
}

/// Two-step mechanism: empty initial response, then an answer to the challenge.
struct Echo;

struct EchoSession;

impl SaslMechanism for Echo {
    fn name(&self) -> &str {
        "X-ECHO"
    }

    fn start(&self, _ctx: &SaslContext<'_>) -> ldapwire::result::Result<Box<dyn SaslSession>> {
        Ok(Box::new(EchoSession))
    }
}

impl SaslSession for EchoSession {
    fn initial_response(&mut self) -> ldapwire::result::Result<Option<Vec<u8>>> {
        Ok(None)
    }

    fn evaluate(&mut self, challenge: Option<&[u8]>) -> ldapwire::result::Result<Option<Vec<u8>>> {
        let mut answer = b"echo:".to_vec();
        answer.extend_from_slice(challenge.unwrap_or_default());
        Ok(Some(answer))
    }
}

#[test]
fn multi_step_sasl() {
    let server = MockServer::start(|stream| {
        let mut peer = Peer::new(stream);
        let first = peer.recv().unwrap();
        let mut resp = bind_response(first.id, 14, vec![]);
        if let ProtocolOp::BindResponse(ref mut r) = resp.op {
            r.server_sasl_creds = Some(b"nonce".to_vec());
        }
        peer.send(resp);
        let second = peer.recv().unwrap();
        peer.send(bind_response(second.id, 0, vec![]));
        let mut received = vec![first, second];
        received.extend(peer.drain());
        received
    });
    let mut mechanisms = SaslRegistry::new();
    mechanisms.register(Arc::new(Echo));
    let options = ConnectionOptions::new()
        .set_mechanisms(mechanisms)
        .set_sasl(SaslSelection::Named {
            mechanism: "x-echo".into(),
            properties: SaslProperties::new(),
        });
    let mut conn = connection(&server, options);
    let ids = MessageIdCounter::new();
    conn.connect_to_host(Some(DN), None, &ids, TIMEOUT).unwrap();
    assert_eq!(ids.current(), 3);
    conn.close(None);

    let received = server.finish();
    assert_eq!(
        bind_request(&received[0]),
        (
            DN,
            &BindAuth::Sasl {
                mechanism: "X-ECHO".into(),
                credentials: None,
            }
        )
    );
    assert_eq!(
        bind_request(&received[1]).1,
        &BindAuth::Sasl {
            mechanism: "X-ECHO".into(),
            credentials: Some(b"echo:nonce".to_vec()),
        }
    );
}

#[test]
fn messages_after_connect() {
    let server = MockServer::start(|stream| {
        let mut peer = Peer::new(stream);
        let bind = peer.recv().unwrap();
        peer.send(bind_response(bind.id, 0, vec![]));
        let req = peer.recv().unwrap();
        peer.send(extended_response(req.id, ldap_result(0, "", ""), Some(b"u:jdoe")));
        let mut received = vec![bind, req];
        received.extend(peer.drain());
        received
    });
    let mut conn = connection(&server, ConnectionOptions::new());
    let ids = MessageIdCounter::new();
    conn.connect_to_host(Some(DN), Some(b"secret"), &ids, TIMEOUT).unwrap();
    assert_eq!(conn.who_am_i().unwrap(), Some("u:jdoe".to_owned()));
    assert_eq!(ids.current(), 3);
    conn.close(Some(&ids));
    assert!(conn.read_message().is_err());
    assert_eq!(server.finish().len(), 3);
}
