//! Result codes, operation results, and the error type.
//!
//! Every failure this library reports, whether it originates in name
//! resolution, the TLS layer, BER decoding, or a server refusing a bind, is an
//! [`LdapConnectionError`]. Callers branch on its [`ErrorKind`] or on the
//! numeric [`ResultCode`] it carries, which is either the code the server sent
//! or one of the client-side codes (81 and up) assigned locally.

use std::error::Error;
use std::fmt;
use std::io;
use std::result::Result as StdResult;

use crate::controls::RawControl;

use lber::DecodeError;
use thiserror::Error;

/// Type alias for the standard `Result` with the fixed `LdapConnectionError` error part.
pub type Result<T> = std::result::Result<T, LdapConnectionError>;

/// Numeric LDAP result code.
///
/// Codes below 81 come from the server. Codes 81 and above are assigned by the client to
/// failures detected locally.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResultCode(pub u32);

impl ResultCode {
    pub const SUCCESS: ResultCode = ResultCode(0);
    pub const OPERATIONS_ERROR: ResultCode = ResultCode(1);
    pub const PROTOCOL_ERROR: ResultCode = ResultCode(2);
    pub const AUTH_METHOD_NOT_SUPPORTED: ResultCode = ResultCode(7);
    pub const SASL_BIND_IN_PROGRESS: ResultCode = ResultCode(14);
    pub const INVALID_CREDENTIALS: ResultCode = ResultCode(49);
    pub const UNAVAILABLE: ResultCode = ResultCode(52);
    pub const UNWILLING_TO_PERFORM: ResultCode = ResultCode(53);
    pub const OTHER: ResultCode = ResultCode(80);

    pub const SERVER_DOWN: ResultCode = ResultCode(81);
    pub const LOCAL_ERROR: ResultCode = ResultCode(82);
    pub const ENCODING_ERROR: ResultCode = ResultCode(83);
    pub const DECODING_ERROR: ResultCode = ResultCode(84);
    pub const TIMEOUT: ResultCode = ResultCode(85);
    pub const AUTH_UNKNOWN: ResultCode = ResultCode(86);
    pub const FILTER_ERROR: ResultCode = ResultCode(87);
    pub const USER_CANCELLED: ResultCode = ResultCode(88);
    pub const PARAM_ERROR: ResultCode = ResultCode(89);
    pub const NO_MEMORY: ResultCode = ResultCode(90);
    pub const CONNECT_ERROR: ResultCode = ResultCode(91);
    pub const NOT_SUPPORTED: ResultCode = ResultCode(92);
    pub const CONTROL_NOT_FOUND: ResultCode = ResultCode(93);
    pub const NO_RESULTS_RETURNED: ResultCode = ResultCode(94);
    pub const UNEXPECTED_RESULTS_RETURNED: ResultCode = ResultCode(95);
    pub const CLIENT_LOOP: ResultCode = ResultCode(96);

    /// True for codes assigned by the client rather than received from a server.
    pub fn is_client_side(self) -> bool {
        (81..=97).contains(&self.0)
    }

    /// Symbolic name of the code, as used in RFC 4511 and the LDAP C API.
    pub fn name(self) -> &'static str {
        match self.0 {
            0 => "success",
            1 => "operationsError",
            2 => "protocolError",
            3 => "timeLimitExceeded",
            4 => "sizeLimitExceeded",
            5 => "compareFalse",
            6 => "compareTrue",
            7 => "authMethodNotSupported",
            8 => "strongerAuthRequired",
            10 => "referral",
            11 => "adminLimitExceeded",
            12 => "unavailableCriticalExtension",
            13 => "confidentialityRequired",
            14 => "saslBindInProgress",
            16 => "noSuchAttribute",
            17 => "undefinedAttributeType",
            18 => "inappropriateMatching",
            19 => "constraintViolation",
            20 => "attributeOrValueExists",
            21 => "invalidAttributeSyntax",
            32 => "noSuchObject",
            33 => "aliasProblem",
            34 => "invalidDNSyntax",
            36 => "aliasDereferencingProblem",
            48 => "inappropriateAuthentication",
            49 => "invalidCredentials",
            50 => "insufficientAccessRights",
            51 => "busy",
            52 => "unavailable",
            53 => "unwillingToPerform",
            54 => "loopDetect",
            64 => "namingViolation",
            65 => "objectClassViolation",
            66 => "notAllowedOnNonLeaf",
            67 => "notAllowedOnRDN",
            68 => "entryAlreadyExists",
            69 => "objectClassModsProhibited",
            71 => "affectsMultipleDSAs",
            80 => "other",
            81 => "serverDown",
            82 => "localError",
            83 => "encodingError",
            84 => "decodingError",
            85 => "timeout",
            86 => "authUnknown",
            87 => "filterError",
            88 => "userCancelled",
            89 => "paramError",
            90 => "noMemory",
            91 => "connectError",
            92 => "notSupported",
            93 => "controlNotFound",
            94 => "noResultsReturned",
            95 => "unexpectedResultsReturned",
            96 => "clientLoop",
            97 => "referralLimitExceeded",
            118 => "canceled",
            119 => "noSuchOperation",
            120 => "tooLate",
            121 => "cannotCancel",
            122 => "assertionFailed",
            123 => "authorizationDenied",
            _ => "unknown",
        }
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} ({})", self.0, self.name())
    }
}

/// Reason for a failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Name resolution failed, or no resolved address accepted a connection.
    Connect,
    /// The TLS handshake with the server failed.
    TlsHandshake,
    /// Key or trust material could not be loaded.
    TlsConfig,
    /// Malformed protocol data from the peer.
    Decode,
    /// Transport failure in the middle of an exchange.
    Io,
    /// The server refused the bind.
    BindRejected,
    /// The server refused the StartTLS extended operation.
    StartTlsRejected,
    /// The server closed the connection or sent a notice of disconnection.
    ServerDisconnect,
    /// A response of the wrong type, or for the wrong message ID.
    UnexpectedResponse,
    /// The server returned a non-success result for some other operation.
    OperationFailed,
    /// Invalid caller-supplied configuration or arguments.
    Param,
    /// Unknown SASL mechanism.
    AuthUnknown,
    Timeout,
    /// The operation isn't valid in the connection's current state.
    State,
}

fn diagnostic_suffix(diagnostic: &Option<String>) -> String {
    match diagnostic {
        Some(text) => format!(", diagnostic: \"{}\"", text),
        None => String::new(),
    }
}

/// The single error type of the library.
///
/// Once returned from a connection operation, the connection must be considered
/// unusable and closed.
#[derive(Debug, Error)]
#[error("{message} (result code {result_code}{})", diagnostic_suffix(.diagnostic))]
pub struct LdapConnectionError {
    kind: ErrorKind,
    result_code: ResultCode,
    message: String,
    diagnostic: Option<String>,
    matched_dn: Option<String>,
    #[source]
    source: Option<Box<dyn Error + Send + Sync>>,
}

impl LdapConnectionError {
    pub fn new(kind: ErrorKind, result_code: ResultCode, message: impl Into<String>) -> Self {
        LdapConnectionError {
            kind,
            result_code,
            message: message.into(),
            diagnostic: None,
            matched_dn: None,
            source: None,
        }
    }

    /// Build an error from a non-success server result, keeping its code,
    /// diagnostic message and matched DN.
    pub fn from_result(kind: ErrorKind, message: impl Into<String>, result: &LdapResult) -> Self {
        let mut err = Self::new(kind, ResultCode(result.rc), message);
        if !result.text.is_empty() {
            err.diagnostic = Some(result.text.clone());
        }
        if !result.matched.is_empty() {
            err.matched_dn = Some(result.matched.clone());
        }
        err
    }

    pub fn with_source(mut self, source: impl Into<Box<dyn Error + Send + Sync>>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub(crate) fn connect(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Connect, ResultCode::CONNECT_ERROR, message)
    }

    pub(crate) fn tls_config(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TlsConfig, ResultCode::LOCAL_ERROR, message)
    }

    pub(crate) fn param(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Param, ResultCode::PARAM_ERROR, message)
    }

    pub(crate) fn state(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::State, ResultCode::LOCAL_ERROR, message)
    }

    pub(crate) fn unexpected(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::UnexpectedResponse, ResultCode::LOCAL_ERROR, message)
    }

    pub(crate) fn server_down(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ServerDisconnect, ResultCode::SERVER_DOWN, message)
    }

    pub(crate) fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, ResultCode::TIMEOUT, message)
    }

    /// Transport and decoding failures during connection setup all carry the
    /// connect-error code, so that callers see one code for "could not connect".
    pub(crate) fn into_connect_failure(mut self) -> Self {
        if matches!(self.kind, ErrorKind::Io | ErrorKind::Decode) {
            self.result_code = ResultCode::CONNECT_ERROR;
        }
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn result_code(&self) -> ResultCode {
        self.result_code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Diagnostic message supplied by the server, if any.
    pub fn diagnostic(&self) -> Option<&str> {
        self.diagnostic.as_deref()
    }

    /// Matched DN supplied by the server, if any.
    pub fn matched_dn(&self) -> Option<&str> {
        self.matched_dn.as_deref()
    }
}

impl From<io::Error> for LdapConnectionError {
    fn from(e: io::Error) -> Self {
        let (kind, code) = match e.kind() {
            io::ErrorKind::TimedOut => (ErrorKind::Timeout, ResultCode::TIMEOUT),
            _ => (ErrorKind::Io, ResultCode::SERVER_DOWN),
        };
        LdapConnectionError::new(kind, code, format!("I/O error: {}", e)).with_source(e)
    }
}

impl From<DecodeError> for LdapConnectionError {
    fn from(e: DecodeError) -> Self {
        LdapConnectionError::new(
            ErrorKind::Decode,
            ResultCode::DECODING_ERROR,
            format!("cannot decode message: {}", e),
        )
        .with_source(e)
    }
}

/// Common components of an LDAP operation result.
///
/// The struct mirrors the `LDAPResult` of the protocol. Absent referrals and
/// controls are both represented by empty vectors.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LdapResult {
    /// Result code.
    pub rc: u32,
    /// Matched component DN, where applicable.
    pub matched: String,
    /// Additional diagnostic text.
    pub text: String,
    /// Referrals.
    pub refs: Vec<String>,
    /// Response controls of the message which carried the result.
    pub ctrls: Vec<RawControl>,
}

impl Error for LdapResult {}

impl fmt::Display for LdapResult {
    fn fmt(&self, f: &mut fmt::Formatter) -> StdResult<(), fmt::Error> {
        write!(
            f,
            "rc={} ({}), dn: \"{}\", text: \"{}\"",
            self.rc,
            ResultCode(self.rc).name(),
            self.matched,
            self.text
        )
    }
}

impl LdapResult {
    pub fn code(&self) -> ResultCode {
        ResultCode(self.rc)
    }

    /// If the result code is zero, return the instance itself wrapped
    /// in `Ok()`, otherwise convert it into an `OperationFailed` error.
    pub fn success(self) -> Result<Self> {
        if self.rc == 0 {
            Ok(self)
        } else {
            Err(LdapConnectionError::from_result(
                ErrorKind::OperationFailed,
                format!("operation failed: {}", self),
                &self,
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rejected() -> LdapResult {
        LdapResult {
            rc: 49,
            matched: "dc=example,dc=com".into(),
            text: "bad password".into(),
            refs: vec![],
            ctrls: vec![],
        }
    }

    #[test]
    fn display_names_the_code() {
        assert_eq!(
            rejected().to_string(),
            "rc=49 (invalidCredentials), dn: \"dc=example,dc=com\", text: \"bad password\""
        );
        assert_eq!(ResultCode::CONNECT_ERROR.to_string(), "91 (connectError)");
        assert!(ResultCode::CONNECT_ERROR.is_client_side());
        assert!(!ResultCode::INVALID_CREDENTIALS.is_client_side());
    }

    #[test]
    fn error_from_result_keeps_server_details() {
        let err = LdapConnectionError::from_result(ErrorKind::BindRejected, "bind failed", &rejected());
        assert_eq!(err.kind(), ErrorKind::BindRejected);
        assert_eq!(err.result_code(), ResultCode::INVALID_CREDENTIALS);
        assert_eq!(err.diagnostic(), Some("bad password"));
        assert_eq!(err.matched_dn(), Some("dc=example,dc=com"));
        assert_eq!(
            err.to_string(),
            "bind failed (result code 49 (invalidCredentials), diagnostic: \"bad password\")"
        );
    }

    #[test]
    fn empty_server_fields_are_absent() {
        let mut res = rejected();
        res.text.clear();
        res.matched.clear();
        let err = res.success().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OperationFailed);
        assert_eq!(err.diagnostic(), None);
        assert_eq!(err.matched_dn(), None);
    }

    #[test]
    fn io_errors_map_to_client_codes() {
        let err = LdapConnectionError::from(io::Error::new(io::ErrorKind::TimedOut, "slow"));
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert_eq!(err.result_code(), ResultCode::TIMEOUT);
        let err = LdapConnectionError::from(io::Error::from(io::ErrorKind::BrokenPipe));
        assert_eq!(err.result_code(), ResultCode::SERVER_DOWN);
        let err = err.into_connect_failure();
        assert_eq!(err.kind(), ErrorKind::Io);
        assert_eq!(err.result_code(), ResultCode::CONNECT_ERROR);
        assert!(err.source().is_some());
    }
}
