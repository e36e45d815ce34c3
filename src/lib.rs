//! LDAP client connection establishment using the Tokio stack.
//!
//! The library covers what happens between "I want to talk to this directory
//! server" and "I have an authenticated connection": opening the TCP
//! connection, securing it with TLS (directly, or with StartTLS on the same
//! socket), binding, and making sense of the controls the server sends back
//! with the bind response.
//!
//! ## Summary
//!
//! [`LdapConnection`](struct.LdapConnection.html) is the blocking starting
//! point. It is configured with [`ConnectionOptions`](struct.ConnectionOptions.html)
//! and, for TLS, a [`TlsContext`](tls/struct.TlsContext.html), which can be shared
//! by any number of connections. [`Ldap`](struct.Ldap.html) is the asynchronous
//! request/response handle used internally, and messages themselves are modelled
//! by [`Message`](struct.Message.html).
//!
//! Every failure is reported as a single error type,
//! [`LdapConnectionError`](result/struct.LdapConnectionError.html), carrying a
//! discriminated reason and an LDAP result code.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use ldapwire::{ConnectionOptions, LdapConnection, MessageIdCounter};
//! use ldapwire::result::Result;
//! use ldapwire::tls::TlsContext;
//!
//! fn main() -> Result<()> {
//!     let tls = TlsContext::builder()
//!         .truststore("/etc/ldap/ca.pem", None)
//!         .build()?;
//!     let options = ConnectionOptions::new()
//!         .set_report_authz_id(true)
//!         .set_use_password_policy_control(true);
//!     let mut conn = LdapConnection::from_url("ldap+starttls://ldap.example.com", Some(tls), options)?;
//!     let ids = MessageIdCounter::new();
//!     conn.connect_to_host(
//!         Some("uid=jdoe,ou=People,dc=example,dc=com"),
//!         Some(b"secret"),
//!         &ids,
//!         Duration::from_secs(10),
//!     )?;
//!     if let Some(outcome) = conn.bind_outcome() {
//!         for signal in &outcome.signals {
//!             println!("{}", signal);
//!         }
//!     }
//!     conn.close(Some(&ids));
//!     Ok(())
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]

#[doc(hidden)]
#[macro_use]
pub extern crate log;

/// Type alias for the LDAP message ID.
pub type RequestId = i32;

mod bind;
mod conn;
pub mod controls {
    //! Control construction and parsing.
    //!
    //! A request control is created by instantiating its structure and converting
    //! it into a [`RawControl`](struct.RawControl.html) with `into()`. A response
    //! control arrives as a `RawControl`; if its OID is recognized,
    //! [`control_type()`](struct.RawControl.html#method.control_type) says which
    //! one it is, and it can be decoded by calling type-qualified
    //! [`parse()`](struct.RawControl.html#method.parse). A third-party control must
    //! implement the [`ControlParser`](trait.ControlParser.html) trait to support
    //! this interface.
    pub use crate::controls_impl::{AuthzIdRequest, AuthzIdResp};
    pub use crate::controls_impl::{ControlParser, ControlType, RawControl};
    pub use crate::controls_impl::{PasswordExpired, PasswordExpiring};
    pub use crate::controls_impl::{
        PasswordPolicyError, PasswordPolicyRequest, PasswordPolicyResp, PasswordPolicyWarning,
    };
}
mod controls_impl;
mod exop_impl;
pub mod exop {
    //! Extended operation construction and parsing.
    //!
    //! A generic exop is represented by [`Exop`](struct.Exop.html). A request
    //! struct implements the `From` conversion of itself into `Exop`, and a
    //! response struct implements the [`ExopParser`](trait.ExopParser.html) trait.
    pub use crate::exop_impl::{Exop, ExopParser, StartTLS, WhoAmI, WhoAmIResp};
    pub use crate::exop_impl::{NoticeOfDisconnection, NOTICE_OF_DISCONNECTION_OID};
    pub use crate::exop_impl::{STARTTLS_OID, WHOAMI_OID};
}
mod ldap;
mod message;
mod options;
pub mod protocol;
pub mod result;
pub mod sasl;
pub mod signals;
mod sync;
pub mod tls;
mod util;

pub use bind::BindOutcome;
pub use conn::{ConnType, Transport};
pub use ldap::{Ldap, MessageIdCounter};
pub use message::{
    BindAuth, BindRequest, BindResponse, ExtendedRequest, ExtendedResponse, Message, ProtocolOp,
};
pub use options::{ConnectionOptions, LdapTarget, Security, TlsMode};
pub use result::{ErrorKind, LdapConnectionError, LdapResult, ResultCode};
pub use signals::AuthSignal;
pub use sync::{ConnectionState, LdapConnection};
pub use util::seconds_to_time_string;
