//! Basic Encoding Rules (BER) support for LDAP message framing.
//!
//! LDAP messages are self-delimiting BER elements. This crate provides the
//! pieces a client needs to put them on the wire and take them off again:
//!
//! * a streaming decoder ([`Parser`]) which tells a complete element apart
//!   from one still waiting for input, and refuses indefinite lengths and
//!   oversized elements before buffering them;
//! * a generic element tree ([`StructureTag`]) with fallible accessors, so
//!   that protocol code can walk untrusted input without panicking;
//! * an encoder ([`write::encode_into`]) writing straight into a `BytesMut`;
//! * typed builders ([`structures::Tag`]) for the handful of ASN.1 types LDAP
//!   messages are made of.

pub mod common;
pub mod parse;
pub mod structure;
pub mod structures;
pub mod universal;
pub mod write;

pub use parse::{parse_complete, Parser};
pub use structure::{DecodeError, Elements, StructureTag, PL};
