//! Typed builders for the ASN.1 values LDAP messages are made of.
//!
//! Each builder carries its own class and tag number, defaulting to the
//! universal ones, so implicitly tagged components are built by overriding
//! `id` and `class`. The helper constructors on [`Tag`] cover the shapes
//! that recur in LDAP PDUs.
use crate::common::TagClass;
use crate::structure::StructureTag;

mod constructed;
mod primitive;

pub use self::constructed::Sequence;
pub use self::primitive::{Boolean, Enumerated, Integer, Null, OctetString};

/// Conversion of a builder into a generic, encodable element.
pub trait ASNTag {
    fn into_structure(self) -> StructureTag;
}

/// Set of value builders used by LDAP.
#[derive(Clone, Debug, PartialEq)]
pub enum Tag {
    Integer(Integer),
    Enumerated(Enumerated),
    Sequence(Sequence),
    OctetString(OctetString),
    Boolean(Boolean),
    Null(Null),
    /// Already assembled element, passed through unchanged.
    StructureTag(StructureTag),
}

impl ASNTag for Tag {
    fn into_structure(self) -> StructureTag {
        match self {
            Tag::Integer(i) => i.into_structure(),
            Tag::Enumerated(i) => i.into_structure(),
            Tag::Sequence(i) => i.into_structure(),
            Tag::OctetString(i) => i.into_structure(),
            Tag::Boolean(i) => i.into_structure(),
            Tag::Null(i) => i.into_structure(),
            Tag::StructureTag(s) => s,
        }
    }
}

impl Tag {
    pub fn integer(inner: i64) -> Tag {
        Tag::Integer(Integer {
            inner,
            ..Default::default()
        })
    }

    pub fn enumerated(inner: i64) -> Tag {
        Tag::Enumerated(Enumerated {
            inner,
            ..Default::default()
        })
    }

    pub fn boolean(inner: bool) -> Tag {
        Tag::Boolean(Boolean {
            inner,
            ..Default::default()
        })
    }

    pub fn octets(inner: impl Into<Vec<u8>>) -> Tag {
        Tag::OctetString(OctetString {
            inner: inner.into(),
            ..Default::default()
        })
    }

    /// Implicitly tagged octet string, `[id] OCTET STRING`.
    pub fn context_octets(id: u64, inner: impl Into<Vec<u8>>) -> Tag {
        Tag::OctetString(OctetString {
            id,
            class: TagClass::Context,
            inner: inner.into(),
        })
    }

    pub fn sequence(inner: Vec<Tag>) -> Tag {
        Tag::Sequence(Sequence {
            inner,
            ..Default::default()
        })
    }

    /// Constructed `[APPLICATION id]` value, the shape of most protocol ops.
    pub fn application(id: u64, inner: Vec<Tag>) -> Tag {
        Tag::Sequence(Sequence {
            id,
            class: TagClass::Application,
            inner,
        })
    }

    /// Constructed `[id]` value.
    pub fn context(id: u64, inner: Vec<Tag>) -> Tag {
        Tag::Sequence(Sequence {
            id,
            class: TagClass::Context,
            inner,
        })
    }
}
