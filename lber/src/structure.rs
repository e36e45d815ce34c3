use std::iter::Peekable;
use std::vec;

use crate::common::TagClass;
use crate::universal::Types;

use thiserror::Error;

/// Errors produced while decoding or walking a BER element.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("malformed BER element")]
    Malformed,

    #[error("element length {len} exceeds the limit of {limit} octets")]
    TooLarge { len: usize, limit: usize },

    #[error("indefinite length encoding is not permitted")]
    IndefiniteLength,

    #[error("elements nested deeper than {0} levels")]
    TooDeep(usize),

    #[error("expected {expected}, found {class:?} tag {id}")]
    UnexpectedTag {
        expected: &'static str,
        class: TagClass,
        id: u64,
    },

    #[error("expected {0} to be a {1} element")]
    WrongForm(&'static str, &'static str),

    #[error("missing {0}")]
    Missing(&'static str),

    #[error("integer value out of range")]
    IntegerOverflow,

    #[error("invalid UTF-8 in {0}")]
    Utf8(&'static str),

    #[error("invalid boolean encoding")]
    Boolean,
}

/// Generic BER element, either parsed from the wire or prepared for encoding.
#[derive(Clone, PartialEq, Debug, Eq)]
pub struct StructureTag {
    pub class: TagClass,
    pub id: u64,
    pub payload: PL,
}

/// Element payload.
#[derive(Clone, PartialEq, Debug, Eq)]
pub enum PL {
    /// Primitive contents octets.
    P(Vec<u8>),
    /// Constructed contents, already split into elements.
    C(Vec<StructureTag>),
}

impl StructureTag {
    pub fn primitive(class: TagClass, id: u64, contents: Vec<u8>) -> Self {
        StructureTag {
            class,
            id,
            payload: PL::P(contents),
        }
    }

    pub fn constructed(class: TagClass, id: u64, elements: Vec<StructureTag>) -> Self {
        StructureTag {
            class,
            id,
            payload: PL::C(elements),
        }
    }

    /// True if the element carries the given class and tag number.
    pub fn is(&self, class: TagClass, id: u64) -> bool {
        self.class == class && self.id == id
    }

    pub fn is_universal(&self, ty: Types) -> bool {
        self.is(TagClass::Universal, ty as u64)
    }

    /// Check the class and tag number, naming the element in the error if they differ.
    pub fn expect_tag(
        self,
        class: TagClass,
        id: u64,
        what: &'static str,
    ) -> Result<Self, DecodeError> {
        if self.is(class, id) {
            Ok(self)
        } else {
            Err(DecodeError::UnexpectedTag {
                expected: what,
                class: self.class,
                id: self.id,
            })
        }
    }

    fn expect_constructed(self) -> Option<Vec<StructureTag>> {
        match self.payload {
            PL::P(_) => None,
            PL::C(i) => Some(i),
        }
    }

    fn expect_primitive(self) -> Option<Vec<u8>> {
        match self.payload {
            PL::P(i) => Some(i),
            PL::C(_) => None,
        }
    }

    /// Contents octets of a primitive element.
    pub fn into_bytes(self, what: &'static str) -> Result<Vec<u8>, DecodeError> {
        self.expect_primitive()
            .ok_or(DecodeError::WrongForm(what, "primitive"))
    }

    /// Contents of a primitive element as UTF-8 text.
    pub fn into_string(self, what: &'static str) -> Result<String, DecodeError> {
        String::from_utf8(self.into_bytes(what)?).map_err(|_| DecodeError::Utf8(what))
    }

    /// Contents of a primitive element as a two's complement integer.
    pub fn into_int(self, what: &'static str) -> Result<i64, DecodeError> {
        let bytes = self.into_bytes(what)?;
        decode_int(&bytes)
    }

    pub fn into_bool(self, what: &'static str) -> Result<bool, DecodeError> {
        match self.into_bytes(what)?.as_slice() {
            [0] => Ok(false),
            [_] => Ok(true),
            _ => Err(DecodeError::Boolean),
        }
    }

    /// Child elements of a constructed element, wrapped for sequential access.
    pub fn into_elements(self, what: &'static str) -> Result<Elements, DecodeError> {
        let inner = self
            .expect_constructed()
            .ok_or(DecodeError::WrongForm(what, "constructed"))?;
        Ok(Elements {
            inner: inner.into_iter().peekable(),
        })
    }
}

/// Unsigned big-endian integer from at most eight significant octets.
pub fn decode_uint(bytes: &[u8]) -> Result<u64, DecodeError> {
    let significant = match bytes.iter().position(|&b| b != 0) {
        Some(pos) => &bytes[pos..],
        None => return Ok(0),
    };
    if significant.len() > 8 {
        return Err(DecodeError::IntegerOverflow);
    }
    Ok(significant
        .iter()
        .fold(0u64, |acc, &b| (acc << 8) | b as u64))
}

/// Two's complement integer of up to eight octets.
pub fn decode_int(bytes: &[u8]) -> Result<i64, DecodeError> {
    if bytes.is_empty() {
        return Err(DecodeError::Malformed);
    }
    if bytes.len() > 8 {
        return Err(DecodeError::IntegerOverflow);
    }
    let fill = if bytes[0] & 0x80 != 0 { 0xff } else { 0x00 };
    let mut buf = [fill; 8];
    buf[8 - bytes.len()..].copy_from_slice(bytes);
    Ok(i64::from_be_bytes(buf))
}

/// Sequential reader over the elements of a constructed value.
///
/// Optional components are taken with [`next_if`](#method.next_if), which
/// leaves the next element in place when its tag doesn't match.
#[derive(Debug)]
pub struct Elements {
    inner: Peekable<vec::IntoIter<StructureTag>>,
}

impl Elements {
    pub fn next_required(&mut self, what: &'static str) -> Result<StructureTag, DecodeError> {
        self.inner.next().ok_or(DecodeError::Missing(what))
    }

    pub fn next_if(&mut self, class: TagClass, id: u64) -> Option<StructureTag> {
        self.inner.next_if(|t| t.is(class, id))
    }

    pub fn peek(&mut self) -> Option<&StructureTag> {
        self.inner.peek()
    }

    pub fn is_empty(&mut self) -> bool {
        self.inner.peek().is_none()
    }
}

impl Iterator for Elements {
    type Item = StructureTag;

    fn next(&mut self) -> Option<StructureTag> {
        self.inner.next()
    }
}
