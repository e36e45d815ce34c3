use super::ASNTag;
use crate::common::TagClass;
use crate::structure::{StructureTag, PL};
use crate::universal::Types;

/// Integer value.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Integer {
    pub id: u64,
    pub class: TagClass,
    pub inner: i64,
}

/// Integer with the ENUMERATED tag.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Enumerated {
    pub id: u64,
    pub class: TagClass,
    pub inner: i64,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Boolean {
    pub id: u64,
    pub class: TagClass,
    pub inner: bool,
}

/// Empty value. Also the shape of the unbind request.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Null {
    pub id: u64,
    pub class: TagClass,
}

/// String of bytes.
#[derive(Clone, Debug, PartialEq)]
pub struct OctetString {
    pub id: u64,
    pub class: TagClass,
    pub inner: Vec<u8>,
}

/// Minimal two's complement contents octets.
fn signed_octets(n: i64) -> Vec<u8> {
    let repr = n.to_be_bytes();
    let mut start = 0;
    // a leading octet is redundant if it only repeats the sign of the next one
    while start < repr.len() - 1 {
        let (lead, next) = (repr[start], repr[start + 1]);
        if (lead == 0x00 && next & 0x80 == 0) || (lead == 0xff && next & 0x80 != 0) {
            start += 1;
        } else {
            break;
        }
    }
    repr[start..].to_vec()
}

impl ASNTag for Integer {
    fn into_structure(self) -> StructureTag {
        StructureTag::primitive(self.class, self.id, signed_octets(self.inner))
    }
}

impl ASNTag for Enumerated {
    fn into_structure(self) -> StructureTag {
        StructureTag::primitive(self.class, self.id, signed_octets(self.inner))
    }
}

impl ASNTag for Boolean {
    fn into_structure(self) -> StructureTag {
        StructureTag::primitive(self.class, self.id, vec![if self.inner { 0xff } else { 0x00 }])
    }
}

impl ASNTag for Null {
    fn into_structure(self) -> StructureTag {
        StructureTag {
            id: self.id,
            class: self.class,
            payload: PL::P(Vec::new()),
        }
    }
}

impl ASNTag for OctetString {
    fn into_structure(self) -> StructureTag {
        StructureTag {
            id: self.id,
            class: self.class,
            payload: PL::P(self.inner),
        }
    }
}

impl Default for Integer {
    fn default() -> Self {
        Integer {
            id: Types::Integer as u64,
            class: TagClass::Universal,
            inner: 0,
        }
    }
}

impl Default for Enumerated {
    fn default() -> Self {
        Enumerated {
            id: Types::Enumerated as u64,
            class: TagClass::Universal,
            inner: 0,
        }
    }
}

impl Default for Boolean {
    fn default() -> Self {
        Boolean {
            id: Types::Boolean as u64,
            class: TagClass::Universal,
            inner: false,
        }
    }
}

impl Default for Null {
    fn default() -> Self {
        Null {
            id: Types::Null as u64,
            class: TagClass::Universal,
        }
    }
}

impl Default for OctetString {
    fn default() -> Self {
        OctetString {
            id: Types::OctetString as u64,
            class: TagClass::Universal,
            inner: Vec::new(),
        }
    }
}
