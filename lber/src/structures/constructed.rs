use super::{ASNTag, Tag};
use crate::common::TagClass;
use crate::structure::{StructureTag, PL};
use crate::universal::Types;

/// Constructed value; a SEQUENCE unless retagged.
#[derive(Clone, Debug, PartialEq)]
pub struct Sequence {
    pub id: u64,
    pub class: TagClass,
    pub inner: Vec<Tag>,
}

impl ASNTag for Sequence {
    fn into_structure(self) -> StructureTag {
        StructureTag {
            id: self.id,
            class: self.class,
            payload: PL::C(self.inner.into_iter().map(ASNTag::into_structure).collect()),
        }
    }
}

impl Default for Sequence {
    fn default() -> Self {
        Sequence {
            id: Types::Sequence as u64,
            class: TagClass::Universal,
            inner: Vec::new(),
        }
    }
}
