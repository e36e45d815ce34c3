//! BER encoding support.
//!
//! Lengths are always written in the definite form, using the short form
//! whenever the contents fit in 127 octets.
use crate::common::{TagClass, TagStructure};
use crate::structure::{StructureTag, PL};

use bytes::{BufMut, BytesMut};

/// BER-encode an element into the provided buffer.
pub fn encode_into(buf: &mut BytesMut, tag: &StructureTag) {
    buf.reserve(encoded_len(tag));
    put_element(buf, tag);
}

/// Total number of octets the encoded element occupies.
pub fn encoded_len(tag: &StructureTag) -> usize {
    let contents = contents_len(tag);
    identifier_len(tag.id) + length_len(contents) + contents
}

fn contents_len(tag: &StructureTag) -> usize {
    match tag.payload {
        PL::P(ref v) => v.len(),
        PL::C(ref tags) => tags.iter().map(encoded_len).sum(),
    }
}

fn identifier_len(id: u64) -> usize {
    if id < 0x1f {
        1
    } else {
        1 + base128_len(id)
    }
}

fn base128_len(mut n: u64) -> usize {
    let mut count = 1;
    while n >= 0x80 {
        n >>= 7;
        count += 1;
    }
    count
}

fn length_len(len: usize) -> usize {
    if len < 0x80 {
        1
    } else {
        1 + significant_octets(len)
    }
}

fn significant_octets(n: usize) -> usize {
    let bits = usize::BITS - n.leading_zeros();
    ((bits + 7) / 8).max(1) as usize
}

fn put_element(buf: &mut BytesMut, tag: &StructureTag) {
    let structure = match tag.payload {
        PL::P(_) => TagStructure::Primitive,
        PL::C(_) => TagStructure::Constructed,
    };
    put_identifier(buf, tag.class, structure, tag.id);
    put_length(buf, contents_len(tag));
    match tag.payload {
        PL::P(ref v) => buf.put_slice(v),
        PL::C(ref tags) => {
            for tag in tags {
                put_element(buf, tag);
            }
        }
    }
}

fn put_identifier(buf: &mut BytesMut, class: TagClass, structure: TagStructure, id: u64) {
    let leading = (class as u8) << 6 | (structure as u8) << 5;
    if id < 0x1f {
        buf.put_u8(leading | id as u8);
        return;
    }
    buf.put_u8(leading | 0x1f);
    let groups = base128_len(id);
    for n in (0..groups).rev() {
        let byte = ((id >> (7 * n)) & 0x7f) as u8;
        if n > 0 {
            buf.put_u8(byte | 0x80);
        } else {
            buf.put_u8(byte);
        }
    }
}

fn put_length(buf: &mut BytesMut, len: usize) {
    if len < 0x80 {
        buf.put_u8(len as u8);
        return;
    }
    let count = significant_octets(len);
    buf.put_u8(0x80 | count as u8);
    let repr = len.to_be_bytes();
    buf.put_slice(&repr[repr.len() - count..]);
}

#[cfg(test)]
mod tests {
    use bytes::BytesMut;

    use super::*;
    use crate::parse::parse_tag;
    use crate::structures::{ASNTag, Tag};

    fn encode(tag: Tag) -> BytesMut {
        let mut buf = BytesMut::new();
        encode_into(&mut buf, &tag.into_structure());
        buf
    }

    #[test]
    fn simple_bind_request() {
        let tag = Tag::sequence(vec![
            Tag::integer(1),
            Tag::application(
                0,
                vec![
                    Tag::integer(3),
                    Tag::octets("cn=root,dc=plabs"),
                    Tag::context_octets(0, "asdf"),
                ],
            ),
        ]);
        let expected = vec![
            0x30, 0x20, 0x02, 0x01, 0x01, 0x60, 0x1B, 0x02, 0x01, 0x03, 0x04, 0x10, 0x63, 0x6e,
            0x3d, 0x72, 0x6f, 0x6f, 0x74, 0x2c, 0x64, 0x63, 0x3d, 0x70, 0x6c, 0x61, 0x62, 0x73,
            0x80, 0x04, 0x61, 0x73, 0x64, 0x66,
        ];
        assert_eq!(encode(tag), expected);
    }

    #[test]
    fn long_form_length_is_minimal() {
        let buf = encode(Tag::octets(vec![0x5a; 300]));
        assert_eq!(&buf[..4], &[0x04, 0x82, 0x01, 0x2c]);
        assert_eq!(buf.len(), 304);
        let buf = encode(Tag::octets(vec![0x5a; 200]));
        assert_eq!(&buf[..3], &[0x04, 0x81, 0xc8]);
    }

    #[test]
    fn high_tag_number_parses_back() {
        let tag = StructureTag::primitive(TagClass::Context, 1000, vec![1, 2, 3]);
        let mut buf = BytesMut::new();
        encode_into(&mut buf, &tag);
        assert_eq!(buf.len(), encoded_len(&tag));
        assert_eq!(&buf[..3], &[0x9f, 0x87, 0x68]);
        let (_, parsed) = parse_tag(&buf).unwrap();
        assert_eq!(parsed, tag);
    }
}
