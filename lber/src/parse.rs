//! Streaming BER decoder.
//!
//! The nom parsers here are streaming parsers: running out of input yields
//! `Incomplete`, never a half-built element. Elements nested inside a
//! constructed value are parsed from contents which are already fully
//! buffered, so running short there is reported as a failure.

use crate::common::{TagClass, TagStructure};
use crate::structure::{DecodeError, StructureTag, PL};

use nom::bytes::streaming::take;
use nom::error::{Error, ErrorKind, ParseError};
use nom::number::streaming::be_u8;
use nom::IResult;

/// Default upper bound for the contents length of a top-level element.
pub const DEFAULT_MAX_ELEMENT_LEN: usize = 16 * 1024 * 1024;

/// Maximum nesting depth of constructed elements.
pub const MAX_DEPTH: usize = 64;

type Header = (TagClass, TagStructure, u64, usize);

fn fail<T>(i: &[u8], kind: ErrorKind) -> IResult<&[u8], T> {
    Err(nom::Err::Failure(Error::from_error_kind(i, kind)))
}

fn parse_identifier(i: &[u8]) -> IResult<&[u8], (TagClass, TagStructure, u64)> {
    let (mut i, first) = be_u8(i)?;
    let class = match TagClass::from_u8(first >> 6) {
        Some(class) => class,
        None => return fail(i, ErrorKind::Tag),
    };
    let structure = if first & 0x20 != 0 {
        TagStructure::Constructed
    } else {
        TagStructure::Primitive
    };
    let mut id = u64::from(first & 0x1f);
    if id == 0x1f {
        // high tag number form, base-128 with continuation bits
        id = 0;
        loop {
            let (j, b) = be_u8(i)?;
            i = j;
            if id > u64::MAX >> 7 {
                return fail(i, ErrorKind::TooLarge);
            }
            id = (id << 7) | u64::from(b & 0x7f);
            if b & 0x80 == 0 {
                break;
            }
        }
    }
    Ok((i, (class, structure, id)))
}

fn parse_length(i: &[u8]) -> IResult<&[u8], usize> {
    let (i, first) = be_u8(i)?;
    match first {
        0..=0x7f => Ok((i, first as usize)),
        0x80 => fail(i, ErrorKind::Verify),
        _ => {
            let count = (first & 0x7f) as usize;
            if count > std::mem::size_of::<usize>() {
                return fail(i, ErrorKind::TooLarge);
            }
            let (i, octets) = take(count)(i)?;
            let (_, len) = parse_uint(octets)?;
            match usize::try_from(len) {
                Ok(len) => Ok((i, len)),
                Err(_) => fail(i, ErrorKind::TooLarge),
            }
        }
    }
}

/// Parse the identifier and length octets of an element.
pub fn parse_header(i: &[u8]) -> IResult<&[u8], Header> {
    let (i, (class, structure, id)) = parse_identifier(i)?;
    let (i, len) = parse_length(i)?;
    Ok((i, (class, structure, id, len)))
}

/// Extract an unsigned integer value from BER contents octets.
pub fn parse_uint(i: &[u8]) -> IResult<&[u8], u64> {
    match crate::structure::decode_uint(i) {
        Ok(n) => Ok((&i[i.len()..], n)),
        Err(_) => fail(i, ErrorKind::TooLarge),
    }
}

/// Parse one complete BER element.
pub fn parse_tag(i: &[u8]) -> IResult<&[u8], StructureTag> {
    parse_tag_at(i, 0)
}

fn parse_tag_at(i: &[u8], depth: usize) -> IResult<&[u8], StructureTag> {
    if depth > MAX_DEPTH {
        return fail(i, ErrorKind::Count);
    }
    let (i, (class, structure, id, len)) = parse_header(i)?;
    let (rest, contents) = take(len)(i)?;
    let payload = match structure {
        TagStructure::Primitive => PL::P(contents.to_vec()),
        TagStructure::Constructed => {
            let mut contents = contents;
            let mut elements = Vec::new();
            while !contents.is_empty() {
                let (j, element) = parse_tag_at(contents, depth + 1).map_err(nested)?;
                contents = j;
                elements.push(element);
            }
            PL::C(elements)
        }
    };
    Ok((rest, StructureTag { class, id, payload }))
}

fn nested(e: nom::Err<Error<&[u8]>>) -> nom::Err<Error<&[u8]>> {
    match e {
        nom::Err::Incomplete(_) => nom::Err::Failure(Error::new(&[][..], ErrorKind::Eof)),
        e => e,
    }
}

fn decode_error(e: nom::Err<Error<&[u8]>>) -> DecodeError {
    match e {
        nom::Err::Error(e) | nom::Err::Failure(e) => match e.code {
            ErrorKind::Verify => DecodeError::IndefiniteLength,
            ErrorKind::Count => DecodeError::TooDeep(MAX_DEPTH),
            _ => DecodeError::Malformed,
        },
        nom::Err::Incomplete(_) => DecodeError::Malformed,
    }
}

/// Incremental decoder for top-level elements.
///
/// The length of each element is checked against the limit as soon as its
/// header is available, before the contents are buffered.
#[derive(Clone, Debug)]
pub struct Parser {
    max_len: usize,
}

impl Parser {
    pub fn new() -> Self {
        Parser {
            max_len: DEFAULT_MAX_ELEMENT_LEN,
        }
    }

    pub fn with_limit(max_len: usize) -> Self {
        Parser { max_len }
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }

    /// Try to decode one element from the start of `input`.
    ///
    /// Returns `Ok(None)` if more input is needed, otherwise the element and
    /// the number of octets it occupied.
    pub fn parse(&mut self, input: &[u8]) -> Result<Option<(StructureTag, usize)>, DecodeError> {
        if input.is_empty() {
            return Ok(None);
        }
        let (rest, (_, _, _, len)) = match parse_header(input) {
            Ok(header) => header,
            Err(nom::Err::Incomplete(_)) => return Ok(None),
            Err(e) => return Err(decode_error(e)),
        };
        if len > self.max_len {
            return Err(DecodeError::TooLarge {
                len,
                limit: self.max_len,
            });
        }
        if rest.len() < len {
            return Ok(None);
        }
        match parse_tag(input) {
            Ok((rest, tag)) => Ok(Some((tag, input.len() - rest.len()))),
            Err(nom::Err::Incomplete(_)) => Ok(None),
            Err(e) => Err(decode_error(e)),
        }
    }
}

impl Default for Parser {
    fn default() -> Self {
        Self::new()
    }
}

/// Decode a value which must consist of exactly one complete element, such as
/// the contents of a control value or an extended operation value.
pub fn parse_complete(input: &[u8]) -> Result<StructureTag, DecodeError> {
    match Parser::with_limit(input.len()).parse(input)? {
        Some((tag, used)) if used == input.len() => Ok(tag),
        _ => Err(DecodeError::Malformed),
    }
}
