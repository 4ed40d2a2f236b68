//! EBML variable-length integers and element headers.

use std::io;

use crate::error::{Error, Result};
use crate::input::{ExtractorInput, InputExt};
use crate::util::cursor::ByteCursor;

pub(crate) mod id {
    pub const EBML: u32 = 0x1A45_DFA3;
    pub const DOC_TYPE: u32 = 0x4282;
    pub const SEGMENT: u32 = 0x1853_8067;
    pub const SEEK_HEAD: u32 = 0x114D_9B74;
    pub const SEEK: u32 = 0x4DBB;
    pub const SEEK_ID: u32 = 0x53AB;
    pub const SEEK_POSITION: u32 = 0x53AC;
    pub const INFO: u32 = 0x1549_A966;
    pub const TIMECODE_SCALE: u32 = 0x2A_D7B1;
    pub const DURATION: u32 = 0x4489;
    pub const CLUSTER: u32 = 0x1F43_B675;
    pub const TIMECODE: u32 = 0xE7;
    pub const SIMPLE_BLOCK: u32 = 0xA3;
    pub const BLOCK_GROUP: u32 = 0xA0;
    pub const BLOCK: u32 = 0xA1;
    pub const BLOCK_DURATION: u32 = 0x9B;
    pub const REFERENCE_BLOCK: u32 = 0xFB;
    pub const BLOCK_ADDITIONS: u32 = 0x75A1;
    pub const BLOCK_MORE: u32 = 0xA6;
    pub const BLOCK_ADD_ID: u32 = 0xEE;
    pub const BLOCK_ADDITIONAL: u32 = 0xA5;
    pub const TRACKS: u32 = 0x1654_AE6B;
    pub const TRACK_ENTRY: u32 = 0xAE;
    pub const TRACK_NUMBER: u32 = 0xD7;
    pub const FLAG_DEFAULT: u32 = 0x88;
    pub const FLAG_FORCED: u32 = 0x55AA;
    pub const DEFAULT_DURATION: u32 = 0x23_E383;
    pub const NAME: u32 = 0x536E;
    pub const LANGUAGE: u32 = 0x22_B59C;
    pub const CODEC_ID: u32 = 0x86;
    pub const CODEC_PRIVATE: u32 = 0x63A2;
    pub const CODEC_DELAY: u32 = 0x56AA;
    pub const SEEK_PRE_ROLL: u32 = 0x56BB;
    pub const VIDEO: u32 = 0xE0;
    pub const PIXEL_WIDTH: u32 = 0xB0;
    pub const PIXEL_HEIGHT: u32 = 0xBA;
    pub const AUDIO: u32 = 0xE1;
    pub const SAMPLING_FREQUENCY: u32 = 0xB5;
    pub const CHANNELS: u32 = 0x9F;
    pub const BIT_DEPTH: u32 = 0x6264;
    pub const CONTENT_ENCODINGS: u32 = 0x6D80;
    pub const CONTENT_ENCODING: u32 = 0x6240;
    pub const CONTENT_ENCRYPTION: u32 = 0x5035;
    pub const CONTENT_ENC_ALGO: u32 = 0x47E1;
    pub const CONTENT_ENC_KEY_ID: u32 = 0x47E2;
    pub const CUES: u32 = 0x1C53_BB6B;
    pub const CUE_POINT: u32 = 0xBB;
    pub const CUE_TIME: u32 = 0xB3;
    pub const CUE_TRACK_POSITIONS: u32 = 0xB7;
    pub const CUE_CLUSTER_POSITION: u32 = 0xF1;
}

/// Element header read from the stream.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ElementHeader {
    pub id: u32,
    pub start: u64,
    /// Body size, `None` for the reserved "unknown" value.
    pub size: Option<u64>,
    pub header_len: u8,
}

impl ElementHeader {
    pub fn body_start(&self) -> u64 {
        self.start + u64::from(self.header_len)
    }
}

/// Length of a vint from its first byte, `None` for a zero byte.
pub(crate) fn vint_len(first: u8) -> Option<usize> {
    (first != 0).then(|| first.leading_zeros() as usize + 1)
}

fn unknown_size(value: u64, len: usize) -> bool {
    value == (1u64 << (7 * len)) - 1
}

/// Reads a vint from the input. Returns `None` at end of input.
fn read_vint(input: &mut dyn ExtractorInput, max_len: usize, strip_marker: bool) -> Result<Option<(u64, usize)>> {
    let mut first = [0u8; 1];
    if !input.read_fully(&mut first)? {
        return Ok(None);
    }
    let len = vint_len(first[0])
        .filter(|&len| len <= max_len)
        .ok_or_else(|| Error::parsing(format!("invalid EBML vint lead byte {:#04x}", first[0])))?;
    let mut rest = [0u8; 7];
    if !input.read_fully(&mut rest[..len - 1])? && len > 1 {
        return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "truncated EBML vint").into());
    }
    let mut value = u64::from(first[0]);
    if strip_marker {
        value &= 0xFFu64 >> len;
    }
    for &b in &rest[..len - 1] {
        value = (value << 8) | u64::from(b);
    }
    Ok(Some((value, len)))
}

/// Reads the next element header. Returns `None` at end of input.
pub(crate) fn read_element(input: &mut dyn ExtractorInput) -> Result<Option<ElementHeader>> {
    let start = input.position();
    let Some((id, id_len)) = read_vint(input, 4, false)? else {
        return Ok(None);
    };
    let Some((size, size_len)) = read_vint(input, 8, true)? else {
        return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "element header without size").into());
    };
    let size = (!unknown_size(size, size_len)).then_some(size);
    tracing::trace!(id = format_args!("{id:#x}"), start, ?size, "element");
    Ok(Some(ElementHeader {
        id: id as u32,
        start,
        size,
        header_len: (id_len + size_len) as u8,
    }))
}

/// Reads a vint from an in-memory unit.
pub(crate) fn vint(c: &mut ByteCursor<'_>, strip_marker: bool) -> Result<(u64, usize)> {
    let first = c.read_u8()?;
    let len = vint_len(first).ok_or_else(|| Error::parsing("invalid EBML vint"))?;
    let mut value = u64::from(first);
    if strip_marker {
        value &= 0xFFu64 >> len;
    }
    for &b in c.read_bytes(len - 1)? {
        value = (value << 8) | u64::from(b);
    }
    Ok((value, len))
}

/// One child element inside an in-memory master body.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Child<'a> {
    pub id: u32,
    pub body: &'a [u8],
    /// Offset of the child header within the parent body.
    pub offset: usize,
}

/// Iterates the children of a master element held in memory. Unknown-size
/// children extend to the end of the parent.
pub(crate) fn children(data: &[u8]) -> impl Iterator<Item = Child<'_>> {
    let mut c = ByteCursor::new(data);
    std::iter::from_fn(move || {
        if c.remaining() == 0 {
            return None;
        }
        match next_child(&mut c) {
            Ok(child) => Some(child),
            Err(err) => {
                tracing::warn!(offset = c.position(), %err, "stopping at malformed child element");
                None
            }
        }
    })
}

fn next_child<'a>(c: &mut ByteCursor<'a>) -> Result<Child<'a>> {
    let offset = c.position();
    let (id, _) = vint(c, false)?;
    let (size, len) = vint(c, true)?;
    let size = if unknown_size(size, len) {
        c.remaining()
    } else {
        usize::try_from(size).map_err(|_| Error::parsing("element size overflows"))?
    };
    Ok(Child {
        id: id as u32,
        body: c.read_bytes(size)?,
        offset,
    })
}

pub(crate) fn find(data: &[u8], id: u32) -> Option<&[u8]> {
    children(data).find(|c| c.id == id).map(|c| c.body)
}

/// Big-endian unsigned integer of up to 8 bytes.
pub(crate) fn uint(body: &[u8]) -> Result<u64> {
    if body.len() > 8 {
        return Err(Error::parsing(format!("{}-byte integer element", body.len())));
    }
    Ok(body.iter().fold(0u64, |acc, &b| (acc << 8) | u64::from(b)))
}

/// IEEE float of 0, 4 or 8 bytes.
pub(crate) fn float(body: &[u8]) -> Result<f64> {
    match body.len() {
        0 => Ok(0.0),
        4 => Ok(f64::from(f32::from_bits(crate::util::be_u32(body, 0)))),
        8 => Ok(f64::from_bits(crate::util::be_u64(body, 0))),
        n => Err(Error::parsing(format!("{n}-byte float element"))),
    }
}

/// UTF-8 string element, trailing NULs removed.
pub(crate) fn string(body: &[u8]) -> String {
    String::from_utf8_lossy(body).trim_end_matches('\0').to_string()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::input::SliceInput;

    /// Encodes `value` as a minimal-length size vint.
    pub(crate) fn size_vint(value: u64) -> Vec<u8> {
        let len = (1..=8).find(|&len| value < (1u64 << (7 * len)) - 1).unwrap_or(8);
        let marked = value | (1u64 << (7 * len));
        marked.to_be_bytes()[8 - len..].to_vec()
    }

    /// Serialises one element.
    pub(crate) fn element(id: u32, body: &[u8]) -> Vec<u8> {
        let id_bytes = id.to_be_bytes();
        let skip = id_bytes.iter().take_while(|&&b| b == 0).count();
        let mut out = id_bytes[skip..].to_vec();
        out.extend_from_slice(&size_vint(body.len() as u64));
        out.extend_from_slice(body);
        out
    }

    pub(crate) fn uint_element(id: u32, value: u64) -> Vec<u8> {
        element(id, &value.to_be_bytes())
    }

    #[test]
    fn test_vint_lengths() {
        assert_eq!(vint_len(0x81), Some(1));
        assert_eq!(vint_len(0x40), Some(2));
        assert_eq!(vint_len(0x01), Some(8));
        assert_eq!(vint_len(0x00), None);
        let mut c = ByteCursor::new(&[0x40, 0x02]);
        assert_eq!(vint(&mut c, true).unwrap(), (2, 2));
    }

    #[test]
    fn test_read_element_with_unknown_size() {
        let mut input = SliceInput::new(vec![0x1F, 0x43, 0xB6, 0x75, 0x01, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]);
        let header = read_element(&mut input).unwrap().unwrap();
        assert_eq!(header.id, id::CLUSTER);
        assert_eq!(header.size, None);
        assert_eq!(header.body_start(), 12);
    }

    #[test]
    fn test_children_and_values() {
        let body = [uint_element(id::TRACK_NUMBER, 2), element(id::CODEC_ID, b"A_OPUS\0")].concat();
        let kids: Vec<_> = children(&body).collect();
        assert_eq!(kids.len(), 2);
        assert_eq!(uint(kids[0].body).unwrap(), 2);
        assert_eq!(string(kids[1].body), "A_OPUS");
        assert_eq!(float(&1.5f32.to_bits().to_be_bytes()).unwrap(), 1.5);
    }
}
