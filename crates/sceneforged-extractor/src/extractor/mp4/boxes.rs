//! ISO BMFF box headers and in-memory child iteration.

use std::fmt;
use std::io;

use crate::error::{Error, Result};
use crate::input::{ExtractorInput, InputExt};
use crate::util::cursor::ByteCursor;

/// Four-character box type code.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct BoxType(pub [u8; 4]);

impl BoxType {
    pub const FTYP: Self = Self(*b"ftyp");
    pub const STYP: Self = Self(*b"styp");
    pub const MOOV: Self = Self(*b"moov");
    pub const MDAT: Self = Self(*b"mdat");
    pub const MOOF: Self = Self(*b"moof");
    pub const MVHD: Self = Self(*b"mvhd");
    pub const MVEX: Self = Self(*b"mvex");
    pub const MEHD: Self = Self(*b"mehd");
    pub const TREX: Self = Self(*b"trex");
    pub const TRAK: Self = Self(*b"trak");
    pub const TKHD: Self = Self(*b"tkhd");
    pub const EDTS: Self = Self(*b"edts");
    pub const ELST: Self = Self(*b"elst");
    pub const MDIA: Self = Self(*b"mdia");
    pub const MDHD: Self = Self(*b"mdhd");
    pub const HDLR: Self = Self(*b"hdlr");
    pub const MINF: Self = Self(*b"minf");
    pub const STBL: Self = Self(*b"stbl");
    pub const STSD: Self = Self(*b"stsd");
    pub const STTS: Self = Self(*b"stts");
    pub const STSS: Self = Self(*b"stss");
    pub const STSC: Self = Self(*b"stsc");
    pub const STSZ: Self = Self(*b"stsz");
    pub const STZ2: Self = Self(*b"stz2");
    pub const STCO: Self = Self(*b"stco");
    pub const CO64: Self = Self(*b"co64");
    pub const CTTS: Self = Self(*b"ctts");
    pub const SAIZ: Self = Self(*b"saiz");
    pub const SAIO: Self = Self(*b"saio");
    pub const SENC: Self = Self(*b"senc");
    pub const PSSH: Self = Self(*b"pssh");
    pub const SIDX: Self = Self(*b"sidx");
    pub const TRAF: Self = Self(*b"traf");
    pub const TFHD: Self = Self(*b"tfhd");
    pub const TFDT: Self = Self(*b"tfdt");
    pub const TRUN: Self = Self(*b"trun");
    pub const SINF: Self = Self(*b"sinf");
    pub const FRMA: Self = Self(*b"frma");
    pub const SCHM: Self = Self(*b"schm");
    pub const SCHI: Self = Self(*b"schi");
    pub const TENC: Self = Self(*b"tenc");
    pub const UUID: Self = Self(*b"uuid");

    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.0).unwrap_or("????")
    }
}

impl fmt::Debug for BoxType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl fmt::Display for BoxType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A box header located in the stream.
#[derive(Debug, Clone, Copy)]
pub(crate) struct BoxHeader {
    pub box_type: BoxType,
    /// Absolute position of the first header byte.
    pub start: u64,
    /// Total size including the header, `None` when the box runs to the end
    /// of an input of unknown length.
    pub size: Option<u64>,
    pub header_len: u8,
}

impl BoxHeader {
    pub fn body_start(&self) -> u64 {
        self.start + u64::from(self.header_len)
    }

    pub fn end(&self) -> Option<u64> {
        self.size.and_then(|size| self.start.checked_add(size))
    }

    pub fn body_len(&self) -> Option<u64> {
        self.size.and_then(|size| size.checked_sub(u64::from(self.header_len)))
    }
}

/// Reads the header at the current position. Returns `None` at end of input.
pub(crate) fn read_header(input: &mut dyn ExtractorInput) -> Result<Option<BoxHeader>> {
    let start = input.position();
    let mut header = [0u8; 8];
    if !input.read_fully(&mut header)? {
        return Ok(None);
    }
    let size32 = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);
    let box_type = BoxType([header[4], header[5], header[6], header[7]]);
    let (size, header_len) = match size32 {
        1 => {
            let mut ext = [0u8; 8];
            if !input.read_fully(&mut ext)? {
                return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "truncated large box header").into());
            }
            (Some(u64::from_be_bytes(ext)), 16u8)
        }
        0 => (input.length().map(|len| len.saturating_sub(start)), 8u8),
        n => (Some(u64::from(n)), 8u8),
    };
    if let Some(size) = size {
        if size < u64::from(header_len) {
            return Err(Error::parsing(format!("box {box_type} at {start} declares size {size}")));
        }
        let end = start
            .checked_add(size)
            .ok_or_else(|| Error::parsing(format!("box {box_type} at {start} declares size {size}")))?;
        // A truncated mdat still holds readable samples.
        if let Some(length) = input.length() {
            if end > length && box_type != BoxType::MDAT {
                return Err(Error::parsing(format!("box {box_type} at {start} ends at {end}, past the input end {length}")));
            }
        }
    }
    tracing::trace!(%box_type, start, ?size, "box");
    Ok(Some(BoxHeader {
        box_type,
        start,
        size,
        header_len,
    }))
}

/// One child box inside an in-memory parent body.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ChildBox<'a> {
    pub box_type: BoxType,
    /// Offset of the child header within the parent body.
    pub offset: usize,
    pub body: &'a [u8],
}

/// Iterates the child boxes of an in-memory body. Iteration stops at the
/// first child whose declared size is impossible.
pub(crate) fn children(data: &[u8]) -> Children<'_> {
    Children { data, position: 0 }
}

pub(crate) struct Children<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> Iterator for Children<'a> {
    type Item = ChildBox<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let rest = self.data.get(self.position..)?;
        if rest.len() < 8 {
            return None;
        }
        let size32 = u32::from_be_bytes([rest[0], rest[1], rest[2], rest[3]]) as u64;
        let box_type = BoxType([rest[4], rest[5], rest[6], rest[7]]);
        let (size, header_len) = match size32 {
            0 => (rest.len() as u64, 8),
            1 if rest.len() >= 16 => (crate::util::be_u64(rest, 8), 16),
            1 => return None,
            n => (n, 8),
        };
        if size < header_len as u64 || size > rest.len() as u64 {
            tracing::warn!(%box_type, size, available = rest.len(), "truncated child box");
            return None;
        }
        let offset = self.position;
        self.position += size as usize;
        Some(ChildBox {
            box_type,
            offset,
            body: &rest[header_len..size as usize],
        })
    }
}

/// First child of the given type.
pub(crate) fn find(data: &[u8], box_type: BoxType) -> Option<&[u8]> {
    children(data).find(|c| c.box_type == box_type).map(|c| c.body)
}

/// Splits a full box body into `(version, flags, rest)`.
pub(crate) fn full_box(body: &[u8]) -> Result<(u8, u32, ByteCursor<'_>)> {
    let mut cursor = ByteCursor::new(body);
    let word = cursor.read_u32()?;
    Ok(((word >> 24) as u8, word & 0x00FF_FFFF, cursor))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::SliceInput;
    use assert_matches::assert_matches;

    #[test]
    fn test_children_iteration() {
        let data = [
            0, 0, 0, 12, b'a', b'b', b'c', b'd', 1, 2, 3, 4, //
            0, 0, 0, 8, b'e', b'f', b'g', b'h',
        ];
        let kids: Vec<_> = children(&data).collect();
        assert_eq!(kids.len(), 2);
        assert_eq!(kids[0].box_type, BoxType(*b"abcd"));
        assert_eq!(kids[0].body, &[1, 2, 3, 4]);
        assert_eq!(kids[1].offset, 12);
        assert!(kids[1].body.is_empty());
    }

    #[test]
    fn test_children_stops_on_overrun() {
        let data = [0, 0, 0, 64, b'm', b'o', b'o', b'v', 0, 0];
        assert_eq!(children(&data).count(), 0);
    }

    #[test]
    fn test_large_size_header() {
        let mut data = vec![0, 0, 0, 1, b'm', b'd', b'a', b't', 0, 0, 0, 0, 0, 0, 0, 20];
        data.extend_from_slice(&[0; 4]);
        let mut input = SliceInput::new(data);
        let header = read_header(&mut input).unwrap().unwrap();
        assert_eq!(header.box_type, BoxType::MDAT);
        assert_eq!(header.header_len, 16);
        assert_eq!(header.body_len(), Some(4));
        assert!(read_header(&mut SliceInput::new(Vec::new())).unwrap().is_none());
    }

    #[test]
    fn test_box_past_input_end_is_rejected() {
        let mut data = vec![0, 0, 0, 8, b'f', b'r', b'e', b'e'];
        data.extend_from_slice(&[0, 0, 0, 1, b'f', b'r', b'e', b'e']);
        data.extend_from_slice(&u64::MAX.to_be_bytes());
        let mut input = SliceInput::new(data);
        assert_eq!(read_header(&mut input).unwrap().unwrap().end(), Some(8));
        assert_matches!(read_header(&mut input), Err(Error::Parsing(_)));

        let mut data = vec![0, 0, 0, 64, b's', b'k', b'i', b'p'];
        data.extend_from_slice(&[0; 8]);
        assert_matches!(read_header(&mut SliceInput::new(data)), Err(Error::Parsing(_)));
    }

    #[test]
    fn test_truncated_mdat_is_kept() {
        let mut data = vec![0, 0, 0, 64, b'm', b'd', b'a', b't'];
        data.extend_from_slice(&[0; 8]);
        let header = read_header(&mut SliceInput::new(data)).unwrap().unwrap();
        assert_eq!(header.end(), Some(64));
    }
}
