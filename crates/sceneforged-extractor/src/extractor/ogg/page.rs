//! Ogg page framing (RFC 3533).

use crate::error::{Error, Result};
use crate::input::{ExtractorInput, InputExt};
use crate::util::crc::crc32;

pub(crate) const CAPTURE_PATTERN: &[u8; 4] = b"OggS";
pub(crate) const HEADER_LEN: usize = 27;
/// Largest possible page: header, 255 lacing values and 255 full segments.
pub(crate) const MAX_PAGE_LEN: usize = HEADER_LEN + 255 + 255 * 255;

pub(crate) mod flags {
    pub const CONTINUED: u8 = 0x01;
    pub const FIRST: u8 = 0x02;
    pub const LAST: u8 = 0x04;
}

/// Granule position of pages on which no packet ends.
pub(crate) const NO_GRANULE: i64 = -1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PageHeader {
    pub flags: u8,
    pub granule: i64,
    pub serial: u32,
    pub sequence: u32,
    pub lacing: Vec<u8>,
}

impl PageHeader {
    /// Parses the fixed header and lacing table at the start of `data`.
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < HEADER_LEN || &data[..4] != CAPTURE_PATTERN || data[4] != 0 {
            return None;
        }
        let segments = usize::from(data[26]);
        let lacing = data.get(HEADER_LEN..HEADER_LEN + segments)?.to_vec();
        Some(Self {
            flags: data[5],
            granule: crate::util::le_u64(data, 6) as i64,
            serial: crate::util::le_u32(data, 14),
            sequence: crate::util::le_u32(data, 18),
            lacing,
        })
    }

    pub fn header_len(&self) -> usize {
        HEADER_LEN + self.lacing.len()
    }

    pub fn body_len(&self) -> usize {
        self.lacing.iter().map(|&l| usize::from(l)).sum()
    }

    pub fn page_len(&self) -> usize {
        self.header_len() + self.body_len()
    }

    pub fn has(&self, flag: u8) -> bool {
        self.flags & flag != 0
    }
}

/// One whole page.
#[derive(Debug, Clone)]
pub(crate) struct Page {
    pub header: PageHeader,
    pub body: Vec<u8>,
}

impl Page {
    /// Splits the body into packet segments. The flag tells whether the
    /// packet ends on this page.
    pub fn segments(&self) -> Vec<(&[u8], bool)> {
        let mut out = Vec::new();
        let mut start = 0;
        let mut len = 0;
        for &lace in &self.header.lacing {
            len += usize::from(lace);
            if lace < 255 {
                out.push((&self.body[start..start + len], true));
                start += len;
                len = 0;
            }
        }
        if len > 0 {
            out.push((&self.body[start..start + len], false));
        }
        out
    }
}

/// Outcome of reading at the current position.
#[derive(Debug)]
pub(crate) enum PageRead {
    Page(Page),
    /// No valid page starts here; the caller should resynchronise.
    Invalid,
    EndOfInput,
}

/// Reads the page at the current position and checks its CRC.
pub(crate) fn read_page(input: &mut dyn ExtractorInput) -> Result<PageRead> {
    let mut fixed = [0u8; HEADER_LEN];
    let n = input.read_up_to(&mut fixed)?;
    if n < HEADER_LEN {
        return Ok(PageRead::EndOfInput);
    }
    if &fixed[..4] != CAPTURE_PATTERN || fixed[4] != 0 {
        return Ok(PageRead::Invalid);
    }
    let segments = usize::from(fixed[26]);
    let Some(lacing) = input.read_to_vec(segments)? else {
        return Ok(PageRead::EndOfInput);
    };
    let mut raw = fixed.to_vec();
    raw.extend_from_slice(&lacing);
    let Some(header) = PageHeader::parse(&raw) else {
        return Ok(PageRead::Invalid);
    };
    let body = input
        .read_to_vec(header.body_len())?
        .ok_or_else(|| Error::parsing("stream ended inside an Ogg page"))?;
    let expected = crate::util::le_u32(&raw, 22);
    raw[22..26].fill(0);
    let actual = crc32(crc32(0, &raw), &body);
    if actual != expected {
        tracing::warn!(serial = header.serial, sequence = header.sequence, "Ogg page CRC mismatch");
        return Ok(PageRead::Invalid);
    }
    Ok(PageRead::Page(Page { header, body }))
}

/// Offset of the next capture pattern in `data` at or after `from`.
pub(crate) fn find_capture(data: &[u8], from: usize) -> Option<usize> {
    data.get(from..)?
        .windows(4)
        .position(|w| w == CAPTURE_PATTERN)
        .map(|at| from + at)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::input::SliceInput;

    /// Builds a page carrying `packets`, each ending on this page.
    pub(crate) fn page(serial: u32, sequence: u32, flags: u8, granule: i64, packets: &[&[u8]]) -> Vec<u8> {
        let mut lacing = Vec::new();
        let mut body = Vec::new();
        for packet in packets {
            let mut rest = packet.len();
            while rest >= 255 {
                lacing.push(255);
                rest -= 255;
            }
            lacing.push(rest as u8);
            body.extend_from_slice(packet);
        }
        let mut out = CAPTURE_PATTERN.to_vec();
        out.push(0);
        out.push(flags);
        out.extend_from_slice(&granule.to_le_bytes());
        out.extend_from_slice(&serial.to_le_bytes());
        out.extend_from_slice(&sequence.to_le_bytes());
        out.extend_from_slice(&[0; 4]);
        out.push(lacing.len() as u8);
        out.extend_from_slice(&lacing);
        out.extend_from_slice(&body);
        let crc = crc32(0, &out);
        out[22..26].copy_from_slice(&crc.to_le_bytes());
        out
    }

    #[test]
    fn test_read_page_and_segments() {
        let long = vec![7u8; 300];
        let data = page(9, 0, flags::FIRST, 0, &[b"abc", &long]);
        let mut input = SliceInput::new(data);
        let PageRead::Page(page) = read_page(&mut input).unwrap() else {
            panic!("expected a page");
        };
        assert_eq!(page.header.serial, 9);
        assert!(page.header.has(flags::FIRST));
        let segments = page.segments();
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0], (&b"abc"[..], true));
        assert_eq!(segments[1].0.len(), 300);
        assert!(segments[1].1);
    }

    #[test]
    fn test_crc_mismatch_is_invalid() {
        let mut data = page(1, 0, 0, 0, &[b"xyz"]);
        let last = data.len() - 1;
        data[last] ^= 1;
        let mut input = SliceInput::new(data);
        assert!(matches!(read_page(&mut input).unwrap(), PageRead::Invalid));
    }

    #[test]
    fn test_find_capture() {
        assert_eq!(find_capture(b"..OggS..OggS", 0), Some(2));
        assert_eq!(find_capture(b"..OggS..OggS", 3), Some(8));
        assert_eq!(find_capture(b"Ogg", 0), None);
    }
}
