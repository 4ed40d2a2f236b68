//! ISO base media file format, progressive and fragmented.

mod boxes;
mod cenc;
mod fragmented;
mod moov;
mod progressive;
mod sample_table;
pub(crate) mod stsd;

pub(crate) use fragmented::FragmentedMp4Extractor;
pub(crate) use progressive::Mp4Extractor;
pub(crate) use stsd::{parse_avcc, parse_hvcc};

use crate::input::Prefix;

/// Largest box read into memory whole (`moov`, `moof`, `sidx`).
const MAX_BUFFERED_BOX: u64 = 64 * 1024 * 1024;

/// Most samples or auxiliary records accepted from one fragment.
const MAX_FRAGMENT_SAMPLES: usize = 1 << 18;

const SNIFF_SEARCH_LEN: u64 = 4 * 1024;

const COMPATIBLE_BRANDS: &[&[u8; 4]] = &[
    b"isom", b"iso2", b"iso3", b"iso4", b"iso5", b"iso6", b"iso8", b"avc1", b"hvc1", b"hev1", b"av01", b"mp41",
    b"mp42", b"3g2a", b"3g2b", b"3gr6", b"3gs6", b"3ge6", b"3gg6", b"M4V ", b"M4A ", b"f4v ", b"kddi", b"M4VP",
    b"qt  ", b"MSNV", b"dby1", b"isml", b"piff", b"dash", b"cmfc", b"cmf2",
];

fn is_compatible_brand(brand: &[u8]) -> bool {
    brand.starts_with(b"3gp") || COMPATIBLE_BRANDS.iter().any(|b| &b[..] == brand)
}

/// Accepts a stream with a compatible `ftyp` whose fragmentation (a `moof`
/// or `mvex` box near the start) matches `fragmented`.
pub(crate) fn sniff(prefix: &Prefix, fragmented: bool) -> bool {
    let data = prefix.bytes();
    let mut search_len = SNIFF_SEARCH_LEN;
    let mut position = 0u64;
    let mut good_file_type = false;
    let mut is_fragmented = false;
    while position < search_len {
        let at = position as usize;
        let Some(header) = data.get(at..at + 8) else {
            break;
        };
        let mut size = u64::from(crate::util::be_u32(header, 0));
        let kind = &header[4..8];
        let mut header_len = 8u64;
        if size == 1 {
            let Some(large) = data.get(at + 8..at + 16) else {
                break;
            };
            size = crate::util::be_u64(large, 0);
            header_len = 16;
        } else if size == 0 {
            match prefix.input_length() {
                Some(len) => size = len.saturating_sub(position),
                None => break,
            }
        }
        if size < header_len {
            return false;
        }
        if kind == b"moov" {
            search_len = search_len.saturating_add(size);
            if let Some(len) = prefix.input_length() {
                search_len = search_len.min(len);
            }
            position += header_len;
            continue;
        }
        if kind == b"moof" || kind == b"mvex" {
            is_fragmented = true;
            break;
        }
        if position + size >= search_len && kind != b"ftyp" {
            break;
        }
        if kind == b"ftyp" {
            let body_start = at + header_len as usize;
            let body_end = (position + size).min(data.len() as u64) as usize;
            let Some(body) = data.get(body_start..body_end) else {
                break;
            };
            if body.len() < 8 {
                return false;
            }
            good_file_type = is_compatible_brand(&body[..4])
                || body[8..].chunks_exact(4).any(is_compatible_brand);
            if !good_file_type {
                return false;
            }
        }
        position += size;
    }
    good_file_type && fragmented == is_fragmented
}
