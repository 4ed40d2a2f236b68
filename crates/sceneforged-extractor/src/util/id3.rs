//! ID3v2 tags prefixed to elementary audio streams.

use crate::error::Result;
use crate::input::{ExtractorInput, InputExt};

pub(crate) const HEADER_LEN: usize = 10;

fn syncsafe(bytes: &[u8]) -> u32 {
    bytes
        .iter()
        .fold(0u32, |acc, &b| (acc << 7) | u32::from(b & 0x7f))
}

/// Total length of the ID3v2 tag starting at `data[0]`, header and footer
/// included, or `None` if `data` does not start with a tag.
pub(crate) fn tag_len(data: &[u8]) -> Option<usize> {
    if data.len() < HEADER_LEN || &data[..3] != b"ID3" || data[3] == 0xff || data[4] == 0xff {
        return None;
    }
    if data[6..10].iter().any(|&b| b & 0x80 != 0) {
        return None;
    }
    let footer = if data[5] & 0x10 != 0 { HEADER_LEN } else { 0 };
    Some(HEADER_LEN + syncsafe(&data[6..10]) as usize + footer)
}

/// Decoded subset of an ID3v2 tag.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct Id3Tag {
    /// Text information frames as `(frame id, value)`.
    pub frames: Vec<(String, String)>,
    /// Encoder delay and padding from an `iTunSMPB` comment.
    pub gapless: Option<(u32, u32)>,
}

/// Reads every consecutive ID3v2 tag at the current position. With
/// `decode == false` the tags are skipped without parsing.
pub(crate) fn read_tags(input: &mut dyn ExtractorInput, decode: bool) -> Result<Option<Id3Tag>> {
    let mut tag: Option<Id3Tag> = None;
    loop {
        let start = input.position();
        let mut header = [0u8; HEADER_LEN];
        let n = input.read_up_to(&mut header)?;
        let Some(len) = tag_len(&header[..n]) else {
            input.seek_to_position(start)?;
            break;
        };
        let Some(body) = input.read_to_vec(len - HEADER_LEN)? else {
            break;
        };
        tracing::trace!(start, len, "skipped ID3v2 tag");
        if decode {
            let parsed = parse_frames(header[3], &body);
            let merged = tag.get_or_insert_with(Id3Tag::default);
            merged.frames.extend(parsed.frames);
            merged.gapless = merged.gapless.or(parsed.gapless);
        }
    }
    Ok(tag)
}

fn decode_text(encoding: u8, bytes: &[u8]) -> String {
    let text = match encoding {
        1 | 2 => {
            let (bytes, big_endian) = match bytes {
                [0xff, 0xfe, rest @ ..] => (rest, false),
                [0xfe, 0xff, rest @ ..] => (rest, true),
                _ => (bytes, encoding == 2),
            };
            let units: Vec<u16> = bytes
                .chunks_exact(2)
                .map(|c| {
                    if big_endian {
                        u16::from_be_bytes([c[0], c[1]])
                    } else {
                        u16::from_le_bytes([c[0], c[1]])
                    }
                })
                .collect();
            String::from_utf16_lossy(&units)
        }
        0 => bytes.iter().map(|&b| b as char).collect(),
        _ => String::from_utf8_lossy(bytes).into_owned(),
    };
    text.trim_end_matches('\0').to_string()
}

/// Parses `iTunSMPB` (" 00000000 00000210 000003C4 ...") into delay and padding.
fn parse_itunsmpb(value: &str) -> Option<(u32, u32)> {
    let mut fields = value.split_whitespace().skip(1);
    let delay = u32::from_str_radix(fields.next()?, 16).ok()?;
    let padding = u32::from_str_radix(fields.next()?, 16).ok()?;
    (delay > 0 || padding > 0).then_some((delay, padding))
}

/// Parses the frames of a v2.3/v2.4 tag body. Unsupported versions and
/// malformed frames end parsing without failing the stream.
pub(crate) fn parse_frames(major_version: u8, body: &[u8]) -> Id3Tag {
    let mut tag = Id3Tag::default();
    if !(3..=4).contains(&major_version) {
        return tag;
    }
    let mut pos = 0;
    while pos + HEADER_LEN <= body.len() {
        let id = &body[pos..pos + 4];
        if id[0] == 0 {
            break;
        }
        let size_bytes = &body[pos + 4..pos + 8];
        let size = if major_version == 4 {
            syncsafe(size_bytes) as usize
        } else {
            u32::from_be_bytes([size_bytes[0], size_bytes[1], size_bytes[2], size_bytes[3]]) as usize
        };
        let start = pos + HEADER_LEN;
        let Some(frame) = body.get(start..start + size) else {
            break;
        };
        let id = String::from_utf8_lossy(id).into_owned();
        if let Some((&encoding, text)) = frame.split_first() {
            if id.starts_with('T') && id != "TXXX" {
                tag.frames.push((id.clone(), decode_text(encoding, text)));
            } else if id == "COMM" && text.len() > 3 {
                let payload = decode_text(encoding, &text[3..]);
                let mut parts = payload.splitn(2, '\0');
                let description = parts.next().unwrap_or_default();
                let value = parts.next().unwrap_or_default();
                if description == "iTunSMPB" {
                    tag.gapless = parse_itunsmpb(value);
                }
            }
        }
        pos = start + size;
    }
    tag
}
