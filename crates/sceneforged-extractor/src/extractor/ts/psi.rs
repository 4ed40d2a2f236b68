//! Program specific information: section reassembly, PAT and PMT.

use crate::util::be_u16;
use crate::util::crc::crc32;

pub(crate) mod stream_type {
    pub const MPEG1_VIDEO: u8 = 0x01;
    pub const MPEG2_VIDEO: u8 = 0x02;
    pub const MPEG1_AUDIO: u8 = 0x03;
    pub const MPEG2_AUDIO: u8 = 0x04;
    pub const PRIVATE_PES: u8 = 0x06;
    pub const AAC_ADTS: u8 = 0x0F;
    pub const ID3: u8 = 0x15;
    pub const H264: u8 = 0x1B;
    pub const H265: u8 = 0x24;
    pub const AC3: u8 = 0x81;
    pub const HDMV_DTS: u8 = 0x82;
    pub const SPLICE_INFO: u8 = 0x86;
    pub const E_AC3: u8 = 0x87;
    pub const DTS: u8 = 0x8A;
    pub const AC4: u8 = 0xAC;
}

mod descriptor {
    pub const REGISTRATION: u8 = 0x05;
    pub const LANGUAGE: u8 = 0x0A;
    pub const AC3: u8 = 0x6A;
    pub const E_AC3: u8 = 0x7A;
    pub const DTS: u8 = 0x7B;
    pub const EXTENSION: u8 = 0x7F;
    /// `descriptor_tag_extension` of the AC-4 descriptor.
    pub const EXTENSION_AC4: u8 = 0x15;
}

const TABLE_PAT: u8 = 0x00;
const TABLE_PMT: u8 = 0x02;
const MAX_SECTION_LEN: usize = 4096;

/// Reassembles PSI sections carried across transport packets.
#[derive(Debug, Default)]
pub(crate) struct SectionAssembler {
    buf: Vec<u8>,
    /// A section start was seen since the last reset.
    synced: bool,
}

impl SectionAssembler {
    /// Feeds one packet payload and returns the sections it completes.
    pub fn push(&mut self, payload: &[u8], unit_start: bool) -> Vec<Vec<u8>> {
        let mut sections = Vec::new();
        let mut data = payload;
        if unit_start {
            let Some((&pointer, rest)) = data.split_first() else {
                return sections;
            };
            let pointer = usize::from(pointer);
            if pointer > rest.len() {
                self.reset();
                return sections;
            }
            if self.synced {
                self.buf.extend_from_slice(&rest[..pointer]);
                self.drain(&mut sections);
            }
            self.buf.clear();
            self.synced = true;
            data = &rest[pointer..];
        } else if !self.synced {
            return sections;
        }
        self.buf.extend_from_slice(data);
        self.drain(&mut sections);
        sections
    }

    fn drain(&mut self, sections: &mut Vec<Vec<u8>>) {
        loop {
            if self.buf.first().map_or(true, |&table| table == 0xFF) {
                self.buf.clear();
                return;
            }
            if self.buf.len() < 3 {
                return;
            }
            let len = 3 + usize::from(be_u16(&self.buf, 1) & 0x0FFF);
            if len > MAX_SECTION_LEN {
                tracing::warn!(len, "oversized PSI section dropped");
                self.reset();
                return;
            }
            if self.buf.len() < len {
                return;
            }
            let rest = self.buf.split_off(len);
            sections.push(std::mem::replace(&mut self.buf, rest));
        }
    }

    pub fn reset(&mut self) {
        self.buf.clear();
        self.synced = false;
    }
}

/// Checks the trailing CRC-32 of a long-form section.
pub(crate) fn crc_valid(section: &[u8]) -> bool {
    section.len() >= 4 && crc32(0xFFFF_FFFF, section) == 0
}

/// Body of a long-form section between the 8-byte header and the CRC.
fn long_section_body(section: &[u8], table_id: u8) -> Option<&[u8]> {
    if section.len() < 12 || section[0] != table_id {
        return None;
    }
    if !crc_valid(section) {
        tracing::warn!(table_id, "PSI section CRC mismatch");
        return None;
    }
    // Sections flagged "not yet applicable" are ignored.
    if section[5] & 0x01 == 0 {
        return None;
    }
    Some(&section[8..section.len() - 4])
}

/// `(program_number, pmt_pid)` pairs of a PAT, network PIDs excluded.
pub(crate) fn parse_pat(section: &[u8]) -> Option<Vec<(u16, u16)>> {
    let body = long_section_body(section, TABLE_PAT)?;
    Some(
        body.chunks_exact(4)
            .map(|entry| (be_u16(entry, 0), be_u16(entry, 2) & 0x1FFF))
            .filter(|&(program, _)| program != 0)
            .collect(),
    )
}

/// One elementary stream entry of a PMT.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct EsInfo {
    pub stream_type: u8,
    pub pid: u16,
    pub language: Option<String>,
    /// Stream type refined from descriptors for private streams.
    pub refined_type: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Pmt {
    pub program_number: u16,
    pub version: u8,
    pub pcr_pid: u16,
    pub streams: Vec<EsInfo>,
}

pub(crate) fn parse_pmt(section: &[u8]) -> Option<Pmt> {
    let program_number = section.get(3..5).map(|b| be_u16(b, 0))?;
    let version = section.get(5).map(|b| (b >> 1) & 0x1F)?;
    let body = long_section_body(section, TABLE_PMT)?;
    if body.len() < 4 {
        return None;
    }
    let pcr_pid = be_u16(body, 0) & 0x1FFF;
    let info_len = usize::from(be_u16(body, 2) & 0x0FFF);
    let mut at = 4 + info_len;
    let mut streams = Vec::new();
    while at + 5 <= body.len() {
        let stream_type = body[at];
        let pid = be_u16(body, at + 1) & 0x1FFF;
        let es_info_len = usize::from(be_u16(body, at + 3) & 0x0FFF);
        let descriptors = body.get(at + 5..at + 5 + es_info_len)?;
        let (refined_type, language) = read_descriptors(stream_type, descriptors);
        streams.push(EsInfo {
            stream_type,
            pid,
            language,
            refined_type,
        });
        at += 5 + es_info_len;
    }
    Some(Pmt {
        program_number,
        version,
        pcr_pid,
        streams,
    })
}

/// Walks ES descriptors for the codec of private streams and the language.
fn read_descriptors(stream_type: u8, mut data: &[u8]) -> (u8, Option<String>) {
    let mut refined = stream_type;
    let mut language = None;
    while data.len() >= 2 {
        let tag = data[0];
        let len = usize::from(data[1]);
        let Some(body) = data.get(2..2 + len) else {
            break;
        };
        match tag {
            descriptor::REGISTRATION if body.len() >= 4 => match &body[..4] {
                b"AC-3" => refined = stream_type::AC3,
                b"EAC3" => refined = stream_type::E_AC3,
                b"AC-4" => refined = stream_type::AC4,
                b"HEVC" => refined = stream_type::H265,
                _ => {}
            },
            descriptor::AC3 => refined = stream_type::AC3,
            descriptor::E_AC3 => refined = stream_type::E_AC3,
            descriptor::DTS => refined = stream_type::DTS,
            descriptor::EXTENSION if body.first() == Some(&descriptor::EXTENSION_AC4) => {
                refined = stream_type::AC4;
            }
            descriptor::LANGUAGE if body.len() >= 3 => {
                language = std::str::from_utf8(&body[..3]).ok().map(|s| s.trim().to_string());
            }
            _ => {}
        }
        data = &data[2 + len..];
    }
    (refined, language.filter(|l| !l.is_empty()))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Wraps a long-form section body with its header and CRC.
    pub(crate) fn long_section(table_id: u8, extension: u16, body: &[u8]) -> Vec<u8> {
        let len = 5 + body.len() + 4;
        let mut out = vec![table_id, 0xB0 | (len >> 8) as u8, len as u8];
        out.extend_from_slice(&extension.to_be_bytes());
        out.extend_from_slice(&[0xC1, 0, 0]);
        out.extend_from_slice(body);
        let crc = crc32(0xFFFF_FFFF, &out);
        out.extend_from_slice(&crc.to_be_bytes());
        out
    }

    pub(crate) fn pat(programs: &[(u16, u16)]) -> Vec<u8> {
        let body: Vec<u8> = programs
            .iter()
            .flat_map(|&(program, pid)| {
                let mut entry = program.to_be_bytes().to_vec();
                entry.extend_from_slice(&(0xE000 | pid).to_be_bytes());
                entry
            })
            .collect();
        long_section(TABLE_PAT, 1, &body)
    }

    /// PMT for `program` with `(stream_type, pid, descriptors)` entries.
    pub(crate) fn pmt(program: u16, pcr_pid: u16, streams: &[(u8, u16, &[u8])]) -> Vec<u8> {
        let mut body = (0xE000 | pcr_pid).to_be_bytes().to_vec();
        body.extend_from_slice(&[0xF0, 0x00]);
        for &(kind, pid, descriptors) in streams {
            body.push(kind);
            body.extend_from_slice(&(0xE000 | pid).to_be_bytes());
            body.extend_from_slice(&(0xF000 | descriptors.len() as u16).to_be_bytes());
            body.extend_from_slice(descriptors);
        }
        long_section(TABLE_PMT, program, &body)
    }

    #[test]
    fn test_pat_skips_network_pid() {
        let section = pat(&[(0, 0x10), (1, 0x100), (2, 0x200)]);
        assert_eq!(parse_pat(&section), Some(vec![(1, 0x100), (2, 0x200)]));
    }

    #[test]
    fn test_pmt_refines_private_streams() {
        let section = pmt(
            1,
            0x101,
            &[
                (stream_type::H264, 0x101, &[]),
                (stream_type::PRIVATE_PES, 0x102, &[0x6A, 0x01, 0x00, 0x0A, 0x04, b'e', b'n', b'g', 0]),
            ],
        );
        let pmt = parse_pmt(&section).unwrap();
        assert_eq!(pmt.pcr_pid, 0x101);
        assert_eq!(pmt.streams.len(), 2);
        assert_eq!(pmt.streams[1].refined_type, stream_type::AC3);
        assert_eq!(pmt.streams[1].language.as_deref(), Some("eng"));
    }

    #[test]
    fn test_corrupt_crc_rejected() {
        let mut section = pat(&[(1, 0x100)]);
        section[9] ^= 0xFF;
        assert_eq!(parse_pat(&section), None);
    }

    #[test]
    fn test_assembler_spans_packets() {
        let section = pat(&[(1, 0x100), (2, 0x200)]);
        let mut assembler = SectionAssembler::default();
        let mut first = vec![0u8];
        first.extend_from_slice(&section[..10]);
        assert!(assembler.push(&first, true).is_empty());
        // The tail arrives in the next packet, followed by stuffing.
        let mut rest = section[10..].to_vec();
        rest.extend_from_slice(&[0xFF; 8]);
        assert_eq!(assembler.push(&rest, false), vec![section]);
    }

    #[test]
    fn test_assembler_ignores_unsynced_payload() {
        let mut assembler = SectionAssembler::default();
        assert!(assembler.push(&[0x00, 0xB0, 0x0D], false).is_empty());
    }
}
