//! PES packet reassembly and header parsing, shared by TS and PS.

use crate::util::be_u16;

/// Stream ids whose PES packets have no optional header.
fn has_optional_header(stream_id: u8) -> bool {
    !matches!(stream_id, 0xBC | 0xBE | 0xBF | 0xF0 | 0xF1 | 0xF2 | 0xF8 | 0xFF)
}

/// A complete PES packet with its header stripped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Pes {
    pub stream_id: u8,
    /// Raw 33-bit presentation timestamp.
    pub pts: Option<i64>,
    pub data_alignment: bool,
    pub payload: Vec<u8>,
}

/// Reads a 33-bit timestamp in the 5-byte PES / pack layout.
pub(crate) fn read_timestamp(b: &[u8]) -> i64 {
    (i64::from(b[0] & 0x0E) << 29)
        | (i64::from(b[1]) << 22)
        | (i64::from(b[2] & 0xFE) << 14)
        | (i64::from(b[3]) << 7)
        | i64::from(b[4] >> 1)
}

/// Parses a whole PES packet starting with its `00 00 01` prefix.
pub(crate) fn parse_pes(packet: &[u8]) -> Option<Pes> {
    if packet.len() < 6 || packet[..3] != [0, 0, 1] {
        return None;
    }
    let stream_id = packet[3];
    let declared = usize::from(be_u16(packet, 4));
    let end = if declared == 0 {
        packet.len()
    } else {
        (6 + declared).min(packet.len())
    };
    if !has_optional_header(stream_id) {
        return Some(Pes {
            stream_id,
            pts: None,
            data_alignment: false,
            payload: packet[6..end].to_vec(),
        });
    }
    if end < 9 || packet[6] & 0xC0 != 0x80 {
        return None;
    }
    let data_alignment = packet[6] & 0x04 != 0;
    let pts_flag = packet[7] & 0x80 != 0;
    let header_len = usize::from(packet[8]);
    let payload_start = 9 + header_len;
    if payload_start > end {
        return None;
    }
    let pts = (pts_flag && header_len >= 5).then(|| read_timestamp(&packet[9..14]));
    Some(Pes {
        stream_id,
        pts,
        data_alignment,
        payload: packet[payload_start..end].to_vec(),
    })
}

/// Collects transport packet payloads into whole PES packets.
#[derive(Debug, Default)]
pub(crate) struct PesAssembler {
    buf: Vec<u8>,
    started: bool,
    /// Total packet length when the header bounds it.
    expected: Option<usize>,
}

impl PesAssembler {
    /// Feeds one payload. A unit start completes the previous unbounded
    /// packet; a bounded packet completes once its declared length arrived.
    pub fn push(&mut self, payload: &[u8], unit_start: bool) -> Vec<Pes> {
        let mut done = Vec::new();
        if unit_start {
            if self.started {
                if let Some(pes) = self.finish() {
                    done.push(pes);
                }
            }
            self.started = true;
            self.buf.clear();
            self.expected = None;
        } else if !self.started {
            return done;
        }
        self.buf.extend_from_slice(payload);
        if self.expected.is_none() && self.buf.len() >= 6 {
            let declared = usize::from(be_u16(&self.buf, 4));
            self.expected = (declared != 0).then_some(6 + declared);
        }
        if self.expected.is_some_and(|len| self.buf.len() >= len) {
            if let Some(pes) = self.finish() {
                done.push(pes);
            }
        }
        done
    }

    /// Completes whatever is buffered, as at the end of the stream.
    pub fn flush(&mut self) -> Option<Pes> {
        if self.started {
            self.finish()
        } else {
            None
        }
    }

    fn finish(&mut self) -> Option<Pes> {
        self.started = false;
        self.expected = None;
        let buf = std::mem::take(&mut self.buf);
        let pes = parse_pes(&buf);
        if pes.is_none() && !buf.is_empty() {
            tracing::warn!(len = buf.len(), "malformed PES packet dropped");
        }
        pes
    }

    /// Drops partial data, as after a seek or a continuity error.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.started = false;
        self.expected = None;
    }
}
