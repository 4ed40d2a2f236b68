//! FLAC frame headers.

use super::metadata::StreamInfo;
use crate::util::crc::crc8;

/// Longest possible frame header: 4 fixed bytes, a 7-byte coded number,
/// 2 bytes of block size, 2 of sample rate and the CRC.
pub(crate) const MAX_HEADER_LEN: usize = 16;

const SAMPLE_RATES: [u32; 12] = [0, 88_200, 176_400, 192_000, 8_000, 16_000, 22_050, 24_000, 32_000, 44_100, 48_000, 96_000];
const BITS_PER_SAMPLE: [u32; 8] = [0, 8, 12, 0, 16, 20, 24, 32];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FrameHeader {
    /// Number of the first sample in the frame.
    pub first_sample: u64,
    pub block_size: u32,
}

/// Reads the UTF-8 style coded frame or sample number.
fn coded_number(data: &[u8]) -> Option<(u64, usize)> {
    let first = *data.first()?;
    let len = match first.leading_ones() {
        0 => return Some((u64::from(first), 1)),
        n @ 2..=7 => n as usize,
        _ => return None,
    };
    let mut value = u64::from(first & (0x7F >> len));
    for &b in data.get(1..len)? {
        if b & 0xC0 != 0x80 {
            return None;
        }
        value = (value << 6) | u64::from(b & 0x3F);
    }
    Some((value, len))
}

/// Parses and validates a frame header at the start of `data` against the
/// stream parameters, including the CRC-8.
pub(crate) fn parse_frame_header(data: &[u8], info: &StreamInfo) -> Option<FrameHeader> {
    let h = data.get(..4)?;
    if h[0] != 0xFF || h[1] & 0xFE != 0xF8 {
        return None;
    }
    let variable = h[1] & 0x01 != 0;
    let block_code = h[2] >> 4;
    let rate_code = h[2] & 0x0F;
    let channel_code = h[3] >> 4;
    let bits_code = usize::from((h[3] >> 1) & 0x07);
    if channel_code > 10 || h[3] & 0x01 != 0 || bits_code == 3 || block_code == 0 || rate_code == 15 {
        return None;
    }
    let channels = if channel_code < 8 { u32::from(channel_code) + 1 } else { 2 };
    if channels != info.channels {
        return None;
    }
    if bits_code != 0 && BITS_PER_SAMPLE[bits_code] != info.bits_per_sample {
        return None;
    }
    let (number, number_len) = coded_number(&data[4..])?;
    let mut at = 4 + number_len;
    let block_size = match block_code {
        1 => 192,
        2..=5 => 576 << (block_code - 2),
        6 => {
            let size = u32::from(*data.get(at)?) + 1;
            at += 1;
            size
        }
        7 => {
            let size = u32::from(crate::util::be_u16(data.get(at..at + 2)?, 0)) + 1;
            at += 2;
            size
        }
        _ => 256 << (block_code - 8),
    };
    let sample_rate = match rate_code {
        0 => info.sample_rate,
        12 => {
            at += 1;
            u32::from(*data.get(at - 1)?) * 1_000
        }
        13 => {
            at += 2;
            u32::from(crate::util::be_u16(data.get(at - 2..at)?, 0))
        }
        14 => {
            at += 2;
            u32::from(crate::util::be_u16(data.get(at - 2..at)?, 0)) * 10
        }
        code => SAMPLE_RATES[usize::from(code)],
    };
    if sample_rate != info.sample_rate {
        return None;
    }
    if crc8(&data[..at]) != *data.get(at)? {
        return None;
    }
    let first_sample = if variable {
        number
    } else {
        number * u64::from(info.fixed_block_size().unwrap_or(block_size))
    };
    Some(FrameHeader {
        first_sample,
        block_size,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::super::metadata::tests::streaminfo;
    use super::*;

    /// A fixed-blocksize frame header (4096 samples, 44.1 kHz, stereo,
    /// 16 bit) followed by `payload`.
    pub(crate) fn frame(number: u8, payload: &[u8]) -> Vec<u8> {
        assert!(number < 0x80);
        let mut out = vec![0xFF, 0xF8, 0xC9, 0x18, number];
        out.push(crc8(&out));
        out.extend_from_slice(payload);
        out
    }

    #[test]
    fn test_parse_frame_header() {
        let info = StreamInfo::parse(&streaminfo(0)).unwrap();
        let header = parse_frame_header(&frame(3, &[0; 8]), &info).unwrap();
        assert_eq!(header.block_size, 4096);
        assert_eq!(header.first_sample, 3 * 4096);
    }

    #[test]
    fn test_rejects_bad_crc() {
        let info = StreamInfo::parse(&streaminfo(0)).unwrap();
        let mut data = frame(1, &[]);
        data[5] ^= 0xFF;
        assert_eq!(parse_frame_header(&data, &info), None);
    }

    #[test]
    fn test_coded_number() {
        assert_eq!(coded_number(&[0x7F]), Some((0x7F, 1)));
        assert_eq!(coded_number(&[0xC2, 0x80]), Some((0x80, 2)));
        assert_eq!(coded_number(&[0x80]), None);
    }
}
