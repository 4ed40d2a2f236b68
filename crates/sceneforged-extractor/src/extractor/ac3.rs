//! Dolby AC-3 and E-AC-3 sync frames.

use super::elementary::{SyncFrame, SyncFrameExtractor, SyncFrameFormat};
use crate::input::Prefix;
use crate::track::mime;
use crate::util::bits::Bits;

const SAMPLE_RATE_BY_FSCOD: [u32; 3] = [48_000, 44_100, 32_000];
const SAMPLE_RATE_BY_FSCOD2: [u32; 3] = [24_000, 22_050, 16_000];
const CHANNELS_BY_ACMOD: [u32; 8] = [2, 1, 2, 3, 3, 4, 4, 5];
const BLOCKS_BY_NUMBLKSCOD: [u32; 4] = [1, 2, 3, 6];
/// kbit/s, indexed by `frmsizecod / 2`.
const BITRATE_BY_HALF_FRMSIZECOD: [u32; 19] = [
    32, 40, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320, 384, 448, 512, 576, 640,
];
/// 16-bit words per frame at 44.1 kHz, indexed by `frmsizecod / 2`.
const WORDS_44_1_BY_HALF_FRMSIZECOD: [u32; 19] = [
    69, 87, 104, 121, 139, 174, 208, 243, 278, 348, 417, 487, 557, 696, 835, 975, 1114, 1253, 1393,
];
const AC3_SAMPLES: u32 = 1536;

pub(crate) struct Ac3;

impl SyncFrameFormat for Ac3 {
    const NAME: &'static str = "AC-3";
    const HEADER_LEN: usize = 8;

    fn parse(data: &[u8]) -> Option<SyncFrame> {
        parse_syncframe(data)
    }
}

pub(crate) type Ac3Extractor = SyncFrameExtractor<Ac3>;

pub(crate) fn sniff(prefix: &Prefix) -> bool {
    super::elementary::sniff::<Ac3>(prefix)
}

fn ac3_frame_size(fscod: usize, frmsizecod: usize) -> Option<usize> {
    let half = frmsizecod / 2;
    let bitrate = *BITRATE_BY_HALF_FRMSIZECOD.get(half)?;
    let bytes = match SAMPLE_RATE_BY_FSCOD.get(fscod)? {
        44_100 => 2 * (WORDS_44_1_BY_HALF_FRMSIZECOD[half] + (frmsizecod % 2) as u32),
        32_000 => 6 * bitrate,
        _ => 4 * bitrate,
    };
    Some(bytes as usize)
}

/// Parses an AC-3 or E-AC-3 sync frame header at the start of `data`.
pub(crate) fn parse_syncframe(data: &[u8]) -> Option<SyncFrame> {
    if data.len() < 6 || data[0] != 0x0B || data[1] != 0x77 {
        return None;
    }
    let bsid = data[5] >> 3;
    let mut bits = Bits::new(&data[2..]);
    if bsid > 10 {
        if bsid > 16 {
            return None;
        }
        // E-AC-3
        let _strmtyp = bits.read_bits(2).ok()?;
        bits.skip_bits(3).ok()?;
        let frame_size = (bits.read_bits(11).ok()? as usize + 1) * 2;
        let fscod = bits.read_bits(2).ok()? as usize;
        let (sample_rate, blocks) = if fscod == 3 {
            let fscod2 = bits.read_bits(2).ok()? as usize;
            (*SAMPLE_RATE_BY_FSCOD2.get(fscod2)?, 6)
        } else {
            let numblkscod = bits.read_bits(2).ok()? as usize;
            (SAMPLE_RATE_BY_FSCOD[fscod], BLOCKS_BY_NUMBLKSCOD[numblkscod])
        };
        let acmod = bits.read_bits(3).ok()? as usize;
        let lfeon = bits.read_bit().ok()?;
        return Some(SyncFrame {
            mime_type: mime::AUDIO_E_AC3,
            frame_size,
            sample_rate,
            channel_count: CHANNELS_BY_ACMOD[acmod] + u32::from(lfeon),
            sample_count: 256 * blocks,
        });
    }
    // AC-3: skip crc1.
    bits.skip_bits(16).ok()?;
    let fscod = bits.read_bits(2).ok()? as usize;
    let frmsizecod = bits.read_bits(6).ok()? as usize;
    let frame_size = ac3_frame_size(fscod, frmsizecod)?;
    bits.skip_bits(5 + 3).ok()?;
    let acmod = bits.read_bits(3).ok()? as usize;
    if acmod & 0x01 != 0 && acmod != 1 {
        bits.skip_bits(2).ok()?;
    }
    if acmod & 0x04 != 0 {
        bits.skip_bits(2).ok()?;
    }
    if acmod == 2 {
        bits.skip_bits(2).ok()?;
    }
    let lfeon = bits.read_bit().ok()?;
    Some(SyncFrame {
        mime_type: mime::AUDIO_AC3,
        frame_size,
        sample_rate: SAMPLE_RATE_BY_FSCOD[fscod],
        channel_count: CHANNELS_BY_ACMOD[acmod] + u32::from(lfeon),
        sample_count: AC3_SAMPLES,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::extractor::run_to_end;
    use crate::input::SliceInput;

    /// 48 kHz, 192 kbit/s (768 bytes), 3/2 with LFE.
    pub(crate) fn ac3_frame() -> Vec<u8> {
        // fscod 0, frmsizecod 20; bsid 8, bsmod 0; acmod 7, cmixlev, surmixlev, lfeon.
        let mut frame = vec![0x0B, 0x77, 0x00, 0x00, 20, 8 << 3, 0b1110_0001, 0x00];
        frame.resize(768, 0);
        frame
    }

    /// E-AC-3 independent substream, 48 kHz, six blocks, stereo.
    fn eac3_frame(words: usize) -> Vec<u8> {
        let frmsiz = words - 1;
        let mut frame = vec![
            0x0B,
            0x77,
            (frmsiz >> 8) as u8 & 0x07,
            frmsiz as u8,
            0b0011_0100,
            16 << 3,
        ];
        frame.resize(words * 2, 0);
        frame
    }

    #[test]
    fn test_ac3_header() {
        let frame = parse_syncframe(&ac3_frame()).unwrap();
        assert_eq!(frame.mime_type, mime::AUDIO_AC3);
        assert_eq!(frame.frame_size, 768);
        assert_eq!(frame.sample_rate, 48_000);
        assert_eq!(frame.channel_count, 6);
        assert_eq!(frame.duration_us(), 32_000);
    }

    #[test]
    fn test_eac3_header() {
        let frame = parse_syncframe(&eac3_frame(384)).unwrap();
        assert_eq!(frame.mime_type, mime::AUDIO_E_AC3);
        assert_eq!(frame.frame_size, 768);
        assert_eq!(frame.sample_rate, 48_000);
        assert_eq!(frame.channel_count, 2);
        assert_eq!(frame.sample_count, 1536);
    }

    #[test]
    fn test_extracts_frames() {
        let file = ac3_frame().repeat(5);
        assert!(sniff(&Prefix::from_bytes(file.clone())));
        let mut extractor = Ac3Extractor::new();
        let sink = run_to_end(&mut extractor, &mut SliceInput::new(file)).unwrap();
        assert_eq!(sink.samples.len(), 5);
        assert_eq!(sink.samples[4].time_us, 128_000);
        assert!(!sink.seek_map().unwrap().is_seekable());
    }
}
