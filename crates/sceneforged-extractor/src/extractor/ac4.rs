//! Dolby AC-4 sync frames.

use super::elementary::{SyncFrame, SyncFrameExtractor, SyncFrameFormat};
use crate::input::Prefix;
use crate::track::mime;
use crate::util::bits::Bits;

pub(crate) const SYNC_WORD: u16 = 0xAC40;
pub(crate) const SYNC_WORD_CRC: u16 = 0xAC41;
/// Samples per frame at 48 kHz, indexed by `frame_rate_index`.
const SAMPLE_COUNT_48K: [u32; 14] = [2002, 2000, 1920, 1601, 1600, 1001, 1000, 960, 800, 800, 480, 400, 400, 2048];
const CHANNEL_COUNT: u32 = 2;

pub(crate) struct Ac4;

impl SyncFrameFormat for Ac4 {
    const NAME: &'static str = "AC-4";
    const HEADER_LEN: usize = 16;

    fn parse(data: &[u8]) -> Option<SyncFrame> {
        parse_syncframe(data)
    }
}

pub(crate) type Ac4Extractor = SyncFrameExtractor<Ac4>;

pub(crate) fn sniff(prefix: &Prefix) -> bool {
    super::elementary::sniff::<Ac4>(prefix)
}

fn variable_bits(bits: &mut Bits<'_>, width: u32) -> Option<u32> {
    let mut value = 0;
    loop {
        value += bits.read_bits(width).ok()?;
        if !bits.read_bit().ok()? {
            return Some(value);
        }
        value = (value + 1) << width;
    }
}

/// Parses an AC-4 sync frame at the start of `data`. The frame size covers
/// the sync header and trailing CRC.
pub(crate) fn parse_syncframe(data: &[u8]) -> Option<SyncFrame> {
    let mut bits = Bits::new(data);
    let sync = bits.read_bits(16).ok()? as u16;
    if sync != SYNC_WORD && sync != SYNC_WORD_CRC {
        return None;
    }
    let mut header_len = 4;
    let mut payload = bits.read_bits(16).ok()? as usize;
    if payload == 0xFFFF {
        payload = bits.read_bits(24).ok()? as usize;
        header_len = 7;
    }
    let crc_len = if sync == SYNC_WORD_CRC { 2 } else { 0 };
    let mut version = bits.read_bits(2).ok()?;
    if version == 3 {
        version += variable_bits(&mut bits, 2)?;
    }
    if version > 2 {
        return None;
    }
    bits.skip_bits(10).ok()?;
    if bits.read_bit().ok()? && bits.read_bits(3).ok()? > 0 {
        bits.skip_bits(2).ok()?;
    }
    let sample_rate = if bits.read_bit().ok()? { 48_000 } else { 44_100 };
    let frame_rate_index = bits.read_bits(4).ok()? as usize;
    let sample_count = if sample_rate == 44_100 {
        (frame_rate_index == 13).then_some(2048)?
    } else {
        *SAMPLE_COUNT_48K.get(frame_rate_index)?
    };
    Some(SyncFrame {
        mime_type: mime::AUDIO_AC4,
        frame_size: header_len + payload + crc_len,
        sample_rate,
        channel_count: CHANNEL_COUNT,
        sample_count,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::extractor::run_to_end;
    use crate::input::SliceInput;

    /// 48 kHz frame at frame rate index 7 (960 samples, 20 ms) with a CRC.
    pub(crate) fn ac4_frame(payload: usize) -> Vec<u8> {
        let mut frame = SYNC_WORD_CRC.to_be_bytes().to_vec();
        frame.extend_from_slice(&(payload as u16).to_be_bytes());
        // version 0, sequence counter 0, no wait frames, fs_index 1, frame_rate_index 7.
        frame.extend_from_slice(&[0x00, 0b0000_0101, 0b1100_0000, 0x00]);
        frame.resize(4 + payload + 2, 0);
        frame
    }

    #[test]
    fn test_header() {
        let frame = parse_syncframe(&ac4_frame(100)).unwrap();
        assert_eq!(frame.frame_size, 106);
        assert_eq!(frame.sample_rate, 48_000);
        assert_eq!(frame.sample_count, 960);
        assert!(parse_syncframe(&[0xAC, 0x42, 0, 0]).is_none());
    }

    #[test]
    fn test_extracts_frames() {
        let file = ac4_frame(100).repeat(4);
        assert!(sniff(&Prefix::from_bytes(file.clone())));
        let mut extractor = Ac4Extractor::new();
        let sink = run_to_end(&mut extractor, &mut SliceInput::new(file)).unwrap();
        assert_eq!(sink.samples.len(), 4);
        assert_eq!(sink.samples[3].time_us, 60_000);
        assert_eq!(sink.track(0).unwrap().format.sample_mime_type.as_deref(), Some(mime::AUDIO_AC4));
    }
}
