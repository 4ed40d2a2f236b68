//! MPEG-1/2/2.5 audio frame headers (layers I-III).

use crate::track::mime;

const SAMPLING_RATE_V1: [u32; 3] = [44_100, 48_000, 32_000];

const BITRATE_V1_L1: [u32; 14] = [
    32, 64, 96, 128, 160, 192, 224, 256, 288, 320, 352, 384, 416, 448,
];
const BITRATE_V2_L1: [u32; 14] = [32, 48, 56, 64, 80, 96, 112, 128, 144, 160, 176, 192, 224, 256];
const BITRATE_V1_L2: [u32; 14] = [32, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320, 384];
const BITRATE_V1_L3: [u32; 14] = [32, 40, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320];
const BITRATE_V2: [u32; 14] = [8, 16, 24, 32, 40, 48, 56, 64, 80, 96, 112, 128, 144, 160];

/// Largest possible frame, used to bound sync searches.
pub(crate) const MAX_FRAME_SIZE: usize = 4096;

/// Decoded fields of a 4-byte frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct MpegAudioHeader {
    /// 3 = MPEG-1, 2 = MPEG-2, 0 = MPEG-2.5.
    pub version: u8,
    pub layer: u8,
    pub sample_rate: u32,
    pub channels: u32,
    pub bitrate: u32,
    pub frame_size: usize,
    pub samples_per_frame: u32,
}

impl MpegAudioHeader {
    pub fn mime_type(&self) -> &'static str {
        match self.layer {
            1 => mime::AUDIO_MPEG_L1,
            2 => mime::AUDIO_MPEG_L2,
            _ => mime::AUDIO_MPEG,
        }
    }

    pub fn frame_duration_us(&self) -> i64 {
        i64::from(self.samples_per_frame) * 1_000_000 / i64::from(self.sample_rate)
    }
}

/// Frame size of the header in `word`, `None` when it is not a valid header.
pub(crate) fn frame_size(word: u32) -> Option<usize> {
    parse_header(word).map(|h| h.frame_size)
}

pub(crate) fn parse_header(word: u32) -> Option<MpegAudioHeader> {
    if word & 0xFFE0_0000 != 0xFFE0_0000 {
        return None;
    }
    let version = ((word >> 19) & 3) as u8;
    if version == 1 {
        return None;
    }
    let layer_bits = (word >> 17) & 3;
    if layer_bits == 0 {
        return None;
    }
    let layer = (4 - layer_bits) as u8;
    let bitrate_index = ((word >> 12) & 0xF) as usize;
    if bitrate_index == 0 || bitrate_index == 0xF {
        return None;
    }
    let rate_index = ((word >> 10) & 3) as usize;
    if rate_index == 3 {
        return None;
    }
    let padding = (word >> 9) & 1;
    let sample_rate = match version {
        3 => SAMPLING_RATE_V1[rate_index],
        2 => SAMPLING_RATE_V1[rate_index] / 2,
        _ => SAMPLING_RATE_V1[rate_index] / 4,
    };
    let mpeg1 = version == 3;
    let bitrate = match (layer, mpeg1) {
        (1, true) => BITRATE_V1_L1[bitrate_index - 1],
        (1, false) => BITRATE_V2_L1[bitrate_index - 1],
        (2, true) => BITRATE_V1_L2[bitrate_index - 1],
        (3, true) => BITRATE_V1_L3[bitrate_index - 1],
        _ => BITRATE_V2[bitrate_index - 1],
    } * 1000;
    let (frame_size, samples_per_frame) = match layer {
        1 => ((12 * bitrate / sample_rate + padding) * 4, 384),
        2 => (144 * bitrate / sample_rate + padding, 1152),
        _ if mpeg1 => (144 * bitrate / sample_rate + padding, 1152),
        _ => (72 * bitrate / sample_rate + padding, 576),
    };
    let channels = if (word >> 6) & 3 == 3 { 1 } else { 2 };
    Some(MpegAudioHeader {
        version,
        layer,
        sample_rate,
        channels,
        bitrate,
        frame_size: frame_size as usize,
        samples_per_frame,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// MPEG-1 layer III, 128 kbit/s, 44.1 kHz, joint stereo, no padding.
    pub(crate) const HEADER_128K_44100: u32 = 0xFFFB_9064;

    #[test]
    fn test_layer3_frame() {
        let header = parse_header(HEADER_128K_44100).unwrap();
        assert_eq!(header.frame_size, 417);
        assert_eq!(header.sample_rate, 44_100);
        assert_eq!(header.channels, 2);
        assert_eq!(header.samples_per_frame, 1152);
        assert_eq!(header.mime_type(), mime::AUDIO_MPEG);
    }

    #[test]
    fn test_rejects_reserved_fields() {
        assert_eq!(frame_size(0xFFFB_F064), None);
        assert_eq!(frame_size(0xFFFB_9C64), None);
        assert_eq!(frame_size(0x1234_5678), None);
    }
}
