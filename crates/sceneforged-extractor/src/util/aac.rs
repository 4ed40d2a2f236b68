//! AAC AudioSpecificConfig reading and synthesis.

use super::bits::Bits;
use crate::error::{Error, Result};

pub(crate) const SAMPLE_RATES: [u32; 13] = [
    96_000, 88_200, 64_000, 48_000, 44_100, 32_000, 24_000, 22_050, 16_000, 12_000, 11_025, 8_000,
    7_350,
];

const CHANNEL_COUNTS: [u32; 16] = [0, 1, 2, 3, 4, 5, 6, 8, 0, 0, 0, 7, 8, 0, 8, 0];

/// Samples per AAC frame.
pub(crate) const FRAME_SAMPLES: u32 = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct AacConfig {
    pub object_type: u8,
    pub sample_rate: u32,
    pub channel_count: u32,
}

impl AacConfig {
    pub fn codec_string(&self) -> String {
        format!("mp4a.40.{}", self.object_type)
    }
}

fn object_type(bits: &mut Bits<'_>) -> Result<u8> {
    let object_type = bits.read_bits(5)? as u8;
    if object_type == 31 {
        return Ok(32 + bits.read_bits(6)? as u8);
    }
    Ok(object_type)
}

fn sample_rate(bits: &mut Bits<'_>) -> Result<u32> {
    let index = bits.read_bits(4)?;
    if index == 0x0F {
        return bits.read_bits(24);
    }
    SAMPLE_RATES
        .get(index as usize)
        .copied()
        .ok_or_else(|| Error::parsing(format!("reserved AAC sampling frequency index {index}")))
}

/// Parses the leading fields of an AudioSpecificConfig.
pub(crate) fn parse_audio_specific_config(data: &[u8]) -> Result<AacConfig> {
    let mut bits = Bits::new(data);
    let mut object_type = object_type(&mut bits)?;
    let mut sample_rate = sample_rate(&mut bits)?;
    let channel_config = bits.read_bits(4)?;
    // Explicit SBR/PS signalling carries the extension rate and core type.
    if object_type == 5 || object_type == 29 {
        sample_rate = self::sample_rate(&mut bits)?;
        object_type = self::object_type(&mut bits)?;
    }
    Ok(AacConfig {
        object_type,
        sample_rate,
        channel_count: CHANNEL_COUNTS[channel_config as usize],
    })
}

/// Two-byte AudioSpecificConfig for the given ADTS-style fields.
pub(crate) fn build_audio_specific_config(object_type: u8, frequency_index: u8, channel_config: u8) -> [u8; 2] {
    [
        (object_type << 3) | ((frequency_index >> 1) & 0x07),
        ((frequency_index & 0x01) << 7) | ((channel_config & 0x0F) << 3),
    ]
}

pub(crate) fn channel_count(channel_config: u8) -> u32 {
    CHANNEL_COUNTS[usize::from(channel_config & 0x0F)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lc_stereo_44100() {
        let asc = build_audio_specific_config(2, 4, 2);
        assert_eq!(asc, [0x12, 0x10]);
        let config = parse_audio_specific_config(&asc).unwrap();
        assert_eq!(config.sample_rate, 44_100);
        assert_eq!(config.channel_count, 2);
        assert_eq!(config.codec_string(), "mp4a.40.2");
    }

    #[test]
    fn test_he_aac_uses_extension_rate() {
        // SBR (5) at 24 kHz, mono, extension 48 kHz, core LC.
        let config = parse_audio_specific_config(&[0x2B, 0x09, 0x88, 0x00]).unwrap();
        assert_eq!(config.object_type, 2);
        assert_eq!(config.sample_rate, 48_000);
        assert_eq!(config.channel_count, 1);
    }
}
