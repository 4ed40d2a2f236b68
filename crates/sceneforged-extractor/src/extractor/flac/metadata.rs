//! FLAC metadata blocks: STREAMINFO, SEEKTABLE and Vorbis comments.

use bytes::Bytes;

use crate::error::{Error, Result};
use crate::seek::scale;
use crate::track::{mime, TrackFormat};
use crate::util::bits::Bits;
use crate::util::cursor::ByteCursor;

pub(crate) const STREAM_MARKER: &[u8; 4] = b"fLaC";
pub(crate) const STREAMINFO_LEN: usize = 34;

pub(crate) mod block_type {
    pub const STREAMINFO: u8 = 0;
    pub const SEEKTABLE: u8 = 3;
    pub const VORBIS_COMMENT: u8 = 4;
}

/// The mandatory first metadata block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct StreamInfo {
    pub min_block_size: u32,
    pub max_block_size: u32,
    pub min_frame_size: u32,
    /// Zero when unknown.
    pub max_frame_size: u32,
    pub sample_rate: u32,
    pub channels: u32,
    pub bits_per_sample: u32,
    /// Zero when unknown.
    pub total_samples: u64,
    raw: Bytes,
}

impl StreamInfo {
    pub fn parse(body: &[u8]) -> Result<Self> {
        if body.len() < STREAMINFO_LEN {
            return Err(Error::parsing(format!("STREAMINFO of {} bytes", body.len())));
        }
        let mut bits = Bits::new(body);
        let info = Self {
            min_block_size: bits.read_bits(16)?,
            max_block_size: bits.read_bits(16)?,
            min_frame_size: bits.read_bits(24)?,
            max_frame_size: bits.read_bits(24)?,
            sample_rate: bits.read_bits(20)?,
            channels: bits.read_bits(3)? + 1,
            bits_per_sample: bits.read_bits(5)? + 1,
            total_samples: bits.read_bits_u64(36)?,
            raw: Bytes::copy_from_slice(&body[..STREAMINFO_LEN]),
        };
        if info.sample_rate == 0 {
            return Err(Error::parsing("STREAMINFO with a zero sample rate"));
        }
        Ok(info)
    }

    pub fn fixed_block_size(&self) -> Option<u32> {
        (self.min_block_size == self.max_block_size).then_some(self.max_block_size)
    }

    pub fn samples_to_us(&self, samples: u64) -> i64 {
        scale(samples as i64, 1_000_000, i64::from(self.sample_rate))
    }

    pub fn duration_us(&self) -> Option<i64> {
        (self.total_samples > 0).then(|| self.samples_to_us(self.total_samples))
    }

    /// Track format whose initialization data is the stream marker followed
    /// by this block, flagged as the last metadata block.
    pub fn format(&self) -> TrackFormat {
        let mut init = STREAM_MARKER.to_vec();
        init.extend_from_slice(&[0x80, 0, 0, STREAMINFO_LEN as u8]);
        init.extend_from_slice(&self.raw);
        let mut format = TrackFormat::audio(mime::AUDIO_FLAC, self.sample_rate, self.channels)
            .with_initialization_data(vec![Bytes::from(init)]);
        format.max_input_size = (self.max_frame_size > 0).then_some(self.max_frame_size as usize);
        format
    }
}

/// One SEEKTABLE entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SeekPointEntry {
    pub sample_number: u64,
    /// Offset of the target frame from the first frame.
    pub offset: u64,
}

pub(crate) fn parse_seek_table(body: &[u8]) -> Vec<SeekPointEntry> {
    body.chunks_exact(18)
        .map(|entry| SeekPointEntry {
            sample_number: crate::util::be_u64(entry, 0),
            offset: crate::util::be_u64(entry, 8),
        })
        .filter(|entry| entry.sample_number != u64::MAX)
        .collect()
}

/// Parses a Vorbis comment block (shared by FLAC, Ogg Vorbis and Opus).
/// Comments without `=` are dropped.
pub(crate) fn parse_vorbis_comments(data: &[u8]) -> Result<Vec<(String, String)>> {
    let mut c = ByteCursor::new(data);
    let vendor_len = c.read_u32_le()? as usize;
    c.skip(vendor_len)?;
    let count = c.read_u32_le()?;
    let mut comments = Vec::new();
    for _ in 0..count {
        let len = c.read_u32_le()? as usize;
        let comment = String::from_utf8_lossy(c.read_bytes(len)?);
        if let Some((key, value)) = comment.split_once('=') {
            comments.push((key.to_ascii_uppercase(), value.to_string()));
        }
    }
    Ok(comments)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// STREAMINFO for 44.1 kHz stereo 16-bit with fixed 4096-sample blocks.
    pub(crate) fn streaminfo(total_samples: u64) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&4096u16.to_be_bytes());
        body.extend_from_slice(&4096u16.to_be_bytes());
        body.extend_from_slice(&[0, 0, 14, 0, 0x40, 0]);
        let packed: u64 = (44_100u64 << 44) | (1 << 41) | (15 << 36) | total_samples;
        body.extend_from_slice(&packed.to_be_bytes());
        body.extend_from_slice(&[0; 16]);
        body
    }

    pub(crate) fn vorbis_comment(pairs: &[&str]) -> Vec<u8> {
        let mut out = 3u32.to_le_bytes().to_vec();
        out.extend_from_slice(b"enc");
        out.extend_from_slice(&(pairs.len() as u32).to_le_bytes());
        for pair in pairs {
            out.extend_from_slice(&(pair.len() as u32).to_le_bytes());
            out.extend_from_slice(pair.as_bytes());
        }
        out
    }

    #[test]
    fn test_streaminfo() {
        let info = StreamInfo::parse(&streaminfo(88_200)).unwrap();
        assert_eq!(info.fixed_block_size(), Some(4096));
        assert_eq!(info.max_frame_size, 0x4000);
        assert_eq!(info.sample_rate, 44_100);
        assert_eq!(info.channels, 2);
        assert_eq!(info.bits_per_sample, 16);
        assert_eq!(info.duration_us(), Some(2_000_000));
        let format = info.format();
        assert_eq!(format.initialization_data[0].len(), 42);
        assert_eq!(&format.initialization_data[0][..8], b"fLaC\x80\0\0\x22");
    }

    #[test]
    fn test_vorbis_comments() {
        let comments = parse_vorbis_comments(&vorbis_comment(&["title=Song", "broken"])).unwrap();
        assert_eq!(comments, vec![("TITLE".to_string(), "Song".to_string())]);
    }
}
