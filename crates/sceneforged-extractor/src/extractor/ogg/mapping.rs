//! Codec mappings: identification and header packets, granule clocks and
//! packet durations for Vorbis, Opus and FLAC in Ogg.

use bytes::Bytes;

use crate::error::{Error, Result};
use crate::extractor::flac::frame::parse_frame_header;
use crate::extractor::flac::metadata::{block_type, parse_vorbis_comments, StreamInfo, STREAMINFO_LEN};
use crate::seek::scale;
use crate::track::{mime, TrackFormat};

const VORBIS_ID: &[u8] = b"\x01vorbis";
const VORBIS_COMMENT: &[u8] = b"\x03vorbis";
const VORBIS_SETUP: &[u8] = b"\x05vorbis";
const OPUS_HEAD: &[u8] = b"OpusHead";
const OPUS_TAGS: &[u8] = b"OpusTags";
const FLAC_MAPPING: &[u8] = b"\x7fFLAC";
/// Mapping header, `fLaC`, one metadata block header and STREAMINFO.
const FLAC_FIRST_PACKET_LEN: usize = 13 + 4 + STREAMINFO_LEN;
const OPUS_CLOCK: u32 = 48_000;
const OPUS_SEEK_PREROLL_NS: u64 = 80_000_000;

/// True for identification headers the generic Ogg sniffer accepts.
pub(crate) fn sniffable(packet: &[u8]) -> bool {
    packet.starts_with(VORBIS_ID) || packet.starts_with(FLAC_MAPPING)
}

#[derive(Debug, Clone)]
pub(crate) enum Codec {
    Vorbis,
    Opus,
    Flac(StreamInfo),
}

#[derive(Debug, Clone)]
pub(crate) struct Mapping {
    pub codec: Codec,
    pub format: TrackFormat,
    /// Header packets still expected.
    pub headers_left: usize,
    clock: u32,
}

impl Mapping {
    /// Reads the identification header that opens a logical stream.
    pub fn identify(packet: &[u8]) -> Result<Self> {
        if packet.starts_with(VORBIS_ID) {
            if packet.len() < 30 {
                return Err(Error::parsing("short Vorbis identification header"));
            }
            let channels = u32::from(packet[11]);
            let rate = crate::util::le_u32(packet, 12);
            let nominal = crate::util::le_u32(packet, 20) as i32;
            let mut format = TrackFormat::audio(mime::AUDIO_VORBIS, rate, channels)
                .with_initialization_data(vec![Bytes::copy_from_slice(packet)]);
            format.average_bitrate = u32::try_from(nominal).ok().filter(|&b| b > 0);
            return Ok(Self::new(Codec::Vorbis, format, 2, rate));
        }
        if packet.starts_with(OPUS_HEAD) {
            if packet.len() < 19 {
                return Err(Error::parsing("short OpusHead"));
            }
            let channels = u32::from(packet[9]);
            let pre_skip = crate::util::le_u16(packet, 10);
            let pre_skip_ns = u64::from(pre_skip) * 1_000_000_000 / u64::from(OPUS_CLOCK);
            let mut format = TrackFormat::audio(mime::AUDIO_OPUS, OPUS_CLOCK, channels).with_initialization_data(vec![
                Bytes::copy_from_slice(packet),
                Bytes::copy_from_slice(&pre_skip_ns.to_le_bytes()),
                Bytes::copy_from_slice(&OPUS_SEEK_PREROLL_NS.to_le_bytes()),
            ]);
            format.encoder_delay = u32::from(pre_skip);
            return Ok(Self::new(Codec::Opus, format, 1, OPUS_CLOCK));
        }
        if packet.starts_with(FLAC_MAPPING) {
            if packet.len() < FLAC_FIRST_PACKET_LEN || &packet[9..13] != b"fLaC" {
                return Err(Error::parsing("malformed Ogg FLAC mapping header"));
            }
            let header_packets = usize::from(crate::util::be_u16(packet, 7));
            let info = StreamInfo::parse(&packet[17..])?;
            let format = info.format();
            let rate = info.sample_rate;
            return Ok(Self::new(Codec::Flac(info), format, header_packets, rate));
        }
        Err(Error::parsing("unsupported codec in Ogg stream"))
    }

    fn new(codec: Codec, format: TrackFormat, headers_left: usize, clock: u32) -> Self {
        Self {
            codec,
            format,
            headers_left,
            clock,
        }
    }

    /// Consumes one header packet following the identification header.
    pub fn header(&mut self, packet: &[u8]) -> Result<()> {
        self.headers_left = self.headers_left.saturating_sub(1);
        match &self.codec {
            Codec::Vorbis if packet.starts_with(VORBIS_COMMENT) => {
                self.format.metadata = parse_vorbis_comments(&packet[VORBIS_COMMENT.len()..]).unwrap_or_default();
            }
            Codec::Vorbis if packet.starts_with(VORBIS_SETUP) => {
                self.format.initialization_data.push(Bytes::copy_from_slice(packet));
            }
            Codec::Vorbis => return Err(Error::parsing("unexpected Vorbis header packet")),
            Codec::Opus if packet.starts_with(OPUS_TAGS) => {
                self.format.metadata = parse_vorbis_comments(&packet[OPUS_TAGS.len()..]).unwrap_or_default();
            }
            Codec::Opus => return Err(Error::parsing("expected OpusTags")),
            Codec::Flac(_) => {
                if packet.first().map(|b| b & 0x7F) == Some(block_type::VORBIS_COMMENT) {
                    self.format.metadata = parse_vorbis_comments(packet.get(4..).unwrap_or_default()).unwrap_or_default();
                }
            }
        }
        Ok(())
    }

    pub fn headers_done(&self) -> bool {
        self.headers_left == 0
    }

    pub fn granule_to_us(&self, granule: i64) -> i64 {
        scale(granule.max(0), 1_000_000, i64::from(self.clock))
    }

    /// Exact duration of an audio packet in granule units, when the codec
    /// encodes it in the packet itself.
    pub fn packet_granules(&self, packet: &[u8]) -> Option<i64> {
        match self.codec {
            Codec::Opus => Some(opus_packet_samples(packet)),
            Codec::Vorbis | Codec::Flac(_) => None,
        }
    }

    /// Granule position at which an audio packet starts, when the packet
    /// says so.
    pub fn packet_start(&self, packet: &[u8]) -> Option<i64> {
        match &self.codec {
            Codec::Flac(info) => parse_frame_header(packet, info).map(|h| h.first_sample as i64),
            Codec::Vorbis | Codec::Opus => None,
        }
    }
}

/// Decoded 48 kHz samples of an Opus packet (RFC 6716 section 3.1).
fn opus_packet_samples(packet: &[u8]) -> i64 {
    let Some(&toc) = packet.first() else {
        return 0;
    };
    let config = usize::from(toc >> 3);
    let frame_us: i64 = match config {
        0..=11 => [10_000, 20_000, 40_000, 60_000][config & 3],
        12..=15 => [10_000, 20_000][config & 1],
        _ => [2_500, 5_000, 10_000, 20_000][config & 3],
    };
    let frames = match toc & 0x03 {
        0 => 1,
        1 | 2 => 2,
        _ => packet.get(1).map_or(0, |b| i64::from(b & 0x3F)),
    };
    frames * frame_us * i64::from(OPUS_CLOCK) / 1_000_000
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::extractor::flac::metadata::tests::streaminfo;

    pub(crate) fn vorbis_id(rate: u32) -> Vec<u8> {
        let mut out = VORBIS_ID.to_vec();
        out.extend_from_slice(&0u32.to_le_bytes());
        out.push(2);
        out.extend_from_slice(&rate.to_le_bytes());
        out.extend_from_slice(&0i32.to_le_bytes());
        out.extend_from_slice(&128_000i32.to_le_bytes());
        out.extend_from_slice(&0i32.to_le_bytes());
        out.extend_from_slice(&[0xB8, 0x01]);
        out
    }

    pub(crate) fn opus_head(pre_skip: u16) -> Vec<u8> {
        let mut out = OPUS_HEAD.to_vec();
        out.extend_from_slice(&[1, 2]);
        out.extend_from_slice(&pre_skip.to_le_bytes());
        out.extend_from_slice(&48_000u32.to_le_bytes());
        out.extend_from_slice(&[0, 0, 0]);
        out
    }

    pub(crate) fn flac_mapping_header(header_packets: u16) -> Vec<u8> {
        let mut out = FLAC_MAPPING.to_vec();
        out.extend_from_slice(&[1, 0]);
        out.extend_from_slice(&header_packets.to_be_bytes());
        out.extend_from_slice(b"fLaC");
        out.extend_from_slice(&[0, 0, 0, STREAMINFO_LEN as u8]);
        out.extend_from_slice(&streaminfo(0));
        out
    }

    #[test]
    fn test_vorbis_identification() {
        let mapping = Mapping::identify(&vorbis_id(44_100)).unwrap();
        assert_eq!(mapping.format.sample_rate, Some(44_100));
        assert_eq!(mapping.format.channel_count, Some(2));
        assert_eq!(mapping.format.average_bitrate, Some(128_000));
        assert_eq!(mapping.headers_left, 2);
        assert_eq!(mapping.granule_to_us(44_100), 1_000_000);
    }

    #[test]
    fn test_opus_identification() {
        let mapping = Mapping::identify(&opus_head(312)).unwrap();
        assert_eq!(mapping.format.encoder_delay, 312);
        assert_eq!(mapping.format.initialization_data.len(), 3);
        assert_eq!(mapping.format.sample_rate, Some(48_000));
    }

    #[test]
    fn test_opus_packet_durations() {
        // 20 ms CELT frame, one frame per packet.
        assert_eq!(opus_packet_samples(&[19 << 3]), 960);
        // Two 10 ms SILK frames.
        assert_eq!(opus_packet_samples(&[0x01]), 960);
        // Code 3 with three 2.5 ms frames.
        assert_eq!(opus_packet_samples(&[(16 << 3) | 3, 3]), 360);
    }

    #[test]
    fn test_flac_mapping() {
        let mapping = Mapping::identify(&flac_mapping_header(1)).unwrap();
        assert!(matches!(mapping.codec, Codec::Flac(_)));
        assert_eq!(mapping.headers_left, 1);
        assert!(sniffable(&flac_mapping_header(1)));
        assert!(!sniffable(&opus_head(0)));
    }

    #[test]
    fn test_unknown_codec() {
        assert!(Mapping::identify(b"\x80theora").is_err());
    }
}
