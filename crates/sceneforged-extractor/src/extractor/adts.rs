//! AAC in ADTS framing.
//!
//! The header parser is shared with the transport stream reader.

use bytes::Bytes;

use crate::error::{Error, Result};
use crate::extractor::{Extract, Progress};
use crate::input::{ExtractorInput, InputExt, Prefix};
use crate::output::{Output, TrackId};
use crate::params::Parameters;
use crate::sample::SampleFlags;
use crate::seek::{scale, ConstantBitrateSeekMap, IndexSeekMap, SeekMap};
use crate::track::{mime, MediaType, TrackFormat};
use crate::util::aac::{self, AacConfig, FRAME_SAMPLES, SAMPLE_RATES};
use crate::util::id3;

const SNIFF_SEARCH_LEN: usize = 8 * 1024;
const SYNC_SEARCH_LEN: usize = 64 * 1024;
const MIN_MATCHING_FRAMES: usize = 4;
/// Frames averaged to estimate the bitrate for constant bitrate seeking.
const CBR_FRAMES: usize = 1000;
/// Spacing of the points recorded by the frame scan.
const INDEX_INTERVAL_US: i64 = 100_000;
pub(crate) const MAX_HEADER_LEN: usize = 9;

/// Fixed and variable fields of one ADTS header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct AdtsHeader {
    /// MPEG-4 audio object type (profile + 1).
    pub object_type: u8,
    pub frequency_index: u8,
    pub channel_config: u8,
    /// Whole frame, header included.
    pub frame_len: usize,
    /// 7, or 9 when a CRC follows.
    pub header_len: usize,
}

impl AdtsHeader {
    pub fn sample_rate(&self) -> u32 {
        SAMPLE_RATES[usize::from(self.frequency_index)]
    }

    pub fn frame_duration_us(&self) -> i64 {
        scale(i64::from(FRAME_SAMPLES), 1_000_000, i64::from(self.sample_rate()))
    }

    /// Whether `other` belongs to the same stream.
    pub fn matches(&self, other: &AdtsHeader) -> bool {
        self.object_type == other.object_type
            && self.frequency_index == other.frequency_index
            && self.channel_config == other.channel_config
    }

    pub fn format(&self) -> TrackFormat {
        let asc = aac::build_audio_specific_config(self.object_type, self.frequency_index, self.channel_config);
        let config = AacConfig {
            object_type: self.object_type,
            sample_rate: self.sample_rate(),
            channel_count: aac::channel_count(self.channel_config),
        };
        TrackFormat::audio(mime::AUDIO_AAC, config.sample_rate, config.channel_count)
            .with_codecs(config.codec_string())
            .with_initialization_data(vec![Bytes::copy_from_slice(&asc)])
    }
}

/// Parses an ADTS header at the start of `data`.
pub(crate) fn parse_header(data: &[u8]) -> Option<AdtsHeader> {
    let h = data.get(..7)?;
    if h[0] != 0xFF || h[1] & 0xF6 != 0xF0 {
        return None;
    }
    let protection_absent = h[1] & 0x01 != 0;
    let frequency_index = (h[2] >> 2) & 0x0F;
    if usize::from(frequency_index) >= SAMPLE_RATES.len() {
        return None;
    }
    let header_len = if protection_absent { 7 } else { 9 };
    let frame_len = (usize::from(h[3] & 0x03) << 11) | (usize::from(h[4]) << 3) | usize::from(h[5] >> 5);
    if frame_len <= header_len {
        return None;
    }
    Some(AdtsHeader {
        object_type: (h[2] >> 6) + 1,
        frequency_index,
        channel_config: ((h[2] & 0x01) << 2) | (h[3] >> 6),
        frame_len,
        header_len,
    })
}

/// True when `MIN_MATCHING_FRAMES` agreeing frames start at `at`, or the
/// chain reaches the end of a complete buffer after at least two frames.
fn chained_frames(data: &[u8], at: usize, at_end: bool) -> Option<AdtsHeader> {
    let first = parse_header(&data[at..])?;
    let mut position = at + first.frame_len;
    for count in 1..MIN_MATCHING_FRAMES {
        match data.get(position..).filter(|rest| rest.len() >= 7) {
            Some(rest) => {
                let next = parse_header(rest).filter(|next| next.matches(&first))?;
                position += next.frame_len;
            }
            None => return (at_end && (count >= 2 || position == data.len())).then_some(first),
        }
    }
    Some(first)
}

fn find_sync(data: &[u8], search_len: usize, at_end: bool) -> Option<(usize, AdtsHeader)> {
    (0..data.len().min(search_len)).find_map(|at| chained_frames(data, at, at_end).map(|h| (at, h)))
}

/// Accepts agreeing ADTS frames within 8 KiB, after any ID3 tags.
pub(crate) fn sniff(prefix: &Prefix) -> bool {
    let mut data = prefix.bytes();
    while let Some(len) = id3::tag_len(data) {
        let Some(rest) = data.get(len..) else {
            return false;
        };
        data = rest;
    }
    find_sync(data, SNIFF_SEARCH_LEN, prefix.is_complete()).is_some()
}

#[derive(Debug, Clone, Copy)]
struct Stream {
    track: TrackId,
    header: AdtsHeader,
    data_start: u64,
}

pub(crate) struct AdtsExtractor {
    enable_cbr_seeking: bool,
    stream: Option<Stream>,
    base_time_us: i64,
    frames_since_base: u64,
}

impl AdtsExtractor {
    pub fn new(params: &Parameters) -> Self {
        Self {
            enable_cbr_seeking: params.adts_enable_cbr_seeking,
            stream: None,
            base_time_us: 0,
            frames_since_base: 0,
        }
    }

    fn read_header(&mut self, input: &mut dyn ExtractorInput, out: &mut Output<'_>) -> Result<Progress> {
        id3::read_tags(input, false)?;
        let search_start = input.position();
        let mut window = vec![0u8; SYNC_SEARCH_LEN];
        let n = input.read_up_to(&mut window)?;
        window.truncate(n);
        let (offset, header) = find_sync(&window, SYNC_SEARCH_LEN, n < SYNC_SEARCH_LEN)
            .ok_or_else(|| Error::parsing("no ADTS frame sync found"))?;
        let data_start = search_start + offset as u64;
        let seek_map = if self.enable_cbr_seeking {
            self.constant_bitrate_map(input, data_start, &header)?
        } else {
            scan_index(input, data_start, &header)?
        };
        input.seek_to_position(data_start)?;
        let track = out.track(0, MediaType::Audio);
        let mut format = header.format();
        format.max_input_size = Some(0x1FFF);
        out.format(track, format);
        out.end_tracks();
        out.seek_map(seek_map);
        self.stream = Some(Stream {
            track,
            header,
            data_start,
        });
        Ok(Progress::Continue)
    }

    /// Averages the size of the leading frames into a bitrate.
    fn constant_bitrate_map(&self, input: &mut dyn ExtractorInput, data_start: u64, first: &AdtsHeader) -> Result<SeekMap> {
        let Some(length) = input.length() else {
            return Ok(SeekMap::unseekable_from(None, data_start));
        };
        input.seek_to_position(data_start)?;
        let mut frames = 0u64;
        let mut bytes = 0u64;
        let mut position = data_start;
        while frames < CBR_FRAMES as u64 {
            let mut head = [0u8; 7];
            if !input.read_fully(&mut head)? {
                break;
            }
            let Some(header) = parse_header(&head).filter(|h| h.matches(first)) else {
                break;
            };
            frames += 1;
            bytes += header.frame_len as u64;
            position += header.frame_len as u64;
            if position >= length || !input.advance_to(position)? {
                break;
            }
        }
        if frames == 0 {
            return Ok(SeekMap::unseekable_from(None, data_start));
        }
        let average = bytes / frames;
        let bitrate = scale((average * 8) as i64, i64::from(first.sample_rate()), i64::from(FRAME_SAMPLES)) as u32;
        tracing::debug!(frames, average, bitrate, "estimated ADTS bitrate");
        Ok(SeekMap::constant_bitrate(ConstantBitrateSeekMap::new(
            data_start,
            Some(length),
            bitrate,
            average as u32,
        )))
    }

    fn read_frame(&mut self, input: &mut dyn ExtractorInput, out: &mut Output<'_>, stream: Stream) -> Result<Progress> {
        let position = input.position();
        if position < stream.data_start {
            input.seek_to_position(stream.data_start)?;
            return Ok(Progress::Continue);
        }
        let mut head = [0u8; MAX_HEADER_LEN];
        let n = input.read_up_to(&mut head)?;
        if n < 7 {
            return Ok(Progress::EndOfInput);
        }
        let Some(header) = parse_header(&head[..n]).filter(|h| h.matches(&stream.header)) else {
            return self.resync(input, position, &stream);
        };
        input.seek_to_position(position)?;
        let Some(frame) = input.read_to_vec(header.frame_len)? else {
            return Ok(Progress::EndOfInput);
        };
        let time_us = self.base_time_us + scale(
            (self.frames_since_base * u64::from(FRAME_SAMPLES)) as i64,
            1_000_000,
            i64::from(header.sample_rate()),
        );
        out.sample(stream.track, time_us, SampleFlags::KEY_FRAME, &frame[header.header_len..], None)?;
        self.frames_since_base += 1;
        Ok(Progress::Continue)
    }

    fn resync(&self, input: &mut dyn ExtractorInput, position: u64, stream: &Stream) -> Result<Progress> {
        input.seek_to_position(position)?;
        let mut window = vec![0u8; SYNC_SEARCH_LEN];
        let n = input.read_up_to(&mut window)?;
        window.truncate(n);
        let found = (1..n).find(|&at| parse_header(&window[at..]).is_some_and(|h| h.matches(&stream.header)));
        match found {
            Some(at) => {
                tracing::debug!(position, skipped = at, "resynchronised ADTS");
                input.seek_to_position(position + at as u64)?;
                Ok(Progress::Continue)
            }
            None => Ok(Progress::EndOfInput),
        }
    }
}

/// Walks every frame header to build an exact index. Only used when the
/// input length is known.
fn scan_index(input: &mut dyn ExtractorInput, data_start: u64, first: &AdtsHeader) -> Result<SeekMap> {
    let Some(length) = input.length() else {
        return Ok(SeekMap::unseekable_from(None, data_start));
    };
    let mut index = IndexSeekMap::new(None);
    let mut position = data_start;
    let mut frames = 0u64;
    let mut last_point_us = i64::MIN;
    input.seek_to_position(position)?;
    loop {
        let mut head = [0u8; 7];
        if !input.read_fully(&mut head)? {
            break;
        }
        let Some(header) = parse_header(&head).filter(|h| h.matches(first)) else {
            break;
        };
        let time_us = scale((frames * u64::from(FRAME_SAMPLES)) as i64, 1_000_000, i64::from(first.sample_rate()));
        if time_us - last_point_us >= INDEX_INTERVAL_US {
            index.push(time_us, position);
            last_point_us = time_us;
        }
        frames += 1;
        position += header.frame_len as u64;
        if position >= length || !input.advance_to(position)? {
            break;
        }
    }
    if index.is_empty() {
        return Ok(SeekMap::unseekable_from(None, data_start));
    }
    let duration_us = scale((frames * u64::from(FRAME_SAMPLES)) as i64, 1_000_000, i64::from(first.sample_rate()));
    tracing::debug!(frames, duration_us, "indexed ADTS frames");
    index.set_duration_us(Some(duration_us));
    Ok(SeekMap::index(index))
}

impl Extract for AdtsExtractor {
    fn read(&mut self, input: &mut dyn ExtractorInput, out: &mut Output<'_>) -> Result<Progress> {
        match self.stream {
            Some(stream) => self.read_frame(input, out, stream),
            None => self.read_header(input, out),
        }
    }

    fn seek(&mut self, _position: u64, time_us: i64) {
        self.base_time_us = time_us.max(0);
        self.frames_since_base = 0;
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::extractor::run_to_end;
    use crate::input::SliceInput;

    /// AAC-LC stereo 44.1 kHz frame without CRC.
    pub(crate) fn adts_frame(payload: &[u8]) -> Vec<u8> {
        let len = payload.len() + 7;
        let mut frame = vec![
            0xFF,
            0xF1,
            (1 << 6) | (4 << 2),
            (2 << 6) | ((len >> 11) & 0x03) as u8,
            ((len >> 3) & 0xFF) as u8,
            (((len & 0x07) << 5) as u8) | 0x1F,
            0xFC,
        ];
        frame.extend_from_slice(payload);
        frame
    }

    fn stream(frames: usize) -> Vec<u8> {
        (0..frames).flat_map(|i| adts_frame(&[i as u8; 100])).collect()
    }

    #[test]
    fn test_parse_header() {
        let header = parse_header(&adts_frame(&[0; 10])).unwrap();
        assert_eq!(header.object_type, 2);
        assert_eq!(header.sample_rate(), 44_100);
        assert_eq!(header.channel_config, 2);
        assert_eq!(header.frame_len, 17);
        assert_eq!(header.header_len, 7);
        let format = header.format();
        assert_eq!(format.codecs.as_deref(), Some("mp4a.40.2"));
        assert_eq!(&format.initialization_data[0][..], &[0x12, 0x10]);
    }

    #[test]
    fn test_sniff() {
        assert!(sniff(&Prefix::from_bytes(stream(5))));
        assert!(!sniff(&Prefix::from_bytes(vec![0xFF; 64])));
    }

    #[test]
    fn test_frames_and_timing() {
        let mut extractor = AdtsExtractor::new(&Parameters::default());
        let sink = run_to_end(&mut extractor, &mut SliceInput::new(stream(6)).with_max_read(33)).unwrap();
        assert_eq!(sink.samples.len(), 6);
        assert_eq!(sink.samples[2].time_us, scale(2048, 1_000_000, 44_100));
        assert_eq!(&sink.samples[5].data[..], &[5u8; 100][..]);
    }

    #[test]
    fn test_scanned_index_without_constant_bitrate() {
        let mut extractor = AdtsExtractor::new(&Parameters::default());
        let sink = run_to_end(&mut extractor, &mut SliceInput::new(stream(10))).unwrap();
        let map = sink.seek_map().unwrap();
        assert!(map.is_seekable());
        assert_eq!(map.duration_us(), Some(scale(10 * 1024, 1_000_000, 44_100)));
        let points = map.seek_points(scale(5 * 1024, 1_000_000, 44_100));
        assert_eq!(points.first.position % 107, 0);
        assert!(points.first.time_us <= scale(5 * 1024, 1_000_000, 44_100));
        assert_eq!(sink.samples.len(), 10);
        assert_eq!(sink.samples[0].time_us, 0);
    }

    #[test]
    fn test_constant_bitrate_seeking() {
        let mut params = Parameters::default();
        params.adts_enable_cbr_seeking = true;
        let mut extractor = AdtsExtractor::new(&params);
        let sink = run_to_end(&mut extractor, &mut SliceInput::new(stream(10))).unwrap();
        let map = sink.seek_map().unwrap();
        assert!(map.is_seekable());
        assert_eq!(map.seek_points(map.duration_us().unwrap() / 2).first.position % 107, 0);
        assert_eq!(sink.samples.len(), 10);
    }
}
