//! Elementary stream readers fed with whole PES payloads.
//!
//! Each reader owns one track. Times arrive already mapped onto the
//! session timeline; payloads without a timestamp continue from the last
//! one.

use bytes::Bytes;

use crate::error::Result;
use crate::extractor::elementary::SyncFrame;
use crate::extractor::{ac3, ac4, adts};
use crate::output::{Output, TrackId};
use crate::sample::SampleFlags;
use crate::track::{mime, TrackFormat};
use crate::util::bits::Bits;
use crate::util::nal::{self, find_start_code};
use crate::util::{be_u32, id3, mpeg_audio};

/// Consumer of reassembled PES payloads for one track.
pub(crate) trait PesReader {
    /// Emits formats that are known before any payload arrives.
    fn init(&mut self, _out: &mut Output<'_>) {}

    fn consume(&mut self, time_us: Option<i64>, payload: &[u8], out: &mut Output<'_>) -> Result<()>;

    /// Drops partial state after a seek or a continuity error.
    fn seek(&mut self);
}

/// Byte ranges of the start-code-delimited units in `data`, each starting
/// at its `00 00 01` (or `00 00 00 01`) prefix.
fn split_units(data: &[u8]) -> Vec<(usize, usize)> {
    let mut starts = Vec::new();
    let mut from = 0;
    while let Some(at) = find_start_code(data, from) {
        let start = if at > 0 && data[at - 1] == 0 { at - 1 } else { at };
        starts.push((start, at + 3));
        from = at + 3;
    }
    let mut units = Vec::with_capacity(starts.len());
    for (i, &(start, _)) in starts.iter().enumerate() {
        let end = starts.get(i + 1).map_or(data.len(), |&(next, _)| next);
        units.push((start, end));
    }
    units
}

/// Payload of a unit, after its start code.
fn unit_body(data: &[u8], (start, end): (usize, usize)) -> &[u8] {
    let skip = if data[start + 2] == 1 { 3 } else { 4 };
    &data[(start + skip).min(end)..end]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum NalCodec {
    Avc,
    Hevc,
}

/// H.264 and H.265 byte streams. One sample per access unit, in Annex B
/// framing.
pub(crate) struct NalReader {
    codec: NalCodec,
    track: TrackId,
    allow_non_idr_keyframes: bool,
    detect_access_units: bool,
    parameter_sets: Vec<Option<Vec<u8>>>,
    format_sent: bool,
    last_time_us: i64,
}

#[derive(Debug, Default)]
struct AccessUnit {
    start: usize,
    end: usize,
    key: bool,
    has_slice: bool,
}

impl NalReader {
    pub fn new(codec: NalCodec, track: TrackId, allow_non_idr_keyframes: bool, detect_access_units: bool) -> Self {
        let sets = match codec {
            NalCodec::Avc => 2,
            NalCodec::Hevc => 3,
        };
        Self {
            codec,
            track,
            allow_non_idr_keyframes,
            detect_access_units,
            parameter_sets: vec![None; sets],
            format_sent: false,
            last_time_us: 0,
        }
    }

    /// Slot of a parameter set NAL, if it is one.
    fn parameter_slot(&self, nal_type: u8) -> Option<usize> {
        match (self.codec, nal_type) {
            (NalCodec::Avc, nal::H264_SPS) => Some(0),
            (NalCodec::Avc, nal::H264_PPS) => Some(1),
            (NalCodec::Hevc, nal::H265_VPS) => Some(0),
            (NalCodec::Hevc, nal::H265_SPS) => Some(1),
            (NalCodec::Hevc, nal::H265_PPS) => Some(2),
            _ => None,
        }
    }

    fn nal_type(&self, body: &[u8]) -> u8 {
        match self.codec {
            NalCodec::Avc => body.first().map_or(0, |b| b & 0x1F),
            NalCodec::Hevc => nal::hevc_nal_type(body),
        }
    }

    fn is_delimiter(&self, nal_type: u8) -> bool {
        match self.codec {
            NalCodec::Avc => nal_type == nal::H264_AUD,
            NalCodec::Hevc => nal_type == nal::H265_AUD,
        }
    }

    fn is_slice(&self, nal_type: u8) -> bool {
        match self.codec {
            NalCodec::Avc => nal_type == nal::H264_SLICE || nal_type == nal::H264_IDR,
            NalCodec::Hevc => nal_type < 32,
        }
    }

    fn starts_picture(&self, body: &[u8]) -> bool {
        match self.codec {
            NalCodec::Avc => nal::avc_slice_starts_picture(body),
            NalCodec::Hevc => body.get(2).is_some_and(|b| b & 0x80 != 0),
        }
    }

    fn is_key(&self, nal_type: u8, body: &[u8]) -> bool {
        match self.codec {
            NalCodec::Avc => {
                nal_type == nal::H264_IDR
                    || (self.allow_non_idr_keyframes && nal_type == nal::H264_SLICE && nal::avc_slice_is_intra(body))
            }
            // IRAP pictures: BLA, IDR and CRA.
            NalCodec::Hevc => (16..=21).contains(&nal_type),
        }
    }

    fn maybe_emit_format(&mut self, out: &mut Output<'_>) {
        if self.format_sent || self.parameter_sets.iter().any(Option::is_none) {
            return;
        }
        let sets: Vec<&[u8]> = self.parameter_sets.iter().flatten().map(Vec::as_slice).collect();
        let prefixed = |nal: &[u8]| {
            let mut out = vec![0, 0, 0, 1];
            out.extend_from_slice(nal);
            out
        };
        let format = match self.codec {
            NalCodec::Avc => match nal::parse_avc_sps(sets[0]) {
                Ok(sps) => TrackFormat::video(mime::VIDEO_H264, sps.width, sps.height)
                    .with_codecs(sps.codec_string())
                    .with_initialization_data(vec![Bytes::from(prefixed(sets[0])), Bytes::from(prefixed(sets[1]))]),
                Err(err) => {
                    tracing::warn!(%err, "unparseable H.264 SPS");
                    self.parameter_sets[0] = None;
                    return;
                }
            },
            NalCodec::Hevc => match nal::parse_hevc_sps(sets[1]) {
                Ok(sps) => {
                    let csd: Vec<u8> = sets.iter().flat_map(|nal| prefixed(nal)).collect();
                    TrackFormat::video(mime::VIDEO_H265, sps.width, sps.height)
                        .with_codecs(sps.codec_string())
                        .with_initialization_data(vec![Bytes::from(csd)])
                }
                Err(err) => {
                    tracing::warn!(%err, "unparseable H.265 SPS");
                    self.parameter_sets[1] = None;
                    return;
                }
            },
        };
        out.format(self.track, format);
        self.format_sent = true;
    }
}

impl PesReader for NalReader {
    fn consume(&mut self, time_us: Option<i64>, payload: &[u8], out: &mut Output<'_>) -> Result<()> {
        let time_us = time_us.unwrap_or(self.last_time_us);
        self.last_time_us = time_us;
        let mut units: Vec<AccessUnit> = Vec::new();
        let mut current: Option<AccessUnit> = None;
        for range in split_units(payload) {
            let body = unit_body(payload, range);
            let nal_type = self.nal_type(body);
            if let Some(slot) = self.parameter_slot(nal_type) {
                if self.parameter_sets[slot].as_deref() != Some(body) {
                    self.parameter_sets[slot] = Some(body.to_vec());
                }
            }
            let slice = self.is_slice(nal_type);
            let boundary = current.as_ref().is_some_and(|au| {
                au.has_slice
                    && (self.is_delimiter(nal_type) || (self.detect_access_units && slice && self.starts_picture(body)))
            });
            if boundary {
                units.extend(current.take());
            }
            let au = current.get_or_insert_with(|| AccessUnit {
                start: range.0,
                ..AccessUnit::default()
            });
            au.end = range.1;
            au.has_slice |= slice;
            au.key |= slice && self.is_key(nal_type, body);
        }
        units.extend(current);
        self.maybe_emit_format(out);
        if !self.format_sent {
            tracing::trace!(units = units.len(), "video before parameter sets dropped");
            return Ok(());
        }
        for au in units.iter().filter(|au| au.has_slice) {
            let flags = SampleFlags::key_frame_if(au.key);
            out.sample(self.track, time_us, flags, &payload[au.start..au.end], None)?;
        }
        Ok(())
    }

    fn seek(&mut self) {}
}

const MPEG_VIDEO_FRAME_RATES: [f32; 9] = [0.0, 23.976, 24.0, 25.0, 29.97, 30.0, 50.0, 59.94, 60.0];
const H262_PICTURE: u8 = 0x00;
const H262_SEQUENCE_HEADER: u8 = 0xB3;
const H262_EXTENSION: u8 = 0xB5;
const H262_GROUP: u8 = 0xB8;

/// MPEG-1/2 video. Pictures are split on picture start codes, with any
/// preceding sequence or GOP header attached to the next picture.
pub(crate) struct H262Reader {
    track: TrackId,
    frame_duration_us: i64,
    format_sent: bool,
    last_time_us: i64,
}

impl H262Reader {
    pub fn new(track: TrackId) -> Self {
        Self {
            track,
            frame_duration_us: 0,
            format_sent: false,
            last_time_us: 0,
        }
    }

    fn read_sequence_header(&mut self, payload: &[u8], units: &[(usize, usize)], index: usize, out: &mut Output<'_>) {
        let body = unit_body(payload, units[index]);
        if self.format_sent || body.len() < 5 {
            return;
        }
        let width = (u32::from(body[1]) << 4) | u32::from(body[2] >> 4);
        let height = (u32::from(body[2] & 0x0F) << 8) | u32::from(body[3]);
        let frame_rate = MPEG_VIDEO_FRAME_RATES.get(usize::from(body[4] & 0x0F)).copied().unwrap_or(0.0);
        // Configuration runs through any sequence extension.
        let mut end = units[index].1;
        if let Some(&next) = units.get(index + 1) {
            if unit_body(payload, next).first() == Some(&H262_EXTENSION) {
                end = next.1;
            }
        }
        let mut format = TrackFormat::video(mime::VIDEO_MPEG2, width, height)
            .with_initialization_data(vec![Bytes::copy_from_slice(&payload[units[index].0..end])]);
        if frame_rate > 0.0 {
            format.frame_rate = Some(frame_rate);
            self.frame_duration_us = (1_000_000.0 / f64::from(frame_rate)) as i64;
        }
        out.format(self.track, format);
        self.format_sent = true;
    }
}

impl PesReader for H262Reader {
    fn consume(&mut self, time_us: Option<i64>, payload: &[u8], out: &mut Output<'_>) -> Result<()> {
        let mut time_us = time_us.unwrap_or(self.last_time_us);
        let units = split_units(payload);
        let mut pictures: Vec<(usize, usize, bool)> = Vec::new();
        let mut au_start = units.first().map_or(0, |u| u.0);
        let mut picture: Option<bool> = None;
        for (index, &range) in units.iter().enumerate() {
            let body = unit_body(payload, range);
            match body.first().copied() {
                Some(code @ (H262_SEQUENCE_HEADER | H262_GROUP)) => {
                    if let Some(key) = picture.take() {
                        pictures.push((au_start, range.0, key));
                        au_start = range.0;
                    }
                    if code == H262_SEQUENCE_HEADER {
                        self.read_sequence_header(payload, &units, index, out);
                    }
                }
                Some(H262_PICTURE) => {
                    if let Some(key) = picture.take() {
                        pictures.push((au_start, range.0, key));
                        au_start = range.0;
                    }
                    let coding_type = body.get(2).map_or(0, |b| (b >> 3) & 0x07);
                    picture = Some(coding_type == 1);
                }
                _ => {}
            }
        }
        if let Some(key) = picture {
            pictures.push((au_start, payload.len(), key));
        }
        if !self.format_sent {
            return Ok(());
        }
        for (start, end, key) in pictures {
            out.sample(self.track, time_us, SampleFlags::key_frame_if(key), &payload[start..end], None)?;
            time_us += self.frame_duration_us;
        }
        self.last_time_us = time_us;
        Ok(())
    }

    fn seek(&mut self) {}
}

/// Audio bitstreams with self-describing frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AudioCodec {
    Adts,
    MpegAudio,
    Ac3,
    Ac4,
    Dts,
}

#[derive(Debug, Clone, Copy)]
struct AudioFrame {
    size: usize,
    /// Bytes of framing stripped from the sample.
    header_len: usize,
    duration_us: i64,
}

impl AudioCodec {
    fn min_header(self) -> usize {
        match self {
            Self::Adts => adts::MAX_HEADER_LEN,
            Self::MpegAudio => 4,
            Self::Ac3 => 8,
            Self::Ac4 => 16,
            Self::Dts => 11,
        }
    }

    fn parse(self, data: &[u8]) -> Option<(AudioFrame, TrackFormat)> {
        let sync = |frame: SyncFrame| {
            let info = AudioFrame {
                size: frame.frame_size,
                header_len: 0,
                duration_us: frame.duration_us(),
            };
            (info, frame.format())
        };
        match self {
            Self::Adts => adts::parse_header(data).map(|h| {
                let info = AudioFrame {
                    size: h.frame_len,
                    header_len: h.header_len,
                    duration_us: h.frame_duration_us(),
                };
                (info, h.format())
            }),
            Self::MpegAudio => {
                let header = mpeg_audio::parse_header(be_u32(data.get(..4)?, 0))?;
                let info = AudioFrame {
                    size: header.frame_size,
                    header_len: 0,
                    duration_us: header.frame_duration_us(),
                };
                Some((info, TrackFormat::audio(header.mime_type(), header.sample_rate, header.channels)))
            }
            Self::Ac3 => ac3::parse_syncframe(data).map(sync),
            Self::Ac4 => ac4::parse_syncframe(data).map(sync),
            Self::Dts => parse_dts_core(data).map(sync),
        }
    }
}

/// Frame-synchronised audio. Frames may straddle PES packets.
pub(crate) struct AudioReader {
    codec: AudioCodec,
    track: TrackId,
    language: Option<String>,
    buf: Vec<u8>,
    /// Buffer offset where the last timestamped payload began, and its time.
    /// It applies to the first frame starting at or after that offset.
    pes_time: Option<(usize, i64)>,
    /// Time of the next frame, once a timestamp was seen.
    next_time_us: Option<i64>,
    format: Option<TrackFormat>,
}

impl AudioReader {
    pub fn new(codec: AudioCodec, track: TrackId, language: Option<String>) -> Self {
        Self {
            codec,
            track,
            language,
            buf: Vec::new(),
            pes_time: None,
            next_time_us: None,
            format: None,
        }
    }
}

impl PesReader for AudioReader {
    fn consume(&mut self, time_us: Option<i64>, payload: &[u8], out: &mut Output<'_>) -> Result<()> {
        if let Some(time) = time_us {
            self.pes_time = Some((self.buf.len(), time));
        }
        self.buf.extend_from_slice(payload);
        let mut at = 0;
        while self.buf.len() - at >= self.codec.min_header() {
            if self.codec == AudioCodec::Adts {
                if let Some(len) = id3::tag_len(&self.buf[at..]) {
                    at += len.min(self.buf.len() - at);
                    continue;
                }
            }
            let Some((frame, format)) = self.codec.parse(&self.buf[at..]) else {
                at += 1;
                continue;
            };
            if frame.size > self.buf.len() - at {
                break;
            }
            if let Some((start, time)) = self.pes_time {
                if at >= start {
                    self.next_time_us = Some(time);
                    self.pes_time = None;
                }
            }
            if self.format.is_none() {
                let format = format.with_language(self.language.clone());
                out.format(self.track, format.clone());
                self.format = Some(format);
            }
            if let Some(time) = self.next_time_us {
                let data = &self.buf[at + frame.header_len..at + frame.size];
                out.sample(self.track, time, SampleFlags::KEY_FRAME, data, None)?;
                self.next_time_us = Some(time + frame.duration_us);
            }
            at += frame.size;
        }
        self.buf.drain(..at);
        if let Some((start, _)) = &mut self.pes_time {
            *start = start.saturating_sub(at);
        }
        Ok(())
    }

    fn seek(&mut self) {
        self.buf.clear();
        self.pes_time = None;
        self.next_time_us = None;
    }
}

const DTS_SYNC: u32 = 0x7FFE_8001;
const DTS_SAMPLE_RATES: [u32; 16] = [
    0, 8_000, 16_000, 32_000, 0, 0, 11_025, 22_050, 44_100, 0, 0, 12_000, 24_000, 48_000, 0, 0,
];
const DTS_CHANNELS_BY_AMODE: [u32; 16] = [1, 2, 2, 2, 2, 3, 3, 4, 4, 5, 6, 6, 6, 7, 8, 8];

/// Parses a big-endian DTS core frame header.
pub(crate) fn parse_dts_core(data: &[u8]) -> Option<SyncFrame> {
    if data.len() < 11 || be_u32(data, 0) != DTS_SYNC {
        return None;
    }
    let mut bits = Bits::new(&data[4..]);
    // FTYPE, SHORT, CPF
    bits.skip_bits(7).ok()?;
    let blocks = bits.read_bits(7).ok()? + 1;
    let frame_size = bits.read_bits(14).ok()? as usize + 1;
    let amode = bits.read_bits(6).ok()? as usize;
    let sample_rate = DTS_SAMPLE_RATES[bits.read_bits(4).ok()? as usize];
    // RATE, MIX, DYNF, TIMEF, AUXF, HDCD, EXT_AUDIO_ID, EXT_AUDIO, ASPF
    bits.skip_bits(15).ok()?;
    let lfe = bits.read_bits(2).ok()? != 0;
    if sample_rate == 0 || frame_size < 96 {
        return None;
    }
    let channel_count = DTS_CHANNELS_BY_AMODE.get(amode).copied().unwrap_or(2) + u32::from(lfe);
    Some(SyncFrame {
        mime_type: mime::AUDIO_DTS,
        frame_size,
        sample_rate,
        channel_count,
        sample_count: blocks * 32,
    })
}

/// ID3 tags carried as timed metadata, one tag per PES packet.
pub(crate) struct Id3Reader {
    track: TrackId,
}

impl Id3Reader {
    pub fn new(track: TrackId) -> Self {
        Self { track }
    }
}

impl PesReader for Id3Reader {
    fn init(&mut self, out: &mut Output<'_>) {
        out.format(self.track, TrackFormat::new(mime::METADATA_ID3));
    }

    fn consume(&mut self, time_us: Option<i64>, payload: &[u8], out: &mut Output<'_>) -> Result<()> {
        let (Some(time_us), Some(len)) = (time_us, id3::tag_len(payload)) else {
            return Ok(());
        };
        let tag = &payload[..len.min(payload.len())];
        out.sample(self.track, time_us, SampleFlags::KEY_FRAME, tag, None)
    }

    fn seek(&mut self) {}
}

/// SCTE-35 splice information sections.
pub(crate) struct SpliceInfoReader {
    track: TrackId,
}

impl SpliceInfoReader {
    const TABLE_ID: u8 = 0xFC;

    pub fn new(track: TrackId) -> Self {
        Self { track }
    }

    pub fn init(&self, out: &mut Output<'_>) {
        out.format(self.track, TrackFormat::new(mime::METADATA_SCTE35));
    }

    /// Emits a section at the current stream time; sections before the
    /// first timestamp are dropped.
    pub fn consume(&self, time_us: Option<i64>, section: &[u8], out: &mut Output<'_>) -> Result<()> {
        match (time_us, section.first()) {
            (Some(time_us), Some(&Self::TABLE_ID)) => out.sample(self.track, time_us, SampleFlags::KEY_FRAME, section, None),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::adts::tests::adts_frame;
    use crate::output::{CapturingSink, TrackTable};
    use crate::track::MediaType;
    use crate::util::nal::tests::AVC_SPS_320X240;

    fn with_output(f: impl FnOnce(&mut Output<'_>, TrackId)) -> CapturingSink {
        let mut sink = CapturingSink::new();
        let mut table = TrackTable::default();
        let mut out = Output::new(&mut sink, &mut table, false);
        let track = out.track(0x100, MediaType::Unknown);
        f(&mut out, track);
        sink
    }

    fn annex_b(nals: &[&[u8]]) -> Vec<u8> {
        nals.iter().flat_map(|nal| [&[0u8, 0, 0, 1][..], nal].concat()).collect()
    }

    #[test]
    fn test_avc_access_units_split_on_delimiters() {
        let pps: &[u8] = &[0x68, 0xCE, 0x38, 0x80];
        let idr: &[u8] = &[0x65, 0x88, 0x84];
        let slice: &[u8] = &[0x41, 0x9A, 0x02];
        let aud: &[u8] = &[0x09, 0xF0];
        let sink = with_output(|out, track| {
            let mut reader = NalReader::new(NalCodec::Avc, track, false, false);
            let payload = annex_b(&[aud, &AVC_SPS_320X240, pps, idr, aud, slice]);
            reader.consume(Some(40_000), &payload, out).unwrap();
        });
        let format = &sink.track(0).unwrap().format;
        assert_eq!(format.width, Some(320));
        assert_eq!(format.initialization_data.len(), 2);
        assert_eq!(sink.samples.len(), 2);
        assert!(sink.samples[0].flags.is_key_frame());
        assert!(!sink.samples[1].flags.is_key_frame());
        assert_eq!(sink.samples[1].data.len(), 4 + aud.len() + 4 + slice.len());
        assert_eq!(sink.samples[1].time_us, 40_000);
    }

    #[test]
    fn test_avc_detects_access_units_from_slices() {
        let pps: &[u8] = &[0x68, 0xCE, 0x38, 0x80];
        // first_mb_in_slice == 0 in both slices.
        let idr: &[u8] = &[0x65, 0x88, 0x84];
        let slice: &[u8] = &[0x41, 0x9A, 0x02];
        let payload = annex_b(&[&AVC_SPS_320X240, pps, idr, slice]);
        let without = with_output(|out, track| {
            NalReader::new(NalCodec::Avc, track, false, false).consume(Some(0), &payload, out).unwrap();
        });
        assert_eq!(without.samples.len(), 1);
        let with = with_output(|out, track| {
            NalReader::new(NalCodec::Avc, track, false, true).consume(Some(0), &payload, out).unwrap();
        });
        assert_eq!(with.samples.len(), 2);
    }

    #[test]
    fn test_avc_non_idr_keyframes() {
        let pps: &[u8] = &[0x68, 0xCE, 0x38, 0x80];
        // first_mb 0, slice_type 7 (I).
        let intra: &[u8] = &[0x41, 0b1000_1000, 0];
        let payload = annex_b(&[&AVC_SPS_320X240, pps, intra]);
        let strict = with_output(|out, track| {
            NalReader::new(NalCodec::Avc, track, false, false).consume(Some(0), &payload, out).unwrap();
        });
        assert!(!strict.samples[0].flags.is_key_frame());
        let lenient = with_output(|out, track| {
            NalReader::new(NalCodec::Avc, track, true, false).consume(Some(0), &payload, out).unwrap();
        });
        assert!(lenient.samples[0].flags.is_key_frame());
    }

    #[test]
    fn test_video_before_parameter_sets_is_dropped() {
        let sink = with_output(|out, track| {
            let mut reader = NalReader::new(NalCodec::Avc, track, false, false);
            reader.consume(Some(0), &annex_b(&[&[0x65, 0x88]]), out).unwrap();
        });
        assert!(sink.samples.is_empty());
    }

    #[test]
    fn test_h262_pictures() {
        // 352x288, 25 fps.
        let sequence: &[u8] = &[0xB3, 0x16, 0x01, 0x20, 0x13, 0xFF, 0xFF, 0xE0];
        let i_picture: &[u8] = &[0x00, 0x00, 0x0F, 0xFF];
        let p_picture: &[u8] = &[0x00, 0x00, 0x57, 0xFF];
        let sink = with_output(|out, track| {
            let mut reader = H262Reader::new(track);
            let payload = [annex_b(&[sequence, i_picture]), annex_b(&[p_picture])].concat();
            reader.consume(Some(0), &payload, out).unwrap();
        });
        let format = &sink.track(0).unwrap().format;
        assert_eq!((format.width, format.height), (Some(352), Some(288)));
        assert_eq!(sink.samples.len(), 2);
        assert!(sink.samples[0].flags.is_key_frame());
        assert!(!sink.samples[1].flags.is_key_frame());
        assert_eq!(sink.samples[1].time_us, 40_000);
    }

    #[test]
    fn test_adts_frames_straddle_payloads() {
        let frame = adts_frame(&[0x21; 100]);
        let stream = [frame.clone(), frame.clone(), frame].concat();
        let (a, b) = stream.split_at(150);
        let sink = with_output(|out, track| {
            let mut reader = AudioReader::new(AudioCodec::Adts, track, Some("eng".into()));
            reader.consume(Some(1_000), a, out).unwrap();
            reader.consume(None, b, out).unwrap();
        });
        assert_eq!(sink.samples.len(), 3);
        assert_eq!(sink.samples[0].size, 100);
        let step = adts::parse_header(&stream).unwrap().frame_duration_us();
        assert_eq!(sink.samples[2].time_us, 1_000 + 2 * step);
        assert_eq!(sink.track(0).unwrap().format.language.as_deref(), Some("eng"));
    }

    #[test]
    fn test_dts_core_header() {
        // 512 samples (16 blocks), 1024-byte frames, 5.1 at 48 kHz.
        let header = [0x7F, 0xFE, 0x80, 0x01, 0xFC, 0x3C, 0x3F, 0xF2, 0x74, 0x00, 0x06];
        let frame = parse_dts_core(&header).unwrap();
        assert_eq!(frame.sample_count, 512);
        assert_eq!(frame.frame_size, 1024);
        assert_eq!(frame.sample_rate, 48_000);
        assert_eq!(frame.channel_count, 6);
    }

    #[test]
    fn test_id3_needs_timestamp() {
        let tag = [b'I', b'D', b'3', 4, 0, 0, 0, 0, 0, 0];
        let sink = with_output(|out, track| {
            let mut reader = Id3Reader::new(track);
            reader.init(out);
            reader.consume(None, &tag, out).unwrap();
            reader.consume(Some(5), &tag, out).unwrap();
        });
        assert_eq!(sink.samples.len(), 1);
        assert_eq!(sink.track(0).unwrap().media_type, MediaType::Metadata);
    }
}
