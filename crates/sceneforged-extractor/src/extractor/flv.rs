//! Flash Video.
//!
//! A 9-byte file header is followed by tags, each prefixed with the size
//! of the previous one. Audio tags carry AAC, MP3 or G.711, video tags
//! carry length-prefixed AVC, and the `onMetaData` script tag supplies the
//! duration. FLV has no index worth trusting, so the seek map only allows
//! restarting from the beginning.

use bytes::Bytes;

use crate::error::{Error, Result};
use crate::extractor::mp4::stsd::parse_avcc;
use crate::extractor::{Extract, Progress};
use crate::input::{ExtractorInput, InputExt, Prefix};
use crate::output::{Output, TrackId};
use crate::sample::SampleFlags;
use crate::seek::SeekMap;
use crate::track::{mime, MediaType, TrackFormat};
use crate::util::cursor::ByteCursor;
use crate::util::{aac, be_u24, be_u32, mpeg_audio, nal};

const SIGNATURE: &[u8; 3] = b"FLV";
const FILE_HEADER_LEN: usize = 9;
const TAG_HEADER_LEN: usize = 11;
const PREVIOUS_TAG_SIZE_LEN: usize = 4;

const TAG_AUDIO: u8 = 8;
const TAG_VIDEO: u8 = 9;
const TAG_SCRIPT: u8 = 18;

const FLAG_AUDIO: u8 = 0x04;
const FLAG_VIDEO: u8 = 0x01;

const AUDIO_MP3: u8 = 2;
const AUDIO_ALAW: u8 = 7;
const AUDIO_MLAW: u8 = 8;
const AUDIO_AAC: u8 = 10;
const VIDEO_AVC: u8 = 7;

const AAC_SEQUENCE_HEADER: u8 = 0;
const AVC_SEQUENCE_HEADER: u8 = 0;
const AVC_NALU: u8 = 1;
const VIDEO_KEY_FRAME: u8 = 1;

/// Nesting limit for AMF values in script tags.
const MAX_AMF_DEPTH: usize = 16;

/// Accepts the `FLV` signature with clear reserved flag bits, followed by
/// a zero previous-tag-size field.
pub(crate) fn sniff(prefix: &Prefix) -> bool {
    let data = prefix.bytes();
    if data.len() < FILE_HEADER_LEN + PREVIOUS_TAG_SIZE_LEN || &data[..3] != SIGNATURE || data[4] & 0xFA != 0 {
        return false;
    }
    let data_offset = be_u32(data, 5) as usize;
    data_offset >= FILE_HEADER_LEN
        && data
            .get(data_offset..data_offset + PREVIOUS_TAG_SIZE_LEN)
            .is_some_and(|size| size == [0, 0, 0, 0])
}

/// An AMF0 value from a script data tag. Values the extractor has no use
/// for are read past and kept as `Other`.
#[derive(Debug, Clone, PartialEq)]
enum Amf {
    Number(f64),
    String(String),
    Object(Vec<(String, Amf)>),
    Other,
}

impl Amf {
    fn get(&self, key: &str) -> Option<&Amf> {
        match self {
            Amf::Object(entries) => entries.iter().find(|(k, _)| k == key).map(|(_, v)| v),
            _ => None,
        }
    }
}

fn amf_string(c: &mut ByteCursor<'_>) -> Result<String> {
    let len = usize::from(c.read_u16()?);
    Ok(String::from_utf8_lossy(c.read_bytes(len)?).into_owned())
}

/// Reads key/value pairs until the empty-key object end marker.
fn amf_entries(c: &mut ByteCursor<'_>, depth: usize) -> Result<Vec<(String, Amf)>> {
    let mut entries = Vec::new();
    loop {
        let key = amf_string(c)?;
        if key.is_empty() && c.peek_u8()? == 0x09 {
            c.skip(1)?;
            return Ok(entries);
        }
        entries.push((key, amf_value(c, depth + 1)?));
    }
}

fn amf_value(c: &mut ByteCursor<'_>, depth: usize) -> Result<Amf> {
    if depth > MAX_AMF_DEPTH {
        return Err(Error::parsing("AMF values nested too deeply"));
    }
    let marker = c.read_u8()?;
    Ok(match marker {
        0x00 => Amf::Number(c.read_f64()?),
        0x01 => {
            c.skip(1)?;
            Amf::Other
        }
        0x02 => Amf::String(amf_string(c)?),
        0x03 => Amf::Object(amf_entries(c, depth)?),
        0x05 | 0x06 => Amf::Other,
        0x08 => {
            // The ECMA array count is advisory; entries run to the end marker.
            c.skip(4)?;
            Amf::Object(amf_entries(c, depth)?)
        }
        0x0A => {
            let count = c.read_u32()?;
            for _ in 0..count {
                amf_value(c, depth + 1)?;
            }
            Amf::Other
        }
        0x0B => {
            // Milliseconds since the epoch and a time zone offset.
            c.skip(10)?;
            Amf::Other
        }
        0x0C => {
            let len = c.read_u32()? as usize;
            Amf::String(String::from_utf8_lossy(c.read_bytes(len)?).into_owned())
        }
        other => return Err(Error::parsing(format!("unsupported AMF marker {other:#04x}"))),
    })
}

/// Duration in microseconds from an `onMetaData` script tag.
fn metadata_duration_us(data: &[u8]) -> Result<Option<i64>> {
    let mut c = ByteCursor::new(data);
    match amf_value(&mut c, 0)? {
        Amf::String(name) if name == "onMetaData" => {}
        _ => return Ok(None),
    }
    let metadata = amf_value(&mut c, 0)?;
    Ok(match metadata.get("duration") {
        Some(&Amf::Number(seconds)) if seconds > 0.0 && seconds.is_finite() => Some((seconds * 1_000_000.0) as i64),
        _ => None,
    })
}

#[derive(Debug)]
struct AudioTrack {
    track: TrackId,
    /// Codec id from the first tag; later tags must match.
    codec: u8,
    format_sent: bool,
}

#[derive(Debug)]
struct VideoTrack {
    track: TrackId,
    nal_length_size: Option<u8>,
}

/// One parsed tag header.
#[derive(Debug, Clone, Copy)]
struct TagHeader {
    kind: u8,
    data_size: usize,
    time_us: i64,
}

fn parse_tag_header(b: &[u8]) -> TagHeader {
    let millis = be_u24(b, 4) | (u32::from(b[7]) << 24);
    TagHeader {
        kind: b[0] & 0x1F,
        data_size: be_u24(b, 1) as usize,
        time_us: i64::from(millis) * 1_000,
    }
}

pub(crate) struct FlvExtractor {
    header_read: bool,
    expect_audio: bool,
    expect_video: bool,
    audio: Option<AudioTrack>,
    video: Option<VideoTrack>,
    /// Codec ids already reported as unsupported.
    ignored_codecs: Vec<(u8, u8)>,
    duration_us: Option<i64>,
    flushed: bool,
}

impl FlvExtractor {
    pub fn new() -> Self {
        Self {
            header_read: false,
            expect_audio: false,
            expect_video: false,
            audio: None,
            video: None,
            ignored_codecs: Vec::new(),
            duration_us: None,
            flushed: false,
        }
    }

    fn read_file_header(&mut self, input: &mut dyn ExtractorInput) -> Result<bool> {
        let Some(header) = input.read_to_vec(FILE_HEADER_LEN)? else {
            return Ok(false);
        };
        if &header[..3] != SIGNATURE {
            return Err(Error::parsing("missing FLV signature"));
        }
        self.expect_audio = header[4] & FLAG_AUDIO != 0;
        self.expect_video = header[4] & FLAG_VIDEO != 0;
        let data_offset = u64::from(be_u32(&header, 5));
        tracing::debug!(audio = self.expect_audio, video = self.expect_video, "FLV header");
        // Skip the rest of the header and the first previous-tag-size field.
        Ok(input.skip_fully(data_offset.saturating_sub(FILE_HEADER_LEN as u64) + PREVIOUS_TAG_SIZE_LEN as u64)?)
    }

    fn ignore_codec(&mut self, kind: u8, codec: u8) {
        if !self.ignored_codecs.contains(&(kind, codec)) {
            tracing::warn!(kind, codec, "unsupported FLV codec ignored");
            self.ignored_codecs.push((kind, codec));
        }
    }

    /// Announces the seek map and track set once every flagged track exists.
    fn maybe_end_tracks(&mut self, out: &mut Output<'_>) {
        if !out.has_seek_map() {
            out.seek_map(SeekMap::unseekable(self.duration_us));
        }
        let audio_done = !self.expect_audio || self.audio.is_some();
        let video_done = !self.expect_video || self.video.is_some();
        if audio_done && video_done {
            out.end_tracks();
        }
    }

    fn audio_tag(&mut self, tag: TagHeader, data: &[u8], out: &mut Output<'_>) -> Result<()> {
        let Some(&flags) = data.first() else {
            return Ok(());
        };
        let codec = flags >> 4;
        if !matches!(codec, AUDIO_MP3 | AUDIO_ALAW | AUDIO_MLAW | AUDIO_AAC) {
            self.ignore_codec(TAG_AUDIO, codec);
            return Ok(());
        }
        let audio = self.audio.get_or_insert_with(|| AudioTrack {
            track: out.track(u64::from(TAG_AUDIO), MediaType::Audio),
            codec,
            format_sent: false,
        });
        if audio.codec != codec {
            tracing::warn!(from = audio.codec, to = codec, "FLV audio codec changed mid-stream");
            return Ok(());
        }
        let track = audio.track;
        let payload = &data[1..];
        match codec {
            AUDIO_AAC => {
                let Some((&packet_type, body)) = payload.split_first() else {
                    return Ok(());
                };
                if packet_type == AAC_SEQUENCE_HEADER {
                    if !audio.format_sent {
                        let config = aac::parse_audio_specific_config(body)?;
                        let format = TrackFormat::audio(mime::AUDIO_AAC, config.sample_rate, config.channel_count)
                            .with_codecs(config.codec_string())
                            .with_initialization_data(vec![Bytes::copy_from_slice(body)]);
                        out.format(track, format);
                        audio.format_sent = true;
                    }
                } else if audio.format_sent {
                    out.sample(track, tag.time_us, SampleFlags::KEY_FRAME, body, None)?;
                }
            }
            AUDIO_MP3 => {
                if !audio.format_sent {
                    let Some(header) = payload.get(..4).and_then(|b| mpeg_audio::parse_header(be_u32(b, 0))) else {
                        return Ok(());
                    };
                    out.format(track, TrackFormat::audio(header.mime_type(), header.sample_rate, header.channels));
                    audio.format_sent = true;
                }
                out.sample(track, tag.time_us, SampleFlags::KEY_FRAME, payload, None)?;
            }
            _ => {
                if !audio.format_sent {
                    let mime = if codec == AUDIO_ALAW { mime::AUDIO_ALAW } else { mime::AUDIO_MLAW };
                    out.format(track, TrackFormat::audio(mime, 8_000, 1));
                    audio.format_sent = true;
                }
                out.sample(track, tag.time_us, SampleFlags::KEY_FRAME, payload, None)?;
            }
        }
        Ok(())
    }

    fn video_tag(&mut self, tag: TagHeader, data: &[u8], out: &mut Output<'_>) -> Result<()> {
        if data.len() < 5 {
            return Ok(());
        }
        let frame_type = data[0] >> 4;
        let codec = data[0] & 0x0F;
        if codec != VIDEO_AVC {
            self.ignore_codec(TAG_VIDEO, codec);
            return Ok(());
        }
        let video = self.video.get_or_insert_with(|| VideoTrack {
            track: out.track(u64::from(TAG_VIDEO), MediaType::Video),
            nal_length_size: None,
        });
        let packet_type = data[1];
        // Signed 24-bit composition time offset in milliseconds.
        let composition_ms = (i32::from_be_bytes([data[2], data[3], data[4], 0])) >> 8;
        let body = &data[5..];
        match packet_type {
            AVC_SEQUENCE_HEADER if video.nal_length_size.is_none() => {
                let (units, length_size) = parse_avcc(body)?;
                let sps = units
                    .first()
                    .and_then(|unit| nal::parse_avc_sps(&unit[4..]).ok())
                    .ok_or_else(|| Error::parsing("AVC configuration without an SPS"))?;
                let format = TrackFormat::video(mime::VIDEO_H264, sps.width, sps.height)
                    .with_codecs(sps.codec_string())
                    .with_initialization_data(units);
                out.format(video.track, format);
                video.nal_length_size = Some(length_size);
            }
            AVC_NALU => {
                let Some(length_size) = video.nal_length_size else {
                    return Ok(());
                };
                let annex_b = to_annex_b(body, usize::from(length_size))?;
                let time_us = tag.time_us + i64::from(composition_ms) * 1_000;
                let flags = SampleFlags::key_frame_if(frame_type == VIDEO_KEY_FRAME);
                out.sample(video.track, time_us, flags, &annex_b, None)?;
            }
            _ => {}
        }
        Ok(())
    }

    fn flush(&mut self, out: &mut Output<'_>) -> Progress {
        if !self.flushed {
            self.flushed = true;
            if !out.has_seek_map() {
                out.seek_map(SeekMap::unseekable(self.duration_us));
            }
            out.end_tracks();
        }
        Progress::EndOfInput
    }
}

/// Rewrites length-prefixed NAL units with four-byte start codes.
fn to_annex_b(data: &[u8], length_size: usize) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(data.len() + 4);
    let mut c = ByteCursor::new(data);
    while c.remaining() > 0 {
        let len = c
            .read_bytes(length_size)?
            .iter()
            .fold(0usize, |len, &b| (len << 8) | usize::from(b));
        out.extend_from_slice(&[0, 0, 0, 1]);
        out.extend_from_slice(c.read_bytes(len)?);
    }
    Ok(out)
}

impl Extract for FlvExtractor {
    fn read(&mut self, input: &mut dyn ExtractorInput, out: &mut Output<'_>) -> Result<Progress> {
        if self.flushed {
            return Ok(Progress::EndOfInput);
        }
        if !self.header_read {
            if !self.read_file_header(input)? {
                return Ok(self.flush(out));
            }
            self.header_read = true;
            return Ok(Progress::Continue);
        }
        let mut header = [0u8; TAG_HEADER_LEN];
        if input.read_up_to(&mut header)? < TAG_HEADER_LEN {
            return Ok(self.flush(out));
        }
        let tag = parse_tag_header(&header);
        let mut data = vec![0u8; tag.data_size];
        if input.read_up_to(&mut data)? < tag.data_size {
            tracing::warn!(kind = tag.kind, size = tag.data_size, "truncated FLV tag");
            return Ok(self.flush(out));
        }
        input.skip_fully(PREVIOUS_TAG_SIZE_LEN as u64)?;
        match tag.kind {
            TAG_AUDIO => {
                self.audio_tag(tag, &data, out)?;
                self.maybe_end_tracks(out);
            }
            TAG_VIDEO => {
                self.video_tag(tag, &data, out)?;
                self.maybe_end_tracks(out);
            }
            TAG_SCRIPT if !out.has_seek_map() => match metadata_duration_us(&data) {
                Ok(Some(duration_us)) => {
                    tracing::debug!(duration_us, "FLV metadata duration");
                    self.duration_us = Some(duration_us);
                }
                Ok(None) => {}
                Err(err) => tracing::warn!(%err, "unreadable FLV script tag"),
            },
            _ => {}
        }
        Ok(Progress::Continue)
    }

    fn seek(&mut self, position: u64, _time_us: i64) {
        self.flushed = false;
        if position == 0 {
            self.header_read = false;
        }
    }
}
