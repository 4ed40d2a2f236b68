//! Native FLAC streams.
//!
//! Frame sizes are not stored, so each frame ends where the next valid,
//! sample-contiguous frame header starts.

pub(crate) mod frame;
pub(crate) mod metadata;

use self::frame::{parse_frame_header, FrameHeader, MAX_HEADER_LEN};
use self::metadata::{block_type, parse_seek_table, parse_vorbis_comments, StreamInfo, STREAM_MARKER};
use crate::error::{Error, Result};
use crate::extractor::{Extract, Progress};
use crate::input::{ExtractorInput, InputExt, Prefix};
use crate::output::{Output, TrackId};
use crate::params::Parameters;
use crate::sample::SampleFlags;
use crate::seek::{BinarySearch, IndexSeekMap, SeekMap, TimestampProbe, TimestampSearch};
use crate::track::MediaType;
use crate::util::id3;

/// Metadata blocks larger than this are skipped unread.
const MAX_METADATA_BLOCK: usize = 1024 * 1024;
/// Frame search window when STREAMINFO does not bound the frame size.
const DEFAULT_FRAME_WINDOW: usize = 64 * 1024;
const MAX_FRAME_WINDOW: usize = 16 * 1024 * 1024;
/// Bytes a timestamp probe scans for a frame header.
const PROBE_WINDOW: usize = 64 * 1024;

/// Accepts `fLaC` right after any ID3v2 tags.
pub(crate) fn sniff(prefix: &Prefix) -> bool {
    let mut data = prefix.bytes();
    while let Some(len) = id3::tag_len(data) {
        let Some(rest) = data.get(len..) else {
            return false;
        };
        data = rest;
    }
    data.starts_with(STREAM_MARKER)
}

#[derive(Debug)]
struct Stream {
    track: TrackId,
    info: StreamInfo,
    first_frame: u64,
    binary_search: bool,
}

pub(crate) struct FlacExtractor {
    decode_id3: bool,
    stream: Option<Stream>,
    pending_seek_us: Option<i64>,
}

impl FlacExtractor {
    pub fn new(params: &Parameters) -> Self {
        Self {
            decode_id3: !params.flac_disable_id3,
            stream: None,
            pending_seek_us: None,
        }
    }

    fn read_metadata(&mut self, input: &mut dyn ExtractorInput, out: &mut Output<'_>) -> Result<Progress> {
        let tag = id3::read_tags(input, self.decode_id3)?;
        let mut marker = [0u8; 4];
        if !input.read_fully(&mut marker)? || &marker != STREAM_MARKER {
            return Err(Error::parsing("missing fLaC stream marker"));
        }
        let mut info = None;
        let mut seek_table = Vec::new();
        let mut comments = Vec::new();
        loop {
            let mut header = [0u8; 4];
            if !input.read_fully(&mut header)? {
                return Err(Error::parsing("stream ended inside FLAC metadata"));
            }
            let last = header[0] & 0x80 != 0;
            let kind = header[0] & 0x7F;
            let len = crate::util::be_u24(&header, 1) as usize;
            let wanted = matches!(kind, block_type::STREAMINFO | block_type::SEEKTABLE | block_type::VORBIS_COMMENT);
            if wanted && len <= MAX_METADATA_BLOCK {
                let body = input
                    .read_to_vec(len)?
                    .ok_or_else(|| Error::parsing("truncated FLAC metadata block"))?;
                match kind {
                    block_type::STREAMINFO => info = Some(StreamInfo::parse(&body)?),
                    block_type::SEEKTABLE => seek_table = parse_seek_table(&body),
                    _ => comments = parse_vorbis_comments(&body).unwrap_or_default(),
                }
            } else if !input.skip_fully(len as u64)? {
                return Err(Error::parsing("stream ended inside FLAC metadata"));
            }
            if last {
                break;
            }
        }
        let info = info.ok_or_else(|| Error::parsing("FLAC stream without STREAMINFO"))?;
        let first_frame = input.position();
        let duration_us = info.duration_us();
        let length = input.length();
        let (seek_map, binary_search) = match (length, duration_us) {
            (Some(_), _) if !seek_table.is_empty() => {
                let mut index = IndexSeekMap::new(duration_us);
                for entry in &seek_table {
                    index.push(info.samples_to_us(entry.sample_number), first_frame + entry.offset);
                }
                (SeekMap::index(index), false)
            }
            (Some(length), Some(duration_us)) if length > first_frame => {
                (SeekMap::binary_search(duration_us, first_frame, length), true)
            }
            _ => (SeekMap::unseekable_from(duration_us, first_frame), false),
        };
        let mut format = info.format();
        format.metadata = comments;
        if let Some(tag) = tag {
            format.metadata.extend(tag.frames);
        }
        let track = out.track(0, MediaType::Audio);
        out.format(track, format);
        out.end_tracks();
        out.seek_map(seek_map);
        self.stream = Some(Stream {
            track,
            info,
            first_frame,
            binary_search,
        });
        Ok(Progress::Continue)
    }

    fn read_frame(&mut self, input: &mut dyn ExtractorInput, out: &mut Output<'_>) -> Result<Progress> {
        let Some(stream) = &self.stream else {
            return Err(Error::InvalidState("FLAC frames before metadata"));
        };
        if let Some(target_us) = self.pending_seek_us {
            if stream.binary_search {
                if let Some(length) = input.length() {
                    let duration_us = stream.info.duration_us().unwrap_or(0);
                    let mut probe = FlacProbe { info: &stream.info };
                    let search = BinarySearch::new(target_us, duration_us, stream.first_frame, length, MAX_HEADER_LEN as u64);
                    search.run(input, &mut probe)?;
                }
            }
            self.pending_seek_us = None;
            return Ok(Progress::Continue);
        }
        let position = input.position();
        if position < stream.first_frame {
            input.seek_to_position(stream.first_frame)?;
            return Ok(Progress::Continue);
        }
        let mut window_len = match stream.info.max_frame_size {
            0 => DEFAULT_FRAME_WINDOW,
            max => max as usize + MAX_HEADER_LEN,
        };
        loop {
            let mut window = vec![0u8; window_len];
            let n = input.read_up_to(&mut window)?;
            window.truncate(n);
            if n == 0 {
                return Ok(Progress::EndOfInput);
            }
            let Some(header) = parse_frame_header(&window, &stream.info) else {
                return self.resync(input, position, &window);
            };
            let at_end = n < window_len;
            match next_frame_start(&window, &header, &stream.info) {
                Some(end) => {
                    input.seek_to_position(position + end as u64)?;
                    return self.emit(out, &header, &window[..end]);
                }
                None if at_end => return self.emit(out, &header, &window),
                None if window_len >= MAX_FRAME_WINDOW => {
                    return Err(Error::parsing(format!("no FLAC frame boundary within {window_len} bytes")));
                }
                None => {
                    input.seek_to_position(position)?;
                    window_len *= 2;
                }
            }
        }
    }

    fn emit(&self, out: &mut Output<'_>, header: &FrameHeader, data: &[u8]) -> Result<Progress> {
        let Some(stream) = &self.stream else {
            return Err(Error::InvalidState("FLAC frames before metadata"));
        };
        let time_us = stream.info.samples_to_us(header.first_sample);
        out.sample(stream.track, time_us, SampleFlags::KEY_FRAME, data, None)?;
        Ok(Progress::Continue)
    }

    /// Moves to the next frame header after a position that does not start
    /// one.
    fn resync(&self, input: &mut dyn ExtractorInput, position: u64, window: &[u8]) -> Result<Progress> {
        let Some(stream) = &self.stream else {
            return Err(Error::InvalidState("FLAC frames before metadata"));
        };
        match (1..window.len()).find(|&at| parse_frame_header(&window[at..], &stream.info).is_some()) {
            Some(at) => {
                tracing::debug!(position, skipped = at, "resynchronised FLAC frames");
                input.seek_to_position(position + at as u64)?;
                Ok(Progress::Continue)
            }
            None => Ok(Progress::EndOfInput),
        }
    }
}

/// Offset of the frame header following `header` within `window`.
fn next_frame_start(window: &[u8], header: &FrameHeader, info: &StreamInfo) -> Option<usize> {
    let expected = header.first_sample + u64::from(header.block_size);
    let min_len = (info.min_frame_size as usize).max(MAX_HEADER_LEN / 4);
    (min_len..window.len()).find(|&at| {
        window[at] == 0xFF
            && parse_frame_header(&window[at..], info).is_some_and(|next| next.first_sample == expected)
    })
}

/// Timestamp probe for bisection over frame headers.
struct FlacProbe<'a> {
    info: &'a StreamInfo,
}

impl TimestampProbe for FlacProbe<'_> {
    fn search(&mut self, input: &mut dyn ExtractorInput, target_time_us: i64) -> Result<TimestampSearch> {
        let start = input.position();
        let mut window = vec![0u8; PROBE_WINDOW];
        let n = input.read_up_to(&mut window)?;
        window.truncate(n);
        let found = (0..n).find_map(|at| parse_frame_header(&window[at..], self.info).map(|h| (at, h)));
        let Some((at, header)) = found else {
            return Ok(TimestampSearch::NoTimestamp);
        };
        let position = start + at as u64;
        let time_us = self.info.samples_to_us(header.first_sample);
        let end_us = self.info.samples_to_us(header.first_sample + u64::from(header.block_size));
        Ok(if time_us > target_time_us {
            TimestampSearch::Overestimated { time_us, position }
        } else if target_time_us < end_us {
            TimestampSearch::Found { position }
        } else {
            TimestampSearch::Underestimated { time_us, position }
        })
    }
}

impl Extract for FlacExtractor {
    fn read(&mut self, input: &mut dyn ExtractorInput, out: &mut Output<'_>) -> Result<Progress> {
        match self.stream {
            Some(_) => self.read_frame(input, out),
            None => self.read_metadata(input, out),
        }
    }

    fn seek(&mut self, position: u64, time_us: i64) {
        let bisect = self.stream.as_ref().is_some_and(|s| s.binary_search && position > s.first_frame);
        self.pending_seek_us = (bisect && time_us > 0).then_some(time_us);
    }
}
