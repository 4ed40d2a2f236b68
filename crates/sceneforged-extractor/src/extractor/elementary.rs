//! Shared driver for self-synchronising audio elementary streams whose
//! frames carry their own size (AC-3, E-AC-3, AC-4).

use std::marker::PhantomData;

use crate::error::{Error, Result};
use crate::extractor::{Extract, Progress};
use crate::input::{ExtractorInput, InputExt, Prefix};
use crate::output::{Output, TrackId};
use crate::sample::SampleFlags;
use crate::seek::{scale, SeekMap};
use crate::track::{MediaType, TrackFormat};
use crate::util::id3;

const SNIFF_SEARCH_LEN: usize = 8 * 1024;
const MIN_MATCHING_FRAMES: usize = 4;

/// Fields of one sync frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SyncFrame {
    pub mime_type: &'static str,
    /// Whole frame, header included.
    pub frame_size: usize,
    pub sample_rate: u32,
    pub channel_count: u32,
    /// Audio samples per channel decoded from the frame.
    pub sample_count: u32,
}

impl SyncFrame {
    pub fn format(&self) -> TrackFormat {
        TrackFormat::audio(self.mime_type, self.sample_rate, self.channel_count)
    }

    pub fn duration_us(&self) -> i64 {
        scale(i64::from(self.sample_count), 1_000_000, i64::from(self.sample_rate))
    }

    fn same_stream(&self, other: &SyncFrame) -> bool {
        self.mime_type == other.mime_type && self.sample_rate == other.sample_rate
    }
}

/// A sync-framed audio bitstream.
pub(crate) trait SyncFrameFormat {
    const NAME: &'static str;
    /// Bytes `parse` needs to see.
    const HEADER_LEN: usize;

    fn parse(data: &[u8]) -> Option<SyncFrame>;
}

fn skip_id3(mut data: &[u8]) -> Option<&[u8]> {
    while let Some(len) = id3::tag_len(data) {
        data = data.get(len..)?;
    }
    Some(data)
}

fn chained<F: SyncFrameFormat>(data: &[u8], at: usize, at_end: bool) -> Option<SyncFrame> {
    let first = F::parse(&data[at..])?;
    let mut position = at + first.frame_size;
    for _ in 1..MIN_MATCHING_FRAMES {
        match data.get(position..).filter(|rest| rest.len() >= F::HEADER_LEN) {
            Some(rest) => position += F::parse(rest).filter(|f| f.same_stream(&first))?.frame_size,
            None => return at_end.then_some(first),
        }
    }
    Some(first)
}

/// Accepts agreeing consecutive frames within 8 KiB, after any ID3 tags.
pub(crate) fn sniff<F: SyncFrameFormat>(prefix: &Prefix) -> bool {
    let Some(data) = skip_id3(prefix.bytes()) else {
        return false;
    };
    (0..data.len().min(SNIFF_SEARCH_LEN)).any(|at| chained::<F>(data, at, prefix.is_complete()).is_some())
}

#[derive(Debug, Clone, Copy)]
struct Stream {
    track: TrackId,
    first: SyncFrame,
    data_start: u64,
}

/// Emits one key-frame sample per sync frame. The stream is unseekable and
/// of unknown duration.
pub(crate) struct SyncFrameExtractor<F> {
    stream: Option<Stream>,
    base_time_us: i64,
    samples_since_base: u64,
    _format: PhantomData<F>,
}

impl<F: SyncFrameFormat> SyncFrameExtractor<F> {
    pub fn new() -> Self {
        Self {
            stream: None,
            base_time_us: 0,
            samples_since_base: 0,
            _format: PhantomData,
        }
    }

    fn read_header(&mut self, input: &mut dyn ExtractorInput, out: &mut Output<'_>) -> Result<Progress> {
        id3::read_tags(input, false)?;
        let start = input.position();
        let mut window = vec![0u8; SNIFF_SEARCH_LEN + MIN_MATCHING_FRAMES * 4096];
        let n = input.read_up_to(&mut window)?;
        let at_end = n < window.len();
        window.truncate(n);
        let (offset, first) = (0..n.min(SNIFF_SEARCH_LEN))
            .find_map(|at| chained::<F>(&window, at, at_end).map(|frame| (at, frame)))
            .ok_or_else(|| Error::parsing(format!("no {} sync frame found", F::NAME)))?;
        let data_start = start + offset as u64;
        input.seek_to_position(data_start)?;
        let track = out.track(0, MediaType::Audio);
        out.format(track, first.format());
        out.end_tracks();
        out.seek_map(SeekMap::unseekable_from(None, data_start));
        self.stream = Some(Stream {
            track,
            first,
            data_start,
        });
        Ok(Progress::Continue)
    }

    fn read_frame(&mut self, input: &mut dyn ExtractorInput, out: &mut Output<'_>, stream: Stream) -> Result<Progress> {
        let position = input.position();
        if position < stream.data_start {
            input.seek_to_position(stream.data_start)?;
            return Ok(Progress::Continue);
        }
        let mut head = vec![0u8; F::HEADER_LEN];
        if input.read_up_to(&mut head)? < F::HEADER_LEN {
            return Ok(Progress::EndOfInput);
        }
        input.seek_to_position(position)?;
        let Some(frame) = F::parse(&head).filter(|f| f.same_stream(&stream.first)) else {
            tracing::debug!(format = F::NAME, position, "skipping byte outside a sync frame");
            return Ok(if input.skip_fully(1)? { Progress::Continue } else { Progress::EndOfInput });
        };
        let Some(data) = input.read_to_vec(frame.frame_size)? else {
            return Ok(Progress::EndOfInput);
        };
        let time_us = self.base_time_us
            + scale(self.samples_since_base as i64, 1_000_000, i64::from(frame.sample_rate));
        out.sample(stream.track, time_us, SampleFlags::KEY_FRAME, &data, None)?;
        self.samples_since_base += u64::from(frame.sample_count);
        Ok(Progress::Continue)
    }
}

impl<F: SyncFrameFormat> Extract for SyncFrameExtractor<F> {
    fn read(&mut self, input: &mut dyn ExtractorInput, out: &mut Output<'_>) -> Result<Progress> {
        match self.stream {
            Some(stream) => self.read_frame(input, out, stream),
            None => self.read_header(input, out),
        }
    }

    fn seek(&mut self, _position: u64, time_us: i64) {
        self.base_time_us = time_us.max(0);
        self.samples_since_base = 0;
    }
}
