//! AMR narrowband and wideband storage format (RFC 4867 section 5).

use crate::error::{Error, Result};
use crate::extractor::{Extract, Progress};
use crate::input::{ExtractorInput, InputExt, Prefix};
use crate::output::{Output, TrackId};
use crate::params::Parameters;
use crate::sample::SampleFlags;
use crate::seek::{ConstantBitrateSeekMap, IndexSeekMap, SeekMap};
use crate::track::{mime, MediaType, TrackFormat};

const MAGIC_NB: &[u8] = b"#!AMR\n";
const MAGIC_WB: &[u8] = b"#!AMR-WB\n";
/// Speech bytes per frame type, header byte excluded.
const FRAME_BYTES_NB: [usize; 16] = [12, 13, 15, 17, 19, 20, 26, 31, 5, 0, 0, 0, 0, 0, 0, 0];
const FRAME_BYTES_WB: [usize; 16] = [17, 23, 32, 36, 40, 46, 50, 58, 60, 5, 0, 0, 0, 0, 0, 0];
const FRAME_DURATION_US: i64 = 20_000;
/// Frames that must share one size before the stream is treated as
/// constant bitrate.
const CBR_FRAME_THRESHOLD: usize = 20;
/// Spacing of the points recorded by the frame scan.
const INDEX_INTERVAL_US: i64 = 100_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Band {
    Narrow,
    Wide,
}

impl Band {
    fn magic(self) -> &'static [u8] {
        match self {
            Self::Narrow => MAGIC_NB,
            Self::Wide => MAGIC_WB,
        }
    }

    fn detect(data: &[u8]) -> Option<Self> {
        if data.starts_with(MAGIC_NB) {
            Some(Self::Narrow)
        } else if data.starts_with(MAGIC_WB) {
            Some(Self::Wide)
        } else {
            None
        }
    }

    /// Whole frame size for a frame header byte, `None` if the header is
    /// malformed or uses a reserved frame type.
    fn frame_size(self, header: u8) -> Option<usize> {
        if header & 0x83 != 0 {
            return None;
        }
        let frame_type = usize::from(header >> 3);
        let reserved = match self {
            Self::Narrow => (12..=14).contains(&frame_type),
            Self::Wide => (10..=13).contains(&frame_type),
        };
        if reserved {
            return None;
        }
        let table = match self {
            Self::Narrow => &FRAME_BYTES_NB,
            Self::Wide => &FRAME_BYTES_WB,
        };
        Some(table[frame_type] + 1)
    }

    fn format(self) -> TrackFormat {
        match self {
            Self::Narrow => TrackFormat::audio(mime::AUDIO_AMR_NB, 8_000, 1),
            Self::Wide => TrackFormat::audio(mime::AUDIO_AMR_WB, 16_000, 1),
        }
    }
}

pub(crate) fn sniff(prefix: &Prefix) -> bool {
    Band::detect(prefix.bytes()).is_some()
}

#[derive(Debug, Clone, Copy)]
struct Stream {
    track: TrackId,
    band: Band,
}

pub(crate) struct AmrExtractor {
    enable_cbr_seeking: bool,
    stream: Option<Stream>,
    time_us: i64,
}

impl AmrExtractor {
    pub fn new(params: &Parameters) -> Self {
        Self {
            enable_cbr_seeking: params.amr_enable_cbr_seeking,
            stream: None,
            time_us: 0,
        }
    }

    fn read_header(&mut self, input: &mut dyn ExtractorInput, out: &mut Output<'_>) -> Result<Progress> {
        let mut magic = [0u8; 9];
        let n = input.read_up_to(&mut magic)?;
        let band = Band::detect(&magic[..n]).ok_or_else(|| Error::parsing("missing AMR magic"))?;
        let data_start = band.magic().len() as u64;
        let seek_map = if self.enable_cbr_seeking {
            constant_bitrate_map(input, band, data_start)?
        } else {
            scan_index(input, band, data_start)?
        };
        input.seek_to_position(data_start)?;
        let track = out.track(0, MediaType::Audio);
        let mut format = band.format();
        format.max_input_size = Some(FRAME_BYTES_WB[8] + 1);
        out.format(track, format);
        out.end_tracks();
        out.seek_map(seek_map);
        self.stream = Some(Stream { track, band });
        Ok(Progress::Continue)
    }

    fn read_frame(&mut self, input: &mut dyn ExtractorInput, out: &mut Output<'_>, stream: Stream) -> Result<Progress> {
        let position = input.position();
        let data_start = stream.band.magic().len() as u64;
        if position < data_start {
            input.seek_to_position(data_start)?;
            return Ok(Progress::Continue);
        }
        let mut header = [0u8; 1];
        if !input.read_fully(&mut header)? {
            return Ok(Progress::EndOfInput);
        }
        let size = stream
            .band
            .frame_size(header[0])
            .ok_or_else(|| Error::parsing(format!("invalid AMR frame header {:#04x} at {position}", header[0])))?;
        input.seek_to_position(position)?;
        let Some(frame) = input.read_to_vec(size)? else {
            return Ok(Progress::EndOfInput);
        };
        out.sample(stream.track, self.time_us, SampleFlags::KEY_FRAME, &frame, None)?;
        self.time_us += FRAME_DURATION_US;
        Ok(Progress::Continue)
    }
}

/// Walks every frame header to build an exact index. Only used when the
/// input length is known.
fn scan_index(input: &mut dyn ExtractorInput, band: Band, data_start: u64) -> Result<SeekMap> {
    let Some(length) = input.length() else {
        return Ok(SeekMap::unseekable_from(None, data_start));
    };
    let mut index = IndexSeekMap::new(None);
    let mut position = data_start;
    let mut frames = 0i64;
    input.seek_to_position(position)?;
    while position < length {
        let mut header = [0u8; 1];
        if !input.read_fully(&mut header)? {
            break;
        }
        let Some(size) = band.frame_size(header[0]) else {
            tracing::warn!(position, header = header[0], "invalid AMR frame header, index truncated");
            break;
        };
        let time_us = frames * FRAME_DURATION_US;
        if time_us % INDEX_INTERVAL_US == 0 {
            index.push(time_us, position);
        }
        frames += 1;
        position += size as u64;
        if !input.advance_to(position)? {
            break;
        }
    }
    if index.is_empty() {
        return Ok(SeekMap::unseekable_from(None, data_start));
    }
    tracing::debug!(frames, "indexed AMR frames");
    index.set_duration_us(Some(frames * FRAME_DURATION_US));
    Ok(SeekMap::index(index))
}

/// Constant bitrate map when the leading frames all share one size.
fn constant_bitrate_map(input: &mut dyn ExtractorInput, band: Band, data_start: u64) -> Result<SeekMap> {
    let unseekable = SeekMap::unseekable_from(None, data_start);
    if input.length().is_none() {
        return Ok(unseekable);
    }
    input.seek_to_position(data_start)?;
    let mut position = data_start;
    let mut common_size = None;
    for _ in 0..CBR_FRAME_THRESHOLD {
        let mut header = [0u8; 1];
        if !input.read_fully(&mut header)? {
            break;
        }
        let Some(size) = band.frame_size(header[0]) else {
            return Ok(unseekable);
        };
        if *common_size.get_or_insert(size) != size {
            return Ok(unseekable);
        }
        position += size as u64;
        if !input.advance_to(position)? {
            break;
        }
    }
    let Some(size) = common_size else {
        return Ok(unseekable);
    };
    let bitrate = (size as u64 * 8 * 1_000_000 / FRAME_DURATION_US as u64) as u32;
    Ok(SeekMap::constant_bitrate(ConstantBitrateSeekMap::new(
        data_start,
        input.length(),
        bitrate,
        size as u32,
    )))
}

impl Extract for AmrExtractor {
    fn read(&mut self, input: &mut dyn ExtractorInput, out: &mut Output<'_>) -> Result<Progress> {
        match self.stream {
            Some(stream) => self.read_frame(input, out, stream),
            None => self.read_header(input, out),
        }
    }

    fn seek(&mut self, _position: u64, time_us: i64) {
        self.time_us = time_us.max(0);
    }
}
