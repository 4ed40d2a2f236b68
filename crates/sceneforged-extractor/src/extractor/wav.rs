//! RIFF/RF64 WAVE with PCM, float, A-law and µ-law payloads.

use crate::error::{Error, Result};
use crate::extractor::{Extract, Progress};
use crate::input::{ExtractorInput, InputExt, Prefix};
use crate::output::{Output, TrackId};
use crate::sample::SampleFlags;
use crate::seek::{scale, BlockSeekMap, SeekMap};
use crate::track::{mime, MediaType, PcmEncoding, TrackFormat};
use crate::util::cursor::ByteCursor;

const FORMAT_PCM: u16 = 0x0001;
const FORMAT_FLOAT: u16 = 0x0003;
const FORMAT_ALAW: u16 = 0x0006;
const FORMAT_MULAW: u16 = 0x0007;
const FORMAT_EXTENSIBLE: u16 = 0xFFFE;
/// Samples hold roughly this many milliseconds of audio.
const TARGET_SAMPLE_MS: u64 = 100;
const MAX_FMT_CHUNK: u64 = 1024;

pub(crate) fn sniff(prefix: &Prefix) -> bool {
    let data = prefix.bytes();
    data.len() >= 12 && (&data[..4] == b"RIFF" || &data[..4] == b"RF64") && &data[8..12] == b"WAVE"
}

#[derive(Debug, Clone, Copy)]
struct WavFormat {
    format_type: u16,
    channels: u16,
    sample_rate: u32,
    byte_rate: u32,
    block_align: u16,
    bits_per_sample: u16,
}

impl WavFormat {
    fn parse(body: &[u8]) -> Result<Self> {
        let mut c = ByteCursor::new(body);
        let mut format = Self {
            format_type: c.read_u16_le()?,
            channels: c.read_u16_le()?,
            sample_rate: c.read_u32_le()?,
            byte_rate: c.read_u32_le()?,
            block_align: c.read_u16_le()?,
            bits_per_sample: c.read_u16_le()?,
        };
        if format.format_type == FORMAT_EXTENSIBLE {
            // cbSize, valid bits, channel mask, then the sub-format GUID.
            c.skip(2 + 2 + 4)?;
            format.format_type = c.read_u16_le()?;
        }
        if format.channels == 0 || format.sample_rate == 0 || format.block_align == 0 {
            return Err(Error::parsing("degenerate WAVE fmt chunk"));
        }
        Ok(format)
    }

    fn track_format(&self) -> Result<TrackFormat> {
        let channels = u32::from(self.channels);
        let (mime_type, encoding) = match self.format_type {
            FORMAT_PCM => {
                let encoding = PcmEncoding::from_bits(u32::from(self.bits_per_sample)).ok_or_else(|| {
                    Error::parsing(format!("unsupported PCM depth of {} bits", self.bits_per_sample))
                })?;
                (mime::AUDIO_RAW, Some(encoding))
            }
            FORMAT_FLOAT if self.bits_per_sample == 32 => (mime::AUDIO_RAW, Some(PcmEncoding::F32Le)),
            FORMAT_ALAW => (mime::AUDIO_ALAW, None),
            FORMAT_MULAW => (mime::AUDIO_MLAW, None),
            other => {
                return Err(Error::parsing(format!(
                    "unsupported WAVE format {other:#06x} with {} bits",
                    self.bits_per_sample
                )))
            }
        };
        let mut format = TrackFormat::audio(mime_type, self.sample_rate, channels);
        format.pcm_encoding = encoding;
        format.average_bitrate = Some(self.byte_rate.saturating_mul(8));
        format.max_input_size = Some(self.target_sample_size());
        Ok(format)
    }

    fn target_sample_size(&self) -> usize {
        let frames = (u64::from(self.sample_rate) * TARGET_SAMPLE_MS / 1_000).max(1);
        (frames * u64::from(self.block_align)) as usize
    }
}

#[derive(Debug, Clone, Copy)]
struct Data {
    track: TrackId,
    format: WavFormat,
    start: u64,
    end: u64,
}

pub(crate) struct WavExtractor {
    data: Option<Data>,
}

impl WavExtractor {
    pub fn new() -> Self {
        Self { data: None }
    }

    /// Walks the RIFF chunks up to `data`.
    fn read_header(&mut self, input: &mut dyn ExtractorInput, out: &mut Output<'_>) -> Result<Progress> {
        let mut riff = [0u8; 12];
        if !input.read_fully(&mut riff)? {
            return Err(Error::parsing("empty input"));
        }
        let rf64 = &riff[..4] == b"RF64";
        if !(rf64 || &riff[..4] == b"RIFF") || &riff[8..12] != b"WAVE" {
            return Err(Error::parsing("missing RIFF/WAVE header"));
        }
        let mut format = None;
        let mut rf64_data_size = None;
        loop {
            let mut header = [0u8; 8];
            if !input.read_fully(&mut header)? {
                return Err(Error::parsing("WAVE stream without a data chunk"));
            }
            let id = &header[..4];
            let size = u64::from(crate::util::le_u32(&header, 4));
            match id {
                b"ds64" if rf64 => {
                    let body = input
                        .read_to_vec(size.min(MAX_FMT_CHUNK) as usize)?
                        .ok_or_else(|| Error::parsing("truncated ds64 chunk"))?;
                    // RIFF size, then data size.
                    rf64_data_size = body.get(8..16).map(|b| crate::util::le_u64(b, 0));
                    input.skip_fully(size.saturating_sub(MAX_FMT_CHUNK))?;
                }
                b"fmt " => {
                    if size > MAX_FMT_CHUNK {
                        return Err(Error::parsing(format!("oversized fmt chunk of {size} bytes")));
                    }
                    let body = input
                        .read_to_vec(size as usize)?
                        .ok_or_else(|| Error::parsing("truncated fmt chunk"))?;
                    format = Some(WavFormat::parse(&body)?);
                }
                b"data" => {
                    let format = format.ok_or_else(|| Error::parsing("data chunk before fmt"))?;
                    let start = input.position();
                    let declared = if rf64 { rf64_data_size.unwrap_or(size) } else { size };
                    let mut end = start.saturating_add(declared);
                    if let Some(length) = input.length() {
                        if end > length || declared == u64::from(u32::MAX) {
                            tracing::debug!(declared, length, "clamping WAVE data chunk to the input");
                            end = length;
                        }
                    }
                    self.start_data(out, format, start, end)?;
                    return Ok(Progress::Continue);
                }
                _ => {
                    // Chunks are word aligned.
                    if !input.skip_fully(size + (size & 1))? {
                        return Err(Error::parsing("WAVE stream without a data chunk"));
                    }
                }
            }
        }
    }

    fn start_data(&mut self, out: &mut Output<'_>, format: WavFormat, start: u64, end: u64) -> Result<()> {
        let track_format = format.track_format()?;
        let block_size = u64::from(format.block_align);
        let track = out.track(0, MediaType::Audio);
        out.format(track, track_format);
        out.end_tracks();
        out.seek_map(SeekMap::blocks(BlockSeekMap {
            first_block_position: start,
            block_size,
            block_count: end.saturating_sub(start) / block_size,
            frames_per_block: 1,
            frame_rate: u64::from(format.sample_rate),
        }));
        self.data = Some(Data {
            track,
            format,
            start,
            end,
        });
        Ok(())
    }

    fn read_samples(&mut self, input: &mut dyn ExtractorInput, out: &mut Output<'_>, data: Data) -> Result<Progress> {
        let position = input.position();
        if position < data.start {
            input.seek_to_position(data.start)?;
            return Ok(Progress::Continue);
        }
        let block = u64::from(data.format.block_align);
        let remaining = data.end.saturating_sub(position) / block * block;
        if remaining == 0 {
            return Ok(Progress::EndOfInput);
        }
        let len = remaining.min(data.format.target_sample_size() as u64) as usize;
        let Some(bytes) = input.read_to_vec(len)? else {
            return Ok(Progress::EndOfInput);
        };
        let frame = (position - data.start) / block;
        let time_us = scale(frame as i64, 1_000_000, i64::from(data.format.sample_rate));
        out.sample(data.track, time_us, SampleFlags::KEY_FRAME, &bytes, None)?;
        Ok(Progress::Continue)
    }
}

impl Extract for WavExtractor {
    fn read(&mut self, input: &mut dyn ExtractorInput, out: &mut Output<'_>) -> Result<Progress> {
        match self.data {
            Some(data) => self.read_samples(input, out, data),
            None => self.read_header(input, out),
        }
    }

    /// Sample times derive from the byte position, so there is nothing to
    /// reset.
    fn seek(&mut self, _position: u64, _time_us: i64) {}
}
