//! MPEG audio elementary streams (layers I to III).

mod seeker;

use self::seeker::{parse_vbri, parse_xing};
use crate::error::{Error, Result};
use crate::extractor::{Extract, Progress};
use crate::input::{ExtractorInput, InputExt, Prefix};
use crate::output::{Output, TrackId};
use crate::params::{Mp3Options, Parameters};
use crate::sample::SampleFlags;
use crate::seek::{scale, ConstantBitrateSeekMap, IndexSeekMap, SeekMap};
use crate::track::{MediaType, TrackFormat};
use crate::util::id3;
use crate::util::mpeg_audio::{parse_header, MpegAudioHeader, MAX_FRAME_SIZE};

/// Bytes searched for the first frame after any ID3 tag.
const SYNC_SEARCH_LEN: usize = 128 * 1024;
const SNIFF_SEARCH_LEN: usize = 32 * 1024;
/// Consecutive frames that must agree before sync is declared.
const MIN_MATCHING_HEADERS: usize = 4;
/// Header bits that stay constant across a stream: sync, version, layer
/// and sample rate.
const HEADER_MASK: u32 = 0xFFFE_0C00;
/// Spacing of index points built by a full scan.
const INDEX_INTERVAL_US: i64 = 100_000;

fn word_at(data: &[u8], at: usize) -> Option<u32> {
    data.get(at..at + 4).map(|b| crate::util::be_u32(b, 0))
}

/// Checks for a chain of agreeing frames starting at `start`. Running off
/// the end of `data` is accepted when `data` holds the rest of the stream.
fn chained_frames(data: &[u8], start: usize, at_end: bool) -> Option<MpegAudioHeader> {
    let first_word = word_at(data, start)?;
    let first = parse_header(first_word)?;
    let mut position = start + first.frame_size;
    for _ in 1..MIN_MATCHING_HEADERS {
        match word_at(data, position) {
            Some(word) if word & HEADER_MASK == first_word & HEADER_MASK => {
                position += parse_header(word)?.frame_size;
            }
            Some(_) => return None,
            None => return at_end.then_some(first),
        }
    }
    Some(first)
}

fn find_sync(data: &[u8], search_len: usize, at_end: bool) -> Option<(usize, MpegAudioHeader)> {
    (0..data.len().min(search_len + 1)).find_map(|at| chained_frames(data, at, at_end).map(|h| (at, h)))
}

/// Accepts a stream that, after any ID3v2 tags, starts a chain of valid
/// frame headers within the first 32 KiB.
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

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Header,
    Frames,
}

/// Stream constants fixed once sync is found.
#[derive(Debug, Clone, Copy)]
struct Stream {
    track: TrackId,
    header_bits: u32,
    sample_rate: u32,
    samples_per_frame: u32,
    /// First byte after ID3 tags and any Xing/Info/VBRI frame.
    audio_start: u64,
}

pub(crate) struct Mp3Extractor {
    options: Mp3Options,
    state: State,
    stream: Option<Stream>,
    base_time_us: i64,
    frames_since_base: u64,
}

impl Mp3Extractor {
    pub fn new(params: &Parameters) -> Self {
        Self {
            options: params.mp3,
            state: State::Header,
            stream: None,
            base_time_us: 0,
            frames_since_base: 0,
        }
    }

    fn read_header(&mut self, input: &mut dyn ExtractorInput, out: &mut Output<'_>) -> Result<Progress> {
        let tag = id3::read_tags(input, !self.options.disable_id3)?;
        let data_start = input.position();
        let wanted = SYNC_SEARCH_LEN + MIN_MATCHING_HEADERS * MAX_FRAME_SIZE;
        let mut window = vec![0u8; wanted];
        let n = input.read_up_to(&mut window)?;
        window.truncate(n);
        let at_end = n < wanted;
        let (offset, header) = find_sync(&window, SYNC_SEARCH_LEN, at_end)
            .ok_or_else(|| Error::parsing("no MPEG audio frame sync found"))?;
        let frame_start = data_start + offset as u64;
        let frame = &window[offset..window.len().min(offset + header.frame_size)];
        let xing = parse_xing(frame, &header);
        let vbri = parse_vbri(frame, frame_start, &header);
        let header_frame = xing.is_some() || vbri.is_some();
        let audio_start = if header_frame { frame_start + header.frame_size as u64 } else { frame_start };
        tracing::debug!(frame_start, xing = xing.is_some(), vbri = vbri.is_some(), "MPEG audio sync");

        let duration_us = xing.as_ref().and_then(|x| x.duration_us(&header));
        let seek_map = if self.options.enable_index_seeking {
            scan_index(input, audio_start, &header)?
        } else if let Some(map) = vbri {
            map
        } else if let Some(map) = xing.as_ref().and_then(|x| x.seek_map(frame_start, &header)) {
            map
        } else if xing.is_none() || xing.as_ref().is_some_and(|x| x.is_info) || self.options.enable_cbr_seeking {
            let bitrate = xing
                .as_ref()
                .and_then(|x| Some((x.data_size?, duration_us?)))
                .filter(|&(_, us)| us > 0)
                .map_or(header.bitrate, |(bytes, us)| scale(i64::from(bytes) * 8, 1_000_000, us) as u32);
            SeekMap::constant_bitrate(ConstantBitrateSeekMap::new(
                audio_start,
                input.length(),
                bitrate,
                header.frame_size as u32,
            ))
        } else {
            SeekMap::unseekable_from(duration_us, audio_start)
        };

        let mut format = TrackFormat::audio(header.mime_type(), header.sample_rate, header.channels);
        format.max_input_size = Some(MAX_FRAME_SIZE);
        if let Some((delay, padding)) = xing
            .as_ref()
            .and_then(|x| x.gapless)
            .or_else(|| tag.as_ref().and_then(|t| t.gapless))
        {
            format.encoder_delay = delay;
            format.encoder_padding = padding;
        }
        if let Some(tag) = tag {
            format.metadata = tag.frames;
        }
        input.seek_to_position(audio_start)?;
        let track = out.track(0, MediaType::Audio);
        out.format(track, format);
        out.end_tracks();
        out.seek_map(seek_map);
        self.stream = Some(Stream {
            track,
            header_bits: word_at(&window, offset).unwrap_or_default() & HEADER_MASK,
            sample_rate: header.sample_rate,
            samples_per_frame: header.samples_per_frame,
            audio_start,
        });
        self.state = State::Frames;
        Ok(Progress::Continue)
    }

    fn read_frame(&mut self, input: &mut dyn ExtractorInput, out: &mut Output<'_>, stream: Stream) -> Result<Progress> {
        let position = input.position();
        if position < stream.audio_start {
            input.seek_to_position(stream.audio_start)?;
            return Ok(Progress::Continue);
        }
        let mut head = [0u8; id3::HEADER_LEN];
        let n = input.read_up_to(&mut head)?;
        if n < 4 {
            return Ok(Progress::EndOfInput);
        }
        let word = crate::util::be_u32(&head, 0);
        let header = parse_header(word).filter(|_| word & HEADER_MASK == stream.header_bits);
        let Some(header) = header else {
            return self.resync(input, position, &head[..n], stream);
        };
        input.seek_to_position(position)?;
        let Some(data) = input.read_to_vec(header.frame_size)? else {
            tracing::debug!(position, "dropping truncated final frame");
            return Ok(Progress::EndOfInput);
        };
        let time_us = self.base_time_us
            + scale(
                (self.frames_since_base * u64::from(stream.samples_per_frame)) as i64,
                1_000_000,
                i64::from(stream.sample_rate),
            );
        out.sample(stream.track, time_us, SampleFlags::KEY_FRAME, &data, None)?;
        self.frames_since_base += 1;
        Ok(Progress::Continue)
    }

    /// Skips an embedded ID3 tag or searches forward for the next frame
    /// header matching the stream.
    fn resync(&mut self, input: &mut dyn ExtractorInput, position: u64, head: &[u8], stream: Stream) -> Result<Progress> {
        if let Some(len) = id3::tag_len(head) {
            input.seek_to_position(position)?;
            return Ok(if input.skip_fully(len as u64)? { Progress::Continue } else { Progress::EndOfInput });
        }
        input.seek_to_position(position)?;
        let mut window = vec![0u8; SYNC_SEARCH_LEN];
        let n = input.read_up_to(&mut window)?;
        window.truncate(n);
        let found = (1..n).find(|&at| {
            word_at(&window, at).is_some_and(|word| word & HEADER_MASK == stream.header_bits && parse_header(word).is_some())
        });
        match found {
            Some(at) => {
                tracing::debug!(position, skipped = at, "resynchronised MPEG audio");
                input.seek_to_position(position + at as u64)?;
                Ok(Progress::Continue)
            }
            None => {
                tracing::warn!(position, "lost MPEG audio sync");
                Ok(Progress::EndOfInput)
            }
        }
    }
}

/// Walks every frame header to build an exact index. Only used when the
/// input length is known.
fn scan_index(input: &mut dyn ExtractorInput, audio_start: u64, first: &MpegAudioHeader) -> Result<SeekMap> {
    if input.length().is_none() {
        return Ok(SeekMap::unseekable_from(None, audio_start));
    }
    let mut index = IndexSeekMap::new(None);
    let mut position = audio_start;
    let mut samples = 0u64;
    let mut last_point_us = i64::MIN;
    input.seek_to_position(position)?;
    loop {
        let mut head = [0u8; 4];
        if !input.read_fully(&mut head)? {
            break;
        }
        let Some(header) = parse_header(u32::from_be_bytes(head)).filter(|h| h.sample_rate == first.sample_rate) else {
            break;
        };
        let time_us = scale((samples * u64::from(header.samples_per_frame)) as i64, 1_000_000, i64::from(header.sample_rate));
        if time_us - last_point_us >= INDEX_INTERVAL_US {
            index.push(time_us, position);
            last_point_us = time_us;
        }
        samples += 1;
        position += header.frame_size as u64;
        if !input.advance_to(position)? {
            break;
        }
    }
    index.set_duration_us(Some(scale(
        (samples * u64::from(first.samples_per_frame)) as i64,
        1_000_000,
        i64::from(first.sample_rate),
    )));
    Ok(SeekMap::index(index))
}

impl Extract for Mp3Extractor {
    fn read(&mut self, input: &mut dyn ExtractorInput, out: &mut Output<'_>) -> Result<Progress> {
        match (self.state, self.stream) {
            (State::Frames, Some(stream)) => self.read_frame(input, out, stream),
            _ => self.read_header(input, out),
        }
    }

    fn seek(&mut self, _position: u64, time_us: i64) {
        self.base_time_us = time_us.max(0);
        self.frames_since_base = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::seeker::tests::xing_frame;
    use super::*;
    use crate::extractor::run_to_end;
    use crate::input::SliceInput;
    use crate::params::Parameters;
    use crate::util::mpeg_audio::tests::HEADER_128K_44100;

    fn frames(count: usize) -> Vec<u8> {
        let mut frame = HEADER_128K_44100.to_be_bytes().to_vec();
        frame.resize(417, 0);
        frame.repeat(count)
    }

    fn id3_title(title: &str) -> Vec<u8> {
        let mut frame = b"TIT2".to_vec();
        frame.extend_from_slice(&(title.len() as u32 + 1).to_be_bytes());
        frame.extend_from_slice(&[0, 0, 0]);
        frame.extend_from_slice(title.as_bytes());
        let mut tag = b"ID3\x03\x00\x00".to_vec();
        tag.extend_from_slice(&[0, 0, 0, frame.len() as u8]);
        tag.extend_from_slice(&frame);
        tag
    }

    fn frame_time(index: i64) -> i64 {
        scale(index * 1152, 1_000_000, 44_100)
    }

    #[test]
    fn test_sniff() {
        assert!(sniff(&Prefix::from_bytes([id3_title("x"), frames(5)].concat())));
        assert!(sniff(&Prefix::from_bytes(frames(2))));
        assert!(!sniff(&Prefix::from_bytes(vec![0x55; 4096])));
    }

    #[test]
    fn test_constant_bitrate_stream() {
        let file = [id3_title("Song"), frames(10)].concat();
        let tag_len = file.len() - 4_170;
        let mut extractor = Mp3Extractor::new(&Parameters::default());
        let sink = run_to_end(&mut extractor, &mut SliceInput::new(file).with_max_read(100)).unwrap();
        let format = &sink.track(0).unwrap().format;
        assert_eq!(format.sample_rate, Some(44_100));
        assert_eq!(format.channel_count, Some(2));
        assert_eq!(format.metadata, vec![("TIT2".to_string(), "Song".to_string())]);
        assert_eq!(sink.samples.len(), 10);
        assert_eq!(sink.samples[3].time_us, frame_time(3));
        assert!(sink.samples.iter().all(|s| s.size == 417 && s.flags.is_key_frame()));
        let map = sink.seek_map().unwrap();
        assert_eq!(map.strategy(), "constant-bitrate");
        assert_eq!(map.duration_us(), Some(260_625));
        assert_eq!(map.seek_points(0).first.position, tag_len as u64);
    }

    #[test]
    fn test_xing_frame_is_not_a_sample() {
        let file = [xing_frame(10, 11 * 417), frames(10)].concat();
        let mut extractor = Mp3Extractor::new(&Parameters::default());
        let sink = run_to_end(&mut extractor, &mut SliceInput::new(file)).unwrap();
        assert_eq!(sink.samples.len(), 10);
        assert_eq!(sink.samples[0].time_us, 0);
        let format = &sink.track(0).unwrap().format;
        assert_eq!((format.encoder_delay, format.encoder_padding), (576, 16));
        let map = sink.seek_map().unwrap();
        assert_eq!(map.strategy(), "table-of-contents");
        assert_eq!(map.duration_us(), Some(frame_time(10)));
    }

    #[test]
    fn test_index_seeking_scans_frames() {
        let mut params = Parameters::default();
        params.mp3.enable_index_seeking = true;
        let mut extractor = Mp3Extractor::new(&params);
        let sink = run_to_end(&mut extractor, &mut SliceInput::new(frames(20))).unwrap();
        assert_eq!(sink.samples.len(), 20);
        let map = sink.seek_map().unwrap();
        assert_eq!(map.strategy(), "index");
        assert_eq!(map.duration_us(), Some(frame_time(20)));
        let points = map.seek_points(frame_time(8));
        assert_eq!(points.first.position % 417, 0);
        assert!(points.first.time_us <= frame_time(8));
    }

    #[test]
    fn test_resync_skips_garbage() {
        let file = [frames(4), vec![0x11; 7], frames(2)].concat();
        let mut extractor = Mp3Extractor::new(&Parameters::default());
        let sink = run_to_end(&mut extractor, &mut SliceInput::new(file)).unwrap();
        assert_eq!(sink.samples.len(), 6);
    }
}
