//! Ogg with Vorbis, Opus or FLAC payloads.
//!
//! The first logical stream is demultiplexed; pages of other streams are
//! skipped. Packet times come from granule positions: Opus and FLAC packets
//! are timed exactly, Vorbis packets are spread evenly across their page.

mod mapping;
mod page;

use self::mapping::Mapping;
use self::page::{find_capture, flags, read_page, Page, PageHeader, PageRead, MAX_PAGE_LEN, NO_GRANULE};
use crate::error::{Error, Result};
use crate::extractor::{Extract, Progress};
use crate::input::{ExtractorInput, InputExt, Prefix};
use crate::output::{Output, TrackId};
use crate::sample::SampleFlags;
use crate::seek::{BinarySearch, SeekMap, TimestampProbe, TimestampSearch};
use crate::track::MediaType;

/// Bytes scanned when resynchronising or probing for a page.
const SCAN_WINDOW: usize = 2 * MAX_PAGE_LEN;

/// Accepts a first page opening a Vorbis or FLAC stream.
pub(crate) fn sniff(prefix: &Prefix) -> bool {
    let data = prefix.bytes();
    let Some(header) = PageHeader::parse(data) else {
        return false;
    };
    if !header.has(flags::FIRST) {
        return false;
    }
    let first_packet = header.lacing.iter().take_while(|&&l| l == 255).count() + 1;
    let len: usize = header.lacing.iter().take(first_packet).map(|&l| usize::from(l)).sum();
    data.get(header.header_len()..header.header_len() + len.min(16))
        .is_some_and(mapping::sniffable)
}

#[derive(Debug)]
struct Stream {
    serial: u32,
    mapping: Mapping,
    track: Option<TrackId>,
    /// Partial packet continued on the next page.
    packet: Vec<u8>,
    /// Drop the continued head of the next page (after a seek or a gap).
    skip_continuation: bool,
    /// Granule of the last page on which a packet ended.
    last_granule: i64,
    first_audio_position: u64,
    duration_us: Option<i64>,
    binary_search: bool,
}

pub(crate) struct OggExtractor {
    stream: Option<Stream>,
    pending_seek_us: Option<i64>,
    /// Pages ending before this time are discarded after a seek.
    skip_until_us: Option<i64>,
}

impl OggExtractor {
    pub fn new() -> Self {
        Self {
            stream: None,
            pending_seek_us: None,
            skip_until_us: None,
        }
    }

    fn resync(&self, input: &mut dyn ExtractorInput, page_start: u64) -> Result<Progress> {
        input.seek_to_position(page_start + 1)?;
        let mut window = vec![0u8; SCAN_WINDOW];
        let n = input.read_up_to(&mut window)?;
        match find_capture(&window[..n], 0) {
            Some(at) => {
                tracing::debug!(position = page_start, skipped = at + 1, "resynchronised Ogg pages");
                input.seek_to_position(page_start + 1 + at as u64)?;
                Ok(Progress::Continue)
            }
            None if n == SCAN_WINDOW => {
                // Keep the tail in case a capture pattern straddles the window.
                input.seek_to_position(page_start + 1 + (n - 3) as u64)?;
                Ok(Progress::Continue)
            }
            None => Ok(Progress::EndOfInput),
        }
    }

    fn bisect(&mut self, input: &mut dyn ExtractorInput, target_us: i64) -> Result<()> {
        let Some(stream) = &mut self.stream else {
            return Ok(());
        };
        let Some(length) = input.length() else {
            return Ok(());
        };
        let duration_us = stream.duration_us.unwrap_or(0);
        let mut probe = OggProbe {
            serial: stream.serial,
            mapping: &stream.mapping,
            page_ends: Vec::new(),
        };
        let search = BinarySearch::new(target_us, duration_us, stream.first_audio_position, length, MAX_PAGE_LEN as u64);
        let position = search.run(input, &mut probe)?;
        let granule = probe.page_ends.iter().find(|(end, _)| *end == position).map(|(_, g)| *g);
        stream.last_granule = match granule {
            Some(granule) => granule,
            None if position <= stream.first_audio_position => 0,
            None => NO_GRANULE,
        };
        Ok(())
    }

    fn read_metadata_end(&mut self, input: &mut dyn ExtractorInput, out: &mut Output<'_>, next_page: u64) -> Result<()> {
        let Some(stream) = &mut self.stream else {
            return Ok(());
        };
        let length = input.length();
        let last_granule = match length {
            Some(length) if length > next_page => {
                let granule = last_page_granule(input, stream.serial, next_page, length)?;
                input.seek_to_position(next_page)?;
                granule
            }
            _ => None,
        };
        let duration_us = last_granule.map(|g| stream.mapping.granule_to_us(g));
        let seek_map = match (length, duration_us) {
            (Some(length), Some(duration_us)) if duration_us > 0 && length > next_page => {
                stream.binary_search = true;
                SeekMap::binary_search(duration_us, next_page, length)
            }
            _ => SeekMap::unseekable_from(duration_us, next_page),
        };
        let track = out.track(u64::from(stream.serial), MediaType::Audio);
        out.format(track, stream.mapping.format.clone());
        out.end_tracks();
        out.seek_map(seek_map);
        stream.track = Some(track);
        stream.first_audio_position = next_page;
        stream.duration_us = duration_us;
        Ok(())
    }

    fn handle_page(&mut self, input: &mut dyn ExtractorInput, out: &mut Output<'_>, page: Page) -> Result<()> {
        let next_page = input.position();
        if self.stream.is_none() {
            if !page.header.has(flags::FIRST) {
                return Err(Error::parsing("Ogg stream does not start with a first page"));
            }
            let Some((packet, true)) = page.segments().first().copied() else {
                return Err(Error::parsing("Ogg identification header spans pages"));
            };
            let mapping = Mapping::identify(packet)?;
            tracing::debug!(serial = page.header.serial, "Ogg logical stream");
            self.stream = Some(Stream {
                serial: page.header.serial,
                mapping,
                track: None,
                packet: Vec::new(),
                skip_continuation: false,
                last_granule: 0,
                first_audio_position: 0,
                duration_us: None,
                binary_search: false,
            });
            let segments = page.segments();
            return self.handle_packets(input, out, &page, &segments[1..], next_page);
        }
        let Some(stream) = &mut self.stream else {
            return Ok(());
        };
        if page.header.serial != stream.serial {
            tracing::trace!(serial = page.header.serial, "skipping page of another logical stream");
            return Ok(());
        }
        if let Some(target_us) = self.skip_until_us {
            let granule = page.header.granule;
            if granule == NO_GRANULE || stream.mapping.granule_to_us(granule) < target_us {
                if granule != NO_GRANULE {
                    stream.last_granule = granule;
                }
                stream.packet.clear();
                stream.skip_continuation = true;
                return Ok(());
            }
            self.skip_until_us = None;
        }
        let segments = page.segments();
        self.handle_packets(input, out, &page, &segments, next_page)
    }

    fn handle_packets(
        &mut self,
        input: &mut dyn ExtractorInput,
        out: &mut Output<'_>,
        page: &Page,
        segments: &[(&[u8], bool)],
        next_page: u64,
    ) -> Result<()> {
        let Some(stream) = &mut self.stream else {
            return Ok(());
        };
        let continued = page.header.has(flags::CONTINUED);
        if !continued {
            stream.packet.clear();
            stream.skip_continuation = false;
        }
        let mut completed = Vec::new();
        for (i, &(segment, complete)) in segments.iter().enumerate() {
            if i == 0 && continued && stream.skip_continuation {
                stream.skip_continuation = !complete;
                continue;
            }
            stream.packet.extend_from_slice(segment);
            if complete {
                completed.push(std::mem::take(&mut stream.packet));
            }
        }
        let mut audio = Vec::new();
        for packet in completed {
            if stream.mapping.headers_done() {
                audio.push(packet);
            } else {
                stream.mapping.header(&packet)?;
            }
        }
        if stream.track.is_none() && stream.mapping.headers_done() {
            self.read_metadata_end(input, out, next_page)?;
        }
        self.emit(out, &page.header, &audio)
    }

    fn emit(&mut self, out: &mut Output<'_>, header: &PageHeader, packets: &[Vec<u8>]) -> Result<()> {
        let Some(stream) = &mut self.stream else {
            return Ok(());
        };
        let Some(track) = stream.track else {
            return Ok(());
        };
        let end = if header.granule == NO_GRANULE { stream.last_granule } else { header.granule };
        let durations: Option<Vec<i64>> = packets.iter().map(|p| stream.mapping.packet_granules(p)).collect();
        let start = match (stream.last_granule, &durations) {
            (NO_GRANULE, Some(durations)) => (end - durations.iter().sum::<i64>()).max(0),
            (NO_GRANULE, None) => end,
            (last, _) => last,
        };
        let count = packets.len() as i64;
        let mut elapsed = 0;
        for (i, packet) in packets.iter().enumerate() {
            let granule = match (stream.mapping.packet_start(packet), &durations) {
                (Some(exact), _) => exact,
                (None, Some(durations)) => {
                    let at = start + elapsed;
                    elapsed += durations[i];
                    at
                }
                (None, None) => start + (end.max(start) - start) * i as i64 / count,
            };
            let time_us = stream.mapping.granule_to_us(granule);
            out.sample(track, time_us, SampleFlags::KEY_FRAME, packet, None)?;
        }
        if header.granule != NO_GRANULE {
            stream.last_granule = header.granule;
        }
        Ok(())
    }
}

/// Granule of the last page of `serial` in the final stretch of the input.
fn last_page_granule(input: &mut dyn ExtractorInput, serial: u32, floor: u64, length: u64) -> Result<Option<i64>> {
    let start = length.saturating_sub(MAX_PAGE_LEN as u64).max(floor);
    input.seek_to_position(start)?;
    let Some(window) = input.read_to_vec((length - start) as usize)? else {
        return Ok(None);
    };
    let mut granule = None;
    let mut at = 0;
    while let Some(found) = find_capture(&window, at) {
        if let Some(header) = PageHeader::parse(&window[found..]) {
            if header.serial == serial && header.granule != NO_GRANULE && found + header.page_len() <= window.len() {
                granule = Some(header.granule);
            }
        }
        at = found + 1;
    }
    Ok(granule)
}

/// Timestamp probe reading the first page of the stream after a position.
struct OggProbe<'a> {
    serial: u32,
    mapping: &'a Mapping,
    /// End positions of pages found before the target, with their granules.
    page_ends: Vec<(u64, i64)>,
}

impl TimestampProbe for OggProbe<'_> {
    fn search(&mut self, input: &mut dyn ExtractorInput, target_time_us: i64) -> Result<TimestampSearch> {
        let start = input.position();
        let mut window = vec![0u8; SCAN_WINDOW];
        let n = input.read_up_to(&mut window)?;
        window.truncate(n);
        let mut at = 0;
        while let Some(found) = find_capture(&window, at) {
            at = found + 1;
            let Some(header) = PageHeader::parse(&window[found..]) else {
                continue;
            };
            let end = found + header.page_len();
            if header.serial != self.serial || header.granule == NO_GRANULE || end > n {
                continue;
            }
            let time_us = self.mapping.granule_to_us(header.granule);
            if time_us < target_time_us {
                let position = start + end as u64;
                self.page_ends.push((position, header.granule));
                return Ok(TimestampSearch::Underestimated { time_us, position });
            }
            return Ok(TimestampSearch::Overestimated {
                time_us,
                position: start + found as u64,
            });
        }
        Ok(TimestampSearch::NoTimestamp)
    }
}

impl Extract for OggExtractor {
    fn read(&mut self, input: &mut dyn ExtractorInput, out: &mut Output<'_>) -> Result<Progress> {
        if let Some(target_us) = self.pending_seek_us {
            self.bisect(input, target_us)?;
            self.pending_seek_us = None;
            self.skip_until_us = Some(target_us);
            return Ok(Progress::Continue);
        }
        if let Some(stream) = &self.stream {
            let position = input.position();
            if stream.track.is_some() && position < stream.first_audio_position {
                input.seek_to_position(stream.first_audio_position)?;
                return Ok(Progress::Continue);
            }
        }
        let page_start = input.position();
        match read_page(input)? {
            PageRead::Page(page) => {
                self.handle_page(input, out, page)?;
                Ok(Progress::Continue)
            }
            PageRead::Invalid => self.resync(input, page_start),
            PageRead::EndOfInput => {
                if self.stream.as_ref().map_or(true, |s| s.track.is_none()) {
                    return Err(Error::parsing("Ogg stream ended before its headers"));
                }
                Ok(Progress::EndOfInput)
            }
        }
    }

    fn seek(&mut self, _position: u64, time_us: i64) {
        self.skip_until_us = None;
        let Some(stream) = &mut self.stream else {
            return;
        };
        stream.packet.clear();
        stream.skip_continuation = true;
        if time_us <= 0 || !stream.binary_search {
            stream.last_granule = 0;
            self.pending_seek_us = None;
        } else {
            self.pending_seek_us = Some(time_us);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mapping::tests::{flac_mapping_header, opus_head, vorbis_id};
    use super::page::tests::page;
    use super::*;
    use crate::extractor::flac::frame::tests::frame;
    use crate::extractor::flac::metadata::tests::vorbis_comment;
    use crate::extractor::{run_into, run_to_end};
    use crate::input::SliceInput;
    use crate::output::{CapturingSink, TrackTable};
    use crate::track::mime;

    const SERIAL: u32 = 0x1234;

    /// Ten 100 ms pages of two Vorbis packets each at 44.1 kHz.
    fn vorbis_file() -> Vec<u8> {
        let mut comment = b"\x03vorbis".to_vec();
        comment.extend(vorbis_comment(&["ARTIST=Someone"]));
        let mut file = page(SERIAL, 0, flags::FIRST, 0, &[&vorbis_id(44_100)]);
        file.extend(page(SERIAL, 1, 0, 0, &[&comment, b"\x05vorbis-setup"]));
        for k in 0..10u32 {
            let granule = i64::from(k + 1) * 4_410;
            let flag = if k == 9 { flags::LAST } else { 0 };
            file.extend(page(SERIAL, k + 2, flag, granule, &[&[k as u8; 10], &[k as u8; 12]]));
        }
        file
    }

    #[test]
    fn test_sniff_accepts_vorbis_and_flac_only() {
        assert!(sniff(&Prefix::from_bytes(vorbis_file())));
        let flac = page(SERIAL, 0, flags::FIRST, 0, &[&flac_mapping_header(0)]);
        assert!(sniff(&Prefix::from_bytes(flac)));
        let opus = page(SERIAL, 0, flags::FIRST, 0, &[&opus_head(312)]);
        assert!(!sniff(&Prefix::from_bytes(opus)));
        assert!(!sniff(&Prefix::from_bytes(b"RIFF....WAVE".to_vec())));
    }

    #[test]
    fn test_vorbis_packets_spread_over_pages() {
        let mut extractor = OggExtractor::new();
        let sink = run_to_end(&mut extractor, &mut SliceInput::new(vorbis_file()).with_max_read(50)).unwrap();
        let format = &sink.track(0).unwrap().format;
        assert_eq!(format.sample_mime_type.as_deref(), Some(mime::AUDIO_VORBIS));
        assert_eq!(format.initialization_data.len(), 2);
        assert_eq!(format.metadata, vec![("ARTIST".to_string(), "Someone".to_string())]);
        assert_eq!(sink.samples.len(), 20);
        let times: Vec<i64> = sink.samples.iter().take(3).map(|s| s.time_us).collect();
        assert_eq!(times, vec![0, 50_000, 100_000]);
        let map = sink.seek_map().unwrap();
        assert_eq!(map.strategy(), "binary-search");
        assert_eq!(map.duration_us(), Some(1_000_000));
    }

    #[test]
    fn test_seek_skips_earlier_pages() {
        let mut extractor = OggExtractor::new();
        let mut sink = CapturingSink::new();
        let mut table = TrackTable::default();
        let mut input = SliceInput::new(vorbis_file());
        run_into(&mut extractor, &mut input, &mut sink, &mut table).unwrap();
        sink.clear_samples();
        let point = sink.seek_map().unwrap().seek_points(550_000).first;
        input.seek_to_position(point.position).unwrap();
        extractor.seek(point.position, 550_000);
        run_into(&mut extractor, &mut input, &mut sink, &mut table).unwrap();
        assert_eq!(sink.samples.len(), 10);
        assert_eq!(sink.samples[0].time_us, 500_000);
        assert_eq!(sink.samples[1].time_us, 550_000);
    }

    #[test]
    fn test_opus_packet_times() {
        let mut tags = b"OpusTags".to_vec();
        tags.extend(vorbis_comment(&["TITLE=x"]));
        let audio = [19u8 << 3, 0xAA, 0xBB];
        let mut file = page(SERIAL, 0, flags::FIRST, 0, &[&opus_head(312)]);
        file.extend(page(SERIAL, 1, 0, 0, &[&tags]));
        file.extend(page(SERIAL, 2, flags::LAST, 312 + 3 * 960, &[&audio, &audio, &audio]));
        let mut extractor = OggExtractor::new();
        let sink = run_to_end(&mut extractor, &mut SliceInput::new(file)).unwrap();
        assert_eq!(sink.track(0).unwrap().format.encoder_delay, 312);
        let times: Vec<i64> = sink.samples.iter().map(|s| s.time_us).collect();
        assert_eq!(times, vec![0, 20_000, 40_000]);
    }

    #[test]
    fn test_flac_frames_timed_from_headers() {
        let comment = [vec![0x84, 0, 0, 25], vorbis_comment(&["ALBUM=Demo"])].concat();
        let mut file = page(SERIAL, 0, flags::FIRST, 0, &[&flac_mapping_header(1)]);
        file.extend(page(SERIAL, 1, 0, 0, &[&comment]));
        let frames: Vec<Vec<u8>> = (0..3).map(|i| frame(i, &[0x11; 20])).collect();
        file.extend(page(SERIAL, 2, flags::LAST, 3 * 4096, &[&frames[0], &frames[1], &frames[2]]));
        let mut extractor = OggExtractor::new();
        let sink = run_to_end(&mut extractor, &mut SliceInput::new(file)).unwrap();
        let format = &sink.track(0).unwrap().format;
        assert_eq!(format.sample_mime_type.as_deref(), Some(mime::AUDIO_FLAC));
        assert_eq!(format.metadata, vec![("ALBUM".to_string(), "Demo".to_string())]);
        let times: Vec<i64> = sink.samples.iter().map(|s| s.time_us).collect();
        assert_eq!(times, vec![0, 92_879, 185_759]);
    }

    #[test]
    fn test_skips_foreign_streams_and_garbage() {
        let mut file = vorbis_file();
        let foreign = page(SERIAL + 1, 0, flags::FIRST, 0, &[b"other"]);
        let mut garbage = b"junkjunk".to_vec();
        garbage.extend(foreign);
        let insert_at = page(SERIAL, 0, flags::FIRST, 0, &[&vorbis_id(44_100)]).len();
        file.splice(insert_at..insert_at, garbage);
        let mut extractor = OggExtractor::new();
        let sink = run_to_end(&mut extractor, &mut SliceInput::new(file)).unwrap();
        assert_eq!(sink.samples.len(), 20);
    }
}
