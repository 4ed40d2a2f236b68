//! MPEG-1 and MPEG-2 program streams.
//!
//! The stream is a sequence of start-code-delimited structures: pack
//! headers carrying the SCR, an optional system header, and PES packets.
//! PES payloads go to the same elementary readers the transport stream
//! extractor uses.

use std::collections::BTreeMap;

use super::ts::pes::{parse_pes, read_timestamp, Pes};
use super::ts::readers::{AudioCodec, AudioReader, H262Reader, PesReader};
use crate::error::Result;
use crate::extractor::{Extract, Progress};
use crate::input::{ExtractorInput, InputExt, Prefix};
use crate::output::Output;
use crate::seek::{BinarySearch, SeekMap, TimestampProbe, TimestampSearch};
use crate::track::MediaType;
use crate::util::timestamp::{pts_to_us, TimestampAdjuster};
use crate::util::be_u16;

const PACK_START: u8 = 0xBA;
const SYSTEM_HEADER: u8 = 0xBB;
const PROGRAM_END: u8 = 0xB9;
const PRIVATE_STREAM_1: u8 = 0xBD;
/// Lowest stream id that is a system start code rather than elementary data.
const FIRST_SYSTEM_ID: u8 = PROGRAM_END;

/// Bytes scanned from each end of the stream for SCR values.
const SCR_SEARCH_BYTES: usize = 20_000;
/// Tracks are final after this much data even if a type is missing.
const MAX_TRACK_SEARCH: u64 = 1024 * 1024;
/// Extra data read once both audio and video were found.
const TRACK_SEARCH_AFTER_AUDIO_AND_VIDEO: u64 = 8 * 1024;
const RESYNC_WINDOW: usize = 64 * 1024;
const MIN_SEARCH_RANGE: u64 = 1024;

/// Accepts a pack header at the start of the stream followed by another
/// start code.
pub(crate) fn sniff(prefix: &Prefix) -> bool {
    let data = prefix.bytes();
    if data.len() < 14 || data[..4] != [0, 0, 1, PACK_START] {
        return false;
    }
    let next = match pack_header_len(data) {
        Some(len) => len,
        None => return false,
    };
    data.get(next..next + 3) == Some(&[0, 0, 1][..])
}

/// Length of the pack header at the start of `data`, from its marker bits.
fn pack_header_len(data: &[u8]) -> Option<usize> {
    let b = data.get(..14)?;
    if b[4] & 0xC4 == 0x44 {
        let markers = b[6] & 0x04 != 0 && b[8] & 0x04 != 0 && b[9] & 0x01 != 0 && b[12] & 0x03 == 0x03;
        markers.then_some(14 + usize::from(b[13] & 0x07))
    } else if b[4] & 0xF1 == 0x21 {
        Some(12)
    } else {
        None
    }
}

/// 33-bit SCR base of a pack header.
fn read_scr(pack: &[u8]) -> Option<i64> {
    let b = pack.get(4..10)?;
    if b[0] & 0xC0 == 0x40 {
        Some(
            (i64::from(b[0] & 0x38) << 27)
                | (i64::from(b[0] & 0x03) << 28)
                | (i64::from(b[1]) << 20)
                | (i64::from(b[2] & 0xF8) << 12)
                | (i64::from(b[2] & 0x03) << 13)
                | (i64::from(b[3]) << 5)
                | i64::from(b[4] >> 3),
        )
    } else if b[0] & 0xF0 == 0x20 {
        Some(read_timestamp(b))
    } else {
        None
    }
}

/// `(pack position, SCR)` of every pack header in `data`, which starts at
/// absolute `position`.
fn scrs(data: &[u8], position: u64) -> Vec<(u64, i64)> {
    let mut found = Vec::new();
    let mut at = 0;
    while let Some(offset) = data.get(at..).and_then(|rest| rest.windows(4).position(|w| w == [0, 0, 1, PACK_START])) {
        at += offset;
        if let Some(scr) = pack_header_len(&data[at..]).and_then(|_| read_scr(&data[at..])) {
            found.push((position + at as u64, scr));
        }
        at += 4;
    }
    found
}

/// MPEG-1 PES header: stuffing, optional STD buffer size, then timestamps.
fn parse_mpeg1_pes(stream_id: u8, body: &[u8]) -> Option<Pes> {
    let mut at = body.iter().position(|&b| b != 0xFF)?;
    if body[at] & 0xC0 == 0x40 {
        at += 2;
    }
    let flags = *body.get(at)?;
    let (pts, header_len) = match flags & 0xF0 {
        0x20 => (Some(read_timestamp(body.get(at..at + 5)?)), 5),
        0x30 => (Some(read_timestamp(body.get(at..at + 5)?)), 10),
        _ if flags == 0x0F => (None, 1),
        _ => return None,
    };
    Some(Pes {
        stream_id,
        pts,
        data_alignment: false,
        payload: body.get(at + header_len..)?.to_vec(),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Timeline {
    Unknown,
    Bisect { first_scr: i64, duration_us: i64 },
    Unseekable,
}

/// One elementary stream: a stream id, or `0xBD00 | substream` for
/// private stream 1.
type StreamKey = u16;

pub(crate) struct PsExtractor {
    readers: BTreeMap<StreamKey, Box<dyn PesReader>>,
    found_audio: bool,
    found_video: bool,
    /// Position after which tracks are final once audio and video are known.
    search_end: Option<u64>,
    tracks_ended: bool,
    timeline: Timeline,
    adjuster: TimestampAdjuster,
    pending_seek_us: Option<i64>,
    flushed: bool,
}

impl PsExtractor {
    pub fn new() -> Self {
        Self {
            readers: BTreeMap::new(),
            found_audio: false,
            found_video: false,
            search_end: None,
            tracks_ended: false,
            timeline: Timeline::Unknown,
            adjuster: TimestampAdjuster::new(),
            pending_seek_us: None,
            flushed: false,
        }
    }

    /// Reads the first and last SCR and emits the seek map. The input is
    /// restored afterwards.
    fn read_timeline(&mut self, input: &mut dyn ExtractorInput, out: &mut Output<'_>) -> Result<()> {
        let Some(length) = input.length() else {
            out.seek_map(SeekMap::unseekable(None));
            self.timeline = Timeline::Unseekable;
            return Ok(());
        };
        let resume = input.position();
        let window = SCR_SEARCH_BYTES.min(length as usize);
        input.seek_to_position(0)?;
        let head = input.read_to_vec(window)?.unwrap_or_default();
        let first = scrs(&head, 0).first().map(|&(_, scr)| scr);
        let tail_start = length - window as u64;
        input.seek_to_position(tail_start)?;
        let tail = input.read_to_vec(window)?.unwrap_or_default();
        let last = scrs(&tail, tail_start).last().map(|&(_, scr)| scr);
        input.seek_to_position(resume)?;
        self.timeline = match (first, last) {
            (Some(first_scr), Some(last)) if last > first_scr => {
                let duration_us = pts_to_us(last - first_scr);
                tracing::debug!(duration_us, "program stream duration from SCR");
                self.adjuster.set_origin(first_scr);
                out.seek_map(SeekMap::binary_search(duration_us, 0, length));
                Timeline::Bisect { first_scr, duration_us }
            }
            _ => {
                out.seek_map(SeekMap::unseekable(None));
                Timeline::Unseekable
            }
        };
        Ok(())
    }

    fn bisect(&mut self, input: &mut dyn ExtractorInput, target_us: i64) -> Result<()> {
        let (Timeline::Bisect { first_scr, duration_us }, Some(length)) = (self.timeline, input.length()) else {
            return Ok(());
        };
        let position = BinarySearch::new(target_us, duration_us, 0, length, MIN_SEARCH_RANGE)
            .run(input, &mut ScrProbe { first_scr })?;
        tracing::debug!(target_us, position, "SCR bisection settled");
        Ok(())
    }

    /// Moves to the next system start code after `position`. Returns false
    /// when the stream ends first.
    fn resync(&mut self, input: &mut dyn ExtractorInput, position: u64) -> Result<bool> {
        input.seek_to_position(position + 1)?;
        let mut window = vec![0u8; RESYNC_WINDOW];
        let n = input.read_up_to(&mut window)?;
        window.truncate(n);
        let found = window
            .windows(4)
            .position(|w| w[..3] == [0, 0, 1] && w[3] >= FIRST_SYSTEM_ID);
        match found {
            Some(at) => {
                tracing::warn!(position, skipped = at + 1, "lost program stream sync");
                input.seek_to_position(position + 1 + at as u64)?;
                Ok(true)
            }
            // Keep the last three bytes: a start code may straddle the window.
            None if n == RESYNC_WINDOW => {
                input.seek_to_position(position + 1 + (n - 3) as u64)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Reader for `key`, created on first sight while tracks are open.
    fn reader(&mut self, key: StreamKey, position: u64, out: &mut Output<'_>) -> Option<&mut Box<dyn PesReader>> {
        if !self.readers.contains_key(&key) {
            if self.tracks_ended {
                return None;
            }
            let (media_type, codec) = match key {
                0xC0..=0xDF => (MediaType::Audio, Some(AudioCodec::MpegAudio)),
                0xE0..=0xEF => (MediaType::Video, None),
                0xBD80..=0xBD87 => (MediaType::Audio, Some(AudioCodec::Ac3)),
                _ => return None,
            };
            let track = out.track(u64::from(key), media_type);
            let mut reader: Box<dyn PesReader> = match codec {
                Some(codec) => Box::new(AudioReader::new(codec, track, None)),
                None => Box::new(H262Reader::new(track)),
            };
            reader.init(out);
            tracing::debug!(stream = key, ?media_type, "program stream track");
            match media_type {
                MediaType::Video => self.found_video = true,
                _ => self.found_audio = true,
            }
            if self.found_audio && self.found_video && self.search_end.is_none() {
                self.search_end = Some(position + TRACK_SEARCH_AFTER_AUDIO_AND_VIDEO);
            }
            self.readers.insert(key, reader);
        }
        self.readers.get_mut(&key)
    }

    fn handle_pes(&mut self, stream_id: u8, packet: &[u8], position: u64, out: &mut Output<'_>) -> Result<()> {
        let body = &packet[6..];
        let pes = if body.first().is_some_and(|b| b & 0xC0 == 0x80) {
            parse_pes(packet)
        } else {
            parse_mpeg1_pes(stream_id, body)
        };
        let Some(pes) = pes else {
            tracing::warn!(position, stream_id, "malformed PES packet dropped");
            return Ok(());
        };
        let (key, payload) = if stream_id == PRIVATE_STREAM_1 {
            // DVD audio substreams: id, frame count, first access unit pointer.
            match pes.payload.first() {
                Some(&sub) if pes.payload.len() >= 4 => ((u16::from(PRIVATE_STREAM_1) << 8) | u16::from(sub), &pes.payload[4..]),
                _ => return Ok(()),
            }
        } else {
            (u16::from(stream_id), &pes.payload[..])
        };
        let time_us = pes.pts.map(|pts| self.adjuster.adjust(pts));
        if let Some(reader) = self.reader(key, position, out) {
            reader.consume(time_us, payload, out)?;
        }
        Ok(())
    }

    fn maybe_end_tracks(&mut self, position: u64, out: &mut Output<'_>) {
        if self.tracks_ended {
            return;
        }
        if position > MAX_TRACK_SEARCH || self.search_end.is_some_and(|end| position >= end) {
            self.tracks_ended = true;
            out.end_tracks();
        }
    }

    fn flush(&mut self, out: &mut Output<'_>) -> Result<Progress> {
        if !self.flushed {
            self.flushed = true;
            self.tracks_ended = true;
            out.end_tracks();
        }
        Ok(Progress::EndOfInput)
    }
}

/// Reads `len` bytes, `None` when the stream ends first.
fn read_bytes(input: &mut dyn ExtractorInput, len: usize) -> Result<Option<Vec<u8>>> {
    let mut buf = vec![0u8; len];
    let n = input.read_up_to(&mut buf)?;
    Ok((n == len).then_some(buf))
}

impl Extract for PsExtractor {
    fn read(&mut self, input: &mut dyn ExtractorInput, out: &mut Output<'_>) -> Result<Progress> {
        if let Some(target_us) = self.pending_seek_us.take() {
            self.bisect(input, target_us)?;
            return Ok(Progress::Continue);
        }
        if self.timeline == Timeline::Unknown {
            self.read_timeline(input, out)?;
            return Ok(Progress::Continue);
        }
        if self.flushed {
            return Ok(Progress::EndOfInput);
        }
        let position = input.position();
        let Some(start) = read_bytes(input, 4)? else {
            return self.flush(out);
        };
        if start[..3] != [0, 0, 1] || start[3] < FIRST_SYSTEM_ID {
            return if self.resync(input, position)? {
                Ok(Progress::Continue)
            } else {
                self.flush(out)
            };
        }
        match start[3] {
            PROGRAM_END => {}
            PACK_START => {
                let Some(fixed) = read_bytes(input, 10)? else {
                    return self.flush(out);
                };
                let mut header = start.to_vec();
                header.extend_from_slice(&fixed);
                match pack_header_len(&header) {
                    Some(len) if len >= header.len() => {
                        if !input.skip_fully((len - header.len()) as u64)? {
                            return self.flush(out);
                        }
                    }
                    // MPEG-1 packs are shorter than what was read.
                    Some(len) => input.seek_to_position(position + len as u64)?,
                    None => {
                        return if self.resync(input, position)? {
                            Ok(Progress::Continue)
                        } else {
                            self.flush(out)
                        };
                    }
                }
            }
            stream_id => {
                let Some(len_bytes) = read_bytes(input, 2)? else {
                    return self.flush(out);
                };
                let len = usize::from(be_u16(&len_bytes, 0));
                let is_elementary = stream_id == PRIVATE_STREAM_1 || (0xC0..=0xEF).contains(&stream_id);
                if stream_id == SYSTEM_HEADER || !is_elementary {
                    if !input.skip_fully(len as u64)? {
                        return self.flush(out);
                    }
                } else {
                    let Some(body) = read_bytes(input, len)? else {
                        return self.flush(out);
                    };
                    let mut packet = start.to_vec();
                    packet.extend_from_slice(&len_bytes);
                    packet.extend_from_slice(&body);
                    self.handle_pes(stream_id, &packet, position, out)?;
                }
            }
        }
        self.maybe_end_tracks(input.position(), out);
        Ok(Progress::Continue)
    }

    fn seek(&mut self, _position: u64, time_us: i64) {
        for reader in self.readers.values_mut() {
            reader.seek();
        }
        self.adjuster.reset_wrap();
        self.flushed = false;
        self.pending_seek_us = match self.timeline {
            Timeline::Bisect { .. } if time_us > 0 => Some(time_us),
            _ => None,
        };
    }
}

/// Timestamp probe over pack header SCRs.
struct ScrProbe {
    first_scr: i64,
}

impl TimestampProbe for ScrProbe {
    fn search(&mut self, input: &mut dyn ExtractorInput, target_time_us: i64) -> Result<TimestampSearch> {
        let start = input.position();
        let mut window = vec![0u8; SCR_SEARCH_BYTES];
        let n = input.read_up_to(&mut window)?;
        window.truncate(n);
        let mut floor: Option<(u64, i64)> = None;
        for (position, scr) in scrs(&window, start) {
            let time_us = pts_to_us(scr - self.first_scr);
            if time_us > target_time_us {
                return Ok(match floor {
                    Some((position, _)) => TimestampSearch::Found { position },
                    None => TimestampSearch::Overestimated { time_us, position },
                });
            }
            floor = Some((position, time_us));
        }
        Ok(match floor {
            Some((position, time_us)) => TimestampSearch::Underestimated {
                time_us,
                position: position + 4,
            },
            None => TimestampSearch::NoTimestamp,
        })
    }
}
