//! MPEG-2 transport streams.
//!
//! Packets are demultiplexed by PID: the PAT names the PMT PIDs, each PMT
//! names elementary streams, and elementary streams are reassembled into
//! PES packets (or PSI sections for splice information) and handed to a
//! reader per track.

pub(crate) mod pes;
mod psi;
pub(crate) mod readers;

use std::collections::{BTreeMap, HashMap, HashSet};

use self::pes::PesAssembler;
use self::psi::{parse_pat, parse_pmt, stream_type, EsInfo, SectionAssembler};
use self::readers::{AudioCodec, AudioReader, H262Reader, Id3Reader, NalCodec, NalReader, PesReader, SpliceInfoReader};
use crate::error::Result;
use crate::extractor::{Extract, Progress};
use crate::input::{ExtractorInput, InputExt, Prefix};
use crate::output::Output;
use crate::params::{Parameters, TsMode, TsOptions};
use crate::seek::{BinarySearch, SeekMap, TimestampProbe, TimestampSearch};
use crate::track::MediaType;
use crate::util::timestamp::{pts_to_us, TimestampAdjuster};

pub(crate) const PACKET_SIZE: usize = 188;
const SYNC_BYTE: u8 = 0x47;
const SNIFF_PACKETS: usize = 5;
const PAT_PID: u16 = 0x0000;
/// Smallest byte range the PCR bisection keeps narrowing.
const MIN_SEARCH_RANGE: u64 = 5 * PACKET_SIZE as u64;
/// Bytes scanned for the next sync byte before giving up on a region.
const RESYNC_WINDOW: usize = 64 * PACKET_SIZE;
const PCR_WRAP: i64 = 1 << 33;

/// Accepts five packets spaced 188 bytes apart, starting within the first
/// packet length.
pub(crate) fn sniff(prefix: &Prefix) -> bool {
    let data = prefix.bytes();
    let wanted = if prefix.is_complete() {
        (data.len() / PACKET_SIZE).clamp(2, SNIFF_PACKETS)
    } else {
        SNIFF_PACKETS
    };
    (0..PACKET_SIZE).any(|start| {
        (0..wanted).all(|k| data.get(start + k * PACKET_SIZE) == Some(&SYNC_BYTE))
    })
}

/// Offset of the first packet boundary in `data`: a sync byte followed by
/// another one a packet later, or by the end of the data.
fn sync_offset(data: &[u8]) -> Option<usize> {
    (0..data.len()).find(|&at| {
        data[at] == SYNC_BYTE && data.get(at + PACKET_SIZE).map_or(true, |&next| next == SYNC_BYTE)
    })
}

/// Fixed header fields of one transport packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PacketHeader {
    transport_error: bool,
    unit_start: bool,
    pid: u16,
    has_payload: bool,
    continuity: u8,
    discontinuity: bool,
    pcr: Option<i64>,
    payload_start: usize,
}

fn parse_packet_header(packet: &[u8]) -> Option<PacketHeader> {
    if packet.len() < PACKET_SIZE || packet[0] != SYNC_BYTE {
        return None;
    }
    let control = (packet[3] >> 4) & 0x03;
    let mut header = PacketHeader {
        transport_error: packet[1] & 0x80 != 0,
        unit_start: packet[1] & 0x40 != 0,
        pid: (u16::from(packet[1] & 0x1F) << 8) | u16::from(packet[2]),
        has_payload: control & 0x01 != 0,
        continuity: packet[3] & 0x0F,
        discontinuity: false,
        pcr: None,
        payload_start: 4,
    };
    if control & 0x02 != 0 {
        let len = usize::from(packet[4]);
        header.payload_start = 5 + len;
        if header.payload_start > PACKET_SIZE {
            return None;
        }
        if len > 0 {
            let flags = packet[5];
            header.discontinuity = flags & 0x80 != 0;
            if flags & 0x10 != 0 && len >= 7 {
                let b = &packet[6..11];
                header.pcr = Some(
                    (i64::from(b[0]) << 25)
                        | (i64::from(b[1]) << 17)
                        | (i64::from(b[2]) << 9)
                        | (i64::from(b[3]) << 1)
                        | i64::from(b[4] >> 7),
                );
            }
        }
    }
    Some(header)
}

/// `(packet position, PCR)` of every packet on `pcr_pid` in `data`, which
/// starts at absolute `position`.
fn pcrs(data: &[u8], position: u64, pcr_pid: u16) -> Vec<(u64, i64)> {
    let mut found = Vec::new();
    let mut at = 0;
    while let Some(skip) = data.get(at..).and_then(sync_offset) {
        at += skip;
        let Some(packet) = data.get(at..at + PACKET_SIZE) else {
            break;
        };
        if let Some(PacketHeader { pid, pcr: Some(pcr), .. }) = parse_packet_header(packet) {
            if pid == pcr_pid {
                found.push((position + at as u64, pcr));
            }
        }
        at += PACKET_SIZE;
    }
    found
}

/// Microseconds from `origin` to `pcr`, across at most one wrap.
fn pcr_offset_us(origin: i64, pcr: i64) -> i64 {
    let mut delta = pcr - origin;
    if delta < -PCR_WRAP / 2 {
        delta += PCR_WRAP;
    }
    pts_to_us(delta)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReaderKind {
    H262,
    Nal(NalCodec),
    Audio(AudioCodec),
    Id3,
    SpliceInfo,
}

enum PidHandler {
    Pat(SectionAssembler),
    Pmt(SectionAssembler),
    Pes {
        assembler: PesAssembler,
        reader: Box<dyn PesReader>,
    },
    SpliceInfo {
        sections: SectionAssembler,
        reader: SpliceInfoReader,
    },
}

impl PidHandler {
    fn reset(&mut self) {
        match self {
            Self::Pat(sections) | Self::Pmt(sections) => sections.reset(),
            Self::Pes { assembler, reader } => {
                assembler.reset();
                reader.seek();
            }
            Self::SpliceInfo { sections, .. } => sections.reset(),
        }
    }
}

/// Where the session stands with its seek map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Timeline {
    /// Waiting for the PCR PID of the first program.
    Unknown,
    /// Seekable by PCR bisection from this first PCR.
    Bisect { first_pcr: i64, duration_us: i64 },
    Unseekable,
}

pub(crate) struct TsExtractor {
    options: TsOptions,
    pids: BTreeMap<u16, PidHandler>,
    continuity: HashMap<u16, u8>,
    programs_seen: HashSet<u16>,
    /// PMTs still expected before the track set is complete.
    programs_pending: Option<usize>,
    pcr_pid: Option<u16>,
    timeline: Timeline,
    adjuster: TimestampAdjuster,
    pending_seek_us: Option<i64>,
    flushed: bool,
}

impl TsExtractor {
    pub fn new(params: &Parameters) -> Self {
        let mut pids = BTreeMap::new();
        pids.insert(PAT_PID, PidHandler::Pat(SectionAssembler::default()));
        Self {
            options: params.ts,
            pids,
            continuity: HashMap::new(),
            programs_seen: HashSet::new(),
            programs_pending: None,
            pcr_pid: None,
            timeline: Timeline::Unknown,
            adjuster: TimestampAdjuster::new(),
            pending_seek_us: None,
            flushed: false,
        }
    }

    fn handle_pat(&mut self, section: &[u8]) {
        let Some(programs) = parse_pat(section) else {
            return;
        };
        if self.programs_pending.is_some() {
            return;
        }
        let programs: Vec<(u16, u16)> = match self.options.mode {
            TsMode::MultiPmt => programs,
            TsMode::SinglePmt | TsMode::Hls => programs.into_iter().take(1).collect(),
        };
        tracing::debug!(programs = programs.len(), "program association table");
        self.programs_pending = Some(programs.len());
        for (_, pmt_pid) in programs {
            self.pids
                .entry(pmt_pid)
                .or_insert_with(|| PidHandler::Pmt(SectionAssembler::default()));
        }
    }

    fn handle_pmt(&mut self, section: &[u8], out: &mut Output<'_>) {
        let Some(pmt) = parse_pmt(section) else {
            return;
        };
        if !self.programs_seen.insert(pmt.program_number) {
            return;
        }
        tracing::debug!(program = pmt.program_number, streams = pmt.streams.len(), pcr_pid = pmt.pcr_pid, "program map table");
        self.pcr_pid.get_or_insert(pmt.pcr_pid);
        for es in &pmt.streams {
            if self.pids.contains_key(&es.pid) {
                continue;
            }
            if let Some(handler) = self.handler_for(es, out) {
                self.pids.insert(es.pid, handler);
            } else {
                tracing::debug!(pid = es.pid, stream_type = es.stream_type, "elementary stream ignored");
            }
        }
        if let Some(pending) = &mut self.programs_pending {
            *pending = pending.saturating_sub(1);
            if *pending == 0 {
                out.end_tracks();
            }
        }
    }

    fn reader_kind(&self, es: &EsInfo) -> Option<ReaderKind> {
        let options = &self.options;
        Some(match es.refined_type {
            stream_type::MPEG1_VIDEO | stream_type::MPEG2_VIDEO => ReaderKind::H262,
            stream_type::H264 if !options.ignore_avc_stream => ReaderKind::Nal(NalCodec::Avc),
            stream_type::H265 => ReaderKind::Nal(NalCodec::Hevc),
            stream_type::MPEG1_AUDIO | stream_type::MPEG2_AUDIO => ReaderKind::Audio(AudioCodec::MpegAudio),
            stream_type::AAC_ADTS if !options.ignore_aac_stream => ReaderKind::Audio(AudioCodec::Adts),
            stream_type::AC3 | stream_type::E_AC3 => ReaderKind::Audio(AudioCodec::Ac3),
            stream_type::AC4 => ReaderKind::Audio(AudioCodec::Ac4),
            stream_type::DTS => ReaderKind::Audio(AudioCodec::Dts),
            stream_type::HDMV_DTS if options.enable_hdmv_dts_audio_streams => ReaderKind::Audio(AudioCodec::Dts),
            stream_type::ID3 => ReaderKind::Id3,
            stream_type::SPLICE_INFO if !options.ignore_splice_info_stream => ReaderKind::SpliceInfo,
            _ => return None,
        })
    }

    /// Registers the track of `es` and builds its handler.
    fn handler_for(&self, es: &EsInfo, out: &mut Output<'_>) -> Option<PidHandler> {
        let kind = self.reader_kind(es)?;
        let media_type = match kind {
            ReaderKind::H262 | ReaderKind::Nal(_) => MediaType::Video,
            ReaderKind::Audio(_) => MediaType::Audio,
            ReaderKind::Id3 | ReaderKind::SpliceInfo => MediaType::Metadata,
        };
        let track = out.track(u64::from(es.pid), media_type);
        let options = &self.options;
        let mut reader: Box<dyn PesReader> = match kind {
            ReaderKind::H262 => Box::new(H262Reader::new(track)),
            ReaderKind::Nal(codec) => Box::new(NalReader::new(
                codec,
                track,
                codec == NalCodec::Avc && options.allow_non_idr_avc_keyframes,
                options.detect_access_units,
            )),
            ReaderKind::Audio(codec) => Box::new(AudioReader::new(codec, track, es.language.clone())),
            ReaderKind::Id3 => Box::new(Id3Reader::new(track)),
            ReaderKind::SpliceInfo => {
                let reader = SpliceInfoReader::new(track);
                reader.init(out);
                return Some(PidHandler::SpliceInfo {
                    sections: SectionAssembler::default(),
                    reader,
                });
            }
        };
        reader.init(out);
        Some(PidHandler::Pes {
            assembler: PesAssembler::default(),
            reader,
        })
    }

    /// Scans both ends of the stream for PCRs on the PCR PID and emits the
    /// seek map. The input is restored afterwards.
    fn read_timeline(&mut self, input: &mut dyn ExtractorInput, out: &mut Output<'_>) -> Result<()> {
        let (Some(pcr_pid), Some(length)) = (self.pcr_pid, input.length()) else {
            return Ok(());
        };
        let resume = input.position();
        let window = self.options.timestamp_search_bytes.min(length as usize);
        input.seek_to_position(0)?;
        let head = input.read_to_vec(window)?.unwrap_or_default();
        let first = pcrs(&head, 0, pcr_pid).first().map(|&(_, pcr)| pcr);
        let tail_start = length - window as u64;
        input.seek_to_position(tail_start)?;
        let tail = input.read_to_vec(window)?.unwrap_or_default();
        let last = pcrs(&tail, tail_start, pcr_pid).last().map(|&(_, pcr)| pcr);
        input.seek_to_position(resume)?;
        self.timeline = match (first, last) {
            (Some(first_pcr), Some(last)) if pcr_offset_us(first_pcr, last) > 0 => {
                let duration_us = pcr_offset_us(first_pcr, last);
                self.adjuster.set_origin(first_pcr);
                out.seek_map(SeekMap::binary_search(duration_us, 0, length));
                Timeline::Bisect { first_pcr, duration_us }
            }
            _ => {
                out.seek_map(SeekMap::unseekable(None));
                Timeline::Unseekable
            }
        };
        Ok(())
    }

    fn bisect(&mut self, input: &mut dyn ExtractorInput, target_us: i64) -> Result<()> {
        let (Timeline::Bisect { first_pcr, duration_us }, Some(pcr_pid), Some(length)) =
            (self.timeline, self.pcr_pid, input.length())
        else {
            return Ok(());
        };
        let mut probe = PcrProbe {
            pcr_pid,
            first_pcr,
            window: self.options.timestamp_search_bytes,
        };
        let position = BinarySearch::new(target_us, duration_us, 0, length, MIN_SEARCH_RANGE).run(input, &mut probe)?;
        tracing::debug!(target_us, position, "PCR bisection settled");
        Ok(())
    }

    /// Skips to the next packet boundary after a lost sync byte. Returns
    /// false when the stream ends first.
    fn resync(&mut self, input: &mut dyn ExtractorInput, position: u64) -> Result<bool> {
        input.seek_to_position(position + 1)?;
        let mut window = vec![0u8; RESYNC_WINDOW];
        let n = input.read_up_to(&mut window)?;
        window.truncate(n);
        match sync_offset(&window) {
            Some(at) => {
                let skipped = at + 1;
                tracing::warn!(position, skipped, "lost TS packet sync");
                input.seek_to_position(position + skipped as u64)?;
                Ok(true)
            }
            None if n < RESYNC_WINDOW => Ok(false),
            None => {
                tracing::warn!(position, skipped = n + 1, "no TS sync byte found");
                Ok(true)
            }
        }
    }

    fn handle_packet(&mut self, packet: &[u8], out: &mut Output<'_>) -> Result<()> {
        let Some(header) = parse_packet_header(packet) else {
            return Ok(());
        };
        if header.transport_error {
            tracing::warn!(pid = header.pid, "dropped TS packet with transport error");
            return Ok(());
        }
        if !header.has_payload || !self.pids.contains_key(&header.pid) {
            return Ok(());
        }
        if let Some(previous) = self.continuity.insert(header.pid, header.continuity) {
            if previous == header.continuity && !header.discontinuity {
                // Duplicate packet.
                return Ok(());
            }
            if (previous + 1) & 0x0F != header.continuity && !header.discontinuity {
                tracing::warn!(pid = header.pid, previous, current = header.continuity, "TS continuity error");
                if let Some(handler) = self.pids.get_mut(&header.pid) {
                    handler.reset();
                }
            }
        }
        let payload = &packet[header.payload_start..];
        let Some(handler) = self.pids.get_mut(&header.pid) else {
            return Ok(());
        };
        match handler {
            PidHandler::Pat(sections) => {
                for section in sections.push(payload, header.unit_start) {
                    self.handle_pat(&section);
                }
            }
            PidHandler::Pmt(sections) => {
                for section in sections.push(payload, header.unit_start) {
                    self.handle_pmt(&section, out);
                }
            }
            PidHandler::Pes { assembler, reader } => {
                for pes in assembler.push(payload, header.unit_start) {
                    let time_us = pes.pts.map(|pts| self.adjuster.adjust(pts));
                    reader.consume(time_us, &pes.payload, out)?;
                }
            }
            PidHandler::SpliceInfo { sections, reader } => {
                for section in sections.push(payload, header.unit_start) {
                    reader.consume(self.adjuster.last_time_us(), &section, out)?;
                }
            }
        }
        Ok(())
    }

    /// Completes buffered PES packets at the end of the stream.
    fn flush(&mut self, out: &mut Output<'_>) -> Result<Progress> {
        if !self.flushed {
            self.flushed = true;
            for handler in self.pids.values_mut() {
                if let PidHandler::Pes { assembler, reader } = handler {
                    if let Some(pes) = assembler.flush() {
                        let time_us = pes.pts.map(|pts| self.adjuster.adjust(pts));
                        reader.consume(time_us, &pes.payload, out)?;
                    }
                }
            }
            if !out.has_seek_map() {
                out.seek_map(SeekMap::unseekable(None));
            }
            out.end_tracks();
        }
        Ok(Progress::EndOfInput)
    }
}

impl Extract for TsExtractor {
    fn read(&mut self, input: &mut dyn ExtractorInput, out: &mut Output<'_>) -> Result<Progress> {
        if let Some(target_us) = self.pending_seek_us.take() {
            self.bisect(input, target_us)?;
            return Ok(Progress::Continue);
        }
        if self.timeline == Timeline::Unknown {
            if self.options.mode == TsMode::Hls || input.length().is_none() {
                self.timeline = Timeline::Unseekable;
                out.seek_map(SeekMap::unseekable(None));
            } else if self.pcr_pid.is_some() {
                self.read_timeline(input, out)?;
                return Ok(Progress::Continue);
            }
        }
        if self.flushed {
            return Ok(Progress::EndOfInput);
        }
        let position = input.position();
        let mut packet = [0u8; PACKET_SIZE];
        let n = input.read_up_to(&mut packet)?;
        if n < PACKET_SIZE {
            return self.flush(out);
        }
        if packet[0] != SYNC_BYTE {
            if self.resync(input, position)? {
                return Ok(Progress::Continue);
            }
            return self.flush(out);
        }
        self.handle_packet(&packet, out)?;
        Ok(Progress::Continue)
    }

    fn seek(&mut self, _position: u64, time_us: i64) {
        for handler in self.pids.values_mut() {
            handler.reset();
        }
        self.continuity.clear();
        self.adjuster.reset_wrap();
        self.flushed = false;
        self.pending_seek_us = match self.timeline {
            Timeline::Bisect { .. } if time_us > 0 => Some(time_us),
            _ => None,
        };
    }
}

/// Timestamp probe over PCRs of the PCR PID.
struct PcrProbe {
    pcr_pid: u16,
    first_pcr: i64,
    window: usize,
}

impl TimestampProbe for PcrProbe {
    fn search(&mut self, input: &mut dyn ExtractorInput, target_time_us: i64) -> Result<TimestampSearch> {
        let start = input.position();
        let mut window = vec![0u8; self.window];
        let n = input.read_up_to(&mut window)?;
        window.truncate(n);
        let mut floor: Option<(u64, i64)> = None;
        for (position, pcr) in pcrs(&window, start, self.pcr_pid) {
            let time_us = pcr_offset_us(self.first_pcr, pcr);
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
                position: position + PACKET_SIZE as u64,
            },
            None => TimestampSearch::NoTimestamp,
        })
    }
}
