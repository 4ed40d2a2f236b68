//! Matroska and WebM.
//!
//! The segment is walked element by element without tracking master
//! element ends, so unknown-size segments and clusters need no special
//! handling. Metadata masters (SeekHead, Info, Tracks, Cues) and block
//! groups are read whole.

mod ebml;
mod tracks;

use bytes::Bytes;

use self::ebml::{children, find, float, id, read_element, string, uint, vint, ElementHeader};
use self::tracks::{parse_tracks, MkvTrack};
use crate::error::{Error, Result};
use crate::extractor::{Extract, Progress};
use crate::input::{ExtractorInput, InputExt, Prefix};
use crate::output::{Output, TrackId};
use crate::params::Parameters;
use crate::sample::{CryptoInfo, CryptoMode, SampleFlags, Subsample};
use crate::seek::{scale, IndexSeekMap, SeekMap};
use crate::track::{DrmInitData, MediaType, SchemeData};
use crate::util::cursor::ByteCursor;

const SNIFF_SEARCH_LEN: usize = 1024;
const DEFAULT_TIMECODE_SCALE: u64 = 1_000_000;
/// Largest element read into memory whole.
const MAX_ELEMENT_SIZE: u64 = 32 * 1024 * 1024;
/// Bytes scanned per step while looking for a Cluster after a seek.
const RESYNC_WINDOW: usize = 64 * 1024;

/// Accepts an EBML header within the first kilobyte whose DocType, when
/// present, is `matroska` or `webm`.
pub(crate) fn sniff(prefix: &Prefix) -> bool {
    let data = prefix.bytes();
    let magic = id::EBML.to_be_bytes();
    let window = &data[..data.len().min(SNIFF_SEARCH_LEN + 4)];
    let Some(at) = window.windows(4).position(|w| w == magic) else {
        return false;
    };
    let mut c = ByteCursor::new(&data[at + 4..]);
    let Ok((size, _)) = vint(&mut c, true) else {
        return false;
    };
    let body = c.rest();
    let body = &body[..body.len().min(size as usize)];
    match children(body).find(|e| e.id == id::DOC_TYPE) {
        Some(doc_type) => matches!(string(doc_type.body).as_str(), "matroska" | "webm"),
        None => size > 0 && !body.is_empty(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Expecting the EBML header.
    Header,
    /// Walking segment children.
    Elements,
    /// After a seek: scanning forward to the next Cluster.
    FindingCluster,
}

#[derive(Debug)]
struct ActiveTrack {
    id: TrackId,
    track: MkvTrack,
}

pub(crate) struct MatroskaExtractor {
    disable_cues: bool,
    include_supplemental: bool,
    state: State,
    segment_start: Option<u64>,
    timecode_scale: u64,
    duration_us: Option<i64>,
    cues_position: Option<u64>,
    /// Where to resume after jumping ahead to read the Cues.
    resume_position: Option<u64>,
    tracks: Vec<ActiveTrack>,
    cluster_timecode: Option<u64>,
    /// Frames before this time are dropped after a seek.
    seek_target_us: Option<i64>,
}

impl MatroskaExtractor {
    pub fn new(params: &Parameters) -> Self {
        Self {
            disable_cues: params.matroska_disable_cues_seeking,
            include_supplemental: params.include_supplemental_data,
            state: State::Header,
            segment_start: None,
            timecode_scale: DEFAULT_TIMECODE_SCALE,
            duration_us: None,
            cues_position: None,
            resume_position: None,
            tracks: Vec::new(),
            cluster_timecode: None,
            seek_target_us: None,
        }
    }

    fn ticks_to_us(&self, ticks: i64) -> i64 {
        scale(ticks, self.timecode_scale as i64, 1_000)
    }

    fn read_header(&mut self, input: &mut dyn ExtractorInput) -> Result<Progress> {
        let header = read_element(input)?.ok_or_else(|| Error::parsing("empty input"))?;
        if header.id != id::EBML {
            return Err(Error::parsing(format!("expected EBML header, found element {:#x}", header.id)));
        }
        let body = read_body(input, &header)?;
        if let Some(doc_type) = find(&body, id::DOC_TYPE) {
            let doc_type = string(doc_type);
            if doc_type != "matroska" && doc_type != "webm" {
                return Err(Error::parsing(format!("unsupported DocType {doc_type:?}")));
            }
        }
        self.state = State::Elements;
        Ok(Progress::Continue)
    }

    fn read_element(&mut self, input: &mut dyn ExtractorInput, out: &mut Output<'_>) -> Result<Progress> {
        let Some(header) = read_element(input)? else {
            return self.finish(out);
        };
        if let Some(resume) = self.resume_position {
            if header.id != id::CUES {
                tracing::warn!(position = header.start, "SeekHead does not point at Cues");
                self.resume_position = None;
                out.seek_map(SeekMap::unseekable(self.duration_us));
                input.seek_to_position(resume)?;
                return Ok(Progress::Continue);
            }
        }
        match header.id {
            id::SEGMENT => {
                if self.segment_start.is_some() {
                    tracing::warn!("ignoring a second segment");
                    return Ok(Progress::EndOfInput);
                }
                self.segment_start = Some(header.body_start());
            }
            id::CLUSTER => {
                if !out.tracks_ended() {
                    return Err(Error::parsing("Cluster before Tracks"));
                }
                if !out.has_seek_map() && self.jump_to_cues(input, &header)? {
                    return Ok(Progress::Continue);
                }
                if !out.has_seek_map() {
                    out.seek_map(SeekMap::unseekable(self.duration_us));
                }
                self.cluster_timecode = None;
            }
            id::SEEK_HEAD => {
                let body = read_body(input, &header)?;
                self.parse_seek_head(&body)?;
            }
            id::INFO => {
                let body = read_body(input, &header)?;
                self.parse_info(&body)?;
            }
            id::TRACKS => {
                let body = read_body(input, &header)?;
                if out.tracks_ended() {
                    return Ok(Progress::Continue);
                }
                self.start_tracks(parse_tracks(&body)?, out);
            }
            id::CUES => {
                let body = read_body(input, &header)?;
                if !out.has_seek_map() && !self.disable_cues {
                    out.seek_map(self.parse_cues(&body)?);
                }
                if let Some(resume) = self.resume_position.take() {
                    input.seek_to_position(resume)?;
                }
            }
            id::TIMECODE => {
                let body = read_body(input, &header)?;
                self.cluster_timecode = Some(uint(&body)?);
            }
            id::SIMPLE_BLOCK => {
                let body = read_body(input, &header)?;
                if self.emit_block(&body, None, None, out)? {
                    self.seek_target_us = None;
                }
            }
            id::BLOCK_GROUP => {
                let body = read_body(input, &header)?;
                let block = find(&body, id::BLOCK).ok_or_else(|| Error::parsing("BlockGroup without Block"))?;
                let key = find(&body, id::REFERENCE_BLOCK).is_none();
                let additional = find(&body, id::BLOCK_ADDITIONS)
                    .and_then(|adds| find(adds, id::BLOCK_MORE))
                    .filter(|more| find(more, id::BLOCK_ADD_ID).map_or(Ok(1), uint).is_ok_and(|id| id == 1))
                    .and_then(|more| find(more, id::BLOCK_ADDITIONAL));
                if self.emit_block(block, Some(key), additional, out)? {
                    self.seek_target_us = None;
                }
            }
            _ => {
                let Some(len) = header.size else {
                    return Err(Error::parsing(format!("element {:#x} of unknown size", header.id)));
                };
                if !input.skip_fully(len)? {
                    return self.finish(out);
                }
            }
        }
        Ok(Progress::Continue)
    }

    fn finish(&mut self, out: &mut Output<'_>) -> Result<Progress> {
        if !out.tracks_ended() {
            return Err(Error::parsing("stream ended before Tracks"));
        }
        if !out.has_seek_map() {
            out.seek_map(SeekMap::unseekable(self.duration_us));
        }
        Ok(Progress::EndOfInput)
    }

    /// Moves the input to the next Cluster ID at or after its position.
    fn find_cluster(&mut self, input: &mut dyn ExtractorInput) -> Result<Progress> {
        let start = input.position();
        let magic = id::CLUSTER.to_be_bytes();
        let mut window = vec![0u8; RESYNC_WINDOW];
        let n = input.read_up_to(&mut window)?;
        if n < magic.len() {
            return Ok(Progress::EndOfInput);
        }
        match window[..n].windows(magic.len()).position(|w| w == magic) {
            Some(at) => {
                if at > 0 {
                    tracing::debug!(start, skipped = at, "resynchronised to a cluster");
                }
                input.seek_to_position(start + at as u64)?;
                self.state = State::Elements;
            }
            None => input.seek_to_position(start + (n - magic.len() + 1) as u64)?,
        }
        Ok(Progress::Continue)
    }

    /// Jumps to Cues located after the first cluster. Returns whether the
    /// input was repositioned.
    fn jump_to_cues(&mut self, input: &mut dyn ExtractorInput, cluster: &ElementHeader) -> Result<bool> {
        if self.disable_cues || input.length().is_none() {
            return Ok(false);
        }
        let Some(cues) = self.cues_position.filter(|&p| p > cluster.start) else {
            return Ok(false);
        };
        if input.length().is_some_and(|len| cues >= len) {
            return Ok(false);
        }
        tracing::debug!(cues, "reading Cues ahead of the first cluster");
        input.seek_to_position(cues)?;
        self.resume_position = Some(cluster.start);
        Ok(true)
    }

    fn parse_seek_head(&mut self, body: &[u8]) -> Result<()> {
        let Some(segment_start) = self.segment_start else {
            return Ok(());
        };
        for seek in children(body).filter(|c| c.id == id::SEEK) {
            let target = find(seek.body, id::SEEK_ID).map(uint).transpose()?;
            let position = find(seek.body, id::SEEK_POSITION).map(uint).transpose()?;
            if let (Some(target), Some(position)) = (target, position) {
                if target == u64::from(id::CUES) {
                    self.cues_position = Some(segment_start + position);
                }
            }
        }
        Ok(())
    }

    fn parse_info(&mut self, body: &[u8]) -> Result<()> {
        if let Some(scale) = find(body, id::TIMECODE_SCALE) {
            self.timecode_scale = uint(scale)?.max(1);
        }
        if let Some(duration) = find(body, id::DURATION) {
            let ticks = float(duration)?;
            if ticks > 0.0 {
                self.duration_us = Some((ticks * self.timecode_scale as f64 / 1_000.0) as i64);
            }
        }
        Ok(())
    }

    fn start_tracks(&mut self, tracks: Vec<MkvTrack>, out: &mut Output<'_>) {
        for track in tracks {
            let id = out.track(track.number, track.media_type);
            let drm = track.key_id.as_ref().map(|key_id| DrmInitData {
                scheme_type: Some("cenc".to_string()),
                scheme_datas: vec![SchemeData {
                    uuid: [0; 16],
                    mime_type: "video/webm".to_string(),
                    data: Bytes::copy_from_slice(key_id),
                }],
            });
            out.format_with_drm(id, track.format.clone(), drm);
            self.tracks.push(ActiveTrack { id, track });
        }
        out.end_tracks();
    }

    fn parse_cues(&self, body: &[u8]) -> Result<SeekMap> {
        let Some(segment_start) = self.segment_start else {
            return Ok(SeekMap::unseekable(self.duration_us));
        };
        let mut points = Vec::new();
        for point in children(body).filter(|c| c.id == id::CUE_POINT) {
            let Some(time) = find(point.body, id::CUE_TIME).map(uint).transpose()? else {
                continue;
            };
            let position = find(point.body, id::CUE_TRACK_POSITIONS)
                .and_then(|positions| find(positions, id::CUE_CLUSTER_POSITION))
                .map(uint)
                .transpose()?;
            if let Some(position) = position {
                points.push((self.ticks_to_us(time as i64), segment_start + position));
            }
        }
        points.sort_unstable();
        let mut index = IndexSeekMap::new(self.duration_us);
        for (time_us, position) in points {
            index.push(time_us, position);
        }
        if index.is_empty() {
            tracing::warn!("Cues without usable points");
            return Ok(SeekMap::unseekable(self.duration_us));
        }
        Ok(SeekMap::index(index))
    }

    /// Emits every frame of a Block or SimpleBlock. `key` is the BlockGroup
    /// verdict; SimpleBlocks pass `None` and use their own flag.
    ///
    /// Returns whether a frame reached the pending seek target.
    fn emit_block(
        &self,
        block: &[u8],
        key: Option<bool>,
        additional: Option<&[u8]>,
        out: &mut Output<'_>,
    ) -> Result<bool> {
        let cluster_timecode = self
            .cluster_timecode
            .ok_or_else(|| Error::parsing("block before the cluster timecode"))?;
        let mut c = ByteCursor::new(block);
        let (number, _) = vint(&mut c, true)?;
        let relative = i64::from(c.read_i16()?);
        let flags = c.read_u8()?;
        let Some(active) = self.tracks.iter().find(|t| t.track.number == number) else {
            tracing::trace!(number, "block for an unknown track");
            return Ok(false);
        };
        let frames = split_lacing(&mut c, (flags >> 1) & 0x03)?;
        let simple_key = flags & 0x80 != 0;
        let is_key = key.unwrap_or(simple_key) || active.track.media_type != MediaType::Video;
        let base_us = self.ticks_to_us(cluster_timecode as i64 + relative);
        let frame_us = active.track.default_duration_ns.map_or(0, |ns| ns as i64 / 1_000);
        let mut reached = false;
        for (i, frame) in frames.into_iter().enumerate() {
            let time_us = base_us + i as i64 * frame_us;
            if self.seek_target_us.is_some_and(|target| time_us < target) {
                continue;
            }
            reached = true;
            let mut flags = SampleFlags::key_frame_if(is_key);
            let (payload, crypto) = if active.track.is_encrypted() {
                decrypt_header(frame, active.track.key_id.as_deref())?
            } else {
                (frame, None)
            };
            match additional.filter(|_| self.include_supplemental && crypto.is_none()) {
                Some(extra) => {
                    flags.insert(SampleFlags::HAS_SUPPLEMENTAL_DATA);
                    let mut data = Vec::with_capacity(payload.len() + extra.len() + 4);
                    data.extend_from_slice(&(payload.len() as u32).to_be_bytes());
                    data.extend_from_slice(payload);
                    data.extend_from_slice(extra);
                    out.sample(active.id, time_us, flags, &data, None)?;
                }
                None => out.sample(active.id, time_us, flags, payload, crypto)?,
            }
        }
        Ok(reached)
    }
}

fn read_body(input: &mut dyn ExtractorInput, header: &ElementHeader) -> Result<Vec<u8>> {
    let len = header
        .size
        .filter(|&len| len <= MAX_ELEMENT_SIZE)
        .ok_or_else(|| Error::parsing(format!("element {:#x} of size {:?} cannot be buffered", header.id, header.size)))?;
    input
        .read_to_vec(len as usize)?
        .ok_or_else(|| Error::parsing(format!("truncated element {:#x}", header.id)))
}

/// Splits the remaining block payload into frames.
fn split_lacing<'a>(c: &mut ByteCursor<'a>, lacing: u8) -> Result<Vec<&'a [u8]>> {
    if lacing == 0 {
        return Ok(vec![c.rest()]);
    }
    let count = usize::from(c.read_u8()?) + 1;
    let mut sizes = Vec::with_capacity(count);
    match lacing {
        // Xiph
        1 => {
            for _ in 0..count - 1 {
                let mut size = 0usize;
                loop {
                    let b = c.read_u8()?;
                    size += usize::from(b);
                    if b != 0xFF {
                        break;
                    }
                }
                sizes.push(size);
            }
        }
        // Fixed
        2 => {
            let total = c.remaining();
            if total % count != 0 {
                return Err(Error::parsing(format!("{total} bytes do not split into {count} fixed laces")));
            }
            sizes.resize(count - 1, total / count);
        }
        // EBML
        _ => {
            let (first, _) = vint(c, true)?;
            let mut size = first as i64;
            sizes.push(first as usize);
            for _ in 1..count - 1 {
                let (raw, len) = vint(c, true)?;
                let bias = (1i64 << (7 * len - 1)) - 1;
                size += raw as i64 - bias;
                if size < 0 {
                    return Err(Error::parsing("negative EBML lace size"));
                }
                sizes.push(size as usize);
            }
        }
    }
    let explicit: usize = sizes.iter().sum();
    let last = c
        .remaining()
        .checked_sub(explicit)
        .ok_or_else(|| Error::parsing("lace sizes exceed the block"))?;
    sizes.push(last);
    sizes.into_iter().map(|size| c.read_bytes(size)).collect()
}

/// Strips the WebM encryption signal byte, IV and partition table.
fn decrypt_header<'a>(frame: &'a [u8], key_id: Option<&[u8]>) -> Result<(&'a [u8], Option<CryptoInfo>)> {
    let mut c = ByteCursor::new(frame);
    let signal = c.read_u8()?;
    if signal & 0x80 != 0 {
        return Err(Error::parsing("extension bit set in encryption signal byte"));
    }
    if signal & 0x01 == 0 {
        return Ok((c.rest(), None));
    }
    let iv = CryptoInfo::iv_from(c.read_bytes(8)?);
    let partitions = if signal & 0x02 != 0 {
        let count = usize::from(c.read_u8()?);
        (0..count).map(|_| c.read_u32().map(|v| v as usize)).collect::<Result<Vec<_>>>()?
    } else {
        Vec::new()
    };
    let payload = c.rest();
    let subsamples = if partitions.is_empty() {
        vec![Subsample::new(0, payload.len() as u32)]
    } else {
        let mut bounds = Vec::with_capacity(partitions.len() + 2);
        bounds.push(0);
        bounds.extend_from_slice(&partitions);
        bounds.push(payload.len());
        if bounds.windows(2).any(|w| w[1] < w[0]) {
            return Err(Error::parsing("encryption partitions out of order"));
        }
        bounds
            .windows(2)
            .map(|w| w[1] - w[0])
            .collect::<Vec<_>>()
            .chunks(2)
            .map(|pair| Subsample::new(pair[0] as u32, pair.get(1).copied().unwrap_or(0) as u32))
            .collect()
    };
    Ok((
        payload,
        Some(CryptoInfo {
            mode: CryptoMode::AesCtr,
            key_id: key_id.map(CryptoInfo::iv_from),
            iv,
            subsamples,
            pattern: None,
        }),
    ))
}

impl Extract for MatroskaExtractor {
    fn read(&mut self, input: &mut dyn ExtractorInput, out: &mut Output<'_>) -> Result<Progress> {
        match self.state {
            State::Header => self.read_header(input),
            State::Elements => self.read_element(input, out),
            State::FindingCluster => self.find_cluster(input),
        }
    }

    fn seek(&mut self, position: u64, time_us: i64) {
        self.resume_position = None;
        self.cluster_timecode = None;
        if position == 0 {
            self.state = State::Header;
            self.segment_start = None;
            self.seek_target_us = None;
        } else if self.state != State::Header {
            self.state = State::FindingCluster;
            self.seek_target_us = Some(time_us);
        }
    }
}
