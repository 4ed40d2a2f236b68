//! Fragmented MP4: an initialisation `moov` followed by `moof`/`mdat` pairs.

use std::collections::VecDeque;

use super::boxes::{children, find, full_box, read_header, BoxType};
use super::cenc::{self, AuxSizes, SampleAuxInfo};
use super::moov::{parse_moov, parse_sidx, parse_tfdt, Movie, TrackDefaults};
use super::stsd::TrackEncryption;
use super::{MAX_BUFFERED_BOX, MAX_FRAGMENT_SAMPLES};
use crate::error::{Error, Result};
use crate::extractor::{Extract, Progress};
use crate::input::{ExtractorInput, InputExt};
use crate::output::{Output, TrackId};
use crate::params::{Mp4Options, Parameters};
use crate::sample::{CryptoInfo, SampleFlags};
use crate::seek::{IndexSeekMap, SeekMap};
use crate::track::{DrmInitData, MediaType, SchemeData};

const TFHD_BASE_DATA_OFFSET: u32 = 0x1;
const TFHD_DESCRIPTION_INDEX: u32 = 0x2;
const TFHD_DEFAULT_DURATION: u32 = 0x8;
const TFHD_DEFAULT_SIZE: u32 = 0x10;
const TFHD_DEFAULT_FLAGS: u32 = 0x20;

const TRUN_DATA_OFFSET: u32 = 0x1;
const TRUN_FIRST_SAMPLE_FLAGS: u32 = 0x4;
const TRUN_DURATION: u32 = 0x100;
const TRUN_SIZE: u32 = 0x200;
const TRUN_FLAGS: u32 = 0x400;
const TRUN_CTS: u32 = 0x800;

/// `sample_is_non_sync_sample` in the ISO sample flags.
const NON_SYNC_SAMPLE: u32 = 0x0001_0000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    ReadingBoxes,
    /// Emitting the samples of the last `moof` from an `mdat` ending at the
    /// given position (unknown for a trailing `mdat` of a live stream).
    ReadingSamples { mdat_end: Option<u64> },
}

#[derive(Debug, Clone)]
enum PendingCrypto {
    Clear,
    Ready(CryptoInfo),
    /// Record `index` of auxiliary block `block`, which lies outside the `moof`.
    Deferred { block: usize, index: usize },
}

#[derive(Debug, Clone)]
struct PendingSample {
    track: usize,
    offset: u64,
    size: u32,
    time_us: i64,
    flags: SampleFlags,
    crypto: PendingCrypto,
}

/// Auxiliary records stored in the stream rather than in the `moof`.
#[derive(Debug)]
struct DeferredAux {
    position: u64,
    sizes: AuxSizes,
    encryption: TrackEncryption,
    records: Option<Vec<SampleAuxInfo>>,
}

#[derive(Debug)]
struct FragmentTrack {
    id: TrackId,
    /// Decode time following the last parsed fragment, in the media timescale.
    next_decode_time: u64,
}

/// Everything one `moof` contributes, applied only once it fully parsed.
#[derive(Debug, Default)]
struct Fragment {
    samples: Vec<PendingSample>,
    deferred: Vec<DeferredAux>,
    decode_times: Vec<(usize, u64)>,
    pssh: Vec<SchemeData>,
}

pub(crate) struct FragmentedMp4Extractor {
    options: Mp4Options,
    state: State,
    movie: Option<Movie>,
    tracks: Vec<FragmentTrack>,
    pending: VecDeque<PendingSample>,
    deferred: Vec<DeferredAux>,
}

impl FragmentedMp4Extractor {
    pub fn new(params: &Parameters) -> Self {
        Self {
            options: params.mp4,
            state: State::ReadingBoxes,
            movie: None,
            tracks: Vec::new(),
            pending: VecDeque::new(),
            deferred: Vec::new(),
        }
    }

    fn read_box(&mut self, input: &mut dyn ExtractorInput, out: &mut Output<'_>) -> Result<Progress> {
        let Some(header) = read_header(input)? else {
            if self.movie.is_none() {
                return Err(Error::parsing("stream ended without a moov box"));
            }
            return Ok(Progress::EndOfInput);
        };
        match header.box_type {
            BoxType::MOOV if self.movie.is_none() => {
                let body = read_body(input, header.body_len(), "moov")?;
                let movie = parse_moov(&body)?;
                self.start_tracks(movie, out);
            }
            BoxType::SIDX if !out.has_seek_map() => {
                let body = read_body(input, header.body_len(), "sidx")?;
                let end = input.position();
                let (points, duration_us) = parse_sidx(&body, end)?;
                let mut index = IndexSeekMap::new(Some(duration_us));
                for (time_us, position) in points {
                    index.push(time_us, position);
                }
                out.seek_map(SeekMap::index(index));
            }
            BoxType::MOOF => {
                if self.movie.is_none() {
                    return Err(Error::parsing("moof precedes moov"));
                }
                let body_start = header.body_start();
                let body = read_body(input, header.body_len(), "moof")?;
                let fragment = self.parse_moof(&body, header.start, body_start)?;
                self.apply_fragment(fragment, out);
            }
            BoxType::MDAT if !self.pending.is_empty() => {
                self.state = State::ReadingSamples { mdat_end: header.end() };
            }
            _ => {
                let Some(len) = header.body_len() else {
                    return Ok(Progress::EndOfInput);
                };
                if !input.skip_fully(len)? {
                    return Ok(Progress::EndOfInput);
                }
            }
        }
        Ok(Progress::Continue)
    }

    fn start_tracks(&mut self, movie: Movie, out: &mut Output<'_>) {
        for track in &movie.tracks {
            let id = out.track(u64::from(track.id), track.media_type);
            out.format_with_drm(id, track.description.format.clone(), movie.drm_init_data(track));
            self.tracks.push(FragmentTrack {
                id,
                next_decode_time: 0,
            });
        }
        out.end_tracks();
        self.movie = Some(movie);
    }

    fn parse_moof(&self, body: &[u8], moof_start: u64, body_start: u64) -> Result<Fragment> {
        let mut fragment = Fragment::default();
        for child in children(body) {
            match child.box_type {
                BoxType::TRAF => self.parse_traf(child.body, moof_start, (body_start, body), &mut fragment)?,
                BoxType::PSSH => fragment.pssh.push(cenc::parse_pssh(child.body)?),
                _ => {}
            }
        }
        fragment.samples.sort_by_key(|s| s.offset);
        Ok(fragment)
    }

    fn parse_traf(
        &self,
        traf: &[u8],
        moof_start: u64,
        (moof_body_start, moof_body): (u64, &[u8]),
        fragment: &mut Fragment,
    ) -> Result<()> {
        let Some(movie) = &self.movie else {
            return Err(Error::InvalidState("traf parsed before moov"));
        };
        let tfhd = find(traf, BoxType::TFHD).ok_or_else(|| Error::parsing("traf without tfhd"))?;
        let (_, tfhd_flags, mut c) = full_box(tfhd)?;
        let track_id = c.read_u32()?;
        let Some(track_index) = movie.tracks.iter().position(|t| t.id == track_id) else {
            tracing::warn!(track_id, "fragment for a track missing from moov");
            return Ok(());
        };
        let track = &movie.tracks[track_index];
        let base_offset = if tfhd_flags & TFHD_BASE_DATA_OFFSET != 0 {
            c.read_u64()?
        } else {
            moof_start
        };
        let mut defaults: TrackDefaults = track.defaults;
        if tfhd_flags & TFHD_DESCRIPTION_INDEX != 0 {
            defaults.description_index = c.read_u32()?;
        }
        if tfhd_flags & TFHD_DEFAULT_DURATION != 0 {
            defaults.duration = c.read_u32()?;
        }
        if tfhd_flags & TFHD_DEFAULT_SIZE != 0 {
            defaults.size = c.read_u32()?;
        }
        if tfhd_flags & TFHD_DEFAULT_FLAGS != 0 {
            defaults.flags = c.read_u32()?;
        }

        let mut decode_time = match find(traf, BoxType::TFDT) {
            Some(tfdt) if !self.options.ignore_tfdt_box => parse_tfdt(tfdt)?,
            _ => self.tracks[track_index].next_decode_time,
        };

        let encryption = track.description.encryption.as_ref().filter(|e| e.is_protected);
        let aux = match encryption {
            Some(encryption) => Some(self.locate_aux(traf, encryption, base_offset, moof_body_start, moof_body, fragment)?),
            None => None,
        };

        let mut position = base_offset;
        let mut sample_index = 0usize;
        for trun in children(traf).filter(|b| b.box_type == BoxType::TRUN) {
            let (_, flags, mut c) = full_box(trun.body)?;
            let count = c.read_u32()? as usize;
            if flags & TRUN_DATA_OFFSET != 0 {
                let data_offset = i64::from(c.read_i32()?);
                position = base_offset
                    .checked_add_signed(data_offset)
                    .ok_or_else(|| Error::parsing("trun data offset points before the stream"))?;
            }
            let first_flags = if flags & TRUN_FIRST_SAMPLE_FLAGS != 0 {
                Some(c.read_u32()?)
            } else {
                None
            };
            let entry_len = [TRUN_DURATION, TRUN_SIZE, TRUN_FLAGS, TRUN_CTS]
                .iter()
                .filter(|&&bit| flags & bit != 0)
                .count()
                * 4;
            if count.saturating_mul(entry_len) > c.remaining()
                || fragment.samples.len().saturating_add(count) > MAX_FRAGMENT_SAMPLES
            {
                return Err(Error::parsing(format!("trun declares {count} samples")));
            }
            for i in 0..count {
                let duration = if flags & TRUN_DURATION != 0 { c.read_u32()? } else { defaults.duration };
                let size = if flags & TRUN_SIZE != 0 { c.read_u32()? } else { defaults.size };
                let sample_flags = if flags & TRUN_FLAGS != 0 {
                    c.read_u32()?
                } else {
                    match first_flags {
                        Some(first) if i == 0 => first,
                        _ => defaults.flags,
                    }
                };
                let cts = if flags & TRUN_CTS != 0 { c.read_i32()? } else { 0 };
                let pts = decode_time as i64 + i64::from(cts);
                let key = sample_flags & NON_SYNC_SAMPLE == 0
                    || (self.options.treat_video_frames_as_keyframes && track.media_type == MediaType::Video);
                let crypto = match (&aux, encryption) {
                    (Some(AuxLocation::InMemory(records)), Some(encryption)) => {
                        match cenc::crypto_info(encryption, records.get(sample_index), size as usize)? {
                            Some(info) => PendingCrypto::Ready(info),
                            None => PendingCrypto::Clear,
                        }
                    }
                    (Some(AuxLocation::Deferred(block)), _) => PendingCrypto::Deferred {
                        block: *block,
                        index: sample_index,
                    },
                    _ => PendingCrypto::Clear,
                };
                fragment.samples.push(PendingSample {
                    track: track_index,
                    offset: position,
                    size,
                    time_us: track.time_us(pts, self.options.ignore_edit_lists),
                    flags: SampleFlags::key_frame_if(key),
                    crypto,
                });
                position = position
                    .checked_add(u64::from(size))
                    .ok_or_else(|| Error::parsing("trun sample offsets overflow"))?;
                decode_time = decode_time.saturating_add(u64::from(duration));
                sample_index += 1;
            }
        }
        fragment.decode_times.push((track_index, decode_time));
        Ok(())
    }

    /// Finds the auxiliary records of a protected `traf`: `senc` first, then
    /// `saiz`/`saio` pointing inside the `moof` or elsewhere in the stream.
    fn locate_aux(
        &self,
        traf: &[u8],
        encryption: &TrackEncryption,
        base_offset: u64,
        moof_body_start: u64,
        moof_body: &[u8],
        fragment: &mut Fragment,
    ) -> Result<AuxLocation> {
        let iv_size = encryption.per_sample_iv_size;
        if let Some(senc) = find(traf, BoxType::SENC) {
            return Ok(AuxLocation::InMemory(cenc::parse_senc(senc, iv_size)?));
        }
        let (Some(saiz), Some(saio)) = (find(traf, BoxType::SAIZ), find(traf, BoxType::SAIO)) else {
            return Ok(AuxLocation::InMemory(Vec::new()));
        };
        let sizes = cenc::parse_saiz(saiz)?;
        let offsets = cenc::parse_saio(saio)?;
        let [offset] = offsets.as_slice() else {
            return Err(Error::parsing(format!("saio with {} entries in a fragment", offsets.len())));
        };
        let position = base_offset
            .checked_add(*offset)
            .ok_or_else(|| Error::parsing("saio offset overflows"))?;
        let start = position.checked_sub(moof_body_start).map(|s| s as usize);
        if let Some(data) = start.and_then(|s| moof_body.get(s..s.checked_add(sizes.total())?)) {
            return Ok(AuxLocation::InMemory(cenc::parse_aux_records(data, &sizes, iv_size)?));
        }
        fragment.deferred.push(DeferredAux {
            position,
            sizes,
            encryption: encryption.clone(),
            records: None,
        });
        Ok(AuxLocation::Deferred(fragment.deferred.len() - 1))
    }

    fn apply_fragment(&mut self, fragment: Fragment, out: &mut Output<'_>) {
        if !out.has_seek_map() {
            let duration = self.movie.as_ref().and_then(|m| m.duration_us);
            out.seek_map(SeekMap::unseekable(duration));
        }
        for (track, decode_time) in fragment.decode_times {
            self.tracks[track].next_decode_time = decode_time;
        }
        if !fragment.pssh.is_empty() {
            if let Some(movie) = &self.movie {
                for (track, state) in movie.tracks.iter().zip(&self.tracks) {
                    let drm = DrmInitData {
                        scheme_type: track.description.encryption.as_ref().map(|e| e.scheme_type.clone()),
                        scheme_datas: fragment.pssh.clone(),
                    };
                    out.format_with_drm(state.id, track.description.format.clone(), Some(drm));
                }
            }
        }
        tracing::trace!(samples = fragment.samples.len(), "fragment");
        self.pending = fragment.samples.into();
        self.deferred = fragment.deferred;
    }

    fn resolve_crypto(&mut self, input: &mut dyn ExtractorInput, sample: &PendingSample) -> Result<Option<CryptoInfo>> {
        let (block, index) = match &sample.crypto {
            PendingCrypto::Clear => return Ok(None),
            PendingCrypto::Ready(info) => return Ok(Some(info.clone())),
            PendingCrypto::Deferred { block, index } => (*block, *index),
        };
        let aux = self
            .deferred
            .get_mut(block)
            .ok_or(Error::InvalidState("auxiliary block missing"))?;
        if aux.records.is_none() {
            let total = aux.sizes.total() as u64;
            let past_end = match (input.length(), aux.position.checked_add(total)) {
                (_, None) => true,
                (Some(length), Some(end)) => end > length,
                (None, Some(_)) => total > MAX_BUFFERED_BOX,
            };
            if past_end || !input.advance_to(aux.position)? {
                return Err(Error::parsing("auxiliary info lies past the end of the stream"));
            }
            let data = input
                .read_to_vec(aux.sizes.total())?
                .ok_or_else(|| Error::parsing("auxiliary info lies past the end of the stream"))?;
            aux.records = Some(cenc::parse_aux_records(&data, &aux.sizes, aux.encryption.per_sample_iv_size)?);
        }
        let record = aux.records.as_ref().and_then(|r| r.get(index));
        cenc::crypto_info(&aux.encryption, record, sample.size as usize)
    }

    fn read_sample(
        &mut self,
        input: &mut dyn ExtractorInput,
        out: &mut Output<'_>,
        mdat_end: Option<u64>,
    ) -> Result<Progress> {
        let Some(sample) = self.pending.front().cloned() else {
            self.state = State::ReadingBoxes;
            if let Some(end) = mdat_end {
                if input.position() < end && !input.advance_to(end)? {
                    return Ok(Progress::EndOfInput);
                }
            }
            return Ok(Progress::Continue);
        };
        let crypto = self.resolve_crypto(input, &sample)?;
        if !input.advance_to(sample.offset)? {
            return Ok(Progress::EndOfInput);
        }
        let Some(data) = input.read_to_vec(sample.size as usize)? else {
            return Ok(Progress::EndOfInput);
        };
        let id = self.tracks[sample.track].id;
        out.sample(id, sample.time_us, sample.flags, &data, crypto)?;
        self.pending.pop_front();
        Ok(Progress::Continue)
    }
}

enum AuxLocation {
    InMemory(Vec<SampleAuxInfo>),
    Deferred(usize),
}

fn read_body(input: &mut dyn ExtractorInput, len: Option<u64>, name: &str) -> Result<Vec<u8>> {
    let len = len
        .filter(|&len| len <= MAX_BUFFERED_BOX)
        .ok_or_else(|| Error::parsing(format!("{name} of size {len:?} cannot be buffered")))?;
    input
        .read_to_vec(len as usize)?
        .ok_or_else(|| Error::parsing(format!("truncated {name}")))
}

impl Extract for FragmentedMp4Extractor {
    fn read(&mut self, input: &mut dyn ExtractorInput, out: &mut Output<'_>) -> Result<Progress> {
        match self.state {
            State::ReadingBoxes => self.read_box(input, out),
            State::ReadingSamples { mdat_end } => self.read_sample(input, out, mdat_end),
        }
    }

    fn seek(&mut self, _position: u64, time_us: i64) {
        self.state = State::ReadingBoxes;
        self.pending.clear();
        self.deferred.clear();
        if let Some(movie) = &self.movie {
            for (track, state) in movie.tracks.iter().zip(&mut self.tracks) {
                state.next_decode_time = track.media_time(time_us, self.options.ignore_edit_lists).max(0) as u64;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::super::tests::fragmented_file;
    use super::*;
    use crate::extractor::run_to_end;
    use crate::input::SliceInput;

    /// Rewrites the flags and sample count of the only `trun`.
    fn with_trun(flags: u32, count: u32) -> Vec<u8> {
        let mut file = fragmented_file();
        let at = file.windows(4).position(|w| w == b"trun").unwrap();
        file[at + 4..at + 8].copy_from_slice(&flags.to_be_bytes());
        file[at + 8..at + 12].copy_from_slice(&count.to_be_bytes());
        file
    }

    #[test]
    fn test_trun_without_entries_is_bounded() {
        let mut extractor = FragmentedMp4Extractor::new(&Parameters::default());
        let result = run_to_end(&mut extractor, &mut SliceInput::new(with_trun(TRUN_DATA_OFFSET, u32::MAX)));
        assert_matches!(result, Err(Error::Parsing(_)));
    }

    #[test]
    fn test_trun_count_beyond_body_is_rejected() {
        let mut extractor = FragmentedMp4Extractor::new(&Parameters::default());
        let result = run_to_end(&mut extractor, &mut SliceInput::new(with_trun(TRUN_DATA_OFFSET | TRUN_SIZE, 3)));
        assert_matches!(result, Err(Error::Parsing(_)));
    }
}
