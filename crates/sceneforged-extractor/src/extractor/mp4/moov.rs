//! The `moov` box: movie header, tracks, edit lists and fragment defaults.

use super::boxes::{children, find, full_box, BoxType};
use super::cenc::{self, AuxSizes};
use super::sample_table::{SampleTable, SampleTableBuilder};
use super::stsd::{parse_stsd, SampleDescription};
use crate::error::{Error, Result};
use crate::seek::scale;
use crate::track::{DrmInitData, MediaType, SchemeData};

/// One `elst` entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct EditEntry {
    /// In the movie timescale.
    pub segment_duration: u64,
    /// In the media timescale, -1 for an empty edit.
    pub media_time: i64,
}

/// Per-track defaults from `mvex/trex`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct TrackDefaults {
    pub description_index: u32,
    pub duration: u32,
    pub size: u32,
    pub flags: u32,
}

/// Layout of stbl-level auxiliary encryption info.
#[derive(Debug, Clone, Default)]
pub(crate) struct StblAux {
    pub sizes: AuxSizes,
    pub offsets: Vec<u64>,
}

#[derive(Debug, Clone)]
pub(crate) struct Mp4Track {
    pub id: u32,
    pub media_type: MediaType,
    pub timescale: u32,
    pub movie_timescale: u32,
    pub duration: Option<u64>,
    pub description: SampleDescription,
    pub edits: Vec<EditEntry>,
    pub table: SampleTable,
    pub aux: Option<StblAux>,
    pub defaults: TrackDefaults,
}

impl Mp4Track {
    /// Converts a presentation time in the media timescale to microseconds,
    /// applying the edit list unless told otherwise.
    pub fn time_us(&self, pts: i64, ignore_edits: bool) -> i64 {
        let (empty_us, media_start) = if ignore_edits {
            (0, 0)
        } else {
            self.edit_shift()
        };
        scale(pts - media_start, 1_000_000, i64::from(self.timescale)) + empty_us
    }

    /// Inverse of [`Mp4Track::time_us`].
    pub fn media_time(&self, time_us: i64, ignore_edits: bool) -> i64 {
        let (empty_us, media_start) = if ignore_edits {
            (0, 0)
        } else {
            self.edit_shift()
        };
        scale(time_us - empty_us, i64::from(self.timescale), 1_000_000) + media_start
    }

    /// Leading empty edits delay the track; the first non-empty edit's media
    /// time becomes presentation time zero.
    fn edit_shift(&self) -> (i64, i64) {
        let mut empty = 0u64;
        for edit in &self.edits {
            if edit.media_time == -1 {
                empty += edit.segment_duration;
            } else {
                let empty_us = scale(empty as i64, 1_000_000, i64::from(self.movie_timescale));
                return (empty_us, edit.media_time);
            }
        }
        (scale(empty as i64, 1_000_000, i64::from(self.movie_timescale)), 0)
    }

    pub fn duration_us(&self) -> Option<i64> {
        self.duration
            .filter(|&d| d > 0 && d != u64::from(u32::MAX) && d != u64::MAX)
            .map(|d| scale(d as i64, 1_000_000, i64::from(self.timescale)))
    }
}

#[derive(Debug, Clone, Default)]
pub(crate) struct Movie {
    pub timescale: u32,
    pub duration_us: Option<i64>,
    pub tracks: Vec<Mp4Track>,
    pub fragmented: bool,
    pub pssh: Vec<SchemeData>,
}

impl Movie {
    pub fn track(&self, id: u32) -> Option<&Mp4Track> {
        self.tracks.iter().find(|t| t.id == id)
    }

    /// DRM init data for `track`, `None` for clear tracks without `pssh`.
    pub fn drm_init_data(&self, track: &Mp4Track) -> Option<DrmInitData> {
        let scheme_type = track
            .description
            .encryption
            .as_ref()
            .map(|e| e.scheme_type.clone());
        if scheme_type.is_none() && self.pssh.is_empty() {
            return None;
        }
        Some(DrmInitData {
            scheme_type,
            scheme_datas: self.pssh.clone(),
        })
    }
}

fn parse_mvhd(body: &[u8]) -> Result<(u32, Option<u64>)> {
    let (version, _, mut c) = full_box(body)?;
    c.skip(if version == 1 { 16 } else { 8 })?;
    let timescale = c.read_u32()?;
    let duration = c.read_u32_or_u64(version == 1)?;
    Ok((timescale, Some(duration)))
}

fn parse_tkhd(body: &[u8]) -> Result<u32> {
    let (version, _, mut c) = full_box(body)?;
    c.skip(if version == 1 { 16 } else { 8 })?;
    c.read_u32()
}

fn parse_mdhd(body: &[u8]) -> Result<(u32, u64, Option<String>)> {
    let (version, _, mut c) = full_box(body)?;
    c.skip(if version == 1 { 16 } else { 8 })?;
    let timescale = c.read_u32()?;
    let duration = c.read_u32_or_u64(version == 1)?;
    let packed = c.read_u16()?;
    let language = if packed == 0 {
        None
    } else {
        let chars = [(packed >> 10) & 0x1F, (packed >> 5) & 0x1F, packed & 0x1F];
        Some(chars.iter().map(|&ch| char::from(0x60 + ch as u8)).collect())
    };
    Ok((timescale, duration, language))
}

fn handler_media_type(body: &[u8]) -> MediaType {
    match body.get(8..12) {
        Some(b"vide") => MediaType::Video,
        Some(b"soun") => MediaType::Audio,
        Some(b"text" | b"sbtl" | b"subt" | b"clcp") => MediaType::Text,
        Some(b"meta") => MediaType::Metadata,
        _ => MediaType::Unknown,
    }
}

fn parse_elst(body: &[u8]) -> Result<Vec<EditEntry>> {
    let (version, _, mut c) = full_box(body)?;
    let count = c.read_u32()?;
    let wide = version == 1;
    (0..count)
        .map(|_| {
            let segment_duration = c.read_u32_or_u64(wide)?;
            let media_time = if wide {
                c.read_i64()?
            } else {
                i64::from(c.read_i32()?)
            };
            c.skip(4)?;
            Ok(EditEntry {
                segment_duration,
                media_time,
            })
        })
        .collect()
}

fn parse_trex(body: &[u8]) -> Result<(u32, TrackDefaults)> {
    let (_, _, mut c) = full_box(body)?;
    let track_id = c.read_u32()?;
    Ok((
        track_id,
        TrackDefaults {
            description_index: c.read_u32()?,
            duration: c.read_u32()?,
            size: c.read_u32()?,
            flags: c.read_u32()?,
        },
    ))
}

fn parse_stbl(stbl: &[u8], media_type: MediaType) -> Result<(Option<SampleDescription>, SampleTable, Option<StblAux>)> {
    let mut builder = SampleTableBuilder::new();
    let mut description = None;
    let mut saiz = None;
    let mut saio = None;
    for child in children(stbl) {
        match child.box_type {
            BoxType::STSD => description = parse_stsd(child.body, media_type)?,
            BoxType::SAIZ => saiz = Some(cenc::parse_saiz(child.body)?),
            BoxType::SAIO => saio = Some(cenc::parse_saio(child.body)?),
            _ => builder.add(&child)?,
        }
    }
    let aux = match (saiz, saio) {
        (Some(sizes), Some(offsets)) if !offsets.is_empty() => Some(StblAux { sizes, offsets }),
        _ => None,
    };
    Ok((description, builder.build()?, aux))
}

fn parse_trak(trak: &[u8], movie_timescale: u32) -> Result<Option<Mp4Track>> {
    let mut id = 0;
    let mut edits = Vec::new();
    let mut timescale = 0;
    let mut duration = None;
    let mut language = None;
    let mut media_type = MediaType::Unknown;
    let mut stbl = None;
    for child in children(trak) {
        match child.box_type {
            BoxType::TKHD => id = parse_tkhd(child.body)?,
            BoxType::EDTS => {
                if let Some(elst) = find(child.body, BoxType::ELST) {
                    edits = parse_elst(elst)?;
                }
            }
            BoxType::MDIA => {
                for mdia in children(child.body) {
                    match mdia.box_type {
                        BoxType::MDHD => {
                            let (ts, d, lang) = parse_mdhd(mdia.body)?;
                            timescale = ts;
                            duration = Some(d);
                            language = lang;
                        }
                        BoxType::HDLR => media_type = handler_media_type(mdia.body),
                        BoxType::MINF => stbl = find(mdia.body, BoxType::STBL),
                        _ => {}
                    }
                }
            }
            _ => {}
        }
    }
    if timescale == 0 {
        return Err(Error::parsing(format!("track {id} has no media timescale")));
    }
    let Some(stbl) = stbl else {
        return Ok(None);
    };
    if media_type == MediaType::Unknown || media_type == MediaType::Metadata {
        tracing::debug!(id, "skipping track with unsupported handler");
        return Ok(None);
    }
    let (description, table, aux) = parse_stbl(stbl, media_type)?;
    let Some(mut description) = description else {
        return Ok(None);
    };
    description.format.id = Some(id.to_string());
    description.format.language = language.filter(|l: &String| l != "und");
    Ok(Some(Mp4Track {
        id,
        media_type,
        timescale,
        movie_timescale,
        duration,
        description,
        edits,
        table,
        aux,
        defaults: TrackDefaults::default(),
    }))
}

/// Parses a complete `moov` body.
pub(crate) fn parse_moov(moov: &[u8]) -> Result<Movie> {
    let mut movie = Movie::default();
    let mut movie_duration = None;
    let mut fragment_duration = None;
    let mut trex = Vec::new();
    if let Some(mvhd) = find(moov, BoxType::MVHD) {
        let (timescale, duration) = parse_mvhd(mvhd)?;
        movie.timescale = timescale;
        movie_duration = duration;
    }
    if movie.timescale == 0 {
        return Err(Error::parsing("moov without a valid mvhd"));
    }
    for child in children(moov) {
        match child.box_type {
            BoxType::TRAK => {
                if let Some(track) = parse_trak(child.body, movie.timescale)? {
                    movie.tracks.push(track);
                }
            }
            BoxType::MVEX => {
                movie.fragmented = true;
                for mvex in children(child.body) {
                    match mvex.box_type {
                        BoxType::TREX => trex.push(parse_trex(mvex.body)?),
                        BoxType::MEHD => {
                            let (version, _, mut c) = full_box(mvex.body)?;
                            fragment_duration = Some(c.read_u32_or_u64(version == 1)?);
                        }
                        _ => {}
                    }
                }
            }
            BoxType::PSSH => movie.pssh.push(cenc::parse_pssh(child.body)?),
            _ => {}
        }
    }
    for track in &mut movie.tracks {
        if let Some((_, defaults)) = trex.iter().find(|(id, _)| *id == track.id) {
            track.defaults = *defaults;
        }
    }
    let duration = movie_duration
        .filter(|&d| d > 0 && d != u64::from(u32::MAX) && d != u64::MAX)
        .or(fragment_duration.filter(|&d| d > 0));
    movie.duration_us = duration
        .map(|d| scale(d as i64, 1_000_000, i64::from(movie.timescale)))
        .or_else(|| movie.tracks.iter().filter_map(Mp4Track::duration_us).max());
    tracing::debug!(
        tracks = movie.tracks.len(),
        fragmented = movie.fragmented,
        duration_us = movie.duration_us,
        "parsed moov"
    );
    Ok(movie)
}

/// Reads the `tfdt` base decode time.
pub(crate) fn parse_tfdt(body: &[u8]) -> Result<u64> {
    let (version, _, mut c) = full_box(body)?;
    c.read_u32_or_u64(version == 1)
}

/// Parses a `sidx` box located at `sidx_end` into `(time_us, position)`
/// pairs plus the total duration.
pub(crate) fn parse_sidx(body: &[u8], sidx_end: u64) -> Result<(Vec<(i64, u64)>, i64)> {
    let (version, _, mut c) = full_box(body)?;
    c.skip(4)?;
    let timescale = i64::from(c.read_u32()?);
    if timescale == 0 {
        return Err(Error::parsing("sidx with zero timescale"));
    }
    let earliest = c.read_u32_or_u64(version != 0)? as i64;
    let first_offset = c.read_u32_or_u64(version != 0)?;
    c.skip(2)?;
    let count = c.read_u16()?;
    let mut points = Vec::with_capacity(usize::from(count));
    let mut time = earliest;
    let mut position = sidx_end + first_offset;
    for _ in 0..count {
        let reference = c.read_u32()?;
        if reference & 0x8000_0000 != 0 {
            return Err(Error::parsing("hierarchical sidx is not supported"));
        }
        let duration = i64::from(c.read_u32()?);
        c.skip(4)?;
        points.push((scale(time, 1_000_000, timescale), position));
        time += duration;
        position += u64::from(reference & 0x7FFF_FFFF);
    }
    Ok((points, scale(time - earliest, 1_000_000, timescale)))
}
