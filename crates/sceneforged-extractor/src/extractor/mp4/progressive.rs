//! Unfragmented MP4: one `moov` describing every sample in `mdat`.

use super::boxes::{read_header, BoxType};
use super::cenc::{self, SampleAuxInfo};
use super::moov::{parse_moov, Movie, Mp4Track};
use super::MAX_BUFFERED_BOX;
use crate::error::{Error, Result};
use crate::extractor::{Extract, Progress};
use crate::input::{ExtractorInput, InputExt};
use crate::output::{Output, TrackId};
use crate::params::{Mp4Options, Parameters};
use crate::sample::SampleFlags;
use crate::seek::{IndexSeekMap, SeekMap};
use crate::track::MediaType;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    ReadingBoxes,
    LoadingAuxInfo,
    ReadingSamples,
}

#[derive(Debug)]
struct PlaybackTrack {
    id: TrackId,
    movie_index: usize,
    next: usize,
    aux: Vec<SampleAuxInfo>,
}

pub(crate) struct Mp4Extractor {
    options: Mp4Options,
    state: State,
    movie: Option<Movie>,
    tracks: Vec<PlaybackTrack>,
}

impl Mp4Extractor {
    pub fn new(params: &Parameters) -> Self {
        Self {
            options: params.mp4,
            state: State::ReadingBoxes,
            movie: None,
            tracks: Vec::new(),
        }
    }

    fn read_box(&mut self, input: &mut dyn ExtractorInput, out: &mut Output<'_>) -> Result<Progress> {
        let Some(header) = read_header(input)? else {
            return Err(Error::parsing("stream ended without a moov box"));
        };
        if header.box_type != BoxType::MOOV {
            let Some(len) = header.body_len() else {
                return Err(Error::parsing(format!("{} box of unknown size precedes moov", header.box_type)));
            };
            if !input.skip_fully(len)? {
                return Err(Error::parsing("stream ended without a moov box"));
            }
            return Ok(Progress::Continue);
        }
        let len = header
            .body_len()
            .filter(|&len| len <= MAX_BUFFERED_BOX)
            .ok_or_else(|| Error::parsing(format!("moov of size {:?} cannot be buffered", header.size)))?;
        let body = input.read_to_vec(len as usize)?.ok_or_else(|| Error::parsing("truncated moov"))?;
        let movie = parse_moov(&body)?;
        if movie.fragmented && movie.tracks.iter().all(|t| t.table.is_empty()) {
            tracing::warn!("fragmented movie read by the unfragmented extractor; no samples will be found");
        }
        self.start_tracks(movie, out);
        Ok(Progress::Continue)
    }

    fn start_tracks(&mut self, movie: Movie, out: &mut Output<'_>) {
        for (movie_index, track) in movie.tracks.iter().enumerate() {
            let id = out.track(u64::from(track.id), track.media_type);
            let mut format = track.description.format.clone();
            format.max_input_size = track.table.samples.iter().map(|s| s.size as usize).max();
            out.format_with_drm(id, format, movie.drm_init_data(track));
            self.tracks.push(PlaybackTrack {
                id,
                movie_index,
                next: 0,
                aux: Vec::new(),
            });
        }
        out.end_tracks();
        out.seek_map(self.seek_map(&movie));
        self.state = if movie.tracks.iter().any(|t| t.aux.is_some() && t.description.encryption.is_some()) {
            State::LoadingAuxInfo
        } else {
            State::ReadingSamples
        };
        self.movie = Some(movie);
    }

    /// Index built from the sync samples of the first video track (or the
    /// first track), positioned at the earliest byte any track needs.
    fn seek_map(&self, movie: &Movie) -> SeekMap {
        let ignore = self.options.ignore_edit_lists;
        let primary = movie
            .tracks
            .iter()
            .position(|t| t.media_type == MediaType::Video)
            .unwrap_or(0);
        let mut index = IndexSeekMap::new(movie.duration_us);
        let Some(track) = movie.tracks.get(primary) else {
            return SeekMap::index(index);
        };
        for sample in track.table.samples.iter().filter(|s| s.is_keyframe) {
            let time_us = track.time_us(sample.pts(), ignore).max(0);
            let position = movie
                .tracks
                .iter()
                .filter_map(|other| {
                    let i = other.table.sync_index_for(other.media_time(time_us, ignore))?;
                    Some(other.table.samples[i].offset)
                })
                .min()
                .unwrap_or(sample.offset)
                .min(sample.offset);
            index.push(time_us, position);
        }
        SeekMap::index(index)
    }

    fn load_aux_info(&mut self, input: &mut dyn ExtractorInput) -> Result<()> {
        let Some(movie) = &self.movie else {
            return Err(Error::InvalidState("auxiliary info requested before moov"));
        };
        let mut loaded = Vec::with_capacity(self.tracks.len());
        for playback in &self.tracks {
            let track = &movie.tracks[playback.movie_index];
            let (Some(aux), Some(encryption)) = (&track.aux, &track.description.encryption) else {
                loaded.push(Vec::new());
                continue;
            };
            let Some(&first_offset) = aux.offsets.first() else {
                loaded.push(Vec::new());
                continue;
            };
            let mut records = Vec::with_capacity(aux.sizes.count as usize);
            let mut position = first_offset;
            let mut chunk = None;
            for (i, sample) in track.table.samples.iter().enumerate().take(aux.sizes.count as usize) {
                // One offset per chunk, or a single contiguous run.
                if aux.offsets.len() > 1 && chunk != Some(sample.chunk) {
                    chunk = Some(sample.chunk);
                    position = aux.offsets.get(sample.chunk as usize).copied().unwrap_or(position);
                }
                let size = aux.sizes.size_of(i);
                if input.position() != position {
                    input.seek_to_position(position)?;
                }
                let record = input
                    .read_to_vec(size)?
                    .ok_or_else(|| Error::parsing("auxiliary info lies past the end of the stream"))?;
                records.push(cenc::parse_aux_record(&record, encryption.per_sample_iv_size)?);
                position += size as u64;
            }
            loaded.push(records);
        }
        for (playback, records) in self.tracks.iter_mut().zip(loaded) {
            playback.aux = records;
        }
        Ok(())
    }

    fn read_sample(&mut self, input: &mut dyn ExtractorInput, out: &mut Output<'_>) -> Result<Progress> {
        let Some(movie) = &self.movie else {
            return Err(Error::InvalidState("samples requested before moov"));
        };
        let next = self
            .tracks
            .iter()
            .enumerate()
            .filter_map(|(i, p)| {
                let sample = movie.tracks[p.movie_index].table.samples.get(p.next)?;
                Some((sample.offset, i))
            })
            .min();
        let Some((offset, playback_index)) = next else {
            return Ok(Progress::EndOfInput);
        };
        let playback = &self.tracks[playback_index];
        let track: &Mp4Track = &movie.tracks[playback.movie_index];
        let sample = track.table.samples[playback.next];
        if !input.advance_to(offset)? {
            return Ok(Progress::EndOfInput);
        }
        let Some(data) = input.read_to_vec(sample.size as usize)? else {
            return Ok(Progress::EndOfInput);
        };
        let key = sample.is_keyframe
            || (self.options.treat_video_frames_as_keyframes && track.media_type == MediaType::Video);
        let crypto = match &track.description.encryption {
            Some(encryption) => cenc::crypto_info(encryption, playback.aux.get(playback.next), data.len())?,
            None => None,
        };
        let time_us = track.time_us(sample.pts(), self.options.ignore_edit_lists);
        out.sample(playback.id, time_us, SampleFlags::key_frame_if(key), &data, crypto)?;
        self.tracks[playback_index].next += 1;
        Ok(Progress::Continue)
    }
}

impl Extract for Mp4Extractor {
    fn read(&mut self, input: &mut dyn ExtractorInput, out: &mut Output<'_>) -> Result<Progress> {
        match self.state {
            State::ReadingBoxes => self.read_box(input, out),
            State::LoadingAuxInfo => {
                self.load_aux_info(input)?;
                self.state = State::ReadingSamples;
                Ok(Progress::Continue)
            }
            State::ReadingSamples => self.read_sample(input, out),
        }
    }

    fn seek(&mut self, _position: u64, time_us: i64) {
        let Some(movie) = &self.movie else {
            return;
        };
        let ignore = self.options.ignore_edit_lists;
        for playback in &mut self.tracks {
            let track = &movie.tracks[playback.movie_index];
            playback.next = if time_us <= 0 {
                0
            } else {
                track
                    .table
                    .sync_index_for(track.media_time(time_us, ignore))
                    .unwrap_or(track.table.len())
            };
        }
    }
}
