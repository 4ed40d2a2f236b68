//! Sink callbacks and the bounded handle extractors emit through.

use bytes::Bytes;

use crate::error::{Error, Result};
use crate::sample::{CryptoInfo, SampleFlags};
use crate::seek::SeekMap;
use crate::track::{DrmInitData, MediaType, TrackData, TrackFormat};

/// Receiver of everything an extractor discovers.
///
/// Sample bytes arrive through [`on_sample_data_found`] in stream order and
/// are framed afterwards by [`on_sample_completed`]: the sample occupies the
/// `size` bytes ending `offset` bytes before the end of the data received so
/// far for that track.
///
/// [`on_sample_data_found`]: OutputSink::on_sample_data_found
/// [`on_sample_completed`]: OutputSink::on_sample_completed
pub trait OutputSink {
    fn on_seek_map_found(&mut self, seek_map: &SeekMap);

    fn on_track_count_found(&mut self, count: usize);

    fn on_track_data_found(&mut self, track_index: usize, data: &TrackData);

    fn on_sample_data_found(&mut self, track_index: usize, data: &[u8]);

    fn on_sample_completed(
        &mut self,
        track_index: usize,
        time_us: i64,
        flags: SampleFlags,
        size: usize,
        offset: usize,
        crypto: Option<&CryptoInfo>,
    );
}

/// Dense index of a track within one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct TrackId(pub usize);

#[derive(Debug)]
struct TrackSlot {
    container_id: u64,
    media_type: MediaType,
    pending: usize,
    format: Option<TrackFormat>,
    drm: Option<DrmInitData>,
}

/// Session-owned bookkeeping behind [`Output`].
#[derive(Debug, Default)]
pub(crate) struct TrackTable {
    slots: Vec<TrackSlot>,
    reported_count: Option<usize>,
    seek_map: Option<SeekMap>,
}

impl TrackTable {
    pub fn has_seek_map(&self) -> bool {
        self.seek_map.is_some()
    }

    pub fn tracks_ended(&self) -> bool {
        self.reported_count.is_some()
    }

    /// Drops bytes of partially emitted samples, as after a seek.
    pub fn reset_pending(&mut self) {
        for slot in &mut self.slots {
            slot.pending = 0;
        }
    }
}

/// Handle through which extractors report to the sink.
pub(crate) struct Output<'a> {
    sink: &'a mut dyn OutputSink,
    table: &'a mut TrackTable,
    in_band_crypto: bool,
}

impl<'a> Output<'a> {
    pub fn new(sink: &'a mut dyn OutputSink, table: &'a mut TrackTable, in_band_crypto: bool) -> Self {
        Self {
            sink,
            table,
            in_band_crypto,
        }
    }

    /// Registers (or looks up) the track with container id `id`.
    pub fn track(&mut self, id: u64, media_type: MediaType) -> TrackId {
        if let Some(index) = self.table.slots.iter().position(|s| s.container_id == id) {
            return TrackId(index);
        }
        tracing::debug!(id, media_type = media_type.as_str(), index = self.table.slots.len(), "track discovered");
        self.table.slots.push(TrackSlot {
            container_id: id,
            media_type,
            pending: 0,
            format: None,
            drm: None,
        });
        TrackId(self.table.slots.len() - 1)
    }

    pub fn track_count(&self) -> usize {
        self.table.slots.len()
    }

    /// Emits the format of a track. Re-emitting an identical format is a no-op.
    pub fn format(&mut self, track: TrackId, format: TrackFormat) {
        let drm = self.table.slots.get(track.0).and_then(|s| s.drm.clone());
        self.format_with_drm(track, format, drm);
    }

    /// Emits the format together with DRM init data for out-of-band delivery.
    pub fn format_with_drm(&mut self, track: TrackId, format: TrackFormat, drm: Option<DrmInitData>) {
        let Some(slot) = self.table.slots.get_mut(track.0) else {
            return;
        };
        let drm = drm.filter(|d| !d.is_empty() || d.scheme_type.is_some());
        if slot.format.as_ref() == Some(&format) && slot.drm == drm {
            return;
        }
        let media_type = match format.media_type() {
            MediaType::Unknown => slot.media_type,
            known => known,
        };
        slot.media_type = media_type;
        slot.format = Some(format.clone());
        slot.drm = drm.clone();
        let data = TrackData {
            media_type,
            format,
            drm_init_data: drm,
        };
        self.sink.on_track_data_found(track.0, &data);
    }

    /// True once a format was emitted for `track`.
    pub fn has_format(&self, track: TrackId) -> bool {
        self.table.slots.get(track.0).is_some_and(|s| s.format.is_some())
    }

    /// Declares the track set complete; the count is reported once per change.
    pub fn end_tracks(&mut self) {
        let count = self.table.slots.len();
        if self.table.reported_count != Some(count) {
            self.table.reported_count = Some(count);
            tracing::debug!(count, "track set complete");
            self.sink.on_track_count_found(count);
        }
    }

    pub fn tracks_ended(&self) -> bool {
        self.table.tracks_ended()
    }

    pub fn seek_map(&mut self, seek_map: SeekMap) {
        if self.table.seek_map.as_ref() == Some(&seek_map) {
            return;
        }
        tracing::debug!(
            seekable = seek_map.is_seekable(),
            duration_us = seek_map.duration_us(),
            strategy = seek_map.strategy(),
            "seek map"
        );
        self.sink.on_seek_map_found(&seek_map);
        self.table.seek_map = Some(seek_map);
    }

    pub fn has_seek_map(&self) -> bool {
        self.table.has_seek_map()
    }

    pub fn sample_data(&mut self, track: TrackId, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        if let Some(slot) = self.table.slots.get_mut(track.0) {
            slot.pending += data.len();
            self.sink.on_sample_data_found(track.0, data);
        }
    }

    /// Frames the last `size + offset` pending bytes as one sample.
    pub fn sample_metadata(
        &mut self,
        track: TrackId,
        time_us: i64,
        mut flags: SampleFlags,
        size: usize,
        offset: usize,
        crypto: Option<CryptoInfo>,
    ) -> Result<()> {
        let slot = self
            .table
            .slots
            .get_mut(track.0)
            .ok_or_else(|| Error::parsing(format!("sample for unregistered track {}", track.0)))?;
        if size + offset > slot.pending {
            return Err(Error::parsing(format!(
                "sample of {size} bytes (offset {offset}) exceeds the {} pending bytes of track {}",
                slot.pending, track.0
            )));
        }
        let crypto = match crypto {
            Some(mut info) => {
                info.reconcile(size)?;
                if !self.in_band_crypto {
                    info.key_id = None;
                }
                flags.insert(SampleFlags::ENCRYPTED);
                Some(info)
            }
            None => {
                flags.remove(SampleFlags::ENCRYPTED);
                None
            }
        };
        slot.pending -= size + offset;
        slot.pending += offset;
        self.sink
            .on_sample_completed(track.0, time_us, flags, size, offset, crypto.as_ref());
        Ok(())
    }

    /// Emits `data` as one complete sample.
    pub fn sample(
        &mut self,
        track: TrackId,
        time_us: i64,
        flags: SampleFlags,
        data: &[u8],
        crypto: Option<CryptoInfo>,
    ) -> Result<()> {
        self.sample_data(track, data);
        self.sample_metadata(track, time_us, flags, data.len(), 0, crypto)
    }
}

/// One completed sample captured by [`CapturingSink`].
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedSample {
    pub track_index: usize,
    pub time_us: i64,
    pub flags: SampleFlags,
    pub size: usize,
    /// Sample bytes, empty when the sink only records metadata.
    pub data: Bytes,
    pub crypto: Option<CryptoInfo>,
}

/// Ready-made sink that accumulates every event.
#[derive(Debug, Default)]
pub struct CapturingSink {
    pub seek_maps: Vec<SeekMap>,
    pub track_count: Option<usize>,
    pub tracks: Vec<Option<TrackData>>,
    pub samples: Vec<CapturedSample>,
    pending: Vec<Vec<u8>>,
    pending_len: Vec<usize>,
    metadata_only: bool,
}

impl CapturingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink that records sample sizes but drops their bytes.
    pub fn metadata_only() -> Self {
        Self {
            metadata_only: true,
            ..Self::default()
        }
    }

    pub fn seek_map(&self) -> Option<&SeekMap> {
        self.seek_maps.last()
    }

    pub fn track(&self, index: usize) -> Option<&TrackData> {
        self.tracks.get(index).and_then(Option::as_ref)
    }

    pub fn samples_for(&self, track_index: usize) -> impl Iterator<Item = &CapturedSample> {
        self.samples.iter().filter(move |s| s.track_index == track_index)
    }

    /// Forgets captured samples and partial data, keeping tracks and seek maps.
    pub fn clear_samples(&mut self) {
        self.samples.clear();
        self.pending.iter_mut().for_each(Vec::clear);
        self.pending_len.iter_mut().for_each(|n| *n = 0);
    }

    fn ensure(&mut self, track_index: usize) {
        if self.pending.len() <= track_index {
            self.pending.resize_with(track_index + 1, Vec::new);
            self.pending_len.resize(track_index + 1, 0);
        }
    }
}

impl OutputSink for CapturingSink {
    fn on_seek_map_found(&mut self, seek_map: &SeekMap) {
        self.seek_maps.push(seek_map.clone());
    }

    fn on_track_count_found(&mut self, count: usize) {
        self.track_count = Some(count);
    }

    fn on_track_data_found(&mut self, track_index: usize, data: &TrackData) {
        if self.tracks.len() <= track_index {
            self.tracks.resize(track_index + 1, None);
        }
        self.tracks[track_index] = Some(data.clone());
    }

    fn on_sample_data_found(&mut self, track_index: usize, data: &[u8]) {
        self.ensure(track_index);
        self.pending_len[track_index] += data.len();
        if !self.metadata_only {
            self.pending[track_index].extend_from_slice(data);
        }
    }

    fn on_sample_completed(
        &mut self,
        track_index: usize,
        time_us: i64,
        flags: SampleFlags,
        size: usize,
        offset: usize,
        crypto: Option<&CryptoInfo>,
    ) {
        self.ensure(track_index);
        let available = self.pending_len[track_index];
        let end = available.saturating_sub(offset);
        let start = end.saturating_sub(size);
        let data = if self.metadata_only {
            Bytes::new()
        } else {
            let pending = &mut self.pending[track_index];
            let data = Bytes::copy_from_slice(&pending[start..end]);
            pending.drain(..end);
            data
        };
        self.pending_len[track_index] = available - end;
        self.samples.push(CapturedSample {
            track_index,
            time_us,
            flags,
            size,
            data,
            crypto: crypto.cloned(),
        });
    }
}
