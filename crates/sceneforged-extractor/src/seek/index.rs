use super::{SeekPoint, SeekPoints};

/// Sorted table of `(time, position)` seek points.
///
/// Used for container indices (MP4 sync samples, Matroska cues, `sidx`,
/// FLAC seek tables, VBRI) and for indices built while scanning.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct IndexSeekMap {
    times_us: Vec<i64>,
    positions: Vec<u64>,
    duration_us: Option<i64>,
}

impl IndexSeekMap {
    pub fn new(duration_us: Option<i64>) -> Self {
        Self {
            duration_us,
            ..Self::default()
        }
    }

    /// Appends a point. Points that would break strict time order or
    /// non-decreasing position order are dropped.
    pub fn push(&mut self, time_us: i64, position: u64) -> bool {
        if let (Some(&last_time), Some(&last_position)) = (self.times_us.last(), self.positions.last())
        {
            if time_us <= last_time || position < last_position {
                tracing::trace!(time_us, position, "dropping out-of-order seek point");
                return false;
            }
        }
        self.times_us.push(time_us);
        self.positions.push(position);
        true
    }

    pub fn set_duration_us(&mut self, duration_us: Option<i64>) {
        self.duration_us = duration_us;
    }

    pub fn duration_us(&self) -> Option<i64> {
        self.duration_us
    }

    pub fn len(&self) -> usize {
        self.times_us.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times_us.is_empty()
    }

    /// Time of the last point, if any.
    pub fn last_time_us(&self) -> Option<i64> {
        self.times_us.last().copied()
    }

    fn point(&self, i: usize) -> SeekPoint {
        SeekPoint::new(self.times_us[i], self.positions[i])
    }

    pub fn seek_points(&self, time_us: i64) -> SeekPoints {
        if self.is_empty() {
            return SeekPoints::single(SeekPoint::START);
        }
        let floor = match self.times_us.binary_search(&time_us) {
            Ok(i) => return SeekPoints::single(self.point(i)),
            Err(0) => return SeekPoints::single(self.point(0)),
            Err(i) => i - 1,
        };
        if floor + 1 == self.len() {
            SeekPoints::single(self.point(floor))
        } else {
            SeekPoints::pair(self.point(floor), self.point(floor + 1))
        }
    }
}
