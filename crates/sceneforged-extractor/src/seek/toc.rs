use super::{SeekPoint, SeekPoints};

/// Xing/Info style seeker: a 100-entry table mapping percent of duration to
/// a 1/256 fraction of the data size.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct TocSeekMap {
    data_start: u64,
    header_frame_size: u64,
    data_size: u64,
    duration_us: i64,
    table: [u8; 100],
}

impl TocSeekMap {
    pub fn new(data_start: u64, header_frame_size: u64, data_size: u64, duration_us: i64, table: [u8; 100]) -> Self {
        Self {
            data_start,
            header_frame_size,
            data_size,
            duration_us,
            table,
        }
    }

    pub fn duration_us(&self) -> i64 {
        self.duration_us
    }

    pub fn seek_points(&self, time_us: i64) -> SeekPoints {
        if self.duration_us <= 0 {
            return SeekPoints::single(SeekPoint::new(0, self.data_start + self.header_frame_size));
        }
        let time_us = time_us.clamp(0, self.duration_us);
        let percent = time_us as f64 * 100.0 / self.duration_us as f64;
        let scaled = if percent <= 0.0 {
            0.0
        } else if percent >= 100.0 {
            256.0
        } else {
            let prev_index = percent as usize;
            let prev = f64::from(self.table[prev_index]);
            let next = if prev_index == 99 {
                256.0
            } else {
                f64::from(self.table[prev_index + 1])
            };
            prev + (percent - prev_index as f64) * (next - prev)
        };
        let offset = ((scaled / 256.0) * self.data_size as f64).round() as u64;
        let offset = offset.clamp(self.header_frame_size, self.data_size.saturating_sub(1).max(self.header_frame_size));
        SeekPoints::single(SeekPoint::new(time_us, self.data_start + offset))
    }
}
