use super::{SeekPoint, SeekPoints};

/// Linear time/position mapping for constant-bitrate streams.
///
/// Positions are aligned to whole frames of `frame_size` bytes counted from
/// the first frame. Only seekable when the input length is known.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ConstantBitrateSeekMap {
    first_frame_position: u64,
    input_length: Option<u64>,
    bitrate: u32,
    frame_size: u32,
}

impl ConstantBitrateSeekMap {
    pub fn new(first_frame_position: u64, input_length: Option<u64>, bitrate: u32, frame_size: u32) -> Self {
        Self {
            first_frame_position,
            input_length: input_length.filter(|&len| len > first_frame_position),
            bitrate: bitrate.max(1),
            frame_size: frame_size.max(1),
        }
    }

    pub fn first_frame_position(&self) -> u64 {
        self.first_frame_position
    }

    fn data_size(&self) -> Option<u64> {
        self.input_length.map(|len| len - self.first_frame_position)
    }

    /// Stream duration derived from the data size, `None` if the length is unknown.
    pub fn duration_us(&self) -> Option<i64> {
        self.data_size().map(|size| self.time_us_at(self.first_frame_position + size))
    }

    /// Time at which the byte at `position` plays.
    pub fn time_us_at(&self, position: u64) -> i64 {
        let offset = position.saturating_sub(self.first_frame_position);
        (u128::from(offset) * 8 * 1_000_000 / u128::from(self.bitrate)) as i64
    }

    pub fn seek_points(&self, time_us: i64) -> SeekPoints {
        let Some(data_size) = self.data_size() else {
            return SeekPoints::single(SeekPoint::new(0, self.first_frame_position));
        };
        let frame_size = u64::from(self.frame_size);
        let raw = (u128::from(time_us.max(0) as u64) * u128::from(self.bitrate) / 8_000_000) as u64;
        let mut offset = raw / frame_size * frame_size;
        let last_frame = data_size.saturating_sub(frame_size) / frame_size * frame_size;
        offset = offset.min(last_frame);
        let position = self.first_frame_position + offset;
        let first = SeekPoint::new(self.time_us_at(position), position);
        let next = position + frame_size;
        if first.time_us >= time_us || next >= self.first_frame_position + data_size {
            return SeekPoints::single(first);
        }
        SeekPoints::pair(first, SeekPoint::new(self.time_us_at(next), next))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration_and_alignment() {
        // 128 kbit/s with 418-byte frames after a 10-byte header.
        let map = ConstantBitrateSeekMap::new(10, Some(10 + 16_000), 128_000, 418);
        assert_eq!(map.duration_us(), Some(1_000_000));
        let points = map.seek_points(500_000);
        assert_eq!((points.first.position - 10) % 418, 0);
        assert!(points.first.time_us <= 500_000);
        assert!(points.second.time_us >= 500_000);
    }

    #[test]
    fn test_unknown_length_is_start_only() {
        let map = ConstantBitrateSeekMap::new(10, None, 128_000, 418);
        assert_eq!(map.duration_us(), None);
        assert_eq!(map.seek_points(500_000).first.position, 10);
    }
}
