use super::{SeekPoint, SeekPoints};
use crate::error::Result;
use crate::input::ExtractorInput;

/// Approximate map for formats located by bisection (TS, PS, Ogg, FLAC
/// without a seek table).
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct BinarySearchSeekMap {
    pub duration_us: i64,
    pub data_start: u64,
    pub data_end: u64,
}

impl BinarySearchSeekMap {
    pub fn seek_points(&self, time_us: i64) -> SeekPoints {
        if time_us <= 0 || self.duration_us <= 0 {
            return SeekPoints::single(SeekPoint::new(0, self.data_start));
        }
        let span = self.data_end.saturating_sub(self.data_start);
        let offset = (u128::from(span) * time_us.min(self.duration_us) as u128
            / self.duration_us as u128) as u64;
        SeekPoints::single(SeekPoint::new(time_us, self.data_start + offset))
    }
}

/// Result of probing the stream for timestamps near a byte position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TimestampSearch {
    /// The first timestamp found is past the target.
    Overestimated { time_us: i64, position: u64 },
    /// Every timestamp found is before the target; `position` is the byte
    /// after the last one inspected.
    Underestimated { time_us: i64, position: u64 },
    /// Resume reading at `position`.
    Found { position: u64 },
    /// Nothing timestamped in the probed window.
    NoTimestamp,
}

/// Format-specific timestamp probe driven by [`BinarySearch`].
pub(crate) trait TimestampProbe {
    /// Inspects a bounded window starting at the input's current position.
    fn search(&mut self, input: &mut dyn ExtractorInput, target_time_us: i64) -> Result<TimestampSearch>;
}

const MAX_ITERATIONS: u32 = 64;

/// Interpolating bisection over `[floor, ceiling)` byte ranges.
#[derive(Debug, Clone)]
pub(crate) struct BinarySearch {
    target_time_us: i64,
    floor_time_us: i64,
    ceiling_time_us: i64,
    floor_position: u64,
    ceiling_position: u64,
    min_range: u64,
}

impl BinarySearch {
    pub fn new(target_time_us: i64, duration_us: i64, data_start: u64, data_end: u64, min_range: u64) -> Self {
        Self {
            target_time_us,
            floor_time_us: 0,
            ceiling_time_us: duration_us.max(1),
            floor_position: data_start,
            ceiling_position: data_end,
            min_range,
        }
    }

    fn next_position(&self) -> u64 {
        if self.ceiling_position <= self.floor_position + 1 {
            return self.floor_position;
        }
        let span_time = (self.ceiling_time_us - self.floor_time_us).max(1) as i128;
        let span_bytes = (self.ceiling_position - self.floor_position) as i128;
        let offset = (i128::from(self.target_time_us - self.floor_time_us) * span_bytes / span_time)
            .clamp(0, span_bytes - 1);
        self.floor_position + offset as u64
    }

    /// Runs the search and leaves `input` at the byte to resume from, which
    /// is also returned.
    pub fn run(mut self, input: &mut dyn ExtractorInput, probe: &mut dyn TimestampProbe) -> Result<u64> {
        for iteration in 0..MAX_ITERATIONS {
            if self.ceiling_position.saturating_sub(self.floor_position) <= self.min_range {
                break;
            }
            let position = self.next_position();
            input.seek_to_position(position)?;
            match probe.search(input, self.target_time_us)? {
                TimestampSearch::Found { position } => {
                    tracing::trace!(iteration, position, "binary search found target");
                    input.seek_to_position(position)?;
                    return Ok(position);
                }
                TimestampSearch::Overestimated { time_us, position: found } => {
                    // Nothing starts between the probe and the first hit, so
                    // the target lies before the probe.
                    self.ceiling_time_us = time_us;
                    self.ceiling_position = found.min(position);
                }
                TimestampSearch::Underestimated { time_us, position } => {
                    if position <= self.floor_position {
                        break;
                    }
                    self.floor_time_us = time_us;
                    self.floor_position = position;
                }
                TimestampSearch::NoTimestamp => {
                    if position <= self.floor_position {
                        break;
                    }
                    self.ceiling_position = position;
                }
            }
        }
        tracing::trace!(position = self.floor_position, "binary search settled on floor");
        input.seek_to_position(self.floor_position)?;
        Ok(self.floor_position)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::SliceInput;

    /// One timestamp every 100 bytes, 1 ms apart.
    struct Ruler;

    impl TimestampProbe for Ruler {
        fn search(&mut self, input: &mut dyn ExtractorInput, target: i64) -> Result<TimestampSearch> {
            let aligned = input.position() / 100 * 100;
            let time = aligned as i64 * 10;
            if time > target {
                return Ok(TimestampSearch::Overestimated {
                    time_us: time,
                    position: aligned,
                });
            }
            if time + 1_000 > target {
                return Ok(TimestampSearch::Found { position: aligned });
            }
            Ok(TimestampSearch::Underestimated {
                time_us: time,
                position: aligned + 100,
            })
        }
    }

    #[test]
    fn test_converges_on_target() {
        let mut input = SliceInput::new(vec![0u8; 100_000]);
        let search = BinarySearch::new(420_500, 1_000_000, 0, 100_000, 0);
        let position = search.run(&mut input, &mut Ruler).unwrap();
        assert_eq!(position, 42_000);
        assert_eq!(input.position(), 42_000);
    }

    #[test]
    fn test_map_interpolates() {
        let map = BinarySearchSeekMap {
            duration_us: 1_000,
            data_start: 100,
            data_end: 1_100,
        };
        assert_eq!(map.seek_points(0).first.position, 100);
        assert_eq!(map.seek_points(500).first.position, 600);
    }
}
