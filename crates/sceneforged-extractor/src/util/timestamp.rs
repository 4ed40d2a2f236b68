//! 90 kHz MPEG timestamp handling.

/// MPEG system clock ticks per second for PTS/DTS/SCR bases.
pub(crate) const MPEG_CLOCK: i64 = 90_000;

const WRAP: i64 = 1 << 33;

pub(crate) fn pts_to_us(pts: i64) -> i64 {
    pts * 1_000_000 / MPEG_CLOCK
}

pub(crate) fn us_to_pts(us: i64) -> i64 {
    us * MPEG_CLOCK / 1_000_000
}

/// Maps 33-bit wrapping PTS values onto a monotonic microsecond timeline
/// that starts at zero with the first timestamp seen.
#[derive(Debug, Clone, Default)]
pub(crate) struct TimestampAdjuster {
    first_pts: Option<i64>,
    last_pts: Option<i64>,
}

impl TimestampAdjuster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pins the zero point explicitly, e.g. to the first PCR of the stream.
    pub fn set_origin(&mut self, pts: i64) {
        self.first_pts = Some(pts);
    }

    pub fn origin(&self) -> Option<i64> {
        self.first_pts
    }

    /// Unwraps a raw 33-bit timestamp against the last one seen and returns
    /// microseconds relative to the origin.
    pub fn adjust(&mut self, raw_pts: i64) -> i64 {
        let unwrapped = match self.last_pts {
            Some(last) => {
                let closest_wrap = (last + WRAP / 2).div_euclid(WRAP);
                let candidate = (closest_wrap - 1) * WRAP + raw_pts;
                let next = closest_wrap * WRAP + raw_pts;
                if (candidate - last).abs() < (next - last).abs() {
                    candidate
                } else {
                    next
                }
            }
            None => raw_pts,
        };
        self.last_pts = Some(unwrapped);
        let origin = *self.first_pts.get_or_insert(unwrapped);
        pts_to_us(unwrapped - origin)
    }

    /// Last adjusted time, used for section-based metadata without its own clock.
    pub fn last_time_us(&self) -> Option<i64> {
        match (self.first_pts, self.last_pts) {
            (Some(origin), Some(last)) => Some(pts_to_us(last - origin)),
            _ => None,
        }
    }

    /// Forgets wrap tracking after a seek while keeping the origin.
    pub fn reset_wrap(&mut self) {
        self.last_pts = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_timestamp_is_zero() {
        let mut adjuster = TimestampAdjuster::new();
        assert_eq!(adjuster.adjust(900_000), 0);
        assert_eq!(adjuster.adjust(990_000), 1_000_000);
    }

    #[test]
    fn test_unwraps_33_bit_rollover() {
        let mut adjuster = TimestampAdjuster::new();
        let near_end = WRAP - 9_000;
        assert_eq!(adjuster.adjust(near_end), 0);
        // 9000 ticks after the wrap point is 18000 ticks later.
        assert_eq!(adjuster.adjust(9_000), 200_000);
    }

    #[test]
    fn test_conversions() {
        assert_eq!(pts_to_us(90_000), 1_000_000);
        assert_eq!(us_to_pts(1_000_000), 90_000);
    }
}
