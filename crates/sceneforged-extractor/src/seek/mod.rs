//! Seek maps: time to byte-position lookups surfaced to the caller.
//!
//! Every extractor emits one [`SeekMap`] once duration and seekability are
//! known. The caller asks it for the seek points around a target time,
//! repositions the input at one of them and calls `seek` on the session.

mod binary;
mod cbr;
mod index;
mod toc;

pub(crate) use binary::{BinarySearch, TimestampProbe, TimestampSearch};
pub(crate) use cbr::ConstantBitrateSeekMap;
pub(crate) use index::IndexSeekMap;
pub(crate) use toc::TocSeekMap;

use binary::BinarySearchSeekMap;

/// A resumable `(time, byte position)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub struct SeekPoint {
    pub time_us: i64,
    pub position: u64,
}

impl SeekPoint {
    /// The start of the stream.
    pub const START: SeekPoint = SeekPoint {
        time_us: 0,
        position: 0,
    };

    pub const fn new(time_us: i64, position: u64) -> Self {
        Self { time_us, position }
    }
}

/// The seek points bracketing a target time.
///
/// `first` is at or before the target and `second` at or after it. Both are
/// the same point when the target hits an indexed point exactly or the map
/// cannot do better.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub struct SeekPoints {
    pub first: SeekPoint,
    pub second: SeekPoint,
}

impl SeekPoints {
    pub const fn single(point: SeekPoint) -> Self {
        Self {
            first: point,
            second: point,
        }
    }

    pub const fn pair(first: SeekPoint, second: SeekPoint) -> Self {
        Self { first, second }
    }
}

/// Fixed-size blocks starting at a known offset, as in WAV data chunks.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct BlockSeekMap {
    pub first_block_position: u64,
    pub block_size: u64,
    pub block_count: u64,
    pub frames_per_block: u64,
    pub frame_rate: u64,
}

impl BlockSeekMap {
    fn block_time_us(&self, block: u64) -> i64 {
        (u128::from(block * self.frames_per_block) * 1_000_000 / u128::from(self.frame_rate.max(1)))
            as i64
    }

    fn duration_us(&self) -> i64 {
        self.block_time_us(self.block_count)
    }

    fn point(&self, block: u64) -> SeekPoint {
        SeekPoint::new(
            self.block_time_us(block),
            self.first_block_position + block * self.block_size,
        )
    }

    fn seek_points(&self, time_us: i64) -> SeekPoints {
        let last = self.block_count.saturating_sub(1);
        let block = (u128::from(time_us.max(0) as u64) * u128::from(self.frame_rate)
            / (1_000_000 * u128::from(self.frames_per_block.max(1))))
        .min(u128::from(last)) as u64;
        let first = self.point(block);
        if first.time_us >= time_us || block == last {
            SeekPoints::single(first)
        } else {
            SeekPoints::pair(first, self.point(block + 1))
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Kind {
    Unseekable { start_position: u64 },
    Index(IndexSeekMap),
    ConstantBitrate(ConstantBitrateSeekMap),
    Toc(TocSeekMap),
    Blocks(BlockSeekMap),
    BinarySearch(BinarySearchSeekMap),
}

/// Seekability, duration and time-to-position lookup for one stream.
#[derive(Debug, Clone, PartialEq)]
pub struct SeekMap {
    duration_us: Option<i64>,
    kind: Kind,
}

impl SeekMap {
    /// A map that only allows restarting from the beginning.
    pub fn unseekable(duration_us: Option<i64>) -> Self {
        Self::unseekable_from(duration_us, 0)
    }

    /// Like [`SeekMap::unseekable`] but restarting at `start_position`.
    pub fn unseekable_from(duration_us: Option<i64>, start_position: u64) -> Self {
        Self {
            duration_us,
            kind: Kind::Unseekable { start_position },
        }
    }

    pub(crate) fn index(index: IndexSeekMap) -> Self {
        if index.is_empty() {
            return Self::unseekable(index.duration_us());
        }
        Self {
            duration_us: index.duration_us(),
            kind: Kind::Index(index),
        }
    }

    pub(crate) fn constant_bitrate(map: ConstantBitrateSeekMap) -> Self {
        match map.duration_us() {
            Some(duration_us) => Self {
                duration_us: Some(duration_us),
                kind: Kind::ConstantBitrate(map),
            },
            None => Self::unseekable_from(None, map.first_frame_position()),
        }
    }

    pub(crate) fn toc(map: TocSeekMap) -> Self {
        Self {
            duration_us: Some(map.duration_us()),
            kind: Kind::Toc(map),
        }
    }

    pub(crate) fn blocks(map: BlockSeekMap) -> Self {
        Self {
            duration_us: Some(map.duration_us()),
            kind: Kind::Blocks(map),
        }
    }

    /// Map for streams located by bisection; positions it reports are
    /// estimates that the extractor refines when `seek` is called.
    pub(crate) fn binary_search(duration_us: i64, data_start: u64, data_end: u64) -> Self {
        Self {
            duration_us: Some(duration_us),
            kind: Kind::BinarySearch(BinarySearchSeekMap {
                duration_us,
                data_start,
                data_end,
            }),
        }
    }

    pub fn is_seekable(&self) -> bool {
        !matches!(self.kind, Kind::Unseekable { .. })
    }

    /// Total duration, `None` when unknown.
    pub fn duration_us(&self) -> Option<i64> {
        self.duration_us
    }

    /// Short label of the strategy behind this map.
    pub fn strategy(&self) -> &'static str {
        match self.kind {
            Kind::Unseekable { .. } => "unseekable",
            Kind::Index(_) => "index",
            Kind::ConstantBitrate(_) => "constant-bitrate",
            Kind::Toc(_) => "table-of-contents",
            Kind::Blocks(_) => "fixed-blocks",
            Kind::BinarySearch(_) => "binary-search",
        }
    }

    /// Seek points around `time_us`.
    pub fn seek_points(&self, time_us: i64) -> SeekPoints {
        match &self.kind {
            Kind::Unseekable { start_position } => {
                SeekPoints::single(SeekPoint::new(0, *start_position))
            }
            Kind::Index(map) => map.seek_points(time_us),
            Kind::ConstantBitrate(map) => map.seek_points(time_us),
            Kind::Toc(map) => map.seek_points(time_us),
            Kind::Blocks(map) => map.seek_points(time_us),
            Kind::BinarySearch(map) => map.seek_points(time_us),
        }
    }
}

/// `value * multiplier / divisor` without intermediate overflow.
pub(crate) fn scale(value: i64, multiplier: i64, divisor: i64) -> i64 {
    if divisor == 0 {
        return 0;
    }
    (i128::from(value) * i128::from(multiplier) / i128::from(divisor)) as i64
}
