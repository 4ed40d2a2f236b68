//! Sample tables of unfragmented tracks.
//!
//! - stts: sample durations (decoding time)
//! - stss: sync samples
//! - stsc: sample-to-chunk mapping
//! - stsz/stz2: sample sizes
//! - stco/co64: chunk offsets
//! - ctts: composition time offsets

use super::boxes::{full_box, BoxType, ChildBox};
use crate::error::{Error, Result};

/// Upper bound on entries accepted from a single table.
const MAX_ENTRIES: usize = 16 * 1024 * 1024;

/// A resolved sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SampleEntry {
    /// File offset of the first sample byte.
    pub offset: u64,
    pub size: u32,
    /// Decode timestamp in the media timescale.
    pub dts: u64,
    pub cts_offset: i32,
    pub is_keyframe: bool,
    /// Chunk the sample was stored in (0-based).
    pub chunk: u32,
}

impl SampleEntry {
    pub fn pts(&self) -> i64 {
        self.dts as i64 + i64::from(self.cts_offset)
    }
}

#[derive(Debug, Clone, Default)]
pub(crate) struct SampleTable {
    pub samples: Vec<SampleEntry>,
}

impl SampleTable {
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Sync sample at or before `dts`, else the first sync sample after it.
    pub fn sync_index_for(&self, pts: i64) -> Option<usize> {
        let at_or_before = self
            .samples
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_keyframe && s.pts() <= pts)
            .map(|(i, _)| i)
            .last();
        at_or_before.or_else(|| self.samples.iter().position(|s| s.is_keyframe))
    }
}

fn entry_count(count: u32, entry_len: usize, available: usize) -> Result<usize> {
    let count = count as usize;
    if count > MAX_ENTRIES || count.saturating_mul(entry_len) > available {
        return Err(Error::parsing(format!(
            "table declares {count} entries but holds {available} bytes"
        )));
    }
    Ok(count)
}

/// Collects the raw tables of one `stbl` and resolves them into samples.
#[derive(Debug, Default)]
pub(crate) struct SampleTableBuilder {
    stts_entries: Vec<(u32, u32)>,
    sync_samples: Option<Vec<u32>>,
    stsc_entries: Vec<(u32, u32)>,
    uniform_size: u32,
    sample_sizes: Vec<u32>,
    sample_count: u32,
    chunk_offsets: Vec<u64>,
    ctts_entries: Vec<(u32, i32)>,
}

impl SampleTableBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one child of `stbl`. Unrelated boxes are ignored.
    pub fn add(&mut self, child: &ChildBox<'_>) -> Result<()> {
        match child.box_type {
            BoxType::STTS => self.parse_stts(child.body),
            BoxType::STSS => self.parse_stss(child.body),
            BoxType::STSC => self.parse_stsc(child.body),
            BoxType::STSZ => self.parse_stsz(child.body),
            BoxType::STZ2 => self.parse_stz2(child.body),
            BoxType::STCO => self.parse_chunk_offsets(child.body, false),
            BoxType::CO64 => self.parse_chunk_offsets(child.body, true),
            BoxType::CTTS => self.parse_ctts(child.body),
            _ => Ok(()),
        }
    }

    fn parse_stts(&mut self, body: &[u8]) -> Result<()> {
        let (_, _, mut c) = full_box(body)?;
        let n = entry_count(c.read_u32()?, 8, c.remaining())?;
        self.stts_entries = (0..n)
            .map(|_| Ok((c.read_u32()?, c.read_u32()?)))
            .collect::<Result<_>>()?;
        Ok(())
    }

    fn parse_stss(&mut self, body: &[u8]) -> Result<()> {
        let (_, _, mut c) = full_box(body)?;
        let n = entry_count(c.read_u32()?, 4, c.remaining())?;
        self.sync_samples = Some((0..n).map(|_| c.read_u32()).collect::<Result<_>>()?);
        Ok(())
    }

    fn parse_stsc(&mut self, body: &[u8]) -> Result<()> {
        let (_, _, mut c) = full_box(body)?;
        let n = entry_count(c.read_u32()?, 12, c.remaining())?;
        self.stsc_entries = (0..n)
            .map(|_| {
                let first_chunk = c.read_u32()?;
                let samples_per_chunk = c.read_u32()?;
                c.skip(4)?;
                Ok((first_chunk, samples_per_chunk))
            })
            .collect::<Result<_>>()?;
        Ok(())
    }

    fn parse_stsz(&mut self, body: &[u8]) -> Result<()> {
        let (_, _, mut c) = full_box(body)?;
        self.uniform_size = c.read_u32()?;
        self.sample_count = c.read_u32()?;
        if self.uniform_size == 0 {
            let n = entry_count(self.sample_count, 4, c.remaining())?;
            self.sample_sizes = (0..n).map(|_| c.read_u32()).collect::<Result<_>>()?;
        } else {
            entry_count(self.sample_count, 0, 0)?;
        }
        Ok(())
    }

    fn parse_stz2(&mut self, body: &[u8]) -> Result<()> {
        let (_, _, mut c) = full_box(body)?;
        c.skip(3)?;
        let field_size = c.read_u8()?;
        let count = c.read_u32()?;
        let bits = usize::from(field_size);
        let n = entry_count(count, 1, c.remaining().saturating_mul(8) / bits.max(1))?;
        let packed = c.rest();
        self.sample_sizes = match field_size {
            4 => (0..n)
                .map(|i| {
                    let byte = packed[i / 2];
                    u32::from(if i % 2 == 0 { byte >> 4 } else { byte & 0x0F })
                })
                .collect(),
            8 => packed[..n].iter().map(|&b| u32::from(b)).collect(),
            16 => (0..n).map(|i| u32::from(crate::util::be_u16(packed, i * 2))).collect(),
            other => return Err(Error::parsing(format!("stz2 field size {other}"))),
        };
        self.uniform_size = 0;
        self.sample_count = count;
        Ok(())
    }

    fn parse_chunk_offsets(&mut self, body: &[u8], wide: bool) -> Result<()> {
        let (_, _, mut c) = full_box(body)?;
        let n = entry_count(c.read_u32()?, if wide { 8 } else { 4 }, c.remaining())?;
        self.chunk_offsets = (0..n).map(|_| c.read_u32_or_u64(wide)).collect::<Result<_>>()?;
        Ok(())
    }

    fn parse_ctts(&mut self, body: &[u8]) -> Result<()> {
        let (_, _, mut c) = full_box(body)?;
        let n = entry_count(c.read_u32()?, 8, c.remaining())?;
        // Version 0 offsets are nominally unsigned but written signed in practice.
        self.ctts_entries = (0..n)
            .map(|_| Ok((c.read_u32()?, c.read_i32()?)))
            .collect::<Result<_>>()?;
        Ok(())
    }

    /// Resolves every sample. Tables that disagree on the sample count are
    /// truncated to the shortest consistent prefix.
    pub fn build(self) -> Result<SampleTable> {
        let sample_count = self.sample_count as usize;
        if sample_count == 0 {
            return Ok(SampleTable::default());
        }
        if self.chunk_offsets.is_empty() || self.stsc_entries.is_empty() {
            return Err(Error::parsing("sample table without chunk layout"));
        }
        let chunks = self.resolve_sample_chunks(sample_count);
        let mut dts_values = self.resolve_timestamps(sample_count);
        let mut cts_iter = self
            .ctts_entries
            .iter()
            .flat_map(|&(count, offset)| std::iter::repeat(offset).take(count as usize));

        let mut samples = Vec::with_capacity(chunks.len());
        let mut current_chunk = u32::MAX;
        let mut offset = 0u64;
        for (i, &chunk) in chunks.iter().enumerate() {
            if chunk != current_chunk {
                current_chunk = chunk;
                offset = self.chunk_offsets[chunk as usize];
            }
            let size = if self.uniform_size > 0 {
                self.uniform_size
            } else {
                self.sample_sizes.get(i).copied().unwrap_or(0)
            };
            let is_keyframe = match &self.sync_samples {
                // No stss means every sample is a sync sample.
                None => true,
                Some(sync) => sync.binary_search(&(i as u32 + 1)).is_ok(),
            };
            samples.push(SampleEntry {
                offset,
                size,
                dts: dts_values.next().unwrap_or(0),
                cts_offset: cts_iter.next().unwrap_or(0),
                is_keyframe,
                chunk,
            });
            offset += u64::from(size);
        }
        if samples.len() < sample_count {
            tracing::warn!(
                declared = sample_count,
                resolved = samples.len(),
                "sample table truncated by chunk layout"
            );
        }
        Ok(SampleTable { samples })
    }

    fn resolve_sample_chunks(&self, sample_count: usize) -> Vec<u32> {
        let mut result = Vec::with_capacity(sample_count);
        let num_chunks = self.chunk_offsets.len() as u32;
        for (i, &(first_chunk, samples_per_chunk)) in self.stsc_entries.iter().enumerate() {
            let next_first = self
                .stsc_entries
                .get(i + 1)
                .map_or(num_chunks + 1, |next| next.0);
            for chunk in first_chunk.max(1)..next_first.min(num_chunks + 1) {
                for _ in 0..samples_per_chunk {
                    if result.len() == sample_count {
                        return result;
                    }
                    result.push(chunk - 1);
                }
            }
        }
        result
    }

    fn resolve_timestamps(&self, sample_count: usize) -> impl Iterator<Item = u64> + '_ {
        let last_delta = self.stts_entries.last().map_or(0, |e| e.1);
        let deltas = self
            .stts_entries
            .iter()
            .flat_map(|&(count, delta)| std::iter::repeat(delta).take(count as usize))
            .chain(std::iter::repeat(last_delta))
            .take(sample_count);
        deltas.scan(0u64, |dts, delta| {
            let current = *dts;
            *dts += u64::from(delta);
            Some(current)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(box_type: BoxType, body: &[u8]) -> ChildBox<'_> {
        ChildBox {
            box_type,
            offset: 0,
            body,
        }
    }

    fn words(values: &[u32]) -> Vec<u8> {
        let mut out = vec![0, 0, 0, 0];
        for v in values {
            out.extend_from_slice(&v.to_be_bytes());
        }
        out
    }

    #[test]
    fn test_sample_table_builder() {
        let mut builder = SampleTableBuilder::new();
        builder.add(&table(BoxType::STTS, &words(&[1, 3, 1000]))).unwrap();
        builder.add(&table(BoxType::STSS, &words(&[1, 1]))).unwrap();
        builder.add(&table(BoxType::STSC, &words(&[1, 1, 3, 1]))).unwrap();
        builder.add(&table(BoxType::STSZ, &words(&[0, 3, 100, 200, 150]))).unwrap();
        builder.add(&table(BoxType::STCO, &words(&[1, 1000]))).unwrap();
        let table = builder.build().unwrap();

        assert_eq!(table.len(), 3);
        assert_eq!(table.samples[0].offset, 1000);
        assert!(table.samples[0].is_keyframe);
        assert_eq!(table.samples[1].offset, 1100);
        assert_eq!(table.samples[1].dts, 1000);
        assert!(!table.samples[1].is_keyframe);
        assert_eq!(table.samples[2].offset, 1300);
    }

    #[test]
    fn test_chunks_and_composition_offsets() {
        let mut builder = SampleTableBuilder::new();
        builder.add(&table(BoxType::STTS, &words(&[1, 4, 10]))).unwrap();
        builder.add(&table(BoxType::STSC, &words(&[1, 1, 2, 1]))).unwrap();
        builder.add(&table(BoxType::STSZ, &words(&[5, 4]))).unwrap();
        builder.add(&table(BoxType::STCO, &words(&[2, 100, 500]))).unwrap();
        builder.add(&table(BoxType::CTTS, &words(&[2, 1, 20, 1, 0xFFFF_FFF6]))).unwrap();
        let table = builder.build().unwrap();

        let offsets: Vec<_> = table.samples.iter().map(|s| s.offset).collect();
        assert_eq!(offsets, vec![100, 105, 500, 505]);
        assert_eq!(table.samples[0].pts(), 20);
        assert_eq!(table.samples[1].pts(), 0);
        assert_eq!(table.samples[3].pts(), 30);
    }

    #[test]
    fn test_sync_lookup() {
        let mut builder = SampleTableBuilder::new();
        builder.add(&table(BoxType::STTS, &words(&[1, 10, 1000]))).unwrap();
        builder.add(&table(BoxType::STSS, &words(&[3, 1, 5, 9]))).unwrap();
        builder.add(&table(BoxType::STSC, &words(&[1, 1, 10, 1]))).unwrap();
        builder.add(&table(BoxType::STSZ, &words(&[100, 10]))).unwrap();
        builder.add(&table(BoxType::STCO, &words(&[1, 0]))).unwrap();
        let table = builder.build().unwrap();

        assert_eq!(table.sync_index_for(0), Some(0));
        assert_eq!(table.sync_index_for(3_500), Some(0));
        assert_eq!(table.sync_index_for(4_000), Some(4));
        assert_eq!(table.sync_index_for(99_000), Some(8));
    }

    #[test]
    fn test_rejects_oversized_count() {
        let mut builder = SampleTableBuilder::new();
        assert!(builder.add(&table(BoxType::STSZ, &words(&[0, 1_000, 1]))).is_err());
        assert!(builder.add(&table(BoxType::STSZ, &words(&[4, u32::MAX]))).is_err());
    }
}
