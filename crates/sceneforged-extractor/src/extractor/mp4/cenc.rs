//! Common-encryption auxiliary information: `senc`, `saiz`, `saio` and
//! `pssh`.

use bytes::{BufMut, Bytes, BytesMut};

use super::boxes::full_box;
use super::stsd::TrackEncryption;
use super::MAX_FRAGMENT_SAMPLES;
use crate::error::{Error, Result};
use crate::sample::{CryptoInfo, Subsample};
use crate::track::SchemeData;
use crate::util::cursor::ByteCursor;

/// Per-sample IV and subsample layout before it is bound to a sample size.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct SampleAuxInfo {
    pub iv: Vec<u8>,
    pub subsamples: Vec<Subsample>,
    /// Key id overriding the track default, from a `senc` override.
    pub key_id: Option<[u8; 16]>,
}

/// Sizes of the per-sample auxiliary records, from `saiz`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct AuxSizes {
    pub default_size: u8,
    pub sizes: Vec<u8>,
    pub count: u32,
}

impl AuxSizes {
    pub fn size_of(&self, sample: usize) -> usize {
        if self.default_size > 0 {
            usize::from(self.default_size)
        } else {
            self.sizes.get(sample).copied().map_or(0, usize::from)
        }
    }

    pub fn total(&self) -> usize {
        if self.default_size > 0 {
            self.count as usize * usize::from(self.default_size)
        } else {
            self.sizes.iter().map(|&s| usize::from(s)).sum()
        }
    }
}

pub(crate) fn parse_saiz(body: &[u8]) -> Result<AuxSizes> {
    let (_, flags, mut c) = full_box(body)?;
    if flags & 1 != 0 {
        c.skip(8)?;
    }
    let default_size = c.read_u8()?;
    let count = c.read_u32()?;
    if count as usize > MAX_FRAGMENT_SAMPLES {
        return Err(Error::parsing(format!("saiz declares {count} records")));
    }
    let sizes = if default_size == 0 {
        c.read_bytes(count as usize)?.to_vec()
    } else {
        Vec::new()
    };
    Ok(AuxSizes {
        default_size,
        sizes,
        count,
    })
}

pub(crate) fn parse_saio(body: &[u8]) -> Result<Vec<u64>> {
    let (version, flags, mut c) = full_box(body)?;
    if flags & 1 != 0 {
        c.skip(8)?;
    }
    let count = c.read_u32()? as usize;
    if count.saturating_mul(if version == 0 { 4 } else { 8 }) > c.remaining() {
        return Err(Error::parsing(format!("saio declares {count} offsets")));
    }
    (0..count).map(|_| c.read_u32_or_u64(version != 0)).collect()
}

/// Reads one auxiliary record: the IV, then a subsample table when the
/// record is longer than the IV or `subsamples` is set.
fn read_record(c: &mut ByteCursor<'_>, iv_size: usize, subsamples: bool) -> Result<SampleAuxInfo> {
    let iv = c.read_bytes(iv_size)?.to_vec();
    let mut layout = Vec::new();
    if subsamples {
        let count = c.read_u16()?;
        for _ in 0..count {
            let clear = u32::from(c.read_u16()?);
            let encrypted = c.read_u32()?;
            layout.push(Subsample::new(clear, encrypted));
        }
    }
    Ok(SampleAuxInfo {
        iv,
        subsamples: layout,
        key_id: None,
    })
}

/// Parses a `senc` body.
pub(crate) fn parse_senc(body: &[u8], iv_size: u8) -> Result<Vec<SampleAuxInfo>> {
    let (_, flags, mut c) = full_box(body)?;
    let mut iv_size = usize::from(iv_size);
    let mut key_id = None;
    if flags & 1 != 0 {
        // Override of the track defaults: algorithm, IV size and key id.
        c.skip(3)?;
        iv_size = usize::from(c.read_u8()?);
        let mut kid = [0u8; 16];
        kid.copy_from_slice(c.read_bytes(16)?);
        key_id = Some(kid);
    }
    let subsamples = flags & 2 != 0;
    let count = c.read_u32()? as usize;
    let record_len = iv_size + if subsamples { 2 } else { 0 };
    let fits = match record_len {
        0 => count <= MAX_FRAGMENT_SAMPLES,
        len => count.saturating_mul(len) <= c.remaining(),
    };
    if !fits {
        return Err(Error::parsing(format!("senc declares {count} records")));
    }
    (0..count)
        .map(|_| {
            let mut record = read_record(&mut c, iv_size, subsamples)?;
            record.key_id = key_id;
            Ok(record)
        })
        .collect()
}

/// Parses one record located through `saiz`/`saio`.
pub(crate) fn parse_aux_record(record: &[u8], iv_size: u8) -> Result<SampleAuxInfo> {
    let iv_size = usize::from(iv_size).min(record.len());
    read_record(&mut ByteCursor::new(record), iv_size, record.len() > iv_size)
}

/// Parses consecutive records located through `saiz`/`saio`.
pub(crate) fn parse_aux_records(data: &[u8], sizes: &AuxSizes, iv_size: u8) -> Result<Vec<SampleAuxInfo>> {
    let mut c = ByteCursor::new(data);
    (0..sizes.count as usize)
        .map(|i| parse_aux_record(c.read_bytes(sizes.size_of(i))?, iv_size))
        .collect()
}

/// Binds auxiliary info (or the track's constant IV) to a sample.
///
/// A protected sample with neither a per-sample IV nor a constant IV is
/// malformed.
pub(crate) fn crypto_info(
    encryption: &TrackEncryption,
    aux: Option<&SampleAuxInfo>,
    sample_size: usize,
) -> Result<Option<CryptoInfo>> {
    if !encryption.is_protected {
        return Ok(None);
    }
    let iv = match (aux, encryption.constant_iv) {
        (Some(aux), _) if !aux.iv.is_empty() => CryptoInfo::iv_from(&aux.iv),
        (_, Some(iv)) => iv,
        (_, None) => return Err(Error::parsing("protected sample without an IV")),
    };
    let subsamples = match aux {
        Some(aux) if !aux.subsamples.is_empty() => aux.subsamples.clone(),
        _ => vec![Subsample::new(0, sample_size as u32)],
    };
    Ok(Some(CryptoInfo {
        mode: encryption.mode,
        key_id: Some(aux.and_then(|a| a.key_id).unwrap_or(encryption.key_id)),
        iv,
        subsamples,
        pattern: encryption.pattern,
    }))
}

/// Rebuilds a full `pssh` box from its body and wraps it as scheme data.
pub(crate) fn parse_pssh(body: &[u8]) -> Result<SchemeData> {
    let (_, _, mut c) = full_box(body)?;
    let mut uuid = [0u8; 16];
    uuid.copy_from_slice(c.read_bytes(16)?);
    let mut data = BytesMut::with_capacity(body.len() + 8);
    data.put_u32(body.len() as u32 + 8);
    data.put_slice(b"pssh");
    data.put_slice(body);
    Ok(SchemeData {
        uuid,
        mime_type: "video/mp4".to_string(),
        data: Bytes::from(data),
    })
}
