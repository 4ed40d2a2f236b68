//! Per-sample flags and encryption metadata.

use std::fmt;
use std::ops::BitOr;

use crate::error::{Error, Result};

/// Bit set attached to every completed sample.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub struct SampleFlags(u32);

impl SampleFlags {
    pub const NONE: Self = Self(0);
    /// Sync sample, decodable without earlier samples.
    pub const KEY_FRAME: Self = Self(1);
    /// Sample data is laid out as `[u32 BE main size][main][supplemental]`.
    pub const HAS_SUPPLEMENTAL_DATA: Self = Self(1 << 28);
    /// Last sample of the stream, when the container says so.
    pub const LAST_SAMPLE: Self = Self(1 << 29);
    /// Sample carries [`CryptoInfo`].
    pub const ENCRYPTED: Self = Self(1 << 30);

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }

    pub const fn is_key_frame(self) -> bool {
        self.contains(Self::KEY_FRAME)
    }

    pub const fn is_encrypted(self) -> bool {
        self.contains(Self::ENCRYPTED)
    }

    /// Key frame flag when `key` holds, empty otherwise.
    pub const fn key_frame_if(key: bool) -> Self {
        if key {
            Self::KEY_FRAME
        } else {
            Self::NONE
        }
    }
}

impl BitOr for SampleFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Display for SampleFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names = Vec::new();
        if self.is_key_frame() {
            names.push("key");
        }
        if self.is_encrypted() {
            names.push("encrypted");
        }
        if self.contains(Self::HAS_SUPPLEMENTAL_DATA) {
            names.push("supplemental");
        }
        if self.contains(Self::LAST_SAMPLE) {
            names.push("last");
        }
        if names.is_empty() {
            f.write_str("-")
        } else {
            f.write_str(&names.join("|"))
        }
    }
}

/// Block cipher mode of an encrypted sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub enum CryptoMode {
    /// AES-CTR (`cenc`, `cens`, WebM).
    AesCtr,
    /// AES-CBC (`cbc1`, `cbcs`).
    AesCbc,
}

impl CryptoMode {
    /// Maps a common-encryption scheme type to its cipher mode.
    pub fn from_scheme(scheme: &str) -> Option<Self> {
        match scheme {
            "cenc" | "cens" => Some(Self::AesCtr),
            "cbc1" | "cbcs" => Some(Self::AesCbc),
            _ => None,
        }
    }
}

/// One clear run followed by one encrypted run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub struct Subsample {
    pub clear_bytes: u32,
    pub encrypted_bytes: u32,
}

impl Subsample {
    pub const fn new(clear_bytes: u32, encrypted_bytes: u32) -> Self {
        Self {
            clear_bytes,
            encrypted_bytes,
        }
    }
}

/// Pattern encryption (`cens`/`cbcs`): encrypt `crypt_blocks`, skip `skip_blocks`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub struct EncryptionPattern {
    pub crypt_blocks: u8,
    pub skip_blocks: u8,
}

/// Encryption metadata of one sample.
///
/// `key_id` is only populated for in-band delivery; out-of-band consumers
/// correlate keys through the track's DRM init data instead.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub struct CryptoInfo {
    pub mode: CryptoMode,
    pub key_id: Option<[u8; 16]>,
    pub iv: [u8; 16],
    pub subsamples: Vec<Subsample>,
    pub pattern: Option<EncryptionPattern>,
}

impl CryptoInfo {
    /// Zero-pads (or truncates) an IV to 16 bytes.
    pub fn iv_from(bytes: &[u8]) -> [u8; 16] {
        let mut iv = [0u8; 16];
        let n = bytes.len().min(16);
        iv[..n].copy_from_slice(&bytes[..n]);
        iv
    }

    /// Sum of all clear and encrypted byte counts.
    pub fn total_bytes(&self) -> u64 {
        self.subsamples
            .iter()
            .map(|s| u64::from(s.clear_bytes) + u64::from(s.encrypted_bytes))
            .sum()
    }

    /// Checks that the subsample layout covers exactly `sample_size` bytes.
    pub fn reconcile(&self, sample_size: usize) -> Result<()> {
        let total = self.total_bytes();
        if total != sample_size as u64 {
            return Err(Error::parsing(format!(
                "subsample layout covers {total} bytes but the sample holds {sample_size}"
            )));
        }
        Ok(())
    }
}
