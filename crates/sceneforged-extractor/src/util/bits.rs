//! MSB-first bit reader for codec headers.

use std::io::Cursor;

use bitstream_io::{BigEndian, BitRead, BitReader};

use crate::error::{Error, Result};

/// Bit reader over a byte slice with exp-Golomb support.
pub(crate) struct Bits<'a> {
    inner: BitReader<Cursor<&'a [u8]>, BigEndian>,
    consumed: u64,
    total: u64,
}

impl<'a> Bits<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            inner: BitReader::endian(Cursor::new(data), BigEndian),
            consumed: 0,
            total: data.len() as u64 * 8,
        }
    }

    fn check(&self, bits: u32) -> Result<()> {
        if self.consumed + u64::from(bits) > self.total {
            return Err(Error::parsing("bitstream truncated"));
        }
        Ok(())
    }

    pub fn bits_left(&self) -> u64 {
        self.total - self.consumed
    }

    pub fn read_bits(&mut self, bits: u32) -> Result<u32> {
        if bits == 0 {
            return Ok(0);
        }
        self.check(bits)?;
        let value = self.inner.read::<u32>(bits)?;
        self.consumed += u64::from(bits);
        Ok(value)
    }

    pub fn read_bits_u64(&mut self, bits: u32) -> Result<u64> {
        if bits == 0 {
            return Ok(0);
        }
        self.check(bits)?;
        let value = self.inner.read::<u64>(bits)?;
        self.consumed += u64::from(bits);
        Ok(value)
    }

    pub fn read_bit(&mut self) -> Result<bool> {
        self.check(1)?;
        let bit = self.inner.read_bit()?;
        self.consumed += 1;
        Ok(bit)
    }

    pub fn skip_bits(&mut self, bits: u32) -> Result<()> {
        self.check(bits)?;
        self.inner.skip(bits)?;
        self.consumed += u64::from(bits);
        Ok(())
    }

    pub fn byte_align(&mut self) {
        let rem = (self.consumed % 8) as u32;
        if rem != 0 {
            self.inner.byte_align();
            self.consumed += u64::from(8 - rem);
        }
    }

    /// Unsigned exp-Golomb code.
    pub fn read_ue(&mut self) -> Result<u32> {
        let mut leading_zeros = 0;
        while !self.read_bit()? {
            leading_zeros += 1;
            if leading_zeros > 31 {
                return Err(Error::parsing("exp-Golomb code too long"));
            }
        }
        if leading_zeros == 0 {
            return Ok(0);
        }
        let suffix = self.read_bits(leading_zeros)?;
        Ok(((1u64 << leading_zeros) - 1 + u64::from(suffix)) as u32)
    }

    /// Signed exp-Golomb code.
    pub fn read_se(&mut self) -> Result<i32> {
        let code = i64::from(self.read_ue()?);
        let value = if code % 2 == 0 { -(code / 2) } else { (code + 1) / 2 };
        Ok(value as i32)
    }
}
