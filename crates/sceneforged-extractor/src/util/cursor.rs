//! Bounds-checked reader over an in-memory parse unit.

use crate::error::{Error, Result};

/// Forward cursor over a byte slice whose reads fail with a parsing error
/// instead of panicking when the unit is truncated.
#[derive(Debug, Clone)]
pub(crate) struct ByteCursor<'a> {
    data: &'a [u8],
    pos: usize,
}

macro_rules! read_int {
    ($name:ident, $ty:ty, $from:ident) => {
        pub fn $name(&mut self) -> Result<$ty> {
            const N: usize = std::mem::size_of::<$ty>();
            let bytes = self.read_bytes(N)?;
            let mut array = [0u8; N];
            array.copy_from_slice(bytes);
            Ok(<$ty>::$from(array))
        }
    };
}

impl<'a> ByteCursor<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn set_position(&mut self, pos: usize) -> Result<()> {
        if pos > self.data.len() {
            return Err(truncated(pos - self.data.len()));
        }
        self.pos = pos;
        Ok(())
    }

    pub fn skip(&mut self, n: usize) -> Result<()> {
        self.read_bytes(n).map(|_| ())
    }

    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        if n > self.remaining() {
            return Err(truncated(n - self.remaining()));
        }
        let bytes = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(bytes)
    }

    /// Everything after the cursor.
    pub fn rest(&mut self) -> &'a [u8] {
        let bytes = &self.data[self.pos..];
        self.pos = self.data.len();
        bytes
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_bytes(1)?[0])
    }

    pub fn peek_u8(&self) -> Result<u8> {
        self.data.get(self.pos).copied().ok_or_else(|| truncated(1))
    }

    pub fn read_u24(&mut self) -> Result<u32> {
        let b = self.read_bytes(3)?;
        Ok(u32::from_be_bytes([0, b[0], b[1], b[2]]))
    }

    pub fn read_fourcc(&mut self) -> Result<[u8; 4]> {
        let mut fourcc = [0u8; 4];
        fourcc.copy_from_slice(self.read_bytes(4)?);
        Ok(fourcc)
    }

    read_int!(read_u16, u16, from_be_bytes);
    read_int!(read_i16, i16, from_be_bytes);
    read_int!(read_u32, u32, from_be_bytes);
    read_int!(read_i32, i32, from_be_bytes);
    read_int!(read_u64, u64, from_be_bytes);
    read_int!(read_i64, i64, from_be_bytes);
    read_int!(read_f32, f32, from_be_bytes);
    read_int!(read_f64, f64, from_be_bytes);
    read_int!(read_u16_le, u16, from_le_bytes);
    read_int!(read_u32_le, u32, from_le_bytes);
    read_int!(read_u64_le, u64, from_le_bytes);
    read_int!(read_i64_le, i64, from_le_bytes);

    /// Reads a version-dependent 32/64-bit field of a full box.
    pub fn read_u32_or_u64(&mut self, wide: bool) -> Result<u64> {
        if wide {
            self.read_u64()
        } else {
            self.read_u32().map(u64::from)
        }
    }

    /// Reads a NUL-terminated (or unit-terminated) UTF-8 string.
    pub fn read_cstring(&mut self) -> Result<String> {
        let rest = &self.data[self.pos..];
        let end = rest.iter().position(|&b| b == 0).unwrap_or(rest.len());
        let text = String::from_utf8_lossy(&rest[..end]).into_owned();
        self.pos += (end + 1).min(rest.len());
        Ok(text)
    }
}

fn truncated(missing: usize) -> Error {
    Error::parsing(format!("unit truncated, {missing} more bytes needed"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_reads_big_and_little_endian() {
        let data = [0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06];
        let mut cursor = ByteCursor::new(&data);
        assert_eq!(cursor.read_u16().unwrap(), 0x0001);
        assert_eq!(cursor.read_u24().unwrap(), 0x020304);
        assert_eq!(cursor.read_u16_le().unwrap(), 0x0605);
        assert_eq!(cursor.remaining(), 0);
    }

    #[test]
    fn test_truncation_is_parsing_error() {
        let mut cursor = ByteCursor::new(&[1, 2, 3]);
        assert_matches!(cursor.read_u32(), Err(Error::Parsing(_)));
        assert_eq!(cursor.position(), 0);
    }

    #[test]
    fn test_cstring() {
        let mut cursor = ByteCursor::new(b"eng\0rest");
        assert_eq!(cursor.read_cstring().unwrap(), "eng");
        assert_eq!(cursor.rest(), b"rest");
    }
}
