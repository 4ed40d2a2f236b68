//! Byte sources consumed by the extractors.
//!
//! An [`ExtractorInput`] is a positioned byte source that may return short
//! reads and reports end of input distinctly from a zero-length read. The
//! engine never buffers the whole stream: extractors pull one parse unit at a
//! time and reposition the input themselves when a format needs random access.

use std::io::{self, Read, Seek, SeekFrom};

use bytes::Bytes;

/// Outcome of a single [`ExtractorInput::read`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// `n` bytes were copied into the destination. `n` is only zero when the
    /// destination was empty.
    Read(usize),
    /// No more bytes will ever be produced from the current position.
    EndOfInput,
}

/// Sequential and random-access byte source.
pub trait ExtractorInput {
    /// Reads up to `buf.len()` bytes. May return fewer bytes than requested.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<ReadOutcome>;

    /// Absolute position of the next byte to be read.
    fn position(&self) -> u64;

    /// Total stream length, or `None` for live or unbounded sources.
    fn length(&self) -> Option<u64>;

    /// Moves the read cursor to an absolute byte position.
    ///
    /// Sources of unknown length only accept positions up to the furthest byte
    /// read so far.
    fn seek_to_position(&mut self, position: u64) -> io::Result<()>;
}

impl<T: ExtractorInput + ?Sized> ExtractorInput for &mut T {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<ReadOutcome> {
        (**self).read(buf)
    }

    fn position(&self) -> u64 {
        (**self).position()
    }

    fn length(&self) -> Option<u64> {
        (**self).length()
    }

    fn seek_to_position(&mut self, position: u64) -> io::Result<()> {
        (**self).seek_to_position(position)
    }
}

fn beyond_horizon(position: u64, horizon: u64) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidInput,
        format!("cannot seek to {position}: only {horizon} bytes of the unbounded input have been read"),
    )
}

/// Adapter over any `std::io` reader.
#[derive(Debug)]
pub struct IoInput<R> {
    inner: R,
    position: u64,
    length: Option<u64>,
    horizon: u64,
}

impl<R: Read + Seek> IoInput<R> {
    /// Wraps a reader whose length can be probed by seeking to its end.
    pub fn new(mut inner: R) -> io::Result<Self> {
        let start = inner.stream_position()?;
        let end = inner.seek(SeekFrom::End(0))?;
        inner.seek(SeekFrom::Start(start))?;
        Ok(Self {
            inner,
            position: start,
            length: Some(end),
            horizon: start,
        })
    }

    /// Wraps a reader that must be treated as live: its length is reported as
    /// unknown and seeks past the bytes already read are rejected.
    pub fn live(mut inner: R) -> io::Result<Self> {
        let start = inner.stream_position()?;
        Ok(Self {
            inner,
            position: start,
            length: None,
            horizon: start,
        })
    }

    /// Returns the wrapped reader.
    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read + Seek> ExtractorInput for IoInput<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<ReadOutcome> {
        if buf.is_empty() {
            return Ok(ReadOutcome::Read(0));
        }
        loop {
            match self.inner.read(buf) {
                Ok(0) => return Ok(ReadOutcome::EndOfInput),
                Ok(n) => {
                    self.position += n as u64;
                    self.horizon = self.horizon.max(self.position);
                    return Ok(ReadOutcome::Read(n));
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    fn position(&self) -> u64 {
        self.position
    }

    fn length(&self) -> Option<u64> {
        self.length
    }

    fn seek_to_position(&mut self, position: u64) -> io::Result<()> {
        if self.length.is_none() && position > self.horizon {
            return Err(beyond_horizon(position, self.horizon));
        }
        self.inner.seek(SeekFrom::Start(position))?;
        self.position = position;
        Ok(())
    }
}

/// In-memory input, mostly used by tests and by callers that already hold the
/// whole stream.
#[derive(Debug, Clone)]
pub struct SliceInput {
    data: Bytes,
    position: usize,
    max_read: Option<usize>,
    unbounded: bool,
    horizon: usize,
}

impl SliceInput {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            position: 0,
            max_read: None,
            unbounded: false,
            horizon: 0,
        }
    }

    /// Caps every read at `chunk` bytes to simulate a slow source.
    pub fn with_max_read(mut self, chunk: usize) -> Self {
        self.max_read = Some(chunk.max(1));
        self
    }

    /// Reports the length as unknown, like a live stream.
    pub fn unbounded(mut self) -> Self {
        self.unbounded = true;
        self
    }
}

impl ExtractorInput for SliceInput {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<ReadOutcome> {
        if buf.is_empty() {
            return Ok(ReadOutcome::Read(0));
        }
        let remaining = self.data.len().saturating_sub(self.position);
        if remaining == 0 {
            return Ok(ReadOutcome::EndOfInput);
        }
        let mut n = remaining.min(buf.len());
        if let Some(max) = self.max_read {
            n = n.min(max);
        }
        buf[..n].copy_from_slice(&self.data[self.position..self.position + n]);
        self.position += n;
        self.horizon = self.horizon.max(self.position);
        Ok(ReadOutcome::Read(n))
    }

    fn position(&self) -> u64 {
        self.position as u64
    }

    fn length(&self) -> Option<u64> {
        if self.unbounded {
            None
        } else {
            Some(self.data.len() as u64)
        }
    }

    fn seek_to_position(&mut self, position: u64) -> io::Result<()> {
        if self.unbounded && position > self.horizon as u64 {
            return Err(beyond_horizon(position, self.horizon as u64));
        }
        self.position = usize::try_from(position).unwrap_or(usize::MAX).min(self.data.len());
        Ok(())
    }
}

const SKIP_CHUNK: usize = 8 * 1024;

/// Short-read tolerant helpers shared by all extractors.
pub(crate) trait InputExt: ExtractorInput {
    /// Fills `buf` completely.
    ///
    /// Returns `Ok(false)` if the input ended before the first byte and an
    /// `UnexpectedEof` error if it ended part way through.
    fn read_fully(&mut self, buf: &mut [u8]) -> io::Result<bool> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.read(&mut buf[filled..])? {
                ReadOutcome::Read(n) => filled += n,
                ReadOutcome::EndOfInput if filled == 0 => return Ok(false),
                ReadOutcome::EndOfInput => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        format!("input ended after {filled} of {} bytes", buf.len()),
                    ))
                }
            }
        }
        Ok(true)
    }

    /// Reads until `buf` is full or the input ends; returns the byte count.
    fn read_up_to(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.read(&mut buf[filled..])? {
                ReadOutcome::Read(n) => filled += n,
                ReadOutcome::EndOfInput => break,
            }
        }
        Ok(filled)
    }

    /// Reads exactly `len` bytes into a new vector, `None` at end of input.
    ///
    /// A length beyond the known end of input is refused before anything is
    /// allocated.
    fn read_to_vec(&mut self, len: usize) -> io::Result<Option<Vec<u8>>> {
        if let Some(length) = self.length() {
            let available = length.saturating_sub(self.position());
            if len as u64 > available {
                if available == 0 {
                    return Ok(None);
                }
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("{len} bytes requested with {available} left"),
                ));
            }
        }
        let mut buf = vec![0; len];
        Ok(self.read_fully(&mut buf)?.then_some(buf))
    }

    /// Advances `len` bytes. Returns `Ok(false)` if the input ended first.
    fn skip_fully(&mut self, len: u64) -> io::Result<bool> {
        let Some(target) = self.position().checked_add(len) else {
            return Err(io::Error::new(io::ErrorKind::InvalidData, format!("skip of {len} bytes overflows")));
        };
        if let Some(length) = self.length() {
            if len > SKIP_CHUNK as u64 {
                self.seek_to_position(target.min(length))?;
                return Ok(target <= length);
            }
        }
        let mut scratch = [0u8; SKIP_CHUNK];
        let mut remaining = len;
        while remaining > 0 {
            let want = remaining.min(SKIP_CHUNK as u64) as usize;
            match self.read(&mut scratch[..want])? {
                ReadOutcome::Read(n) => remaining -= n as u64,
                ReadOutcome::EndOfInput => return Ok(false),
            }
        }
        Ok(true)
    }

    /// Moves forward to `target`, seeking only when the gap is large.
    fn advance_to(&mut self, target: u64) -> io::Result<bool> {
        let position = self.position();
        if target >= position && target - position <= 256 * 1024 {
            self.skip_fully(target - position)
        } else {
            self.seek_to_position(target)?;
            Ok(true)
        }
    }

    /// True once the position reached the known length.
    fn at_known_end(&self) -> bool {
        matches!(self.length(), Some(len) if self.position() >= len)
    }
}

impl<T: ExtractorInput + ?Sized> InputExt for T {}

/// Owned snapshot of the start of a stream, used for sniffing.
#[derive(Debug, Clone)]
pub struct Prefix {
    bytes: Vec<u8>,
    length: Option<u64>,
    complete: bool,
}

impl Prefix {
    /// Captures up to `window` bytes and restores the input position.
    pub fn capture(input: &mut dyn ExtractorInput, window: usize) -> io::Result<Self> {
        let start = input.position();
        let mut bytes = vec![0; window];
        let n = input.read_up_to(&mut bytes)?;
        bytes.truncate(n);
        input.seek_to_position(start)?;
        Ok(Self {
            complete: n < window,
            length: input.length(),
            bytes,
        })
    }

    /// Builds a prefix directly from bytes.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        let bytes = bytes.into();
        Self {
            length: Some(bytes.len() as u64),
            complete: true,
            bytes,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// True when the snapshot holds the entire remaining stream.
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Length of the underlying input, if known.
    pub fn input_length(&self) -> Option<u64> {
        self.length
    }
}
