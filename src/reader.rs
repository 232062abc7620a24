//! File access helpers for handler validation.

use std::io::{self, Read, Seek, SeekFrom};

/// Restricts an underlying reader to offsets at or after a fixed start
/// position.
///
/// Handlers parse a candidate chunk through this wrapper, so a buggy
/// parser cannot seek back into the preceding chunk's bytes. Seeks below
/// the start position fail and leave the reader positioned at the start.
#[derive(Debug)]
pub struct LimitedStartReader<R> {
    inner: R,
    start: u64,
}

impl<R: Read + Seek> LimitedStartReader<R> {
    /// Wraps `inner` and positions it at `start`.
    pub fn new(mut inner: R, start: u64) -> io::Result<Self> {
        inner.seek(SeekFrom::Start(start))?;
        Ok(Self { inner, start })
    }

    pub fn start(&self) -> u64 {
        self.start
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> Read for LimitedStartReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl<R: Read + Seek> Seek for LimitedStartReader<R> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let new = self.inner.seek(pos)?;
        if new < self.start {
            self.inner.seek(SeekFrom::Start(self.start))?;
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("seek to 0x{:x} below chunk start 0x{:x}", new, self.start),
            ));
        }
        Ok(new)
    }
}
