//! Gzip members.
//!
//! A gzip member carries no compressed-length field; the only way to
//! find where it ends is to inflate it and count the compressed bytes
//! consumed. Inflating here is pure stream delimiting, the actual
//! extraction still happens out of process.

use super::{Handler, PatternRule, ReadSeek};
use crate::chunk::Chunk;
use anyhow::Result;
use flate2::bufread::GzDecoder;
use std::ffi::OsString;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::Path;
use std::process::Command;

/// Magic plus the deflate compression method byte.
const RULES: &[PatternRule] = &[PatternRule {
    pattern: &[0x1f, 0x8b, 0x08],
    start_adjust: 0,
}];

pub struct GzipHandler;

impl Handler for GzipHandler {
    fn name(&self) -> &'static str {
        "gzip"
    }

    fn rules(&self) -> &'static [PatternRule] {
        RULES
    }

    fn calculate_chunk(
        &self,
        file: &mut dyn ReadSeek,
        start_offset: u64,
    ) -> Result<Option<Chunk>> {
        file.seek(SeekFrom::Start(start_offset))?;
        let mut fixed_header = [0u8; 4];
        if file.read_exact(&mut fixed_header).is_err() {
            return Ok(None);
        }
        // FLG reserved bits must be zero in a real member.
        if fixed_header[3] & 0xe0 != 0 {
            return Ok(None);
        }
        file.seek(SeekFrom::Start(start_offset))?;

        let mut decoder = GzDecoder::new(BufReader::with_capacity(
            64 * 1024,
            CountingReader::new(file),
        ));
        if io::copy(&mut decoder, &mut io::sink()).is_err() {
            return Ok(None);
        }
        // The decoder stops after the member trailer; whatever is still
        // sitting in the buffer was read past the end.
        let buffered = decoder.get_ref().buffer().len() as u64;
        let consumed = decoder.into_inner().get_ref().count() - buffered;
        if consumed == 0 {
            return Ok(None);
        }
        Ok(Some(Chunk::new(start_offset, start_offset + consumed)))
    }

    fn extract_command(&self, inpath: &Path, outdir: &Path) -> Command {
        let mut cmd = Command::new("7z");
        let mut outflag = OsString::from("-o");
        outflag.push(outdir);
        cmd.arg("x").arg("-y").arg(inpath).arg(outflag);
        cmd
    }
}

struct CountingReader<R> {
    inner: R,
    count: u64,
}

impl<R: Read> CountingReader<R> {
    fn new(inner: R) -> Self {
        Self { inner, count: 0 }
    }

    fn count(&self) -> u64 {
        self.count
    }
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.count += n as u64;
        Ok(n)
    }
}
