//! ZIP archives.
//!
//! Local file headers carry no reliable length for the whole archive, so
//! the chunk end is located by scanning forward for the end-of-central-
//! directory record and adding its comment length.

use super::{Handler, PatternRule, ReadSeek};
use crate::chunk::Chunk;
use anyhow::Result;
use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;
use std::process::Command;

const EOCD_MAGIC: &[u8] = &[0x50, 0x4b, 0x05, 0x06];

/// Fixed part of the end-of-central-directory record.
const EOCD_SIZE: u64 = 22;

/// Offset of the comment length field within the record.
const COMMENT_LEN_OFFSET: u64 = 20;

const RULES: &[PatternRule] = &[PatternRule {
    pattern: &[0x50, 0x4b, 0x03, 0x04],
    start_adjust: 0,
}];

pub struct ZipHandler;

impl Handler for ZipHandler {
    fn name(&self) -> &'static str {
        "zip"
    }

    fn rules(&self) -> &'static [PatternRule] {
        RULES
    }

    fn calculate_chunk(
        &self,
        file: &mut dyn ReadSeek,
        start_offset: u64,
    ) -> Result<Option<Chunk>> {
        let file_size = file.seek(SeekFrom::End(0))?;
        let eocd = match find_forward(file, start_offset, EOCD_MAGIC)? {
            Some(offset) => offset,
            None => return Ok(None),
        };
        file.seek(SeekFrom::Start(eocd + COMMENT_LEN_OFFSET))?;
        let comment_len = match file.read_u16::<LittleEndian>() {
            Ok(len) => u64::from(len),
            Err(_) => return Ok(None),
        };
        let end_offset = eocd + EOCD_SIZE + comment_len;
        if end_offset > file_size {
            return Ok(None);
        }
        Ok(Some(Chunk::new(start_offset, end_offset)))
    }

    fn extract_command(&self, inpath: &Path, outdir: &Path) -> Command {
        let mut cmd = Command::new("unzip");
        cmd.arg("-o").arg(inpath).arg("-d").arg(outdir);
        cmd
    }
}

/// Streams through `file` starting at `from` and returns the absolute
/// offset of the first occurrence of `needle`.
fn find_forward(file: &mut dyn ReadSeek, from: u64, needle: &[u8]) -> io::Result<Option<u64>> {
    const BUF_SIZE: usize = 64 * 1024;
    file.seek(SeekFrom::Start(from))?;
    let mut buf = vec![0u8; BUF_SIZE];
    let mut base = from;
    let mut carry = 0usize;
    loop {
        let n = read_some(file, &mut buf[carry..])?;
        if n == 0 {
            return Ok(None);
        }
        let filled = carry + n;
        if let Some(idx) = find_sub(&buf[..filled], needle) {
            return Ok(Some(base + idx as u64));
        }
        // Keep a needle-sized tail so matches across buffer borders are
        // not lost.
        let keep = (needle.len() - 1).min(filled);
        buf.copy_within(filled - keep..filled, 0);
        base += (filled - keep) as u64;
        carry = keep;
    }
}

fn find_sub(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn read_some(file: &mut dyn ReadSeek, buf: &mut [u8]) -> io::Result<usize> {
    loop {
        match file.read(buf) {
            Ok(n) => return Ok(n),
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
}
