//! POSIX tar archives.
//!
//! A tar archive is a sequence of 512-byte blocks: one header block per
//! entry, followed by the entry data rounded up to the block size, and
//! terminated by two blocks of zeros. No header field records the total
//! archive size, so validation walks the entries until it reaches the
//! terminator.

use super::{Handler, PatternRule, ReadSeek};
use crate::chunk::Chunk;
use anyhow::Result;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::process::Command;

const BLOCK_SIZE: u64 = 512;

/// The `ustar` magic lives at byte 257 of the posix header, so the chunk
/// starts that far before the match.
const MAGIC_OFFSET: i64 = 257;

const RULES: &[PatternRule] = &[PatternRule {
    pattern: b"ustar",
    start_adjust: -MAGIC_OFFSET,
}];

pub struct TarHandler;

impl Handler for TarHandler {
    fn name(&self) -> &'static str {
        "tar"
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
        let mut block = [0u8; BLOCK_SIZE as usize];
        let mut pos = start_offset;
        let mut entries = 0u64;
        loop {
            if pos + BLOCK_SIZE > file_size {
                // Ran off the end without a terminator; keep what we saw.
                break;
            }
            file.seek(SeekFrom::Start(pos))?;
            file.read_exact(&mut block)?;
            if block.iter().all(|&b| b == 0) {
                // The terminator is two zero blocks, but a single one at
                // the end of the data still closes the archive.
                pos += BLOCK_SIZE;
                if pos + BLOCK_SIZE <= file_size {
                    file.read_exact(&mut block)?;
                    if block.iter().all(|&b| b == 0) {
                        pos += BLOCK_SIZE;
                    }
                }
                break;
            }
            if &block[257..262] != b"ustar" {
                break;
            }
            let size = match parse_octal(&block[124..136]) {
                Some(size) => size,
                None => break,
            };
            let next = pos + BLOCK_SIZE + round_up(size, BLOCK_SIZE);
            if next > file_size {
                // Entry data declared beyond the end of the file.
                return Ok(None);
            }
            pos = next;
            entries += 1;
        }
        if entries > 0 {
            Ok(Some(Chunk::new(start_offset, pos)))
        } else {
            Ok(None)
        }
    }

    fn extract_command(&self, inpath: &Path, outdir: &Path) -> Command {
        let mut cmd = Command::new("tar");
        cmd.arg("-x").arg("-f").arg(inpath).arg("-C").arg(outdir);
        cmd
    }
}

/// Parses a NUL- or space-terminated octal header field.
fn parse_octal(field: &[u8]) -> Option<u64> {
    let mut value: u64 = 0;
    let mut seen = false;
    for &b in field {
        match b {
            b'0'..=b'7' => {
                value = value.checked_mul(8)?.checked_add(u64::from(b - b'0'))?;
                seen = true;
            }
            b' ' | 0 => {
                if seen {
                    break;
                }
            }
            _ => return None,
        }
    }
    if seen {
        Some(value)
    } else {
        None
    }
}

fn round_up(n: u64, to: u64) -> u64 {
    (n + to - 1) / to * to
}
