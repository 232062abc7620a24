//! SquashFS v4 filesystem images (little endian).
//!
//! The superblock records the number of bytes used by the filesystem, so
//! the chunk end comes straight out of the header.

use super::{Handler, PatternRule, ReadSeek};
use crate::chunk::Chunk;
use anyhow::Result;
use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{Seek, SeekFrom};
use std::path::Path;
use std::process::Command;

/// `hsqs`: the little-endian magic at the start of the superblock.
const RULES: &[PatternRule] = &[PatternRule {
    pattern: b"hsqs",
    start_adjust: 0,
}];

const SUPERBLOCK_SIZE: u64 = 96;
const VERSION_MAJOR_OFFSET: u64 = 28;
const BYTES_USED_OFFSET: u64 = 40;

pub struct SquashfsHandler;

impl Handler for SquashfsHandler {
    fn name(&self) -> &'static str {
        "squashfs"
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
        if start_offset + SUPERBLOCK_SIZE > file_size {
            return Ok(None);
        }
        file.seek(SeekFrom::Start(start_offset + VERSION_MAJOR_OFFSET))?;
        let version_major = file.read_u16::<LittleEndian>()?;
        if version_major != 4 {
            return Ok(None);
        }
        file.seek(SeekFrom::Start(start_offset + BYTES_USED_OFFSET))?;
        let bytes_used = file.read_u64::<LittleEndian>()?;
        if bytes_used < SUPERBLOCK_SIZE || start_offset + bytes_used > file_size {
            return Ok(None);
        }
        Ok(Some(Chunk::new(start_offset, start_offset + bytes_used)))
    }

    fn extract_command(&self, inpath: &Path, outdir: &Path) -> Command {
        let mut cmd = Command::new("unsquashfs");
        cmd.arg("-f").arg("-d").arg(outdir).arg(inpath);
        cmd
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn superblock(version_major: u16, bytes_used: u64, total: usize) -> Vec<u8> {
        let mut data = vec![0u8; total];
        data[0..4].copy_from_slice(b"hsqs");
        data[28..30].copy_from_slice(&version_major.to_le_bytes());
        data[40..48].copy_from_slice(&bytes_used.to_le_bytes());
        data
    }

    #[test]
    fn bytes_used_determines_end() {
        let data = superblock(4, 200, 256);
        let chunk = SquashfsHandler
            .calculate_chunk(&mut Cursor::new(data), 0)
            .unwrap()
            .unwrap();
        assert_eq!(chunk, Chunk::new(0, 200));
    }

    #[test]
    fn wrong_version_is_rejected() {
        let data = superblock(3, 200, 256);
        assert!(SquashfsHandler
            .calculate_chunk(&mut Cursor::new(data), 0)
            .unwrap()
            .is_none());
    }

    #[test]
    fn image_larger_than_file_is_rejected() {
        let data = superblock(4, 1 << 20, 256);
        assert!(SquashfsHandler
            .calculate_chunk(&mut Cursor::new(data), 0)
            .unwrap()
            .is_none());
    }

    #[test]
    fn embedded_image() {
        let mut data = vec![0u8; 100];
        data.extend_from_slice(&superblock(4, 128, 128));
        let chunk = SquashfsHandler
            .calculate_chunk(&mut Cursor::new(data), 100)
            .unwrap()
            .unwrap();
        assert_eq!(chunk, Chunk::new(100, 228));
    }
}
