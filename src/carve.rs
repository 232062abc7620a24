//! Writes chunk byte ranges to files under an extraction directory.
//!
//! Carved file names encode the byte range and origin: valid chunks get
//! `<start>-<end>.<handler>`, gaps get `<start>-<end>.unknown`, offsets
//! in decimal. Copies stream through a bounded buffer.

use crate::chunk::{Chunk, UnknownChunk, ValidChunk};
use anyhow::{Context, Result};
use log::debug;
use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

const COPY_BUF_SIZE: usize = 128 * 1024;

fn carve_chunk(extract_dir: &Path, file: &mut File, chunk: Chunk, name: &str) -> Result<PathBuf> {
    fs::create_dir_all(extract_dir)
        .with_context(|| format!("cannot create extraction dir {:?}", extract_dir))?;
    let path = extract_dir.join(format!(
        "{}-{}.{}",
        chunk.start_offset, chunk.end_offset, name
    ));
    debug!("carving {:?} to {:?}", chunk, path);
    file.seek(SeekFrom::Start(chunk.start_offset))?;
    let out = File::create(&path).with_context(|| format!("cannot create {:?}", path))?;
    let mut writer = BufWriter::with_capacity(COPY_BUF_SIZE, &out);
    let mut src = Read::by_ref(file).take(chunk.size());
    io::copy(&mut src, &mut writer).with_context(|| format!("cannot carve to {:?}", path))?;
    writer.flush()?;
    drop(writer);
    // The carved copy is read back at most once (by the extractor), no
    // point in keeping its pages cached.
    fadvise_dontneed(out);
    Ok(path)
}

/// Carves a handler-validated chunk; the resulting file is fed to the
/// handler's extractor.
pub fn carve_valid_chunk(
    extract_dir: &Path,
    file: &mut File,
    chunk: &ValidChunk,
) -> Result<PathBuf> {
    carve_chunk(extract_dir, file, chunk.chunk, chunk.handler.name())
}

/// Carves all gaps between valid chunks for later inspection. Returns
/// the written paths.
pub fn carve_unknown_chunks(
    extract_dir: &Path,
    file: &mut File,
    chunks: &[UnknownChunk],
) -> Result<Vec<PathBuf>> {
    let mut written = Vec::with_capacity(chunks.len());
    for unknown in chunks {
        written.push(carve_chunk(extract_dir, file, unknown.chunk, "unknown")?);
    }
    Ok(written)
}

#[cfg(target_os = "linux")]
fn fadvise_dontneed(f: File) {
    use std::os::unix::io::AsRawFd;
    // Return code swallowed, this is only cache hygiene.
    unsafe {
        libc::posix_fadvise(f.as_raw_fd(), 0, 0, libc::POSIX_FADV_DONTNEED);
    }
}

#[cfg(not(target_os = "linux"))]
fn fadvise_dontneed(_f: File) {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{read, write};
    use tempdir::TempDir;

    #[test]
    fn no_chunks_no_files() {
        let tmp = TempDir::new("carve").unwrap();
        let infile = tmp.path().join("infile");
        write(&infile, b"some file").unwrap();
        let mut file = File::open(&infile).unwrap();
        let written = carve_unknown_chunks(tmp.path(), &mut file, &[]).unwrap();
        assert!(written.is_empty());
        let entries: Vec<_> = fs::read_dir(tmp.path()).unwrap().collect();
        assert_eq!(entries.len(), 1, "only the input file itself");
    }

    #[test]
    fn one_chunk() {
        let tmp = TempDir::new("carve").unwrap();
        let infile = tmp.path().join("infile");
        write(&infile, b"test file").unwrap();
        let mut file = File::open(&infile).unwrap();
        let written =
            carve_unknown_chunks(tmp.path(), &mut file, &[UnknownChunk::new(0, 9)]).unwrap();
        assert_eq!(written, vec![tmp.path().join("0-9.unknown")]);
        assert_eq!(read(tmp.path().join("0-9.unknown")).unwrap(), b"test file");
    }

    #[test]
    fn adjacent_chunks() {
        let tmp = TempDir::new("carve").unwrap();
        let infile = tmp.path().join("infile");
        write(&infile, b"test file").unwrap();
        let mut file = File::open(&infile).unwrap();
        let chunks = [UnknownChunk::new(0, 4), UnknownChunk::new(4, 9)];
        carve_unknown_chunks(tmp.path(), &mut file, &chunks).unwrap();
        assert_eq!(read(tmp.path().join("0-4.unknown")).unwrap(), b"test");
        assert_eq!(read(tmp.path().join("4-9.unknown")).unwrap(), b" file");
    }

    #[test]
    fn carve_creates_extract_dir() {
        let tmp = TempDir::new("carve").unwrap();
        let infile = tmp.path().join("infile");
        write(&infile, b"0123456789").unwrap();
        let mut file = File::open(&infile).unwrap();
        let dir = tmp.path().join("sub").join("dir");
        carve_unknown_chunks(&dir, &mut file, &[UnknownChunk::new(2, 6)]).unwrap();
        assert_eq!(read(dir.join("2-6.unknown")).unwrap(), b"2345");
    }
}
