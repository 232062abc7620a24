//! File-magic detection for the skip list.
//!
//! Some well-known formats (executables, pictures) are opaque to every
//! handler and scanning them only wastes time or produces noise. Files
//! whose leading bytes identify such a format are skipped before the
//! scanner ever sees them.

use log::debug;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

const SIGNATURES: &[(&[u8], &str)] = &[
    (b"\x7fELF", "ELF"),
    (&[0xff, 0xd8, 0xff], "JPEG"),
    (b"GIF87a", "GIF"),
    (b"GIF89a", "GIF"),
    (b"\x89PNG\r\n\x1a\n", "PNG"),
];

/// Identifies the file by its leading bytes.
pub fn detect(path: &Path) -> io::Result<Option<&'static str>> {
    let mut head = [0u8; 8];
    let mut file = File::open(path)?;
    let mut filled = 0;
    while filled < head.len() {
        let n = file.read(&mut head[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(SIGNATURES
        .iter()
        .find(|(sig, _)| head[..filled].starts_with(sig))
        .map(|&(_, name)| name))
}

/// True if the file's magic matches one of the configured prefixes.
pub fn should_skip(path: &Path, skip: &[String]) -> io::Result<bool> {
    let name = match detect(path)? {
        Some(name) => name,
        None => return Ok(false),
    };
    if skip.iter().any(|prefix| name.starts_with(prefix.as_str())) {
        debug!("{:?}: ignoring file based on magic ({})", path, name);
        return Ok(true);
    }
    Ok(false)
}
