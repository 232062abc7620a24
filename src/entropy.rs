//! Shannon entropy reporting for opaque byte regions.
//!
//! Whole files without any valid chunk and carved unknown chunks get an
//! entropy summary in the logs, which is usually enough to tell
//! compressed or encrypted regions from sparse or textual ones.

use anyhow::Result;
use log::debug;
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Shannon entropy of a byte buffer in bits per byte (0.0 ..= 8.0).
pub fn shannon_entropy(data: &[u8]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    let mut counts = [0u64; 256];
    for &b in data {
        counts[b as usize] += 1;
    }
    let len = data.len() as f64;
    let mut entropy = 0.0;
    for &count in counts.iter() {
        if count > 0 {
            let p = count as f64 / len;
            entropy -= p * p.log2();
        }
    }
    entropy
}

/// Aim for ~80 buffers per file; smaller buffers make the calculation
/// crawl on large files.
fn buffer_size(file_size: u64) -> usize {
    (file_size / 80).max(1024).min(1024 * 1024) as usize
}

/// Reads `path` and logs an entropy summary, normalized to a percentage
/// of the 8-bit maximum.
pub fn report_entropy(path: &Path) -> Result<()> {
    let file_size = fs_len(path)?;
    if file_size == 0 {
        return Ok(());
    }
    let mut file = File::open(path)?;
    let mut buf = vec![0u8; buffer_size(file_size)];
    let mut percentages = Vec::new();
    loop {
        let n = read_full(&mut file, &mut buf)?;
        if n == 0 {
            break;
        }
        percentages.push(shannon_entropy(&buf[..n]) / 8.0 * 100.0);
    }
    let mean = percentages.iter().sum::<f64>() / percentages.len() as f64;
    let highest = percentages.iter().cloned().fold(0.0f64, f64::max);
    let lowest = percentages.iter().cloned().fold(100.0f64, f64::min);
    debug!(
        "entropy of {:?} ({} bytes): mean {:.2}%, highest {:.2}%, lowest {:.2}%",
        path, file_size, mean, highest, lowest
    );
    Ok(())
}

fn fs_len(path: &Path) -> std::io::Result<u64> {
    Ok(path.metadata()?.len())
}

fn read_full(file: &mut File, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = file.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}
