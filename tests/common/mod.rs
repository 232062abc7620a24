//! Generic test helpers

use anyhow::Result;
use bincarve::{Chunk, ExtractionConfig, Handler, HandlerRegistry, PatternRule, ReadSeek};
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::process::Command;
use std::sync::Arc;

/// Minimal container format for tests: four magic bytes, one length
/// byte, payload. "Extraction" copies the payload out with shell tools,
/// so the whole pipeline runs without any real extractor installed.
pub struct BlockHandler;

pub const BLOCK_MAGIC: &[u8] = b"BCRV";
const HEADER_SIZE: u64 = 5;

const BLOCK_RULES: &[PatternRule] = &[PatternRule {
    pattern: b"BCRV",
    start_adjust: 0,
}];

impl Handler for BlockHandler {
    fn name(&self) -> &'static str {
        "block"
    }

    fn rules(&self) -> &'static [PatternRule] {
        BLOCK_RULES
    }

    fn calculate_chunk(
        &self,
        file: &mut dyn ReadSeek,
        start_offset: u64,
    ) -> Result<Option<Chunk>> {
        file.seek(SeekFrom::Start(start_offset + 4))?;
        let mut len = [0u8; 1];
        if file.read_exact(&mut len).is_err() {
            return Ok(None);
        }
        let end = start_offset + HEADER_SIZE + u64::from(len[0]);
        let file_size = file.seek(SeekFrom::End(0))?;
        if end > file_size {
            return Ok(None);
        }
        Ok(Some(Chunk::new(start_offset, end)))
    }

    fn extract_command(&self, inpath: &Path, outdir: &Path) -> Command {
        // Strip the 5 byte header, the rest is the payload.
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg("tail -c +6 \"$0\" > \"$1\"/payload")
            .arg(inpath)
            .arg(outdir);
        cmd
    }
}

/// Same detection scheme as `BlockHandler`, but extraction always fails.
pub struct BrokenHandler;

const BROKEN_RULES: &[PatternRule] = &[PatternRule {
    pattern: b"BRKN",
    start_adjust: 0,
}];

impl Handler for BrokenHandler {
    fn name(&self) -> &'static str {
        "broken"
    }

    fn rules(&self) -> &'static [PatternRule] {
        BROKEN_RULES
    }

    fn calculate_chunk(
        &self,
        file: &mut dyn ReadSeek,
        start_offset: u64,
    ) -> Result<Option<Chunk>> {
        file.seek(SeekFrom::Start(start_offset + 4))?;
        let mut len = [0u8; 1];
        if file.read_exact(&mut len).is_err() {
            return Ok(None);
        }
        Ok(Some(Chunk::new(
            start_offset,
            start_offset + HEADER_SIZE + u64::from(len[0]),
        )))
    }

    fn extract_command(&self, _inpath: &Path, _outdir: &Path) -> Command {
        Command::new("false")
    }
}

/// A test container with the given payload.
pub fn block(payload: &[u8]) -> Vec<u8> {
    assert!(payload.len() <= 255);
    let mut data = BLOCK_MAGIC.to_vec();
    data.push(payload.len() as u8);
    data.extend_from_slice(payload);
    data
}

#[allow(dead_code)]
pub fn broken_block(payload: &[u8]) -> Vec<u8> {
    assert!(payload.len() <= 255);
    let mut data = b"BRKN".to_vec();
    data.push(payload.len() as u8);
    data.extend_from_slice(payload);
    data
}

pub fn test_config(extract_root: &Path) -> ExtractionConfig {
    let mut config = ExtractionConfig::new(extract_root);
    config.handlers = Arc::new(HandlerRegistry::new(vec![vec![
        Arc::new(BlockHandler),
        Arc::new(BrokenHandler),
    ]]));
    config.process_num = 2;
    config
}
