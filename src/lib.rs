//! Recursive extraction engine for firmware images and other binary
//! blobs.
//!
//! Feed it any file: it locates embedded containers at arbitrary byte
//! offsets, carves them (and the unclaimed ranges between them) to disk,
//! hands every recognized container to its format's external extractor
//! and repeats the process on everything produced, down to a configured
//! recursion depth. Extracted trees are sanitized before they are walked
//! again: symlinks are clamped into the extraction root and permissions
//! get a floor.

mod carve;
mod chunk;
mod entropy;
mod handlers;
mod magic;
mod pool;
mod processing;
mod reader;
mod report;
mod sanitize;
mod scanner;
pub mod signals;

pub use crate::carve::{carve_unknown_chunks, carve_valid_chunk};
pub use crate::chunk::{
    calculate_unknown_chunks, remove_inner_chunks, Chunk, UnknownChunk, ValidChunk,
};
pub use crate::handlers::{Handler, HandlerRegistry, PatternRule, ReadSeek};
pub use crate::pool::WorkerPool;
pub use crate::processing::{
    extract_dir_for_input, process_files, ExtractionConfig, Processor, DEFAULT_DEPTH,
    DEFAULT_ENTROPY_DEPTH, DEFAULT_EXTRACT_SUFFIX, DEFAULT_SCAN_TIMEOUT, DEFAULT_SKIP_MAGIC,
};
pub use crate::reader::LimitedStartReader;
pub use crate::report::{ExtractError, Report, Task, TaskResult};
pub use crate::sanitize::{fix_extracted_directory, fix_permission, fix_symlink};
pub use crate::scanner::{Candidate, ScanError, Scanner};
