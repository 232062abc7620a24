//! Per-file extraction pipeline and the top-level run driver.
//!
//! A task's file is scanned for chunk candidates, candidates are
//! validated by their handlers, the surviving chunks are reconciled and
//! carved, every valid chunk is handed to its handler's external
//! extractor, and each produced directory is sanitized and scheduled as
//! a new task one recursion level deeper.

use crate::carve::{carve_unknown_chunks, carve_valid_chunk};
use crate::chunk::{calculate_unknown_chunks, remove_inner_chunks, ValidChunk};
use crate::entropy;
use crate::handlers::HandlerRegistry;
use crate::magic;
use crate::pool::WorkerPool;
use crate::reader::LimitedStartReader;
use crate::report::{Report, Task, TaskResult};
use crate::sanitize::fix_extracted_directory;
use crate::scanner::{Candidate, Scanner};
use crate::signals;
use anyhow::{Context, Result};
use fs2::FileExt;
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, error, warn};
use std::fs::{self, File};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_DEPTH: u64 = 10;
pub const DEFAULT_ENTROPY_DEPTH: u64 = 1;
pub const DEFAULT_SKIP_MAGIC: &[&str] = &["ELF", "JPEG", "GIF", "PNG"];
pub const DEFAULT_EXTRACT_SUFFIX: &str = "_extract";
pub const DEFAULT_SCAN_TIMEOUT: Duration = Duration::from_secs(60);

/// Immutable settings for one extraction run, shared by all workers.
#[derive(Clone)]
pub struct ExtractionConfig {
    pub extract_root: PathBuf,
    pub force_extract: bool,
    pub max_depth: u64,
    pub entropy_depth: u64,
    pub skip_magic: Vec<String>,
    pub process_num: usize,
    pub keep_extracted_chunks: bool,
    pub extract_suffix: String,
    pub scan_timeout: Duration,
    pub show_progress: bool,
    pub handlers: Arc<HandlerRegistry>,
}

impl ExtractionConfig {
    pub fn new<P: AsRef<Path>>(extract_root: P) -> Self {
        Self {
            extract_root: extract_root.as_ref().to_owned(),
            force_extract: false,
            max_depth: DEFAULT_DEPTH,
            entropy_depth: DEFAULT_ENTROPY_DEPTH,
            skip_magic: DEFAULT_SKIP_MAGIC.iter().map(|s| (*s).to_owned()).collect(),
            process_num: num_cpus::get().max(1),
            keep_extracted_chunks: false,
            extract_suffix: DEFAULT_EXTRACT_SUFFIX.to_owned(),
            scan_timeout: DEFAULT_SCAN_TIMEOUT,
            show_progress: false,
            handlers: HandlerRegistry::builtin(),
        }
    }
}

/// Extraction directory under the root, named after the input. Inputs
/// from outside the root land directly below it; files produced by
/// earlier extractions keep their position in the output tree.
pub fn extract_dir_for_input(config: &ExtractionConfig, path: &Path) -> PathBuf {
    let relative = match path.strip_prefix(&config.extract_root) {
        Ok(relative) => relative.to_path_buf(),
        Err(_) => PathBuf::from(path.file_name().unwrap_or_default()),
    };
    let mut name = relative.file_name().unwrap_or_default().to_os_string();
    name.push(&config.extract_suffix);
    config.extract_root.join(relative.with_file_name(name))
}

fn existing_extract_dirs(config: &ExtractionConfig, paths: &[PathBuf]) -> Vec<PathBuf> {
    paths
        .iter()
        .map(|path| extract_dir_for_input(config, path))
        .filter(|dir| dir.exists())
        .collect()
}

/// Guards the extraction root against concurrent runs writing into the
/// same tree.
fn acquire_lock(root: &Path) -> Result<File> {
    let f = File::create(root.join(".lock"))?;
    f.try_lock_exclusive()
        .with_context(|| format!("cannot lock extraction root {:?}", root))?;
    Ok(f)
}

fn progress_bar(enabled: bool) -> ProgressBar {
    if !enabled {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new_spinner();
    bar.set_style(ProgressStyle::default_spinner().template("{spinner:.cyan} {pos} tasks {wide_msg}"));
    bar.enable_steady_tick(100);
    bar
}

/// Processes all inputs and returns every report recorded along the way.
/// A non-empty result means the run should exit nonzero.
pub fn process_files(config: &ExtractionConfig, paths: &[PathBuf]) -> Result<Vec<Report>> {
    let existing = existing_extract_dirs(config, paths);
    if config.force_extract {
        for dir in &existing {
            debug!("removing existing extraction dir {:?}", dir);
            fs::remove_dir_all(dir).with_context(|| format!("cannot remove {:?}", dir))?;
        }
    } else if !existing.is_empty() {
        let report = Report::ExtractDirectoriesExist { paths: existing };
        error!("{}", report);
        return Ok(vec![report]);
    }

    fs::create_dir_all(&config.extract_root)
        .with_context(|| format!("cannot create extraction root {:?}", config.extract_root))?;
    let _lock = acquire_lock(&config.extract_root)?;

    let processor = Processor::new(config)?;
    let pool = WorkerPool::new(config.process_num);
    let progress = progress_bar(config.show_progress);
    let mut all_reports = Vec::new();
    for path in paths {
        let mut reports = pool.process_until_done(
            Task::new(path.clone(), 0),
            signals::flag(),
            |task| processor.process_task(task),
            |task| {
                progress.inc(1);
                progress.set_message(&task.path.display().to_string());
            },
        );
        all_reports.append(&mut reports);
    }
    progress.finish_and_clear();
    Ok(all_reports)
}

/// Shared per-run state handed to the worker pool.
pub struct Processor<'a> {
    config: &'a ExtractionConfig,
    scanner: Scanner,
}

impl<'a> Processor<'a> {
    pub fn new(config: &'a ExtractionConfig) -> Result<Self> {
        Ok(Self {
            scanner: Scanner::new(&config.handlers, config.scan_timeout)?,
            config,
        })
    }

    /// Entry point for worker threads. No error escapes: anything
    /// unclassified becomes an `UnknownError` report and the task ends
    /// cleanly.
    pub fn process_task(&self, task: &Task) -> TaskResult {
        let mut result = TaskResult::new();
        if let Err(err) = self.run_task(task, &mut result) {
            error!(
                "unclassified error while processing {:?}: {:#}",
                task.path, err
            );
            result.add_report(Report::UnknownError {
                message: format!("{:#}", err),
            });
        }
        result
    }

    fn run_task(&self, task: &Task, result: &mut TaskResult) -> Result<()> {
        if task.depth >= self.config.max_depth {
            debug!("{:?}: reached maximum depth, stopping here", task.path);
            return Ok(());
        }
        if !valid_path(&task.path) {
            warn!(
                "path {:?} contains control characters, it won't be processed",
                task.path
            );
            return Ok(());
        }
        let meta = fs::symlink_metadata(&task.path)
            .with_context(|| format!("cannot stat {:?}", task.path))?;
        let file_type = meta.file_type();
        if file_type.is_dir() {
            // Directory contents stay at the same depth; only extraction
            // consumes a level.
            for entry in fs::read_dir(&task.path)? {
                result.add_new_task(Task::new(entry?.path(), task.depth));
            }
            return Ok(());
        }
        if file_type.is_symlink() {
            debug!("{:?}: ignoring symlink", task.path);
            return Ok(());
        }
        if meta.len() == 0 {
            debug!("{:?}: ignoring empty file", task.path);
            return Ok(());
        }
        if magic::should_skip(&task.path, &self.config.skip_magic)? {
            return Ok(());
        }
        FileTask {
            config: self.config,
            scanner: &self.scanner,
            task,
            size: meta.len(),
            extract_dir: extract_dir_for_input(self.config, &task.path),
        }
        .process(result)
    }
}

/// Downstream tools choke on control characters in paths; such tasks are
/// skipped with a warning.
fn valid_path(path: &Path) -> bool {
    !path
        .as_os_str()
        .as_bytes()
        .iter()
        .any(|&b| b < 0x20 || b == 0x7f)
}

struct FileTask<'a> {
    config: &'a ExtractionConfig,
    scanner: &'a Scanner,
    task: &'a Task,
    size: u64,
    extract_dir: PathBuf,
}

impl<'a> FileTask<'a> {
    fn process(&self, result: &mut TaskResult) -> Result<()> {
        debug!("processing file {:?} ({} bytes)", self.task.path, self.size);
        let candidates = match self.scanner.scan(&self.task.path) {
            Ok(candidates) => candidates,
            Err(err) => {
                // A failed or timed-out scan leaves the file chunkless.
                result.add_report(Report::ScanError {
                    path: self.task.path.clone(),
                    message: err.to_string(),
                });
                Vec::new()
            }
        };
        let mut file =
            File::open(&self.task.path).with_context(|| format!("cannot open {:?}", self.task.path))?;
        let valid = self.validate_candidates(&mut file, candidates, result);
        let outer = remove_inner_chunks(valid);
        let unknown = calculate_unknown_chunks(&outer, self.size);

        if outer.is_empty() && unknown.is_empty() {
            // Whole files without any valid chunk are not carved as one
            // giant unknown chunk; they only get an entropy summary.
            self.report_entropy(&[self.task.path.clone()]);
        } else {
            let carved = carve_unknown_chunks(&self.extract_dir, &mut file, &unknown)?;
            self.report_entropy(&carved);
            for chunk in &outer {
                self.extract_chunk(&mut file, chunk, result)?;
            }
        }
        // The root extraction dir exists even for empty extractions.
        if self.task.depth == 0 {
            fs::create_dir_all(&self.extract_dir)?;
        }
        Ok(())
    }

    fn validate_candidates(
        &self,
        file: &mut File,
        candidates: Vec<Candidate>,
        result: &mut TaskResult,
    ) -> Vec<ValidChunk> {
        let mut valid = Vec::new();
        for candidate in candidates {
            if candidate.offset >= self.size {
                continue;
            }
            let mut reader = match LimitedStartReader::new(&mut *file, candidate.offset) {
                Ok(reader) => reader,
                Err(err) => {
                    result.add_report(Report::ValidationError {
                        handler: candidate.handler.name().to_owned(),
                        start_offset: candidate.offset,
                        message: err.to_string(),
                    });
                    continue;
                }
            };
            match candidate.handler.calculate_chunk(&mut reader, candidate.offset) {
                Ok(Some(chunk)) => {
                    if chunk.start_offset != candidate.offset
                        || chunk.end_offset <= chunk.start_offset
                        || chunk.end_offset > self.size
                    {
                        result.add_report(Report::ValidationError {
                            handler: candidate.handler.name().to_owned(),
                            start_offset: candidate.offset,
                            message: format!(
                                "chunk {:?} out of bounds for a {} byte file",
                                chunk, self.size
                            ),
                        });
                        continue;
                    }
                    debug!(
                        "found valid {} chunk {:?} in {:?}",
                        candidate.handler.name(),
                        chunk,
                        self.task.path
                    );
                    valid.push(ValidChunk {
                        chunk,
                        handler: candidate.handler.clone(),
                    });
                }
                Ok(None) => debug!(
                    "{:?}: match at offset {} is not a real {} container",
                    self.task.path,
                    candidate.offset,
                    candidate.handler.name()
                ),
                Err(err) => {
                    result.add_report(Report::ValidationError {
                        handler: candidate.handler.name().to_owned(),
                        start_offset: candidate.offset,
                        message: format!("{:#}", err),
                    });
                }
            }
        }
        valid
    }

    fn extract_chunk(
        &self,
        file: &mut File,
        chunk: &ValidChunk,
        result: &mut TaskResult,
    ) -> Result<()> {
        // Carving a chunk that spans the whole file would only duplicate
        // the input once per recursion level; extract it in place.
        let (inpath, outdir, carved_path) = if chunk.chunk.is_whole_file(self.size) {
            (self.task.path.clone(), self.extract_dir.clone(), None)
        } else {
            let carved = carve_valid_chunk(&self.extract_dir, file, chunk)?;
            let mut dirname = carved.file_name().unwrap_or_default().to_os_string();
            dirname.push(&self.config.extract_suffix);
            let outdir = self.extract_dir.join(dirname);
            (carved.clone(), outdir, Some(carved))
        };
        fs::create_dir_all(&outdir)?;

        match chunk.handler.extract(&inpath, &outdir) {
            Ok(()) => {
                if let Some(ref carved) = carved_path {
                    if !self.config.keep_extracted_chunks {
                        debug!("removing extracted chunk {:?}", carved);
                        if let Err(err) = fs::remove_file(carved) {
                            warn!("cannot remove carved chunk {:?}: {}", carved, err);
                        }
                    }
                }
            }
            Err(err) => {
                for report in err.reports {
                    result.add_report(report);
                }
            }
        }

        // Consistent partial output even when the extractor blew up.
        fix_extracted_directory(&outdir);
        if outdir.exists() {
            result.add_new_task(Task::new(outdir, self.task.depth + 1));
        }
        Ok(())
    }

    fn report_entropy(&self, paths: &[PathBuf]) {
        if self.task.depth >= self.config.entropy_depth {
            return;
        }
        for path in paths {
            if let Err(err) = entropy::report_entropy(path) {
                debug!("cannot compute entropy of {:?}: {:#}", path, err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_dir_naming() {
        let config = ExtractionConfig::new("/out");
        assert_eq!(
            extract_dir_for_input(&config, Path::new("/data/firmware.bin")),
            PathBuf::from("/out/firmware.bin_extract")
        );
        // Files inside the extraction root keep their relative position.
        assert_eq!(
            extract_dir_for_input(&config, Path::new("/out/firmware.bin_extract/0-9.unknown")),
            PathBuf::from("/out/firmware.bin_extract/0-9.unknown_extract")
        );
    }

    #[test]
    fn control_characters_invalidate_paths() {
        assert!(valid_path(Path::new("/tmp/fine-path_1.bin")));
        assert!(!valid_path(Path::new("/tmp/evil\npath")));
        assert!(!valid_path(Path::new("/tmp/evil\x07bell")));
    }
}
