//! Work items and extraction outcome reporting.

use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;

/// Unit of work scheduled by the worker pool: one path at one recursion
/// depth. Extracted outputs become tasks at `depth + 1`; the contents of
/// a directory become tasks at the same depth.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    pub path: PathBuf,
    pub depth: u64,
}

impl Task {
    pub fn new<P: Into<PathBuf>>(path: P, depth: u64) -> Self {
        Self {
            path: path.into(),
            depth,
        }
    }
}

/// Accumulates the outcome of one task: follow-up tasks to schedule and
/// reports about anything that went wrong along the way.
#[derive(Debug, Default)]
pub struct TaskResult {
    pub new_tasks: Vec<Task>,
    pub reports: Vec<Report>,
}

impl TaskResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_new_task(&mut self, task: Task) {
        self.new_tasks.push(task);
    }

    pub fn add_report(&mut self, report: Report) {
        self.reports.push(report);
    }
}

/// Recorded failure during an extraction run. Reports never abort their
/// task; they are collected and surfaced at the end. Any report in the
/// final list makes the run exit nonzero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Report {
    #[error("scan of {path:?} failed: {message}")]
    ScanError { path: PathBuf, message: String },
    #[error("{handler} handler rejected candidate at offset {start_offset}: {message}")]
    ValidationError {
        handler: String,
        start_offset: u64,
        message: String,
    },
    #[error("extract command {command} failed with exit code {exit_code:?}")]
    ExtractCommandFailed {
        command: String,
        exit_code: Option<i32>,
        stdout: String,
        stderr: String,
    },
    #[error("cannot run {command}: is the extractor installed?")]
    ExtractorNotFound { command: String },
    #[error("extraction directories already exist: {paths:?}")]
    ExtractDirectoriesExist { paths: Vec<PathBuf> },
    #[error("unknown error: {message}")]
    UnknownError { message: String },
}

/// Failure of a handler's external extractor, carrying one report per
/// underlying problem. The driver appends them to the task result and
/// continues with the remaining chunks.
#[derive(Debug, Error)]
#[error("extraction failed")]
pub struct ExtractError {
    pub reports: Vec<Report>,
}

impl ExtractError {
    pub fn new(reports: Vec<Report>) -> Self {
        Self { reports }
    }
}

impl From<Report> for ExtractError {
    fn from(report: Report) -> Self {
        Self {
            reports: vec![report],
        }
    }
}
