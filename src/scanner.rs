//! Multi-pattern scanner producing chunk candidates.
//!
//! All pattern rules of a priority tier are compiled into a single
//! Aho-Corasick automaton, so one pass over the memory-mapped file finds
//! every handler's magic in linear time. Matches become `(handler,
//! offset)` candidates after the per-rule start adjustment; validation
//! of the candidates is the driver's business.

use crate::handlers::{Handler, HandlerRegistry};
use aho_corasick::AhoCorasick;
use anyhow::{Context, Result};
use log::debug;
use memmap::Mmap;
use std::fs::File;
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A pattern match, adjusted to the would-be chunk start. Not yet
/// validated.
pub struct Candidate {
    pub handler: Arc<dyn Handler>,
    pub offset: u64,
}

#[derive(thiserror::Error, Debug)]
pub enum ScanError {
    #[error("scan did not finish within {0:?}")]
    Timeout(Duration),
    #[error("I/O error")]
    Io(#[from] io::Error),
}

struct TierMatcher {
    automaton: AhoCorasick,
    /// Handler and start adjustment per pattern, indexed like the
    /// automaton's patterns.
    rules: Vec<(Arc<dyn Handler>, i64)>,
}

/// Compiled form of a handler registry. Immutable once built and safe to
/// share between worker threads.
pub struct Scanner {
    tiers: Vec<TierMatcher>,
    timeout: Duration,
}

impl Scanner {
    /// Compiles one automaton per priority tier. Built once per run; the
    /// automatons are reused for every scanned file.
    pub fn new(registry: &HandlerRegistry, timeout: Duration) -> Result<Self> {
        let mut tiers = Vec::with_capacity(registry.tiers().len());
        for tier in registry.tiers() {
            let mut patterns: Vec<&'static [u8]> = Vec::new();
            let mut rules = Vec::new();
            for handler in tier {
                for rule in handler.rules() {
                    patterns.push(rule.pattern);
                    rules.push((handler.clone(), rule.start_adjust));
                }
            }
            let automaton =
                AhoCorasick::new(&patterns).context("cannot compile handler patterns")?;
            tiers.push(TierMatcher { automaton, rules });
        }
        Ok(Self { tiers, timeout })
    }

    /// Scans `path` and returns all candidates, ordered by priority tier.
    /// The scan aborts with `ScanError::Timeout` when the deadline is
    /// exceeded; the caller then treats the file as having no chunks.
    pub fn scan(&self, path: &Path) -> Result<Vec<Candidate>, ScanError> {
        let file = File::open(path)?;
        if file.metadata()?.len() == 0 {
            return Ok(Vec::new());
        }
        let mmap = unsafe { Mmap::map(&file)? };
        let deadline = Instant::now() + self.timeout;
        let mut candidates = Vec::new();
        for tier in &self.tiers {
            for m in tier.automaton.find_overlapping_iter(&mmap[..]) {
                if Instant::now() > deadline {
                    return Err(ScanError::Timeout(self.timeout));
                }
                let (handler, start_adjust) = &tier.rules[m.pattern().as_usize()];
                let start = m.start() as i64 + start_adjust;
                if start < 0 {
                    debug!(
                        "dropping {} match at offset {}: chunk would start before the file",
                        handler.name(),
                        m.start()
                    );
                    continue;
                }
                candidates.push(Candidate {
                    handler: handler.clone(),
                    offset: start as u64,
                });
            }
        }
        Ok(candidates)
    }
}
