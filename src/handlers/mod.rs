//! Format handlers: one detection-plus-extraction adapter per supported
//! container format.
//!
//! A handler contributes byte-pattern rules to the scanner, validates
//! candidate matches by parsing the container header to find its end,
//! and extracts carved chunks by shelling out to the format's external
//! extractor. Handlers are grouped into priority tiers; chunks found by
//! earlier tiers take precedence during reconciliation.

mod gzip;
mod squashfs;
mod tar;
mod zip;

pub use self::gzip::GzipHandler;
pub use self::squashfs::SquashfsHandler;
pub use self::tar::TarHandler;
pub use self::zip::ZipHandler;

use crate::chunk::Chunk;
use crate::report::{ExtractError, Report};
use anyhow::Result;
use lazy_static::lazy_static;
use log::{debug, error};
use std::io::{self, Read, Seek};
use std::path::Path;
use std::process::Command;
use std::sync::Arc;

/// Byte-pattern detection rule. `start_adjust` is added to the match
/// offset to find the chunk start; it is usually zero or negative, for
/// magics located somewhere inside a header. Candidates whose adjusted
/// start would be negative are dropped by the scanner.
#[derive(Debug, Clone, Copy)]
pub struct PatternRule {
    pub pattern: &'static [u8],
    pub start_adjust: i64,
}

pub trait ReadSeek: Read + Seek {}
impl<T: Read + Seek> ReadSeek for T {}

pub trait Handler: Send + Sync {
    /// Stable identifier, used in carved file names and logs.
    fn name(&self) -> &'static str;

    fn rules(&self) -> &'static [PatternRule];

    /// Parses the container header at `start_offset` and determines where
    /// the container ends. `Ok(None)` means the magic matched random
    /// bytes which do not form a real instance of the format. The reader
    /// refuses to seek below `start_offset`.
    fn calculate_chunk(&self, file: &mut dyn ReadSeek, start_offset: u64)
        -> Result<Option<Chunk>>;

    /// Command line of the external extractor for a carved chunk.
    fn extract_command(&self, inpath: &Path, outdir: &Path) -> Command;

    /// Runs the external extractor and classifies its failure modes.
    fn extract(&self, inpath: &Path, outdir: &Path) -> Result<(), ExtractError> {
        let mut cmd = self.extract_command(inpath, outdir);
        debug!("running extract command {:?}", cmd);
        let output = match cmd.output() {
            Ok(output) => output,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                error!("cannot run {:?}: is the extractor installed?", cmd);
                return Err(ExtractError::from(Report::ExtractorNotFound {
                    command: format!("{:?}", cmd),
                }));
            }
            Err(err) => {
                return Err(ExtractError::from(Report::UnknownError {
                    message: format!("failed to spawn {:?}: {}", cmd, err),
                }));
            }
        };
        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
            error!("extract command {:?} failed: {}", cmd, stderr.trim());
            Err(ExtractError::from(Report::ExtractCommandFailed {
                command: format!("{:?}", cmd),
                exit_code: output.status.code(),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr,
            }))
        }
    }
}

/// Handlers grouped into priority tiers. Earlier tiers are scanned
/// first, so their chunks go first into reconciliation and shadow
/// lower-tier matches they contain.
pub struct HandlerRegistry {
    tiers: Vec<Vec<Arc<dyn Handler>>>,
}

impl HandlerRegistry {
    pub fn new(tiers: Vec<Vec<Arc<dyn Handler>>>) -> Self {
        Self { tiers }
    }

    pub fn tiers(&self) -> &[Vec<Arc<dyn Handler>>] {
        &self.tiers
    }

    /// The built-in handler set: filesystems before archives before
    /// plain compression formats.
    pub fn builtin() -> Arc<Self> {
        BUILTIN.clone()
    }
}

lazy_static! {
    static ref BUILTIN: Arc<HandlerRegistry> = Arc::new(HandlerRegistry::new(vec![
        vec![Arc::new(SquashfsHandler)],
        vec![Arc::new(TarHandler), Arc::new(ZipHandler)],
        vec![Arc::new(GzipHandler)],
    ]));
}
