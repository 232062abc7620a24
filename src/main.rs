//! CLI wrapper for bincarve.
//!
//! This code uses the public crate interface to provide a handy shell
//! command.

use anyhow::{Context, Result};
use bincarve::{process_files, signals, ExtractionConfig, Report};
use console::style;
use std::fs::File;
use std::path::PathBuf;
use std::process;
use structopt::StructOpt;

#[derive(Debug, StructOpt)]
#[structopt(
    name = "bincarve",
    about = "Recursively extracts containers embedded in binary blobs"
)]
struct Opt {
    /// Extracts into this directory (created if missing)
    #[structopt(
        short = "e",
        long,
        value_name = "DIR",
        default_value = ".",
        parse(from_os_str)
    )]
    extract_dir: PathBuf,
    /// Recursion depth: how deep nested containers are extracted
    #[structopt(short, long, value_name = "N", default_value = "10")]
    depth: u64,
    /// Reports entropy of unidentified regions up to this depth
    #[structopt(long, value_name = "N", default_value = "1")]
    entropy_depth: u64,
    /// Uses N parallel workers [default: CPU count]
    #[structopt(short = "n", long, value_name = "N")]
    workers: Option<usize>,
    /// Removes existing extraction directories first
    #[structopt(short, long)]
    force: bool,
    /// Keeps carved chunk files after successful extraction
    #[structopt(short, long)]
    keep_extracted_chunks: bool,
    /// Skips input files whose magic starts with one of these prefixes
    #[structopt(long, value_name = "PREFIX")]
    skip_magic: Vec<String>,
    /// Writes all recorded reports to FILE as JSON
    #[structopt(long, value_name = "FILE", parse(from_os_str))]
    report: Option<PathBuf>,
    /// Does not display progress indication
    #[structopt(short, long)]
    quiet: bool,
    /// Verbose mode, enables debug logs
    #[structopt(short, long)]
    verbose: bool,
    /// Input files
    #[structopt(value_name = "FILE", required = true, parse(from_os_str))]
    files: Vec<PathBuf>,
}

impl Opt {
    fn to_config(&self) -> ExtractionConfig {
        let mut config = ExtractionConfig::new(&self.extract_dir);
        config.max_depth = self.depth;
        config.entropy_depth = self.entropy_depth;
        config.force_extract = self.force;
        config.keep_extracted_chunks = self.keep_extracted_chunks;
        config.show_progress = !self.quiet;
        if let Some(workers) = self.workers {
            config.process_num = workers.max(1);
        }
        if !self.skip_magic.is_empty() {
            config.skip_magic = self.skip_magic.clone();
        }
        config
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default)).init();
}

fn run(opt: &Opt) -> Result<Vec<Report>> {
    signals::install_handler()?;
    let reports = process_files(&opt.to_config(), &opt.files)?;
    if let Some(ref path) = opt.report {
        let f = File::create(path).with_context(|| format!("cannot create {:?}", path))?;
        serde_json::to_writer_pretty(f, &reports).context("cannot serialize reports")?;
    }
    Ok(reports)
}

fn main() {
    let opt = Opt::from_args();
    init_logging(opt.verbose);
    match run(&opt) {
        Ok(reports) => {
            for report in &reports {
                eprintln!("{} {}", style("Error:").red().bold(), report);
            }
            if reports.is_empty() && !signals::is_cancelled() {
                process::exit(0);
            }
            process::exit(1);
        }
        Err(err) => {
            eprintln!("{} {:#}", style("Error:").red().bold(), err);
            process::exit(1);
        }
    }
}
