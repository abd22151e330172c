//! Pipeline orchestration
//!
//! Drives one full reconstruction run for a single date: locate archives,
//! reset the output roots, extract each archive to completion, normalize
//! and install its trust anchor, synthesize its TAL, then hand the
//! aggregated timestamp watermark to the downstream validator and clean up
//! fetched archives. Strictly sequential; each stage finishes before the
//! next starts.

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use serde::Serialize;
use std::fs;
use std::io;
use std::path::Path;

use crate::anchor::{self, AnchorError, TrustAnchor};
use crate::cache::{self, ResetError};
use crate::config::Config;
use crate::exec::CommandRunner;
use crate::extract::{self, ExtractError, Extraction};
use crate::locate::{self, Archive, LocateError};
use crate::tal::{self, TalError};

/// Fatal pipeline conditions
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("archive location failed: {0}")]
    Locate(#[from] LocateError),

    #[error("cache reset failed: {0}")]
    Reset(#[from] ResetError),

    #[error("extraction failed: {0}")]
    Extract(#[from] ExtractError),

    #[error("trust anchor handling failed: {0}")]
    Anchor(#[from] AnchorError),

    #[error("TAL synthesis failed: {0}")]
    Tal(#[from] TalError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl PipelineError {
    /// Process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            PipelineError::Locate(_) => 10,
            PipelineError::Reset(_) => 20,
            PipelineError::Extract(_) => 30,
            PipelineError::Anchor(_) => 40,
            PipelineError::Tal(_) => 41,
            PipelineError::Io(_) => 1,
        }
    }
}

/// Summary of one completed run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// The reconstructed date
    pub date: NaiveDate,

    /// Archives processed
    pub archives_processed: usize,

    /// Unvalidated objects materialized into the cache
    pub objects_extracted: u64,

    /// Trust anchors installed (ignored and missing anchors excluded)
    pub trust_anchors_installed: usize,

    /// TAL descriptors written
    pub tals_written: usize,

    /// Maximum modification time across all extracted objects
    pub watermark: DateTime<Utc>,

    /// Exit status of the downstream validator, `None` when it could not
    /// be started or was killed by a signal
    pub validator_status: Option<i32>,
}

/// One reconstruction run over a single date
pub struct Pipeline<'a> {
    config: &'a Config,
    runner: &'a dyn CommandRunner,
}

impl<'a> Pipeline<'a> {
    pub fn new(config: &'a Config, runner: &'a dyn CommandRunner) -> Self {
        Self { config, runner }
    }

    /// Run the full reconstruction for `date`.
    pub fn run(&self, date: NaiveDate) -> Result<RunReport, PipelineError> {
        println!("Processing data for {}", date);

        let fetch_dir = std::env::temp_dir().join(format!("rpki-replay-{}", std::process::id()));
        fs::create_dir_all(&fetch_dir)?;

        let archives = locate::locate(self.config, date, &fetch_dir)?;
        if archives.is_empty() {
            println!("No archives found for {}", date);
        }

        let cache_dir = self.config.cache_dir();
        let tal_dir = self.config.tal_dir();

        println!("Cleaning out {} and {}", cache_dir.display(), tal_dir.display());
        cache::reset(&cache_dir, &tal_dir)?;

        let mut report = RunReport {
            date,
            archives_processed: 0,
            objects_extracted: 0,
            trust_anchors_installed: 0,
            tals_written: 0,
            watermark: DateTime::UNIX_EPOCH,
            validator_status: None,
        };

        for archive in &archives {
            println!("Processing {}", archive.file_name);

            let extraction = extract::extract(archive, &cache_dir)?;
            println!("OK ({} objects)", extraction.object_count);

            report.objects_extracted += extraction.object_count;
            if extraction.watermark > report.watermark {
                report.watermark = extraction.watermark;
            }

            if self.install_anchor(archive, extraction, &cache_dir, &tal_dir)? {
                report.trust_anchors_installed += 1;
                report.tals_written += 1;
            }

            report.archives_processed += 1;
        }

        println!("Highest timestamp found: {}", report.watermark);

        report.validator_status = self.invoke_validator(date, &cache_dir, &tal_dir, report.watermark);

        // Fetched archives are transient; local archives stay in place.
        // Cleanup only runs after a successful pipeline so a failed run
        // leaves its inputs behind for diagnosis.
        cleanup_fetched(&archives);
        let _ = fs::remove_dir(&fetch_dir);

        Ok(report)
    }

    /// Normalize, install and describe the archive's trust anchor.
    /// Returns whether a TA/TAL pair was produced.
    fn install_anchor(
        &self,
        archive: &Archive,
        extraction: Extraction,
        cache_dir: &Path,
        tal_dir: &Path,
    ) -> Result<bool, PipelineError> {
        let Some(raw) = extraction.trust_anchor else {
            eprintln!("Warning: found no TA in {}", archive.file_name);
            return Ok(false);
        };

        let Some(authority) = extraction.authority else {
            eprintln!(
                "Warning: TA in {} has no unvalidated objects to name its authority, dropping it",
                archive.file_name
            );
            return Ok(false);
        };

        if self.config.is_ignored(&authority) {
            println!("Ignoring TAL for {}", authority);
            return Ok(false);
        }

        let anchor = TrustAnchor::new(authority, raw);
        let der = anchor.to_der(self.runner, &self.config.openssl.command)?;

        let names = anchor::resolve_names(&anchor.authority, &archive.file_name);
        let ta_path = anchor::install(&der, cache_dir, &anchor.authority, &names)?;
        println!("Moved TA to {}", ta_path.display());

        let tal_path = tal::synthesize(
            tal_dir,
            &anchor.authority,
            &names,
            &der,
            self.runner,
            &self.config.openssl.command,
        )?;
        println!("Created {}", tal_path.display());

        Ok(true)
    }

    /// Invoke the downstream validator with its notion of "now" forced to
    /// the watermark. Its failure is reported, never fatal: the snapshot
    /// has been reconstructed either way.
    fn invoke_validator(
        &self,
        date: NaiveDate,
        cache_dir: &Path,
        tal_dir: &Path,
        watermark: DateTime<Utc>,
    ) -> Option<i32> {
        let output_path = self.config.validator_output_path(date);
        let log_path = self.config.validator_log_path(date);

        let args: Vec<String> = vec![
            "--cache".to_string(),
            cache_dir.display().to_string(),
            "--tals".to_string(),
            tal_dir.display().to_string(),
            "--format".to_string(),
            self.config.validator.output_format.clone(),
            "--output".to_string(),
            output_path.display().to_string(),
            "--log".to_string(),
            log_path.display().to_string(),
            "--current-time".to_string(),
            watermark.to_rfc3339_opts(SecondsFormat::Secs, true),
        ];

        println!("Running {} for {}", self.config.validator.command, date);

        match self.runner.run(&self.config.validator.command, &args, b"") {
            Ok(output) => {
                if !output.success() {
                    eprintln!(
                        "Warning: validator exited with {:?}: {}",
                        output.status,
                        String::from_utf8_lossy(&output.stderr).trim()
                    );
                }
                output.status
            }
            Err(e) => {
                eprintln!("Warning: failed to invoke validator: {}", e);
                None
            }
        }
    }
}

fn cleanup_fetched(archives: &[Archive]) {
    for archive in archives {
        if !archive.fetched {
            continue;
        }
        if let Err(e) = fs::remove_file(&archive.path) {
            eprintln!("Warning: failed to remove {}: {}", archive.path.display(), e);
        }
    }
}
