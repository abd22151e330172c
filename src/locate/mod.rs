//! Archive location and acquisition
//!
//! Local mode scans a directory of archive captures for file names carrying
//! the requested date. Remote mode attempts one fetch per known top-level
//! authority; an authority with no capture for that date is skipped, not
//! fatal.

use chrono::NaiveDate;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use crate::config::{ArchiveSource, Config};

/// The canonical top-level authority TAL identifiers, in processing order.
pub const KNOWN_TALS: &[&str] = &["afrinic", "apnic", "arin", "lacnic", "ripencc"];

/// Errors that make the locator itself unusable
#[derive(Debug, thiserror::Error)]
pub enum LocateError {
    #[error("failed to list archive directory {dir}: {source}")]
    ListDir { dir: PathBuf, source: io::Error },

    #[error("failed to initialize HTTP client: {0}")]
    Client(reqwest::Error),

    #[error("failed to store fetched archive {path}: {source}")]
    Store { path: PathBuf, source: io::Error },
}

/// One archive capture scheduled for processing
#[derive(Debug, Clone)]
pub struct Archive {
    /// Bare file name, also the input to historical layout resolution
    pub file_name: String,

    /// Local path of the (possibly fetched) archive file
    pub path: PathBuf,

    /// Whether the file was fetched into a temporary area and should be
    /// deleted after a successful run
    pub fetched: bool,
}

/// Locate the archives to process for `date`.
///
/// Remote-mode fetches land in `fetch_dir`, which must already exist.
pub fn locate(config: &Config, date: NaiveDate, fetch_dir: &Path) -> Result<Vec<Archive>, LocateError> {
    match config.archive_source() {
        ArchiveSource::LocalDir(dir) => locate_local(&dir, date),
        ArchiveSource::RemoteBase(template) => fetch_remote(&template, date, fetch_dir),
    }
}

fn locate_local(dir: &Path, date: NaiveDate) -> Result<Vec<Archive>, LocateError> {
    let date_str = date.format("%Y-%m-%d").to_string();
    let mut archives = Vec::new();

    let entries = fs::read_dir(dir).map_err(|source| LocateError::ListDir {
        dir: dir.to_path_buf(),
        source,
    })?;

    for entry in entries {
        let entry = entry.map_err(|source| LocateError::ListDir {
            dir: dir.to_path_buf(),
            source,
        })?;

        let file_name = entry.file_name().to_string_lossy().to_string();
        if !file_name.contains(&date_str) {
            continue;
        }

        println!("Found {}", file_name);
        archives.push(Archive {
            file_name,
            path: entry.path(),
            fetched: false,
        });
    }

    // Directory-listing order is filesystem-dependent; sort for a stable
    // processing order.
    archives.sort_by(|a, b| a.file_name.cmp(&b.file_name));

    Ok(archives)
}

fn fetch_remote(template: &str, date: NaiveDate, fetch_dir: &Path) -> Result<Vec<Archive>, LocateError> {
    let date_str = date.format("%Y-%m-%d").to_string();
    let client = reqwest::blocking::Client::builder()
        .build()
        .map_err(LocateError::Client)?;

    let mut archives = Vec::new();

    for tal in KNOWN_TALS {
        let url = template.replace("{tal}", tal).replace("{date}", &date_str);

        let mut response = match client.get(&url).send() {
            Ok(r) => r,
            Err(e) => {
                eprintln!("Skipping {}: fetch failed ({})", tal, e);
                continue;
            }
        };

        if !response.status().is_success() {
            eprintln!("Skipping {}: no archive for {} ({})", tal, date_str, response.status());
            continue;
        }

        let file_name = format!("{}-{}.tgz", tal, date_str);
        let path = fetch_dir.join(&file_name);
        let mut out = File::create(&path).map_err(|source| LocateError::Store {
            path: path.clone(),
            source,
        })?;

        // Stream the body to disk; captures can be far larger than we
        // want to hold in memory.
        let written = match io::copy(&mut response, &mut out) {
            Ok(n) => n,
            Err(e) => {
                eprintln!("Skipping {}: failed to read archive body ({})", tal, e);
                drop(out);
                let _ = fs::remove_file(&path);
                continue;
            }
        };

        println!("Fetched {} ({} bytes)", file_name, written);
        archives.push(Archive {
            file_name,
            path,
            fetched: true,
        });
    }

    Ok(archives)
}
