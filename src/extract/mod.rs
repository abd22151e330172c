//! Archive extraction
//!
//! Streams the entries of one capture archive, materializing the
//! unvalidated object tree into the cache and buffering the single
//! trust-anchor candidate. Gzip-compressed archives are handled
//! transparently. Tracks the maximum modification time seen across the
//! extracted objects and recovers the authority base identifier from the
//! first object path.

use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Component, Path, PathBuf};

use crate::locate::Archive;

/// Path segment marking the root of the unvalidated object tree
pub const UNVALIDATED_SEGMENT: &str = "unvalidated";

/// File-name suffix of a trust-anchor certificate entry
pub const TA_SUFFIX: &str = ".tal.cer";

/// Errors during extraction
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("failed to open archive {path}: {source}")]
    Open { path: PathBuf, source: io::Error },

    #[error("failed to read archive {archive}: {source}")]
    Read { archive: String, source: io::Error },

    #[error("failed to write {path}: {source}")]
    Write { path: PathBuf, source: io::Error },

    #[error("duplicate trust anchor in archive {archive}")]
    DuplicateTrustAnchor { archive: String },
}

/// Outcome of extracting one archive
#[derive(Debug)]
pub struct Extraction {
    /// Number of unvalidated objects materialized into the cache
    pub object_count: u64,

    /// Maximum modification time among the extracted objects; the zero
    /// instant when the archive carried no objects
    pub watermark: DateTime<Utc>,

    /// Authority base identifier, the first path segment after the
    /// `unvalidated` root of the first object seen
    pub authority: Option<String>,

    /// Buffered trust-anchor candidate bytes, at most one per archive
    pub trust_anchor: Option<Vec<u8>>,
}

/// Extract `archive` into `cache_dir`.
pub fn extract(archive: &Archive, cache_dir: &Path) -> Result<Extraction, ExtractError> {
    let reader = open_reader(&archive.path)?;
    let mut tar = tar::Archive::new(reader);

    let mut extraction = Extraction {
        object_count: 0,
        watermark: DateTime::UNIX_EPOCH,
        authority: None,
        trust_anchor: None,
    };

    let entries = tar.entries().map_err(|source| ExtractError::Read {
        archive: archive.file_name.clone(),
        source,
    })?;

    for entry in entries {
        let mut entry = entry.map_err(|source| ExtractError::Read {
            archive: archive.file_name.clone(),
            source,
        })?;

        if !entry.header().entry_type().is_file() {
            continue;
        }

        let entry_path = entry
            .path()
            .map_err(|source| ExtractError::Read {
                archive: archive.file_name.clone(),
                source,
            })?
            .into_owned();

        if let Some(rel) = unvalidated_rel_path(&entry_path) {
            let mtime = entry.header().mtime().unwrap_or(0);
            write_object(&mut entry, cache_dir, &rel)?;

            if extraction.authority.is_none() {
                if let Some(Component::Normal(first)) = rel.components().next() {
                    extraction.authority = Some(first.to_string_lossy().to_string());
                }
            }

            let modified =
                DateTime::from_timestamp(mtime as i64, 0).unwrap_or(DateTime::UNIX_EPOCH);
            if modified > extraction.watermark {
                extraction.watermark = modified;
            }

            extraction.object_count += 1;
        } else if is_trust_anchor(&entry_path) {
            if extraction.trust_anchor.is_some() {
                return Err(ExtractError::DuplicateTrustAnchor {
                    archive: archive.file_name.clone(),
                });
            }

            let mut buf = Vec::new();
            entry.read_to_end(&mut buf).map_err(|source| ExtractError::Read {
                archive: archive.file_name.clone(),
                source,
            })?;
            extraction.trust_anchor = Some(buf);
        }
    }

    Ok(extraction)
}

/// Open the archive, sniffing the gzip magic to pick the reader.
fn open_reader(path: &Path) -> Result<Box<dyn Read>, ExtractError> {
    let open_err = |source| ExtractError::Open {
        path: path.to_path_buf(),
        source,
    };

    let mut file = File::open(path).map_err(open_err)?;

    let mut magic = [0u8; 2];
    let n = file.read(&mut magic).map_err(open_err)?;
    file.seek(SeekFrom::Start(0)).map_err(open_err)?;

    if n == 2 && magic == [0x1f, 0x8b] {
        Ok(Box::new(GzDecoder::new(file)))
    } else {
        Ok(Box::new(file))
    }
}

/// Relative cache path of an unvalidated object: everything after the
/// `unvalidated` segment. `None` when the path carries no such segment,
/// nothing after it, or an upward traversal after it.
fn unvalidated_rel_path(path: &Path) -> Option<PathBuf> {
    let mut seen = false;
    let mut rel = PathBuf::new();

    for component in path.components() {
        match component {
            Component::Normal(name) if seen => rel.push(name),
            Component::Normal(name) if name == UNVALIDATED_SEGMENT => seen = true,
            Component::ParentDir if seen => return None,
            _ => {}
        }
    }

    if seen && rel.components().next().is_some() {
        Some(rel)
    } else {
        None
    }
}

fn is_trust_anchor(path: &Path) -> bool {
    path.file_name()
        .map(|n| n.to_string_lossy().ends_with(TA_SUFFIX))
        .unwrap_or(false)
}

fn write_object(entry: &mut impl Read, cache_dir: &Path, rel: &Path) -> Result<(), ExtractError> {
    let dest = cache_dir.join(rel);

    let write_err = |source| ExtractError::Write {
        path: dest.clone(),
        source,
    };

    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).map_err(write_err)?;
    }

    let mut out = File::create(&dest).map_err(write_err)?;
    io::copy(entry, &mut out).map_err(write_err)?;
    Ok(())
}
