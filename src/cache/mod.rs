//! Cache reset
//!
//! Each run starts from empty output roots. Both the unvalidated-object
//! cache and the TAL directory are wiped and recreated before any archive
//! is opened; a half-reset cache must never reach the validator, so any
//! failure here aborts the run.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Errors while resetting an output root
#[derive(Debug, thiserror::Error)]
pub enum ResetError {
    #[error("failed to remove {dir}: {source}")]
    Remove { dir: PathBuf, source: io::Error },

    #[error("failed to create {dir}: {source}")]
    Create { dir: PathBuf, source: io::Error },
}

/// Wipe and recreate both output roots.
pub fn reset(cache_dir: &Path, tal_dir: &Path) -> Result<(), ResetError> {
    reset_dir(cache_dir)?;
    reset_dir(tal_dir)?;
    Ok(())
}

fn reset_dir(dir: &Path) -> Result<(), ResetError> {
    match fs::remove_dir_all(dir) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(source) => {
            return Err(ResetError::Remove {
                dir: dir.to_path_buf(),
                source,
            })
        }
    }

    fs::create_dir_all(dir).map_err(|source| ResetError::Create {
        dir: dir.to_path_buf(),
        source,
    })
}
