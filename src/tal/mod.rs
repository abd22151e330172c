//! TAL synthesis
//!
//! Writes one trust anchor locator per accepted trust anchor: the rsync
//! retrieval URI for the installed certificate, a blank line, and the
//! anchor's subject public key as a base64 block. The key comes out of the
//! external certificate-inspection collaborator; its PEM framing is
//! stripped and the body is decoded and re-wrapped so a garbled key fails
//! the run instead of producing an unusable TAL.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::anchor::TaNames;
use crate::exec::CommandRunner;

/// Errors during TAL synthesis
#[derive(Debug, thiserror::Error)]
pub enum TalError {
    #[error("failed to invoke certificate inspector: {0}")]
    Invoke(#[from] io::Error),

    #[error("failed to derive TAL public key (inspector exited with {status:?})")]
    KeyExtract { status: Option<i32> },

    #[error("failed to derive TAL public key: {0}")]
    KeyFormat(String),

    #[error("failed to write TAL {path}: {source}")]
    Write { path: PathBuf, source: io::Error },
}

/// Width of the re-wrapped base64 key block
const KEY_LINE_WIDTH: usize = 64;

/// Synthesize the TAL for an installed trust anchor, returning the
/// descriptor path.
pub fn synthesize(
    tal_dir: &Path,
    authority: &str,
    names: &TaNames,
    der: &[u8],
    runner: &dyn CommandRunner,
    openssl: &str,
) -> Result<PathBuf, TalError> {
    let args: Vec<String> = ["x509", "-inform", "DER", "-pubkey", "-noout"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    let output = runner.run(openssl, &args, der)?;

    if !output.success() {
        return Err(TalError::KeyExtract {
            status: output.status,
        });
    }

    let key_block = extract_key_block(&output.stdout)?;

    let tal_path = tal_dir.join(&names.tal_file);
    let uri = format!("rsync://{}/ta/{}", authority, names.ta_file);
    let contents = format!("{}\n\n{}\n", uri, key_block);

    fs::write(&tal_path, contents).map_err(|source| TalError::Write {
        path: tal_path.clone(),
        source,
    })?;

    Ok(tal_path)
}

/// Strip the PEM framing from the inspector's output and re-wrap the
/// decoded key as a canonical base64 block.
fn extract_key_block(pem: &[u8]) -> Result<String, TalError> {
    let text = std::str::from_utf8(pem)
        .map_err(|_| TalError::KeyFormat("inspector output is not UTF-8".to_string()))?;

    let body: String = text
        .lines()
        .filter(|line| !line.starts_with("-----"))
        .map(str::trim)
        .collect();

    if body.is_empty() {
        return Err(TalError::KeyFormat("inspector output held no key body".to_string()));
    }

    let key = STANDARD
        .decode(body.as_bytes())
        .map_err(|e| TalError::KeyFormat(format!("invalid base64 key body: {}", e)))?;

    let encoded = STANDARD.encode(key);
    let wrapped: Vec<&str> = encoded
        .as_bytes()
        .chunks(KEY_LINE_WIDTH)
        // chunks of an ASCII string stay ASCII
        .map(|c| std::str::from_utf8(c).unwrap_or(""))
        .collect();

    Ok(wrapped.join("\n"))
}
