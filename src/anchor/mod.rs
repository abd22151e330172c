//! Trust anchor handling
//!
//! A buffered trust-anchor candidate is normalized to DER before it is
//! installed into the cache: older captures occasionally carry the
//! certificate in PEM form, and the validator only accepts DER. Conversion
//! goes through the external re-encoder rather than an in-process X.509
//! stack.
//!
//! Also resolves the per-archive TA/TAL file names. One authority changed
//! its repository layout mid-history; its archives carry a marker field in
//! the file name, and the marker becomes a suffix so variants from both
//! sides of the change coexist without overwriting each other.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::exec::CommandRunner;

const PEM_HEADER: &[u8] = b"-----BEGIN CERTIFICATE-----";

/// Authority whose archives carry a historical layout marker
const SPLIT_AUTHORITY_MARKER: &str = "apnic";

/// Errors during trust-anchor normalization and installation
#[derive(Debug, thiserror::Error)]
pub enum AnchorError {
    #[error("failed to invoke certificate re-encoder: {0}")]
    Invoke(#[from] io::Error),

    #[error("failed to normalize trust anchor encoding (re-encoder exited with {status:?})")]
    Reencode { status: Option<i32> },

    #[error("failed to write trust anchor {path}: {source}")]
    Write { path: PathBuf, source: io::Error },
}

/// Detected certificate encoding of a trust-anchor candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaEncoding {
    /// Textual encoding with the PEM certificate header
    Pem,
    /// Binary DER encoding
    Der,
}

/// A buffered trust-anchor candidate for one archive
#[derive(Debug)]
pub struct TrustAnchor {
    /// Owning authority base identifier
    pub authority: String,

    /// Raw candidate bytes as found in the archive
    pub raw: Vec<u8>,

    pub encoding: TaEncoding,
}

impl TrustAnchor {
    pub fn new(authority: String, raw: Vec<u8>) -> Self {
        let encoding = detect_encoding(&raw);
        Self {
            authority,
            raw,
            encoding,
        }
    }

    /// Produce the DER bytes for this anchor, re-encoding through the
    /// external collaborator when the candidate is PEM. DER input passes
    /// through byte-identical.
    pub fn to_der(&self, runner: &dyn CommandRunner, openssl: &str) -> Result<Vec<u8>, AnchorError> {
        match self.encoding {
            TaEncoding::Der => Ok(self.raw.clone()),
            TaEncoding::Pem => {
                println!("Found a TA certificate in PEM format, converting to DER");

                let args: Vec<String> = ["x509", "-inform", "PEM", "-outform", "DER"]
                    .iter()
                    .map(|s| s.to_string())
                    .collect();
                let output = runner.run(openssl, &args, &self.raw)?;

                if !output.success() {
                    return Err(AnchorError::Reencode {
                        status: output.status,
                    });
                }

                Ok(output.stdout)
            }
        }
    }
}

/// Resolved TA and TAL file names for one archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaNames {
    /// Trust-anchor certificate file name under `<cache>/<authority>/ta/`
    pub ta_file: String,

    /// TAL descriptor file name under the TAL directory
    pub tal_file: String,
}

/// Derive the TA/TAL file names for `authority` from the archive's own
/// file name. A dot-separated field starting with the split-authority
/// marker becomes a suffix; otherwise the canonical unsuffixed names are
/// used.
pub fn resolve_names(authority: &str, archive_file_name: &str) -> TaNames {
    let mut names = TaNames {
        ta_file: "ta.cer".to_string(),
        tal_file: format!("{}.tal", authority),
    };

    if archive_file_name.contains(SPLIT_AUTHORITY_MARKER) {
        for field in archive_file_name.split('.') {
            if field.starts_with(SPLIT_AUTHORITY_MARKER) {
                names.ta_file = format!("ta-{}.cer", field);
                names.tal_file = format!("{}-{}.tal", authority, field);
            }
        }
    }

    names
}

/// Install the normalized DER bytes at
/// `<cache>/<authority>/ta/<ta-file>`, returning the written path.
pub fn install(
    der: &[u8],
    cache_dir: &Path,
    authority: &str,
    names: &TaNames,
) -> Result<PathBuf, AnchorError> {
    let ta_dir = cache_dir.join(authority).join("ta");
    let ta_path = ta_dir.join(&names.ta_file);

    let write_err = |source| AnchorError::Write {
        path: ta_path.clone(),
        source,
    };

    fs::create_dir_all(&ta_dir).map_err(write_err)?;
    fs::write(&ta_path, der).map_err(write_err)?;

    Ok(ta_path)
}

/// Scan the candidate's lines for the PEM certificate header.
fn detect_encoding(raw: &[u8]) -> TaEncoding {
    for line in raw.split(|&b| b == b'\n') {
        if line.starts_with(PEM_HEADER) {
            return TaEncoding::Pem;
        }
    }
    TaEncoding::Der
}
