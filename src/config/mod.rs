//! Run configuration (TOML)
//!
//! The configuration is loaded once at startup, validated, and then passed
//! by shared reference into every pipeline stage. Nothing mutates it after
//! load.

use chrono::NaiveDate;
use serde::Deserialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Error types for configuration loading
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] io::Error),

    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("validation error: {0}")]
    Validation(String),
}

/// Where archives come from
#[derive(Debug, Clone, Deserialize)]
pub struct ArchiveSection {
    /// Local directory holding archive captures (local mode)
    pub dir: Option<String>,

    /// Remote URI template with `{tal}` and `{date}` placeholders
    /// (remote mode)
    pub base_uri: Option<String>,
}

/// Output roots and trust-anchor policy
#[derive(Debug, Clone, Deserialize)]
pub struct CacheSection {
    /// Root of the unvalidated-object cache fed to the validator
    pub unvalidated_dir: String,

    /// Directory receiving synthesized TAL descriptors
    pub tal_dir: String,

    /// Authority identifiers whose trust anchors must never be accepted.
    /// Their unvalidated objects are still extracted.
    pub ignore_tals: Vec<String>,
}

/// Downstream validator invocation
#[derive(Debug, Clone, Deserialize)]
pub struct ValidatorSection {
    /// Validator program
    #[serde(default = "default_validator_command")]
    pub command: String,

    /// Output format passed through to the validator
    #[serde(default = "default_output_format")]
    pub output_format: String,

    /// Validator output path, `{date}` is replaced with the processed date
    #[serde(default = "default_output_template")]
    pub output_template: String,

    /// Validator log path, `{date}` is replaced with the processed date
    #[serde(default = "default_log_template")]
    pub log_template: String,
}

impl Default for ValidatorSection {
    fn default() -> Self {
        Self {
            command: default_validator_command(),
            output_format: default_output_format(),
            output_template: default_output_template(),
            log_template: default_log_template(),
        }
    }
}

/// Certificate re-encoding collaborator
#[derive(Debug, Clone, Deserialize)]
pub struct OpensslSection {
    #[serde(default = "default_openssl_command")]
    pub command: String,
}

impl Default for OpensslSection {
    fn default() -> Self {
        Self {
            command: default_openssl_command(),
        }
    }
}

fn default_validator_command() -> String {
    "routinator".to_string()
}

fn default_output_format() -> String {
    "csv".to_string()
}

fn default_output_template() -> String {
    "vrps-{date}.csv".to_string()
}

fn default_log_template() -> String {
    "replay-{date}.log".to_string()
}

fn default_openssl_command() -> String {
    "openssl".to_string()
}

/// Complete run configuration
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub archive: ArchiveSection,
    pub cache: CacheSection,

    #[serde(default)]
    pub validator: ValidatorSection,

    #[serde(default)]
    pub openssl: OpensslSection,
}

/// Resolved archive acquisition mode
#[derive(Debug, Clone)]
pub enum ArchiveSource {
    /// Scan a local directory for archives matching the date
    LocalDir(PathBuf),
    /// Fetch per authority from a URI template
    RemoteBase(String),
}

impl Config {
    /// Load and validate config from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Parse and validate config from a TOML string
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        match (&self.archive.dir, &self.archive.base_uri) {
            (Some(_), Some(_)) => {
                return Err(ConfigError::Validation(
                    "specify either 'archive.dir' or 'archive.base_uri', not both".to_string(),
                ));
            }
            (None, None) => {
                return Err(ConfigError::Validation(
                    "one of 'archive.dir' or 'archive.base_uri' is required".to_string(),
                ));
            }
            _ => {}
        }

        if self.cache.unvalidated_dir.is_empty() {
            return Err(ConfigError::Validation(
                "'cache.unvalidated_dir' must not be empty".to_string(),
            ));
        }

        if self.cache.tal_dir.is_empty() {
            return Err(ConfigError::Validation(
                "'cache.tal_dir' must not be empty".to_string(),
            ));
        }

        if let Some(ref uri) = self.archive.base_uri {
            if !uri.contains("{tal}") || !uri.contains("{date}") {
                return Err(ConfigError::Validation(
                    "'archive.base_uri' must contain '{tal}' and '{date}' placeholders".to_string(),
                ));
            }
        }

        Ok(())
    }

    /// Archive acquisition mode for this run
    pub fn archive_source(&self) -> ArchiveSource {
        match (&self.archive.dir, &self.archive.base_uri) {
            (Some(dir), _) => ArchiveSource::LocalDir(expand_home(dir)),
            (None, Some(uri)) => ArchiveSource::RemoteBase(uri.clone()),
            // validate() rejects the neither case before this is reachable
            (None, None) => unreachable!("config validated at load"),
        }
    }

    /// Unvalidated-object cache root
    pub fn cache_dir(&self) -> PathBuf {
        expand_home(&self.cache.unvalidated_dir)
    }

    /// TAL output directory
    pub fn tal_dir(&self) -> PathBuf {
        expand_home(&self.cache.tal_dir)
    }

    /// Whether an authority's trust anchor is excluded by operator policy
    pub fn is_ignored(&self, authority: &str) -> bool {
        self.cache.ignore_tals.iter().any(|t| t == authority)
    }

    /// Validator output path for the given date
    pub fn validator_output_path(&self, date: NaiveDate) -> PathBuf {
        expand_home(&expand_date(&self.validator.output_template, date))
    }

    /// Validator log path for the given date
    pub fn validator_log_path(&self, date: NaiveDate) -> PathBuf {
        expand_home(&expand_date(&self.validator.log_template, date))
    }
}

/// Replace `{date}` with the date's `YYYY-MM-DD` form
fn expand_date(template: &str, date: NaiveDate) -> String {
    template.replace("{date}", &date.format("%Y-%m-%d").to_string())
}

/// Expand a leading `~/` against $HOME
fn expand_home(raw: &str) -> PathBuf {
    if let Some(rest) = raw.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    PathBuf::from(raw)
}
