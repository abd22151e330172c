//! RPKI Replay - historical repository snapshot reconstruction
//!
//! This crate rebuilds the state of the RPKI repository as it existed on a
//! given calendar date from periodic archive captures, producing a
//! validator-ready unvalidated-object cache, normalized trust anchors and
//! synthesized TALs, plus the timestamp watermark the relying-party
//! validator must treat as "now".

pub mod anchor;
pub mod cache;
pub mod config;
pub mod exec;
pub mod extract;
pub mod locate;
pub mod pipeline;
pub mod tal;

pub use anchor::{AnchorError, TaEncoding, TaNames, TrustAnchor};
pub use cache::ResetError;
pub use config::{Config, ConfigError};
pub use exec::{CommandRunner, RunOutput, ScriptedRunner, SystemRunner};
pub use extract::{ExtractError, Extraction};
pub use locate::{Archive, LocateError};
pub use pipeline::{Pipeline, PipelineError, RunReport};
pub use tal::TalError;
