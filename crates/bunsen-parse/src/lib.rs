//! Per-project log parsing for Bunsen ingest.
//!
//! A parser takes the submitted bundle of files and produces a testrun
//! record plus the (possibly renamed or filtered) files to store. Parsers
//! are registered by module name and selected through the repo's
//! `[bunsen-upload] commit_module` configuration key.

use std::collections::BTreeMap;

use bunsen_model::Testrun;
use thiserror::Error;

pub mod dejagnu;
pub mod registry;

pub use dejagnu::DejagnuParser;
pub use registry::Registry;

/// Bundle contents: file name (path inside the log tree) -> bytes.
pub type FileMap = BTreeMap<String, Vec<u8>>;

#[derive(Debug, Error)]
pub enum ParseError {
    /// The parser could not produce a usable record and did not flag the
    /// run via `problems`.
    #[error("parse rejected: {0}")]
    Rejected(String),

    #[error("no parser module named '{0}'")]
    UnknownModule(String),

    #[error("script name '{name}' is ambiguous: {candidates:?}")]
    AmbiguousScript {
        name: String,
        candidates: Vec<String>,
    },

    #[error("script discovery failed: {0}")]
    Discovery(String),
}

/// Result of parsing a bundle.
#[derive(Debug, Clone)]
pub struct ParseOutput {
    /// Parsed testrun; `problems` is non-empty when the input was
    /// incomplete but still worth storing.
    pub testrun: Testrun,

    /// Files to commit, after any renaming or filtering by the parser.
    pub files: FileMap,

    /// Branch label chosen by the parser (e.g. the builder's OS/arch
    /// string); overrides any label supplied at the ingest call.
    pub extra_label: Option<String>,
}

/// A parse-and-commit plug-in for one family of test logs.
pub trait CommitParser: Send + Sync {
    /// Module name used in `commit_module` configuration.
    fn name(&self) -> &str;

    fn parse(&self, files: &FileMap) -> Result<ParseOutput, ParseError>;
}
