//! Data model for testruns stored in a Bunsen repo.

pub mod branch;
pub mod canonical;
pub mod cursor;
pub mod testrun;

pub use branch::{BranchKind, BranchName, INDEX_BRANCH, INDEX_SEPARATOR};
pub use canonical::canonical_json;
pub use cursor::{Cursor, ResolvedCursor};
pub use testrun::{Outcome, Testcase, Testrun};

use thiserror::Error;

/// Errors produced while parsing or validating model data.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("invalid cursor '{0}'")]
    InvalidCursor(String),

    #[error("invalid branch name '{0}'")]
    InvalidBranch(String),

    #[error("invalid project name '{0}'")]
    InvalidProject(String),

    #[error("testrun validation failed: {0}")]
    Validation(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
