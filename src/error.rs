use std::path::PathBuf;

use thiserror::Error;

/// Fatal conditions that abort an import before or during processing.
///
/// Row-level problems are never represented here; they are collected as
/// [`crate::import::RowIssue`] values on the outcome instead.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("could not read input: {0}")]
    Io(#[from] std::io::Error),
    #[error("could not read input: {0}")]
    Csv(#[from] csv::Error),
    #[error("could not open file {path}: {source}")]
    OpenFile {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("filename date prefix `{0}` is not a valid YYYYMMDD date")]
    InvalidElectionDate(String),
    #[error("no voters found; import voter registrations before voter history")]
    NoVoters,
    #[error("invalid table prefix `{0}`: only letters, digits and underscores are allowed")]
    InvalidTablePrefix(String),
    #[error("candidate `{name}` in race `{race}` could not be created or found")]
    CandidateConflict { name: String, race: String },
}

impl ImportError {
    pub fn open_file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ImportError::OpenFile {
            path: path.into(),
            source,
        }
    }
}
