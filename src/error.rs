use std::path::PathBuf;

use thiserror::Error;

/// Errors that end a run. Everything that can go wrong for a single domain
/// is recorded as an `unknown` row instead.
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("input table not found: {}", path.display())]
    InputNotFound { path: PathBuf },

    #[error("cannot read input table {}", path.display())]
    InputUnreadable {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("result table {} is unreadable or malformed", path.display())]
    CorruptProgressFile {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("cannot append to result table {}", path.display())]
    WriteFailure {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

impl CrawlError {
    pub fn write_failure(path: impl Into<PathBuf>, source: impl Into<csv::Error>) -> Self {
        Self::WriteFailure {
            path: path.into(),
            source: source.into(),
        }
    }
}
