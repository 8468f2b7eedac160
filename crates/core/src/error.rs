//! Error types for the diff lexing pipeline.

use std::path::PathBuf;

/// Result type alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Failure to split a raw diff into per-file modifications.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    /// A `diff --git` header did not carry the path token a change type needs.
    #[error("file #{index}: header {header:?} has no {side} path token")]
    MissingPathToken {
        index: usize,
        header: String,
        side: PathSide,
    },

    /// A row's `id` or `mods` value has the wrong shape.
    #[error("column `{column}`: {message}")]
    InvalidColumn {
        column: &'static str,
        message: String,
    },
}

/// Which side of a `diff --git a/.. b/..` header a path comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathSide {
    Old,
    New,
}

impl std::fmt::Display for PathSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PathSide::Old => f.write_str("old"),
            PathSide::New => f.write_str("new"),
        }
    }
}

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A commit's diff could not be parsed.
    #[error("commit {id}: {source}")]
    Parse {
        id: i64,
        #[source]
        source: ParseError,
    },

    /// A row has no usable commit id.
    #[error("row without a usable id: {source}")]
    InvalidRow {
        #[source]
        source: ParseError,
    },

    /// Quantiles were requested over a corpus without a single literal.
    #[error("no literal lengths recorded in {path:?}, cannot compute thresholds")]
    EmptyCorpus { path: PathBuf },

    /// Load mode was requested but no percentile artifact exists.
    #[error("percentile artifact {path:?} not found (compute it on the training split first)")]
    MissingPercentiles { path: PathBuf },

    /// The configured upper quantile is not part of the percentile table.
    #[error("quantile {0} is not present in the percentile table")]
    UnknownQuantile(f64),

    /// A quantile outside the open interval (0, 1).
    #[error("quantile {0} must lie strictly between 0 and 1")]
    InvalidQuantile(f64),

    /// A line of the literal-length log is not a non-negative integer.
    #[error("{path:?}:{line}: malformed literal length {value:?}")]
    MalformedLengthLog {
        path: PathBuf,
        line: usize,
        value: String,
    },

    /// The input table lacks a required column.
    #[error("input {path:?} has no `{column}` column")]
    MissingColumn { path: PathBuf, column: &'static str },

    /// No input shards were found.
    #[error("no {extension} files found under {path:?}")]
    NoInputs {
        path: PathBuf,
        extension: &'static str,
    },

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("csv: {0}")]
    Csv(#[from] csv::Error),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}
