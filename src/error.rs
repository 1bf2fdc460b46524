//! Error types for the fetch and cache layers

use std::path::PathBuf;
use thiserror::Error;

/// Failures while pulling candles from the quote provider
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("provider returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("provider error: {0}")]
    Provider(String),

    #[error("malformed chart payload: {0}")]
    Malformed(String),

    #[error("No data")]
    NoData,
}

impl FetchError {
    /// Empty results and provider-side rejections are final; transport and HTTP errors are retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Http(_) | FetchError::Status { .. } => true,
            FetchError::Provider(_) | FetchError::Malformed(_) | FetchError::NoData => false,
        }
    }
}

/// Failures while reading, writing or swapping cache directories
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("io error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("csv error at {path:?}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: polars::error::PolarsError,
    },

    #[error("cache file {0:?} has no usable candles")]
    Empty(PathBuf),

    #[error("missing column {column} in {path:?}")]
    MissingColumn { path: PathBuf, column: String },
}

impl CacheError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CacheError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn csv(path: impl Into<PathBuf>, source: polars::error::PolarsError) -> Self {
        CacheError::Csv {
            path: path.into(),
            source,
        }
    }
}
