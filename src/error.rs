//! Error types for the table exporter

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for exporter operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while exporting tables
#[derive(Error, Debug)]
pub enum Error {
    /// The date argument is not a `YYYYMMDD` token
    #[error("invalid date {0:?}: expected YYYYMMDD")]
    InvalidDate(String),

    /// The rendered document for the requested date is absent
    #[error("{} does not exist", .0.display())]
    MissingInput(PathBuf),

    /// Failed to launch the browser or open a page
    #[error("Browser initialization failed: {0}")]
    InitializationError(String),

    /// Failed to load the rendered document
    #[error("Failed to load document: {0}")]
    LoadError(String),

    /// Failed to query or capture a table
    #[error("Rendering failed: {0}")]
    RenderError(String),

    /// A table never became visible
    #[error("Operation timed out after {0}ms")]
    Timeout(u64),

    /// The external PNG optimizer could not run or exited non-zero
    #[error("optimizer failed: {0}")]
    Optimizer(String),

    /// CDP-specific error
    #[cfg(feature = "cdp")]
    #[error("CDP error: {0}")]
    CdpError(String),

    /// Filesystem failure
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

#[cfg(feature = "cdp")]
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::CdpError(err.to_string())
    }
}
