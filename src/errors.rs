//! Unified error type for loquat operations.
//!
//! Format probes do not signal "wrong format" through this type; they
//! return [`Probe::Rejected`](crate::Probe) instead. Everything here
//! is either a fatal decode failure or a caller mistake.

use thiserror::Error;

/// Result type for loquat operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for loquat operations.
#[derive(Error, Debug)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Every registered backend rejected the input.
    #[error("file format is not known")]
    UnknownFormat,

    /// A `scan` destination was not one of the supported types
    /// (`bool`, `i64`, `f64`, `String`, `chrono::NaiveDateTime`).
    #[error("unsupported scan destination type at column {index}")]
    InvalidScanType { index: usize },

    /// The byte signature matched but structural decoding failed.
    /// Fatal for the Source that produced it.
    #[error("malformed file: {0}")]
    Malformed(String),

    /// `get` was called with a name that `list` does not contain.
    #[error("sheet '{0}' not found")]
    SheetNotFound(String),

    /// A cell value could not be converted into a `scan` destination.
    /// The iterator itself stays healthy.
    #[error("scan failed at column {col}: {message}")]
    Scan { col: usize, message: String },

    /// ZIP archive error
    #[error("zip error: {0}")]
    Zip(String),

    /// XML parsing error
    #[error("xml error: {0}")]
    Xml(String),
}

impl From<quick_xml::Error> for Error {
    fn from(err: quick_xml::Error) -> Self {
        Error::Xml(err.to_string())
    }
}

impl From<zip::result::ZipError> for Error {
    fn from(err: zip::result::ZipError) -> Self {
        match err {
            zip::result::ZipError::Io(e) => Error::Io(e),
            other => Error::Zip(other.to_string()),
        }
    }
}
