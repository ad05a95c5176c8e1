//! Error types for `GeoClip` operations.
//!
//! Every failure a dataset entry can hit is a [`ClipError`]. The pipeline never
//! lets one escape a single entry: it is converted into that entry's outcome via
//! [`ClipError::kind`]. Only boundary and manifest loading surface errors to the
//! caller.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Main error type for `GeoClip` operations.
#[derive(Debug, Error)]
pub enum ClipError {
    /// A boundary file or local dataset does not exist.
    #[error("File not found: '{path}'")]
    NotFound {
        /// The missing path
        path: PathBuf,
    },

    /// Empty or unparsable boundary, manifest or manifest entry.
    #[error("Invalid {subject}: {reason}")]
    Invalid {
        /// What was being validated (e.g. "boundary", "manifest entry")
        subject: String,
        /// Why it was rejected
        reason: String,
    },

    /// A remote source could not be downloaded within the retry budget.
    #[error("Download of '{url}' failed after {attempts} attempt(s): {reason}")]
    DownloadFailed {
        /// The remote URL
        url: String,
        /// Number of attempts made
        attempts: u32,
        /// The error reported by the final attempt
        reason: String,
    },

    /// An archive could not be opened or expanded.
    #[error("Corrupt archive '{path}': {reason}")]
    CorruptArchive {
        /// The archive path
        path: PathBuf,
        /// Why expansion failed
        reason: String,
    },

    /// The dataset format has no reader.
    #[error("Unsupported format for '{path}': {reason}")]
    UnsupportedFormat {
        /// The dataset path
        path: PathBuf,
        /// Details about the unsupported feature
        reason: String,
    },

    /// A dataset could be opened but not decoded.
    #[error("Failed to read {format} dataset '{path}': {reason}")]
    Read {
        /// The format being read (e.g. "GeoTIFF", "`GeoJSON`")
        format: String,
        /// The dataset path
        path: PathBuf,
        /// Why decoding failed
        reason: String,
    },

    /// A clipped artifact could not be persisted.
    #[error("Failed to write '{path}': {reason}")]
    WriteFailed {
        /// The output path
        path: PathBuf,
        /// Why the write failed
        reason: String,
    },

    /// A coordinate transformation the engine cannot perform.
    #[error("Cannot reproject from {from} to {to}: {reason}")]
    Crs {
        /// Source CRS
        from: String,
        /// Target CRS
        to: String,
        /// Missing definition or failing coordinate
        reason: String,
    },

    /// A bug surfaced while processing one entry (e.g. a panic in a geometry routine).
    #[error("Internal error: {reason}")]
    Internal {
        /// Panic message or description
        reason: String,
    },

    /// Filesystem error with the offending path attached.
    #[error("I/O error on '{path}': {source}")]
    Io {
        /// The path being accessed
        path: PathBuf,
        /// The underlying error
        #[source]
        source: std::io::Error,
    },
}

/// Type alias for Results using [`ClipError`].
pub type Result<T> = std::result::Result<T, ClipError>;

/// Cloneable category of a [`ClipError`], stored in batch reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Missing `name`/`source`, duplicate entry or undecodable record.
    InvalidEntry,
    /// Input path missing.
    NotFound,
    /// Retries exhausted.
    DownloadFailed,
    /// Archive could not be expanded.
    CorruptArchive,
    /// No reader for the resolved format.
    UnsupportedFormat,
    /// Dataset could not be decoded.
    ReadFailed,
    /// Output could not be written.
    WriteFailed,
    /// Unknown CRS or failed coordinate transformation.
    Crs,
    /// Other filesystem failure.
    Io,
    /// Unexpected failure inside the engine.
    Internal,
}

impl ErrorKind {
    /// Returns the string representation used in reports.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidEntry => "InvalidEntry",
            ErrorKind::NotFound => "NotFound",
            ErrorKind::DownloadFailed => "DownloadFailed",
            ErrorKind::CorruptArchive => "CorruptArchive",
            ErrorKind::UnsupportedFormat => "UnsupportedFormat",
            ErrorKind::ReadFailed => "ReadFailed",
            ErrorKind::WriteFailed => "WriteFailed",
            ErrorKind::Crs => "Crs",
            ErrorKind::Io => "Io",
            ErrorKind::Internal => "Internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ClipError {
    /// Shorthand for [`ClipError::Invalid`].
    pub fn invalid(subject: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            subject: subject.into(),
            reason: reason.into(),
        }
    }

    /// Shorthand for [`ClipError::NotFound`].
    pub fn not_found(path: impl Into<PathBuf>) -> Self {
        Self::NotFound { path: path.into() }
    }

    /// Shorthand for [`ClipError::UnsupportedFormat`].
    pub fn unsupported(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::UnsupportedFormat {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Shorthand for [`ClipError::Read`].
    pub fn read(format: &str, path: impl Into<PathBuf>, reason: impl fmt::Display) -> Self {
        Self::Read {
            format: format.to_string(),
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Shorthand for [`ClipError::WriteFailed`].
    pub fn write_failed(path: impl Into<PathBuf>, reason: impl fmt::Display) -> Self {
        Self::WriteFailed {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// The report category of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Invalid { .. } => ErrorKind::InvalidEntry,
            Self::DownloadFailed { .. } => ErrorKind::DownloadFailed,
            Self::CorruptArchive { .. } => ErrorKind::CorruptArchive,
            Self::UnsupportedFormat { .. } => ErrorKind::UnsupportedFormat,
            Self::Read { .. } => ErrorKind::ReadFailed,
            Self::WriteFailed { .. } => ErrorKind::WriteFailed,
            Self::Crs { .. } => ErrorKind::Crs,
            Self::Io { .. } => ErrorKind::Io,
            Self::Internal { .. } => ErrorKind::Internal,
        }
    }

    /// Get a user-friendly error message.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::NotFound { path } => format!("File not found: {}", path.display()),
            Self::DownloadFailed { url, attempts, .. } => {
                format!("Could not download {url} ({attempts} attempt(s))")
            },
            Self::Io { path, source } => format!("{}: {source}", path.display()),
            _ => self.to_string(),
        }
    }

    /// Get recovery suggestions if available.
    #[must_use]
    pub fn recovery_suggestion(&self) -> Option<String> {
        match self {
            Self::NotFound { .. } => {
                Some("Check that the file path is correct and the file exists.".to_string())
            },
            Self::DownloadFailed { .. } => Some(
                "Re-run the pipeline; the partial download is resumed when the server supports it."
                    .to_string(),
            ),
            Self::CorruptArchive { .. } => {
                Some("Delete the archive from the data directory to force a fresh download.".to_string())
            },
            Self::UnsupportedFormat { .. } => {
                Some("Run 'geoclip drivers' to see the readable formats.".to_string())
            },
            Self::Crs { .. } => {
                Some(
                    "Check the dataset declares a registered EPSG code and lies inside its projection's area of use."
                        .to_string(),
                )
            },
            _ => None,
        }
    }
}

/// Extension trait for attaching a path to raw I/O errors.
pub trait IoResultExt<T> {
    /// Wrap an I/O error into [`ClipError::Io`] with `path` as context.
    ///
    /// # Errors
    ///
    /// Returns [`ClipError::Io`] if the underlying operation fails.
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T>;
}

impl<T> IoResultExt<T> for std::result::Result<T, std::io::Error> {
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T> {
        self.map_err(|source| ClipError::Io {
            path: path.into(),
            source,
        })
    }
}
