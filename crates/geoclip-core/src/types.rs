//! Data types shared by the pipeline stages and the batch report.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::drivers::DatasetKind;
use crate::error::{ClipError, ErrorKind};

/// One validated manifest record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetDescriptor {
    /// Unique, non-empty dataset name
    pub name: String,
    /// Local path or `http(s)` URL
    pub source: String,
    /// Per-entry download switch; `None` falls back to the pipeline default
    pub download: Option<bool>,
    /// Output file name relative to the output directory
    pub output_filename: Option<String>,
}

impl DatasetDescriptor {
    /// Creates a descriptor with no overrides.
    #[must_use]
    pub fn new(name: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: source.into(),
            download: None,
            output_filename: None,
        }
    }

    /// Sets the per-entry download switch.
    #[must_use]
    pub fn with_download(mut self, download: bool) -> Self {
        self.download = Some(download);
        self
    }

    /// Sets the output file name override.
    #[must_use]
    pub fn with_output_filename(mut self, filename: impl Into<String>) -> Self {
        self.output_filename = Some(filename.into());
        self
    }
}

/// A local file ready for clipping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedInput {
    /// Path of the dataset file
    pub path: PathBuf,
    /// Kind detected from the extension
    pub kind: DatasetKind,
}

/// Why an entry produced no new output without being an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SkipReason {
    /// The output artifact already exists.
    AlreadyDone,
    /// Downloads are disabled and no cached copy exists.
    DownloadDisabled,
    /// The archive holds no raster or vector member.
    NoValidMember,
    /// The resolved file is neither raster nor vector.
    UnsupportedFormat,
    /// Nothing of the dataset lies inside the boundary.
    EmptyResult,
    /// The run was interrupted before this entry started.
    Cancelled,
}

impl SkipReason {
    /// Returns the string representation used in reports.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::AlreadyDone => "AlreadyDone",
            SkipReason::DownloadDisabled => "DownloadDisabled",
            SkipReason::NoValidMember => "NoValidMember",
            SkipReason::UnsupportedFormat => "UnsupportedFormat",
            SkipReason::EmptyResult => "EmptyResult",
            SkipReason::Cancelled => "Cancelled",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Final state of one manifest entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClipOutcome {
    /// A clipped artifact was written.
    Done(PathBuf),
    /// No artifact was produced, by policy.
    Skipped(SkipReason),
    /// The entry failed; other entries are unaffected.
    Failed {
        /// Error category
        kind: ErrorKind,
        /// Human-readable reason
        message: String,
    },
}

impl ClipOutcome {
    /// Converts an entry-level error into a failed outcome.
    #[must_use]
    pub fn from_error(error: &ClipError) -> Self {
        ClipOutcome::Failed {
            kind: error.kind(),
            message: error.to_string(),
        }
    }

    /// Short status label (`done`, `skipped`, `failed`).
    #[must_use]
    pub fn status(&self) -> &'static str {
        match self {
            ClipOutcome::Done(_) => "done",
            ClipOutcome::Skipped(_) => "skipped",
            ClipOutcome::Failed { .. } => "failed",
        }
    }

    #[must_use]
    pub fn is_failed(&self) -> bool {
        matches!(self, ClipOutcome::Failed { .. })
    }
}

impl fmt::Display for ClipOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClipOutcome::Done(path) => write!(f, "Done({})", path.display()),
            ClipOutcome::Skipped(reason) => write!(f, "Skipped({reason})"),
            ClipOutcome::Failed { kind, message } => write!(f, "Failed({kind}): {message}"),
        }
    }
}

/// Outcome of one entry, tagged with its name.
#[derive(Debug, Clone)]
pub struct EntryReport {
    /// Dataset name, or a positional placeholder for records without one
    pub name: String,
    /// Final state
    pub outcome: ClipOutcome,
    /// Wall time spent on the entry
    pub elapsed: Duration,
}

/// Per-entry results of a batch run, in manifest order.
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    /// One report per manifest entry
    pub entries: Vec<EntryReport>,
    /// Wall time of the whole batch
    pub elapsed: Duration,
}

impl BatchReport {
    fn count(&self, pred: impl Fn(&ClipOutcome) -> bool) -> usize {
        self.entries.iter().filter(|e| pred(&e.outcome)).count()
    }

    /// Number of entries that wrote an artifact.
    #[must_use]
    pub fn succeeded(&self) -> usize {
        self.count(|o| matches!(o, ClipOutcome::Done(_)))
    }

    /// Number of skipped entries.
    #[must_use]
    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, ClipOutcome::Skipped(_)))
    }

    /// Number of failed entries.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.count(ClipOutcome::is_failed)
    }

    /// Returns `true` if any entry failed.
    #[must_use]
    pub fn has_failures(&self) -> bool {
        self.entries.iter().any(|e| e.outcome.is_failed())
    }

    /// Looks up an entry by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&EntryReport> {
        self.entries.iter().find(|e| e.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, outcome: ClipOutcome) -> EntryReport {
        EntryReport {
            name: name.to_string(),
            outcome,
            elapsed: Duration::ZERO,
        }
    }

    #[test]
    fn test_batch_counts() {
        let report = BatchReport {
            entries: vec![
                entry("a", ClipOutcome::Done(PathBuf::from("out/a_clipped.tif"))),
                entry("b", ClipOutcome::Skipped(SkipReason::AlreadyDone)),
                entry("c", ClipOutcome::Skipped(SkipReason::EmptyResult)),
                entry(
                    "d",
                    ClipOutcome::from_error(&ClipError::not_found("missing.shp")),
                ),
            ],
            elapsed: Duration::ZERO,
        };

        assert_eq!(report.succeeded(), 1);
        assert_eq!(report.skipped(), 2);
        assert_eq!(report.failed(), 1);
        assert!(report.has_failures());
        assert_eq!(report.get("d").unwrap().outcome.status(), "failed");
    }

    #[test]
    fn test_outcome_display() {
        assert_eq!(
            ClipOutcome::Skipped(SkipReason::DownloadDisabled).to_string(),
            "Skipped(DownloadDisabled)"
        );
        let failed = ClipOutcome::from_error(&ClipError::invalid("manifest entry", "missing name"));
        assert!(failed.to_string().starts_with("Failed(InvalidEntry)"));
    }

    #[test]
    fn test_descriptor_builder() {
        let d = DatasetDescriptor::new("roads", "roads.shp")
            .with_download(false)
            .with_output_filename("roads_out.geojson");
        assert_eq!(d.download, Some(false));
        assert_eq!(d.output_filename.as_deref(), Some("roads_out.geojson"));
    }
}
