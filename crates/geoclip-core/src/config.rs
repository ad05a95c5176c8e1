//! Pipeline configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Download retry and resume policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadConfig {
    /// Total number of attempts per source
    pub retries: u32,
    /// Per-request timeout
    pub timeout: Duration,
    /// Pause between attempts
    pub retry_delay: Duration,
    /// Continue partial downloads with HTTP range requests
    pub resume: bool,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            retries: 3,
            timeout: Duration::from_secs(300),
            retry_delay: Duration::from_secs(1),
            resume: true,
        }
    }
}

/// Settings shared by every entry of a batch run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Directory clipped artifacts are written to
    pub output_dir: PathBuf,
    /// Scratch directory for raw downloads and expanded archives
    pub data_dir: PathBuf,
    /// Default for entries that do not set `download`
    pub download: bool,
    /// Worker count; `None` lets the pool pick one per CPU
    pub workers: Option<usize>,
    pub fetch: DownloadConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("output"),
            data_dir: PathBuf::from("data"),
            download: true,
            workers: None,
            fetch: DownloadConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Default configuration writing to `output_dir`.
    #[must_use]
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_data_dir(mut self, data_dir: impl Into<PathBuf>) -> Self {
        self.data_dir = data_dir.into();
        self
    }

    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers);
        self
    }

    #[must_use]
    pub fn with_download(mut self, download: bool) -> Self {
        self.download = download;
        self
    }
}
