//! Batch orchestration.
//!
//! Each manifest entry moves through resolve (fetch), optional expand, classify and
//! clip, ending as done, skipped or failed. Entries run in parallel on a
//! [`WorkerPool`]; the only state they share is the read-only [`Boundary`] and the
//! filesystem, where every entry works on its own raw, extraction and output paths.
//! An entry's error or panic is recorded in its report and never aborts the batch.
//!
//! # Examples
//!
//! ```no_run
//! use geoclip_core::boundary::Boundary;
//! use geoclip_core::config::PipelineConfig;
//! use geoclip_core::manifest::Manifest;
//! use geoclip_core::pipeline::Pipeline;
//!
//! # fn main() -> geoclip_core::error::Result<()> {
//! let boundary = Boundary::load("aoi.geojson")?;
//! let manifest = Manifest::load("datasets.yaml")?;
//! let pipeline = Pipeline::new(PipelineConfig::new("output"))?;
//! let report = pipeline.run(&manifest.entries, &boundary);
//! println!("{} done, {} failed", report.succeeded(), report.failed());
//! # Ok(())
//! # }
//! ```

use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use log::{error, info, warn};
use rayon::prelude::*;

use crate::archive;
use crate::boundary::Boundary;
use crate::clip::{ClipStatus, RASTER_EXTENSION, VECTOR_EXTENSION, clip_raster, clip_vector, vector_output_path};
use crate::config::PipelineConfig;
use crate::drivers::{DatasetKind, classify, is_archive, select_member};
use crate::error::{ClipError, ErrorKind, IoResultExt, Result};
use crate::fetch::{Fetcher, SourceRef};
use crate::manifest::ManifestEntry;
use crate::types::{BatchReport, ClipOutcome, DatasetDescriptor, EntryReport, ResolvedInput, SkipReason};

/// Shared flag that stops a run from starting new entries.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Entries that have not started yet will be skipped; running ones finish.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// A fixed-size pool of worker threads.
#[derive(Debug)]
pub struct WorkerPool {
    pool: rayon::ThreadPool,
}

impl WorkerPool {
    /// Create a pool with `workers` threads, or one per CPU for `None`.
    ///
    /// # Errors
    ///
    /// Returns [`ClipError::Invalid`] if the threads cannot be spawned.
    pub fn new(workers: Option<usize>) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers.unwrap_or(0))
            .thread_name(|i| format!("geoclip-worker-{i}"))
            .build()
            .map_err(|e| ClipError::invalid("worker pool", e.to_string()))?;
        Ok(Self { pool })
    }

    /// Number of worker threads.
    #[must_use]
    pub fn size(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Apply `f` to every item on the pool. Results keep the input order.
    pub fn map<T, R, F>(&self, items: &[T], f: F) -> Vec<R>
    where
        T: Sync,
        R: Send,
        F: Fn(&T) -> R + Sync + Send,
    {
        self.pool.install(|| items.par_iter().map(f).collect())
    }
}

/// Drives manifest entries through fetch, expand and clip.
#[derive(Debug)]
pub struct Pipeline {
    config: PipelineConfig,
    fetcher: Fetcher,
    pool: WorkerPool,
    cancel: CancellationToken,
}

impl Pipeline {
    /// A pipeline downloading over HTTP.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client or the worker pool cannot be created.
    pub fn new(config: PipelineConfig) -> Result<Self> {
        let fetcher = Fetcher::http(config.fetch.clone())?;
        Self::with_fetcher(config, fetcher)
    }

    /// A pipeline using a caller-provided fetcher.
    ///
    /// # Errors
    ///
    /// Returns an error if the worker pool cannot be created.
    pub fn with_fetcher(config: PipelineConfig, fetcher: Fetcher) -> Result<Self> {
        let pool = WorkerPool::new(config.workers)?;
        Ok(Self {
            config,
            fetcher,
            pool,
            cancel: CancellationToken::new(),
        })
    }

    /// Use `token` to interrupt this pipeline.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// A handle that cancels this pipeline.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    #[must_use]
    pub fn workers(&self) -> usize {
        self.pool.size()
    }

    /// Process every entry and report per-entry outcomes in manifest order.
    pub fn run(&self, entries: &[ManifestEntry], boundary: &Boundary) -> BatchReport {
        let started = Instant::now();
        info!(
            "Processing {} dataset(s) with {} worker(s)",
            entries.len(),
            self.workers()
        );

        let conflicts = self.find_conflicts(entries);
        let jobs: Vec<(&ManifestEntry, Option<&String>)> =
            entries.iter().zip(conflicts.iter().map(Option::as_ref)).collect();
        let reports = self
            .pool
            .map(&jobs, |(entry, conflict)| self.run_entry(entry, *conflict, boundary));

        let report = BatchReport {
            entries: reports,
            elapsed: started.elapsed(),
        };
        info!(
            "Batch finished in {:.1?}: {} done, {} skipped, {} failed",
            report.elapsed,
            report.succeeded(),
            report.skipped(),
            report.failed()
        );
        report
    }

    fn run_entry(&self, entry: &ManifestEntry, conflict: Option<&String>, boundary: &Boundary) -> EntryReport {
        let started = Instant::now();
        let name = entry.label();

        let outcome = if self.cancel.is_cancelled() {
            ClipOutcome::Skipped(SkipReason::Cancelled)
        } else {
            match (entry, conflict) {
                (ManifestEntry::Malformed { reason, .. }, _) | (ManifestEntry::Valid(_), Some(reason)) => {
                    ClipOutcome::Failed {
                        kind: ErrorKind::InvalidEntry,
                        message: reason.clone(),
                    }
                },
                (ManifestEntry::Valid(descriptor), None) => {
                    match panic::catch_unwind(AssertUnwindSafe(|| self.process(descriptor, boundary))) {
                        Ok(Ok(outcome)) => outcome,
                        Ok(Err(e)) => ClipOutcome::from_error(&e),
                        Err(payload) => ClipOutcome::from_error(&ClipError::Internal {
                            reason: panic_message(payload.as_ref()),
                        }),
                    }
                },
            }
        };

        match &outcome {
            ClipOutcome::Done(path) => info!("[{name}] done: {}", path.display()),
            ClipOutcome::Skipped(SkipReason::EmptyResult) => {
                warn!("[{name}] clip produced an empty result, no output written");
            },
            ClipOutcome::Skipped(SkipReason::AlreadyDone) => {
                info!("[{name}] already clipped, skipping");
            },
            ClipOutcome::Skipped(reason) => info!("[{name}] skipped: {reason}"),
            ClipOutcome::Failed { kind, message } => error!("[{name}] failed ({kind}): {message}"),
        }

        EntryReport {
            name,
            outcome,
            elapsed: started.elapsed(),
        }
    }

    fn process(&self, descriptor: &DatasetDescriptor, boundary: &Boundary) -> Result<ClipOutcome> {
        if self
            .output_candidates(descriptor)
            .iter()
            .any(|p| p.exists())
        {
            return Ok(ClipOutcome::Skipped(SkipReason::AlreadyDone));
        }

        let source = SourceRef::parse(&descriptor.source)?;
        let raw = self.raw_path(descriptor, &source);
        let download = descriptor.download.unwrap_or(self.config.download);
        if source.is_remote() && !download && !raw.exists() {
            return Ok(ClipOutcome::Skipped(SkipReason::DownloadDisabled));
        }

        let fetched = self.fetcher.fetch(&source, &raw)?;
        let mut path = fetched.path(&raw).to_path_buf();

        if is_archive(&path) {
            let dir = archive::expand(&path)?;
            match select_member(&dir).with_path(&dir)? {
                Some(member) => path = member,
                None => return Ok(ClipOutcome::Skipped(SkipReason::NoValidMember)),
            }
        }

        let input = ResolvedInput {
            kind: classify(&path),
            path,
        };
        let status = match input.kind {
            DatasetKind::Raster => clip_raster(
                &input.path,
                &self.output_path(descriptor, DatasetKind::Raster),
                boundary,
            )?,
            DatasetKind::Vector => clip_vector(
                &input.path,
                &self.output_path(descriptor, DatasetKind::Vector),
                boundary,
            )?,
            DatasetKind::Unsupported => {
                return Ok(ClipOutcome::Skipped(SkipReason::UnsupportedFormat));
            },
        };

        Ok(match status {
            ClipStatus::Written(path) => ClipOutcome::Done(path),
            ClipStatus::AlreadyExists => ClipOutcome::Skipped(SkipReason::AlreadyDone),
            ClipStatus::Empty => ClipOutcome::Skipped(SkipReason::EmptyResult),
        })
    }

    /// Where the raw copy of `source` lives in the data directory.
    fn raw_path(&self, descriptor: &DatasetDescriptor, source: &SourceRef) -> PathBuf {
        let file_name = source
            .file_name()
            .unwrap_or_else(|| descriptor.name.clone());
        self.config.data_dir.join(file_name)
    }

    /// Output path for a dataset of `kind`, before the vector extension rule.
    fn output_path(&self, descriptor: &DatasetDescriptor, kind: DatasetKind) -> PathBuf {
        if let Some(filename) = &descriptor.output_filename {
            return self.config.output_dir.join(filename);
        }
        let extension = match kind {
            DatasetKind::Raster => RASTER_EXTENSION,
            _ => VECTOR_EXTENSION,
        };
        self.config
            .output_dir
            .join(format!("{}_clipped.{extension}", descriptor.name))
    }

    /// Every path the entry's artifact could end up at; checked before fetching.
    fn output_candidates(&self, descriptor: &DatasetDescriptor) -> Vec<PathBuf> {
        let raster = self.output_path(descriptor, DatasetKind::Raster);
        let vector = vector_output_path(&self.output_path(descriptor, DatasetKind::Vector));
        if raster == vector {
            vec![raster]
        } else {
            vec![raster, vector]
        }
    }

    /// Entries whose output or raw paths collide with an earlier entry.
    fn find_conflicts(&self, entries: &[ManifestEntry]) -> Vec<Option<String>> {
        let mut outputs: HashMap<PathBuf, String> = HashMap::new();
        let mut raws: HashMap<PathBuf, String> = HashMap::new();

        entries
            .iter()
            .map(|entry| {
                let descriptor = entry.descriptor()?;
                let candidates = self.output_candidates(descriptor);
                if let Some(other) = candidates.iter().find_map(|p| outputs.get(p)) {
                    return Some(format!("output path collides with entry '{other}'"));
                }

                let remote_raw = SourceRef::parse(&descriptor.source)
                    .ok()
                    .filter(SourceRef::is_remote)
                    .map(|source| self.raw_path(descriptor, &source));
                // Two workers writing the same `.part` file would corrupt it, even for one URL.
                if let Some(raw) = &remote_raw
                    && let Some(other) = raws.get(raw)
                {
                    return Some(format!(
                        "download path {} collides with entry '{other}'",
                        raw.display()
                    ));
                }

                for path in candidates {
                    outputs.insert(path, descriptor.name.clone());
                }
                if let Some(raw) = remote_raw {
                    raws.insert(raw, descriptor.name.clone());
                }
                None
            })
            .collect()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "panic while processing entry".to_string())
}
