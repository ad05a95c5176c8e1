//! Source resolution and resumable downloads.
//!
//! A remote source is streamed into `<destination>.part` and renamed onto the
//! destination only once the body is complete, so an existing destination always
//! means a finished download. Failed attempts keep the temporary file; the next
//! attempt (or the next run) continues from its current size with an HTTP range
//! request when resuming is enabled.

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{debug, info, warn};
use reqwest::StatusCode;
use reqwest::header::RANGE;
use thiserror::Error;
use url::Url;

use crate::config::DownloadConfig;
use crate::error::{ClipError, IoResultExt, Result};
use crate::paths::{ensure_parent, part_path, replace_atomically};

/// WorldPop 1 km population mosaics, addressable as `worldpop:<year>`.
pub const WORLDPOP_MOSAICS: &[(&str, &str)] = &[
    (
        "2018",
        "https://data.worldpop.org/GIS/Population/Global_2000_2020/2018/0_Mosaicked/ppp_2018_1km_Aggregated.tif",
    ),
    (
        "2019",
        "https://data.worldpop.org/GIS/Population/Global_2000_2020/2019/0_Mosaicked/ppp_2019_1km_Aggregated.tif",
    ),
    (
        "2020",
        "https://data.worldpop.org/GIS/Population/Global_2000_2020/2020/0_Mosaicked/ppp_2020_1km_Aggregated.tif",
    ),
];

const WORLDPOP_PREFIX: &str = "worldpop:";

/// Where a dataset comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceRef {
    /// An `http` or `https` URL.
    Remote(Url),
    /// A filesystem path (`file://` URLs included).
    Local(PathBuf),
}

impl SourceRef {
    /// Parse a manifest `source` value.
    ///
    /// # Errors
    ///
    /// Returns [`ClipError::Invalid`] for an empty string, a malformed `http(s)` URL
    /// or a `worldpop:` year without a mosaic.
    pub fn parse(source: &str) -> Result<Self> {
        let source = source.trim();
        if source.is_empty() {
            return Err(ClipError::invalid("source", "empty source"));
        }

        let lower = source.to_ascii_lowercase();
        if let Some(year) = lower.strip_prefix(WORLDPOP_PREFIX) {
            let year = year.trim();
            let (_, url) = WORLDPOP_MOSAICS
                .iter()
                .find(|(y, _)| *y == year)
                .ok_or_else(|| {
                    let known: Vec<_> = WORLDPOP_MOSAICS.iter().map(|(y, _)| *y).collect();
                    ClipError::invalid(
                        "source",
                        format!("no WorldPop mosaic for '{year}' (known years: {})", known.join(", ")),
                    )
                })?;
            let url = Url::parse(url).map_err(|e| ClipError::invalid("source", e.to_string()))?;
            return Ok(SourceRef::Remote(url));
        }
        if lower.starts_with("http://") || lower.starts_with("https://") {
            let url = Url::parse(source)
                .map_err(|e| ClipError::invalid("source", format!("'{source}': {e}")))?;
            return Ok(SourceRef::Remote(url));
        }
        if lower.starts_with("file://")
            && let Ok(url) = Url::parse(source)
            && let Ok(path) = url.to_file_path()
        {
            return Ok(SourceRef::Local(path));
        }
        Ok(SourceRef::Local(PathBuf::from(source)))
    }

    #[must_use]
    pub fn is_remote(&self) -> bool {
        matches!(self, SourceRef::Remote(_))
    }

    /// Last path segment of the source, if it has a usable one.
    #[must_use]
    pub fn file_name(&self) -> Option<String> {
        let name = match self {
            SourceRef::Remote(url) => url
                .path_segments()
                .and_then(|mut segments| segments.next_back())
                .map(str::to_string),
            SourceRef::Local(path) => path
                .file_name()
                .and_then(|n| n.to_str())
                .map(str::to_string),
        }?;
        (!name.is_empty() && name != "." && name != "..").then_some(name)
    }
}

impl fmt::Display for SourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceRef::Remote(url) => write!(f, "{url}"),
            SourceRef::Local(path) => write!(f, "{}", path.display()),
        }
    }
}

/// A response body being streamed from a [`Transport`].
pub struct Download {
    /// `true` if the body starts at the requested offset rather than at byte 0
    pub ranged: bool,
    /// Expected body length, when the server announced one
    pub length: Option<u64>,
    pub body: Box<dyn Read + Send>,
}

impl fmt::Debug for Download {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Download")
            .field("ranged", &self.ranged)
            .field("length", &self.length)
            .finish_non_exhaustive()
    }
}

/// Failure of a single transfer attempt.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The server rejected the byte range (HTTP 416).
    #[error("requested range not satisfiable")]
    RangeNotSatisfiable,

    #[error("server answered HTTP {0}")]
    Status(u16),

    #[error("{0}")]
    Network(String),

    /// The body ended before the announced length.
    #[error("connection closed after {received} of {expected} bytes")]
    Incomplete { received: u64, expected: u64 },

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Opens remote bodies. Implemented over HTTP in production and by fakes in tests.
pub trait Transport: Send + Sync {
    /// Request `url` starting at byte `offset` (0 for the whole body).
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] when no body can be obtained.
    fn open(&self, url: &Url, offset: u64) -> std::result::Result<Download, TransportError>;
}

/// [`Transport`] over a blocking `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::blocking::Client,
}

impl HttpTransport {
    /// Build a client whose requests time out after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`ClipError::Invalid`] if the TLS backend cannot be initialised.
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ClipError::invalid("http client", e.to_string()))?;
        Ok(Self { client })
    }
}

impl Transport for HttpTransport {
    fn open(&self, url: &Url, offset: u64) -> std::result::Result<Download, TransportError> {
        let mut request = self.client.get(url.clone());
        if offset > 0 {
            request = request.header(RANGE, format!("bytes={offset}-"));
        }
        let response = request
            .send()
            .map_err(|e| TransportError::Network(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::RANGE_NOT_SATISFIABLE {
            return Err(TransportError::RangeNotSatisfiable);
        }
        if !status.is_success() {
            return Err(TransportError::Status(status.as_u16()));
        }
        Ok(Download {
            ranged: status == StatusCode::PARTIAL_CONTENT,
            length: response.content_length(),
            body: Box::new(response),
        })
    }
}

/// How a source was made available locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// The destination already existed; nothing was transferred.
    Cached,
    /// The destination was downloaded.
    Downloaded { bytes: u64, attempts: u32 },
    /// A local source was found at this path.
    Local(PathBuf),
}

impl FetchOutcome {
    /// The file the caller should read: the local path, or `destination`.
    #[must_use]
    pub fn path<'a>(&'a self, destination: &'a Path) -> &'a Path {
        match self {
            FetchOutcome::Local(path) => path,
            _ => destination,
        }
    }
}

/// Resolves [`SourceRef`]s to local files with retrying downloads.
#[derive(Clone)]
pub struct Fetcher {
    transport: Arc<dyn Transport>,
    config: DownloadConfig,
}

impl fmt::Debug for Fetcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fetcher")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Fetcher {
    pub fn new(transport: Arc<dyn Transport>, config: DownloadConfig) -> Self {
        Self { transport, config }
    }

    /// A fetcher over HTTP, using the configured timeout.
    ///
    /// # Errors
    ///
    /// See [`HttpTransport::new`].
    pub fn http(config: DownloadConfig) -> Result<Self> {
        let transport = HttpTransport::new(config.timeout)?;
        Ok(Self::new(Arc::new(transport), config))
    }

    #[must_use]
    pub fn config(&self) -> &DownloadConfig {
        &self.config
    }

    /// Make `source` available at `destination`.
    ///
    /// An existing destination is returned as [`FetchOutcome::Cached`] without any
    /// network access. A local source that exists is used in place; otherwise a copy
    /// at `destination` is accepted.
    ///
    /// # Errors
    ///
    /// Returns [`ClipError::NotFound`] for a missing local source and
    /// [`ClipError::DownloadFailed`] once every attempt has failed.
    pub fn fetch(&self, source: &SourceRef, destination: &Path) -> Result<FetchOutcome> {
        match source {
            SourceRef::Local(path) => {
                if path.exists() {
                    Ok(FetchOutcome::Local(path.clone()))
                } else if destination.exists() {
                    debug!(
                        "Local source {} missing, using {}",
                        path.display(),
                        destination.display()
                    );
                    Ok(FetchOutcome::Local(destination.to_path_buf()))
                } else {
                    Err(ClipError::not_found(path))
                }
            },
            SourceRef::Remote(url) => {
                if destination.exists() {
                    debug!("{} already downloaded", destination.display());
                    return Ok(FetchOutcome::Cached);
                }
                self.download(url, destination)
            },
        }
    }

    fn download(&self, url: &Url, destination: &Path) -> Result<FetchOutcome> {
        ensure_parent(destination).with_path(destination)?;
        let temp = part_path(destination);
        let attempts = self.config.retries.max(1);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            info!("Downloading {url} (attempt {attempt}/{attempts})");
            match self.attempt(url, &temp) {
                Ok(bytes) => {
                    replace_atomically(&temp, destination).with_path(destination)?;
                    info!("Downloaded {url} to {} ({bytes} bytes)", destination.display());
                    return Ok(FetchOutcome::Downloaded {
                        bytes,
                        attempts: attempt,
                    });
                },
                Err(e) => {
                    warn!("Download attempt {attempt}/{attempts} for {url} failed: {e}");
                    last_error = e.to_string();
                    if attempt < attempts && !self.config.retry_delay.is_zero() {
                        thread::sleep(self.config.retry_delay);
                    }
                },
            }
        }

        Err(ClipError::DownloadFailed {
            url: url.to_string(),
            attempts,
            reason: last_error,
        })
    }

    /// One transfer into `temp`; returns the complete file size.
    fn attempt(&self, url: &Url, temp: &Path) -> std::result::Result<u64, TransportError> {
        let offset = if self.config.resume {
            fs::metadata(temp).map(|m| m.len()).unwrap_or(0)
        } else {
            0
        };

        let download = match self.transport.open(url, offset) {
            Err(TransportError::RangeNotSatisfiable) if offset > 0 => {
                debug!("Server rejected range for {url}, discarding partial file");
                fs::remove_file(temp)?;
                self.transport.open(url, 0)?
            },
            other => other?,
        };

        let (mut file, start) = if offset > 0 && download.ranged {
            debug!("Resuming {url} at byte {offset}");
            (OpenOptions::new().append(true).open(temp)?, offset)
        } else {
            if offset > 0 {
                debug!("Server ignored range for {url}, restarting");
            }
            (File::create(temp)?, 0)
        };

        let mut body = download.body;
        let received = io::copy(&mut body, &mut file)?;
        file.flush()?;
        file.sync_all()?;

        if let Some(expected) = download.length
            && received < expected
        {
            return Err(TransportError::Incomplete { received, expected });
        }
        Ok(start + received)
    }
}
