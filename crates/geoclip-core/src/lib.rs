//! `geoclip-core` is the core library for the `GeoClip` project: it turns a manifest of
//! raster and vector datasets into copies clipped to a boundary polygon.
//!
//! This crate includes:
//! - **Boundary Loader** (`boundary`): loads the clip region once per run.
//! - **Fetcher** (`fetch`): resolves local paths and downloads URLs with retry and resume.
//! - **Archive Expander** (`archive`): unpacks zip bundles next to the download.
//! - **Format Registry** (`drivers`): classifies files as raster or vector by extension.
//! - **Clip Executor** (`clip`): clips one dataset with the `vector` and `raster` engines.
//! - **Orchestrator** (`pipeline`): runs manifest entries concurrently and reports per-entry outcomes.
//!
//! Re-runs are cheap: every step checks for its artifact on disk before doing any work.

pub mod archive;
pub mod boundary;
pub mod clip;
pub mod config;
pub mod crs;
pub mod drivers;
pub mod error;
pub mod fetch;
pub mod manifest;
pub mod paths;
pub mod pipeline;
pub mod raster;
pub mod types;
pub mod vector;
