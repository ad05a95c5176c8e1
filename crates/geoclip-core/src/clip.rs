//! Clip executor: one dataset file in, one clipped artifact out.
//!
//! Both operations are no-ops when the output already exists, and neither writes
//! anything when the clip comes out empty.

use std::path::{Path, PathBuf};

use log::{info, warn};

use crate::boundary::Boundary;
use crate::crs::Crs;
use crate::error::{ClipError, Result};
use crate::paths::ensure_parent;
use crate::raster::RasterSource;
use crate::vector::{clip_layer, read_features, write_geojson};

/// Extension given to vector outputs.
pub const VECTOR_EXTENSION: &str = "geojson";

/// Extension given to raster outputs.
pub const RASTER_EXTENSION: &str = "tif";

/// Result of a single clip operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClipStatus {
    /// The artifact was written at this path.
    Written(PathBuf),
    /// The output path was already present; nothing was read.
    AlreadyExists,
    /// Nothing of the dataset lies inside the boundary; no file was written.
    Empty,
}

/// `out/roads_clipped` -> `out/roads_clipped.geojson`; `.geojson`/`.json` are kept.
#[must_use]
pub fn vector_output_path(output: &Path) -> PathBuf {
    let has_extension = output
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(VECTOR_EXTENSION) || e.eq_ignore_ascii_case("json"));
    if has_extension {
        output.to_path_buf()
    } else {
        let mut name = output.as_os_str().to_owned();
        name.push(".");
        name.push(VECTOR_EXTENSION);
        PathBuf::from(name)
    }
}

fn already_done(output: &Path) -> bool {
    if output.exists() {
        info!("{} already clipped, skipping", output.display());
        true
    } else {
        false
    }
}

fn prepare_output(output: &Path) -> Result<()> {
    ensure_parent(output).map_err(|e| ClipError::write_failed(output, e))
}

/// Clip a vector dataset to `boundary` and write it as `GeoJSON`.
///
/// Inputs without a CRS are assumed to be EPSG:4326. Inputs in another CRS are
/// reprojected to the boundary's CRS before clipping.
///
/// # Errors
///
/// Propagates read, reprojection and write errors.
pub fn clip_vector(input: &Path, output: &Path, boundary: &Boundary) -> Result<ClipStatus> {
    let output = vector_output_path(output);
    if already_done(&output) {
        return Ok(ClipStatus::AlreadyExists);
    }

    let layer = read_features(input)?;
    let source_crs = layer.crs.unwrap_or_else(|| {
        warn!("{} has no CRS defined, assuming {}", input.display(), Crs::WGS84);
        Crs::WGS84
    });
    if source_crs != boundary.crs() {
        info!(
            "Reprojecting {} from {source_crs} to {}",
            input.display(),
            boundary.crs()
        );
    }
    let layer = layer.to_crs(source_crs, boundary.crs())?;

    let clipped = clip_layer(&layer, boundary.polygons());
    if clipped.is_empty() {
        warn!("Clipping {} produced no features", input.display());
        return Ok(ClipStatus::Empty);
    }

    prepare_output(&output)?;
    write_geojson(&clipped, &output)?;
    info!(
        "Clipped {} feature(s) from {} to {}",
        clipped.features.len(),
        input.display(),
        output.display()
    );
    Ok(ClipStatus::Written(output))
}

/// Mask and crop a raster to `boundary` and write it as `GeoTIFF`.
///
/// The boundary is reprojected to the raster's CRS when they differ. A raster
/// without a CRS is assumed to be EPSG:4326. Only the strips or tiles under the
/// boundary's bounding box are decoded.
///
/// # Errors
///
/// Propagates read, reprojection and write errors.
pub fn clip_raster(input: &Path, output: &Path, boundary: &Boundary) -> Result<ClipStatus> {
    if already_done(output) {
        return Ok(ClipStatus::AlreadyExists);
    }

    let mut source = RasterSource::open(input)?;
    let raster_crs = source.crs.unwrap_or_else(|| {
        warn!("{} has no CRS defined, assuming {}", input.display(), Crs::WGS84);
        Crs::WGS84
    });
    let boundary = if raster_crs == boundary.crs() {
        boundary.clone()
    } else {
        info!(
            "Reprojecting boundary from {} to {raster_crs} for {}",
            boundary.crs(),
            input.display()
        );
        boundary.to_crs(raster_crs)?
    };

    let Some(clipped) = source
        .window_for(&boundary)
        .map(|window| source.read_window(window))
        .transpose()?
        .and_then(|raster| raster.mask(&boundary))
    else {
        warn!("Clipping {} produced an empty raster", input.display());
        return Ok(ClipStatus::Empty);
    };

    prepare_output(output)?;
    clipped.write(output)?;
    info!(
        "Clipped {} to {} ({}x{})",
        input.display(),
        output.display(),
        clipped.width,
        clipped.height
    );
    Ok(ClipStatus::Written(output.to_path_buf()))
}
