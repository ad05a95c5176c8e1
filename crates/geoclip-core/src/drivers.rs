//! Format registry and dispatcher.
//!
//! This module provides a static registry of the dataset formats the pipeline knows
//! about, the dataset kind each one belongs to (raster or vector) and whether the
//! engine can currently read or write it. Classification is a pure function of the
//! file extension.
//!
//! # Examples
//!
//! ```
//! use geoclip_core::drivers::{DatasetKind, classify, find_driver};
//!
//! assert_eq!(classify("roads.SHP"), DatasetKind::Vector);
//! assert_eq!(classify("dem.tif"), DatasetKind::Raster);
//! assert_eq!(classify("notes.txt"), DatasetKind::Unsupported);
//!
//! let gtiff = find_driver("gtiff").expect("GTiff driver should exist");
//! assert!(gtiff.capabilities.read.is_supported());
//! ```

use std::fmt;
use std::path::{Path, PathBuf};

/// Extensions treated as container archives.
pub const ARCHIVE_EXTENSIONS: &[&str] = &["zip"];

/// Kind of dataset a file holds, derived from its extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DatasetKind {
    /// Gridded data (`GeoTIFF` and friends).
    Raster,
    /// Feature data (`GeoJSON`, Shapefile, ...).
    Vector,
    /// No registered driver claims the extension.
    Unsupported,
}

impl DatasetKind {
    /// Returns the string representation of this kind.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            DatasetKind::Raster => "raster",
            DatasetKind::Vector => "vector",
            DatasetKind::Unsupported => "unsupported",
        }
    }
}

impl fmt::Display for DatasetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Support status for a specific driver operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupportStatus {
    /// The feature is fully supported and implemented.
    Supported,
    /// The feature is not supported by the driver.
    NotSupported,
    /// The feature is planned for future implementation.
    Planned,
}

impl SupportStatus {
    /// Returns `true` if the operation is fully supported and implemented.
    ///
    /// # Examples
    ///
    /// ```
    /// use geoclip_core::drivers::SupportStatus;
    ///
    /// assert!(SupportStatus::Supported.is_supported());
    /// assert!(!SupportStatus::Planned.is_supported());
    /// ```
    #[must_use]
    pub fn is_supported(&self) -> bool {
        matches!(self, SupportStatus::Supported)
    }

    /// Returns the string representation of this support status.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            SupportStatus::Supported => "Supported",
            SupportStatus::NotSupported => "Not Supported",
            SupportStatus::Planned => "Planned",
        }
    }
}

/// Read and write capabilities of a format driver.
#[derive(Debug, Clone, Copy)]
pub struct DriverCapabilities {
    /// Support status for reading data from this format.
    pub read: SupportStatus,
    /// Support status for writing data to this format.
    pub write: SupportStatus,
}

/// Dataset format driver definition.
///
/// A driver maps a set of file extensions to a [`DatasetKind`] and records whether the
/// clip engine can read and write the format.
#[derive(Debug, Clone)]
pub struct Driver {
    /// Short name used in the CLI and for driver identification (e.g., `"GTiff"`).
    pub short_name: &'static str,
    /// Long descriptive name for display purposes.
    pub long_name: &'static str,
    /// Kind of dataset the format holds.
    pub kind: DatasetKind,
    /// Lower-case extensions without the leading dot.
    pub extensions: &'static [&'static str],
    /// Operations supported by this driver.
    pub capabilities: DriverCapabilities,
}

impl Driver {
    /// Creates a new driver definition with specified capabilities.
    #[must_use]
    pub const fn new(
        short_name: &'static str,
        long_name: &'static str,
        kind: DatasetKind,
        extensions: &'static [&'static str],
        read: SupportStatus,
        write: SupportStatus,
    ) -> Self {
        Self {
            short_name,
            long_name,
            kind,
            extensions,
            capabilities: DriverCapabilities { read, write },
        }
    }

    /// Returns `true` if `ext` (case-insensitive, without dot) belongs to this driver.
    #[must_use]
    pub fn matches_extension(&self, ext: &str) -> bool {
        self.extensions.iter().any(|e| e.eq_ignore_ascii_case(ext))
    }
}

/// Returns the complete registry of known formats.
#[must_use]
pub fn get_drivers() -> Vec<Driver> {
    use DatasetKind::{Raster, Vector};
    use SupportStatus::{NotSupported, Planned, Supported};

    vec![
        Driver::new(
            "GTiff",
            "GeoTIFF",
            Raster,
            &["tif", "tiff"],
            Supported,
            Supported,
        ),
        Driver::new(
            "HFA",
            "Erdas Imagine Images (.img)",
            Raster,
            &["img"],
            NotSupported,
            NotSupported,
        ),
        Driver::new(
            "VRT",
            "Virtual Raster",
            Raster,
            &["vrt"],
            Planned,
            NotSupported,
        ),
        Driver::new(
            "GeoJSON",
            "GeoJSON",
            Vector,
            &["geojson", "json"],
            Supported,
            Supported,
        ),
        Driver::new(
            "ESRI Shapefile",
            "ESRI Shapefile / DBF",
            Vector,
            &["shp"],
            Supported,
            NotSupported,
        ),
        Driver::new(
            "GPKG",
            "GeoPackage vector",
            Vector,
            &["gpkg"],
            Supported,
            NotSupported,
        ),
        Driver::new(
            "KML",
            "Keyhole Markup Language",
            Vector,
            &["kml"],
            Planned,
            NotSupported,
        ),
    ]
}

/// Returns drivers the engine can read today.
#[must_use]
pub fn get_readable_drivers() -> Vec<Driver> {
    get_drivers()
        .into_iter()
        .filter(|d| d.capabilities.read.is_supported())
        .collect()
}

/// Finds a driver by its short name (case-insensitive).
///
/// # Examples
///
/// ```
/// use geoclip_core::drivers::find_driver;
///
/// let driver = find_driver("geojson").expect("GeoJSON should exist");
/// assert_eq!(driver.short_name, "GeoJSON");
/// assert!(find_driver("InvalidDriver").is_none());
/// ```
#[must_use]
pub fn find_driver(name: &str) -> Option<Driver> {
    get_drivers()
        .into_iter()
        .find(|d| d.short_name.eq_ignore_ascii_case(name))
}

fn extension_of(path: &Path) -> Option<&str> {
    path.extension().and_then(|e| e.to_str())
}

/// Finds the driver responsible for a file, by extension.
#[must_use]
pub fn driver_for_path(path: impl AsRef<Path>) -> Option<Driver> {
    let ext = extension_of(path.as_ref())?;
    get_drivers().into_iter().find(|d| d.matches_extension(ext))
}

/// Classifies a file as raster, vector or unsupported from its extension.
#[must_use]
pub fn classify(path: impl AsRef<Path>) -> DatasetKind {
    driver_for_path(path).map_or(DatasetKind::Unsupported, |d| d.kind)
}

/// Returns `true` if the file is a container archive that must be expanded first.
#[must_use]
pub fn is_archive(path: impl AsRef<Path>) -> bool {
    extension_of(path.as_ref())
        .is_some_and(|ext| ARCHIVE_EXTENSIONS.iter().any(|a| a.eq_ignore_ascii_case(ext)))
}

/// Picks the dataset to process from an expanded archive directory.
///
/// Files are visited recursively in sorted path order. The first raster wins; if the
/// archive holds no raster, the first vector is used. Returns `None` when neither exists.
///
/// # Errors
///
/// Returns an I/O error if the directory cannot be listed.
pub fn select_member(dir: impl AsRef<Path>) -> std::io::Result<Option<PathBuf>> {
    let mut files = Vec::new();
    collect_files(dir.as_ref(), &mut files)?;
    files.sort();

    let first_of = |kind: DatasetKind| files.iter().find(|f| classify(f) == kind).cloned();
    Ok(first_of(DatasetKind::Raster).or_else(|| first_of(DatasetKind::Vector)))
}

fn collect_files(dir: &Path, out: &mut Vec<PathBuf>) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_files(&path, out)?;
        } else {
            out.push(path);
        }
    }
    Ok(())
}
