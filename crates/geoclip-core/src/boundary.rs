//! Clip boundary loading.
//!
//! The boundary is loaded once before any dataset is processed and shared read-only
//! by every worker afterwards.

use std::path::Path;

use geo::algorithm::line_intersection::LineIntersection;
use geo::algorithm::sweep::Intersections;
use geo::{Area, BooleanOps, BoundingRect, Geometry, Intersects, Line, MultiPolygon, Point, Polygon, Rect};
use log::{info, warn};

use crate::crs::{self, Crs};
use crate::error::{ClipError, Result};
use crate::vector::read_features;

/// The polygonal region datasets are clipped to.
///
/// Never empty, and always carries a CRS.
#[derive(Debug, Clone)]
pub struct Boundary {
    polygons: MultiPolygon<f64>,
    crs: Crs,
}

impl Boundary {
    /// Build a boundary from polygons in a known CRS.
    ///
    /// # Errors
    ///
    /// Returns [`ClipError::Invalid`] when `polygons` is empty.
    pub fn new(polygons: MultiPolygon<f64>, crs: Crs) -> Result<Self> {
        if polygons.0.is_empty() {
            return Err(ClipError::invalid("boundary", "no polygon geometries"));
        }
        Ok(Self { polygons, crs })
    }

    /// Load a boundary from any readable vector file.
    ///
    /// Non-polygonal geometries are ignored and invalid polygons (self-crossing
    /// rings, degenerate rings, non-finite coordinates) are dropped with a warning.
    /// Overlapping polygons are dissolved so the boundary behaves as one region. A
    /// source without a CRS is assumed to be EPSG:4326.
    ///
    /// # Errors
    ///
    /// Returns [`ClipError::NotFound`] if `path` does not exist and
    /// [`ClipError::Invalid`] if it cannot be parsed or holds no valid polygons.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ClipError::not_found(path));
        }

        let layer = read_features(path).map_err(|e| match e {
            ClipError::NotFound { .. } => e,
            other => ClipError::invalid("boundary", other.to_string()),
        })?;

        let mut polygons: Vec<Polygon<f64>> = Vec::new();
        let mut ignored = 0usize;
        for geometry in layer.features.into_iter().filter_map(|f| f.geometry) {
            collect_polygons(geometry, &mut polygons, &mut ignored);
        }
        if ignored > 0 {
            warn!(
                "Ignored {ignored} non-polygon geometr{} in boundary {}",
                if ignored == 1 { "y" } else { "ies" },
                path.display()
            );
        }

        let found = polygons.len();
        polygons.retain(is_valid);
        let dropped = found - polygons.len();
        if dropped > 0 {
            warn!(
                "Dropped {dropped} invalid polygon(s) from boundary {}",
                path.display()
            );
            if polygons.is_empty() {
                return Err(ClipError::invalid("boundary", "no valid polygon geometries"));
            }
        }

        let crs = layer.crs.unwrap_or_else(|| {
            warn!(
                "Boundary {} has no CRS defined, assuming {}",
                path.display(),
                Crs::WGS84
            );
            Crs::WGS84
        });

        let boundary = Self::new(dissolve(polygons), crs)?;
        info!(
            "Boundary loaded from {} ({} polygon(s), {})",
            path.display(),
            boundary.polygons.0.len(),
            boundary.crs
        );
        Ok(boundary)
    }

    /// The boundary polygons.
    #[must_use]
    pub fn polygons(&self) -> &MultiPolygon<f64> {
        &self.polygons
    }

    /// The boundary CRS.
    #[must_use]
    pub fn crs(&self) -> Crs {
        self.crs
    }

    /// This boundary expressed in `target`; a cheap clone when the CRS already matches.
    ///
    /// # Errors
    ///
    /// Returns [`ClipError::Crs`] when either CRS is unknown or a coordinate cannot be transformed.
    pub fn to_crs(&self, target: Crs) -> Result<Boundary> {
        Ok(Boundary {
            polygons: crs::reproject(&self.polygons, self.crs, target)?,
            crs: target,
        })
    }

    /// Axis-aligned extent of the boundary.
    #[must_use]
    pub fn bounding_rect(&self) -> Option<Rect<f64>> {
        self.polygons.bounding_rect()
    }

    /// Returns `true` if the point lies inside or on the boundary.
    #[must_use]
    pub fn contains_point(&self, x: f64, y: f64) -> bool {
        self.polygons.intersects(&Point::new(x, y))
    }
}

fn collect_polygons(geometry: Geometry<f64>, out: &mut Vec<Polygon<f64>>, ignored: &mut usize) {
    match geometry {
        Geometry::Polygon(p) => out.push(p),
        Geometry::MultiPolygon(mp) => out.extend(mp),
        Geometry::Rect(r) => out.push(r.to_polygon()),
        Geometry::Triangle(t) => out.push(t.to_polygon()),
        Geometry::GeometryCollection(gc) => {
            for g in gc {
                collect_polygons(g, out, ignored);
            }
        },
        _ => *ignored += 1,
    }
}

/// Finite coordinates, rings of at least four points, non-zero area, and no ring
/// crossing or overlapping itself or another ring.
fn is_valid(polygon: &Polygon<f64>) -> bool {
    let rings = || std::iter::once(polygon.exterior()).chain(polygon.interiors());
    let malformed = rings().any(|ring| {
        ring.0.len() < 4 || ring.0.iter().any(|c| !c.x.is_finite() || !c.y.is_finite())
    });
    if malformed || polygon.unsigned_area() <= 0.0 {
        return false;
    }

    let segments: Vec<Line<f64>> = rings()
        .flat_map(|ring| ring.lines())
        .filter(|line| line.start != line.end)
        .collect();
    !Intersections::from_iter(segments).any(|(_, _, crossing)| match crossing {
        LineIntersection::SinglePoint { is_proper, .. } => is_proper,
        LineIntersection::Collinear { .. } => true,
    })
}

fn dissolve(polygons: Vec<Polygon<f64>>) -> MultiPolygon<f64> {
    if polygons.len() < 2 {
        return MultiPolygon::new(polygons);
    }
    polygons
        .into_iter()
        .fold(MultiPolygon::new(vec![]), |acc, p| {
            acc.union(&MultiPolygon::new(vec![p]))
        })
}
