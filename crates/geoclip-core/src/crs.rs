//! Coordinate reference systems and reprojection.
//!
//! A [`Crs`] is an EPSG code. Transformations are resolved through the EPSG
//! registry bundled with `proj4rs`, so any pair of registered codes can be
//! reprojected. Codes missing from the registry are reported as [`ClipError::Crs`].

use std::fmt;

use geo::{Coord, MapCoords};
use proj4rs::Proj;
use proj4rs::adaptors::transform_xy;

use crate::error::{ClipError, Result};

/// EPSG codes that are spellings of Web Mercator.
const WEB_MERCATOR_ALIASES: &[u32] = &[3857, 900_913, 3785, 102_100, 102_113];

/// A coordinate reference system identified by its EPSG code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Crs {
    epsg: u32,
}

impl Default for Crs {
    fn default() -> Self {
        Self::WGS84
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EPSG:{}", self.epsg)
    }
}

impl Crs {
    /// Geographic WGS84, the default when a source declares nothing.
    pub const WGS84: Crs = Crs { epsg: 4326 };
    /// Spherical Web Mercator.
    pub const WEB_MERCATOR: Crs = Crs { epsg: 3857 };

    /// Build from an EPSG code, folding Web Mercator aliases onto 3857.
    #[must_use]
    pub fn from_epsg(code: u32) -> Self {
        if WEB_MERCATOR_ALIASES.contains(&code) {
            Self::WEB_MERCATOR
        } else {
            Self { epsg: code }
        }
    }

    /// The EPSG code.
    #[must_use]
    pub fn epsg(&self) -> u32 {
        self.epsg
    }

    /// Parse an identifier such as `EPSG:4326`, `urn:ogc:def:crs:EPSG::3857` or `CRS84`.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        let name = name.trim();
        let upper = name.to_ascii_uppercase();
        if upper.ends_with("CRS84") {
            return Some(Self::WGS84);
        }
        let code = upper
            .rsplit(':')
            .next()
            .filter(|_| upper.contains("EPSG"))?;
        code.parse().ok().map(Self::from_epsg)
    }

    /// Best-effort identification of an OGC/ESRI WKT definition (e.g. a `.prj` sidecar).
    #[must_use]
    pub fn from_wkt(wkt: &str) -> Option<Self> {
        // The outermost AUTHORITY is the last one in the string.
        if let Some(pos) = wkt.rfind("AUTHORITY[\"EPSG\",") {
            let rest = &wkt[pos + "AUTHORITY[\"EPSG\",".len()..];
            let code: String = rest
                .trim_start_matches('"')
                .chars()
                .take_while(char::is_ascii_digit)
                .collect();
            if let Ok(code) = code.parse() {
                return Some(Self::from_epsg(code));
            }
        }

        let upper = wkt.to_ascii_uppercase();
        if upper.contains("MERCATOR_AUXILIARY_SPHERE")
            || upper.contains("PSEUDO-MERCATOR")
            || upper.contains("WEB_MERCATOR")
        {
            return Some(Self::WEB_MERCATOR);
        }
        if upper.trim_start().starts_with("GEOGCS")
            && (upper.contains("WGS_1984") || upper.contains("WGS 84"))
        {
            return Some(Self::WGS84);
        }
        None
    }

    fn projection(self) -> Result<Proj> {
        let code = u16::try_from(self.epsg).map_err(|_| ClipError::Crs {
            from: self.to_string(),
            to: self.to_string(),
            reason: "EPSG code out of range".to_string(),
        })?;
        Proj::from_epsg_code(code).map_err(|e| ClipError::Crs {
            from: self.to_string(),
            to: self.to_string(),
            reason: format!("unknown definition ({e})"),
        })
    }
}

/// A resolved pair of projections.
///
/// Angular coordinates are given and returned in degrees.
pub struct Transformer {
    from: Crs,
    to: Crs,
    source: Proj,
    target: Proj,
}

impl fmt::Debug for Transformer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transformer")
            .field("from", &self.from)
            .field("to", &self.to)
            .finish_non_exhaustive()
    }
}

impl Transformer {
    /// Look up both projections.
    ///
    /// # Errors
    ///
    /// Returns [`ClipError::Crs`] if either code has no known definition.
    pub fn new(from: Crs, to: Crs) -> Result<Self> {
        let failed = |e: ClipError| match e {
            ClipError::Crs { reason, .. } => ClipError::Crs {
                from: from.to_string(),
                to: to.to_string(),
                reason,
            },
            other => other,
        };
        Ok(Self {
            from,
            to,
            source: from.projection().map_err(failed)?,
            target: to.projection().map_err(failed)?,
        })
    }

    /// Transform one coordinate.
    ///
    /// # Errors
    ///
    /// Returns [`ClipError::Crs`] when the point lies outside the projection's domain.
    pub fn transform(&self, c: Coord<f64>) -> Result<Coord<f64>> {
        let (x, y) = if self.source.is_latlong() {
            (c.x.to_radians(), c.y.to_radians())
        } else {
            (c.x, c.y)
        };
        let (x, y) = transform_xy(&self.source, &self.target, x, y).map_err(|e| ClipError::Crs {
            from: self.from.to_string(),
            to: self.to.to_string(),
            reason: format!("({}, {}): {e}", c.x, c.y),
        })?;
        Ok(if self.target.is_latlong() {
            Coord {
                x: x.to_degrees(),
                y: y.to_degrees(),
            }
        } else {
            Coord { x, y }
        })
    }
}

/// Reproject any `geo` geometry between two CRSs.
///
/// # Errors
///
/// Returns [`ClipError::Crs`] when a code is unknown or a coordinate cannot be
/// transformed.
pub fn reproject<G>(geometry: &G, from: Crs, to: Crs) -> Result<G>
where
    G: MapCoords<f64, f64, Output = G> + Clone,
{
    if from == to {
        return Ok(geometry.clone());
    }
    let transformer = Transformer::new(from, to)?;
    geometry.try_map_coords(|c| transformer.transform(c))
}
