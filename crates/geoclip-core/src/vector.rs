//! Vector datasets: reading, clipping against a boundary and `GeoJSON` output.
//!
//! Readers exist for `GeoJSON`, ESRI Shapefile and `GeoPackage`. Every reader produces
//! a [`VectorLayer`], a list of features with `geo` geometries and JSON properties
//! plus the CRS the source declared, if any.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use geo::{BooleanOps, Geometry, Intersects, LineString, MultiLineString, MultiPoint, MultiPolygon};
use geojson::{FeatureCollection, GeoJson, JsonObject, JsonValue};
use geozero::ToGeo;
use geozero::wkb::Wkb;
use log::debug;
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags};
use shapefile::dbase::FieldValue;

use crate::crs::{self, Crs};
use crate::drivers::driver_for_path;
use crate::error::{ClipError, IoResultExt, Result};
use crate::paths::{part_path, replace_atomically};

/// A single feature: optional geometry plus attribute map.
#[derive(Debug, Clone)]
pub struct Feature {
    pub geometry: Option<Geometry<f64>>,
    pub properties: JsonObject,
}

/// All features of a dataset and the CRS it declared.
#[derive(Debug, Clone, Default)]
pub struct VectorLayer {
    pub features: Vec<Feature>,
    pub crs: Option<Crs>,
}

impl VectorLayer {
    /// Returns `true` if the layer has no features.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Reproject every geometry into `to`. A layer without a CRS is taken to be in `from`.
    ///
    /// # Errors
    ///
    /// Returns [`ClipError::Crs`] when either CRS is unknown or a coordinate cannot be transformed.
    pub fn to_crs(mut self, from: Crs, to: Crs) -> Result<Self> {
        if from != to {
            for feature in &mut self.features {
                if let Some(geometry) = feature.geometry.take() {
                    feature.geometry = Some(crs::reproject(&geometry, from, to)?);
                }
            }
        }
        self.crs = Some(to);
        Ok(self)
    }
}

/// Read a vector dataset, choosing the reader from the file extension.
///
/// # Errors
///
/// Returns [`ClipError::NotFound`] if the file is missing, [`ClipError::UnsupportedFormat`]
/// for formats without a reader and [`ClipError::Read`] for undecodable content.
pub fn read_features(path: &Path) -> Result<VectorLayer> {
    if !path.exists() {
        return Err(ClipError::not_found(path));
    }
    let driver = driver_for_path(path)
        .ok_or_else(|| ClipError::unsupported(path, "unknown vector extension"))?;

    match driver.short_name {
        "GeoJSON" => read_geojson(path),
        "ESRI Shapefile" => read_shapefile(path),
        "GPKG" => read_geopackage(path),
        other => Err(ClipError::unsupported(
            path,
            format!("reading {other} is not available"),
        )),
    }
}

fn read_geojson(path: &Path) -> Result<VectorLayer> {
    let file = File::open(path).with_path(path)?;
    let geojson = GeoJson::from_reader(BufReader::new(file))
        .map_err(|e| ClipError::read("GeoJSON", path, e))?;

    let (features, crs) = match geojson {
        GeoJson::FeatureCollection(collection) => {
            let crs = legacy_crs_member(collection.foreign_members.as_ref());
            (collection.features, crs)
        },
        GeoJson::Feature(feature) => (vec![feature], None),
        GeoJson::Geometry(geometry) => (vec![geojson::Feature::from(geometry)], None),
    };

    let features = features
        .into_iter()
        .map(|feature| {
            let geometry = feature
                .geometry
                .map(Geometry::<f64>::try_from)
                .transpose()
                .map_err(|e| ClipError::read("GeoJSON", path, e))?;
            Ok(Feature {
                geometry,
                properties: feature.properties.unwrap_or_default(),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(VectorLayer { features, crs })
}

/// Reads the pre-RFC 7946 `"crs": {"type": "name", "properties": {"name": ...}}` member.
fn legacy_crs_member(members: Option<&JsonObject>) -> Option<Crs> {
    members?
        .get("crs")?
        .get("properties")?
        .get("name")?
        .as_str()
        .and_then(Crs::parse)
}

fn read_shapefile(path: &Path) -> Result<VectorLayer> {
    let mut reader =
        shapefile::Reader::from_path(path).map_err(|e| ClipError::read("Shapefile", path, e))?;

    let mut features = Vec::new();
    for item in reader.iter_shapes_and_records() {
        let (shape, record) = item.map_err(|e| ClipError::read("Shapefile", path, e))?;
        let geometry = Geometry::<f64>::try_from(shape).ok();
        let properties = record
            .into_iter()
            .map(|(name, value)| (name, field_value_to_json(value)))
            .collect();
        features.push(Feature {
            geometry,
            properties,
        });
    }

    let prj = path.with_extension("prj");
    let crs = if prj.exists() {
        let wkt = fs::read_to_string(&prj).with_path(&prj)?;
        Crs::from_wkt(&wkt)
    } else {
        None
    };

    Ok(VectorLayer { features, crs })
}

fn field_value_to_json(value: FieldValue) -> JsonValue {
    match value {
        FieldValue::Character(Some(s)) | FieldValue::Memo(s) => JsonValue::from(s.trim_end()),
        FieldValue::Numeric(Some(n)) | FieldValue::Double(n) | FieldValue::Currency(n) => {
            JsonValue::from(n)
        },
        FieldValue::Float(Some(n)) => JsonValue::from(f64::from(n)),
        FieldValue::Integer(n) => JsonValue::from(n),
        FieldValue::Logical(Some(b)) => JsonValue::from(b),
        FieldValue::Date(Some(d)) => {
            JsonValue::from(format!("{:04}-{:02}-{:02}", d.year(), d.month(), d.day()))
        },
        _ => JsonValue::Null,
    }
}

fn read_geopackage(path: &Path) -> Result<VectorLayer> {
    let err = |e: rusqlite::Error| ClipError::read("GeoPackage", path, e);
    let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY).map_err(err)?;

    let (table, geom_column, srs_id): (String, String, i64) = conn
        .query_row(
            "SELECT table_name, column_name, srs_id FROM gpkg_geometry_columns ORDER BY table_name LIMIT 1",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .map_err(err)?;

    let crs = conn
        .query_row(
            "SELECT organization, organization_coordsys_id FROM gpkg_spatial_ref_sys WHERE srs_id = ?1",
            [srs_id],
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)),
        )
        .ok()
        .filter(|(org, code)| org.eq_ignore_ascii_case("EPSG") && *code > 0)
        .and_then(|(_, code)| u32::try_from(code).ok())
        .map(Crs::from_epsg);

    let mut stmt = conn
        .prepare(&format!("SELECT * FROM \"{}\"", table.replace('"', "\"\"")))
        .map_err(err)?;
    let columns: Vec<String> = stmt.column_names().iter().map(ToString::to_string).collect();

    let mut rows = stmt.query([]).map_err(err)?;
    let mut features = Vec::new();
    while let Some(row) = rows.next().map_err(err)? {
        let mut feature = Feature {
            geometry: None,
            properties: JsonObject::new(),
        };
        for (idx, name) in columns.iter().enumerate() {
            let value = row.get_ref(idx).map_err(err)?;
            if name == &geom_column {
                if let ValueRef::Blob(blob) = value {
                    feature.geometry = Some(decode_gpkg_geometry(blob, path)?);
                }
                continue;
            }
            let json = match value {
                ValueRef::Null | ValueRef::Blob(_) => JsonValue::Null,
                ValueRef::Integer(i) => JsonValue::from(i),
                ValueRef::Real(f) => JsonValue::from(f),
                ValueRef::Text(t) => JsonValue::from(String::from_utf8_lossy(t).into_owned()),
            };
            feature.properties.insert(name.clone(), json);
        }
        features.push(feature);
    }

    Ok(VectorLayer { features, crs })
}

/// Strip the `GeoPackage` binary header and decode the WKB that follows it.
fn decode_gpkg_geometry(blob: &[u8], path: &Path) -> Result<Geometry<f64>> {
    if blob.len() < 8 || &blob[0..2] != b"GP" {
        return Err(ClipError::read("GeoPackage", path, "missing GP header"));
    }
    let flags = blob[3];
    let envelope_len = match (flags >> 1) & 0b111 {
        0 => 0,
        1 => 32,
        2 | 3 => 48,
        4 => 64,
        other => {
            return Err(ClipError::read(
                "GeoPackage",
                path,
                format!("invalid envelope indicator {other}"),
            ));
        },
    };
    let wkb = blob
        .get(8 + envelope_len..)
        .ok_or_else(|| ClipError::read("GeoPackage", path, "truncated geometry blob"))?;
    Wkb(wkb.to_vec())
        .to_geo()
        .map_err(|e| ClipError::read("GeoPackage", path, e))
}

/// Restrict a geometry to the parts inside `boundary`. `None` when nothing remains.
#[must_use]
pub fn clip_geometry(geometry: &Geometry<f64>, boundary: &MultiPolygon<f64>) -> Option<Geometry<f64>> {
    match geometry {
        Geometry::Point(p) => boundary.intersects(p).then(|| Geometry::Point(*p)),
        Geometry::MultiPoint(mp) => {
            let kept: Vec<_> = mp.iter().filter(|p| boundary.intersects(*p)).copied().collect();
            (!kept.is_empty()).then(|| Geometry::MultiPoint(MultiPoint::new(kept)))
        },
        Geometry::Line(line) => clip_lines(
            MultiLineString::new(vec![LineString::new(vec![line.start, line.end])]),
            boundary,
        ),
        Geometry::LineString(ls) => clip_lines(MultiLineString::new(vec![ls.clone()]), boundary),
        Geometry::MultiLineString(mls) => clip_lines(mls.clone(), boundary),
        Geometry::Polygon(poly) => clip_polygons(&MultiPolygon::new(vec![poly.clone()]), boundary),
        Geometry::MultiPolygon(mp) => clip_polygons(mp, boundary),
        Geometry::Rect(rect) => clip_polygons(&MultiPolygon::new(vec![rect.to_polygon()]), boundary),
        Geometry::Triangle(tri) => {
            clip_polygons(&MultiPolygon::new(vec![tri.to_polygon()]), boundary)
        },
        Geometry::GeometryCollection(gc) => {
            let parts: Vec<_> = gc.iter().filter_map(|g| clip_geometry(g, boundary)).collect();
            (!parts.is_empty()).then(|| Geometry::GeometryCollection(parts.into()))
        },
    }
}

fn clip_lines(lines: MultiLineString<f64>, boundary: &MultiPolygon<f64>) -> Option<Geometry<f64>> {
    let mut clipped = boundary.clip(&lines, false);
    clipped.0.retain(|ls| ls.0.len() > 1);
    match clipped.0.len() {
        0 => None,
        1 => clipped.0.pop().map(Geometry::LineString),
        _ => Some(Geometry::MultiLineString(clipped)),
    }
}

fn clip_polygons(polygons: &MultiPolygon<f64>, boundary: &MultiPolygon<f64>) -> Option<Geometry<f64>> {
    let mut clipped = boundary.intersection(polygons);
    match clipped.0.len() {
        0 => None,
        1 => clipped.0.pop().map(Geometry::Polygon),
        _ => Some(Geometry::MultiPolygon(clipped)),
    }
}

/// Clip every feature of `layer` to `boundary`, dropping features left empty.
///
/// Features without geometry are dropped as well: they cannot lie inside the boundary.
#[must_use]
pub fn clip_layer(layer: &VectorLayer, boundary: &MultiPolygon<f64>) -> VectorLayer {
    let features: Vec<Feature> = layer
        .features
        .iter()
        .filter_map(|feature| {
            let geometry = clip_geometry(feature.geometry.as_ref()?, boundary)?;
            Some(Feature {
                geometry: Some(geometry),
                properties: feature.properties.clone(),
            })
        })
        .collect();
    debug!(
        "Clipped {} feature(s) down to {}",
        layer.features.len(),
        features.len()
    );
    VectorLayer {
        features,
        crs: layer.crs,
    }
}

/// Write `layer` as a `GeoJSON` FeatureCollection, atomically.
///
/// # Errors
///
/// Returns [`ClipError::WriteFailed`] if the file cannot be written or moved into place.
pub fn write_geojson(layer: &VectorLayer, path: &Path) -> Result<()> {
    let features = layer
        .features
        .iter()
        .map(|f| geojson::Feature {
            bbox: None,
            geometry: f
                .geometry
                .as_ref()
                .map(|g| geojson::Geometry::new(geojson::Value::from(g))),
            id: None,
            properties: Some(f.properties.clone()),
            foreign_members: None,
        })
        .collect();

    let foreign_members = layer.crs.filter(|c| *c != Crs::WGS84).map(|c| {
        let mut members = JsonObject::new();
        members.insert(
            "crs".to_string(),
            serde_json::json!({
                "type": "name",
                "properties": { "name": format!("urn:ogc:def:crs:EPSG::{}", c.epsg()) }
            }),
        );
        members
    });

    let collection = FeatureCollection {
        bbox: None,
        features,
        foreign_members,
    };

    let temp = part_path(path);
    let write = || -> std::io::Result<()> {
        let mut writer = BufWriter::new(File::create(&temp)?);
        serde_json::to_writer(&mut writer, &collection)?;
        writer.flush()?;
        writer.get_ref().sync_all()
    };
    write().map_err(|e| {
        let _ = fs::remove_file(&temp);
        ClipError::write_failed(path, e)
    })?;
    replace_atomically(&temp, path).map_err(|e| ClipError::write_failed(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{Area, Rect, coord, line_string, point};
    use tempfile::TempDir;

    fn unit_square() -> MultiPolygon<f64> {
        MultiPolygon::new(vec![
            Rect::new(coord! { x: 0.0, y: 0.0 }, coord! { x: 1.0, y: 1.0 }).to_polygon(),
        ])
    }

    fn write_fixture(path: &Path) {
        fs::write(
            path,
            r#"{
  "type": "FeatureCollection",
  "features": [
    {"type": "Feature", "properties": {"name": "inside"},
     "geometry": {"type": "Point", "coordinates": [0.5, 0.5]}},
    {"type": "Feature", "properties": {"name": "outside"},
     "geometry": {"type": "Point", "coordinates": [5.0, 5.0]}},
    {"type": "Feature", "properties": {"name": "crossing"},
     "geometry": {"type": "LineString", "coordinates": [[-1.0, 0.5], [2.0, 0.5]]}}
  ]
}"#,
        )
        .unwrap();
    }

    #[test]
    fn test_read_geojson() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("roads.geojson");
        write_fixture(&path);

        let layer = read_features(&path).unwrap();
        assert_eq!(layer.features.len(), 3);
        assert!(layer.crs.is_none());
        assert_eq!(layer.features[0].properties["name"], "inside");
    }

    #[test]
    fn test_read_geojson_legacy_crs() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("merc.geojson");
        fs::write(
            &path,
            r#"{"type": "FeatureCollection",
                "crs": {"type": "name", "properties": {"name": "urn:ogc:def:crs:EPSG::3857"}},
                "features": []}"#,
        )
        .unwrap();

        let layer = read_features(&path).unwrap();
        assert_eq!(layer.crs, Some(Crs::WEB_MERCATOR));
    }

    const UTM_33N_WKT: &str = r#"PROJCS["WGS 84 / UTM zone 33N",GEOGCS["WGS 84",DATUM["WGS_1984",SPHEROID["WGS 84",6378137,298.257223563,AUTHORITY["EPSG","7030"]],AUTHORITY["EPSG","6326"]],PRIMEM["Greenwich",0],UNIT["degree",0.0174532925199433],AUTHORITY["EPSG","4326"]],PROJECTION["Transverse_Mercator"],PARAMETER["central_meridian",15],PARAMETER["scale_factor",0.9996],PARAMETER["false_easting",500000],UNIT["metre",1],AUTHORITY["EPSG","32633"]]"#;

    fn write_roads_shapefile(path: &Path, prj: Option<&str>) {
        use shapefile::dbase::{FieldName, Record, TableWriterBuilder};

        let table = TableWriterBuilder::new()
            .add_character_field(FieldName::try_from("name").unwrap(), 20)
            .add_numeric_field(FieldName::try_from("lanes").unwrap(), 4, 0)
            .add_logical_field(FieldName::try_from("paved").unwrap());
        let mut writer = shapefile::Writer::from_path(path, table).unwrap();
        let roads = [
            ("Main St", 2.0, true, [(0.5, 0.5), (0.5, 3.0)]),
            ("Dirt Track", 1.0, false, [(4.0, 4.0), (5.0, 5.0)]),
        ];
        for (name, lanes, paved, points) in roads {
            let line = shapefile::Polyline::new(
                points.iter().map(|&(x, y)| shapefile::Point::new(x, y)).collect(),
            );
            let mut record = Record::default();
            record.insert("name".to_string(), FieldValue::Character(Some(name.to_string())));
            record.insert("lanes".to_string(), FieldValue::Numeric(Some(lanes)));
            record.insert("paved".to_string(), FieldValue::Logical(Some(paved)));
            writer.write_shape_and_record(&line, &record).unwrap();
        }
        if let Some(wkt) = prj {
            fs::write(path.with_extension("prj"), wkt).unwrap();
        }
    }

    #[test]
    fn test_read_shapefile_with_prj() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("roads.shp");
        write_roads_shapefile(&path, Some(UTM_33N_WKT));

        let layer = read_features(&path).unwrap();
        assert_eq!(layer.crs, Some(Crs::from_epsg(32633)));
        assert_eq!(layer.features.len(), 2);
        let main = &layer.features[0];
        assert_eq!(main.properties["name"], "Main St");
        assert_eq!(main.properties["lanes"], 2.0);
        assert_eq!(main.properties["paved"], true);
        assert!(matches!(
            main.geometry,
            Some(Geometry::LineString(_) | Geometry::MultiLineString(_))
        ));
        assert_eq!(layer.features[1].properties["paved"], false);
    }

    #[test]
    fn test_read_shapefile_without_prj() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("roads.shp");
        write_roads_shapefile(&path, None);

        let layer = read_features(&path).unwrap();
        assert_eq!(layer.features.len(), 2);
        assert!(layer.crs.is_none());
    }

    #[test]
    fn test_field_value_to_json() {
        use shapefile::dbase::Date;

        assert_eq!(
            field_value_to_json(FieldValue::Character(Some("Main St   ".to_string()))),
            "Main St"
        );
        assert_eq!(field_value_to_json(FieldValue::Character(None)), JsonValue::Null);
        assert_eq!(field_value_to_json(FieldValue::Numeric(None)), JsonValue::Null);
        assert_eq!(field_value_to_json(FieldValue::Float(Some(1.5))), 1.5);
        assert_eq!(field_value_to_json(FieldValue::Integer(-7)), -7);
        assert_eq!(field_value_to_json(FieldValue::Currency(3.25)), 3.25);
        assert_eq!(field_value_to_json(FieldValue::Logical(None)), JsonValue::Null);
        assert_eq!(
            field_value_to_json(FieldValue::Date(Some(Date::new(9, 3, 2024)))),
            "2024-03-09"
        );
        assert_eq!(field_value_to_json(FieldValue::Memo("long text".to_string())), "long text");
    }

    /// `GeoPackage` geometry blob holding a little-endian WKB point.
    fn gpkg_point(x: f64, y: f64, envelope: bool) -> Vec<u8> {
        let flags = if envelope { 0b0000_0011 } else { 0b0000_0001 };
        let mut blob = vec![b'G', b'P', 0, flags];
        blob.extend_from_slice(&3857_i32.to_le_bytes());
        if envelope {
            for v in [x, x, y, y] {
                blob.extend_from_slice(&v.to_le_bytes());
            }
        }
        blob.push(1);
        blob.extend_from_slice(&1_u32.to_le_bytes());
        blob.extend_from_slice(&x.to_le_bytes());
        blob.extend_from_slice(&y.to_le_bytes());
        blob
    }

    fn write_parks_geopackage(path: &Path) {
        let conn = Connection::open(path).unwrap();
        conn.execute_batch(
            "CREATE TABLE gpkg_spatial_ref_sys (
                 srs_name TEXT NOT NULL, srs_id INTEGER PRIMARY KEY,
                 organization TEXT NOT NULL, organization_coordsys_id INTEGER NOT NULL,
                 definition TEXT NOT NULL);
             CREATE TABLE gpkg_geometry_columns (
                 table_name TEXT NOT NULL, column_name TEXT NOT NULL,
                 geometry_type_name TEXT NOT NULL, srs_id INTEGER NOT NULL,
                 z TINYINT NOT NULL, m TINYINT NOT NULL);
             CREATE TABLE parks (fid INTEGER PRIMARY KEY, geom BLOB, name TEXT, area REAL, note TEXT);
             INSERT INTO gpkg_spatial_ref_sys VALUES ('WGS 84 / Pseudo-Mercator', 3857, 'EPSG', 3857, 'undefined');
             INSERT INTO gpkg_geometry_columns VALUES ('parks', 'geom', 'POINT', 3857, 0, 0);",
        )
        .unwrap();
        let mut insert = conn
            .prepare("INSERT INTO parks (geom, name, area, note) VALUES (?1, ?2, ?3, NULL)")
            .unwrap();
        insert
            .execute(rusqlite::params![gpkg_point(10.0, 20.0, false), "North", 1.5])
            .unwrap();
        insert
            .execute(rusqlite::params![gpkg_point(-3.0, 4.5, true), "South", 2.0])
            .unwrap();
        insert
            .execute(rusqlite::params![None::<Vec<u8>>, "Unmapped", 0.0])
            .unwrap();
    }

    #[test]
    fn test_read_geopackage() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("parks.gpkg");
        write_parks_geopackage(&path);

        let layer = read_features(&path).unwrap();
        assert_eq!(layer.crs, Some(Crs::WEB_MERCATOR));
        assert_eq!(layer.features.len(), 3);

        let north = &layer.features[0];
        assert_eq!(north.geometry, Some(Geometry::Point(point!(x: 10.0, y: 20.0))));
        assert_eq!(north.properties["fid"], 1);
        assert_eq!(north.properties["name"], "North");
        assert_eq!(north.properties["area"], 1.5);
        assert_eq!(north.properties["note"], JsonValue::Null);
        assert!(!north.properties.contains_key("geom"));

        // The envelope is skipped.
        assert_eq!(
            layer.features[1].geometry,
            Some(Geometry::Point(point!(x: -3.0, y: 4.5)))
        );
        assert!(layer.features[2].geometry.is_none());
    }

    #[test]
    fn test_decode_gpkg_geometry_rejects_bad_blobs() {
        let path = Path::new("parks.gpkg");
        let read_error = |blob: &[u8]| matches!(decode_gpkg_geometry(blob, path), Err(ClipError::Read { .. }));

        assert!(read_error(&b"XX\0\x01\0\0\0\0\x01"[..]));
        let mut bad_envelope = gpkg_point(1.0, 2.0, false);
        bad_envelope[3] = 0b0000_1011;
        assert!(read_error(&bad_envelope));
        let mut truncated = gpkg_point(1.0, 2.0, false);
        truncated[3] = 0b0000_1001;
        truncated.truncate(20);
        assert!(read_error(&truncated));
    }

    #[test]
    fn test_read_missing_and_unsupported() {
        let err = read_features(Path::new("/definitely/missing.geojson")).unwrap_err();
        assert!(matches!(err, ClipError::NotFound { .. }));

        let temp_dir = TempDir::new().unwrap();
        let kml = temp_dir.path().join("doc.kml");
        fs::write(&kml, "<kml/>").unwrap();
        let err = read_features(&kml).unwrap_err();
        assert!(matches!(err, ClipError::UnsupportedFormat { .. }));
    }

    #[test]
    fn test_clip_layer() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("roads.geojson");
        write_fixture(&path);

        let layer = read_features(&path).unwrap();
        let clipped = clip_layer(&layer, &unit_square());
        let names: Vec<_> = clipped
            .features
            .iter()
            .map(|f| f.properties["name"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["inside", "crossing"]);

        let Some(Geometry::LineString(ls)) = &clipped.features[1].geometry else {
            panic!("expected a clipped line string");
        };
        for c in ls.coords() {
            assert!((0.0..=1.0).contains(&c.x));
        }
    }

    #[test]
    fn test_clip_geometry_outside() {
        let boundary = unit_square();
        assert!(clip_geometry(&Geometry::Point(point!(x: 3.0, y: 3.0)), &boundary).is_none());
        let line = line_string![(x: 2.0, y: 2.0), (x: 3.0, y: 3.0)];
        assert!(clip_geometry(&Geometry::LineString(line), &boundary).is_none());
    }

    #[test]
    fn test_clip_polygon() {
        let boundary = unit_square();
        let poly = Rect::new(coord! { x: 0.5, y: 0.5 }, coord! { x: 2.0, y: 2.0 }).to_polygon();
        let clipped = clip_geometry(&Geometry::Polygon(poly), &boundary).unwrap();
        let Geometry::Polygon(p) = clipped else {
            panic!("expected a polygon");
        };
        assert!((p.unsigned_area() - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_write_geojson_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let input = temp_dir.path().join("roads.geojson");
        write_fixture(&input);
        let output = temp_dir.path().join("out.geojson");

        let layer = read_features(&input).unwrap();
        write_geojson(&layer, &output).unwrap();

        assert!(!part_path(&output).exists());
        let text = fs::read_to_string(&output).unwrap();
        assert!(text.contains("FeatureCollection"));
        assert!(!text.contains("\"crs\""));
        assert_eq!(read_features(&output).unwrap().features.len(), 3);
    }

    #[test]
    fn test_write_geojson_records_crs() {
        let temp_dir = TempDir::new().unwrap();
        let output = temp_dir.path().join("merc.geojson");
        let layer = VectorLayer {
            features: vec![],
            crs: Some(Crs::WEB_MERCATOR),
        };
        write_geojson(&layer, &output).unwrap();
        assert_eq!(read_features(&output).unwrap().crs, Some(Crs::WEB_MERCATOR));
    }
}
