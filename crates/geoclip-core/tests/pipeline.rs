//! End-to-end runs of the pipeline against local fixtures and a scripted transport.

use std::fs::{self, File};
use std::io::{self, Cursor, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use geo::{BoundingRect, MultiPolygon, Rect};
use geoclip_core::boundary::Boundary;
use geoclip_core::config::{DownloadConfig, PipelineConfig};
use geoclip_core::crs::Crs;
use geoclip_core::error::ErrorKind;
use geoclip_core::fetch::{Download, Fetcher, Transport, TransportError};
use geoclip_core::manifest::{Manifest, ManifestEntry};
use geoclip_core::pipeline::Pipeline;
use geoclip_core::raster::{GeoKeys, GeoRaster, GeoTransform, RasterData};
use geoclip_core::types::{BatchReport, ClipOutcome, DatasetDescriptor, SkipReason};
use geoclip_core::vector::read_features;
use tempfile::TempDir;
use url::Url;

/// Reader handing out at most 8 bytes per call, pausing before each.
struct Trickle {
    inner: Cursor<Vec<u8>>,
    delay: Duration,
}

impl Read for Trickle {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        std::thread::sleep(self.delay);
        let len = buf.len().min(8);
        self.inner.read(&mut buf[..len])
    }
}

/// Transport that fails a fixed number of times before serving `body`.
struct FlakyTransport {
    failures: usize,
    body: Vec<u8>,
    delay: Duration,
    calls: AtomicUsize,
}

impl FlakyTransport {
    fn new(failures: usize, body: impl Into<Vec<u8>>) -> Arc<Self> {
        Arc::new(Self {
            failures,
            body: body.into(),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        })
    }

    fn slow(body: impl Into<Vec<u8>>, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            failures: 0,
            body: body.into(),
            delay,
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Transport for FlakyTransport {
    fn open(&self, _url: &Url, _offset: u64) -> Result<Download, TransportError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            return Err(TransportError::Network("operation timed out".to_string()));
        }
        Ok(Download {
            ranged: false,
            length: Some(self.body.len() as u64),
            body: Box::new(Trickle {
                inner: Cursor::new(self.body.clone()),
                delay: self.delay,
            }),
        })
    }
}

struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
        }
    }

    fn path(&self, rel: &str) -> PathBuf {
        self.dir.path().join(rel)
    }

    fn out(&self) -> PathBuf {
        self.path("out")
    }

    fn config(&self, workers: usize) -> PipelineConfig {
        PipelineConfig::new(self.out())
            .with_data_dir(self.path("data"))
            .with_workers(workers)
    }

    fn pipeline(&self, workers: usize, transport: Arc<FlakyTransport>) -> Pipeline {
        let fetcher = Fetcher::new(
            transport,
            DownloadConfig {
                retry_delay: Duration::ZERO,
                ..DownloadConfig::default()
            },
        );
        Pipeline::with_fetcher(self.config(workers), fetcher).unwrap()
    }
}

/// Boundary covering x 0..2, y 0..2.
fn boundary() -> Boundary {
    Boundary::new(
        MultiPolygon::new(vec![Rect::new((0.0, 0.0), (2.0, 2.0)).to_polygon()]),
        Crs::WGS84,
    )
    .unwrap()
}

fn points_geojson(coords: &[(f64, f64)]) -> String {
    let features: Vec<String> = coords
        .iter()
        .enumerate()
        .map(|(i, (x, y))| {
            format!(
                r#"{{"type": "Feature", "properties": {{"id": {i}}}, "geometry": {{"type": "Point", "coordinates": [{x}, {y}]}}}}"#
            )
        })
        .collect();
    format!(
        r#"{{"type": "FeatureCollection", "features": [{}]}}"#,
        features.join(",")
    )
}

/// Raster over x 0..4, y 0..4 with 1-unit pixels.
fn write_raster(path: &Path) {
    GeoRaster {
        width: 4,
        height: 4,
        bands: 1,
        transform: GeoTransform::north_up(0.0, 4.0, 1.0, 1.0).unwrap(),
        data: RasterData::F32((1..=16).map(|v| v as f32).collect()),
        nodata: Some(-1.0),
        crs: Some(Crs::WGS84),
        geokeys: GeoKeys::for_crs(Crs::WGS84),
    }
    .write(path)
    .unwrap();
}

/// Two-road Shapefile in WGS84: one road runs from inside the boundary to x = 3.
fn write_roads_shapefile(path: &Path) {
    use shapefile::dbase::{FieldName, FieldValue, Record, TableWriterBuilder};

    let table = TableWriterBuilder::new().add_character_field(FieldName::try_from("name").unwrap(), 20);
    let mut writer = shapefile::Writer::from_path(path, table).unwrap();
    for (name, points) in [("half", [(1.0, 1.0), (3.0, 1.0)]), ("away", [(5.0, 5.0), (6.0, 5.0)])] {
        let line = shapefile::Polyline::new(points.iter().map(|&(x, y)| shapefile::Point::new(x, y)).collect());
        let mut record = Record::default();
        record.insert("name".to_string(), FieldValue::Character(Some(name.to_string())));
        writer.write_shape_and_record(&line, &record).unwrap();
    }
    fs::write(
        path.with_extension("prj"),
        r#"GEOGCS["GCS_WGS_1984",DATUM["D_WGS_1984",SPHEROID["WGS_1984",6378137.0,298.257223563]],PRIMEM["Greenwich",0.0],UNIT["Degree",0.0174532925199433]]"#,
    )
    .unwrap();
}

fn write_zip(path: &Path, members: &[(&str, Vec<u8>)]) {
    let mut writer = zip::ZipWriter::new(File::create(path).unwrap());
    for (name, data) in members {
        writer
            .start_file(*name, zip::write::SimpleFileOptions::default())
            .unwrap();
        writer.write_all(data).unwrap();
    }
    writer.finish().unwrap();
}

fn valid(descriptor: DatasetDescriptor) -> ManifestEntry {
    ManifestEntry::Valid(descriptor)
}

fn outcome<'a>(report: &'a BatchReport, name: &str) -> &'a ClipOutcome {
    &report.get(name).unwrap().outcome
}

#[test]
fn test_rerun_is_a_no_op() {
    let ws = Workspace::new();
    let roads = ws.path("roads.geojson");
    fs::write(&roads, points_geojson(&[(0.5, 0.5), (1.5, 1.0), (3.0, 3.0), (5.0, 0.5)])).unwrap();
    let entries = vec![valid(
        DatasetDescriptor::new("roads", roads.to_str().unwrap()).with_download(false),
    )];
    let transport = FlakyTransport::new(0, Vec::new());
    let pipeline = ws.pipeline(2, transport.clone());

    let first = pipeline.run(&entries, &boundary());
    let expected = ws.out().join("roads_clipped.geojson");
    assert_eq!(outcome(&first, "roads"), &ClipOutcome::Done(expected.clone()));
    assert_eq!(read_features(&expected).unwrap().features.len(), 2);
    let modified = fs::metadata(&expected).unwrap().modified().unwrap();
    let content = fs::read(&expected).unwrap();

    let second = pipeline.run(&entries, &boundary());
    assert_eq!(
        outcome(&second, "roads"),
        &ClipOutcome::Skipped(SkipReason::AlreadyDone)
    );
    assert_eq!(fs::metadata(&expected).unwrap().modified().unwrap(), modified);
    assert_eq!(fs::read(&expected).unwrap(), content);
    assert_eq!(transport.calls(), 0);
}

#[test]
fn test_half_covered_shapefile_is_clipped() {
    let ws = Workspace::new();
    let roads = ws.path("roads.shp");
    write_roads_shapefile(&roads);
    let pipeline = ws.pipeline(2, FlakyTransport::new(0, Vec::new()));

    let report = pipeline.run(
        &[valid(DatasetDescriptor::new("roads", roads.to_str().unwrap()))],
        &boundary(),
    );
    let expected = ws.out().join("roads_clipped.geojson");
    assert_eq!(outcome(&report, "roads"), &ClipOutcome::Done(expected.clone()));

    let layer = read_features(&expected).unwrap();
    assert_eq!(layer.features.len(), 1);
    assert_eq!(layer.features[0].properties["name"], "half");
    let extent = layer.features[0]
        .geometry
        .as_ref()
        .and_then(|g| g.bounding_rect())
        .unwrap();
    assert!((extent.min().x - 1.0).abs() < 1e-9);
    assert!((extent.max().x - 2.0).abs() < 1e-9);
}

#[test]
fn test_vector_outside_boundary_is_empty_result() {
    let ws = Workspace::new();
    let far = ws.path("far.geojson");
    fs::write(&far, points_geojson(&[(10.0, 10.0), (-5.0, 3.0)])).unwrap();
    let pipeline = ws.pipeline(1, FlakyTransport::new(0, Vec::new()));

    let report = pipeline.run(
        &[valid(DatasetDescriptor::new("far", far.to_str().unwrap()))],
        &boundary(),
    );
    assert_eq!(
        outcome(&report, "far"),
        &ClipOutcome::Skipped(SkipReason::EmptyResult)
    );
    assert!(!ws.out().join("far_clipped.geojson").exists());
    assert!(!report.has_failures());
}

#[test]
fn test_archive_with_both_kinds_selects_raster() {
    let ws = Workspace::new();
    let tif = ws.path("dem.tif");
    write_raster(&tif);
    let bundle = ws.path("bundle.zip");
    write_zip(
        &bundle,
        &[
            ("a_roads.geojson", points_geojson(&[(1.0, 1.0)]).into_bytes()),
            ("dem/z_dem.tif", fs::read(&tif).unwrap()),
        ],
    );
    let pipeline = ws.pipeline(1, FlakyTransport::new(0, Vec::new()));

    let report = pipeline.run(
        &[valid(DatasetDescriptor::new("bundle", bundle.to_str().unwrap()))],
        &boundary(),
    );
    let expected = ws.out().join("bundle_clipped.tif");
    assert_eq!(outcome(&report, "bundle"), &ClipOutcome::Done(expected.clone()));

    let clipped = GeoRaster::read(&expected).unwrap();
    assert_eq!((clipped.width, clipped.height), (2, 2));
    assert_eq!(clipped.value(0, 0), Some(9.0));
    assert!(ws.path("bundle").join("dem").join("z_dem.tif").exists());
}

#[test]
fn test_archive_without_dataset_is_skipped() {
    let ws = Workspace::new();
    let bundle = ws.path("docs.zip");
    write_zip(&bundle, &[("README.txt", b"nothing here".to_vec())]);
    let pipeline = ws.pipeline(1, FlakyTransport::new(0, Vec::new()));

    let report = pipeline.run(
        &[valid(DatasetDescriptor::new("docs", bundle.to_str().unwrap()))],
        &boundary(),
    );
    assert_eq!(
        outcome(&report, "docs"),
        &ClipOutcome::Skipped(SkipReason::NoValidMember)
    );
}

#[test]
fn test_download_succeeds_on_third_attempt() {
    let ws = Workspace::new();
    let transport = FlakyTransport::new(2, points_geojson(&[(1.0, 1.0), (9.0, 9.0)]));
    let pipeline = ws.pipeline(1, transport.clone());

    let report = pipeline.run(
        &[valid(DatasetDescriptor::new(
            "pois",
            "https://example.com/layers/pois.geojson",
        ))],
        &boundary(),
    );
    assert_eq!(
        outcome(&report, "pois"),
        &ClipOutcome::Done(ws.out().join("pois_clipped.geojson"))
    );
    let raw = ws.path("data").join("pois.geojson");
    assert!(raw.exists());
    assert!(!ws.path("data").join("pois.geojson.part").exists());
    assert_eq!(transport.calls(), 3);
}

#[test]
fn test_entries_sharing_a_url_do_not_share_a_download() {
    let ws = Workspace::new();
    let transport = FlakyTransport::slow(
        points_geojson(&[(0.5, 0.5), (1.5, 1.5), (7.0, 7.0)]),
        Duration::from_millis(2),
    );
    let pipeline = ws.pipeline(2, transport.clone());

    let report = pipeline.run(
        &[
            valid(DatasetDescriptor::new("a", "https://example.com/pois.geojson")),
            valid(DatasetDescriptor::new("b", "https://example.com/pois.geojson")),
        ],
        &boundary(),
    );
    let expected = ws.out().join("a_clipped.geojson");
    assert_eq!(outcome(&report, "a"), &ClipOutcome::Done(expected.clone()));
    assert_eq!(read_features(&expected).unwrap().features.len(), 2);
    assert!(matches!(
        outcome(&report, "b"),
        ClipOutcome::Failed {
            kind: ErrorKind::InvalidEntry,
            ..
        }
    ));
    assert!(!ws.path("data").join("pois.geojson.part").exists());
    assert_eq!(transport.calls(), 1);
}

#[test]
fn test_remote_archive_is_downloaded_once() {
    let ws = Workspace::new();
    let mut zip_bytes = Vec::new();
    {
        let mut writer = zip::ZipWriter::new(Cursor::new(&mut zip_bytes));
        writer
            .start_file("roads.geojson", zip::write::SimpleFileOptions::default())
            .unwrap();
        writer
            .write_all(points_geojson(&[(1.0, 1.5)]).as_bytes())
            .unwrap();
        writer.finish().unwrap();
    }
    let transport = FlakyTransport::new(0, zip_bytes);
    let pipeline = ws.pipeline(1, transport.clone());
    let entry = [valid(DatasetDescriptor::new(
        "roads",
        "https://example.com/roads.zip",
    ))];

    let first = pipeline.run(&entry, &boundary());
    assert!(matches!(outcome(&first, "roads"), ClipOutcome::Done(_)));
    assert!(ws.path("data").join("roads").join("roads.geojson").exists());

    // Losing the output re-clips from the cached download and extraction.
    fs::remove_file(ws.out().join("roads_clipped.geojson")).unwrap();
    let second = pipeline.run(&entry, &boundary());
    assert!(matches!(outcome(&second, "roads"), ClipOutcome::Done(_)));
    assert_eq!(transport.calls(), 1);
}

#[test]
fn test_download_disabled_uses_cached_copy() {
    let ws = Workspace::new();
    fs::create_dir_all(ws.path("data")).unwrap();
    fs::write(ws.path("data").join("pois.geojson"), points_geojson(&[(1.0, 1.0)])).unwrap();
    let transport = FlakyTransport::new(0, Vec::new());
    let pipeline = ws.pipeline(1, transport.clone());

    let report = pipeline.run(
        &[
            valid(
                DatasetDescriptor::new("cached", "https://example.com/pois.geojson")
                    .with_download(false),
            ),
            valid(
                DatasetDescriptor::new("uncached", "https://example.com/other.geojson")
                    .with_download(false),
            ),
        ],
        &boundary(),
    );
    assert!(matches!(outcome(&report, "cached"), ClipOutcome::Done(_)));
    assert_eq!(
        outcome(&report, "uncached"),
        &ClipOutcome::Skipped(SkipReason::DownloadDisabled)
    );
    assert_eq!(transport.calls(), 0);
}

#[test]
fn test_concurrent_matches_sequential() {
    let inputs = Workspace::new();
    let mut descriptors = Vec::new();
    for i in 0..8 {
        let path = inputs.path(&format!("layer{i}.geojson"));
        let x = if i % 3 == 0 { 10.0 } else { 1.0 };
        fs::write(&path, points_geojson(&[(x, 1.0)])).unwrap();
        descriptors.push(DatasetDescriptor::new(format!("layer{i}"), path.to_str().unwrap()));
    }
    let dem = inputs.path("dem.tif");
    write_raster(&dem);
    descriptors.push(DatasetDescriptor::new("dem", dem.to_str().unwrap()));
    descriptors.push(DatasetDescriptor::new("missing", inputs.path("nope.shp").to_str().unwrap()));
    let entries: Vec<_> = descriptors.into_iter().map(valid).collect();

    let summarize = |report: &BatchReport, out: &Path| -> Vec<(String, String)> {
        report
            .entries
            .iter()
            .map(|e| {
                let state = match &e.outcome {
                    ClipOutcome::Done(p) => format!("done:{}", p.strip_prefix(out).unwrap().display()),
                    ClipOutcome::Skipped(r) => format!("skipped:{r}"),
                    ClipOutcome::Failed { kind, .. } => format!("failed:{kind}"),
                };
                (e.name.clone(), state)
            })
            .collect()
    };

    let sequential_ws = Workspace::new();
    let sequential = sequential_ws
        .pipeline(1, FlakyTransport::new(0, Vec::new()))
        .run(&entries, &boundary());
    let concurrent_ws = Workspace::new();
    let concurrent = concurrent_ws
        .pipeline(4, FlakyTransport::new(0, Vec::new()))
        .run(&entries, &boundary());

    assert_eq!(
        summarize(&sequential, &sequential_ws.out()),
        summarize(&concurrent, &concurrent_ws.out())
    );
    assert_eq!(sequential.succeeded(), 6);
    assert_eq!(sequential.skipped(), 3);
    assert_eq!(sequential.failed(), 1);
}

#[test]
fn test_manifest_with_bad_records_runs_the_rest() {
    let ws = Workspace::new();
    let roads = ws.path("roads.geojson");
    fs::write(&roads, points_geojson(&[(1.0, 1.0)])).unwrap();
    let manifest = Manifest::parse(&format!(
        "
datasets:
  - name: roads
    path: {}
    data_save_filename: roads_aoi.geojson
  - name: roads
    source: other.geojson
  - source: orphan.geojson
",
        roads.display()
    ))
    .unwrap();
    let pipeline = ws.pipeline(2, FlakyTransport::new(0, Vec::new()));

    let report = pipeline.run(&manifest.entries, &boundary());
    assert_eq!(report.entries.len(), 3);
    assert_eq!(
        report.entries[0].outcome,
        ClipOutcome::Done(ws.out().join("roads_aoi.geojson"))
    );
    for entry in &report.entries[1..] {
        assert!(matches!(
            entry.outcome,
            ClipOutcome::Failed {
                kind: ErrorKind::InvalidEntry,
                ..
            }
        ));
    }
    assert_eq!(report.entries[2].name, "#2");
}
