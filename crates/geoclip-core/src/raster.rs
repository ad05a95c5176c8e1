//! `GeoTIFF` rasters: windowed decoding, masking to a boundary and encoding.
//!
//! Georeferencing is taken from the `ModelPixelScale`/`ModelTiepoint` pair or from
//! `ModelTransformation`. The GeoKey directory is decoded only far enough to find
//! the EPSG code and is otherwise carried through to the output unchanged.
//!
//! Grayscale images and pixel-interleaved RGB/RGBA images are handled. A
//! [`RasterSource`] reads the header first so that only the strips or tiles under
//! a boundary's window are ever decoded.

use std::fs::File;
use std::io::{BufReader, BufWriter, Seek, Write};
use std::path::{Path, PathBuf};

use log::debug;
use rayon::prelude::*;
use tiff::decoder::{Decoder, DecodingResult, Limits};
use tiff::encoder::{TiffEncoder, TiffValue, colortype};
use tiff::tags::Tag;
use tiff::{ColorType, TiffError, TiffResult, TiffUnsupportedError};

use crate::boundary::Boundary;
use crate::crs::Crs;
use crate::drivers::driver_for_path;
use crate::error::{ClipError, IoResultExt, Result};
use crate::paths::{part_path, replace_atomically};

const MODEL_PIXEL_SCALE: u16 = 33550;
const MODEL_TIEPOINT: u16 = 33922;
const MODEL_TRANSFORMATION: u16 = 34264;
const GEO_KEY_DIRECTORY: u16 = 34735;
const GEO_DOUBLE_PARAMS: u16 = 34736;
const GEO_ASCII_PARAMS: u16 = 34737;
const GDAL_NODATA: u16 = 42113;

const GT_MODEL_TYPE_KEY: u16 = 1024;
const GT_RASTER_TYPE_KEY: u16 = 1025;
const GEOGRAPHIC_TYPE_KEY: u16 = 2048;
const PROJECTED_CS_TYPE_KEY: u16 = 3072;
const USER_DEFINED: u16 = 32767;

const FORMAT: &str = "GeoTIFF";

const PLANAR_SEPARATE: u16 = 2;
const SAMPLE_FORMAT_INT: u16 = 2;

fn tag(code: u16) -> Tag {
    Tag::from_u16_exhaustive(code)
}

/// Six-term affine transform in GDAL order: pixel `(col, row)` maps to
/// `(gt[0] + col*gt[1] + row*gt[2], gt[3] + col*gt[4] + row*gt[5])`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoTransform {
    forward: [f64; 6],
    inverse: [f64; 6],
}

impl GeoTransform {
    /// # Errors
    ///
    /// Returns [`ClipError::Invalid`] when the transform is not invertible.
    pub fn new(gt: [f64; 6]) -> Result<Self> {
        let determinant = gt[1] * gt[5] - gt[2] * gt[4];
        if determinant.abs() < 1e-15 || !determinant.is_finite() {
            return Err(ClipError::invalid(
                "geotransform",
                "determinant is zero",
            ));
        }
        let inv_det = 1.0 / determinant;
        let inverse = [
            (gt[2] * gt[3] - gt[5] * gt[0]) * inv_det,
            gt[5] * inv_det,
            -gt[2] * inv_det,
            (gt[4] * gt[0] - gt[1] * gt[3]) * inv_det,
            -gt[4] * inv_det,
            gt[1] * inv_det,
        ];
        Ok(Self {
            forward: gt,
            inverse,
        })
    }

    /// North-up transform from an origin (upper-left corner) and pixel size.
    ///
    /// # Errors
    ///
    /// Returns [`ClipError::Invalid`] for a zero pixel size.
    pub fn north_up(origin_x: f64, origin_y: f64, pixel_width: f64, pixel_height: f64) -> Result<Self> {
        Self::new([origin_x, pixel_width, 0.0, origin_y, 0.0, -pixel_height])
    }

    /// The six coefficients.
    #[must_use]
    pub fn coefficients(&self) -> [f64; 6] {
        self.forward
    }

    #[inline]
    #[must_use]
    pub fn pixel_to_geo(&self, col: f64, row: f64) -> (f64, f64) {
        let f = self.forward;
        (f[0] + col * f[1] + row * f[2], f[3] + col * f[4] + row * f[5])
    }

    #[inline]
    #[must_use]
    pub fn geo_to_pixel(&self, x: f64, y: f64) -> (f64, f64) {
        let i = self.inverse;
        (i[0] + x * i[1] + y * i[2], i[3] + x * i[4] + y * i[5])
    }

    /// The transform of a sub-window whose top-left pixel is `(col, row)`.
    #[must_use]
    pub fn shifted(&self, col: usize, row: usize) -> Self {
        let (x, y) = self.pixel_to_geo(col as f64, row as f64);
        let mut forward = self.forward;
        forward[0] = x;
        forward[3] = y;
        let mut inverse = self.inverse;
        inverse[0] -= col as f64;
        inverse[3] -= row as f64;
        Self { forward, inverse }
    }

    fn is_axis_aligned(&self) -> bool {
        self.forward[2] == 0.0 && self.forward[4] == 0.0
    }
}

/// Raw GeoKey tags, preserved byte-for-byte.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeoKeys {
    pub directory: Vec<u16>,
    pub doubles: Option<Vec<f64>>,
    pub ascii: Option<String>,
}

impl GeoKeys {
    /// Minimal directory declaring `crs` with area pixels.
    #[must_use]
    pub fn for_crs(crs: Crs) -> Self {
        let Ok(code) = u16::try_from(crs.epsg()) else {
            return Self::default();
        };
        let (model, key) = if crs == Crs::WGS84 {
            (2, GEOGRAPHIC_TYPE_KEY)
        } else {
            (1, PROJECTED_CS_TYPE_KEY)
        };
        Self {
            directory: vec![
                1, 1, 0, 3,
                GT_MODEL_TYPE_KEY, 0, 1, model,
                GT_RASTER_TYPE_KEY, 0, 1, 1,
                key, 0, 1, code,
            ],
            doubles: None,
            ascii: None,
        }
    }

    fn inline_value(&self, key: u16) -> Option<u16> {
        self.directory
            .get(4..)?
            .chunks_exact(4)
            .find(|entry| entry[0] == key && entry[1] == 0)
            .map(|entry| entry[3])
    }

    /// EPSG code declared by the projected or geographic type key.
    #[must_use]
    pub fn crs(&self) -> Option<Crs> {
        [PROJECTED_CS_TYPE_KEY, GEOGRAPHIC_TYPE_KEY]
            .into_iter()
            .filter_map(|key| self.inline_value(key))
            .find(|&code| code != 0 && code != USER_DEFINED)
            .map(|code| Crs::from_epsg(u32::from(code)))
    }

    fn is_empty(&self) -> bool {
        self.directory.is_empty()
    }
}

/// Pixel sample types the engine handles.
pub trait Sample: Copy + Send + Sync {
    fn from_f64(value: f64) -> Self;
    fn to_f64(self) -> f64;
}

macro_rules! impl_sample {
    ($($t:ty),*) => {
        $(
            impl Sample for $t {
                #[inline]
                fn from_f64(value: f64) -> Self {
                    value as $t
                }

                #[inline]
                fn to_f64(self) -> f64 {
                    self as f64
                }
            }
        )*
    };
}

impl_sample!(u8, i8, u16, i16, u32, i32, f32, f64);

/// Band values in their native sample type, row-major.
#[derive(Debug, Clone, PartialEq)]
pub enum RasterData {
    U8(Vec<u8>),
    I8(Vec<i8>),
    U16(Vec<u16>),
    I16(Vec<i16>),
    U32(Vec<u32>),
    I32(Vec<i32>),
    F32(Vec<f32>),
    F64(Vec<f64>),
}

macro_rules! with_values {
    ($data:expr, $v:ident => $body:expr) => {
        match $data {
            RasterData::U8($v) => $body,
            RasterData::I8($v) => $body,
            RasterData::U16($v) => $body,
            RasterData::I16($v) => $body,
            RasterData::U32($v) => $body,
            RasterData::I32($v) => $body,
            RasterData::F32($v) => $body,
            RasterData::F64($v) => $body,
        }
    };
}

macro_rules! map_values {
    ($data:expr, $v:ident => $body:expr) => {
        match $data {
            RasterData::U8($v) => RasterData::U8($body),
            RasterData::I8($v) => RasterData::I8($body),
            RasterData::U16($v) => RasterData::U16($body),
            RasterData::I16($v) => RasterData::I16($body),
            RasterData::U32($v) => RasterData::U32($body),
            RasterData::I32($v) => RasterData::I32($body),
            RasterData::F32($v) => RasterData::F32($body),
            RasterData::F64($v) => RasterData::F64($body),
        }
    };
}

macro_rules! zip_values {
    ($dst:expr, $src:expr, $d:ident, $s:ident => $body:expr, else $fallback:expr) => {
        match ($dst, $src) {
            (RasterData::U8($d), RasterData::U8($s)) => $body,
            (RasterData::I8($d), RasterData::I8($s)) => $body,
            (RasterData::U16($d), RasterData::U16($s)) => $body,
            (RasterData::I16($d), RasterData::I16($s)) => $body,
            (RasterData::U32($d), RasterData::U32($s)) => $body,
            (RasterData::I32($d), RasterData::I32($s)) => $body,
            (RasterData::F32($d), RasterData::F32($s)) => $body,
            (RasterData::F64($d), RasterData::F64($s)) => $body,
            _ => $fallback,
        }
    };
}

impl RasterData {
    #[must_use]
    pub fn len(&self) -> usize {
        with_values!(self, v => v.len())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Value at `index` widened to `f64`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<f64> {
        with_values!(self, v => v.get(index).map(|x| x.to_f64()))
    }

    /// Name of the sample type.
    #[must_use]
    pub fn sample_type(&self) -> &'static str {
        match self {
            RasterData::U8(_) => "u8",
            RasterData::I8(_) => "i8",
            RasterData::U16(_) => "u16",
            RasterData::I16(_) => "i16",
            RasterData::U32(_) => "u32",
            RasterData::I32(_) => "i32",
            RasterData::F32(_) => "f32",
            RasterData::F64(_) => "f64",
        }
    }

    fn from_decoded(result: DecodingResult, path: &Path) -> Result<Self> {
        Ok(match result {
            DecodingResult::U8(v) => RasterData::U8(v),
            DecodingResult::I8(v) => RasterData::I8(v),
            DecodingResult::U16(v) => RasterData::U16(v),
            DecodingResult::I16(v) => RasterData::I16(v),
            DecodingResult::U32(v) => RasterData::U32(v),
            DecodingResult::I32(v) => RasterData::I32(v),
            DecodingResult::F32(v) => RasterData::F32(v),
            DecodingResult::F64(v) => RasterData::F64(v),
            _ => {
                return Err(ClipError::unsupported(path, "64-bit integer samples"));
            },
        })
    }
}

/// Pixel window in source raster coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub col: usize,
    pub row: usize,
    pub width: usize,
    pub height: usize,
}

/// Smallest window of a `width` x `height` grid covering the boundary's bounding box.
fn pixel_window(transform: &GeoTransform, width: usize, height: usize, boundary: &Boundary) -> Option<Window> {
    let rect = boundary.bounding_rect()?;
    let corners = [
        transform.geo_to_pixel(rect.min().x, rect.min().y),
        transform.geo_to_pixel(rect.min().x, rect.max().y),
        transform.geo_to_pixel(rect.max().x, rect.min().y),
        transform.geo_to_pixel(rect.max().x, rect.max().y),
    ];
    let (mut min_c, mut min_r) = (f64::INFINITY, f64::INFINITY);
    let (mut max_c, mut max_r) = (f64::NEG_INFINITY, f64::NEG_INFINITY);
    for (c, r) in corners {
        min_c = min_c.min(c);
        max_c = max_c.max(c);
        min_r = min_r.min(r);
        max_r = max_r.max(r);
    }

    let clamp = |v: f64, hi: usize| v.max(0.0).min(hi as f64) as usize;
    let col0 = clamp(min_c.floor(), width);
    let col1 = clamp(max_c.ceil(), width);
    let row0 = clamp(min_r.floor(), height);
    let row1 = clamp(max_r.ceil(), height);
    (col1 > col0 && row1 > row0).then_some(Window {
        col: col0,
        row: row0,
        width: col1 - col0,
        height: row1 - row0,
    })
}

/// Where one decoded chunk lands in a window buffer, counted in samples.
struct Placement {
    rows: usize,
    len: usize,
    src_start: usize,
    src_stride: usize,
    dst_start: usize,
    dst_stride: usize,
}

fn blit<T: Copy>(dst: &mut [T], src: &[T], p: &Placement) {
    for r in 0..p.rows {
        let s = p.src_start + r * p.src_stride;
        let d = p.dst_start + r * p.dst_stride;
        dst[d..d + p.len].copy_from_slice(&src[s..s + p.len]);
    }
}

/// An opened `GeoTIFF` whose header has been read but whose pixels have not.
#[derive(Debug)]
pub struct RasterSource {
    decoder: Decoder<BufReader<File>>,
    path: PathBuf,
    pub width: usize,
    pub height: usize,
    /// Samples per pixel, stored interleaved.
    pub bands: usize,
    pub transform: GeoTransform,
    pub nodata: Option<f64>,
    pub crs: Option<Crs>,
    pub geokeys: GeoKeys,
}

impl RasterSource {
    /// Open a `GeoTIFF` and decode its georeferencing.
    ///
    /// # Errors
    ///
    /// Returns [`ClipError::NotFound`] for a missing file,
    /// [`ClipError::UnsupportedFormat`] for non-TIFF rasters and for pixel layouts
    /// other than grayscale or interleaved RGB/RGBA, and [`ClipError::Read`] for
    /// undecodable or non-georeferenced files.
    pub fn open(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(ClipError::not_found(path));
        }
        match driver_for_path(path) {
            Some(driver) if driver.short_name == "GTiff" => {},
            Some(driver) => {
                return Err(ClipError::unsupported(
                    path,
                    format!("reading {} is not available", driver.short_name),
                ));
            },
            None => return Err(ClipError::unsupported(path, "unknown raster extension")),
        }
        let file = File::open(path).with_path(path)?;
        let read_err = |e: tiff::TiffError| ClipError::read(FORMAT, path, e);

        // Limits apply per chunk: only windows are ever decoded.
        let mut decoder = Decoder::new(BufReader::new(file))
            .map_err(read_err)?
            .with_limits(Limits::unlimited());

        let bands = match decoder.colortype().map_err(read_err)? {
            ColorType::Gray(_) => 1,
            ColorType::RGB(_) => 3,
            ColorType::RGBA(_) => 4,
            other => {
                return Err(ClipError::unsupported(
                    path,
                    format!("{other:?} pixels are not supported"),
                ));
            },
        };
        if bands > 1 {
            let planar = decoder
                .find_tag(Tag::PlanarConfiguration)
                .map_err(read_err)?
                .map(|v| v.into_u16())
                .transpose()
                .map_err(read_err)?;
            if planar == Some(PLANAR_SEPARATE) {
                return Err(ClipError::unsupported(path, "band-sequential (planar) layout"));
            }
            let formats = decoder
                .find_tag(Tag::SampleFormat)
                .map_err(read_err)?
                .map(|v| v.into_u16_vec())
                .transpose()
                .map_err(read_err)?
                .unwrap_or_default();
            if formats.contains(&SAMPLE_FORMAT_INT) {
                return Err(ClipError::unsupported(path, "signed multi-band samples"));
            }
        }

        let (width, height) = decoder.dimensions().map_err(read_err)?;
        let transform = read_transform(&mut decoder, path)?;
        let geokeys = read_geokeys(&mut decoder).map_err(read_err)?;
        let nodata = decoder
            .find_tag(tag(GDAL_NODATA))
            .map_err(read_err)?
            .and_then(|v| v.into_string().ok())
            .and_then(|s| s.trim_matches(char::from(0)).trim().parse::<f64>().ok());
        let crs = geokeys.crs();

        Ok(Self {
            decoder,
            path: path.to_path_buf(),
            width: width as usize,
            height: height as usize,
            bands,
            transform,
            nodata,
            crs,
            geokeys,
        })
    }

    /// Pixel window covering `boundary`, which must be in the raster's CRS.
    #[must_use]
    pub fn window_for(&self, boundary: &Boundary) -> Option<Window> {
        pixel_window(&self.transform, self.width, self.height, boundary)
    }

    /// Strips or tiles intersecting `window`, each with its top-left pixel.
    fn chunks_for(&self, window: Window) -> Result<Vec<(u32, usize, usize)>> {
        let (chunk_w, chunk_h) = self.decoder.chunk_dimensions();
        let (chunk_w, chunk_h) = (chunk_w as usize, chunk_h as usize);
        if chunk_w == 0 || chunk_h == 0 {
            return Err(ClipError::read(FORMAT, &self.path, "zero-sized strips or tiles"));
        }
        let across = self.width.div_ceil(chunk_w);
        let cols = window.col / chunk_w..=(window.col + window.width - 1) / chunk_w;
        let rows = window.row / chunk_h..=(window.row + window.height - 1) / chunk_h;

        rows.flat_map(|r| cols.clone().map(move |c| (r, c)))
            .map(|(r, c)| {
                let index = u32::try_from(r * across + c)
                    .map_err(|e| ClipError::read(FORMAT, &self.path, e))?;
                Ok((index, c * chunk_w, r * chunk_h))
            })
            .collect()
    }

    /// Decode the pixels of `window` only.
    ///
    /// # Errors
    ///
    /// Returns [`ClipError::Invalid`] for a window outside the raster and
    /// [`ClipError::Read`] when a chunk cannot be decoded.
    pub fn read_window(&mut self, window: Window) -> Result<GeoRaster> {
        if window.width == 0
            || window.height == 0
            || window.col + window.width > self.width
            || window.row + window.height > self.height
        {
            return Err(ClipError::invalid(
                "window",
                format!(
                    "{}x{} at ({}, {}) exceeds {}x{} raster",
                    window.width, window.height, window.col, window.row, self.width, self.height
                ),
            ));
        }
        let bands = self.bands;
        let samples = window.width * window.height * bands;
        let chunks = self.chunks_for(window)?;
        let path = self.path.as_path();
        let read_err = |e: tiff::TiffError| ClipError::read(FORMAT, path, e);

        let mut data: Option<RasterData> = None;
        for &(index, origin_col, origin_row) in &chunks {
            let chunk = RasterData::from_decoded(self.decoder.read_chunk(index).map_err(read_err)?, path)?;
            let (data_w, data_h) = self.decoder.chunk_data_dimensions(index);
            let (data_w, data_h) = (data_w as usize, data_h as usize);
            if chunk.len() < data_w * data_h * bands {
                return Err(ClipError::read(FORMAT, path, format!("chunk {index} is truncated")));
            }

            let col0 = window.col.max(origin_col);
            let col1 = (window.col + window.width).min(origin_col + data_w);
            let row0 = window.row.max(origin_row);
            let row1 = (window.row + window.height).min(origin_row + data_h);
            if col1 <= col0 || row1 <= row0 {
                continue;
            }
            let placement = Placement {
                rows: row1 - row0,
                len: (col1 - col0) * bands,
                src_start: ((row0 - origin_row) * data_w + (col0 - origin_col)) * bands,
                src_stride: data_w * bands,
                dst_start: ((row0 - window.row) * window.width + (col0 - window.col)) * bands,
                dst_stride: window.width * bands,
            };

            let target = data.get_or_insert_with(|| {
                map_values!(&chunk, _v => vec![Sample::from_f64(0.0); samples])
            });
            zip_values!(target, &chunk, dst, src => blit(dst, src, &placement), else {
                return Err(ClipError::read(FORMAT, path, "sample type changes between chunks"));
            });
        }
        let data = data.ok_or_else(|| ClipError::read(FORMAT, path, "no pixel data"))?;

        debug!(
            "Read {} window {}x{} at ({}, {}) from {} chunk(s) ({} band(s) {}, {})",
            path.display(),
            window.width,
            window.height,
            window.col,
            window.row,
            chunks.len(),
            bands,
            data.sample_type(),
            self.crs.map_or_else(|| "no CRS".to_string(), |c| c.to_string())
        );
        Ok(GeoRaster {
            width: window.width,
            height: window.height,
            bands,
            transform: self.transform.shifted(window.col, window.row),
            data,
            nodata: self.nodata,
            crs: self.crs,
            geokeys: self.geokeys.clone(),
        })
    }

    /// Decode every pixel.
    ///
    /// # Errors
    ///
    /// See [`RasterSource::read_window`].
    pub fn read_all(mut self) -> Result<GeoRaster> {
        let window = Window {
            col: 0,
            row: 0,
            width: self.width,
            height: self.height,
        };
        self.read_window(window)
    }
}

/// A georeferenced raster held in memory, bands interleaved per pixel.
#[derive(Debug, Clone, PartialEq)]
pub struct GeoRaster {
    pub width: usize,
    pub height: usize,
    pub bands: usize,
    pub transform: GeoTransform,
    pub data: RasterData,
    pub nodata: Option<f64>,
    pub crs: Option<Crs>,
    pub geokeys: GeoKeys,
}

impl GeoRaster {
    /// Decode a whole `GeoTIFF`.
    ///
    /// # Errors
    ///
    /// See [`RasterSource::open`] and [`RasterSource::read_window`].
    pub fn read(path: &Path) -> Result<Self> {
        RasterSource::open(path)?.read_all()
    }

    /// First-band value at `(col, row)` widened to `f64`.
    #[must_use]
    pub fn value(&self, col: usize, row: usize) -> Option<f64> {
        self.band_value(col, row, 0)
    }

    #[must_use]
    pub fn band_value(&self, col: usize, row: usize, band: usize) -> Option<f64> {
        if col >= self.width || row >= self.height || band >= self.bands {
            return None;
        }
        self.data.get((row * self.width + col) * self.bands + band)
    }

    /// Crop to the boundary's bounding window and blank every pixel whose centre lies
    /// outside the boundary.
    ///
    /// Blanked pixels take the no-data value in every band, or 0 when none is
    /// declared. The boundary must already be in the raster's CRS. Returns `None`
    /// when no pixel centre falls inside the boundary.
    #[must_use]
    pub fn mask(&self, boundary: &Boundary) -> Option<GeoRaster> {
        let window = pixel_window(&self.transform, self.width, self.height, boundary)?;
        let transform = self.transform.shifted(window.col, window.row);

        let inside: Vec<bool> = (0..window.width * window.height)
            .into_par_iter()
            .map(|i| {
                let (c, r) = (i % window.width, i / window.width);
                let (x, y) = transform.pixel_to_geo(c as f64 + 0.5, r as f64 + 0.5);
                boundary.contains_point(x, y)
            })
            .collect();
        if !inside.iter().any(|&v| v) {
            return None;
        }

        let fill = self.nodata.unwrap_or(0.0);
        let data = map_values!(&self.data, v => crop(v, self.width, self.bands, window, &inside, fill));
        Some(GeoRaster {
            width: window.width,
            height: window.height,
            bands: self.bands,
            transform,
            data,
            nodata: self.nodata,
            crs: self.crs,
            geokeys: self.geokeys.clone(),
        })
    }

    /// Encode as a `GeoTIFF` at `path`, replacing it atomically.
    ///
    /// # Errors
    ///
    /// Returns [`ClipError::WriteFailed`] if encoding or the final rename fails.
    pub fn write(&self, path: &Path) -> Result<()> {
        let temp = part_path(path);
        let result = File::create(&temp)
            .map_err(|e| ClipError::write_failed(path, e))
            .and_then(|file| {
                let mut writer = BufWriter::new(file);
                self.encode(&mut writer, None)
                    .map_err(|e| ClipError::write_failed(path, e))?;
                writer
                    .flush()
                    .and_then(|()| writer.get_ref().sync_all())
                    .map_err(|e| ClipError::write_failed(path, e))
            })
            .and_then(|()| {
                replace_atomically(&temp, path).map_err(|e| ClipError::write_failed(path, e))
            });

        if result.is_err() {
            let _ = std::fs::remove_file(&temp);
        }
        result
    }

    fn encode<W: Write + Seek>(&self, writer: &mut W, rows_per_strip: Option<u32>) -> TiffResult<()> {
        let mut encoder = TiffEncoder::new(writer)?;
        let e = &mut encoder;
        let rows = rows_per_strip;
        match (self.bands, &self.data) {
            (1, RasterData::U8(v)) => self.encode_image::<_, colortype::Gray8>(e, v, rows),
            (1, RasterData::I8(v)) => self.encode_image::<_, colortype::GrayI8>(e, v, rows),
            (1, RasterData::U16(v)) => self.encode_image::<_, colortype::Gray16>(e, v, rows),
            (1, RasterData::I16(v)) => self.encode_image::<_, colortype::GrayI16>(e, v, rows),
            (1, RasterData::U32(v)) => self.encode_image::<_, colortype::Gray32>(e, v, rows),
            (1, RasterData::I32(v)) => self.encode_image::<_, colortype::GrayI32>(e, v, rows),
            (1, RasterData::F32(v)) => self.encode_image::<_, colortype::Gray32Float>(e, v, rows),
            (1, RasterData::F64(v)) => self.encode_image::<_, colortype::Gray64Float>(e, v, rows),
            (3, RasterData::U8(v)) => self.encode_image::<_, colortype::RGB8>(e, v, rows),
            (3, RasterData::U16(v)) => self.encode_image::<_, colortype::RGB16>(e, v, rows),
            (3, RasterData::U32(v)) => self.encode_image::<_, colortype::RGB32>(e, v, rows),
            (3, RasterData::F32(v)) => self.encode_image::<_, colortype::RGB32Float>(e, v, rows),
            (3, RasterData::F64(v)) => self.encode_image::<_, colortype::RGB64Float>(e, v, rows),
            (4, RasterData::U8(v)) => self.encode_image::<_, colortype::RGBA8>(e, v, rows),
            (4, RasterData::U16(v)) => self.encode_image::<_, colortype::RGBA16>(e, v, rows),
            (4, RasterData::U32(v)) => self.encode_image::<_, colortype::RGBA32>(e, v, rows),
            (4, RasterData::F32(v)) => self.encode_image::<_, colortype::RGBA32Float>(e, v, rows),
            (4, RasterData::F64(v)) => self.encode_image::<_, colortype::RGBA64Float>(e, v, rows),
            _ => Err(TiffError::UnsupportedError(TiffUnsupportedError::UnsupportedDataType)),
        }
    }

    fn encode_image<W, C>(
        &self,
        encoder: &mut TiffEncoder<W>,
        values: &[C::Inner],
        rows_per_strip: Option<u32>,
    ) -> TiffResult<()>
    where
        W: Write + Seek,
        C: colortype::ColorType,
        [C::Inner]: TiffValue,
    {
        let mut image = encoder.new_image::<C>(self.width as u32, self.height as u32)?;
        if let Some(rows) = rows_per_strip {
            image.rows_per_strip(rows)?;
        }
        let dir = image.encoder();

        let gt = self.transform.coefficients();
        if self.transform.is_axis_aligned() {
            dir.write_tag(tag(MODEL_PIXEL_SCALE), &[gt[1], -gt[5], 0.0][..])?;
            dir.write_tag(
                tag(MODEL_TIEPOINT),
                &[0.0, 0.0, 0.0, gt[0], gt[3], 0.0][..],
            )?;
        } else {
            let matrix = [
                gt[1], gt[2], 0.0, gt[0],
                gt[4], gt[5], 0.0, gt[3],
                0.0, 0.0, 0.0, 0.0,
                0.0, 0.0, 0.0, 1.0,
            ];
            dir.write_tag(tag(MODEL_TRANSFORMATION), &matrix[..])?;
        }

        let geokeys = match (&self.geokeys, self.crs) {
            (keys, Some(crs)) if keys.is_empty() => GeoKeys::for_crs(crs),
            (keys, _) => keys.clone(),
        };
        if !geokeys.is_empty() {
            dir.write_tag(tag(GEO_KEY_DIRECTORY), &geokeys.directory[..])?;
            if let Some(doubles) = &geokeys.doubles {
                dir.write_tag(tag(GEO_DOUBLE_PARAMS), &doubles[..])?;
            }
            if let Some(ascii) = &geokeys.ascii {
                dir.write_tag(tag(GEO_ASCII_PARAMS), ascii.as_str())?;
            }
        }
        if let Some(nodata) = self.nodata {
            dir.write_tag(tag(GDAL_NODATA), nodata.to_string().as_str())?;
        }

        image.write_data(values)
    }
}

fn crop<T: Sample>(
    values: &[T],
    src_width: usize,
    bands: usize,
    window: Window,
    inside: &[bool],
    fill: f64,
) -> Vec<T> {
    let fill = T::from_f64(fill);
    let mut out = Vec::with_capacity(window.width * window.height * bands);
    for r in 0..window.height {
        let start = ((window.row + r) * src_width + window.col) * bands;
        let row = &values[start..start + window.width * bands];
        let mask = &inside[r * window.width..(r + 1) * window.width];
        for (pixel, &keep) in row.chunks_exact(bands).zip(mask) {
            if keep {
                out.extend_from_slice(pixel);
            } else {
                out.extend(std::iter::repeat_n(fill, bands));
            }
        }
    }
    out
}

fn read_transform<R: std::io::Read + Seek>(decoder: &mut Decoder<R>, path: &Path) -> Result<GeoTransform> {
    let read_err = |e: tiff::TiffError| ClipError::read(FORMAT, path, e);
    let f64_tag = |decoder: &mut Decoder<R>, code: u16| -> Result<Option<Vec<f64>>> {
        decoder
            .find_tag(tag(code))
            .map_err(read_err)?
            .map(|v| v.into_f64_vec().map_err(read_err))
            .transpose()
    };

    if let Some(m) = f64_tag(decoder, MODEL_TRANSFORMATION)?
        && m.len() >= 8
    {
        return GeoTransform::new([m[3], m[0], m[1], m[7], m[4], m[5]]);
    }

    let scale = f64_tag(decoder, MODEL_PIXEL_SCALE)?;
    let tiepoint = f64_tag(decoder, MODEL_TIEPOINT)?;
    match (scale, tiepoint) {
        (Some(s), Some(t)) if s.len() >= 2 && t.len() >= 6 => GeoTransform::new([
            t[3] - t[0] * s[0],
            s[0],
            0.0,
            t[4] + t[1] * s[1],
            0.0,
            -s[1],
        ]),
        _ => Err(ClipError::read(FORMAT, path, "no georeferencing tags")),
    }
}

fn read_geokeys<R: std::io::Read + Seek>(decoder: &mut Decoder<R>) -> TiffResult<GeoKeys> {
    let Some(directory) = decoder.find_tag(tag(GEO_KEY_DIRECTORY))? else {
        return Ok(GeoKeys::default());
    };
    let doubles = decoder
        .find_tag(tag(GEO_DOUBLE_PARAMS))?
        .map(|v| v.into_f64_vec())
        .transpose()?;
    let ascii = decoder
        .find_tag(tag(GEO_ASCII_PARAMS))?
        .map(|v| v.into_string())
        .transpose()?;
    Ok(GeoKeys {
        directory: directory.into_u16_vec()?,
        doubles,
        ascii,
    })
}
