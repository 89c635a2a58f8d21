//! GeoTIFF reading and writing.
//!
//! The native path uses the `tiff` crate and understands the pixel-scale,
//! tiepoint and model-transformation tags, the GeoKey directory and GDAL's
//! no-data tag. With the `gdal` feature single-band rasters are read through
//! GDAL instead. Geographic rasters and UTM projections are supported; other
//! projected coordinate systems are rejected.

use std::fs::File;
use std::io::{BufWriter, Seek, Write};
use std::path::Path;

use tiff::decoder::{Decoder, DecodingResult};
use tiff::encoder::colortype::RGB32Float;
use tiff::encoder::TiffEncoder;
use tiff::tags::Tag;
use tracing::{debug, info};

use rsp_core::coordinate::{Datum, GeoTransform, Georeference, Projection};
use rsp_core::progress::ProgressSink;
use rsp_core::raster::{Masked, Raster};

use crate::error::{IoError, Result};

const MODEL_PIXEL_SCALE: u16 = 33550;
const MODEL_TIEPOINT: u16 = 33922;
const MODEL_TRANSFORMATION: u16 = 34264;
const GEO_KEY_DIRECTORY: u16 = 34735;
const GDAL_NODATA: u16 = 42113;

const GT_MODEL_TYPE_KEY: u16 = 1024;
const GT_RASTER_TYPE_KEY: u16 = 1025;
const PROJECTED_CS_TYPE_KEY: u16 = 3072;
const MODEL_TYPE_PROJECTED: u16 = 1;
const MODEL_TYPE_GEOGRAPHIC: u16 = 2;
const RASTER_PIXEL_IS_AREA: u16 = 1;

/// Value stored in the first two bands of invalid pixels
pub const PAIR_NODATA: f32 = -32768.0;

const ROWS_PER_STRIP: u32 = 64;

/// Width and height of an image, from its header only
pub fn image_size<P: AsRef<Path>>(path: P) -> Result<(usize, usize)> {
    let path = path.as_ref();
    match image::image_dimensions(path) {
        Ok((w, h)) => Ok((w as usize, h as usize)),
        // Float and multi-band TIFFs the image crate does not decode
        Err(err) if is_tiff(path) => {
            debug!("image crate cannot open {}: {err}; using the TIFF decoder", path.display());
            let mut decoder = Decoder::new(File::open(path)?)?;
            let (w, h) = decoder.dimensions()?;
            Ok((w as usize, h as usize))
        }
        Err(err) => Err(err.into()),
    }
}

fn is_tiff(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("tif") || e.eq_ignore_ascii_case("tiff"))
}

/// First band of a GeoTIFF with its no-data value and, when the file is
/// georeferenced, a georeference on `datum`
pub fn read_raster<P: AsRef<Path>>(path: P, datum: Datum) -> Result<Raster<f32>> {
    let path = path.as_ref();
    #[cfg(feature = "gdal")]
    let raster = read_raster_gdal(path, datum)?;
    #[cfg(not(feature = "gdal"))]
    let raster = read_raster_native(path, datum)?;

    info!(
        "read {}x{} raster from {} (georeferenced: {}, no-data: {:?})",
        raster.cols(),
        raster.rows(),
        path.display(),
        raster.georef().is_some(),
        raster.nodata()
    );
    Ok(raster)
}

#[cfg_attr(feature = "gdal", allow(dead_code))]
fn read_raster_native(path: &Path, datum: Datum) -> Result<Raster<f32>> {
    let mut decoder = Decoder::new(File::open(path)?)?;
    let (cols, rows, data) = decode_bands(&mut decoder)?;

    let samples_per_pixel = data.len() / (rows * cols);
    let first: Vec<f32> = data.into_iter().step_by(samples_per_pixel).collect();
    let mut raster = Raster::from_vec(first, rows, cols)?;
    if let Some(nodata) = read_nodata(&mut decoder) {
        raster = raster.with_nodata(Some(nodata));
    }
    if let Some(transform) = read_geotransform(&mut decoder) {
        let keys = read_crs_keys(&mut decoder);
        let georef = georeference_for(transform, datum, keys, (cols, rows))?;
        raster = raster.with_georef(Some(georef));
    }
    Ok(raster)
}

/// Coordinate system keys of a GeoTIFF
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct CrsKeys {
    model_type: Option<u16>,
    projected_cs: Option<u32>,
}

/// Short values stored inline in the GeoKey directory
fn read_crs_keys<R: std::io::Read + Seek>(decoder: &mut Decoder<R>) -> CrsKeys {
    let Ok(dir) = decoder.get_tag_u32_vec(Tag::from_u16_exhaustive(GEO_KEY_DIRECTORY)) else {
        return CrsKeys::default();
    };
    let mut keys = CrsKeys::default();
    // Header: version, revision, minor revision, key count; then
    // (key, location, count, value) entries
    for entry in dir.get(4..).unwrap_or_default().chunks_exact(4) {
        if entry[1] != 0 {
            continue;
        }
        match u16::try_from(entry[0]) {
            Ok(GT_MODEL_TYPE_KEY) => keys.model_type = u16::try_from(entry[3]).ok(),
            Ok(PROJECTED_CS_TYPE_KEY) => keys.projected_cs = Some(entry[3]),
            _ => {}
        }
    }
    keys
}

/// Georeference of a `cols x rows` raster whose coordinate system is
/// described by `keys`.
///
/// Planar datums take projected coordinates as local `(x, y)`. On an
/// ellipsoid projected rasters need a UTM code, and geographic ones must
/// have coordinates that are valid degrees.
fn georeference_for(
    transform: GeoTransform,
    datum: Datum,
    keys: CrsKeys,
    (cols, rows): (usize, usize),
) -> Result<Georeference> {
    if datum == Datum::Planar {
        return Ok(Georeference::new(transform, datum));
    }
    match keys.model_type {
        Some(MODEL_TYPE_PROJECTED) => {
            let code = keys.projected_cs.ok_or_else(|| {
                IoError::Unsupported("projected raster without a projected CRS code".to_string())
            })?;
            let projection = Projection::utm_from_epsg(code).ok_or_else(|| {
                IoError::Unsupported(format!("projected CRS EPSG:{code}; only UTM is supported"))
            })?;
            Ok(Georeference::new(transform, datum).with_projection(projection)?)
        }
        Some(MODEL_TYPE_GEOGRAPHIC) | None => {
            let corners = [(0, 0), (cols, 0), (0, rows), (cols, rows)];
            let degrees = corners.iter().all(|&(c, r)| {
                let (lon, lat) = transform.apply(c as f64, r as f64);
                lon.abs() <= 360.0 && lat.abs() <= 90.0
            });
            if !degrees {
                return Err(IoError::Unsupported(format!(
                    "raster coordinates {:?} are not longitude/latitude and no projection is declared",
                    transform.apply(0.0, 0.0)
                )));
            }
            Ok(Georeference::new(transform, datum))
        }
        Some(other) => Err(IoError::Unsupported(format!("GeoTIFF model type {other}"))),
    }
}

#[cfg(feature = "gdal")]
fn read_raster_gdal(path: &Path, datum: Datum) -> Result<Raster<f32>> {
    let dataset = gdal::Dataset::open(path)?;
    let band = dataset.rasterband(1)?;
    let (cols, rows) = dataset.raster_size();
    let buffer = band.read_as::<f32>((0, 0), (cols, rows), (cols, rows), None)?;

    let mut raster = Raster::from_vec(buffer.data().to_vec(), rows, cols)?;
    if let Some(nodata) = band.no_data_value() {
        raster = raster.with_nodata(Some(nodata as f32));
    }
    if let Ok(gt) = dataset.geo_transform() {
        let keys = match dataset.spatial_ref() {
            Ok(srs) if srs.is_projected() => CrsKeys {
                model_type: Some(MODEL_TYPE_PROJECTED),
                projected_cs: srs.auth_code().ok().and_then(|c| u32::try_from(c).ok()),
            },
            Ok(srs) if srs.is_geographic() => CrsKeys {
                model_type: Some(MODEL_TYPE_GEOGRAPHIC),
                projected_cs: None,
            },
            _ => CrsKeys::default(),
        };
        let georef = georeference_for(GeoTransform::from_gdal(gt), datum, keys, (cols, rows))?;
        raster = raster.with_georef(Some(georef));
    }
    Ok(raster)
}

/// Decode every sample as `f32`; returns `(cols, rows, interleaved samples)`
fn decode_bands<R: std::io::Read + Seek>(decoder: &mut Decoder<R>) -> Result<(usize, usize, Vec<f32>)> {
    let (width, height) = decoder.dimensions()?;
    let (cols, rows) = (width as usize, height as usize);

    let data: Vec<f32> = match decoder.read_image()? {
        DecodingResult::F32(buf) => buf,
        DecodingResult::F64(buf) => buf.into_iter().map(|v| v as f32).collect(),
        DecodingResult::U8(buf) => buf.into_iter().map(f32::from).collect(),
        DecodingResult::U16(buf) => buf.into_iter().map(f32::from).collect(),
        DecodingResult::U32(buf) => buf.into_iter().map(|v| v as f32).collect(),
        DecodingResult::I8(buf) => buf.into_iter().map(f32::from).collect(),
        DecodingResult::I16(buf) => buf.into_iter().map(f32::from).collect(),
        DecodingResult::I32(buf) => buf.into_iter().map(|v| v as f32).collect(),
        _ => return Err(IoError::Unsupported("TIFF sample format".to_string())),
    };

    let pixels = rows * cols;
    if pixels == 0 || data.len() % pixels != 0 {
        return Err(IoError::Parse(format!(
            "{} samples do not fill a {}x{} image",
            data.len(),
            cols,
            rows
        )));
    }
    Ok((cols, rows, data))
}

fn read_nodata<R: std::io::Read + Seek>(decoder: &mut Decoder<R>) -> Option<f32> {
    let text = decoder
        .get_tag_ascii_string(Tag::from_u16_exhaustive(GDAL_NODATA))
        .ok()?;
    text.trim_matches(char::from(0)).trim().parse().ok()
}

/// Geotransform from ModelPixelScale + ModelTiepoint, else the 4x4
/// ModelTransformation matrix
fn read_geotransform<R: std::io::Read + Seek>(decoder: &mut Decoder<R>) -> Option<GeoTransform> {
    let scale = decoder
        .get_tag_f64_vec(Tag::from_u16_exhaustive(MODEL_PIXEL_SCALE))
        .ok();
    let tiepoint = decoder
        .get_tag_f64_vec(Tag::from_u16_exhaustive(MODEL_TIEPOINT))
        .ok();

    if let (Some(scale), Some(tiepoint)) = (scale, tiepoint) {
        if scale.len() >= 2 && tiepoint.len() >= 6 {
            // tiepoint: [I, J, K, X, Y, Z]
            let origin_x = tiepoint[3] - tiepoint[0] * scale[0];
            let origin_y = tiepoint[4] + tiepoint[1] * scale[1];
            return Some(GeoTransform::new(origin_x, origin_y, scale[0], -scale[1]));
        }
    }

    let m = decoder
        .get_tag_f64_vec(Tag::from_u16_exhaustive(MODEL_TRANSFORMATION))
        .ok()?;
    (m.len() >= 16).then(|| GeoTransform::from_gdal([m[3], m[0], m[1], m[7], m[4], m[5]]))
}

/// A masked two-component raster with its georeference, as read back from
/// [`write_masked_pair`]
pub fn read_masked_pair<P: AsRef<Path>>(path: P) -> Result<(Raster<Masked<[f32; 2]>>, Option<GeoTransform>)> {
    let mut decoder = Decoder::new(File::open(path.as_ref())?)?;
    let (cols, rows, data) = decode_bands(&mut decoder)?;
    if data.len() != 3 * rows * cols {
        return Err(IoError::Parse(format!(
            "expected 3 bands, found {}",
            data.len() / (rows * cols)
        )));
    }

    let pixels = data
        .chunks_exact(3)
        .map(|px| Masked {
            value: [px[0], px[1]],
            valid: px[2] != 0.0,
        })
        .collect();
    let raster = Raster::from_vec(pixels, rows, cols)?;
    Ok((raster, read_geotransform(&mut decoder)))
}

/// Write a masked two-component raster as a 3-band float GeoTIFF: both
/// components and a validity band. Invalid pixels carry [`PAIR_NODATA`].
pub fn write_masked_pair<P, V>(
    path: P,
    raster: &Raster<Masked<[V; 2]>>,
    georef: Option<&Georeference>,
    progress: &dyn ProgressSink,
) -> Result<()>
where
    P: AsRef<Path>,
    V: Copy + Default + Send + Sync + Into<f64> + 'static,
{
    let path = path.as_ref();
    let writer = BufWriter::new(File::create(path)?);
    encode_masked_pair(raster, georef, progress, writer)?;
    info!("wrote {}x{} pair raster to {}", raster.cols(), raster.rows(), path.display());
    Ok(())
}

fn encode_masked_pair<V, W>(
    raster: &Raster<Masked<[V; 2]>>,
    georef: Option<&Georeference>,
    progress: &dyn ProgressSink,
    writer: W,
) -> Result<()>
where
    V: Copy + Default + Send + Sync + Into<f64> + 'static,
    W: Write + Seek,
{
    let (rows, cols) = raster.shape();
    let data: Vec<f32> = raster
        .data()
        .iter()
        .flat_map(|px| match px.get() {
            Some([a, b]) => [Into::<f64>::into(*a) as f32, Into::<f64>::into(*b) as f32, 1.0],
            None => [PAIR_NODATA, PAIR_NODATA, 0.0],
        })
        .collect();

    let mut encoder = TiffEncoder::new(writer)?;
    let mut image = encoder.new_image::<RGB32Float>(cols as u32, rows as u32)?;
    image.rows_per_strip(ROWS_PER_STRIP)?;

    if let Some(georef) = georef {
        write_georef_tags(image.encoder(), georef)?;
    }
    image
        .encoder()
        .write_tag(Tag::from_u16_exhaustive(GDAL_NODATA), PAIR_NODATA.to_string().as_str())?;

    let total = data.len().max(1);
    let mut written = 0;
    loop {
        let count = image.next_strip_sample_count() as usize;
        if count == 0 || written >= data.len() {
            break;
        }
        let end = (written + count).min(data.len());
        image.write_strip(&data[written..end])?;
        written = end;
        progress.report(written as f64 / total as f64);
    }
    image.finish()?;
    progress.finished();
    Ok(())
}

fn write_georef_tags<W: Write + Seek, K: tiff::encoder::TiffKind>(
    encoder: &mut tiff::encoder::DirectoryEncoder<'_, W, K>,
    georef: &Georeference,
) -> Result<()> {
    let gt = georef.transform();
    if gt.is_north_up() {
        let scale = [gt.pixel_width, -gt.pixel_height, 0.0];
        encoder.write_tag(Tag::from_u16_exhaustive(MODEL_PIXEL_SCALE), &scale[..])?;
        let tiepoint = [0.0, 0.0, 0.0, gt.origin_x, gt.origin_y, 0.0];
        encoder.write_tag(Tag::from_u16_exhaustive(MODEL_TIEPOINT), &tiepoint[..])?;
    } else {
        let matrix = [
            gt.pixel_width, gt.row_rotation, 0.0, gt.origin_x, //
            gt.col_rotation, gt.pixel_height, 0.0, gt.origin_y, //
            0.0, 0.0, 0.0, 0.0, //
            0.0, 0.0, 0.0, 1.0,
        ];
        encoder.write_tag(Tag::from_u16_exhaustive(MODEL_TRANSFORMATION), &matrix[..])?;
    }

    encoder.write_tag(Tag::from_u16_exhaustive(GEO_KEY_DIRECTORY), &geokeys(georef)[..])?;
    Ok(())
}

/// GeoKey directory: model type, pixel-is-area and, for UTM, the EPSG code
fn geokeys(georef: &Georeference) -> Vec<u16> {
    let epsg = georef
        .projection()
        .epsg()
        .and_then(|code| u16::try_from(code).ok());
    let model_type = match (georef.datum(), epsg) {
        (Datum::Ellipsoid { .. }, None) => MODEL_TYPE_GEOGRAPHIC,
        _ => MODEL_TYPE_PROJECTED,
    };

    let mut keys = vec![
        GT_MODEL_TYPE_KEY, 0, 1, model_type, //
        GT_RASTER_TYPE_KEY, 0, 1, RASTER_PIXEL_IS_AREA,
    ];
    if let Some(code) = epsg {
        keys.extend([PROJECTED_CS_TYPE_KEY, 0, 1, code]);
    }
    let mut dir = vec![1, 1, 0, (keys.len() / 4) as u16];
    dir.extend(keys);
    dir
}

/// Write a single-band float GeoTIFF
pub fn write_raster<P: AsRef<Path>>(path: P, raster: &Raster<f32>) -> Result<()> {
    let writer = BufWriter::new(File::create(path.as_ref())?);
    let mut encoder = TiffEncoder::new(writer)?;
    let (rows, cols) = raster.shape();
    let mut image =
        encoder.new_image::<tiff::encoder::colortype::Gray32Float>(cols as u32, rows as u32)?;
    if let Some(georef) = raster.georef() {
        write_georef_tags(image.encoder(), georef)?;
    }
    if let Some(nodata) = raster.nodata() {
        image
            .encoder()
            .write_tag(Tag::from_u16_exhaustive(GDAL_NODATA), nodata.to_string().as_str())?;
    }
    let data: Vec<f32> = raster.data().iter().copied().collect();
    image.write_data(&data)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector2;
    use ndarray::Array2;
    use std::sync::Mutex;
    use tempfile::NamedTempFile;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<f64>>);

    impl ProgressSink for Recorder {
        fn report(&self, fraction: f64) {
            self.0.lock().unwrap().push(fraction);
        }
    }

    fn dem() -> Raster<f32> {
        let georef = Georeference::new(GeoTransform::new(500.0, 1000.0, 2.0, -2.0), Datum::Planar);
        let data = Array2::from_shape_fn((30, 40), |(r, c)| (r * 40 + c) as f32);
        let mut raster = Raster::from_array(data)
            .with_nodata(Some(-9999.0))
            .with_georef(Some(georef));
        raster.set(3, 4, -9999.0).unwrap();
        raster
    }

    #[test]
    fn test_raster_roundtrip_keeps_georef_and_nodata() {
        let tmp = NamedTempFile::with_suffix(".tif").unwrap();
        let original = dem();
        write_raster(tmp.path(), &original).unwrap();

        let loaded = read_raster_native(tmp.path(), Datum::Planar).unwrap();
        assert_eq!(loaded.shape(), (30, 40));
        assert_eq!(loaded.get(10, 7), Some(407.0));
        assert_eq!(loaded.nodata(), Some(-9999.0));
        assert_eq!(loaded.georef(), original.georef());
        assert!(!loaded.to_masked().get(3, 4).unwrap().valid);
    }

    fn utm_dem() -> Raster<f32> {
        let georef = Georeference::new(GeoTransform::new(500_000.0, 4_000_000.0, 30.0, -30.0), Datum::wgs84())
            .with_projection(Projection::utm(33, true).unwrap())
            .unwrap();
        Raster::filled(20, 30, 250.0f32).with_georef(Some(georef))
    }

    #[test]
    fn test_utm_raster_roundtrip() {
        let tmp = NamedTempFile::with_suffix(".tif").unwrap();
        let original = utm_dem();
        write_raster(tmp.path(), &original).unwrap();

        let loaded = read_raster_native(tmp.path(), Datum::wgs84()).unwrap();
        let georef = loaded.georef().unwrap();
        assert_eq!(loaded.georef(), original.georef());
        assert_eq!(georef.projection(), &Projection::Utm { zone: 33, north: true });

        let ll = georef.pixel_to_lonlat(&Vector2::new(0.0, 0.0));
        assert!((ll.x - 15.0).abs() < 1e-3 && ll.y > 36.0 && ll.y < 36.2, "lon/lat {ll:?}");
    }

    #[test]
    fn test_projected_raster_without_utm_code_is_rejected() {
        // A planar raster is written as projected without a CRS code
        let tmp = NamedTempFile::with_suffix(".tif").unwrap();
        let georef = Georeference::new(GeoTransform::new(500_000.0, 4_000_000.0, 30.0, -30.0), Datum::Planar);
        write_raster(tmp.path(), &Raster::filled(4, 4, 1.0f32).with_georef(Some(georef))).unwrap();

        let err = read_raster_native(tmp.path(), Datum::wgs84()).unwrap_err();
        assert!(matches!(err, IoError::Unsupported(_)), "{err}");
        assert!(read_raster_native(tmp.path(), Datum::Planar).is_ok());
    }

    #[test]
    fn test_crs_keys_decide_georeference() {
        let metres = GeoTransform::new(500_000.0, 4_000_000.0, 30.0, -30.0);
        let degrees = GeoTransform::new(10.0, 45.0, 0.001, -0.001);

        let keys = CrsKeys { model_type: None, projected_cs: None };
        assert!(matches!(
            georeference_for(metres, Datum::wgs84(), keys, (10, 10)),
            Err(IoError::Unsupported(_))
        ));
        assert!(georeference_for(degrees, Datum::wgs84(), keys, (10, 10)).is_ok());

        let mercator = CrsKeys { model_type: Some(MODEL_TYPE_PROJECTED), projected_cs: Some(3857) };
        assert!(matches!(
            georeference_for(metres, Datum::wgs84(), mercator, (10, 10)),
            Err(IoError::Unsupported(_))
        ));

        let south = CrsKeys { model_type: Some(MODEL_TYPE_PROJECTED), projected_cs: Some(32721) };
        let georef = georeference_for(metres, Datum::wgs84(), south, (10, 10)).unwrap();
        assert_eq!(georef.projection(), &Projection::Utm { zone: 21, north: false });
    }

    #[test]
    fn test_plain_tiff_has_no_georef() {
        let tmp = NamedTempFile::with_suffix(".tif").unwrap();
        write_raster(tmp.path(), &Raster::filled(4, 5, 1.5f32)).unwrap();

        let loaded = read_raster_native(tmp.path(), Datum::wgs84()).unwrap();
        assert!(loaded.georef().is_none());
        assert!(loaded.nodata().is_none());
        assert_eq!(image_size(tmp.path()).unwrap(), (5, 4));
    }

    #[test]
    fn test_masked_pair_roundtrip() {
        let data = Array2::from_shape_fn((70, 9), |(r, c)| {
            if (r + c) % 3 == 0 {
                Masked::invalid()
            } else {
                Masked::valid([c as i32 - 4, r as i32])
            }
        });
        let spread = Raster::from_array(data);
        let georef = Georeference::new(GeoTransform::new(-50.0, 50.0, 1.0, -1.0), Datum::Planar);

        let tmp = NamedTempFile::with_suffix(".tif").unwrap();
        let progress = Recorder::default();
        write_masked_pair(tmp.path(), &spread, Some(&georef), &progress).unwrap();

        let (loaded, transform) = read_masked_pair(tmp.path()).unwrap();
        assert_eq!(transform, Some(*georef.transform()));
        assert_eq!(loaded.shape(), (70, 9));
        assert_eq!(loaded.get(1, 0), Some(Masked::valid([-4.0, 1.0])));
        assert!(!loaded.get(0, 0).unwrap().valid);
        assert_eq!(loaded.get(0, 0).unwrap().value, [PAIR_NODATA, PAIR_NODATA]);

        let reports = progress.0.lock().unwrap();
        assert!(reports.len() >= 2);
        assert_eq!(reports.last(), Some(&1.0));
    }

    #[test]
    fn test_single_band_is_not_a_pair() {
        let tmp = NamedTempFile::with_suffix(".tif").unwrap();
        write_raster(tmp.path(), &Raster::filled(2, 2, 0.0f32)).unwrap();
        assert!(matches!(read_masked_pair(tmp.path()), Err(IoError::Parse(_))));
    }

    #[test]
    fn test_missing_file() {
        let err = read_raster_native(Path::new("/nonexistent/dem.tif"), Datum::Planar).unwrap_err();
        assert!(matches!(err, IoError::Io(_)));
    }
}
