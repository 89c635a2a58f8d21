use nalgebra::{Vector2, Vector3};
use serde::{Deserialize, Serialize};

use super::{Datum, Projection};
use crate::error::{CoordinateError, Result};
use crate::raster::BBox2i;

/// Affine transformation coefficients for georeferencing rasters.
///
/// Maps continuous pixel-corner coordinates `(col, row)` to projected
/// coordinates `(x, y)`:
/// ```text
/// x = origin_x + col * pixel_width + row * row_rotation
/// y = origin_y + col * col_rotation + row * pixel_height
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub origin_x: f64,
    pub origin_y: f64,
    pub pixel_width: f64,
    /// Usually negative for north-up rasters
    pub pixel_height: f64,
    pub row_rotation: f64,
    pub col_rotation: f64,
}

impl GeoTransform {
    /// North-up transform without rotation
    pub fn new(origin_x: f64, origin_y: f64, pixel_width: f64, pixel_height: f64) -> Self {
        Self {
            origin_x,
            origin_y,
            pixel_width,
            pixel_height,
            row_rotation: 0.0,
            col_rotation: 0.0,
        }
    }

    /// From a GDAL-style array `[origin_x, pixel_width, row_rotation, origin_y, col_rotation, pixel_height]`
    pub fn from_gdal(coeffs: [f64; 6]) -> Self {
        Self {
            origin_x: coeffs[0],
            pixel_width: coeffs[1],
            row_rotation: coeffs[2],
            origin_y: coeffs[3],
            col_rotation: coeffs[4],
            pixel_height: coeffs[5],
        }
    }

    pub fn to_gdal(&self) -> [f64; 6] {
        [
            self.origin_x,
            self.pixel_width,
            self.row_rotation,
            self.origin_y,
            self.col_rotation,
            self.pixel_height,
        ]
    }

    /// Continuous pixel-corner coordinates to projected coordinates
    pub fn apply(&self, col: f64, row: f64) -> (f64, f64) {
        let x = self.origin_x + col * self.pixel_width + row * self.row_rotation;
        let y = self.origin_y + col * self.col_rotation + row * self.pixel_height;
        (x, y)
    }

    /// Projected coordinates to continuous pixel-corner coordinates.
    /// Returns `None` for a degenerate transform.
    pub fn invert(&self, x: f64, y: f64) -> Option<(f64, f64)> {
        let det = self.pixel_width * self.pixel_height - self.row_rotation * self.col_rotation;
        if det.abs() < 1e-300 {
            return None;
        }

        let dx = x - self.origin_x;
        let dy = y - self.origin_y;

        let col = (self.pixel_height * dx - self.row_rotation * dy) / det;
        let row = (-self.col_rotation * dx + self.pixel_width * dy) / det;

        Some((col, row))
    }

    pub fn is_north_up(&self) -> bool {
        self.row_rotation.abs() < 1e-10
            && self.col_rotation.abs() < 1e-10
            && self.pixel_height < 0.0
    }
}

impl Default for GeoTransform {
    fn default() -> Self {
        Self::new(0.0, 0.0, 1.0, -1.0)
    }
}

/// Relation between raster pixels and the ground.
///
/// Pixels map to projected coordinates through the affine transform, and
/// projected coordinates to longitude/latitude in degrees through the
/// [`Projection`]. On the planar datum both are the local `(x, y)`. Integer
/// pixel `(col, row)` is the centre of that sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Georeference {
    transform: GeoTransform,
    datum: Datum,
    #[serde(default)]
    projection: Projection,
}

impl Georeference {
    /// Geographic georeference: projected coordinates are lon/lat
    pub fn new(transform: GeoTransform, datum: Datum) -> Self {
        Self {
            transform,
            datum,
            projection: Projection::Geographic,
        }
    }

    /// Use `projection` between projected coordinates and lon/lat
    pub fn with_projection(mut self, projection: Projection) -> Result<Self> {
        if projection != Projection::Geographic && self.datum == Datum::Planar {
            return Err(CoordinateError::TransformFailed(format!(
                "{projection:?} needs an ellipsoidal datum"
            ))
            .into());
        }
        self.projection = projection;
        Ok(self)
    }

    pub fn transform(&self) -> &GeoTransform {
        &self.transform
    }

    pub fn datum(&self) -> &Datum {
        &self.datum
    }

    pub fn projection(&self) -> &Projection {
        &self.projection
    }

    pub fn pixel_to_projected(&self, pix: &Vector2<f64>) -> Vector2<f64> {
        let (x, y) = self.transform.apply(pix.x + 0.5, pix.y + 0.5);
        Vector2::new(x, y)
    }

    pub fn projected_to_pixel(&self, xy: &Vector2<f64>) -> Option<Vector2<f64>> {
        self.transform
            .invert(xy.x, xy.y)
            .map(|(col, row)| Vector2::new(col - 0.5, row - 0.5))
    }

    pub fn pixel_to_lonlat(&self, pix: &Vector2<f64>) -> Vector2<f64> {
        self.projection
            .inverse(&self.datum, &self.pixel_to_projected(pix))
    }

    pub fn lonlat_to_pixel(&self, lonlat: &Vector2<f64>) -> Option<Vector2<f64>> {
        let xy = self.projection.forward(&self.datum, lonlat);
        if !(xy.x.is_finite() && xy.y.is_finite()) {
            return None;
        }
        self.projected_to_pixel(&xy)
    }

    /// Cartesian point to fractional pixel of this raster
    pub fn cartesian_to_pixel(&self, xyz: &Vector3<f64>) -> Option<Vector2<f64>> {
        let llh = self.datum.cartesian_to_geodetic(xyz);
        self.lonlat_to_pixel(&Vector2::new(llh.x, llh.y))
    }

    /// Cartesian point of a pixel at the given height above the datum
    pub fn pixel_to_cartesian(&self, pix: &Vector2<f64>, height: f64) -> Vector3<f64> {
        let ll = self.pixel_to_lonlat(pix);
        self.datum
            .geodetic_to_cartesian(&Vector3::new(ll.x, ll.y, height))
    }

    /// Georeference of the sub-raster whose pixel `(0, 0)` is `bbox.min` of this one
    pub fn crop(&self, bbox: &BBox2i) -> Georeference {
        let (origin_x, origin_y) = self
            .transform
            .apply(f64::from(bbox.min_x), f64::from(bbox.min_y));
        Georeference {
            transform: GeoTransform {
                origin_x,
                origin_y,
                ..self.transform
            },
            datum: self.datum.clone(),
            projection: self.projection,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_pixel_lonlat_roundtrip() {
        let georef = Georeference::new(GeoTransform::new(100.0, 200.0, 10.0, -10.0), Datum::wgs84());

        let ll = georef.pixel_to_lonlat(&Vector2::new(5.0, 10.0));
        assert_relative_eq!(ll.x, 155.0, epsilon = 1e-10);
        assert_relative_eq!(ll.y, 95.0, epsilon = 1e-10);

        let pix = georef.lonlat_to_pixel(&ll).unwrap();
        assert_relative_eq!(pix, Vector2::new(5.0, 10.0), epsilon = 1e-10);
    }

    #[test]
    fn test_crop_shifts_origin() {
        let georef = Georeference::new(GeoTransform::new(-50.0, 50.0, 1.0, -1.0), Datum::Planar);
        let crop = georef.crop(&BBox2i::new(10, 20, 30, 40));

        let full = georef.pixel_to_lonlat(&Vector2::new(12.0, 25.0));
        let local = crop.pixel_to_lonlat(&Vector2::new(2.0, 5.0));
        assert_relative_eq!(full, local, epsilon = 1e-12);
    }

    #[test]
    fn test_cartesian_to_pixel_planar() {
        let georef = Georeference::new(GeoTransform::new(-50.0, 50.0, 1.0, -1.0), Datum::Planar);
        let pix = georef
            .cartesian_to_pixel(&Vector3::new(0.0, 0.0, 7.0))
            .unwrap();
        assert_relative_eq!(pix, Vector2::new(49.5, 49.5), epsilon = 1e-12);
    }

    fn utm_33n() -> Georeference {
        Georeference::new(GeoTransform::new(500_000.0, 4_000_020.0, 30.0, -30.0), Datum::wgs84())
            .with_projection(Projection::utm(33, true).unwrap())
            .unwrap()
    }

    #[test]
    fn test_utm_pixels_map_to_lonlat() {
        let georef = utm_33n();

        // Pixel (0, 0) centres at easting 500015, on the zone's central meridian
        let ll = georef.pixel_to_lonlat(&Vector2::new(0.0, 0.0));
        assert!((ll.x - 15.0).abs() < 1e-3, "lon {}", ll.x);
        assert!(ll.y > 36.0 && ll.y < 36.2, "lat {}", ll.y);

        let pix = georef.lonlat_to_pixel(&ll).unwrap();
        assert_relative_eq!(pix, Vector2::new(0.0, 0.0), epsilon = 1e-4);
    }

    #[test]
    fn test_utm_cartesian_roundtrip() {
        let georef = utm_33n();
        let pix = Vector2::new(120.25, 37.5);
        let xyz = georef.pixel_to_cartesian(&pix, 812.0);
        assert_relative_eq!(georef.datum().height_of(&xyz), 812.0, epsilon = 1e-3);
        assert_relative_eq!(georef.cartesian_to_pixel(&xyz).unwrap(), pix, epsilon = 1e-4);
    }

    #[test]
    fn test_crop_keeps_projection() {
        let georef = utm_33n();
        let crop = georef.crop(&BBox2i::new(10, 20, 30, 40));
        assert_eq!(crop.projection(), georef.projection());
        assert_relative_eq!(
            crop.pixel_to_lonlat(&Vector2::new(2.0, 5.0)),
            georef.pixel_to_lonlat(&Vector2::new(12.0, 25.0)),
            epsilon = 1e-9
        );
    }

    #[test]
    fn test_planar_datum_rejects_utm() {
        let georef = Georeference::new(GeoTransform::default(), Datum::Planar);
        assert!(georef.with_projection(Projection::utm(33, true).unwrap()).is_err());
    }

    #[test]
    fn test_degenerate_transform() {
        let gt = GeoTransform::new(0.0, 0.0, 0.0, 0.0);
        assert!(gt.invert(1.0, 1.0).is_none());
    }

    #[test]
    fn test_gdal_roundtrip() {
        let coeffs = [10.0, 0.5, 0.0, 20.0, 0.0, -0.5];
        assert_eq!(GeoTransform::from_gdal(coeffs).to_gdal(), coeffs);
    }
}
