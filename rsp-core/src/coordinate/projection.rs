//! Map projections between longitude/latitude and projected raster
//! coordinates.
//!
//! Transverse Mercator series follow Snyder, *Map Projections: A Working
//! Manual* (USGS PP 1395), pp. 61-64, on the ellipsoid of the datum.

use nalgebra::Vector2;
use serde::{Deserialize, Serialize};

use super::Datum;
use crate::error::{CoordinateError, Result};

const UTM_K0: f64 = 0.9996;
const UTM_FALSE_EASTING: f64 = 500_000.0;
const UTM_FALSE_NORTHING_SOUTH: f64 = 10_000_000.0;

/// How the projected coordinates of a georeference relate to longitude and
/// latitude
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Projection {
    /// Projected coordinates are longitude/latitude in degrees (or `x, y`
    /// on a planar datum)
    #[default]
    Geographic,
    /// Universal Transverse Mercator, easting/northing in metres
    Utm { zone: u32, north: bool },
}

impl Projection {
    pub fn utm(zone: u32, north: bool) -> Result<Self> {
        if !(1..=60).contains(&zone) {
            return Err(CoordinateError::TransformFailed(format!("UTM zone {zone} is not in 1..=60")).into());
        }
        Ok(Projection::Utm { zone, north })
    }

    /// UTM projection of an EPSG code in the 326xx (north) or 327xx (south)
    /// ranges
    pub fn utm_from_epsg(code: u32) -> Option<Self> {
        match code {
            32601..=32660 => Some(Projection::Utm { zone: code - 32600, north: true }),
            32701..=32760 => Some(Projection::Utm { zone: code - 32700, north: false }),
            _ => None,
        }
    }

    /// EPSG code of a UTM projection
    pub fn epsg(&self) -> Option<u32> {
        match *self {
            Projection::Geographic => None,
            Projection::Utm { zone, north: true } => Some(32600 + zone),
            Projection::Utm { zone, north: false } => Some(32700 + zone),
        }
    }

    /// Longitude/latitude in degrees to projected coordinates
    pub fn forward(&self, datum: &Datum, lonlat: &Vector2<f64>) -> Vector2<f64> {
        match (*self, datum.axes()) {
            (Projection::Utm { zone, north }, Some((a, b))) => {
                let (e, n) = utm_forward(a, eccentricity_squared(a, b), zone, north, lonlat.x, lonlat.y);
                Vector2::new(e, n)
            }
            _ => *lonlat,
        }
    }

    /// Projected coordinates to longitude/latitude in degrees
    pub fn inverse(&self, datum: &Datum, xy: &Vector2<f64>) -> Vector2<f64> {
        match (*self, datum.axes()) {
            (Projection::Utm { zone, north }, Some((a, b))) => {
                let (lon, lat) = utm_inverse(a, eccentricity_squared(a, b), zone, north, xy.x, xy.y);
                Vector2::new(lon, lat)
            }
            _ => *xy,
        }
    }
}

fn eccentricity_squared(a: f64, b: f64) -> f64 {
    1.0 - (b * b) / (a * a)
}

fn central_meridian(zone: u32) -> f64 {
    (f64::from(zone) * 6.0 - 183.0).to_radians()
}

/// Meridional arc from the equator to `lat` (radians)
fn meridional_arc(a: f64, e2: f64, lat: f64) -> f64 {
    let e4 = e2 * e2;
    let e6 = e4 * e2;
    a * ((1.0 - e2 / 4.0 - 3.0 * e4 / 64.0 - 5.0 * e6 / 256.0) * lat
        - (3.0 * e2 / 8.0 + 3.0 * e4 / 32.0 + 45.0 * e6 / 1024.0) * (2.0 * lat).sin()
        + (15.0 * e4 / 256.0 + 45.0 * e6 / 1024.0) * (4.0 * lat).sin()
        - (35.0 * e6 / 3072.0) * (6.0 * lat).sin())
}

fn utm_forward(a: f64, e2: f64, zone: u32, north: bool, lon_deg: f64, lat_deg: f64) -> (f64, f64) {
    let lat = lat_deg.to_radians();
    let lon = lon_deg.to_radians();
    let ep2 = e2 / (1.0 - e2);

    let (sin_lat, cos_lat) = lat.sin_cos();
    let tan_lat = lat.tan();

    let n = a / (1.0 - e2 * sin_lat * sin_lat).sqrt();
    let t = tan_lat * tan_lat;
    let c = ep2 * cos_lat * cos_lat;
    let big_a = cos_lat * (lon - central_meridian(zone));
    let m = meridional_arc(a, e2, lat);

    let a2 = big_a * big_a;
    let a4 = a2 * a2;
    let a6 = a4 * a2;

    let easting = UTM_K0
        * n
        * (big_a
            + (1.0 - t + c) * a2 * big_a / 6.0
            + (5.0 - 18.0 * t + t * t + 72.0 * c - 58.0 * ep2) * a4 * big_a / 120.0)
        + UTM_FALSE_EASTING;
    let northing = UTM_K0
        * (m + n
            * tan_lat
            * (a2 / 2.0
                + (5.0 - t + 9.0 * c + 4.0 * c * c) * a4 / 24.0
                + (61.0 - 58.0 * t + t * t + 600.0 * c - 330.0 * ep2) * a6 / 720.0));

    if north {
        (easting, northing)
    } else {
        (easting, northing + UTM_FALSE_NORTHING_SOUTH)
    }
}

fn utm_inverse(a: f64, e2: f64, zone: u32, north: bool, easting: f64, northing: f64) -> (f64, f64) {
    let ep2 = e2 / (1.0 - e2);
    let x = easting - UTM_FALSE_EASTING;
    let y = if north { northing } else { northing - UTM_FALSE_NORTHING_SOUTH };

    let e4 = e2 * e2;
    let e6 = e4 * e2;
    let mu = y / UTM_K0 / (a * (1.0 - e2 / 4.0 - 3.0 * e4 / 64.0 - 5.0 * e6 / 256.0));
    let e1 = (1.0 - (1.0 - e2).sqrt()) / (1.0 + (1.0 - e2).sqrt());
    let e1_2 = e1 * e1;
    let e1_3 = e1_2 * e1;
    let e1_4 = e1_3 * e1;

    // Footpoint latitude
    let phi1 = mu
        + (3.0 * e1 / 2.0 - 27.0 * e1_3 / 32.0) * (2.0 * mu).sin()
        + (21.0 * e1_2 / 16.0 - 55.0 * e1_4 / 32.0) * (4.0 * mu).sin()
        + (151.0 * e1_3 / 96.0) * (6.0 * mu).sin()
        + (1097.0 * e1_4 / 512.0) * (8.0 * mu).sin();

    let (sin1, cos1) = phi1.sin_cos();
    let tan1 = phi1.tan();
    let c1 = ep2 * cos1 * cos1;
    let t1 = tan1 * tan1;
    let w = 1.0 - e2 * sin1 * sin1;
    let n1 = a / w.sqrt();
    let r1 = a * (1.0 - e2) / (w * w.sqrt());
    let d = x / (n1 * UTM_K0);

    let d2 = d * d;
    let d4 = d2 * d2;
    let d6 = d4 * d2;

    let lat = phi1
        - (n1 * tan1 / r1)
            * (d2 / 2.0
                - (5.0 + 3.0 * t1 + 10.0 * c1 - 4.0 * c1 * c1 - 9.0 * ep2) * d4 / 24.0
                + (61.0 + 90.0 * t1 + 298.0 * c1 + 45.0 * t1 * t1 - 252.0 * ep2 - 3.0 * c1 * c1) * d6
                    / 720.0);
    let lon = central_meridian(zone)
        + (d - (1.0 + 2.0 * t1 + c1) * d2 * d / 6.0
            + (5.0 - 2.0 * c1 + 28.0 * t1 - 3.0 * c1 * c1 + 8.0 * ep2 + 24.0 * t1 * t1) * d4 * d / 120.0)
            / cos1;

    (lon.to_degrees(), lat.to_degrees())
}
