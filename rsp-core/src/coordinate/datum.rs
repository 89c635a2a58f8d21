use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use super::transforms::{cartesian_to_geodetic, geodetic_to_cartesian, WGS84_A, WGS84_B};

/// Reference surface against which heights are measured.
///
/// Geodetic coordinates are `(lon, lat, height)` with angles in degrees.
/// The `Planar` datum is a local cartesian frame where the geodetic triple is
/// the cartesian point itself, so heights are plain `z` values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Datum {
    Ellipsoid {
        name: String,
        semi_major: f64,
        semi_minor: f64,
    },
    Planar,
}

impl Datum {
    pub fn wgs84() -> Self {
        Datum::Ellipsoid {
            name: "WGS_1984".to_string(),
            semi_major: WGS84_A,
            semi_minor: WGS84_B,
        }
    }

    pub fn sphere(name: &str, radius: f64) -> Self {
        Datum::Ellipsoid {
            name: name.to_string(),
            semi_major: radius,
            semi_minor: radius,
        }
    }

    pub fn moon() -> Self {
        Self::sphere("D_MOON", 1_737_400.0)
    }

    pub fn mars() -> Self {
        Self::sphere("D_MARS", 3_396_190.0)
    }

    /// Look up a datum by its common short name
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "wgs84" | "wgs_1984" | "earth" => Some(Self::wgs84()),
            "moon" | "d_moon" => Some(Self::moon()),
            "mars" | "d_mars" => Some(Self::mars()),
            "planar" | "local" => Some(Datum::Planar),
            _ => None,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Datum::Ellipsoid { name, .. } => name,
            Datum::Planar => "planar",
        }
    }

    /// Semi-major and semi-minor axes; `None` for the planar frame
    pub fn axes(&self) -> Option<(f64, f64)> {
        match self {
            Datum::Ellipsoid { semi_major, semi_minor, .. } => Some((*semi_major, *semi_minor)),
            Datum::Planar => None,
        }
    }

    fn first_eccentricity_squared(a: f64, b: f64) -> f64 {
        1.0 - (b * b) / (a * a)
    }

    /// `(lon, lat, height)` to cartesian
    pub fn geodetic_to_cartesian(&self, llh: &Vector3<f64>) -> Vector3<f64> {
        match self {
            Datum::Ellipsoid { semi_major, semi_minor, .. } => {
                let e2 = Self::first_eccentricity_squared(*semi_major, *semi_minor);
                geodetic_to_cartesian(*semi_major, e2, llh.y, llh.x, llh.z)
            }
            Datum::Planar => *llh,
        }
    }

    /// Cartesian to `(lon, lat, height)`
    pub fn cartesian_to_geodetic(&self, xyz: &Vector3<f64>) -> Vector3<f64> {
        match self {
            Datum::Ellipsoid { semi_major, semi_minor, .. } => {
                let e2 = Self::first_eccentricity_squared(*semi_major, *semi_minor);
                let (lat, lon, alt) = cartesian_to_geodetic(*semi_major, e2, xyz);
                Vector3::new(lon, lat, alt)
            }
            Datum::Planar => *xyz,
        }
    }

    /// Height of a cartesian point above this datum
    pub fn height_of(&self, xyz: &Vector3<f64>) -> f64 {
        match self {
            Datum::Planar => xyz.z,
            _ => self.cartesian_to_geodetic(xyz).z,
        }
    }

    /// First intersection in front of `origin` of the ray with the datum
    /// surface raised by `height`.
    ///
    /// For ellipsoids the raised surface is approximated by adding `height`
    /// to both semi-axes.
    pub fn intersect_ray(
        &self,
        origin: &Vector3<f64>,
        dir: &Vector3<f64>,
        height: f64,
    ) -> Option<Vector3<f64>> {
        match self {
            Datum::Planar => {
                if dir.z.abs() < 1e-12 {
                    return None;
                }
                let t = (height - origin.z) / dir.z;
                if t < 0.0 {
                    return None;
                }
                Some(origin + t * dir)
            }
            Datum::Ellipsoid { semi_major, semi_minor, .. } => {
                let a = semi_major + height;
                let b = semi_minor + height;
                if a <= 0.0 || b <= 0.0 {
                    return None;
                }
                let o = Vector3::new(origin.x / a, origin.y / a, origin.z / b);
                let d = Vector3::new(dir.x / a, dir.y / a, dir.z / b);

                let qa = d.dot(&d);
                let qb = 2.0 * o.dot(&d);
                let qc = o.dot(&o) - 1.0;
                let disc = qb * qb - 4.0 * qa * qc;
                if disc < 0.0 || qa == 0.0 {
                    return None;
                }
                let sqrt_disc = disc.sqrt();
                let t_near = (-qb - sqrt_disc) / (2.0 * qa);
                let t_far = (-qb + sqrt_disc) / (2.0 * qa);
                let t = if t_near >= 0.0 { t_near } else { t_far };
                if t < 0.0 {
                    return None;
                }
                Some(origin + t * dir)
            }
        }
    }
}

impl Default for Datum {
    fn default() -> Self {
        Self::wgs84()
    }
}
