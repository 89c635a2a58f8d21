use nalgebra::Vector3;
use crate::error::{CoordinateError, Result};

/// ECEF coordinates (Earth-Centered, Earth-Fixed)
pub type EcefCoord = Vector3<f64>;

/// LLA coordinates (Latitude, Longitude, Altitude)
#[derive(Debug, Clone, Copy)]
pub struct LlaCoord {
    pub lat: f64,  // degrees
    pub lon: f64,  // degrees
    pub alt: f64,  // meters above WGS84 ellipsoid
}

// WGS84 ellipsoid parameters
pub(crate) const WGS84_A: f64 = 6378137.0;              // semi-major axis (meters)
pub(crate) const WGS84_B: f64 = 6356752.314245;         // semi-minor axis (meters)
const WGS84_E2: f64 = 0.00669437999014;                 // first eccentricity squared

/// Convert ECEF to LLA on the WGS84 ellipsoid
pub fn ecef_to_lla(ecef: &EcefCoord) -> Result<LlaCoord> {
    let (lat, lon, alt) = cartesian_to_geodetic(WGS84_A, WGS84_E2, ecef);

    if !(-90.0..=90.0).contains(&lat) || !lat.is_finite() {
        return Err(CoordinateError::InvalidLatitude(lat).into());
    }

    Ok(LlaCoord { lat, lon, alt })
}

/// Convert LLA on the WGS84 ellipsoid to ECEF
pub fn lla_to_ecef(lla: &LlaCoord) -> Result<EcefCoord> {
    if lla.lat < -90.0 || lla.lat > 90.0 {
        return Err(CoordinateError::InvalidLatitude(lla.lat).into());
    }

    Ok(geodetic_to_cartesian(WGS84_A, WGS84_E2, lla.lat, lla.lon, lla.alt))
}

/// Geodetic (degrees, meters) to cartesian on an ellipsoid with semi-major
/// axis `a` and first eccentricity squared `e2`
pub(crate) fn geodetic_to_cartesian(a: f64, e2: f64, lat: f64, lon: f64, alt: f64) -> Vector3<f64> {
    let lat_rad = lat.to_radians();
    let lon_rad = lon.to_radians();

    let sin_lat = lat_rad.sin();
    let cos_lat = lat_rad.cos();
    let sin_lon = lon_rad.sin();
    let cos_lon = lon_rad.cos();

    let n = a / (1.0 - e2 * sin_lat * sin_lat).sqrt();

    let x = (n + alt) * cos_lat * cos_lon;
    let y = (n + alt) * cos_lat * sin_lon;
    let z = (n * (1.0 - e2) + alt) * sin_lat;

    Vector3::new(x, y, z)
}

/// Cartesian to geodetic `(lat, lon, alt)` in degrees and meters
pub(crate) fn cartesian_to_geodetic(a: f64, e2: f64, xyz: &Vector3<f64>) -> (f64, f64, f64) {
    let (x, y, z) = (xyz.x, xyz.y, xyz.z);
    let p = (x * x + y * y).sqrt();
    let lon = y.atan2(x).to_degrees();

    // Iterative solution for latitude and altitude
    let mut lat = z.atan2(p * (1.0 - e2));
    let mut alt = 0.0;

    for _ in 0..10 {
        let sin_lat = lat.sin();
        let cos_lat = lat.cos();
        let n = a / (1.0 - e2 * sin_lat * sin_lat).sqrt();
        alt = if cos_lat.abs() > 1e-6 {
            p / cos_lat - n
        } else {
            z.abs() / sin_lat.abs() - n * (1.0 - e2)
        };
        lat = z.atan2(p * (1.0 - e2 * n / (n + alt)));
    }

    (lat.to_degrees(), lon, alt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RspError;

    #[test]
    fn test_lla_ecef_roundtrip() {
        let lla = LlaCoord {
            lat: 38.8977,
            lon: -77.0365,
            alt: 100.0,
        };

        let ecef = lla_to_ecef(&lla).unwrap();
        let lla2 = ecef_to_lla(&ecef).unwrap();

        assert!((lla.lat - lla2.lat).abs() < 1e-6);
        assert!((lla.lon - lla2.lon).abs() < 1e-6);
        assert!((lla.alt - lla2.alt).abs() < 1e-3);
    }

    #[test]
    fn test_equator_prime_meridian() {
        let lla = LlaCoord { lat: 0.0, lon: 0.0, alt: 0.0 };
        let ecef = lla_to_ecef(&lla).unwrap();

        assert!((ecef.x - WGS84_A).abs() < 1.0);
        assert!(ecef.y.abs() < 1.0);
        assert!(ecef.z.abs() < 1.0);
    }

    #[test]
    fn test_north_pole() {
        let lla = LlaCoord { lat: 90.0, lon: 0.0, alt: 1000.0 };

        let ecef = lla_to_ecef(&lla).unwrap();
        let lla2 = ecef_to_lla(&ecef).unwrap();

        assert!(ecef.x.abs() < 1.0);
        assert!(ecef.z > 6_000_000.0);
        assert!((lla.lat - lla2.lat).abs() < 1e-6);
        assert!((lla.alt - lla2.alt).abs() < 1e-3);
    }

    #[test]
    fn test_pole_along_axis() {
        // Exactly on the rotation axis
        let ecef = Vector3::new(0.0, 0.0, WGS84_B + 500.0);
        let lla = ecef_to_lla(&ecef).unwrap();
        assert!((lla.lat - 90.0).abs() < 1e-9);
        assert!((lla.alt - 500.0).abs() < 1e-3);
    }

    #[test]
    fn test_high_altitude() {
        let lla = LlaCoord { lat: 45.0, lon: 90.0, alt: 500000.0 };

        let ecef = lla_to_ecef(&lla).unwrap();
        let lla2 = ecef_to_lla(&ecef).unwrap();

        assert!((lla.lat - lla2.lat).abs() < 1e-6);
        assert!((lla.lon - lla2.lon).abs() < 1e-6);
        assert!((lla.alt - lla2.alt).abs() < 1e-1);
    }

    #[test]
    fn test_negative_altitude() {
        let lla = LlaCoord { lat: 31.5, lon: 35.5, alt: -430.0 };

        let ecef = lla_to_ecef(&lla).unwrap();
        let lla2 = ecef_to_lla(&ecef).unwrap();

        assert!((lla.alt - lla2.alt).abs() < 1e-3);
    }

    #[test]
    fn test_invalid_latitude() {
        let lla = LlaCoord { lat: 95.0, lon: 0.0, alt: 0.0 };

        let result = lla_to_ecef(&lla);
        assert!(matches!(result.unwrap_err(), RspError::CoordinateTransform(_)));
    }
}
