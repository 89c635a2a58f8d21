use nalgebra::{Vector2, Vector3};
use serde::{Deserialize, Serialize};

use crate::camera::{CameraKind, CameraModel};
use crate::coordinate::{ecef_to_lla, lla_to_ecef, EcefCoord, LlaCoord};
use crate::error::{ProjectionError, Result};

const MAX_INVERSION_ITERATIONS: usize = 20;

/// RPC (Rational Polynomial Coefficients) for satellite imagery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcCoefficients {
    // Polynomial coefficients (20 each)
    pub line_num_coeff: [f64; 20],
    pub line_den_coeff: [f64; 20],
    pub samp_num_coeff: [f64; 20],
    pub samp_den_coeff: [f64; 20],

    // Normalization offsets and scales
    pub lat_off: f64,
    pub lat_scale: f64,
    pub lon_off: f64,
    pub lon_scale: f64,
    pub height_off: f64,
    pub height_scale: f64,
    pub line_off: f64,
    pub line_scale: f64,
    pub samp_off: f64,
    pub samp_scale: f64,
}

/// RPC sensor model for ground-to-image and image-to-ground projection.
///
/// As a [`CameraModel`] the pixel is `(sample, line)` and world points are
/// WGS84 ECEF. Rays are built through the top and bottom of the height
/// normalization volume.
#[derive(Debug, Clone)]
pub struct RpcModel {
    coeffs: RpcCoefficients,
}

impl RpcModel {
    pub fn new(coeffs: RpcCoefficients) -> Self {
        Self { coeffs }
    }

    pub fn coefficients(&self) -> &RpcCoefficients {
        &self.coeffs
    }

    /// Project ground point (ECEF) to image coordinates (line, sample)
    pub fn ground_to_image(&self, ground_ecef: &EcefCoord) -> Result<(f64, f64)> {
        let lla = ecef_to_lla(ground_ecef)?;
        self.lla_to_image(&lla)
    }

    /// Project LLA to image coordinates (line, sample)
    pub fn lla_to_image(&self, lla: &LlaCoord) -> Result<(f64, f64)> {
        let p = (lla.lon - self.coeffs.lon_off) / self.coeffs.lon_scale;
        let l = (lla.lat - self.coeffs.lat_off) / self.coeffs.lat_scale;
        let h = (lla.alt - self.coeffs.height_off) / self.coeffs.height_scale;

        let line_num = eval_polynomial(&self.coeffs.line_num_coeff, p, l, h);
        let line_den = eval_polynomial(&self.coeffs.line_den_coeff, p, l, h);
        let samp_num = eval_polynomial(&self.coeffs.samp_num_coeff, p, l, h);
        let samp_den = eval_polynomial(&self.coeffs.samp_den_coeff, p, l, h);

        if line_den.abs() < 1e-10 || samp_den.abs() < 1e-10 {
            return Err(ProjectionError::InvalidRpc.into());
        }

        let line = line_num / line_den * self.coeffs.line_scale + self.coeffs.line_off;
        let samp = samp_num / samp_den * self.coeffs.samp_scale + self.coeffs.samp_off;

        Ok((line, samp))
    }

    /// Project image coordinates to ground point at given height (ECEF)
    pub fn image_to_ground(&self, line: f64, sample: f64, height: f64) -> Result<EcefCoord> {
        let lla = self.image_to_lla(line, sample, height)?;
        lla_to_ecef(&lla)
    }

    /// Project image coordinates to LLA at given height.
    /// Uses Newton-Raphson iteration to invert the RPC.
    pub fn image_to_lla(&self, line: f64, sample: f64, height: f64) -> Result<LlaCoord> {
        // Initial guess - use center of RPC normalization
        let mut lat = self.coeffs.lat_off;
        let mut lon = self.coeffs.lon_off;

        for iter in 0..MAX_INVERSION_ITERATIONS {
            let lla = LlaCoord { lat, lon, alt: height };
            let (proj_line, proj_samp) = self.lla_to_image(&lla)?;

            let line_err = line - proj_line;
            let samp_err = sample - proj_samp;

            if line_err.abs() < 1e-6 && samp_err.abs() < 1e-6 {
                return Ok(lla);
            }

            let delta = 1e-7;

            let lla_lat_plus = LlaCoord { lat: lat + delta, lon, alt: height };
            let (line_lat_plus, samp_lat_plus) = self.lla_to_image(&lla_lat_plus)?;
            let dline_dlat = (line_lat_plus - proj_line) / delta;
            let dsamp_dlat = (samp_lat_plus - proj_samp) / delta;

            let lla_lon_plus = LlaCoord { lat, lon: lon + delta, alt: height };
            let (line_lon_plus, samp_lon_plus) = self.lla_to_image(&lla_lon_plus)?;
            let dline_dlon = (line_lon_plus - proj_line) / delta;
            let dsamp_dlon = (samp_lon_plus - proj_samp) / delta;

            // Solve 2x2 system: J * [dlat, dlon]' = [line_err, samp_err]'
            let det = dline_dlat * dsamp_dlon - dline_dlon * dsamp_dlat;

            if det.abs() < 1e-10 {
                return Err(ProjectionError::NoConvergence(iter).into());
            }

            lat += (dsamp_dlon * line_err - dline_dlon * samp_err) / det;
            lon += (dline_dlat * samp_err - dsamp_dlat * line_err) / det;
        }

        Err(ProjectionError::NoConvergence(MAX_INVERSION_ITERATIONS).into())
    }

    fn top_height(&self) -> f64 {
        self.coeffs.height_off + self.coeffs.height_scale
    }

    fn bottom_height(&self) -> f64 {
        self.coeffs.height_off - self.coeffs.height_scale
    }
}

impl CameraModel for RpcModel {
    fn pixel_to_vector(&self, pixel: &Vector2<f64>) -> Result<Vector3<f64>> {
        let top = self.image_to_ground(pixel.y, pixel.x, self.top_height())?;
        let bottom = self.image_to_ground(pixel.y, pixel.x, self.bottom_height())?;
        let dir = bottom - top;
        let len = dir.norm();
        if len == 0.0 {
            return Err(ProjectionError::InvalidRpc.into());
        }
        Ok(dir / len)
    }

    fn camera_center(&self, pixel: &Vector2<f64>) -> Result<Vector3<f64>> {
        self.image_to_ground(pixel.y, pixel.x, self.top_height())
    }

    fn point_to_pixel(&self, point: &Vector3<f64>) -> Result<Vector2<f64>> {
        let (line, samp) = self.ground_to_image(point)?;
        Ok(Vector2::new(samp, line))
    }

    fn kind(&self) -> CameraKind {
        CameraKind::Rpc
    }
}

/// Evaluate RPC polynomial with 20 coefficients
fn eval_polynomial(coeffs: &[f64; 20], p: f64, l: f64, h: f64) -> f64 {
    coeffs[0]
        + coeffs[1] * l
        + coeffs[2] * p
        + coeffs[3] * h
        + coeffs[4] * l * p
        + coeffs[5] * l * h
        + coeffs[6] * p * h
        + coeffs[7] * l * l
        + coeffs[8] * p * p
        + coeffs[9] * h * h
        + coeffs[10] * p * l * h
        + coeffs[11] * l * l * l
        + coeffs[12] * l * p * p
        + coeffs[13] * l * h * h
        + coeffs[14] * l * l * p
        + coeffs[15] * p * p * p
        + coeffs[16] * p * h * h
        + coeffs[17] * l * l * h
        + coeffs[18] * p * p * h
        + coeffs[19] * h * h * h
}
