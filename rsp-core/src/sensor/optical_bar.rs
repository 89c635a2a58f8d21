use nalgebra::{Rotation3, Vector2, Vector3};

use crate::camera::{CameraKind, CameraModel};
use crate::error::{ProjectionError, Result, RspError};

const MAX_SCAN_ITERATIONS: usize = 50;

/// Panoramic (optical bar) film camera.
///
/// The lens sweeps across the columns while the vehicle moves, so each
/// column has its own scan angle and exposure position. Rows run along the
/// film slit.
#[derive(Debug, Clone)]
pub struct OpticalBarCamera {
    width: usize,
    height: usize,
    /// Film pixel pitch in metres
    pixel_size: f64,
    /// Focal length in metres
    focal_length: f64,
    cx: f64,
    cy: f64,
    /// Seconds to sweep the full image width
    scan_time: f64,
    /// Position at the principal column
    center: Vector3<f64>,
    velocity: Vector3<f64>,
    rotation: Rotation3<f64>,
}

impl OpticalBarCamera {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        width: usize,
        height: usize,
        pixel_size: f64,
        focal_length: f64,
        cx: f64,
        cy: f64,
        scan_time: f64,
    ) -> Result<Self> {
        if !(pixel_size.is_finite() && focal_length.is_finite())
            || pixel_size <= 0.0
            || focal_length <= 0.0
            || width == 0
        {
            return Err(RspError::InvalidInput(format!(
                "optical bar needs positive pixel size and focal length ({pixel_size}, {focal_length})"
            )));
        }
        Ok(Self {
            width,
            height,
            pixel_size,
            focal_length,
            cx,
            cy,
            scan_time,
            center: Vector3::zeros(),
            velocity: Vector3::zeros(),
            rotation: Rotation3::identity(),
        })
    }

    pub fn with_pose(mut self, center: Vector3<f64>, rotation: Rotation3<f64>) -> Self {
        self.center = center;
        self.rotation = rotation;
        self
    }

    pub fn with_velocity(mut self, velocity: Vector3<f64>) -> Self {
        self.velocity = velocity;
        self
    }

    pub fn image_size(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    fn scan_angle(&self, col: f64) -> f64 {
        (col - self.cx) * self.pixel_size / self.focal_length
    }

    fn exposure_time(&self, col: f64) -> f64 {
        (col - self.cx) / self.width as f64 * self.scan_time
    }

    fn center_at(&self, col: f64) -> Vector3<f64> {
        self.center + self.velocity * self.exposure_time(col)
    }
}

impl CameraModel for OpticalBarCamera {
    fn pixel_to_vector(&self, pixel: &Vector2<f64>) -> Result<Vector3<f64>> {
        let alpha = self.scan_angle(pixel.x);
        let y_film = (pixel.y - self.cy) * self.pixel_size;
        let ray = Vector3::new(
            self.focal_length * alpha.sin(),
            y_film,
            self.focal_length * alpha.cos(),
        )
        .normalize();
        Ok(self.rotation * ray)
    }

    fn camera_center(&self, pixel: &Vector2<f64>) -> Result<Vector3<f64>> {
        Ok(self.center_at(pixel.x))
    }

    /// Fixed-point iteration on the column, since the exposure position
    /// depends on it
    fn point_to_pixel(&self, point: &Vector3<f64>) -> Result<Vector2<f64>> {
        let mut col = self.cx;
        for _ in 0..MAX_SCAN_ITERATIONS {
            let p = self.rotation.inverse() * (point - self.center_at(col));
            if p.z <= 0.0 {
                return Err(ProjectionError::BehindCamera.into());
            }
            let alpha = p.x.atan2(p.z);
            let next = self.cx + alpha * self.focal_length / self.pixel_size;
            if (next - col).abs() < 1e-8 {
                let y_film = self.focal_length * p.y / p.x.hypot(p.z);
                let row = self.cy + y_film / self.pixel_size;
                return Ok(Vector2::new(next, row));
            }
            col = next;
        }
        Err(ProjectionError::NoConvergence(MAX_SCAN_ITERATIONS).into())
    }

    fn kind(&self) -> CameraKind {
        CameraKind::OpticalBar
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::Matrix3;

    fn nadir() -> Rotation3<f64> {
        Rotation3::from_matrix_unchecked(Matrix3::new(
            1.0, 0.0, 0.0, //
            0.0, -1.0, 0.0, //
            0.0, 0.0, -1.0,
        ))
    }

    fn panoramic() -> OpticalBarCamera {
        OpticalBarCamera::new(10000, 2000, 1e-5, 0.6, 5000.0, 1000.0, 0.5)
            .unwrap()
            .with_pose(Vector3::new(0.0, 0.0, 1000.0), nadir())
    }

    #[test]
    fn test_nadir_point_maps_to_principal_pixel() {
        let camera = panoramic();
        let pixel = camera.point_to_pixel(&Vector3::new(0.0, 0.0, 0.0)).unwrap();
        assert_relative_eq!(pixel, Vector2::new(5000.0, 1000.0), epsilon = 1e-6);
    }

    #[test]
    fn test_scan_angle_grows_with_column() {
        let camera = panoramic();
        let pixel = camera.point_to_pixel(&Vector3::new(10.0, 0.0, 0.0)).unwrap();
        let expected = 5000.0 + (0.01f64).atan() * 0.6 / 1e-5;
        assert_relative_eq!(pixel.x, expected, epsilon = 1e-6);
    }

    #[test]
    fn test_moving_camera_roundtrip() {
        let camera = panoramic().with_velocity(Vector3::new(5.0, 2.0, 0.0));
        let pixel = Vector2::new(5600.0, 1200.0);
        let ctr = camera.camera_center(&pixel).unwrap();
        let dir = camera.pixel_to_vector(&pixel).unwrap();
        let ground = ctr + dir * (-ctr.z / dir.z);

        let back = camera.point_to_pixel(&ground).unwrap();
        assert_relative_eq!(back, pixel, epsilon = 1e-5);
    }

    #[test]
    fn test_point_above_camera() {
        let camera = panoramic();
        let err = camera.point_to_pixel(&Vector3::new(0.0, 0.0, 2000.0)).unwrap_err();
        assert!(matches!(err, RspError::Projection(ProjectionError::BehindCamera)));
        assert_eq!(camera.kind(), CameraKind::OpticalBar);
    }
}
