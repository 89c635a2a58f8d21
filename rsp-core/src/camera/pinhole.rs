use super::{distortion::DistortionModel, CameraKind, CameraModel, DistortionError};
use crate::error::{ProjectionError, Result};
use nalgebra::{Rotation3, Vector2, Vector3};

/// Pinhole camera model with optional distortion and a pose in world space.
///
/// The camera looks down its +Z axis; `rotation` maps camera-frame vectors
/// to world-frame vectors and `center` is the optical centre in world space.
#[derive(Debug, Clone)]
pub struct PinholeCamera {
    width: usize,
    height: usize,
    fx: f64,
    fy: f64,
    cx: f64,
    cy: f64,
    distortion: DistortionModel,
    center: Vector3<f64>,
    rotation: Rotation3<f64>,
}

impl PinholeCamera {
    /// Create a new pinhole camera with Brown-Conrady distortion
    #[allow(clippy::too_many_arguments)]
    pub fn new_brown_conrady(
        width: usize,
        height: usize,
        fx: f64,
        fy: f64,
        cx: f64,
        cy: f64,
        k1: f64,
        k2: f64,
        k3: f64,
        p1: f64,
        p2: f64,
    ) -> Self {
        Self::new_ideal(width, height, fx, fy, cx, cy)
            .with_distortion(DistortionModel::BrownConrady { k1, k2, k3, p1, p2 })
    }

    /// Create a new pinhole camera with no distortion, at the world origin
    pub fn new_ideal(width: usize, height: usize, fx: f64, fy: f64, cx: f64, cy: f64) -> Self {
        Self {
            width,
            height,
            fx,
            fy,
            cx,
            cy,
            distortion: DistortionModel::None,
            center: Vector3::zeros(),
            rotation: Rotation3::identity(),
        }
    }

    pub fn with_distortion(mut self, distortion: DistortionModel) -> Self {
        self.distortion = distortion;
        self
    }

    /// Place the camera in the world
    pub fn with_pose(mut self, center: Vector3<f64>, rotation: Rotation3<f64>) -> Self {
        self.center = center;
        self.rotation = rotation;
        self
    }

    pub fn focal_length(&self) -> (f64, f64) {
        (self.fx, self.fy)
    }

    pub fn principal_point(&self) -> (f64, f64) {
        (self.cx, self.cy)
    }

    pub fn image_size(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    pub fn center(&self) -> &Vector3<f64> {
        &self.center
    }

    pub fn rotation(&self) -> &Rotation3<f64> {
        &self.rotation
    }

    /// Project 3D point in camera frame to image coordinates.
    /// Returns None if point is behind camera.
    pub fn project(&self, point_camera: &Vector3<f64>) -> Option<(f64, f64)> {
        if point_camera.z <= 0.0 {
            return None;
        }

        let x_norm = point_camera.x / point_camera.z;
        let y_norm = point_camera.y / point_camera.z;

        let (x_dist, y_dist) = self.distortion.distort(x_norm, y_norm);

        Some((self.fx * x_dist + self.cx, self.fy * y_dist + self.cy))
    }

    /// Unproject image coordinates to unit ray in camera frame
    pub fn unproject(&self, pixel: (f64, f64)) -> std::result::Result<Vector3<f64>, DistortionError> {
        let x_dist = (pixel.0 - self.cx) / self.fx;
        let y_dist = (pixel.1 - self.cy) / self.fy;

        let (x_norm, y_norm) = self.distortion.undistort(x_dist, y_dist)?;

        Ok(Vector3::new(x_norm, y_norm, 1.0).normalize())
    }
}

impl CameraModel for PinholeCamera {
    fn pixel_to_vector(&self, pixel: &Vector2<f64>) -> Result<Vector3<f64>> {
        let ray = self.unproject((pixel.x, pixel.y))?;
        Ok(self.rotation * ray)
    }

    fn camera_center(&self, _pixel: &Vector2<f64>) -> Result<Vector3<f64>> {
        Ok(self.center)
    }

    fn point_to_pixel(&self, point: &Vector3<f64>) -> Result<Vector2<f64>> {
        let point_camera = self.rotation.inverse() * (point - self.center);
        let (u, v) = self
            .project(&point_camera)
            .ok_or(ProjectionError::BehindCamera)?;
        Ok(Vector2::new(u, v))
    }

    fn kind(&self) -> CameraKind {
        CameraKind::Pinhole
    }
}
