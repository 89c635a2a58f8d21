use std::sync::{Mutex, PoisonError};

use nalgebra::{Vector2, Vector3};

use super::{CameraKind, CameraModel};
use crate::error::Result;

/// Adapter for camera libraries that must not be entered from more than one
/// thread at a time (ISIS-style planetary sensors).
///
/// Every call is serialized behind a mutex and the model reports itself as
/// not thread-safe, which makes the scheduler run the pass on one thread.
pub struct LegacyCamera {
    inner: Mutex<Box<dyn CameraModel>>,
}

impl LegacyCamera {
    pub fn new(inner: Box<dyn CameraModel>) -> Self {
        Self {
            inner: Mutex::new(inner),
        }
    }

    fn with_inner<T>(&self, f: impl FnOnce(&dyn CameraModel) -> T) -> T {
        let guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(guard.as_ref())
    }
}

impl CameraModel for LegacyCamera {
    fn pixel_to_vector(&self, pixel: &Vector2<f64>) -> Result<Vector3<f64>> {
        self.with_inner(|cam| cam.pixel_to_vector(pixel))
    }

    fn camera_center(&self, pixel: &Vector2<f64>) -> Result<Vector3<f64>> {
        self.with_inner(|cam| cam.camera_center(pixel))
    }

    fn point_to_pixel(&self, point: &Vector3<f64>) -> Result<Vector2<f64>> {
        self.with_inner(|cam| cam.point_to_pixel(point))
    }

    fn kind(&self) -> CameraKind {
        CameraKind::Isis
    }

    fn is_thread_safe(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::PinholeCamera;

    #[test]
    fn test_legacy_delegates_and_reports_unsafe() {
        let pinhole = PinholeCamera::new_ideal(100, 100, 50.0, 50.0, 50.0, 50.0);
        let legacy = LegacyCamera::new(Box::new(pinhole.clone()));

        let point = Vector3::new(1.0, 2.0, 10.0);
        assert_eq!(
            legacy.point_to_pixel(&point).unwrap(),
            pinhole.point_to_pixel(&point).unwrap()
        );
        assert_eq!(legacy.kind(), CameraKind::Isis);
        assert!(!legacy.is_thread_safe());
    }
}
