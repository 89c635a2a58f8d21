//! Camera models and projections

mod distortion;
mod legacy;
mod pinhole;

pub use distortion::{DistortionError, DistortionModel};
pub use legacy::LegacyCamera;
pub use pinhole::PinholeCamera;

use std::sync::Arc;

use nalgebra::{Vector2, Vector3};

use crate::error::Result;

/// Sensor families behind [`CameraModel`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraKind {
    Pinhole,
    Rpc,
    OpticalBar,
    Linescan,
    /// Legacy planetary camera library, not callable from several threads
    Isis,
}

/// Mapping between image pixels and world (cartesian) space.
///
/// Pixels are `(col, row)`. All methods are read-only and may be called
/// concurrently from several worker threads.
pub trait CameraModel: Send + Sync {
    /// Unit direction, in world coordinates, of the ray through `pixel`
    fn pixel_to_vector(&self, pixel: &Vector2<f64>) -> Result<Vector3<f64>>;

    /// Camera position at the instant `pixel` was imaged
    fn camera_center(&self, pixel: &Vector2<f64>) -> Result<Vector3<f64>>;

    /// Project a world point into the image
    fn point_to_pixel(&self, point: &Vector3<f64>) -> Result<Vector2<f64>>;

    fn kind(&self) -> CameraKind;

    /// Whether concurrent calls are supported. When false the whole
    /// estimation pass runs on a single thread.
    fn is_thread_safe(&self) -> bool {
        true
    }
}

/// Shared handle to a camera selected at load time
pub type CameraRef = Arc<dyn CameraModel>;
