//! File formats: GeoTIFF rasters, disparity products and camera models

pub mod camera;
pub mod error;
pub mod metadata;
pub mod raster;

pub use camera::{load_camera, CameraDescription};
pub use error::{IoError, Result};
pub use raster::{image_size, read_masked_pair, read_raster, write_masked_pair, write_raster};
