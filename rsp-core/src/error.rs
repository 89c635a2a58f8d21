use thiserror::Error;

use crate::camera::DistortionError;

/// Common errors across the photogrammetry pipeline
#[derive(Error, Debug)]
pub enum RspError {
    #[error("Projection error: {0}")]
    Projection(#[from] ProjectionError),

    #[error("Coordinate transform error: {0}")]
    CoordinateTransform(#[from] CoordinateError),

    #[error("Lens distortion error: {0}")]
    Distortion(#[from] DistortionError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

#[derive(Error, Debug)]
pub enum ProjectionError {
    #[error("Point behind camera")]
    BehindCamera,

    #[error("Point outside image bounds")]
    OutOfBounds,

    #[error("Invalid RPC coefficients")]
    InvalidRpc,

    #[error("Projection did not converge after {0} iterations")]
    NoConvergence(usize),

    #[error("Time {0} is outside the sensor ephemeris range")]
    OutOfScanRange(f64),
}

#[derive(Error, Debug)]
pub enum CoordinateError {
    #[error("Invalid latitude: {0} (must be -90 to 90)")]
    InvalidLatitude(f64),

    #[error("Coordinate transform failed: {0}")]
    TransformFailed(String),
}

pub type Result<T> = std::result::Result<T, RspError>;
