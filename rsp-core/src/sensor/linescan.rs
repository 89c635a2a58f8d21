use nalgebra::{UnitQuaternion, Vector2, Vector3};

use crate::camera::{CameraKind, CameraModel};
use crate::error::{ProjectionError, Result, RspError};

const MAX_LINE_ITERATIONS: usize = 50;
const LINE_TOLERANCE: f64 = 1e-8;

/// Evenly sampled sensor positions and orientations (camera to world)
#[derive(Debug, Clone)]
pub struct Ephemeris {
    start_time: f64,
    step: f64,
    positions: Vec<Vector3<f64>>,
    orientations: Vec<UnitQuaternion<f64>>,
}

impl Ephemeris {
    pub fn new(
        start_time: f64,
        step: f64,
        positions: Vec<Vector3<f64>>,
        orientations: Vec<UnitQuaternion<f64>>,
    ) -> Result<Self> {
        if positions.len() < 2 || positions.len() != orientations.len() {
            return Err(RspError::InvalidInput(format!(
                "ephemeris needs at least two matching samples, got {} positions and {} orientations",
                positions.len(),
                orientations.len()
            )));
        }
        if step <= 0.0 || !step.is_finite() {
            return Err(RspError::InvalidInput(format!(
                "ephemeris step must be positive, got {step}"
            )));
        }
        Ok(Self {
            start_time,
            step,
            positions,
            orientations,
        })
    }

    pub fn end_time(&self) -> f64 {
        self.start_time + self.step * (self.positions.len() - 1) as f64
    }

    /// Sample index and fraction for time `t`
    fn locate(&self, t: f64) -> Result<(usize, f64)> {
        let idx = (t - self.start_time) / self.step;
        let last = (self.positions.len() - 1) as f64;
        if !idx.is_finite() || idx < -1e-9 || idx > last + 1e-9 {
            return Err(ProjectionError::OutOfScanRange(t).into());
        }
        let idx = idx.clamp(0.0, last);
        let i = (idx.floor() as usize).min(self.positions.len() - 2);
        Ok((i, idx - i as f64))
    }

    pub fn position(&self, t: f64) -> Result<Vector3<f64>> {
        let (i, frac) = self.locate(t)?;
        Ok(self.positions[i].lerp(&self.positions[i + 1], frac))
    }

    pub fn orientation(&self, t: f64) -> Result<UnitQuaternion<f64>> {
        let (i, frac) = self.locate(t)?;
        let (a, b) = (&self.orientations[i], &self.orientations[i + 1]);
        Ok(a.try_slerp(b, frac, 1e-9).unwrap_or(*a))
    }
}

/// Pushbroom sensor: one detector row imaged per line time.
///
/// The detector looks down camera +Z, columns spread along camera X and the
/// sensor moves along camera Y.
#[derive(Debug, Clone)]
pub struct LinescanCamera {
    width: usize,
    height: usize,
    /// Focal length in pixels
    focal_length: f64,
    /// Principal column
    cx: f64,
    first_line_time: f64,
    line_period: f64,
    ephemeris: Ephemeris,
}

impl LinescanCamera {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        width: usize,
        height: usize,
        focal_length: f64,
        cx: f64,
        first_line_time: f64,
        line_period: f64,
        ephemeris: Ephemeris,
    ) -> Result<Self> {
        if !(focal_length.is_finite() && line_period.is_finite())
            || focal_length <= 0.0
            || line_period <= 0.0
        {
            return Err(RspError::InvalidInput(format!(
                "linescan focal length and line period must be positive ({focal_length}, {line_period})"
            )));
        }
        Ok(Self {
            width,
            height,
            focal_length,
            cx,
            first_line_time,
            line_period,
            ephemeris,
        })
    }

    pub fn image_size(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    pub fn ephemeris(&self) -> &Ephemeris {
        &self.ephemeris
    }

    pub fn line_time(&self, row: f64) -> f64 {
        self.first_line_time + row * self.line_period
    }

    /// Point in the camera frame of line `row`
    fn to_camera_frame(&self, point: &Vector3<f64>, row: f64) -> Result<Vector3<f64>> {
        let t = self.line_time(row);
        let center = self.ephemeris.position(t)?;
        let rotation = self.ephemeris.orientation(t)?;
        Ok(rotation.inverse_transform_vector(&(point - center)))
    }
}

impl CameraModel for LinescanCamera {
    fn pixel_to_vector(&self, pixel: &Vector2<f64>) -> Result<Vector3<f64>> {
        let rotation = self.ephemeris.orientation(self.line_time(pixel.y))?;
        let ray = Vector3::new((pixel.x - self.cx) / self.focal_length, 0.0, 1.0).normalize();
        Ok(rotation * ray)
    }

    fn camera_center(&self, pixel: &Vector2<f64>) -> Result<Vector3<f64>> {
        self.ephemeris.position(self.line_time(pixel.y))
    }

    /// Secant search for the line whose detector plane contains `point`
    fn point_to_pixel(&self, point: &Vector3<f64>) -> Result<Vector2<f64>> {
        let mut row0 = self.height as f64 / 2.0;
        let mut row1 = row0 + 1.0;
        let mut f0 = self.to_camera_frame(point, row0)?.y;

        for _ in 0..MAX_LINE_ITERATIONS {
            let p = self.to_camera_frame(point, row1)?;
            if (row1 - row0).abs() < LINE_TOLERANCE {
                if p.z <= 0.0 {
                    return Err(ProjectionError::BehindCamera.into());
                }
                let col = self.cx + self.focal_length * p.x / p.z;
                return Ok(Vector2::new(col, row1));
            }

            let slope = (p.y - f0) / (row1 - row0);
            if slope == 0.0 || !slope.is_finite() {
                break;
            }
            let next = row1 - p.y / slope;
            row0 = row1;
            f0 = p.y;
            row1 = next;
        }

        Err(ProjectionError::NoConvergence(MAX_LINE_ITERATIONS).into())
    }

    fn kind(&self) -> CameraKind {
        CameraKind::Linescan
    }
}
