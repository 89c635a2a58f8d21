//! Camera models from files.
//!
//! A camera file is either a JSON [`CameraDescription`], a GDAL-style
//! `*_RPC.TXT` file or, with the `gdal` feature, an image carrying RPC
//! metadata. The description decides the concrete model once; the rest of
//! the pipeline only sees a [`CameraRef`].

use std::fs;
use std::path::Path;
use std::sync::Arc;

use nalgebra::{Matrix3, Quaternion, Rotation3, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};
use tracing::info;

use rsp_core::camera::{CameraModel, CameraRef, DistortionModel, LegacyCamera, PinholeCamera};
use rsp_core::sensor::{Ephemeris, LinescanCamera, OpticalBarCamera, RpcCoefficients, RpcModel};

use crate::error::{IoError, Result};
use crate::metadata::rpc_from_text;

/// Sampled sensor trajectory of a linescan camera
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EphemerisDescription {
    pub start_time: f64,
    pub step: f64,
    pub positions: Vec<[f64; 3]>,
    /// Camera-to-world quaternions as `[w, x, y, z]`
    pub orientations: Vec<[f64; 4]>,
}

/// Serialized form of every supported camera
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CameraDescription {
    Pinhole {
        width: usize,
        height: usize,
        fx: f64,
        fy: f64,
        cx: f64,
        cy: f64,
        #[serde(default)]
        distortion: DistortionModel,
        center: [f64; 3],
        /// Camera-to-world rotation, row major
        rotation: [[f64; 3]; 3],
    },
    Rpc(RpcCoefficients),
    Linescan {
        width: usize,
        height: usize,
        focal_length: f64,
        cx: f64,
        first_line_time: f64,
        line_period: f64,
        ephemeris: EphemerisDescription,
    },
    OpticalBar {
        width: usize,
        height: usize,
        pixel_size: f64,
        focal_length: f64,
        cx: f64,
        cy: f64,
        scan_time: f64,
        center: [f64; 3],
        rotation: [[f64; 3]; 3],
        #[serde(default)]
        velocity: [f64; 3],
    },
    /// A camera that must only be used from one thread at a time
    Legacy { inner: Box<CameraDescription> },
}

impl CameraDescription {
    pub fn into_camera(self) -> Result<CameraRef> {
        Ok(Arc::from(self.into_boxed()?))
    }

    fn into_boxed(self) -> Result<Box<dyn CameraModel>> {
        let camera: Box<dyn CameraModel> = match self {
            CameraDescription::Pinhole {
                width,
                height,
                fx,
                fy,
                cx,
                cy,
                distortion,
                center,
                rotation,
            } => Box::new(
                PinholeCamera::new_ideal(width, height, fx, fy, cx, cy)
                    .with_distortion(distortion)
                    .with_pose(Vector3::from(center), rotation_from_rows(&rotation)?),
            ),
            CameraDescription::Rpc(coeffs) => Box::new(RpcModel::new(coeffs)),
            CameraDescription::Linescan {
                width,
                height,
                focal_length,
                cx,
                first_line_time,
                line_period,
                ephemeris,
            } => Box::new(LinescanCamera::new(
                width,
                height,
                focal_length,
                cx,
                first_line_time,
                line_period,
                ephemeris.into_ephemeris()?,
            )?),
            CameraDescription::OpticalBar {
                width,
                height,
                pixel_size,
                focal_length,
                cx,
                cy,
                scan_time,
                center,
                rotation,
                velocity,
            } => Box::new(
                OpticalBarCamera::new(width, height, pixel_size, focal_length, cx, cy, scan_time)?
                    .with_pose(Vector3::from(center), rotation_from_rows(&rotation)?)
                    .with_velocity(Vector3::from(velocity)),
            ),
            CameraDescription::Legacy { inner } => Box::new(LegacyCamera::new(inner.into_boxed()?)),
        };
        Ok(camera)
    }
}

impl EphemerisDescription {
    fn into_ephemeris(self) -> Result<Ephemeris> {
        let positions = self.positions.into_iter().map(Vector3::from).collect();
        let orientations = self
            .orientations
            .into_iter()
            .map(|[w, x, y, z]| UnitQuaternion::from_quaternion(Quaternion::new(w, x, y, z)))
            .collect();
        Ok(Ephemeris::new(self.start_time, self.step, positions, orientations)?)
    }
}

fn rotation_from_rows(rows: &[[f64; 3]; 3]) -> Result<Rotation3<f64>> {
    let m = Matrix3::from_fn(|r, c| rows[r][c]);
    let orthonormal = (m.transpose() * m - Matrix3::identity()).norm() < 1e-6;
    if !orthonormal || m.determinant() <= 0.0 {
        return Err(IoError::Parse(format!("camera rotation is not a rotation matrix: {m}")));
    }
    Ok(Rotation3::from_matrix_unchecked(m))
}

fn is_rpc_text(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.to_ascii_uppercase().ends_with("_RPC.TXT"))
}

/// Load the camera model stored at `path`
pub fn load_camera<P: AsRef<Path>>(path: P) -> Result<CameraRef> {
    let path = path.as_ref();
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);

    let description = if is_rpc_text(path) || extension.as_deref() == Some("rpb") {
        CameraDescription::Rpc(rpc_from_text(&fs::read_to_string(path)?)?)
    } else if extension.as_deref() == Some("json") {
        serde_json::from_str(&fs::read_to_string(path)?)?
    } else {
        rpc_from_image(path)?
    };

    let camera = description.into_camera()?;
    info!("loaded {:?} camera from {}", camera.kind(), path.display());
    Ok(camera)
}

#[cfg(feature = "gdal")]
fn rpc_from_image(path: &Path) -> Result<CameraDescription> {
    let dataset = gdal::Dataset::open(path)?;
    Ok(CameraDescription::Rpc(crate::metadata::rpc_from_dataset(&dataset)?))
}

#[cfg(not(feature = "gdal"))]
fn rpc_from_image(path: &Path) -> Result<CameraDescription> {
    Err(IoError::Unsupported(format!(
        "cannot read a camera from {}; reading image-embedded RPC needs the gdal feature",
        path.display()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::Vector2;
    use rsp_core::camera::CameraKind;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const PINHOLE_JSON: &str = r#"{
        "type": "pinhole",
        "width": 100, "height": 100,
        "fx": 50.0, "fy": 50.0, "cx": 50.0, "cy": 50.0,
        "center": [0.0, 0.0, 100.0],
        "rotation": [[1.0, 0.0, 0.0], [0.0, -1.0, 0.0], [0.0, 0.0, -1.0]]
    }"#;

    fn write_temp(suffix: &str, body: &str) -> NamedTempFile {
        let mut tmp = NamedTempFile::with_suffix(suffix).unwrap();
        tmp.write_all(body.as_bytes()).unwrap();
        tmp
    }

    #[test]
    fn test_pinhole_from_json_file() {
        let tmp = write_temp(".json", PINHOLE_JSON);
        let camera = load_camera(tmp.path()).unwrap();

        assert_eq!(camera.kind(), CameraKind::Pinhole);
        let pixel = camera.point_to_pixel(&Vector3::new(10.0, -20.0, 0.0)).unwrap();
        assert_relative_eq!(pixel, Vector2::new(55.0, 60.0), epsilon = 1e-9);
    }

    #[test]
    fn test_legacy_wrapper_is_not_thread_safe() {
        let json = format!(r#"{{"type": "legacy", "inner": {PINHOLE_JSON}}}"#);
        let camera = serde_json::from_str::<CameraDescription>(&json)
            .unwrap()
            .into_camera()
            .unwrap();
        assert!(!camera.is_thread_safe());
        assert_eq!(camera.kind(), CameraKind::Isis);
    }

    #[test]
    fn test_non_rotation_is_rejected() {
        let json = PINHOLE_JSON.replace("[0.0, 0.0, -1.0]]", "[0.0, 0.0, 2.0]]");
        let desc: CameraDescription = serde_json::from_str(&json).unwrap();
        assert!(matches!(desc.into_camera(), Err(IoError::Parse(_))));
    }

    #[test]
    fn test_linescan_description() {
        let json = r#"{
            "type": "linescan",
            "width": 200, "height": 100,
            "focal_length": 1000.0, "cx": 100.0,
            "first_line_time": 0.0, "line_period": 0.01,
            "ephemeris": {
                "start_time": -1.0, "step": 1.0,
                "positions": [[0.0, -10.0, 1000.0], [0.0, 0.0, 1000.0], [0.0, 10.0, 1000.0], [0.0, 20.0, 1000.0]],
                "orientations": [[0.0, 1.0, 0.0, 0.0], [0.0, 1.0, 0.0, 0.0], [0.0, 1.0, 0.0, 0.0], [0.0, 1.0, 0.0, 0.0]]
            }
        }"#;
        let camera = serde_json::from_str::<CameraDescription>(json)
            .unwrap()
            .into_camera()
            .unwrap();
        assert_eq!(camera.kind(), CameraKind::Linescan);
        assert!(
            camera
                .camera_center(&Vector2::new(100.0, 50.0))
                .unwrap()
                .z
                > 999.0
        );
    }

    #[test]
    fn test_short_ephemeris_is_rejected() {
        let desc = EphemerisDescription {
            start_time: 0.0,
            step: 1.0,
            positions: vec![[0.0; 3]],
            orientations: vec![[1.0, 0.0, 0.0, 0.0]],
        };
        assert!(matches!(desc.into_ephemeris(), Err(IoError::Core(_))));
    }

    #[test]
    fn test_rpc_text_file() {
        let mut text = String::from(
            "LINE_OFF: 500\nSAMP_OFF: 500\nLAT_OFF: 10\nLONG_OFF: 20\nHEIGHT_OFF: 0\n\
             LINE_SCALE: 500\nSAMP_SCALE: 500\nLAT_SCALE: 0.1\nLONG_SCALE: 0.1\nHEIGHT_SCALE: 500\n",
        );
        for prefix in ["LINE_NUM_COEFF", "LINE_DEN_COEFF", "SAMP_NUM_COEFF", "SAMP_DEN_COEFF"] {
            for i in 1..=20 {
                let value = if i == 1 && prefix.contains("DEN") { 1.0 } else { 0.0 };
                text.push_str(&format!("{prefix}_{i}: {value}\n"));
            }
        }
        let tmp = write_temp("_RPC.TXT", &text);

        let camera = load_camera(tmp.path()).unwrap();
        assert_eq!(camera.kind(), CameraKind::Rpc);
    }

    #[test]
    fn test_unknown_camera_file() {
        let tmp = write_temp(".cam", "not a camera");
        assert!(load_camera(tmp.path()).is_err());
    }
}
