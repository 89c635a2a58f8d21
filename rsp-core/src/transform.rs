//! Pixel transforms between a camera's raw image and the image actually
//! processed (aligned, map-projected, or untouched).
//!
//! `forward` maps raw camera pixels to processed pixels, `reverse` the other
//! way.

use std::ops::Deref;
use std::sync::{Arc, Mutex, PoisonError};

use nalgebra::{Matrix3, Vector2, Vector3};

use crate::camera::CameraRef;
use crate::coordinate::Georeference;
use crate::error::{ProjectionError, Result, RspError};
use crate::intersect::{IntersectionOptions, RayDemIntersector};
use crate::raster::{Masked, Raster};

pub trait PixelTransform: Send + Sync {
    fn forward(&self, pixel: &Vector2<f64>) -> Result<Vector2<f64>>;

    fn reverse(&self, pixel: &Vector2<f64>) -> Result<Vector2<f64>>;

    /// True when the transform keeps per-call state, so each worker
    /// should evaluate its own copy
    fn requires_private_copy(&self) -> bool {
        false
    }

    /// Independent copy with fresh internal state
    fn worker_copy(&self) -> Box<dyn PixelTransform>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityTransform;

impl PixelTransform for IdentityTransform {
    fn forward(&self, pixel: &Vector2<f64>) -> Result<Vector2<f64>> {
        Ok(*pixel)
    }

    fn reverse(&self, pixel: &Vector2<f64>) -> Result<Vector2<f64>> {
        Ok(*pixel)
    }

    fn worker_copy(&self) -> Box<dyn PixelTransform> {
        Box::new(*self)
    }
}

/// Planar homography, as produced by affine or homography image alignment
#[derive(Debug, Clone, Copy)]
pub struct HomographyTransform {
    matrix: Matrix3<f64>,
    inverse: Matrix3<f64>,
}

impl HomographyTransform {
    pub fn new(matrix: Matrix3<f64>) -> Result<Self> {
        let inverse = matrix
            .try_inverse()
            .ok_or_else(|| RspError::InvalidInput("homography matrix is singular".to_string()))?;
        Ok(Self { matrix, inverse })
    }

    pub fn matrix(&self) -> &Matrix3<f64> {
        &self.matrix
    }

    fn apply(m: &Matrix3<f64>, pixel: &Vector2<f64>) -> Result<Vector2<f64>> {
        let p = m * Vector3::new(pixel.x, pixel.y, 1.0);
        if p.z.abs() < 1e-12 {
            return Err(ProjectionError::OutOfBounds.into());
        }
        Ok(Vector2::new(p.x / p.z, p.y / p.z))
    }
}

impl PixelTransform for HomographyTransform {
    fn forward(&self, pixel: &Vector2<f64>) -> Result<Vector2<f64>> {
        Self::apply(&self.matrix, pixel)
    }

    fn reverse(&self, pixel: &Vector2<f64>) -> Result<Vector2<f64>> {
        Self::apply(&self.inverse, pixel)
    }

    fn worker_copy(&self) -> Box<dyn PixelTransform> {
        Box::new(*self)
    }
}

/// Raw camera pixel to the pixel of an image map-projected onto a DEM.
///
/// Forward intersects the camera ray with the DEM and locates the ground
/// point in the map grid; reverse samples the DEM under the map pixel and
/// projects it into the camera. The last ground point is kept to seed the
/// next forward call, so copies are handed out per worker.
pub struct MapProjectTransform {
    camera: CameraRef,
    dem: Arc<Raster<Masked<f32>>>,
    dem_georef: Georeference,
    map_georef: Georeference,
    options: IntersectionOptions,
    height_guess: f64,
    last_ground: Mutex<Option<Vector3<f64>>>,
}

impl MapProjectTransform {
    pub fn new(
        camera: CameraRef,
        dem: Arc<Raster<Masked<f32>>>,
        map_georef: Georeference,
        options: IntersectionOptions,
    ) -> Result<Self> {
        let dem_georef = dem
            .georef()
            .cloned()
            .ok_or_else(|| RspError::InvalidInput("map projection DEM has no georeference".to_string()))?;
        let height_guess = crate::raster::dem_height_guess(&dem.view()).unwrap_or(0.0);
        Ok(Self {
            camera,
            dem,
            dem_georef,
            map_georef,
            options,
            height_guess,
            last_ground: Mutex::new(None),
        })
    }

    pub fn map_georef(&self) -> &Georeference {
        &self.map_georef
    }
}

impl PixelTransform for MapProjectTransform {
    fn forward(&self, pixel: &Vector2<f64>) -> Result<Vector2<f64>> {
        let origin = self.camera.camera_center(pixel)?;
        let dir = self.camera.pixel_to_vector(pixel)?;

        let mut last = self.last_ground.lock().unwrap_or_else(PoisonError::into_inner);
        let isect = RayDemIntersector::new(self.dem.as_ref(), &self.dem_georef, self.options);
        let ground = isect
            .intersect(&origin, &dir, last.as_ref(), self.height_guess)
            .ok_or(ProjectionError::OutOfBounds)?;
        *last = Some(ground);

        self.map_georef
            .cartesian_to_pixel(&ground)
            .ok_or_else(|| ProjectionError::OutOfBounds.into())
    }

    fn reverse(&self, pixel: &Vector2<f64>) -> Result<Vector2<f64>> {
        let lonlat = self.map_georef.pixel_to_lonlat(pixel);
        let dem_pix = self
            .dem_georef
            .lonlat_to_pixel(&lonlat)
            .ok_or(ProjectionError::OutOfBounds)?;
        let height = crate::raster::bilinear_masked(&self.dem.view(), &dem_pix)
            .or(self.options.treat_nodata_as_zero.then_some(0.0))
            .ok_or(ProjectionError::OutOfBounds)?;
        let ground = self.map_georef.pixel_to_cartesian(pixel, height);
        self.camera.point_to_pixel(&ground)
    }

    fn requires_private_copy(&self) -> bool {
        true
    }

    fn worker_copy(&self) -> Box<dyn PixelTransform> {
        Box::new(Self {
            camera: Arc::clone(&self.camera),
            dem: Arc::clone(&self.dem),
            dem_georef: self.dem_georef.clone(),
            map_georef: self.map_georef.clone(),
            options: self.options,
            height_guess: self.height_guess,
            last_ground: Mutex::new(None),
        })
    }
}

/// A transform checked out for one worker
pub enum WorkerTransform<'a> {
    Shared(&'a (dyn PixelTransform + 'static)),
    Owned(Box<dyn PixelTransform>),
}

impl Deref for WorkerTransform<'_> {
    type Target = dyn PixelTransform;

    fn deref(&self) -> &Self::Target {
        match self {
            WorkerTransform::Shared(t) => *t,
            WorkerTransform::Owned(t) => t.as_ref(),
        }
    }
}

/// Hands out transforms to workers: stateless ones are shared, stateful ones
/// are copied on every checkout.
#[derive(Clone)]
pub struct TransformSource {
    prototype: Arc<dyn PixelTransform>,
}

impl TransformSource {
    pub fn new(transform: impl PixelTransform + 'static) -> Self {
        Self {
            prototype: Arc::new(transform),
        }
    }

    pub fn from_shared(prototype: Arc<dyn PixelTransform>) -> Self {
        Self { prototype }
    }

    pub fn identity() -> Self {
        Self::new(IdentityTransform)
    }

    pub fn requires_private_copy(&self) -> bool {
        self.prototype.requires_private_copy()
    }

    pub fn checkout(&self) -> WorkerTransform<'_> {
        if self.prototype.requires_private_copy() {
            WorkerTransform::Owned(self.prototype.worker_copy())
        } else {
            WorkerTransform::Shared(self.prototype.as_ref())
        }
    }
}

impl Default for TransformSource {
    fn default() -> Self {
        Self::identity()
    }
}

impl std::fmt::Debug for TransformSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransformSource")
            .field("requires_private_copy", &self.requires_private_copy())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::PinholeCamera;
    use crate::coordinate::{Datum, GeoTransform};
    use approx::assert_relative_eq;
    use nalgebra::Rotation3;

    fn nadir_camera() -> CameraRef {
        let rotation = Rotation3::from_matrix_unchecked(Matrix3::new(
            1.0, 0.0, 0.0, //
            0.0, -1.0, 0.0, //
            0.0, 0.0, -1.0,
        ));
        Arc::new(
            PinholeCamera::new_ideal(100, 100, 50.0, 50.0, 50.0, 50.0)
                .with_pose(Vector3::new(0.0, 0.0, 100.0), rotation),
        )
    }

    fn planar_dem() -> Arc<Raster<Masked<f32>>> {
        let georef = Georeference::new(GeoTransform::new(-50.0, 50.0, 1.0, -1.0), Datum::Planar);
        Arc::new(Raster::filled(100, 100, Masked::valid(0.0)).with_georef(Some(georef)))
    }

    fn map_transform() -> MapProjectTransform {
        let map = Georeference::new(GeoTransform::new(-40.0, 40.0, 0.5, -0.5), Datum::Planar);
        MapProjectTransform::new(
            nadir_camera(),
            planar_dem(),
            map,
            IntersectionOptions::from_dem_error(4.0),
        )
        .unwrap()
    }

    #[test]
    fn test_homography_inverts() {
        let h = HomographyTransform::new(Matrix3::new(
            1.1, 0.05, 3.0, //
            -0.02, 0.95, -7.0, //
            1e-4, 0.0, 1.0,
        ))
        .unwrap();
        let p = Vector2::new(123.0, 45.0);
        let back = h.reverse(&h.forward(&p).unwrap()).unwrap();
        assert_relative_eq!(back, p, epsilon = 1e-9);
    }

    #[test]
    fn test_singular_homography_rejected() {
        assert!(HomographyTransform::new(Matrix3::zeros()).is_err());
    }

    #[test]
    fn test_map_projection_round_trip() {
        let tx = map_transform();
        // Camera principal point sees ground (0, 0), map pixel (79.5, 79.5)
        let map_pix = tx.forward(&Vector2::new(50.0, 50.0)).unwrap();
        assert_relative_eq!(map_pix, Vector2::new(79.5, 79.5), epsilon = 1e-6);

        let raw = tx.reverse(&map_pix).unwrap();
        assert_relative_eq!(raw, Vector2::new(50.0, 50.0), epsilon = 1e-6);
    }

    #[test]
    fn test_checkout_copies_only_stateful() {
        let shared = TransformSource::identity();
        assert!(matches!(shared.checkout(), WorkerTransform::Shared(_)));

        let stateful = TransformSource::new(map_transform());
        assert!(stateful.requires_private_copy());
        let worker = stateful.checkout();
        assert!(matches!(worker, WorkerTransform::Owned(_)));
        assert!(worker.forward(&Vector2::new(60.0, 40.0)).is_ok());
    }
}
