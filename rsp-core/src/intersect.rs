//! Intersection of camera rays with a gridded DEM

use nalgebra::{Vector2, Vector3};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::coordinate::Georeference;
use crate::error::Result;
use crate::raster::{bilinear_masked, dem_height_guess, BBox2i, HeightField, Masked};
use crate::view::ImageView;

/// Along-ray distance used for the finite-difference slope
const FD_STEP: f64 = 0.1;
/// Step halvings tried before giving up on a Newton step
const MAX_DAMPING: usize = 8;

/// Convergence controls for [`RayDemIntersector`]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntersectionOptions {
    /// Final `|height - dem height|` accepted as a hit
    pub height_error_tol: f64,
    /// Residual at which iteration stops early
    pub max_abs_tol: f64,
    /// Relative step size at which iteration stops
    pub max_rel_tol: f64,
    pub num_max_iter: usize,
    /// Sample no-data (and off-grid) heights as zero instead of failing
    pub treat_nodata_as_zero: bool,
}

impl IntersectionOptions {
    /// Tolerances scaled to the expected DEM error, in metres
    pub fn from_dem_error(dem_error: f64) -> Self {
        let height_error_tol = (dem_error / 4.0).max(1.0);
        Self {
            height_error_tol,
            max_abs_tol: height_error_tol / 4.0,
            max_rel_tol: 1e-14,
            num_max_iter: 50,
            treat_nodata_as_zero: false,
        }
    }
}

impl Default for IntersectionOptions {
    fn default() -> Self {
        Self::from_dem_error(0.0)
    }
}

/// Finds where a ray first meets the terrain described by a height field
/// and its georeference.
pub struct RayDemIntersector<'a, H: HeightField + ?Sized> {
    dem: &'a H,
    georef: &'a Georeference,
    options: IntersectionOptions,
}

impl<'a, H: HeightField + ?Sized> RayDemIntersector<'a, H> {
    pub fn new(dem: &'a H, georef: &'a Georeference, options: IntersectionOptions) -> Self {
        Self { dem, georef, options }
    }

    pub fn options(&self) -> &IntersectionOptions {
        &self.options
    }

    /// Height of the DEM under a cartesian point, and the point's own height
    fn heights(&self, point: &Vector3<f64>) -> Option<(f64, f64)> {
        let llh = self.georef.datum().cartesian_to_geodetic(point);
        let dem_height = self
            .georef
            .lonlat_to_pixel(&Vector2::new(llh.x, llh.y))
            .and_then(|pix| self.dem.height_at(&pix));
        match dem_height {
            Some(h) => Some((llh.z, h)),
            None if self.options.treat_nodata_as_zero => Some((llh.z, 0.0)),
            None => None,
        }
    }

    fn residual(&self, origin: &Vector3<f64>, dir: &Vector3<f64>, t: f64) -> Option<f64> {
        let (height, dem_height) = self.heights(&(origin + dir * t))?;
        Some(height - dem_height)
    }

    /// Intersect the ray `origin + t * dir` with the DEM.
    ///
    /// The search starts from the projection of `hint` onto the ray when
    /// given, else from where the ray meets the datum raised to
    /// `height_guess`. Returns `None` when the ray leaves the DEM, meets
    /// no-data or does not converge to within `height_error_tol`.
    pub fn intersect(
        &self,
        origin: &Vector3<f64>,
        dir: &Vector3<f64>,
        hint: Option<&Vector3<f64>>,
        height_guess: f64,
    ) -> Option<Vector3<f64>> {
        let datum = self.georef.datum();
        let mut t = hint
            .map(|h| (h - origin).dot(dir))
            .filter(|t| t.is_finite() && *t > 0.0)
            .or_else(|| {
                datum
                    .intersect_ray(origin, dir, height_guess)
                    .map(|p| (p - origin).dot(dir))
            })?;

        let mut r = self.residual(origin, dir, t)?;
        for _ in 0..self.options.num_max_iter {
            if r.abs() <= self.options.max_abs_tol {
                break;
            }

            let h = FD_STEP.max(1e-9 * t.abs());
            let slope = self
                .residual(origin, dir, t + h)
                .map(|rh| (rh - r) / h)
                .or_else(|| self.residual(origin, dir, t - h).map(|rl| (r - rl) / h))?;
            if slope.abs() < 1e-12 || !slope.is_finite() {
                return None;
            }

            let mut step = -r / slope;
            let mut accepted = None;
            for _ in 0..MAX_DAMPING {
                if let Some(r_new) = self.residual(origin, dir, t + step) {
                    if r_new.abs() < r.abs() {
                        accepted = Some(r_new);
                        break;
                    }
                }
                step *= 0.5;
            }
            let Some(r_new) = accepted else {
                break;
            };

            t += step;
            r = r_new;
            if step.abs() <= self.options.max_rel_tol * t.abs() {
                break;
            }
        }

        (r.abs() <= self.options.height_error_tol).then(|| origin + dir * t)
    }
}

/// Height field read lazily from a masked view, one 2x2 neighbourhood per
/// lookup
pub struct ViewHeightField<'a, V: ImageView<Pixel = Masked<f32>> + ?Sized> {
    view: &'a V,
}

impl<'a, V: ImageView<Pixel = Masked<f32>> + ?Sized> ViewHeightField<'a, V> {
    pub fn new(view: &'a V) -> Self {
        Self { view }
    }
}

impl<V: ImageView<Pixel = Masked<f32>> + ?Sized> HeightField for ViewHeightField<'_, V> {
    fn height_at(&self, pix: &Vector2<f64>) -> Option<f64> {
        if !pix.x.is_finite() || !pix.y.is_finite() {
            return None;
        }
        let (x0, y0) = (pix.x.floor(), pix.y.floor());
        if x0 < 0.0 || y0 < 0.0 || x0 >= self.view.cols() as f64 || y0 >= self.view.rows() as f64 {
            return None;
        }
        let (c0, r0) = (x0 as i32, y0 as i32);
        let block = self
            .view
            .prerasterize(&BBox2i::new(c0, r0, c0 + 2, r0 + 2))
            .ok()?;
        bilinear_masked(&block.data().view(), &Vector2::new(pix.x - x0, pix.y - y0))
    }
}

/// [`dem_height_guess`] for a lazy DEM, reading one row strip per sampled
/// row instead of the whole view
pub fn view_height_guess<V>(view: &V) -> Result<Option<f64>>
where
    V: ImageView<Pixel = Masked<f32>> + ?Sized,
{
    const MAX_SAMPLES_PER_AXIS: usize = 200;

    let (rows, cols) = (view.rows(), view.cols());
    let row_step = (rows / MAX_SAMPLES_PER_AXIS).max(1);
    let col_step = (cols / MAX_SAMPLES_PER_AXIS).max(1);

    let sampled_rows: Vec<usize> = (0..rows).step_by(row_step).collect();
    let sampled_cols = cols.div_ceil(col_step);
    let mut samples = Array2::default((sampled_rows.len(), sampled_cols));
    for (i, &row) in sampled_rows.iter().enumerate() {
        let strip = view.prerasterize(&BBox2i::new(0, row as i32, cols as i32, row as i32 + 1))?;
        for (j, px) in strip.data().row(0).iter().step_by(col_step).enumerate() {
            samples[[i, j]] = *px;
        }
    }
    Ok(dem_height_guess(&samples.view()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinate::{Datum, GeoTransform};
    use crate::raster::Raster;
    use crate::view::RasterView;
    use approx::assert_relative_eq;

    /// 100x100 planar DEM covering x, y in [-50, 50]
    fn georef() -> Georeference {
        Georeference::new(GeoTransform::new(-50.0, 50.0, 1.0, -1.0), Datum::Planar)
    }

    fn flat_dem(height: f32) -> Raster<Masked<f32>> {
        Raster::filled(100, 100, Masked::valid(height))
    }

    fn sloped_dem() -> Raster<Masked<f32>> {
        Raster::from_array(Array2::from_shape_fn((100, 100), |(_, c)| {
            Masked::valid(0.2 * c as f32)
        }))
    }

    #[test]
    fn test_default_tolerances() {
        let opts = IntersectionOptions::from_dem_error(40.0);
        assert_eq!(opts.height_error_tol, 10.0);
        assert_eq!(opts.max_abs_tol, 2.5);
        assert_eq!(opts.num_max_iter, 50);

        let small = IntersectionOptions::from_dem_error(0.5);
        assert_eq!(small.height_error_tol, 1.0);
        assert_eq!(small.max_abs_tol, 0.25);
        assert!(!small.treat_nodata_as_zero);
    }

    #[test]
    fn test_vertical_ray_flat_dem() {
        let dem = flat_dem(0.0);
        let georef = georef();
        let opts = IntersectionOptions::from_dem_error(4.0);
        let isect = RayDemIntersector::new(&dem, &georef, opts);

        let origin = Vector3::new(3.0, -7.0, 100.0);
        let dir = Vector3::new(0.0, 0.0, -1.0);
        let hit = isect.intersect(&origin, &dir, None, 30.0).unwrap();
        assert!(hit.z.abs() <= opts.max_abs_tol);
        assert_relative_eq!(hit.x, 3.0);
        assert_relative_eq!(hit.y, -7.0);
    }

    #[test]
    fn test_oblique_ray_sloped_dem() {
        let dem = sloped_dem();
        let georef = georef();
        let opts = IntersectionOptions::from_dem_error(1.0);
        let isect = RayDemIntersector::new(&dem, &georef, opts);

        let origin = Vector3::new(-20.0, 5.0, 200.0);
        let dir = Vector3::new(0.3, -0.1, -1.0).normalize();
        let hit = isect.intersect(&origin, &dir, None, 0.0).unwrap();

        let pix = georef.lonlat_to_pixel(&Vector2::new(hit.x, hit.y)).unwrap();
        let ground = dem.height_at(&pix).unwrap();
        assert!((hit.z - ground).abs() <= opts.max_abs_tol);
    }

    #[test]
    fn test_hint_gives_same_answer() {
        let dem = sloped_dem();
        let georef = georef();
        let isect = RayDemIntersector::new(&dem, &georef, IntersectionOptions::from_dem_error(1.0));

        let origin = Vector3::new(0.0, 0.0, 150.0);
        let dir = Vector3::new(-0.2, 0.1, -1.0).normalize();
        let cold = isect.intersect(&origin, &dir, None, 0.0).unwrap();
        let hint = cold + Vector3::new(1.0, 1.0, 1.0);
        let warm = isect.intersect(&origin, &dir, Some(&hint), 0.0).unwrap();
        assert!((cold - warm).norm() < 1.0);
    }

    #[test]
    fn test_ray_outside_footprint() {
        let dem = flat_dem(0.0);
        let georef = georef();
        let isect = RayDemIntersector::new(&dem, &georef, IntersectionOptions::default());

        let origin = Vector3::new(200.0, 0.0, 100.0);
        let dir = Vector3::new(0.0, 0.0, -1.0);
        assert!(isect.intersect(&origin, &dir, None, 0.0).is_none());
    }

    #[test]
    fn test_nodata_is_a_miss_unless_zeroed() {
        let dem = Raster::filled(100, 100, Masked::<f32>::invalid());
        let georef = georef();
        let origin = Vector3::new(0.0, 0.0, 100.0);
        let dir = Vector3::new(0.0, 0.0, -1.0);

        let strict = RayDemIntersector::new(&dem, &georef, IntersectionOptions::default());
        assert!(strict.intersect(&origin, &dir, None, 0.0).is_none());

        let opts = IntersectionOptions {
            treat_nodata_as_zero: true,
            ..IntersectionOptions::default()
        };
        let lenient = RayDemIntersector::new(&dem, &georef, opts);
        let hit = lenient.intersect(&origin, &dir, None, 20.0).unwrap();
        assert!(hit.z.abs() <= opts.max_abs_tol);
    }

    #[test]
    fn test_view_height_field_matches_raster() {
        let dem = sloped_dem();
        let view = RasterView::new(dem.clone());
        let lazy = ViewHeightField::new(&view);

        for pix in [Vector2::new(10.25, 3.5), Vector2::new(99.0, 99.0), Vector2::new(0.0, 42.7)] {
            assert_eq!(lazy.height_at(&pix), dem.height_at(&pix));
        }
        assert!(lazy.height_at(&Vector2::new(100.0, 5.0)).is_none());
        assert!(lazy.height_at(&Vector2::new(-0.5, 5.0)).is_none());
    }

    #[test]
    fn test_view_height_guess_matches_raster_guess() {
        let dem = sloped_dem();
        let view = RasterView::new(dem.clone());
        let lazy = view_height_guess(&view).unwrap();
        assert_eq!(lazy, dem_height_guess(&dem.view()));
        assert!(lazy.is_some());
    }
}
