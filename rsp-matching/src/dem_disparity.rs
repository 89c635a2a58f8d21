//! Low-resolution disparity predicted from the cameras and a reference DEM.
//!
//! Each left low-res pixel is mapped to full resolution, its ray is
//! intersected with the DEM, and the ground point is projected into the
//! right image. Moving the point along the ray by the expected DEM error
//! brackets the disparity, and the bracket width becomes the spread used
//! later to bound the correlation search.

use nalgebra::{Vector2, Vector3};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use rsp_core::camera::CameraRef;
use rsp_core::coordinate::Georeference;
use rsp_core::intersect::{view_height_guess, IntersectionOptions, RayDemIntersector, ViewHeightField};
use rsp_core::progress::ProgressSink;
use rsp_core::raster::{BBox2f, BBox2i, HeightField, Masked, Raster};
use rsp_core::tile::{ExecutionMode, TileScheduler};
use rsp_core::transform::{PixelTransform, TransformSource};
use rsp_core::view::{Block, ImageView, ImageViewRef};
use rsp_core::{Result, RspError};

/// Tiles are kept small so many threads can run at once
pub const DEM_DISPARITY_TILE_SIZE: usize = 64;

/// Offsets along the ray, in units of the DEM error. The first two are the
/// bracket endpoints; the rest are only tried when an endpoint fails.
pub const DEFAULT_BIAS: [f64; 3] = [-1.0, 1.0, 0.0];

/// Tuning of the DEM disparity pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DemDisparityOptions {
    /// Expected vertical error of the DEM, in metres
    pub dem_error: f64,
    /// Evaluate one pixel in every `pixel_sample` along each axis
    pub pixel_sample: usize,
    pub bias: [f64; 3],
    pub tile_size: usize,
    /// Minimum padding, in DEM pixels, around the DEM window of a tile
    pub dem_margin: i32,
    /// Padding as a fraction of the DEM window size, when larger
    pub dem_margin_fraction: f64,
    /// Overrides the tolerances derived from `dem_error`
    pub intersection: Option<IntersectionOptions>,
    pub execution: ExecutionMode,
    /// User search range `[min_x, min_y, max_x, max_y]`; superseded here
    pub search_range: Option<[f64; 4]>,
}

impl Default for DemDisparityOptions {
    fn default() -> Self {
        Self {
            dem_error: 5.0,
            pixel_sample: 2,
            bias: DEFAULT_BIAS,
            tile_size: DEM_DISPARITY_TILE_SIZE,
            dem_margin: 100,
            dem_margin_fraction: 0.1,
            intersection: None,
            execution: ExecutionMode::Parallel,
            search_range: None,
        }
    }
}

impl DemDisparityOptions {
    pub fn validate(&self) -> Result<()> {
        if self.dem_error.is_nan() || self.dem_error < 0.0 {
            return Err(RspError::Config(format!(
                "invalid DEM error {}; it must be non-negative",
                self.dem_error
            )));
        }
        if self.pixel_sample == 0 {
            return Err(RspError::Config("pixel sample must be at least 1".to_string()));
        }
        if self.tile_size == 0 {
            return Err(RspError::Config("tile size must be positive".to_string()));
        }
        if self.dem_margin < 0 || self.dem_margin_fraction.is_nan() || self.dem_margin_fraction < 0.0 {
            return Err(RspError::Config(format!(
                "DEM margin must be non-negative, got {} and {}",
                self.dem_margin, self.dem_margin_fraction
            )));
        }
        Ok(())
    }

    pub fn intersection_options(&self) -> IntersectionOptions {
        self.intersection
            .unwrap_or_else(|| IntersectionOptions::from_dem_error(self.dem_error))
    }
}

/// Predicted disparity and its half-width, both in low-res pixels
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DispEstimate {
    pub disparity: Masked<[f32; 2]>,
    pub spread: Masked<[i32; 2]>,
}

impl DispEstimate {
    pub fn is_valid(&self) -> bool {
        self.disparity.is_valid()
    }
}

/// Everything the pass reads, loaded by the caller
pub struct StereoInputs {
    pub left_camera: CameraRef,
    pub right_camera: CameraRef,
    pub tx_left: TransformSource,
    pub tx_right: TransformSource,
    /// Low-res left image size `(cols, rows)`; the output has this size
    pub left_lowres_size: (usize, usize),
    /// Low-res right image size `(cols, rows)`
    pub right_lowres_size: (usize, usize),
    /// Low-res over full-res size, per axis
    pub downsample_scale: Vector2<f64>,
    pub dem: ImageViewRef<Masked<f32>>,
    pub dem_georef: Option<Georeference>,
}

/// Lazily evaluated low-res disparity, one tile per `prerasterize`
pub struct DemDisparityView {
    left_camera: CameraRef,
    right_camera: CameraRef,
    tx_left: TransformSource,
    tx_right: TransformSource,
    cols: usize,
    rows: usize,
    right_domain: Vector2<f64>,
    scale: Vector2<f64>,
    dem: ImageViewRef<Masked<f32>>,
    dem_georef: Georeference,
    options: DemDisparityOptions,
    intersection: IntersectionOptions,
    height_guess: f64,
}

impl DemDisparityView {
    pub fn new(inputs: StereoInputs, options: DemDisparityOptions) -> Result<Self> {
        options.validate()?;

        let dem_georef = inputs.dem_georef.ok_or_else(|| {
            RspError::Config("the disparity estimation DEM has no georeference".to_string())
        })?;
        let scale = inputs.downsample_scale;
        let positive = |v: f64| v.is_finite() && v > 0.0;
        if !positive(scale.x) || !positive(scale.y) {
            return Err(RspError::Config(format!(
                "downsample scale must be positive, got ({}, {})",
                scale.x, scale.y
            )));
        }

        let height_guess = view_height_guess(inputs.dem.as_ref())?.unwrap_or(0.0);
        debug!("DEM height guess {height_guess}");

        let (cols, rows) = inputs.left_lowres_size;
        let (right_cols, right_rows) = inputs.right_lowres_size;
        Ok(Self {
            left_camera: inputs.left_camera,
            right_camera: inputs.right_camera,
            tx_left: inputs.tx_left,
            tx_right: inputs.tx_right,
            cols,
            rows,
            right_domain: Vector2::new(right_cols as f64, right_rows as f64),
            scale,
            dem: inputs.dem,
            dem_georef,
            intersection: options.intersection_options(),
            options,
            height_guess,
        })
    }

    pub fn options(&self) -> &DemDisparityOptions {
        &self.options
    }

    pub fn height_guess(&self) -> f64 {
        self.height_guess
    }

    /// Whether both cameras can be evaluated from several threads at once
    pub fn is_thread_safe(&self) -> bool {
        self.left_camera.is_thread_safe() && self.right_camera.is_thread_safe()
    }

    /// Ray of a left low-res pixel and its DEM intersection
    fn lowres_to_dem<H: HeightField + ?Sized>(
        &self,
        left_lowres: &Vector2<f64>,
        tx_left: &dyn PixelTransform,
        isect: &RayDemIntersector<'_, H>,
        hint: Option<&Vector3<f64>>,
    ) -> Option<(Vector3<f64>, Vector3<f64>)> {
        let fullres = left_lowres.component_div(&self.scale);
        let raw = tx_left.reverse(&fullres).ok()?;
        let origin = self.left_camera.camera_center(&raw).ok()?;
        let dir = self.left_camera.pixel_to_vector(&raw).ok()?;
        let xyz = isect.intersect(&origin, &dir, hint, self.height_guess)?;
        Some((xyz, dir))
    }

    /// DEM pixel under a ground point, rounded
    fn dem_pixel(&self, xyz: &Vector3<f64>) -> Option<(i32, i32)> {
        let llh = self.dem_georef.datum().cartesian_to_geodetic(xyz);
        let pix = self.dem_georef.lonlat_to_pixel(&Vector2::new(llh.x, llh.y))?;
        Some((pix.x.round() as i32, pix.y.round() as i32))
    }

    /// In-memory DEM window covering every ray of the tile, with its
    /// georeference. `None` when no sample ray meets the DEM.
    fn dem_window(
        &self,
        tile: &BBox2i,
        tx_left: &dyn PixelTransform,
    ) -> Result<Option<(Array2<Masked<f32>>, Georeference)>> {
        let field = ViewHeightField::new(self.dem.as_ref());
        let isect = RayDemIntersector::new(&field, &self.dem_georef, self.intersection);

        let mut dem_box = BBox2i::empty();
        let mut hint = None;
        let mut scan = |samples: Vec<Vector2<f64>>, dem_box: &mut BBox2i| {
            for pix in samples {
                let Some((xyz, _)) = self.lowres_to_dem(&pix, tx_left, &isect, hint.as_ref()) else {
                    continue;
                };
                hint = Some(xyz);
                if let Some((col, row)) = self.dem_pixel(&xyz) {
                    dem_box.grow(col, row);
                }
            }
        };

        scan(diagonal_samples(tile), &mut dem_box);
        if dem_box.is_empty() {
            debug!("no diagonal ray of tile {:?} meets the DEM, probing a grid", tile);
            scan(grid_samples(tile, 5), &mut dem_box);
        }
        if dem_box.is_empty() {
            return Ok(None);
        }

        let relative = (self.options.dem_margin_fraction
            * dem_box.width().max(dem_box.height()) as f64) as i32;
        dem_box.expand(self.options.dem_margin.max(relative));
        let dem_box = dem_box.crop(&self.dem.bbox());
        if dem_box.is_empty() {
            return Ok(None);
        }

        let crop = self.dem.prerasterize(&dem_box)?.into_data();
        Ok(Some((crop, self.dem_georef.crop(&dem_box))))
    }

    fn in_right_domain(&self, pix: &Vector2<f64>) -> bool {
        pix.x >= 0.0 && pix.y >= 0.0 && pix.x < self.right_domain.x && pix.y < self.right_domain.y
    }

    /// Disparity bracket of one left pixel whose ground point is `xyz`
    fn estimate_at(
        &self,
        left_lowres: &Vector2<f64>,
        xyz: &Vector3<f64>,
        dir: &Vector3<f64>,
        tx_right: &dyn PixelTransform,
    ) -> Option<DispEstimate> {
        let mut offsets = Vec::with_capacity(self.options.bias.len());
        let mut succeeded = [false; 3];
        for (k, bias) in self.options.bias.iter().enumerate() {
            let biased = xyz + dir * (bias * self.options.dem_error);
            let right_fullres = match self
                .right_camera
                .point_to_pixel(&biased)
                .and_then(|raw| tx_right.forward(&raw))
            {
                Ok(p) => p,
                Err(_) => continue,
            };
            let right_lowres = right_fullres.component_mul(&self.scale);
            if !self.in_right_domain(&right_lowres) {
                continue;
            }
            offsets.push(Masked::valid(right_lowres - left_lowres));
            succeeded[k] = true;

            if k == 1 && succeeded[0] && succeeded[1] {
                break;
            }
        }
        disparity_estimate(&disparity_range(&offsets))
    }
}

/// Bounding box of the valid offsets; empty when none is valid
pub fn disparity_range(offsets: &[Masked<Vector2<f64>>]) -> BBox2f {
    let mut range = BBox2f::empty();
    for offset in offsets.iter().filter_map(Masked::get) {
        range.grow(offset);
    }
    range
}

/// Rounded bracket midpoint and the bracket half-width rounded up.
///
/// A range that is exactly the origin point carries no information and is
/// treated as a failure, like an empty one.
fn disparity_estimate(range: &BBox2f) -> Option<DispEstimate> {
    if range.is_empty() || (range.min == Vector2::zeros() && range.max == Vector2::zeros()) {
        return None;
    }
    let mid = range.center();
    let half = range.size() / 2.0;
    Some(DispEstimate {
        disparity: Masked::valid([mid.x.round() as f32, mid.y.round() as f32]),
        spread: Masked::valid([half.x.ceil() as i32, half.y.ceil() as i32]),
    })
}

/// Points along both diagonals of a tile, about one every tenth of its size
fn diagonal_samples(tile: &BBox2i) -> Vec<Vector2<f64>> {
    let wid = tile.width().saturating_sub(1) as f64;
    let hgt = tile.height().saturating_sub(1) as f64;
    let dim = ((wid.max(hgt) as usize) / 10).max(1);
    let min = Vector2::new(f64::from(tile.min_x), f64::from(tile.min_y));

    let mut samples = Vec::with_capacity(2 * (dim + 1));
    for i in 0..=dim {
        let f = i as f64 / dim as f64;
        samples.push(min + Vector2::new(f * wid, f * hgt));
    }
    for i in 0..=dim {
        let f = i as f64 / dim as f64;
        samples.push(min + Vector2::new(f * wid, hgt - f * hgt));
    }
    samples
}

/// `n` x `n` evenly spaced points over a tile
fn grid_samples(tile: &BBox2i, n: usize) -> Vec<Vector2<f64>> {
    let wid = tile.width().saturating_sub(1) as f64;
    let hgt = tile.height().saturating_sub(1) as f64;
    let steps = n.max(2) - 1;
    let mut samples = Vec::with_capacity((steps + 1) * (steps + 1));
    for j in 0..=steps {
        for i in 0..=steps {
            samples.push(Vector2::new(
                f64::from(tile.min_x) + wid * i as f64 / steps as f64,
                f64::from(tile.min_y) + hgt * j as f64 / steps as f64,
            ));
        }
    }
    samples
}

impl ImageView for DemDisparityView {
    type Pixel = DispEstimate;

    fn cols(&self) -> usize {
        self.cols
    }

    fn rows(&self) -> usize {
        self.rows
    }

    fn prerasterize(&self, bbox: &BBox2i) -> Result<Block<DispEstimate>> {
        let mut out = Block::filled(*bbox);
        let tile = bbox.crop(&self.bbox());
        if tile.is_empty() {
            return Ok(out);
        }

        let tx_left = self.tx_left.checkout();
        let tx_right = self.tx_right.checkout();

        let Some((dem_crop, georef_crop)) = self.dem_window(&tile, &*tx_left)? else {
            debug!("tile {:?} does not see the DEM", tile);
            return Ok(out);
        };
        let isect = RayDemIntersector::new(&dem_crop, &georef_crop, self.intersection);

        let sample = self.options.pixel_sample as i32;
        for row in tile.min_y..tile.max_y {
            if row.rem_euclid(sample) != 0 {
                continue;
            }
            // The previous row's solution is too far away to seed this one
            let mut hint: Option<Vector3<f64>> = None;

            for col in tile.min_x..tile.max_x {
                if col.rem_euclid(sample) != 0 {
                    continue;
                }
                let left_lowres = Vector2::new(f64::from(col), f64::from(row));
                let Some((xyz, dir)) =
                    self.lowres_to_dem(&left_lowres, &*tx_left, &isect, hint.as_ref())
                else {
                    continue;
                };
                hint = Some(xyz);

                if let Some(estimate) = self.estimate_at(&left_lowres, &xyz, &dir, &*tx_right) {
                    if let Some(px) = out.get_mut(col, row) {
                        *px = estimate;
                    }
                }
            }
        }
        Ok(out)
    }
}

/// The low-res disparity and its spread, at the low-res left size
#[derive(Debug, Clone)]
pub struct DemDisparityProducts {
    pub disparity: Raster<Masked<[f32; 2]>>,
    pub spread: Raster<Masked<[i32; 2]>>,
}

impl DemDisparityProducts {
    pub fn valid_count(&self) -> usize {
        self.disparity.data().iter().filter(|d| d.is_valid()).count()
    }
}

/// Run the DEM disparity pass over the whole low-res left image
pub fn produce_dem_disparity(
    inputs: StereoInputs,
    options: DemDisparityOptions,
    progress: &dyn ProgressSink,
) -> Result<DemDisparityProducts> {
    if let Some(range) = options.search_range {
        warn!(
            "Computing low-resolution disparity from DEM. Will ignore search range {:?}",
            range
        );
    }

    let view = DemDisparityView::new(inputs, options)?;
    let opts = view.options();

    let mode = if view.is_thread_safe() {
        opts.execution
    } else {
        warn!("camera models are not thread-safe, computing disparity on one thread");
        ExecutionMode::Serial
    };

    info!(
        "computing {}x{} low-resolution disparity from DEM (dem_error {}, pixel_sample {})",
        view.cols(),
        view.rows(),
        opts.dem_error,
        opts.pixel_sample
    );
    let scheduler = TileScheduler::new()
        .with_tile_size(opts.tile_size, opts.tile_size)
        .with_mode(mode);
    let estimates = scheduler.rasterize(&view, progress)?;

    let products = DemDisparityProducts {
        disparity: Raster::from_array(estimates.mapv(|e| e.disparity)),
        spread: Raster::from_array(estimates.mapv(|e| e.spread)),
    };
    info!(
        "{} of {} low-resolution pixels have a disparity",
        products.valid_count(),
        estimates.len()
    );
    Ok(products)
}
