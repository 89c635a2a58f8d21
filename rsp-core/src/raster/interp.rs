use nalgebra::Vector2;
use ndarray::{Array2, ArrayView2};

use super::{Masked, Raster};

/// A height raster that can be sampled at fractional pixel positions
pub trait HeightField {
    /// Interpolated height at `pix`, or `None` when the position is outside
    /// the grid or touches an invalid sample
    fn height_at(&self, pix: &Vector2<f64>) -> Option<f64>;
}

/// Bilinear interpolation over masked samples.
///
/// Every sample carrying a non-zero weight must be valid.
pub fn bilinear_masked(data: &ArrayView2<'_, Masked<f32>>, pix: &Vector2<f64>) -> Option<f64> {
    let (rows, cols) = data.dim();
    if !pix.x.is_finite() || !pix.y.is_finite() || rows == 0 || cols == 0 {
        return None;
    }

    let x0 = pix.x.floor();
    let y0 = pix.y.floor();
    if x0 < 0.0 || y0 < 0.0 || x0 > (cols - 1) as f64 || y0 > (rows - 1) as f64 {
        return None;
    }
    let wx = pix.x - x0;
    let wy = pix.y - y0;
    let (c0, r0) = (x0 as usize, y0 as usize);

    let mut acc = 0.0;
    for (dr, w_r) in [(0usize, 1.0 - wy), (1, wy)] {
        if w_r == 0.0 {
            continue;
        }
        for (dc, w_c) in [(0usize, 1.0 - wx), (1, wx)] {
            if w_c == 0.0 {
                continue;
            }
            let sample = data.get((r0 + dr, c0 + dc))?;
            if !sample.valid {
                return None;
            }
            acc += w_r * w_c * f64::from(sample.value);
        }
    }
    Some(acc)
}

impl HeightField for ArrayView2<'_, Masked<f32>> {
    fn height_at(&self, pix: &Vector2<f64>) -> Option<f64> {
        bilinear_masked(self, pix)
    }
}

impl HeightField for Array2<Masked<f32>> {
    fn height_at(&self, pix: &Vector2<f64>) -> Option<f64> {
        bilinear_masked(&self.view(), pix)
    }
}

impl HeightField for Raster<Masked<f32>> {
    fn height_at(&self, pix: &Vector2<f64>) -> Option<f64> {
        bilinear_masked(&self.view(), pix)
    }
}

/// Median of the valid heights on a regular subsample of the grid.
///
/// Used to seed ray intersection when no previous solution is available.
pub fn dem_height_guess(data: &ArrayView2<'_, Masked<f32>>) -> Option<f64> {
    const MAX_SAMPLES_PER_AXIS: usize = 200;

    let (rows, cols) = data.dim();
    let row_step = (rows / MAX_SAMPLES_PER_AXIS).max(1);
    let col_step = (cols / MAX_SAMPLES_PER_AXIS).max(1);

    let mut heights: Vec<f32> = data
        .slice(ndarray::s![..;row_step, ..;col_step])
        .iter()
        .filter_map(|p| p.get().copied())
        .collect();

    if heights.is_empty() {
        return None;
    }
    heights.sort_by(f32::total_cmp);
    Some(f64::from(heights[heights.len() / 2]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn ramp(rows: usize, cols: usize) -> Array2<Masked<f32>> {
        Array2::from_shape_fn((rows, cols), |(r, c)| Masked::valid((2 * c + 3 * r) as f32))
    }

    #[test]
    fn test_bilinear_on_plane_is_exact() {
        let grid = ramp(5, 5);
        let h = grid.height_at(&Vector2::new(1.25, 2.5)).unwrap();
        assert_relative_eq!(h, 2.0 * 1.25 + 3.0 * 2.5, epsilon = 1e-9);
    }

    #[test]
    fn test_bilinear_at_last_sample() {
        let grid = ramp(5, 5);
        assert_relative_eq!(grid.height_at(&Vector2::new(4.0, 4.0)).unwrap(), 20.0);
        assert!(grid.height_at(&Vector2::new(4.01, 4.0)).is_none());
        assert!(grid.height_at(&Vector2::new(-0.01, 0.0)).is_none());
    }

    #[test]
    fn test_bilinear_rejects_invalid_neighbor() {
        let mut grid = ramp(4, 4);
        grid[[1, 2]].invalidate();
        assert!(grid.height_at(&Vector2::new(1.5, 0.5)).is_none());
        assert!(grid.height_at(&Vector2::new(2.5, 2.5)).is_some());
    }

    #[test]
    fn test_height_guess_is_median_of_valid() {
        let mut grid = Array2::from_elem((3, 3), Masked::valid(10.0f32));
        grid[[0, 0]] = Masked::valid(-500.0);
        grid[[2, 2]] = Masked::invalid();
        assert_eq!(dem_height_guess(&grid.view()), Some(10.0));

        let empty: Array2<Masked<f32>> = Array2::default((3, 3));
        assert_eq!(dem_height_guess(&empty.view()), None);
    }
}
