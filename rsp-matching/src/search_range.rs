use nalgebra::Vector2;
use tracing::debug;

use rsp_core::raster::{BBox2f, Masked, Raster};
use rsp_core::{Result, RspError};

/// Full-resolution correlation search range implied by a low-res disparity
/// and its spread.
///
/// Each valid pixel contributes `disparity ± spread`; the union is scaled
/// back to full resolution (`scale` is low-res over full-res) and rounded
/// outward. `None` when no pixel is valid.
pub fn estimate_search_range(
    disparity: &Raster<Masked<[f32; 2]>>,
    spread: &Raster<Masked<[i32; 2]>>,
    scale: Vector2<f64>,
) -> Result<Option<BBox2f>> {
    if disparity.shape() != spread.shape() {
        return Err(RspError::InvalidInput(format!(
            "disparity is {:?} but spread is {:?}",
            disparity.shape(),
            spread.shape()
        )));
    }
    if scale.x <= 0.0 || scale.y <= 0.0 || scale.x.is_nan() || scale.y.is_nan() {
        return Err(RspError::Config(format!(
            "downsample scale must be positive, got ({}, {})",
            scale.x, scale.y
        )));
    }

    let mut lowres = BBox2f::empty();
    for (d, s) in disparity.data().iter().zip(spread.data().iter()) {
        let (Some(d), Some(s)) = (d.get(), s.get()) else {
            continue;
        };
        let d = Vector2::new(f64::from(d[0]), f64::from(d[1]));
        let s = Vector2::new(f64::from(s[0]), f64::from(s[1]));
        lowres.grow(&(d - s));
        lowres.grow(&(d + s));
    }
    if lowres.is_empty() {
        return Ok(None);
    }

    let min = lowres.min.component_div(&scale).map(f64::floor);
    let max = lowres.max.component_div(&scale).map(f64::ceil);
    debug!("low-res range {:?} gives full-res search range {:?} .. {:?}", lowres, min, max);
    Ok(Some(BBox2f::new(min, max)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn valid<T>(v: T) -> Masked<T> {
        Masked::valid(v)
    }

    #[test]
    fn test_range_covers_spread() {
        let disparity = Raster::from_array(array![
            [valid([5.0f32, 0.0]), Masked::default()],
            [valid([3.0, -1.0]), valid([6.0, 1.0])]
        ]);
        let spread = Raster::from_array(array![
            [valid([1i32, 0]), valid([50, 50])],
            [valid([2, 1]), valid([1, 1])]
        ]);

        let range = estimate_search_range(&disparity, &spread, Vector2::new(0.5, 0.5))
            .unwrap()
            .unwrap();
        assert_eq!(range.min, Vector2::new(2.0, -4.0));
        assert_eq!(range.max, Vector2::new(14.0, 4.0));
    }

    #[test]
    fn test_no_valid_pixels() {
        let disparity = Raster::<Masked<[f32; 2]>>::new(3, 3);
        let spread = Raster::<Masked<[i32; 2]>>::new(3, 3);
        let range = estimate_search_range(&disparity, &spread, Vector2::new(1.0, 1.0)).unwrap();
        assert!(range.is_none());
    }

    #[test]
    fn test_shape_mismatch() {
        let disparity = Raster::<Masked<[f32; 2]>>::new(3, 3);
        let spread = Raster::<Masked<[i32; 2]>>::new(3, 4);
        assert!(estimate_search_range(&disparity, &spread, Vector2::new(1.0, 1.0)).is_err());
    }
}
