use ndarray::Zip;

use super::{Block, ImageView};
use crate::error::Result;
use crate::raster::{mask_nodata, BBox2i, Masked, Pixel};

/// Per-pixel function applied to an upstream view
pub struct MapView<V, F> {
    inner: V,
    func: F,
}

impl<V, F, Q> MapView<V, F>
where
    V: ImageView,
    F: Fn(V::Pixel) -> Q + Send + Sync,
    Q: Pixel,
{
    pub fn new(inner: V, func: F) -> Self {
        Self { inner, func }
    }
}

impl<V, F, Q> ImageView for MapView<V, F>
where
    V: ImageView,
    F: Fn(V::Pixel) -> Q + Send + Sync,
    Q: Pixel,
{
    type Pixel = Q;

    fn cols(&self) -> usize {
        self.inner.cols()
    }

    fn rows(&self) -> usize {
        self.inner.rows()
    }

    fn planes(&self) -> usize {
        self.inner.planes()
    }

    fn prerasterize(&self, bbox: &BBox2i) -> Result<Block<Q>> {
        let mut out = Block::filled(*bbox);
        let inside = bbox.crop(&self.inner.bbox());
        if inside.is_empty() {
            return Ok(out);
        }
        let src = self.inner.prerasterize(&inside)?;
        let mut mapped = Block::filled(inside);
        Zip::from(mapped.data_mut())
            .and(src.data())
            .for_each(|dst, &px| *dst = (self.func)(px));
        out.copy_overlap(&mapped);
        Ok(out)
    }
}

/// Masked view of a raw sample view: no-data and NaN become invalid
pub fn create_mask<V>(
    inner: V,
    nodata: Option<f32>,
) -> MapView<V, impl Fn(f32) -> Masked<f32> + Send + Sync>
where
    V: ImageView<Pixel = f32>,
{
    MapView::new(inner, move |v| mask_nodata(v, nodata))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::Raster;
    use crate::view::RasterView;
    use ndarray::array;

    #[test]
    fn test_create_mask() {
        let raw = Raster::from_array(array![[1.0f32, -9999.0], [f32::NAN, 4.0]]);
        let masked = create_mask(RasterView::new(raw), Some(-9999.0));

        let block = masked.prerasterize(&BBox2i::from_size(2, 2)).unwrap();
        assert_eq!(block.get(0, 0), Some(&Masked::valid(1.0)));
        assert!(!block.get(1, 0).unwrap().is_valid());
        assert!(!block.get(0, 1).unwrap().is_valid());
        assert!(block.get(1, 1).unwrap().is_valid());
    }

    #[test]
    fn test_map_outside_domain_uses_default() {
        let src = RasterView::new(Raster::filled(2, 2, 3i32));
        let doubled = MapView::new(src, |v: i32| v * 2 + 1);

        let block = doubled.prerasterize(&BBox2i::new(1, 1, 3, 3)).unwrap();
        assert_eq!(block.get(1, 1), Some(&7));
        assert_eq!(block.get(2, 2), Some(&0));
    }
}
