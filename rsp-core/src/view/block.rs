use ndarray::{s, Array2};

use crate::error::{Result, RspError};
use crate::raster::{BBox2i, Pixel};

/// A rasterized region of a view, addressed in the view's pixel space
#[derive(Debug, Clone, PartialEq)]
pub struct Block<P> {
    bbox: BBox2i,
    data: Array2<P>,
}

impl<P: Pixel> Block<P> {
    pub fn new(bbox: BBox2i, data: Array2<P>) -> Result<Self> {
        if data.dim() != (bbox.height(), bbox.width()) {
            return Err(RspError::InvalidInput(format!(
                "block data {:?} does not match region {:?}",
                data.dim(),
                bbox
            )));
        }
        Ok(Self { bbox, data })
    }

    /// Block of default pixels
    pub fn filled(bbox: BBox2i) -> Self {
        Self {
            bbox,
            data: Array2::default((bbox.height(), bbox.width())),
        }
    }

    pub fn bbox(&self) -> &BBox2i {
        &self.bbox
    }

    pub fn data(&self) -> &Array2<P> {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut Array2<P> {
        &mut self.data
    }

    pub fn into_data(self) -> Array2<P> {
        self.data
    }

    /// Pixel at absolute `(col, row)`
    pub fn get(&self, col: i32, row: i32) -> Option<&P> {
        if !self.bbox.contains(col, row) {
            return None;
        }
        self.data.get((
            (row - self.bbox.min_y) as usize,
            (col - self.bbox.min_x) as usize,
        ))
    }

    pub fn get_mut(&mut self, col: i32, row: i32) -> Option<&mut P> {
        if !self.bbox.contains(col, row) {
            return None;
        }
        self.data.get_mut((
            (row - self.bbox.min_y) as usize,
            (col - self.bbox.min_x) as usize,
        ))
    }

    /// Copy the part of `src` overlapping this block
    pub fn copy_overlap(&mut self, src: &Block<P>) {
        let overlap = self.bbox.crop(&src.bbox);
        if overlap.is_empty() {
            return;
        }
        let dst_slice = local_slice(&self.bbox, &overlap);
        let src_slice = local_slice(&src.bbox, &overlap);
        self.data
            .slice_mut(s![dst_slice.0..dst_slice.1, dst_slice.2..dst_slice.3])
            .assign(&src.data.slice(s![src_slice.0..src_slice.1, src_slice.2..src_slice.3]));
    }
}

/// Row and column ranges of `inner` relative to `outer`
fn local_slice(outer: &BBox2i, inner: &BBox2i) -> (usize, usize, usize, usize) {
    let r0 = (inner.min_y - outer.min_y) as usize;
    let c0 = (inner.min_x - outer.min_x) as usize;
    (r0, r0 + inner.height(), c0, c0 + inner.width())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_shape_must_match() {
        let err = Block::new(BBox2i::new(0, 0, 3, 2), Array2::<f32>::zeros((3, 3))).unwrap_err();
        assert!(matches!(err, RspError::InvalidInput(_)));
    }

    #[test]
    fn test_absolute_addressing() {
        let data = Array2::from_shape_fn((2, 3), |(r, c)| (10 * r + c) as i32);
        let block = Block::new(BBox2i::new(5, 7, 8, 9), data).unwrap();
        assert_eq!(block.get(5, 7), Some(&0));
        assert_eq!(block.get(7, 8), Some(&12));
        assert_eq!(block.get(8, 8), None);
    }

    #[test]
    fn test_get_mut_writes_in_place() {
        let mut block = Block::<i32>::filled(BBox2i::new(10, 10, 12, 12));
        *block.get_mut(11, 10).unwrap() = 4;
        assert!(block.get_mut(12, 10).is_none());
        assert_eq!(block.data()[[0, 1]], 4);
    }

    #[test]
    fn test_copy_overlap() {
        let mut dest = Block::<i32>::filled(BBox2i::new(0, 0, 4, 4));
        let src = Block::new(BBox2i::new(2, 2, 6, 6), Array2::from_elem((4, 4), 9)).unwrap();
        dest.copy_overlap(&src);
        assert_eq!(dest.get(1, 1), Some(&0));
        assert_eq!(dest.get(2, 2), Some(&9));
        assert_eq!(dest.get(3, 3), Some(&9));
        assert_eq!(dest.data().iter().filter(|&&v| v == 9).count(), 4);
    }
}
