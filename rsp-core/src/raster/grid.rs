use ndarray::{s, Array2, ArrayView2, ArrayViewMut2};

use super::{mask_nodata, BBox2i, Masked, Pixel};
use crate::coordinate::Georeference;
use crate::error::{Result, RspError};

/// A 2D grid of samples with an optional no-data value and georeference.
///
/// Data is stored row-major; accessors take `(row, col)`.
#[derive(Debug, Clone)]
pub struct Raster<T: Pixel> {
    data: Array2<T>,
    nodata: Option<T>,
    georef: Option<Georeference>,
}

impl<T: Pixel> Raster<T> {
    /// Raster filled with the pixel default
    pub fn new(rows: usize, cols: usize) -> Self {
        Self::from_array(Array2::default((rows, cols)))
    }

    pub fn filled(rows: usize, cols: usize, value: T) -> Self {
        Self::from_array(Array2::from_elem((rows, cols), value))
    }

    pub fn from_array(data: Array2<T>) -> Self {
        Self {
            data,
            nodata: None,
            georef: None,
        }
    }

    pub fn from_vec(data: Vec<T>, rows: usize, cols: usize) -> Result<Self> {
        let array = Array2::from_shape_vec((rows, cols), data).map_err(|e| {
            RspError::InvalidInput(format!("raster of {rows}x{cols}: {e}"))
        })?;
        Ok(Self::from_array(array))
    }

    pub fn with_nodata(mut self, nodata: Option<T>) -> Self {
        self.nodata = nodata;
        self
    }

    pub fn with_georef(mut self, georef: Option<Georeference>) -> Self {
        self.georef = georef;
        self
    }

    pub fn rows(&self) -> usize {
        self.data.nrows()
    }

    pub fn cols(&self) -> usize {
        self.data.ncols()
    }

    /// `(rows, cols)`
    pub fn shape(&self) -> (usize, usize) {
        self.data.dim()
    }

    pub fn bbox(&self) -> BBox2i {
        BBox2i::from_size(self.cols(), self.rows())
    }

    pub fn nodata(&self) -> Option<T> {
        self.nodata
    }

    pub fn georef(&self) -> Option<&Georeference> {
        self.georef.as_ref()
    }

    pub fn get(&self, row: usize, col: usize) -> Option<T> {
        self.data.get((row, col)).copied()
    }

    pub fn set(&mut self, row: usize, col: usize, value: T) -> Result<()> {
        let (rows, cols) = self.shape();
        let cell = self.data.get_mut((row, col)).ok_or_else(|| {
            RspError::InvalidInput(format!(
                "index ({row}, {col}) out of bounds for raster of size ({rows}, {cols})"
            ))
        })?;
        *cell = value;
        Ok(())
    }

    pub fn data(&self) -> &Array2<T> {
        &self.data
    }

    pub fn view(&self) -> ArrayView2<'_, T> {
        self.data.view()
    }

    pub fn view_mut(&mut self) -> ArrayViewMut2<'_, T> {
        self.data.view_mut()
    }

    pub fn into_array(self) -> Array2<T> {
        self.data
    }

    /// Copy of the part of this raster inside `bbox`, clipped to the raster.
    /// The georeference, if any, is cropped to match.
    pub fn crop(&self, bbox: &BBox2i) -> Raster<T> {
        let clipped = bbox.crop(&self.bbox());
        if clipped.is_empty() {
            return Raster::new(0, 0).with_nodata(self.nodata);
        }
        let window = self.data.slice(s![
            clipped.min_y as usize..clipped.max_y as usize,
            clipped.min_x as usize..clipped.max_x as usize
        ]);
        Raster {
            data: window.to_owned(),
            nodata: self.nodata,
            georef: self.georef.as_ref().map(|g| g.crop(&clipped)),
        }
    }
}

impl Raster<f32> {
    /// Masked copy where no-data and NaN samples are invalid
    pub fn to_masked(&self) -> Raster<Masked<f32>> {
        let nodata = self.nodata;
        Raster {
            data: self.data.mapv(|v| mask_nodata(v, nodata)),
            nodata: None,
            georef: self.georef.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinate::{Datum, GeoTransform};
    use nalgebra::Vector2;

    #[test]
    fn test_get_set() {
        let mut r: Raster<f32> = Raster::new(3, 4);
        assert_eq!(r.shape(), (3, 4));
        r.set(2, 3, 7.0).unwrap();
        assert_eq!(r.get(2, 3), Some(7.0));
        assert!(r.get(3, 0).is_none());
        assert!(r.set(0, 4, 1.0).is_err());
    }

    #[test]
    fn test_from_vec_size_mismatch() {
        assert!(Raster::from_vec(vec![1.0f32; 5], 2, 3).is_err());
    }

    #[test]
    fn test_crop_clips_and_shifts_georef() {
        let georef = Georeference::new(GeoTransform::new(0.0, 10.0, 1.0, -1.0), Datum::Planar);
        let data = Array2::from_shape_fn((10, 10), |(r, c)| (r * 10 + c) as f32);
        let r = Raster::from_array(data).with_georef(Some(georef.clone()));

        let crop = r.crop(&BBox2i::new(8, 7, 14, 9));
        assert_eq!(crop.shape(), (2, 2));
        assert_eq!(crop.get(0, 0), Some(78.0));

        let local = crop.georef().unwrap().pixel_to_lonlat(&Vector2::new(1.0, 1.0));
        let global = georef.pixel_to_lonlat(&Vector2::new(9.0, 8.0));
        assert_eq!(local, global);
    }

    #[test]
    fn test_to_masked() {
        let r = Raster::from_vec(vec![1.0, -9999.0, f32::NAN, 4.0], 2, 2)
            .unwrap()
            .with_nodata(Some(-9999.0));
        let m = r.to_masked();
        let valid: Vec<bool> = m.data().iter().map(|p| p.valid).collect();
        assert_eq!(valid, vec![true, false, false, true]);
    }
}
