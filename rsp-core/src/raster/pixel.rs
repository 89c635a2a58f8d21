/// Values that can live in a raster or flow through an image view
pub trait Pixel: Copy + Default + Send + Sync + 'static {}

impl<T: Copy + Default + Send + Sync + 'static> Pixel for T {}

/// A pixel value with a validity flag. The default is invalid.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Masked<T> {
    pub value: T,
    pub valid: bool,
}

impl<T> Masked<T> {
    pub fn valid(value: T) -> Self {
        Self { value, valid: true }
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn get(&self) -> Option<&T> {
        self.valid.then_some(&self.value)
    }

    pub fn invalidate(&mut self) {
        self.valid = false;
    }
}

impl<T: Default> Masked<T> {
    pub fn invalid() -> Self {
        Self::default()
    }
}

/// Mask a raw sample: NaN and the no-data value become invalid
pub fn mask_nodata(value: f32, nodata: Option<f32>) -> Masked<f32> {
    if value.is_nan() || nodata.is_some_and(|nd| value == nd) {
        Masked { value, valid: false }
    } else {
        Masked::valid(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_invalid() {
        let m: Masked<[f32; 2]> = Masked::default();
        assert!(!m.is_valid());
        assert!(m.get().is_none());
    }

    #[test]
    fn test_mask_nodata() {
        assert!(!mask_nodata(-9999.0, Some(-9999.0)).is_valid());
        assert!(!mask_nodata(f32::NAN, None).is_valid());
        assert_eq!(mask_nodata(12.5, Some(-9999.0)).get(), Some(&12.5));
    }
}
