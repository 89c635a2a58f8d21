use nalgebra::Vector2;

/// Integer pixel rectangle, half-open: `[min_x, max_x) x [min_y, max_y)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BBox2i {
    pub min_x: i32,
    pub min_y: i32,
    pub max_x: i32,
    pub max_y: i32,
}

impl BBox2i {
    pub fn new(min_x: i32, min_y: i32, max_x: i32, max_y: i32) -> Self {
        Self { min_x, min_y, max_x, max_y }
    }

    /// Box covering a full raster of the given size
    pub fn from_size(cols: usize, rows: usize) -> Self {
        Self::new(0, 0, cols as i32, rows as i32)
    }

    /// A box containing nothing; growing it by a pixel yields that pixel
    pub fn empty() -> Self {
        Self::new(i32::MAX, i32::MAX, i32::MIN, i32::MIN)
    }

    pub fn is_empty(&self) -> bool {
        self.max_x <= self.min_x || self.max_y <= self.min_y
    }

    pub fn width(&self) -> usize {
        if self.is_empty() { 0 } else { (self.max_x - self.min_x) as usize }
    }

    pub fn height(&self) -> usize {
        if self.is_empty() { 0 } else { (self.max_y - self.min_y) as usize }
    }

    pub fn area(&self) -> usize {
        self.width() * self.height()
    }

    pub fn contains(&self, col: i32, row: i32) -> bool {
        col >= self.min_x && col < self.max_x && row >= self.min_y && row < self.max_y
    }

    /// Smallest box covering both this box and the pixel `(col, row)`
    pub fn grow(&mut self, col: i32, row: i32) {
        self.min_x = self.min_x.min(col);
        self.min_y = self.min_y.min(row);
        self.max_x = self.max_x.max(col.saturating_add(1));
        self.max_y = self.max_y.max(row.saturating_add(1));
    }

    /// Grow by `margin` pixels on every side. An empty box stays empty.
    pub fn expand(&mut self, margin: i32) {
        if self.is_empty() {
            return;
        }
        self.min_x = self.min_x.saturating_sub(margin);
        self.min_y = self.min_y.saturating_sub(margin);
        self.max_x = self.max_x.saturating_add(margin);
        self.max_y = self.max_y.saturating_add(margin);
    }

    /// Intersection with `other`
    pub fn crop(&self, other: &BBox2i) -> BBox2i {
        let cropped = BBox2i::new(
            self.min_x.max(other.min_x),
            self.min_y.max(other.min_y),
            self.max_x.min(other.max_x),
            self.max_y.min(other.max_y),
        );
        if cropped.is_empty() { BBox2i::empty() } else { cropped }
    }

    pub fn intersects(&self, other: &BBox2i) -> bool {
        !self.crop(other).is_empty()
    }

    /// Same box shifted by `(dx, dy)`
    pub fn translated(&self, dx: i32, dy: i32) -> BBox2i {
        if self.is_empty() {
            return *self;
        }
        BBox2i::new(self.min_x + dx, self.min_y + dy, self.max_x + dx, self.max_y + dy)
    }
}

/// Real-valued rectangle with inclusive bounds, used for disparity ranges
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BBox2f {
    pub min: Vector2<f64>,
    pub max: Vector2<f64>,
}

impl BBox2f {
    pub fn new(min: Vector2<f64>, max: Vector2<f64>) -> Self {
        Self { min, max }
    }

    pub fn empty() -> Self {
        Self {
            min: Vector2::repeat(f64::INFINITY),
            max: Vector2::repeat(f64::NEG_INFINITY),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y
    }

    pub fn grow(&mut self, p: &Vector2<f64>) {
        self.min = self.min.inf(p);
        self.max = self.max.sup(p);
    }

    pub fn size(&self) -> Vector2<f64> {
        if self.is_empty() { Vector2::zeros() } else { self.max - self.min }
    }

    pub fn center(&self) -> Vector2<f64> {
        (self.min + self.max) / 2.0
    }
}

impl Default for BBox2f {
    fn default() -> Self {
        Self::empty()
    }
}
