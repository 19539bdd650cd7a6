// THEORY:
// A `PixelMask` is the shape signature of an entity: a black-and-white bitmap
// the size of the entity's bounding box, plus a cached count of active pixels.
// Every similarity question the engine asks about shape (is this the same blob
// as last frame? does this object belong to that prototype? is this the self?)
// reduces to comparing two masks aligned at their top-left corners.
//
// Masks are position-free: a sprite that moves across the screen
// keeps an identical mask, which is what lets prototypes recognise it anywhere.

/// A fixed-size binary bitmap with a cached active-pixel count.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PixelMask {
    width: u32,
    height: u32,
    /// Number of active pixels.
    size: u32,
    bits: Vec<bool>,
}

impl PixelMask {
    /// An all-inactive mask of the given dimensions.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            size: 0,
            bits: vec![false; width as usize * height as usize],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Number of active pixels.
    pub fn size(&self) -> u32 {
        self.size
    }

    fn index(&self, x: u32, y: u32) -> usize {
        assert!(
            x < self.width && y < self.height,
            "pixel ({x}, {y}) outside {}x{} mask",
            self.width,
            self.height
        );
        (y * self.width + x) as usize
    }

    /// Sets the pixel at `(x, y)` and keeps `size` in step.
    ///
    /// Panics when the coordinate lies outside the mask; callers always derive
    /// coordinates from the mask's own bounding box.
    pub fn set_pixel(&mut self, x: u32, y: u32, value: bool) {
        let index = self.index(x, y);
        match (self.bits[index], value) {
            (false, true) => self.size += 1,
            (true, false) => self.size -= 1,
            _ => {}
        }
        self.bits[index] = value;
    }

    pub fn get_pixel(&self, x: u32, y: u32) -> bool {
        self.bits[self.index(x, y)]
    }

    /// Iterates the coordinates of active pixels in raster order.
    pub fn active_pixels(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        let width = self.width;
        self.bits
            .iter()
            .enumerate()
            .filter(|(_, active)| **active)
            .map(move |(i, _)| (i as u32 % width, i as u32 / width))
    }

    /// Number of pixels active in both masks when aligned at the top-left corner.
    pub fn overlap(&self, other: &PixelMask) -> u32 {
        let width = self.width.min(other.width);
        let height = self.height.min(other.height);
        let mut count = 0;
        for y in 0..height {
            for x in 0..width {
                if self.get_pixel(x, y) && other.get_pixel(x, y) {
                    count += 1;
                }
            }
        }
        count
    }

    /// Overlap as a fraction of the larger mask's active pixels, in `[0, 1]`.
    /// Two empty masks have no overlap.
    pub fn overlap_percent(&self, other: &PixelMask) -> f64 {
        let larger = self.size.max(other.size);
        if larger == 0 {
            return 0.0;
        }
        self.overlap(other) as f64 / larger as f64
    }

    /// Active pixels per pixel of area.
    pub fn density(&self) -> f64 {
        let area = self.width * self.height;
        if area == 0 {
            return 0.0;
        }
        self.size as f64 / area as f64
    }

    /// Resets every pixel to inactive.
    pub fn clear(&mut self) {
        self.bits.iter_mut().for_each(|b| *b = false);
        self.size = 0;
    }
}
