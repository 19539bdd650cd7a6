// THEORY:
// A `Frame` is the raw input of one pipeline step: the emulator screen as a
// flat, row-major buffer of palette indices. Retro consoles draw from a small
// fixed palette, so colour identity is exact and blob detection can compare
// indices instead of measuring colour distance.
//
// `Palette` bridges recorded RGB screenshots back into that indexed form by
// handing out indices to colours in first-seen order.

use crate::error::{Result, VisionError};
use image::{Rgb, RgbImage};

/// Palette index of one screen pixel.
pub type ColorIndex = u8;

/// One emulator screen of palette indices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    width: u32,
    height: u32,
    pixels: Vec<ColorIndex>,
}

impl Frame {
    /// Wraps a row-major buffer. The buffer must hold exactly `width * height` entries.
    pub fn new(width: u32, height: u32, pixels: Vec<ColorIndex>) -> Result<Self> {
        let expected = (width * height) as usize;
        if pixels.len() != expected {
            return Err(VisionError::FrameBufferLength {
                width,
                height,
                expected,
                actual: pixels.len(),
            });
        }
        Ok(Self { width, height, pixels })
    }

    /// A frame filled with one colour.
    pub fn filled(width: u32, height: u32, color: ColorIndex) -> Self {
        Self {
            width,
            height,
            pixels: vec![color; (width * height) as usize],
        }
    }

    /// Converts an RGB screenshot, growing `palette` as new colours appear.
    pub fn from_rgb_image(image: &RgbImage, palette: &mut Palette) -> Result<Self> {
        let mut pixels = Vec::with_capacity((image.width() * image.height()) as usize);
        for pixel in image.pixels() {
            pixels.push(palette.index_of(pixel.0)?);
        }
        Self::new(image.width(), image.height(), pixels)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Colour at `(x, y)`. Panics outside the frame.
    pub fn get(&self, x: u32, y: u32) -> ColorIndex {
        assert!(x < self.width && y < self.height, "pixel ({x}, {y}) outside frame");
        self.pixels[(y * self.width + x) as usize]
    }

    /// Mutable colour at `(x, y)`. Panics outside the frame.
    pub fn set(&mut self, x: u32, y: u32, color: ColorIndex) {
        assert!(x < self.width && y < self.height, "pixel ({x}, {y}) outside frame");
        self.pixels[(y * self.width + x) as usize] = color;
    }

    pub fn pixels(&self) -> &[ColorIndex] {
        &self.pixels
    }
}

/// First-seen-order mapping between RGB colours and palette indices.
#[derive(Debug, Clone, Default)]
pub struct Palette {
    colors: Vec<[u8; 3]>,
}

impl Palette {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index of `rgb`, allocating the next free index for unseen colours.
    pub fn index_of(&mut self, rgb: [u8; 3]) -> Result<ColorIndex> {
        if let Some(i) = self.colors.iter().position(|c| *c == rgb) {
            return Ok(i as ColorIndex);
        }
        if self.colors.len() > ColorIndex::MAX as usize {
            return Err(VisionError::PaletteExhausted(rgb));
        }
        self.colors.push(rgb);
        Ok((self.colors.len() - 1) as ColorIndex)
    }

    /// RGB value of a palette index; unknown indices render as a grey ramp.
    pub fn color(&self, index: ColorIndex) -> Rgb<u8> {
        match self.colors.get(index as usize) {
            Some(rgb) => Rgb(*rgb),
            None => Rgb([index, index, index]),
        }
    }

    pub fn len(&self) -> usize {
        self.colors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.colors.is_empty()
    }
}
