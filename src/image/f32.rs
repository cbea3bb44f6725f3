//! Owned single-channel f32 image in row-major layout.
//!
//! Suited for numeric processing (gradients, projection profiles). Values
//! are normalized to [0, 1] when converted from [`RasterImage`].

use super::RasterImage;

#[derive(Clone, Debug)]
pub struct ImageF32 {
    /// Image width in pixels
    pub width: usize,
    /// Image height in pixels
    pub height: usize,
    /// Backing storage in row-major order
    pub data: Vec<f32>,
}

impl ImageF32 {
    /// Construct a zero-initialized buffer of size `width × height`.
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            data: vec![0.0; width * height],
        }
    }

    /// Convert an 8-bit image into [0, 1] floats.
    pub fn from_raster(img: &RasterImage) -> Self {
        Self {
            width: img.width,
            height: img.height,
            data: img.data.iter().map(|&v| v as f32 / 255.0).collect(),
        }
    }

    #[inline]
    pub fn idx(&self, x: usize, y: usize) -> usize {
        y * self.width + x
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> f32 {
        self.data[self.idx(x, y)]
    }

    #[inline]
    pub fn set(&mut self, x: usize, y: usize, v: f32) {
        let i = self.idx(x, y);
        self.data[i] = v;
    }

    #[inline]
    pub fn row(&self, y: usize) -> &[f32] {
        let start = y * self.width;
        &self.data[start..start + self.width]
    }

    #[inline]
    pub fn row_mut(&mut self, y: usize) -> &mut [f32] {
        let start = y * self.width;
        let end = start + self.width;
        &mut self.data[start..end]
    }

    /// Back to 8 bits, clamping to [0, 255].
    pub fn to_raster(&self) -> RasterImage {
        RasterImage {
            width: self.width,
            height: self.height,
            data: self
                .data
                .iter()
                .map(|&v| (v * 255.0).round().clamp(0.0, 255.0) as u8)
                .collect(),
        }
    }
}
