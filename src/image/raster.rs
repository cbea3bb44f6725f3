//! Owned 8-bit grayscale page image in row-major layout.

use crate::types::BoundingBox;

/// The pipeline's raster input: a single-channel 8-bit buffer, 0 = black ink,
/// 255 = white paper. RGB inputs are converted on construction.
#[derive(Clone, Debug)]
pub struct RasterImage {
    /// Image width in pixels
    pub width: usize,
    /// Image height in pixels
    pub height: usize,
    /// Row-major pixel data, `width * height` bytes
    pub data: Vec<u8>,
}

impl RasterImage {
    /// Construct from an existing grayscale buffer.
    ///
    /// # Panics
    /// Panics when `data.len() != width * height`.
    pub fn from_gray(width: usize, height: usize, data: Vec<u8>) -> Self {
        assert_eq!(
            data.len(),
            width * height,
            "buffer size must match dimensions"
        );
        Self {
            width,
            height,
            data,
        }
    }

    /// Construct from interleaved 8-bit RGB using the BT.601 luma weights.
    pub fn from_rgb8(width: usize, height: usize, rgb: &[u8]) -> Self {
        assert_eq!(rgb.len(), width * height * 3, "RGB buffer size mismatch");
        let data = rgb
            .chunks_exact(3)
            .map(|px| {
                let y = 0.299 * px[0] as f32 + 0.587 * px[1] as f32 + 0.114 * px[2] as f32;
                y.round().clamp(0.0, 255.0) as u8
            })
            .collect();
        Self {
            width,
            height,
            data,
        }
    }

    /// White page of the given size.
    pub fn blank(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            data: vec![255u8; width * height],
        }
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> u8 {
        self.data[y * self.width + x]
    }

    #[inline]
    pub fn row(&self, y: usize) -> &[u8] {
        let start = y * self.width;
        &self.data[start..start + self.width]
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Copy out the pixels under `bbox` as a new image.
    ///
    /// # Panics
    /// Panics when the box does not fit within the image.
    pub fn crop(&self, bbox: &BoundingBox) -> RasterImage {
        assert!(
            bbox.fits_within(self.width, self.height),
            "crop box {:?} outside {}x{}",
            bbox,
            self.width,
            self.height
        );
        let mut data = Vec::with_capacity(bbox.area());
        for y in bbox.y..bbox.y2() {
            data.extend_from_slice(&self.row(y)[bbox.x..bbox.x2()]);
        }
        RasterImage {
            width: bbox.width,
            height: bbox.height,
            data,
        }
    }

    /// 2x box-filter downsample, used to speed up corner detection.
    pub fn downsample_half(&self) -> RasterImage {
        let nw = self.width.div_ceil(2);
        let nh = self.height.div_ceil(2);
        let mut data = Vec::with_capacity(nw * nh);
        for y in 0..nh {
            let y0 = (2 * y).min(self.height - 1);
            let y1 = (2 * y + 1).min(self.height - 1);
            for x in 0..nw {
                let x0 = (2 * x).min(self.width - 1);
                let x1 = (2 * x + 1).min(self.width - 1);
                let sum = self.get(x0, y0) as u16
                    + self.get(x1, y0) as u16
                    + self.get(x0, y1) as u16
                    + self.get(x1, y1) as u16;
                data.push((sum / 4) as u8);
            }
        }
        RasterImage {
            width: nw,
            height: nh,
            data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crop_copies_expected_pixels() {
        let mut img = RasterImage::blank(4, 4);
        img.data[1 * 4 + 2] = 7;
        let crop = img.crop(&BoundingBox::new(2, 1, 2, 2));
        assert_eq!(crop.width, 2);
        assert_eq!(crop.height, 2);
        assert_eq!(crop.get(0, 0), 7);
        assert_eq!(crop.get(1, 1), 255);
    }

    #[test]
    fn downsample_half_averages_blocks() {
        let data = vec![0, 0, 255, 255, 0, 0, 255, 255];
        let img = RasterImage::from_gray(4, 2, data);
        let half = img.downsample_half();
        assert_eq!(half.width, 2);
        assert_eq!(half.height, 1);
        assert_eq!(half.get(0, 0), 0);
        assert_eq!(half.get(1, 0), 255);
    }

    #[test]
    fn rgb_conversion_weights_green_highest() {
        let img = RasterImage::from_rgb8(1, 1, &[0, 255, 0]);
        assert!(img.get(0, 0) > 128);
    }
}
