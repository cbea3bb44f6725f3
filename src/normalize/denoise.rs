//! Edge-preserving denoising.
//!
//! A small bilateral filter: spatial Gaussian weights attenuated by an
//! intensity Gaussian, so speckle is averaged away while the sharp dark
//! strokes of the waveform keep their support. Over-smoothing is not
//! separately detectable downstream, so the filter strength is bounded by
//! the radius/sigma limits in [`NormalizeParams`] rather than adapted.

use crate::config::NormalizeParams;
use crate::image::ImageF32;

/// Apply one bilateral pass. A zero radius returns a plain copy.
pub fn bilateral(img: &ImageF32, params: &NormalizeParams) -> ImageF32 {
    let r = params.denoise_radius;
    if r == 0 || img.width == 0 || img.height == 0 {
        return img.clone();
    }
    let sigma_s = params.denoise_sigma_space.max(1e-3);
    let sigma_i = params.denoise_sigma_intensity.max(1e-3);

    // Precomputed spatial kernel for the (2r+1)^2 window.
    let size = 2 * r + 1;
    let mut spatial = vec![0.0f32; size * size];
    for dy in 0..size {
        for dx in 0..size {
            let ddx = dx as f32 - r as f32;
            let ddy = dy as f32 - r as f32;
            spatial[dy * size + dx] = (-(ddx * ddx + ddy * ddy) / (2.0 * sigma_s * sigma_s)).exp();
        }
    }
    let inv_two_sigma_i2 = 1.0 / (2.0 * sigma_i * sigma_i);

    let mut out = ImageF32::new(img.width, img.height);
    for y in 0..img.height {
        for x in 0..img.width {
            let center = img.get(x, y);
            let mut acc = 0.0f32;
            let mut weight_sum = 0.0f32;
            for dy in 0..size {
                let sy = (y + dy).saturating_sub(r).min(img.height - 1);
                for dx in 0..size {
                    let sx = (x + dx).saturating_sub(r).min(img.width - 1);
                    let v = img.get(sx, sy);
                    let di = v - center;
                    let w = spatial[dy * size + dx] * (-di * di * inv_two_sigma_i2).exp();
                    acc += w * v;
                    weight_sum += w;
                }
            }
            out.set(x, y, acc / weight_sum.max(f32::EPSILON));
        }
    }
    out
}
