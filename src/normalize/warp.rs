//! Homography estimation and inverse-mapped resampling.
//!
//! The homography is solved from four point correspondences with the
//! `h33 = 1` normalization; warping always inverse-maps destination pixels
//! into the source and samples bilinearly, so no holes appear.

use crate::image::RasterImage;
use nalgebra::{Matrix3, SMatrix, SVector, Vector3};

const EPS: f32 = 1e-9;

/// Solve the homography mapping each `src[i]` onto `dst[i]`.
///
/// Returns `None` when the correspondences are degenerate (collinear points
/// or a singular system).
pub fn homography_from_points(src: &[[f32; 2]; 4], dst: &[[f32; 2]; 4]) -> Option<Matrix3<f32>> {
    let mut a = SMatrix::<f32, 8, 8>::zeros();
    let mut b = SVector::<f32, 8>::zeros();
    for i in 0..4 {
        let [x, y] = src[i];
        let [u, v] = dst[i];
        let r = 2 * i;
        a[(r, 0)] = x;
        a[(r, 1)] = y;
        a[(r, 2)] = 1.0;
        a[(r, 6)] = -x * u;
        a[(r, 7)] = -y * u;
        b[r] = u;
        a[(r + 1, 3)] = x;
        a[(r + 1, 4)] = y;
        a[(r + 1, 5)] = 1.0;
        a[(r + 1, 6)] = -x * v;
        a[(r + 1, 7)] = -y * v;
        b[r + 1] = v;
    }
    let h = a.lu().solve(&b)?;
    let m = Matrix3::new(h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], 1.0);
    m.iter().all(|v| v.is_finite()).then_some(m)
}

/// Apply a homography to a single point. `None` on a vanishing denominator.
pub fn apply_homography(h: &Matrix3<f32>, p: [f32; 2]) -> Option<[f32; 2]> {
    let v = h * Vector3::new(p[0], p[1], 1.0);
    let w = v[2];
    if !w.is_finite() || w.abs() <= EPS || !v[0].is_finite() || !v[1].is_finite() {
        return None;
    }
    Some([v[0] / w, v[1] / w])
}

/// Warp `src` into a `dst_w × dst_h` image using the homography that maps
/// destination coordinates into source coordinates. Out-of-source samples
/// become white (paper).
pub fn warp_perspective(
    src: &RasterImage,
    dst_to_src: &Matrix3<f32>,
    dst_w: usize,
    dst_h: usize,
) -> RasterImage {
    let mut out = RasterImage::blank(dst_w, dst_h);
    for y in 0..dst_h {
        for x in 0..dst_w {
            if let Some([sx, sy]) = apply_homography(dst_to_src, [x as f32, y as f32]) {
                out.data[y * dst_w + x] = sample_bilinear(src, sx, sy);
            }
        }
    }
    out
}

/// Rotate the image about its centre by `angle_deg` (counter-clockwise),
/// keeping the original dimensions. Used for small residual-rotation
/// corrections, where the cropped corners are negligible.
pub fn rotate_about_center(src: &RasterImage, angle_deg: f32) -> RasterImage {
    let (cx, cy) = (src.width as f32 * 0.5, src.height as f32 * 0.5);
    let rad = angle_deg.to_radians();
    let (sin, cos) = rad.sin_cos();
    let mut out = RasterImage::blank(src.width, src.height);
    for y in 0..src.height {
        for x in 0..src.width {
            // Inverse rotation of the destination pixel.
            let dx = x as f32 - cx;
            let dy = y as f32 - cy;
            let sx = cos * dx + sin * dy + cx;
            let sy = -sin * dx + cos * dy + cy;
            out.data[y * src.width + x] = sample_bilinear(src, sx, sy);
        }
    }
    out
}

/// Bilinear sample with white (255) outside the image.
fn sample_bilinear(img: &RasterImage, x: f32, y: f32) -> u8 {
    if x < 0.0 || y < 0.0 || x > (img.width - 1) as f32 || y > (img.height - 1) as f32 {
        return 255;
    }
    let x0 = x.floor() as usize;
    let y0 = y.floor() as usize;
    let x1 = (x0 + 1).min(img.width - 1);
    let y1 = (y0 + 1).min(img.height - 1);
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;
    let top = img.get(x0, y0) as f32 * (1.0 - fx) + img.get(x1, y0) as f32 * fx;
    let bottom = img.get(x0, y1) as f32 * (1.0 - fx) + img.get(x1, y1) as f32 * fx;
    (top * (1.0 - fy) + bottom * fy).round().clamp(0.0, 255.0) as u8
}
