//! Page corner detection on a downsampled copy.
//!
//! Strong-edge pixels approximate the printed page content; the four extreme
//! points of that set give the quadrilateral used for perspective
//! correction. Confidence combines the covered area and how close the quad
//! is to a rectangle, so a clean flat scan scores near 1 and a sparse or
//! degenerate edge set scores near 0.

use crate::config::NormalizeParams;
use crate::image::grad::sobel_gradients;
use crate::image::{ImageF32, RasterImage};

/// Relative gradient-magnitude threshold for edge pixels.
const EDGE_MAG_RATIO: f32 = 0.25;
/// Minimum fraction of pixels that must be edges before a quad is trusted.
const MIN_EDGE_DENSITY: f32 = 0.002;

/// A detected page quadrilateral in full-resolution pixel coordinates,
/// ordered top-left, top-right, bottom-right, bottom-left.
#[derive(Clone, Copy, Debug)]
pub struct CornerDetection {
    pub corners: [[f32; 2]; 4],
    pub confidence: f32,
}

/// Detect the page's four corners. Runs on a 4x-downsampled copy for speed;
/// returns `None` when too few edge pixels exist to support a quadrilateral.
pub fn detect_page_corners(
    image: &RasterImage,
    params: &NormalizeParams,
) -> Option<CornerDetection> {
    let small = image.downsample_half().downsample_half();
    if small.width < 8 || small.height < 8 {
        return None;
    }
    let gray = ImageF32::from_raster(&small);
    let grad = sobel_gradients(&gray);

    let max_mag = grad.mag.data.iter().cloned().fold(0.0f32, f32::max);
    if max_mag <= f32::EPSILON {
        return None;
    }
    let thresh = max_mag * EDGE_MAG_RATIO;

    // Content pixels are either strong edges or ink darker than the content
    // threshold; both mark printed page area.
    let mut points: Vec<[f32; 2]> = Vec::new();
    for y in 0..grad.mag.height {
        let row = grad.mag.row(y);
        for (x, &m) in row.iter().enumerate() {
            if m >= thresh || gray.get(x, y) < params.content_thresh {
                points.push([x as f32, y as f32]);
            }
        }
    }
    let density = points.len() as f32 / (small.width * small.height) as f32;
    if density < MIN_EDGE_DENSITY {
        return None;
    }

    let quad = extreme_corners(&points);
    let quad = order_corners(quad);

    let area = quad_area(&quad);
    let image_area = (small.width * small.height) as f32;
    if area < image_area * 0.05 {
        return None;
    }

    let area_ratio = (area / image_area).clamp(0.0, 1.0);
    let rect = rectangularity(&quad);
    let confidence = (area_ratio * rect).clamp(0.0, 1.0);

    // Scale back to full resolution (two 2x downsample steps).
    let scale_x = image.width as f32 / small.width as f32;
    let scale_y = image.height as f32 / small.height as f32;
    let corners = quad.map(|p| [p[0] * scale_x, p[1] * scale_y]);

    Some(CornerDetection {
        corners,
        confidence,
    })
}

/// Four extreme points of a point set: the minimizers/maximizers of
/// `x + y` and `y - x` pick the corner-most points of a roughly
/// quadrilateral region.
fn extreme_corners(points: &[[f32; 2]]) -> [[f32; 2]; 4] {
    let mut tl = points[0];
    let mut tr = points[0];
    let mut br = points[0];
    let mut bl = points[0];
    for &p in points {
        if p[0] + p[1] < tl[0] + tl[1] {
            tl = p;
        }
        if p[1] - p[0] < tr[1] - tr[0] {
            tr = p;
        }
        if p[0] + p[1] > br[0] + br[1] {
            br = p;
        }
        if p[1] - p[0] > bl[1] - bl[0] {
            bl = p;
        }
    }
    [tl, tr, br, bl]
}

/// Re-order four points to [top-left, top-right, bottom-right, bottom-left].
pub(crate) fn order_corners(mut corners: [[f32; 2]; 4]) -> [[f32; 2]; 4] {
    corners.sort_by(|a, b| a[1].total_cmp(&b[1]));
    let (mut top, mut bottom) = ([corners[0], corners[1]], [corners[2], corners[3]]);
    if top[0][0] > top[1][0] {
        top.swap(0, 1);
    }
    if bottom[0][0] > bottom[1][0] {
        bottom.swap(0, 1);
    }
    [top[0], top[1], bottom[1], bottom[0]]
}

/// Shoelace area of the quadrilateral.
fn quad_area(q: &[[f32; 2]; 4]) -> f32 {
    let mut acc = 0.0;
    for i in 0..4 {
        let a = q[i];
        let b = q[(i + 1) % 4];
        acc += a[0] * b[1] - b[0] * a[1];
    }
    (acc * 0.5).abs()
}

/// How rectangular the quad is: its area relative to the area of its
/// axis-aligned bounding box. 1.0 for an axis-aligned rectangle.
fn rectangularity(q: &[[f32; 2]; 4]) -> f32 {
    let min_x = q.iter().map(|p| p[0]).fold(f32::INFINITY, f32::min);
    let max_x = q.iter().map(|p| p[0]).fold(f32::NEG_INFINITY, f32::max);
    let min_y = q.iter().map(|p| p[1]).fold(f32::INFINITY, f32::min);
    let max_y = q.iter().map(|p| p[1]).fold(f32::NEG_INFINITY, f32::max);
    let bbox = (max_x - min_x) * (max_y - min_y);
    if bbox <= f32::EPSILON {
        return 0.0;
    }
    (quad_area(q) / bbox).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_corners_handles_shuffled_input() {
        let shuffled = [
            [100.0, 100.0], // br
            [0.0, 100.0],   // bl
            [100.0, 0.0],   // tr
            [0.0, 0.0],     // tl
        ];
        let ordered = order_corners(shuffled);
        assert_eq!(ordered[0], [0.0, 0.0]);
        assert_eq!(ordered[1], [100.0, 0.0]);
        assert_eq!(ordered[2], [100.0, 100.0]);
        assert_eq!(ordered[3], [0.0, 100.0]);
    }

    #[test]
    fn rectangle_is_fully_rectangular() {
        let q = [[0.0, 0.0], [10.0, 0.0], [10.0, 5.0], [0.0, 5.0]];
        assert!((rectangularity(&q) - 1.0).abs() < 1e-6);
        assert!((quad_area(&q) - 50.0).abs() < 1e-4);
    }

    #[test]
    fn blank_image_yields_no_corners() {
        let img = RasterImage::blank(64, 64);
        assert!(detect_page_corners(&img, &NormalizeParams::default()).is_none());
    }

    #[test]
    fn framed_content_yields_confident_quad() {
        // Dark frame around the interior, like a gridded page filling the image.
        let mut img = RasterImage::blank(128, 96);
        for x in 8..120 {
            img.data[8 * 128 + x] = 0;
            img.data[87 * 128 + x] = 0;
        }
        for y in 8..88 {
            img.data[y * 128 + 8] = 0;
            img.data[y * 128 + 119] = 0;
        }
        let det = detect_page_corners(&img, &NormalizeParams::default()).expect("quad");
        assert!(det.confidence > 0.5, "confidence={}", det.confidence);
        assert!(det.corners[0][0] < 48.0 && det.corners[0][1] < 48.0);
    }
}
