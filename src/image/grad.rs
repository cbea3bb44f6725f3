//! Sobel gradients with border clamping.
//!
//! Outputs per-pixel `gx`, `gy` and `mag = sqrt(gx^2 + gy^2)`. Used by page
//! corner detection (magnitude) and grid rotation estimation (orientation).
//!
//! Complexity: O(W·H); memory: three float buffers.

use super::ImageF32;

type Kernel3 = [[f32; 3]; 3];

const SOBEL_KERNEL_X: Kernel3 = [[-1.0, 0.0, 1.0], [-2.0, 0.0, 2.0], [-1.0, 0.0, 1.0]];
const SOBEL_KERNEL_Y: Kernel3 = [[-1.0, -2.0, -1.0], [0.0, 0.0, 0.0], [1.0, 2.0, 1.0]];

/// Per-pixel gradient buffers.
#[derive(Clone, Debug)]
pub struct Grad {
    /// Horizontal derivative
    pub gx: ImageF32,
    /// Vertical derivative
    pub gy: ImageF32,
    /// Euclidean magnitude per pixel
    pub mag: ImageF32,
}

/// Compute Sobel gradients on a single-channel float image.
pub fn sobel_gradients(l: &ImageF32) -> Grad {
    let w = l.width;
    let h = l.height;
    let mut gx = ImageF32::new(w, h);
    let mut gy = ImageF32::new(w, h);
    let mut mag = ImageF32::new(w, h);

    if w == 0 || h == 0 {
        return Grad { gx, gy, mag };
    }

    for y in 0..h {
        let y_idx = [y.saturating_sub(1), y, (y + 1).min(h - 1)];
        let rows = [l.row(y_idx[0]), l.row(y_idx[1]), l.row(y_idx[2])];
        let out_gx = gx.row_mut(y);
        let out_gy_start = y * w;
        for x in 0..w {
            let x_idx = [x.saturating_sub(1), x, (x + 1).min(w - 1)];

            let mut sum_x = 0.0;
            let mut sum_y = 0.0;
            for (ky, row) in rows.iter().enumerate() {
                let kx_row = &SOBEL_KERNEL_X[ky];
                let ky_row = &SOBEL_KERNEL_Y[ky];
                sum_x += row[x_idx[0]] * kx_row[0]
                    + row[x_idx[1]] * kx_row[1]
                    + row[x_idx[2]] * kx_row[2];
                sum_y += row[x_idx[0]] * ky_row[0]
                    + row[x_idx[1]] * ky_row[1]
                    + row[x_idx[2]] * ky_row[2];
            }

            out_gx[x] = sum_x;
            gy.data[out_gy_start + x] = sum_y;
            mag.data[out_gy_start + x] = (sum_x * sum_x + sum_y * sum_y).sqrt();
        }
    }

    Grad { gx, gy, mag }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vertical_edge_has_horizontal_gradient() {
        let mut img = ImageF32::new(6, 6);
        for y in 0..6 {
            for x in 3..6 {
                img.set(x, y, 1.0);
            }
        }
        let grad = sobel_gradients(&img);
        assert!(grad.gx.get(3, 3).abs() > 1.0);
        assert!(grad.gy.get(3, 3).abs() < 1e-6);
        assert!(grad.mag.get(3, 3) > 1.0);
        assert!(grad.mag.get(1, 3) < 1e-6);
    }
}
