//! Ruled-line detection via gradient projection profiles.
//!
//! Vertical grid lines produce strong horizontal gradients in every row of
//! their column; accumulating |gx| down each column (and |gy| across each
//! row) turns line detection into 1-D peak picking, which is both fast and
//! robust to the waveform ink crossing the grid.

use crate::image::grad::Grad;

/// Per-axis accumulated gradient response.
pub struct AxisProfiles {
    /// One value per column: summed |gx|, peaks at vertical lines.
    pub columns: Vec<f32>,
    /// One value per row: summed |gy|, peaks at horizontal lines.
    pub rows: Vec<f32>,
}

pub fn axis_profiles(grad: &Grad) -> AxisProfiles {
    let w = grad.gx.width;
    let h = grad.gx.height;
    let mut columns = vec![0.0f32; w];
    let mut rows = vec![0.0f32; h];
    for y in 0..h {
        let gx_row = grad.gx.row(y);
        let gy_row = grad.gy.row(y);
        let mut row_acc = 0.0f32;
        for x in 0..w {
            columns[x] += gx_row[x].abs();
            row_acc += gy_row[x].abs();
        }
        rows[y] = row_acc;
    }
    AxisProfiles { columns, rows }
}

/// Extract line positions from a 1-D profile: local maxima above
/// `thresh_ratio` of the profile maximum, with near neighbours (within
/// `cluster_px`) merged into their weighted mean.
pub fn profile_peaks(profile: &[f32], thresh_ratio: f32, cluster_px: usize) -> Vec<f32> {
    let max = profile.iter().cloned().fold(0.0f32, f32::max);
    if max <= f32::EPSILON {
        return Vec::new();
    }
    let thresh = max * thresh_ratio;

    let mut candidates: Vec<(usize, f32)> = Vec::new();
    for i in 0..profile.len() {
        let v = profile[i];
        if v < thresh {
            continue;
        }
        let left = if i > 0 { profile[i - 1] } else { 0.0 };
        let right = if i + 1 < profile.len() {
            profile[i + 1]
        } else {
            0.0
        };
        if v >= left && v >= right {
            candidates.push((i, v));
        }
    }

    // Merge nearby candidates into weighted cluster centres.
    let mut peaks = Vec::new();
    let mut cluster: Vec<(usize, f32)> = Vec::new();
    for &(pos, weight) in &candidates {
        if let Some(&(last, _)) = cluster.last() {
            if pos - last > cluster_px {
                peaks.push(cluster_mean(&cluster));
                cluster.clear();
            }
        }
        cluster.push((pos, weight));
    }
    if !cluster.is_empty() {
        peaks.push(cluster_mean(&cluster));
    }
    peaks
}

fn cluster_mean(cluster: &[(usize, f32)]) -> f32 {
    let total: f32 = cluster.iter().map(|&(_, w)| w).sum();
    if total <= f32::EPSILON {
        return cluster[0].0 as f32;
    }
    cluster.iter().map(|&(p, w)| p as f32 * w).sum::<f32>() / total
}

/// Consecutive distances between sorted line positions.
pub fn spacings(positions: &[f32]) -> Vec<f32> {
    positions.windows(2).map(|w| w[1] - w[0]).collect()
}

/// Coefficient-of-variation-based regularity of a spacing set: 1 for
/// perfectly even spacing, approaching 0 as the spread grows.
pub fn spacing_regularity(spacings: &[f32]) -> f32 {
    if spacings.len() < 2 {
        return 0.0;
    }
    let mean = spacings.iter().sum::<f32>() / spacings.len() as f32;
    if mean <= f32::EPSILON {
        return 0.0;
    }
    let var = spacings.iter().map(|s| (s - mean).powi(2)).sum::<f32>() / spacings.len() as f32;
    (1.0 - var.sqrt() / mean).clamp(0.0, 1.0)
}
