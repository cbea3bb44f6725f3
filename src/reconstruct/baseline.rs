//! Baseline-wander removal.
//!
//! A moving median over a window long relative to one cardiac cycle tracks
//! the slow baseline without following the QRS complexes, so subtracting it
//! removes respiration/electrode drift while leaving waveform morphology
//! intact. The median is evaluated on a stride and linearly interpolated in
//! between; exact per-sample medians buy nothing at this window length.

/// Subtract the moving median from `samples` in place. `window` and `stride`
/// are in samples; NaN samples are ignored by the median and left untouched.
pub(crate) fn moving_median_detrend(samples: &mut [f32], window: usize, stride: usize) {
    let n = samples.len();
    if n == 0 || window < 2 {
        return;
    }
    let stride = stride.max(1);
    let half = window / 2;

    // Median at strided anchors.
    let mut anchors: Vec<(usize, f32)> = Vec::new();
    let mut idx = 0usize;
    while idx < n {
        let lo = idx.saturating_sub(half);
        let hi = (idx + half).min(n - 1);
        if let Some(median) = nan_median(&samples[lo..=hi]) {
            anchors.push((idx, median));
        }
        idx += stride;
    }
    if anchors.len() < 2 {
        if let Some(&(_, m)) = anchors.first() {
            for v in samples.iter_mut() {
                *v -= m;
            }
        }
        return;
    }

    // Piecewise-linear baseline through the anchors, clamped at the ends.
    let mut seg = 0usize;
    for (i, v) in samples.iter_mut().enumerate() {
        while seg + 1 < anchors.len() - 1 && anchors[seg + 1].0 < i {
            seg += 1;
        }
        let (x0, y0) = anchors[seg];
        let (x1, y1) = anchors[seg + 1];
        let baseline = if i <= x0 {
            y0
        } else if i >= x1 {
            y1
        } else {
            let t = (i - x0) as f32 / (x1 - x0) as f32;
            y0 + (y1 - y0) * t
        };
        *v -= baseline;
    }
}

fn nan_median(window: &[f32]) -> Option<f32> {
    let mut valid: Vec<f32> = window.iter().copied().filter(|v| !v.is_nan()).collect();
    if valid.is_empty() {
        return None;
    }
    valid.sort_by(f32::total_cmp);
    Some(valid[valid.len() / 2])
}
