//! Histogram over line spacings used to find the dominant grid pitches.
//!
//! ECG paper rules a 1 mm minor grid with a darker 5 mm major grid, so the
//! spacing histogram of detected lines shows two clusters whose ratio is
//! close to 5:1. The histogram is smoothed to reduce bin quantization noise
//! and peaks are refined by a weighted mean over a small window.

/// Linear histogram over spacings in pixels.
pub(crate) struct SpacingHistogram {
    bins: Vec<f32>,
    bin_width: f32,
}

impl SpacingHistogram {
    pub(crate) fn new(max_spacing: f32, num_bins: usize) -> Self {
        assert!(num_bins > 0, "spacing histogram requires at least one bin");
        assert!(max_spacing > 0.0, "max spacing must be positive");
        SpacingHistogram {
            bins: vec![0.0; num_bins],
            bin_width: max_spacing / num_bins as f32,
        }
    }

    pub(crate) fn accumulate(&mut self, spacing: f32, weight: f32) {
        if !spacing.is_finite() || spacing <= 0.0 {
            return;
        }
        // Bin centres sit at integer multiples of the bin width.
        let mut idx = (spacing / self.bin_width).round() as usize;
        if idx >= self.bins.len() {
            idx = self.bins.len() - 1;
        }
        self.bins[idx] += weight.max(0.0);
    }

    /// Applies a [1, 2, 1]/4 smoothing kernel with clamped borders.
    pub(crate) fn smooth_121(&mut self) {
        let n = self.bins.len();
        if n <= 1 {
            return;
        }
        let mut smoothed = vec![0.0f32; n];
        for (i, dst) in smoothed.iter_mut().enumerate() {
            let prev = self.bins[i.saturating_sub(1)];
            let curr = self.bins[i];
            let next = self.bins[(i + 1).min(n - 1)];
            *dst = (prev + 2.0 * curr + next) * 0.25;
        }
        self.bins = smoothed;
    }

    /// Finds the two strongest peaks separated by at least `min_separation`
    /// pixels, strongest first. Returns `None` when the histogram is empty
    /// or only one cluster exists.
    pub(crate) fn find_two_peaks(&self, min_separation: f32) -> Option<(usize, usize)> {
        let first = self.argmax()?;
        if self.bins[first] <= 0.0 {
            return None;
        }
        let sep_bins = (min_separation / self.bin_width).ceil() as usize;
        let mut second_idx = None;
        let mut best_val = 0.0f32;
        for (i, &val) in self.bins.iter().enumerate() {
            if i.abs_diff(first) <= sep_bins || val <= 0.0 {
                continue;
            }
            if val > best_val {
                best_val = val;
                second_idx = Some(i);
            }
        }
        Some((first, second_idx?))
    }

    /// Strongest single peak, if any bin is populated.
    pub(crate) fn strongest_peak(&self) -> Option<usize> {
        let idx = self.argmax()?;
        (self.bins[idx] > 0.0).then_some(idx)
    }

    pub(crate) fn peak_weight(&self, index: usize) -> f32 {
        self.bins.get(index).copied().unwrap_or(0.0)
    }

    /// Refines the spacing around a peak with a weighted mean over
    /// `±half_window` bins.
    pub(crate) fn refined_spacing(&self, index: usize, half_window: usize) -> f32 {
        let n = self.bins.len();
        let lo = index.saturating_sub(half_window);
        let hi = (index + half_window).min(n - 1);
        let mut total = 0.0f32;
        let mut acc = 0.0f32;
        for i in lo..=hi {
            let weight = self.bins[i];
            if weight <= 0.0 {
                continue;
            }
            total += weight;
            acc += weight * (i as f32) * self.bin_width;
        }
        if total <= 0.0 {
            return (index as f32) * self.bin_width;
        }
        acc / total
    }

    /// Break a tie between two near-equal peaks by preferring the spacing
    /// closer to `expected`. `tolerance` is the relative strength difference
    /// under which the peaks count as equally strong.
    pub(crate) fn tie_break(
        &self,
        first: usize,
        second: usize,
        expected: f32,
        tolerance: f32,
    ) -> usize {
        let w1 = self.peak_weight(first);
        let w2 = self.peak_weight(second);
        let max = w1.max(w2);
        if max <= 0.0 || (w1 - w2).abs() / max > tolerance {
            return if w1 >= w2 { first } else { second };
        }
        let s1 = self.refined_spacing(first, 1);
        let s2 = self.refined_spacing(second, 1);
        if (s1 - expected).abs() <= (s2 - expected).abs() {
            first
        } else {
            second
        }
    }

    fn argmax(&self) -> Option<usize> {
        let mut best_idx = None;
        let mut best_val = f32::MIN;
        for (i, &val) in self.bins.iter().enumerate() {
            if val > best_val {
                best_val = val;
                best_idx = Some(i);
            }
        }
        best_idx
    }
}
