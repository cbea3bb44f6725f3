//! Signal reconstruction: traced pixel curves to calibrated waveforms.
//!
//! Overview
//! - Maps pixel coordinates to physical units through the grid scale and
//!   paper settings: columns to seconds, rows to millivolts around the
//!   region's isoelectric row.
//! - Resamples the column-rate series onto the uniform target rate with a
//!   band-limited Lanczos kernel ([`resample`]).
//! - Removes baseline wander with a moving-median detrend ([`baseline`]).
//!
//! All leads of a job share one time origin (the left page edge), so their
//! start times land on the same sample grid and remain comparable.

mod baseline;
mod resample;

use crate::config::ReconstructParams;
use crate::trace::PixelCurve;
use crate::types::{CalibrationParams, GridSpec, LeadRegion, Signal};
use log::debug;

/// Converts one traced curve into a calibrated [`Signal`].
pub struct SignalReconstructor {
    params: ReconstructParams,
}

impl SignalReconstructor {
    pub fn new(params: ReconstructParams) -> Self {
        Self { params }
    }

    /// Reconstruct one lead. `zero_row_fraction` (0 = region top) overrides
    /// the default isoelectric row at the vertical centre of the region.
    pub fn reconstruct(
        &self,
        curve: &PixelCurve,
        region: &LeadRegion,
        grid: &GridSpec,
        calibration: &CalibrationParams,
        zero_row_fraction: Option<f32>,
    ) -> Signal {
        let px_per_s = calibration.pixels_per_second(grid.pixels_per_mm);
        let px_per_mv = calibration.pixels_per_mv(grid.pixels_per_mm);
        let zero_row = region.bbox.height as f32 * zero_row_fraction.unwrap_or(0.5);

        // Row coordinates grow downward; voltage grows upward.
        let millivolts: Vec<f32> = curve
            .rows
            .iter()
            .map(|&row| (zero_row - row) / px_per_mv)
            .collect();

        let fs = calibration.sample_rate_hz;
        let mut samples =
            resample::lanczos_resample(&millivolts, px_per_s, fs as f32, self.params.lanczos_a);

        if self.params.baseline_correction {
            let window = (self.params.baseline_window_s * fs as f32).round() as usize;
            baseline::moving_median_detrend(&mut samples, window, self.params.baseline_stride);
        }

        // Shared time origin: snap the region's left edge onto the target
        // sample grid so concurrent leads stay aligned within one sample.
        let start_index = (region.bbox.x as f32 / px_per_s * fs as f32).round();
        let start_time_s = start_index / fs as f32;
        debug!(
            "{}: {} columns -> {} samples, start {:.3} s",
            region.lead,
            curve.rows.len(),
            samples.len(),
            start_time_s
        );

        Signal {
            lead: region.lead,
            samples,
            sample_rate_hz: fs,
            start_time_s,
        }
    }
}
