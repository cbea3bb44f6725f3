//! Per-lead signal quality metrics.
//!
//! Assessment never mutates a signal; it annotates. The metrics are cheap,
//! deterministic estimates:
//! - SNR from the first-difference noise estimator (white noise doubles its
//!   variance in the difference series, the waveform mostly cancels),
//! - baseline drift as the energy fraction of a one-second moving average,
//! - clipping as the fraction of samples pinned near the region's vertical
//!   extremes,
//! - coverage straight from the valid-sample fraction.
//!
//! The overall score is the documented weighted combination of those four
//! plus the grid confidence, so identical inputs always score identically.

use crate::config::QualityParams;
use crate::types::{QualityMetrics, Signal};

/// Window of the drift estimator, seconds.
const DRIFT_WINDOW_S: f32 = 1.0;

/// Scores one reconstructed lead.
pub struct QualityAssessor {
    params: QualityParams,
}

impl QualityAssessor {
    pub fn new(params: QualityParams) -> Self {
        Self { params }
    }

    /// Assess one signal. `half_range_mv` is half the lead region's vertical
    /// extent in millivolts (the clipping bound); `grid_confidence` comes
    /// from the calibration stage.
    pub fn assess(&self, signal: &Signal, half_range_mv: f32, grid_confidence: f32) -> QualityMetrics {
        let valid: Vec<f32> = signal
            .samples
            .iter()
            .copied()
            .filter(|v| v.is_finite())
            .collect();
        let coverage_ratio = signal.valid_fraction();

        if valid.len() < 4 {
            return QualityMetrics {
                snr_db: 0.0,
                baseline_drift: 1.0,
                clipping_ratio: 0.0,
                coverage_ratio,
                overall_score: 0.0,
            };
        }

        let snr_db = diff_snr_db(&valid);
        let baseline_drift = drift_ratio(&valid, signal.sample_rate_hz);
        let clipping_ratio = if half_range_mv > 0.0 {
            let bound = half_range_mv * (1.0 - self.params.clip_margin_ratio);
            valid.iter().filter(|v| v.abs() >= bound).count() as f32 / valid.len() as f32
        } else {
            0.0
        };

        let snr_score = (snr_db / self.params.snr_full_scale_db).clamp(0.0, 1.0);
        let overall_score = (self.params.weight_snr * snr_score
            + self.params.weight_drift * (1.0 - baseline_drift)
            + self.params.weight_clipping * (1.0 - clipping_ratio)
            + self.params.weight_coverage * coverage_ratio
            + self.params.weight_grid_confidence * grid_confidence.clamp(0.0, 1.0))
        .clamp(0.0, 1.0);

        QualityMetrics {
            snr_db,
            baseline_drift,
            clipping_ratio,
            coverage_ratio,
            overall_score,
        }
    }
}

/// SNR in dB from the first-difference noise estimate.
fn diff_snr_db(valid: &[f32]) -> f32 {
    let signal_var = variance(valid);
    let diffs: Vec<f32> = valid.windows(2).map(|w| w[1] - w[0]).collect();
    let noise_var = variance(&diffs) * 0.5;
    if noise_var <= f32::EPSILON {
        return if signal_var > f32::EPSILON { 60.0 } else { 0.0 };
    }
    (10.0 * (signal_var / noise_var).log10()).clamp(0.0, 60.0)
}

/// Fraction of total signal energy captured by a slow moving average.
fn drift_ratio(valid: &[f32], sample_rate_hz: u32) -> f32 {
    let total_var = variance(valid);
    if total_var <= f32::EPSILON {
        return 0.0;
    }
    let window = ((DRIFT_WINDOW_S * sample_rate_hz as f32) as usize).clamp(2, valid.len());
    let half = window / 2;
    let slow: Vec<f32> = (0..valid.len())
        .map(|i| {
            let lo = i.saturating_sub(half);
            let hi = (i + half).min(valid.len() - 1);
            valid[lo..=hi].iter().sum::<f32>() / (hi - lo + 1) as f32
        })
        .collect();
    (variance(&slow) / total_var).clamp(0.0, 1.0)
}

fn variance(values: &[f32]) -> f32 {
    if values.len() < 2 {
        return 0.0;
    }
    let mean = values.iter().sum::<f32>() / values.len() as f32;
    values.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / values.len() as f32
}
