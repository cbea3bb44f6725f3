//! Job configuration: every tunable threshold of the pipeline in one value.
//!
//! The configuration is passed explicitly into the converter — nothing is
//! read from ambient or global state — so jobs stay pure and parallel-safe.
//! All structs deserialize with defaults, so a JSON config only needs to name
//! the knobs it changes.

use crate::types::CalibrationParams;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Top-level configuration consumed by [`Converter`](crate::convert::Converter).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ConvertConfig {
    /// Calibration used when neither grid detection nor hints supply values.
    pub default_calibration: CalibrationParams,
    /// Wall-clock budget for one collaborator call, milliseconds.
    pub collaborator_timeout_ms: u64,
    pub normalize: NormalizeParams,
    pub calibrate: CalibrateParams,
    pub layout: LayoutParams,
    pub segment: SegmentParams,
    pub tracer: TracerParams,
    pub reconstruct: ReconstructParams,
    pub quality: QualityParams,
}

impl Default for ConvertConfig {
    fn default() -> Self {
        Self {
            default_calibration: CalibrationParams {
                paper_speed_mm_s: 25.0,
                gain_mm_mv: 10.0,
                sample_rate_hz: 500,
            },
            collaborator_timeout_ms: 30_000,
            normalize: NormalizeParams::default(),
            calibrate: CalibrateParams::default(),
            layout: LayoutParams::default(),
            segment: SegmentParams::default(),
            tracer: TracerParams::default(),
            reconstruct: ReconstructParams::default(),
            quality: QualityParams::default(),
        }
    }
}

/// Page normalization (crop, dewarp, denoise).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizeParams {
    /// Minimum corner-detection confidence required before applying the
    /// homography. Below this the full image bounds are used instead.
    pub corner_confidence_thresh: f32,
    /// Content threshold for the page mask, on [0, 1] intensity (pixels
    /// darker than this count as content).
    pub content_thresh: f32,
    /// Bilateral filter radius in pixels. Zero disables denoising.
    pub denoise_radius: usize,
    /// Bilateral range sigma on [0, 1] intensity. Kept small so thin
    /// waveform strokes survive repeated application.
    pub denoise_sigma_intensity: f32,
    /// Bilateral spatial sigma in pixels.
    pub denoise_sigma_space: f32,
    /// Margin added around the detected page, pixels.
    pub crop_margin_px: usize,
}

impl Default for NormalizeParams {
    fn default() -> Self {
        Self {
            corner_confidence_thresh: 0.5,
            content_thresh: 0.85,
            denoise_radius: 2,
            denoise_sigma_intensity: 0.12,
            denoise_sigma_space: 1.5,
            crop_margin_px: 10,
        }
    }
}

/// Grid detection and scale calibration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrateParams {
    /// Minimum number of detected lines per axis before trusting the grid.
    pub min_lines_per_axis: usize,
    /// Gradient response threshold for line peaks, relative to the maximum
    /// axis response.
    pub peak_thresh_ratio: f32,
    /// Maximum distance between peaks merged into one line, pixels.
    pub peak_cluster_px: usize,
    /// Physically sane bounds on the detected scale, px/mm.
    pub min_pixels_per_mm: f32,
    pub max_pixels_per_mm: f32,
    /// Expected minor-grid spacing used to break ties between equally
    /// strong spacing clusters, pixels.
    pub expected_minor_spacing_px: f32,
    /// Accepted deviation of the major/minor spacing ratio from 5.0.
    pub major_minor_ratio_tol: f32,
    /// Search for the printed 1 mV calibration pulse in the left margin.
    pub detect_calibration_pulse: bool,
}

impl Default for CalibrateParams {
    fn default() -> Self {
        Self {
            min_lines_per_axis: 5,
            peak_thresh_ratio: 0.3,
            peak_cluster_px: 3,
            min_pixels_per_mm: 1.0,
            max_pixels_per_mm: 100.0,
            expected_minor_spacing_px: 10.0,
            major_minor_ratio_tol: 1.0,
            detect_calibration_pulse: true,
        }
    }
}

/// Lead-region validation and fallback layout.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutParams {
    /// Minimum usable lead regions; fewer is a fatal `LayoutUnresolved`.
    pub min_leads: usize,
    /// Minimum provider confidence for a region to enter validation.
    pub min_region_confidence: f32,
    /// Maximum distance between a detected region centre and its expected
    /// grid-cell centre, as a fraction of the cell diagonal.
    pub max_center_offset_ratio: f32,
    /// Allow missing/rejected leads to be filled from the uniform layout.
    pub allow_estimated_layout: bool,
    /// Minimum lead-region size for a usable region, millimetres.
    pub min_region_mm: f32,
    /// Fraction of page height reserved for the rhythm strip in the
    /// uniform fallback layout.
    pub rhythm_strip_fraction: f32,
}

impl Default for LayoutParams {
    fn default() -> Self {
        Self {
            min_leads: 12,
            min_region_confidence: 0.3,
            max_center_offset_ratio: 0.35,
            allow_estimated_layout: true,
            min_region_mm: 10.0,
            rhythm_strip_fraction: 0.25,
        }
    }
}

/// Trace-mask cleanup applied to segmentation probabilities.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentParams {
    /// Probability threshold for trace ink.
    pub trace_prob_thresh: f32,
    /// Probability threshold above which a pixel counts as text.
    pub text_prob_thresh: f32,
    /// Connected components smaller than this many pixels are speckle.
    pub min_component_px: usize,
    /// Fraction of a component's bbox that must overlap text pixels before
    /// the component is discarded as a printed label.
    pub text_overlap_ratio: f32,
}

impl Default for SegmentParams {
    fn default() -> Self {
        Self {
            trace_prob_thresh: 0.5,
            text_prob_thresh: 0.5,
            min_component_px: 6,
            text_overlap_ratio: 0.5,
        }
    }
}

/// Tie-break policy when several mask runs are equally plausible. The greedy
/// nearest-to-previous-row rule is the only implemented policy today; the
/// enum keeps the choice explicit and testable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunTieBreak {
    /// Pick the run whose centroid is nearest the previous column's row.
    NearestToPrevious,
}

/// Curve tracing over one lead's binary mask.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TracerParams {
    pub tie_break: RunTieBreak,
    /// Gaps up to this many columns are linearly interpolated; longer gaps
    /// stay explicit invalid spans.
    pub max_interp_gap_columns: usize,
    /// Maximum physically plausible trace slope, vertical mm per horizontal
    /// mm. Jumps beyond it are anomalies.
    pub max_slope_mm_per_mm: f32,
    /// Median filter half-window applied around flagged anomalies, columns.
    pub anomaly_median_half_window: usize,
}

impl Default for TracerParams {
    fn default() -> Self {
        Self {
            tie_break: RunTieBreak::NearestToPrevious,
            max_interp_gap_columns: 25,
            max_slope_mm_per_mm: 40.0,
            anomaly_median_half_window: 2,
        }
    }
}

/// Resampling and baseline correction.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconstructParams {
    /// Lanczos kernel radius (taps on each side) for band-limited
    /// interpolation onto the target sample grid.
    pub lanczos_a: usize,
    /// Moving-median detrend window, seconds. Long relative to one cardiac
    /// cycle, short relative to baseline drift.
    pub baseline_window_s: f32,
    /// Evaluate the running median every this many samples and interpolate
    /// in between.
    pub baseline_stride: usize,
    /// Disable detrending entirely (useful for calibration studies).
    pub baseline_correction: bool,
}

impl Default for ReconstructParams {
    fn default() -> Self {
        Self {
            lanczos_a: 3,
            baseline_window_s: 1.6,
            baseline_stride: 16,
            baseline_correction: true,
        }
    }
}

/// Quality scoring weights and warning thresholds. Deterministic and
/// documented; the defaults mirror the conventional weighting (SNR 0.3,
/// drift 0.2, clipping 0.2, coverage 0.2, grid confidence 0.1).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityParams {
    /// SNR that maps to a full SNR sub-score, dB.
    pub snr_full_scale_db: f32,
    pub weight_snr: f32,
    pub weight_drift: f32,
    pub weight_clipping: f32,
    pub weight_coverage: f32,
    pub weight_grid_confidence: f32,
    /// Coverage below this threshold marks a lead as degraded.
    pub min_coverage: f32,
    /// Samples within this fraction of the vertical extremes count as
    /// clipped.
    pub clip_margin_ratio: f32,
}

impl Default for QualityParams {
    fn default() -> Self {
        Self {
            snr_full_scale_db: 30.0,
            weight_snr: 0.3,
            weight_drift: 0.2,
            weight_clipping: 0.2,
            weight_coverage: 0.2,
            weight_grid_confidence: 0.1,
            min_coverage: 0.8,
            clip_margin_ratio: 0.01,
        }
    }
}

/// Load a configuration from a JSON file.
pub fn load_config(path: &Path) -> Result<ConvertConfig, String> {
    let contents = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config {}: {e}", path.display()))?;
    let config: ConvertConfig = serde_json::from_str(&contents)
        .map_err(|e| format!("Failed to parse config {}: {e}", path.display()))?;
    Ok(config)
}
