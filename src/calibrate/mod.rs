//! Grid detection and pixel-to-physical-unit calibration.
//!
//! Overview
//! - Accumulates gradient projection profiles over both axes and extracts
//!   ruled-line positions ([`lines`]).
//! - Clusters consecutive line spacings into a histogram; the dominant
//!   cluster is the 1 mm minor grid, the secondary the 5 mm major grid, and
//!   the ≈5:1 ratio between them validates the detection ([`spacing`]).
//! - Estimates residual grid rotation from the gradient-orientation
//!   distribution and corrects it with a small affine rotation (not a second
//!   homography).
//! - Merges caller hints over detected/default paper settings. Detected grid
//!   scale is always the one used for pixel→mm conversion.
//!
//! Failure never aborts the job here: an unusable or implausible grid falls
//! back to the default calibration with `GridSpec::confidence ≤ 0.3` and a
//! quality flag, surfaced to the caller rather than silently swallowed.

mod lines;
mod spacing;

pub use lines::{axis_profiles, profile_peaks, spacing_regularity, AxisProfiles};

use crate::config::CalibrateParams;
use crate::image::grad::{sobel_gradients, Grad};
use crate::image::{ImageF32, RasterImage};
use crate::normalize::rotate_about_center;
use crate::types::{CalibrationHints, CalibrationParams, GridSpec, QualityFlag};
use log::{debug, warn};
use spacing::SpacingHistogram;

/// Rotation below this is not worth resampling the page for.
const ROTATION_CORRECT_THRESH_DEG: f32 = 0.5;
/// Once a correction starts, re-estimate and re-correct until the residual
/// drops below this; a larger residual tilts the ruled lines across the page
/// width and smears the projection-profile peaks.
const ROTATION_RESIDUAL_DEG: f32 = 0.1;
const MAX_ROTATION_PASSES: usize = 4;
/// Grid angles beyond this are treated as texture, not grid lines.
const ROTATION_MAX_DEG: f32 = 10.0;
/// Orientation histogram resolution for the rotation estimate.
const ROTATION_BIN_DEG: f32 = 0.25;
/// Relative magnitude floor for orientation votes. Kept low on purpose: the
/// ruled lines are faint next to the waveform ink, and a high floor leaves
/// only ink edges to vote.
const ROTATION_MAG_RATIO: f32 = 0.05;
/// Standard ECG page width assumed when estimating scale without a grid, mm.
const FALLBACK_PAGE_WIDTH_MM: f32 = 250.0;
/// Printed calibration pulse amplitude, mV.
const PULSE_AMPLITUDE_MV: f32 = 1.0;

/// Everything the calibrator derives for one page.
#[derive(Clone, Debug)]
pub struct Calibration {
    pub grid: GridSpec,
    pub params: CalibrationParams,
    /// Page with residual rotation corrected, when a correction was applied.
    /// Downstream stages use this image when present.
    pub corrected: Option<RasterImage>,
    pub flags: Vec<QualityFlag>,
    /// Height of the detected 1 mV calibration pulse, pixels.
    pub pulse_height_px: Option<f32>,
}

/// Detects the ruled grid and produces the pixel→(time, voltage) mapping.
pub struct GridCalibrator {
    params: CalibrateParams,
    defaults: CalibrationParams,
}

impl GridCalibrator {
    pub fn new(params: CalibrateParams, defaults: CalibrationParams) -> Self {
        Self { params, defaults }
    }

    pub fn calibrate(&self, page: &RasterImage, hints: &CalibrationHints) -> Calibration {
        let mut flags = Vec::new();

        let gray = ImageF32::from_raster(page);
        let grad = sobel_gradients(&gray);

        // Residual rotation first: spacing estimates sharpen once the grid
        // is axis-aligned. Correction repeats until the residual is
        // negligible; every pass resamples the original page exactly once,
        // so iterating does not compound interpolation blur.
        let mut residual_deg = estimate_rotation_deg(&grad);
        let mut rotation_deg = 0.0f32;
        let mut working = page.clone();
        let mut corrected = None;
        let mut grad = grad;
        if residual_deg.abs() > ROTATION_CORRECT_THRESH_DEG {
            for _ in 0..MAX_ROTATION_PASSES {
                if residual_deg.abs() <= ROTATION_RESIDUAL_DEG {
                    break;
                }
                rotation_deg += residual_deg;
                debug!(
                    "correcting residual grid rotation of {residual_deg:.2} deg \
                     ({rotation_deg:.2} total)"
                );
                let rotated = rotate_about_center(page, -rotation_deg);
                grad = sobel_gradients(&ImageF32::from_raster(&rotated));
                working = rotated.clone();
                corrected = Some(rotated);
                residual_deg = estimate_rotation_deg(&grad);
            }
        }

        let profiles = axis_profiles(&grad);
        let col_peaks = profile_peaks(
            &profiles.columns,
            self.params.peak_thresh_ratio,
            self.params.peak_cluster_px,
        );
        let row_peaks = profile_peaks(
            &profiles.rows,
            self.params.peak_thresh_ratio,
            self.params.peak_cluster_px,
        );

        let grid = if col_peaks.len() < self.params.min_lines_per_axis
            || row_peaks.len() < self.params.min_lines_per_axis
        {
            warn!(
                "grid not detected ({} vertical, {} horizontal lines), using default calibration",
                col_peaks.len(),
                row_peaks.len()
            );
            flags.push(QualityFlag::DefaultCalibration);
            self.fallback_grid(&working)
        } else {
            match self.grid_from_peaks(&col_peaks, &row_peaks, rotation_deg) {
                Some(spec) => {
                    if spec.pixels_per_mm < self.params.min_pixels_per_mm
                        || spec.pixels_per_mm > self.params.max_pixels_per_mm
                    {
                        warn!(
                            "detected scale {:.2} px/mm outside plausible bounds, using default",
                            spec.pixels_per_mm
                        );
                        flags.push(QualityFlag::CalibrationImplausible);
                        self.fallback_grid(&working)
                    } else {
                        if spec.confidence < 0.5 {
                            flags.push(QualityFlag::LowGridConfidence);
                        }
                        spec
                    }
                }
                None => {
                    warn!("no dominant grid spacing found, using default calibration");
                    flags.push(QualityFlag::DefaultCalibration);
                    self.fallback_grid(&working)
                }
            }
        };
        debug!(
            "grid: {:.2} px/mm, rotation {:.2} deg, confidence {:.2}",
            grid.pixels_per_mm, grid.rotation_deg, grid.confidence
        );

        // Paper settings: hints override detection, detection overrides
        // defaults. The detected px/mm always stays in force.
        let mut params = CalibrationParams {
            paper_speed_mm_s: hints.paper_speed_mm_s.unwrap_or(self.defaults.paper_speed_mm_s),
            gain_mm_mv: hints.gain_mm_mv.unwrap_or(self.defaults.gain_mm_mv),
            sample_rate_hz: hints.sample_rate_hz.unwrap_or(self.defaults.sample_rate_hz),
        };

        let mut pulse_height_px = None;
        if self.params.detect_calibration_pulse && hints.gain_mm_mv.is_none() {
            if let Some(height_px) = detect_calibration_pulse(&working, grid.pixels_per_mm) {
                let gain = height_px / grid.pixels_per_mm / PULSE_AMPLITUDE_MV;
                if (4.0..=25.0).contains(&gain) {
                    debug!("calibration pulse {height_px:.1} px -> gain {gain:.1} mm/mV");
                    params.gain_mm_mv = gain;
                    pulse_height_px = Some(height_px);
                }
            }
        }

        validate_paper_settings(&params);

        Calibration {
            grid,
            params,
            corrected,
            flags,
            pulse_height_px,
        }
    }

    fn grid_from_peaks(
        &self,
        col_peaks: &[f32],
        row_peaks: &[f32],
        rotation_deg: f32,
    ) -> Option<GridSpec> {
        let col_spacings = lines::spacings(col_peaks);
        let row_spacings = lines::spacings(row_peaks);

        let max_spacing = (self.params.expected_minor_spacing_px * 20.0).max(50.0);
        let mut hist = SpacingHistogram::new(max_spacing, max_spacing.ceil() as usize);
        for &s in col_spacings.iter().chain(row_spacings.iter()) {
            hist.accumulate(s, 1.0);
        }
        hist.smooth_121();

        let expected = self.params.expected_minor_spacing_px;
        let minor = match hist.find_two_peaks(expected * 1.5) {
            Some((first, second)) => {
                let s1 = hist.refined_spacing(first, 1);
                let s2 = hist.refined_spacing(second, 1);
                let (minor_s, major_s) = if s1 <= s2 { (s1, s2) } else { (s2, s1) };
                let ratio = major_s / minor_s.max(f32::EPSILON);
                if (ratio - 5.0).abs() <= self.params.major_minor_ratio_tol {
                    // Ratio confirms the minor/major hypothesis.
                    minor_s
                } else {
                    // Clusters disagree with the 5:1 model; fall back to the
                    // stronger cluster with the expected-spacing tie-break.
                    let chosen = hist.tie_break(first, second, expected, 0.1);
                    resolve_minor(hist.refined_spacing(chosen, 1), expected)
                }
            }
            None => resolve_minor(hist.refined_spacing(hist.strongest_peak()?, 1), expected),
        };
        if minor <= f32::EPSILON {
            return None;
        }

        let n_score = |n: usize| (n as f32 / 20.0).min(1.0);
        let confidence = 0.3 * n_score(col_peaks.len())
            + 0.3 * n_score(row_peaks.len())
            + 0.2 * spacing_regularity(&minor_multiples(&col_spacings, minor))
            + 0.2 * spacing_regularity(&minor_multiples(&row_spacings, minor));

        Some(GridSpec {
            pixels_per_mm: minor,
            rotation_deg,
            origin: (col_peaks[0], row_peaks[0]),
            confidence: confidence.clamp(0.0, 1.0),
        })
    }

    /// Grid spec when detection failed: scale estimated from the page size,
    /// confidence capped at 0.25 so downstream consumers must treat it as a
    /// guess.
    fn fallback_grid(&self, page: &RasterImage) -> GridSpec {
        let estimate = (page.width as f32 / FALLBACK_PAGE_WIDTH_MM)
            .clamp(self.params.min_pixels_per_mm, self.params.max_pixels_per_mm);
        GridSpec {
            confidence: 0.25,
            ..GridSpec::fallback(estimate)
        }
    }
}

/// Decide whether a lone spacing cluster is the minor (1 mm) or the major
/// (5 mm) pitch: whichever interpretation lands closer to the expected
/// minor spacing wins.
fn resolve_minor(spacing: f32, expected: f32) -> f32 {
    if (spacing - expected).abs() <= (spacing / 5.0 - expected).abs() {
        spacing
    } else {
        spacing / 5.0
    }
}

/// Reduce raw spacings to their deviation-relevant form for the regularity
/// score: each spacing divided by its nearest positive multiple of the minor
/// pitch, so consecutive major-grid hops do not count as irregularity.
fn minor_multiples(spacings: &[f32], minor: f32) -> Vec<f32> {
    spacings
        .iter()
        .map(|&s| {
            let k = (s / minor).round().max(1.0);
            s / k
        })
        .collect()
}

/// Estimate residual grid rotation (degrees) from gradient orientations,
/// folded to the nearest axis and restricted to small angles.
///
/// Votes go into an orientation histogram and the estimate is a weighted
/// mean around the mode. The waveform ink carries far more gradient
/// magnitude than the ruled lines, but its edge orientations spread over
/// the whole fold range while the grid piles into a single bin, so the
/// mode tracks the grid.
fn estimate_rotation_deg(grad: &Grad) -> f32 {
    let max_mag = grad.mag.data.iter().cloned().fold(0.0f32, f32::max);
    if max_mag <= f32::EPSILON {
        return 0.0;
    }
    let thresh = max_mag * ROTATION_MAG_RATIO;

    let bins = (2.0 * ROTATION_MAX_DEG / ROTATION_BIN_DEG) as usize;
    let mut weight = vec![0.0f64; bins];
    let mut angle_weight = vec![0.0f64; bins];
    for i in 0..grad.mag.data.len() {
        let m = grad.mag.data[i];
        if m < thresh {
            continue;
        }
        // Gradient normal of a grid line is perpendicular to the line, so
        // the fold to ±45° around an axis works on the gradient directly.
        let angle = grad.gy.data[i].atan2(grad.gx.data[i]).to_degrees();
        let mut folded = angle.rem_euclid(90.0);
        if folded > 45.0 {
            folded -= 90.0;
        }
        if folded.abs() >= ROTATION_MAX_DEG {
            continue;
        }
        let idx = (((folded + ROTATION_MAX_DEG) / ROTATION_BIN_DEG) as usize).min(bins - 1);
        weight[idx] += m as f64;
        angle_weight[idx] += (folded * m) as f64;
    }

    let Some(peak) = weight
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map(|(i, _)| i)
    else {
        return 0.0;
    };
    // Sub-bin refinement over a ±0.75 deg window around the mode.
    let lo = peak.saturating_sub(3);
    let hi = (peak + 3).min(bins - 1);
    let total: f64 = weight[lo..=hi].iter().sum();
    if total <= f64::EPSILON {
        return 0.0;
    }
    let acc: f64 = angle_weight[lo..=hi].iter().sum();
    (acc / total) as f32
}

/// Longest vertical dark run in the left fifth of the page that looks like
/// the printed 1 mV square pulse. Returns the run height in pixels.
fn detect_calibration_pulse(page: &RasterImage, pixels_per_mm: f32) -> Option<f32> {
    let search_width = (page.width / 5).max(1);
    let expected = 10.0 * pixels_per_mm; // 1 mV at the standard 10 mm/mV
    let band = (expected * 0.6)..=(expected * 1.8);

    let mut candidates: Vec<f32> = Vec::new();
    for x in 0..search_width {
        let mut run = 0usize;
        let mut best = 0usize;
        for y in 0..page.height {
            if page.get(x, y) < 128 {
                run += 1;
                best = best.max(run);
            } else {
                run = 0;
            }
        }
        let height = best as f32;
        if band.contains(&height) {
            candidates.push(height);
        }
    }
    // The two vertical strokes of the pulse give at least two close columns.
    if candidates.len() < 2 {
        return None;
    }
    candidates.sort_by(f32::total_cmp);
    Some(candidates[candidates.len() / 2])
}

/// Warn about non-standard paper settings without rejecting them.
fn validate_paper_settings(params: &CalibrationParams) {
    const SPEEDS: [f32; 3] = [12.5, 25.0, 50.0];
    const GAINS: [f32; 3] = [5.0, 10.0, 20.0];
    if !SPEEDS.iter().any(|&s| (s - params.paper_speed_mm_s).abs() < 1e-3) {
        warn!("non-standard paper speed: {} mm/s", params.paper_speed_mm_s);
    }
    if !GAINS.iter().any(|&g| (g - params.gain_mm_mv).abs() < 0.5) {
        warn!("non-standard gain: {} mm/mV", params.gain_mm_mv);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CalibrateParams;

    /// Page ruled with a minor grid every `minor` px and a darker major line
    /// every fifth rule.
    fn gridded_page(width: usize, height: usize, minor: usize) -> RasterImage {
        let mut img = RasterImage::blank(width, height);
        for x in (0..width).step_by(minor) {
            let shade = if (x / minor) % 5 == 0 { 110u8 } else { 190u8 };
            for y in 0..height {
                img.data[y * width + x] = shade;
            }
        }
        for y in (0..height).step_by(minor) {
            let shade = if (y / minor) % 5 == 0 { 110u8 } else { 190u8 };
            for x in 0..width {
                let px = &mut img.data[y * width + x];
                *px = (*px).min(shade);
            }
        }
        img
    }

    fn calibrator() -> GridCalibrator {
        GridCalibrator::new(
            CalibrateParams::default(),
            CalibrationParams {
                paper_speed_mm_s: 25.0,
                gain_mm_mv: 10.0,
                sample_rate_hz: 500,
            },
        )
    }

    #[test]
    fn detects_minor_spacing_on_clean_grid() {
        let page = gridded_page(400, 300, 10);
        let cal = calibrator().calibrate(&page, &CalibrationHints::default());
        assert!(
            (cal.grid.pixels_per_mm - 10.0).abs() < 0.5,
            "px/mm={}",
            cal.grid.pixels_per_mm
        );
        assert!(cal.grid.confidence > 0.5, "confidence={}", cal.grid.confidence);
        assert!(cal.flags.is_empty(), "flags={:?}", cal.flags);
    }

    #[test]
    fn blank_page_falls_back_to_defaults() {
        let page = RasterImage::blank(400, 300);
        let cal = calibrator().calibrate(&page, &CalibrationHints::default());
        assert!(cal.flags.contains(&QualityFlag::DefaultCalibration));
        assert!(cal.grid.confidence <= 0.3);
        assert_eq!(cal.params.paper_speed_mm_s, 25.0);
        assert_eq!(cal.params.gain_mm_mv, 10.0);
    }

    #[test]
    fn hints_override_detected_settings() {
        let page = gridded_page(400, 300, 10);
        let hints = CalibrationHints {
            paper_speed_mm_s: Some(50.0),
            gain_mm_mv: Some(5.0),
            sample_rate_hz: Some(1000),
            zero_row_fraction: None,
        };
        let cal = calibrator().calibrate(&page, &hints);
        assert_eq!(cal.params.paper_speed_mm_s, 50.0);
        assert_eq!(cal.params.gain_mm_mv, 5.0);
        assert_eq!(cal.params.sample_rate_hz, 1000);
        // Detected grid scale still in force for pixel->mm.
        assert!((cal.grid.pixels_per_mm - 10.0).abs() < 0.5);
    }

    #[test]
    fn resolve_minor_prefers_expected() {
        assert_eq!(resolve_minor(10.0, 10.0), 10.0);
        assert_eq!(resolve_minor(50.0, 10.0), 10.0);
        assert_eq!(resolve_minor(9.0, 10.0), 9.0);
    }

    #[test]
    fn calibration_pulse_refines_gain() {
        let mut page = gridded_page(500, 300, 10);
        // 1 mV pulse at 12 mm/mV: two vertical strokes 120 px tall at x=20..22.
        for x in 20..23 {
            for y in 100..220 {
                page.data[y * 500 + x] = 0;
            }
        }
        let cal = calibrator().calibrate(&page, &CalibrationHints::default());
        let pulse = cal.pulse_height_px.expect("pulse detected");
        assert!((pulse - 120.0).abs() < 3.0, "pulse={pulse}");
        assert!((cal.params.gain_mm_mv - 12.0).abs() < 0.5, "gain={}", cal.params.gain_mm_mv);
    }

    #[test]
    fn rotated_grid_reports_rotation() {
        let page = gridded_page(400, 300, 10);
        let rotated = rotate_about_center(&page, 2.0);
        let cal = calibrator().calibrate(&rotated, &CalibrationHints::default());
        assert!(
            (cal.grid.rotation_deg - 2.0).abs() < 1.0,
            "rotation={}",
            cal.grid.rotation_deg
        );
        assert!(cal.corrected.is_some());
        assert!(
            (cal.grid.pixels_per_mm - 10.0).abs() < 0.6,
            "px/mm={}",
            cal.grid.pixels_per_mm
        );
    }
}
