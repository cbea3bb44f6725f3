//! Core data model shared by every pipeline stage.
//!
//! All values here live for a single conversion job: the pipeline builds them
//! stage by stage and hands the finished [`SignalBundle`] to the caller. None
//! of the types carry interior mutability; once a stage has produced a value
//! the next stage only reads it.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Identifier of one trace on the page.
///
/// Declared in the canonical reading order of a standard 12-lead printout
/// (limb leads, augmented leads, precordial leads, rhythm strip), so the
/// derived `Ord` gives the deterministic ordering used by [`SignalBundle`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum LeadId {
    I,
    II,
    III,
    AvR,
    AvL,
    AvF,
    V1,
    V2,
    V3,
    V4,
    V5,
    V6,
    /// Long rhythm strip along the bottom of the page.
    Rhythm,
}

impl LeadId {
    /// The twelve standard leads, in canonical order, without the rhythm strip.
    pub const STANDARD: [LeadId; 12] = [
        LeadId::I,
        LeadId::II,
        LeadId::III,
        LeadId::AvR,
        LeadId::AvL,
        LeadId::AvF,
        LeadId::V1,
        LeadId::V2,
        LeadId::V3,
        LeadId::V4,
        LeadId::V5,
        LeadId::V6,
    ];

    /// Conventional label as printed on ECG paper.
    pub fn as_str(&self) -> &'static str {
        match self {
            LeadId::I => "I",
            LeadId::II => "II",
            LeadId::III => "III",
            LeadId::AvR => "aVR",
            LeadId::AvL => "aVL",
            LeadId::AvF => "aVF",
            LeadId::V1 => "V1",
            LeadId::V2 => "V2",
            LeadId::V3 => "V3",
            LeadId::V4 => "V4",
            LeadId::V5 => "V5",
            LeadId::V6 => "V6",
            LeadId::Rhythm => "RHYTHM",
        }
    }
}

impl fmt::Display for LeadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Axis-aligned pixel rectangle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: usize,
    pub y: usize,
    pub width: usize,
    pub height: usize,
}

impl BoundingBox {
    pub fn new(x: usize, y: usize, width: usize, height: usize) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Exclusive right edge.
    #[inline]
    pub fn x2(&self) -> usize {
        self.x + self.width
    }

    /// Exclusive bottom edge.
    #[inline]
    pub fn y2(&self) -> usize {
        self.y + self.height
    }

    #[inline]
    pub fn center(&self) -> (f32, f32) {
        (
            self.x as f32 + self.width as f32 * 0.5,
            self.y as f32 + self.height as f32 * 0.5,
        )
    }

    #[inline]
    pub fn area(&self) -> usize {
        self.width * self.height
    }

    /// True when `self` lies entirely within an image of the given size.
    pub fn fits_within(&self, width: usize, height: usize) -> bool {
        self.width > 0 && self.height > 0 && self.x2() <= width && self.y2() <= height
    }

    /// True when the two rectangles share at least one pixel.
    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.x < other.x2() && other.x < self.x2() && self.y < other.y2() && other.y < self.y2()
    }
}

/// Detected ruled-grid geometry of the normalized page.
#[derive(Clone, Copy, Debug, Serialize)]
pub struct GridSpec {
    /// Pixels per millimetre of ECG paper. Always positive.
    pub pixels_per_mm: f32,
    /// Residual rotation of the grid after page normalization, degrees.
    pub rotation_deg: f32,
    /// Grid origin (first detected minor line crossing), image pixels.
    pub origin: (f32, f32),
    /// Detection confidence in [0, 1]. Values below 0.5 mean the scale is a
    /// guess and must be surfaced to the caller, never silently accepted.
    pub confidence: f32,
}

impl GridSpec {
    /// Fallback spec used when no reliable grid was found.
    pub fn fallback(pixels_per_mm: f32) -> Self {
        Self {
            pixels_per_mm,
            rotation_deg: 0.0,
            origin: (0.0, 0.0),
            confidence: 0.0,
        }
    }
}

/// Paper speed, gain and target sample rate of one conversion job.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct CalibrationParams {
    /// Paper speed in mm/s (standard: 25 or 50).
    pub paper_speed_mm_s: f32,
    /// Gain in mm/mV (standard: 10).
    pub gain_mm_mv: f32,
    /// Target sample rate of the reconstructed signals, Hz.
    pub sample_rate_hz: u32,
}

impl CalibrationParams {
    /// Horizontal pixels per second at the given grid scale.
    #[inline]
    pub fn pixels_per_second(&self, pixels_per_mm: f32) -> f32 {
        pixels_per_mm * self.paper_speed_mm_s
    }

    /// Vertical pixels per millivolt at the given grid scale.
    #[inline]
    pub fn pixels_per_mv(&self, pixels_per_mm: f32) -> f32 {
        pixels_per_mm * self.gain_mm_mv
    }
}

/// Caller-supplied calibration overrides (typically from OCR'd page text).
///
/// Present fields override detected or default settings; the detected grid
/// scale is still used for the pixel-to-millimetre conversion.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct CalibrationHints {
    pub paper_speed_mm_s: Option<f32>,
    pub gain_mm_mv: Option<f32>,
    pub sample_rate_hz: Option<u32>,
    /// Isoelectric baseline as a fraction of region height (0 = top). When
    /// absent the vertical centre of each lead region is used.
    pub zero_row_fraction: Option<f32>,
}

/// One lead's rectangular region on the normalized page.
#[derive(Clone, Copy, Debug, Serialize)]
pub struct LeadRegion {
    pub lead: LeadId,
    pub bbox: BoundingBox,
    pub is_rhythm_strip: bool,
    /// True when the region came from the uniform fallback layout rather
    /// than a validated detection.
    pub estimated: bool,
}

/// One reconstructed lead. Invalid samples (unresolvable trace gaps) are NaN.
#[derive(Clone, Debug, Serialize)]
pub struct Signal {
    pub lead: LeadId,
    /// Amplitude in millivolts, uniformly sampled.
    pub samples: Vec<f32>,
    pub sample_rate_hz: u32,
    /// Offset of the first sample from the shared job time origin, seconds.
    pub start_time_s: f32,
}

impl Signal {
    /// Duration covered by the samples, seconds.
    pub fn duration_s(&self) -> f32 {
        self.samples.len() as f32 / self.sample_rate_hz as f32
    }

    /// Fraction of samples that are valid (not NaN).
    pub fn valid_fraction(&self) -> f32 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let valid = self.samples.iter().filter(|v| v.is_finite()).count();
        valid as f32 / self.samples.len() as f32
    }
}

/// Per-lead signal quality annotations. Never mutates the signal itself.
#[derive(Clone, Copy, Debug, Serialize)]
pub struct QualityMetrics {
    pub snr_db: f32,
    /// Ratio of slow-drift energy to total signal energy, in [0, 1].
    pub baseline_drift: f32,
    /// Fraction of samples pinned at the region's vertical extremes.
    pub clipping_ratio: f32,
    /// Fraction of the lead's duration with a valid recovered sample.
    pub coverage_ratio: f32,
    /// Weighted combination of the above, in [0, 1].
    pub overall_score: f32,
}

/// Recoverable conditions surfaced to the caller alongside the bundle.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum QualityFlag {
    /// Page corners could not be found; identity transform was used.
    PageGeometryUnresolved,
    /// No reliable grid; default calibration in effect.
    DefaultCalibration,
    /// Grid was detected but with confidence below 0.5.
    LowGridConfidence,
    /// Detected grid scale fell outside physically sane bounds.
    CalibrationImplausible,
    /// At least one lead region came from the uniform fallback layout.
    EstimatedLayout,
    /// A lead has gaps beyond the interpolation limit (NaN spans present).
    TraceGapExceeded { lead: LeadId },
}

/// Everything a conversion job produces: per-lead signals, the calibration
/// they were reconstructed under, per-lead quality metrics and the
/// recoverable-condition flags. Immutable after assessment; owned by the
/// caller.
#[derive(Clone, Debug, Serialize)]
pub struct SignalBundle {
    pub signals: BTreeMap<LeadId, Signal>,
    pub calibration: CalibrationParams,
    pub grid: GridSpec,
    pub metrics: BTreeMap<LeadId, QualityMetrics>,
    pub flags: Vec<QualityFlag>,
}

impl SignalBundle {
    /// Leads in canonical order.
    pub fn iter(&self) -> impl Iterator<Item = (LeadId, &Signal)> {
        self.signals.iter().map(|(id, s)| (*id, s))
    }

    pub fn lead(&self, id: LeadId) -> Option<&Signal> {
        self.signals.get(&id)
    }

    /// Leads whose coverage fell below the given threshold.
    pub fn degraded_leads(&self, min_coverage: f32) -> Vec<LeadId> {
        self.metrics
            .iter()
            .filter(|(_, m)| m.coverage_ratio < min_coverage)
            .map(|(id, _)| *id)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_order_matches_declaration() {
        let mut sorted = LeadId::STANDARD.to_vec();
        sorted.sort();
        assert_eq!(sorted, LeadId::STANDARD.to_vec());
        assert!(LeadId::V6 < LeadId::Rhythm);
        assert!(LeadId::I < LeadId::AvR);
    }

    #[test]
    fn bbox_geometry() {
        let b = BoundingBox::new(10, 20, 100, 50);
        assert_eq!(b.x2(), 110);
        assert_eq!(b.y2(), 70);
        assert_eq!(b.center(), (60.0, 45.0));
        assert!(b.fits_within(110, 70));
        assert!(!b.fits_within(109, 70));
        let c = BoundingBox::new(100, 60, 30, 30);
        assert!(b.intersects(&c));
        let d = BoundingBox::new(110, 70, 5, 5);
        assert!(!b.intersects(&d));
    }

    #[test]
    fn signal_valid_fraction_counts_nans() {
        let s = Signal {
            lead: LeadId::II,
            samples: vec![0.0, f32::NAN, 1.0, f32::NAN],
            sample_rate_hz: 4,
            start_time_s: 0.0,
        };
        assert!((s.valid_fraction() - 0.5).abs() < 1e-6);
        assert!((s.duration_s() - 1.0).abs() < 1e-6);
    }
}
