//! The conversion driver: one raster page in, one signal bundle out.
//!
//! Stage order is fixed: normalize, calibrate, locate layout, then a
//! per-lead fan-out (segment, trace, reconstruct, assess) over the rayon
//! pool, reassembled in canonical lead order so results are deterministic
//! regardless of scheduling. Cancellation is checked between stages and
//! between per-lead units; collaborator calls are timed against the
//! configured budget and never retried silently.

use crate::calibrate::GridCalibrator;
use crate::config::ConvertConfig;
use crate::error::{ConvertError, ProviderError};
use crate::image::RasterImage;
use crate::layout::LayoutLocator;
use crate::normalize::PageNormalizer;
use crate::provider::{LayoutProvider, SegmentationProvider};
use crate::quality::QualityAssessor;
use crate::reconstruct::SignalReconstructor;
use crate::report::{ConversionReport, PageSummary, StageTiming};
use crate::segment::LayerSeparator;
use crate::trace::{CurveTracer, TraceStats};
use crate::types::{
    CalibrationHints, LeadRegion, QualityFlag, QualityMetrics, Signal, SignalBundle,
};
use log::{debug, info};
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Cooperative cancellation handle shared with the caller. Cancellation is
/// observed between stages and between per-lead units, never mid-kernel.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    fn check(&self) -> Result<(), ConvertError> {
        if self.is_cancelled() {
            Err(ConvertError::Cancelled)
        } else {
            Ok(())
        }
    }
}

struct LeadOutcome {
    region: LeadRegion,
    signal: Signal,
    metrics: QualityMetrics,
    stats: TraceStats,
}

/// Entry point of the crate: owns the configuration and drives the stages.
pub struct Converter {
    config: ConvertConfig,
}

impl Converter {
    pub fn new(config: ConvertConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ConvertConfig {
        &self.config
    }

    /// Convert one page with default cancellation (never cancelled).
    pub fn convert(
        &self,
        image: &RasterImage,
        hints: &CalibrationHints,
        layout: &dyn LayoutProvider,
        segmentation: &dyn SegmentationProvider,
    ) -> Result<SignalBundle, ConvertError> {
        self.convert_with_report(image, hints, layout, segmentation, &CancelToken::new())
            .map(|(bundle, _)| bundle)
    }

    /// Convert one page, returning the bundle together with the job report.
    pub fn convert_with_report(
        &self,
        image: &RasterImage,
        hints: &CalibrationHints,
        layout: &dyn LayoutProvider,
        segmentation: &dyn SegmentationProvider,
        cancel: &CancelToken,
    ) -> Result<(SignalBundle, ConversionReport), ConvertError> {
        if image.is_empty() {
            return Err(ConvertError::InvalidInput("empty input image".into()));
        }
        let job_start = Instant::now();
        let mut timings = Vec::new();
        let mut flags = Vec::new();

        // Normalize.
        let stage_start = Instant::now();
        let page = PageNormalizer::new(self.config.normalize.clone()).normalize(image, None);
        push_timing(&mut timings, "normalize", stage_start);
        if !page.page_resolved {
            flags.push(QualityFlag::PageGeometryUnresolved);
        }
        cancel.check()?;

        // Calibrate.
        let stage_start = Instant::now();
        let calibrator =
            GridCalibrator::new(self.config.calibrate.clone(), self.config.default_calibration);
        let calibration = calibrator.calibrate(&page.image, hints);
        flags.extend(calibration.flags.iter().cloned());
        let working = calibration.corrected.as_ref().unwrap_or(&page.image);
        push_timing(&mut timings, "calibrate", stage_start);
        cancel.check()?;

        // Layout collaborator, then geometric validation.
        let stage_start = Instant::now();
        let detections = self.call_collaborator("layout", || layout.detect(working))?;
        let resolved = LayoutLocator::new(self.config.layout.clone()).resolve(
            working.width,
            working.height,
            &calibration.grid,
            &detections,
        )?;
        flags.extend(resolved.flags.iter().cloned());
        push_timing(&mut timings, "layout", stage_start);
        cancel.check()?;
        debug!("layout resolved with {} regions", resolved.regions.len());

        // Per-lead fan-out. Region order is canonical, and an ordered
        // collect keeps the reassembly deterministic.
        let stage_start = Instant::now();
        let separator = LayerSeparator::new(self.config.segment.clone());
        let tracer = CurveTracer::new(self.config.tracer.clone());
        let reconstructor = SignalReconstructor::new(self.config.reconstruct.clone());
        let assessor = QualityAssessor::new(self.config.quality.clone());
        let outcomes: Result<Vec<LeadOutcome>, ConvertError> = resolved
            .regions
            .par_iter()
            .map(|region| {
                cancel.check()?;
                self.process_lead(
                    region,
                    working,
                    &calibration,
                    hints,
                    segmentation,
                    &separator,
                    &tracer,
                    &reconstructor,
                    &assessor,
                )
            })
            .collect();
        let mut outcomes = outcomes?;
        push_timing(&mut timings, "leads", stage_start);

        // Same-width leads must stay sample-synchronous; reconcile ±1-sample
        // rounding differences up to the longest standard lead. Anything
        // larger is a genuine width difference and stays as-is.
        let target = outcomes
            .iter()
            .filter(|o| !o.region.is_rhythm_strip)
            .map(|o| o.signal.samples.len())
            .max();
        if let Some(target) = target {
            for outcome in &mut outcomes {
                let len = outcome.signal.samples.len();
                if !outcome.region.is_rhythm_strip && len < target && target - len <= 1 {
                    outcome.signal.samples.resize(target, f32::NAN);
                }
            }
        }

        // Assemble in canonical order; gap flags follow the same order.
        let mut signals = BTreeMap::new();
        let mut metrics = BTreeMap::new();
        let mut trace = BTreeMap::new();
        let mut estimated_leads = Vec::new();
        for outcome in &outcomes {
            if outcome.stats.has_unresolved_gaps() {
                flags.push(QualityFlag::TraceGapExceeded {
                    lead: outcome.region.lead,
                });
            }
            if outcome.region.estimated {
                estimated_leads.push(outcome.region.lead);
            }
            trace.insert(outcome.region.lead, outcome.stats);
            metrics.insert(outcome.region.lead, outcome.metrics);
        }
        for outcome in outcomes {
            signals.insert(outcome.region.lead, outcome.signal);
        }

        let report = ConversionReport {
            page: PageSummary {
                width: working.width,
                height: working.height,
                page_resolved: page.page_resolved,
                corner_confidence: page.corner_confidence,
                homography_applied: page.homography_applied,
            },
            grid: calibration.grid,
            calibration: calibration.params,
            pulse_height_px: calibration.pulse_height_px,
            lead_count: signals.len(),
            estimated_leads,
            trace,
            flags: flags.clone(),
            timings,
            total_millis: job_start.elapsed().as_secs_f64() * 1e3,
        };
        info!(
            "converted {} leads in {:.1} ms ({} flags)",
            report.lead_count,
            report.total_millis,
            report.flags.len()
        );

        let bundle = SignalBundle {
            signals,
            calibration: calibration.params,
            grid: calibration.grid,
            metrics,
            flags,
        };
        Ok((bundle, report))
    }

    #[allow(clippy::too_many_arguments)]
    fn process_lead(
        &self,
        region: &LeadRegion,
        page: &RasterImage,
        calibration: &crate::calibrate::Calibration,
        hints: &CalibrationHints,
        segmentation: &dyn SegmentationProvider,
        separator: &LayerSeparator,
        tracer: &CurveTracer,
        reconstructor: &SignalReconstructor,
        assessor: &QualityAssessor,
    ) -> Result<LeadOutcome, ConvertError> {
        let crop = page.crop(&region.bbox);
        let maps = self.call_collaborator("segmentation", || segmentation.segment(&crop))?;
        let mask = separator.separate(&maps)?;
        let curve = tracer.trace(&mask);
        let signal = reconstructor.reconstruct(
            &curve,
            region,
            &calibration.grid,
            &calibration.params,
            hints.zero_row_fraction,
        );
        let half_range_mv = region.bbox.height as f32
            / (2.0 * calibration.params.pixels_per_mv(calibration.grid.pixels_per_mm));
        let metrics = assessor.assess(&signal, half_range_mv, calibration.grid.confidence);
        Ok(LeadOutcome {
            region: *region,
            signal,
            metrics,
            stats: curve.stats,
        })
    }

    /// Run one collaborator call against the wall-clock budget. A call that
    /// returns late is a timeout even when it returned data; the caller
    /// decides whether to retry, never this crate.
    fn call_collaborator<T>(
        &self,
        stage: &'static str,
        call: impl FnOnce() -> Result<T, ProviderError>,
    ) -> Result<T, ConvertError> {
        let start = Instant::now();
        let result = call();
        let elapsed_ms = start.elapsed().as_millis() as u64;
        if elapsed_ms > self.config.collaborator_timeout_ms {
            return Err(ConvertError::CollaboratorTimeout { stage });
        }
        result.map_err(|e| ConvertError::from_provider(stage, e))
    }
}

fn push_timing(timings: &mut Vec<StageTiming>, stage: &'static str, start: Instant) {
    timings.push(StageTiming {
        stage,
        millis: start.elapsed().as_secs_f64() * 1e3,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{DetectedRegion, ProbabilityMaps};

    struct FailingLayout;
    impl LayoutProvider for FailingLayout {
        fn detect(&self, _: &RasterImage) -> Result<Vec<DetectedRegion>, ProviderError> {
            Err(ProviderError::Failed("model unavailable".into()))
        }
    }

    struct TimedOutLayout;
    impl LayoutProvider for TimedOutLayout {
        fn detect(&self, _: &RasterImage) -> Result<Vec<DetectedRegion>, ProviderError> {
            Err(ProviderError::Timeout)
        }
    }

    struct NoopSegmentation;
    impl SegmentationProvider for NoopSegmentation {
        fn segment(&self, crop: &RasterImage) -> Result<ProbabilityMaps, ProviderError> {
            let n = crop.width * crop.height;
            Ok(ProbabilityMaps {
                width: crop.width,
                height: crop.height,
                grid: vec![0.0; n],
                trace: vec![0.0; n],
                text: vec![0.0; n],
            })
        }
    }

    #[test]
    fn empty_image_is_invalid_input() {
        let converter = Converter::new(ConvertConfig::default());
        let err = converter
            .convert(
                &RasterImage::blank(0, 0),
                &CalibrationHints::default(),
                &FailingLayout,
                &NoopSegmentation,
            )
            .unwrap_err();
        assert!(matches!(err, ConvertError::InvalidInput(_)));
    }

    #[test]
    fn provider_failure_names_the_stage() {
        let converter = Converter::new(ConvertConfig::default());
        let err = converter
            .convert(
                &RasterImage::blank(400, 300),
                &CalibrationHints::default(),
                &FailingLayout,
                &NoopSegmentation,
            )
            .unwrap_err();
        match err {
            ConvertError::CollaboratorFailed { stage, message } => {
                assert_eq!(stage, "layout");
                assert!(message.contains("model unavailable"));
            }
            other => panic!("expected CollaboratorFailed, got {other:?}"),
        }
    }

    #[test]
    fn provider_timeout_is_distinct() {
        let converter = Converter::new(ConvertConfig::default());
        let err = converter
            .convert(
                &RasterImage::blank(400, 300),
                &CalibrationHints::default(),
                &TimedOutLayout,
                &NoopSegmentation,
            )
            .unwrap_err();
        assert!(matches!(
            err,
            ConvertError::CollaboratorTimeout { stage: "layout" }
        ));
    }

    #[test]
    fn cancelled_before_start_aborts() {
        let converter = Converter::new(ConvertConfig::default());
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = converter
            .convert_with_report(
                &RasterImage::blank(400, 300),
                &CalibrationHints::default(),
                &FailingLayout,
                &NoopSegmentation,
                &cancel,
            )
            .unwrap_err();
        assert!(matches!(err, ConvertError::Cancelled));
    }
}
