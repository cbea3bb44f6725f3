//! Structured job report for debugging and offline inspection.
//!
//! The report mirrors what the pipeline actually did: per-stage wall-clock
//! timings, the resolved page/grid/layout facts and the per-lead tracer
//! bookkeeping. It serializes to JSON next to the bundle, so a bad
//! conversion can be diagnosed without re-running the job.

use crate::trace::TraceStats;
use crate::types::{CalibrationParams, GridSpec, LeadId, QualityFlag};
use serde::Serialize;
use std::collections::BTreeMap;

/// Wall-clock cost of one pipeline stage.
#[derive(Clone, Debug, Serialize)]
pub struct StageTiming {
    pub stage: &'static str,
    pub millis: f64,
}

/// What page normalization concluded.
#[derive(Clone, Copy, Debug, Serialize)]
pub struct PageSummary {
    pub width: usize,
    pub height: usize,
    pub page_resolved: bool,
    pub corner_confidence: f32,
    pub homography_applied: bool,
}

/// Full trace of one conversion job.
#[derive(Clone, Debug, Serialize)]
pub struct ConversionReport {
    pub page: PageSummary,
    pub grid: GridSpec,
    pub calibration: CalibrationParams,
    /// Height of the detected 1 mV calibration pulse, when found.
    pub pulse_height_px: Option<f32>,
    pub lead_count: usize,
    /// Leads whose regions came from the uniform fallback layout.
    pub estimated_leads: Vec<LeadId>,
    pub trace: BTreeMap<LeadId, TraceStats>,
    pub flags: Vec<QualityFlag>,
    pub timings: Vec<StageTiming>,
    pub total_millis: f64,
}

impl ConversionReport {
    /// Timing entry for one stage, if it ran.
    pub fn stage_millis(&self, stage: &str) -> Option<f64> {
        self.timings
            .iter()
            .find(|t| t.stage == stage)
            .map(|t| t.millis)
    }
}
