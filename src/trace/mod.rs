//! Curve tracing: one vertical position per mask column.
//!
//! For every column of the trace mask the contiguous ink runs are collected
//! and one run is chosen — the one whose centroid is nearest the previous
//! column's position (longest run when there is no history). Column gaps up
//! to the configured limit are bridged by linear interpolation; longer gaps
//! stay invalid (NaN) so the reconstruction cannot invent waveform where
//! there was none. Physically impossible jumps are repaired with a local
//! median filter rather than discarded.
//!
//! The greedy nearest-run rule follows the printed-trace assumption of one
//! function value per time instant; crossing artefacts are resolved by
//! continuity, not by global optimisation.

use crate::config::{RunTieBreak, TracerParams};
use crate::segment::TraceMask;
use log::debug;

/// Traced curve over one lead crop: one row coordinate per column, NaN where
/// no trace could be recovered.
#[derive(Clone, Debug)]
pub struct PixelCurve {
    pub rows: Vec<f32>,
    pub stats: TraceStats,
}

/// Bookkeeping of what the tracer had to do, surfaced in the job report.
#[derive(Clone, Copy, Debug, Default, serde::Serialize)]
pub struct TraceStats {
    pub columns: usize,
    /// Columns with directly observed ink.
    pub observed_columns: usize,
    /// Columns filled by short-gap interpolation.
    pub interpolated_columns: usize,
    /// Columns left invalid because their gap exceeded the limit.
    pub invalid_columns: usize,
    /// Longest contiguous run of columns without ink.
    pub longest_gap_columns: usize,
    /// Columns corrected by the anomaly median filter.
    pub anomaly_columns: usize,
}

impl TraceStats {
    /// True when at least one gap was too long to interpolate.
    pub fn has_unresolved_gaps(&self) -> bool {
        self.invalid_columns > 0
    }
}

/// One contiguous vertical ink run within a column.
#[derive(Clone, Copy, Debug)]
struct Run {
    centroid: f32,
    length: usize,
}

/// Traces the single-valued curve through a cleaned mask.
pub struct CurveTracer {
    params: TracerParams,
}

impl CurveTracer {
    pub fn new(params: TracerParams) -> Self {
        Self { params }
    }

    pub fn trace(&self, mask: &TraceMask) -> PixelCurve {
        let mut rows = vec![f32::NAN; mask.width];
        let mut stats = TraceStats {
            columns: mask.width,
            ..TraceStats::default()
        };

        let mut previous: Option<f32> = None;
        for x in 0..mask.width {
            let runs = column_runs(mask, x);
            if let Some(run) = self.pick_run(&runs, previous) {
                rows[x] = run.centroid;
                previous = Some(run.centroid);
                stats.observed_columns += 1;
            }
        }

        self.fill_gaps(&mut rows, &mut stats);
        self.repair_anomalies(&mut rows, &mut stats);
        stats.invalid_columns = rows.iter().filter(|r| r.is_nan()).count();
        if stats.has_unresolved_gaps() {
            debug!(
                "{} of {} columns left invalid (longest gap {})",
                stats.invalid_columns, stats.columns, stats.longest_gap_columns
            );
        }
        PixelCurve { rows, stats }
    }

    fn pick_run(&self, runs: &[Run], previous: Option<f32>) -> Option<Run> {
        match (previous, self.params.tie_break) {
            (Some(prev), RunTieBreak::NearestToPrevious) => runs
                .iter()
                .copied()
                .min_by(|a, b| {
                    (a.centroid - prev)
                        .abs()
                        .total_cmp(&(b.centroid - prev).abs())
                }),
            // No history: the longest run is the stroke, shorter ones noise.
            (None, _) => runs.iter().copied().max_by_key(|r| r.length),
        }
    }

    /// Linearly interpolate interior gaps up to the configured width. Leading
    /// and trailing gaps have no anchor on one side and always stay invalid.
    fn fill_gaps(&self, rows: &mut [f32], stats: &mut TraceStats) {
        let mut x = 0;
        let mut last_valid: Option<usize> = None;
        while x < rows.len() {
            if !rows[x].is_nan() {
                last_valid = Some(x);
                x += 1;
                continue;
            }
            let gap_start = x;
            while x < rows.len() && rows[x].is_nan() {
                x += 1;
            }
            let gap_len = x - gap_start;
            stats.longest_gap_columns = stats.longest_gap_columns.max(gap_len);
            let (Some(left), true) = (last_valid, x < rows.len()) else {
                continue;
            };
            if gap_len > self.params.max_interp_gap_columns {
                continue;
            }
            let y0 = rows[left];
            let y1 = rows[x];
            let span = (x - left) as f32;
            for (i, row) in rows.iter_mut().enumerate().take(x).skip(gap_start) {
                let t = (i - left) as f32 / span;
                *row = y0 + (y1 - y0) * t;
            }
            stats.interpolated_columns += gap_len;
        }
    }

    /// Column-to-column jumps beyond the slope limit are ink artefacts
    /// (grid remnants, label fragments). Replace the flagged columns with
    /// the median of their neighbourhood.
    ///
    /// The limit is scale-free: at `dx` of one pixel, `dy` in millimetres is
    /// `slope / px_per_mm`, which is `slope` pixels again.
    fn repair_anomalies(&self, rows: &mut [f32], stats: &mut TraceStats) {
        let max_jump = self.params.max_slope_mm_per_mm;
        let half = self.params.anomaly_median_half_window;
        if half == 0 {
            return;
        }
        let snapshot = rows.to_vec();
        for x in 1..rows.len() {
            let (prev, curr) = (snapshot[x - 1], snapshot[x]);
            if prev.is_nan() || curr.is_nan() || (curr - prev).abs() <= max_jump {
                continue;
            }
            let lo = x.saturating_sub(half);
            let hi = (x + half).min(snapshot.len() - 1);
            let mut window: Vec<f32> = snapshot[lo..=hi]
                .iter()
                .copied()
                .filter(|v| !v.is_nan())
                .collect();
            if window.is_empty() {
                continue;
            }
            window.sort_by(f32::total_cmp);
            rows[x] = window[window.len() / 2];
            stats.anomaly_columns += 1;
        }
    }
}

fn column_runs(mask: &TraceMask, x: usize) -> Vec<Run> {
    let mut runs = Vec::new();
    let mut start: Option<usize> = None;
    for y in 0..=mask.height {
        let ink = y < mask.height && mask.get(x, y);
        match (ink, start) {
            (true, None) => start = Some(y),
            (false, Some(s)) => {
                let length = y - s;
                runs.push(Run {
                    centroid: (s + y - 1) as f32 * 0.5,
                    length,
                });
                start = None;
            }
            _ => {}
        }
    }
    runs
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mask_from_rows(width: usize, height: usize, rows: &[Option<usize>]) -> TraceMask {
        let mut mask = TraceMask::empty(width, height);
        for (x, row) in rows.iter().enumerate() {
            if let Some(y) = row {
                mask.set(x, *y, true);
                if y + 1 < height {
                    mask.set(x, y + 1, true);
                }
            }
        }
        mask
    }

    #[test]
    fn follows_continuous_stroke() {
        let rows: Vec<Option<usize>> = (0..50).map(|x| Some(20 + (x % 5))).collect();
        let mask = mask_from_rows(50, 40, &rows);
        let curve = CurveTracer::new(TracerParams::default()).trace(&mask);
        assert_eq!(curve.stats.observed_columns, 50);
        assert!(!curve.stats.has_unresolved_gaps());
        assert!((curve.rows[0] - 20.5).abs() < 1e-3);
    }

    #[test]
    fn short_gap_interpolated() {
        let mut rows: Vec<Option<usize>> = vec![Some(20); 50];
        rows[10] = None;
        rows[11] = None;
        rows[12] = None;
        let mask = mask_from_rows(50, 40, &rows);
        let curve = CurveTracer::new(TracerParams::default()).trace(&mask);
        assert_eq!(curve.stats.interpolated_columns, 3);
        assert!(!curve.stats.has_unresolved_gaps());
        assert!((curve.rows[11] - 20.5).abs() < 0.1);
    }

    #[test]
    fn long_gap_stays_invalid() {
        let mut rows: Vec<Option<usize>> = vec![Some(20); 300];
        for r in rows.iter_mut().take(250).skip(50) {
            *r = None;
        }
        let mask = mask_from_rows(300, 40, &rows);
        let curve = CurveTracer::new(TracerParams::default()).trace(&mask);
        assert_eq!(curve.stats.invalid_columns, 200);
        assert_eq!(curve.stats.longest_gap_columns, 200);
        assert!(curve.rows[100].is_nan());
        assert!(!curve.rows[20].is_nan());
    }

    #[test]
    fn crossing_artefact_resolved_by_continuity() {
        // Stroke at row 20 with a second, farther blob at row 5 mid-way.
        let rows: Vec<Option<usize>> = vec![Some(20); 30];
        let mut mask = mask_from_rows(30, 40, &rows);
        for y in 5..8 {
            mask.set(15, y, true);
        }
        let curve = CurveTracer::new(TracerParams::default()).trace(&mask);
        assert!((curve.rows[15] - 20.5).abs() < 1.0, "row={}", curve.rows[15]);
    }

    #[test]
    fn isolated_spike_median_filtered() {
        let mut rows: Vec<Option<usize>> = vec![Some(20); 30];
        rows[15] = Some(90); // 70-px jump, far beyond the slope limit
        let mask = mask_from_rows(30, 100, &rows);
        let curve = CurveTracer::new(TracerParams::default()).trace(&mask);
        assert!(curve.stats.anomaly_columns >= 1);
        assert!((curve.rows[15] - 20.5).abs() < 1.0, "row={}", curve.rows[15]);
    }

    #[test]
    fn empty_mask_is_all_invalid() {
        let mask = TraceMask::empty(20, 10);
        let curve = CurveTracer::new(TracerParams::default()).trace(&mask);
        assert_eq!(curve.stats.invalid_columns, 20);
        assert_eq!(curve.stats.observed_columns, 0);
    }
}
