//! Layer separation: probability maps in, clean binary trace mask out.
//!
//! The segmentation collaborator labels every crop pixel with grid / trace /
//! text probabilities. This stage owns the cleanup the model does not:
//! thresholding, speckle removal by connected-component size, closing of
//! hairline breaks, and discarding components that sit on printed text (lead
//! labels punched into the waveform area would otherwise trace as wild
//! deflections).

mod morphology;

use crate::config::SegmentParams;
use crate::error::ConvertError;
use crate::provider::ProbabilityMaps;
use log::debug;

/// Binary trace-ink mask over one lead-region crop, row-major.
#[derive(Clone, Debug)]
pub struct TraceMask {
    pub width: usize,
    pub height: usize,
    pub data: Vec<bool>,
}

impl TraceMask {
    pub fn empty(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            data: vec![false; width * height],
        }
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> bool {
        self.data[y * self.width + x]
    }

    #[inline]
    pub fn set(&mut self, x: usize, y: usize, value: bool) {
        self.data[y * self.width + x] = value;
    }

    /// Fraction of mask pixels that are trace ink.
    pub fn ink_fraction(&self) -> f32 {
        if self.data.is_empty() {
            return 0.0;
        }
        self.data.iter().filter(|&&v| v).count() as f32 / self.data.len() as f32
    }
}

/// Turns collaborator probability maps into a traced-curve-ready mask.
pub struct LayerSeparator {
    params: SegmentParams,
}

impl LayerSeparator {
    pub fn new(params: SegmentParams) -> Self {
        Self { params }
    }

    pub fn separate(&self, maps: &ProbabilityMaps) -> Result<TraceMask, ConvertError> {
        if !maps.dimensions_consistent() {
            return Err(ConvertError::InvalidInput(format!(
                "segmentation maps inconsistent with {}x{} crop",
                maps.width, maps.height
            )));
        }

        let mut mask = TraceMask::empty(maps.width, maps.height);
        for (i, dst) in mask.data.iter_mut().enumerate() {
            *dst = maps.trace[i] >= self.params.trace_prob_thresh;
        }

        let mask = morphology::close_3x3(&mask);
        let (labels, sizes) = morphology::connected_components(&mask);

        // Per-component text overlap: a trace component mostly covered by
        // text pixels is a printed label, not waveform ink.
        let mut text_overlap = vec![0usize; sizes.len()];
        for (i, &label) in labels.iter().enumerate() {
            if label != 0 && maps.text[i] >= self.params.text_prob_thresh {
                text_overlap[label as usize - 1] += 1;
            }
        }

        let keep: Vec<bool> = sizes
            .iter()
            .zip(&text_overlap)
            .map(|(&size, &text)| {
                size >= self.params.min_component_px
                    && (text as f32) < size as f32 * self.params.text_overlap_ratio
            })
            .collect();
        let dropped = keep.iter().filter(|&&k| !k).count();
        if dropped > 0 {
            debug!("dropped {dropped} of {} trace components", sizes.len());
        }

        let mut cleaned = TraceMask::empty(maps.width, maps.height);
        for (i, &label) in labels.iter().enumerate() {
            if label != 0 && keep[label as usize - 1] {
                cleaned.data[i] = true;
            }
        }
        Ok(cleaned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn maps_with_trace(width: usize, height: usize, trace_px: &[(usize, usize)]) -> ProbabilityMaps {
        let n = width * height;
        let mut trace = vec![0.0f32; n];
        for &(x, y) in trace_px {
            trace[y * width + x] = 0.9;
        }
        ProbabilityMaps {
            width,
            height,
            grid: vec![0.0; n],
            trace,
            text: vec![0.0; n],
        }
    }

    fn horizontal_stroke(width: usize, y: usize) -> Vec<(usize, usize)> {
        (0..width).flat_map(move |x| [(x, y), (x, y + 1)]).collect()
    }

    #[test]
    fn stroke_survives_cleanup() {
        let maps = maps_with_trace(40, 20, &horizontal_stroke(40, 9));
        let mask = LayerSeparator::new(SegmentParams::default())
            .separate(&maps)
            .unwrap();
        assert!(mask.get(20, 9));
        assert!(mask.ink_fraction() > 0.05);
    }

    #[test]
    fn speckle_removed() {
        let mut px = horizontal_stroke(40, 9);
        px.push((5, 2)); // isolated single pixel
        let maps = maps_with_trace(40, 20, &px);
        let mask = LayerSeparator::new(SegmentParams::default())
            .separate(&maps)
            .unwrap();
        assert!(!mask.get(5, 2));
        assert!(mask.get(20, 9));
    }

    #[test]
    fn text_labelled_component_dropped() {
        let mut stroke = horizontal_stroke(40, 9);
        // A separate 4x4 blob away from the stroke, fully under text.
        let blob: Vec<(usize, usize)> = (30..34).flat_map(|x| (1..5).map(move |y| (x, y))).collect();
        stroke.extend(&blob);
        let mut maps = maps_with_trace(40, 20, &stroke);
        for &(x, y) in &blob {
            maps.text[y * 40 + x] = 0.9;
        }
        let mask = LayerSeparator::new(SegmentParams::default())
            .separate(&maps)
            .unwrap();
        assert!(!mask.get(31, 2));
        assert!(mask.get(20, 9));
    }

    #[test]
    fn inconsistent_maps_rejected() {
        let mut maps = maps_with_trace(10, 10, &[]);
        maps.trace.pop();
        let err = LayerSeparator::new(SegmentParams::default())
            .separate(&maps)
            .unwrap_err();
        assert!(matches!(err, ConvertError::InvalidInput(_)));
    }
}
