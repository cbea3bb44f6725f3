//! Lead-region layout resolution.
//!
//! The layout collaborator proposes labelled bounding boxes; this stage
//! validates them against the geometry of the standard 12-lead printout
//! (four columns of three leads over an optional rhythm strip), resolves
//! duplicates, and fills gaps from the uniform grid layout when allowed.
//!
//! The uniform fallback is only geometry — it carries no detection evidence,
//! so every filled region is marked `estimated` and the job gets an
//! [`QualityFlag::EstimatedLayout`]. When even the fallback cannot produce
//! the required lead count, the job fails with `LayoutUnresolved`: there is
//! no meaningful partial bundle below that point.

use crate::config::LayoutParams;
use crate::error::ConvertError;
use crate::provider::DetectedRegion;
use crate::types::{BoundingBox, GridSpec, LeadId, LeadRegion, QualityFlag};
use log::{debug, warn};

const LAYOUT_COLUMNS: usize = 4;
const LAYOUT_ROWS: usize = 3;

/// Resolved page layout handed to the per-lead stages.
#[derive(Clone, Debug)]
pub struct ResolvedLayout {
    /// Lead regions in canonical order.
    pub regions: Vec<LeadRegion>,
    pub flags: Vec<QualityFlag>,
}

/// Validates collaborator detections and produces the final lead layout.
pub struct LayoutLocator {
    params: LayoutParams,
}

impl LayoutLocator {
    pub fn new(params: LayoutParams) -> Self {
        Self { params }
    }

    /// Resolve the layout of a `width × height` page. `detections` come
    /// straight from the collaborator and may be incomplete, duplicated or
    /// wrong; nothing in them is trusted without a geometry check.
    pub fn resolve(
        &self,
        width: usize,
        height: usize,
        grid: &GridSpec,
        detections: &[DetectedRegion],
    ) -> Result<ResolvedLayout, ConvertError> {
        if width == 0 || height == 0 {
            return Err(ConvertError::InvalidInput(
                "cannot lay out an empty page".into(),
            ));
        }
        let template = LayoutTemplate::new(width, height, self.params.rhythm_strip_fraction);
        let min_side_px = self.params.min_region_mm * grid.pixels_per_mm;

        // Validate, then dedupe keeping the stronger detection per lead.
        let mut accepted: Vec<(DetectedRegion, bool)> = Vec::new();
        for det in detections {
            match self.check(det, width, height, min_side_px, &template) {
                Ok(()) => {
                    let slot = accepted.iter_mut().find(|(a, _)| a.lead == det.lead);
                    match slot {
                        Some((existing, _)) if det.confidence > existing.confidence => {
                            debug!(
                                "duplicate {} detection, keeping confidence {:.2} over {:.2}",
                                det.lead, det.confidence, existing.confidence
                            );
                            *existing = *det;
                        }
                        Some(_) => {}
                        None => accepted.push((*det, false)),
                    }
                }
                Err(reason) => {
                    warn!("rejected {} detection: {reason}", det.lead);
                }
            }
        }

        // Fill the gaps from the uniform template when permitted and when
        // the page is large enough for the template cells to be plausible.
        let mut flags = Vec::new();
        let fallback_ok = self.params.allow_estimated_layout
            && template.cell_size.0 >= min_side_px
            && template.cell_size.1 >= min_side_px;
        let mut regions: Vec<LeadRegion> = Vec::new();
        for lead in LeadId::STANDARD {
            if let Some((det, _)) = accepted.iter().find(|(d, _)| d.lead == lead) {
                regions.push(LeadRegion {
                    lead,
                    bbox: det.bbox,
                    is_rhythm_strip: false,
                    estimated: false,
                });
            } else if fallback_ok {
                regions.push(LeadRegion {
                    lead,
                    bbox: template.cell(lead).expect("standard lead has a cell"),
                    is_rhythm_strip: false,
                    estimated: true,
                });
            }
        }
        if regions.iter().any(|r| r.estimated) {
            let n = regions.iter().filter(|r| r.estimated).count();
            warn!("{n} lead regions estimated from the uniform layout");
            flags.push(QualityFlag::EstimatedLayout);
        }

        if regions.len() < self.params.min_leads {
            return Err(ConvertError::LayoutUnresolved {
                resolved: regions.len(),
                required: self.params.min_leads,
            });
        }

        // Rhythm strip: a validated detection wins; otherwise the template
        // strip, but only when the fallback is trustworthy at all.
        if let Some((det, _)) = accepted.iter().find(|(d, _)| d.lead == LeadId::Rhythm) {
            regions.push(LeadRegion {
                lead: LeadId::Rhythm,
                bbox: det.bbox,
                is_rhythm_strip: true,
                estimated: false,
            });
        } else if fallback_ok {
            if let Some(bbox) = template.rhythm_strip() {
                regions.push(LeadRegion {
                    lead: LeadId::Rhythm,
                    bbox,
                    is_rhythm_strip: true,
                    estimated: true,
                });
            }
        }

        regions.sort_by_key(|r| r.lead);
        Ok(ResolvedLayout { regions, flags })
    }

    fn check(
        &self,
        det: &DetectedRegion,
        width: usize,
        height: usize,
        min_side_px: f32,
        template: &LayoutTemplate,
    ) -> Result<(), String> {
        if det.confidence < self.params.min_region_confidence {
            return Err(format!(
                "confidence {:.2} below {:.2}",
                det.confidence, self.params.min_region_confidence
            ));
        }
        if !det.bbox.fits_within(width, height) {
            return Err(format!("bbox {:?} outside {width}x{height} page", det.bbox));
        }
        if (det.bbox.width as f32) < min_side_px || (det.bbox.height as f32) < min_side_px {
            return Err(format!(
                "bbox {}x{} smaller than {min_side_px:.0} px",
                det.bbox.width, det.bbox.height
            ));
        }
        // The rhythm strip has no grid cell; its plausibility is the size
        // check plus landing in the lower part of the page.
        if det.lead == LeadId::Rhythm {
            let (_, cy) = det.bbox.center();
            if cy < height as f32 * 0.5 {
                return Err("rhythm strip in the upper half of the page".into());
            }
            return Ok(());
        }
        let expected = template
            .cell(det.lead)
            .ok_or_else(|| "lead has no layout cell".to_string())?;
        let (cx, cy) = det.bbox.center();
        let (ex, ey) = expected.center();
        let offset = ((cx - ex).powi(2) + (cy - ey).powi(2)).sqrt();
        let diagonal =
            ((expected.width as f32).powi(2) + (expected.height as f32).powi(2)).sqrt();
        if offset > diagonal * self.params.max_center_offset_ratio {
            return Err(format!(
                "centre {:.0} px from expected cell (limit {:.0})",
                offset,
                diagonal * self.params.max_center_offset_ratio
            ));
        }
        Ok(())
    }
}

/// Uniform 4×3 grid over the waveform area, rhythm strip along the bottom.
/// Leads are laid out column-major as printed: column 0 carries I, II, III.
struct LayoutTemplate {
    width: usize,
    height: usize,
    waveform_height: usize,
    cell_size: (f32, f32),
}

impl LayoutTemplate {
    fn new(width: usize, height: usize, rhythm_fraction: f32) -> Self {
        let rhythm_fraction = rhythm_fraction.clamp(0.0, 0.5);
        let waveform_height =
            ((height as f32) * (1.0 - rhythm_fraction)).round().max(1.0) as usize;
        Self {
            width,
            height,
            waveform_height,
            cell_size: (
                width as f32 / LAYOUT_COLUMNS as f32,
                waveform_height as f32 / LAYOUT_ROWS as f32,
            ),
        }
    }

    fn cell(&self, lead: LeadId) -> Option<BoundingBox> {
        let index = LeadId::STANDARD.iter().position(|&l| l == lead)?;
        let col = index / LAYOUT_ROWS;
        let row = index % LAYOUT_ROWS;
        let x0 = (self.cell_size.0 * col as f32).round() as usize;
        let y0 = (self.cell_size.1 * row as f32).round() as usize;
        let x1 = (self.cell_size.0 * (col + 1) as f32).round() as usize;
        let y1 = (self.cell_size.1 * (row + 1) as f32).round() as usize;
        Some(BoundingBox::new(
            x0,
            y0,
            x1.min(self.width) - x0,
            y1.min(self.waveform_height) - y0,
        ))
    }

    fn rhythm_strip(&self) -> Option<BoundingBox> {
        if self.waveform_height >= self.height {
            return None;
        }
        Some(BoundingBox::new(
            0,
            self.waveform_height,
            self.width,
            self.height - self.waveform_height,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const W: usize = 2000;
    const H: usize = 1500;

    fn grid() -> GridSpec {
        GridSpec {
            pixels_per_mm: 8.0,
            rotation_deg: 0.0,
            origin: (0.0, 0.0),
            confidence: 0.9,
        }
    }

    /// Detections placed exactly on the template cells.
    fn full_detections() -> Vec<DetectedRegion> {
        let template = LayoutTemplate::new(W, H, 0.25);
        LeadId::STANDARD
            .iter()
            .map(|&lead| DetectedRegion {
                lead,
                bbox: template.cell(lead).unwrap(),
                confidence: 0.9,
            })
            .collect()
    }

    #[test]
    fn complete_detection_set_resolves_without_flags() {
        let locator = LayoutLocator::new(LayoutParams::default());
        let layout = locator.resolve(W, H, &grid(), &full_detections()).unwrap();
        assert!(layout.flags.is_empty());
        // 12 detected + estimated rhythm strip from the template.
        assert_eq!(layout.regions.len(), 13);
        assert!(layout.regions.iter().take(12).all(|r| !r.estimated));
        assert!(layout.regions.last().unwrap().is_rhythm_strip);
        // Canonical ordering.
        assert_eq!(layout.regions[0].lead, LeadId::I);
        assert_eq!(layout.regions[11].lead, LeadId::V6);
    }

    #[test]
    fn missing_leads_filled_from_template() {
        let locator = LayoutLocator::new(LayoutParams::default());
        let mut detections = full_detections();
        detections.truncate(8);
        let layout = locator.resolve(W, H, &grid(), &detections).unwrap();
        assert!(layout.flags.contains(&QualityFlag::EstimatedLayout));
        let estimated: Vec<_> = layout
            .regions
            .iter()
            .filter(|r| r.estimated && !r.is_rhythm_strip)
            .map(|r| r.lead)
            .collect();
        assert_eq!(estimated, vec![LeadId::V3, LeadId::V4, LeadId::V5, LeadId::V6]);
    }

    #[test]
    fn too_few_leads_without_fallback_is_fatal() {
        let params = LayoutParams {
            allow_estimated_layout: false,
            ..LayoutParams::default()
        };
        let locator = LayoutLocator::new(params);
        let mut detections = full_detections();
        detections.truncate(8);
        let err = locator.resolve(W, H, &grid(), &detections).unwrap_err();
        match err {
            ConvertError::LayoutUnresolved { resolved, required } => {
                assert_eq!(resolved, 8);
                assert_eq!(required, 12);
            }
            other => panic!("expected LayoutUnresolved, got {other:?}"),
        }
    }

    #[test]
    fn duplicate_keeps_stronger_detection() {
        let locator = LayoutLocator::new(LayoutParams::default());
        let mut detections = full_detections();
        let mut dup = detections[0];
        dup.confidence = 0.95;
        dup.bbox.x += 5;
        detections.push(dup);
        let layout = locator.resolve(W, H, &grid(), &detections).unwrap();
        let lead_i = layout.regions.iter().find(|r| r.lead == LeadId::I).unwrap();
        assert_eq!(lead_i.bbox.x, dup.bbox.x);
    }

    #[test]
    fn displaced_detection_rejected_then_estimated() {
        let locator = LayoutLocator::new(LayoutParams::default());
        let mut detections = full_detections();
        // Push lead I's box into the far corner; the centre check rejects it.
        detections[0].bbox = BoundingBox::new(W - 400, H - 300, 350, 250);
        let layout = locator.resolve(W, H, &grid(), &detections).unwrap();
        let lead_i = layout.regions.iter().find(|r| r.lead == LeadId::I).unwrap();
        assert!(lead_i.estimated);
        assert!(layout.flags.contains(&QualityFlag::EstimatedLayout));
    }

    #[test]
    fn tiny_regions_rejected() {
        let locator = LayoutLocator::new(LayoutParams::default());
        let mut detections = full_detections();
        detections[3].bbox.width = 20; // below 10 mm at 8 px/mm
        let layout = locator.resolve(W, H, &grid(), &detections).unwrap();
        let avr = layout
            .regions
            .iter()
            .find(|r| r.lead == LeadId::AvR)
            .unwrap();
        assert!(avr.estimated);
    }
}
