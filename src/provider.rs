//! Capability traits for the external ML collaborators.
//!
//! The layout detector and the layer-segmentation model are model-serving
//! concerns that live outside this crate. The pipeline consumes their output
//! contracts through these traits, so the geometric and numeric stages run
//! and test against deterministic stubs. Implementations must be safe under
//! concurrent read-only inference calls; the core treats them as stateless
//! functions and never manages their internal concurrency.

use crate::error::ProviderError;
use crate::image::RasterImage;
use crate::types::{BoundingBox, LeadId};

/// One raw detection from the layout collaborator, prior to validation.
#[derive(Clone, Copy, Debug)]
pub struct DetectedRegion {
    pub lead: LeadId,
    pub bbox: BoundingBox,
    pub confidence: f32,
}

/// Layout-detection collaborator: lead label + bounding box + confidence per
/// detected region. Regions are validated against grid geometry downstream;
/// providers do not need to return a complete or consistent layout.
pub trait LayoutProvider: Sync {
    fn detect(&self, image: &RasterImage) -> Result<Vec<DetectedRegion>, ProviderError>;
}

/// Per-pixel class probabilities for one lead-region crop, all maps the same
/// dimensions as the input crop, values in [0, 1].
#[derive(Clone, Debug)]
pub struct ProbabilityMaps {
    pub width: usize,
    pub height: usize,
    pub grid: Vec<f32>,
    pub trace: Vec<f32>,
    pub text: Vec<f32>,
}

impl ProbabilityMaps {
    /// Check the contract: all three maps cover exactly `width × height`.
    pub fn dimensions_consistent(&self) -> bool {
        let n = self.width * self.height;
        self.grid.len() == n && self.trace.len() == n && self.text.len() == n
    }
}

/// Layer-segmentation collaborator: separates grid ink, trace ink and text
/// within one lead-region crop.
pub trait SegmentationProvider: Sync {
    fn segment(&self, crop: &RasterImage) -> Result<ProbabilityMaps, ProviderError>;
}
