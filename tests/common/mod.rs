//! Synthetic ECG pages and deterministic collaborator stubs for the
//! end-to-end tests.

use ecg2signal::image::RasterImage;
use ecg2signal::provider::{
    DetectedRegion, LayoutProvider, ProbabilityMaps, SegmentationProvider,
};
use ecg2signal::types::BoundingBox;
use ecg2signal::{ConvertConfig, LeadId, ProviderError};
use std::ops::Range;

/// Default configuration with a lighter denoise pass; the synthetic pages
/// are clean and the full-strength filter only slows the tests down.
/// Also wires pipeline logs into the test harness (`RUST_LOG=debug`).
pub fn test_config() -> ConvertConfig {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut config = ConvertConfig::default();
    config.normalize.denoise_radius = 1;
    config
}

pub const PAGE_W: usize = 2000;
pub const PAGE_H: usize = 1600;
/// Rendered grid scale: one millimetre of paper per 8 pixels.
pub const PX_PER_MM: f32 = 8.0;
/// Horizontal pixels per second at 25 mm/s paper speed.
pub const PX_PER_S: f32 = PX_PER_MM * 25.0;

const CELL_W: usize = PAGE_W / 4;
const WAVEFORM_H: usize = PAGE_H * 3 / 4;
const CELL_H: usize = WAVEFORM_H / 3;

/// What to draw on the synthetic page.
pub struct PageSpec {
    /// Rule the 1 mm / 5 mm grid.
    pub grid: bool,
    /// Sine amplitude drawn on every lead, millivolts at 10 mm/mV.
    pub amplitude_mv: f32,
    pub frequency_hz: f32,
    /// When set, only this lead carries the sine; every other lead gets a
    /// flat baseline trace.
    pub sine_only_on: Option<LeadId>,
    /// Erase the trace over this local column range of one lead.
    pub gap: Option<(LeadId, Range<usize>)>,
}

impl Default for PageSpec {
    fn default() -> Self {
        Self {
            grid: true,
            amplitude_mv: 0.5,
            frequency_hz: 2.5,
            sine_only_on: None,
            gap: None,
        }
    }
}

/// Grid cell of one standard lead, column-major as printed.
pub fn lead_cell(lead: LeadId) -> BoundingBox {
    if lead == LeadId::Rhythm {
        return BoundingBox::new(0, WAVEFORM_H, PAGE_W, PAGE_H - WAVEFORM_H);
    }
    let index = LeadId::STANDARD.iter().position(|&l| l == lead).unwrap();
    let col = index / 3;
    let row = index % 3;
    BoundingBox::new(col * CELL_W, row * CELL_H, CELL_W, CELL_H)
}

/// Render a page: ruled grid, one sine trace per lead, rhythm strip.
pub fn render_page(spec: &PageSpec) -> RasterImage {
    let mut img = RasterImage::blank(PAGE_W, PAGE_H);
    if spec.grid {
        draw_grid(&mut img);
    }
    let amp_px = spec.amplitude_mv * 10.0 * PX_PER_MM;
    let amp_for = |lead: LeadId| match spec.sine_only_on {
        Some(active) if active != lead => 0.0,
        _ => amp_px,
    };
    for lead in LeadId::STANDARD {
        draw_sine(&mut img, lead, amp_for(lead), spec.frequency_hz, &spec.gap);
    }
    draw_sine(
        &mut img,
        LeadId::Rhythm,
        amp_for(LeadId::Rhythm),
        spec.frequency_hz,
        &spec.gap,
    );
    img
}

fn draw_grid(img: &mut RasterImage) {
    let minor = PX_PER_MM as usize;
    for x in (0..PAGE_W).step_by(minor) {
        let shade = if (x / minor) % 5 == 0 { 170u8 } else { 200u8 };
        for y in 0..PAGE_H {
            darken(img, x, y, shade);
        }
    }
    for y in (0..PAGE_H).step_by(minor) {
        let shade = if (y / minor) % 5 == 0 { 170u8 } else { 200u8 };
        for x in 0..PAGE_W {
            darken(img, x, y, shade);
        }
    }
}

fn draw_sine(
    img: &mut RasterImage,
    lead: LeadId,
    amp_px: f32,
    freq_hz: f32,
    gap: &Option<(LeadId, Range<usize>)>,
) {
    let cell = lead_cell(lead);
    let cy = cell.y as f32 + cell.height as f32 * 0.5;
    let row_at = |x: usize| {
        let t = x as f32 / PX_PER_S;
        cy - amp_px * (2.0 * std::f32::consts::PI * freq_hz * t).sin()
    };
    for x in cell.x..cell.x2() {
        if let Some((gap_lead, range)) = gap {
            if *gap_lead == lead && range.contains(&(x - cell.x)) {
                continue;
            }
        }
        // Connect to the previous column like a pen stroke would, so the
        // drawn curve has no sub-pixel breaks on steep slopes.
        let y = row_at(x);
        let y_prev = if x > cell.x { row_at(x - 1) } else { y };
        let lo = y.min(y_prev).round().max(1.0) as usize - 1;
        let hi = (y.max(y_prev).round() as usize + 2).min(PAGE_H - 1);
        for yy in lo..=hi {
            darken(img, x, yy, 0);
        }
    }
}

fn darken(img: &mut RasterImage, x: usize, y: usize, value: u8) {
    let px = &mut img.data[y * img.width + x];
    *px = (*px).min(value);
}

/// Layout collaborator returning a fixed detection set.
pub struct TruthLayout(pub Vec<DetectedRegion>);

impl TruthLayout {
    /// All 12 leads plus the rhythm strip, on their true cells.
    pub fn complete() -> Self {
        let mut regions: Vec<DetectedRegion> = LeadId::STANDARD
            .iter()
            .map(|&lead| DetectedRegion {
                lead,
                bbox: lead_cell(lead),
                confidence: 0.9,
            })
            .collect();
        regions.push(DetectedRegion {
            lead: LeadId::Rhythm,
            bbox: lead_cell(LeadId::Rhythm),
            confidence: 0.9,
        });
        Self(regions)
    }

    /// Only the first `n` standard leads.
    pub fn partial(n: usize) -> Self {
        let mut t = Self::complete();
        t.0.truncate(n);
        t
    }
}

impl LayoutProvider for TruthLayout {
    fn detect(&self, _image: &RasterImage) -> Result<Vec<DetectedRegion>, ProviderError> {
        Ok(self.0.clone())
    }
}

/// Idealized segmentation: near-black pixels are trace ink, mid-grey pixels
/// are grid, nothing is text.
pub struct ThresholdSegmentation;

impl SegmentationProvider for ThresholdSegmentation {
    fn segment(&self, crop: &RasterImage) -> Result<ProbabilityMaps, ProviderError> {
        let n = crop.width * crop.height;
        let mut grid = vec![0.0f32; n];
        let mut trace = vec![0.0f32; n];
        for (i, &px) in crop.data.iter().enumerate() {
            if px < 80 {
                trace[i] = 1.0;
            } else if px < 230 {
                grid[i] = 1.0;
            }
        }
        Ok(ProbabilityMaps {
            width: crop.width,
            height: crop.height,
            grid,
            trace,
            text: vec![0.0; n],
        })
    }
}
