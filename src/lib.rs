#![doc = include_str!("../README.md")]

// Public modules (stable-ish surface)
pub mod config;
pub mod convert;
pub mod error;
pub mod image;
pub mod provider;
pub mod report;
pub mod types;

// Stage modules – public so tools can drive individual stages, but
// considered unstable internals.
pub mod calibrate;
pub mod layout;
pub mod normalize;
pub mod quality;
pub mod reconstruct;
pub mod segment;
pub mod trace;

// --- High-level re-exports -------------------------------------------------

// Main entry points: converter + results.
pub use crate::config::{load_config, ConvertConfig};
pub use crate::convert::{CancelToken, Converter};
pub use crate::error::{ConvertError, ProviderError};
pub use crate::types::{
    CalibrationHints, CalibrationParams, GridSpec, LeadId, QualityFlag, Signal, SignalBundle,
};

// Collaborator contracts implemented by external model servers.
pub use crate::provider::{
    DetectedRegion, LayoutProvider, ProbabilityMaps, SegmentationProvider,
};

// Job report returned next to the bundle.
pub use crate::report::ConversionReport;

// --- Prelude ---------------------------------------------------------------

/// Small prelude for quick experiments.
///
/// ```no_run
/// use ecg2signal::prelude::*;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// # struct MyLayout;
/// # impl LayoutProvider for MyLayout {
/// #     fn detect(&self, _: &RasterImage) -> Result<Vec<DetectedRegion>, ProviderError> {
/// #         Ok(vec![])
/// #     }
/// # }
/// # struct MySegmentation;
/// # impl SegmentationProvider for MySegmentation {
/// #     fn segment(&self, _: &RasterImage) -> Result<ProbabilityMaps, ProviderError> {
/// #         unimplemented!()
/// #     }
/// # }
/// let page = ecg2signal::image::io::load_grayscale(std::path::Path::new("ecg.png"))?;
/// let converter = Converter::new(ConvertConfig::default());
/// let bundle = converter.convert(&page, &CalibrationHints::default(), &MyLayout, &MySegmentation)?;
/// for (lead, signal) in bundle.iter() {
///     println!("{lead}: {} samples at {} Hz", signal.samples.len(), signal.sample_rate_hz);
/// }
/// # Ok(())
/// # }
/// ```
pub mod prelude {
    pub use crate::image::RasterImage;
    pub use crate::provider::{
        DetectedRegion, LayoutProvider, ProbabilityMaps, SegmentationProvider,
    };
    pub use crate::{
        CalibrationHints, CancelToken, ConvertConfig, ConvertError, Converter, LeadId,
        ProviderError, QualityFlag, SignalBundle,
    };
}
