//! Owned raster buffers used throughout the pipeline.
//!
//! Stages never mutate an image they received; each stage that changes pixel
//! content returns a fresh buffer. [`RasterImage`] is the 8-bit grayscale
//! page, [`ImageF32`] the normalized float buffer used by numeric code.

mod f32;
mod raster;

pub mod grad;
pub mod io;

pub use self::f32::ImageF32;
pub use self::raster::RasterImage;
