pub mod batch;
pub mod core;
pub mod error;
pub mod report;
pub mod slide;
pub mod source;

// Re-exports for easy access
pub use crate::core::magnification::{extract, PyramidLevel, SlideMetadata};
pub use crate::core::resample::{select_level, ScalePlan};
pub use error::{Result, StandardizeError};
pub use slide::{PixelSource, Slide, StandardizationRequest, StandardizeOutcome};
pub use source::{MemoryPyramid, PyramidSource};
