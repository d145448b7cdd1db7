//! Pyramid image sources.
//!
//! A [`PyramidSource`] exposes the geometry, embedded properties and pixel
//! reads of a multi-resolution image. Level 0 is always the base level.

mod flat;
mod memory;
#[cfg(feature = "openslide")]
mod openslide;

pub use flat::FlatImageSource;
pub use memory::MemoryPyramid;
#[cfg(feature = "openslide")]
pub use self::openslide::OpenSlideSource;

use std::path::Path;

use image::RgbaImage;

use crate::error::Result;

pub const OBJECTIVE_POWER_KEY: &str = "openslide.objective-power";
pub const MPP_X_KEY: &str = "openslide.mpp-x";
pub const MPP_Y_KEY: &str = "openslide.mpp-y";

/// Read access to a multi-resolution slide.
///
/// `level` arguments must be below [`PyramidSource::level_count`].
pub trait PyramidSource {
    fn level_count(&self) -> u32;

    /// Pixel dimensions `(width, height)` of a level.
    fn level_dimensions(&self, level: u32) -> (u32, u32);

    /// Ratio of base resolution to this level's resolution.
    fn level_downsample(&self, level: u32) -> f64;

    /// Base level dimensions.
    fn dimensions(&self) -> (u32, u32) {
        self.level_dimensions(0)
    }

    fn property(&self, key: &str) -> Option<String>;

    /// Read `size` pixels starting at `origin` (level-0 coordinates) from `level`.
    fn read_region(&self, origin: (u32, u32), level: u32, size: (u32, u32)) -> Result<RgbaImage>;
}

impl<S: PyramidSource + ?Sized> PyramidSource for Box<S> {
    fn level_count(&self) -> u32 {
        (**self).level_count()
    }

    fn level_dimensions(&self, level: u32) -> (u32, u32) {
        (**self).level_dimensions(level)
    }

    fn level_downsample(&self, level: u32) -> f64 {
        (**self).level_downsample(level)
    }

    fn dimensions(&self) -> (u32, u32) {
        (**self).dimensions()
    }

    fn property(&self, key: &str) -> Option<String> {
        (**self).property(key)
    }

    fn read_region(&self, origin: (u32, u32), level: u32, size: (u32, u32)) -> Result<RgbaImage> {
        (**self).read_region(origin, level, size)
    }
}

/// Opens a slide file as a boxed [`PyramidSource`].
pub type SourceOpener = dyn Fn(&Path) -> Result<Box<dyn PyramidSource>> + Send + Sync;

/// Open a slide with the OpenSlide backend.
#[cfg(feature = "openslide")]
pub fn open_pyramid(path: &Path) -> Result<Box<dyn PyramidSource>> {
    Ok(Box::new(OpenSlideSource::open(path)?))
}

/// Open a slide with the OpenSlide backend (unavailable in this build).
#[cfg(not(feature = "openslide"))]
pub fn open_pyramid(path: &Path) -> Result<Box<dyn PyramidSource>> {
    Err(crate::error::StandardizeError::Open {
        path: path.to_path_buf(),
        reason: "built without the `openslide` feature".to_string(),
    })
}

/// Open a standardized flat output together with its JSON sidecar.
pub fn open_flat(path: &Path) -> Result<Box<dyn PyramidSource>> {
    Ok(Box::new(FlatImageSource::open(path)?))
}
