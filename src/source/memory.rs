use std::collections::BTreeMap;

use image::{Rgba, RgbaImage};

use super::{PyramidSource, MPP_X_KEY, MPP_Y_KEY, OBJECTIVE_POWER_KEY};
use crate::error::{Result, StandardizeError};

/// Synthetic in-memory pyramid.
///
/// Pixels are generated on read: `R = x % 251`, `G = y % 241`, `B = 50 * level`
/// (in level coordinates), fully opaque. The blue channel identifies the level
/// a buffer came from.
#[derive(Debug, Clone)]
pub struct MemoryPyramid {
    level_dimensions: Vec<(u32, u32)>,
    level_downsamples: Vec<f64>,
    properties: BTreeMap<String, String>,
}

impl MemoryPyramid {
    /// Levels with explicit dimensions and declared downsamples, allowing
    /// inconsistent pyramids to be described.
    pub fn from_levels(level_dimensions: Vec<(u32, u32)>, level_downsamples: Vec<f64>) -> Self {
        assert_eq!(
            level_dimensions.len(),
            level_downsamples.len(),
            "one downsample per level"
        );
        Self {
            level_dimensions,
            level_downsamples,
            properties: BTreeMap::new(),
        }
    }

    /// Uniformly scaled pyramid: level `i` is `base / downsamples[i]`, truncated.
    pub fn uniform(base: (u32, u32), downsamples: &[f64]) -> Self {
        let dims = downsamples
            .iter()
            .map(|&d| ((base.0 as f64 / d) as u32, (base.1 as f64 / d) as u32))
            .collect();
        Self::from_levels(dims, downsamples.to_vec())
    }

    pub fn with_property(mut self, key: &str, value: &str) -> Self {
        self.properties.insert(key.to_string(), value.to_string());
        self
    }

    /// Set objective power and isotropic mpp properties.
    pub fn with_objective(self, power: &str, mpp: &str) -> Self {
        self.with_property(OBJECTIVE_POWER_KEY, power)
            .with_property(MPP_X_KEY, mpp)
            .with_property(MPP_Y_KEY, mpp)
    }

    pub fn pixel(level: u32, x: u32, y: u32) -> Rgba<u8> {
        Rgba([(x % 251) as u8, (y % 241) as u8, (level * 50).min(255) as u8, 255])
    }
}

impl PyramidSource for MemoryPyramid {
    fn level_count(&self) -> u32 {
        self.level_dimensions.len() as u32
    }

    fn level_dimensions(&self, level: u32) -> (u32, u32) {
        self.level_dimensions[level as usize]
    }

    fn level_downsample(&self, level: u32) -> f64 {
        self.level_downsamples[level as usize]
    }

    fn property(&self, key: &str) -> Option<String> {
        self.properties.get(key).cloned()
    }

    fn read_region(&self, origin: (u32, u32), level: u32, size: (u32, u32)) -> Result<RgbaImage> {
        if level >= self.level_count() {
            return Err(StandardizeError::Read {
                level,
                reason: format!("level out of range (count {})", self.level_count()),
            });
        }
        let downsample = self.level_downsample(level);
        let x0 = (origin.0 as f64 / downsample) as u32;
        let y0 = (origin.1 as f64 / downsample) as u32;
        Ok(RgbaImage::from_fn(size.0, size.1, |x, y| {
            Self::pixel(level, x0 + x, y0 + y)
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_dimensions() {
        let pyr = MemoryPyramid::uniform((4000, 3000), &[1.0, 4.0, 16.0]);
        assert_eq!(pyr.level_count(), 3);
        assert_eq!(pyr.level_dimensions(1), (1000, 750));
        assert_eq!(pyr.level_dimensions(2), (250, 187));
        assert_eq!(pyr.dimensions(), (4000, 3000));
    }

    #[test]
    fn test_read_region_tags_level() {
        let pyr = MemoryPyramid::uniform((64, 64), &[1.0, 2.0]);
        let img = pyr.read_region((0, 0), 1, (32, 32)).unwrap();
        assert_eq!(img.dimensions(), (32, 32));
        assert_eq!(img.get_pixel(3, 5).0, [3, 5, 50, 255]);
        assert!(pyr.read_region((0, 0), 2, (1, 1)).is_err());
    }
}
