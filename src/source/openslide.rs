use std::collections::BTreeMap;
use std::path::Path;

use image::RgbaImage;
use openslide_rs::{Address, OpenSlide, Region, Size};
use rayon::prelude::*;
use tracing::debug;

use super::PyramidSource;
use crate::error::{Result, StandardizeError};

/// OpenSlide-backed pyramid. Geometry and properties are snapshotted at open time.
pub struct OpenSlideSource {
    slide: OpenSlide,
    level_dimensions: Vec<(u32, u32)>,
    level_downsamples: Vec<f64>,
    properties: BTreeMap<String, String>,
}

impl OpenSlideSource {
    pub fn open(path: &Path) -> Result<Self> {
        let open_err = |reason: String| StandardizeError::Open {
            path: path.to_path_buf(),
            reason,
        };

        let slide = OpenSlide::new(path).map_err(|e| open_err(format!("{:?}", e)))?;
        let level_count = slide
            .get_level_count()
            .map_err(|e| open_err(format!("failed to get level count: {:?}", e)))?;

        let mut level_dimensions = Vec::with_capacity(level_count as usize);
        let mut level_downsamples = Vec::with_capacity(level_count as usize);
        for level in 0..level_count {
            let dims = slide
                .get_level_dimensions(level)
                .map_err(|e| open_err(format!("failed to get dimensions of level {}: {:?}", level, e)))?;
            let downsample = slide
                .get_level_downsample(level)
                .map_err(|e| open_err(format!("failed to get downsample of level {}: {:?}", level, e)))?;
            level_dimensions.push((dims.w, dims.h));
            level_downsamples.push(downsample);
        }

        let mut properties = BTreeMap::new();
        for name in slide.get_property_names() {
            if let Ok(value) = slide.get_property_value(&name) {
                properties.insert(name, value);
            }
        }
        debug!("{}: {} levels, {} properties", path.display(), level_count, properties.len());

        Ok(Self {
            slide,
            level_dimensions,
            level_downsamples,
            properties,
        })
    }
}

impl PyramidSource for OpenSlideSource {
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
        let region = Region {
            address: Address { x: origin.0, y: origin.1 },
            level,
            size: Size { w: size.0, h: size.1 },
        };
        let bgra = self.slide.read_region(&region).map_err(|e| StandardizeError::Read {
            level,
            reason: format!("read_region({},{}) failed: {:?}", origin.0, origin.1, e),
        })?;

        // Pre-multiplied BGRA to straight RGBA
        let mut rgba = vec![0u8; bgra.len()];
        rgba.par_chunks_exact_mut(4)
            .zip(bgra.par_chunks_exact(4))
            .for_each(|(dst, src)| {
                let a = src[3];
                match a {
                    0 => {}
                    255 => {
                        dst[0] = src[2];
                        dst[1] = src[1];
                        dst[2] = src[0];
                        dst[3] = 255;
                    }
                    _ => {
                        let af = a as f32;
                        dst[0] = (src[2] as f32 * 255.0 / af).round().min(255.0) as u8;
                        dst[1] = (src[1] as f32 * 255.0 / af).round().min(255.0) as u8;
                        dst[2] = (src[0] as f32 * 255.0 / af).round().min(255.0) as u8;
                        dst[3] = a;
                    }
                }
            });

        RgbaImage::from_raw(size.0, size.1, rgba).ok_or_else(|| StandardizeError::Read {
            level,
            reason: format!("region buffer does not match {}x{}", size.0, size.1),
        })
    }
}
