use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use image::{ImageReader, RgbaImage};

use super::{PyramidSource, MPP_X_KEY, MPP_Y_KEY, OBJECTIVE_POWER_KEY};
use crate::error::{Result, StandardizeError};
use crate::slide::OutputSidecar;

/// Single-level flat image, with slide properties taken from the JSON
/// sidecar written next to it by [`crate::slide::Slide::save_downsampled`].
///
/// Without a sidecar the source has no properties.
pub struct FlatImageSource {
    path: PathBuf,
    dimensions: (u32, u32),
    properties: BTreeMap<String, String>,
}

impl FlatImageSource {
    pub fn open(path: &Path) -> Result<Self> {
        let dimensions = image::image_dimensions(path).map_err(|e| StandardizeError::Open {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let mut properties = BTreeMap::new();
        let sidecar_path = OutputSidecar::path_for(path);
        if sidecar_path.is_file() {
            let text = fs::read_to_string(&sidecar_path)
                .map_err(|e| StandardizeError::io(&sidecar_path, e))?;
            let sidecar: OutputSidecar =
                serde_json::from_str(&text).map_err(|e| StandardizeError::Open {
                    path: sidecar_path.clone(),
                    reason: format!("invalid sidecar: {}", e),
                })?;
            properties.insert(OBJECTIVE_POWER_KEY.to_string(), sidecar.target_power.to_string());
            properties.insert(MPP_X_KEY.to_string(), sidecar.mpp_x.to_string());
            properties.insert(MPP_Y_KEY.to_string(), sidecar.mpp_y.to_string());
        }

        Ok(Self {
            path: path.to_path_buf(),
            dimensions,
            properties,
        })
    }
}

impl PyramidSource for FlatImageSource {
    fn level_count(&self) -> u32 {
        1
    }

    fn level_dimensions(&self, _level: u32) -> (u32, u32) {
        self.dimensions
    }

    fn level_downsample(&self, _level: u32) -> f64 {
        1.0
    }

    fn property(&self, key: &str) -> Option<String> {
        self.properties.get(key).cloned()
    }

    fn read_region(&self, origin: (u32, u32), level: u32, size: (u32, u32)) -> Result<RgbaImage> {
        if level != 0 {
            return Err(StandardizeError::Read {
                level,
                reason: "flat images have a single level".to_string(),
            });
        }
        let read_err = |reason: String| StandardizeError::Read { level, reason };
        let mut reader = ImageReader::open(&self.path)
            .map_err(|e| read_err(e.to_string()))?
            .with_guessed_format()
            .map_err(|e| read_err(e.to_string()))?;
        reader.no_limits();
        let img = reader.decode().map_err(|e| read_err(e.to_string()))?.to_rgba8();
        Ok(image::imageops::crop_imm(&img, origin.0, origin.1, size.0, size.1).to_image())
    }
}
