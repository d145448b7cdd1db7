use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use image::{ImageReader, RgbImage};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::core::blur::gaussian_blur_rgb;
use crate::core::magnification::{extract, SlideMetadata};
use crate::core::resample::{decimate, drop_alpha, ScalePlan};
use crate::core::{round_to, GAUSSIAN_SIGMA, MAGNIFICATION_DECIMALS};
use crate::error::{Result, StandardizeError};
use crate::source::{open_pyramid, PyramidSource};

/// One output file to produce from a slide.
#[derive(Debug, Clone, PartialEq)]
pub struct StandardizationRequest {
    pub target_power: f64,
    pub output_path: PathBuf,
    pub use_proxy: bool,
    pub blur: bool,
}

impl StandardizationRequest {
    pub fn new(target_power: f64, output_path: impl Into<PathBuf>) -> Self {
        Self {
            target_power,
            output_path: output_path.into(),
            use_proxy: false,
            blur: false,
        }
    }

    pub fn with_proxy(mut self, use_proxy: bool) -> Self {
        self.use_proxy = use_proxy;
        self
    }

    pub fn with_blur(mut self, blur: bool) -> Self {
        self.blur = blur;
        self
    }
}

/// Where the pixels of an output came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PixelSource {
    Proxy,
    Level(u32),
    Base,
}

impl fmt::Display for PixelSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PixelSource::Proxy => write!(f, "proxy"),
            PixelSource::Level(level) => write!(f, "level {}", level),
            PixelSource::Base => write!(f, "base"),
        }
    }
}

/// Result of one [`Slide::save_downsampled`] call.
#[derive(Debug, Clone, PartialEq)]
pub struct StandardizeOutcome {
    pub source: PixelSource,
    pub original_power: f64,
    pub fold_change: f64,
    pub step: u32,
    pub nominal_dimensions: (u32, u32),
    pub output_dimensions: (u32, u32),
}

/// JSON written next to every output image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputSidecar {
    pub slide_id: String,
    pub source_path: PathBuf,
    pub source: PixelSource,
    pub target_power: f64,
    pub original_power: f64,
    pub fold_change: f64,
    pub step: u32,
    pub width: u32,
    pub height: u32,
    pub mpp_x: f64,
    pub mpp_y: f64,
}

impl OutputSidecar {
    pub fn path_for(image_path: &Path) -> PathBuf {
        image_path.with_extension("json")
    }
}

/// A pyramid image with its metadata computed at construction and an
/// optional proxy image standing in for the base level.
pub struct Slide<S: PyramidSource = Box<dyn PyramidSource>> {
    path: PathBuf,
    source: S,
    metadata: SlideMetadata,
    proxy: Option<PathBuf>,
}

impl Slide {
    /// Open with the OpenSlide backend.
    pub fn open(path: &Path) -> Result<Self> {
        Slide::new(path, open_pyramid(path)?)
    }
}

impl<S: PyramidSource> Slide<S> {
    pub fn new(path: impl Into<PathBuf>, source: S) -> Result<Self> {
        let path = path.into();
        info!("Estimating magnifications for {}", path.display());
        let metadata = extract(&source)?;
        Ok(Self {
            path,
            source,
            metadata,
            proxy: None,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File name without extension.
    pub fn slide_id(&self) -> String {
        slide_id(&self.path)
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn metadata(&self) -> &SlideMetadata {
        &self.metadata
    }

    pub fn estimated_magnifications(&self) -> Vec<f64> {
        self.metadata.magnifications()
    }

    /// Bind a flat image registered 1:1 with the base level. Replaces any previous binding.
    pub fn add_proxy(&mut self, path: impl Into<PathBuf>) -> Result<()> {
        let path = path.into();
        if !path.is_file() {
            return Err(StandardizeError::ProxyNotFound(path));
        }
        self.proxy = Some(path);
        Ok(())
    }

    pub fn proxy(&self) -> Option<&Path> {
        self.proxy.as_deref()
    }

    /// Resample to `request.target_power` and write the image plus its sidecar.
    pub fn save_downsampled(&self, request: &StandardizationRequest) -> Result<StandardizeOutcome> {
        let (source, original_power) = self.choose_source(request)?;
        let plan = ScalePlan::new(original_power, request.target_power)?;

        let mut pixels = match source {
            PixelSource::Proxy => {
                // choose_source guarantees a binding
                let proxy = self.proxy.as_deref().ok_or(StandardizeError::NoProxyBound)?;
                let img = load_proxy(proxy)?;
                if img.dimensions() != self.metadata.dimensions {
                    warn!(
                        "Proxy {} is {:?}, base level is {:?}",
                        proxy.display(),
                        img.dimensions(),
                        self.metadata.dimensions
                    );
                }
                img
            }
            PixelSource::Level(level) => {
                info!("\tUsing magnification found in slide object");
                self.read_level(level)?
            }
            PixelSource::Base => self.read_level(0)?,
        };

        if request.blur {
            gaussian_blur_rgb(&mut pixels, GAUSSIAN_SIGMA)?;
        }

        let nominal_dimensions = plan.nominal_dimensions(pixels.dimensions());
        let downsampled = decimate(&pixels, plan.step);
        drop(pixels);
        let output_dimensions = downsampled.dimensions();
        info!(
            "\tNew dimensions for {}x -> {}x: {:?} (actual: {:?})",
            original_power, request.target_power, nominal_dimensions, output_dimensions
        );

        downsampled
            .save(&request.output_path)
            .map_err(|source| StandardizeError::ImageWrite {
                path: request.output_path.clone(),
                source,
            })?;

        let outcome = StandardizeOutcome {
            source,
            original_power,
            fold_change: plan.fold_change,
            step: plan.step,
            nominal_dimensions,
            output_dimensions,
        };
        self.write_sidecar(request, &outcome)?;
        Ok(outcome)
    }

    fn choose_source(&self, request: &StandardizationRequest) -> Result<(PixelSource, f64)> {
        let base_power = self.metadata.base_magnification();
        if request.use_proxy {
            if self.proxy.is_none() {
                return Err(StandardizeError::NoProxyBound);
            }
            return Ok((PixelSource::Proxy, base_power));
        }
        Ok(match self.metadata.level_for_magnification(request.target_power) {
            Some(level) => (PixelSource::Level(level.index), level.estimated_magnification),
            None => (PixelSource::Base, base_power),
        })
    }

    fn read_level(&self, level: u32) -> Result<RgbImage> {
        let size = self.source.level_dimensions(level);
        let rgba = self.source.read_region((0, 0), level, size)?;
        Ok(drop_alpha(&rgba))
    }

    fn write_sidecar(&self, request: &StandardizationRequest, outcome: &StandardizeOutcome) -> Result<()> {
        // mpp is declared for the base level
        let base_scale = self.metadata.base_magnification() / request.target_power;
        let sidecar = OutputSidecar {
            slide_id: self.slide_id(),
            source_path: self.path.clone(),
            source: outcome.source,
            target_power: request.target_power,
            original_power: outcome.original_power,
            fold_change: outcome.fold_change,
            step: outcome.step,
            width: outcome.output_dimensions.0,
            height: outcome.output_dimensions.1,
            mpp_x: round_to(self.metadata.mpp_x * base_scale, MAGNIFICATION_DECIMALS),
            mpp_y: round_to(self.metadata.mpp_y * base_scale, MAGNIFICATION_DECIMALS),
        };
        let path = OutputSidecar::path_for(&request.output_path);
        let json = serde_json::to_string_pretty(&sidecar).map_err(|e| {
            StandardizeError::io(&path, std::io::Error::new(std::io::ErrorKind::InvalidData, e))
        })?;
        fs::write(&path, json).map_err(|e| StandardizeError::io(&path, e))
    }
}

/// File name of `path` without its extension.
pub fn slide_id(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Decode a flat proxy image without decoder allocation limits.
pub fn load_proxy(path: &Path) -> Result<RgbImage> {
    let decode_err = |source: image::ImageError| StandardizeError::ProxyDecode {
        path: path.to_path_buf(),
        source,
    };
    let mut reader = ImageReader::open(path)
        .map_err(|e| StandardizeError::io(path, e))?
        .with_guessed_format()
        .map_err(|e| StandardizeError::io(path, e))?;
    reader.no_limits();
    Ok(reader.decode().map_err(decode_err)?.to_rgb8())
}
