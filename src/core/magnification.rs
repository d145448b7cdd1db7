//! Per-level magnification estimation.
//!
//! Slide formats store the base objective power and relative downsample
//! factors, not an absolute magnification per level. The magnification of a
//! level is reconstructed from its width relative to the base level, and the
//! declared downsample factors are cross-checked against the observed
//! geometry so that malformed pyramids are rejected before any processing.

use serde::Serialize;
use tracing::info;

use super::{round_half_even, round_to, MAGNIFICATION_DECIMALS};
use crate::error::{Result, StandardizeError};
use crate::source::{PyramidSource, MPP_X_KEY, MPP_Y_KEY, OBJECTIVE_POWER_KEY};

/// Known-good (objective power, mpp) pairs.
pub const CANONICAL_POWER_MPP: [(f64, f64); 4] = [(40.0, 0.25), (20.0, 0.5), (10.0, 1.0), (5.0, 2.0)];

/// One level of a slide pyramid.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PyramidLevel {
    pub index: u32,
    pub dimensions: (u32, u32),
    pub downsample: f64,
    pub estimated_magnification: f64,
}

/// Typed slide metadata, built once per opened slide.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SlideMetadata {
    /// Objective power exactly as stored in the slide properties.
    pub declared_objective_power: String,
    pub objective_power: f64,
    pub mpp_x: f64,
    pub mpp_y: f64,
    pub correct_power_dims: bool,
    pub dimensions: (u32, u32),
    pub level_count: u32,
    pub levels: Vec<PyramidLevel>,
}

impl SlideMetadata {
    pub fn magnifications(&self) -> Vec<f64> {
        self.levels.iter().map(|l| l.estimated_magnification).collect()
    }

    pub fn downsamples(&self) -> Vec<f64> {
        self.levels.iter().map(|l| l.downsample).collect()
    }

    pub fn base_magnification(&self) -> f64 {
        self.levels[0].estimated_magnification
    }

    /// First level whose estimated magnification equals `power` exactly.
    pub fn level_for_magnification(&self, power: f64) -> Option<&PyramidLevel> {
        self.levels.iter().find(|l| l.estimated_magnification == power)
    }
}

/// True when `(power, mpp_x, mpp_y)` is one of [`CANONICAL_POWER_MPP`].
pub fn is_canonical_pairing(power: f64, mpp_x: f64, mpp_y: f64) -> bool {
    CANONICAL_POWER_MPP
        .iter()
        .any(|&(p, mpp)| power == p && mpp_x == mpp && mpp_y == mpp)
}

/// Parse a numeric property. Only finite values accepted by `valid` pass.
fn parse_property(key: &str, value: &str, valid: impl Fn(f64) -> bool) -> Result<f64> {
    value
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|&v| v.is_finite() && valid(v))
        .ok_or_else(|| StandardizeError::InvalidProperty {
            key: key.to_string(),
            value: value.to_string(),
        })
}

/// Compute [`SlideMetadata`] for a slide, validating every level against the base.
pub fn extract<S: PyramidSource + ?Sized>(source: &S) -> Result<SlideMetadata> {
    let (power_raw, mpp_x_raw, mpp_y_raw) = match (
        source.property(OBJECTIVE_POWER_KEY),
        source.property(MPP_X_KEY),
        source.property(MPP_Y_KEY),
    ) {
        (Some(power), Some(mpp_x), Some(mpp_y)) => (power, mpp_x, mpp_y),
        (power, mpp_x, mpp_y) => {
            let keys = [
                (OBJECTIVE_POWER_KEY, power.is_none()),
                (MPP_X_KEY, mpp_x.is_none()),
                (MPP_Y_KEY, mpp_y.is_none()),
            ]
            .into_iter()
            .filter(|&(_, missing)| missing)
            .map(|(key, _)| key.to_string())
            .collect();
            return Err(StandardizeError::MissingProperty { keys });
        }
    };

    let objective_power = parse_property(OBJECTIVE_POWER_KEY, &power_raw, |p| p > 0.0)?;
    let mpp_x = round_to(parse_property(MPP_X_KEY, &mpp_x_raw, |_| true)?, MAGNIFICATION_DECIMALS);
    let mpp_y = round_to(parse_property(MPP_Y_KEY, &mpp_y_raw, |_| true)?, MAGNIFICATION_DECIMALS);

    let levels = estimate_levels(source, objective_power)?;

    Ok(SlideMetadata {
        declared_objective_power: power_raw,
        objective_power,
        mpp_x,
        mpp_y,
        correct_power_dims: is_canonical_pairing(objective_power, mpp_x, mpp_y),
        dimensions: source.dimensions(),
        level_count: source.level_count(),
        levels,
    })
}

/// Estimate the magnification of every level from the base objective power.
pub fn estimate_levels<S: PyramidSource + ?Sized>(source: &S, objective_power: f64) -> Result<Vec<PyramidLevel>> {
    let level_count = source.level_count();
    if level_count == 0 {
        return Err(StandardizeError::GeometryMismatch { level: 0 });
    }

    let (base_w, base_h) = source.level_dimensions(0);
    if base_w == 0 || base_h == 0 {
        return Err(StandardizeError::GeometryMismatch { level: 0 });
    }
    let base_ratio = base_w as f64 / base_h as f64;

    info!("Level Downsamples: {:?}", (0..level_count).map(|l| source.level_downsample(l)).collect::<Vec<_>>());
    info!("Level:\tLvl. Dims:\tEst. Mag:");

    let mut levels = Vec::with_capacity(level_count as usize);
    for level in 0..level_count {
        let dimensions = source.level_dimensions(level);
        let downsample = source.level_downsample(level);

        let estimated_magnification = if level == 0 {
            objective_power
        } else {
            let (w, h) = dimensions;
            if w == 0 || h == 0 {
                return Err(StandardizeError::GeometryMismatch { level });
            }
            if downsample < source.level_downsample(level - 1) {
                return Err(StandardizeError::NonMonotonicDownsample { level });
            }

            let inverse_downsample = w as f64 / base_w as f64;
            let level_ratio = w as f64 / h as f64;
            if round_half_even(base_ratio) != round_half_even(level_ratio) {
                return Err(StandardizeError::GeometryMismatch { level });
            }

            let computed = round_half_even(1.0 / inverse_downsample);
            let declared = round_half_even(downsample);
            if computed != declared {
                return Err(StandardizeError::DownsampleMismatch { level, computed, declared });
            }

            round_to(objective_power * inverse_downsample, MAGNIFICATION_DECIMALS)
        };

        info!(
            "{}\t{:?}\t{}",
            level,
            dimensions,
            round_to(estimated_magnification, MAGNIFICATION_DECIMALS)
        );
        levels.push(PyramidLevel {
            index: level,
            dimensions,
            downsample,
            estimated_magnification,
        });
    }

    Ok(levels)
}
