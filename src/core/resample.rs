use image::{RgbImage, RgbaImage};
use rayon::prelude::*;

use super::{round_half_even, DOWNSAMPLE_TOLERANCE};
use crate::error::{Result, StandardizeError};
use crate::source::PyramidSource;

/// First level whose downsample lies within [`DOWNSAMPLE_TOLERANCE`] of `target_downsample`.
pub fn select_level<S: PyramidSource + ?Sized>(source: &S, target_downsample: f64) -> Option<u32> {
    (0..source.level_count()).find(|&level| within_tolerance(source.level_downsample(level), target_downsample))
}

/// [`select_level`] over a plain list of downsample factors.
pub fn select_level_in(downsamples: &[f64], target_downsample: f64) -> Option<u32> {
    downsamples
        .iter()
        .position(|&d| within_tolerance(d, target_downsample))
        .map(|i| i as u32)
}

fn within_tolerance(downsample: f64, target: f64) -> bool {
    downsample >= target - DOWNSAMPLE_TOLERANCE && downsample <= target + DOWNSAMPLE_TOLERANCE
}

/// Scale from a source magnification to a requested one.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScalePlan {
    pub fold_change: f64,
    /// Keep every `step`-th pixel on both axes.
    pub step: u32,
}

impl ScalePlan {
    /// Only downsampling (or identity) is supported.
    pub fn new(original_power: f64, target_power: f64) -> Result<Self> {
        if !(target_power.is_finite() && target_power > 0.0) {
            return Err(StandardizeError::InvalidTargetPower(target_power));
        }
        let fold_change = target_power / original_power;
        if fold_change > 1.0 {
            return Err(StandardizeError::UpsampleUnsupported {
                from: original_power,
                to: target_power,
            });
        }
        let step = round_half_even(1.0 / fold_change) as u32;
        Ok(Self { fold_change, step: step.max(1) })
    }

    /// `dims * fold_change`, truncated.
    pub fn nominal_dimensions(&self, dims: (u32, u32)) -> (u32, u32) {
        (
            (dims.0 as f64 * self.fold_change) as u32,
            (dims.1 as f64 * self.fold_change) as u32,
        )
    }

    /// Dimensions produced by [`decimate`].
    pub fn output_dimensions(&self, dims: (u32, u32)) -> (u32, u32) {
        (dims.0.div_ceil(self.step), dims.1.div_ceil(self.step))
    }
}

/// Keep the first three channels of an RGBA buffer.
pub fn drop_alpha(rgba: &RgbaImage) -> RgbImage {
    let (w, h) = rgba.dimensions();
    let mut rgb = vec![0u8; w as usize * h as usize * 3];
    rgb.par_chunks_exact_mut(3)
        .zip(rgba.as_raw().par_chunks_exact(4))
        .for_each(|(dst, src)| dst.copy_from_slice(&src[..3]));
    // Length is w * h * 3 by construction
    RgbImage::from_raw(w, h, rgb).unwrap_or_else(|| RgbImage::new(w, h))
}

/// Nearest-neighbour decimation: every `step`-th pixel starting at (0, 0).
pub fn decimate(src: &RgbImage, step: u32) -> RgbImage {
    let step = step.max(1);
    let (w, h) = src.dimensions();
    if step == 1 {
        return src.clone();
    }
    let out_w = w.div_ceil(step);
    let out_h = h.div_ceil(step);
    let src_stride = w as usize * 3;
    let out_stride = out_w as usize * 3;
    let step = step as usize;
    let raw = src.as_raw();

    let mut out = vec![0u8; out_stride * out_h as usize];
    out.par_chunks_exact_mut(out_stride.max(1))
        .enumerate()
        .for_each(|(oy, row)| {
            let src_row = &raw[oy * step * src_stride..];
            for ox in 0..out_w as usize {
                let si = ox * step * 3;
                row[ox * 3..ox * 3 + 3].copy_from_slice(&src_row[si..si + 3]);
            }
        });
    RgbImage::from_raw(out_w, out_h, out).unwrap_or_else(|| RgbImage::new(out_w, out_h))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemoryPyramid;
    use image::Rgb;

    #[test]
    fn test_select_level_tolerance() {
        assert_eq!(select_level_in(&[1.0, 3.95], 4.0), Some(1));
        assert_eq!(select_level_in(&[1.0, 4.08], 4.0), Some(1));
        assert_eq!(select_level_in(&[1.0, 4.2], 4.0), None);
        assert_eq!(select_level_in(&[1.0, 2.0, 3.85], 4.0), None);
    }

    #[test]
    fn test_select_level_first_match() {
        assert_eq!(select_level_in(&[1.0, 3.98, 4.02, 16.0], 4.0), Some(1));
        assert_eq!(select_level_in(&[1.0, 4.0, 16.0], 1.0), Some(0));
    }

    #[test]
    fn test_select_level_on_source() {
        let pyr = MemoryPyramid::uniform((4000, 4000), &[1.0, 4.000_5, 16.001]);
        assert_eq!(select_level(&pyr, 4.0), Some(1));
        assert_eq!(select_level(&pyr, 16.0), Some(2));
        assert_eq!(select_level(&pyr, 8.0), None);
    }

    #[test]
    fn test_scale_plan_40_to_10() {
        let plan = ScalePlan::new(40.0, 10.0).unwrap();
        assert_eq!(plan.fold_change, 0.25);
        assert_eq!(plan.step, 4);
        assert_eq!(plan.nominal_dimensions((4000, 4000)), (1000, 1000));
        assert_eq!(plan.output_dimensions((4000, 4000)), (1000, 1000));
    }

    #[test]
    fn test_scale_plan_rounds_step() {
        // 40 -> 15: fold 0.375, 1/fold 2.67 -> 3
        let plan = ScalePlan::new(40.0, 15.0).unwrap();
        assert_eq!(plan.step, 3);
        assert_eq!(plan.output_dimensions((100, 50)), (34, 17));
        assert_eq!(ScalePlan::new(20.0, 20.0).unwrap().step, 1);
    }

    #[test]
    fn test_scale_plan_step_ties_to_even() {
        // 1/fold = 2.5 in all three cases
        let plan = ScalePlan::new(40.0, 16.0).unwrap();
        assert_eq!(plan.step, 2);
        assert_eq!(plan.output_dimensions((4000, 4000)), (2000, 2000));
        assert_eq!(ScalePlan::new(5.0, 2.0).unwrap().step, 2);
        assert_eq!(ScalePlan::new(10.0, 4.0).unwrap().step, 2);
    }

    #[test]
    fn test_scale_plan_rejects_upsampling() {
        assert!(matches!(
            ScalePlan::new(20.0, 40.0),
            Err(StandardizeError::UpsampleUnsupported { .. })
        ));
        assert!(matches!(
            ScalePlan::new(20.0, 0.0),
            Err(StandardizeError::InvalidTargetPower(_))
        ));
        assert!(ScalePlan::new(20.0, f64::NAN).is_err());
    }

    #[test]
    fn test_drop_alpha() {
        let rgba = RgbaImage::from_fn(3, 2, |x, y| image::Rgba([x as u8, y as u8, 7, 128]));
        let rgb = drop_alpha(&rgba);
        assert_eq!(rgb.dimensions(), (3, 2));
        assert_eq!(rgb.get_pixel(2, 1), &Rgb([2, 1, 7]));
    }

    #[test]
    fn test_decimate_picks_every_step() {
        let src = RgbImage::from_fn(10, 7, |x, y| Rgb([x as u8, y as u8, 0]));
        let out = decimate(&src, 4);
        assert_eq!(out.dimensions(), (3, 2));
        assert_eq!(out.get_pixel(0, 0), &Rgb([0, 0, 0]));
        assert_eq!(out.get_pixel(2, 1), &Rgb([8, 4, 0]));
    }

    #[test]
    fn test_decimate_identity() {
        let src = RgbImage::from_fn(5, 5, |x, y| Rgb([x as u8, y as u8, 1]));
        assert_eq!(decimate(&src, 1), src);
    }
}
