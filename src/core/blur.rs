//! Separable Gaussian blur for interleaved RGB buffers.
//!
//! The horizontal pass is written to a memory-mapped scratch file as 8.8
//! fixed point, then the vertical pass reads it back and overwrites the
//! source buffer. Only the source image has to be resident; the scratch
//! buffer is paged by the OS. Edges clamp to the nearest pixel and the
//! kernel is truncated at 4 sigma.
use std::path::PathBuf;

use image::RgbImage;
use memmap2::MmapMut;
use rayon::prelude::*;

use crate::error::{Result, StandardizeError};

const TRUNCATE_SIGMAS: f32 = 4.0;
const FIXED_SCALE: f32 = 256.0;

/// Normalized 1-D Gaussian kernel of radius `round(4 * sigma)`.
pub fn gaussian_kernel(sigma: f32) -> Vec<f32> {
    let radius = (TRUNCATE_SIGMAS * sigma + 0.5) as i32;
    let denom = 2.0 * sigma * sigma;
    let mut kernel: Vec<f32> = (-radius..=radius)
        .map(|i| (-((i * i) as f32) / denom).exp())
        .collect();
    let sum: f32 = kernel.iter().sum();
    kernel.iter_mut().for_each(|k| *k /= sum);
    kernel
}

fn scratch_err(source: std::io::Error) -> StandardizeError {
    StandardizeError::io(PathBuf::from("<blur scratch file>"), source)
}

/// Blur `img` in place.
pub fn gaussian_blur_rgb(img: &mut RgbImage, sigma: f32) -> Result<()> {
    let (w, h) = img.dimensions();
    let w = w as usize;
    let h = h as usize;
    let stride = w * 3;
    let len = h * stride;
    if len == 0 {
        return Ok(());
    }

    let kernel = gaussian_kernel(sigma);
    let radius = (kernel.len() / 2) as isize;

    let file = tempfile::tempfile().map_err(scratch_err)?;
    file.set_len((len * std::mem::size_of::<u16>()) as u64)
        .map_err(scratch_err)?;
    let mut mmap = unsafe { MmapMut::map_mut(&file) }.map_err(scratch_err)?;
    // Mappings are page aligned, so u16 alignment holds.
    let scratch: &mut [u16] = unsafe { std::slice::from_raw_parts_mut(mmap.as_mut_ptr() as *mut u16, len) };

    let src: &mut [u8] = &mut *img;

    // Pass 1: horizontal, src -> scratch
    scratch
        .par_chunks_mut(stride)
        .zip(src.par_chunks(stride))
        .for_each(|(dst_row, src_row)| {
            for x in 0..w {
                for c in 0..3 {
                    let mut acc = 0.0f32;
                    for (k, weight) in kernel.iter().enumerate() {
                        let sx = (x as isize + k as isize - radius).clamp(0, w as isize - 1) as usize;
                        acc += src_row[sx * 3 + c] as f32 * weight;
                    }
                    dst_row[x * 3 + c] = (acc * FIXED_SCALE).round().clamp(0.0, u16::MAX as f32) as u16;
                }
            }
        });

    // Pass 2: vertical, scratch -> src
    let scratch: &[u16] = scratch;
    src.par_chunks_mut(stride).enumerate().for_each(|(y, dst_row)| {
        for (i, out) in dst_row.iter_mut().enumerate() {
            let mut acc = 0.0f32;
            for (k, weight) in kernel.iter().enumerate() {
                let sy = (y as isize + k as isize - radius).clamp(0, h as isize - 1) as usize;
                acc += scratch[sy * stride + i] as f32 * weight;
            }
            *out = (acc / FIXED_SCALE).round().clamp(0.0, 255.0) as u8;
        }
    });

    drop(mmap);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::GAUSSIAN_SIGMA;
    use image::Rgb;

    #[test]
    fn test_kernel_shape() {
        let k = gaussian_kernel(GAUSSIAN_SIGMA);
        assert_eq!(k.len(), 13);
        let sum: f32 = k.iter().sum();
        assert!((sum - 1.0).abs() < 1e-5);
        assert_eq!(k[0], k[12]);
        assert!(k[6] > k[5] && k[5] > k[4]);
    }

    #[test]
    fn test_constant_image_unchanged() {
        let mut img = RgbImage::from_pixel(17, 9, Rgb([120, 30, 250]));
        gaussian_blur_rgb(&mut img, GAUSSIAN_SIGMA).unwrap();
        assert!(img.pixels().all(|p| p.0 == [120, 30, 250]));
    }

    #[test]
    fn test_impulse_spreads_symmetrically() {
        let mut img = RgbImage::new(21, 21);
        img.put_pixel(10, 10, Rgb([255, 0, 0]));
        gaussian_blur_rgb(&mut img, GAUSSIAN_SIGMA).unwrap();

        let center = img.get_pixel(10, 10)[0];
        assert!(center > 0 && center < 255);
        assert_eq!(img.get_pixel(9, 10)[0], img.get_pixel(11, 10)[0]);
        assert_eq!(img.get_pixel(10, 9)[0], img.get_pixel(10, 11)[0]);
        assert!(img.get_pixel(12, 10)[0] < img.get_pixel(11, 10)[0]);
        // Other channels untouched
        assert!(img.pixels().all(|p| p[1] == 0 && p[2] == 0));
        // Beyond the kernel radius nothing leaks
        assert_eq!(img.get_pixel(0, 0)[0], 0);
    }

    #[test]
    fn test_empty_image() {
        let mut img = RgbImage::new(0, 0);
        gaussian_blur_rgb(&mut img, GAUSSIAN_SIGMA).unwrap();
    }
}
