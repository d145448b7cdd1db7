use approx::assert_relative_eq;
use image::Rgb;
use tempfile::TempDir;

use wsi_standardize::source::FlatImageSource;
use wsi_standardize::{extract, MemoryPyramid, PixelSource, PyramidSource, Slide, StandardizationRequest};

#[test]
fn test_4000px_40x_to_10x() {
    let dir = TempDir::new().unwrap();
    let pyr = MemoryPyramid::uniform((4000, 4000), &[1.0]).with_objective("40", "0.25");
    let slide = Slide::new("synthetic.svs", pyr).unwrap();

    let out = dir.path().join("synthetic.tiff");
    let outcome = slide
        .save_downsampled(&StandardizationRequest::new(10.0, &out))
        .unwrap();

    assert_eq!(outcome.source, PixelSource::Base);
    assert_relative_eq!(outcome.fold_change, 0.25);
    assert_eq!(outcome.step, 4);
    assert_eq!(outcome.nominal_dimensions, (1000, 1000));
    assert_eq!(outcome.output_dimensions, (1000, 1000));

    let written = image::open(&out).unwrap().to_rgb8();
    assert_eq!(written.dimensions(), (1000, 1000));
    // Nearest neighbour: output (x, y) is base (4x, 4y)
    assert_eq!(written.get_pixel(10, 20), &Rgb([40, 80, 0]));
    assert_eq!(written.get_pixel(100, 100), &Rgb([(400 % 251) as u8, (400 % 241) as u8, 0]));
}

#[test]
fn test_output_reads_back_as_flat_source() {
    let dir = TempDir::new().unwrap();
    let pyr = MemoryPyramid::uniform((1200, 900), &[1.0, 4.0]).with_objective("20", "0.5");
    let slide = Slide::new("S-9.svs", pyr).unwrap();

    let out = dir.path().join("S-9.tiff");
    slide
        .save_downsampled(&StandardizationRequest::new(5.0, &out).with_blur(true))
        .unwrap();

    let flat = FlatImageSource::open(&out).unwrap();
    assert_eq!(flat.level_count(), 1);
    assert_eq!(flat.dimensions(), (300, 225));
    let meta = extract(&flat).unwrap();
    assert_relative_eq!(meta.objective_power, 5.0);
    assert_relative_eq!(meta.mpp_x, 2.0);
    assert!(meta.correct_power_dims);

    let region = flat.read_region((0, 0), 0, (4, 4)).unwrap();
    assert_eq!(region.dimensions(), (4, 4));
}

#[test]
fn test_every_pyramid_level_estimate() {
    let pyr = MemoryPyramid::uniform((98304, 65536), &[1.0, 4.0, 16.0, 64.0]).with_objective("40", "0.252");
    let meta = extract(&pyr).unwrap();
    assert_eq!(meta.levels[0].estimated_magnification, 40.0);
    for (level, expected) in meta.levels.iter().zip([40.0, 10.0, 2.5, 0.62]) {
        assert_relative_eq!(level.estimated_magnification, expected);
    }
    let ds = meta.downsamples();
    assert!(ds.windows(2).all(|w| w[0] <= w[1]));
}
