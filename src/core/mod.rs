pub mod blur;
pub mod magnification;
pub mod resample;

/// Gaussian sigma for the optional pre-decimation blur.
pub const GAUSSIAN_SIGMA: f32 = 1.5;

/// Accepted distance between a level's declared downsample and a requested one.
pub const DOWNSAMPLE_TOLERANCE: f64 = 0.1;

/// Decimal places kept for estimated magnifications and mpp values.
pub const MAGNIFICATION_DECIMALS: i32 = 2;

/// Round to `decimals` places, ties to even.
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let scale = 10f64.powi(decimals);
    (value * scale).round_ties_even() / scale
}

/// Round to the nearest integer, ties to even.
pub fn round_half_even(value: f64) -> f64 {
    value.round_ties_even()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_to() {
        assert_eq!(round_to(0.2527, 2), 0.25);
        assert_eq!(round_to(0.499, 2), 0.5);
        assert_eq!(round_to(2.5, 2), 2.5);
        assert_eq!(round_to(13.3333, 2), 13.33);
    }

    #[test]
    fn test_round_to_ties_to_even() {
        assert_eq!(round_to(0.625, 2), 0.62);
        assert_eq!(round_to(0.125, 2), 0.12);
        assert_eq!(round_to(0.375, 2), 0.38);
        assert_eq!(round_to(1.5625, 2), 1.56);
    }

    #[test]
    fn test_round_half_even() {
        assert_eq!(round_half_even(0.5), 0.0);
        assert_eq!(round_half_even(1.5), 2.0);
        assert_eq!(round_half_even(2.5), 2.0);
        assert_eq!(round_half_even(3.7), 4.0);
    }
}
