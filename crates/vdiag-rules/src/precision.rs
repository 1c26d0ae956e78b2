//! Floating point precision handling
//!
//! Decoded physical values are rounded to the resolution their formula can
//! express, so `3 * 0.1` is reported as `0.3` and not `0.30000000000000004`.

/// Upper bound on reported decimal places
pub const MAX_DECIMALS: u8 = 6;

/// Decimal places used when a formula has no usable resolution
pub const FALLBACK_DECIMALS: u8 = 4;

/// Decimal places needed to show multiples of `step` exactly
///
/// - step 1.0 or 256.0 → 0
/// - step 0.25 → 2
/// - step 100/255 → capped at [`MAX_DECIMALS`]
pub fn decimals_for_step(step: f64) -> u8 {
    if !step.is_finite() || step <= 0.0 {
        return FALLBACK_DECIMALS;
    }

    (0..=MAX_DECIMALS)
        .find(|&decimals| {
            let shifted = step * 10_f64.powi(i32::from(decimals));
            (shifted - shifted.round()).abs() < 1e-9
        })
        .unwrap_or(MAX_DECIMALS)
}

/// Round `value` to `decimals` places
pub fn round_decimals(value: f64, decimals: u8) -> f64 {
    let factor = 10_f64.powi(i32::from(decimals));
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(1.0, 0)]
    #[case(256.0, 0)]
    #[case(0.1, 1)]
    #[case(0.01, 2)]
    #[case(0.25, 2)]
    #[case(0.125, 3)]
    #[case(1.5, 1)]
    #[case(100.0 / 255.0, MAX_DECIMALS)]
    #[case(0.0, FALLBACK_DECIMALS)]
    #[case(f64::NAN, FALLBACK_DECIMALS)]
    fn test_decimals_for_step(#[case] step: f64, #[case] expected: u8) {
        assert_eq!(decimals_for_step(step), expected);
    }

    #[test]
    fn test_round_decimals() {
        assert_eq!(round_decimals(1.4000000000000001, 1), 1.4);
        assert_eq!(round_decimals(91.6, 0), 92.0);
        assert_eq!(round_decimals(0.30000000000000004, 1), 0.3);
        assert_eq!(round_decimals(-40.0, 0), -40.0);
    }
}
