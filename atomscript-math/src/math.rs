//! Numeric helpers backing the script-level math functions.

use crate::types::Scalar;

/// Sine of an angle in degrees.
#[inline]
#[must_use]
pub fn sind(degrees: Scalar) -> Scalar {
    degrees.to_radians().sin()
}

/// Cosine of an angle in degrees.
#[inline]
#[must_use]
pub fn cosd(degrees: Scalar) -> Scalar {
    degrees.to_radians().cos()
}

/// Tangent of an angle in degrees.
#[inline]
#[must_use]
pub fn tand(degrees: Scalar) -> Scalar {
    degrees.to_radians().tan()
}

/// Arc cosine in degrees, input clamped to [-1, 1].
#[must_use]
pub fn acosd(x: Scalar) -> Scalar {
    x.clamp(-1.0, 1.0).acos().to_degrees()
}

/// Square root; negative input yields 0 rather than NaN.
///
/// Scripts routinely feed tiny negative round-off into `sqrt`.
#[must_use]
pub fn sqrt_clamped(x: Scalar) -> Scalar {
    if x <= 0.0 {
        0.0
    } else {
        x.sqrt()
    }
}

/// Standard deviation of a sample (n - 1 denominator); 0 for fewer than
/// two values.
#[must_use]
pub fn stddev(values: &[Scalar]) -> Scalar {
    let n = values.len();
    if n < 2 {
        return 0.0;
    }
    let mean = values.iter().sum::<Scalar>() / n as Scalar;
    let var = values.iter().map(|v| (v - mean) * (v - mean)).sum::<Scalar>() / (n - 1) as Scalar;
    var.sqrt()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::approx_eq;

    #[test]
    fn degree_trig() {
        assert!(approx_eq(sind(90.0), 1.0));
        assert!(approx_eq(cosd(0.0), 1.0));
        assert!(approx_eq(tand(45.0), 1.0));
        assert!(approx_eq(acosd(0.0), 90.0));
    }

    #[test]
    fn acosd_clamps_out_of_range() {
        assert!(approx_eq(acosd(1.0 + 1e-12), 0.0));
        assert!(approx_eq(acosd(-1.0 - 1e-12), 180.0));
    }

    #[test]
    fn sqrt_clamps_negative() {
        assert_eq!(sqrt_clamped(-1e-9), 0.0);
        assert!(approx_eq(sqrt_clamped(4.0), 2.0));
    }

    #[test]
    fn stddev_sample() {
        assert_eq!(stddev(&[1.0]), 0.0);
        assert!(approx_eq(stddev(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]), 2.138_089_935));
    }
}
