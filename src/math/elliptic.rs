use std::f64::consts::FRAC_PI_2;

use crate::error::{GeometryError, Result};

/// Upper bound on arithmetic-geometric mean iterations (converges quadratically).
const MAX_AGM_ITERATIONS: usize = 64;

/// Complete elliptic integral of the second kind, `E(m)`, with parameter `m = k²`.
///
/// Evaluated with the arithmetic-geometric mean:
/// `E(m) = K(m) * (1 - sum(2^(n-1) * c_n^2))`, `K(m) = pi / (2 * agm(1, sqrt(1 - m)))`.
///
/// # Errors
///
/// Returns an error if `m` lies outside `[0, 1]`.
pub fn complete_elliptic_e(m: f64) -> Result<f64> {
    if !(0.0..=1.0).contains(&m) {
        return Err(GeometryError::ParameterOutOfRange {
            parameter: "m",
            value: m,
            min: 0.0,
            max: 1.0,
        }
        .into());
    }
    if (1.0 - m).abs() < f64::EPSILON {
        return Ok(1.0);
    }

    let mut a = 1.0;
    let mut g = (1.0 - m).sqrt();
    let mut weight = 0.5;
    let mut sum = weight * m;

    for _ in 0..MAX_AGM_ITERATIONS {
        let c = 0.5 * (a - g);
        if c.abs() < f64::EPSILON * a {
            break;
        }
        let next_a = 0.5 * (a + g);
        g = (a * g).sqrt();
        a = next_a;
        weight *= 2.0;
        sum += weight * c * c;
    }

    Ok(FRAC_PI_2 / a * (1.0 - sum))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn circle_limit() {
        assert_relative_eq!(complete_elliptic_e(0.0).unwrap(), FRAC_PI_2, epsilon = 1e-14);
    }

    #[test]
    fn degenerate_limit() {
        assert_relative_eq!(complete_elliptic_e(1.0).unwrap(), 1.0, epsilon = 1e-14);
    }

    #[test]
    fn half_parameter() {
        // Tabulated value of E(1/2).
        assert_relative_eq!(
            complete_elliptic_e(0.5).unwrap(),
            1.350_643_881_047_675_5,
            epsilon = 1e-12
        );
    }

    #[test]
    fn ellipse_perimeter() {
        // a = 2, b = 1: perimeter = 4a E(1 - b^2/a^2) ~= 9.688448220547675
        let perimeter = 8.0 * complete_elliptic_e(0.75).unwrap();
        assert_relative_eq!(perimeter, 9.688_448_220_547_675, epsilon = 1e-10);
    }

    #[test]
    fn out_of_range_fails() {
        assert!(complete_elliptic_e(-0.1).is_err());
        assert!(complete_elliptic_e(1.5).is_err());
    }
}
