use std::f64::consts::PI;

use crate::error::{GeometryError, Result};
use crate::math::elliptic::complete_elliptic_e;
use crate::math::{Point3, TOLERANCE};

use super::CrossSection;

/// An elliptical frustum spanning two node cross sections.
///
/// All quantities are in the native tracing units (µm, µm², µm³); conversion
/// to mm happens in the compartment layer.
#[derive(Debug, Clone)]
pub struct Frustum {
    start: CrossSection,
    end: CrossSection,
    length: f64,
}

impl Frustum {
    /// Creates a frustum between two cross sections.
    #[must_use]
    pub fn new(start: CrossSection, end: CrossSection) -> Self {
        let length = (end.center - start.center).norm();
        Self { start, end, length }
    }

    /// Returns the cross section at the start (position 0).
    #[must_use]
    pub fn start(&self) -> &CrossSection {
        &self.start
    }

    /// Returns the cross section at the end (position 1).
    #[must_use]
    pub fn end(&self) -> &CrossSection {
        &self.end
    }

    /// Axial length: distance between the two cross-section centers.
    #[must_use]
    pub fn length(&self) -> f64 {
        self.length
    }

    /// Lateral surface area.
    ///
    /// Circular sections use `pi * slant * (r0 + r1)`. Elliptical sections
    /// replace `pi` by `2 E(m)` where `E` is the complete elliptic integral of
    /// the second kind and `m` the squared eccentricity scaled by the cone
    /// factor.
    ///
    /// # Errors
    ///
    /// Returns an error if both ends are points, or if the two ends have
    /// different eccentricity ratios.
    pub fn lateral_area(&self) -> Result<f64> {
        let ratio = match (
            self.start.eccentricity_ratio(),
            self.end.eccentricity_ratio(),
        ) {
            (None, None) => {
                return Err(GeometryError::Degenerate("zero radius compartment".into()).into())
            }
            (Some(r), None) | (None, Some(r)) => r,
            (Some(r0), Some(r1)) => {
                if (r0 - r1).abs() > TOLERANCE {
                    return Err(GeometryError::Unsupported(
                        "no formula for an elliptical frustum with mismatched eccentricity"
                            .into(),
                    )
                    .into());
                }
                r0
            }
        };

        let taper = self.start.semi_minor - self.end.semi_minor;
        let slant = self.length.hypot(taper);

        let angle_factor = if (ratio - 1.0).abs() < TOLERANCE {
            PI
        } else {
            let cone_factor = if self.length > TOLERANCE {
                slant / self.length
            } else {
                f64::INFINITY
            };
            let m = (1.0 - ratio * ratio) / (cone_factor * cone_factor);
            2.0 * complete_elliptic_e(m)?
        };

        Ok(angle_factor * slant * (self.start.semi_major + self.end.semi_major))
    }

    /// Closed-form volume of the elliptical frustum.
    #[must_use]
    pub fn volume(&self) -> f64 {
        let (a0, b0, a1, b1) = self.axes();
        PI / 3.0 * self.length * (a0 * b0 + a1 * b1 + 0.5 * (a0 * b1 + a1 * b0))
    }

    /// Share of the volume between the start and the fractional axial
    /// position `x`. Falls back to `x` when the frustum has no volume.
    #[must_use]
    pub fn volume_fraction(&self, x: f64) -> f64 {
        let x = x.clamp(0.0, 1.0);
        let (a0, b0, a1, b1) = self.axes();
        let (da, db) = (a1 - a0, b1 - b0);
        let swept = |t: f64| a0 * b0 * t + 0.5 * (a0 * db + b0 * da) * t * t + da * db * t * t * t / 3.0;
        let whole = swept(1.0);
        if whole <= 0.0 {
            return x;
        }
        swept(x) / whole
    }

    /// Volume-weighted centroid, on the segment between the two centers.
    #[must_use]
    pub fn centroid(&self) -> Point3 {
        let fraction = self.centroid_fraction();
        self.start.center + (self.end.center - self.start.center) * fraction
    }

    /// Fractional axial position of the centroid (0 at start, 1 at end).
    #[must_use]
    pub fn centroid_fraction(&self) -> f64 {
        let volume = self.volume();
        if volume <= 0.0 || self.length <= TOLERANCE {
            return 0.5;
        }
        let (a0, b0, a1, b1) = self.axes();
        let weighted_length =
            PI * self.length.powi(2) * ((a0 * b0 + a0 * b1 + a1 * b0) / 12.0 + 0.25 * a1 * b1);
        weighted_length / volume / self.length
    }

    /// Radius of the cylinder with the same length and volume.
    #[must_use]
    pub fn avg_radius(&self) -> f64 {
        if self.length <= TOLERANCE {
            return 0.5 * (self.start.semi_major + self.end.semi_major);
        }
        (self.volume() / (PI * self.length)).sqrt()
    }

    /// Integral of `1 / cross-sectional area` along the axis between the
    /// fractional positions `x1` and `x2`.
    ///
    /// The closed form depends on which of the axes taper. When both do, the
    /// integrand is `1 / (u^2 + 2 p u + q)` and the sign of the discriminant
    /// `p^2 - q` selects a logarithmic, arctangent or rational antiderivative.
    #[must_use]
    pub fn length_per_area(&self, x1: f64, x2: f64) -> f64 {
        let (x1, x2) = if x2 < x1 { (x2, x1) } else { (x1, x2) };
        let (u1, u2) = (x1 - 0.5, x2 - 0.5);
        let (a0, b0, a1, b1) = self.axes();
        let semi_major = 0.5 * (a0 + a1);
        let semi_minor = 0.5 * (b0 + b1);
        let major_tapers = (a1 - a0).abs() > TOLERANCE;
        let minor_tapers = (b1 - b0).abs() > TOLERANCE;

        let cone_fact = match (major_tapers, minor_tapers) {
            (false, false) => x2 - x1,
            (false, true) => {
                let minor_ratio = semi_minor / (b1 - b0);
                (minor_ratio * ((minor_ratio + u2) / (minor_ratio + u1)).ln()).abs()
            }
            (true, false) => {
                let major_ratio = semi_major / (a1 - a0);
                (major_ratio * ((major_ratio + u2) / (major_ratio + u1)).ln()).abs()
            }
            (true, true) => {
                let major_ratio = semi_major / (a1 - a0);
                let minor_ratio = semi_minor / (b1 - b0);
                let ratio_prod = major_ratio * minor_ratio;
                let avg_ratio = 0.5 * (major_ratio + minor_ratio);
                let discriminant = avg_ratio * avg_ratio - ratio_prod;
                let scale = TOLERANCE * avg_ratio * avg_ratio;

                let integral = if discriminant > scale {
                    // two real roots: logarithmic form
                    let root = discriminant.sqrt();
                    ((u2 + avg_ratio - root) * (u1 + avg_ratio + root)
                        / ((u2 + avg_ratio + root) * (u1 + avg_ratio - root)))
                        .ln()
                        / (2.0 * root)
                } else if discriminant < -scale {
                    // complex roots: arctangent form
                    let root = (-discriminant).sqrt();
                    (((u2 + avg_ratio) / root).atan() - ((u1 + avg_ratio) / root).atan()) / root
                } else {
                    // double root: rational form
                    1.0 / (u1 + avg_ratio) - 1.0 / (u2 + avg_ratio)
                };
                (ratio_prod * integral).abs()
            }
        };

        cone_fact * self.length / (PI * semi_major * semi_minor)
    }

    fn axes(&self) -> (f64, f64, f64, f64) {
        (
            self.start.semi_major,
            self.start.semi_minor,
            self.end.semi_major,
            self.end.semi_minor,
        )
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn p(x: f64, y: f64, z: f64) -> Point3 {
        Point3::new(x, y, z)
    }

    fn circular(r0: f64, r1: f64, length: f64) -> Frustum {
        Frustum::new(
            CrossSection::circle(p(0.0, 0.0, 0.0), r0),
            CrossSection::circle(p(length, 0.0, 0.0), r1),
        )
    }

    #[test]
    fn cylinder_measures() {
        let cyl = circular(2.0, 2.0, 5.0);
        assert_relative_eq!(cyl.length(), 5.0);
        assert_relative_eq!(cyl.lateral_area().unwrap(), 2.0 * PI * 2.0 * 5.0, epsilon = 1e-9);
        assert_relative_eq!(cyl.volume(), PI * 4.0 * 5.0, epsilon = 1e-9);
        assert_relative_eq!(cyl.avg_radius(), 2.0, epsilon = 1e-12);
        assert_relative_eq!(cyl.centroid().x, 2.5, epsilon = 1e-12);
    }

    #[test]
    fn cone_frustum_area_uses_slant() {
        // r0 = 3, r1 = 0, h = 4: slant = 5, lateral area = pi * r * s = 15 pi
        let cone = circular(3.0, 0.0, 4.0);
        assert_relative_eq!(cone.lateral_area().unwrap(), 15.0 * PI, epsilon = 1e-9);
        assert_relative_eq!(cone.volume(), 12.0 * PI, epsilon = 1e-9);
    }

    #[test]
    fn cone_centroid_at_quarter_height() {
        let cone = circular(3.0, 0.0, 4.0);
        assert_relative_eq!(cone.centroid_fraction(), 0.25, epsilon = 1e-12);
        assert_relative_eq!(cone.centroid().x, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn zero_radius_both_ends_is_degenerate() {
        let frustum = circular(0.0, 0.0, 1.0);
        assert!(matches!(
            frustum.lateral_area(),
            Err(crate::error::NeurolisError::Geometry(GeometryError::Degenerate(_)))
        ));
    }

    #[test]
    fn mismatched_eccentricity_is_unsupported() {
        let frustum = Frustum::new(
            CrossSection::new(2.0, 1.0, 0.0, p(0.0, 0.0, 0.0)),
            CrossSection::new(2.0, 2.0, 0.0, p(1.0, 0.0, 0.0)),
        );
        assert!(matches!(
            frustum.lateral_area(),
            Err(crate::error::NeurolisError::Geometry(GeometryError::Unsupported(_)))
        ));
    }

    #[test]
    fn elliptical_cylinder_area_is_perimeter_times_length() {
        let frustum = Frustum::new(
            CrossSection::new(2.0, 1.0, 0.0, p(0.0, 0.0, 0.0)),
            CrossSection::new(2.0, 1.0, 0.0, p(3.0, 0.0, 0.0)),
        );
        let perimeter = 9.688_448_220_547_675;
        assert_relative_eq!(frustum.lateral_area().unwrap(), 3.0 * perimeter, epsilon = 1e-8);
    }

    #[test]
    fn cone_volume_fraction() {
        // radius 5 -> 1: integral of (5 - 4t)^2 is 49/6 at t = 0.5, 31/3 at t = 1
        let cone = circular(5.0, 1.0, 100.0);
        assert_relative_eq!(cone.volume_fraction(0.5), 49.0 / 62.0, epsilon = 1e-12);
        assert_relative_eq!(cone.volume_fraction(1.0), 1.0, epsilon = 1e-12);
        let cyl = circular(2.0, 2.0, 10.0);
        assert_relative_eq!(cyl.volume_fraction(0.3), 0.3, epsilon = 1e-12);
    }

    #[test]
    fn cylinder_length_per_area() {
        let cyl = circular(1.0, 1.0, 10.0);
        assert_relative_eq!(cyl.length_per_area(0.0, 1.0), 10.0 / PI, epsilon = 1e-12);
        assert_relative_eq!(cyl.length_per_area(0.75, 0.25), 5.0 / PI, epsilon = 1e-12);
    }

    #[test]
    fn circular_taper_length_per_area() {
        // r(x) = 2 - x over L = 10: integral of L / (pi r^2) = L / (2 pi)
        let cone = circular(2.0, 1.0, 10.0);
        assert_relative_eq!(cone.length_per_area(0.0, 1.0), 10.0 / (2.0 * PI), epsilon = 1e-10);
    }

    #[test]
    fn single_axis_taper_length_per_area() {
        // a = 2 constant, b: 1 -> 2, L = 1: integral = ln 2 / (2 pi)
        let frustum = Frustum::new(
            CrossSection::new(2.0, 1.0, 0.0, p(0.0, 0.0, 0.0)),
            CrossSection::new(2.0, 2.0, 0.0, p(1.0, 0.0, 0.0)),
        );
        assert_relative_eq!(
            frustum.length_per_area(0.0, 1.0),
            2f64.ln() / (2.0 * PI),
            epsilon = 1e-12
        );
    }

    #[test]
    fn both_axes_taper_logarithmic_branch() {
        // a: 1 -> 2, b: 1 -> 3, L = 1: integral = ln(3/2) / pi
        let frustum = Frustum::new(
            CrossSection::new(1.0, 1.0, 0.0, p(0.0, 0.0, 0.0)),
            CrossSection::new(2.0, 3.0, 0.0, p(1.0, 0.0, 0.0)),
        );
        assert_relative_eq!(frustum.length_per_area(0.0, 1.0), 1.5f64.ln() / PI, epsilon = 1e-12);
    }

    #[test]
    fn length_per_area_is_additive() {
        let frustum = Frustum::new(
            CrossSection::new(1.0, 1.0, 0.0, p(0.0, 0.0, 0.0)),
            CrossSection::new(2.0, 3.0, 0.0, p(4.0, 0.0, 0.0)),
        );
        let whole = frustum.length_per_area(0.0, 1.0);
        let split = frustum.length_per_area(0.0, 0.3) + frustum.length_per_area(0.3, 1.0);
        assert_relative_eq!(whole, split, epsilon = 1e-12);
    }
}
