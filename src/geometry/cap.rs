use std::f64::consts::PI;

use crate::error::{GeometryError, Result};
use crate::math::{Point3, Vector3, TOLERANCE};

use super::CrossSection;

/// Exponent of Thomsen's approximation to the ellipsoid surface area.
const THOMSEN_EXPONENT: f64 = 1.6075;

/// A hemispherical (or half-ellipsoidal) cap closing an unconnected node.
///
/// The cap sits on the node's cross section and bulges away from the
/// neighboring node along `direction`.
#[derive(Debug, Clone)]
pub struct Cap {
    base: CrossSection,
    direction: Vector3,
    radii: [f64; 3],
}

impl Cap {
    /// Creates a cap on `base` pointing along `direction`, for a node with
    /// ellipsoid semi-axes `radii`.
    ///
    /// # Errors
    ///
    /// Returns an error if `direction` is zero-length.
    pub fn new(base: CrossSection, direction: Vector3, radii: [f64; 3]) -> Result<Self> {
        let norm = direction.norm();
        if norm < TOLERANCE {
            return Err(GeometryError::ZeroVector.into());
        }
        Ok(Self {
            base,
            direction: direction / norm,
            radii,
        })
    }

    /// Returns the base cross section.
    #[must_use]
    pub fn base(&self) -> &CrossSection {
        &self.base
    }

    /// Unit outward axis of the cap.
    #[must_use]
    pub fn direction(&self) -> &Vector3 {
        &self.direction
    }

    /// Axial length: the semi-major axis of the base.
    #[must_use]
    pub fn length(&self) -> f64 {
        self.base.semi_major
    }

    fn is_spherical(&self) -> bool {
        let [a, b, c] = self.radii;
        (a - b).abs() < TOLERANCE && (a - c).abs() < TOLERANCE
    }

    /// Outer surface area of the cap.
    ///
    /// Exact for spherical nodes. Ellipsoidal nodes use half of Thomsen's
    /// formula, accurate to a relative error of at most 1.061%.
    #[must_use]
    pub fn surface_area(&self) -> f64 {
        if self.is_spherical() {
            return 2.0 * PI * self.base.semi_major * self.base.semi_minor;
        }
        let [a, b, c] = self.radii;
        let p = THOMSEN_EXPONENT;
        let mean = ((a * b).powf(p) + (a * c).powf(p) + (b * c).powf(p)) / 3.0;
        2.0 * PI * mean.powf(1.0 / p)
    }

    /// Volume of the half ellipsoid.
    #[must_use]
    pub fn volume(&self) -> f64 {
        let [a, b, c] = self.radii;
        2.0 * PI / 3.0 * a * b * c
    }

    /// Share of the volume between the base and the fractional axial
    /// position `x`.
    #[must_use]
    pub fn volume_fraction(&self, x: f64) -> f64 {
        let x = x.clamp(0.0, 1.0);
        1.5 * (x - x * x * x / 3.0)
    }

    /// Center of mass, 3/8 of the length out from the base.
    #[must_use]
    pub fn centroid(&self) -> Point3 {
        self.base.center + self.direction * (0.375 * self.length())
    }

    /// Outermost point of the cap.
    #[must_use]
    pub fn tip(&self) -> Point3 {
        self.base.center + self.direction * self.length()
    }

    /// Radius of the hemisphere with the same volume.
    #[must_use]
    pub fn avg_radius(&self) -> f64 {
        (1.5 * self.volume() / PI).cbrt()
    }

    /// Length per cross-sectional area between fractional positions.
    #[must_use]
    pub fn length_per_area(&self, x1: f64, x2: f64) -> f64 {
        let (x1, x2) = if x2 < x1 { (x2, x1) } else { (x1, x2) };
        ((1.0 - x1 * x1) / (1.0 - x2 * x2)).ln() / (2.0 * PI * self.base.semi_major)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn sphere_cap(radius: f64) -> Cap {
        Cap::new(
            CrossSection::circle(Point3::origin(), radius),
            Vector3::new(0.0, 0.0, 2.0),
            [radius; 3],
        )
        .unwrap()
    }

    #[test]
    fn hemisphere_measures() {
        let cap = sphere_cap(3.0);
        assert_relative_eq!(cap.length(), 3.0);
        assert_relative_eq!(cap.surface_area(), 2.0 * PI * 9.0, epsilon = 1e-12);
        assert_relative_eq!(cap.volume(), 2.0 / 3.0 * PI * 27.0, epsilon = 1e-12);
        assert_relative_eq!(cap.avg_radius(), 3.0, epsilon = 1e-12);
    }

    #[test]
    fn volume_fraction_is_heavier_at_the_base() {
        let cap = sphere_cap(2.0);
        assert_relative_eq!(cap.volume_fraction(0.0), 0.0);
        assert_relative_eq!(cap.volume_fraction(1.0), 1.0, epsilon = 1e-12);
        assert_relative_eq!(cap.volume_fraction(0.5), 11.0 / 16.0, epsilon = 1e-12);
    }

    #[test]
    fn centroid_three_eighths_out() {
        let cap = sphere_cap(8.0);
        let c = cap.centroid();
        assert_relative_eq!(c.z, 3.0, epsilon = 1e-12);
        assert_relative_eq!(cap.tip().z, 8.0, epsilon = 1e-12);
    }

    #[test]
    fn thomsen_matches_sphere_limit() {
        let cap = Cap::new(
            CrossSection::circle(Point3::origin(), 2.0),
            Vector3::x(),
            [2.0, 2.0, 2.0 + 1e-6],
        )
        .unwrap();
        assert_relative_eq!(cap.surface_area(), 8.0 * PI, max_relative = 1e-5);
    }

    #[test]
    fn thomsen_prolate_within_bound() {
        // Prolate spheroid a = 2, b = c = 1 has exact area ~= 21.4784
        let cap = Cap::new(
            CrossSection::circle(Point3::origin(), 1.0),
            Vector3::x(),
            [2.0, 1.0, 1.0],
        )
        .unwrap();
        let exact_half = 0.5 * 21.478_4;
        assert!((cap.surface_area() - exact_half).abs() / exact_half < 0.010_61);
    }

    #[test]
    fn zero_direction_fails() {
        let result = Cap::new(CrossSection::circle(Point3::origin(), 1.0), Vector3::zeros(), [1.0; 3]);
        assert!(result.is_err());
    }
}
