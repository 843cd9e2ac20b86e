use crate::math::Point3;

/// The elliptical cross section of a node facing one of its neighbors.
///
/// Compartments are built between the cross sections of their end nodes, so
/// the center may be offset from the node position when the node is tilted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CrossSection {
    /// Semi-major axis of the ellipse.
    pub semi_major: f64,
    /// Semi-minor axis of the ellipse.
    pub semi_minor: f64,
    /// Orientation of the semi-major axis within the section plane.
    pub theta: f64,
    /// Center of the ellipse.
    pub center: Point3,
}

impl CrossSection {
    /// Creates an elliptical cross section.
    #[must_use]
    pub fn new(semi_major: f64, semi_minor: f64, theta: f64, center: Point3) -> Self {
        Self {
            semi_major,
            semi_minor,
            theta,
            center,
        }
    }

    /// Creates a circular cross section.
    #[must_use]
    pub fn circle(center: Point3, radius: f64) -> Self {
        Self::new(radius, radius, 0.0, center)
    }

    /// Ratio of semi-minor to semi-major axis, or `None` for a point section.
    #[must_use]
    pub fn eccentricity_ratio(&self) -> Option<f64> {
        if self.semi_major > 0.0 {
            Some(self.semi_minor / self.semi_major)
        } else {
            None
        }
    }

    /// Area of the ellipse.
    #[must_use]
    pub fn area(&self) -> f64 {
        std::f64::consts::PI * self.semi_major * self.semi_minor
    }
}
