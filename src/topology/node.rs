use std::collections::BTreeSet;

use crate::error::{GeometryError, OperationError, Result};
use crate::geometry::CrossSection;
use crate::math::Point3;

use super::compartment::CompartmentId;
use super::SegmentId;

slotmap::new_key_type! {
    /// Unique identifier for a node in the geometry.
    pub struct NodeId;
}

/// Smallest radius a node may carry; non-positive radii are clamped to it.
pub const MIN_NODE_RADIUS: f64 = 0.09;

/// Data associated with a traced node: a point with a (possibly ellipsoidal)
/// radius.
#[derive(Debug, Clone)]
pub struct NodeData {
    /// Position of the node center.
    pub position: Point3,
    /// Primary radius.
    pub r1: f64,
    /// Second ellipsoid semi-axis.
    pub r2: f64,
    /// Third ellipsoid semi-axis.
    pub r3: f64,
    /// Angle from the z axis.
    pub theta: f64,
    /// Azimuth from the x axis to the semi-major axis.
    pub phi: f64,
    /// Segments this node belongs to.
    pub segments: Vec<SegmentId>,
    /// Compartments touching this node.
    pub compartments: Vec<CompartmentId>,
    /// Tags inherited from the owning segment.
    pub tags: BTreeSet<String>,
}

impl NodeData {
    /// Creates a spherical node.
    ///
    /// A radius `<= 0` is clamped to [`MIN_NODE_RADIUS`].
    ///
    /// # Errors
    ///
    /// Returns an error if the position or radius is not finite.
    pub fn spherical(position: Point3, radius: f64) -> Result<Self> {
        Self::ellipsoidal(position, [radius; 3], 0.0, 0.0)
    }

    /// Creates an ellipsoidal node with semi-axes `radii` and orientation
    /// `theta`/`phi`.
    ///
    /// # Errors
    ///
    /// Returns an error if any coordinate or radius is not finite, or if a
    /// secondary semi-axis is non-positive.
    pub fn ellipsoidal(position: Point3, radii: [f64; 3], theta: f64, phi: f64) -> Result<Self> {
        if !position.coords.iter().all(|c| c.is_finite()) {
            return Err(OperationError::InvalidInput("node position must be finite".into()).into());
        }
        if !radii.iter().all(|r| r.is_finite()) {
            return Err(OperationError::InvalidInput("node radius must be finite".into()).into());
        }
        let [mut r1, mut r2, mut r3] = radii;
        let spherical = r1 == r2 && r1 == r3;
        if r1 <= 0.0 {
            tracing::warn!(radius = r1, "clamping non-positive node radius to {MIN_NODE_RADIUS}");
            r1 = MIN_NODE_RADIUS;
            if spherical {
                r2 = r1;
                r3 = r1;
            }
        }
        if r2 <= 0.0 || r3 <= 0.0 {
            return Err(
                OperationError::InvalidInput("ellipsoid semi-axes must be positive".into()).into(),
            );
        }

        Ok(Self {
            position,
            r1,
            r2,
            r3,
            theta,
            phi,
            segments: Vec::new(),
            compartments: Vec::new(),
            tags: BTreeSet::new(),
        })
    }

    /// Returns `true` if all three semi-axes are equal.
    #[must_use]
    pub fn is_spherical(&self) -> bool {
        self.r2 == self.r1 && self.r3 == self.r1
    }

    /// Largest semi-axis.
    #[must_use]
    pub fn max_radius(&self) -> f64 {
        self.r1.max(self.r2).max(self.r3)
    }

    /// Smallest semi-axis.
    #[must_use]
    pub fn min_radius(&self) -> f64 {
        self.r1.min(self.r2).min(self.r3)
    }

    /// Geometric mean of the semi-axes.
    #[must_use]
    pub fn avg_radius(&self) -> f64 {
        (self.r1 * self.r2 * self.r3).cbrt()
    }

    /// Ellipse cut through this node by a compartment running toward `other`.
    ///
    /// # Errors
    ///
    /// Returns an error for ellipsoidal nodes, which are not supported yet.
    pub fn intersection_ellipse(&self, _other: &NodeData) -> Result<CrossSection> {
        if !self.is_spherical() {
            return Err(
                GeometryError::Unsupported("ellipsoidal node cross sections".into()).into(),
            );
        }
        Ok(CrossSection::circle(self.position, self.r1))
    }
}
