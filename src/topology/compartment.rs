use std::collections::BTreeSet;

use slotmap::SlotMap;

use crate::error::{Result, TopologyError};
use crate::geometry::{Cap, Frustum};
use crate::math::{Point3, UM2_TO_MM2, UM3_TO_MM3};

use super::node::{NodeData, NodeId};
use super::SegmentId;

slotmap::new_key_type! {
    /// Unique identifier for a compartment in the geometry.
    pub struct CompartmentId;
}

/// Which nodes a compartment spans.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompartmentKind {
    /// A cap over an unconnected node, oriented away from `toward`.
    OneNode {
        /// The capped node.
        node: NodeId,
        /// The neighboring node that fixes the cap's orientation.
        toward: NodeId,
    },
    /// A frustum between two adjacent nodes.
    TwoNode {
        /// Node at position 0.
        node0: NodeId,
        /// Node at position 1.
        node1: NodeId,
    },
}

impl CompartmentKind {
    /// The nodes covered by the compartment.
    #[must_use]
    pub fn nodes(&self) -> Vec<NodeId> {
        match *self {
            Self::OneNode { node, .. } => vec![node],
            Self::TwoNode { node0, node1 } => vec![node0, node1],
        }
    }

    /// Replaces every reference to `old` with `new`.
    pub(crate) fn replace_node(&mut self, old: NodeId, new: NodeId) {
        let swap = |id: &mut NodeId| {
            if *id == old {
                *id = new;
            }
        };
        match self {
            Self::OneNode { node, toward } => {
                swap(node);
                swap(toward);
            }
            Self::TwoNode { node0, node1 } => {
                swap(node0);
                swap(node1);
            }
        }
    }
}

/// The solid a compartment represents.
#[derive(Debug, Clone)]
pub enum CompartmentShape {
    /// Hemispherical cap.
    Cap(Cap),
    /// Elliptical frustum.
    Frustum(Frustum),
}

/// Cached physical quantities of a compartment.
#[derive(Debug, Clone, Copy)]
pub struct Measures {
    /// Axial length (µm).
    pub length: f64,
    /// Surface area (mm²).
    pub surface_area: f64,
    /// Volume (mm³).
    pub volume: f64,
    /// Volume-weighted centroid.
    pub centroid: Point3,
    /// Axial start point.
    pub start: Point3,
    /// Axial end point (the tip for caps).
    pub end: Point3,
    /// Smallest node radius.
    pub min_radius: f64,
    /// Largest node radius.
    pub max_radius: f64,
    /// Equivalent cylinder (or hemisphere) radius (µm).
    pub avg_radius: f64,
}

/// Data associated with a compartment.
#[derive(Debug, Clone)]
pub struct CompartmentData {
    /// The nodes the compartment spans.
    pub kind: CompartmentKind,
    /// The segment owning this compartment.
    pub segment: SegmentId,
    /// Tags propagated from the owning segment.
    pub tags: BTreeSet<String>,
    shape: CompartmentShape,
    measures: Measures,
}

impl CompartmentData {
    /// Builds a compartment and measures it from the current node geometry.
    ///
    /// # Errors
    ///
    /// Returns an error if a node is missing, a node is ellipsoidal, or the
    /// resulting solid is degenerate.
    pub fn new(
        kind: CompartmentKind,
        segment: SegmentId,
        tags: BTreeSet<String>,
        nodes: &SlotMap<NodeId, NodeData>,
    ) -> Result<Self> {
        let (shape, measures) = Self::measure(&kind, nodes)?;
        Ok(Self {
            kind,
            segment,
            tags,
            shape,
            measures,
        })
    }

    /// Computes shape and measures for `kind` without touching any store.
    ///
    /// # Errors
    ///
    /// Same conditions as [`CompartmentData::new`].
    pub fn measure(
        kind: &CompartmentKind,
        nodes: &SlotMap<NodeId, NodeData>,
    ) -> Result<(CompartmentShape, Measures)> {
        let lookup = |id: NodeId| {
            nodes
                .get(id)
                .ok_or_else(|| TopologyError::EntityNotFound("node".into()))
        };

        match *kind {
            CompartmentKind::OneNode { node, toward } => {
                let n = lookup(node)?;
                let t = lookup(toward)?;
                let base = n.intersection_ellipse(t)?;
                let cap = Cap::new(base, n.position - t.position, [n.r1, n.r2, n.r3])?;
                let measures = Measures {
                    length: cap.length(),
                    surface_area: UM2_TO_MM2 * cap.surface_area(),
                    volume: UM3_TO_MM3 * cap.volume(),
                    centroid: cap.centroid(),
                    start: base.center,
                    end: cap.tip(),
                    min_radius: n.min_radius(),
                    max_radius: n.max_radius(),
                    avg_radius: cap.avg_radius(),
                };
                Ok((CompartmentShape::Cap(cap), measures))
            }
            CompartmentKind::TwoNode { node0, node1 } => {
                let n0 = lookup(node0)?;
                let n1 = lookup(node1)?;
                let frustum = Frustum::new(n0.intersection_ellipse(n1)?, n1.intersection_ellipse(n0)?);
                let measures = Measures {
                    length: frustum.length(),
                    surface_area: UM2_TO_MM2 * frustum.lateral_area()?,
                    volume: UM3_TO_MM3 * frustum.volume(),
                    centroid: frustum.centroid(),
                    start: frustum.start().center,
                    end: frustum.end().center,
                    min_radius: n0.min_radius().min(n1.min_radius()),
                    max_radius: n0.max_radius().max(n1.max_radius()),
                    avg_radius: frustum.avg_radius(),
                };
                Ok((CompartmentShape::Frustum(frustum), measures))
            }
        }
    }

    pub(crate) fn set_geometry(&mut self, shape: CompartmentShape, measures: Measures) {
        self.shape = shape;
        self.measures = measures;
    }

    /// Returns the underlying solid.
    #[must_use]
    pub fn shape(&self) -> &CompartmentShape {
        &self.shape
    }

    /// Returns all cached measures.
    #[must_use]
    pub fn measures(&self) -> &Measures {
        &self.measures
    }

    /// Returns `true` for a one-node cap.
    #[must_use]
    pub fn is_cap(&self) -> bool {
        matches!(self.kind, CompartmentKind::OneNode { .. })
    }

    /// Axial length (µm).
    #[must_use]
    pub fn length(&self) -> f64 {
        self.measures.length
    }

    /// Surface area (mm²).
    #[must_use]
    pub fn surface_area(&self) -> f64 {
        self.measures.surface_area
    }

    /// Volume (mm³).
    #[must_use]
    pub fn volume(&self) -> f64 {
        self.measures.volume
    }

    /// Volume-weighted centroid.
    #[must_use]
    pub fn centroid(&self) -> Point3 {
        self.measures.centroid
    }

    /// Smallest node radius.
    #[must_use]
    pub fn min_radius(&self) -> f64 {
        self.measures.min_radius
    }

    /// Largest node radius.
    #[must_use]
    pub fn max_radius(&self) -> f64 {
        self.measures.max_radius
    }

    /// Equivalent radius (µm).
    #[must_use]
    pub fn avg_radius(&self) -> f64 {
        self.measures.avg_radius
    }

    /// Share of the volume between the start of the compartment (node0, or
    /// the base of a cap) and the fractional position `x`.
    #[must_use]
    pub fn volume_fraction(&self, x: f64) -> f64 {
        match &self.shape {
            CompartmentShape::Cap(cap) => cap.volume_fraction(x),
            CompartmentShape::Frustum(frustum) => frustum.volume_fraction(x),
        }
    }

    /// Length per cross-sectional area between fractional positions `x1` and `x2`.
    #[must_use]
    pub fn length_per_area(&self, x1: f64, x2: f64) -> f64 {
        match &self.shape {
            CompartmentShape::Cap(cap) => cap.length_per_area(x1, x2),
            CompartmentShape::Frustum(frustum) => frustum.length_per_area(x1, x2),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::PI;

    fn arena() -> (SlotMap<NodeId, NodeData>, NodeId, NodeId) {
        let mut nodes = SlotMap::with_key();
        let a = nodes.insert(NodeData::spherical(Point3::origin(), 2.0).unwrap());
        let b = nodes.insert(NodeData::spherical(Point3::new(10.0, 0.0, 0.0), 2.0).unwrap());
        (nodes, a, b)
    }

    #[test]
    fn cylinder_in_mm_units() {
        let (nodes, a, b) = arena();
        let comp = CompartmentData::new(
            CompartmentKind::TwoNode { node0: a, node1: b },
            SegmentId::default(),
            BTreeSet::new(),
            &nodes,
        )
        .unwrap();
        assert_relative_eq!(comp.length(), 10.0);
        assert_relative_eq!(comp.surface_area(), 2.0 * PI * 2.0 * 10.0 * 1e-6, max_relative = 1e-12);
        assert_relative_eq!(comp.volume(), PI * 4.0 * 10.0 * 1e-9, max_relative = 1e-12);
        assert_relative_eq!(comp.avg_radius(), 2.0, epsilon = 1e-9);
        assert!(!comp.is_cap());
    }

    #[test]
    fn cap_points_away_from_neighbor() {
        let (nodes, a, b) = arena();
        let cap = CompartmentData::new(
            CompartmentKind::OneNode { node: a, toward: b },
            SegmentId::default(),
            BTreeSet::new(),
            &nodes,
        )
        .unwrap();
        assert!(cap.is_cap());
        assert_relative_eq!(cap.length(), 2.0);
        assert_relative_eq!(cap.measures().end.x, -2.0, epsilon = 1e-12);
        assert_relative_eq!(cap.centroid().x, -0.75, epsilon = 1e-12);
    }

    #[test]
    fn missing_node_fails() {
        let (mut nodes, a, b) = arena();
        nodes.remove(b);
        let result = CompartmentData::new(
            CompartmentKind::TwoNode { node0: a, node1: b },
            SegmentId::default(),
            BTreeSet::new(),
            &nodes,
        );
        assert!(result.is_err());
    }

    #[test]
    fn replace_node_updates_both_roles() {
        let (_, a, b) = arena();
        let mut kind = CompartmentKind::OneNode { node: a, toward: b };
        kind.replace_node(b, a);
        assert_eq!(kind.nodes(), vec![a]);
        assert_eq!(kind, CompartmentKind::OneNode { node: a, toward: a });
    }
}
