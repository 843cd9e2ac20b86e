use std::collections::BTreeMap;

use crate::error::{OperationError, Result, TopologyError};
use crate::topology::{
    CompartmentData, CompartmentId, CompartmentKind, CompartmentShape, Connection, End, Geometry,
    Measures, NodeId, SegmentId,
};

/// Largest distance between two end nodes that may still be joined.
pub const CONNECT_TOLERANCE: f64 = 1e-6;

/// Joins two segments at coincident end nodes.
///
/// The end node with the larger radius survives and the other is queued for
/// removal. Every segment already attached at either end becomes a neighbor
/// of every other one at the junction, so the neighbor maps stay symmetric.
/// All edits are computed before any is applied; on error the geometry is
/// unchanged.
pub struct ConnectSegments {
    a: SegmentId,
    end_a: End,
    b: SegmentId,
    end_b: End,
}

struct Remeasured {
    id: CompartmentId,
    kind: CompartmentKind,
    shape: CompartmentShape,
    measures: Measures,
}

impl ConnectSegments {
    /// Creates a new `ConnectSegments` operation joining `end_a` of `a` to
    /// `end_b` of `b`.
    #[must_use]
    pub fn new(a: SegmentId, end_a: End, b: SegmentId, end_b: End) -> Self {
        Self { a, end_a, b, end_b }
    }

    /// Executes the operation, returning the shared node.
    ///
    /// # Errors
    ///
    /// Returns an error if `a == b`, if a segment is missing or empty, if
    /// the two end nodes are not at the same position, if the junction would
    /// connect the same pair of segments twice, or if an affected
    /// compartment cannot be re-measured.
    pub fn execute(&self, geometry: &mut Geometry) -> Result<NodeId> {
        if self.a == self.b {
            return Err(TopologyError::Loop("cannot connect a segment to itself".into()).into());
        }
        let seg_a = geometry.segment(self.a)?;
        let seg_b = geometry.segment(self.b)?;
        let empty = || TopologyError::InvalidTopology("cannot connect an empty segment".into());
        let node_a = seg_a.end_node(self.end_a).ok_or_else(empty)?;
        let node_b = seg_b.end_node(self.end_b).ok_or_else(empty)?;

        if node_a == node_b && seg_a.neighbors.contains_key(&self.b) {
            return Ok(node_a);
        }

        let (data_a, data_b) = (geometry.node(node_a)?, geometry.node(node_b)?);
        let gap = (data_a.position - data_b.position).norm();
        if gap > CONNECT_TOLERANCE {
            return Err(OperationError::InvalidInput(format!(
                "cannot connect {} to {}: end nodes are {gap} apart",
                seg_a.name, seg_b.name
            ))
            .into());
        }
        let (survivor, removed) = if data_b.r1 > data_a.r1 {
            (node_b, node_a)
        } else {
            (node_a, node_b)
        };

        // everything attached at the junction, with the end it attaches by
        let mut junction: BTreeMap<SegmentId, End> = BTreeMap::new();
        junction.insert(self.a, self.end_a);
        junction.insert(self.b, self.end_b);
        for (seg, end) in [(seg_a, self.end_a), (seg_b, self.end_b)] {
            for (neighbor, conn) in seg.neighbors_at(end) {
                let Some(neighbor_end) = End::from_fraction(conn.neighbor_end) else {
                    continue;
                };
                if let Some(&existing) = junction.get(&neighbor) {
                    if existing != neighbor_end {
                        return Err(TopologyError::Loop(format!(
                            "segment {} would meet the junction at both ends",
                            geometry.segment(neighbor)?.name
                        ))
                        .into());
                    }
                }
                junction.insert(neighbor, neighbor_end);
            }
        }

        let mut remeasure = Vec::new();
        if survivor != removed {
            for &seg in &geometry.node(removed)?.segments {
                for &id in &geometry.segment(seg)?.compartments {
                    let mut kind = geometry.compartment(id)?.kind;
                    if !kind_references(&kind, removed) {
                        continue;
                    }
                    kind.replace_node(removed, survivor);
                    let (shape, measures) = CompartmentData::measure(&kind, &geometry.nodes)?;
                    remeasure.push(Remeasured {
                        id,
                        kind,
                        shape,
                        measures,
                    });
                }
            }
        }

        // commit
        for (&s, &end_s) in &junction {
            for (&t, &end_t) in &junction {
                if s != t {
                    geometry
                        .segment_mut(s)?
                        .neighbors
                        .insert(t, Connection::new(end_s.fraction(), end_t.fraction(), survivor));
                }
            }
        }

        if survivor != removed {
            let old = geometry.node(removed)?.clone();
            for &seg in &old.segments {
                for node in &mut geometry.segment_mut(seg)?.nodes {
                    if *node == removed {
                        *node = survivor;
                    }
                }
            }
            for item in remeasure {
                geometry.surface_area += item.measures.surface_area;
                geometry.volume += item.measures.volume;
                if let Some(comp) = geometry.compartments.get_mut(item.id) {
                    geometry.surface_area -= comp.surface_area();
                    geometry.volume -= comp.volume();
                    comp.kind = item.kind;
                    comp.set_geometry(item.shape, item.measures);
                }
            }

            let node = geometry.node_mut(survivor)?;
            for seg in old.segments {
                if !node.segments.contains(&seg) {
                    node.segments.push(seg);
                }
            }
            for comp in old.compartments {
                if !node.compartments.contains(&comp) {
                    node.compartments.push(comp);
                }
            }
            node.tags.extend(old.tags);
            geometry.removed_nodes.insert(removed);
        }

        geometry.invalidate_derived();
        tracing::trace!(segments = junction.len(), "connected segments at junction");
        Ok(survivor)
    }
}

fn kind_references(kind: &CompartmentKind, node: NodeId) -> bool {
    match *kind {
        CompartmentKind::OneNode { node: n, toward } => n == node || toward == node,
        CompartmentKind::TwoNode { node0, node1 } => node0 == node || node1 == node,
    }
}
