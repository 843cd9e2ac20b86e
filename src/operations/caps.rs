use crate::error::Result;
use crate::topology::{CompartmentData, CompartmentId, CompartmentKind, Geometry, SegmentId};

/// Closes every free segment end with a hemispherical cap.
///
/// A segment end needs a cap when its node is covered by exactly one
/// compartment. Running the operation twice adds nothing the second time.
#[derive(Debug, Default)]
pub struct AddOneNodeCompartments;

impl AddOneNodeCompartments {
    /// Creates a new `AddOneNodeCompartments` operation.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Executes the operation, returning the caps that were added.
    ///
    /// # Errors
    ///
    /// Returns an error if a cap cannot be measured. Caps are measured
    /// before any is added, so the geometry is unchanged on error.
    pub fn execute(&self, geometry: &mut Geometry) -> Result<Vec<CompartmentId>> {
        let mut planned: Vec<(SegmentId, CompartmentKind)> = Vec::new();
        for (id, segment) in geometry.segments() {
            let nodes = &segment.nodes;
            if nodes.len() < 2 {
                tracing::warn!(segment = %segment.name, "empty segment");
                continue;
            }
            let ends = [(nodes[0], nodes[1]), (nodes[nodes.len() - 1], nodes[nodes.len() - 2])];
            for (node, toward) in ends {
                if geometry.node(node)?.compartments.len() == 1 {
                    planned.push((id, CompartmentKind::OneNode { node, toward }));
                }
            }
        }

        for (_, kind) in &planned {
            CompartmentData::measure(kind, &geometry.nodes)?;
        }

        let caps = planned
            .into_iter()
            .map(|(segment, kind)| geometry.add_compartment(segment, kind))
            .collect::<Result<Vec<_>>>()?;
        tracing::debug!(caps = caps.len(), "added one-node compartments");
        Ok(caps)
    }
}
