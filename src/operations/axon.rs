use crate::error::{OperationError, Result};
use crate::topology::{BranchId, End, Geometry, AXON_TAG, SOMA_TAG};

/// Parameters for axon detection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxonParams {
    /// Shortest branch (µm) that can be an axon.
    pub min_length: f64,
    /// How close a free end must come to the bounding range, in multiples of
    /// its node radius.
    pub edge_margin_radii: f64,
}

impl Default for AxonParams {
    fn default() -> Self {
        Self {
            min_length: 15.0,
            edge_margin_radii: 2.0,
        }
    }
}

/// Tags branches that leave the traced volume as axons.
///
/// A branch qualifies when it is not the soma, is long enough, and has a free
/// end whose node lies at the edge of the geometry range. The branch, its
/// compartments and its owning segments are tagged `"Axon"`. The result is
/// cached until branches are rebuilt or the range changes.
#[derive(Debug, Default)]
pub struct FindAxons {
    params: AxonParams,
}

impl FindAxons {
    /// Creates a new `FindAxons` operation with default parameters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the detection parameters.
    #[must_use]
    pub fn with_params(mut self, params: AxonParams) -> Self {
        self.params = params;
        self
    }

    /// Executes the operation, returning the axon branches.
    ///
    /// # Errors
    ///
    /// Returns an error if the soma or the branches have not been found.
    pub fn execute(&self, geometry: &mut Geometry) -> Result<Vec<BranchId>> {
        if let Some(axons) = geometry.axons() {
            return Ok(axons.to_vec());
        }
        if geometry.soma().is_none() || geometry.soma_branch().is_none() {
            return Err(OperationError::Failed(
                "find the soma and branches before looking for axons".into(),
            )
            .into());
        }
        let Some(range) = geometry.range() else {
            return Ok(Vec::new());
        };

        let mut axons = Vec::new();
        for (id, branch) in geometry.branches() {
            if branch.tags.contains(SOMA_TAG) || branch.length(geometry)? < self.params.min_length {
                continue;
            }
            let mut leaves = false;
            for end in [End::Zero, End::One] {
                if branch.neighbors_at(end).next().is_some() {
                    continue;
                }
                let Some(node) = branch.end_node(end) else {
                    continue;
                };
                let node = geometry.node(node)?;
                if range.near_edge(&node.position, self.params.edge_margin_radii * node.avg_radius()) {
                    leaves = true;
                }
            }
            if leaves {
                axons.push(id);
            }
        }

        for &id in &axons {
            geometry.tag_branch(id, AXON_TAG)?;
            for segment in geometry.branch_segments(id)? {
                geometry.segment_mut(segment)?.tags.insert(AXON_TAG.to_owned());
            }
        }
        tracing::debug!(axons = axons.len(), "found axons");
        geometry.axons = Some(axons.clone());
        Ok(axons)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::math::{Aabb, Point3};
    use crate::operations::ingest::{Ingest, RawConnection, RawPoint, RawSegment};
    use crate::operations::{FindBranches, FindSoma};

    fn line(name: &str, from: f64, to: f64, diameter: f64) -> RawSegment {
        RawSegment::new(
            name,
            vec![RawPoint::new(from, 0.0, 0.0, diameter), RawPoint::new(to, 0.0, 0.0, diameter)],
        )
    }

    fn branched() -> Geometry {
        let mut geometry = Ingest::new(
            vec![
                line("soma", 0.0, 10.0, 10.0),
                line("long", 10.0, 110.0, 1.0),
                RawSegment::new(
                    "short",
                    vec![RawPoint::new(10.0, 0.0, 0.0, 1.0), RawPoint::new(10.0, 8.0, 0.0, 1.0)],
                ),
                RawSegment::new(
                    "side",
                    vec![RawPoint::new(10.0, 0.0, 0.0, 1.0), RawPoint::new(10.0, -40.0, 0.0, 1.0)],
                ),
            ],
            vec![
                RawConnection::new(0, End::One, 1, End::Zero),
                RawConnection::new(0, End::One, 2, End::Zero),
                RawConnection::new(0, End::One, 3, End::Zero),
            ],
        )
        .execute()
        .unwrap();
        FindSoma::new().execute(&mut geometry).unwrap();
        FindBranches::new().execute(&mut geometry).unwrap();
        geometry
    }

    #[test]
    fn long_branches_reaching_the_edge_are_axons() {
        let mut geometry = branched();
        // keep the side branch well inside the range
        geometry.set_range(Aabb::new(Point3::new(-20.0, -100.0, -20.0), Point3::new(110.0, 100.0, 20.0)));
        let axons = FindAxons::new().execute(&mut geometry).unwrap();
        assert_eq!(axons.len(), 1);
        let branch = geometry.branch(axons[0]).unwrap();
        assert!(branch.tags.contains(AXON_TAG));
        let long = geometry.segment_by_name("long").unwrap();
        assert!(geometry.segment(long).unwrap().tags.contains(AXON_TAG));
        assert_eq!(geometry.tag_count(AXON_TAG), branch.compartments.len());
    }

    #[test]
    fn short_branches_are_skipped() {
        let mut geometry = branched();
        let axons = FindAxons::new().execute(&mut geometry).unwrap();
        // computed range: every free end sits on the edge, but "short" is too short
        assert_eq!(axons.len(), 2);
        let short = geometry.segment_by_name("short").unwrap();
        assert!(!geometry.segment(short).unwrap().tags.contains(AXON_TAG));
    }

    #[test]
    fn requires_branches() {
        let mut geometry = Ingest::new(vec![line("s", 0.0, 50.0, 1.0)], Vec::new())
            .execute()
            .unwrap();
        assert!(FindAxons::new().execute(&mut geometry).is_err());
    }
}
