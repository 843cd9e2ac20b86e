use std::collections::{BTreeSet, VecDeque};

use crate::error::Result;
use crate::topology::{CompartmentId, Geometry, SegmentId};

/// Entities flooded when looking for connected components.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConnectivityUnit {
    /// Segments joined through their neighbor maps.
    #[default]
    Segments,
    /// Compartments joined through shared nodes.
    Compartments,
}

/// One connected piece of the geometry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Component {
    /// Segments in the component.
    pub segments: Vec<SegmentId>,
    /// Compartments in the component.
    pub compartments: Vec<CompartmentId>,
}

/// Splits the geometry into connected components, largest first by
/// compartment count.
///
/// With removal enabled, every segment outside the largest component is
/// deleted and derived state (soma, branches, axons) is dropped.
#[derive(Debug, Default)]
pub struct CheckConnectivity {
    unit: ConnectivityUnit,
    remove_disconnected: bool,
}

impl CheckConnectivity {
    /// Creates a new `CheckConnectivity` operation over segments.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the entity type to flood over.
    #[must_use]
    pub fn with_unit(mut self, unit: ConnectivityUnit) -> Self {
        self.unit = unit;
        self
    }

    /// Enables removal of everything outside the largest component.
    #[must_use]
    pub fn with_removal(mut self, remove_disconnected: bool) -> Self {
        self.remove_disconnected = remove_disconnected;
        self
    }

    /// Executes the operation, returning the components found before any
    /// removal.
    ///
    /// # Errors
    ///
    /// Returns an error if the geometry references missing entities.
    pub fn execute(&self, geometry: &mut Geometry) -> Result<Vec<Component>> {
        let mut components = match self.unit {
            ConnectivityUnit::Segments => segment_components(geometry)?,
            ConnectivityUnit::Compartments => compartment_components(geometry)?,
        };
        components.sort_by(|a, b| b.compartments.len().cmp(&a.compartments.len()));

        if self.remove_disconnected && components.len() > 1 {
            let doomed: Vec<SegmentId> = components[1..]
                .iter()
                .flat_map(|c| c.segments.iter().copied())
                .collect();
            for &segment in &doomed {
                geometry.remove_segment(segment)?;
            }
            tracing::info!(
                components = components.len() - 1,
                segments = doomed.len(),
                "removed disconnected components"
            );
        }
        Ok(components)
    }
}

/// Number of connected segment components.
pub(crate) fn count_components(geometry: &Geometry) -> Result<usize> {
    Ok(segment_components(geometry)?.len())
}

fn segment_components(geometry: &Geometry) -> Result<Vec<Component>> {
    let mut visited = BTreeSet::new();
    let mut components = Vec::new();

    for (start, _) in geometry.segments() {
        if !visited.insert(start) {
            continue;
        }
        let mut component = Component::default();
        let mut queue = VecDeque::from([start]);
        while let Some(current) = queue.pop_front() {
            let segment = geometry.segment(current)?;
            component.segments.push(current);
            component.compartments.extend(&segment.compartments);
            for &neighbor in segment.neighbors.keys() {
                if visited.insert(neighbor) {
                    queue.push_back(neighbor);
                }
            }
        }
        components.push(component);
    }
    Ok(components)
}

fn compartment_components(geometry: &Geometry) -> Result<Vec<Component>> {
    let mut visited = BTreeSet::new();
    let mut components = Vec::new();

    for (start, _) in geometry.compartments() {
        if !visited.insert(start) {
            continue;
        }
        let mut compartments = Vec::new();
        let mut queue = VecDeque::from([start]);
        while let Some(current) = queue.pop_front() {
            compartments.push(current);
            for node in geometry.compartment(current)?.kind.nodes() {
                for &neighbor in &geometry.node(node)?.compartments {
                    if visited.insert(neighbor) {
                        queue.push_back(neighbor);
                    }
                }
            }
        }
        components.push(Component {
            segments: geometry.owning_segments(&compartments)?,
            compartments,
        });
    }
    Ok(components)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::operations::ingest::{Ingest, RawConnection, RawPoint, RawSegment};
    use crate::topology::{End, ALL_TAG};
    use approx::assert_relative_eq;

    fn line(name: &str, x0: f64, x1: f64) -> RawSegment {
        RawSegment::new(
            name,
            vec![RawPoint::new(x0, 0.0, 0.0, 2.0), RawPoint::new(x1, 0.0, 0.0, 2.0)],
        )
    }

    fn two_pieces() -> Geometry {
        Ingest::new(
            vec![line("a", 0.0, 10.0), line("b", 10.0, 20.0), line("stray", 50.0, 60.0)],
            vec![RawConnection::new(0, End::One, 1, End::Zero)],
        )
        .execute()
        .unwrap()
    }

    #[test]
    fn components_are_sorted_largest_first() {
        let mut geometry = two_pieces();
        let components = CheckConnectivity::new().execute(&mut geometry).unwrap();
        assert_eq!(components.len(), 2);
        assert_eq!(components[0].segments.len(), 2);
        assert_eq!(components[0].compartments.len(), 4);
        assert_eq!(components[1].compartments.len(), 3);

        let by_compartment = CheckConnectivity::new()
            .with_unit(ConnectivityUnit::Compartments)
            .execute(&mut geometry)
            .unwrap();
        assert_eq!(by_compartment.len(), 2);
        for (x, y) in by_compartment.iter().zip(&components) {
            let sorted = |c: &Component| c.compartments.iter().copied().collect::<BTreeSet<_>>();
            assert_eq!(sorted(x), sorted(y));
            assert_eq!(x.segments.len(), y.segments.len());
        }
        assert_eq!(count_components(&geometry).unwrap(), 2);
    }

    #[test]
    fn removal_keeps_largest_component() {
        let mut geometry = two_pieces();
        CheckConnectivity::new()
            .with_removal(true)
            .execute(&mut geometry)
            .unwrap();
        assert_eq!(geometry.num_segments(), 2);
        assert!(geometry.segment_by_name("stray").is_none());
        assert_eq!(geometry.tag_count(ALL_TAG), 4);
        assert_eq!(geometry.num_nodes(), 3);
        let volume: f64 = geometry.compartments().map(|(_, c)| c.volume()).sum();
        assert_relative_eq!(geometry.volume(), volume, epsilon = 1e-15);
    }
}
