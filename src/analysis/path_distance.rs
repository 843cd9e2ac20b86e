use std::collections::{BTreeMap, VecDeque};

use crate::error::{GeometryError, OperationError, Result, TopologyError};
use crate::math::TOLERANCE;
use crate::topology::{BranchId, Connection, Geometry, SegmentId};

/// A graph of chains that path distances can be measured over.
pub trait Network<K> {
    /// Every element, in a stable order.
    fn elements(&self) -> Vec<K>;

    /// Length of `element` (µm).
    ///
    /// # Errors
    ///
    /// Returns an error if `element` is not in the network.
    fn element_length(&self, element: K) -> Result<f64>;

    /// Neighbors of `element` and where they attach.
    ///
    /// # Errors
    ///
    /// Returns an error if `element` is not in the network.
    fn element_connections(&self, element: K) -> Result<Vec<(K, Connection)>>;
}

impl Network<SegmentId> for Geometry {
    fn elements(&self) -> Vec<SegmentId> {
        self.segments().map(|(id, _)| id).collect()
    }

    fn element_length(&self, element: SegmentId) -> Result<f64> {
        self.segment(element)?.length(self)
    }

    fn element_connections(&self, element: SegmentId) -> Result<Vec<(SegmentId, Connection)>> {
        Ok(self.segment(element)?.neighbors.iter().map(|(&k, &c)| (k, c)).collect())
    }
}

impl Network<BranchId> for Geometry {
    fn elements(&self) -> Vec<BranchId> {
        self.branches().map(|(id, _)| id).collect()
    }

    fn element_length(&self, element: BranchId) -> Result<f64> {
        self.branch(element)?.length(self)
    }

    fn element_connections(&self, element: BranchId) -> Result<Vec<(BranchId, Connection)>> {
        Ok(self.branch(element)?.neighbors.iter().map(|(&k, &c)| (k, c)).collect())
    }
}

/// Distance along one element, growing in both directions from the point
/// where the shortest path enters it.
///
/// For an element entered at an end this is the linear
/// `base + scale · (position − 0.5)` form; elements joined at an interior
/// fraction (after branch merging) are measured from that fraction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PathDistance {
    /// Fraction at which the path enters the element.
    pub entry: f64,
    /// Distance at the entry point.
    pub offset: f64,
    /// Element length (µm).
    pub length: f64,
}

impl PathDistance {
    /// Distance at `position` (a fraction) along the element.
    #[must_use]
    pub fn at(&self, position: f64) -> f64 {
        self.offset + self.length * (position - self.entry).abs()
    }

    /// Distance to the element midpoint.
    #[must_use]
    pub fn base(&self) -> f64 {
        self.at(0.5)
    }
}

/// Shortest path distances through a network from one point on a start
/// element.
#[derive(Debug, Clone)]
pub struct PathDistanceFinder<K: Ord> {
    start: K,
    elements: Vec<K>,
    connections: BTreeMap<K, Vec<K>>,
    distances: BTreeMap<K, PathDistance>,
    hops: BTreeMap<K, u32>,
}

impl<K: Ord + Copy + std::fmt::Debug> PathDistanceFinder<K> {
    /// Measures distances from `start_position` (a fraction in `[0, 1]`)
    /// along `start`.
    ///
    /// # Errors
    ///
    /// Returns an error if `start_position` is outside `[0, 1]`, if `start`
    /// is not in the network, or if relaxation fails to settle, which only
    /// happens when the network is inconsistent.
    pub fn new<N: Network<K>>(network: &N, start: K, start_position: f64) -> Result<Self> {
        if !(0.0..=1.0).contains(&start_position) {
            return Err(GeometryError::ParameterOutOfRange {
                parameter: "start_position",
                value: start_position,
                min: 0.0,
                max: 1.0,
            }
            .into());
        }
        let elements = network.elements();
        if !elements.contains(&start) {
            return Err(TopologyError::EntityNotFound(format!("start element {start:?}")).into());
        }

        let mut lengths = BTreeMap::new();
        let mut connections = BTreeMap::new();
        for &e in &elements {
            lengths.insert(e, network.element_length(e)?);
            connections.insert(e, network.element_connections(e)?);
        }
        let length = |e: &K| lengths.get(e).copied().unwrap_or_default();

        let mut distances = BTreeMap::new();
        let mut hops = BTreeMap::new();
        distances.insert(
            start,
            PathDistance {
                entry: start_position,
                offset: 0.0,
                length: length(&start),
            },
        );
        hops.insert(start, 0);
        let mut queue = VecDeque::from([start]);

        let bound = elements.len() * elements.len() + elements.len();
        let mut relaxations = 0;
        while let Some(current) = queue.pop_front() {
            let (Some(reached), Some(&hop)) = (distances.get(&current).copied(), hops.get(&current)) else {
                continue;
            };
            for (neighbor, conn) in connections.get(&current).into_iter().flatten() {
                if *neighbor == start {
                    continue;
                }
                let candidate = PathDistance {
                    entry: conn.neighbor_end,
                    offset: reached.at(conn.this_end),
                    length: length(neighbor),
                };
                let known = distances.get(neighbor).map(PathDistance::base);
                if known.is_some_and(|d| d <= candidate.base() + TOLERANCE) {
                    continue;
                }
                if known.is_some() {
                    tracing::warn!(from = ?current, to = ?neighbor, "shorter path found, network has a loop");
                }
                relaxations += 1;
                if relaxations > bound {
                    return Err(TopologyError::Loop("path distances do not settle".into()).into());
                }
                distances.insert(*neighbor, candidate);
                hops.insert(*neighbor, hop + 1);
                queue.push_back(*neighbor);
            }
        }

        let connections = connections
            .into_iter()
            .map(|(k, v)| (k, v.into_iter().map(|(n, _)| n).collect()))
            .collect();
        Ok(Self {
            start,
            elements,
            connections,
            distances,
            hops,
        })
    }

    /// The start element.
    #[must_use]
    pub fn start(&self) -> K {
        self.start
    }

    /// Path distance to `position` (a fraction) along `element`.
    ///
    /// # Errors
    ///
    /// Returns an error if `element` cannot be reached from the start.
    pub fn distance_to(&self, element: K, position: f64) -> Result<f64> {
        self.distances
            .get(&element)
            .map(|d| d.at(position))
            .ok_or_else(|| TopologyError::Unreachable(format!("{element:?}")).into())
    }

    /// Distance record for `element`, if reached.
    #[must_use]
    pub fn path_distance(&self, element: K) -> Option<PathDistance> {
        self.distances.get(&element).copied()
    }

    /// Number of hops from the start to `element`, if reached.
    #[must_use]
    pub fn hops(&self, element: K) -> Option<u32> {
        self.hops.get(&element).copied()
    }

    /// Electrotonic length of every element from steady-state voltages
    /// given in network element order.
    ///
    /// Each element is compared with its nearest neighbor at a different hop
    /// count: `(d_neighbor − d) / ln(v / v_neighbor)`.
    ///
    /// # Errors
    ///
    /// Returns an error if the voltage count does not match the network, if
    /// an element is unreachable, or if an element has no neighbor at a
    /// different hop count.
    pub fn electrotonic_lengths(&self, voltages: &[f64]) -> Result<Vec<f64>> {
        if voltages.len() != self.elements.len() {
            return Err(OperationError::InvalidInput(format!(
                "expected {} voltages, got {}",
                self.elements.len(),
                voltages.len()
            ))
            .into());
        }
        let index: BTreeMap<K, usize> = self.elements.iter().enumerate().map(|(i, &e)| (e, i)).collect();

        let mut lengths = Vec::with_capacity(voltages.len());
        for (i, &element) in self.elements.iter().enumerate() {
            let d = self.distance_to(element, 0.5)?;
            let hop = self.hops(element);
            let mut nearest: Option<(f64, usize)> = None;
            for &n in self.connections.get(&element).into_iter().flatten() {
                if self.hops(n) == hop {
                    continue;
                }
                let Some(&j) = index.get(&n) else {
                    continue;
                };
                let dn = self.distance_to(n, 0.5)?;
                let closer = match nearest {
                    Some((best, _)) => (dn - d).abs() < (best - d).abs(),
                    None => true,
                };
                if closer {
                    nearest = Some((dn, j));
                }
            }
            let (dn, j) = nearest.ok_or_else(|| {
                OperationError::Failed(format!("{element:?} has no neighbor at a different hop count"))
            })?;
            let length = (dn - d) / (voltages[i] / voltages[j]).ln();
            if length < 0.0 {
                tracing::warn!(element = i, neighbor = j, length, "negative electrotonic length");
            }
            lengths.push(length);
        }
        Ok(lengths)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::operations::{Ingest, RawConnection, RawPoint, RawSegment};
    use crate::topology::{End, NodeId};
    use approx::assert_relative_eq;
    use slotmap::SlotMap;

    /// Elements with lengths and links `(a, b, fraction along a, fraction along b)`.
    struct Toy {
        lengths: Vec<f64>,
        links: Vec<(usize, usize, f64, f64)>,
        node: NodeId,
    }

    impl Network<usize> for Toy {
        fn elements(&self) -> Vec<usize> {
            (0..self.lengths.len()).collect()
        }

        fn element_length(&self, element: usize) -> Result<f64> {
            self.lengths
                .get(element)
                .copied()
                .ok_or_else(|| TopologyError::EntityNotFound(format!("{element}")).into())
        }

        fn element_connections(&self, element: usize) -> Result<Vec<(usize, Connection)>> {
            Ok(self
                .links
                .iter()
                .filter_map(|&(a, b, fa, fb)| {
                    if a == element {
                        Some((b, Connection::new(fa, fb, self.node)))
                    } else if b == element {
                        Some((a, Connection::new(fb, fa, self.node)))
                    } else {
                        None
                    }
                })
                .collect())
        }
    }

    fn chain_of_three() -> (Geometry, [SegmentId; 3]) {
        let line = |name: &str, x0: f64, x1: f64| {
            RawSegment::new(
                name,
                vec![RawPoint::new(x0, 0.0, 0.0, 2.0), RawPoint::new(x1, 0.0, 0.0, 2.0)],
            )
        };
        // the middle segment is traced backwards
        let geometry = Ingest::new(
            vec![line("a", 0.0, 10.0), line("b", 30.0, 10.0), line("c", 30.0, 60.0)],
            vec![
                RawConnection::new(0, End::One, 1, End::One),
                RawConnection::new(1, End::Zero, 2, End::Zero),
            ],
        )
        .with_caps(false)
        .execute()
        .unwrap();
        let ids = ["a", "b", "c"].map(|n| geometry.segment_by_name(n).unwrap());
        (geometry, ids)
    }

    #[test]
    fn distances_follow_the_path() {
        let (geometry, [a, b, c]) = chain_of_three();
        let finder = PathDistanceFinder::new(&geometry, a, 0.0).unwrap();
        assert_relative_eq!(finder.distance_to(a, 0.0).unwrap(), 0.0);
        assert_relative_eq!(finder.distance_to(a, 1.0).unwrap(), 10.0, epsilon = 1e-9);
        // b runs from 30 back to 10
        assert_relative_eq!(finder.distance_to(b, 1.0).unwrap(), 10.0, epsilon = 1e-9);
        assert_relative_eq!(finder.distance_to(b, 0.0).unwrap(), 30.0, epsilon = 1e-9);
        assert_relative_eq!(finder.distance_to(c, 1.0).unwrap(), 60.0, epsilon = 1e-9);
        assert_eq!(finder.hops(c), Some(2));
    }

    #[test]
    fn start_position_is_validated() {
        let (geometry, [a, ..]) = chain_of_three();
        assert!(matches!(
            PathDistanceFinder::new(&geometry, a, 1.5),
            Err(crate::error::NeurolisError::Geometry(GeometryError::ParameterOutOfRange { .. }))
        ));
    }

    #[test]
    fn unreachable_elements_are_reported() {
        let (mut geometry, [a, b, c]) = chain_of_three();
        geometry.segment_mut(b).unwrap().neighbors.clear();
        geometry.segment_mut(a).unwrap().neighbors.clear();
        geometry.segment_mut(c).unwrap().neighbors.clear();
        let finder = PathDistanceFinder::new(&geometry, a, 0.5).unwrap();
        assert!(matches!(
            finder.distance_to(c, 0.5),
            Err(crate::error::NeurolisError::Topology(TopologyError::Unreachable(_)))
        ));
    }

    #[test]
    fn electrotonic_lengths_from_decaying_voltage() {
        let (geometry, ids) = chain_of_three();
        let finder = PathDistanceFinder::new(&geometry, ids[0], 0.5).unwrap();
        let lambda = 100.0;
        let voltages: Vec<f64> = ids
            .iter()
            .map(|&s| (-finder.distance_to(s, 0.5).unwrap() / lambda).exp())
            .collect();
        let lengths = finder.electrotonic_lengths(&voltages).unwrap();
        for length in lengths {
            assert_relative_eq!(length, lambda, max_relative = 1e-9);
        }
        assert!(finder.electrotonic_lengths(&voltages[..2]).is_err());
    }

    #[test]
    fn interior_attachment_measures_from_the_entry() {
        let mut nodes: SlotMap<NodeId, ()> = SlotMap::with_key();
        // a trunk with a side branch at a quarter of its length and a tip at end 1
        let toy = Toy {
            lengths: vec![100.0, 10.0, 20.0],
            links: vec![(0, 1, 0.25, 0.0), (0, 2, 1.0, 0.0)],
            node: nodes.insert(()),
        };
        let finder = PathDistanceFinder::new(&toy, 2, 1.0).unwrap();
        assert_relative_eq!(finder.distance_to(2, 0.0).unwrap(), 20.0, epsilon = 1e-12);
        assert_relative_eq!(finder.distance_to(0, 1.0).unwrap(), 20.0, epsilon = 1e-12);
        assert_relative_eq!(finder.distance_to(0, 0.25).unwrap(), 95.0, epsilon = 1e-12);
        assert_relative_eq!(finder.distance_to(0, 0.0).unwrap(), 120.0, epsilon = 1e-12);
        assert_relative_eq!(finder.distance_to(1, 1.0).unwrap(), 105.0, epsilon = 1e-12);
        assert_eq!(finder.hops(1), Some(2));

        let side = finder.path_distance(1).unwrap();
        assert_relative_eq!(side.entry, 0.0);
        assert_relative_eq!(side.base(), 100.0, epsilon = 1e-12);
    }
}
