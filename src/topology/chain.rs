use std::collections::{BTreeMap, BTreeSet};

use crate::error::{GeometryError, Result};
use crate::math::{Point3, TOLERANCE};

use super::compartment::{CompartmentData, CompartmentId, CompartmentKind};
use super::node::NodeId;
use super::Geometry;

/// Bisection steps when solving for a volume split inside a compartment.
const VOLUME_BISECTIONS: usize = 60;

slotmap::new_key_type! {
    /// Unique identifier for a traced segment.
    pub struct SegmentId;
}

slotmap::new_key_type! {
    /// Unique identifier for a derived branch.
    pub struct BranchId;
}

/// A traced chain of nodes as ingested.
pub type SegmentData = Chain<SegmentId>;

/// A chain bounded by branch points, derived from segments.
pub type BranchData = Chain<BranchId>;

/// One of the two ends of a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum End {
    /// Position 0.
    Zero,
    /// Position 1.
    One,
}

impl End {
    /// Fractional position of this end along the chain.
    #[must_use]
    pub fn fraction(self) -> f64 {
        match self {
            Self::Zero => 0.0,
            Self::One => 1.0,
        }
    }

    /// End matching `fraction`, if it lies at either end.
    #[must_use]
    pub fn from_fraction(fraction: f64) -> Option<Self> {
        if fraction.abs() < TOLERANCE {
            Some(Self::Zero)
        } else if (fraction - 1.0).abs() < TOLERANCE {
            Some(Self::One)
        } else {
            None
        }
    }

    /// End closest to `fraction`.
    #[must_use]
    pub fn nearest(fraction: f64) -> Self {
        if fraction <= 0.5 {
            Self::Zero
        } else {
            Self::One
        }
    }

    /// The other end.
    #[must_use]
    pub fn opposite(self) -> Self {
        match self {
            Self::Zero => Self::One,
            Self::One => Self::Zero,
        }
    }
}

/// Where two chains meet.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Connection {
    /// Position of the junction along this chain.
    pub this_end: f64,
    /// Position of the junction along the neighbor.
    pub neighbor_end: f64,
    /// The shared node.
    pub node: NodeId,
}

impl Connection {
    /// Creates a connection record.
    #[must_use]
    pub fn new(this_end: f64, neighbor_end: f64, node: NodeId) -> Self {
        Self {
            this_end,
            neighbor_end,
            node,
        }
    }

    /// The same junction seen from the neighbor.
    #[must_use]
    pub fn reversed(&self) -> Self {
        Self::new(self.neighbor_end, self.this_end, self.node)
    }

    /// Returns `true` if both sides of the junction are chain ends.
    #[must_use]
    pub fn is_end_to_end(&self) -> bool {
        End::from_fraction(self.this_end).is_some() && End::from_fraction(self.neighbor_end).is_some()
    }
}

/// An ordered run of nodes and the compartments spanning them.
///
/// Segments and branches share this shape; `K` is the handle type of the
/// chains they connect to.
#[derive(Debug, Clone)]
pub struct Chain<K: Ord> {
    /// Chain name.
    pub name: String,
    /// Tags attached to the chain itself.
    pub tags: BTreeSet<String>,
    /// Nodes in order from end 0 to end 1.
    pub nodes: Vec<NodeId>,
    /// Compartments in order from end 0 to end 1.
    pub compartments: Vec<CompartmentId>,
    /// Neighboring chains and where they attach.
    pub neighbors: BTreeMap<K, Connection>,
    /// Assigned branch order, if computed.
    pub branch_order: Option<u32>,
}

impl<K: Ord + Copy> Chain<K> {
    /// Creates an empty chain.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tags: BTreeSet::new(),
            nodes: Vec::new(),
            compartments: Vec::new(),
            neighbors: BTreeMap::new(),
            branch_order: None,
        }
    }

    /// Neighbors attached at `end`.
    pub fn neighbors_at(&self, end: End) -> impl Iterator<Item = (K, &Connection)> + '_ {
        self.neighbors
            .iter()
            .filter(move |(_, c)| End::from_fraction(c.this_end) == Some(end))
            .map(|(k, c)| (*k, c))
    }

    /// Returns `true` if either end has no neighbor.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.neighbors_at(End::Zero).next().is_none() || self.neighbors_at(End::One).next().is_none()
    }

    /// Node at `end`.
    #[must_use]
    pub fn end_node(&self, end: End) -> Option<NodeId> {
        match end {
            End::Zero => self.nodes.first().copied(),
            End::One => self.nodes.last().copied(),
        }
    }

    fn each<'g>(
        &'g self,
        geometry: &'g Geometry,
    ) -> impl Iterator<Item = Result<&'g CompartmentData>> + 'g {
        self.compartments
            .iter()
            .map(move |&id| geometry.compartment(id).map_err(Into::into))
    }

    fn resolve<'g>(&'g self, geometry: &'g Geometry) -> Result<Vec<&'g CompartmentData>> {
        self.each(geometry).collect()
    }

    /// Total length (µm).
    ///
    /// # Errors
    ///
    /// Returns an error if a compartment is missing from `geometry`.
    pub fn length(&self, geometry: &Geometry) -> Result<f64> {
        self.each(geometry).map(|c| c.map(CompartmentData::length)).sum()
    }

    /// Total surface area (mm²).
    ///
    /// # Errors
    ///
    /// Returns an error if a compartment is missing from `geometry`.
    pub fn surface_area(&self, geometry: &Geometry) -> Result<f64> {
        self.each(geometry).map(|c| c.map(CompartmentData::surface_area)).sum()
    }

    /// Total volume (mm³).
    ///
    /// # Errors
    ///
    /// Returns an error if a compartment is missing from `geometry`.
    pub fn volume(&self, geometry: &Geometry) -> Result<f64> {
        self.each(geometry).map(|c| c.map(CompartmentData::volume)).sum()
    }

    /// Largest compartment radius.
    ///
    /// # Errors
    ///
    /// Returns an error if the chain has no compartments.
    pub fn max_radius(&self, geometry: &Geometry) -> Result<f64> {
        self.resolve(geometry)?
            .iter()
            .map(|c| c.max_radius())
            .reduce(f64::max)
            .ok_or_else(|| empty_chain(&self.name))
    }

    /// Smallest compartment radius.
    ///
    /// # Errors
    ///
    /// Returns an error if the chain has no compartments.
    pub fn min_radius(&self, geometry: &Geometry) -> Result<f64> {
        self.resolve(geometry)?
            .iter()
            .map(|c| c.min_radius())
            .reduce(f64::min)
            .ok_or_else(|| empty_chain(&self.name))
    }

    /// Volume-weighted mean radius.
    ///
    /// # Errors
    ///
    /// Returns an error if the chain has no volume.
    pub fn avg_radius(&self, geometry: &Geometry) -> Result<f64> {
        let comps = self.resolve(geometry)?;
        let volume: f64 = comps.iter().map(|c| c.volume()).sum();
        if volume <= 0.0 {
            return Err(empty_chain(&self.name));
        }
        Ok(comps.iter().map(|c| c.avg_radius() * c.volume()).sum::<f64>() / volume)
    }

    /// For each compartment, `true` if it runs against the chain direction.
    ///
    /// A frustum is reversed when `node1` comes first in the chain. A cap is
    /// measured base to tip, so it is reversed when it closes end 0.
    fn reversed(&self, comps: &[&CompartmentData]) -> Vec<bool> {
        let index: BTreeMap<NodeId, usize> = self.nodes.iter().enumerate().map(|(i, &n)| (n, i)).collect();
        comps
            .iter()
            .enumerate()
            .map(|(i, c)| match c.kind {
                CompartmentKind::TwoNode { node0, node1 } => {
                    matches!((index.get(&node0), index.get(&node1)), (Some(a), Some(b)) if a > b)
                }
                CompartmentKind::OneNode { node, .. } => i == 0 && self.nodes.first() == Some(&node),
            })
            .collect()
    }

    /// Integral of `1 / area` between fractional positions `x1` and `x2`
    /// of the cumulative length.
    ///
    /// # Errors
    ///
    /// Returns an error if the chain has no length.
    pub fn length_per_area(&self, geometry: &Geometry, x1: f64, x2: f64) -> Result<f64> {
        let (x1, x2) = if x2 < x1 { (x2, x1) } else { (x1, x2) };
        let comps = self.resolve(geometry)?;
        let total: f64 = comps.iter().map(|c| c.length()).sum();
        if total <= TOLERANCE {
            return Err(empty_chain(&self.name));
        }
        let flipped = self.reversed(&comps);
        let piece = |i: usize, lo: f64, hi: f64| {
            if flipped[i] {
                comps[i].length_per_area(1.0 - hi, 1.0 - lo)
            } else {
                comps[i].length_per_area(lo, hi)
            }
        };

        let (i1, cx1) = locate(&comps, x1 * total);
        let (i2, cx2) = locate(&comps, x2 * total);
        if i1 == i2 {
            return Ok(piece(i1, cx1, cx2));
        }
        let interior: f64 = (i1 + 1..i2).map(|i| piece(i, 0.0, 1.0)).sum();
        Ok(piece(i1, cx1, 1.0) + interior + piece(i2, 0.0, cx2))
    }

    /// Volume (mm³) between end 0 and the fractional position `x` of the
    /// cumulative length.
    ///
    /// # Errors
    ///
    /// Returns an error if the chain has no length.
    pub fn partial_volume(&self, geometry: &Geometry, x: f64) -> Result<f64> {
        let comps = self.resolve(geometry)?;
        let total: f64 = comps.iter().map(|c| c.length()).sum();
        if total <= TOLERANCE {
            return Err(empty_chain(&self.name));
        }
        let flipped = self.reversed(&comps);
        let (i, cx) = locate(&comps, x.clamp(0.0, 1.0) * total);
        let before: f64 = comps[..i].iter().map(|c| c.volume()).sum();
        let share = if flipped[i] {
            1.0 - comps[i].volume_fraction(1.0 - cx)
        } else {
            comps[i].volume_fraction(cx)
        };
        Ok(before + share * comps[i].volume())
    }

    /// Volume-weighted centroid, optionally restricted to compartments
    /// carrying `tag`.
    ///
    /// # Errors
    ///
    /// Returns an error if the selected compartments have no volume.
    pub fn centroid(&self, geometry: &Geometry, tag: Option<&str>) -> Result<Point3> {
        let comps = self.resolve(geometry)?;
        let selected: Vec<_> = comps.iter().filter(|c| carries(c, tag)).collect();
        let volume: f64 = selected.iter().map(|c| c.volume()).sum();
        if volume <= 0.0 {
            return Err(empty_chain(&self.name));
        }
        let weighted = selected
            .iter()
            .fold(Point3::origin().coords, |acc, c| acc + c.centroid().coords * c.volume());
        Ok(Point3::from(weighted / volume))
    }

    /// Fraction of the chain length at which half of the (tagged) volume
    /// lies on either side. Untagged compartments before the midpoint still
    /// count toward the length.
    ///
    /// # Errors
    ///
    /// Returns an error if the chain has no length or the selected
    /// compartments have no volume.
    pub fn centroid_position(&self, geometry: &Geometry, tag: Option<&str>) -> Result<f64> {
        let comps = self.resolve(geometry)?;
        let total_length: f64 = comps.iter().map(|c| c.length()).sum();
        let volume: f64 = comps.iter().filter(|c| carries(c, tag)).map(|c| c.volume()).sum();
        if total_length <= TOLERANCE || volume <= 0.0 {
            return Err(empty_chain(&self.name));
        }
        let flipped = self.reversed(&comps);

        let mut remaining = 0.5 * volume;
        let mut position = 0.0;
        for (i, c) in comps.iter().enumerate() {
            if !carries(c, tag) {
                position += c.length();
            } else if c.volume() < remaining {
                remaining -= c.volume();
                position += c.length();
            } else {
                let share = remaining / c.volume();
                let x = if flipped[i] {
                    1.0 - invert_volume(c, 1.0 - share)
                } else {
                    invert_volume(c, share)
                };
                position += c.length() * x;
                break;
            }
        }
        Ok((position / total_length).clamp(0.0, 1.0))
    }
}

/// Compartment holding the cumulative length `target`, and the fraction of
/// it (in chain direction) that `target` reaches.
fn locate(comps: &[&CompartmentData], target: f64) -> (usize, f64) {
    let mut cumulative = 0.0;
    for (i, c) in comps.iter().enumerate() {
        cumulative += c.length();
        if cumulative >= target {
            let x = if c.length() > TOLERANCE {
                1.0 - (cumulative - target) / c.length()
            } else {
                1.0
            };
            return (i, x.clamp(0.0, 1.0));
        }
    }
    (comps.len().saturating_sub(1), 1.0)
}

/// Fractional position at which `c` holds `share` of its volume.
fn invert_volume(c: &CompartmentData, share: f64) -> f64 {
    let (mut lo, mut hi) = (0.0, 1.0);
    for _ in 0..VOLUME_BISECTIONS {
        let mid = 0.5 * (lo + hi);
        if c.volume_fraction(mid) < share {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    0.5 * (lo + hi)
}

fn carries(c: &CompartmentData, tag: Option<&str>) -> bool {
    match tag {
        Some(t) => c.tags.contains(t),
        None => true,
    }
}

fn empty_chain(name: &str) -> crate::error::NeurolisError {
    GeometryError::Degenerate(format!("chain {name} has no extent")).into()
}
