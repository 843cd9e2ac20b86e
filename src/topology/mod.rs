pub mod chain;
pub mod compartment;
pub mod node;

pub use chain::{BranchData, BranchId, Chain, Connection, End, SegmentData, SegmentId};
pub use compartment::{
    CompartmentData, CompartmentId, CompartmentKind, CompartmentShape, Measures,
};
pub use node::{NodeData, NodeId, MIN_NODE_RADIUS};

use std::collections::{BTreeMap, BTreeSet};

use crate::error::{Result, TopologyError};
use crate::math::Aabb;
use slotmap::SlotMap;

/// Tag counted on every compartment.
pub const ALL_TAG: &str = "*";

/// Tag carried by the cell body.
pub const SOMA_TAG: &str = "Soma";

/// Tag carried by axon branches.
pub const AXON_TAG: &str = "Axon";

/// The located cell body.
#[derive(Debug, Clone)]
pub struct Soma {
    /// Compartment with the largest radius.
    pub center: CompartmentId,
    /// Branch enclosing the center, extracted from the segment graph.
    pub branch: BranchData,
    /// Segments the soma branch runs through.
    pub segments: Vec<SegmentId>,
    /// Segment holding the center compartment.
    pub primary_segment: SegmentId,
    /// Segment neighbors left open at each end of the soma branch.
    pub open_neighbors: [Vec<SegmentId>; 2],
}

/// Central arena that owns every node, segment, compartment and branch of a
/// traced neuron.
///
/// Entities reference each other only through typed IDs. Each arena keeps a
/// separate insertion-order list so iteration is stable across removals.
#[derive(Debug, Default)]
pub struct Geometry {
    pub(crate) nodes: SlotMap<NodeId, NodeData>,
    pub(crate) segments: SlotMap<SegmentId, SegmentData>,
    pub(crate) compartments: SlotMap<CompartmentId, CompartmentData>,
    pub(crate) branches: SlotMap<BranchId, BranchData>,
    pub(crate) node_order: Vec<NodeId>,
    pub(crate) segment_order: Vec<SegmentId>,
    pub(crate) compartment_order: Vec<CompartmentId>,
    pub(crate) branch_sequence: Vec<BranchId>,
    pub(crate) tags: BTreeMap<String, usize>,
    pub(crate) range: Option<Aabb>,
    pub(crate) soma: Option<Soma>,
    pub(crate) soma_branch: Option<BranchId>,
    pub(crate) axons: Option<Vec<BranchId>>,
    pub(crate) surface_area: f64,
    pub(crate) volume: f64,
    pub(crate) removed_nodes: BTreeSet<NodeId>,
    pub(crate) removed_branches: BTreeSet<BranchId>,
}

impl Geometry {
    /// Creates a new, empty geometry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // --- Node operations ---

    /// Inserts a node and returns its ID.
    pub fn add_node(&mut self, data: NodeData) -> NodeId {
        let id = self.nodes.insert(data);
        self.node_order.push(id);
        id
    }

    /// Returns a reference to the node data, or an error if not found.
    ///
    /// # Errors
    ///
    /// Returns an error if the entity is not found in the geometry.
    pub fn node(&self, id: NodeId) -> Result<&NodeData, TopologyError> {
        self.nodes
            .get(id)
            .ok_or_else(|| TopologyError::EntityNotFound("node".into()))
    }

    /// Returns a mutable reference to the node data, or an error if not found.
    ///
    /// # Errors
    ///
    /// Returns an error if the entity is not found in the geometry.
    pub fn node_mut(&mut self, id: NodeId) -> Result<&mut NodeData, TopologyError> {
        self.nodes
            .get_mut(id)
            .ok_or_else(|| TopologyError::EntityNotFound("node".into()))
    }

    /// Nodes in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &NodeData)> + '_ {
        self.node_order
            .iter()
            .filter_map(|&id| self.nodes.get(id).map(|n| (id, n)))
    }

    /// Number of nodes.
    #[must_use]
    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    // --- Segment operations ---

    /// Inserts a segment and returns its ID. The segment name is registered
    /// as a tag.
    pub fn add_segment(&mut self, data: SegmentData) -> SegmentId {
        self.tags.entry(data.name.clone()).or_insert(0);
        let id = self.segments.insert(data);
        self.segment_order.push(id);
        id
    }

    /// Returns a reference to the segment data, or an error if not found.
    ///
    /// # Errors
    ///
    /// Returns an error if the entity is not found in the geometry.
    pub fn segment(&self, id: SegmentId) -> Result<&SegmentData, TopologyError> {
        self.segments
            .get(id)
            .ok_or_else(|| TopologyError::EntityNotFound("segment".into()))
    }

    /// Returns a mutable reference to the segment data, or an error if not found.
    ///
    /// # Errors
    ///
    /// Returns an error if the entity is not found in the geometry.
    pub fn segment_mut(&mut self, id: SegmentId) -> Result<&mut SegmentData, TopologyError> {
        self.segments
            .get_mut(id)
            .ok_or_else(|| TopologyError::EntityNotFound("segment".into()))
    }

    /// Segments in insertion order.
    pub fn segments(&self) -> impl Iterator<Item = (SegmentId, &SegmentData)> + '_ {
        self.segment_order
            .iter()
            .filter_map(|&id| self.segments.get(id).map(|s| (id, s)))
    }

    /// Looks a segment up by name.
    #[must_use]
    pub fn segment_by_name(&self, name: &str) -> Option<SegmentId> {
        self.segments().find(|(_, s)| s.name == name).map(|(id, _)| id)
    }

    /// Number of segments.
    #[must_use]
    pub fn num_segments(&self) -> usize {
        self.segments.len()
    }

    /// Appends `node` to the end of `segment`.
    ///
    /// # Errors
    ///
    /// Returns an error if either entity is missing.
    pub fn append_node(&mut self, segment: SegmentId, node: NodeId) -> Result<()> {
        let seg = self
            .segments
            .get_mut(segment)
            .ok_or_else(|| TopologyError::EntityNotFound("segment".into()))?;
        let data = self
            .nodes
            .get_mut(node)
            .ok_or_else(|| TopologyError::EntityNotFound("node".into()))?;
        data.segments.push(segment);
        data.tags.extend(seg.tags.iter().cloned());
        data.tags.insert(seg.name.clone());
        seg.nodes.push(node);
        Ok(())
    }

    /// Detaches every compartment and node from `segment`, deleting nodes
    /// that no longer belong to any segment. The segment itself stays.
    ///
    /// # Errors
    ///
    /// Returns an error if the segment is missing.
    pub fn clear_segment(&mut self, segment: SegmentId) -> Result<()> {
        let seg = self.segment_mut(segment)?;
        let compartments = std::mem::take(&mut seg.compartments);
        let nodes = std::mem::take(&mut seg.nodes);

        let dropped: BTreeSet<CompartmentId> = compartments.iter().copied().collect();
        for id in compartments {
            let Some(comp) = self.compartments.remove(id) else {
                continue;
            };
            self.count_tags(&comp.tags, -1);
            self.surface_area -= comp.surface_area();
            self.volume -= comp.volume();
        }
        self.compartment_order.retain(|id| !dropped.contains(id));

        let mut orphans = BTreeSet::new();
        for id in nodes {
            if let Some(node) = self.nodes.get_mut(id) {
                node.segments.retain(|&s| s != segment);
                node.compartments.retain(|c| !dropped.contains(c));
                if node.segments.is_empty() {
                    orphans.insert(id);
                }
            }
        }
        for &id in &orphans {
            self.nodes.remove(id);
        }
        self.node_order.retain(|id| !orphans.contains(id));
        Ok(())
    }

    /// Clears `segment`, removes it from its neighbors and drops it from the
    /// geometry. Derived state is invalidated.
    ///
    /// # Errors
    ///
    /// Returns an error if the segment is missing.
    pub fn remove_segment(&mut self, segment: SegmentId) -> Result<()> {
        self.clear_segment(segment)?;
        if let Some(seg) = self.segments.remove(segment) {
            for neighbor in seg.neighbors.keys() {
                if let Some(n) = self.segments.get_mut(*neighbor) {
                    n.neighbors.remove(&segment);
                }
            }
            if self.tags.get(&seg.name) == Some(&0) {
                self.tags.remove(&seg.name);
            }
        }
        self.segment_order.retain(|&id| id != segment);
        self.invalidate_derived();
        Ok(())
    }

    /// Adds `tag` to `segment` and all of its compartments.
    ///
    /// # Errors
    ///
    /// Returns an error if the segment is missing.
    pub fn tag_segment(&mut self, segment: SegmentId, tag: &str) -> Result<()> {
        let seg = self.segment_mut(segment)?;
        seg.tags.insert(tag.to_owned());
        let compartments = seg.compartments.clone();
        self.tag_all(&compartments, tag)
    }

    // --- Compartment operations ---

    /// Builds a compartment of `kind` inside `segment` and returns its ID.
    ///
    /// Caps go before or after the existing compartments depending on which
    /// end node they cover; frustums are placed after the node they start
    /// from. The compartment inherits the segment name and tags, and the tag
    /// counts and totals are updated.
    ///
    /// # Errors
    ///
    /// Returns an error if the segment or a node is missing, if the nodes do
    /// not belong to the segment, or if the compartment cannot be measured.
    pub fn add_compartment(
        &mut self,
        segment: SegmentId,
        kind: CompartmentKind,
    ) -> Result<CompartmentId> {
        let seg = self.segment(segment)?;
        let index = match kind {
            CompartmentKind::OneNode { node, .. } => {
                if seg.nodes.first() == Some(&node) {
                    0
                } else if seg.nodes.last() == Some(&node) {
                    seg.compartments.len()
                } else {
                    return Err(TopologyError::InvalidTopology(format!(
                        "cap node is not an end of segment {}",
                        seg.name
                    ))
                    .into());
                }
            }
            CompartmentKind::TwoNode { node0, .. } => {
                let position = seg.nodes.iter().position(|&n| n == node0).ok_or_else(|| {
                    TopologyError::InvalidTopology(format!(
                        "compartment node is not in segment {}",
                        seg.name
                    ))
                })?;
                let front_cap = seg
                    .compartments
                    .first()
                    .and_then(|&c| self.compartments.get(c))
                    .is_some_and(CompartmentData::is_cap);
                (position + usize::from(front_cap)).min(seg.compartments.len())
            }
        };

        let mut tags = seg.tags.clone();
        tags.insert(seg.name.clone());
        let data = CompartmentData::new(kind, segment, tags, &self.nodes)?;

        self.surface_area += data.surface_area();
        self.volume += data.volume();
        self.count_tags(&data.tags, 1);
        let nodes = kind.nodes();
        let id = self.compartments.insert(data);
        self.compartment_order.push(id);
        for node in nodes {
            if let Some(n) = self.nodes.get_mut(node) {
                n.compartments.push(id);
            }
        }
        self.segment_mut(segment)?.compartments.insert(index, id);
        Ok(id)
    }

    /// Returns a reference to the compartment data, or an error if not found.
    ///
    /// # Errors
    ///
    /// Returns an error if the entity is not found in the geometry.
    pub fn compartment(&self, id: CompartmentId) -> Result<&CompartmentData, TopologyError> {
        self.compartments
            .get(id)
            .ok_or_else(|| TopologyError::EntityNotFound("compartment".into()))
    }

    /// Compartments in insertion order.
    pub fn compartments(&self) -> impl Iterator<Item = (CompartmentId, &CompartmentData)> + '_ {
        self.compartment_order
            .iter()
            .filter_map(|&id| self.compartments.get(id).map(|c| (id, c)))
    }

    /// Number of compartments.
    #[must_use]
    pub fn num_compartments(&self) -> usize {
        self.compartments.len()
    }

    /// Adds `tag` to one compartment. Returns `true` if the tag is new to it.
    ///
    /// # Errors
    ///
    /// Returns an error if the compartment is missing.
    pub fn tag_compartment(&mut self, id: CompartmentId, tag: &str) -> Result<bool> {
        let comp = self
            .compartments
            .get_mut(id)
            .ok_or_else(|| TopologyError::EntityNotFound("compartment".into()))?;
        let added = comp.tags.insert(tag.to_owned());
        let count = self.tags.entry(tag.to_owned()).or_insert(0);
        if added {
            *count += 1;
        }
        Ok(added)
    }

    /// Recomputes a compartment from its current nodes and adjusts the
    /// totals by the change.
    pub(crate) fn remeasure(&mut self, id: CompartmentId) -> Result<()> {
        let comp = self.compartment(id)?;
        let (area, volume) = (comp.surface_area(), comp.volume());
        let (shape, measures) = CompartmentData::measure(&comp.kind, &self.nodes)?;
        self.surface_area += measures.surface_area - area;
        self.volume += measures.volume - volume;
        if let Some(comp) = self.compartments.get_mut(id) {
            comp.set_geometry(shape, measures);
        }
        Ok(())
    }

    // --- Branch operations ---

    /// Inserts a branch and returns its ID.
    pub fn add_branch(&mut self, data: BranchData) -> BranchId {
        let id = self.branches.insert(data);
        self.branch_sequence.push(id);
        id
    }

    /// Returns a reference to the branch data, or an error if not found.
    ///
    /// # Errors
    ///
    /// Returns an error if the entity is not found in the geometry.
    pub fn branch(&self, id: BranchId) -> Result<&BranchData, TopologyError> {
        self.branches
            .get(id)
            .ok_or_else(|| TopologyError::EntityNotFound("branch".into()))
    }

    /// Returns a mutable reference to the branch data, or an error if not found.
    ///
    /// # Errors
    ///
    /// Returns an error if the entity is not found in the geometry.
    pub fn branch_mut(&mut self, id: BranchId) -> Result<&mut BranchData, TopologyError> {
        self.branches
            .get_mut(id)
            .ok_or_else(|| TopologyError::EntityNotFound("branch".into()))
    }

    /// Branches in creation order.
    pub fn branches(&self) -> impl Iterator<Item = (BranchId, &BranchData)> + '_ {
        self.branch_sequence
            .iter()
            .filter_map(|&id| self.branches.get(id).map(|b| (id, b)))
    }

    /// Number of branches.
    #[must_use]
    pub fn num_branches(&self) -> usize {
        self.branches.len()
    }

    /// The branch containing the soma, once branches are found.
    #[must_use]
    pub fn soma_branch(&self) -> Option<BranchId> {
        self.soma_branch
    }

    /// Adds `tag` to `branch` and all of its compartments.
    ///
    /// # Errors
    ///
    /// Returns an error if the branch is missing.
    pub fn tag_branch(&mut self, branch: BranchId, tag: &str) -> Result<()> {
        let data = self.branch_mut(branch)?;
        data.tags.insert(tag.to_owned());
        let compartments = data.compartments.clone();
        self.tag_all(&compartments, tag)
    }

    /// Segments owning the compartments of `branch`, in first-seen order.
    ///
    /// # Errors
    ///
    /// Returns an error if the branch or one of its compartments is missing.
    pub fn branch_segments(&self, branch: BranchId) -> Result<Vec<SegmentId>> {
        self.owning_segments(&self.branch(branch)?.compartments)
    }

    pub(crate) fn owning_segments(&self, compartments: &[CompartmentId]) -> Result<Vec<SegmentId>> {
        let mut seen = BTreeSet::new();
        let mut segments = Vec::new();
        for &c in compartments {
            let segment = self.compartment(c)?.segment;
            if seen.insert(segment) {
                segments.push(segment);
            }
        }
        Ok(segments)
    }

    /// Replaces all branches at once.
    pub(crate) fn commit_branches(
        &mut self,
        branches: SlotMap<BranchId, BranchData>,
        sequence: Vec<BranchId>,
        soma_branch: BranchId,
    ) {
        self.branches = branches;
        self.branch_sequence = sequence;
        self.soma_branch = Some(soma_branch);
        self.axons = None;
        self.removed_branches.clear();
    }

    // --- Derived state ---

    /// The located soma, if `FindSoma` has run.
    #[must_use]
    pub fn soma(&self) -> Option<&Soma> {
        self.soma.as_ref()
    }

    /// Branches tagged as axons, if `FindAxons` has run.
    #[must_use]
    pub fn axons(&self) -> Option<&[BranchId]> {
        self.axons.as_deref()
    }

    /// Tag name to number of compartments carrying it. `"*"` counts all
    /// compartments.
    #[must_use]
    pub fn tags(&self) -> &BTreeMap<String, usize> {
        &self.tags
    }

    /// Number of compartments carrying `tag`.
    #[must_use]
    pub fn tag_count(&self, tag: &str) -> usize {
        self.tags.get(tag).copied().unwrap_or(0)
    }

    /// Total surface area (mm²).
    #[must_use]
    pub fn surface_area(&self) -> f64 {
        self.surface_area
    }

    /// Total volume (mm³).
    #[must_use]
    pub fn volume(&self) -> f64 {
        self.volume
    }

    /// Bounding range: the explicit range if one was set, otherwise the
    /// extent of the node positions.
    #[must_use]
    pub fn range(&self) -> Option<Aabb> {
        self.range
            .or_else(|| Aabb::from_points(self.nodes().map(|(_, n)| n.position)))
    }

    /// Overrides the computed bounding range.
    pub fn set_range(&mut self, range: Aabb) {
        self.range = Some(range);
        self.axons = None;
    }

    /// Drops nodes and branches queued for removal by connect and merge.
    pub fn flush_removed(&mut self) {
        let nodes = std::mem::take(&mut self.removed_nodes);
        for &id in &nodes {
            self.nodes.remove(id);
        }
        self.node_order.retain(|id| !nodes.contains(id));

        let branches = std::mem::take(&mut self.removed_branches);
        for &id in &branches {
            self.branches.remove(id);
        }
        self.branch_sequence.retain(|id| !branches.contains(id));
    }

    /// Forgets the soma, branches, branch orders and axons.
    pub fn invalidate_derived(&mut self) {
        self.soma = None;
        self.soma_branch = None;
        self.axons = None;
        self.branches.clear();
        self.branch_sequence.clear();
        self.removed_branches.clear();
    }

    fn tag_all(&mut self, compartments: &[CompartmentId], tag: &str) -> Result<()> {
        self.tags.entry(tag.to_owned()).or_insert(0);
        for &c in compartments {
            self.tag_compartment(c, tag)?;
        }
        Ok(())
    }

    fn count_tags(&mut self, tags: &BTreeSet<String>, delta: isize) {
        for tag in tags.iter().map(String::as_str).chain(std::iter::once(ALL_TAG)) {
            let count = self.tags.entry(tag.to_owned()).or_insert(0);
            *count = count.saturating_add_signed(delta);
        }
    }
}
