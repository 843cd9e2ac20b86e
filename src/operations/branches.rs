use std::collections::BTreeSet;

use slotmap::SlotMap;

use crate::error::{OperationError, Result, TopologyError};
use crate::topology::{BranchData, BranchId, Connection, End, Geometry, SegmentId};

/// A branch walked out of the segment graph.
pub(crate) struct Extracted {
    pub(crate) chain: BranchData,
    pub(crate) segments: Vec<SegmentId>,
    /// Segment neighbors at each end where the walk stopped.
    pub(crate) open: [Vec<SegmentId>; 2],
}

/// Extends `start` in both directions through every junction with exactly
/// one neighbor, stopping at branch points and free ends.
///
/// Segments walked against their own direction are reversed so the branch
/// runs continuously from end 0 to end 1.
pub(crate) fn extract_branch(
    geometry: &Geometry,
    start: SegmentId,
    name: String,
) -> Result<Extracted> {
    let seg = geometry.segment(start)?;
    let mut chain = BranchData::new(name);
    chain.tags.clone_from(&seg.tags);
    chain.nodes.clone_from(&seg.nodes);
    chain.compartments.clone_from(&seg.compartments);

    let mut members = vec![start];
    let mut open: [Vec<SegmentId>; 2] = [Vec::new(), Vec::new()];

    for (slot, toward) in [(0, End::Zero), (1, End::One)] {
        let mut current = start;
        let mut outgoing = toward;
        loop {
            let next: Vec<(SegmentId, Connection)> = geometry
                .segment(current)?
                .neighbors_at(outgoing)
                .map(|(id, c)| (id, *c))
                .collect();
            let [(neighbor, conn)] = next[..] else {
                open[slot] = next.into_iter().map(|(id, _)| id).collect();
                break;
            };
            if members.contains(&neighbor) {
                return Err(TopologyError::Loop(format!(
                    "segments close a ring through {}",
                    geometry.segment(neighbor)?.name
                ))
                .into());
            }
            let entered = End::from_fraction(conn.neighbor_end).ok_or_else(|| {
                TopologyError::InvalidTopology("segment joined away from its ends".into())
            })?;

            let nseg = geometry.segment(neighbor)?;
            chain.tags.extend(nseg.tags.iter().cloned());
            let inner = nseg.nodes.len().saturating_sub(1);
            // `aligned` means the neighbor already runs in the branch direction
            let aligned = entered != toward;
            let mut comps = nseg.compartments.clone();
            let mut nodes = match (toward, aligned) {
                (End::Zero, true) | (End::One, false) => nseg.nodes[..inner].to_vec(),
                (End::Zero, false) | (End::One, true) => nseg.nodes[1.min(inner)..].to_vec(),
            };
            if !aligned {
                comps.reverse();
                nodes.reverse();
            }
            match toward {
                End::Zero => {
                    chain.compartments.splice(0..0, comps);
                    chain.nodes.splice(0..0, nodes);
                }
                End::One => {
                    chain.compartments.extend(comps);
                    chain.nodes.extend(nodes);
                }
            }

            members.push(neighbor);
            outgoing = entered.opposite();
            current = neighbor;
        }
    }

    Ok(Extracted {
        chain,
        segments: members,
        open,
    })
}

/// Splits the segment graph into branches bounded by branch points,
/// starting from the soma branch.
///
/// Every segment ends up in exactly one branch. Branches meeting at a node
/// all become neighbors of each other. The new branches replace any previous
/// ones only once the whole partition has been built.
#[derive(Debug, Default)]
pub struct FindBranches;

impl FindBranches {
    /// Creates a new `FindBranches` operation.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Executes the operation, returning the branches with the soma branch
    /// first.
    ///
    /// # Errors
    ///
    /// Returns an error if the soma has not been located, if the segments
    /// contain a loop, or if some segments are not connected to the soma.
    pub fn execute(&self, geometry: &mut Geometry) -> Result<Vec<BranchId>> {
        let soma = geometry
            .soma()
            .ok_or_else(|| OperationError::Failed("locate the soma before finding branches".into()))?;

        let mut arena: SlotMap<BranchId, BranchData> = SlotMap::with_key();
        let mut sequence = Vec::new();
        let mut open: BTreeSet<SegmentId> = geometry.segments().map(|(id, _)| id).collect();
        for seg in &soma.segments {
            open.remove(seg);
        }

        let mut soma_chain = soma.branch.clone();
        soma_chain.neighbors.clear();
        soma_chain.branch_order = None;
        let soma_id = arena.insert(soma_chain);
        sequence.push(soma_id);

        let [open0, open1] = soma.open_neighbors.clone();
        let mut work = vec![(soma_id, End::Zero, open0), (soma_id, End::One, open1)];

        while let Some((check, side, seg_neighbors)) = work.pop() {
            let check_node = arena
                .get(check)
                .and_then(|b| b.end_node(side))
                .ok_or_else(|| TopologyError::InvalidTopology("branch without nodes".into()))?;
            let mut junction = vec![(check, side)];

            for seg in seg_neighbors {
                if !open.contains(&seg) {
                    return Err(TopologyError::Loop(format!(
                        "segment {} is reached twice",
                        geometry.segment(seg)?.name
                    ))
                    .into());
                }
                let extracted = extract_branch(geometry, seg, format!("branch{}", arena.len()))?;
                for member in &extracted.segments {
                    if !open.remove(member) {
                        return Err(TopologyError::Loop(format!(
                            "segment {} belongs to two branches",
                            geometry.segment(*member)?.name
                        ))
                        .into());
                    }
                }

                let first = extracted.chain.end_node(End::Zero);
                let last = extracted.chain.end_node(End::One);
                let attached = if last == Some(check_node) {
                    if first == Some(check_node) {
                        return Err(TopologyError::Loop(format!(
                            "{} starts and ends at the same node",
                            extracted.chain.name
                        ))
                        .into());
                    }
                    End::One
                } else if first == Some(check_node) {
                    End::Zero
                } else {
                    return Err(TopologyError::InvalidTopology(format!(
                        "{} does not touch its junction",
                        extracted.chain.name
                    ))
                    .into());
                };

                let free = attached.opposite();
                let [open0, open1] = extracted.open;
                let far = if free == End::Zero { open0 } else { open1 };
                let id = arena.insert(extracted.chain);
                sequence.push(id);
                junction.push((id, attached));
                work.push((id, free, far));
            }

            for &(a, end_a) in &junction {
                for &(b, end_b) in &junction {
                    if a == b {
                        continue;
                    }
                    if let Some(branch) = arena.get_mut(a) {
                        branch
                            .neighbors
                            .insert(b, Connection::new(end_a.fraction(), end_b.fraction(), check_node));
                    }
                }
            }
        }

        if !open.is_empty() {
            return Err(TopologyError::Disconnected(open.len()).into());
        }

        tracing::debug!(branches = sequence.len(), "found branches");
        geometry.commit_branches(arena, sequence.clone(), soma_id);
        Ok(sequence)
    }
}
