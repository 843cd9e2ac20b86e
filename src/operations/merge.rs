use std::collections::BTreeSet;

use crate::error::{GeometryError, Result, TopologyError};
use crate::math::TOLERANCE;
use crate::topology::{BranchId, Connection, End, Geometry};

use super::CalcBranchOrder;

/// Absorbs branch `absorb` into its neighbor `keep` at an end-to-end
/// junction.
///
/// `keep` retains its direction and grows by the compartments and nodes of
/// `absorb`, reversed where needed. Every other connection is re-expressed as
/// a fraction of the combined length. `absorb` is queued for removal.
///
/// # Errors
///
/// Returns an error if the branches are not neighbors, if they do not meet
/// end to end, or if the combined branch has no length.
pub(crate) fn merge_chains(geometry: &mut Geometry, keep: BranchId, absorb: BranchId) -> Result<()> {
    let a = geometry.branch(keep)?;
    let b = geometry.branch(absorb)?;
    let conn = *a.neighbors.get(&absorb).ok_or_else(|| {
        TopologyError::InvalidTopology(format!("{} and {} are not neighbors", a.name, b.name))
    })?;
    let (Some(ea), Some(eb)) = (End::from_fraction(conn.this_end), End::from_fraction(conn.neighbor_end))
    else {
        return Err(TopologyError::InvalidTopology(format!(
            "{} and {} do not meet end to end",
            a.name, b.name
        ))
        .into());
    };

    let (len_a, len_b) = (a.length(geometry)?, b.length(geometry)?);
    let total = len_a + len_b;
    if total <= TOLERANCE {
        return Err(GeometryError::Degenerate(format!("merged branch {} has no length", a.name)).into());
    }
    let off_a = if ea == End::Zero { len_b } else { 0.0 };
    let off_b = if ea == End::One { len_a } else { 0.0 };
    let flip = ea == eb;
    let from_a = |f: f64| (off_a + f * len_a) / total;
    let from_b = |f: f64| {
        let along = if flip { 1.0 - f } else { f };
        (off_b + along * len_b) / total
    };

    let (mut comps_b, mut nodes_b) = (b.compartments.clone(), b.nodes.clone());
    let n = nodes_b.len();
    // drop the node shared with `keep`
    match eb {
        End::Zero => nodes_b = nodes_b.split_off(1.min(n)),
        End::One => nodes_b.truncate(n.saturating_sub(1)),
    }
    if flip {
        comps_b.reverse();
        nodes_b.reverse();
    }
    let (compartments, nodes) = match ea {
        End::One => (
            [a.compartments.as_slice(), comps_b.as_slice()].concat(),
            [a.nodes.as_slice(), nodes_b.as_slice()].concat(),
        ),
        End::Zero => (
            [comps_b.as_slice(), a.compartments.as_slice()].concat(),
            [nodes_b.as_slice(), a.nodes.as_slice()].concat(),
        ),
    };

    let mut links: Vec<(BranchId, Connection)> = a
        .neighbors
        .iter()
        .filter(|(id, _)| **id != absorb)
        .map(|(&id, c)| (id, Connection::new(from_a(c.this_end), c.neighbor_end, c.node)))
        .collect();
    links.extend(
        b.neighbors
            .iter()
            .filter(|(id, _)| **id != keep)
            .map(|(&id, c)| (id, Connection::new(from_b(c.this_end), c.neighbor_end, c.node))),
    );
    let tags = b.tags.clone();
    let absorbed_neighbors: Vec<BranchId> = b.neighbors.keys().copied().collect();

    // commit
    for id in absorbed_neighbors {
        if let Some(other) = geometry.branches.get_mut(id) {
            other.neighbors.remove(&absorb);
        }
    }
    for &(id, link) in &links {
        geometry.branch_mut(id)?.neighbors.insert(keep, link.reversed());
    }
    let merged = geometry.branch_mut(keep)?;
    merged.compartments = compartments;
    merged.nodes = nodes;
    merged.neighbors = links.into_iter().collect();
    merged.tags.extend(tags);

    geometry.removed_branches.insert(absorb);
    if geometry.soma_branch == Some(absorb) {
        geometry.soma_branch = Some(keep);
    }
    geometry.axons = None;
    Ok(())
}

/// Merges each branch into the neighbor that continues it.
///
/// A branch of order `c` continues into a neighbor when that neighbor is the
/// only one at an end-to-end junction whose order is at least `c`, and its
/// order is exactly `c + 1`. Branch orders are computed first if missing.
/// Passes repeat until nothing more merges.
#[derive(Debug, Default)]
pub struct MergeBranchesByOrder;

impl MergeBranchesByOrder {
    /// Creates a new `MergeBranchesByOrder` operation.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Executes the operation, returning the number of merges performed.
    ///
    /// # Errors
    ///
    /// Returns an error if branches have not been found, if branch orders
    /// cannot be computed, or if a merge fails.
    pub fn execute(&self, geometry: &mut Geometry) -> Result<usize> {
        if geometry.soma_branch().is_none() || geometry.branches().any(|(_, b)| b.branch_order.is_none()) {
            CalcBranchOrder::new().execute(geometry)?;
        }

        let mut merges = 0;
        loop {
            let mut pass = 0;
            let mut visited = BTreeSet::new();
            let mut open: BTreeSet<BranchId> = geometry
                .branches()
                .filter(|(_, b)| b.branch_order == Some(0))
                .map(|(id, _)| id)
                .collect();

            while let Some(mut current) = open.pop_first() {
                visited.insert(current);
                while let Some(target) = continuation(geometry, current)? {
                    open.remove(&target);
                    visited.insert(target);
                    merge_chains(geometry, target, current)?;
                    pass += 1;
                    current = target;
                }
                for &n in geometry.branch(current)?.neighbors.keys() {
                    if !visited.contains(&n) {
                        open.insert(n);
                    }
                }
            }

            geometry.flush_removed();
            merges += pass;
            if pass == 0 {
                break;
            }
        }
        tracing::debug!(merges, branches = geometry.num_branches(), "merged branches by order");
        Ok(merges)
    }
}

/// The unique neighbor `current` continues into, if any.
fn continuation(geometry: &Geometry, current: BranchId) -> Result<Option<BranchId>> {
    let branch = geometry.branch(current)?;
    let Some(order) = branch.branch_order else {
        return Ok(None);
    };
    let mut target = None;
    for (&id, conn) in &branch.neighbors {
        if !conn.is_end_to_end() {
            continue;
        }
        let Some(neighbor_order) = geometry.branch(id)?.branch_order else {
            continue;
        };
        if neighbor_order >= order {
            if target.is_some() || neighbor_order != order + 1 {
                return Ok(None);
            }
            target = Some(id);
        }
    }
    Ok(target)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::operations::ingest::{Ingest, RawConnection, RawPoint, RawSegment};
    use crate::operations::{FindBranches, FindSoma};
    use approx::assert_relative_eq;

    fn line(name: &str, from: (f64, f64), to: (f64, f64), diameter: f64) -> RawSegment {
        RawSegment::new(
            name,
            vec![
                RawPoint::new(from.0, from.1, 0.0, diameter),
                RawPoint::new(to.0, to.1, 0.0, diameter),
            ],
        )
    }

    /// soma and trunk form one branch forking into `a` and `b`; `b` forks
    /// again into `c` and `d`.
    fn tree() -> Geometry {
        let mut geometry = Ingest::new(
            vec![
                line("soma", (0.0, 0.0), (10.0, 0.0), 10.0),
                line("trunk", (10.0, 0.0), (50.0, 0.0), 2.0),
                line("a", (50.0, 0.0), (50.0, 40.0), 1.0),
                line("b", (50.0, 0.0), (90.0, 0.0), 1.0),
                line("c", (90.0, 0.0), (90.0, 30.0), 1.0),
                line("d", (90.0, 0.0), (130.0, 0.0), 1.0),
            ],
            vec![
                RawConnection::new(0, End::One, 1, End::Zero),
                RawConnection::new(1, End::One, 2, End::Zero),
                RawConnection::new(1, End::One, 3, End::Zero),
                RawConnection::new(3, End::One, 4, End::Zero),
                RawConnection::new(3, End::One, 5, End::Zero),
            ],
        )
        .execute()
        .unwrap();
        FindSoma::new().execute(&mut geometry).unwrap();
        FindBranches::new().execute(&mut geometry).unwrap();
        geometry
    }

    fn branch_named(geometry: &Geometry, segment: &str) -> BranchId {
        let seg = geometry.segment_by_name(segment).unwrap();
        let comp = geometry.segment(seg).unwrap().compartments[0];
        geometry
            .branches()
            .find(|(_, b)| b.compartments.contains(&comp))
            .map(|(id, _)| id)
            .unwrap()
    }

    #[test]
    fn merge_chains_recomputes_fractions() {
        let mut geometry = tree();
        let soma = geometry.soma_branch().unwrap();
        let b = branch_named(&geometry, "b");
        let a = branch_named(&geometry, "a");
        let len_soma = geometry.branch(soma).unwrap().length(&geometry).unwrap();
        let len_b = geometry.branch(b).unwrap().length(&geometry).unwrap();
        let comps = geometry.num_compartments();

        merge_chains(&mut geometry, soma, b).unwrap();
        geometry.flush_removed();

        let merged = geometry.branch(soma).unwrap();
        assert_relative_eq!(merged.length(&geometry).unwrap(), len_soma + len_b, epsilon = 1e-9);
        let split = len_soma / (len_soma + len_b);
        assert_relative_eq!(merged.neighbors[&a].this_end, split, epsilon = 1e-12);
        assert_relative_eq!(geometry.branch(a).unwrap().neighbors[&soma].neighbor_end, split, epsilon = 1e-12);
        let c = branch_named(&geometry, "c");
        assert_relative_eq!(merged.neighbors[&c].this_end, 1.0, epsilon = 1e-12);
        assert!(geometry.branch(b).is_err());

        let total: usize = geometry.branches().map(|(_, br)| br.compartments.len()).sum();
        assert_eq!(total, comps);
        let first = geometry.node(merged.nodes[0]).unwrap();
        assert_relative_eq!(first.position.x, 0.0);
        let last = geometry.node(*merged.nodes.last().unwrap()).unwrap();
        assert_relative_eq!(last.position.x, 90.0);
    }

    #[test]
    fn continuation_merges_to_fixed_point() {
        let mut geometry = tree();
        let before = geometry.num_branches();
        let merges = MergeBranchesByOrder::new().execute(&mut geometry).unwrap();
        assert_eq!(merges, 1);
        assert_eq!(geometry.num_branches(), before - 1);
        assert_eq!(MergeBranchesByOrder::new().execute(&mut geometry).unwrap(), 0);

        for (id, branch) in geometry.branches() {
            for (n, conn) in &branch.neighbors {
                assert_eq!(geometry.branch(*n).unwrap().neighbors[&id], conn.reversed());
            }
        }
    }

    #[test]
    fn rejects_non_neighbors() {
        let mut geometry = tree();
        let a = branch_named(&geometry, "a");
        let c = branch_named(&geometry, "c");
        assert!(merge_chains(&mut geometry, a, c).is_err());
    }
}
