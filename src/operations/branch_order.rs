use std::collections::{BTreeMap, VecDeque};

use crate::error::{OperationError, Result, TopologyError};
use crate::topology::{BranchId, End, Geometry};

/// Direction in which branch orders are counted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BranchOrdering {
    /// Leaves are order 0; each branch is one more than the largest order
    /// among the branches hanging off one of its ends.
    #[default]
    Reverse,
    /// Number of branch hops from the soma, which is order 0.
    Forward,
}

/// Assigns a branch order to every branch.
#[derive(Debug, Default)]
pub struct CalcBranchOrder {
    ordering: BranchOrdering,
}

impl CalcBranchOrder {
    /// Creates a new `CalcBranchOrder` operation using reverse ordering.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the counting direction.
    #[must_use]
    pub fn with_ordering(mut self, ordering: BranchOrdering) -> Self {
        self.ordering = ordering;
        self
    }

    /// Executes the operation, storing the order on each branch and
    /// returning all of them.
    ///
    /// # Errors
    ///
    /// Returns an error if branches have not been found, if reverse ordering
    /// stops making progress (which happens only when branches form a loop),
    /// or if forward ordering cannot reach every branch from the soma.
    pub fn execute(&self, geometry: &mut Geometry) -> Result<BTreeMap<BranchId, u32>> {
        let soma = geometry
            .soma_branch()
            .ok_or_else(|| OperationError::Failed("find branches before ordering them".into()))?;
        let orders = match self.ordering {
            BranchOrdering::Reverse => reverse_orders(geometry, soma)?,
            BranchOrdering::Forward => forward_orders(geometry, soma)?,
        };
        for (&id, &order) in &orders {
            geometry.branch_mut(id)?.branch_order = Some(order);
        }
        Ok(orders)
    }
}

fn reverse_orders(geometry: &Geometry, soma: BranchId) -> Result<BTreeMap<BranchId, u32>> {
    let mut orders: BTreeMap<BranchId, u32> = BTreeMap::new();
    let mut queue: VecDeque<BranchId> = geometry.branches().map(|(id, _)| id).collect();
    let mut stall = 0;

    while let Some(id) = queue.pop_front() {
        let branch = geometry.branch(id)?;
        let order = if id == soma {
            let neighbors: Option<Vec<u32>> =
                branch.neighbors.keys().map(|n| orders.get(n).copied()).collect();
            neighbors.map(|n| n.into_iter().max().map_or(0, |m| m + 1))
        } else {
            let mut best: Option<u32> = None;
            for end in [End::Zero, End::One] {
                let at_end: Option<Vec<u32>> = branch
                    .neighbors
                    .iter()
                    .filter(|(_, c)| End::nearest(c.this_end) == end)
                    .map(|(n, _)| orders.get(n).copied())
                    .collect();
                if let Some(at_end) = at_end {
                    let candidate = at_end.into_iter().max().map_or(0, |m| m + 1);
                    best = Some(best.map_or(candidate, |b| b.min(candidate)));
                }
            }
            best
        };

        match order {
            Some(order) => {
                orders.insert(id, order);
                stall = 0;
            }
            None => {
                queue.push_back(id);
                stall += 1;
                if stall >= queue.len() {
                    return Err(TopologyError::Loop(format!(
                        "branch orders do not converge, {} branches unresolved",
                        queue.len()
                    ))
                    .into());
                }
            }
        }
    }
    Ok(orders)
}

fn forward_orders(geometry: &Geometry, soma: BranchId) -> Result<BTreeMap<BranchId, u32>> {
    let mut orders = BTreeMap::new();
    orders.insert(soma, 0);
    let mut queue = VecDeque::from([soma]);
    while let Some(id) = queue.pop_front() {
        let next = orders.get(&id).copied().unwrap_or_default() + 1;
        for &neighbor in geometry.branch(id)?.neighbors.keys() {
            if !orders.contains_key(&neighbor) {
                orders.insert(neighbor, next);
                queue.push_back(neighbor);
            }
        }
    }
    let missing = geometry.num_branches().saturating_sub(orders.len());
    if missing > 0 {
        return Err(TopologyError::Disconnected(missing).into());
    }
    Ok(orders)
}
