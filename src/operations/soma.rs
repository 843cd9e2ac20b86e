use crate::error::{GeometryError, OperationError, Result};
use crate::topology::{CompartmentId, Geometry, Soma, SOMA_TAG};

use super::branches::extract_branch;

/// Parameters for the soma radius cutoff.
///
/// Compartments around the widest one belong to the soma while their
/// average radius stays at or above
/// `(min_radius^min_exponent · max_radius^max_exponent)^(1 / (min_exponent + max_exponent))`
/// of the enclosing branch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SomaParams {
    /// Weight of the branch minimum radius.
    pub min_exponent: f64,
    /// Weight of the branch maximum radius.
    pub max_exponent: f64,
}

impl Default for SomaParams {
    fn default() -> Self {
        Self {
            min_exponent: 1.0,
            max_exponent: 3.0,
        }
    }
}

impl SomaParams {
    /// Weighted geometric mean of the two radii.
    #[must_use]
    pub fn cutoff(&self, min_radius: f64, max_radius: f64) -> f64 {
        let total = self.min_exponent + self.max_exponent;
        (min_radius.powf(self.min_exponent) * max_radius.powf(self.max_exponent)).powf(1.0 / total)
    }
}

/// Locates the cell body.
///
/// The widest compartment is taken as the soma center. The unbranched run of
/// segments around it becomes the soma branch, and the contiguous
/// compartments of that run whose radius passes the cutoff are tagged
/// `"Soma"`. The result is cached on the geometry until its topology changes.
#[derive(Debug, Default)]
pub struct FindSoma {
    params: SomaParams,
}

impl FindSoma {
    /// Creates a new `FindSoma` operation with default parameters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the cutoff parameters.
    #[must_use]
    pub fn with_params(mut self, params: SomaParams) -> Self {
        self.params = params;
        self
    }

    /// Executes the operation, returning the located soma.
    ///
    /// # Errors
    ///
    /// Returns an error if the geometry has no compartments, if the cutoff
    /// exponents do not sum to a positive value, or if the segments around
    /// the center form a loop.
    pub fn execute(&self, geometry: &mut Geometry) -> Result<Soma> {
        if let Some(soma) = geometry.soma() {
            return Ok(soma.clone());
        }
        let total = self.params.min_exponent + self.params.max_exponent;
        if total <= 0.0 {
            return Err(GeometryError::ParameterOutOfRange {
                parameter: "min_exponent + max_exponent",
                value: total,
                min: f64::MIN_POSITIVE,
                max: f64::INFINITY,
            }
            .into());
        }

        let mut center: Option<(CompartmentId, f64)> = None;
        for (id, comp) in geometry.compartments() {
            let wider = match center {
                Some((_, r)) => comp.max_radius() > r,
                None => true,
            };
            if wider {
                center = Some((id, comp.max_radius()));
            }
        }
        let (center, _) = center
            .ok_or_else(|| OperationError::Failed("cannot find a soma without compartments".into()))?;
        let primary_segment = geometry.compartment(center)?.segment;

        let extracted = extract_branch(geometry, primary_segment, "branch0".into())?;
        let mut branch = extracted.chain;
        let cutoff = self
            .params
            .cutoff(branch.min_radius(geometry)?, branch.max_radius(geometry)?);

        let index = branch
            .compartments
            .iter()
            .position(|&c| c == center)
            .unwrap_or_default();
        let mut body = vec![center];
        for &c in &branch.compartments[index + 1..] {
            if geometry.compartment(c)?.avg_radius() < cutoff {
                break;
            }
            body.push(c);
        }
        for &c in branch.compartments[..index].iter().rev() {
            if geometry.compartment(c)?.avg_radius() < cutoff {
                break;
            }
            body.push(c);
        }

        geometry.tags.entry(SOMA_TAG.to_owned()).or_insert(0);
        for &c in &body {
            geometry.tag_compartment(c, SOMA_TAG)?;
        }
        let segments = geometry.owning_segments(&body)?;
        if segments.len() > 1 {
            tracing::warn!(segments = segments.len(), "soma spans several segments");
        }
        for &s in &segments {
            geometry.segment_mut(s)?.tags.insert(SOMA_TAG.to_owned());
        }
        branch.tags.insert(SOMA_TAG.to_owned());

        tracing::debug!(compartments = body.len(), cutoff, "located soma");
        let soma = Soma {
            center,
            branch,
            segments: extracted.segments,
            primary_segment,
            open_neighbors: extracted.open,
        };
        geometry.soma = Some(soma.clone());
        Ok(soma)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::operations::ingest::{Ingest, RawPoint, RawSegment};
    use approx::assert_relative_eq;

    fn tapered() -> Geometry {
        let points = [(0.0, 2.0), (10.0, 20.0), (20.0, 20.0), (30.0, 6.0), (60.0, 2.0)]
            .iter()
            .map(|&(x, d)| RawPoint::new(x, 0.0, 0.0, d))
            .collect();
        Ingest::new(vec![RawSegment::new("cell", points)], Vec::new())
            .execute()
            .unwrap()
    }

    #[test]
    fn cutoff_is_weighted_mean() {
        let params = SomaParams::default();
        assert_relative_eq!(params.cutoff(1.0, 16.0), 8.0, epsilon = 1e-12);
        let even = SomaParams {
            min_exponent: 1.0,
            max_exponent: 1.0,
        };
        assert_relative_eq!(even.cutoff(4.0, 9.0), 6.0, epsilon = 1e-12);
    }

    #[test]
    fn tags_contiguous_wide_run() {
        let mut geometry = tapered();
        let soma = FindSoma::new().execute(&mut geometry).unwrap();
        let seg = geometry.segment(soma.primary_segment).unwrap();
        // cap, 0..10, 10..20, 20..30, 30..60, cap; the first widest frustum is the center
        let comps = seg.compartments.clone();
        assert_eq!(comps.len(), 6);
        assert_eq!(soma.center, comps[1]);

        let tagged: Vec<bool> = comps
            .iter()
            .map(|&c| geometry.compartment(c).unwrap().tags.contains(SOMA_TAG))
            .collect();
        assert_eq!(tagged, vec![false, true, true, true, false, false]);
        assert_eq!(geometry.tag_count(SOMA_TAG), 3);
        assert!(seg.tags.contains(SOMA_TAG));
        assert!(soma.branch.tags.contains(SOMA_TAG));
    }

    #[test]
    fn result_is_cached() {
        let mut geometry = tapered();
        let first = FindSoma::new().execute(&mut geometry).unwrap();
        let again = FindSoma::new().execute(&mut geometry).unwrap();
        assert_eq!(first.center, again.center);
        assert_eq!(geometry.tag_count(SOMA_TAG), 3);
    }

    #[test]
    fn empty_geometry_fails() {
        let mut geometry = Geometry::new();
        assert!(FindSoma::new().execute(&mut geometry).is_err());
    }
}
