use std::fmt;

use crate::error::Result;
use crate::topology::{Geometry, SOMA_TAG};

use super::connectivity::count_components;

/// Summary statistics of a geometry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeometrySummary {
    /// Nodes, including those shared at junctions once.
    pub num_nodes: usize,
    /// Traced segments.
    pub num_segments: usize,
    /// Frustums and caps.
    pub num_compartments: usize,
    /// Branches, or 0 before branches are found.
    pub num_branches: usize,
    /// Connected segment components.
    pub num_components: usize,
    /// Axon branches, if axons have been located.
    pub num_axons: Option<usize>,
    /// Summed compartment length (µm).
    pub total_length: f64,
    /// Total surface area (mm²).
    pub surface_area: f64,
    /// Total volume (mm³).
    pub volume: f64,
    /// Surface area of the compartments tagged `"Soma"` (mm²).
    pub soma_surface_area: f64,
}

impl fmt::Display for GeometrySummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "nodes: {}", self.num_nodes)?;
        writeln!(f, "compartments: {}", self.num_compartments)?;
        writeln!(f, "segments: {}", self.num_segments)?;
        writeln!(f, "connected components: {}", self.num_components)?;
        writeln!(f, "branches: {}", self.num_branches)?;
        if let Some(axons) = self.num_axons {
            writeln!(f, "axons: {axons}")?;
        }
        writeln!(f, "soma area: {} mm^2", self.soma_surface_area)?;
        writeln!(f, "length: {} um", self.total_length)?;
        writeln!(f, "volume: {} mm^3", self.volume)?;
        write!(f, "surface area: {} mm^2", self.surface_area)
    }
}

/// Collects [`GeometrySummary`] statistics without modifying the geometry.
#[derive(Debug, Default)]
pub struct Summary;

impl Summary {
    /// Creates a new `Summary` query.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Executes the query.
    ///
    /// # Errors
    ///
    /// Returns an error if the geometry references missing entities.
    pub fn execute(&self, geometry: &Geometry) -> Result<GeometrySummary> {
        let (mut total_length, mut soma_surface_area) = (0.0, 0.0);
        for (_, comp) in geometry.compartments() {
            total_length += comp.length();
            if comp.tags.contains(SOMA_TAG) {
                soma_surface_area += comp.surface_area();
            }
        }
        Ok(GeometrySummary {
            num_nodes: geometry.num_nodes(),
            num_segments: geometry.num_segments(),
            num_compartments: geometry.num_compartments(),
            num_branches: geometry.num_branches(),
            num_components: count_components(geometry)?,
            num_axons: geometry.axons().map(<[_]>::len),
            total_length,
            surface_area: geometry.surface_area(),
            volume: geometry.volume(),
            soma_surface_area,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::operations::ingest::{Ingest, RawPoint, RawSegment};
    use crate::operations::FindSoma;
    use approx::assert_relative_eq;
    use std::f64::consts::PI;

    #[test]
    fn summarizes_single_segment() {
        let mut geometry = Ingest::new(
            vec![RawSegment::new(
                "soma",
                vec![
                    RawPoint::new(0.0, 0.0, 0.0, 10.0),
                    RawPoint::new(20.0, 0.0, 0.0, 10.0),
                    RawPoint::new(25.0, 0.0, 0.0, 2.0),
                ],
            )],
            Vec::new(),
        )
        .execute()
        .unwrap();
        FindSoma::new().execute(&mut geometry).unwrap();
        let summary = Summary::new().execute(&geometry).unwrap();

        assert_eq!(summary.num_compartments, 4);
        assert_eq!(summary.num_components, 1);
        assert_eq!(summary.num_axons, None);
        assert_relative_eq!(summary.total_length, 31.0, epsilon = 1e-9);
        // the wide cylinder and its cap; the taper falls below the cutoff
        let area = (2.0 * PI * 5.0 * 20.0 + 2.0 * PI * 25.0) * 1e-6;
        assert_relative_eq!(summary.soma_surface_area, area, max_relative = 1e-9);
        assert!(summary.surface_area > area);
        assert!(summary.to_string().contains("compartments: 4"));
    }
}
