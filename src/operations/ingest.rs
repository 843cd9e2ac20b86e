use std::collections::BTreeSet;

use crate::error::{OperationError, Result};
use crate::math::Point3;
use crate::topology::{CompartmentKind, End, Geometry, NodeData, SegmentData, SegmentId};

use super::{AddOneNodeCompartments, ConnectSegments};

/// One traced sample: a position and a diameter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawPoint {
    /// X coordinate (µm).
    pub x: f64,
    /// Y coordinate (µm).
    pub y: f64,
    /// Z coordinate (µm).
    pub z: f64,
    /// Diameter (µm).
    pub diameter: f64,
}

impl RawPoint {
    /// Creates a raw point.
    #[must_use]
    pub fn new(x: f64, y: f64, z: f64, diameter: f64) -> Self {
        Self { x, y, z, diameter }
    }
}

/// A traced segment as supplied by a file reader.
///
/// A segment needs at least two samples: compartments span adjacent samples
/// and a cap takes its axis from the neighboring sample. A soma traced as a
/// single point has to be given as a short two-point segment.
#[derive(Debug, Clone, PartialEq)]
pub struct RawSegment {
    /// Unique segment name.
    pub name: String,
    /// Samples from end 0 to end 1, at least two.
    pub points: Vec<RawPoint>,
}

impl RawSegment {
    /// Creates a raw segment.
    #[must_use]
    pub fn new(name: impl Into<String>, points: Vec<RawPoint>) -> Self {
        Self {
            name: name.into(),
            points,
        }
    }
}

/// A junction between two raw segments, by position in the segment list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawConnection {
    /// Index of the first segment.
    pub segment_a: usize,
    /// End of the first segment.
    pub end_a: End,
    /// Index of the second segment.
    pub segment_b: usize,
    /// End of the second segment.
    pub end_b: End,
}

impl RawConnection {
    /// Creates a raw connection.
    #[must_use]
    pub fn new(segment_a: usize, end_a: End, segment_b: usize, end_b: End) -> Self {
        Self {
            segment_a,
            end_a,
            segment_b,
            end_b,
        }
    }
}

/// Builds a [`Geometry`] from raw segment and connection records.
///
/// Each segment becomes a chain of spherical nodes with a frustum between
/// every adjacent pair. Connections are applied in order, redundant nodes are
/// flushed, and free ends are capped unless capping is disabled.
pub struct Ingest {
    segments: Vec<RawSegment>,
    connections: Vec<RawConnection>,
    caps: bool,
}

impl Ingest {
    /// Creates a new `Ingest` operation.
    #[must_use]
    pub fn new(segments: Vec<RawSegment>, connections: Vec<RawConnection>) -> Self {
        Self {
            segments,
            connections,
            caps: true,
        }
    }

    /// Enables or disables capping of free segment ends.
    #[must_use]
    pub fn with_caps(mut self, caps: bool) -> Self {
        self.caps = caps;
        self
    }

    /// Executes the operation, returning the assembled geometry.
    ///
    /// # Errors
    ///
    /// Returns an error if a segment name repeats, a segment has fewer than
    /// two points, a diameter is not positive, a coordinate is not finite, a
    /// connection refers to a missing segment or joins distant ends, or a
    /// compartment cannot be measured.
    pub fn execute(&self) -> Result<Geometry> {
        let mut geometry = Geometry::new();
        let mut names = BTreeSet::new();
        let mut ids: Vec<SegmentId> = Vec::with_capacity(self.segments.len());

        for (index, raw) in self.segments.iter().enumerate() {
            if !names.insert(raw.name.as_str()) {
                return Err(OperationError::InvalidInput(format!(
                    "duplicate segment name {}",
                    raw.name
                ))
                .into());
            }
            if raw.points.len() < 2 {
                return Err(OperationError::InvalidInput(format!(
                    "segment {} needs at least two points",
                    raw.name
                ))
                .into());
            }
            if let Some(embedded) = name_index(&raw.name) {
                if embedded != index {
                    tracing::warn!(
                        segment = %raw.name,
                        position = index,
                        "segment name index does not match its position"
                    );
                }
            }

            let segment = geometry.add_segment(SegmentData::new(raw.name.clone()));
            for point in &raw.points {
                if point.diameter <= 0.0 {
                    return Err(OperationError::InvalidInput(format!(
                        "segment {} has non-positive diameter {}",
                        raw.name, point.diameter
                    ))
                    .into());
                }
                let node = NodeData::spherical(
                    Point3::new(point.x, point.y, point.z),
                    0.5 * point.diameter,
                )?;
                let node = geometry.add_node(node);
                geometry.append_node(segment, node)?;
            }
            let nodes = geometry.segment(segment)?.nodes.clone();
            for pair in nodes.windows(2) {
                geometry.add_compartment(
                    segment,
                    CompartmentKind::TwoNode {
                        node0: pair[0],
                        node1: pair[1],
                    },
                )?;
            }
            ids.push(segment);
        }

        for conn in &self.connections {
            let lookup = |index: usize| {
                ids.get(index).copied().ok_or_else(|| {
                    OperationError::InvalidInput(format!("connection to missing segment {index}"))
                })
            };
            let (a, b) = (lookup(conn.segment_a)?, lookup(conn.segment_b)?);
            ConnectSegments::new(a, conn.end_a, b, conn.end_b).execute(&mut geometry)?;
        }
        geometry.flush_removed();

        if self.caps {
            AddOneNodeCompartments::new().execute(&mut geometry)?;
        }

        tracing::debug!(
            nodes = geometry.num_nodes(),
            segments = geometry.num_segments(),
            compartments = geometry.num_compartments(),
            "ingested geometry"
        );
        Ok(geometry)
    }
}

/// Numeric index embedded as `name[N]`, if any.
fn name_index(name: &str) -> Option<usize> {
    let inner = name.strip_suffix(']')?;
    let open = inner.rfind('[')?;
    inner[open + 1..].parse().ok()
}
