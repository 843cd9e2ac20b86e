use crate::error::{OperationError, Result};
use crate::math::Point3;
use crate::topology::{Geometry, SOMA_TAG};

use super::path_distance::PathDistanceFinder;

/// A change in the number of neurites crossing a sphere of radius
/// `distance` around the soma.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SchollEvent {
    /// Distance from the soma (µm).
    pub distance: f64,
    /// `+1` where a neurite starts, `-1` where it ends.
    pub delta: i32,
}

/// Sorted Scholl events with cumulative queries.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchollProfile {
    events: Vec<SchollEvent>,
}

impl SchollProfile {
    fn new(mut events: Vec<SchollEvent>) -> Self {
        events.sort_by(|a, b| a.distance.total_cmp(&b.distance).then(a.delta.cmp(&b.delta)));
        Self { events }
    }

    /// Events ordered by distance.
    #[must_use]
    pub fn events(&self) -> &[SchollEvent] {
        &self.events
    }

    /// Number of neurites crossing the sphere of radius `r`: all events up
    /// to and including `r`.
    #[must_use]
    pub fn intersections_at(&self, r: f64) -> i32 {
        self.events
            .iter()
            .take_while(|e| e.distance <= r)
            .map(|e| e.delta)
            .sum()
    }

    /// Intersection count after each distinct event distance.
    #[must_use]
    pub fn curve(&self) -> Vec<(f64, i32)> {
        let mut curve: Vec<(f64, i32)> = Vec::new();
        let mut count = 0;
        for e in &self.events {
            count += e.delta;
            match curve.last_mut() {
                Some(last) if last.0.total_cmp(&e.distance).is_eq() => last.1 = count,
                _ => curve.push((e.distance, count)),
            }
        }
        curve
    }

    /// Largest intersection count at any radius.
    #[must_use]
    pub fn max_intersections(&self) -> i32 {
        self.curve().iter().map(|&(_, n)| n).max().unwrap_or(0)
    }
}

/// Counts neurite crossings of spheres centered on the soma.
///
/// Straightened analysis measures distances along the branch network from
/// the soma centroid, so every branch spans the path distances between its
/// ends. Otherwise each non-soma compartment spans the Euclidean distances
/// of its two ends from the soma centroid.
#[derive(Debug)]
pub struct SchollAnalysis {
    straighten: bool,
}

impl Default for SchollAnalysis {
    fn default() -> Self {
        Self { straighten: true }
    }
}

impl SchollAnalysis {
    /// Creates a new `SchollAnalysis`.
    #[must_use]
    pub fn new(straighten: bool) -> Self {
        Self { straighten }
    }

    /// Executes the analysis.
    ///
    /// # Errors
    ///
    /// Returns an error if branches have not been found (straightened), if
    /// no compartment is tagged `"Soma"`, or if a branch is unreachable from
    /// the soma.
    pub fn execute(&self, geometry: &Geometry) -> Result<SchollProfile> {
        if self.straighten {
            straightened(geometry)
        } else {
            euclidean(geometry)
        }
    }
}

fn event(distance: f64, delta: i32) -> SchollEvent {
    SchollEvent { distance, delta }
}

fn straightened(geometry: &Geometry) -> Result<SchollProfile> {
    let soma = geometry
        .soma_branch()
        .ok_or_else(|| OperationError::Failed("find branches before a Scholl analysis".into()))?;
    let position = geometry.branch(soma)?.centroid_position(geometry, Some(SOMA_TAG))?;
    let finder = PathDistanceFinder::new(geometry, soma, position)?;

    let mut events = Vec::new();
    for (id, _) in geometry.branches() {
        let (d0, d1) = (finder.distance_to(id, 0.0)?, finder.distance_to(id, 1.0)?);
        if id == soma {
            events.extend([event(0.0, 1), event(d0, -1), event(0.0, 1), event(d1, -1)]);
        } else {
            events.extend([event(d0.min(d1), 1), event(d0.max(d1), -1)]);
        }
    }
    Ok(SchollProfile::new(events))
}

fn euclidean(geometry: &Geometry) -> Result<SchollProfile> {
    let mut volume = 0.0;
    let mut weighted = Point3::origin().coords;
    for (_, comp) in geometry.compartments() {
        if comp.tags.contains(SOMA_TAG) {
            volume += comp.volume();
            weighted += comp.centroid().coords * comp.volume();
        }
    }
    if volume <= 0.0 {
        return Err(OperationError::Failed("no compartment is tagged Soma".into()).into());
    }
    let center = Point3::from(weighted / volume);

    let mut events = Vec::new();
    for (_, comp) in geometry.compartments() {
        if comp.tags.contains(SOMA_TAG) {
            continue;
        }
        let m = comp.measures();
        let (d0, d1) = ((m.start - center).norm(), (m.end - center).norm());
        events.extend([event(d0.min(d1), 1), event(d0.max(d1), -1)]);
    }
    Ok(SchollProfile::new(events))
}
