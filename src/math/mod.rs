pub mod elliptic;

/// 3D point type.
pub type Point3 = nalgebra::Point3<f64>;

/// 3D vector type.
pub type Vector3 = nalgebra::Vector3<f64>;

/// Global geometric tolerance for floating-point comparisons.
pub const TOLERANCE: f64 = 1e-10;

/// Converts an area in µm² to mm².
pub const UM2_TO_MM2: f64 = 1.0e-6;

/// Converts a volume in µm³ to mm³.
pub const UM3_TO_MM3: f64 = 1.0e-9;

/// An axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    /// Minimum corner of the bounding box.
    pub min: Point3,
    /// Maximum corner of the bounding box.
    pub max: Point3,
}

impl Aabb {
    /// Creates a bounding box from two corners.
    #[must_use]
    pub fn new(min: Point3, max: Point3) -> Self {
        Self { min, max }
    }

    /// Smallest box containing every point, or `None` for an empty iterator.
    pub fn from_points<I: IntoIterator<Item = Point3>>(points: I) -> Option<Self> {
        let mut iter = points.into_iter();
        let first = iter.next()?;
        let mut aabb = Self::new(first, first);
        for p in iter {
            aabb.min = aabb.min.inf(&p);
            aabb.max = aabb.max.sup(&p);
        }
        Some(aabb)
    }

    /// Returns `true` if a ball of radius `margin` around `point` reaches
    /// past any face of the box.
    #[must_use]
    pub fn near_edge(&self, point: &Point3, margin: f64) -> bool {
        (0..3).any(|i| point[i] - margin < self.min[i] || point[i] + margin > self.max[i])
    }
}
