pub mod path_distance;
pub mod scholl;

pub use path_distance::{Network, PathDistance, PathDistanceFinder};
pub use scholl::{SchollAnalysis, SchollEvent, SchollProfile};
