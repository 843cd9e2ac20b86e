pub mod analysis;
pub mod error;
pub mod geometry;
pub mod math;
pub mod operations;
pub mod topology;

pub use error::{NeurolisError, Result};
