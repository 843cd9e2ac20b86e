pub mod cap;
pub mod cross_section;
pub mod frustum;

pub use cap::Cap;
pub use cross_section::CrossSection;
pub use frustum::Frustum;
