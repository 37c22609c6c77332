mod cache;
mod detector;
mod import;
mod types;

pub use cache::CourseCache;
pub use detector::HoleDetector;
pub use import::import_gpx;
pub use types::{CourseGeometry, Hole};
