pub mod document;
pub mod requirement;
pub mod scanner;

pub use document::{Dependency, ManifestDocument};
pub use scanner::{ProjectInfo, ProjectScanner};
