pub mod runner;
pub mod visited;

pub use runner::{JobRunner, RunOutput};
pub use visited::{normalize_url, VisitedSet};
