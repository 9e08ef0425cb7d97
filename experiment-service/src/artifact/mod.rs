// Artifact Module
// Loading and validation of compiled experiment documents

pub mod loader;
pub mod models;

pub use loader::{validate_shape, LoadedArtifact};
pub use models::{render_value, Artifact, ControlFlow, ParameterSet, Space, Task, Transition, END};
