// Experiment Service Library
// Resumable execution engine for parameter-sweep experiment artifacts

pub mod artifact;
pub mod config;
pub mod error;
pub mod execution;
pub mod expression;
pub mod runners;
pub mod store;

// Re-export commonly used types
pub use config::EngineConfig;
pub use error::{EngineError, EngineResult};

// Re-export artifact types
pub use artifact::{validate_shape, Artifact, LoadedArtifact, Space, Task, Transition, END};

// Re-export expression types
pub use expression::{Condition, EvalError};

// Re-export execution types
pub use execution::{
    ExecutionEvent, ExperimentEngine, InputBroker, InputProvider, InputRequest, ProgressCallbacks,
    ProgressReceiver, RunOptions, RunProgress, RunResult, RunStatusReport, RunSummary,
    StaticInputProvider,
};

// Re-export store types
pub use store::{MemoryStore, RunStatus, SqliteStore, StateStore, StoreError, UnitStatus};
