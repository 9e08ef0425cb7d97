// Engine Errors
// Failure taxonomy shared by every layer of the execution engine

use crate::expression::EvalError;
use crate::store::StoreError;

use thiserror::Error;

/// Result alias used throughout the engine
pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    /// The artifact document is malformed. Raised before any state is touched.
    #[error("invalid artifact: {0}")]
    Structural(String),

    /// A space or task id referenced by the artifact does not exist
    #[error("lookup failed: {0}")]
    Lookup(String),

    /// A task input has no value in the store, the space or the artifact
    #[error("{0}")]
    InputResolution(String),

    /// The task implementation exited badly or printed a malformed output line
    #[error("task '{task_id}' failed: {message}")]
    Subprocess { task_id: String, message: String },

    /// No outgoing transition could be taken
    #[error("control flow error: {0}")]
    ControlFlow(String),

    /// A condition needed external input and none could be obtained
    #[error("input request failed: {0}")]
    Input(String),

    /// A transition condition could not be parsed or evaluated
    #[error("condition '{condition}' is invalid: {source}")]
    Expression {
        condition: String,
        #[source]
        source: EvalError,
    },

    /// The run was terminated from outside while it was executing
    #[error("run {0} was terminated")]
    Terminated(String),

    #[error(transparent)]
    Persistence(#[from] StoreError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    pub fn structural(message: impl Into<String>) -> Self {
        Self::Structural(message.into())
    }

    pub fn lookup(message: impl Into<String>) -> Self {
        Self::Lookup(message.into())
    }

    pub fn subprocess(task_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Subprocess {
            task_id: task_id.into(),
            message: message.into(),
        }
    }

    /// Whether this error came from an external terminate request
    pub fn is_terminated(&self) -> bool {
        matches!(self, Self::Terminated(_))
    }
}
