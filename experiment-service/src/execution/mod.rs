// Execution Engine Module
// Runs experiment artifacts: orchestration, spaces, tasks, control flow and progress

pub mod context;
pub mod control;
pub mod events;
pub mod input;
pub mod orchestrator;
pub mod outputs;
pub mod space;
pub mod task;

// Re-export key types
pub use context::RunContext;
pub use control::ControlFlowEvaluator;
pub use events::{
    progress_channel, EventCallback, EventSender, ExecutionEvent, ProgressCallbacks,
    ProgressNotifier, ProgressReceiver, ProgressSender,
};
pub use input::{InputBroker, InputProvider, InputRequest, StaticInputProvider};
pub use orchestrator::{
    ExperimentEngine, RunOptions, RunProgress, RunResult, RunStatusReport, RunSummary,
};
pub use outputs::{OutputCollector, RunOutputs};
pub use space::SpaceRunner;
pub use task::{build_args, effective_parameters, TaskOutputs, TaskRunner};
