// Execution Events
// Progress reporting and event types for experiment runs

use crate::execution::input::InputRequest;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Sender for execution progress events
pub type ProgressSender = mpsc::UnboundedSender<ExecutionEvent>;

/// Receiver for execution progress events
pub type ProgressReceiver = mpsc::UnboundedReceiver<ExecutionEvent>;

/// Create a new progress channel
pub fn progress_channel() -> (ProgressSender, ProgressReceiver) {
    mpsc::unbounded_channel()
}

/// Events emitted while a run executes
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionEvent {
    /// A task instance is about to run with these effective parameters
    TaskStarted {
        run_id: String,
        space_id: String,
        param_set_index: usize,
        task_id: String,
        parameters: BTreeMap<String, String>,
    },

    /// A task instance finished and produced these outputs
    TaskCompleted {
        run_id: String,
        space_id: String,
        param_set_index: usize,
        task_id: String,
        outputs: BTreeMap<String, String>,
    },

    SpaceStarted {
        run_id: String,
        space_id: String,
    },

    SpaceCompleted {
        run_id: String,
        space_id: String,
    },

    ParamSetStarted {
        run_id: String,
        space_id: String,
        param_set_index: usize,
        parameters: BTreeMap<String, String>,
    },

    /// `progress` is the fraction of the space's parameter sets done
    ParamSetCompleted {
        run_id: String,
        space_id: String,
        param_set_index: usize,
        progress: f64,
    },

    /// A transition condition is waiting for a value from the user
    InputRequired(InputRequest),

    Error {
        run_id: String,
        message: String,
        space_id: Option<String>,
        task_id: Option<String>,
    },

    /// `progress` is in `0.0..=1.0`
    Progress {
        run_id: String,
        progress: f64,
        message: String,
    },
}

impl ExecutionEvent {
    /// Wire name of the event
    pub fn name(&self) -> &'static str {
        match self {
            Self::TaskStarted { .. } => "task:start",
            Self::TaskCompleted { .. } => "task:complete",
            Self::SpaceStarted { .. } => "space:start",
            Self::SpaceCompleted { .. } => "space:complete",
            Self::ParamSetStarted { .. } => "paramset:start",
            Self::ParamSetCompleted { .. } => "paramset:complete",
            Self::InputRequired(_) => "input:required",
            Self::Error { .. } => "error",
            Self::Progress { .. } => "progress",
        }
    }

    pub fn run_id(&self) -> &str {
        match self {
            Self::TaskStarted { run_id, .. }
            | Self::TaskCompleted { run_id, .. }
            | Self::SpaceStarted { run_id, .. }
            | Self::SpaceCompleted { run_id, .. }
            | Self::ParamSetStarted { run_id, .. }
            | Self::ParamSetCompleted { run_id, .. }
            | Self::Error { run_id, .. }
            | Self::Progress { run_id, .. } => run_id,
            Self::InputRequired(request) => &request.run_id,
        }
    }

    /// Create a progress event
    pub fn progress(run_id: impl Into<String>, progress: f64, message: impl Into<String>) -> Self {
        Self::Progress {
            run_id: run_id.into(),
            progress: progress.clamp(0.0, 1.0),
            message: message.into(),
        }
    }

    /// Create an execution error event
    pub fn error(
        run_id: impl Into<String>,
        message: impl Into<String>,
        space_id: Option<String>,
        task_id: Option<String>,
    ) -> Self {
        Self::Error {
            run_id: run_id.into(),
            message: message.into(),
            space_id,
            task_id,
        }
    }
}

/// A single event handler
pub type EventCallback = Arc<dyn Fn(&ExecutionEvent) + Send + Sync>;

/// Optional handlers, one per event kind. Unset handlers drop their events.
#[derive(Clone, Default)]
pub struct ProgressCallbacks {
    pub on_task_start: Option<EventCallback>,
    pub on_task_complete: Option<EventCallback>,
    pub on_space_start: Option<EventCallback>,
    pub on_space_complete: Option<EventCallback>,
    pub on_paramset_start: Option<EventCallback>,
    pub on_paramset_complete: Option<EventCallback>,
    pub on_input_required: Option<EventCallback>,
    pub on_error: Option<EventCallback>,
    pub on_progress: Option<EventCallback>,
}

impl fmt::Debug for ProgressCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressCallbacks")
            .field("on_task_start", &self.on_task_start.is_some())
            .field("on_task_complete", &self.on_task_complete.is_some())
            .field("on_space_start", &self.on_space_start.is_some())
            .field("on_space_complete", &self.on_space_complete.is_some())
            .field("on_paramset_start", &self.on_paramset_start.is_some())
            .field("on_paramset_complete", &self.on_paramset_complete.is_some())
            .field("on_input_required", &self.on_input_required.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("on_progress", &self.on_progress.is_some())
            .finish()
    }
}

impl ProgressCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    /// The same handler for every event kind
    pub fn all<F>(callback: F) -> Self
    where
        F: Fn(&ExecutionEvent) + Send + Sync + 'static,
    {
        let callback: EventCallback = Arc::new(callback);
        Self {
            on_task_start: Some(callback.clone()),
            on_task_complete: Some(callback.clone()),
            on_space_start: Some(callback.clone()),
            on_space_complete: Some(callback.clone()),
            on_paramset_start: Some(callback.clone()),
            on_paramset_complete: Some(callback.clone()),
            on_input_required: Some(callback.clone()),
            on_error: Some(callback.clone()),
            on_progress: Some(callback),
        }
    }

    /// Forward every event into an unbounded channel
    pub fn channel() -> (Self, ProgressReceiver) {
        let (tx, rx) = progress_channel();
        let callbacks = Self::all(move |event| tx.send_event(event.clone()));
        (callbacks, rx)
    }

    pub fn on_input_required<F>(mut self, callback: F) -> Self
    where
        F: Fn(&ExecutionEvent) + Send + Sync + 'static,
    {
        self.on_input_required = Some(Arc::new(callback));
        self
    }

    pub fn on_error<F>(mut self, callback: F) -> Self
    where
        F: Fn(&ExecutionEvent) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(callback));
        self
    }

    pub fn on_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(&ExecutionEvent) + Send + Sync + 'static,
    {
        self.on_progress = Some(Arc::new(callback));
        self
    }

    fn handler_for(&self, event: &ExecutionEvent) -> Option<&EventCallback> {
        match event {
            ExecutionEvent::TaskStarted { .. } => self.on_task_start.as_ref(),
            ExecutionEvent::TaskCompleted { .. } => self.on_task_complete.as_ref(),
            ExecutionEvent::SpaceStarted { .. } => self.on_space_start.as_ref(),
            ExecutionEvent::SpaceCompleted { .. } => self.on_space_complete.as_ref(),
            ExecutionEvent::ParamSetStarted { .. } => self.on_paramset_start.as_ref(),
            ExecutionEvent::ParamSetCompleted { .. } => self.on_paramset_complete.as_ref(),
            ExecutionEvent::InputRequired(_) => self.on_input_required.as_ref(),
            ExecutionEvent::Error { .. } => self.on_error.as_ref(),
            ExecutionEvent::Progress { .. } => self.on_progress.as_ref(),
        }
    }
}

/// Dispatches events of one run to its callbacks, synchronously and unbuffered
#[derive(Debug, Clone)]
pub struct ProgressNotifier {
    run_id: String,
    callbacks: ProgressCallbacks,
    // Shared by clones so any runner's report is visible to the orchestrator
    error_reported: Arc<AtomicBool>,
}

impl ProgressNotifier {
    pub fn new(run_id: impl Into<String>, callbacks: ProgressCallbacks) -> Self {
        Self {
            run_id: run_id.into(),
            callbacks,
            error_reported: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Whether an `error` event was already emitted for this run
    pub fn error_reported(&self) -> bool {
        self.error_reported.load(Ordering::SeqCst)
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn emit(&self, event: ExecutionEvent) {
        if let Some(callback) = self.callbacks.handler_for(&event) {
            callback(&event);
        }
    }

    pub fn task_start(
        &self,
        space_id: &str,
        param_set_index: usize,
        task_id: &str,
        parameters: BTreeMap<String, String>,
    ) {
        self.emit(ExecutionEvent::TaskStarted {
            run_id: self.run_id.clone(),
            space_id: space_id.to_string(),
            param_set_index,
            task_id: task_id.to_string(),
            parameters,
        });
    }

    pub fn task_complete(
        &self,
        space_id: &str,
        param_set_index: usize,
        task_id: &str,
        outputs: BTreeMap<String, String>,
    ) {
        self.emit(ExecutionEvent::TaskCompleted {
            run_id: self.run_id.clone(),
            space_id: space_id.to_string(),
            param_set_index,
            task_id: task_id.to_string(),
            outputs,
        });
    }

    pub fn space_start(&self, space_id: &str) {
        self.emit(ExecutionEvent::SpaceStarted {
            run_id: self.run_id.clone(),
            space_id: space_id.to_string(),
        });
    }

    pub fn space_complete(&self, space_id: &str) {
        self.emit(ExecutionEvent::SpaceCompleted {
            run_id: self.run_id.clone(),
            space_id: space_id.to_string(),
        });
    }

    pub fn paramset_start(
        &self,
        space_id: &str,
        param_set_index: usize,
        parameters: BTreeMap<String, String>,
    ) {
        self.emit(ExecutionEvent::ParamSetStarted {
            run_id: self.run_id.clone(),
            space_id: space_id.to_string(),
            param_set_index,
            parameters,
        });
    }

    pub fn paramset_complete(&self, space_id: &str, param_set_index: usize, progress: f64) {
        self.emit(ExecutionEvent::ParamSetCompleted {
            run_id: self.run_id.clone(),
            space_id: space_id.to_string(),
            param_set_index,
            progress,
        });
    }

    pub fn input_required(&self, request: InputRequest) {
        self.emit(ExecutionEvent::InputRequired(request));
    }

    pub fn error(&self, message: impl Into<String>, space_id: Option<&str>, task_id: Option<&str>) {
        self.error_reported.store(true, Ordering::SeqCst);
        self.emit(ExecutionEvent::error(
            self.run_id.clone(),
            message,
            space_id.map(str::to_string),
            task_id.map(str::to_string),
        ));
    }

    pub fn progress(&self, progress: f64, message: impl Into<String>) {
        self.emit(ExecutionEvent::progress(self.run_id.clone(), progress, message));
    }
}

/// Helper trait for sending events, ignoring errors (fire-and-forget)
pub trait EventSender {
    fn send_event(&self, event: ExecutionEvent);
}

impl EventSender for ProgressSender {
    fn send_event(&self, event: ExecutionEvent) {
        let _ = self.send(event);
    }
}
