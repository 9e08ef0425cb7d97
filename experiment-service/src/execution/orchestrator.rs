// Run Orchestrator
// Owns the run lifecycle: identity, the space loop, final outputs and status

use crate::artifact::{LoadedArtifact, END};
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::execution::context::RunContext;
use crate::execution::control::ControlFlowEvaluator;
use crate::execution::events::{ProgressCallbacks, ProgressNotifier};
use crate::execution::input::{InputBroker, InputProvider};
use crate::execution::outputs::{OutputCollector, RunOutputs};
use crate::execution::space::SpaceRunner;
use crate::store::{MemoryStore, RunRecord, RunStatus, SqliteStore, StateStore};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;

/// Options for a single [`ExperimentEngine::run`] call
#[derive(Clone, Default)]
pub struct RunOptions {
    /// Continue the existing unfinished run instead of starting over
    pub resume: bool,
    pub callbacks: ProgressCallbacks,
    /// Answers `input()` conditions; falls back to the engine's broker
    pub input: Option<Arc<dyn InputProvider>>,
}

impl RunOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resume(mut self, resume: bool) -> Self {
        self.resume = resume;
        self
    }

    pub fn with_callbacks(mut self, callbacks: ProgressCallbacks) -> Self {
        self.callbacks = callbacks;
        self
    }

    pub fn with_input(mut self, input: Arc<dyn InputProvider>) -> Self {
        self.input = Some(input);
        self
    }
}

/// Task statistics of a finished run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub total_tasks: usize,
    pub completed_tasks: usize,
    pub failed_tasks: usize,
    pub skipped_tasks: usize,
}

/// Result of a successful run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub run_id: String,
    pub status: RunStatus,
    /// Completed spaces in the order they were started
    pub completed_spaces: Vec<String>,
    pub outputs: RunOutputs,
    pub summary: RunSummary,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunProgress {
    pub completed_spaces: usize,
    pub total_spaces: usize,
    pub completed_parameter_sets: usize,
    pub total_parameter_sets: usize,
}

/// Snapshot of a run for status queries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunStatusReport {
    pub run_id: String,
    pub status: RunStatus,
    pub current_space: Option<String>,
    pub current_parameter_set: Option<usize>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub progress: RunProgress,
}

type ActiveRuns = Arc<Mutex<HashMap<String, CancellationToken>>>;

/// Keeps a run registered as active until dropped
struct Registration {
    active: ActiveRuns,
    broker: Option<InputBroker>,
    run_id: String,
}

impl Drop for Registration {
    fn drop(&mut self) {
        lock(&self.active).remove(&self.run_id);
        if let Some(broker) = &self.broker {
            broker.reject_run(&self.run_id, "run finished");
        }
    }
}

fn lock(active: &ActiveRuns) -> MutexGuard<'_, HashMap<String, CancellationToken>> {
    active.lock().unwrap_or_else(|e| e.into_inner())
}

/// Executes experiment artifacts against a state store.
///
/// Cloning is cheap and clones share the store, configuration and the
/// registry of active runs, so one clone can terminate a run another is
/// executing.
#[derive(Clone)]
pub struct ExperimentEngine {
    store: Arc<dyn StateStore>,
    config: Arc<EngineConfig>,
    active: ActiveRuns,
    broker: Option<InputBroker>,
}

impl ExperimentEngine {
    pub fn new(store: Arc<dyn StateStore>, config: EngineConfig) -> Self {
        Self {
            store,
            config: Arc::new(config),
            active: Arc::new(Mutex::new(HashMap::new())),
            broker: None,
        }
    }

    /// Engine backed by the SQLite database named in the configuration
    pub async fn connect(config: EngineConfig) -> EngineResult<Self> {
        let store = SqliteStore::connect(&config.database_url).await?;
        Ok(Self::new(Arc::new(store), config))
    }

    /// Engine whose state lives only as long as the process
    pub fn in_memory(config: EngineConfig) -> Self {
        Self::new(Arc::new(MemoryStore::new()), config)
    }

    /// Answer `input()` conditions through `broker` unless a run brings its
    /// own provider
    pub fn with_input_broker(mut self, broker: InputBroker) -> Self {
        self.broker = Some(broker);
        self
    }

    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run (or resume) the experiment described by the artifact at `path`
    pub async fn run(&self, path: impl AsRef<Path>, options: RunOptions) -> EngineResult<RunResult> {
        // Validation happens before any state is touched
        let artifact = Arc::new(LoadedArtifact::from_file(path)?);
        let (run_id, start) = self.resolve_run(&artifact, options.resume).await?;

        let cancel = CancellationToken::new();
        lock(&self.active).insert(run_id.clone(), cancel.clone());
        let _registration = Registration {
            active: self.active.clone(),
            broker: self.broker.clone(),
            run_id: run_id.clone(),
        };

        let input = options.input.or_else(|| {
            self.broker
                .clone()
                .map(|broker| Arc::new(broker) as Arc<dyn InputProvider>)
        });

        let ctx = RunContext {
            run_id: run_id.clone(),
            artifact,
            store: self.store.clone(),
            config: self.config.clone(),
            notifier: ProgressNotifier::new(&run_id, options.callbacks),
            cancel,
            input,
        };

        tracing::info!(
            run_id = %run_id,
            experiment = %ctx.artifact.experiment(),
            version = %ctx.artifact.version(),
            start = %start,
            resume = options.resume,
            "starting run"
        );

        match self.execute(&ctx, start).await {
            Ok(result) => {
                tracing::info!(run_id = %run_id, "run completed");
                Ok(result)
            }
            Err(err) => {
                // A terminate recorded by another engine must not become `failed`
                let status = if err.is_terminated() || ctx.is_terminated().await {
                    RunStatus::Terminated
                } else {
                    RunStatus::Failed
                };
                tracing::warn!(run_id = %run_id, %status, error = %err, "run stopped");

                if let Err(store_err) = self.store.update_run_status(&run_id, status).await {
                    tracing::error!(run_id = %run_id, error = %store_err, "failed to record run status");
                }
                if !ctx.notifier.error_reported() {
                    ctx.notifier.error(err.to_string(), None, None);
                }
                Err(err)
            }
        }
    }

    /// Pick the run id and the space to start from
    async fn resolve_run(
        &self,
        artifact: &LoadedArtifact,
        resume: bool,
    ) -> EngineResult<(String, String)> {
        let existing = self
            .store
            .find_run(artifact.experiment(), artifact.version())
            .await?;

        if resume {
            if let Some(run) = existing
                .as_ref()
                .filter(|run| run.status != RunStatus::Completed)
            {
                if run.artifact_hash != artifact.hash {
                    tracing::warn!(
                        run_id = %run.id,
                        previous = %run.artifact_hash,
                        current = %artifact.hash,
                        "artifact changed since the run was created"
                    );
                    self.store.update_run_hash(&run.id, &artifact.hash).await?;
                }

                self.store
                    .update_run_status(&run.id, RunStatus::Running)
                    .await?;

                let start = self
                    .store
                    .get_control_state(&run.id)
                    .await?
                    .unwrap_or_else(|| artifact.start().to_string());
                return Ok((run.id.clone(), start));
            }
        }

        if let Some(run) = existing {
            tracing::info!(run_id = %run.id, "discarding previous run");
            self.store.delete_run(&run.id).await?;
        }

        let run = RunRecord::new(
            uuid::Uuid::new_v4().to_string(),
            artifact.experiment(),
            artifact.version(),
            artifact.path.display().to_string(),
            artifact.hash.clone(),
        );
        self.store.create_run(&run).await?;

        Ok((run.id, artifact.start().to_string()))
    }

    async fn execute(&self, ctx: &RunContext, start: String) -> EngineResult<RunResult> {
        let artifact = &ctx.artifact;
        let total_spaces = artifact.spaces().len();
        let runner = SpaceRunner::new(ctx);
        let control = ControlFlowEvaluator::new(ctx);

        let mut current = start;
        while current != END {
            ctx.ensure_active().await?;

            self.store
                .update_run_position(&ctx.run_id, Some(&current), None)
                .await?;
            ctx.notifier.space_start(&current);

            let space = artifact.space(&current).ok_or_else(|| {
                EngineError::lookup(format!("space '{}' is not defined", current))
            })?;
            runner.execute(space).await?;

            ctx.notifier.space_complete(&current);
            let completed = self.store.completed_spaces(&ctx.run_id).await?.len();
            ctx.notifier.progress(
                if total_spaces == 0 {
                    1.0
                } else {
                    completed as f64 / total_spaces as f64
                },
                format!("{}/{} spaces complete", completed, total_spaces),
            );

            current = control.next_space(&current).await?;
        }

        ctx.ensure_active().await?;

        let outputs = OutputCollector::new(self.store.as_ref())
            .collect(&ctx.run_id, artifact.spaces(), artifact.tasks())
            .await?;
        let counts = self.store.task_counts(&ctx.run_id).await?;

        self.store
            .update_run_status(&ctx.run_id, RunStatus::Completed)
            .await?;
        self.store
            .update_run_position(&ctx.run_id, None, None)
            .await?;
        ctx.notifier.progress(1.0, "experiment completed");

        Ok(RunResult {
            run_id: ctx.run_id.clone(),
            status: RunStatus::Completed,
            completed_spaces: self.store.completed_spaces(&ctx.run_id).await?,
            outputs,
            summary: RunSummary {
                total_tasks: artifact.total_tasks(),
                completed_tasks: counts.completed,
                failed_tasks: counts.failed,
                skipped_tasks: counts.skipped,
            },
        })
    }

    /// Status of the run for an experiment, if there is one
    pub async fn get_status(
        &self,
        experiment: &str,
        version: &str,
    ) -> EngineResult<Option<RunStatusReport>> {
        let Some(run) = self.store.find_run(experiment, version).await? else {
            return Ok(None);
        };

        let (total_spaces, total_parameter_sets) =
            match LoadedArtifact::from_file(&run.artifact_path) {
                Ok(artifact) => (artifact.spaces().len(), artifact.total_parameter_sets()),
                Err(err) => {
                    tracing::warn!(
                        run_id = %run.id,
                        path = %run.artifact_path,
                        error = %err,
                        "artifact unavailable, reporting zero totals"
                    );
                    (0, 0)
                }
            };

        let progress = RunProgress {
            completed_spaces: self.store.completed_spaces(&run.id).await?.len(),
            total_spaces,
            completed_parameter_sets: self.store.count_completed_param_sets(&run.id).await?,
            total_parameter_sets,
        };

        Ok(Some(RunStatusReport {
            run_id: run.id,
            status: run.status,
            current_space: run.current_space,
            current_parameter_set: run.current_param_set,
            start_time: run.start_time,
            end_time: run.end_time,
            progress,
        }))
    }

    /// Stop a running experiment. Returns false when no run is executing.
    ///
    /// An in-flight task subprocess is killed and pending input requests are
    /// rejected. A run executing in another process notices the terminated
    /// status before its next parameter set.
    pub async fn terminate(&self, experiment: &str, version: &str) -> EngineResult<bool> {
        let Some(run) = self.store.find_run(experiment, version).await? else {
            return Ok(false);
        };
        if run.status != RunStatus::Running {
            return Ok(false);
        }

        self.store
            .update_run_status(&run.id, RunStatus::Terminated)
            .await?;

        if let Some(cancel) = lock(&self.active).get(&run.id) {
            cancel.cancel();
        }
        if let Some(broker) = &self.broker {
            broker.reject_run(&run.id, "run terminated");
        }

        tracing::info!(run_id = %run.id, experiment, version, "run terminated");
        Ok(true)
    }

    /// Ids of runs currently executing on this engine
    pub fn active_runs(&self) -> Vec<String> {
        let mut ids: Vec<String> = lock(&self.active).keys().cloned().collect();
        ids.sort();
        ids
    }
}
