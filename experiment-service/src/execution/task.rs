// Task Runner
// Executes one task of one parameter set and records its outputs

use crate::artifact::{render_value, ParameterSet, Space, Task};
use crate::error::{EngineError, EngineResult};
use crate::execution::context::RunContext;
use crate::runners::{parse_output_line, ProcessConfig, ProcessExit, ProcessRunner};
use crate::store::{TaskKey, TaskUpdate, UnitStatus};

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Outputs of a task instance keyed by declared output name
pub type TaskOutputs = BTreeMap<String, String>;

/// Parameters a task receives for one parameter set.
///
/// Static parameters are the base. Each dynamic name and then each static
/// name is looked up in the set, a `"<taskId>:<name>"` key taking precedence
/// over the bare `name`. Dynamic parameters missing from the set are left out.
pub fn effective_parameters(task: &Task, params: &ParameterSet) -> ParameterSet {
    let mut effective = task.static_parameters.clone();

    let names = task
        .dynamic_parameters
        .iter()
        .chain(task.static_parameters.keys());

    for name in names {
        let scoped = format!("{}:{}", task.task_id, name);
        if let Some(value) = params.get(&scoped).or_else(|| params.get(name)) {
            effective.insert(name.clone(), value.clone());
        }
    }

    effective
}

/// Command line for a task: `--name value` per parameter in name order,
/// then the input values in declared order
pub fn build_args(parameters: &BTreeMap<String, String>, inputs: &[String]) -> Vec<String> {
    let mut args = Vec::with_capacity(parameters.len() * 2 + inputs.len());
    for (name, value) in parameters {
        args.push(format!("--{}", name));
        args.push(value.clone());
    }
    args.extend(inputs.iter().cloned());
    args
}

fn render_all(values: &ParameterSet) -> BTreeMap<String, String> {
    values
        .iter()
        .map(|(name, value)| (name.clone(), render_value(value)))
        .collect()
}

/// Runs task instances for a single run
pub struct TaskRunner<'a> {
    ctx: &'a RunContext,
    process: ProcessRunner,
}

impl<'a> TaskRunner<'a> {
    pub fn new(ctx: &'a RunContext) -> Self {
        Self {
            ctx,
            process: ProcessRunner::new(ctx.config.interpreters.clone()),
        }
    }

    /// Execute `task` for parameter set `index` of `space`.
    ///
    /// A task already recorded as completed is not run again; its stored
    /// outputs are returned instead.
    pub async fn execute(
        &self,
        space: &Space,
        index: usize,
        task: &Task,
        params: &ParameterSet,
    ) -> EngineResult<TaskOutputs> {
        let ctx = self.ctx;
        let key = TaskKey::new(&ctx.run_id, &space.space_id, index, &task.task_id);

        if let Some(existing) = ctx.store.get_task_execution(&key).await? {
            if existing.status == UnitStatus::Completed {
                tracing::debug!(task_id = %task.task_id, index, "task already completed, reusing outputs");
                return self.stored_outputs(&space.space_id, index, task).await;
            }
        }

        let parameters = render_all(&effective_parameters(task, params));
        ctx.notifier
            .task_start(&space.space_id, index, &task.task_id, parameters.clone());

        let output_dir = self.prepare_output_dir(&space.space_id, index, &task.task_id).await?;
        ctx.store
            .set_task_status(
                &key,
                TaskUpdate::running(output_dir.as_ref().map(|d| d.display().to_string())),
            )
            .await?;

        match self
            .invoke(space, index, task, &parameters, output_dir.as_deref())
            .await
        {
            Ok(outputs) => {
                for (name, value) in &outputs {
                    ctx.store
                        .put_data(&ctx.run_id, &space.space_id, index, name, value)
                        .await?;
                }
                ctx.store
                    .set_task_status(&key, TaskUpdate::completed())
                    .await?;
                ctx.notifier
                    .task_complete(&space.space_id, index, &task.task_id, outputs.clone());
                Ok(outputs)
            }
            Err(err) => {
                if let Err(store_err) = ctx
                    .store
                    .set_task_status(&key, TaskUpdate::failed(err.to_string()))
                    .await
                {
                    tracing::error!(task_id = %task.task_id, error = %store_err, "failed to record task failure");
                }
                ctx.notifier.error(
                    err.to_string(),
                    Some(&space.space_id),
                    Some(&task.task_id),
                );
                Err(err)
            }
        }
    }

    async fn stored_outputs(
        &self,
        space_id: &str,
        index: usize,
        task: &Task,
    ) -> EngineResult<TaskOutputs> {
        let mut outputs = TaskOutputs::new();
        for name in &task.output_data {
            if let Some(value) = self
                .ctx
                .store
                .get_data(&self.ctx.run_id, space_id, index, name)
                .await?
            {
                outputs.insert(name.clone(), value);
            }
        }
        Ok(outputs)
    }

    /// Value for each declared input: produced data, then the space's
    /// initial values, then the artifact's
    async fn resolve_inputs(
        &self,
        space: &Space,
        index: usize,
        task: &Task,
    ) -> EngineResult<Vec<String>> {
        let ctx = self.ctx;
        let mut values = Vec::with_capacity(task.input_data.len());

        for name in &task.input_data {
            let stored = ctx
                .store
                .get_data(&ctx.run_id, &space.space_id, index, name)
                .await?;

            let value = stored
                .or_else(|| space.input_data.get(name).map(render_value))
                .or_else(|| ctx.artifact.document.input_data.get(name).map(render_value))
                .ok_or_else(|| {
                    EngineError::InputResolution(format!(
                        "no value for input '{}' of task '{}' in space '{}' (parameter set {})",
                        name, task.task_id, space.space_id, index
                    ))
                })?;
            values.push(value);
        }

        Ok(values)
    }

    async fn prepare_output_dir(
        &self,
        space_id: &str,
        index: usize,
        task_id: &str,
    ) -> EngineResult<Option<PathBuf>> {
        let Some(root) = &self.ctx.config.output_root else {
            return Ok(None);
        };

        let dir = root
            .join(&self.ctx.run_id)
            .join(space_id)
            .join(index.to_string())
            .join(task_id);
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Some(dir))
    }

    fn implementation_path(&self, task: &Task) -> PathBuf {
        let path = Path::new(&task.implementation);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.ctx.artifact.base_dir.join(path)
        }
    }

    async fn invoke(
        &self,
        space: &Space,
        index: usize,
        task: &Task,
        parameters: &BTreeMap<String, String>,
        output_dir: Option<&Path>,
    ) -> EngineResult<TaskOutputs> {
        let ctx = self.ctx;
        ctx.check_cancelled()?;

        let inputs = self.resolve_inputs(space, index, task).await?;
        let args = build_args(parameters, &inputs);
        let implementation = self.implementation_path(task);

        let mut env = BTreeMap::new();
        env.insert("EXPFLOW_RUN_ID".to_string(), ctx.run_id.clone());
        env.insert("EXPFLOW_SPACE_ID".to_string(), space.space_id.clone());
        env.insert("EXPFLOW_PARAM_SET".to_string(), index.to_string());
        env.insert("EXPFLOW_TASK_ID".to_string(), task.task_id.clone());
        if let Some(dir) = output_dir {
            env.insert("EXPFLOW_OUTPUT_DIR".to_string(), dir.display().to_string());
        }

        let config = ProcessConfig {
            working_dir: ctx.artifact.base_dir.clone(),
            env,
            timeout: ctx.config.task_timeout(),
        };

        tracing::debug!(
            task_id = %task.task_id,
            space_id = %space.space_id,
            index,
            implementation = %implementation.display(),
            ?args,
            "invoking task"
        );

        let output = self
            .process
            .run(&implementation, &args, &config, &ctx.cancel)
            .await
            .map_err(|e| EngineError::subprocess(&task.task_id, e.to_string()))?;

        match output.exit {
            ProcessExit::Exited(Some(0)) => {}
            ProcessExit::Exited(code) => {
                let code = code
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "none (killed by signal)".to_string());
                return Err(EngineError::subprocess(
                    &task.task_id,
                    format!("exit code {}: {}", code, output.stderr.trim()),
                ));
            }
            ProcessExit::TimedOut(limit) => {
                return Err(EngineError::subprocess(
                    &task.task_id,
                    format!("timed out after {}s", limit.as_secs_f64()),
                ));
            }
            ProcessExit::Cancelled => return Err(EngineError::Terminated(ctx.run_id.clone())),
        }

        let values = parse_output_line(&output.stdout, task.output_data.len())
            .map_err(|message| EngineError::subprocess(&task.task_id, message))?;

        Ok(task.output_data.iter().cloned().zip(values).collect())
    }
}
