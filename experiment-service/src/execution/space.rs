// Space Runner
// Sweeps a space's parameter sets through its task chain

use crate::artifact::{render_value, Space, Task};
use crate::error::{EngineError, EngineResult};
use crate::execution::context::RunContext;
use crate::execution::task::TaskRunner;
use crate::store::UnitStatus;

use std::collections::BTreeMap;

/// Runs every parameter set of a space, skipping the ones already completed
pub struct SpaceRunner<'a> {
    ctx: &'a RunContext,
    tasks: TaskRunner<'a>,
}

impl<'a> SpaceRunner<'a> {
    pub fn new(ctx: &'a RunContext) -> Self {
        Self {
            ctx,
            tasks: TaskRunner::new(ctx),
        }
    }

    pub async fn execute(&self, space: &Space) -> EngineResult<()> {
        let ctx = self.ctx;
        ctx.store
            .set_space_status(&ctx.run_id, &space.space_id, UnitStatus::Running)
            .await?;

        tracing::info!(run_id = %ctx.run_id, space_id = %space.space_id, sets = space.parameters.len(), "executing space");

        match self.run_parameter_sets(space).await {
            Ok(()) => {
                ctx.store
                    .set_space_status(&ctx.run_id, &space.space_id, UnitStatus::Completed)
                    .await?;
                Ok(())
            }
            Err(err) => {
                if let Err(store_err) = ctx
                    .store
                    .set_space_status(&ctx.run_id, &space.space_id, UnitStatus::Failed)
                    .await
                {
                    tracing::error!(space_id = %space.space_id, error = %store_err, "failed to record space failure");
                }
                Err(err)
            }
        }
    }

    async fn run_parameter_sets(&self, space: &Space) -> EngineResult<()> {
        let ctx = self.ctx;
        let chain = self.chain_for(space)?;

        let total_sets = space.parameters.len();
        let total_tasks = total_sets * chain.len();
        let mut sets_done = 0;
        let mut tasks_done = 0;

        for (index, params) in space.parameters.iter().enumerate() {
            ctx.ensure_active().await?;

            let existing = ctx
                .store
                .get_param_set_execution(&ctx.run_id, &space.space_id, index)
                .await?;
            if existing.is_some_and(|e| e.status == UnitStatus::Completed) {
                tracing::debug!(space_id = %space.space_id, index, "parameter set already completed");
                sets_done += 1;
                tasks_done += chain.len();
                continue;
            }

            ctx.store
                .set_param_set_status(&ctx.run_id, &space.space_id, index, UnitStatus::Running)
                .await?;
            ctx.store
                .update_run_position(&ctx.run_id, Some(&space.space_id), Some(index))
                .await?;

            let rendered: BTreeMap<String, String> = params
                .iter()
                .map(|(name, value)| (name.clone(), render_value(value)))
                .collect();
            ctx.notifier.paramset_start(&space.space_id, index, rendered);

            for task in &chain {
                let result = match ctx.check_cancelled() {
                    Ok(()) => self.tasks.execute(space, index, task, params).await,
                    Err(err) => Err(err),
                };

                if let Err(err) = result {
                    if let Err(store_err) = ctx
                        .store
                        .set_param_set_status(&ctx.run_id, &space.space_id, index, UnitStatus::Failed)
                        .await
                    {
                        tracing::error!(space_id = %space.space_id, index, error = %store_err, "failed to record parameter set failure");
                    }
                    return Err(err);
                }

                tasks_done += 1;
                ctx.notifier.progress(
                    fraction(tasks_done, total_tasks),
                    format!(
                        "space {}: {}/{} tasks",
                        space.space_id, tasks_done, total_tasks
                    ),
                );
            }

            ctx.store
                .set_param_set_status(&ctx.run_id, &space.space_id, index, UnitStatus::Completed)
                .await?;
            sets_done += 1;
            ctx.notifier
                .paramset_complete(&space.space_id, index, fraction(sets_done, total_sets));
        }

        Ok(())
    }

    /// Tasks of the space's chain, in order
    fn chain_for(&self, space: &Space) -> EngineResult<Vec<&'a Task>> {
        let ctx: &'a RunContext = self.ctx;
        space
            .tasks_order
            .iter()
            .map(|task_id| {
                ctx.artifact.task(task_id).ok_or_else(|| {
                    EngineError::lookup(format!(
                        "task '{}' in space '{}' is not defined",
                        task_id, space.space_id
                    ))
                })
            })
            .collect()
    }
}

fn fraction(done: usize, total: usize) -> f64 {
    if total == 0 {
        1.0
    } else {
        done as f64 / total as f64
    }
}
