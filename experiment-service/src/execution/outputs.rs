// Output Collector
// Gathers the final outputs of a run from its data mappings

use crate::artifact::{Space, Task};
use crate::error::EngineResult;
use crate::store::{StateStore, UnitStatus};

use std::collections::{BTreeMap, HashMap};

/// `space id -> "<output>_<index>" -> value`
pub type RunOutputs = BTreeMap<String, BTreeMap<String, String>>;

/// Reads the outputs of the last task of every space
pub struct OutputCollector<'a> {
    store: &'a dyn StateStore,
}

impl<'a> OutputCollector<'a> {
    pub fn new(store: &'a dyn StateStore) -> Self {
        Self { store }
    }

    /// Only completed parameter sets contribute; values that were never
    /// stored are left out. Spaces without tasks map to an empty set.
    pub async fn collect(
        &self,
        run_id: &str,
        spaces: &[Space],
        tasks: &HashMap<String, Task>,
    ) -> EngineResult<RunOutputs> {
        let mut outputs = RunOutputs::new();

        for space in spaces {
            let mut values = BTreeMap::new();
            let last = space.last_task().and_then(|task_id| tasks.get(task_id));

            if let Some(task) = last {
                for index in 0..space.parameters.len() {
                    let completed = self
                        .store
                        .get_param_set_execution(run_id, &space.space_id, index)
                        .await?
                        .is_some_and(|e| e.status == UnitStatus::Completed);
                    if !completed {
                        continue;
                    }

                    for name in &task.output_data {
                        if let Some(value) = self
                            .store
                            .get_data(run_id, &space.space_id, index, name)
                            .await?
                        {
                            values.insert(format!("{}_{}", name, index), value);
                        }
                    }
                }
            }

            outputs.insert(space.space_id.clone(), values);
        }

        Ok(outputs)
    }
}
