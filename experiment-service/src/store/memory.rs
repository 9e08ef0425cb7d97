//! In-memory implementation of [`StateStore`].
//!
//! Everything lives behind one lock so a cascade delete is atomic. State is
//! lost when the store is dropped; use [`SqliteStore`](super::SqliteStore)
//! for runs that must survive the process.

use crate::store::models::{
    ParamSetExecution, RunRecord, RunStatus, SpaceExecution, TaskCounts, TaskExecution, TaskKey,
    TaskUpdate, UnitStatus,
};
use crate::store::{StateStore, StoreError};

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

type SpaceKey = (String, String);
type ParamSetKey = (String, String, usize);
type DataKey = (String, String, usize, String);

#[derive(Default)]
struct MemoryState {
    runs: HashMap<String, RunRecord>,
    spaces: BTreeMap<SpaceKey, SpaceExecution>,
    param_sets: BTreeMap<ParamSetKey, ParamSetExecution>,
    tasks: BTreeMap<TaskKey, TaskExecution>,
    data: HashMap<DataKey, String>,
    control: HashMap<String, String>,
}

/// Thread-safe store keeping all records in maps
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, MemoryState>, StoreError> {
        self.state
            .read()
            .map_err(|e| StoreError::Backend(format!("Lock error: {}", e)))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, MemoryState>, StoreError> {
        self.state
            .write()
            .map_err(|e| StoreError::Backend(format!("Lock error: {}", e)))
    }
}

fn run_mut<'a>(state: &'a mut MemoryState, run_id: &str) -> Result<&'a mut RunRecord, StoreError> {
    state
        .runs
        .get_mut(run_id)
        .ok_or_else(|| StoreError::NotFound(format!("run {}", run_id)))
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn create_run(&self, run: &RunRecord) -> Result<(), StoreError> {
        let mut state = self.write()?;
        let duplicate = state.runs.values().any(|r| {
            r.experiment_name == run.experiment_name
                && r.experiment_version == run.experiment_version
        });
        if duplicate || state.runs.contains_key(&run.id) {
            return Err(StoreError::Conflict(format!(
                "run for {}@{} already exists",
                run.experiment_name, run.experiment_version
            )));
        }
        state.runs.insert(run.id.clone(), run.clone());
        Ok(())
    }

    async fn get_run(&self, run_id: &str) -> Result<Option<RunRecord>, StoreError> {
        Ok(self.read()?.runs.get(run_id).cloned())
    }

    async fn find_run(
        &self,
        experiment_name: &str,
        experiment_version: &str,
    ) -> Result<Option<RunRecord>, StoreError> {
        Ok(self
            .read()?
            .runs
            .values()
            .find(|r| {
                r.experiment_name == experiment_name && r.experiment_version == experiment_version
            })
            .cloned())
    }

    async fn update_run_status(&self, run_id: &str, status: RunStatus) -> Result<(), StoreError> {
        let mut state = self.write()?;
        let run = run_mut(&mut state, run_id)?;
        run.status = status;
        run.end_time = status.is_terminal().then(Utc::now);
        Ok(())
    }

    async fn update_run_position(
        &self,
        run_id: &str,
        current_space: Option<&str>,
        current_param_set: Option<usize>,
    ) -> Result<(), StoreError> {
        let mut state = self.write()?;
        let run = run_mut(&mut state, run_id)?;
        run.current_space = current_space.map(str::to_string);
        run.current_param_set = current_param_set;
        Ok(())
    }

    async fn update_run_hash(&self, run_id: &str, artifact_hash: &str) -> Result<(), StoreError> {
        let mut state = self.write()?;
        run_mut(&mut state, run_id)?.artifact_hash = artifact_hash.to_string();
        Ok(())
    }

    async fn delete_run(&self, run_id: &str) -> Result<(), StoreError> {
        let mut state = self.write()?;
        state.runs.remove(run_id);
        state.spaces.retain(|(run, _), _| run != run_id);
        state.param_sets.retain(|(run, _, _), _| run != run_id);
        state.tasks.retain(|key, _| key.run_id != run_id);
        state.data.retain(|(run, _, _, _), _| run != run_id);
        state.control.remove(run_id);
        Ok(())
    }

    async fn set_space_status(
        &self,
        run_id: &str,
        space_id: &str,
        status: UnitStatus,
    ) -> Result<(), StoreError> {
        let now = Utc::now();
        let mut state = self.write()?;
        let record = state
            .spaces
            .entry((run_id.to_string(), space_id.to_string()))
            .or_insert_with(|| SpaceExecution {
                run_id: run_id.to_string(),
                space_id: space_id.to_string(),
                status,
                start_time: now,
                end_time: None,
            });
        record.status = status;
        if status == UnitStatus::Running {
            record.end_time = None;
        } else {
            record.end_time = Some(now);
        }
        Ok(())
    }

    async fn get_space_execution(
        &self,
        run_id: &str,
        space_id: &str,
    ) -> Result<Option<SpaceExecution>, StoreError> {
        Ok(self
            .read()?
            .spaces
            .get(&(run_id.to_string(), space_id.to_string()))
            .cloned())
    }

    async fn set_param_set_status(
        &self,
        run_id: &str,
        space_id: &str,
        param_set_index: usize,
        status: UnitStatus,
    ) -> Result<(), StoreError> {
        let now = Utc::now();
        let mut state = self.write()?;
        let record = state
            .param_sets
            .entry((run_id.to_string(), space_id.to_string(), param_set_index))
            .or_insert_with(|| ParamSetExecution {
                run_id: run_id.to_string(),
                space_id: space_id.to_string(),
                param_set_index,
                status,
                start_time: now,
                end_time: None,
            });
        record.status = status;
        if status == UnitStatus::Running {
            record.start_time = now;
            record.end_time = None;
        } else {
            record.end_time = Some(now);
        }
        Ok(())
    }

    async fn get_param_set_execution(
        &self,
        run_id: &str,
        space_id: &str,
        param_set_index: usize,
    ) -> Result<Option<ParamSetExecution>, StoreError> {
        Ok(self
            .read()?
            .param_sets
            .get(&(run_id.to_string(), space_id.to_string(), param_set_index))
            .cloned())
    }

    async fn set_task_status(&self, key: &TaskKey, update: TaskUpdate) -> Result<(), StoreError> {
        let now = Utc::now();
        let mut state = self.write()?;
        let record = state
            .tasks
            .entry(key.clone())
            .or_insert_with(|| TaskExecution {
                run_id: key.run_id.clone(),
                space_id: key.space_id.clone(),
                param_set_index: key.param_set_index,
                task_id: key.task_id.clone(),
                status: update.status,
                start_time: now,
                end_time: None,
                output_dir: None,
                error_message: None,
            });

        record.status = update.status;
        record.error_message = update.error_message;
        if update.output_dir.is_some() {
            record.output_dir = update.output_dir;
        }
        if update.status == UnitStatus::Running {
            record.start_time = now;
            record.end_time = None;
        } else {
            record.end_time = Some(now);
        }
        Ok(())
    }

    async fn get_task_execution(
        &self,
        key: &TaskKey,
    ) -> Result<Option<TaskExecution>, StoreError> {
        Ok(self.read()?.tasks.get(key).cloned())
    }

    async fn put_data(
        &self,
        run_id: &str,
        space_id: &str,
        param_set_index: usize,
        data_name: &str,
        data_value: &str,
    ) -> Result<(), StoreError> {
        self.write()?.data.insert(
            (
                run_id.to_string(),
                space_id.to_string(),
                param_set_index,
                data_name.to_string(),
            ),
            data_value.to_string(),
        );
        Ok(())
    }

    async fn get_data(
        &self,
        run_id: &str,
        space_id: &str,
        param_set_index: usize,
        data_name: &str,
    ) -> Result<Option<String>, StoreError> {
        Ok(self
            .read()?
            .data
            .get(&(
                run_id.to_string(),
                space_id.to_string(),
                param_set_index,
                data_name.to_string(),
            ))
            .cloned())
    }

    async fn set_control_state(
        &self,
        run_id: &str,
        current_space: &str,
    ) -> Result<(), StoreError> {
        self.write()?
            .control
            .insert(run_id.to_string(), current_space.to_string());
        Ok(())
    }

    async fn get_control_state(&self, run_id: &str) -> Result<Option<String>, StoreError> {
        Ok(self.read()?.control.get(run_id).cloned())
    }

    async fn completed_spaces(&self, run_id: &str) -> Result<Vec<String>, StoreError> {
        let state = self.read()?;
        let mut spaces: Vec<&SpaceExecution> = state
            .spaces
            .values()
            .filter(|s| s.run_id == run_id && s.status == UnitStatus::Completed)
            .collect();
        spaces.sort_by_key(|s| s.start_time);
        Ok(spaces.into_iter().map(|s| s.space_id.clone()).collect())
    }

    async fn count_completed_param_sets(&self, run_id: &str) -> Result<usize, StoreError> {
        Ok(self
            .read()?
            .param_sets
            .values()
            .filter(|p| p.run_id == run_id && p.status == UnitStatus::Completed)
            .count())
    }

    async fn task_counts(&self, run_id: &str) -> Result<TaskCounts, StoreError> {
        let state = self.read()?;
        let mut counts = TaskCounts::default();
        for task in state.tasks.values().filter(|t| t.run_id == run_id) {
            counts.add(task.status);
        }
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(id: &str) -> RunRecord {
        RunRecord::new(id, "exp", "v1", "/tmp/a.json", "hash")
    }

    #[tokio::test]
    async fn test_run_identity_is_unique() {
        let store = MemoryStore::new();
        store.create_run(&run("r1")).await.unwrap();

        let err = store.create_run(&run("r2")).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));

        let found = store.find_run("exp", "v1").await.unwrap().unwrap();
        assert_eq!(found.id, "r1");
        assert!(store.find_run("exp", "v2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_status_updates_stamp_end_time() {
        let store = MemoryStore::new();
        store.create_run(&run("r1")).await.unwrap();

        store
            .update_run_status("r1", RunStatus::Failed)
            .await
            .unwrap();
        let failed = store.get_run("r1").await.unwrap().unwrap();
        assert_eq!(failed.status, RunStatus::Failed);
        assert!(failed.end_time.is_some());

        store
            .update_run_status("r1", RunStatus::Running)
            .await
            .unwrap();
        assert!(store.get_run("r1").await.unwrap().unwrap().end_time.is_none());

        let missing = store.update_run_status("nope", RunStatus::Failed).await;
        assert!(matches!(missing, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_delete_cascades() {
        let store = MemoryStore::new();
        store.create_run(&run("r1")).await.unwrap();
        let key = TaskKey::new("r1", "S1", 0, "T1");

        store
            .set_space_status("r1", "S1", UnitStatus::Running)
            .await
            .unwrap();
        store
            .set_param_set_status("r1", "S1", 0, UnitStatus::Completed)
            .await
            .unwrap();
        store
            .set_task_status(&key, TaskUpdate::completed())
            .await
            .unwrap();
        store.put_data("r1", "S1", 0, "out", "1").await.unwrap();
        store.set_control_state("r1", "S2").await.unwrap();

        store.delete_run("r1").await.unwrap();

        assert!(store.get_run("r1").await.unwrap().is_none());
        assert!(store.get_space_execution("r1", "S1").await.unwrap().is_none());
        assert!(store
            .get_param_set_execution("r1", "S1", 0)
            .await
            .unwrap()
            .is_none());
        assert!(store.get_task_execution(&key).await.unwrap().is_none());
        assert!(store.get_data("r1", "S1", 0, "out").await.unwrap().is_none());
        assert!(store.get_control_state("r1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_task_update_keeps_output_dir() {
        let store = MemoryStore::new();
        let key = TaskKey::new("r1", "S1", 0, "T1");

        store
            .set_task_status(&key, TaskUpdate::running(Some("/out/T1".to_string())))
            .await
            .unwrap();
        store
            .set_task_status(&key, TaskUpdate::failed("boom"))
            .await
            .unwrap();

        let record = store.get_task_execution(&key).await.unwrap().unwrap();
        assert_eq!(record.status, UnitStatus::Failed);
        assert_eq!(record.output_dir.as_deref(), Some("/out/T1"));
        assert_eq!(record.error_message.as_deref(), Some("boom"));

        store
            .set_task_status(&key, TaskUpdate::running(None))
            .await
            .unwrap();
        let retried = store.get_task_execution(&key).await.unwrap().unwrap();
        assert!(retried.error_message.is_none());
        assert!(retried.end_time.is_none());
    }

    #[tokio::test]
    async fn test_aggregates() {
        let store = MemoryStore::new();
        for (space, status) in [("S1", UnitStatus::Completed), ("S2", UnitStatus::Running)] {
            store.set_space_status("r1", space, status).await.unwrap();
        }
        store
            .set_param_set_status("r1", "S1", 0, UnitStatus::Completed)
            .await
            .unwrap();
        store
            .set_param_set_status("r1", "S1", 1, UnitStatus::Failed)
            .await
            .unwrap();
        store
            .set_task_status(&TaskKey::new("r1", "S1", 0, "T1"), TaskUpdate::completed())
            .await
            .unwrap();
        store
            .set_task_status(&TaskKey::new("r1", "S1", 1, "T1"), TaskUpdate::failed("x"))
            .await
            .unwrap();
        store
            .set_task_status(&TaskKey::new("other", "S1", 0, "T1"), TaskUpdate::completed())
            .await
            .unwrap();

        assert_eq!(store.completed_spaces("r1").await.unwrap(), vec!["S1"]);
        assert_eq!(store.count_completed_param_sets("r1").await.unwrap(), 1);

        let counts = store.task_counts("r1").await.unwrap();
        assert_eq!(counts.completed, 1);
        assert_eq!(counts.failed, 1);
    }
}
