//! Persistence for runs and their resumability ledger.
//!
//! The [`StateStore`] trait is the only thing the engine talks to. It covers:
//! - run records (one per experiment name + version)
//! - space, parameter-set and task execution status
//! - data mappings, the values tasks produce for later tasks
//! - the control-state pointer used to resume the control-flow loop
//!
//! Two implementations ship with the crate: [`MemoryStore`] for tests and
//! throwaway runs, and [`SqliteStore`] for durable state.

mod memory;
pub mod models;
mod sqlite;

pub use memory::MemoryStore;
pub use models::{
    ParamSetExecution, RunRecord, RunStatus, SpaceExecution, TaskCounts, TaskExecution, TaskKey,
    TaskUpdate, UnitStatus,
};
pub use sqlite::SqliteStore;

use async_trait::async_trait;

/// Error type for storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The requested record was not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// A run already exists for this experiment name and version.
    #[error("conflict: {0}")]
    Conflict(String),

    /// A stored value could not be interpreted.
    #[error("corrupt record: {0}")]
    Corrupt(String),

    /// Backend-specific failure (lock poisoning, I/O).
    #[error("backend error: {0}")]
    Backend(String),

    /// A database error occurred.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Schema migration failed.
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// Storage trait for run state.
///
/// Every read reflects the latest completed write. Status setters are
/// upserts: the first call for a unit creates its record.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Create a run. Fails with [`StoreError::Conflict`] if a run already
    /// exists for the same experiment name and version.
    async fn create_run(&self, run: &RunRecord) -> Result<(), StoreError>;

    /// Get a run by id.
    async fn get_run(&self, run_id: &str) -> Result<Option<RunRecord>, StoreError>;

    /// Get the run for an experiment name and version.
    async fn find_run(
        &self,
        experiment_name: &str,
        experiment_version: &str,
    ) -> Result<Option<RunRecord>, StoreError>;

    /// Update a run's status. Terminal statuses stamp the end time, `running`
    /// clears it.
    async fn update_run_status(&self, run_id: &str, status: RunStatus) -> Result<(), StoreError>;

    /// Record where in the experiment a run currently is.
    async fn update_run_position(
        &self,
        run_id: &str,
        current_space: Option<&str>,
        current_param_set: Option<usize>,
    ) -> Result<(), StoreError>;

    /// Replace the recorded artifact hash of a run.
    async fn update_run_hash(&self, run_id: &str, artifact_hash: &str) -> Result<(), StoreError>;

    /// Delete a run and every record that belongs to it.
    async fn delete_run(&self, run_id: &str) -> Result<(), StoreError>;

    /// Set the status of a space execution.
    async fn set_space_status(
        &self,
        run_id: &str,
        space_id: &str,
        status: UnitStatus,
    ) -> Result<(), StoreError>;

    async fn get_space_execution(
        &self,
        run_id: &str,
        space_id: &str,
    ) -> Result<Option<SpaceExecution>, StoreError>;

    /// Set the status of a parameter-set execution.
    async fn set_param_set_status(
        &self,
        run_id: &str,
        space_id: &str,
        param_set_index: usize,
        status: UnitStatus,
    ) -> Result<(), StoreError>;

    async fn get_param_set_execution(
        &self,
        run_id: &str,
        space_id: &str,
        param_set_index: usize,
    ) -> Result<Option<ParamSetExecution>, StoreError>;

    /// Apply a status change to a task execution.
    async fn set_task_status(&self, key: &TaskKey, update: TaskUpdate) -> Result<(), StoreError>;

    async fn get_task_execution(&self, key: &TaskKey)
        -> Result<Option<TaskExecution>, StoreError>;

    /// Store a produced value, replacing any previous one.
    async fn put_data(
        &self,
        run_id: &str,
        space_id: &str,
        param_set_index: usize,
        data_name: &str,
        data_value: &str,
    ) -> Result<(), StoreError>;

    async fn get_data(
        &self,
        run_id: &str,
        space_id: &str,
        param_set_index: usize,
        data_name: &str,
    ) -> Result<Option<String>, StoreError>;

    /// Persist the control-flow position of a run.
    async fn set_control_state(&self, run_id: &str, current_space: &str)
        -> Result<(), StoreError>;

    async fn get_control_state(&self, run_id: &str) -> Result<Option<String>, StoreError>;

    /// Ids of completed spaces, in the order they were started.
    async fn completed_spaces(&self, run_id: &str) -> Result<Vec<String>, StoreError>;

    /// Number of completed parameter-set executions of a run.
    async fn count_completed_param_sets(&self, run_id: &str) -> Result<usize, StoreError>;

    /// Task executions of a run grouped by status.
    async fn task_counts(&self, run_id: &str) -> Result<TaskCounts, StoreError>;
}
