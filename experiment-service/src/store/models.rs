// Store Models
// Records persisted for runs and their units of work

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
    Terminated,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Terminated => "terminated",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Running)
    }
}

/// Lifecycle of a space, parameter set or task execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitStatus {
    Running,
    Completed,
    Failed,
    Skipped,
}

impl UnitStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnitStatus::Running => "running",
            UnitStatus::Completed => "completed",
            UnitStatus::Failed => "failed",
            UnitStatus::Skipped => "skipped",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(RunStatus::Running),
            "completed" => Ok(RunStatus::Completed),
            "failed" => Ok(RunStatus::Failed),
            "terminated" => Ok(RunStatus::Terminated),
            other => Err(format!("unknown run status '{}'", other)),
        }
    }
}

impl FromStr for UnitStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(UnitStatus::Running),
            "completed" => Ok(UnitStatus::Completed),
            "failed" => Ok(UnitStatus::Failed),
            "skipped" => Ok(UnitStatus::Skipped),
            other => Err(format!("unknown unit status '{}'", other)),
        }
    }
}

/// One execution instance of an (experiment, version) pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: String,
    pub experiment_name: String,
    pub experiment_version: String,
    pub artifact_path: String,
    pub artifact_hash: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub current_space: Option<String>,
    pub current_param_set: Option<usize>,
}

impl RunRecord {
    /// A fresh `running` record
    pub fn new(
        id: impl Into<String>,
        experiment_name: impl Into<String>,
        experiment_version: impl Into<String>,
        artifact_path: impl Into<String>,
        artifact_hash: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            experiment_name: experiment_name.into(),
            experiment_version: experiment_version.into(),
            artifact_path: artifact_path.into(),
            artifact_hash: artifact_hash.into(),
            start_time: Utc::now(),
            end_time: None,
            status: RunStatus::Running,
            current_space: None,
            current_param_set: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpaceExecution {
    pub run_id: String,
    pub space_id: String,
    pub status: UnitStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSetExecution {
    pub run_id: String,
    pub space_id: String,
    pub param_set_index: usize,
    pub status: UnitStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskExecution {
    pub run_id: String,
    pub space_id: String,
    pub param_set_index: usize,
    pub task_id: String,
    pub status: UnitStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub output_dir: Option<String>,
    pub error_message: Option<String>,
}

/// Natural key of a task execution
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskKey {
    pub run_id: String,
    pub space_id: String,
    pub param_set_index: usize,
    pub task_id: String,
}

impl TaskKey {
    pub fn new(
        run_id: impl Into<String>,
        space_id: impl Into<String>,
        param_set_index: usize,
        task_id: impl Into<String>,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            space_id: space_id.into(),
            param_set_index,
            task_id: task_id.into(),
        }
    }
}

/// Status change for a task execution.
///
/// A `running` update starts a new attempt: the start time is reset and any
/// previous error cleared. Other statuses stamp the end time. An update
/// without an output directory keeps the one already recorded.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskUpdate {
    pub status: UnitStatus,
    pub output_dir: Option<String>,
    pub error_message: Option<String>,
}

impl TaskUpdate {
    pub fn running(output_dir: Option<String>) -> Self {
        Self {
            status: UnitStatus::Running,
            output_dir,
            error_message: None,
        }
    }

    pub fn completed() -> Self {
        Self {
            status: UnitStatus::Completed,
            output_dir: None,
            error_message: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: UnitStatus::Failed,
            output_dir: None,
            error_message: Some(message.into()),
        }
    }
}

/// Task executions of a run grouped by status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskCounts {
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl TaskCounts {
    pub fn add(&mut self, status: UnitStatus) {
        match status {
            UnitStatus::Running => self.running += 1,
            UnitStatus::Completed => self.completed += 1,
            UnitStatus::Failed => self.failed += 1,
            UnitStatus::Skipped => self.skipped += 1,
        }
    }
}
