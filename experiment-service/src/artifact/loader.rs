// Artifact Loader
// Reads an artifact from disk, checks its shape and indexes its tasks

use crate::artifact::models::{Artifact, Space, Task};
use crate::error::{EngineError, EngineResult};

use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// An artifact together with everything derived from where it was loaded
#[derive(Debug, Clone)]
pub struct LoadedArtifact {
    pub document: Artifact,
    /// Path the artifact was read from
    pub path: PathBuf,
    /// Directory task implementations run in
    pub base_dir: PathBuf,
    /// Hex SHA-256 of the raw file
    pub hash: String,
    tasks: HashMap<String, Task>,
}

impl LoadedArtifact {
    /// Read and validate an artifact file
    pub fn from_file(path: impl AsRef<Path>) -> EngineResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read(path).map_err(|e| {
            EngineError::structural(format!("cannot read {}: {}", path.display(), e))
        })?;

        let path = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        let base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        Self::from_slice(&raw, path, base_dir)
    }

    /// Validate an artifact held in memory
    pub fn from_slice(raw: &[u8], path: PathBuf, base_dir: PathBuf) -> EngineResult<Self> {
        let value: serde_json::Value = serde_json::from_slice(raw)
            .map_err(|e| EngineError::structural(format!("not a JSON document: {}", e)))?;

        validate_shape(&value)?;

        let document: Artifact = serde_json::from_value(value)
            .map_err(|e| EngineError::structural(e.to_string()))?;

        let mut tasks = HashMap::new();
        for task in document.tasks.iter().flatten() {
            if tasks.insert(task.task_id.clone(), task.clone()).is_some() {
                tracing::warn!(task_id = %task.task_id, "duplicate task id, last definition wins");
            }
        }

        Ok(Self {
            document,
            path,
            base_dir,
            hash: hex::encode(Sha256::digest(raw)),
            tasks,
        })
    }

    pub fn experiment(&self) -> &str {
        &self.document.experiment
    }

    pub fn version(&self) -> &str {
        &self.document.version
    }

    pub fn start(&self) -> &str {
        &self.document.control.start
    }

    pub fn task(&self, task_id: &str) -> Option<&Task> {
        self.tasks.get(task_id)
    }

    /// Flattened task-id map
    pub fn tasks(&self) -> &HashMap<String, Task> {
        &self.tasks
    }

    pub fn space(&self, space_id: &str) -> Option<&Space> {
        self.document.spaces.iter().find(|s| s.space_id == space_id)
    }

    pub fn spaces(&self) -> &[Space] {
        &self.document.spaces
    }

    /// Σ over spaces of parameter sets × chain length
    pub fn total_tasks(&self) -> usize {
        self.document.spaces.iter().map(Space::total_tasks).sum()
    }

    pub fn total_parameter_sets(&self) -> usize {
        self.document.spaces.iter().map(|s| s.parameters.len()).sum()
    }
}

/// Check the fields the engine relies on before anything is deserialized
pub fn validate_shape(value: &serde_json::Value) -> EngineResult<()> {
    let Some(root) = value.as_object() else {
        return Err(EngineError::structural("artifact must be a JSON object"));
    };

    for field in ["experiment", "version"] {
        match root.get(field).and_then(|v| v.as_str()) {
            Some(s) if !s.trim().is_empty() => {}
            _ => {
                return Err(EngineError::structural(format!(
                    "'{}' must be a non-empty string",
                    field
                )))
            }
        }
    }

    let Some(groups) = root.get("tasks").and_then(|v| v.as_array()) else {
        return Err(EngineError::structural("'tasks' must be an array"));
    };
    if let Some(pos) = groups.iter().position(|g| !g.is_array()) {
        return Err(EngineError::structural(format!(
            "'tasks[{}]' must be an array of tasks",
            pos
        )));
    }

    if !root.get("spaces").map(|v| v.is_array()).unwrap_or(false) {
        return Err(EngineError::structural("'spaces' must be an array"));
    }

    let Some(control) = root.get("control").and_then(|v| v.as_object()) else {
        return Err(EngineError::structural("'control' must be an object"));
    };
    if !control.get("START").map(|v| v.is_string()).unwrap_or(false) {
        return Err(EngineError::structural("'control.START' must be a string"));
    }
    if !control
        .get("transitions")
        .map(|v| v.is_array())
        .unwrap_or(false)
    {
        return Err(EngineError::structural(
            "'control.transitions' must be an array",
        ));
    }

    if let Some(input) = root.get("inputData") {
        if !(input.is_object() || input.is_null()) {
            return Err(EngineError::structural("'inputData' must be an object"));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> serde_json::Value {
        json!({
            "experiment": "exp",
            "version": "v1",
            "tasks": [[
                {"taskId": "T1", "implementation": "t1.sh", "outputData": ["out"]},
                {"taskId": "T2", "implementation": "t2.sh", "inputData": ["out"]}
            ]],
            "spaces": [
                {"spaceId": "S1", "tasksOrder": ["T1", "T2"], "parameters": [{}, {}]},
                {"spaceId": "S2", "tasksOrder": ["T1"], "parameters": [{}]}
            ],
            "control": {"START": "S1", "transitions": [{"from": "S1", "to": "S2"}]}
        })
    }

    fn load(value: &serde_json::Value) -> EngineResult<LoadedArtifact> {
        LoadedArtifact::from_slice(
            value.to_string().as_bytes(),
            PathBuf::from("/tmp/artifact.json"),
            PathBuf::from("/tmp"),
        )
    }

    #[test]
    fn test_load_indexes_tasks() {
        let artifact = load(&sample()).unwrap();

        assert_eq!(artifact.experiment(), "exp");
        assert_eq!(artifact.start(), "S1");
        assert!(artifact.task("T2").is_some());
        assert!(artifact.task("T3").is_none());
        assert_eq!(artifact.total_tasks(), 5);
        assert_eq!(artifact.total_parameter_sets(), 3);
        assert_eq!(artifact.hash.len(), 64);
    }

    #[test]
    fn test_missing_start_is_structural() {
        let mut doc = sample();
        doc["control"].as_object_mut().unwrap().remove("START");

        let err = load(&doc).unwrap_err();
        assert!(matches!(err, EngineError::Structural(_)));
        assert!(err.to_string().contains("control.START"));
    }

    #[test]
    fn test_empty_version_rejected() {
        let mut doc = sample();
        doc["version"] = json!("");
        assert!(matches!(load(&doc), Err(EngineError::Structural(_))));
    }

    #[test]
    fn test_tasks_must_be_grouped() {
        let mut doc = sample();
        doc["tasks"] = json!([{"taskId": "T1", "implementation": "x"}]);
        assert!(matches!(load(&doc), Err(EngineError::Structural(_))));
    }

    #[test]
    fn test_wrong_field_type_rejected() {
        let mut doc = sample();
        doc["spaces"][0]["tasksOrder"] = json!("T1");
        assert!(matches!(load(&doc), Err(EngineError::Structural(_))));
    }

    #[test]
    fn test_not_json() {
        let err = LoadedArtifact::from_slice(b"{oops", PathBuf::new(), PathBuf::new()).unwrap_err();
        assert!(matches!(err, EngineError::Structural(_)));
    }
}
