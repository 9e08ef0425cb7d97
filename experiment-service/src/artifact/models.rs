// Artifact Models
// Serde types for the compiled experiment document

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

/// Sentinel a transition points at to finish the run
pub const END: &str = "END";

/// One assignment of parameter values for a space. Keys are either a bare
/// parameter name or a task-scoped override `"<taskId>:<name>"`.
pub type ParameterSet = BTreeMap<String, serde_json::Value>;

/// The experiment definition document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    pub experiment: String,
    pub version: String,
    /// Task groups, flattened by task id for lookup
    pub tasks: Vec<Vec<Task>>,
    pub spaces: Vec<Space>,
    pub control: ControlFlow,
    /// Global initial values for task inputs
    #[serde(default, deserialize_with = "null_as_default")]
    pub input_data: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub task_id: String,
    #[serde(default)]
    pub workflow: Option<String>,
    /// Path to the executable script, relative to the artifact directory
    pub implementation: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub static_parameters: BTreeMap<String, serde_json::Value>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub dynamic_parameters: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub input_data: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub output_data: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Space {
    pub space_id: String,
    pub tasks_order: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub parameters: Vec<ParameterSet>,
    /// Space-local initial values for task inputs
    #[serde(default, deserialize_with = "null_as_default")]
    pub input_data: BTreeMap<String, serde_json::Value>,
}

impl Space {
    /// Number of task executions this space performs in a full sweep
    pub fn total_tasks(&self) -> usize {
        self.parameters.len() * self.tasks_order.len()
    }

    /// Id of the last task in the chain, whose outputs are the space's results
    pub fn last_task(&self) -> Option<&str> {
        self.tasks_order.last().map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlFlow {
    /// Id of the first space to execute
    #[serde(rename = "START")]
    pub start: String,
    pub transitions: Vec<Transition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    pub from: String,
    /// Target space id, or [`END`]
    pub to: String,
    #[serde(default)]
    pub condition: Option<String>,
}

impl Transition {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            condition: None,
        }
    }

    pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }

    pub fn is_conditional(&self) -> bool {
        self.condition
            .as_deref()
            .map(|c| !c.trim().is_empty())
            .unwrap_or(false)
    }
}

/// Render an artifact value the way a task receives it on its command line
pub fn render_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Bool(b) => b.to_string(),
        serde_json::Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_task_optional_fields() {
        let task: Task = serde_json::from_value(json!({
            "taskId": "T1",
            "implementation": "train.py",
            "staticParameters": null,
            "outputData": ["model"]
        }))
        .unwrap();

        assert_eq!(task.task_id, "T1");
        assert!(task.static_parameters.is_empty());
        assert!(task.dynamic_parameters.is_empty());
        assert_eq!(task.output_data, vec!["model".to_string()]);
    }

    #[test]
    fn test_space_totals() {
        let space: Space = serde_json::from_value(json!({
            "spaceId": "S1",
            "tasksOrder": ["A", "B", "C"],
            "parameters": [{"lr": 0.1}, {"lr": 0.01}]
        }))
        .unwrap();

        assert_eq!(space.total_tasks(), 6);
        assert_eq!(space.last_task(), Some("C"));
    }

    #[test]
    fn test_transition_condition_detection() {
        assert!(!Transition::new("S1", END).is_conditional());
        assert!(!Transition::new("S1", END).with_condition("  ").is_conditional());
        assert!(Transition::new("S1", "S2")
            .with_condition("input() == 'yes'")
            .is_conditional());
    }

    #[test]
    fn test_render_value() {
        assert_eq!(render_value(&json!("abc")), "abc");
        assert_eq!(render_value(&json!(3)), "3");
        assert_eq!(render_value(&json!(0.5)), "0.5");
        assert_eq!(render_value(&json!(true)), "true");
        assert_eq!(render_value(&json!(null)), "");
        assert_eq!(render_value(&json!([1, 2])), "[1,2]");
    }
}
