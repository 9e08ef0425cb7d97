// Engine Configuration
// Tunables for the execution engine, loadable from a YAML file

use crate::error::{EngineError, EngineResult};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default wait for a user answer before a conditional transition fails
pub const DEFAULT_INPUT_TIMEOUT_SECS: u64 = 300;

/// Configuration for the experiment engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct EngineConfig {
    /// SQLite URL of the state database
    pub database_url: String,
    /// How long a condition may wait for input (seconds, fractions allowed)
    pub input_timeout_secs: f64,
    /// Kill a task implementation after this many seconds (None = no limit)
    pub task_timeout_secs: Option<u64>,
    /// Root for per-task output directories (None = no directories created)
    pub output_root: Option<PathBuf>,
    /// Interpreter used for implementations with a given file extension
    pub interpreters: BTreeMap<String, String>,
    /// Default tracing filter used by front ends
    pub log_filter: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let mut interpreters = BTreeMap::new();
        interpreters.insert("py".to_string(), "python3".to_string());
        interpreters.insert("sh".to_string(), "sh".to_string());
        interpreters.insert("R".to_string(), "Rscript".to_string());

        Self {
            database_url: default_database_url(),
            input_timeout_secs: DEFAULT_INPUT_TIMEOUT_SECS as f64,
            task_timeout_secs: None,
            output_root: None,
            interpreters,
            log_filter: "warn".to_string(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a YAML file; missing keys keep their defaults
    pub fn from_file(path: impl AsRef<Path>) -> EngineResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
            .map_err(|e| EngineError::structural(format!("{}: {}", path.display(), e)))
    }

    pub fn from_yaml(content: &str) -> Result<Self, serde_yaml::Error> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(content)
    }

    /// Negative or non-finite values fall back to the default
    pub fn input_timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.input_timeout_secs)
            .unwrap_or(Duration::from_secs(DEFAULT_INPUT_TIMEOUT_SECS))
    }

    pub fn task_timeout(&self) -> Option<Duration> {
        self.task_timeout_secs.map(Duration::from_secs)
    }

    pub fn with_database_url(mut self, url: impl Into<String>) -> Self {
        self.database_url = url.into();
        self
    }

    pub fn with_input_timeout(mut self, timeout: Duration) -> Self {
        self.input_timeout_secs = timeout.as_secs_f64();
        self
    }
}

/// `sqlite://<data dir>/expflow/state.db`, falling back to the working directory
fn default_database_url() -> String {
    let path = dirs::data_local_dir()
        .map(|dir| dir.join("expflow").join("state.db"))
        .unwrap_or_else(|| PathBuf::from("expflow-state.db"));
    format!("sqlite://{}", path.display())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.input_timeout(), Duration::from_secs(300));
        assert!(config.task_timeout().is_none());
        assert_eq!(config.interpreters.get("py"), Some(&"python3".to_string()));
        assert!(config.database_url.starts_with("sqlite://"));
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config = EngineConfig::from_yaml(
            r#"
input_timeout_secs: 5
task_timeout_secs: 60
interpreters:
  py: python
"#,
        )
        .unwrap();

        assert_eq!(config.input_timeout(), Duration::from_secs(5));
        assert_eq!(config.task_timeout(), Some(Duration::from_secs(60)));
        assert_eq!(config.interpreters.get("py"), Some(&"python".to_string()));
        assert!(!config.interpreters.contains_key("sh"));
        assert_eq!(config.log_filter, "warn");
    }

    #[test]
    fn test_empty_yaml() {
        let config = EngineConfig::from_yaml("").unwrap();
        assert_eq!(config.input_timeout(), Duration::from_secs(DEFAULT_INPUT_TIMEOUT_SECS));
    }

    #[test]
    fn test_sub_second_input_timeout() {
        let config = EngineConfig::default().with_input_timeout(Duration::from_millis(250));
        assert_eq!(config.input_timeout(), Duration::from_millis(250));

        let config = EngineConfig::from_yaml("input_timeout_secs: 0.5").unwrap();
        assert_eq!(config.input_timeout(), Duration::from_millis(500));

        let config = EngineConfig::from_yaml("input_timeout_secs: -1").unwrap();
        assert_eq!(config.input_timeout(), Duration::from_secs(300));
    }
}
