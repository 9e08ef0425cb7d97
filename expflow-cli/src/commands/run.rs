use crate::output;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use clap::Args;
use color_eyre::eyre::WrapErr;
use color_eyre::Result;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::Mutex;

use experiment_service::{
    EngineConfig, EngineError, EngineResult, ExecutionEvent, ExperimentEngine, InputProvider,
    InputRequest, ProgressCallbacks, RunOptions, RunResult, StaticInputProvider,
};

/// Run an experiment artifact
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Path to the artifact JSON file
    pub artifact: PathBuf,

    /// Continue the previous unfinished run instead of starting over
    #[arg(long)]
    pub resume: bool,

    /// Answer for an input() condition, used in order (can be repeated)
    #[arg(long = "input", short = 'i', value_name = "VALUE")]
    pub inputs: Vec<String>,

    /// Print the final result as JSON on stdout
    #[arg(long)]
    pub json: bool,
}

/// Answers conditions from the terminal, one line per request
struct StdinInputProvider {
    lines: Mutex<Lines<BufReader<Stdin>>>,
}

impl StdinInputProvider {
    fn new() -> Self {
        Self {
            lines: Mutex::new(BufReader::new(tokio::io::stdin()).lines()),
        }
    }
}

#[async_trait]
impl InputProvider for StdinInputProvider {
    async fn request_input(&self, request: &InputRequest) -> EngineResult<String> {
        let mut lines = self.lines.lock().await;
        output::prompt(&request.prompt);

        match lines.next_line().await? {
            Some(line) => Ok(line.trim().to_string()),
            None => Err(EngineError::Input("stdin closed".to_string())),
        }
    }
}

pub async fn execute(args: RunArgs, config: EngineConfig) -> Result<()> {
    let artifact_path = &args.artifact;

    if !artifact_path.exists() {
        color_eyre::eyre::bail!("Artifact file not found: {}", artifact_path.display());
    }

    output::status("Connecting", &config.database_url);
    let engine = ExperimentEngine::connect(config)
        .await
        .wrap_err("Failed to open state database")?;

    let input: Arc<dyn InputProvider> = if args.inputs.is_empty() {
        Arc::new(StdinInputProvider::new())
    } else {
        Arc::new(StaticInputProvider::new(args.inputs.clone()))
    };

    let (callbacks, mut rx) = ProgressCallbacks::channel();
    let options = RunOptions::new()
        .resume(args.resume)
        .with_callbacks(callbacks)
        .with_input(input);

    output::status(
        if args.resume { "Resuming" } else { "Running" },
        &format!("{}", artifact_path.display()),
    );

    // Spawn execution in background
    let path = artifact_path.clone();
    let exec_handle = tokio::spawn(async move { engine.run(path, options).await });

    // Process events in the foreground; the channel closes when the run ends
    while let Some(event) = rx.recv().await {
        print_event(&event);
    }

    match exec_handle.await? {
        Ok(result) => {
            print_result(&result, args.json)?;
            Ok(())
        }
        Err(err) => {
            output::blank();
            if err.is_terminated() {
                output::warning(&err.to_string());
            } else {
                output::failure(&err.to_string());
            }
            std::process::exit(1);
        }
    }
}

fn print_event(event: &ExecutionEvent) {
    for line in event_lines(event) {
        output::line(&line);
    }
}

/// Terminal rendering of one progress event
fn event_lines(event: &ExecutionEvent) -> Vec<String> {
    match event {
        ExecutionEvent::SpaceStarted { space_id, .. } => {
            vec![String::new(), output::space_line(space_id)]
        }

        ExecutionEvent::SpaceCompleted { space_id, .. } => {
            vec![output::ok_line(&format!("  Space '{}' OK", space_id))]
        }

        ExecutionEvent::ParamSetStarted {
            param_set_index,
            parameters,
            ..
        } => {
            let rendered: Vec<String> = parameters
                .iter()
                .map(|(name, value)| format!("{}={}", name, value))
                .collect();
            vec![format!(
                "    Parameter set {} [{}]",
                param_set_index,
                rendered.join(", ")
            )]
        }

        ExecutionEvent::ParamSetCompleted { progress, .. } => {
            vec![output::dim_line(&format!(
                "    {:.0}% of space done",
                progress * 100.0
            ))]
        }

        ExecutionEvent::TaskStarted { task_id, .. } => vec![format!("      [Task] {}", task_id)],

        ExecutionEvent::TaskCompleted { outputs, .. } => outputs
            .iter()
            .map(|(name, value)| output::value_line(name, value))
            .collect(),

        ExecutionEvent::InputRequired(request) => vec![output::info_line(&format!(
            "Space '{}' needs input for: {}",
            request.space_id, request.condition
        ))],

        ExecutionEvent::Error { message, .. } => vec![output::error_line(message)],

        ExecutionEvent::Progress {
            progress, message, ..
        } => vec![output::status_line(
            "Progress",
            &format!("{:.0}% {}", progress * 100.0, message),
        )],
    }
}

fn print_result(result: &RunResult, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(result)?);
        return Ok(());
    }

    output::blank();
    output::header(&format!("Run {}", result.run_id));
    output::check(&format!(
        "Spaces: {}",
        result.completed_spaces.join(" -> ")
    ));
    output::check(&format!(
        "Tasks: {} completed, {} failed, {} skipped of {}",
        result.summary.completed_tasks,
        result.summary.failed_tasks,
        result.summary.skipped_tasks,
        result.summary.total_tasks
    ));

    for (space_id, values) in &result.outputs {
        if values.is_empty() {
            continue;
        }
        output::line(&format!("    {}", space_id));
        for (name, value) in values {
            output::value(name, value);
        }
    }

    output::blank();
    output::success("Experiment completed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_space_start_opens_a_section() {
        let lines = event_lines(&ExecutionEvent::SpaceStarted {
            run_id: "r1".to_string(),
            space_id: "S1".to_string(),
        });
        assert_eq!(lines.len(), 2);
        assert!(lines[0].is_empty());
        assert!(lines[1].contains("'S1'"));
    }

    #[test]
    fn test_task_outputs_render_one_line_each() {
        let outputs: BTreeMap<String, String> = [("out_0", "42"), ("out_1", "7")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let lines = event_lines(&ExecutionEvent::TaskCompleted {
            run_id: "r1".to_string(),
            space_id: "S1".to_string(),
            param_set_index: 0,
            task_id: "T1".to_string(),
            outputs,
        });
        assert_eq!(lines, vec!["        | out_0 = 42", "        | out_1 = 7"]);
    }

    #[test]
    fn test_parameter_set_lists_values() {
        let parameters: BTreeMap<String, String> =
            [("x".to_string(), "1".to_string())].into_iter().collect();
        let lines = event_lines(&ExecutionEvent::ParamSetStarted {
            run_id: "r1".to_string(),
            space_id: "S1".to_string(),
            param_set_index: 2,
            parameters,
        });
        assert_eq!(lines, vec!["    Parameter set 2 [x=1]"]);
    }
}
