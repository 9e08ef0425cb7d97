use crate::output;

use clap::Args;
use color_eyre::eyre::WrapErr;
use color_eyre::Result;

use experiment_service::{EngineConfig, ExperimentEngine, RunStatus};

/// Show the state of an experiment's run
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Experiment name
    pub experiment: String,

    /// Experiment version
    pub version: String,

    /// Print the report as JSON on stdout
    #[arg(long)]
    pub json: bool,
}

pub async fn execute(args: StatusArgs, config: EngineConfig) -> Result<()> {
    let engine = ExperimentEngine::connect(config)
        .await
        .wrap_err("Failed to open state database")?;

    let Some(report) = engine.get_status(&args.experiment, &args.version).await? else {
        output::warning(&format!(
            "No run recorded for {} {}",
            args.experiment, args.version
        ));
        std::process::exit(1);
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    output::header(&format!("{} {}", args.experiment, args.version));
    let line = format!("Run {}: {}", report.run_id, report.status);
    match report.status {
        RunStatus::Completed => output::success(&line),
        RunStatus::Failed | RunStatus::Terminated => output::failure(&line),
        RunStatus::Running => output::info(&line),
    }

    if let Some(space) = &report.current_space {
        let position = match report.current_parameter_set {
            Some(index) => format!("space '{}', parameter set {}", space, index),
            None => format!("space '{}'", space),
        };
        output::info(&format!("At {}", position));
    }

    let progress = &report.progress;
    output::check(&format!(
        "Spaces: {}/{}",
        progress.completed_spaces, progress.total_spaces
    ));
    output::check(&format!(
        "Parameter sets: {}/{}",
        progress.completed_parameter_sets, progress.total_parameter_sets
    ));

    output::dim(&format!("  started {}", report.start_time.to_rfc3339()));
    if let Some(end) = report.end_time {
        output::dim(&format!("  ended   {}", end.to_rfc3339()));
    }

    Ok(())
}
