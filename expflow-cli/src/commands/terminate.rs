use crate::output;

use clap::Args;
use color_eyre::eyre::WrapErr;
use color_eyre::Result;

use experiment_service::{EngineConfig, ExperimentEngine};

/// Stop a running experiment
#[derive(Args, Debug)]
pub struct TerminateArgs {
    /// Experiment name
    pub experiment: String,

    /// Experiment version
    pub version: String,
}

pub async fn execute(args: TerminateArgs, config: EngineConfig) -> Result<()> {
    let engine = ExperimentEngine::connect(config)
        .await
        .wrap_err("Failed to open state database")?;

    output::status(
        "Terminating",
        &format!("{} {}", args.experiment, args.version),
    );

    if engine.terminate(&args.experiment, &args.version).await? {
        // The executing process sees the status before its next parameter set
        output::success("Run marked as terminated");
        Ok(())
    } else {
        output::warning("No running experiment found");
        std::process::exit(1);
    }
}
