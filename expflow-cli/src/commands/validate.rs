use crate::output;

use std::collections::HashSet;
use std::path::PathBuf;

use clap::Args;
use color_eyre::Result;

use experiment_service::{Condition, LoadedArtifact, END};

/// Validate an experiment artifact
#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Path to the artifact JSON file
    pub artifact: PathBuf,
}

pub fn execute(args: ValidateArgs) -> Result<()> {
    let artifact_path = &args.artifact;

    if !artifact_path.exists() {
        color_eyre::eyre::bail!("Artifact file not found: {}", artifact_path.display());
    }

    // Step 1: Structure
    output::status("Validating", &format!("{}", artifact_path.display()));

    let artifact = match LoadedArtifact::from_file(artifact_path) {
        Ok(a) => a,
        Err(e) => {
            output::error(&e.to_string());
            std::process::exit(1);
        }
    };

    output::check("Artifact structure valid");
    output::check(&format!(
        "Experiment '{}' version '{}': {} spaces, {} tasks, {} parameter sets",
        artifact.experiment(),
        artifact.version(),
        artifact.spaces().len(),
        artifact.tasks().len(),
        artifact.total_parameter_sets()
    ));

    // Step 2: References, reported as warnings since they only fail when reached
    let warnings = reference_warnings(&artifact);
    if warnings.is_empty() {
        output::check("All references resolve");
    } else {
        for warning in &warnings {
            output::warning(warning);
        }
    }

    output::blank();
    output::success("Artifact is valid");
    output::dim(&format!("  sha256 {}", artifact.hash));

    Ok(())
}

fn reference_warnings(artifact: &LoadedArtifact) -> Vec<String> {
    let spaces: HashSet<&str> = artifact
        .spaces()
        .iter()
        .map(|s| s.space_id.as_str())
        .collect();
    let known_space = |id: &str| id == END || spaces.contains(id);

    let mut warnings = Vec::new();

    if !known_space(artifact.start()) {
        warnings.push(format!("START space '{}' is not defined", artifact.start()));
    }

    for space in artifact.spaces() {
        for task_id in &space.tasks_order {
            if artifact.task(task_id).is_none() {
                warnings.push(format!(
                    "space '{}' references unknown task '{}'",
                    space.space_id, task_id
                ));
            }
        }
    }

    for transition in &artifact.document.control.transitions {
        for id in [&transition.from, &transition.to] {
            if !known_space(id) {
                warnings.push(format!(
                    "transition {} -> {} references unknown space '{}'",
                    transition.from, transition.to, id
                ));
            }
        }
        if let Some(condition) = transition.condition.as_deref() {
            if transition.is_conditional() {
                if let Err(e) = Condition::parse(condition) {
                    warnings.push(format!(
                        "transition {} -> {} has an invalid condition: {}",
                        transition.from, transition.to, e
                    ));
                }
            }
        }
    }

    warnings
}
