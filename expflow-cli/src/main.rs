// expflow
// Command-line front end for running and inspecting experiment artifacts

mod commands;
mod output;

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use color_eyre::eyre::WrapErr;
use color_eyre::Result;
use tracing_subscriber::EnvFilter;

use experiment_service::EngineConfig;

use commands::run::RunArgs;
use commands::status::StatusArgs;
use commands::terminate::TerminateArgs;
use commands::validate::ValidateArgs;

/// Resumable runner for parameter-sweep experiments
#[derive(Parser, Debug)]
#[command(name = "expflow", version, about, long_about = None)]
struct Cli {
    /// Engine configuration file (YAML)
    #[arg(long, short = 'c', global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// State database, as a sqlite:// URL or a file path
    #[arg(long, global = true, value_name = "URL")]
    db: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run (or resume) an experiment artifact
    Run(RunArgs),
    /// Show the state of an experiment's run
    Status(StatusArgs),
    /// Stop a running experiment
    Terminate(TerminateArgs),
    /// Check an artifact without running it
    Validate(ValidateArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref(), cli.db)?;
    init_tracing(&config.log_filter);
    tracing::debug!(database = %config.database_url, "configuration loaded");

    match cli.command {
        Commands::Run(args) => commands::run::execute(args, config).await,
        Commands::Status(args) => commands::status::execute(args, config).await,
        Commands::Terminate(args) => commands::terminate::execute(args, config).await,
        Commands::Validate(args) => commands::validate::execute(args),
    }
}

fn load_config(path: Option<&Path>, db: Option<String>) -> Result<EngineConfig> {
    let mut config = match path {
        Some(path) => EngineConfig::from_file(path)
            .wrap_err_with(|| format!("Failed to load config {}", path.display()))?,
        None => EngineConfig::default(),
    };

    if let Some(db) = db {
        config.database_url = database_url(&db);
    }

    Ok(config)
}

/// Accept either a full sqlite URL or a plain file path
fn database_url(value: &str) -> String {
    if value.starts_with("sqlite:") {
        value.to_string()
    } else {
        format!("sqlite://{}", value)
    }
}

/// `RUST_LOG` wins over the configured filter
fn init_tracing(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_database_url_accepts_paths() {
        assert_eq!(database_url("state.db"), "sqlite://state.db");
        assert_eq!(database_url("sqlite::memory:"), "sqlite::memory:");
        assert_eq!(database_url("sqlite:///tmp/x.db"), "sqlite:///tmp/x.db");
    }

    #[test]
    fn test_cli_parses_run_flags() {
        let cli = Cli::try_parse_from([
            "expflow", "run", "artifact.json", "--resume", "--input", "yes", "--input", "no",
            "--db", "state.db",
        ])
        .unwrap();

        assert_eq!(cli.db.as_deref(), Some("state.db"));
        match cli.command {
            Commands::Run(args) => {
                assert!(args.resume);
                assert_eq!(args.inputs, vec!["yes", "no"]);
                assert_eq!(args.artifact, PathBuf::from("artifact.json"));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_cli_parses_status() {
        let cli = Cli::try_parse_from(["expflow", "status", "exp", "v1", "--json"]).unwrap();
        match cli.command {
            Commands::Status(args) => {
                assert_eq!(args.experiment, "exp");
                assert_eq!(args.version, "v1");
                assert!(args.json);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
