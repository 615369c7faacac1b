//! Stochastic Combiner
//!
//! CLI entry point for simulations and configuration inspection.

use std::fs;

use clap::Parser;
use eyre::{Context, Result};
use tracing::{debug, info};

use stochastic_combiner::cli::{Cli, Command, OutputFormat, get_log_path};
use stochastic_combiner::config::{Config, InputSpec};
use stochastic_combiner::simulate::run_simulation;

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    let log_path = get_log_path();
    if let Some(log_dir) = log_path.parent() {
        fs::create_dir_all(log_dir).context("Failed to create log directory")?;
    }

    // Priority: CLI --log-level > config file > default (INFO)
    let level = match cli_log_level.or(config_log_level) {
        Some(s) => match s.to_uppercase().as_str() {
            "TRACE" => tracing::Level::TRACE,
            "DEBUG" => tracing::Level::DEBUG,
            "INFO" => tracing::Level::INFO,
            "WARN" | "WARNING" => tracing::Level::WARN,
            "ERROR" => tracing::Level::ERROR,
            _ => {
                eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", s);
                tracing::Level::INFO
            }
        },
        None => tracing::Level::INFO,
    };

    let log_file = fs::File::create(&log_path).context("Failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    setup_logging(cli.log_level.as_deref(), config.log_level.as_deref()).context("Failed to setup logging")?;

    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command {
        Command::Simulate {
            input,
            take,
            seed,
            format,
        } => cmd_simulate(config, input, take, seed, format).await,
        Command::Config => cmd_config(&config),
    }
}

/// Run a simulation with CLI overrides applied on top of the config
async fn cmd_simulate(
    mut config: Config,
    inputs: Vec<InputSpec>,
    take: Option<usize>,
    seed: Option<u64>,
    format: OutputFormat,
) -> Result<()> {
    debug!(?inputs, ?take, ?seed, %format, "cmd_simulate: called");
    if !inputs.is_empty() {
        config.simulation.inputs = inputs;
    }
    if let Some(take) = take {
        config.simulation.take = take;
    }
    if seed.is_some() {
        config.combiner.seed = seed;
    }

    let report = run_simulation(&config.combiner, &config.simulation).await?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Text => print!("{}", report.render_text()),
    }
    Ok(())
}

/// Print the effective configuration
fn cmd_config(config: &Config) -> Result<()> {
    debug!("cmd_config: called");
    let yaml = serde_yaml::to_string(config).context("Failed to serialize config")?;
    print!("{}", yaml);
    Ok(())
}
