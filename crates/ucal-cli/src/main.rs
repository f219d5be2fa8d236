use std::error::Error;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;
use ucal_tes::UcalConfig;

use commands::{
    filter::{self, FilterArgs},
    partition::{self, PartitionArgs},
    status, summary,
};

mod commands;

#[derive(Parser, Debug)]
#[command(name = "ucal", about = "Experiment-run catalog and TES processing tools")]
struct Cli {
    /// YAML configuration selecting the catalog profile and directory layout.
    #[arg(long, global = true, default_value = "ucal.yaml")]
    config: PathBuf,
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print a structured overview of the catalog.
    Summary,
    /// Split the catalog along dimensions and print the leaves.
    Partition(PartitionArgs),
    /// Print runs matching the given constraints.
    Filter(FilterArgs),
    /// Report which runs already have processed outputs.
    Status,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // stdout carries command output
    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn dispatch(cli: &Cli) -> Result<(), Box<dyn Error>> {
    let config = UcalConfig::load(&cli.config)?;
    let catalog = config.catalog.open()?;
    let output = match &cli.command {
        Command::Summary => summary::run(&catalog)?,
        Command::Partition(args) => partition::run(args, &catalog)?,
        Command::Filter(args) => filter::run(args, &catalog)?,
        Command::Status => status::run(&config, &catalog)?,
    };
    println!("{output}");
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_json);
    match dispatch(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "command failed");
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}
