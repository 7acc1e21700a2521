use checkout_flow::interfaces::json::scenario_reader::Scenario;
use checkout_flow::interfaces::json::transition_writer::TransitionWriter;
use clap::Parser;
use miette::{IntoDiagnostic, Result};
use std::fs::File;
use std::io;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Scenario JSON file: checkout configuration, scripted backend and steps
    scenario: PathBuf,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, default_value = "warn")]
    log: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cli.log))
        .into_diagnostic()?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    let file = File::open(&cli.scenario).into_diagnostic()?;
    let scenario = Scenario::from_reader(file).into_diagnostic()?;
    let states = scenario.play().await.into_diagnostic()?;

    // Output every state the checkout went through
    let stdout = io::stdout();
    let mut writer = TransitionWriter::new(stdout.lock());
    writer.write_transitions(&states).into_diagnostic()?;

    Ok(())
}
