use chair_dispatch::application::engine::DispatchEngine;
use chair_dispatch::config::DispatchConfig;
use chair_dispatch::infrastructure::in_memory::{InMemoryCoreStore, InMemoryStatusStore};
use chair_dispatch::infrastructure::payment_gateway::HttpPaymentGateway;
use chair_dispatch::interfaces::csv::ride_writer::RideWriter;
use chair_dispatch::interfaces::csv::scenario_reader::ScenarioReader;
use chair_dispatch::interfaces::csv::scenario_runner::ScenarioRunner;
use clap::Parser;
use miette::{IntoDiagnostic, Result};
use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Scenario CSV file
    input: PathBuf,

    /// JSON configuration file (optional). Missing fields keep their defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Payment gateway base URL, used when no `payment_gateway_url` setting exists.
    #[arg(long)]
    payment_gateway_url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr; stdout carries the report.
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let cli = Cli::parse();

    let mut config = match cli.config {
        Some(path) => DispatchConfig::from_json_file(path).into_diagnostic()?,
        None => DispatchConfig::default(),
    };
    if let Some(url) = cli.payment_gateway_url {
        config.payment.gateway_url = Some(url);
    }

    let core = Arc::new(InMemoryCoreStore::new());
    let status = Arc::new(InMemoryStatusStore::new());
    let gateway = Arc::new(HttpPaymentGateway::new().into_diagnostic()?);
    let engine = DispatchEngine::new(config, core.clone(), status.clone(), gateway);
    let mut runner = ScenarioRunner::new(engine, core, status);

    // Replay the scenario
    let file = File::open(cli.input).into_diagnostic()?;
    let reader = ScenarioReader::new(file);
    for step_result in reader.steps() {
        match step_result {
            Ok(step) => {
                if let Err(e) = runner.apply(step).await {
                    if e.is_client_error() {
                        warn!(error = %e, "step rejected");
                    } else {
                        error!(error = %e, "step failed");
                    }
                    eprintln!("Error processing step: {}", e.public_message());
                }
            }
            Err(e) => {
                warn!(error = %e, "unreadable step");
                eprintln!("Error reading step: {}", e.public_message());
            }
        }
    }

    let rides = runner.report().await.into_diagnostic()?;

    let stdout = io::stdout();
    let mut writer = RideWriter::new(stdout.lock());
    writer.write_rides(rides).into_diagnostic()?;

    Ok(())
}
