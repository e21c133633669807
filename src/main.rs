//! Command-line entry point: load configuration, open the instrument, run one
//! sweep, and print or export the result.
use anyhow::{Context, Result};
use bode_sweep::config::{BodeConfig, TransportKind};
use bode_sweep::data::{write_csv, write_json};
use bode_sweep::hardware::{MsoScope, SessionSetup, SimulatedScope, TcpTransport, VisaTransport};
use bode_sweep::sweep::{FrequencyPoint, ResultSeries, Spacing, SweepController, SweepSettings};
use bode_sweep::traits::BodeInstrument;
use clap::{Parser, ValueEnum, ValueHint};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Autoranging Bode plot sweep")]
struct Cli {
    /// Configuration file; a missing file means built-in defaults
    #[arg(long, default_value = "config/bode.toml", value_hint = ValueHint::FilePath)]
    config: PathBuf,

    /// Use the simulated scope regardless of the configured transport
    #[arg(long)]
    simulate: bool,

    /// First frequency in Hz
    #[arg(long)]
    start_hz: Option<f64>,

    /// Last frequency in Hz
    #[arg(long)]
    stop_hz: Option<f64>,

    /// Number of points
    #[arg(long)]
    steps: Option<usize>,

    /// Logarithmic frequency spacing instead of linear
    #[arg(long)]
    log_spacing: bool,

    /// Write results here instead of printing a table
    #[arg(long, value_hint = ValueHint::FilePath)]
    output: Option<PathBuf>,

    /// Export format for --output
    #[arg(long, value_enum, default_value_t = OutputFormat::Csv)]
    format: OutputFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Csv,
    Json,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = BodeConfig::extract_from(&cli.config)
        .with_context(|| format!("Failed to load configuration from {:?}", cli.config))?;
    apply_overrides(&cli, &mut config);
    config
        .validate()
        .with_context(|| format!("Invalid configuration in {:?}", cli.config))?;

    init_tracing(&config.application.log_level);
    info!("{} starting", config.application.name);

    let settings = SweepSettings::from_config(&config)?;
    let mut instrument = open_instrument(&config).await?;

    match SweepController::new(instrument.as_mut(), settings).run().await {
        Ok(series) => report(&cli, &series),
        Err(failure) => {
            error!("{}", failure);
            report(&cli, &failure.partial)?;
            Err(failure.into())
        }
    }
}

fn init_tracing(log_level: &str) {
    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn apply_overrides(cli: &Cli, config: &mut BodeConfig) {
    if cli.simulate {
        config.instrument.transport = TransportKind::Simulated;
    }
    if let Some(start_hz) = cli.start_hz {
        config.sweep.start_hz = start_hz;
    }
    if let Some(stop_hz) = cli.stop_hz {
        config.sweep.stop_hz = stop_hz;
    }
    if let Some(steps) = cli.steps {
        config.sweep.steps = steps;
    }
    if cli.log_spacing {
        config.sweep.spacing = Spacing::Logarithmic;
    }
}

async fn open_instrument(config: &BodeConfig) -> Result<Box<dyn BodeInstrument>> {
    let resource = &config.instrument.resource;
    let timeout = Duration::from_millis(config.instrument.timeout_ms);
    let setup = SessionSetup::from_config(config);

    let instrument: Box<dyn BodeInstrument> = match config.instrument.transport {
        TransportKind::Simulated => Box::new(
            SimulatedScope::default().with_scales(setup.response_scale, setup.reference_scale),
        ),
        TransportKind::Tcp => {
            let transport = TcpTransport::connect(resource, timeout).await?;
            let mut scope = MsoScope::new(transport);
            scope
                .initialize(&setup)
                .await
                .context("Failed to initialize scope")?;
            Box::new(scope)
        }
        TransportKind::Visa => {
            let transport = VisaTransport::open(resource, timeout)?;
            let mut scope = MsoScope::new(transport);
            scope
                .initialize(&setup)
                .await
                .context("Failed to initialize scope")?;
            Box::new(scope)
        }
    };
    info!("Using {}", instrument.describe());
    Ok(instrument)
}

fn report(cli: &Cli, series: &ResultSeries) -> Result<()> {
    match (&cli.output, cli.format) {
        (Some(path), OutputFormat::Csv) => write_csv(series, path)?,
        (Some(path), OutputFormat::Json) => write_json(series, path)?,
        (None, _) => print_table(series),
    }
    Ok(())
}

fn print_table(series: &ResultSeries) {
    println!("{:>14} {:>12} {:>12}  notes", "frequency_hz", "gain_db", "phase_deg");
    for point in series {
        println!(
            "{:>14.1} {:>12.3} {:>12.2}  {}",
            point.frequency_hz,
            point.amplitude_db,
            point.phase_deg,
            notes(point)
        );
    }
}

fn notes(point: &FrequencyPoint) -> String {
    let mut notes = Vec::new();
    if point.ranging_failed {
        notes.push("ranging failed");
    }
    if point.amplitude_carried {
        notes.push("gain carried");
    }
    if point.phase_carried {
        notes.push("phase carried");
    }
    notes.join(", ")
}
