use std::{error::Error, path::PathBuf, time::Duration};

use clap::{Parser, ValueEnum};
use tracing::{debug, info};
use tracing_subscriber::{
    filter::LevelFilter, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter,
};

use report::Report;
use sim::Simulation;
use topology::Topology;

mod metrics;
mod report;
mod sim;
mod topology;

#[derive(Parser)]
#[command(version)]
struct Cli {
    /// Path to the topology file describing the simulated network.
    #[arg(short = 't', long = "topology")]
    topology: PathBuf,

    /// Simulated time to run, in seconds. Overrides the duration in the topology file.
    #[arg(long = "duration")]
    duration: Option<u64>,

    /// Seed for the random jitter of the routers. Overrides the seed in the topology file.
    #[arg(long = "seed")]
    seed: Option<u64>,

    /// Enable debug logging. Does nothing if `--silent` is set.
    #[arg(short = 'd', long = "debug", default_value_t = false)]
    debug: bool,

    /// Disable all logs except error logs.
    #[arg(long = "silent", default_value_t = false)]
    silent: bool,

    /// The format of the logs.
    #[arg(long = "log-format", value_enum, default_value_t = LogFormat::Compact)]
    log_format: LogFormat,

    /// Print the final state in json format.
    #[arg(long = "json")]
    json: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    /// Compact, colored output.
    Compact,
    /// Logfmt key value pairs.
    Logfmt,
    /// Full output without colors.
    Plain,
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    let level = if cli.silent {
        LevelFilter::ERROR
    } else if cli.debug {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();
    let registry = tracing_subscriber::registry().with(filter);
    match cli.log_format {
        LogFormat::Compact => registry
            .with(tracing_subscriber::fmt::layer().compact().with_target(false))
            .init(),
        LogFormat::Logfmt => registry.with(tracing_logfmt::layer()).init(),
        LogFormat::Plain => registry
            .with(tracing_subscriber::fmt::layer().with_ansi(false))
            .init(),
    }

    let topology = Topology::load(&cli.topology)?;
    debug!("Loaded topology with {} routers", topology.routers.len());

    let duration = Duration::from_secs(cli.duration.unwrap_or(topology.duration));
    let seed = cli.seed.unwrap_or(topology.seed);

    let mut simulation = Simulation::new(&topology, seed)?;
    info!("Running simulation for {duration:?}");
    simulation.start();
    simulation.run(duration);
    simulation.finish();

    let report = Report::collect(&mut simulation, &topology.probes);
    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        report.print_tables();
    }

    Ok(())
}
