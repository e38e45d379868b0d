// Simulation binary.
//
// Parses the run parameters, installs the SIGINT/SIGTERM handlers, runs the simulation to its
// timeout (or until interrupted) and prints the analytics report.

use clap::Parser;
use log::LevelFilter;
use prodcon_sim::report::{self, Summary};
use prodcon_sim::{limits, signals, Simulation, SimulationConfig, SimulationError};
use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Duration;

const RULE: &str = "-----------------------------------------------------------------------------";

/// Bounded producer/consumer simulation with priority aging.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Number of producer threads
    #[arg(value_parser = clap::value_parser!(u32).range(limits::MIN_PRODUCERS as i64..=limits::MAX_PRODUCERS as i64))]
    producers: u32,

    /// Number of consumer threads
    #[arg(value_parser = clap::value_parser!(u32).range(limits::MIN_CONSUMERS as i64..=limits::MAX_RUNTIME_CONSUMERS as i64))]
    consumers: u32,

    /// Maximum queue capacity
    #[arg(value_parser = clap::value_parser!(u32).range(limits::MIN_QUEUE_SIZE as i64..=limits::MAX_QUEUE_SIZE as i64))]
    queue_size: u32,

    /// Runtime in seconds
    #[arg(value_parser = clap::value_parser!(u64).range(limits::MIN_TIMEOUT.as_secs()..))]
    timeout_secs: u64,

    /// Milliseconds of waiting that earn one priority level (0 disables aging)
    #[arg(short, long, default_value_t = 0)]
    aging: u64,

    /// RNG seed for reproducible runs
    #[arg(short, long)]
    seed: Option<u64>,

    /// Debug level 0-3: OFF, ERROR, INFO, TRACE (RUST_LOG overrides)
    #[arg(short, long, default_value_t = 0, value_parser = clap::value_parser!(u8).range(0..=3))]
    debug: u8,

    /// Upper bound of producer think-time in milliseconds
    #[arg(long, default_value_t = limits::MAX_PRODUCER_WAIT.as_millis() as u64)]
    producer_wait_ms: u64,

    /// Upper bound of consumer think-time in milliseconds
    #[arg(long, default_value_t = limits::MAX_CONSUMER_WAIT.as_millis() as u64)]
    consumer_wait_ms: u64,

    /// Export the occupancy trace to this CSV file
    #[arg(long)]
    csv: Option<PathBuf>,

    /// Print the report as JSON instead of text
    #[arg(long)]
    json: bool,
}

impl Args {
    fn config(&self) -> SimulationConfig {
        SimulationConfig {
            producers: self.producers as usize,
            consumers: self.consumers as usize,
            capacity: self.queue_size as usize,
            run_for: Duration::from_secs(self.timeout_secs),
            aging_interval: Duration::from_millis(self.aging),
            producer_max_wait: Duration::from_millis(self.producer_wait_ms),
            consumer_max_wait: Duration::from_millis(self.consumer_wait_ms),
            seed: self.seed,
            ..SimulationConfig::default()
        }
    }
}

fn level_filter(debug: u8) -> LevelFilter {
    match debug {
        0 => LevelFilter::Off,
        1 => LevelFilter::Error,
        2 => LevelFilter::Info,
        _ => LevelFilter::Trace,
    }
}

fn print_startup(out: &mut impl Write, args: &Args) -> io::Result<()> {
    writeln!(out, "\nProducer-Consumer Simulation")?;
    writeln!(out, "{RULE}")?;
    writeln!(out, "RUNTIME PARAMETERS")?;
    writeln!(out, "{RULE}")?;
    writeln!(out, "  Debug Level:  {}", args.debug)?;
    writeln!(out, "  Producers:    {}", args.producers)?;
    writeln!(out, "  Consumers:    {}", args.consumers)?;
    writeln!(out, "  Queue Size:   {}", args.queue_size)?;
    writeln!(out, "  Timeout:      {} seconds", args.timeout_secs)?;
    match args.aging {
        0 => writeln!(out, "  Aging:        off")?,
        ms => writeln!(out, "  Aging:        +1 level per {ms} ms")?,
    }
    if let Some(seed) = args.seed {
        writeln!(out, "  Seed:         {seed}")?;
    }
    writeln!(out)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    env_logger::Builder::new()
        .filter_level(level_filter(args.debug))
        .parse_default_env()
        .init();

    let simulation = Simulation::new(args.config())?;
    signals::install(simulation.coordinator()).map_err(SimulationError::Signal)?;

    let stdout = io::stdout();
    if !args.json {
        print_startup(&mut stdout.lock(), &args)?;
    }

    let run = simulation.run()?;
    signals::restore_default().map_err(SimulationError::Signal)?;

    let summary = Summary::build(&run);
    let mut out = stdout.lock();
    if args.json {
        summary.write_json(&mut out)?;
        writeln!(out)?;
    } else {
        summary.render_text(&mut out)?;
    }

    if let Some(path) = &args.csv {
        let rows = report::export_csv(&summary.samples, path)?;
        if !args.json {
            writeln!(out, "  Trace exported to: {} ({rows} samples)", path.display())?;
        }
    }

    if !summary.conserved {
        log::error!(
            "conservation check failed: produced {} != consumed {} + left {}",
            summary.produced,
            summary.consumed,
            summary.final_count
        );
    }
    Ok(())
}
