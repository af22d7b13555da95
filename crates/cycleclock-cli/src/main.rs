//! cycleclock command-line diagnostic.
//!
//! Initializes the calibrated clock on this machine's cycle counter, runs
//! a number of calibration rounds one interval apart, and reports the
//! estimated frequency, the observed drift and the skew against the
//! platform monotonic clock.

mod report;

use anyhow::{Context, Result};
use clap::Parser;
use cycleclock_common::config::ClockConfig;
use cycleclock_core::{Clock, HardwareCounter, MonotonicClock, ReferenceClock};
use std::path::PathBuf;
use std::thread;
use tracing::{info, warn};

use crate::report::{format_text, ClockReport, RoundReport};

/// Environment variable naming a configuration file.
const CONFIG_ENV: &str = "CYCLECLOCK_CONFIG";

/// cycleclock command-line arguments.
#[derive(Parser, Debug)]
#[command(
    name = "cycleclock",
    about = "Calibrated cycle-counter clock - measure frequency, drift and skew",
    version,
    long_about = None
)]
struct Args {
    /// Path to a clock configuration file (TOML).
    #[arg(long, short = 'c', value_name = "FILE")]
    config: Option<PathBuf>,

    /// Warm-up span for the initial rate, e.g. "200ms" (overrides config file).
    #[arg(long, short = 'w', value_name = "DURATION")]
    warmup: Option<humantime::Duration>,

    /// Calibration interval, e.g. "1s" (overrides config file).
    #[arg(long, short = 'i', value_name = "DURATION")]
    interval: Option<humantime::Duration>,

    /// Calibration rounds to run.
    #[arg(long, short = 'r', default_value = "5")]
    rounds: u32,

    /// Print the report as JSON.
    #[arg(long)]
    json: bool,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, short = 'l', default_value = "warn")]
    log_level: String,
}

fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args.log_level);

    info!(version = env!("CARGO_PKG_VERSION"), "Starting cycleclock");

    let mut config = load_config(&args)?;
    if let Some(warmup) = args.warmup {
        config.warmup = warmup.into();
    }
    if let Some(interval) = args.interval {
        config.calibration_interval = interval.into();
    }
    config.validate().context("Invalid clock configuration")?;

    info!(?config.warmup, ?config.calibration_interval, "Configuration loaded");

    let report = run(&config, args.rounds)?;

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("Failed to serialize report")?
        );
    } else {
        print!("{}", format_text(&report));
    }
    Ok(())
}

/// Initialize logging with the specified log level.
fn init_logging(level: &str) {
    let filter = format!("cycleclock={level},cycleclock_core={level},cycleclock_common={level}");

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&filter)),
        )
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(true)
        .init();
}

/// Load configuration from file or use defaults.
///
/// Resolution priority:
/// 1. Command-line `--config` argument
/// 2. `CYCLECLOCK_CONFIG` environment variable
/// 3. Built-in defaults
fn load_config(args: &Args) -> Result<ClockConfig> {
    if let Some(config_path) = &args.config {
        info!(?config_path, "Loading config from command-line argument");
        return ClockConfig::from_file(config_path)
            .with_context(|| format!("Failed to load config from {}", config_path.display()));
    }

    if let Ok(env_path) = std::env::var(CONFIG_ENV) {
        let config_path = PathBuf::from(&env_path);
        if config_path.exists() {
            info!(?config_path, "Loading config from {}", CONFIG_ENV);
            return ClockConfig::from_file(&config_path)
                .with_context(|| format!("Failed to load config from {CONFIG_ENV}={env_path}"));
        }
        warn!(
            path = %env_path,
            "{} set but file does not exist, using defaults", CONFIG_ENV
        );
    }

    info!("No config file given, using built-in defaults");
    Ok(ClockConfig::default())
}

/// Initialize the hardware clock and run the calibration rounds.
fn run(config: &ClockConfig, rounds: u32) -> Result<ClockReport> {
    let mut clock = Clock::hardware(config).context("Failed to initialize cycle clock")?;

    let initial_frequency_hz = clock.frequency_hz();
    let initial_skew_ns = measure_skew(&clock)?;
    info!(
        frequency_hz = initial_frequency_hz,
        skew_ns = initial_skew_ns,
        source = HardwareCounter::SOURCE,
        "Clock initialized"
    );

    let mut round_reports = Vec::with_capacity(rounds as usize);
    for round in 1..=rounds {
        thread::sleep(config.calibration_interval);

        let result = clock.calibrate();
        if let Err(e) = &result {
            warn!(round, error = %e, "Calibration failed");
        }
        let skew_ns = measure_skew(&clock)?;
        round_reports.push(RoundReport::new(
            round,
            result,
            clock.frequency_hz(),
            skew_ns,
        ));
    }

    Ok(ClockReport {
        counter_source: HardwareCounter::SOURCE,
        warmup_ns: config.warmup_ns(),
        calibration_interval_ns: config.calibration_interval_ns(),
        initial_frequency_hz,
        initial_skew_ns,
        rounds: round_reports,
        error_spread_ns: clock.metrics().error_spread_ns(),
        metrics: clock.metrics().clone(),
    })
}

/// `now_ns` minus the midpoint of two bracketing reference reads.
#[allow(clippy::cast_possible_wrap)]
fn measure_skew(clock: &Clock<HardwareCounter, MonotonicClock>) -> Result<i64> {
    let reference = clock.calibrator().reference();
    let before = reference
        .read_ns()
        .context("Failed to read reference clock")?;
    let now = clock.now_ns();
    let after = reference
        .read_ns()
        .context("Failed to read reference clock")?;

    let midpoint = before + after.saturating_sub(before) / 2;
    Ok(now.wrapping_sub(midpoint) as i64)
}
