//! feed2social - distribute new feed items to social networks
//!
//! Runs one distribution pass per poll interval until it is told to stop,
//! or a single pass with `--once`.

use clap::Parser;
use libfeed2social::logging::{LogFormat, LoggingConfig};
use libfeed2social::{Config, Distributor, Feed2SocialError, Result, RunReport};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, Duration};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "feed2social")]
#[command(version)]
#[command(about = "Distribute new items from a content source to social networks")]
#[command(long_about = "\
feed2social - Distribute new items from a content source to social networks

DESCRIPTION:
    feed2social reads recent items from a Notion database (or a local
    SQLite file), composes a short post for each one, and publishes it to
    every enabled network that has not received it yet. Networks that
    succeed are recorded on the item so it is never posted there twice.

USAGE:
    # Run as a daemon, one pass per poll interval
    feed2social

    # One pass, then exit (for cron or CI)
    feed2social --once

    # Show what would be posted without posting or saving anything
    feed2social --once --dry-run

SIGNALS:
    SIGTERM, SIGINT - Graceful shutdown (finishes the current pass)

CONFIGURATION:
    Configuration file: ~/.config/feed2social/config.toml
    Override with --config or FEED2SOCIAL_CONFIG.

EXIT CODES:
    0 - Success
    1 - Run failed, or a delivery or save failed (--once)
    2 - Configuration or usage error
")]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Run a single distribution pass and exit
    #[arg(long)]
    once: bool,

    /// Compose posts and log them without publishing or saving
    #[arg(long)]
    dry_run: bool,

    /// Time between passes, e.g. 30m or 1h (overrides config)
    #[arg(long, value_name = "DURATION", value_parser = humantime::parse_duration)]
    poll_interval: Option<Duration>,

    /// Report format (text or json)
    #[arg(short, long, default_value = "text")]
    format: String,

    /// Log format (text, json or pretty)
    #[arg(long, value_name = "FORMAT")]
    log_format: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReportFormat {
    Text,
    Json,
}

impl std::str::FromStr for ReportFormat {
    type Err = Feed2SocialError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "text" => Ok(ReportFormat::Text),
            "json" => Ok(ReportFormat::Json),
            _ => Err(Feed2SocialError::InvalidInput(format!(
                "Invalid format: '{}'. Valid options: text, json",
                s
            ))),
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = init_logging(&cli) {
        eprintln!("Error: {}", e);
        std::process::exit(e.exit_code());
    }

    match run(cli).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            error!("{}", e);
            eprintln!("Error: {}", e);
            std::process::exit(e.exit_code());
        }
    }
}

fn init_logging(cli: &Cli) -> Result<()> {
    let mut logging = LoggingConfig::from_env(cli.verbose);
    if let Some(format) = &cli.log_format {
        logging.format = format
            .parse::<LogFormat>()
            .map_err(Feed2SocialError::InvalidInput)?;
    }
    logging.init();
    Ok(())
}

/// Returns the process exit code
async fn run(cli: Cli) -> Result<i32> {
    let format: ReportFormat = cli.format.parse()?;

    let config = match &cli.config {
        Some(path) => Config::load_from_path(path)?,
        None => Config::load()?,
    };
    let distributor = Distributor::from_config(&config, cli.dry_run).await?;

    info!(
        "feed2social starting with networks: {:?}",
        distributor.networks()
    );

    if cli.once {
        let report = distributor.run().await?;
        print_report(&report, format)?;
        return Ok(if report.is_clean() { 0 } else { 1 });
    }

    let poll_interval = match cli.poll_interval {
        Some(interval) => interval,
        None => config.poll_interval()?,
    };
    if poll_interval.is_zero() {
        return Err(Feed2SocialError::InvalidInput(
            "Poll interval must be greater than zero".to_string(),
        ));
    }
    info!("Poll interval: {}", humantime::format_duration(poll_interval));

    // Set up graceful shutdown
    let shutdown = Arc::new(AtomicBool::new(false));
    setup_signal_handlers(shutdown.clone())?;

    run_daemon_loop(&distributor, format, poll_interval, shutdown).await?;

    info!("feed2social stopped");
    Ok(0)
}

fn print_report(report: &RunReport, format: ReportFormat) -> Result<()> {
    match format {
        ReportFormat::Text => print!("{}", report),
        ReportFormat::Json => {
            let json = serde_json::to_string_pretty(report).map_err(|e| {
                Feed2SocialError::InvalidInput(format!("Failed to serialize report: {}", e))
            })?;
            println!("{}", json);
        }
    }
    Ok(())
}

/// Set up signal handlers for graceful shutdown
#[cfg(unix)]
fn setup_signal_handlers(shutdown: Arc<AtomicBool>) -> Result<()> {
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM]).map_err(|e| {
        Feed2SocialError::InvalidInput(format!("Signal setup failed: {}", e))
    })?;

    std::thread::spawn(move || {
        if signals.forever().next().is_some() {
            info!("Received shutdown signal, stopping after the current pass...");
            shutdown.store(true, Ordering::Relaxed);
        }
    });

    Ok(())
}

#[cfg(not(unix))]
fn setup_signal_handlers(_shutdown: Arc<AtomicBool>) -> Result<()> {
    Ok(())
}

/// One pass per `poll_interval` until shutdown is requested
///
/// A failed pass is logged and retried on the next tick; delivery state
/// lives in the source, so nothing is lost between passes.
async fn run_daemon_loop(
    distributor: &Distributor,
    format: ReportFormat,
    poll_interval: Duration,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    loop {
        if shutdown.load(Ordering::Relaxed) {
            info!("Shutdown requested, stopping daemon loop");
            break;
        }

        match distributor.run().await {
            Ok(report) => print_report(&report, format)?,
            Err(e) => error!("Distribution run failed: {}", e),
        }

        // Sleep until the next pass, checking for shutdown every second
        let deadline = Instant::now() + poll_interval;
        while !shutdown.load(Ordering::Relaxed) {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            sleep(remaining.min(Duration::from_secs(1))).await;
        }
    }

    Ok(())
}
