//! Watchdog demonstration
//!
//! Registers one instance backed by a [`ThreadScheduler`], blocks its UI
//! thread for a while with an input event outstanding, and lets the watchdog
//! walk through warning, freeze, ANR and recovery.
//!
//! Usage:
//!   watchdog-demo [--config <path>] [--stall-ms <ms>] [--fast] [--json] [--verbose]

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Context;
use thread_watchdog::logging::{LogLevel, LogOutput, LoggingConfig, LoggingSystem};
use thread_watchdog::watchdog::{
    AnrReport, ChannelSink, DiagnosticEvent, DiagnosticsSink, TracingSink, WatchTarget,
};
use thread_watchdog::{TaskScheduler, ThreadRole, ThreadScheduler, WatchDog, WatchdogConfig};

const DEMO_INSTANCE: i32 = 1;

/// Command line arguments
struct Args {
    /// Watchdog configuration file
    config: Option<PathBuf>,
    /// How long the UI thread stays blocked
    stall_ms: Option<u64>,
    /// Use sub-second check periods
    fast: bool,
    /// Print every diagnostic event as JSON on stdout
    json: bool,
    verbose: bool,
}

impl Args {
    fn parse() -> Result<Self, String> {
        let mut args = std::env::args().skip(1);
        let mut parsed = Self {
            config: None,
            stall_ms: None,
            fast: false,
            json: false,
            verbose: false,
        };

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--config" | "-c" => {
                    let path = args.next().ok_or("--config needs a path")?;
                    parsed.config = Some(PathBuf::from(path));
                }
                "--stall-ms" | "-s" => {
                    let value = args.next().ok_or("--stall-ms needs a value")?;
                    parsed.stall_ms = Some(value.parse().map_err(|_| "Invalid stall value")?);
                }
                "--fast" | "-f" => parsed.fast = true,
                "--json" | "-j" => parsed.json = true,
                "--verbose" | "-v" => parsed.verbose = true,
                "--help" | "-h" => {
                    print_help();
                    std::process::exit(0);
                }
                _ => return Err(format!("Unknown argument: {}", arg)),
            }
        }

        Ok(parsed)
    }
}

fn print_help() {
    println!(
        r#"Thread Watchdog - demonstration

USAGE:
    watchdog-demo [OPTIONS]

OPTIONS:
    -c, --config <PATH>     Load the watchdog configuration from a JSON file
    -s, --stall-ms <MS>     How long to block the UI thread (default: long
                            enough to reach an ANR)
    -f, --fast              Use 300/200/100 ms check periods and a 500 ms ANR
                            threshold
    -j, --json              Print every diagnostic event as JSON
    -v, --verbose           Enable debug logging
    -h, --help              Print this help message
"#
    );
}

/// Logs every finding and forwards it to a channel
struct TeeSink {
    log: TracingSink,
    channel: ChannelSink,
}

impl DiagnosticsSink for TeeSink {
    fn report_warning(&self, target: WatchTarget) {
        self.log.report_warning(target);
        self.channel.report_warning(target);
    }

    fn report_freeze(&self, target: WatchTarget, message: &str) {
        self.log.report_freeze(target, message);
        self.channel.report_freeze(target, message);
    }

    fn report_recovered(&self, target: WatchTarget) {
        self.log.report_recovered(target);
        self.channel.report_recovered(target);
    }

    fn report_anr(&self, report: &AnrReport) {
        self.log.report_anr(report);
        self.channel.report_anr(report);
    }

    fn show_anr_dialog(&self, target: WatchTarget) {
        self.log.show_anr_dialog(target);
        self.channel.show_anr_dialog(target);
    }
}

fn load_config(args: &Args) -> anyhow::Result<WatchdogConfig> {
    let mut config = match &args.config {
        Some(path) => WatchdogConfig::load(path)
            .with_context(|| format!("loading watchdog config from {}", path.display()))?,
        None => WatchdogConfig::default(),
    };

    if args.fast {
        config = config
            .with_periods(
                Duration::from_millis(300),
                Duration::from_millis(200),
                Duration::from_millis(100),
            )
            .with_anr_input_freeze_time(Duration::from_millis(500));
    }

    config.validate().context("invalid watchdog config")?;
    Ok(config)
}

/// Long enough to pass warning, freeze and the ANR threshold
fn default_stall(config: &WatchdogConfig) -> Duration {
    config.anr_input_freeze_time()
        + config.normal_check_period()
        + config.warning_check_period()
        + config.freeze_check_period() * 2
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse().map_err(anyhow::Error::msg)?;

    let logging = LoggingConfig::development()
        .with_output(LogOutput::Console)
        .with_level(if args.verbose {
            LogLevel::Debug
        } else {
            LogLevel::Info
        })
        .with_file_info(false);
    let _logging = LoggingSystem::init(logging).context("initializing logging")?;

    let config = load_config(&args)?;
    let stall = args
        .stall_ms
        .map(Duration::from_millis)
        .unwrap_or_else(|| default_stall(&config));
    let settle = config.normal_check_period() + config.warning_check_period();

    let (channel, mut events) = ChannelSink::new();
    let watchdog = WatchDog::builder()
        .with_config(config)
        .with_sink(Arc::new(TeeSink {
            log: TracingSink,
            channel,
        }))
        .with_garbage_collector(Arc::new(|| tracing::info!("Garbage collection requested")))
        .start()
        .context("starting watchdog")?;

    let threads = Arc::new(ThreadScheduler::new("demo").context("starting demo threads")?);
    let scheduler: Arc<dyn TaskScheduler> = threads.clone();
    watchdog.register(DEMO_INSTANCE, &scheduler, threads.shares_ui_and_script_thread());

    tracing::info!("Letting the watchdog establish a baseline");
    thread::sleep(settle);

    tracing::info!(stall = ?stall, "Blocking the UI thread");
    watchdog.buried_bomb(DEMO_INSTANCE, Instant::now());
    scheduler
        .post_task(Box::new(move || thread::sleep(stall)), ThreadRole::Ui)
        .context("posting stall task")?;

    thread::sleep(stall);
    // Wait for the stall task to finish before defusing
    scheduler
        .post_sync_task(Box::new(|| {}), ThreadRole::Ui)
        .context("draining UI thread")?;
    watchdog.defusing_bomb(DEMO_INSTANCE);

    tracing::info!("UI thread resumed, waiting for recovery");
    thread::sleep(settle);

    if let Some(snapshot) = watchdog.snapshot(DEMO_INSTANCE, ThreadRole::Ui) {
        tracing::info!(severity = %snapshot.severity, "Final UI thread state");
    }

    watchdog.unregister(DEMO_INSTANCE);
    watchdog.shutdown();
    threads.shutdown();

    let mut count = 0;
    while let Ok(event) = events.try_recv() {
        count += 1;
        if args.json {
            println!("{}", event.to_json()?);
        } else if let DiagnosticEvent::Anr(report) = &event {
            tracing::info!(id = %report.id, pending_for_ms = report.pending_for_ms, "ANR report");
        }
    }

    let stats = watchdog.stats();
    tracing::info!(events = count, "Demo finished");
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}
