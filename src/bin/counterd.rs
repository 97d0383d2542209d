//! counterd - kernel counter collector daemon.
//!
//! Reads ZFS ARC and memory counters from the platform's native backend once
//! per interval and writes every record to stdout as a JSON line.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use clap::{Parser, ValueEnum};
use tracing::{Level, debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use counterd::collector::native::{self, NativePaths};
use counterd::collector::{CycleReporter, MemoryOptions, MetricSource};
use counterd::dispatch::{Dispatch, JsonLinesDispatcher};

/// Metric source selectable on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum SourceName {
    Memory,
    Arc,
}

/// Kernel counter collector daemon.
#[derive(Parser)]
#[command(name = "counterd", about = "Kernel counter collector daemon", version)]
struct Args {
    /// Collection interval in seconds.
    #[arg(short, long, default_value = "10")]
    interval: u64,

    /// Path to /proc filesystem (counter-file backend only).
    #[arg(long, default_value = "/proc")]
    proc_path: PathBuf,

    /// Path to the ZFS arcstats file (counter-file backend only).
    #[arg(long, default_value = "/proc/spl/kstat/zfs/arcstats")]
    arcstats_path: PathBuf,

    /// Sources to read. Repeat to select several; default is all.
    #[arg(long = "source", value_enum)]
    sources: Vec<SourceName>,

    /// Dispatch memory usage in bytes. Disable with --values-absolute=false.
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    values_absolute: bool,

    /// Dispatch memory usage as percentages.
    #[arg(long)]
    values_percentage: bool,

    /// Increase logging verbosity (-v for debug, -vv for trace). Default is info level.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode - only show errors.
    #[arg(short, long)]
    quiet: bool,
}

/// Initializes the tracing subscriber with the appropriate log level.
/// Default level is INFO. Use -q for quiet mode (errors only).
fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let mut filter = EnvFilter::from_default_env();
    if let Ok(directive) = format!("counterd={}", level).parse() {
        filter = filter.add_directive(directive);
    }

    // Records go to stdout, so diagnostics must not.
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn build_sources(args: &Args) -> Vec<Box<dyn MetricSource>> {
    let paths = NativePaths {
        proc_path: args.proc_path.clone(),
        arcstats_path: args.arcstats_path.clone(),
    };
    let options = MemoryOptions {
        values_absolute: args.values_absolute,
        values_percentage: args.values_percentage,
    };
    let selected = if args.sources.is_empty() {
        vec![SourceName::Memory, SourceName::Arc]
    } else {
        args.sources.clone()
    };

    let mut sources: Vec<Box<dyn MetricSource>> = Vec::new();
    for name in selected {
        match name {
            SourceName::Memory => match native::memory_source(&paths, options) {
                Ok(source) => sources.push(Box::new(source)),
                Err(e) => error!("memory source disabled: {}", e),
            },
            SourceName::Arc => sources.push(Box::new(native::arc_source(&paths))),
        }
    }
    sources
}

/// Reads every source once, each on its own thread.
fn run_cycle(sources: &mut [(Box<dyn MetricSource>, CycleReporter)], dispatcher: &dyn Dispatch) {
    let started = Instant::now();
    std::thread::scope(|scope| {
        for (source, reporter) in sources.iter_mut() {
            scope.spawn(move || {
                let result = source.read(dispatcher);
                reporter.report(source.name(), &result);
            });
        }
    });
    debug!("Cycle finished in {:?}", started.elapsed());
}

fn main() {
    let args = Args::parse();

    init_logging(args.verbose, args.quiet);

    info!("counterd {} starting", env!("CARGO_PKG_VERSION"));
    info!(
        "Config: interval={}s, backend={}, proc={}",
        args.interval,
        native::backend_kind(),
        args.proc_path.display()
    );

    let mut sources: Vec<(Box<dyn MetricSource>, CycleReporter)> = build_sources(&args)
        .into_iter()
        .map(|source| (source, CycleReporter::new()))
        .collect();
    if sources.is_empty() {
        error!("No sources configured, exiting");
        return;
    }
    let names: Vec<&str> = sources.iter().map(|(s, _)| s.name()).collect();
    info!("Sources: {}", names.join(", "));

    let dispatcher = JsonLinesDispatcher::stdout();
    let interval = Duration::from_secs(args.interval);

    // Setup graceful shutdown
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();

    if let Err(e) = ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        r.store(false, Ordering::SeqCst);
    }) {
        warn!("Failed to set Ctrl-C handler: {}", e);
    }

    info!("Starting collection loop");

    while running.load(Ordering::SeqCst) {
        run_cycle(&mut sources, &dispatcher);

        // Sleep with periodic checks for shutdown signal
        let sleep_interval = Duration::from_millis(100);
        let mut remaining = interval;
        while remaining > Duration::ZERO && running.load(Ordering::SeqCst) {
            let sleep_time = remaining.min(sleep_interval);
            std::thread::sleep(sleep_time);
            remaining = remaining.saturating_sub(sleep_time);
        }
    }

    info!("Shutdown complete");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn args_default_to_all_sources() {
        let args = Args::parse_from(["counterd"]);
        assert_eq!(args.interval, 10);
        assert!(args.values_absolute);
        assert!(!args.values_percentage);
        assert!(args.sources.is_empty());
    }

    #[test]
    fn args_parse_sources_and_flags() {
        let args = Args::parse_from([
            "counterd",
            "--source",
            "arc",
            "--values-absolute=false",
            "--values-percentage",
            "-vv",
        ]);
        assert_eq!(args.sources, vec![SourceName::Arc]);
        assert!(!args.values_absolute);
        assert!(args.values_percentage);
        assert_eq!(args.verbose, 2);
    }
}
