//! prom2statsd - Prometheus to DogStatsD bridge daemon.
//!
//! Scrapes a Prometheus text endpoint every interval and forwards the samples
//! to a DogStatsD agent. The first SIGINT/SIGTERM lets the current cycle finish
//! and drains the sink; a second one exits immediately.

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;
#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::Directive;

use prom2statsd::config::{
    Config, DEFAULT_METRICS_ENDPOINT, DEFAULT_POLL_INTERVAL_SECS, DEFAULT_SHUTDOWN_TIMEOUT_SECS,
    DEFAULT_STATSD_ADDRESS, LogFormat, LogLevel,
};
use prom2statsd::filter::ExclusionRules;
use prom2statsd::scheduler::{Poller, ShutdownError, StopSignal, Worker};
use prom2statsd::sink::StatsdSink;
use prom2statsd::source::HttpSource;

/// Prometheus to DogStatsD bridge.
#[derive(Parser)]
#[command(name = "prom2statsd", about = "Prometheus to DogStatsD bridge", version)]
struct Args {
    /// Endpoint to scrape, e.g. 'http://localhost:2112/metrics'.
    /// Must expose metrics in the Prometheus text format.
    #[arg(long, env = "PROM2STATSD_METRICS_ENDPOINT", default_value = DEFAULT_METRICS_ENDPOINT)]
    metrics_endpoint: String,

    /// DogStatsD agent address, e.g. 'localhost:8125'.
    #[arg(long, env = "PROM2STATSD_STATSD_ADDRESS", default_value = DEFAULT_STATSD_ADDRESS)]
    statsd_address: String,

    /// Scraping interval in seconds.
    #[arg(long, env = "PROM2STATSD_SCRAPING_INTERVAL", default_value_t = DEFAULT_POLL_INTERVAL_SECS)]
    scraping_interval: u64,

    /// Seconds to wait for the running cycle to drain before warning.
    /// Shutdown keeps waiting afterwards; a second signal forces exit.
    #[arg(long, env = "PROM2STATSD_SHUTDOWN_TIMEOUT", default_value_t = DEFAULT_SHUTDOWN_TIMEOUT_SECS)]
    shutdown_timeout: u64,

    /// Log level.
    #[arg(long, env = "PROM2STATSD_LOG_LEVEL", value_enum, default_value_t = LogLevel::Debug)]
    log_level: LogLevel,

    /// Log output format.
    #[arg(long, env = "PROM2STATSD_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Comma separated prefixes of metrics to skip, e.g. 'test_,xxx_,www_'.
    #[arg(long, env = "PROM2STATSD_EXCLUDE", default_value = "")]
    exclude: String,
}

impl Args {
    fn into_config(self) -> Config {
        Config {
            source_endpoint: self.metrics_endpoint,
            sink_address: self.statsd_address,
            poll_interval: Duration::from_secs(self.scraping_interval),
            shutdown_timeout: Duration::from_secs(self.shutdown_timeout),
            log_level: self.log_level,
            exclusion: ExclusionRules::parse_list(&self.exclude),
        }
    }
}

/// Initializes the tracing subscriber on stderr. `RUST_LOG` directives are
/// honored on top of the configured level.
fn init_logging(level: LogLevel, format: LogFormat) {
    let level = level.as_tracing_level();
    let mut filter = EnvFilter::from_default_env();
    match format!("prom2statsd={}", level).parse::<Directive>() {
        Ok(directive) => filter = filter.add_directive(directive),
        Err(e) => eprintln!("invalid log directive: {}", e),
    }

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

/// Setup graceful shutdown: first signal raises `stop`, second exits.
fn install_signal_handler(stop: StopSignal) -> Result<(), ctrlc::Error> {
    let signals = Arc::new(AtomicUsize::new(0));
    ctrlc::set_handler(move || {
        if signals.fetch_add(1, Ordering::SeqCst) == 0 {
            info!("Received shutdown signal");
            stop.raise();
        } else {
            warn!("Received second shutdown signal, exiting immediately");
            std::process::exit(1);
        }
    })
}

fn main() {
    let args = Args::parse();
    init_logging(args.log_level, args.log_format);

    let config = args.into_config();
    if let Err(e) = config.validate() {
        error!("{}", e);
        std::process::exit(1);
    }

    info!("prom2statsd {} starting", env!("CARGO_PKG_VERSION"));
    info!(
        "Config: endpoint={}, statsd={}, interval={}s, shutdown_timeout={}s",
        config.source_endpoint,
        config.sink_address,
        config.poll_interval.as_secs(),
        config.shutdown_timeout.as_secs()
    );
    if !config.exclusion.is_empty() {
        info!("Excluded prefixes: {}", config.exclusion.prefixes().join(","));
    }

    // A scrape slower than the interval is abandoned.
    let source = match HttpSource::new(config.poll_interval) {
        Ok(source) => source,
        Err(e) => {
            error!(error = %e, "creating HTTP client");
            std::process::exit(1);
        }
    };
    let sink = match StatsdSink::connect(&config.sink_address) {
        Ok(sink) => sink,
        Err(e) => {
            error!(error = %e, address = %config.sink_address, "creating statsd client");
            std::process::exit(1);
        }
    };

    // Without a handler nothing would ever raise `stop`.
    let stop = StopSignal::new();
    if let Err(e) = install_signal_handler(stop.clone()) {
        error!("Failed to set signal handler: {}", e);
        std::process::exit(1);
    }

    let poller = Poller::new(
        source,
        sink,
        config.source_endpoint.clone(),
        config.exclusion.clone(),
    );
    let mut worker = match Worker::start(poller, config.poll_interval, stop.clone()) {
        Ok(worker) => worker,
        Err(e) => {
            error!(error = %e, "failed to start poll loop");
            std::process::exit(1);
        }
    };
    info!("Starting scraping loop");

    stop.wait();
    info!("Shutting down...");

    let result = match worker.close_timeout(config.shutdown_timeout) {
        Err(ShutdownError::Timeout(timeout)) => {
            warn!(
                timeout_secs = timeout.as_secs(),
                "Poll loop still draining after shutdown timeout, still waiting (send the signal again to force exit)"
            );
            worker.close()
        }
        result => result,
    };
    match result {
        Ok(report) => info!(
            cycles = report.cycles,
            sink_closed = report.sink_closed,
            "Shutdown complete"
        ),
        Err(e) => {
            error!(error = %e, "graceful shutdown failed");
            std::process::exit(1);
        }
    }
}
