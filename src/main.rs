use anyhow::{anyhow, Context};
use clap::Parser;
use log::{debug, error, info, warn};
use monitrace::config::EngineConfig;
use monitrace::engine::PeriodicEmitter;
use monitrace::error::{ConfigError, ProcessorError};
use monitrace::routing::{GroupedProcessorFactory, ProcessorGroup, ProcessorRegistry};
use monitrace::{
    EventMonitor, Level, Monitor, MonitorKind, MonitoringEngine, Processor, TransactionMonitor,
    ValueMonitor,
};
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Command-line arguments for the monitrace demo
#[derive(Parser)]
#[command(
    name = "monitrace",
    about = "In-process instrumentation runtime demo",
    long_about = "Runs a synthetic workload through a monitoring engine and logs every \
                  completed monitor tree. Stops after the requested number of iterations \
                  or on Ctrl+C."
)]
struct Cli {
    /// Path to configuration file
    #[arg(
        short,
        long,
        value_name = "FILE",
        help = "Configuration file path (TOML format)"
    )]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(
        short,
        long,
        help = "Enable verbose logging output (sets RUST_LOG=debug)"
    )]
    verbose: bool,

    /// Number of workload iterations; runs until interrupted when omitted
    #[arg(short = 'n', long)]
    iterations: Option<u64>,

    /// Pause between workload iterations
    #[arg(long, default_value_t = 500)]
    interval_ms: u64,
}

impl Cli {
    /// Validate the CLI arguments
    ///
    /// Missing config files are not an error: `load_config` falls back to
    /// defaults for them.
    fn validate(&self) -> Result<(), String> {
        if let Some(ref config_path) = self.config {
            if config_path.exists() {
                if !config_path.is_file() {
                    return Err(format!(
                        "Configuration path is not a file: {}",
                        config_path.display()
                    ));
                }

                if let Some(extension) = config_path.extension() {
                    if extension != "toml" {
                        warn!(
                            "Configuration file does not have .toml extension: {}",
                            config_path.display()
                        );
                    }
                }
            }
        }

        if self.interval_ms == 0 {
            return Err("--interval-ms must be greater than 0".to_string());
        }

        Ok(())
    }

    /// Convert config path to string safely, handling non-UTF-8 paths
    fn config_path_str(&self) -> Result<Option<&str>, String> {
        match &self.config {
            Some(path) => match path.to_str() {
                Some(path_str) => Ok(Some(path_str)),
                None => Err(format!(
                    "Configuration file path contains invalid UTF-8 characters: {}",
                    path.display()
                )),
            },
            None => Ok(None),
        }
    }
}

/// Load configuration from file or use defaults
///
/// Unreadable and invalid files are reported and replaced by the default
/// configuration.
fn load_config(config_path: Option<&str>) -> EngineConfig {
    match config_path {
        Some(path) => {
            info!("Loading configuration from: {}", path);
            match EngineConfig::from_file(std::path::Path::new(path)) {
                Ok(config) => config,
                Err(ConfigError::ReadError(_)) => {
                    warn!(
                        "Configuration file '{}' not found or unreadable, using defaults",
                        path
                    );
                    EngineConfig::default()
                }
                Err(e) => {
                    error!("Configuration error in '{}': {}", path, e);
                    warn!("Using default configuration due to invalid config file");
                    EngineConfig::default()
                }
            }
        }
        None => {
            info!("Using default configuration");
            EngineConfig::default()
        }
    }
}

/// Logs each completed top-level monitor as a tree
struct LogTreeProcessor {
    processed: AtomicU64,
}

impl LogTreeProcessor {
    fn new() -> Self {
        Self {
            processed: AtomicU64::new(0),
        }
    }
}

impl Processor for LogTreeProcessor {
    fn name(&self) -> &str {
        "log"
    }

    fn shutdown(&self) -> Result<(), ProcessorError> {
        info!(
            "Log processor saw {} monitor(s)",
            self.processed.load(Ordering::Relaxed)
        );
        Ok(())
    }

    fn process(&self, monitor: &Monitor) -> Result<(), ProcessorError> {
        self.processed.fetch_add(1, Ordering::Relaxed);
        match monitor.kind() {
            MonitorKind::Transaction => {
                let failed = monitor.get_bool("failed").unwrap_or(true);
                let latency = monitor.get_i64("latency").unwrap_or_default();
                info!(
                    "{} ({} ms{}): {}",
                    monitor.name(),
                    latency,
                    if failed { ", failed" } else { "" },
                    monitor.render_tree()
                );
            }
            kind => debug!("{} {}: {:?}", kind.as_str(), monitor.name(), monitor.attributes().keys()),
        }
        Ok(())
    }
}

/// Records engine dispatch totals on a fixed interval
struct Heartbeat;

impl PeriodicEmitter for Heartbeat {
    fn name(&self) -> &str {
        "heartbeat"
    }

    fn interval(&self) -> Duration {
        Duration::from_secs(5)
    }

    fn emit(&self, engine: &MonitoringEngine) {
        let stats = engine.dispatch_stats();
        let heartbeat = ValueMonitor::with_level(
            engine,
            "monitrace.heartbeat",
            stats.submitted as i64,
            Level::Debug,
        );
        let _ = heartbeat.set("dropped", stats.dropped);
        let _ = heartbeat.set("failed", stats.failed);
        heartbeat.fire();
    }
}

/// One request: a transaction with a nested query and a few events
fn run_workload(engine: &MonitoringEngine, iteration: u64) {
    let request = TransactionMonitor::new(engine, "request");
    let _ = request.set_inheritable("requestId", format!("req-{}", iteration));

    let query = TransactionMonitor::with_level(engine, "db.query", Level::Debug);
    let _ = query.set("rows", (iteration % 17) as i64);
    if iteration % 7 == 6 {
        let failure = io::Error::new(io::ErrorKind::TimedOut, "query timed out");
        query.failed_due_to(&failure);
    } else {
        query.succeeded();
    }
    query.done();

    if iteration % 3 == 0 {
        let miss = EventMonitor::new(engine, "cache.miss");
        let _ = miss.set("key", format!("user:{}", iteration % 5));
        miss.fire();
    }

    if query.get_bool("failed").unwrap_or(false) {
        request.failed();
    } else {
        request.succeeded();
    }
    request.done();
}

fn build_engine(config: &EngineConfig) -> anyhow::Result<MonitoringEngine> {
    let log_processor: Arc<dyn Processor> = Arc::new(LogTreeProcessor::new());
    let mut registry = ProcessorRegistry::new();
    registry.register(Arc::clone(&log_processor));

    let engine = MonitoringEngine::from_config_with_registry(config, &registry)
        .context("Failed to configure monitoring engine")?;
    if config.groups.is_empty() {
        engine.set_processor_factory(Arc::new(
            GroupedProcessorFactory::new(engine.processor_level_overrides())
                .with_group(ProcessorGroup::new("default", vec![log_processor])),
        ));
    }
    engine.add_periodic_emitter(Arc::new(Heartbeat));
    Ok(engine)
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.verbose {
        std::env::set_var("RUST_LOG", "debug");
    }
    env_logger::init();

    info!("Starting monitrace demo");

    cli.validate()
        .map_err(|e| anyhow!("Invalid arguments: {}", e))?;
    let config_path = cli
        .config_path_str()
        .map_err(|e| anyhow!("Invalid configuration path: {}", e))?;
    let config = load_config(config_path);

    let engine = build_engine(&config)?;
    engine.startup();

    let running = Arc::new(AtomicBool::new(true));
    let handler_flag = Arc::clone(&running);
    ctrlc::set_handler(move || {
        info!("Received interrupt signal (SIGINT), shutting down gracefully...");
        handler_flag.store(false, Ordering::SeqCst);
    })
    .context("Error setting SIGINT handler for graceful shutdown")?;

    info!("Workload running. Press Ctrl+C to stop.");

    let interval = Duration::from_millis(cli.interval_ms);
    let mut iteration = 0;
    while running.load(Ordering::SeqCst) && cli.iterations.map_or(true, |n| iteration < n) {
        run_workload(&engine, iteration);
        iteration += 1;
        std::thread::sleep(interval);
    }

    engine.shutdown();
    let stats = engine.dispatch_stats();
    info!(
        "Demo finished after {} iteration(s): {} submitted, {} dropped, {} failed",
        iteration, stats.submitted, stats.dropped, stats.failed
    );
    Ok(())
}
