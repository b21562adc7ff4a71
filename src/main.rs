//! `resilience-kit` command line.
//!
//! ```text
//! resilience-kit check <config>
//!     load → validate → print effective configuration as JSON
//!
//! resilience-kit demo [--config <file>] [--failures N] [--rounds N] [--watch]
//!     flaky upstream
//!     → Pipeline (bulkhead → breaker → retry → cache) + fallback chain
//!     → print health report and component status as JSON
//!     --watch: keep running health checks and config reloads until Ctrl+C
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use resilience_kit::cache::CacheAside;
use resilience_kit::config::{load_config, spawn_registry_reload, ConfigWatcher, ToolkitConfig};
use resilience_kit::error::{ResilienceError, Result as ResilienceResult};
use resilience_kit::health::HealthMonitor;
use resilience_kit::lifecycle::{wait_for_shutdown_signal, Shutdown};
use resilience_kit::observability::{logging, metrics};
use resilience_kit::resilience::{CircuitState, FallbackChain, Pipeline, ResilienceRegistry};

const DEMO_RESOURCE: &str = "upstream";
const DEMO_KEY: &str = "profile:42";

#[derive(Parser)]
#[command(name = "resilience-kit")]
#[command(about = "Resilience toolkit: config checks and a simulated failure demo", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a config file and print the effective configuration
    Check {
        /// Path to the TOML configuration file
        config: PathBuf,
    },
    /// Drive a simulated flaky upstream through the full pipeline
    Demo {
        /// Optional TOML configuration file (defaults otherwise)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Number of upstream calls that fail before it recovers
        #[arg(long, default_value_t = 3)]
        failures: u32,

        /// Number of pipeline calls to make
        #[arg(long, default_value_t = 5)]
        rounds: u32,

        /// Keep running health checks (and config reloads) until Ctrl+C
        #[arg(long)]
        watch: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Check { config } => {
            let config = load_config(&config)?;
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        Commands::Demo {
            config,
            failures,
            rounds,
            watch,
        } => {
            let toolkit_config = match &config {
                Some(path) => load_config(path)?,
                None => ToolkitConfig::default(),
            };
            run_demo(toolkit_config, config, failures, rounds, watch).await?;
        }
    }

    Ok(())
}

/// Upstream that fails a fixed number of times, then recovers.
struct FlakyUpstream {
    remaining_failures: AtomicU32,
    calls: AtomicU32,
}

impl FlakyUpstream {
    fn new(failures: u32) -> Self {
        Self {
            remaining_failures: AtomicU32::new(failures),
            calls: AtomicU32::new(0),
        }
    }

    async fn fetch(&self, key: &str) -> ResilienceResult<String> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let failing = self
            .remaining_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();

        if failing {
            tracing::debug!(call, "Simulated upstream failure");
            Err(ResilienceError::transient(format!("upstream unavailable (call {call})")))
        } else {
            Ok(format!("{key} loaded on call {call}"))
        }
    }
}

async fn run_demo(
    config: ToolkitConfig,
    config_path: Option<PathBuf>,
    failures: u32,
    rounds: u32,
    watch: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if let Err(e) = logging::init_logging(&config.observability) {
        eprintln!("Failed to initialize logging: {e}");
    }

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    tracing::info!(failures, rounds, watch, "resilience-kit demo starting");

    let shutdown = Shutdown::new();
    let registry = Arc::new(ResilienceRegistry::new(config.clone()));

    let cache = Arc::new(CacheAside::new(DEMO_RESOURCE, config.cache.clone()));
    let sweeper = cache.spawn_sweeper(config.cache.sweep_interval(), shutdown.subscribe());

    let fallbacks = Arc::new(FallbackChain::new());
    fallbacks.register(
        DEMO_KEY,
        || async { Ok::<_, ResilienceError>(format!("{DEMO_KEY} (static default)")) },
        0,
    );

    let pipeline = Pipeline::from_registry(&registry, DEMO_RESOURCE)
        .with_cache(cache.clone(), None)
        .with_fallback(fallbacks);

    let monitor = Arc::new(HealthMonitor::new(config.health.clone()));
    let breaker = registry.breaker(DEMO_RESOURCE);
    monitor.register_check("upstream_breaker", move || {
        let state = breaker.state();
        async move { Ok(state != CircuitState::Open) }
    });
    let bulkhead = registry.bulkhead(DEMO_RESOURCE);
    monitor.register_check("upstream_bulkhead", move || {
        let has_capacity = bulkhead.current_usage() < bulkhead.max_concurrent();
        async move { Ok(has_capacity) }
    });

    let upstream = FlakyUpstream::new(failures);
    for round in 1..=rounds {
        match pipeline.call(DEMO_KEY, || upstream.fetch(DEMO_KEY)).await {
            Ok(served) => tracing::info!(
                round,
                value = %served.value,
                served_by = ?served.served_by,
                "Round complete"
            ),
            Err(e) => tracing::warn!(round, error = %e, kind = e.kind(), "Round failed"),
        }
    }

    let summary = serde_json::json!({
        "health": monitor.run_checks().await,
        "breakers": registry.breaker_statuses(),
        "bulkheads": registry.bulkhead_statuses(),
        "cache": cache.stats(),
        "upstream_calls": upstream.calls.load(Ordering::SeqCst),
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);

    if watch {
        let monitor_task = tokio::spawn(
            monitor
                .clone()
                .run(config.health.interval(), shutdown.subscribe()),
        );

        // Keep the notify handle alive for the lifetime of the watch loop.
        let _watcher = match config_path {
            Some(path) => {
                let (watcher, updates) = ConfigWatcher::new(&path, config.clone());
                let handle = watcher.run()?;
                spawn_registry_reload(registry.clone(), updates, shutdown.subscribe());
                Some(handle)
            }
            None => None,
        };

        tracing::info!("Watching; press Ctrl+C to stop");
        wait_for_shutdown_signal().await;
        shutdown.trigger();
        monitor_task.await?;
    } else {
        shutdown.trigger();
    }

    sweeper.await?;
    tracing::info!("Shutdown complete");
    Ok(())
}
