mod simulated;

use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use opentelemetry_batch_windows::*;
use tokio_util::sync::CancellationToken;
use tracing::Level;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crate::simulated::{passthrough_request, SimulatedExecutor};

#[derive(Parser, Debug)]
#[command(name = "batch-scheduler")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Runs a simulated job queue and reports it as windowed OpenTelemetry spans", long_about = None)]
struct Cli {
    /// TOML file with aggregator settings. Flags override it.
    #[arg(long, env = "BATCH_CONFIG")]
    config: Option<PathBuf>,

    /// Number of jobs to run
    #[arg(long, env = "BATCH_JOBS", default_value_t = 1000)]
    jobs: u64,

    /// Simulated work per job, in milliseconds
    #[arg(long, env = "BATCH_JOB_DURATION_MS", default_value_t = 0)]
    job_duration_ms: u64,

    /// Write spans as JSON lines to this file instead of stdout
    #[arg(long, env = "BATCH_OUTPUT")]
    output: Option<PathBuf>,

    /// Identifier recorded on the startup span
    #[arg(long, env = "BATCH_RUN_ID", default_value_t = 1)]
    run_id: u64,

    #[arg(long, env = "BATCH_SERVICE_NAME")]
    service_name: Option<String>,

    #[arg(long, env = "BATCH_MAX_JOBS_PER_WINDOW")]
    max_jobs_per_window: Option<u64>,

    #[arg(long, env = "BATCH_MAX_WINDOW_DURATION_MS")]
    max_window_duration_ms: Option<u64>,

    /// `categorized` or `free-text`
    #[arg(long, env = "BATCH_ERROR_MODE")]
    error_mode: Option<ErrorMode>,

    /// `fan-out` or `count-only`
    #[arg(long, env = "BATCH_FREE_TEXT_POLICY")]
    free_text_policy: Option<FreeTextPolicy>,

    /// Emit one summary span for the run instead of window spans
    #[arg(long, env = "BATCH_SUMMARY_MODE")]
    summary_mode: bool,

    #[arg(long, env = "BATCH_WORKERS")]
    workers: Option<usize>,

    #[arg(long, env = "BATCH_SHUTDOWN_GRACE_PERIOD_MS")]
    shutdown_grace_period_ms: Option<u64>,

    /// `close-immediately` or `keep-open`
    #[arg(long, env = "BATCH_STARTUP_SPAN")]
    startup_span: Option<StartupSpanPolicy>,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn aggregator_config(&self) -> Result<AggregatorConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("could not read {}", path.display()))?;
                AggregatorConfig::from_toml_str(&text)
                    .with_context(|| format!("invalid configuration in {}", path.display()))?
            }
            None => AggregatorConfig::default(),
        };

        if let Some(name) = &self.service_name {
            config = config.with_service_name(name.clone());
        }
        if let Some(max_jobs) = self.max_jobs_per_window {
            config = config.with_max_jobs_per_window(max_jobs);
        }
        if let Some(ms) = self.max_window_duration_ms {
            config = config.with_max_window_duration(Duration::from_millis(ms));
        }
        if let Some(mode) = self.error_mode {
            config = config.with_error_mode(mode);
        }
        if let Some(policy) = self.free_text_policy {
            config = config.with_free_text_policy(policy);
        }
        if self.summary_mode {
            config = config.with_summary_mode(true);
        }
        if let Some(workers) = self.workers {
            config = config.with_workers(workers);
        }
        if let Some(ms) = self.shutdown_grace_period_ms {
            config = config.with_shutdown_grace_period(Duration::from_millis(ms));
        }
        if let Some(policy) = self.startup_span {
            config = config.with_startup_span(policy);
        }

        config.validate()?;
        Ok(config)
    }
}

fn init_logging(verbose: bool) -> Result<()> {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));

    // Stdout may be carrying spans, so logs go to stderr.
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

async fn run(cli: Cli, config: AggregatorConfig) -> Result<()> {
    let pipeline = new_pipeline(&config.service_name).with_async_runtime(PipelineRuntime::Tokio);
    let pipeline = match &cli.output {
        Some(path) => pipeline.with_json_exporter(
            File::create(path).with_context(|| format!("could not create {}", path.display()))?,
        ),
        None => pipeline.with_stdout_exporter(),
    };
    let backend = pipeline
        .install()
        .context("could not build the tracing backend")?;

    tracing::info!(service = %config.service_name, jobs = cli.jobs, "starting scheduler");

    let links = Arc::new(LinkRegistry::new());
    let startup = RunContext::evaluate(
        &backend.named_tracer("scheduler-startup"),
        &links,
        RunParameters {
            run_id: cli.run_id,
            queue_depth: cli.jobs,
        },
        config.startup_span,
    )?;

    let deferred = Arc::new(DeferredSpans::new(tokio::runtime::Handle::current()));
    let transport: Arc<dyn Transport> = Arc::new(LoggingTransport);
    let executor = Arc::new(SimulatedExecutor::new(
        backend.named_tracer("scheduler-worker"),
        deferred.clone(),
        transport.clone(),
        config.error_mode,
        Duration::from_millis(cli.job_duration_ms),
    ));

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupted; closing the open window");
                cancel.cancel();
            }
        }
    });

    let tracer = backend.named_tracer("scheduler-runner");
    let source = sequential_jobs(cli.jobs);
    let report = if config.summary_mode {
        AggregationDriver::new(SummaryEmitter::new(tracer, links.clone()), executor)
            .with_workers(config.workers)
            .with_cancellation(cancel)
            .run(source)
            .await?
    } else {
        AggregationDriver::new(WindowController::new(tracer, &config, links.clone()), executor)
            .with_workers(config.workers)
            .with_cancellation(cancel)
            .run(source)
            .await?
    };

    if !report.cancelled {
        passthrough_request(&backend.named_tracer("scheduler-passthrough"), transport.as_ref());
    }
    startup.finish();

    let drained = backend
        .shutdown(Some(&deferred), config.shutdown_grace_period)
        .await?;
    tracing::info!(
        jobs = report.jobs,
        failures = report.failures,
        windows = report.windows_closed,
        deferred_forced = drained.forced,
        "scheduler finished"
    );
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose)?;
    let config = cli.aggregator_config()?;

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(run(cli, config))
}
