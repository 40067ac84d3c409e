use anyhow::{Context, Result};
use clap::Parser;
use inquiry_core::{
    BatchScheduler, CallExecutor, CallParams, ChannelObserver, Config, HttpTransport, MockTransport,
    ObserverEvent, RunMode, RunReport, RunRequest, SchedulerSettings, Transport,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "runner")]
#[command(about = "Lookup API test harness - issues a batch of calls and reports latency stats")]
struct Args {
    /// Path to configuration file
    #[arg(long, default_value = "config/example.local.toml")]
    config: PathBuf,

    /// Transport: mock or http
    #[arg(long, default_value = "mock")]
    transport: String,

    /// Number of calls (overrides config)
    #[arg(long)]
    count: Option<u64>,

    /// Dispatch mode: sequential or parallel (overrides config)
    #[arg(long)]
    mode: Option<String>,

    /// Parallel pool size (overrides config)
    #[arg(long)]
    concurrency: Option<usize>,

    /// Print progress at most every N milliseconds
    #[arg(long, default_value = "1000")]
    print_every_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let mut config = Config::from_file(&args.config)
        .with_context(|| format!("Failed to load config from {:?}", args.config))?;
    apply_overrides(&mut config, &args)?;

    let canary: Option<CallParams> = config.canary.as_ref().map(CallParams::from);
    info!("Target: {}{}", config.target.base_url, config.target.path);
    info!(
        "Batch: count={} mode={:?} concurrency={} params={:?}",
        config.batch.count, config.batch.mode, config.batch.concurrency, config.batch.params
    );

    let transport: Arc<dyn Transport> = match args.transport.as_str() {
        // Mock answers the canary NIN successfully and everything else with 404.
        "mock" => Arc::new(MockTransport::new(
            5,
            canary.as_ref().map(|c| c.nin.clone()).unwrap_or_default(),
        )),
        "http" => Arc::new(
            HttpTransport::new(&config.target.base_url, &config.target.path, config.target.timeout_ms)
                .context("Failed to create HTTP transport")?,
        ),
        other => anyhow::bail!("Invalid transport: {}, must be 'mock' or 'http'", other),
    };
    info!("Using transport: {}", transport.name());

    let scheduler = BatchScheduler::new(
        CallExecutor::new(transport),
        Arc::new(canary),
        SchedulerSettings::from(&config),
    );

    let (observer, events) = ChannelObserver::channel();
    let printer = tokio::spawn(print_progress(events, args.print_every_ms));

    let handle = scheduler
        .start(RunRequest::from(&config), Arc::new(observer))
        .context("Failed to start run")?;

    // Ctrl-C stops issuing new calls; in-flight ones still get recorded.
    let cancel = handle.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling after in-flight calls");
            cancel.cancel();
        }
    });

    let report = handle.wait().await?;
    printer.await?;

    let timestamp = chrono::Utc::now().format("%Y%m%d_%H%M%S");
    let output_path = format!("results/run_{}.json", timestamp);

    std::fs::create_dir_all("results").ok();
    let report_json = serde_json::to_string_pretty(&report)?;
    std::fs::write(&output_path, report_json)?;

    info!("Results written to {}", output_path);
    print_summary(&report);

    Ok(())
}

fn apply_overrides(config: &mut Config, args: &Args) -> Result<()> {
    if let Some(count) = args.count {
        config.batch.count = count;
    }
    if let Some(mode) = args.mode.as_deref() {
        config.batch.mode = match mode {
            "sequential" => RunMode::Sequential,
            "parallel" => RunMode::Parallel,
            other => anyhow::bail!("Invalid mode: {}, must be 'sequential' or 'parallel'", other),
        };
    }
    if let Some(concurrency) = args.concurrency {
        config.batch.concurrency = concurrency;
    }
    Ok(())
}

async fn print_progress(mut events: mpsc::UnboundedReceiver<ObserverEvent>, print_every_ms: u64) {
    let every = Duration::from_millis(print_every_ms);
    let mut last_print: Option<Instant> = None;

    while let Some(event) = events.recv().await {
        match event {
            ObserverEvent::Flush(update) => {
                if last_print.is_some_and(|t| t.elapsed() < every) {
                    continue;
                }
                last_print = Some(Instant::now());
                let stats = &update.stats;
                info!(
                    "Progress: total={} success={} errors={} avg={:.1}ms p50={}ms p95={}ms p99={}ms",
                    stats.total,
                    stats.success_count,
                    stats.error_count,
                    stats.average_duration_ms,
                    stats.latency_p50_ms,
                    stats.latency_p95_ms,
                    stats.latency_p99_ms
                );
            }
            ObserverEvent::Finished(finished) => {
                info!(
                    "Run finished: completed={} cancelled={} duration={}ms",
                    finished.completed, finished.cancelled, finished.total_duration_ms
                );
                break;
            }
            ObserverEvent::StartFailed(e) => {
                warn!("Run failed to start: {}", e);
                break;
            }
        }
    }
}

fn print_summary(report: &RunReport) {
    let stats = &report.stats;
    println!("\n=== Run Summary ({:?}) ===", report.phase);
    println!("Mode: {:?}", report.run.mode);
    if let Some(concurrency) = report.run.concurrency {
        println!("Concurrency: {}", concurrency);
    }
    println!("Duration: {}ms", report.total_duration_ms);
    println!("Target: {}", report.run.target_count);
    println!("Issued: {}", report.issued);
    println!("Recorded: {}", stats.total);
    println!("Success: {}", stats.success_count);
    println!("Errors: {}", stats.error_count);
    println!("Avg latency: {:.1}ms", stats.average_duration_ms);
    println!("Min/Max latency: {}ms / {}ms", stats.min_duration_ms, stats.max_duration_ms);
    println!("Latency p50: {}ms", stats.latency_p50_ms);
    println!("Latency p95: {}ms", stats.latency_p95_ms);
    println!("Latency p99: {}ms", stats.latency_p99_ms);
    println!();
}
