use anyhow::{Context, Result};
use clap::Parser;
use inquiry_core::{CallExecutor, CallParams, CancelToken, Config, HttpTransport, OutcomeStatus, Payload};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "preflight")]
#[command(about = "Preflight checks before a batch run (URL, canary parameters, canary call)")]
struct Args {
    /// Path to configuration file
    #[arg(long, default_value = "config/example.local.toml")]
    config: PathBuf,
}

// Canary calls slower than this warn but never fail the preflight.
const SLOW_CANARY_WARN_MS: u64 = 2_000;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let cfg = Config::from_file(&args.config)
        .with_context(|| format!("Failed to load config from {:?}", args.config))?;

    info!("Validating target URL...");
    validate_base_url(&cfg.target.base_url)
        .with_context(|| format!("Invalid target.base_url: {}", cfg.target.base_url))?;

    info!("Validating canary parameters...");
    let canary: CallParams = cfg
        .canary
        .as_ref()
        .map(CallParams::from)
        .context("[canary] section is required: runs refuse to start without it")?;
    canary.validate().context("Invalid canary parameters")?;

    let transport = HttpTransport::new(&cfg.target.base_url, &cfg.target.path, cfg.target.timeout_ms)
        .context("Failed to create HTTP transport")?;
    let endpoint = transport.endpoint().to_string();
    let executor = CallExecutor::new(Arc::new(transport));

    println!();
    println!("=== Preflight ===");
    println!("Endpoint: {endpoint}");
    println!("Canary: dateString={} nin={}", canary.date_string, mask(&canary.nin));

    let outcome = executor.execute(1, canary, &CancelToken::new()).await;
    println!(
        "POST canary -> {:?} status={} ({}ms server-side)",
        outcome.status, outcome.status_code, outcome.duration_ms
    );

    if outcome.duration_ms > SLOW_CANARY_WARN_MS {
        warn!(
            "Canary call is slow: {}ms (threshold {}ms)",
            outcome.duration_ms, SLOW_CANARY_WARN_MS
        );
    }
    if outcome.duration_ms == 0 && outcome.status_code != 0 {
        warn!("Proxy did not report elapsedMs; latency stats will read 0");
    }

    if outcome.status != OutcomeStatus::Success {
        let detail = match &outcome.payload {
            Payload::Error(e) => e.clone(),
            _ => String::from("no detail"),
        };
        anyhow::bail!("Preflight failed: canary call did not succeed ({detail})");
    }

    println!();
    println!("Preflight OK.");
    Ok(())
}

fn validate_base_url(raw: &str) -> Result<url::Url> {
    let url = url::Url::parse(raw).with_context(|| format!("Invalid URL: {raw}"))?;

    if url.scheme() != "https" && url.scheme() != "http" {
        anyhow::bail!("Base URL must be http:// or https:// (got {raw})");
    }
    if !url.username().is_empty() || url.password().is_some() {
        anyhow::bail!("Base URL must not include credentials (got {raw})");
    }
    url.host_str().context("Base URL must include a hostname")?;
    if url.query().is_some() || url.fragment().is_some() {
        anyhow::bail!("Base URL must not include query/fragment (got {raw})");
    }

    Ok(url)
}

/// Keep only the last three digits of an identifier for display.
fn mask(nin: &str) -> String {
    let visible = nin.len().saturating_sub(3);
    format!("{}{}", "*".repeat(visible), &nin[visible..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_base_url() {
        assert!(validate_base_url("https://lookup.example").is_ok());
        assert!(validate_base_url("http://127.0.0.1:3000").is_ok());
        assert!(validate_base_url("ftp://lookup.example").is_err());
        assert!(validate_base_url("https://user:pw@lookup.example").is_err());
        assert!(validate_base_url("https://lookup.example/?q=1").is_err());
        assert!(validate_base_url("lookup.example").is_err());
    }

    #[test]
    fn test_mask() {
        assert_eq!(mask("0012345678"), "*******678");
        assert_eq!(mask("12"), "12");
    }
}
