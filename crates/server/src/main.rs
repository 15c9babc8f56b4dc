// crates/server/src/main.rs
//! Tickerflow server binary.
//!
//! Binds the HTTP listener immediately; batch analysis runs entirely on
//! background tasks spawned per submission, so the server stays responsive
//! while batches grind through their job queues.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use tickerflow_core::{PricingTable, SimulatedAnalyzer};
use tickerflow_server::{create_app, AppState};

/// Default port for the server.
const DEFAULT_PORT: u16 = 48610;

#[derive(Debug, Parser)]
#[command(name = "tickerflow", version, about = "Batch stock-analysis orchestration server")]
struct Cli {
    /// Port to listen on (PORT env var also honored).
    #[arg(short, long, env = "PORT", default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Pause between consecutive jobs in a batch, in milliseconds.
    #[arg(long, default_value_t = 2000)]
    inter_job_delay_ms: u64,

    /// Per-step delay of the built-in simulated analyzer, in milliseconds.
    #[arg(long, default_value_t = 500)]
    step_delay_ms: u64,

    /// Seed a credit balance at startup, as USER:AMOUNT. Repeatable.
    #[arg(long = "grant", value_name = "USER:AMOUNT")]
    grants: Vec<String>,

    /// Load the pricing table from a JSON file instead of the built-in defaults.
    #[arg(long, value_name = "FILE")]
    pricing_file: Option<PathBuf>,
}

/// Parse a `USER:AMOUNT` grant argument.
fn parse_grant(raw: &str) -> Result<(String, u64)> {
    let (user, amount) = raw
        .rsplit_once(':')
        .with_context(|| format!("invalid grant '{raw}', expected USER:AMOUNT"))?;
    if user.is_empty() {
        anyhow::bail!("invalid grant '{raw}': empty user id");
    }
    let amount: u64 = amount
        .parse()
        .with_context(|| format!("invalid grant amount in '{raw}'"))?;
    Ok((user.to_string(), amount))
}

fn load_pricing(path: Option<&PathBuf>) -> Result<PricingTable> {
    match path {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading pricing file {}", path.display()))?;
            serde_json::from_str(&raw)
                .with_context(|| format!("parsing pricing file {}", path.display()))
        }
        None => Ok(PricingTable::default()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .compact()
        .init();

    let pricing = load_pricing(cli.pricing_file.as_ref())?;

    let analyzer = Arc::new(SimulatedAnalyzer::new(Duration::from_millis(
        cli.step_delay_ms,
    )));
    let state = AppState::new(
        analyzer,
        pricing,
        Duration::from_millis(cli.inter_job_delay_ms),
    );

    for raw in &cli.grants {
        let (user, amount) = parse_grant(raw)?;
        let balance = state.ledger.grant(&user, amount);
        tracing::info!(user_id = %user, amount, balance, "seeded credits");
    }

    let app = create_app(Arc::clone(&state));

    let addr = SocketAddr::from(([127, 0, 0, 1], cli.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;

    tracing::info!(version = env!("CARGO_PKG_VERSION"), %addr, "tickerflow listening");
    eprintln!("\u{1f4c8} tickerflow v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("  \u{2192} http://localhost:{}\n", cli.port);

    axum::serve(listener, app).await?;

    Ok(())
}
