//! Spindrift CLI - acquisition coordinator and range-streaming proxy.
//!
//! Starts the HTTP streaming server over a content engine. The binary
//! ships with a simulated engine seeded with demo content; a production
//! deployment swaps in a real acquisition backend behind the same trait.

use std::sync::Arc;

use clap::Parser;
use spindrift_core::config::SpindriftConfig;
use spindrift_core::content::ContentId;
use spindrift_core::engine::simulation::SimulatedContentEngine;
use spindrift_core::tracing_setup::{CliLogLevel, init_tracing};
use spindrift_web::run_server;
use tracing::info;

const DEMO_HASH: &str = "0123456789abcdef0123456789abcdef01234567";

#[derive(Parser)]
#[command(name = "spindrift")]
#[command(about = "Acquisition coordinator and range-streaming proxy")]
struct Cli {
    /// Address to bind the HTTP server to
    #[arg(long, default_value = "127.0.0.1")]
    bind: String,

    /// Port to listen on
    #[arg(long, default_value_t = 3000)]
    port: u16,

    /// Run without persistent peer connectivity; streaming requests are
    /// refused with a structured fallback response
    #[arg(long)]
    ephemeral: bool,

    /// Console log level
    #[arg(long, default_value_t = CliLogLevel::Info)]
    log_level: CliLogLevel,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_level.as_tracing_level()).map_err(|e| anyhow::anyhow!(e))?;

    let mut config = SpindriftConfig::default();
    config.server.bind_address = cli.bind;
    config.server.port = cli.port;

    let engine = demo_engine(cli.ephemeral);
    info!(
        ephemeral = cli.ephemeral,
        "starting with simulated content engine"
    );

    run_server(config, engine).await?;
    Ok(())
}

/// Builds a simulated engine seeded with demo content so the HTTP surface
/// can be exercised without a real acquisition backend.
fn demo_engine(ephemeral: bool) -> Arc<SimulatedContentEngine> {
    let engine = if ephemeral {
        SimulatedContentEngine::new().without_persistent_peers()
    } else {
        SimulatedContentEngine::new()
    };

    let video: Vec<u8> = (0..4 * 1024 * 1024u32).map(|i| (i % 251) as u8).collect();
    engine.add_content(
        ContentId::normalize(DEMO_HASH),
        "Spindrift Demo",
        vec![
            ("demo.mp4", video),
            ("readme.txt", b"Demo content served by the simulated engine.\n".to_vec()),
        ],
    );
    Arc::new(engine)
}
